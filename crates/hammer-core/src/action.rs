//! Hammering actions and the `HAMMER(row,reads,bitflips)` query grammar.

use thiserror::Error;

/// A single logical row to hammer, how many times, and an expected/observed
/// bitflip annotation from the caller.
///
/// `bitflips` is not validated or interpreted by the core; it is echoed back
/// to the caller when relevant (e.g. in retention-test logs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HammerAction {
    /// Logical row number.
    pub row: u32,
    /// Number of times to activate the row.
    pub reads: u64,
    /// Caller-supplied expected/observed bitflip count; not validated here.
    pub bitflips: u32,
}

/// An ordered sequence of hammering actions.
///
/// Order is semantically significant: it determines hammering order in
/// `sequential` mode. Two sequences compile to the same [`crate::compiler::Payload`]
/// iff they are equal element-wise.
pub type ActionSequence = Vec<HammerAction>;

/// A query token failed to match the `HAMMER(<u32>,<u64>,<u32>)` grammar.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed action token: {0:?}")]
pub struct MalformedAction(pub String);

/// Parses one query line into an [`ActionSequence`].
///
/// The line may contain zero or more whitespace-separated tokens of the form
/// `HAMMER(<row>,<reads>,<bitflips>)`; whitespace around the commas and
/// parentheses is tolerated. The first token that fails to parse aborts the
/// whole line with [`MalformedAction`] naming that token.
pub fn parse_action_line(line: &str) -> Result<ActionSequence, MalformedAction> {
    line.split_whitespace().map(parse_action_token).collect()
}

fn parse_action_token(token: &str) -> Result<HammerAction, MalformedAction> {
    let err = || MalformedAction(token.to_string());

    let body = token
        .strip_prefix("HAMMER")
        .ok_or_else(err)?
        .trim()
        .strip_prefix('(')
        .ok_or_else(err)?
        .strip_suffix(')')
        .ok_or_else(err)?;

    let mut fields = body.split(',').map(str::trim);
    let row = fields.next().ok_or_else(err)?.parse::<u32>().map_err(|_| err())?;
    let reads = fields.next().ok_or_else(err)?.parse::<u64>().map_err(|_| err())?;
    let bitflips = fields.next().ok_or_else(err)?.parse::<u32>().map_err(|_| err())?;
    if fields.next().is_some() {
        return Err(err());
    }

    Ok(HammerAction { row, reads, bitflips })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_action() {
        let actions = parse_action_line("HAMMER(0,10000,0)").unwrap();
        assert_eq!(actions, vec![HammerAction { row: 0, reads: 10000, bitflips: 0 }]);
    }

    #[test]
    fn parses_multiple_actions_in_order() {
        let actions = parse_action_line("HAMMER(0,10000,0) HAMMER(2,10000,1)").unwrap();
        assert_eq!(
            actions,
            vec![
                HammerAction { row: 0, reads: 10000, bitflips: 0 },
                HammerAction { row: 2, reads: 10000, bitflips: 1 },
            ]
        );
    }

    #[test]
    fn tolerates_internal_whitespace() {
        let actions = parse_action_line("HAMMER( 0 , 10000 , 0 )").unwrap();
        assert_eq!(actions, vec![HammerAction { row: 0, reads: 10000, bitflips: 0 }]);
    }

    #[test]
    fn empty_line_yields_empty_sequence() {
        assert_eq!(parse_action_line("").unwrap(), vec![]);
    }

    #[test]
    fn rejects_malformed_token() {
        let err = parse_action_line("HAMMER(0,10000)").unwrap_err();
        assert_eq!(err.0, "HAMMER(0,10000)");
    }

    #[test]
    fn rejects_non_numeric_field() {
        assert!(parse_action_line("HAMMER(x,10000,0)").is_err());
    }
}
