//! Loop-sharded hammer kernel and payload framing.
//!
//! Grounded in `rowhammer_tester/scripts/playbook/lib/__init__.py`'s
//! `encode_one_loop`/`encode_long_loop` pair, restructured around
//! [`crate::opcode::Encoder`] instead of raw integer opcodes.

use super::{max_acts_in_loop, prefix_timeslice, CompileError};
use crate::opcode::{Encoder, Instruction, LOOP_COUNT_MAX, PRECHARGE_ALL_COL};
use crate::settings::Timings;

/// Encodes `unrolled` passes over `row_sequence`, repeated `rolled + 1`
/// times via a single LOOP instruction. `spec.md` §4.4.1.
///
/// When `refresh` is set, issues one REF up front and interleaves further
/// REFs so that no more than `t_refi` cycles ever separate two refresh-like
/// events, tracking an accumulator the way the source's `trefi_counter`
/// does. Returns the number of REFs issued inside the loop body, which the
/// caller folds into the LOOP's jump target and its own refresh bookkeeping.
fn encode_one_loop(
    unrolled: u64,
    rolled: u32,
    row_sequence: &[u32],
    timings: &Timings,
    encoder: &Encoder,
    bank: u32,
    refresh: bool,
    payload: &mut Vec<Instruction>,
) -> Result<u32, CompileError> {
    let mut local_refreshes: u32 = 0;
    let mut accum: u32 = 0;

    if refresh {
        payload.push(encoder.refresh(timings.t_rfc)?);
        local_refreshes = 1;
        accum = timings.t_rfc + 1;
    }

    for _ in 0..unrolled {
        for &row in row_sequence {
            if refresh && accum + timings.t_ras + timings.t_rp > timings.t_refi {
                payload.push(encoder.refresh(timings.t_rfc)?);
                accum = timings.t_rfc;
                local_refreshes += 1;
            }
            payload.push(encoder.act(timings.t_ras, bank, row)?);
            payload.push(encoder.pre(timings.t_rp, PRECHARGE_ALL_COL)?);
            if refresh {
                accum += timings.t_ras + timings.t_rp;
            }
        }
    }

    let body_len = 2 * unrolled * row_sequence.len() as u64 + local_refreshes as u64;
    let jump = u32::try_from(body_len)
        .map_err(|_| CompileError::InvariantViolated(format!("loop body of {body_len} instructions exceeds the jump field")))?;
    payload.push(encoder.loop_back(rolled, jump)?);

    Ok(local_refreshes * (rolled + 1))
}

/// Shards `rolled` repetitions of `encode_one_loop` across as many LOOP
/// instructions as the hardware's `LOOP_COUNT_BITS` requires. `spec.md`
/// §4.4.2.
///
/// `rolled == 0` short-circuits to emitting nothing, rather than following
/// the source's zero-remainder branch into an unwanted full `LOOP_COUNT_MAX`
/// chunk — the Open Question this resolves is recorded in `spec.md` §9.
fn encode_long_loop(
    unrolled: u64,
    rolled: u64,
    row_sequence: &[u32],
    timings: &Timings,
    encoder: &Encoder,
    bank: u32,
    refresh: bool,
    payload: &mut Vec<Instruction>,
) -> Result<u32, CompileError> {
    if rolled == 0 {
        return Ok(0);
    }

    let chunk_size = LOOP_COUNT_MAX as u64 + 1;
    let n_loops = rolled.div_ceil(chunk_size);
    let mut refreshes = 0u32;

    for outer_idx in 0..n_loops {
        let loop_count = if outer_idx == 0 {
            let remainder = rolled % chunk_size;
            if remainder == 0 { LOOP_COUNT_MAX } else { (remainder - 1) as u32 }
        } else {
            LOOP_COUNT_MAX
        };
        refreshes += encode_one_loop(unrolled, loop_count, row_sequence, timings, encoder, bank, refresh, payload)?;
    }

    Ok(refreshes)
}

/// Computes the repeatable-unit sizing from `spec.md` §4.4.3 and emits
/// exactly `read_count` accesses to every row in `row_sequence`, sharded as
/// needed to respect the hardware's LOOP field widths.
pub(super) fn encode_fixed_readcount(
    row_sequence: &[u32],
    read_count: u64,
    timings: &Timings,
    encoder: &Encoder,
    bank: u32,
    refresh: bool,
    payload: &mut Vec<Instruction>,
) -> Result<u32, CompileError> {
    if read_count == 0 || row_sequence.is_empty() {
        return Ok(0);
    }

    let len = row_sequence.len() as u64;
    let acts_per_interval =
        (timings.t_refi.saturating_sub(timings.t_rfc)).max(1) as u64 / (timings.t_rp + timings.t_ras).max(1) as u64;
    let acts_per_interval = acts_per_interval.max(1);

    let repeatable_unit = lcm(acts_per_interval, len).min(max_acts_in_loop());
    if repeatable_unit < len {
        return Err(CompileError::InvariantViolated(format!(
            "repeatable unit {repeatable_unit} is smaller than the row sequence length {len}"
        )));
    }
    let repetitions = repeatable_unit / len;

    let full_rounds = read_count / repetitions;
    let tail = read_count % repetitions;

    let mut refreshes = encode_long_loop(repetitions, full_rounds, row_sequence, timings, encoder, bank, refresh, payload)?;
    refreshes += encode_long_loop(1, tail, row_sequence, timings, encoder, bank, refresh, payload)?;
    Ok(refreshes)
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}

/// Leading settle NOOP every payload must open with. `spec.md` §4.4.5.
pub(super) fn encode_framing_prefix(timings: &Timings, encoder: &Encoder) -> Result<Instruction, CompileError> {
    Ok(encoder.noop(prefix_timeslice(timings))?)
}

/// Trailing `Noop{1}`, `Noop{0}` (STOP) pair every payload must close with.
pub(super) fn encode_framing_suffix(encoder: &Encoder) -> Result<[Instruction; 2], CompileError> {
    Ok([encoder.noop(1)?, encoder.noop(0)?])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings() -> Timings {
        Timings { t_ras: 14, t_rp: 7, t_refi: 3120, t_rfc: 208 }
    }

    #[test]
    fn long_loop_zero_rolled_emits_nothing() {
        let encoder = Encoder::new(3);
        let mut payload = Vec::new();
        let refreshes =
            encode_long_loop(1, 0, &[5], &timings(), &encoder, 0, true, &mut payload).unwrap();
        assert!(payload.is_empty());
        assert_eq!(refreshes, 0);
    }

    #[test]
    fn long_loop_shards_across_count_max() {
        let encoder = Encoder::new(3);
        let mut payload = Vec::new();
        // More repetitions than a single LOOP's count field can carry.
        let rolled = LOOP_COUNT_MAX as u64 + 10;
        encode_long_loop(1, rolled, &[5], &timings(), &encoder, 0, false, &mut payload).unwrap();
        let loop_count = payload.iter().filter(|i| matches!(i, Instruction::Loop { .. })).count();
        assert_eq!(loop_count, 2);
    }

    #[test]
    fn refresh_accumulator_never_exceeds_trefi_between_refs() {
        let t = timings();
        let encoder = Encoder::new(3);
        let mut payload = Vec::new();
        encode_fixed_readcount(&[0, 1, 2], 5000, &t, &encoder, 0, true, &mut payload).unwrap();

        let mut cycles_since_refresh = 0u64;
        for instr in &payload {
            match *instr {
                Instruction::Ref { .. } => {
                    assert!(cycles_since_refresh <= t.t_refi as u64);
                    cycles_since_refresh = 0;
                }
                Instruction::Act { timeslice, .. } | Instruction::Pre { timeslice, .. } => {
                    cycles_since_refresh += timeslice as u64;
                }
                _ => {}
            }
        }
    }

    #[test]
    fn readcount_with_empty_row_sequence_is_a_no_op() {
        let encoder = Encoder::new(3);
        let mut payload = Vec::new();
        let refreshes =
            encode_fixed_readcount(&[], 1000, &timings(), &encoder, 0, true, &mut payload).unwrap();
        assert!(payload.is_empty());
        assert_eq!(refreshes, 0);
    }
}
