//! Targeted-row-refresh (TRR) test CLI sequencing. `SPEC_FULL.md` §6.

use hammer_core::{ActionSequence, ExecutorError, HammerResult, HardwareExecutor, Transport};
use log::info;

/// Options for one TRR run.
pub struct TrrOptions {
    /// Rows and read counts to hammer each round.
    pub actions: ActionSequence,
    /// Number of hammer/refresh rounds.
    pub rounds: u32,
    /// Explicit refreshes injected after each round's hammering body.
    pub refreshes_per_round: u32,
}

/// Runs a single TRR test and logs a summary.
pub fn run<T: Transport>(
    executor: &mut HardwareExecutor<T>,
    opts: &TrrOptions,
) -> Result<HammerResult, ExecutorError<T::Error>> {
    let result = executor.execute_trr_test(&opts.actions, opts.rounds, opts.refreshes_per_round)?;
    info!(
        "trr test ({} rounds, {} refreshes/round): {} row(s) flipped",
        opts.rounds,
        opts.refreshes_per_round,
        result.len()
    );
    Ok(result)
}
