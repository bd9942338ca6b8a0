//! Retention (idle) test CLI sequencing. `SPEC_FULL.md` §6, grounded in
//! `original_source/.../retention.py` (minus its `--cell-check` sub-mode,
//! which that source marks `NOT RELIABLE`).

use crate::log_summary;
use hammer_core::{ExecutorError, HardwareExecutor, Transport};
use log::{info, warn};
use std::path::PathBuf;

/// Options for one retention run.
pub struct RetentionOptions {
    /// Logical rows to fill, idle over, and re-check.
    pub rows: Vec<u32>,
    /// How long to idle between the fill and the re-check, in seconds.
    pub idle_seconds: f64,
    /// Number of fill/idle/check rounds to run.
    pub iterations: u32,
    /// If set, a JSON summary line is appended here after every iteration.
    pub log_summary_path: Option<PathBuf>,
}

/// Runs `opts.iterations` rounds of retention testing, logging and
/// optionally writing a JSON summary after each.
pub fn run<T: Transport>(
    executor: &mut HardwareExecutor<T>,
    opts: &RetentionOptions,
) -> Result<(), ExecutorError<T::Error>> {
    for iteration in 0..opts.iterations {
        let result = executor.execute_retention_test(&opts.rows, opts.idle_seconds)?;
        info!("retention iteration {iteration}: {} row(s) accumulated flips", result.len());

        if let Some(path) = &opts.log_summary_path {
            if let Err(e) = log_summary::write_summary(path, iteration, &result) {
                warn!("failed to write retention log summary to {path:?}: {e}");
            }
        }
    }
    Ok(())
}
