//! Optional per-iteration JSON error-summary logging, consumed from the
//! retention and TRR CLIs. `SPEC_FULL.md` §6, grounded in
//! `original_source/.../idle.py::update_log` and
//! `logged_row_list.py::process_errors`.

use hammer_core::HammerDetail;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

#[derive(Serialize)]
struct IterationSummary<'a> {
    iteration: u32,
    total_bitflips: u64,
    rows: &'a HammerDetail,
}

/// Appends one JSON line to `path` describing `result`: total bitflips and,
/// per logical row, the physical row and per-column bit positions that
/// flipped. Creates the file if it doesn't exist.
pub fn write_summary(path: &Path, iteration: u32, result: &HammerDetail) -> io::Result<()> {
    let total_bitflips = result.values().map(|row| row.bitflip_count).sum();
    let summary = IterationSummary { iteration, total_bitflips, rows: result };
    let json = serde_json::to_string(&summary)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{json}")
}
