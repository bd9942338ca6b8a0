//! Orchestrates a hammering or TRR request end to end: fill memory, run the
//! compiled payload, read back errors, attribute bitflips to logical rows.

use crate::action::ActionSequence;
use crate::compiler::{self, CompileError, HammeringMode, Payload};
use crate::memory::{AddressConverter, RowMapping};
use crate::opcode::Instruction;
use crate::pattern::{Pattern, UnsupportedPattern};
use crate::settings::Settings;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// One discrepancy the FPGA memtest found at a given DMA-word offset into
/// the tested window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorRecord {
    /// DMA-word index into the tested window.
    pub offset: u64,
    /// Observed data word.
    pub data: u32,
    /// Expected data word (the pattern that was written).
    pub expected: u32,
}

/// Per-logical-row bitflip counts. Rows with zero flips are omitted.
pub type HammerResult = HashMap<u32, u64>;

/// Bit positions (0-31) that flipped within one tested column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnFlip {
    /// Column address the flip was read back from.
    pub col: u32,
    /// Bit positions, within the 32-bit data word, that didn't match the
    /// pattern.
    pub bit_positions: Vec<u8>,
}

/// Full bitflip detail for one logical row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowDetail {
    /// The physical row the flips were actually read back from.
    pub physical_row: u32,
    /// Per-column bit positions that flipped.
    pub columns: Vec<ColumnFlip>,
    /// Total bitflip count across every column (`sum(bit_positions.len())`).
    pub bitflip_count: u64,
}

/// Per-logical-row bitflip detail. Rows with zero flips are omitted.
pub type HammerDetail = HashMap<u32, RowDetail>;

fn summarize(detail: &HammerDetail) -> HammerResult {
    detail.iter().map(|(&row, d)| (row, d.bitflip_count)).collect()
}

/// Everything an FPGA bus bridge must expose for the executor to drive a
/// hammering test. A real implementation talks to hardware over Wishbone or
/// similar; [`crate`] ships no such implementation — see the sibling
/// `hammer-sim-transport` crate for a software stand-in.
pub trait Transport {
    /// Transport-specific I/O failure (disconnect, bus timeout, protocol error).
    type Error: std::error::Error;

    /// The FPGA's `main_ram` region (base, size).
    fn main_ram(&self) -> crate::settings::MemRegion;

    /// The FPGA's `payload` region (base, size).
    fn payload_region(&self) -> crate::settings::MemRegion;

    /// Fills `size` bytes starting at `offset` within `main_ram` with
    /// `pattern_word` repeated.
    fn memset(&mut self, offset: u64, size: u64, pattern_word: u32) -> Result<(), Self::Error>;

    /// Uploads `instructions` to `payload` memory, replacing whatever was
    /// there before. Takes the structured instruction list (not an encoded
    /// word stream) so a real adapter can frame wide fields like a LOOP's
    /// full-range `count` losslessly itself.
    fn upload_payload(&mut self, instructions: &[Instruction]) -> Result<(), Self::Error>;

    /// Runs whatever payload is currently resident in `payload` memory to
    /// completion, blocking until the FPGA signals done. Reusable across
    /// calls without a prior [`Self::upload_payload`] when the resident
    /// payload hasn't changed.
    fn run_payload(&mut self) -> Result<(), Self::Error>;

    /// Reads back `size` bytes starting at `offset` within `main_ram` and
    /// compares every word against `pattern_word`, returning one
    /// [`ErrorRecord`] per mismatch.
    fn memtest(&mut self, offset: u64, size: u64, pattern_word: u32) -> Result<Vec<ErrorRecord>, Self::Error>;

    /// Programs the data-inverter registers (`inversion_divisor`,
    /// `inversion_mask`) that realize row/cell patterns.
    fn set_inverters(&mut self, divisor: u32, mask: u32) -> Result<(), Self::Error>;

    /// Writes `controller_settings_refresh` (`false` disables DRAM
    /// autorefresh, used by retention/TRR tests).
    fn set_refresh_enabled(&mut self, enabled: bool) -> Result<(), Self::Error>;

    /// Releases the underlying connection. Idempotent.
    fn close(&mut self) -> Result<(), Self::Error>;
}

/// Errors raised while orchestrating a hammering or TRR request.
#[derive(Debug, Error)]
pub enum ExecutorError<E: std::error::Error> {
    /// The payload compiler rejected the request.
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// `set_row_pattern` was given an unknown name.
    #[error(transparent)]
    Pattern(#[from] UnsupportedPattern),
    /// The transport reported an I/O failure. Fatal: callers should close
    /// the executor and exit.
    #[error("transport failure: {0}")]
    TransportFailure(#[source] E),
}

/// The last compiled `(actions, payload)` pair, reused verbatim when a
/// caller repeats an action-equal request. `spec.md` §3/§8 property 8.
struct CompilerCache {
    last_actions: Option<ActionSequence>,
    last_payload: Option<Payload>,
}

impl CompilerCache {
    fn new() -> Self {
        Self { last_actions: None, last_payload: None }
    }

    /// Returns the compiled payload and whether it was already resident on
    /// the transport from a prior action-equal call (in which case the
    /// caller can skip re-uploading it).
    fn get_or_compile(
        &mut self,
        actions: &ActionSequence,
        compile: impl FnOnce() -> Result<Payload, CompileError>,
    ) -> Result<(Payload, bool), CompileError> {
        if self.last_actions.as_deref() == Some(actions.as_slice()) {
            if let Some(payload) = &self.last_payload {
                return Ok((payload.clone(), true));
            }
        }
        let payload = compile()?;
        self.last_actions = Some(actions.clone());
        self.last_payload = Some(payload.clone());
        Ok((payload, false))
    }
}

/// Drives a [`Transport`] through the compile/memset/run/memtest/decode
/// pipeline of `spec.md` §4.6.
pub struct HardwareExecutor<T: Transport> {
    transport: T,
    settings: Settings,
    converter: AddressConverter,
    row_mapping: RowMapping,
    cache: CompilerCache,
    pattern: Pattern,
    row_check_distance: u32,
    bank: u32,
    mode: HammeringMode,
}

impl<T: Transport> HardwareExecutor<T> {
    /// Builds an executor over `transport`, defaulting to the identity row
    /// mapping, the `all_0` pattern, zero row-check distance, bank 0, and
    /// sequential hammering mode.
    pub fn new(transport: T, settings: Settings) -> Self {
        let converter = AddressConverter::new(settings.geom, settings.main_ram);
        Self {
            transport,
            settings,
            converter,
            row_mapping: RowMapping::trivial(),
            cache: CompilerCache::new(),
            pattern: Pattern::by_name("all_0").expect("all_0 is always a valid pattern name"),
            row_check_distance: 0,
            bank: 0,
            mode: HammeringMode::Sequential,
        }
    }

    /// Selects the row/cell data pattern and programs the inverter
    /// registers. Fails with [`ExecutorError::Pattern`] on an unknown name;
    /// executor state is unchanged on failure.
    pub fn set_row_pattern(&mut self, name: &str) -> Result<(), ExecutorError<T::Error>> {
        let pattern = Pattern::by_name(name)?;
        self.transport
            .set_inverters(pattern.inversion_divisor, pattern.inversion_mask)
            .map_err(ExecutorError::TransportFailure)?;
        self.pattern = pattern;
        Ok(())
    }

    /// Sets the number of adjacent rows (each side) included in the
    /// memset/memtest window around the hammered set.
    pub fn set_row_check_distance(&mut self, distance: u32) {
        self.row_check_distance = distance;
    }

    /// Sets the DRAM bank all hammering actions target.
    pub fn set_bank(&mut self, bank: u32) {
        self.bank = bank;
    }

    /// Replaces the logical/physical row mapping.
    pub fn set_row_mapping(&mut self, mapping: RowMapping) {
        self.row_mapping = mapping;
    }

    /// Sets the hammering order strategy (`sequential` or `interleaving`).
    pub fn set_hammering_mode(&mut self, mode: HammeringMode) {
        self.mode = mode;
    }

    /// Runs a hammering test for `actions`, returning per-logical-row
    /// bitflip counts.
    pub fn execute_hammering_test(
        &mut self,
        actions: &ActionSequence,
    ) -> Result<HammerResult, ExecutorError<T::Error>> {
        let row_sequence: Vec<u32> =
            actions.iter().map(|a| self.row_mapping.logical_to_physical(a.row)).collect();
        let read_counts: Vec<u64> = actions.iter().map(|a| a.reads).collect();

        let settings = self.settings;
        let bankbits = settings.geom.bankbits;
        let bank = self.bank;
        let mode = self.mode;
        let payload_mem_size = settings.payload.size;

        let (payload, already_uploaded) = self.cache.get_or_compile(actions, || {
            compiler::compile_hammering_payload(
                &row_sequence,
                &read_counts,
                mode,
                &settings.timing,
                bankbits,
                bank,
                payload_mem_size,
                true,
            )
        })?;

        let detail = self.run_payload_and_collect(&row_sequence, &payload, already_uploaded)?;
        Ok(summarize(&detail))
    }

    /// Runs a targeted-row-refresh test for `actions`: the hammering body
    /// compiled with refresh disabled, repeated `rounds` times with
    /// `refreshes_per_round` explicit REFs appended each round.
    pub fn execute_trr_test(
        &mut self,
        actions: &ActionSequence,
        rounds: u32,
        refreshes_per_round: u32,
    ) -> Result<HammerResult, ExecutorError<T::Error>> {
        let row_sequence: Vec<u32> =
            actions.iter().map(|a| self.row_mapping.logical_to_physical(a.row)).collect();
        let read_counts: Vec<u64> = actions.iter().map(|a| a.reads).collect();

        let payload = compiler::compile_trr_payload(
            &row_sequence,
            &read_counts,
            self.mode,
            &self.settings.timing,
            self.settings.geom.bankbits,
            self.bank,
            self.settings.payload.size,
            rounds,
            refreshes_per_round,
        )?;

        let detail = self.run_payload_and_collect(&row_sequence, &payload, false)?;
        Ok(summarize(&detail))
    }

    /// Runs a retention test: disables controller autorefresh, idles for
    /// `idle_time_seconds` over `rows` (and their `row_check_distance`
    /// neighbors), then re-enables autorefresh and returns accumulated
    /// bitflip detail (physical row and per-column bit positions, alongside
    /// the logical-row count) for the JSON summary logger. Autorefresh is
    /// restored even if idling itself fails.
    pub fn execute_retention_test(
        &mut self,
        rows: &[u32],
        idle_time_seconds: f64,
    ) -> Result<HammerDetail, ExecutorError<T::Error>> {
        let physical_rows: Vec<u32> =
            rows.iter().map(|&r| self.row_mapping.logical_to_physical(r)).collect();
        let payload = compiler::compile_idle_payload(
            idle_time_seconds,
            self.settings.sys_clk_freq,
            &self.settings.timing,
            self.settings.geom.bankbits,
            self.settings.payload.size,
        )?;

        self.transport.set_refresh_enabled(false).map_err(ExecutorError::TransportFailure)?;
        let outcome = self.run_payload_and_collect(&physical_rows, &payload, false);
        self.transport.set_refresh_enabled(true).map_err(ExecutorError::TransportFailure)?;
        outcome
    }

    /// Memsets the test window, uploads and runs `payload` (skipping the
    /// upload when `already_uploaded` — the payload is action-equal to the
    /// one already resident on the transport), and decodes the resulting
    /// memtest errors into per-logical-row detail.
    fn run_payload_and_collect(
        &mut self,
        row_sequence: &[u32],
        payload: &Payload,
        already_uploaded: bool,
    ) -> Result<HammerDetail, ExecutorError<T::Error>> {
        let (offset, size) = self.memory_range(row_sequence);
        let pattern_word = self.pattern.base_word;

        self.transport.memset(offset, size, pattern_word).map_err(ExecutorError::TransportFailure)?;
        if !already_uploaded {
            self.transport
                .upload_payload(payload.instructions())
                .map_err(ExecutorError::TransportFailure)?;
        }
        self.transport.run_payload().map_err(ExecutorError::TransportFailure)?;
        let errors =
            self.transport.memtest(offset, size, pattern_word).map_err(ExecutorError::TransportFailure)?;

        Ok(self.decode_errors(offset, errors))
    }

    /// Widens `row_sequence` by `row_check_distance` on each side (clipped
    /// to `[0, num_rows-1]`) and returns the byte `(offset, size)` covering
    /// every column of every row in the widened set. `spec.md` §4.6.
    fn memory_range(&self, row_sequence: &[u32]) -> (u64, u64) {
        let num_rows = self.settings.geom.num_rows();
        let distance = self.row_check_distance;

        let min_row = row_sequence.iter().copied().min().unwrap_or(0);
        let max_row = row_sequence.iter().copied().max().unwrap_or(0);
        let low = min_row.saturating_sub(distance);
        let high = (max_row.saturating_add(distance)).min(num_rows - 1);

        let addrs_low = self.converter.addresses_per_row(self.bank, low);
        let addrs_high = self.converter.addresses_per_row(self.bank, high);
        let base = *addrs_low.first().expect("num_cols > 0");
        let last = *addrs_high.last().expect("num_cols > 0");

        let offset = base - self.settings.main_ram.base;
        let size = last - base + Settings::INSTRUCTION_WORD_BYTES;
        (offset, size)
    }

    /// Groups raw memtest mismatches by physical row and column, translates
    /// to logical rows, and records the flipped bit positions and total
    /// count per row, omitting rows with zero flips.
    fn decode_errors(&self, window_offset: u64, errors: Vec<ErrorRecord>) -> HammerDetail {
        let word_bytes = Settings::INSTRUCTION_WORD_BYTES;
        let mut by_physical_row: HashMap<u32, Vec<ColumnFlip>> = HashMap::new();

        for err in errors {
            let bus_addr = self.settings.main_ram.base + window_offset + err.offset * word_bytes;
            let (_, physical_row, col) = self.converter.decode_bus(bus_addr);
            let diff = err.data ^ err.expected;
            let bit_positions: Vec<u8> = (0..32).filter(|b| diff & (1 << b) != 0).collect();
            by_physical_row.entry(physical_row).or_default().push(ColumnFlip { col, bit_positions });
        }

        let mut result = HammerDetail::new();
        for (physical_row, columns) in by_physical_row {
            let bitflip_count: u64 = columns.iter().map(|c| c.bit_positions.len() as u64).sum();
            if bitflip_count > 0 {
                let logical_row = self.row_mapping.physical_to_logical(physical_row);
                result.insert(logical_row, RowDetail { physical_row, columns, bitflip_count });
            }
        }
        result
    }

    /// Closes the transport. Idempotent; safe to call more than once.
    pub fn stop(&mut self) -> Result<(), ExecutorError<T::Error>> {
        self.transport.close().map_err(ExecutorError::TransportFailure)
    }
}

impl<T: Transport> Drop for HardwareExecutor<T> {
    fn drop(&mut self) {
        let _ = self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{Geometry, MemRegion, PhySettings, Timings};
    use std::convert::Infallible;

    struct FakeTransport {
        main_ram: MemRegion,
        payload: MemRegion,
        memory: Vec<u32>,
        uploads: u32,
        runs: u32,
    }

    impl FakeTransport {
        fn new(main_ram: MemRegion, payload: MemRegion) -> Self {
            Self {
                main_ram,
                payload,
                memory: vec![0; (main_ram.size / 4) as usize],
                uploads: 0,
                runs: 0,
            }
        }
    }

    impl Transport for FakeTransport {
        type Error = Infallible;

        fn main_ram(&self) -> MemRegion {
            self.main_ram
        }

        fn payload_region(&self) -> MemRegion {
            self.payload
        }

        fn memset(&mut self, offset: u64, size: u64, pattern_word: u32) -> Result<(), Infallible> {
            let start = (offset / 4) as usize;
            let count = (size / 4) as usize;
            for word in &mut self.memory[start..start + count] {
                *word = pattern_word;
            }
            Ok(())
        }

        fn upload_payload(&mut self, _instructions: &[Instruction]) -> Result<(), Infallible> {
            self.uploads += 1;
            Ok(())
        }

        fn run_payload(&mut self) -> Result<(), Infallible> {
            self.runs += 1;
            // Simulate a single bitflip at the first tested word.
            if let Some(word) = self.memory.get_mut(0) {
                *word ^= 1;
            }
            Ok(())
        }

        fn memtest(&mut self, offset: u64, size: u64, pattern_word: u32) -> Result<Vec<ErrorRecord>, Infallible> {
            let start = (offset / 4) as usize;
            let count = (size / 4) as usize;
            let mut errors = Vec::new();
            for (i, &word) in self.memory[start..start + count].iter().enumerate() {
                if word != pattern_word {
                    errors.push(ErrorRecord { offset: i as u64, data: word, expected: pattern_word });
                }
            }
            Ok(errors)
        }

        fn set_inverters(&mut self, _divisor: u32, _mask: u32) -> Result<(), Infallible> {
            Ok(())
        }

        fn set_refresh_enabled(&mut self, _enabled: bool) -> Result<(), Infallible> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    fn settings() -> Settings {
        Settings {
            timing: Timings { t_ras: 14, t_rp: 7, t_refi: 3120, t_rfc: 208 },
            geom: Geometry { rowbits: 15, colbits: 10, bankbits: 3 },
            phy: PhySettings { dfi_databits: 16, nphases: 4 },
            sys_clk_freq: 100e6,
            main_ram: MemRegion { base: 0x4000_0000, size: 0x4000_0000 },
            payload: MemRegion { base: 0x0, size: 0x1_0000 },
        }
    }

    #[test]
    fn hammering_test_reports_a_bitflip_on_the_first_row() {
        let settings = settings();
        let transport = FakeTransport::new(settings.main_ram, settings.payload);
        let mut executor = HardwareExecutor::new(transport, settings);
        let actions = vec![crate::action::HammerAction { row: 0, reads: 1000, bitflips: 0 }];

        let result = executor.execute_hammering_test(&actions).unwrap();
        assert_eq!(result.get(&0), Some(&1));
    }

    #[test]
    fn repeated_identical_request_uploads_once_but_runs_and_memtests_twice() {
        let settings = settings();
        let transport = FakeTransport::new(settings.main_ram, settings.payload);
        let mut executor = HardwareExecutor::new(transport, settings);
        let actions = vec![crate::action::HammerAction { row: 0, reads: 1000, bitflips: 0 }];

        executor.execute_hammering_test(&actions).unwrap();
        executor.execute_hammering_test(&actions).unwrap();

        assert!(executor.cache.last_payload.is_some());
        assert_eq!(executor.transport.uploads, 1);
        assert_eq!(executor.transport.runs, 2);
    }

    #[test]
    fn retention_test_reports_physical_row_and_column_detail() {
        let settings = settings();
        let transport = FakeTransport::new(settings.main_ram, settings.payload);
        let mut executor = HardwareExecutor::new(transport, settings);

        let detail = executor.execute_retention_test(&[0], 0.001).unwrap();
        let row = detail.get(&0).expect("FakeTransport always flips the first tested word");
        assert_eq!(row.physical_row, 0);
        assert_eq!(row.bitflip_count, 1);
        assert_eq!(row.columns.iter().map(|c| c.bit_positions.len() as u64).sum::<u64>(), row.bitflip_count);
    }

    #[test]
    fn unknown_pattern_name_leaves_executor_state_unchanged() {
        let settings = settings();
        let transport = FakeTransport::new(settings.main_ram, settings.payload);
        let mut executor = HardwareExecutor::new(transport, settings);
        let before = executor.pattern;
        assert!(executor.set_row_pattern("checkerboard").is_err());
        assert_eq!(executor.pattern, before);
    }

    #[test]
    fn row_check_distance_clips_to_valid_row_range() {
        let settings = settings();
        let transport = FakeTransport::new(settings.main_ram, settings.payload);
        let mut executor = HardwareExecutor::new(transport, settings);
        executor.set_row_check_distance(10);
        // Row 0 widened by 10 on the low side must clip to 0, not underflow.
        let (offset, _size) = executor.memory_range(&[0]);
        assert_eq!(offset, 0);
    }
}
