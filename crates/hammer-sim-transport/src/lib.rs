//! A pure-software [`hammer_core::Transport`] implementation, standing in
//! for a real Litex/Wishbone FPGA bridge.
//!
//! Backed by a heap-allocated byte buffer for `main_ram`; like
//! [`hammer_core`]'s teacher's `swage-dummy` hammerer, it does not model
//! Rowhammer physics — it directly flips whichever byte offsets it is told
//! to, on every payload run, so callers can exercise the full
//! compile/execute/decode pipeline without real hardware.

use hammer_core::{ErrorRecord, Instruction, MemRegion};
use log::debug;
use thiserror::Error;

/// Errors a [`SimTransport`] can raise.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimTransportError {
    /// A memset/memtest window fell outside `main_ram`.
    #[error("window [offset={offset}, size={size}) is out of bounds for a {ram_size}-byte main_ram")]
    OutOfBounds {
        /// Requested window offset.
        offset: u64,
        /// Requested window size.
        size: u64,
        /// Size of the simulated `main_ram`.
        ram_size: u64,
    },
    /// An operation was attempted after [`SimTransport::close`].
    #[error("transport is closed")]
    Closed,
}

/// A software-simulated FPGA transport.
pub struct SimTransport {
    main_ram: MemRegion,
    payload_region: MemRegion,
    memory: Vec<u8>,
    inversion_divisor: u32,
    inversion_mask: u32,
    refresh_enabled: bool,
    /// Byte offsets (relative to `main_ram`) flipped by one bit on every
    /// `run_payload` call, simulating Rowhammer-induced bitflips without
    /// modeling DRAM physics.
    injected_flip_offsets: Vec<u64>,
    uploads: u32,
    runs: u32,
    closed: bool,
}

impl SimTransport {
    /// Builds a simulator over `main_ram`/`payload` regions, initially with
    /// no injected flips (every memtest will come back clean until
    /// [`Self::inject_flip_at`] is called).
    pub fn new(main_ram: MemRegion, payload_region: MemRegion) -> Self {
        Self {
            main_ram,
            payload_region,
            memory: vec![0u8; main_ram.size as usize],
            inversion_divisor: 0,
            inversion_mask: 0,
            refresh_enabled: true,
            injected_flip_offsets: Vec::new(),
            uploads: 0,
            runs: 0,
            closed: false,
        }
    }

    /// Registers a byte offset (relative to `main_ram`) to flip the
    /// low-order bit of on every future payload run.
    pub fn inject_flip_at(&mut self, byte_offset: u64) {
        self.injected_flip_offsets.push(byte_offset);
    }

    /// Number of times a payload has been uploaded so far.
    pub fn uploads(&self) -> u32 {
        self.uploads
    }

    /// Number of payloads run so far.
    pub fn runs(&self) -> u32 {
        self.runs
    }

    fn check_bounds(&self, offset: u64, size: u64) -> Result<(), SimTransportError> {
        if offset.checked_add(size).is_none_or(|end| end > self.main_ram.size) {
            return Err(SimTransportError::OutOfBounds { offset, size, ram_size: self.main_ram.size });
        }
        Ok(())
    }

    fn require_open(&self) -> Result<(), SimTransportError> {
        if self.closed {
            return Err(SimTransportError::Closed);
        }
        Ok(())
    }
}

impl hammer_core::Transport for SimTransport {
    type Error = SimTransportError;

    fn main_ram(&self) -> MemRegion {
        self.main_ram
    }

    fn payload_region(&self) -> MemRegion {
        self.payload_region
    }

    fn memset(&mut self, offset: u64, size: u64, pattern_word: u32) -> Result<(), SimTransportError> {
        self.require_open()?;
        self.check_bounds(offset, size)?;
        let start = offset as usize;
        let end = start + size as usize;
        let word_bytes = pattern_word.to_le_bytes();
        for (i, byte) in self.memory[start..end].iter_mut().enumerate() {
            *byte = word_bytes[i % 4];
        }
        Ok(())
    }

    fn upload_payload(&mut self, instructions: &[Instruction]) -> Result<(), SimTransportError> {
        self.require_open()?;
        debug!("simulating upload of a {}-instruction payload", instructions.len());
        self.uploads += 1;
        Ok(())
    }

    fn run_payload(&mut self) -> Result<(), SimTransportError> {
        self.require_open()?;
        debug!("simulating execution of the resident payload");
        self.runs += 1;
        for &offset in &self.injected_flip_offsets {
            if let Some(byte) = self.memory.get_mut(offset as usize) {
                *byte ^= 1;
            }
        }
        Ok(())
    }

    fn memtest(&mut self, offset: u64, size: u64, pattern_word: u32) -> Result<Vec<ErrorRecord>, SimTransportError> {
        self.require_open()?;
        self.check_bounds(offset, size)?;
        let start = offset as usize;
        let end = start + size as usize;
        let mut errors = Vec::new();
        for (word_index, chunk) in self.memory[start..end].chunks_exact(4).enumerate() {
            let data = u32::from_le_bytes(chunk.try_into().expect("chunks_exact(4)"));
            if data != pattern_word {
                errors.push(ErrorRecord { offset: word_index as u64, data, expected: pattern_word });
            }
        }
        Ok(errors)
    }

    fn set_inverters(&mut self, divisor: u32, mask: u32) -> Result<(), SimTransportError> {
        self.require_open()?;
        self.inversion_divisor = divisor;
        self.inversion_mask = mask;
        Ok(())
    }

    fn set_refresh_enabled(&mut self, enabled: bool) -> Result<(), SimTransportError> {
        self.require_open()?;
        self.refresh_enabled = enabled;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SimTransportError> {
        self.closed = true;
        Ok(())
    }
}
