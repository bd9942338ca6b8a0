//! Read-only bundles describing DRAM timing, geometry and memory layout.
//!
//! Instances are built once at startup (from a config file, in this repo's
//! case) and never mutated afterwards; every other component in the crate
//! takes a `&Settings` or a `Settings` by value (it is `Copy`).

use serde::{Deserialize, Serialize};

/// DRAM timing parameters, expressed in system clock cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    /// Activate-to-precharge delay.
    pub t_ras: u32,
    /// Precharge duration.
    pub t_rp: u32,
    /// Average refresh interval.
    pub t_refi: u32,
    /// Refresh cycle time.
    pub t_rfc: u32,
}

/// DRAM addressing geometry: bit widths of the row/column/bank fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    /// Number of row address bits.
    pub rowbits: u32,
    /// Number of column address bits.
    pub colbits: u32,
    /// Number of bank address bits.
    pub bankbits: u32,
}

impl Geometry {
    /// Number of addressable rows (`2^rowbits`).
    pub fn num_rows(&self) -> u32 {
        1 << self.rowbits
    }

    /// Number of addressable columns (`2^colbits`).
    pub fn num_cols(&self) -> u32 {
        1 << self.colbits
    }

    /// Number of addressable banks (`2^bankbits`).
    pub fn num_banks(&self) -> u32 {
        1 << self.bankbits
    }
}

/// PHY data path width, used to compute the DMA word size for memtest offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhySettings {
    /// Number of data bits per DFI phase.
    pub dfi_databits: u32,
    /// Number of DFI phases.
    pub nphases: u32,
}

impl PhySettings {
    /// Width in bytes of a single DMA word read back from the memtest stream.
    pub fn dma_word_bytes(&self) -> u64 {
        (self.dfi_databits as u64 * self.nphases as u64) / 8
    }
}

/// Base address and size of one of the FPGA's memory-mapped regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemRegion {
    /// Byte address of the first word of the region in the FPGA's address space.
    pub base: u64,
    /// Size of the region in bytes.
    pub size: u64,
}

/// The full read-only settings bundle consumed by the compiler and executor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// DRAM timing parameters.
    pub timing: Timings,
    /// DRAM addressing geometry.
    pub geom: Geometry,
    /// PHY data path width.
    pub phy: PhySettings,
    /// System clock frequency in Hz, used only for human-readable time estimates.
    pub sys_clk_freq: f64,
    /// The `main_ram` memory region hammering actions are executed against.
    pub main_ram: MemRegion,
    /// The `payload` memory region compiled opcode streams are uploaded to.
    pub payload: MemRegion,
}

impl Settings {
    /// Word size, in bytes, of a single encoded instruction (fixed by the ISA).
    pub const INSTRUCTION_WORD_BYTES: u64 = 4;

    /// Maximum number of instructions that fit in the `payload` region.
    pub fn payload_capacity_words(&self) -> u64 {
        self.payload.size / Self::INSTRUCTION_WORD_BYTES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_derives_counts_from_bit_widths() {
        let geom = Geometry { rowbits: 15, colbits: 10, bankbits: 3 };
        assert_eq!(geom.num_rows(), 32768);
        assert_eq!(geom.num_cols(), 1024);
        assert_eq!(geom.num_banks(), 8);
    }

    #[test]
    fn payload_capacity_is_size_over_word_size() {
        let settings = Settings {
            timing: Timings { t_ras: 14, t_rp: 7, t_refi: 3120, t_rfc: 208 },
            geom: Geometry { rowbits: 15, colbits: 10, bankbits: 3 },
            phy: PhySettings { dfi_databits: 16, nphases: 4 },
            sys_clk_freq: 100e6,
            main_ram: MemRegion { base: 0x4000_0000, size: 0x4000_0000 },
            payload: MemRegion { base: 0x0, size: 0x1_0000 },
        };
        assert_eq!(settings.payload_capacity_words(), 0x1_0000 / 4);
    }
}
