//! Conversion between `(bank, row, col)` triples and flat FPGA bus addresses.

use crate::settings::{Geometry, MemRegion};
use std::cell::RefCell;
use std::collections::HashMap;

/// Converts between `(bank, row, col)` and the flat byte address used on the
/// FPGA's `main_ram` bus.
///
/// The bus address is the `main_ram` base plus the `(bank, row, col)` triple
/// concatenated MSB-first as `bank | row | col`, each field `geom`-bits wide
/// and individually word-aligned by one DMA word (4 bytes) — the simplest
/// addressing scheme consistent with `encode_bus`/`decode_bus` being exact
/// inverses over the whole `main_ram` region. `addresses_per_row` memoizes its
/// per-row column address list since it's recomputed on every cache-miss
/// memtest decode.
#[derive(Debug)]
pub struct AddressConverter {
    geom: Geometry,
    main_ram: MemRegion,
    row_cache: RefCell<HashMap<(u32, u32), Vec<u64>>>,
}

impl AddressConverter {
    /// Builds a converter over the given geometry and `main_ram` region.
    pub fn new(geom: Geometry, main_ram: MemRegion) -> Self {
        Self { geom, main_ram, row_cache: RefCell::new(HashMap::new()) }
    }

    /// Encodes `(bank, row, col)` into a flat bus address.
    ///
    /// Total function over `bank < num_banks, row < num_rows, col < num_cols`;
    /// behavior outside those ranges is unspecified (the bits simply overlap).
    pub fn encode_bus(&self, bank: u32, row: u32, col: u32) -> u64 {
        let linear = ((bank as u64) << (self.geom.rowbits + self.geom.colbits))
            | ((row as u64) << self.geom.colbits)
            | (col as u64);
        self.main_ram.base + linear * 4
    }

    /// Decodes a flat bus address back into `(bank, row, col)`.
    ///
    /// Guaranteed to invert [`Self::encode_bus`] for any address within
    /// `main_ram`.
    pub fn decode_bus(&self, bus_addr: u64) -> (u32, u32, u32) {
        let linear = (bus_addr - self.main_ram.base) / 4;
        let col_mask = (1u64 << self.geom.colbits) - 1;
        let row_mask = (1u64 << self.geom.rowbits) - 1;
        let col = (linear & col_mask) as u32;
        let row = ((linear >> self.geom.colbits) & row_mask) as u32;
        let bank = (linear >> (self.geom.rowbits + self.geom.colbits)) as u32;
        (bank, row, col)
    }

    /// Returns (and memoizes) the list of bus addresses covering every column
    /// of `(bank, row)`.
    pub fn addresses_per_row(&self, bank: u32, row: u32) -> Vec<u64> {
        let mut cache = self.row_cache.borrow_mut();
        cache
            .entry((bank, row))
            .or_insert_with(|| (0..self.geom.num_cols()).map(|col| self.encode_bus(bank, row, col)).collect())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter() -> AddressConverter {
        let geom = Geometry { rowbits: 15, colbits: 10, bankbits: 3 };
        AddressConverter::new(geom, MemRegion { base: 0x4000_0000, size: 0x4000_0000 })
    }

    #[test]
    fn round_trips_every_address_in_a_representative_sample() {
        let conv = converter();
        for bank in 0..8u32 {
            for row in (0..32768u32).step_by(997) {
                for col in (0..1024u32).step_by(131) {
                    let addr = conv.encode_bus(bank, row, col);
                    assert_eq!(conv.decode_bus(addr), (bank, row, col));
                }
            }
        }
    }

    #[test]
    fn addresses_per_row_has_one_entry_per_column() {
        let conv = converter();
        let addrs = conv.addresses_per_row(0, 5);
        assert_eq!(addrs.len(), 1024);
        assert_eq!(addrs[0], conv.encode_bus(0, 5, 0));
        assert_eq!(addrs[1023], conv.encode_bus(0, 5, 1023));
    }

    #[test]
    fn addresses_per_row_is_memoized() {
        let conv = converter();
        let first = conv.addresses_per_row(1, 9);
        let second = conv.addresses_per_row(1, 9);
        assert_eq!(first, second);
        assert_eq!(conv.row_cache.borrow().len(), 1);
    }
}
