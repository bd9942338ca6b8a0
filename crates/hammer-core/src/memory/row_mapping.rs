//! Pluggable bijections between logical rows (exposed to callers) and
//! physical rows (used on the DRAM bus).

use std::collections::HashMap;

/// A bijection between logical and physical row numbers.
///
/// All row numbers that cross the public API of [`crate::executor`] are
/// logical; everything handed to [`crate::memory::addr::AddressConverter`] is
/// physical. Replaces the source implementation's runtime
/// `RowMapping.get_by_name("...")` registry with an exhaustively-matched sum
/// type, per the Design Notes of `spec.md` §9.
#[derive(Debug, Clone)]
pub enum RowMapping {
    /// `logical_row == physical_row`.
    Trivial,
    /// An explicit table-driven remapping, used for vendor-specific internal
    /// row remapping schemes discovered through characterization.
    Table {
        /// logical → physical
        to_physical: HashMap<u32, u32>,
        /// physical → logical
        to_logical: HashMap<u32, u32>,
    },
}

/// Row mapping construction failed.
#[derive(Debug, thiserror::Error)]
pub enum RowMappingError {
    /// `from_name` was given a name that isn't a known mapping variant.
    #[error("unknown row mapping: {0:?}")]
    UnknownMapping(String),
    /// A table mapping's `logical_to_physical` map is not a bijection
    /// (two logical rows mapped to the same physical row, or vice versa).
    #[error("row mapping table is not a bijection")]
    NotBijective,
}

impl RowMapping {
    /// Builds the identity mapping.
    pub fn trivial() -> Self {
        RowMapping::Trivial
    }

    /// Builds a table-driven mapping from an explicit `logical -> physical` map.
    ///
    /// # Errors
    ///
    /// Returns [`RowMappingError::NotBijective`] if `logical_to_physical` maps
    /// two distinct logical rows to the same physical row.
    pub fn table(logical_to_physical: HashMap<u32, u32>) -> Result<Self, RowMappingError> {
        let mut to_logical = HashMap::with_capacity(logical_to_physical.len());
        for (&logical, &physical) in &logical_to_physical {
            if to_logical.insert(physical, logical).is_some() {
                return Err(RowMappingError::NotBijective);
            }
        }
        Ok(RowMapping::Table { to_physical: logical_to_physical, to_logical })
    }

    /// Looks up a mapping by the name used in configuration files.
    ///
    /// Only `"trivial"` is resolvable by name; table mappings are constructed
    /// programmatically via [`Self::table`] since they carry data a name
    /// alone can't express.
    pub fn from_name(name: &str) -> Result<Self, RowMappingError> {
        match name {
            "trivial" => Ok(RowMapping::Trivial),
            other => Err(RowMappingError::UnknownMapping(other.to_string())),
        }
    }

    /// Maps a logical row to its physical row.
    pub fn logical_to_physical(&self, logical: u32) -> u32 {
        match self {
            RowMapping::Trivial => logical,
            RowMapping::Table { to_physical, .. } => {
                *to_physical.get(&logical).unwrap_or(&logical)
            }
        }
    }

    /// Maps a physical row to its logical row.
    pub fn physical_to_logical(&self, physical: u32) -> u32 {
        match self {
            RowMapping::Trivial => physical,
            RowMapping::Table { to_logical, .. } => *to_logical.get(&physical).unwrap_or(&physical),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_mapping_round_trips() {
        let mapping = RowMapping::trivial();
        for row in [0u32, 1, 12345, 32767] {
            assert_eq!(mapping.logical_to_physical(mapping.physical_to_logical(row)), row);
            assert_eq!(mapping.physical_to_logical(mapping.logical_to_physical(row)), row);
        }
    }

    #[test]
    fn table_mapping_round_trips() {
        let mut table = HashMap::new();
        table.insert(0u32, 1u32);
        table.insert(1, 0);
        table.insert(5, 5);
        let mapping = RowMapping::table(table).unwrap();
        for row in [0u32, 1, 5] {
            assert_eq!(mapping.logical_to_physical(mapping.physical_to_logical(row)), row);
        }
        assert_eq!(mapping.logical_to_physical(0), 1);
        assert_eq!(mapping.physical_to_logical(1), 0);
    }

    #[test]
    fn table_mapping_rejects_non_bijective_input() {
        let mut table = HashMap::new();
        table.insert(0u32, 7u32);
        table.insert(1, 7);
        assert!(matches!(RowMapping::table(table), Err(RowMappingError::NotBijective)));
    }

    #[test]
    fn from_name_resolves_trivial_and_rejects_unknown() {
        assert!(matches!(RowMapping::from_name("trivial"), Ok(RowMapping::Trivial)));
        assert!(RowMapping::from_name("nonsense").is_err());
    }
}
