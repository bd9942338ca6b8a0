//! Address conversion and row-mapping abstractions.

mod addr;
mod row_mapping;

pub use addr::AddressConverter;
pub use row_mapping::{RowMapping, RowMappingError};
