//! CQL value model and conversion between CQL values and Rust types.

mod mapping;
mod value;

pub use mapping::FromCqlValue;
pub use value::{CqlType, CqlValue};
