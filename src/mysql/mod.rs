//! MySQL statement generation and data manipulation helpers.

mod dml;
pub(crate) mod generator;

pub use dml::{associate, insert, update};
