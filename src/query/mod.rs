//! Query assembly: the builder, and the join tree terminals merge into.

mod builder;
pub(crate) mod tree;

pub use builder::QueryBuilder;
pub(crate) use builder::{COUNT_ALIAS, Command, Plan};
