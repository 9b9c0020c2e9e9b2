//! Driver seam
//!
//! Everything above this module speaks [`Value`] and SQL text with `?`
//! placeholders; everything below speaks a concrete database protocol.
//! Adapters implement [`Driver`] for a connection pool and [`Transaction`]
//! for a checked-out connection with an open transaction. Row data comes
//! back as [`DriverValue`]s, untyped until the receiver applies the
//! statement's column types.
//!
//! Dropping a [`Transaction`] without committing abandons it; adapters roll
//! back on drop where their protocol allows.

use crate::error::Result;
use crate::value::Value;
use async_trait::async_trait;

/// A raw value as the wire protocol delivers it, before column typing.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DriverValue {
    #[default]
    Null,
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// Outcome of a statement that changes rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub last_insert_id: u64,
}

/// A database connection source.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Runs a statement that returns rows.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Box<dyn Rows>>;

    /// Runs a statement that changes rows.
    async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecResult>;

    /// Parses a statement server-side without running it.
    async fn prepare(&self, sql: &str) -> Result<()>;

    /// Opens a transaction on a dedicated connection.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// An open transaction. Statements run through it see its uncommitted state.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Runs a statement that returns rows inside the transaction.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Box<dyn Rows>>;

    /// Runs a statement that changes rows inside the transaction.
    async fn exec(&mut self, sql: &str, params: &[Value]) -> Result<ExecResult>;

    /// Parses a statement on the transaction's connection.
    async fn prepare(&mut self, sql: &str) -> Result<()>;

    /// Makes the transaction's changes permanent.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards the transaction's changes.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// A result set, consumed row by row.
#[async_trait]
pub trait Rows: Send {
    /// Column names in statement order.
    fn columns(&self) -> &[String];

    /// The next row, or `None` when the set is exhausted.
    async fn next(&mut self) -> Result<Option<Vec<DriverValue>>>;
}
