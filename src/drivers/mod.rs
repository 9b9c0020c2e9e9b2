//! Driver adapters for real databases, each behind its own feature.

#[cfg(feature = "mysql-driver")]
pub mod mysql_async;
