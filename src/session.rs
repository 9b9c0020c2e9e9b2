//! Session: the per-request database handle.
//!
//! A [`Session`] carries an optional driver connection, the active
//! transaction, and a statement profile log. Queries, mutations, and
//! prepares all run through it so they share one dispatch point: inside a
//! transaction they go to the transaction's connection, otherwise to the
//! pool.
//!
//! Transactions nest by counting. [`Session::begin`] opens a real driver
//! transaction only at the outermost level and hands back a [`TxId`] for
//! that level; inner begins just increment. [`Session::commit`] must be
//! called with the id of the innermost open level. [`Session::rollback`]
//! with a stale id is a no-op, which makes it safe to call on every exit
//! path after a commit has already happened.

use crate::driver::{Driver, DriverValue, ExecResult, Transaction};
use crate::error::{Error, Result};
use crate::value::Value;
use chrono::{NaiveDateTime, Utc};
use compact_str::CompactString;
use std::sync::Arc;

/// Handle for one open transaction nesting level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxId(u32);

/// What a profiled statement did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Exec,
    Prepare,
    Begin,
    Commit,
    Rollback,
}

/// One profiled statement with its wall-clock window.
#[derive(Debug, Clone)]
pub struct ProfileEntry {
    pub db_key: CompactString,
    pub begin: NaiveDateTime,
    pub end: NaiveDateTime,
    pub kind: StatementKind,
    pub sql: String,
}

/// Per-request database handle.
pub struct Session {
    driver: Option<Arc<dyn Driver>>,
    tx: Option<Box<dyn Transaction>>,
    tx_count: u32,
    tx_failed: bool,
    profiling: bool,
    profiles: Vec<ProfileEntry>,
    db_key: CompactString,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("db_key", &self.db_key)
            .field("connected", &self.driver.is_some())
            .field("tx_count", &self.tx_count)
            .field("profiling", &self.profiling)
            .finish()
    }
}

impl Session {
    pub(crate) fn detached(db_key: &str, profiling: bool) -> Session {
        Session {
            driver: None,
            tx: None,
            tx_count: 0,
            tx_failed: false,
            profiling,
            profiles: Vec::new(),
            db_key: CompactString::new(db_key),
        }
    }

    pub(crate) fn attached(db_key: &str, profiling: bool, driver: Arc<dyn Driver>) -> Session {
        Session {
            driver: Some(driver),
            ..Session::detached(db_key, profiling)
        }
    }

    /// Key of the database this session belongs to.
    #[inline]
    pub fn db_key(&self) -> &str {
        &self.db_key
    }

    /// Turns statement profiling on for this session.
    pub fn enable_profiling(&mut self) {
        self.profiling = true;
    }

    /// Takes the profile entries collected so far.
    pub fn take_profiles(&mut self) -> Vec<ProfileEntry> {
        std::mem::take(&mut self.profiles)
    }

    /// True while a transaction is open on this session.
    #[inline]
    pub fn in_transaction(&self) -> bool {
        self.tx_count > 0
    }

    //--------------------------------------------------------------------------
    // Statements
    //--------------------------------------------------------------------------

    /// Runs a row-returning statement and materializes its rows.
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Vec<DriverValue>>> {
        let started = now();
        tracing::debug!(db = %self.db_key, sql = %sql, params = params.len(), "query");
        let result = self.dispatch_query(sql, params).await;
        self.profile(StatementKind::Query, sql, started);
        result
    }

    /// Runs a row-changing statement.
    pub async fn exec(&mut self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        let started = now();
        tracing::debug!(db = %self.db_key, sql = %sql, params = params.len(), "exec");
        let result = match (&mut self.tx, &self.driver) {
            (Some(tx), _) => tx.exec(sql, params).await,
            (None, Some(driver)) => driver.exec(sql, params).await,
            (None, None) => Err(Error::MissingContext),
        }
        .map_err(|err| attach_sql(err, sql));
        self.profile(StatementKind::Exec, sql, started);
        result
    }

    /// Readies a statement on the active connection, so later runs skip the
    /// server's parse step.
    pub async fn prepare(&mut self, sql: &str) -> Result<()> {
        let started = now();
        tracing::debug!(db = %self.db_key, sql = %sql, "prepare");
        let result = match (&mut self.tx, &self.driver) {
            (Some(tx), _) => tx.prepare(sql).await,
            (None, Some(driver)) => driver.prepare(sql).await,
            (None, None) => Err(Error::MissingContext),
        }
        .map_err(|err| attach_sql(err, sql));
        self.profile(StatementKind::Prepare, sql, started);
        result
    }

    async fn dispatch_query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Vec<DriverValue>>> {
        let mut rows = match (&mut self.tx, &self.driver) {
            (Some(tx), _) => tx.query(sql, params).await,
            (None, Some(driver)) => driver.query(sql, params).await,
            (None, None) => Err(Error::MissingContext),
        }
        .map_err(|err| attach_sql(err, sql))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(|err| attach_sql(err, sql))? {
            out.push(row);
        }
        Ok(out)
    }

    //--------------------------------------------------------------------------
    // Transactions
    //--------------------------------------------------------------------------

    /// Opens a transaction level. Only the outermost level starts a driver
    /// transaction; nested calls ride on it.
    pub async fn begin(&mut self) -> Result<TxId> {
        let started = now();
        if self.tx_count == 0 {
            let driver = self.driver.clone().ok_or(Error::MissingContext)?;
            let tx = driver
                .begin()
                .await
                .map_err(|err| attach_sql(err, "BEGIN"))?;
            self.tx = Some(tx);
            self.tx_failed = false;
        }
        self.tx_count += 1;
        tracing::debug!(db = %self.db_key, level = self.tx_count, "begin transaction");
        self.profile(StatementKind::Begin, "BEGIN", started);
        Ok(TxId(self.tx_count))
    }

    /// Closes the given level. The outermost close commits the driver
    /// transaction, unless an inner level rolled it back first.
    pub async fn commit(&mut self, id: TxId) -> Result<()> {
        let started = now();
        if self.tx_count == 0 || id.0 != self.tx_count {
            return Err(Error::TransactionMismatch);
        }
        self.tx_count -= 1;
        if self.tx_count > 0 {
            return Ok(());
        }
        let Some(tx) = self.tx.take() else {
            return Err(Error::TransactionMismatch);
        };
        if self.tx_failed {
            self.tx_failed = false;
            tx.rollback()
                .await
                .map_err(|err| attach_sql(err, "ROLLBACK"))?;
            return Err(Error::TransactionRolledBack);
        }
        tracing::debug!(db = %self.db_key, "commit transaction");
        let result = tx.commit().await.map_err(|err| attach_sql(err, "COMMIT"));
        self.profile(StatementKind::Commit, "COMMIT", started);
        result
    }

    /// Abandons the given level. A stale id is ignored, so this is safe to
    /// call unconditionally on error paths. An inner rollback poisons the
    /// transaction: the outermost commit then rolls back and reports it.
    pub async fn rollback(&mut self, id: TxId) -> Result<()> {
        let started = now();
        if self.tx_count == 0 || id.0 != self.tx_count {
            return Ok(());
        }
        self.tx_count -= 1;
        if self.tx_count > 0 {
            self.tx_failed = true;
            return Ok(());
        }
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        self.tx_failed = false;
        tracing::debug!(db = %self.db_key, "rollback transaction");
        let result = tx
            .rollback()
            .await
            .map_err(|err| attach_sql(err, "ROLLBACK"));
        self.profile(StatementKind::Rollback, "ROLLBACK", started);
        result
    }

    fn profile(&mut self, kind: StatementKind, sql: &str, begin: NaiveDateTime) {
        if !self.profiling {
            return;
        }
        self.profiles.push(ProfileEntry {
            db_key: self.db_key.clone(),
            begin,
            end: now(),
            kind,
            sql: sql.to_string(),
        });
    }
}

/// Fills in the statement a bare driver error came from.
fn attach_sql(err: Error, sql: &str) -> Error {
    match err {
        Error::Driver { message, sql: s } if s.is_empty() => Error::Driver {
            message,
            sql: sql.to_string(),
        },
        other => other,
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}
