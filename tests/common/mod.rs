#![allow(dead_code)]

//! Shared fixtures: the sample schema the scenario tests run against, and a
//! driver that replays canned rows while recording every statement.

use arbor::driver::{Driver, DriverValue, ExecResult, Rows, Transaction};
use arbor::{Column, ColumnType, Database, Options, Result, Table, TypeTable, Value};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

//------------------------------------------------------------------------------
// Sample schema
//------------------------------------------------------------------------------

fn person() -> Table {
    Table::new("person")
        .plural("people")
        .with_column(
            Column::new("id", ColumnType::Integer)
                .primary_key()
                .auto_id(),
        )
        .with_column(Column::new("first_name", ColumnType::String).max_length(50))
        .with_column(Column::new("last_name", ColumnType::String).max_length(50))
}

fn project() -> Table {
    Table::new("project")
        .with_column(
            Column::new("id", ColumnType::Integer)
                .primary_key()
                .auto_id(),
        )
        .with_column(Column::new("name", ColumnType::String).max_length(100))
        .with_column(
            Column::new("manager_id", ColumnType::Integer)
                .nullable()
                .references("person", "id"),
        )
        .with_column(Column::new("budget", ColumnType::Double))
        .with_column(Column::new("spent", ColumnType::Double))
}

fn team_member_assn() -> Table {
    Table::new("team_member_assn")
        .with_column(
            Column::new("person_id", ColumnType::Integer)
                .primary_key()
                .references("person", "id")
                .comment(r#"{"member": "team_member", "member_plural": "team_members"}"#),
        )
        .with_column(
            Column::new("project_id", ColumnType::Integer)
                .primary_key()
                .references("project", "id"),
        )
}

fn project_status_assn() -> Table {
    Table::new("project_status_assn")
        .with_column(
            Column::new("project_id", ColumnType::Integer)
                .primary_key()
                .references("project", "id"),
        )
        .with_column(
            Column::new("status_type_id", ColumnType::Integer)
                .primary_key()
                .references("status_type", "id"),
        )
}

fn status_type() -> TypeTable {
    TypeTable::new("status_type")
        .fields(["id", "name"])
        .row([Value::from(1u64), Value::from("Open")])
        .row([Value::from(2u64), Value::from("Closed")])
        .row([Value::from(3u64), Value::from("Canceled")])
}

/// The analysed sample database every scenario test navigates.
pub fn sample_db() -> Arc<Database> {
    Database::new("sample", Options::default())
        .with_table(person())
        .with_table(project())
        .with_table(team_member_assn())
        .with_table(project_status_assn())
        .with_type_table(status_type())
        .analyze()
}

//------------------------------------------------------------------------------
// Canned-row driver
//------------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeState {
    pub responses: Mutex<VecDeque<Vec<Vec<DriverValue>>>>,
    pub statements: Mutex<Vec<String>>,
    pub params: Mutex<Vec<Vec<Value>>>,
    pub exec_result: Mutex<ExecResult>,
}

/// Driver that replays queued responses and records what was asked of it.
#[derive(Default, Clone)]
pub struct FakeDriver {
    state: Arc<FakeState>,
}

impl FakeDriver {
    pub fn new() -> FakeDriver {
        FakeDriver::default()
    }

    /// Queues the rows the next query returns.
    pub fn push_rows(&self, rows: Vec<Vec<DriverValue>>) {
        self.state.responses.lock().unwrap().push_back(rows);
    }

    /// Sets what every exec reports back.
    pub fn set_exec_result(&self, rows_affected: u64, last_insert_id: u64) {
        *self.state.exec_result.lock().unwrap() = ExecResult {
            rows_affected,
            last_insert_id,
        };
    }

    /// Statements run so far, transaction control included.
    pub fn statements(&self) -> Vec<String> {
        self.state.statements.lock().unwrap().clone()
    }

    /// Parameters of each recorded statement, in the same order.
    pub fn params(&self) -> Vec<Vec<Value>> {
        self.state.params.lock().unwrap().clone()
    }
}

fn run_statement(state: &FakeState, sql: &str, params: &[Value]) -> Vec<Vec<DriverValue>> {
    state.statements.lock().unwrap().push(sql.to_string());
    state.params.lock().unwrap().push(params.to_vec());
    state
        .responses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_default()
}

#[async_trait]
impl Driver for FakeDriver {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Box<dyn Rows>> {
        Ok(Box::new(FakeRows {
            rows: run_statement(&self.state, sql, params).into(),
        }))
    }

    async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        run_statement(&self.state, sql, params);
        Ok(*self.state.exec_result.lock().unwrap())
    }

    async fn prepare(&self, sql: &str) -> Result<()> {
        self.state
            .statements
            .lock()
            .unwrap()
            .push(format!("PREPARE {sql}"));
        self.state.params.lock().unwrap().push(Vec::new());
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.state.statements.lock().unwrap().push("BEGIN".into());
        self.state.params.lock().unwrap().push(Vec::new());
        Ok(Box::new(FakeTransaction {
            state: self.state.clone(),
        }))
    }
}

struct FakeTransaction {
    state: Arc<FakeState>,
}

#[async_trait]
impl Transaction for FakeTransaction {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Box<dyn Rows>> {
        Ok(Box::new(FakeRows {
            rows: run_statement(&self.state, sql, params).into(),
        }))
    }

    async fn exec(&mut self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        run_statement(&self.state, sql, params);
        Ok(*self.state.exec_result.lock().unwrap())
    }

    async fn prepare(&mut self, sql: &str) -> Result<()> {
        self.state
            .statements
            .lock()
            .unwrap()
            .push(format!("PREPARE {sql}"));
        self.state.params.lock().unwrap().push(Vec::new());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.state.statements.lock().unwrap().push("COMMIT".into());
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.state
            .statements
            .lock()
            .unwrap()
            .push("ROLLBACK".into());
        Ok(())
    }
}

struct FakeRows {
    rows: VecDeque<Vec<DriverValue>>,
}

#[async_trait]
impl Rows for FakeRows {
    fn columns(&self) -> &[String] {
        &[]
    }

    async fn next(&mut self) -> Result<Option<Vec<DriverValue>>> {
        Ok(self.rows.pop_front())
    }
}

//------------------------------------------------------------------------------
// Row literals
//------------------------------------------------------------------------------

pub fn text(value: &str) -> DriverValue {
    DriverValue::Text(value.to_string())
}

pub fn int(value: i64) -> DriverValue {
    DriverValue::Int(value)
}

pub fn uint(value: u64) -> DriverValue {
    DriverValue::UInt(value)
}

pub fn dbl(value: f64) -> DriverValue {
    DriverValue::Double(value)
}

pub fn null() -> DriverValue {
    DriverValue::Null
}
