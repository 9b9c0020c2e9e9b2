//! Schema-driven ORM core with a node-graph query builder for MySQL.
//!
//! Describe a database in code, run it through the analyser once, and
//! navigate it from there: tables become [`Node`]s, relationships become
//! chains of nodes, and a [`QueryBuilder`] merges every chain it is given
//! into one join tree. The tree generates a single SQL statement, and the
//! flat rows that come back are folded into nested [`Record`]s.
//!
//! ```ignore
//! use arbor::{Database, Options, QueryBuilder, ops};
//!
//! let db = Database::new("app", Options::default())
//!     .with_table(person)
//!     .with_table(project)
//!     .analyze();
//! let mut session = db.session_with(driver);
//!
//! let people = db.node("person")?;
//! let records = QueryBuilder::new(people.clone())
//!     .join(people.reverse("projects_as_manager")?)
//!     .condition(ops::eq(people.column("last_name")?, "Wolfe"))
//!     .order_by([people.column("first_name")?])
//!     .load(&mut session)
//!     .await?;
//! ```

pub mod driver;
pub mod drivers;
pub mod error;
pub mod hydrate;
pub mod mysql;
pub mod node;
pub mod query;
pub mod receive;
pub mod schema;
pub mod session;
pub mod value;

pub use driver::{Driver, DriverValue, ExecResult, Rows, Transaction};
pub use error::{Error, Result};
pub use hydrate::{Cell, Record};
pub use node::ops;
pub use node::{Node, NodeKind, Subquery};
pub use query::QueryBuilder;
pub use schema::{
    Column, ColumnType, Database, FkAction, ForeignKey, Index, ManyManyRef, Options, ReverseRef,
    Table, TypeTable,
};
pub use session::{ProfileEntry, Session, StatementKind, TxId};
pub use value::Value;
