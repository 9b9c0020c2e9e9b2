use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A joined node's chain starts at a table other than the query's root
    #[error("node rooted at table `{node_root}` cannot join a query rooted at table `{query_root}`")]
    CrossTableRoot {
        query_root: String,
        node_root: String,
    },

    /// Two different ON conditions were attached to the same join
    #[error("conflicting join condition on `{member}`")]
    ConflictingJoinCondition { member: String },

    /// Expand was requested on a node that is not a reverse reference or association
    #[error("expand requested on `{member}`, which is not a reverse reference or association")]
    ExpandOnNonJoinable { member: String },

    /// Limit was set more than once on the same builder
    #[error("limit may only be set once per query")]
    DuplicateLimit,

    /// Count queries cannot carry a select list
    #[error("count does not support a select list")]
    CountWithSelect,

    /// Count queries cannot carry group-by nodes
    #[error("count does not support group by")]
    CountWithGroupBy,

    /// Select accepts column nodes only
    #[error("select accepts column nodes only")]
    InvalidSelect,

    /// A limited query joined an array relationship without expanding it
    #[error("cannot limit a query that joins the array relationship `{member}`; expand it first")]
    LimitedArrayJoin { member: String },

    /// The receiver was asked to coerce a value it has no rule for
    #[error("cannot convert driver value to column type {column_type} for `{column}`")]
    UnsupportedColumnType {
        column: String,
        column_type: String,
    },

    /// A database operation ran without a connection attached to the session
    #[error("no database connection attached to this session")]
    MissingContext,

    /// A transaction handle was used at the wrong nesting level
    #[error("transaction handle does not match the open transaction level")]
    TransactionMismatch,

    /// An inner scope rolled the transaction back before the outermost commit
    #[error("transaction was rolled back in a nested scope")]
    TransactionRolledBack,

    /// Navigation named a column, reference, or association the table does not have
    #[error("table `{table}` has no member `{member}`")]
    UnknownMember { table: String, member: String },

    /// An expression referenced a chain that was never joined in any enclosing query
    #[error("node for table `{table}` was not joined in this query or any enclosing query")]
    UnresolvedNode { table: String },

    /// A terminal operation ran on a builder with no root table
    #[error("query has no root table")]
    EmptyQuery,

    /// Error from the underlying database driver, tagged with the SQL that caused it
    #[error("driver error: {message}; sql: {sql}")]
    Driver { message: String, sql: String },
}

/// Result type for query and schema operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wraps a raw driver failure together with the statement that produced it.
    pub fn driver(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Error::Driver {
            message: message.into(),
            sql: sql.into(),
        }
    }
}
