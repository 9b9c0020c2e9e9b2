//! Runtime schema descriptions
//!
//! A [`Database`] describes the tables, columns, and relationships of one
//! physical database. Descriptions are built in code, passed through
//! [`Database::analyze`] once, and shared immutably behind an [`Arc`] from
//! then on. The analyser fills every name a description leaves empty and
//! resolves foreign keys into navigable references; see [`analyze`].

pub(crate) mod analyze;
pub(crate) mod naming;

use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::session::Session;
use crate::value::Value;
use compact_str::CompactString;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

//------------------------------------------------------------------------------
// Column Types
//------------------------------------------------------------------------------

/// Semantic type of a column, independent of its SQL declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ColumnType {
    /// Blob column
    Bytes,
    /// Character column
    String,
    /// 32-bit signed integer column
    Integer,
    /// 32-bit unsigned integer column
    UnsignedInteger,
    /// 64-bit signed integer column
    Integer64,
    /// 64-bit unsigned integer column
    UnsignedInteger64,
    /// Date, time, or timestamp column
    DateTime,
    /// 32-bit floating point column
    Float,
    /// 64-bit floating point column
    Double,
    /// Boolean or bit column
    Bool,
    /// Column with no declared semantic type; values pass through untouched
    #[default]
    Unknown,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Bytes => "bytes",
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::UnsignedInteger => "unsigned integer",
            ColumnType::Integer64 => "integer64",
            ColumnType::UnsignedInteger64 => "unsigned integer64",
            ColumnType::DateTime => "datetime",
            ColumnType::Float => "float",
            ColumnType::Double => "double",
            ColumnType::Bool => "bool",
            ColumnType::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

//------------------------------------------------------------------------------
// Options
//------------------------------------------------------------------------------

/// Per-database configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Options {
    /// Connection string handed to the driver, if this database connects
    pub dsn: Option<String>,
    /// Suffix marking a table as a type enumeration, default `_type`
    pub type_table_suffix: String,
    /// Suffix marking a table as a many-to-many association, default `_assn`
    pub association_suffix: String,
    /// Suffix stripped from foreign-key column names to derive member names,
    /// default `_id`
    pub id_suffix: String,
    /// Prefix prepended to derived struct-level names
    pub struct_prefix: String,
    /// Prefix prepended to derived member names for associated objects
    pub object_prefix: String,
    /// Record begin and end times of every statement on the session
    pub profiling: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            dsn: None,
            type_table_suffix: "_type".into(),
            association_suffix: "_assn".into(),
            id_suffix: "_id".into(),
            struct_prefix: String::new(),
            object_prefix: String::new(),
            profiling: false,
        }
    }
}

//------------------------------------------------------------------------------
// Columns
//------------------------------------------------------------------------------

/// Referential action a foreign key declares for updates or deletes of the
/// referenced row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FkAction {
    /// No action declared
    #[default]
    None,
    /// Set the referencing column to NULL
    SetNull,
    /// Set the referencing column to its default
    SetDefault,
    /// Propagate the change to the referencing rows
    Cascade,
    /// Refuse the change while referencing rows exist
    Restrict,
}

/// A foreign key on a column, resolved by the analyser into the member names
/// both sides of the relationship navigate with.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ForeignKey {
    /// Referenced table
    pub table: CompactString,
    /// Referenced column, normally the primary key
    pub column: CompactString,
    /// Action on update of the referenced key
    pub update_action: FkAction,
    /// Action on delete of the referenced row
    pub delete_action: FkAction,
    /// Member name of the forward reference, filled from the column name
    pub member: String,
    /// Singular member name of the reverse reference on the target table
    pub reverse_member: String,
    /// Plural member name of the reverse reference on the target table
    pub reverse_member_plural: String,
    /// Position of the matching entry in the target table's `reverse_refs`,
    /// filled by the analyser; stays `None` for type-table references
    pub reverse_ref: Option<usize>,
    /// The referenced table is a type enumeration
    pub is_type: bool,
}

impl ForeignKey {
    pub fn new(table: impl Into<CompactString>, column: impl Into<CompactString>) -> Self {
        ForeignKey {
            table: table.into(),
            column: column.into(),
            update_action: FkAction::None,
            delete_action: FkAction::None,
            member: String::new(),
            reverse_member: String::new(),
            reverse_member_plural: String::new(),
            reverse_ref: None,
            is_type: false,
        }
    }
}

/// A column description.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Column {
    /// Column name in the database
    pub name: CompactString,
    /// Human-readable name, filled when empty
    pub literal_name: String,
    /// Member name, filled when empty
    pub object_name: String,
    /// Semantic type
    pub column_type: ColumnType,
    /// Maximum character or byte length, zero when unbounded
    pub max_length: u64,
    /// Default value applied by inserts when the field is absent
    pub default_value: Value,
    /// Smallest value the column accepts, if constrained
    pub min_value: Option<Value>,
    /// Largest value the column accepts, if constrained
    pub max_value: Option<Value>,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    /// An index covers this column; the analyser also sets this for primary
    /// keys, unique columns, and columns named by a table index
    pub indexed: bool,
    /// The database assigns this column's value on insert
    pub auto_id: bool,
    /// The database refreshes this timestamp column on every update
    pub auto_update: bool,
    /// Raw comment; a trailing JSON object is parsed into `options`
    pub comment: String,
    /// Options parsed out of the comment by the analyser
    pub options: serde_json::Map<String, serde_json::Value>,
    pub foreign_key: Option<ForeignKey>,
}

impl Column {
    pub fn new(name: impl Into<CompactString>, column_type: ColumnType) -> Self {
        Column {
            name: name.into(),
            literal_name: String::new(),
            object_name: String::new(),
            column_type,
            max_length: 0,
            default_value: Value::Null,
            min_value: None,
            max_value: None,
            nullable: false,
            primary_key: false,
            unique: false,
            indexed: false,
            auto_id: false,
            auto_update: false,
            comment: String::new(),
            options: serde_json::Map::new(),
            foreign_key: None,
        }
    }

    /// Marks this column as the table's primary key.
    #[inline]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.unique = true;
        self
    }

    /// Marks this column as assigned by the database on insert.
    #[inline]
    pub fn auto_id(mut self) -> Self {
        self.auto_id = true;
        self
    }

    #[inline]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[inline]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[inline]
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Marks this timestamp column as refreshed by the database on update.
    #[inline]
    pub fn auto_update(mut self) -> Self {
        self.auto_update = true;
        self
    }

    #[inline]
    pub fn max_length(mut self, length: u64) -> Self {
        self.max_length = length;
        self
    }

    #[inline]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = value.into();
        self
    }

    /// Constrains the column to a closed range of values.
    #[inline]
    pub fn range(mut self, min: impl Into<Value>, max: impl Into<Value>) -> Self {
        self.min_value = Some(min.into());
        self.max_value = Some(max.into());
        self
    }

    #[inline]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Points this column at another table's column.
    #[inline]
    pub fn references(mut self, table: impl Into<CompactString>, column: impl Into<CompactString>) -> Self {
        self.foreign_key = Some(ForeignKey::new(table, column));
        self
    }

    /// Sets the update action of the foreign key declared by
    /// [`Column::references`].
    #[inline]
    pub fn on_update(mut self, action: FkAction) -> Self {
        if let Some(fk) = self.foreign_key.as_mut() {
            fk.update_action = action;
        }
        self
    }

    /// Sets the delete action of the foreign key declared by
    /// [`Column::references`].
    #[inline]
    pub fn on_delete(mut self, action: FkAction) -> Self {
        if let Some(fk) = self.foreign_key.as_mut() {
            fk.delete_action = action;
        }
        self
    }
}

/// A single or composite index over a table's columns.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Index {
    pub columns: Vec<CompactString>,
    pub unique: bool,
}

impl Index {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CompactString>,
    {
        Index {
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    #[inline]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

//------------------------------------------------------------------------------
// References filled by the analyser
//------------------------------------------------------------------------------

/// The reverse side of a foreign key: from the referenced table back to the
/// rows that point at it.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReverseRef {
    /// Table holding the foreign key
    pub table: CompactString,
    /// Foreign-key column on that table
    pub column: CompactString,
    /// Primary key of the table holding the foreign key
    pub table_pk: CompactString,
    /// Singular member name
    pub member: String,
    /// Plural member name
    pub member_plural: String,
    /// The foreign key is unique, so at most one row points back
    pub is_unique: bool,
}

/// One direction of a many-to-many association.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ManyManyRef {
    /// Association table in the middle
    pub assn_table: CompactString,
    /// Column of the association table pointing at this side
    pub our_column: CompactString,
    /// Column of the association table pointing at the far side
    pub their_column: CompactString,
    /// Table on the far side
    pub their_table: CompactString,
    /// Primary key of the far table
    pub their_pk: CompactString,
    /// Singular member name
    pub member: String,
    /// Plural member name
    pub member_plural: String,
    /// Position of the matching link in the far table's `many_many` slice;
    /// `None` when the far side is a type table
    pub mirror: Option<usize>,
    /// The far side is a type enumeration
    pub is_type: bool,
}

//------------------------------------------------------------------------------
// Tables
//------------------------------------------------------------------------------

/// A table description.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Table {
    /// Table name in the database
    pub name: CompactString,
    /// Human-readable singular name, filled when empty
    pub literal_name: String,
    /// Human-readable plural name, filled when empty
    pub literal_plural: String,
    /// Singular member name, filled when empty
    pub object_name: String,
    /// Plural member name, filled when empty
    pub object_plural: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    /// Raw comment; a trailing JSON object is parsed into `options`
    pub comment: String,
    /// Options parsed out of the comment by the analyser
    pub options: serde_json::Map<String, serde_json::Value>,
    /// Reverse references filled in from other tables' foreign keys
    pub reverse_refs: Vec<ReverseRef>,
    /// Many-to-many associations this table participates in
    pub many_many: Vec<ManyManyRef>,
    /// This table is an association linking two others
    pub(crate) association: bool,
    /// The analyser rejected this table; it is invisible to queries
    pub(crate) skip: bool,
}

impl Table {
    pub fn new(name: impl Into<CompactString>) -> Self {
        Table {
            name: name.into(),
            literal_name: String::new(),
            literal_plural: String::new(),
            object_name: String::new(),
            object_plural: String::new(),
            columns: Vec::new(),
            indexes: Vec::new(),
            comment: String::new(),
            options: serde_json::Map::new(),
            reverse_refs: Vec::new(),
            many_many: Vec::new(),
            association: false,
            skip: false,
        }
    }

    #[inline]
    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    #[inline]
    pub fn with_index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    #[inline]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Overrides the derived plural names, for irregular nouns.
    pub fn plural(mut self, object_plural: impl Into<String>) -> Self {
        self.object_plural = object_plural.into();
        self.literal_plural = naming::literal(&self.object_plural);
        self
    }

    /// Looks up a column by database name or member name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name || c.object_name == name)
    }

    /// The table's primary-key column. Tables that survive analysis have
    /// exactly one.
    pub fn primary_key(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// Looks up a forward reference by member name.
    pub fn reference(&self, member: &str) -> Option<&Column> {
        self.columns.iter().find(|c| {
            c.foreign_key
                .as_ref()
                .is_some_and(|fk| fk.member == member)
        })
    }

    /// Looks up a reverse reference by singular or plural member name.
    pub fn reverse_ref(&self, member: &str) -> Option<&ReverseRef> {
        self.reverse_refs
            .iter()
            .find(|r| r.member == member || r.member_plural == member)
    }

    /// Looks up a many-to-many association by singular or plural member name.
    pub fn many_many_ref(&self, member: &str) -> Option<&ManyManyRef> {
        self.many_many
            .iter()
            .find(|m| m.member == member || m.member_plural == member)
    }

    /// Columns selected when a query names none: everything except blobs.
    pub(crate) fn default_select(&self) -> impl Iterator<Item = &Column> {
        self.columns
            .iter()
            .filter(|c| c.column_type != ColumnType::Bytes)
    }
}

//------------------------------------------------------------------------------
// Type Tables
//------------------------------------------------------------------------------

/// A fixed enumeration table. Rows are part of the schema description and
/// never queried; associations against one hydrate as arrays of ids.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TypeTable {
    pub name: CompactString,
    pub literal_name: String,
    pub literal_plural: String,
    pub object_name: String,
    pub object_plural: String,
    /// Field names, by convention starting with `id` then `name`
    pub fields: Vec<String>,
    /// One entry per enumeration row, in field order
    pub values: Vec<Vec<Value>>,
    /// Constant names per id, filled by the analyser from the name field
    pub constants: IndexMap<u64, String>,
}

impl TypeTable {
    pub fn new(name: impl Into<CompactString>) -> Self {
        TypeTable {
            name: name.into(),
            literal_name: String::new(),
            literal_plural: String::new(),
            object_name: String::new(),
            object_plural: String::new(),
            fields: Vec::new(),
            values: Vec::new(),
            constants: IndexMap::new(),
        }
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn row<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.values
            .push(values.into_iter().map(Into::into).collect());
        self
    }

    /// Position of a field within each row.
    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == field)
    }

    /// The id of a row, read from the `id` field or the first field.
    pub(crate) fn row_id(&self, row: &[Value]) -> Option<u64> {
        let idx = self.field_index("id").unwrap_or(0);
        row.get(idx).and_then(Value::as_u64)
    }

    /// The display name of a row, read from the `name` field or the second
    /// field.
    pub(crate) fn row_name(&self, row: &[Value]) -> Option<String> {
        let idx = self.field_index("name").unwrap_or(1);
        row.get(idx).map(|v| v.to_string())
    }
}

//------------------------------------------------------------------------------
// Database
//------------------------------------------------------------------------------

/// A complete database description, frozen after analysis.
#[derive(Debug)]
pub struct Database {
    key: CompactString,
    options: Options,
    tables: Vec<Table>,
    type_tables: Vec<TypeTable>,
    table_index: IndexMap<CompactString, usize>,
    type_table_index: IndexMap<CompactString, usize>,
    analyzed: bool,
}

impl Database {
    pub fn new(key: impl Into<CompactString>, options: Options) -> Self {
        Database {
            key: key.into(),
            options,
            tables: Vec::new(),
            type_tables: Vec::new(),
            table_index: IndexMap::new(),
            type_table_index: IndexMap::new(),
            analyzed: false,
        }
    }

    #[inline]
    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    #[inline]
    pub fn with_type_table(mut self, table: TypeTable) -> Self {
        self.type_tables.push(table);
        self
    }

    /// Fills names, resolves references, validates associations, and freezes
    /// the description. Invalid tables are logged and skipped rather than
    /// failing the whole database.
    pub fn analyze(mut self) -> Arc<Database> {
        if !self.analyzed {
            analyze::run(&mut self);
            self.analyzed = true;
        }
        Arc::new(self)
    }

    /// The key this database registers under.
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// All analysed table descriptions, associations included.
    #[inline]
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    #[inline]
    pub fn type_tables(&self) -> &[TypeTable] {
        &self.type_tables
    }

    /// Looks up a table by database name. Skipped and association tables are
    /// found too; use [`Database::node`] for the queryable surface.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.table_index.get(name).map(|&i| &self.tables[i])
    }

    pub fn type_table(&self, name: &str) -> Option<&TypeTable> {
        self.type_table_index
            .get(name)
            .map(|&i| &self.type_tables[i])
    }

    /// Starts a navigation chain at a table. This is the root of every query
    /// against this database.
    pub fn node(self: &Arc<Self>, table: &str) -> Result<Node> {
        match self.table(table) {
            Some(t) if !t.skip && !t.association => Ok(Node::table(self.clone(), t)),
            _ => Err(Error::UnknownMember {
                table: self.key.to_string(),
                member: table.to_string(),
            }),
        }
    }

    /// Opens a session without a connection. Planning and SQL previews work;
    /// statements fail until a driver is attached.
    pub fn session(self: &Arc<Self>) -> Session {
        Session::detached(&self.key, self.options.profiling)
    }

    /// Opens a session on a driver connection pool.
    pub fn session_with(self: &Arc<Self>, driver: Arc<dyn Driver>) -> Session {
        Session::attached(&self.key, self.options.profiling, driver)
    }

    pub(crate) fn rebuild_indices(&mut self) {
        self.table_index = self
            .tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
        self.type_table_index = self
            .type_tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
    }

    pub(crate) fn tables_mut(&mut self) -> &mut Vec<Table> {
        &mut self.tables
    }

    pub(crate) fn type_tables_mut(&mut self) -> &mut Vec<TypeTable> {
        &mut self.type_tables
    }
}
