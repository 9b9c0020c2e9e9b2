//! Query nodes
//!
//! A [`Node`] is one link in a navigation chain: a table, a column on it, or
//! a relationship hop to another table. Chains start at [`Database::node`]
//! and are cheap to clone and share; the builder merges them into a join
//! tree without ever mutating them.
//!
//! Expression nodes (comparisons, arithmetic, aggregates) are built with the
//! free functions in [`ops`].

pub mod ops;

use crate::error::{Error, Result};
use crate::query::QueryBuilder;
use crate::schema::{ColumnType, Database};
use crate::value::Value;
use compact_str::CompactString;
use ops::Operation;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

//------------------------------------------------------------------------------
// Node
//------------------------------------------------------------------------------

/// A shareable handle to one link of a navigation chain.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

#[derive(Debug)]
struct NodeInner {
    kind: NodeKind,
    parent: Option<Node>,
    alias: Option<CompactString>,
    descending: bool,
}

/// What a node stands for.
#[derive(Clone)]
pub enum NodeKind {
    /// Root of a chain: a table of one database
    Table {
        schema: Arc<Database>,
        db_key: CompactString,
        table: CompactString,
        pk: CompactString,
    },
    /// A column of the table the parent chain lands on
    Column {
        table: CompactString,
        column: CompactString,
        column_type: ColumnType,
        is_pk: bool,
    },
    /// Forward hop across a foreign key to its target row
    Reference {
        table: CompactString,
        fk_column: CompactString,
        ref_table: CompactString,
        ref_column: CompactString,
        member: CompactString,
    },
    /// Backward hop from a referenced row to the rows pointing at it
    ReverseReference {
        table: CompactString,
        ref_table: CompactString,
        ref_column: CompactString,
        ref_table_pk: CompactString,
        member: CompactString,
        member_plural: CompactString,
        is_array: bool,
    },
    /// Hop through an association table to the far side
    ManyMany {
        table: CompactString,
        assn_table: CompactString,
        our_column: CompactString,
        their_column: CompactString,
        their_table: CompactString,
        their_pk: CompactString,
        member: CompactString,
        member_plural: CompactString,
        is_type: bool,
    },
    /// Reference to a named result column registered on the builder
    Alias(CompactString),
    /// Literal value bound as a parameter
    Value(Value),
    /// Expression over other nodes
    Operation(Operation),
    /// A frozen query embedded as an expression
    Subquery(Subquery),
}

/// A frozen builder usable as an expression inside another query.
#[derive(Debug, Clone)]
pub struct Subquery {
    pub(crate) builder: Arc<QueryBuilder>,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, parent: Option<Node>) -> Node {
        Node {
            inner: Arc::new(NodeInner {
                kind,
                parent,
                alias: None,
                descending: false,
            }),
        }
    }

    /// Root node for a table; use [`Database::node`] instead of calling this
    /// directly.
    pub(crate) fn table(schema: Arc<Database>, table: &crate::schema::Table) -> Node {
        let pk = table
            .primary_key()
            .map(|c| c.name.clone())
            .unwrap_or_default();
        let kind = NodeKind::Table {
            db_key: CompactString::new(schema.key()),
            table: table.name.clone(),
            pk,
            schema,
        };
        Node::new(kind, None)
    }

    /// Wraps a literal value as a node.
    pub fn value(value: impl Into<Value>) -> Node {
        Node::new(NodeKind::Value(value.into()), None)
    }

    //--------------------------------------------------------------------------
    // Navigation
    //--------------------------------------------------------------------------

    /// A column of the table this chain lands on.
    pub fn column(&self, name: &str) -> Result<Node> {
        let (schema, table) = self.landing_table()?;
        let description = schema
            .table(&table)
            .and_then(|t| t.column(name))
            .ok_or_else(|| Error::UnknownMember {
                table: table.to_string(),
                member: name.to_string(),
            })?;
        Ok(Node::new(
            NodeKind::Column {
                table,
                column: description.name.clone(),
                column_type: description.column_type,
                is_pk: description.primary_key,
            },
            Some(self.clone()),
        ))
    }

    /// The primary-key column of the table this chain lands on.
    pub fn primary_key(&self) -> Result<Node> {
        let (_, table) = self.landing_table()?;
        let pk = self.kind_target_pk().ok_or_else(|| Error::UnknownMember {
            table: table.to_string(),
            member: "primary key".to_string(),
        })?;
        self.column(&pk)
    }

    /// Follows a forward reference by member name.
    pub fn reference(&self, member: &str) -> Result<Node> {
        let (schema, table) = self.landing_table()?;
        let unknown = || Error::UnknownMember {
            table: table.to_string(),
            member: member.to_string(),
        };
        let column = schema
            .table(&table)
            .and_then(|t| t.reference(member))
            .ok_or_else(unknown)?;
        let fk = column.foreign_key.as_ref().ok_or_else(unknown)?;
        if fk.is_type {
            return Err(unknown());
        }
        Ok(Node::new(
            NodeKind::Reference {
                table,
                fk_column: column.name.clone(),
                ref_table: fk.table.clone(),
                ref_column: fk.column.clone(),
                member: CompactString::new(&fk.member),
            },
            Some(self.clone()),
        ))
    }

    /// Follows a reverse reference by member name.
    pub fn reverse(&self, member: &str) -> Result<Node> {
        let (schema, table) = self.landing_table()?;
        let reverse = schema
            .table(&table)
            .and_then(|t| t.reverse_ref(member))
            .ok_or_else(|| Error::UnknownMember {
                table: table.to_string(),
                member: member.to_string(),
            })?;
        Ok(Node::new(
            NodeKind::ReverseReference {
                table,
                ref_table: reverse.table.clone(),
                ref_column: reverse.column.clone(),
                ref_table_pk: reverse.table_pk.clone(),
                member: CompactString::new(&reverse.member),
                member_plural: CompactString::new(&reverse.member_plural),
                is_array: !reverse.is_unique,
            },
            Some(self.clone()),
        ))
    }

    /// Follows a many-to-many association by member name.
    pub fn many_many(&self, member: &str) -> Result<Node> {
        let (schema, table) = self.landing_table()?;
        let mm = schema
            .table(&table)
            .and_then(|t| t.many_many_ref(member))
            .ok_or_else(|| Error::UnknownMember {
                table: table.to_string(),
                member: member.to_string(),
            })?;
        Ok(Node::new(
            NodeKind::ManyMany {
                table,
                assn_table: mm.assn_table.clone(),
                our_column: mm.our_column.clone(),
                their_column: mm.their_column.clone(),
                their_table: mm.their_table.clone(),
                their_pk: mm.their_pk.clone(),
                member: CompactString::new(&mm.member),
                member_plural: CompactString::new(&mm.member_plural),
                is_type: mm.is_type,
            },
            Some(self.clone()),
        ))
    }

    //--------------------------------------------------------------------------
    // Modifiers
    //--------------------------------------------------------------------------

    /// Returns a copy of this node carrying a manual alias. Manual aliases
    /// replace the automatic `t<n>`/`c<n>` ones in the generated SQL.
    pub fn aliased(&self, alias: impl Into<CompactString>) -> Node {
        Node {
            inner: Arc::new(NodeInner {
                kind: self.inner.kind.clone(),
                parent: self.inner.parent.clone(),
                alias: Some(alias.into()),
                descending: self.inner.descending,
            }),
        }
    }

    /// Returns a copy of this node that sorts descending in ORDER BY.
    pub fn descending(&self) -> Node {
        self.with_direction(true)
    }

    /// Returns a copy of this node that sorts ascending in ORDER BY.
    pub fn ascending(&self) -> Node {
        self.with_direction(false)
    }

    fn with_direction(&self, descending: bool) -> Node {
        Node {
            inner: Arc::new(NodeInner {
                kind: self.inner.kind.clone(),
                parent: self.inner.parent.clone(),
                alias: self.inner.alias.clone(),
                descending,
            }),
        }
    }

    //--------------------------------------------------------------------------
    // Accessors
    //--------------------------------------------------------------------------

    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.inner.kind
    }

    #[inline]
    pub fn alias(&self) -> Option<&str> {
        self.inner.alias.as_deref()
    }

    #[inline]
    pub fn is_descending(&self) -> bool {
        self.inner.descending
    }

    #[inline]
    pub fn parent(&self) -> Option<&Node> {
        self.inner.parent.as_ref()
    }

    /// First node of this chain.
    pub fn root(&self) -> &Node {
        let mut at = self;
        while let Some(parent) = at.parent() {
            at = parent;
        }
        at
    }

    /// The chain from its root down to this node.
    pub fn chain(&self) -> SmallVec<[Node; 4]> {
        let mut chain: SmallVec<[Node; 4]> = SmallVec::new();
        let mut at = Some(self);
        while let Some(node) = at {
            chain.push(node.clone());
            at = node.parent();
        }
        chain.reverse();
        chain
    }

    /// Name of the root table of this chain, when it has one.
    pub fn root_table(&self) -> Option<&str> {
        match self.root().kind() {
            NodeKind::Table { table, .. } => Some(table.as_str()),
            _ => None,
        }
    }

    /// The schema this chain's root table belongs to.
    pub fn schema(&self) -> Option<&Arc<Database>> {
        match self.root().kind() {
            NodeKind::Table { schema, .. } => Some(schema),
            _ => None,
        }
    }

    /// Name of the table this node lands on, for table-like nodes.
    pub fn target_table(&self) -> Option<&str> {
        match self.kind() {
            NodeKind::Table { table, .. } => Some(table.as_str()),
            NodeKind::Reference { ref_table, .. } => Some(ref_table.as_str()),
            NodeKind::ReverseReference { ref_table, .. } => Some(ref_table.as_str()),
            NodeKind::ManyMany { their_table, .. } => Some(their_table.as_str()),
            _ => None,
        }
    }

    /// Primary key of the table this node lands on, for table-like nodes.
    pub(crate) fn kind_target_pk(&self) -> Option<CompactString> {
        match self.kind() {
            NodeKind::Table { pk, .. } => Some(pk.clone()),
            NodeKind::Reference { ref_column, .. } => Some(ref_column.clone()),
            NodeKind::ReverseReference { ref_table_pk, .. } => Some(ref_table_pk.clone()),
            NodeKind::ManyMany { their_pk, .. } => Some(their_pk.clone()),
            _ => None,
        }
    }

    /// True for nodes that join another table into the query.
    pub fn is_table_like(&self) -> bool {
        matches!(
            self.kind(),
            NodeKind::Table { .. }
                | NodeKind::Reference { .. }
                | NodeKind::ReverseReference { .. }
                | NodeKind::ManyMany { .. }
        )
    }

    /// True for joins that can produce more than one row per parent.
    pub fn is_array_like(&self) -> bool {
        match self.kind() {
            NodeKind::ReverseReference { is_array, .. } => *is_array,
            NodeKind::ManyMany { .. } => true,
            _ => false,
        }
    }

    /// True for joins [`QueryBuilder::expand`] accepts.
    pub fn is_expandable(&self) -> bool {
        matches!(
            self.kind(),
            NodeKind::ReverseReference { .. } | NodeKind::ManyMany { .. }
        )
    }

    /// Member name this node hydrates under, singular and plural.
    pub(crate) fn member_names(&self) -> Option<(&str, &str)> {
        match self.kind() {
            NodeKind::Reference { member, .. } => Some((member.as_str(), member.as_str())),
            NodeKind::ReverseReference {
                member,
                member_plural,
                ..
            } => Some((member.as_str(), member_plural.as_str())),
            NodeKind::ManyMany {
                member,
                member_plural,
                ..
            } => Some((member.as_str(), member_plural.as_str())),
            _ => None,
        }
    }

    /// Resolves the schema and landing table of this node for navigation.
    fn landing_table(&self) -> Result<(Arc<Database>, CompactString)> {
        let schema = self.schema().cloned().ok_or(Error::EmptyQuery)?;
        let table = self
            .target_table()
            .map(CompactString::new)
            .ok_or_else(|| Error::UnknownMember {
                table: self.root_table().unwrap_or_default().to_string(),
                member: "column of a non-table node".to_string(),
            })?;
        Ok((schema, table))
    }

    //--------------------------------------------------------------------------
    // Equivalence
    //--------------------------------------------------------------------------

    /// Structural equality used for join-tree merging and deduplication.
    ///
    /// Manual aliases conflict only when both sides carry different ones; an
    /// aliased node still matches its unaliased twin.
    pub fn equivalent(&self, other: &Node) -> bool {
        if let (Some(a), Some(b)) = (self.alias(), other.alias())
            && a != b
        {
            return false;
        }
        if !kinds_equivalent(self, other) {
            return false;
        }
        match (self.parent(), other.parent()) {
            (None, None) => true,
            (Some(a), Some(b)) => a.equivalent(b),
            _ => false,
        }
    }
}

fn kinds_equivalent(a: &Node, b: &Node) -> bool {
    match (a.kind(), b.kind()) {
        (
            NodeKind::Table {
                db_key: ak,
                table: at,
                ..
            },
            NodeKind::Table {
                db_key: bk,
                table: bt,
                ..
            },
        ) => ak == bk && at == bt,
        (
            NodeKind::Column {
                table: at,
                column: ac,
                ..
            },
            NodeKind::Column {
                table: bt,
                column: bc,
                ..
            },
        ) => at == bt && ac == bc,
        (
            NodeKind::Reference {
                table: at,
                member: am,
                ..
            },
            NodeKind::Reference {
                table: bt,
                member: bm,
                ..
            },
        ) => at == bt && am == bm,
        (
            NodeKind::ReverseReference {
                table: at,
                ref_table: art,
                ref_column: arc,
                ..
            },
            NodeKind::ReverseReference {
                table: bt,
                ref_table: brt,
                ref_column: brc,
                ..
            },
        ) => at == bt && art == brt && arc == brc,
        (
            NodeKind::ManyMany {
                table: at,
                member: am,
                ..
            },
            NodeKind::ManyMany {
                table: bt,
                member: bm,
                ..
            },
        ) => at == bt && am == bm,
        (NodeKind::Alias(an), NodeKind::Alias(bn)) => an == bn,
        (NodeKind::Value(av), NodeKind::Value(bv)) => av == bv,
        (NodeKind::Operation(ao), NodeKind::Operation(bo)) => {
            ao.op == bo.op
                && ao.func == bo.func
                && ao.aggregate == bo.aggregate
                && ao.distinct == bo.distinct
                && a.is_descending() == b.is_descending()
                && ao.operands.len() == bo.operands.len()
                && ao
                    .operands
                    .iter()
                    .zip(bo.operands.iter())
                    .all(|(x, y)| x.equivalent(y))
        }
        (NodeKind::Subquery(aq), NodeKind::Subquery(bq)) => {
            Arc::ptr_eq(&aq.builder, &bq.builder)
        }
        _ => false,
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = self.parent() {
            write!(f, "{parent:?}.")?;
        }
        write!(f, "{:?}", self.kind())?;
        if let Some(alias) = self.alias() {
            write!(f, " as {alias}")?;
        }
        if self.is_descending() {
            write!(f, " desc")?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Table { db_key, table, .. } => write!(f, "{db_key}:{table}"),
            NodeKind::Column { column, .. } => write!(f, "{column}"),
            NodeKind::Reference { member, .. } => write!(f, "->{member}"),
            NodeKind::ReverseReference { member_plural, .. } => write!(f, "<-{member_plural}"),
            NodeKind::ManyMany { member_plural, .. } => write!(f, "<=>{member_plural}"),
            NodeKind::Alias(name) => write!(f, "alias({name})"),
            NodeKind::Value(value) => write!(f, "value({value})"),
            NodeKind::Operation(op) => write!(f, "{op:?}"),
            NodeKind::Subquery(_) => write!(f, "subquery"),
        }
    }
}

//------------------------------------------------------------------------------
// Conversions
//------------------------------------------------------------------------------

impl From<&Node> for Node {
    #[inline]
    fn from(node: &Node) -> Node {
        node.clone()
    }
}

impl From<Value> for Node {
    #[inline]
    fn from(value: Value) -> Node {
        Node::value(value)
    }
}

impl From<Subquery> for Node {
    #[inline]
    fn from(subquery: Subquery) -> Node {
        Node::new(NodeKind::Subquery(subquery), None)
    }
}

macro_rules! impl_value_node {
    ($($t:ty),*) => {
        $(impl From<$t> for Node {
            #[inline]
            fn from(value: $t) -> Node {
                Node::value(value)
            }
        })*
    };
}

impl_value_node!(
    i8,
    i16,
    i32,
    i64,
    isize,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
    bool,
    &str,
    String,
    chrono::NaiveDateTime
);
