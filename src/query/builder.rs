//! Query builder
//!
//! [`QueryBuilder`] accumulates navigation chains and clauses, then merges
//! them into a [`JoinTree`] when a terminal operation runs. Builder misuse
//! (a second limit, expanding a scalar join, selecting a non-column) is
//! parked on the builder and surfaced by the terminal, so call chains stay
//! fluent.
//!
//! Freezing a builder with [`QueryBuilder::into_subquery`] turns it into an
//! expression node. Chains inside a subquery may reach tables of enclosing
//! queries; those stay out of the subquery's own tree and resolve against
//! the enclosing scopes during SQL generation.

use super::tree::{JoinTree, join_member_name};
use crate::error::{Error, Result};
use crate::hydrate::{self, Record};
use crate::mysql::generator;
use crate::node::{Node, NodeKind, Subquery, ops};
use crate::receive;
use crate::session::Session;
use crate::value::Value;
use compact_str::{CompactString, format_compact};
use indexmap::IndexMap;
use std::sync::Arc;

/// What a plan executes as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Select,
    Delete,
    Count,
}

/// Row window applied to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Limit {
    pub max_rows: u64,
    pub offset: u64,
}

/// A fully merged query, ready for SQL generation.
#[derive(Debug)]
pub(crate) struct Plan {
    pub command: Command,
    pub tree: JoinTree,
    pub where_cond: Option<Node>,
    pub having: Option<Node>,
    pub group_by: Vec<Node>,
    pub order_by: Vec<Node>,
    pub aliases: IndexMap<CompactString, Node>,
    pub limit: Option<Limit>,
    pub distinct: bool,
    /// Plans of embedded subqueries, keyed by their builder's address
    pub sub_plans: IndexMap<usize, Plan>,
}

/// Alias every count query returns its value under.
pub(crate) const COUNT_ALIAS: &str = "_count";

//------------------------------------------------------------------------------
// QueryBuilder
//------------------------------------------------------------------------------

/// Accumulates a query over one root table.
#[derive(Debug)]
pub struct QueryBuilder {
    root: Node,
    joins: Vec<(Node, Option<Node>)>,
    expands: Vec<Node>,
    selects: Vec<Node>,
    condition: Option<Node>,
    having: Option<Node>,
    group_by: Vec<Node>,
    order_by: Vec<Node>,
    aliases: IndexMap<CompactString, Node>,
    limit: Option<Limit>,
    distinct: bool,
    err: Option<Error>,
}

impl QueryBuilder {
    /// Starts a query rooted at a table node from [`Database::node`].
    ///
    /// [`Database::node`]: crate::schema::Database::node
    pub fn new(root: Node) -> QueryBuilder {
        let err = match root.kind() {
            NodeKind::Table { .. } => None,
            _ => Some(Error::EmptyQuery),
        };
        QueryBuilder {
            root,
            joins: Vec::new(),
            expands: Vec::new(),
            selects: Vec::new(),
            condition: None,
            having: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            aliases: IndexMap::new(),
            limit: None,
            distinct: false,
            err: None,
        }
        .parked(err)
    }

    fn parked(mut self, err: Option<Error>) -> Self {
        if self.err.is_none() {
            self.err = err;
        }
        self
    }

    /// Joins a relationship or column chain into the query.
    pub fn join(self, node: impl Into<Node>) -> Self {
        let node = node.into();
        self.join_record(node, None)
    }

    /// Joins a chain with an extra ON condition.
    pub fn join_on(self, node: impl Into<Node>, condition: Node) -> Self {
        let node = node.into();
        self.join_record(node, Some(condition))
    }

    fn join_record(mut self, node: Node, condition: Option<Node>) -> Self {
        self.joins.push((node, condition));
        self
    }

    /// Marks an array relationship for expansion: one flat result row per
    /// joined child instead of a nested array.
    pub fn expand(mut self, node: impl Into<Node>) -> Self {
        let node = node.into();
        let err = if node.is_expandable() {
            None
        } else {
            Some(Error::ExpandOnNonJoinable {
                member: join_member_name(&node),
            })
        };
        self.expands.push(node);
        self.parked(err)
    }

    /// Restricts the SELECT list to these columns. Primary keys are still
    /// selected unless the query is distinct or a subquery.
    pub fn select<I>(mut self, columns: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Node>,
    {
        let mut err = None;
        for column in columns {
            let column = column.into();
            if !matches!(column.kind(), NodeKind::Column { .. }) {
                err = Some(Error::InvalidSelect);
            }
            self.selects.push(column);
        }
        self.parked(err)
    }

    /// Filters rows. Successive calls AND their conditions together.
    pub fn condition(mut self, node: Node) -> Self {
        self.condition = Some(match self.condition.take() {
            Some(existing) => ops::and([existing, node]),
            None => node,
        });
        self
    }

    /// Filters grouped rows. Successive calls AND their conditions together.
    pub fn having(mut self, node: Node) -> Self {
        self.having = Some(match self.having.take() {
            Some(existing) => ops::and([existing, node]),
            None => node,
        });
        self
    }

    /// Groups rows by these nodes. Grouped columns join the SELECT list.
    pub fn group_by<I>(mut self, nodes: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Node>,
    {
        self.group_by.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Appends sort nodes. Use [`Node::descending`] to flip direction.
    pub fn order_by<I>(mut self, nodes: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Node>,
    {
        self.order_by.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Registers a computed result column under a name. The value comes back
    /// on each record's alias map, and [`ops::alias_ref`] references it in
    /// other clauses.
    pub fn alias(mut self, name: impl Into<CompactString>, node: impl Into<Node>) -> Self {
        self.aliases.insert(name.into(), node.into());
        self
    }

    /// Windows the result rows. May only be called once per query.
    pub fn limit(mut self, max_rows: u64, offset: u64) -> Self {
        let err = if self.limit.is_some() {
            Some(Error::DuplicateLimit)
        } else {
            self.limit = Some(Limit { max_rows, offset });
            None
        };
        self.parked(err)
    }

    /// Deduplicates result rows. Suppresses automatic primary-key selection.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Freezes this builder into an expression node usable inside another
    /// query. Chains referencing the enclosing query's tables resolve there.
    pub fn into_subquery(self) -> Node {
        Subquery {
            builder: Arc::new(self),
        }
        .into()
    }

    //--------------------------------------------------------------------------
    // Terminals
    //--------------------------------------------------------------------------

    /// Runs the query and hydrates the joined rows into records.
    pub async fn load(&self, session: &mut Session) -> Result<Vec<Record>> {
        let plan = self.plan(Command::Select, None)?;
        let statement = generator::select_statement(&plan)?;
        let rows = session.query(&statement.sql, &statement.params).await?;
        let received = receive::rows(rows, &statement.columns)?;
        Ok(hydrate::records(&plan, &received))
    }

    /// Runs the query and returns the first record, if any.
    pub async fn get(&self, session: &mut Session) -> Result<Option<Record>> {
        let mut records = self.load(session).await?;
        if records.is_empty() {
            Ok(None)
        } else {
            Ok(Some(records.swap_remove(0)))
        }
    }

    /// Counts the joined rows, optionally distinct over specific nodes.
    pub async fn count<I>(&self, session: &mut Session, distinct: bool, nodes: I) -> Result<u64>
    where
        I: IntoIterator,
        I::Item: Into<Node>,
    {
        let plan = self.count_plan(distinct, nodes)?;
        let statement = generator::select_statement(&plan)?;
        let rows = session.query(&statement.sql, &statement.params).await?;
        let received = receive::rows(rows, &statement.columns)?;
        Ok(received
            .first()
            .and_then(|row| row.get(COUNT_ALIAS))
            .and_then(Value::as_u64)
            .unwrap_or_default())
    }

    /// Deletes the rows the query matches.
    pub async fn delete(&self, session: &mut Session) -> Result<u64> {
        let plan = self.plan(Command::Delete, None)?;
        let statement = generator::delete_statement(&plan)?;
        let result = session.exec(&statement.sql, &statement.params).await?;
        Ok(result.rows_affected)
    }

    //--------------------------------------------------------------------------
    // SQL preview
    //--------------------------------------------------------------------------

    /// The SELECT statement and parameters this query would run.
    pub fn to_sql(&self) -> Result<(String, Vec<Value>)> {
        let plan = self.plan(Command::Select, None)?;
        let statement = generator::select_statement(&plan)?;
        Ok((statement.sql, statement.params))
    }

    /// The DELETE statement and parameters this query would run.
    pub fn delete_sql(&self) -> Result<(String, Vec<Value>)> {
        let plan = self.plan(Command::Delete, None)?;
        let statement = generator::delete_statement(&plan)?;
        Ok((statement.sql, statement.params))
    }

    /// The COUNT statement and parameters this query would run.
    pub fn count_sql<I>(&self, distinct: bool, nodes: I) -> Result<(String, Vec<Value>)>
    where
        I: IntoIterator,
        I::Item: Into<Node>,
    {
        let plan = self.count_plan(distinct, nodes)?;
        let statement = generator::select_statement(&plan)?;
        Ok((statement.sql, statement.params))
    }

    //--------------------------------------------------------------------------
    // Planning
    //--------------------------------------------------------------------------

    fn count_plan<I>(&self, distinct: bool, nodes: I) -> Result<Plan>
    where
        I: IntoIterator,
        I::Item: Into<Node>,
    {
        let mut args: Vec<Node> = nodes.into_iter().map(Into::into).collect();
        let distinct = distinct || self.distinct;
        if args.is_empty() && distinct {
            // COUNT(DISTINCT *) is not a thing; fall back to the root key.
            args.push(self.root.primary_key()?);
        }
        let node = if distinct {
            ops::count_distinct(args)
        } else {
            ops::count(args)
        };
        self.plan(Command::Count, Some(node))
    }

    pub(crate) fn plan(&self, command: Command, count_node: Option<Node>) -> Result<Plan> {
        self.assemble(command, count_node, "", false)
    }

    fn assemble(
        &self,
        command: Command,
        count_node: Option<Node>,
        prefix: &str,
        is_subquery: bool,
    ) -> Result<Plan> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        if command == Command::Count {
            if !self.selects.is_empty() {
                return Err(Error::CountWithSelect);
            }
            if !self.group_by.is_empty() {
                return Err(Error::CountWithGroupBy);
            }
        }

        let mut tree = JoinTree::new(self.root.clone(), prefix);
        let mut subs: Vec<Subquery> = Vec::new();
        let mut where_cond = self.condition.clone();

        // Joins first, so relationship aliases land in call order.
        for (node, condition) in &self.joins {
            let merged = if node.is_table_like() || matches!(node.kind(), NodeKind::Column { .. })
            {
                Some(tree.merge(node)?)
            } else {
                self.scan(&mut tree, node, &mut subs, is_subquery)?;
                None
            };
            if let Some(condition) = condition {
                self.scan(&mut tree, condition, &mut subs, is_subquery)?;
                match merged.map(|at| ascend_to_table(&tree, at)) {
                    // A condition on the root has no ON clause to live in;
                    // it folds into WHERE.
                    Some(0) | None => {
                        where_cond = Some(match where_cond.take() {
                            Some(existing) => ops::and([existing, condition.clone()]),
                            None => condition.clone(),
                        });
                    }
                    Some(at) => tree.attach_condition(at, condition.clone())?,
                }
            }
        }

        for node in &self.expands {
            let at = tree.merge(node)?;
            tree.mark_expanded(at);
        }

        for node in &self.selects {
            let at = tree.merge(node)?;
            tree.mark_selected(at);
        }

        for node in &self.group_by {
            match node.kind() {
                NodeKind::Column { .. } => {
                    let at = tree.merge(node)?;
                    tree.mark_selected(at);
                }
                _ => self.scan(&mut tree, node, &mut subs, is_subquery)?,
            }
        }

        if let Some(condition) = &where_cond {
            self.scan(&mut tree, condition, &mut subs, is_subquery)?;
        }
        if let Some(having) = &self.having {
            self.scan(&mut tree, having, &mut subs, is_subquery)?;
        }
        for node in &self.order_by {
            self.scan(&mut tree, node, &mut subs, is_subquery)?;
        }

        let aliases = match (&command, count_node) {
            (Command::Count, Some(node)) => {
                self.scan(&mut tree, &node, &mut subs, is_subquery)?;
                IndexMap::from_iter([(CompactString::const_new(COUNT_ALIAS), node)])
            }
            _ => {
                for node in self.aliases.values() {
                    self.scan(&mut tree, node, &mut subs, is_subquery)?;
                }
                self.aliases.clone()
            }
        };

        self.apply_select_policy(&mut tree, command, is_subquery, &aliases)?;

        if self.limit.is_some() {
            for index in 1..tree.len() {
                let node = tree.node(index);
                if node.source.is_array_like() && !node.expanded {
                    return Err(Error::LimitedArrayJoin {
                        member: join_member_name(&node.source),
                    });
                }
            }
        }

        let mut sub_plans = IndexMap::new();
        for (i, sub) in subs.iter().enumerate() {
            let sub_prefix = format_compact!("{prefix}{}_", i + 1);
            let plan = sub
                .builder
                .assemble(Command::Select, None, &sub_prefix, true)?;
            sub_plans.insert(Arc::as_ptr(&sub.builder) as usize, plan);
        }

        Ok(Plan {
            command,
            tree,
            where_cond,
            having: self.having.clone(),
            group_by: self.group_by.clone(),
            order_by: self.order_by.clone(),
            aliases,
            limit: self.limit,
            distinct: self.distinct,
            sub_plans,
        })
    }

    /// Merges every chain an expression contains, collecting subqueries on
    /// the way. Inside a subquery, chains rooted at another table belong to
    /// an enclosing query and stay out of this tree.
    fn scan(
        &self,
        tree: &mut JoinTree,
        node: &Node,
        subs: &mut Vec<Subquery>,
        is_subquery: bool,
    ) -> Result<()> {
        match node.kind() {
            NodeKind::Operation(op) => {
                for operand in op.operands() {
                    self.scan(tree, operand, subs, is_subquery)?;
                }
                Ok(())
            }
            NodeKind::Subquery(sub) => {
                if !subs
                    .iter()
                    .any(|s| Arc::ptr_eq(&s.builder, &sub.builder))
                {
                    subs.push(sub.clone());
                }
                Ok(())
            }
            NodeKind::Value(_) | NodeKind::Alias(_) => Ok(()),
            _ => match tree.merge(node) {
                Ok(_) => Ok(()),
                Err(Error::CrossTableRoot { .. }) if is_subquery => Ok(()),
                Err(err) => Err(err),
            },
        }
    }

    /// Fills the SELECT list per the query's shape: explicit selections plus
    /// primary keys, or every non-blob column of every joined table.
    fn apply_select_policy(
        &self,
        tree: &mut JoinTree,
        command: Command,
        is_subquery: bool,
        aliases: &IndexMap<CompactString, Node>,
    ) -> Result<()> {
        if command == Command::Count {
            return Ok(());
        }
        let table_nodes: Vec<usize> = tree
            .walk()
            .into_iter()
            .filter(|&i| tree.node(i).source.is_table_like())
            .collect();

        if !self.selects.is_empty() {
            if self.distinct || is_subquery {
                return Ok(());
            }
            for index in table_nodes {
                if let Some(pk) = self.pk_column(tree, index) {
                    let at = tree.merge(&pk)?;
                    tree.mark_selected(at);
                }
            }
            return Ok(());
        }

        if is_subquery && !aliases.is_empty() {
            // A subquery with computed columns selects exactly those.
            return Ok(());
        }

        for index in table_nodes {
            for column in self.default_columns(tree, index) {
                let at = tree.merge(&column)?;
                tree.mark_selected(at);
            }
        }
        Ok(())
    }

    /// Column nodes a table-like tree node selects by default.
    fn default_columns(&self, tree: &JoinTree, index: usize) -> Vec<Node> {
        let source = &tree.node(index).source;
        let Some(schema) = self.root.schema() else {
            return Vec::new();
        };
        let Some(target) = source.target_table() else {
            return Vec::new();
        };
        if let Some(table) = schema.table(target) {
            table
                .default_select()
                .map(|c| {
                    Node::new(
                        NodeKind::Column {
                            table: CompactString::new(target),
                            column: c.name.clone(),
                            column_type: c.column_type,
                            is_pk: c.primary_key,
                        },
                        Some(source.clone()),
                    )
                })
                .collect()
        } else {
            // Type tables are not described as tables; only their id comes
            // back, to hydrate as a key array.
            self.pk_column(tree, index).into_iter().collect()
        }
    }

    /// The primary-key column node of a table-like tree node, covering both
    /// described tables and type enumerations.
    fn pk_column(&self, tree: &JoinTree, index: usize) -> Option<Node> {
        let source = &tree.node(index).source;
        let target = source.target_table()?;
        let pk = source.kind_target_pk()?;
        if pk.is_empty() {
            return None;
        }
        let column_type = self
            .root
            .schema()
            .and_then(|schema| schema.table(target))
            .and_then(|table| table.column(&pk))
            .map(|column| column.column_type)
            .unwrap_or(crate::schema::ColumnType::UnsignedInteger64);
        Some(Node::new(
            NodeKind::Column {
                table: CompactString::new(target),
                column: pk,
                column_type,
                is_pk: true,
            },
            Some(source.clone()),
        ))
    }
}

/// Climbs from a merged chain tail to the nearest join node.
fn ascend_to_table(tree: &JoinTree, mut index: usize) -> usize {
    while !tree.node(index).source.is_table_like() {
        match tree.node(index).parent {
            Some(parent) => index = parent,
            None => return 0,
        }
    }
    index
}
