//! SQL generation for MySQL
//!
//! Turns a [`Plan`] into a parameterized statement. Every literal becomes a
//! `?` placeholder, including LIMIT and OFFSET, so statements stay cacheable
//! under server-side prepares. Identifiers are backtick-quoted.
//!
//! Generation keeps a scope stack of the plans being rendered. Column chains
//! resolve against the innermost tree that joins them, which is how a
//! correlated subquery reaches its enclosing query's tables.
//!
//! An alias node rendered as a value stands for its registered expression,
//! which is inlined in place; ORDER BY, GROUP BY, and HAVING instead refer
//! to the select-list label by its bare name, which MySQL resolves there.

use crate::error::{Error, Result};
use crate::node::ops::{Operation, Operator};
use crate::node::{Node, NodeKind, Subquery};
use crate::query::{COUNT_ALIAS, Command, Plan};
use crate::schema::ColumnType;
use crate::value::Value;
use compact_str::{CompactString, format_compact};
use indexmap::IndexMap;
use std::sync::Arc;

/// A generated statement: SQL text, bound parameters, and the result columns
/// in SELECT-list order with the types the receiver coerces them to.
#[derive(Debug, Clone)]
pub(crate) struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    pub columns: IndexMap<CompactString, ColumnType>,
}

/// Generates the SELECT (or COUNT) statement for a plan.
pub(crate) fn select_statement(plan: &Plan) -> Result<Statement> {
    let mut generator = Generator::new(plan);
    generator.select(plan)?;
    Ok(Statement {
        sql: generator.sql,
        params: generator.params,
        columns: result_columns(plan),
    })
}

/// Generates the DELETE statement for a plan.
pub(crate) fn delete_statement(plan: &Plan) -> Result<Statement> {
    let mut generator = Generator::new(plan);
    generator.delete(plan)?;
    Ok(Statement {
        sql: generator.sql,
        params: generator.params,
        columns: IndexMap::new(),
    })
}

/// Result columns of a plan, keyed by alias in SELECT-list order.
fn result_columns(plan: &Plan) -> IndexMap<CompactString, ColumnType> {
    let mut columns = IndexMap::new();
    if plan.command == Command::Count {
        columns.insert(
            CompactString::const_new(COUNT_ALIAS),
            ColumnType::UnsignedInteger64,
        );
        return columns;
    }
    for index in plan.tree.walk() {
        for child in plan.tree.selected_columns(index).collect::<Vec<_>>() {
            let node = plan.tree.node(child);
            if let NodeKind::Column { column_type, .. } = node.source.kind() {
                columns.insert(node.alias.clone(), *column_type);
            }
        }
    }
    for (name, node) in &plan.aliases {
        let column_type = match node.kind() {
            NodeKind::Column { column_type, .. } => *column_type,
            _ => ColumnType::Unknown,
        };
        columns.insert(name.clone(), column_type);
    }
    columns
}

//------------------------------------------------------------------------------
// Generator
//------------------------------------------------------------------------------

struct Generator<'a> {
    scopes: Vec<&'a Plan>,
    /// Inside ORDER BY, GROUP BY, or HAVING, where aliases are labels.
    labels: bool,
    sql: String,
    params: Vec<Value>,
}

impl<'a> Generator<'a> {
    fn new(plan: &'a Plan) -> Generator<'a> {
        Generator {
            scopes: vec![plan],
            labels: false,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    //--------------------------------------------------------------------------
    // Statements
    //--------------------------------------------------------------------------

    fn select(&mut self, plan: &'a Plan) -> Result<()> {
        self.sql.push_str("SELECT ");
        if plan.distinct && plan.command != Command::Count {
            self.sql.push_str("DISTINCT ");
        }

        let mut first = true;
        if plan.command != Command::Count {
            for index in plan.tree.walk() {
                let table_alias = plan.tree.node(index).alias.clone();
                for child in plan.tree.selected_columns(index).collect::<Vec<_>>() {
                    let node = plan.tree.node(child);
                    let NodeKind::Column { column, .. } = node.source.kind() else {
                        continue;
                    };
                    let column = column.clone();
                    let column_alias = node.alias.clone();
                    self.separate(&mut first);
                    self.qualified(&table_alias, &column);
                    self.sql.push_str(" AS ");
                    self.ident(&column_alias);
                }
            }
        }
        for (name, node) in &plan.aliases {
            self.separate(&mut first);
            self.expr(node)?;
            self.sql.push_str(" AS ");
            self.ident(name);
        }
        if first {
            self.sql.push('1');
        }

        self.from_joins(plan)?;
        if let Some(condition) = &plan.where_cond {
            self.sql.push_str(" WHERE ");
            self.expr(condition)?;
        }
        if plan.command == Command::Count {
            // Grouping is rejected upstream and a row window would apply
            // after aggregation, so the statement ends here.
            return Ok(());
        }
        if !plan.group_by.is_empty() {
            self.sql.push_str(" GROUP BY ");
            let mut first = true;
            for node in &plan.group_by {
                self.separate(&mut first);
                self.label_expr(node)?;
            }
        }
        if let Some(having) = &plan.having {
            self.sql.push_str(" HAVING ");
            self.label_expr(having)?;
        }
        self.order_limit(plan)
    }

    fn delete(&mut self, plan: &'a Plan) -> Result<()> {
        // Multi-table form; it allows joins and an aliased target on MySQL 5.
        self.sql.push_str("DELETE ");
        let alias = plan.tree.root().alias.clone();
        self.ident(&alias);
        self.from_joins(plan)?;
        if let Some(condition) = &plan.where_cond {
            self.sql.push_str(" WHERE ");
            self.expr(condition)?;
        }
        self.order_limit(plan)
    }

    fn from_joins(&mut self, plan: &'a Plan) -> Result<()> {
        let root = plan.tree.root();
        let table = CompactString::new(root.source.target_table().unwrap_or_default());
        let alias = root.alias.clone();
        self.sql.push_str(" FROM ");
        self.ident(&table);
        self.sql.push_str(" AS ");
        self.ident(&alias);

        for index in plan.tree.walk() {
            if index == 0 || !plan.tree.node(index).source.is_table_like() {
                continue;
            }
            let node = plan.tree.node(index);
            let alias = node.alias.clone();
            let condition = node.condition.clone();
            let parent = node.parent.unwrap_or(0);
            let parent_alias = plan.tree.node(parent).alias.clone();
            let parent_pk = plan
                .tree
                .node(parent)
                .source
                .kind_target_pk()
                .unwrap_or_default();

            match node.source.kind().clone() {
                NodeKind::Reference {
                    fk_column,
                    ref_table,
                    ref_column,
                    ..
                } => {
                    self.join_clause(&ref_table, &alias, &parent_alias, &fk_column, &alias, &ref_column);
                }
                NodeKind::ReverseReference {
                    ref_table,
                    ref_column,
                    ..
                } => {
                    self.join_clause(&ref_table, &alias, &parent_alias, &parent_pk, &alias, &ref_column);
                }
                NodeKind::ManyMany {
                    assn_table,
                    our_column,
                    their_column,
                    their_table,
                    their_pk,
                    ..
                } => {
                    let assn_alias = format_compact!("{alias}a");
                    self.join_clause(
                        &assn_table,
                        &assn_alias,
                        &parent_alias,
                        &parent_pk,
                        &assn_alias,
                        &our_column,
                    );
                    self.join_clause(
                        &their_table,
                        &alias,
                        &assn_alias,
                        &their_column,
                        &alias,
                        &their_pk,
                    );
                }
                _ => continue,
            }
            if let Some(condition) = condition {
                self.sql.push_str(" AND ");
                self.expr(&condition)?;
            }
        }
        Ok(())
    }

    fn join_clause(
        &mut self,
        table: &str,
        alias: &str,
        left_table: &str,
        left_column: &str,
        right_table: &str,
        right_column: &str,
    ) {
        self.sql.push_str(" LEFT JOIN ");
        self.ident(table);
        self.sql.push_str(" AS ");
        self.ident(alias);
        self.sql.push_str(" ON ");
        self.qualified(left_table, left_column);
        self.sql.push_str(" = ");
        self.qualified(right_table, right_column);
    }

    fn order_limit(&mut self, plan: &'a Plan) -> Result<()> {
        if !plan.order_by.is_empty() {
            self.sql.push_str(" ORDER BY ");
            let mut first = true;
            for node in &plan.order_by {
                self.separate(&mut first);
                self.label_expr(node)?;
                if node.is_descending() {
                    self.sql.push_str(" DESC");
                }
            }
        }
        if let Some(limit) = plan.limit {
            self.sql.push_str(" LIMIT ? OFFSET ?");
            self.params.push(Value::UInt(limit.max_rows));
            self.params.push(Value::UInt(limit.offset));
        }
        Ok(())
    }

    //--------------------------------------------------------------------------
    // Expressions
    //--------------------------------------------------------------------------

    fn expr(&mut self, node: &Node) -> Result<()> {
        match node.kind() {
            NodeKind::Value(value) => {
                self.param(value.clone());
                Ok(())
            }
            NodeKind::Alias(name) => {
                let name = name.clone();
                match self.alias_target(&name) {
                    // In value position the name stands for its expression;
                    // only the label clauses may use the bare identifier.
                    Some(target) if !self.labels => self.expr(&target),
                    _ => {
                        self.ident(&name);
                        Ok(())
                    }
                }
            }
            NodeKind::Column { column, .. } => {
                let column = column.clone();
                let alias = self.resolve(node.parent(), node)?;
                self.qualified(&alias, &column);
                Ok(())
            }
            // A bare relationship in an expression stands for the key of the
            // row it lands on.
            NodeKind::Table { .. }
            | NodeKind::Reference { .. }
            | NodeKind::ReverseReference { .. }
            | NodeKind::ManyMany { .. } => {
                let pk = node.kind_target_pk().unwrap_or_default();
                let alias = self.resolve(Some(node), node)?;
                self.qualified(&alias, &pk);
                Ok(())
            }
            NodeKind::Operation(op) => {
                let op = op.clone();
                self.operation(&op)
            }
            NodeKind::Subquery(sub) => {
                let sub = sub.clone();
                self.subquery(&sub)
            }
        }
    }

    fn operation(&mut self, op: &Operation) -> Result<()> {
        match op.op() {
            Operator::All => {
                self.sql.push_str("(1=1)");
                Ok(())
            }
            Operator::None => {
                self.sql.push_str("(1=0)");
                Ok(())
            }
            Operator::Not => {
                self.sql.push_str("(NOT ");
                if let Some(operand) = op.operands().first() {
                    self.expr(operand)?;
                }
                self.sql.push(')');
                Ok(())
            }
            Operator::Negative => {
                self.sql.push_str("(-");
                if let Some(operand) = op.operands().first() {
                    self.expr(operand)?;
                }
                self.sql.push(')');
                Ok(())
            }
            Operator::BitInvert => {
                self.sql.push_str("(~");
                if let Some(operand) = op.operands().first() {
                    self.expr(operand)?;
                }
                self.sql.push(')');
                Ok(())
            }
            Operator::IsNull | Operator::IsNotNull => {
                self.sql.push('(');
                if let Some(operand) = op.operands().first() {
                    self.expr(operand)?;
                }
                self.sql.push_str(if op.op() == Operator::IsNull {
                    " IS NULL)"
                } else {
                    " IS NOT NULL)"
                });
                Ok(())
            }
            Operator::In | Operator::NotIn => {
                self.sql.push('(');
                if let Some(lhs) = op.operands().first() {
                    self.expr(lhs)?;
                }
                self.sql.push(' ');
                self.sql.push_str(op.op().symbol());
                self.sql.push(' ');
                match op.operands().get(1) {
                    // A subquery brings its own parentheses.
                    Some(rhs) if matches!(rhs.kind(), NodeKind::Subquery(_)) => {
                        self.expr(rhs)?;
                    }
                    Some(rhs) => {
                        self.sql.push('(');
                        self.expr(rhs)?;
                        self.sql.push(')');
                    }
                    None => self.sql.push_str("(NULL)"),
                }
                self.sql.push(')');
                Ok(())
            }
            Operator::Function => {
                self.sql.push_str(op.func.as_str());
                self.sql.push('(');
                if op.distinct {
                    self.sql.push_str("DISTINCT ");
                }
                if op.operands().is_empty() && op.func == "COUNT" {
                    self.sql.push('*');
                } else {
                    let mut first = true;
                    for operand in op.operands() {
                        self.separate(&mut first);
                        self.expr(operand)?;
                    }
                }
                self.sql.push(')');
                Ok(())
            }
            infix => {
                if op.operands().is_empty() {
                    // An AND over nothing is vacuously true, an OR false.
                    self.sql.push_str(if infix == Operator::Or {
                        "(1=0)"
                    } else {
                        "(1=1)"
                    });
                    return Ok(());
                }
                self.sql.push('(');
                for (i, operand) in op.operands().iter().enumerate() {
                    if i > 0 {
                        self.sql.push(' ');
                        self.sql.push_str(infix.symbol());
                        self.sql.push(' ');
                    }
                    self.expr(operand)?;
                }
                self.sql.push(')');
                Ok(())
            }
        }
    }

    fn subquery(&mut self, sub: &Subquery) -> Result<()> {
        let key = Arc::as_ptr(&sub.builder) as usize;
        let current: &'a Plan = self.scopes.last().copied().ok_or(Error::EmptyQuery)?;
        let plan = current
            .sub_plans
            .get(&key)
            .ok_or(Error::EmptyQuery)?;
        self.sql.push('(');
        self.scopes.push(plan);
        // The inner statement starts over in value position, whatever clause
        // of the outer one embeds it.
        let labels = self.labels;
        self.labels = false;
        let rendered = self.select(plan);
        self.labels = labels;
        self.scopes.pop();
        rendered?;
        self.sql.push(')');
        Ok(())
    }

    /// Renders one item of a clause that refers to select-list labels.
    fn label_expr(&mut self, node: &Node) -> Result<()> {
        let labels = self.labels;
        self.labels = true;
        let rendered = self.expr(node);
        self.labels = labels;
        rendered
    }

    /// Expression registered under an alias name, searching enclosing scopes
    /// from the innermost outward.
    fn alias_target(&self, name: &str) -> Option<Node> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.aliases.get(name).cloned())
    }

    /// Table alias a chain resolves to, searching enclosing scopes from the
    /// innermost outward.
    fn resolve(&self, target: Option<&Node>, origin: &Node) -> Result<CompactString> {
        if let Some(target) = target {
            for scope in self.scopes.iter().rev() {
                if let Some(index) = scope.tree.find(target) {
                    return Ok(scope.tree.node(index).alias.clone());
                }
            }
        }
        let table = match origin.kind() {
            NodeKind::Column { table, .. } => table.to_string(),
            _ => origin.target_table().unwrap_or_default().to_string(),
        };
        Err(Error::UnresolvedNode { table })
    }

    //--------------------------------------------------------------------------
    // Text helpers
    //--------------------------------------------------------------------------

    fn separate(&mut self, first: &mut bool) {
        if *first {
            *first = false;
        } else {
            self.sql.push_str(", ");
        }
    }

    fn ident(&mut self, name: &str) {
        self.sql.push('`');
        if name.contains('`') {
            self.sql.push_str(&name.replace('`', "``"));
        } else {
            self.sql.push_str(name);
        }
        self.sql.push('`');
    }

    fn qualified(&mut self, table: &str, column: &str) {
        self.ident(table);
        self.sql.push('.');
        self.ident(column);
    }

    fn param(&mut self, value: Value) {
        match value {
            Value::List(items) => {
                if items.is_empty() {
                    // IN () is a syntax error; NULL matches no row.
                    self.sql.push_str("NULL");
                    return;
                }
                let mut first = true;
                for item in items {
                    self.separate(&mut first);
                    self.params.push(item);
                    self.sql.push('?');
                }
            }
            other => {
                self.params.push(other);
                self.sql.push('?');
            }
        }
    }
}
