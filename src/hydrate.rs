//! Result hydration
//!
//! A joined SELECT returns one flat row per combination of joined rows; the
//! hydrator folds those back into object shape. Pass one groups rows into
//! raw objects keyed by primary key, per level of the join tree, preserving
//! arrival order. Pass two turns each raw object into a [`Record`]: forward
//! references become nested records, arrays become record lists under their
//! plural member name, and expanded arrays multiply their parent into one
//! record per child, the shape a report wants.
//!
//! Distinct queries can legitimately lack primary keys. Their rows get
//! monotonically increasing synthetic keys instead, so every row survives
//! deduplication as its own record.

use crate::node::NodeKind;
use crate::query::{Plan, tree::JoinTree};
use crate::value::Value;
use compact_str::{CompactString, format_compact};
use indexmap::IndexMap;

/// One hydrated row object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: IndexMap<CompactString, Cell>,
    aliases: IndexMap<CompactString, Value>,
}

/// One member of a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// A column value
    Value(Value),
    /// A forward reference or expanded array member
    Record(Record),
    /// An unexpanded array relationship
    Records(Vec<Record>),
    /// A type association, as the related enumeration keys
    Keys(Vec<u64>),
}

impl Record {
    /// The cell stored under a member name.
    pub fn get(&self, name: &str) -> Option<&Cell> {
        self.fields.get(name)
    }

    /// A column value member.
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.fields.get(name)? {
            Cell::Value(value) => Some(value),
            _ => None,
        }
    }

    /// A nested record member.
    pub fn record(&self, name: &str) -> Option<&Record> {
        match self.fields.get(name)? {
            Cell::Record(record) => Some(record),
            _ => None,
        }
    }

    /// An array relationship member.
    pub fn records(&self, name: &str) -> Option<&[Record]> {
        match self.fields.get(name)? {
            Cell::Records(records) => Some(records),
            _ => None,
        }
    }

    /// A type association member.
    pub fn keys(&self, name: &str) -> Option<&[u64]> {
        match self.fields.get(name)? {
            Cell::Keys(keys) => Some(keys),
            _ => None,
        }
    }

    /// A computed column registered with [`QueryBuilder::alias`].
    ///
    /// [`QueryBuilder::alias`]: crate::query::QueryBuilder::alias
    pub fn alias(&self, name: &str) -> Option<&Value> {
        self.aliases.get(name)
    }

    /// Member names and cells in hydration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Computed columns in registration order.
    pub fn aliases(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.aliases.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

//------------------------------------------------------------------------------
// Pass 1: group flat rows into keyed raw objects
//------------------------------------------------------------------------------

#[derive(Default)]
struct RawObject {
    fields: IndexMap<CompactString, Value>,
    aliases: IndexMap<CompactString, Value>,
    children: IndexMap<usize, IndexMap<CompactString, RawObject>>,
}

/// Hydrates received rows into records, in arrival order.
pub(crate) fn records(plan: &Plan, rows: &[IndexMap<CompactString, Value>]) -> Vec<Record> {
    let mut roots: IndexMap<CompactString, RawObject> = IndexMap::new();
    let mut synthetic = 0u64;
    for row in rows {
        collect(plan, &plan.tree, 0, row, &mut roots, &mut synthetic, true);
    }
    roots
        .into_values()
        .flat_map(|object| expand(&plan.tree, object))
        .collect()
}

fn collect(
    plan: &Plan,
    tree: &JoinTree,
    index: usize,
    row: &IndexMap<CompactString, Value>,
    into: &mut IndexMap<CompactString, RawObject>,
    synthetic: &mut u64,
    is_root: bool,
) {
    let pk_value = tree
        .pk_child(index)
        .and_then(|child| row.get(tree.node(child).alias.as_str()));
    let key = match pk_value {
        Some(value) if !value.is_null() => format_compact!("{value}"),
        _ => {
            if !plan.distinct {
                // An unmatched join: nothing of this object is in the row.
                return;
            }
            let mut any = false;
            let mut all_null = true;
            for child in tree.selected_columns(index) {
                any = true;
                let alias = tree.node(child).alias.as_str();
                if row.get(alias).is_some_and(|v| !v.is_null()) {
                    all_null = false;
                    break;
                }
            }
            if any && all_null {
                return;
            }
            *synthetic += 1;
            format_compact!("_r{synthetic}")
        }
    };

    let object = into.entry(key).or_default();
    for child in tree.selected_columns(index) {
        let node = tree.node(child);
        let NodeKind::Column { column, .. } = node.source.kind() else {
            continue;
        };
        if let Some(value) = row.get(node.alias.as_str()) {
            object
                .fields
                .entry(column.clone())
                .or_insert_with(|| value.clone());
        }
    }
    if is_root {
        for name in plan.aliases.keys() {
            if let Some(value) = row.get(name) {
                object
                    .aliases
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
        }
    }
    let table_children: Vec<usize> = tree.table_children(index).collect();
    for child in table_children {
        let child_map = object.children.entry(child).or_default();
        collect(plan, tree, child, row, child_map, synthetic, false);
    }
}

//------------------------------------------------------------------------------
// Pass 2: unfold raw objects into records
//------------------------------------------------------------------------------

fn expand(tree: &JoinTree, object: RawObject) -> Vec<Record> {
    let mut rows = vec![Record {
        fields: object
            .fields
            .into_iter()
            .map(|(name, value)| (name, Cell::Value(value)))
            .collect(),
        aliases: object.aliases,
    }];

    for (child_index, child_map) in object.children {
        let child = tree.node(child_index);
        let Some((member, member_plural)) = child.source.member_names() else {
            continue;
        };
        match child.source.kind() {
            NodeKind::ManyMany { is_type: true, .. } => {
                let keys = type_keys(tree, child_index, &child_map);
                let name = CompactString::new(member_plural);
                for row in &mut rows {
                    row.fields.insert(name.clone(), Cell::Keys(keys.clone()));
                }
            }
            NodeKind::Reference { .. }
            | NodeKind::ReverseReference {
                is_array: false, ..
            } => {
                let subs: Vec<Record> = child_map
                    .into_values()
                    .flat_map(|o| expand(tree, o))
                    .collect();
                rows = multiply(rows, member, subs);
            }
            NodeKind::ReverseReference { .. } | NodeKind::ManyMany { .. } => {
                let subs: Vec<Record> = child_map
                    .into_values()
                    .flat_map(|o| expand(tree, o))
                    .collect();
                if child.expanded {
                    rows = multiply(rows, member, subs);
                } else {
                    let name = CompactString::new(member_plural);
                    for row in &mut rows {
                        row.fields
                            .insert(name.clone(), Cell::Records(subs.clone()));
                    }
                }
            }
            _ => {}
        }
    }
    rows
}

/// Cartesian step: each parent row repeats once per child record, with the
/// child attached under the singular member name. No children leaves the
/// member absent and the parent rows as they were.
fn multiply(rows: Vec<Record>, member: &str, subs: Vec<Record>) -> Vec<Record> {
    if subs.is_empty() {
        return rows;
    }
    let name = CompactString::new(member);
    let mut out = Vec::with_capacity(rows.len() * subs.len());
    for row in &rows {
        for sub in &subs {
            let mut copy = row.clone();
            copy.fields.insert(name.clone(), Cell::Record(sub.clone()));
            out.push(copy);
        }
    }
    out
}

/// Enumeration keys of a type association, in arrival order.
fn type_keys(
    tree: &JoinTree,
    index: usize,
    objects: &IndexMap<CompactString, RawObject>,
) -> Vec<u64> {
    let pk_name = tree.pk_child(index).and_then(|c| match tree.node(c).source.kind() {
        NodeKind::Column { column, .. } => Some(column.clone()),
        _ => None,
    });
    let Some(pk_name) = pk_name else {
        return Vec::new();
    };
    objects
        .values()
        .filter_map(|o| o.fields.get(&pk_name).and_then(Value::as_u64))
        .collect()
}
