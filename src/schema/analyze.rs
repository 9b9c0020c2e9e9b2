//! Schema analysis
//!
//! [`run`] turns a raw [`Database`] description into a navigable one. It
//! works in passes over the whole description:
//!
//! 1. Parse comment options, fill every empty name field, and mark indexed
//!    columns.
//! 2. Derive constant names for type-table rows.
//! 3. Validate association tables and link both sides with
//!    [`ManyManyRef`] entries.
//! 4. Resolve foreign keys into forward and reverse references.
//!
//! Validation failures never abort analysis. A table or column that cannot
//! be resolved is logged through `tracing` and skipped, leaving the rest of
//! the description usable.
//!
//! Comments may end in a JSON object supplying name overrides. Recognised
//! keys on tables: `literal`, `literal_plural`, `member`, `member_plural`.
//! On columns: `literal`, `member`, `ref_member`, `reverse_member`,
//! `reverse_member_plural`. On association-table columns, `member` and
//! `member_plural` name the relationship reached through that column.

use super::{ColumnType, Database, ManyManyRef, ReverseRef, Table, naming};
use compact_str::CompactString;
use indexmap::IndexMap;

pub(crate) fn run(db: &mut Database) {
    let assn_suffix = db.options().association_suffix.clone();
    let type_suffix = db.options().type_table_suffix.clone();
    let id_suffix = db.options().id_suffix.clone();

    fill_names(db, &assn_suffix, &type_suffix);
    fill_type_constants(db);

    let positions: IndexMap<CompactString, usize> = db
        .tables()
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.clone(), i))
        .collect();
    let type_names: Vec<CompactString> =
        db.type_tables().iter().map(|t| t.name.clone()).collect();

    link_associations(db, &positions, &type_names);
    link_references(db, &positions, &type_names, &id_suffix);

    db.rebuild_indices();
}

//------------------------------------------------------------------------------
// Pass 1: names
//------------------------------------------------------------------------------

fn fill_names(db: &mut Database, assn_suffix: &str, type_suffix: &str) {
    for table in db.tables_mut().iter_mut() {
        table.association = table.name.ends_with(assn_suffix);
        table.options = comment_options(&table.comment, &table.name);

        if table.object_name.is_empty() {
            table.object_name = opt_str(&table.options, "member")
                .unwrap_or_else(|| naming::member(&table.name));
        }
        if table.object_plural.is_empty() {
            table.object_plural = opt_str(&table.options, "member_plural")
                .unwrap_or_else(|| naming::plural(&table.object_name));
        }
        if table.literal_name.is_empty() {
            table.literal_name = opt_str(&table.options, "literal")
                .unwrap_or_else(|| naming::literal(&table.object_name));
        }
        if table.literal_plural.is_empty() {
            table.literal_plural = opt_str(&table.options, "literal_plural")
                .unwrap_or_else(|| naming::literal(&table.object_plural));
        }

        let index_columns: Vec<CompactString> = table
            .indexes
            .iter()
            .flat_map(|i| i.columns.iter().cloned())
            .collect();
        for column in &mut table.columns {
            column.options = comment_options(&column.comment, &column.name);
            if column.object_name.is_empty() {
                column.object_name = opt_str(&column.options, "member")
                    .unwrap_or_else(|| naming::member(&column.name));
            }
            if column.literal_name.is_empty() {
                column.literal_name = opt_str(&column.options, "literal")
                    .unwrap_or_else(|| naming::literal(&column.object_name));
            }
            if column.primary_key || column.unique || index_columns.contains(&column.name) {
                column.indexed = true;
            }
            // Database-assigned ids travel as strings end to end.
            if column.auto_id {
                column.column_type = ColumnType::String;
            }
        }

        if !table.association {
            let pk_count = table.columns.iter().filter(|c| c.primary_key).count();
            if pk_count != 1 {
                tracing::warn!(
                    table = %table.name,
                    primary_keys = pk_count,
                    "table must have exactly one primary-key column; skipping"
                );
                table.skip = true;
            }
        }
    }

    for type_table in db.type_tables_mut().iter_mut() {
        if type_table.object_name.is_empty() {
            type_table.object_name =
                naming::member(naming::strip_suffix(&type_table.name, type_suffix));
        }
        if type_table.object_plural.is_empty() {
            type_table.object_plural = naming::plural(&type_table.object_name);
        }
        if type_table.literal_name.is_empty() {
            type_table.literal_name = naming::literal(&type_table.object_name);
        }
        if type_table.literal_plural.is_empty() {
            type_table.literal_plural = naming::literal(&type_table.object_plural);
        }
    }
}

//------------------------------------------------------------------------------
// Pass 2: type-table constants
//------------------------------------------------------------------------------

fn fill_type_constants(db: &mut Database) {
    for type_table in db.type_tables_mut().iter_mut() {
        type_table.constants.clear();
        for row in &type_table.values {
            let Some(id) = type_table.row_id(row) else {
                tracing::warn!(
                    type_table = %type_table.name,
                    "type-table row has no numeric id; skipping row"
                );
                continue;
            };
            let Some(name) = type_table.row_name(row) else {
                tracing::warn!(
                    type_table = %type_table.name,
                    id,
                    "type-table row has no name field; skipping row"
                );
                continue;
            };
            let constant = naming::constant(&name);
            if type_table.constants.insert(id, constant).is_some() {
                tracing::warn!(
                    type_table = %type_table.name,
                    id,
                    "duplicate type-table id; keeping the last row"
                );
            }
        }
    }
}

//------------------------------------------------------------------------------
// Pass 3: associations
//------------------------------------------------------------------------------

fn link_associations(
    db: &mut Database,
    positions: &IndexMap<CompactString, usize>,
    type_names: &[CompactString],
) {
    let mut links: Vec<(usize, ManyManyRef)> = Vec::new();
    let mut pairs: Vec<(usize, usize)> = Vec::new();

    for table in db.tables().iter() {
        if !table.association {
            continue;
        }
        let fks: Vec<usize> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.foreign_key.is_some())
            .map(|(i, _)| i)
            .collect();
        if fks.len() != 2 {
            tracing::warn!(
                table = %table.name,
                foreign_keys = fks.len(),
                "association table must have exactly two foreign-key columns; skipping"
            );
            continue;
        }
        if fks.iter().any(|&i| table.columns[i].nullable) {
            tracing::warn!(
                table = %table.name,
                "association columns must be non-nullable; skipping"
            );
            continue;
        }
        if fks.iter().any(|&i| !table.columns[i].primary_key) {
            tracing::warn!(
                table = %table.name,
                "association columns must form the primary key; skipping"
            );
            continue;
        }

        let a = &table.columns[fks[0]];
        let b = &table.columns[fks[1]];
        let a_type = a
            .foreign_key
            .as_ref()
            .is_some_and(|f| type_names.contains(&f.table));
        let b_type = b
            .foreign_key
            .as_ref()
            .is_some_and(|f| type_names.contains(&f.table));

        match (a_type, b_type) {
            (true, true) => {
                tracing::warn!(
                    table = %table.name,
                    "association between two type tables is not supported; skipping"
                );
            }
            (false, true) => {
                if let Some(link) = type_link(db, table, fks[0], fks[1], positions) {
                    links.push(link);
                }
            }
            (true, false) => {
                if let Some(link) = type_link(db, table, fks[1], fks[0], positions) {
                    links.push(link);
                }
            }
            (false, false) => {
                if let Some(pair) = table_links(db, table, fks[0], fks[1], positions) {
                    let base = links.len();
                    links.extend(pair);
                    pairs.push((base, base + 1));
                }
            }
        }
    }

    // Compute where each link will land, then cross-link the symmetric
    // pairs before pushing.
    let mut lens: Vec<usize> = db.tables().iter().map(|t| t.many_many.len()).collect();
    let slots: Vec<usize> = links
        .iter()
        .map(|(target, _)| {
            let slot = lens[*target];
            lens[*target] += 1;
            slot
        })
        .collect();
    for (a, b) in pairs {
        links[a].1.mirror = Some(slots[b]);
        links[b].1.mirror = Some(slots[a]);
    }

    for (target, link) in links {
        db.tables_mut()[target].many_many.push(link);
    }
}

/// Builds the single link for an association whose far side is a type table.
fn type_link(
    db: &Database,
    assn: &Table,
    our: usize,
    their: usize,
    positions: &IndexMap<CompactString, usize>,
) -> Option<(usize, ManyManyRef)> {
    let our_col = &assn.columns[our];
    let their_col = &assn.columns[their];
    let our_fk = our_col.foreign_key.as_ref()?;
    let their_fk = their_col.foreign_key.as_ref()?;

    let Some(&target) = positions.get(&our_fk.table) else {
        tracing::warn!(
            table = %assn.name,
            references = %our_fk.table,
            "association references an unknown table; skipping"
        );
        return None;
    };
    let type_table = db.type_table(&their_fk.table)?;

    let member = opt_str(&their_col.options, "member")
        .unwrap_or_else(|| type_table.object_name.clone());
    let member_plural = opt_str(&their_col.options, "member_plural")
        .unwrap_or_else(|| type_table.object_plural.clone());

    Some((
        target,
        ManyManyRef {
            assn_table: assn.name.clone(),
            our_column: our_col.name.clone(),
            their_column: their_col.name.clone(),
            their_table: their_fk.table.clone(),
            their_pk: their_fk.column.clone(),
            member,
            member_plural,
            mirror: None,
            is_type: true,
        },
    ))
}

/// Builds the mirrored pair of links for a table-to-table association.
fn table_links(
    db: &Database,
    assn: &Table,
    first: usize,
    second: usize,
    positions: &IndexMap<CompactString, usize>,
) -> Option<[(usize, ManyManyRef); 2]> {
    let one = directed_link(db, assn, first, second, positions)?;
    let two = directed_link(db, assn, second, first, positions)?;
    Some([one, two])
}

fn directed_link(
    db: &Database,
    assn: &Table,
    our: usize,
    their: usize,
    positions: &IndexMap<CompactString, usize>,
) -> Option<(usize, ManyManyRef)> {
    let our_col = &assn.columns[our];
    let their_col = &assn.columns[their];
    let our_fk = our_col.foreign_key.as_ref()?;
    let their_fk = their_col.foreign_key.as_ref()?;

    let Some(&origin) = positions.get(&our_fk.table) else {
        tracing::warn!(
            table = %assn.name,
            references = %our_fk.table,
            "association references an unknown table; skipping"
        );
        return None;
    };
    let Some(&far) = positions.get(&their_fk.table) else {
        tracing::warn!(
            table = %assn.name,
            references = %their_fk.table,
            "association references an unknown table; skipping"
        );
        return None;
    };

    let far_table = &db.tables()[far];
    let Some(their_pk) = far_table.primary_key() else {
        tracing::warn!(
            table = %assn.name,
            references = %far_table.name,
            "association target has no primary key; skipping"
        );
        return None;
    };

    let member = opt_str(&their_col.options, "member")
        .unwrap_or_else(|| far_table.object_name.clone());
    let member_plural = opt_str(&their_col.options, "member_plural")
        .unwrap_or_else(|| far_table.object_plural.clone());

    Some((
        origin,
        ManyManyRef {
            assn_table: assn.name.clone(),
            our_column: our_col.name.clone(),
            their_column: their_col.name.clone(),
            their_table: their_fk.table.clone(),
            their_pk: their_pk.name.clone(),
            member,
            member_plural,
            mirror: None,
            is_type: false,
        },
    ))
}

//------------------------------------------------------------------------------
// Pass 4: forward and reverse references
//------------------------------------------------------------------------------

struct PendingRef {
    source: usize,
    column: usize,
    target: Option<usize>,
    member: String,
    reverse_member: String,
    reverse_member_plural: String,
    is_type: bool,
    drop: bool,
}

fn link_references(
    db: &mut Database,
    positions: &IndexMap<CompactString, usize>,
    type_names: &[CompactString],
    id_suffix: &str,
) {
    let mut pending: Vec<PendingRef> = Vec::new();

    for (ti, table) in db.tables().iter().enumerate() {
        if table.association || table.skip {
            continue;
        }
        for (ci, column) in table.columns.iter().enumerate() {
            let Some(fk) = column.foreign_key.as_ref() else {
                continue;
            };
            let stem = naming::member(naming::strip_suffix(&column.name, id_suffix));
            let member = opt_str(&column.options, "ref_member").unwrap_or(stem);

            if type_names.contains(&fk.table) {
                pending.push(PendingRef {
                    source: ti,
                    column: ci,
                    target: None,
                    member,
                    reverse_member: String::new(),
                    reverse_member_plural: String::new(),
                    is_type: true,
                    drop: false,
                });
                continue;
            }

            let target = positions
                .get(&fk.table)
                .copied()
                .filter(|&t| !db.tables()[t].skip && !db.tables()[t].association);
            let Some(target) = target else {
                tracing::warn!(
                    table = %table.name,
                    column = %column.name,
                    references = %fk.table,
                    "foreign key references an unknown or skipped table; dropping"
                );
                pending.push(PendingRef {
                    source: ti,
                    column: ci,
                    target: None,
                    member: String::new(),
                    reverse_member: String::new(),
                    reverse_member_plural: String::new(),
                    is_type: false,
                    drop: true,
                });
                continue;
            };

            // Reverse names disambiguate with the member stem when the
            // foreign key is not simply named after its target.
            let target_table = &db.tables()[target];
            let (mut reverse_member, mut reverse_member_plural) =
                if member == target_table.object_name {
                    (table.object_name.clone(), table.object_plural.clone())
                } else {
                    (
                        format!("{}_as_{}", table.object_name, member),
                        format!("{}_as_{}", table.object_plural, member),
                    )
                };
            if let Some(over) = opt_str(&column.options, "reverse_member") {
                reverse_member = over;
            }
            if let Some(over) = opt_str(&column.options, "reverse_member_plural") {
                reverse_member_plural = over;
            }

            pending.push(PendingRef {
                source: ti,
                column: ci,
                target: Some(target),
                member,
                reverse_member,
                reverse_member_plural,
                is_type: false,
                drop: false,
            });
        }
    }

    for p in pending {
        let source_pk = db.tables()[p.source]
            .primary_key()
            .map(|c| c.name.clone())
            .unwrap_or_default();
        let (source_name, source_column, is_unique) = {
            let column = &db.tables()[p.source].columns[p.column];
            (
                db.tables()[p.source].name.clone(),
                column.name.clone(),
                column.unique,
            )
        };
        let reverse_slot = p.target.map(|t| db.tables()[t].reverse_refs.len());

        {
            let column = &mut db.tables_mut()[p.source].columns[p.column];
            if p.drop {
                column.foreign_key = None;
                continue;
            }
            let Some(fk) = column.foreign_key.as_mut() else {
                continue;
            };
            fk.member = p.member;
            fk.is_type = p.is_type;
            fk.reverse_member = p.reverse_member.clone();
            fk.reverse_member_plural = p.reverse_member_plural.clone();
            fk.reverse_ref = reverse_slot;
        }

        if let Some(target) = p.target {
            db.tables_mut()[target].reverse_refs.push(ReverseRef {
                table: source_name,
                column: source_column,
                table_pk: source_pk,
                member: p.reverse_member,
                member_plural: p.reverse_member_plural,
                is_unique,
            });
        }
    }
}

//------------------------------------------------------------------------------
// Comment options
//------------------------------------------------------------------------------

/// Extracts the trailing JSON object from a comment, if any.
fn comment_options(comment: &str, name: &str) -> serde_json::Map<String, serde_json::Value> {
    let Some(start) = comment.find('{') else {
        return serde_json::Map::new();
    };
    let Some(end) = comment.rfind('}') else {
        return serde_json::Map::new();
    };
    if end < start {
        return serde_json::Map::new();
    }
    match serde_json::from_str(&comment[start..=end]) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => {
            tracing::warn!(name, "comment carries malformed JSON options; ignoring");
            serde_json::Map::new()
        }
    }
}

fn opt_str(options: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    options
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use crate::schema::{Column, ColumnType, Database, FkAction, Index, Options, Table, TypeTable};
    use crate::value::Value;

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

    fn assn() -> Table {
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

    fn analyzed() -> std::sync::Arc<Database> {
        Database::new("blog", Options::default())
            .with_table(person())
            .with_table(project())
            .with_table(assn())
            .analyze()
    }

    #[test]
    fn names_are_filled() {
        let db = analyzed();
        let person = db.table("person").unwrap();
        assert_eq!(person.object_name, "person");
        assert_eq!(person.object_plural, "people");
        assert_eq!(person.literal_name, "Person");
        assert_eq!(person.literal_plural, "People");
        let first = person.column("first_name").unwrap();
        assert_eq!(first.object_name, "first_name");
        assert_eq!(first.literal_name, "First Name");
    }

    #[test]
    fn auto_id_columns_become_strings() {
        let db = analyzed();
        let pk = db.table("person").unwrap().primary_key().unwrap();
        assert!(pk.auto_id);
        assert_eq!(pk.column_type, ColumnType::String);
    }

    #[test]
    fn forward_and_reverse_references() {
        let db = analyzed();
        let project = db.table("project").unwrap();
        let manager = project.column("manager_id").unwrap();
        let fk = manager.foreign_key.as_ref().unwrap();
        assert_eq!(fk.member, "manager");
        assert_eq!(fk.reverse_member_plural, "projects_as_manager");

        let person = db.table("person").unwrap();
        let reverse = person.reverse_ref("projects_as_manager").unwrap();
        assert_eq!(reverse.table, "project");
        assert_eq!(reverse.column, "manager_id");
        assert_eq!(reverse.table_pk, "id");
        assert!(!reverse.is_unique);

        let back = &person.reverse_refs[fk.reverse_ref.unwrap()];
        assert_eq!(back.column, "manager_id");
    }

    #[test]
    fn association_links_both_sides() {
        let db = analyzed();
        let project = db.table("project").unwrap();
        let members = project.many_many_ref("team_members").unwrap();
        assert_eq!(members.assn_table, "team_member_assn");
        assert_eq!(members.our_column, "project_id");
        assert_eq!(members.their_column, "person_id");
        assert_eq!(members.their_table, "person");
        assert_eq!(members.member, "team_member");

        let person = db.table("person").unwrap();
        let projects = person.many_many_ref("projects").unwrap();
        assert_eq!(projects.their_table, "project");
        assert_eq!(projects.our_column, "person_id");

        let mirrored = &person.many_many[members.mirror.unwrap()];
        assert_eq!(mirrored.their_table, "project");
        assert_eq!(mirrored.our_column, "person_id");
    }

    #[test]
    fn bad_association_is_skipped_not_fatal() {
        let broken = Table::new("broken_assn").with_column(
            Column::new("person_id", ColumnType::Integer).references("person", "id"),
        );
        let db = Database::new("blog", Options::default())
            .with_table(person())
            .with_table(broken)
            .analyze();
        assert!(db.table("person").unwrap().many_many.is_empty());
    }

    #[test]
    fn association_needs_primary_key_columns() {
        let loose = Table::new("tag_assn")
            .with_column(Column::new("person_id", ColumnType::Integer).references("person", "id"))
            .with_column(
                Column::new("project_id", ColumnType::Integer).references("project", "id"),
            );
        let db = Database::new("blog", Options::default())
            .with_table(person())
            .with_table(project())
            .with_table(loose)
            .analyze();
        assert!(db.table("person").unwrap().many_many.is_empty());
    }

    #[test]
    fn referential_actions_and_index_flags() {
        let task = Table::new("task")
            .with_column(
                Column::new("id", ColumnType::Integer)
                    .primary_key()
                    .auto_id(),
            )
            .with_column(
                Column::new("person_id", ColumnType::Integer)
                    .references("person", "id")
                    .on_delete(FkAction::Cascade)
                    .on_update(FkAction::SetNull),
            )
            .with_column(Column::new("due", ColumnType::DateTime))
            .with_index(Index::new(["due"]));
        let db = Database::new("blog", Options::default())
            .with_table(person())
            .with_table(task)
            .analyze();

        let task = db.table("task").unwrap();
        let fk = task
            .column("person_id")
            .unwrap()
            .foreign_key
            .as_ref()
            .unwrap();
        assert_eq!(fk.delete_action, FkAction::Cascade);
        assert_eq!(fk.update_action, FkAction::SetNull);

        assert!(task.column("id").unwrap().indexed);
        assert!(task.column("due").unwrap().indexed);
        assert!(!task.column("person_id").unwrap().indexed);
    }

    #[test]
    fn table_without_single_pk_is_skipped() {
        let bad = Table::new("log_line")
            .with_column(Column::new("at", ColumnType::DateTime))
            .with_column(Column::new("line", ColumnType::String));
        let db = Database::new("blog", Options::default())
            .with_table(bad)
            .analyze();
        assert!(db.node("log_line").is_err());
    }

    #[test]
    fn type_table_constants() {
        let tt = TypeTable::new("project_status_type")
            .fields(["id", "name"])
            .row([Value::from(1u64), Value::from("Active")])
            .row([Value::from(2u64), Value::from("On Hold")]);
        let db = Database::new("blog", Options::default())
            .with_type_table(tt)
            .analyze();
        let tt = db.type_table("project_status_type").unwrap();
        assert_eq!(tt.constants.get(&1).unwrap(), "ACTIVE");
        assert_eq!(tt.constants.get(&2).unwrap(), "ON_HOLD");
    }

    #[test]
    fn comment_options_override_names() {
        let table = Table::new("person")
            .comment(r#"people table {"literal": "Member"}"#)
            .with_column(Column::new("id", ColumnType::Integer).primary_key());
        let db = Database::new("blog", Options::default())
            .with_table(table)
            .analyze();
        assert_eq!(db.table("person").unwrap().literal_name, "Member");
    }
}
