//! Row manipulation: insert, update, and association rewrites.
//!
//! These cover the write side the query builder does not: single-row
//! inserts and updates keyed by primary key, and wholesale replacement of
//! an association table's links for one row. Wrap multi-statement calls in
//! a session transaction when atomicity matters.

use crate::error::Result;
use crate::session::Session;
use crate::value::Value;

/// Inserts one row and returns its generated key, formatted as a string.
pub async fn insert(session: &mut Session, table: &str, fields: &[(&str, Value)]) -> Result<String> {
    let mut sql = String::from("INSERT INTO ");
    ident(&mut sql, table);
    sql.push_str(" (");
    let mut params = Vec::with_capacity(fields.len());
    for (i, (name, value)) in fields.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        ident(&mut sql, name);
        params.push(value.clone());
    }
    sql.push_str(") VALUES (");
    for i in 0..fields.len() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push('?');
    }
    sql.push(')');

    let result = session.exec(&sql, &params).await?;
    Ok(result.last_insert_id.to_string())
}

/// Updates one row by primary key. Returns the number of rows changed.
pub async fn update(
    session: &mut Session,
    table: &str,
    pk_column: &str,
    pk: impl Into<Value>,
    fields: &[(&str, Value)],
) -> Result<u64> {
    if fields.is_empty() {
        return Ok(0);
    }
    let mut sql = String::from("UPDATE ");
    ident(&mut sql, table);
    sql.push_str(" SET ");
    let mut params = Vec::with_capacity(fields.len() + 1);
    for (i, (name, value)) in fields.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        ident(&mut sql, name);
        sql.push_str(" = ?");
        params.push(value.clone());
    }
    sql.push_str(" WHERE ");
    ident(&mut sql, pk_column);
    sql.push_str(" = ?");
    params.push(pk.into());

    let result = session.exec(&sql, &params).await?;
    Ok(result.rows_affected)
}

/// Replaces every link one row holds in an association table: existing links
/// are deleted, then one row per given key inserted.
pub async fn associate(
    session: &mut Session,
    assn_table: &str,
    our_column: &str,
    our_pk: impl Into<Value>,
    their_column: &str,
    their_pks: &[Value],
) -> Result<()> {
    let our_pk = our_pk.into();

    let mut delete = String::from("DELETE FROM ");
    ident(&mut delete, assn_table);
    delete.push_str(" WHERE ");
    ident(&mut delete, our_column);
    delete.push_str(" = ?");
    session.exec(&delete, &[our_pk.clone()]).await?;

    let mut insert = String::from("INSERT INTO ");
    ident(&mut insert, assn_table);
    insert.push_str(" (");
    ident(&mut insert, our_column);
    insert.push_str(", ");
    ident(&mut insert, their_column);
    insert.push_str(") VALUES (?, ?)");
    for pk in their_pks {
        session
            .exec(&insert, &[our_pk.clone(), pk.clone()])
            .await?;
    }
    Ok(())
}

fn ident(sql: &mut String, name: &str) {
    sql.push('`');
    if name.contains('`') {
        sql.push_str(&name.replace('`', "``"));
    } else {
        sql.push_str(name);
    }
    sql.push('`');
}
