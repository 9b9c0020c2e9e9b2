//! Session transaction semantics: counted nesting over one driver
//! transaction, id checking, and the statement profile log.

use arbor::{Error, StatementKind, Value};
use pretty_assertions::assert_eq;
use std::sync::Arc;

mod common;

use common::{FakeDriver, int, sample_db};

#[tokio::test]
async fn test_nested_begins_share_one_driver_transaction() {
    let db = sample_db();
    let driver = FakeDriver::new();
    let mut session = db.session_with(Arc::new(driver.clone()));

    let outer = session.begin().await.unwrap();
    let inner = session.begin().await.unwrap();
    assert!(session.in_transaction());

    session.commit(inner).await.unwrap();
    assert!(session.in_transaction());
    session.commit(outer).await.unwrap();
    assert!(!session.in_transaction());

    assert_eq!(driver.statements(), vec!["BEGIN", "COMMIT"]);
}

#[tokio::test]
async fn test_statements_run_inside_the_open_transaction() {
    let db = sample_db();
    let driver = FakeDriver::new();
    driver.set_exec_result(1, 0);
    let mut session = db.session_with(Arc::new(driver.clone()));

    let id = session.begin().await.unwrap();
    session
        .exec("UPDATE `project` SET `spent` = ?", &[Value::Double(0.0)])
        .await
        .unwrap();
    session.commit(id).await.unwrap();

    assert_eq!(
        driver.statements(),
        vec!["BEGIN", "UPDATE `project` SET `spent` = ?", "COMMIT"]
    );
}

#[tokio::test]
async fn test_commit_requires_the_innermost_id() {
    let db = sample_db();
    let driver = FakeDriver::new();
    let mut session = db.session_with(Arc::new(driver.clone()));

    let outer = session.begin().await.unwrap();
    let inner = session.begin().await.unwrap();

    let err = session.commit(outer).await.unwrap_err();
    assert!(matches!(err, Error::TransactionMismatch));

    session.commit(inner).await.unwrap();
    session.commit(outer).await.unwrap();
    assert_eq!(driver.statements(), vec!["BEGIN", "COMMIT"]);
}

#[tokio::test]
async fn test_rollback_with_a_stale_id_is_ignored() {
    let db = sample_db();
    let driver = FakeDriver::new();
    let mut session = db.session_with(Arc::new(driver.clone()));

    let id = session.begin().await.unwrap();
    session.commit(id).await.unwrap();
    // The error path calls rollback unconditionally; after the commit it
    // must do nothing.
    session.rollback(id).await.unwrap();

    assert_eq!(driver.statements(), vec!["BEGIN", "COMMIT"]);
}

#[tokio::test]
async fn test_inner_rollback_poisons_the_outer_commit() {
    let db = sample_db();
    let driver = FakeDriver::new();
    let mut session = db.session_with(Arc::new(driver.clone()));

    let outer = session.begin().await.unwrap();
    let inner = session.begin().await.unwrap();

    session.rollback(inner).await.unwrap();
    let err = session.commit(outer).await.unwrap_err();
    assert!(matches!(err, Error::TransactionRolledBack));
    assert!(!session.in_transaction());

    assert_eq!(driver.statements(), vec!["BEGIN", "ROLLBACK"]);
}

#[tokio::test]
async fn test_outermost_rollback_rolls_the_driver_back() {
    let db = sample_db();
    let driver = FakeDriver::new();
    let mut session = db.session_with(Arc::new(driver.clone()));

    let id = session.begin().await.unwrap();
    session.rollback(id).await.unwrap();
    assert!(!session.in_transaction());

    assert_eq!(driver.statements(), vec!["BEGIN", "ROLLBACK"]);

    // The session stays usable for a fresh transaction.
    let id = session.begin().await.unwrap();
    session.commit(id).await.unwrap();
    assert_eq!(
        driver.statements(),
        vec!["BEGIN", "ROLLBACK", "BEGIN", "COMMIT"]
    );
}

#[tokio::test]
async fn test_prepare_follows_the_transaction_and_is_profiled() {
    let db = sample_db();
    let driver = FakeDriver::new();
    let mut session = db.session_with(Arc::new(driver.clone()));
    session.enable_profiling();

    session.prepare("SELECT `id` FROM `project`").await.unwrap();
    let id = session.begin().await.unwrap();
    session
        .prepare("UPDATE `project` SET `spent` = ?")
        .await
        .unwrap();
    session.commit(id).await.unwrap();

    assert_eq!(
        driver.statements(),
        vec![
            "PREPARE SELECT `id` FROM `project`",
            "BEGIN",
            "PREPARE UPDATE `project` SET `spent` = ?",
            "COMMIT"
        ]
    );

    let profiles = session.take_profiles();
    let kinds: Vec<StatementKind> = profiles.iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        vec![
            StatementKind::Prepare,
            StatementKind::Begin,
            StatementKind::Prepare,
            StatementKind::Commit
        ]
    );
    assert_eq!(profiles[0].sql, "SELECT `id` FROM `project`");
}

#[tokio::test]
async fn test_detached_session_fails_with_missing_context() {
    let db = sample_db();
    let mut session = db.session();
    let err = session.begin().await.unwrap_err();
    assert!(matches!(err, Error::MissingContext));

    let err = session.prepare("SELECT 1").await.unwrap_err();
    assert!(matches!(err, Error::MissingContext));
}

#[tokio::test]
async fn test_profiling_logs_each_statement_with_its_window() {
    let db = sample_db();
    let driver = FakeDriver::new();
    driver.push_rows(vec![vec![int(1)]]);
    let mut session = db.session_with(Arc::new(driver));

    session.enable_profiling();
    session.query("SELECT 1", &[]).await.unwrap();
    let id = session.begin().await.unwrap();
    session.commit(id).await.unwrap();

    let profiles = session.take_profiles();
    let kinds: Vec<StatementKind> = profiles.iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        vec![
            StatementKind::Query,
            StatementKind::Begin,
            StatementKind::Commit
        ]
    );
    assert_eq!(profiles[0].sql, "SELECT 1");
    assert_eq!(profiles[0].db_key, "sample");
    assert!(profiles[0].begin <= profiles[0].end);

    // Taking drains the log.
    assert!(session.take_profiles().is_empty());
}
