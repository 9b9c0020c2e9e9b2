use arbor::{Error, QueryBuilder, ops};

mod common;

use common::sample_db;

#[test]
fn test_root_must_be_a_table() {
    let db = sample_db();
    let project = db.node("project").unwrap();
    let err = QueryBuilder::new(project.column("id").unwrap())
        .to_sql()
        .unwrap_err();
    assert!(matches!(err, Error::EmptyQuery));
}

#[test]
fn test_association_and_type_tables_are_not_roots() {
    let db = sample_db();
    assert!(matches!(
        db.node("team_member_assn").unwrap_err(),
        Error::UnknownMember { .. }
    ));
    assert!(matches!(
        db.node("status_type").unwrap_err(),
        Error::UnknownMember { .. }
    ));
}

#[test]
fn test_unknown_member_reports_table_and_name() {
    let db = sample_db();
    let project = db.node("project").unwrap();
    let Error::UnknownMember { table, member } = project.column("color").unwrap_err() else {
        panic!("expected UnknownMember");
    };
    assert_eq!(table, "project");
    assert_eq!(member, "color");
    assert!(project.reference("owner").is_err());
    assert!(project.many_many("tags").is_err());
}

#[test]
fn test_cross_table_condition_is_rejected() {
    let db = sample_db();
    let project = db.node("project").unwrap();
    let person = db.node("person").unwrap();
    let err = QueryBuilder::new(project)
        .condition(ops::eq(person.column("last_name").unwrap(), "Wolfe"))
        .to_sql()
        .unwrap_err();
    let Error::CrossTableRoot {
        query_root,
        node_root,
    } = err
    else {
        panic!("expected CrossTableRoot");
    };
    assert_eq!(query_root, "project");
    assert_eq!(node_root, "person");
}

#[test]
fn test_limit_may_only_be_set_once() {
    let db = sample_db();
    let project = db.node("project").unwrap();
    let err = QueryBuilder::new(project)
        .limit(10, 0)
        .limit(5, 0)
        .to_sql()
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateLimit));
}

#[test]
fn test_expand_rejects_forward_references() {
    let db = sample_db();
    let project = db.node("project").unwrap();
    let err = QueryBuilder::new(project.clone())
        .expand(project.reference("manager").unwrap())
        .to_sql()
        .unwrap_err();
    let Error::ExpandOnNonJoinable { member } = err else {
        panic!("expected ExpandOnNonJoinable");
    };
    assert_eq!(member, "manager");
}

#[test]
fn test_limit_with_array_join_is_rejected() {
    let db = sample_db();
    let project = db.node("project").unwrap();
    let err = QueryBuilder::new(project.clone())
        .join(project.many_many("team_members").unwrap())
        .limit(10, 0)
        .to_sql()
        .unwrap_err();
    let Error::LimitedArrayJoin { member } = err else {
        panic!("expected LimitedArrayJoin");
    };
    assert_eq!(member, "team_members");
}

#[test]
fn test_limit_with_expanded_array_join_is_allowed() {
    let db = sample_db();
    let project = db.node("project").unwrap();
    let members = project.many_many("team_members").unwrap();
    let (sql, params) = QueryBuilder::new(project.clone())
        .expand(members.clone())
        .order_by([members.column("first_name").unwrap()])
        .limit(10, 0)
        .to_sql()
        .unwrap();
    assert!(sql.ends_with("LIMIT ? OFFSET ?"));
    assert_eq!(params.len(), 2);
}

#[test]
fn test_count_rejects_select_and_group_by() {
    let db = sample_db();
    let project = db.node("project").unwrap();
    let err = QueryBuilder::new(project.clone())
        .select([project.column("name").unwrap()])
        .count_sql(false, Vec::<arbor::Node>::new())
        .unwrap_err();
    assert!(matches!(err, Error::CountWithSelect));

    let err = QueryBuilder::new(project.clone())
        .group_by([project.column("name").unwrap()])
        .count_sql(false, Vec::<arbor::Node>::new())
        .unwrap_err();
    assert!(matches!(err, Error::CountWithGroupBy));
}

#[test]
fn test_select_accepts_columns_only() {
    let db = sample_db();
    let project = db.node("project").unwrap();
    let err = QueryBuilder::new(project.clone())
        .select([project.reference("manager").unwrap()])
        .to_sql()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidSelect));
}

#[test]
fn test_conflicting_join_conditions_are_rejected() {
    let db = sample_db();
    let project = db.node("project").unwrap();
    let manager = project.reference("manager").unwrap();
    let err = QueryBuilder::new(project.clone())
        .join_on(
            manager.clone(),
            ops::eq(manager.column("last_name").unwrap(), "Wolfe"),
        )
        .join_on(
            manager.clone(),
            ops::eq(manager.column("last_name").unwrap(), "Jones"),
        )
        .to_sql()
        .unwrap_err();
    let Error::ConflictingJoinCondition { member } = err else {
        panic!("expected ConflictingJoinCondition");
    };
    assert_eq!(member, "manager");
}

#[test]
fn test_repeating_an_equivalent_join_condition_is_fine() {
    let db = sample_db();
    let project = db.node("project").unwrap();
    let manager = project.reference("manager").unwrap();
    let condition = || ops::eq(manager.column("last_name").unwrap(), "Wolfe");
    let result = QueryBuilder::new(project.clone())
        .join_on(manager.clone(), condition())
        .join_on(manager.clone(), condition())
        .to_sql();
    assert!(result.is_ok());
}

#[test]
fn test_first_error_wins() {
    let db = sample_db();
    let project = db.node("project").unwrap();
    // The duplicate limit comes first; the later bad expand must not
    // overwrite it.
    let err = QueryBuilder::new(project.clone())
        .limit(10, 0)
        .limit(5, 0)
        .expand(project.reference("manager").unwrap())
        .to_sql()
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateLimit));
}

//------------------------------------------------------------------------------
// Determinism
//------------------------------------------------------------------------------

#[test]
fn test_same_inputs_generate_identical_sql() {
    let db = sample_db();
    let build = || {
        let project = db.node("project").unwrap();
        QueryBuilder::new(project.clone())
            .join(project.reference("manager").unwrap())
            .condition(ops::gt(project.column("budget").unwrap(), 1000))
            .order_by([project.column("id").unwrap()])
            .to_sql()
            .unwrap()
    };
    let (first_sql, first_params) = build();
    let (second_sql, second_params) = build();
    assert_eq!(first_sql, second_sql);
    assert_eq!(first_params, second_params);
}

#[test]
fn test_equivalent_chains_share_one_join() {
    let db = sample_db();
    let project = db.node("project").unwrap();
    // Two separately built chains to the same association merge into one
    // join with one alias.
    let (sql, _) = QueryBuilder::new(project.clone())
        .join(project.many_many("team_members").unwrap())
        .order_by([project
            .many_many("team_members")
            .unwrap()
            .column("first_name")
            .unwrap()])
        .to_sql()
        .unwrap();
    assert_eq!(sql.matches("LEFT JOIN `person`").count(), 1);
    assert_eq!(sql.matches("LEFT JOIN `team_member_assn`").count(), 1);
}

#[test]
fn test_node_equivalence() {
    let db = sample_db();
    let project = db.node("project").unwrap();
    let id = project.column("id").unwrap();
    assert!(id.equivalent(&id));
    assert!(id.equivalent(&project.column("id").unwrap()));
    assert!(!id.equivalent(&project.column("name").unwrap()));

    // Sort direction and a one-sided manual alias do not break equivalence;
    // two different manual aliases do.
    assert!(id.equivalent(&id.descending()));
    assert!(id.equivalent(&id.aliased("pk")));
    assert!(!id.aliased("pk").equivalent(&id.aliased("key")));

    let members = project.many_many("team_members").unwrap();
    assert!(members.equivalent(&project.many_many("team_members").unwrap()));
    assert!(!members.equivalent(&project.many_many("statuses").unwrap()));

    let person = db.node("person").unwrap();
    assert!(!project.column("id").unwrap().equivalent(&person.column("id").unwrap()));
}

#[test]
fn test_conditions_accumulate_with_and() {
    let db = sample_db();
    let project = db.node("project").unwrap();
    let (sql, params) = QueryBuilder::new(project.clone())
        .condition(ops::gt(project.column("budget").unwrap(), 1000))
        .condition(ops::lt(project.column("spent").unwrap(), 500))
        .to_sql()
        .unwrap();
    assert!(sql.contains("WHERE ((`t0`.`budget` > ?) AND (`t0`.`spent` < ?))"));
    assert_eq!(params.len(), 2);
}

//------------------------------------------------------------------------------
// Detached sessions
//------------------------------------------------------------------------------

#[tokio::test]
async fn test_load_without_a_connection_fails() {
    let db = sample_db();
    let project = db.node("project").unwrap();
    let mut session = db.session();
    let err = QueryBuilder::new(project).load(&mut session).await.unwrap_err();
    assert!(matches!(err, Error::MissingContext));
}
