use std::sync::Arc;

use anyhow::Result;
use sqlexec::common::{DataValue, ExecutorSettings};
use sqlexec::dialect::ConstraintKind;
use sqlexec::exec::row::ColumnsMappingProducer;
use sqlexec::exec::{
    ExecError, ExecutionContext, JdbcActions, JdbcMutation, JdbcParameter, JdbcParameterBinding, JdbcParameterBindings,
    JdbcSelect, LockTimeoutHandler, MutationKind, QueryOptions, RowCountExpectation, StandardJdbcMutationExecutor,
    StandardJdbcSelectExecutor, StandardStatementCreator, Timeout, UniqueSemantic,
};
use sqlexec::mapping::{EntityInstance, JdbcMapping};
use sqlexec::session::SessionContext;

#[path = "../common/mod.rs"]
mod common;
use common::{bind_all, sqlite_session, user_select};

const INSERT: &str = "insert into users (id, email, age) values (?, ?, ?)";

fn insert(constraint: Option<&str>) -> (JdbcMutation, [JdbcParameter; 3]) {
    let parameters = [JdbcParameter::untyped(), JdbcParameter::untyped(), JdbcParameter::untyped()];
    let mut builder = JdbcMutation::builder(
        MutationKind::Insert {
            unique_constraint_name_that_may_fail: constraint.map(str::to_string),
        },
        INSERT,
    );
    for parameter in &parameters {
        builder = builder.parameter(parameter);
    }
    (builder.affected_table("users").build(), parameters)
}

fn insert_user(session: &SessionContext, id: i64, email: &str, age: i64) -> Result<u64> {
    let (mutation, [p_id, p_email, p_age]) = insert(None);
    let bindings = bind_all(&[
        (&p_id, DataValue::Integer(id)),
        (&p_email, DataValue::Text(email.into())),
        (&p_age, DataValue::Integer(age)),
    ]);
    Ok(StandardJdbcMutationExecutor.execute_update(&mutation, &bindings, &ExecutionContext::new(session))?)
}

#[test]
fn test_insert_then_load_entities() -> Result<()> {
    let (session, db) = sqlite_session(ExecutorSettings::default())?;
    assert_eq!(insert_user(&session, 1, "ann@example.com", 31)?, 1);
    assert_eq!(insert_user(&session, 2, "bob@example.com", 45)?, 1);

    let age = JdbcParameter::untyped();
    let select = user_select("select id, email, age from users where age > ? order by id", &[&age]);
    let users: Vec<Arc<EntityInstance>> = StandardJdbcSelectExecutor.list(
        &select,
        &bind_all(&[(&age, DataValue::Integer(40))]),
        &ExecutionContext::new(&session),
        UniqueSemantic::Allow,
    )?;

    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id(), &DataValue::Integer(2));
    assert_eq!(users[0].attribute("email"), Some(&DataValue::Text("bob@example.com".into())));
    assert_eq!(db.query_i64("select count(*) from users")?, 2);
    Ok(())
}

#[test]
fn test_declared_unique_violation_is_tolerated() -> Result<()> {
    let (session, db) = sqlite_session(ExecutorSettings::default())?;
    insert_user(&session, 1, "ann@example.com", 31)?;

    let (mutation, [p_id, p_email, p_age]) = insert(Some("users.email"));
    let duplicate = bind_all(&[
        (&p_id, DataValue::Integer(2)),
        (&p_email, DataValue::Text("ann@example.com".into())),
        (&p_age, DataValue::Integer(20)),
    ]);
    let rows = StandardJdbcMutationExecutor.execute_update(&mutation, &duplicate, &ExecutionContext::new(&session))?;
    assert_eq!(rows, 0);
    assert_eq!(db.query_i64("select count(*) from users")?, 1);

    // the primary key is a different constraint
    let same_id = bind_all(&[
        (&p_id, DataValue::Integer(1)),
        (&p_email, DataValue::Text("other@example.com".into())),
        (&p_age, DataValue::Integer(20)),
    ]);
    let err = StandardJdbcMutationExecutor
        .execute_update(&mutation, &same_id, &ExecutionContext::new(&session))
        .unwrap_err();
    assert_eq!(err.constraint_kind(), Some(ConstraintKind::Unique));
    assert_eq!(err.constraint_name(), Some("users.id"));
    Ok(())
}

#[test]
fn test_not_null_violation_is_reported() -> Result<()> {
    let (session, db) = sqlite_session(ExecutorSettings::default())?;
    let (mutation, [p_id, p_email, p_age]) = insert(Some("users.email"));
    let mut bindings = JdbcParameterBindings::new();
    bindings.add_binding(&p_id, JdbcParameterBinding::untyped(5i64));
    bindings.add_binding(&p_email, JdbcParameterBinding::typed(JdbcMapping::string(), DataValue::Null)?);
    bindings.add_binding(&p_age, JdbcParameterBinding::untyped(50i64));

    let err = StandardJdbcMutationExecutor
        .execute_update(&mutation, &bindings, &ExecutionContext::new(&session))
        .unwrap_err();
    assert_eq!(err.constraint_kind(), Some(ConstraintKind::NotNull));
    assert_eq!(db.query_i64("select count(*) from users")?, 0);
    Ok(())
}

#[test]
fn test_update_row_count_is_checked() -> Result<()> {
    let (session, db) = sqlite_session(ExecutorSettings::default())?;
    insert_user(&session, 1, "ann@example.com", 31)?;
    let age = JdbcParameter::untyped();
    let id = JdbcParameter::untyped();
    let update = JdbcMutation::builder(MutationKind::Update, "update users set age = ? where id = ?")
        .parameter(&age)
        .parameter(&id)
        .affected_table("users")
        .build();
    let run = |target: i64| {
        StandardJdbcMutationExecutor.execute(
            &update,
            &bind_all(&[(&age, DataValue::Integer(32)), (&id, DataValue::Integer(target))]),
            &ExecutionContext::new(&session),
            &StandardStatementCreator,
            &RowCountExpectation::single_row(),
        )
    };

    assert_eq!(run(1)?, 1);
    assert_eq!(db.query_i64("select age from users where id = 1")?, 32);
    let err = run(7).unwrap_err();
    assert!(matches!(err, ExecError::StaleState { expected: 1, actual: 0, .. }), "{:?}", err);
    Ok(())
}

#[test]
fn test_unknown_table_is_a_grammar_error() -> Result<()> {
    let (session, _db) = sqlite_session(ExecutorSettings::default())?;
    let select = JdbcSelect::builder("select id from missing_table", Arc::new(ColumnsMappingProducer)).build();
    let err = StandardJdbcSelectExecutor
        .list::<i64>(&select, &Default::default(), &ExecutionContext::new(&session), UniqueSemantic::None)
        .unwrap_err();
    assert!(matches!(err, ExecError::SqlGrammar { .. }), "{:?}", err);
    assert_eq!(session.jdbc_coordinator().open_statement_count(), 0);
    Ok(())
}

#[test]
fn test_cached_results_are_invalidated_by_insert() -> Result<()> {
    let settings = ExecutorSettings {
        query_cache_enabled: true,
        ..ExecutorSettings::default()
    };
    let (session, _db) = sqlite_session(settings)?;
    insert_user(&session, 1, "ann@example.com", 31)?;
    let select = JdbcSelect::builder("select email from users order by id", Arc::new(ColumnsMappingProducer))
        .affected_table("users")
        .build();
    let context = ExecutionContext::new(&session).with_query_options(QueryOptions::new().with_result_caching(true));
    let emails = || StandardJdbcSelectExecutor.list::<String>(&select, &Default::default(), &context, UniqueSemantic::None);

    assert_eq!(emails()?, vec!["ann@example.com".to_string()]);
    assert_eq!(emails()?, vec!["ann@example.com".to_string()]);
    insert_user(&session, 2, "bob@example.com", 45)?;
    assert_eq!(emails()?, vec!["ann@example.com".to_string(), "bob@example.com".to_string()]);
    Ok(())
}

#[test]
fn test_busy_timeout_applies_for_one_select() -> Result<()> {
    let (session, db) = sqlite_session(ExecutorSettings::default())?;
    db.set_busy_timeout(750)?;
    let select = JdbcSelect::builder("pragma busy_timeout", Arc::new(ColumnsMappingProducer))
        .actions(
            JdbcActions::builder()
                .add_secondary_action_pair(Arc::new(LockTimeoutHandler::new(Timeout::Millis(1500))))
                .build(),
        )
        .build();

    let during: Vec<i64> =
        StandardJdbcSelectExecutor.list(&select, &Default::default(), &ExecutionContext::new(&session), UniqueSemantic::None)?;
    assert_eq!(during, vec![1500]);
    assert_eq!(db.query_i64("pragma busy_timeout")?, 750);
    Ok(())
}
