use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;
use sqlexec::common::{DataValue, ExecutorSettings};
use sqlexec::dialect::{PostgreSqlDialect, StandardDialect};
use sqlexec::exec::{
    ExecError, ExecResult, ExecutionContext, JdbcMutation, JdbcParameter, MutationKind, QueryOptions,
    RowCountExpectation, StandardJdbcMutationExecutor, StandardJdbcSelectExecutor, StandardStatementCreator,
    UniqueSemantic,
};
use sqlexec::jdbc::scripted::ScriptedDriver;
use sqlexec::jdbc::SqlError;
use sqlexec::mapping::EntityInstance;
use sqlexec::session::SessionContext;

#[path = "../common/mod.rs"]
mod common;
use common::{bind_all, scripted_session, scripted_session_with, standard_session, user_columns, user_row, user_select};

const DELETE: &str = "delete from users where id = ?";
const SELECT_ALL: &str = "select id, email, age from users";

fn delete() -> (JdbcMutation, JdbcParameter) {
    let id = JdbcParameter::untyped();
    let mutation = JdbcMutation::builder(MutationKind::Delete, DELETE)
        .parameter(&id)
        .affected_table("users")
        .build();
    (mutation, id)
}

#[test]
fn test_mutation_forces_cached_select_to_reexecute() -> Result<()> {
    let driver = ScriptedDriver::new();
    driver.script_rows(SELECT_ALL, user_columns().row(user_row(1, "ann@example.com", 31)));
    driver.script_update(DELETE, 1);
    let settings = ExecutorSettings {
        statistics_enabled: true,
        query_cache_enabled: true,
        ..ExecutorSettings::default()
    };
    let (session, statistics) = scripted_session_with(&driver, Arc::new(StandardDialect::new()), settings);
    let select = user_select(SELECT_ALL, &[]);
    let cached = ExecutionContext::new(&session).with_query_options(QueryOptions::new().with_result_caching(true));
    let list = || {
        StandardJdbcSelectExecutor.list::<Arc<EntityInstance>>(&select, &Default::default(), &cached, UniqueSemantic::Allow)
    };

    list()?;
    list()?;
    assert_eq!(driver.execution_count(SELECT_ALL), 1);

    let (mutation, id) = delete();
    let rows = StandardJdbcMutationExecutor.execute_update(
        &mutation,
        &bind_all(&[(&id, DataValue::Integer(1))]),
        &ExecutionContext::new(&session),
    )?;
    assert_eq!(rows, 1);

    list()?;
    assert_eq!(driver.execution_count(SELECT_ALL), 2);
    assert_eq!(statistics.query_cache_hit_count(), 1);
    Ok(())
}

#[test]
fn test_custom_expectation_sees_row_count() -> Result<()> {
    let driver = ScriptedDriver::new();
    driver.script_update(DELETE, 3);
    let session = standard_session(&driver);
    let (mutation, id) = delete();
    let seen = Cell::new(None);
    let expectation = |rows: u64, _sql: &str| -> ExecResult<()> {
        seen.set(Some(rows));
        Ok(())
    };

    let rows = StandardJdbcMutationExecutor.execute(
        &mutation,
        &bind_all(&[(&id, DataValue::Integer(4))]),
        &ExecutionContext::new(&session),
        &StandardStatementCreator,
        &expectation,
    )?;
    assert_eq!(rows, 3);
    assert_eq!(seen.get(), Some(3));
    Ok(())
}

#[test]
fn test_stale_state_still_releases_statement() -> Result<()> {
    let driver = ScriptedDriver::new();
    driver.script_update(DELETE, 0);
    let session = standard_session(&driver);
    let (mutation, id) = delete();
    let err = StandardJdbcMutationExecutor
        .execute(
            &mutation,
            &bind_all(&[(&id, DataValue::Integer(9))]),
            &ExecutionContext::new(&session),
            &StandardStatementCreator,
            &RowCountExpectation::single_row(),
        )
        .unwrap_err();
    assert!(matches!(err, ExecError::StaleState { expected: 1, actual: 0, .. }));
    assert_eq!(driver.open_statement_count(), 0);
    Ok(())
}

#[test]
fn test_release_failure_is_suppressed_behind_execution_failure() -> Result<()> {
    let driver = ScriptedDriver::new();
    driver.script_failure(DELETE, SqlError::with_state("relation \"users\" does not exist", "42P01", 0));
    driver.fail_statement_close(SqlError::with_state("connection reset", "08006", 0));
    let session = scripted_session(&driver, Arc::new(PostgreSqlDialect::new()));
    let (mutation, id) = delete();

    let err = StandardJdbcMutationExecutor
        .execute_update(&mutation, &bind_all(&[(&id, DataValue::Integer(1))]), &ExecutionContext::new(&session))
        .unwrap_err();
    assert!(matches!(err.primary(), ExecError::SqlGrammar { .. }), "{:?}", err);
    assert_eq!(err.suppressed().len(), 1);
    assert!(matches!(err.suppressed()[0], ExecError::JdbcConnection { .. }));
    Ok(())
}

#[test]
fn test_release_failure_alone_fails_the_mutation() -> Result<()> {
    let driver = ScriptedDriver::new();
    driver.script_update(DELETE, 1);
    driver.fail_statement_close(SqlError::with_state("connection reset", "08006", 0));
    let session = scripted_session(&driver, Arc::new(PostgreSqlDialect::new()));
    let (mutation, id) = delete();

    let err = StandardJdbcMutationExecutor
        .execute_update(&mutation, &bind_all(&[(&id, DataValue::Integer(1))]), &ExecutionContext::new(&session))
        .unwrap_err();
    assert!(matches!(err, ExecError::JdbcConnection { .. }), "{:?}", err);
    Ok(())
}

#[test]
fn test_flush_only_for_overlapping_tables() -> Result<()> {
    let driver = ScriptedDriver::new();
    driver.script_update(DELETE, 1);
    let session = standard_session(&driver);
    let flushes = Rc::new(Cell::new(0));
    let counter = flushes.clone();
    session.set_flush_handler(Rc::new(move |_: &SessionContext, _: &[String]| {
        counter.set(counter.get() + 1);
        Ok(())
    }));
    let (mutation, id) = delete();
    let bindings = bind_all(&[(&id, DataValue::Integer(1))]);

    session.mark_pending("orders");
    StandardJdbcMutationExecutor.execute_update(&mutation, &bindings, &ExecutionContext::new(&session))?;
    assert_eq!(flushes.get(), 0);
    assert!(session.has_pending_changes());

    session.mark_pending("users");
    StandardJdbcMutationExecutor.execute_update(&mutation, &bindings, &ExecutionContext::new(&session))?;
    assert_eq!(flushes.get(), 1);
    assert!(!session.has_pending_changes());
    Ok(())
}

#[test]
fn test_insert_suppression_requires_matching_constraint_kind() -> Result<()> {
    let insert = "insert into users (id, email) values (?, ?)";
    let driver = ScriptedDriver::new();
    driver.script_failure(
        insert,
        SqlError::with_state("null value in column \"email\" violates not-null constraint", "23502", 0),
    );
    let session = scripted_session(&driver, Arc::new(PostgreSqlDialect::new()));
    let id = JdbcParameter::untyped();
    let email = JdbcParameter::untyped();
    let mutation = JdbcMutation::builder(
        MutationKind::Insert {
            unique_constraint_name_that_may_fail: Some("uq_email".into()),
        },
        insert,
    )
    .parameter(&id)
    .parameter(&email)
    .affected_table("users")
    .build();
    let bindings = bind_all(&[(&id, DataValue::Integer(1)), (&email, DataValue::Text("x".into()))]);

    let err = StandardJdbcMutationExecutor
        .execute_update(&mutation, &bindings, &ExecutionContext::new(&session))
        .unwrap_err();
    assert!(matches!(err, ExecError::ConstraintViolation { .. }));
    Ok(())
}
