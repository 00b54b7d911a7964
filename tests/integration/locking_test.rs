use std::sync::Arc;

use anyhow::Result;
use sqlexec::common::DataValue;
use sqlexec::dialect::{PostgreSqlDialect, StandardDialect};
use sqlexec::exec::row::{CollectionFetch, ColumnRef, EntityResult, RowMapping};
use sqlexec::exec::{
    ExecError, ExecutionContext, FollowOnLockingAction, JdbcActions, JdbcSelect, LockMode, LockOptions,
    LockStrategy, LockTimeoutHandler, NavigablePath, StandardJdbcSelectExecutor, Timeout, UniqueSemantic,
};
use sqlexec::jdbc::scripted::{ScriptedDriver, ScriptedRows};
use sqlexec::jdbc::{SqlError, SqlType};
use sqlexec::mapping::EntityInstance;

#[path = "../common/mod.rs"]
mod common;
use common::{roles_descriptor, scripted_session, user_descriptor, user_row};

const USERS_WITH_ROLES: &str = "select u.id, u.email, u.age, r.role from users u join user_roles r on r.owner_id = u.id";
const CURRENT_TIMEOUT: &str = "select current_setting('lock_timeout', false)";

fn script_users_with_roles(driver: &ScriptedDriver) {
    let mut rows = ScriptedRows::new(&[
        ("id", SqlType::BigInt),
        ("email", SqlType::Varchar),
        ("age", SqlType::Integer),
        ("role", SqlType::Varchar),
    ]);
    for (id, email, role) in [
        (1, "ann@example.com", "admin"),
        (1, "ann@example.com", "editor"),
        (2, "bob@example.com", "viewer"),
    ] {
        let mut row = user_row(id, email, 40);
        row.push(DataValue::Text(role.into()));
        rows = rows.row(row);
    }
    driver.script_rows(USERS_WITH_ROLES, rows);
}

fn lock_rows() -> ScriptedRows {
    ScriptedRows::new(&[("id", SqlType::BigInt)])
}

/// Users with their roles, locked after loading with `lock_options`
fn follow_on_select(lock_options: LockOptions) -> JdbcSelect {
    users_with_roles_select(lock_options, LockStrategy::FollowOn)
}

fn users_with_roles_select(lock_options: LockOptions, strategy: LockStrategy) -> JdbcSelect {
    let root = NavigablePath::root("u");
    let roles = root.append("roles");
    let user = EntityResult::by_column_names(root.clone(), user_descriptor()).with_fetch(CollectionFetch::new(
        roles.clone(),
        roles_descriptor(),
        vec![ColumnRef::label("role")],
    ));
    let actions = FollowOnLockingAction::apply(JdbcActions::builder(), lock_options).build();
    JdbcSelect::builder(USERS_WITH_ROLES, Arc::new(RowMapping::new(vec![user.into()])))
        .affected_table("users")
        .affected_table("user_roles")
        .lock_strategy(strategy)
        .collect_loaded_values([root, roles])
        .actions(actions)
        .build()
}

#[test]
fn test_follow_on_locks_loaded_rows_under_connection_timeout() -> Result<()> {
    let driver = ScriptedDriver::new();
    script_users_with_roles(&driver);
    driver.script_rows(
        CURRENT_TIMEOUT,
        ScriptedRows::new(&[("lock_timeout", SqlType::Varchar)]).row(vec![DataValue::Text("0".into())]),
    );
    driver.script_update("set local lock_timeout = 2000", 0);
    driver.script_update("set local lock_timeout = 0", 0);
    driver.script_rows("select id from users where id in (?, ?) for update", lock_rows());
    driver.script_rows("select owner_id from user_roles where owner_id = ? for update", lock_rows());
    let session = scripted_session(&driver, Arc::new(PostgreSqlDialect::new()));
    let select = follow_on_select(LockOptions::new(LockMode::PessimisticWrite).with_timeout(Timeout::Millis(2000)));

    let users: Vec<Arc<EntityInstance>> = StandardJdbcSelectExecutor.list(
        &select,
        &Default::default(),
        &ExecutionContext::new(&session),
        UniqueSemantic::Allow,
    )?;
    assert_eq!(users.len(), 2);

    assert_eq!(
        driver.executed_sql(),
        vec![
            USERS_WITH_ROLES,
            CURRENT_TIMEOUT,
            "set local lock_timeout = 2000",
            "select id from users where id in (?, ?) for update",
            "select owner_id from user_roles where owner_id = ? for update",
            "select owner_id from user_roles where owner_id = ? for update",
            "set local lock_timeout = 0",
        ]
    );
    let root_lock = &driver.executions_of("select id from users where id in (?, ?) for update")[0];
    assert_eq!(root_lock.positional_values(), vec![DataValue::Integer(1), DataValue::Integer(2)]);
    let owners: Vec<DataValue> = driver
        .executions_of("select owner_id from user_roles where owner_id = ? for update")
        .iter()
        .filter_map(|execution| execution.value_at(1).cloned())
        .collect();
    assert_eq!(owners, vec![DataValue::Integer(1), DataValue::Integer(2)]);
    assert_eq!(driver.open_statement_count(), 0);
    Ok(())
}

#[test]
fn test_failed_follow_on_lock_restores_connection_timeout() -> Result<()> {
    let driver = ScriptedDriver::new();
    script_users_with_roles(&driver);
    driver.script_rows(
        CURRENT_TIMEOUT,
        ScriptedRows::new(&[("lock_timeout", SqlType::Varchar)]).row(vec![DataValue::Text("1s".into())]),
    );
    driver.script_update("set local lock_timeout = 500", 0);
    driver.script_update("set local lock_timeout = 1000", 0);
    driver.script_failure(
        "select id from users where id in (?, ?) for share",
        SqlError::with_state("could not obtain lock on row in relation \"users\"", "55P03", 0),
    );
    let session = scripted_session(&driver, Arc::new(PostgreSqlDialect::new()));
    let select = follow_on_select(LockOptions::new(LockMode::PessimisticRead).with_timeout(Timeout::Millis(500)));

    let err = StandardJdbcSelectExecutor
        .list::<Arc<EntityInstance>>(&select, &Default::default(), &ExecutionContext::new(&session), UniqueSemantic::Allow)
        .unwrap_err();
    assert!(matches!(err, ExecError::LockTimeout { .. }), "{:?}", err);
    assert_eq!(driver.executed_sql().last().map(String::as_str), Some("set local lock_timeout = 1000"));
    assert_eq!(driver.open_statement_count(), 0);
    Ok(())
}

#[test]
fn test_lock_clause_carries_timeout_without_connection_support() -> Result<()> {
    let driver = ScriptedDriver::new();
    script_users_with_roles(&driver);
    driver.script_rows("select id from users where id in (?, ?) for update skip locked", lock_rows());
    driver.script_rows("select owner_id from user_roles where owner_id = ? for update skip locked", lock_rows());
    let session = scripted_session(&driver, Arc::new(StandardDialect::new()));
    let select = follow_on_select(LockOptions::new(LockMode::PessimisticWrite).with_timeout(Timeout::SkipLocked));

    StandardJdbcSelectExecutor.list::<Arc<EntityInstance>>(
        &select,
        &Default::default(),
        &ExecutionContext::new(&session),
        UniqueSemantic::Allow,
    )?;
    assert_eq!(driver.execution_count("select id from users where id in (?, ?) for update skip locked"), 1);
    assert_eq!(driver.execution_count("select owner_id from user_roles where owner_id = ? for update skip locked"), 2);
    assert!(!driver.executed_sql().iter().any(|sql| sql.contains("lock_timeout")));
    Ok(())
}

#[test]
fn test_optimistic_lock_takes_no_row_locks() -> Result<()> {
    let driver = ScriptedDriver::new();
    script_users_with_roles(&driver);
    let session = scripted_session(&driver, Arc::new(PostgreSqlDialect::new()));
    let select = follow_on_select(LockOptions::new(LockMode::Optimistic));

    StandardJdbcSelectExecutor.list::<Arc<EntityInstance>>(
        &select,
        &Default::default(),
        &ExecutionContext::new(&session),
        UniqueSemantic::Allow,
    )?;
    assert_eq!(driver.executed_sql(), vec![USERS_WITH_ROLES]);
    Ok(())
}

#[test]
fn test_loaded_values_are_only_locked_for_follow_on_strategy() -> Result<()> {
    let driver = ScriptedDriver::new();
    script_users_with_roles(&driver);
    let session = scripted_session(&driver, Arc::new(PostgreSqlDialect::new()));
    let select = users_with_roles_select(LockOptions::new(LockMode::PessimisticWrite), LockStrategy::Clause);

    let users: Vec<Arc<EntityInstance>> = StandardJdbcSelectExecutor.list(
        &select,
        &Default::default(),
        &ExecutionContext::new(&session),
        UniqueSemantic::Allow,
    )?;
    assert_eq!(users.len(), 2);
    assert_eq!(driver.executed_sql(), vec![USERS_WITH_ROLES]);
    Ok(())
}

#[test]
fn test_timeout_handler_wraps_select_with_lock_clause() -> Result<()> {
    let sql = "select id, email, age from users where id = 1 for update";
    let driver = ScriptedDriver::new();
    driver.script_rows(
        CURRENT_TIMEOUT,
        ScriptedRows::new(&[("lock_timeout", SqlType::Varchar)]).row(vec![DataValue::Text("0".into())]),
    );
    driver.script_update("set local lock_timeout = 3000", 0);
    driver.script_update("set local lock_timeout = 0", 0);
    driver.script_rows(sql, common::user_columns().row(user_row(1, "ann@example.com", 31)));
    let session = scripted_session(&driver, Arc::new(PostgreSqlDialect::new()));
    let handler = Arc::new(LockTimeoutHandler::new(Timeout::Millis(3000)));
    let select = JdbcSelect::builder(
        sql,
        Arc::new(RowMapping::new(vec![]).with_result(EntityResult::by_column_names(
            NavigablePath::root("u"),
            user_descriptor(),
        ))),
    )
    .lock_strategy(LockStrategy::Clause)
    .actions(JdbcActions::builder().add_secondary_action_pair(handler).build())
    .build();

    let user: Option<Arc<EntityInstance>> =
        StandardJdbcSelectExecutor.unique(&select, &Default::default(), &ExecutionContext::new(&session))?;
    assert!(user.is_some());
    assert_eq!(
        driver.executed_sql(),
        vec![CURRENT_TIMEOUT, "set local lock_timeout = 3000", sql, "set local lock_timeout = 0"]
    );
    Ok(())
}
