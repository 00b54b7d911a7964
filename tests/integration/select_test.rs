use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;
use sqlexec::common::{DataValue, ExecutorSettings};
use sqlexec::dialect::StandardDialect;
use sqlexec::exec::row::{BasicResult, CollectionFetch, ColumnRef, EntityResult, RowMapping};
use sqlexec::exec::{
    CacheMode, Callback, DomainValue, ExecError, ExecutionContext, JdbcParameter, JdbcSelect, NavigablePath,
    QueryOptions, StandardJdbcSelectExecutor, UniqueSemantic,
};
use sqlexec::jdbc::scripted::{ScriptedDriver, ScriptedRows};
use sqlexec::jdbc::SqlType;
use sqlexec::mapping::EntityInstance;

#[path = "../common/mod.rs"]
mod common;
use common::{
    bind_all, roles_descriptor, scripted_session_with, standard_session, user_columns, user_descriptor, user_row,
    user_select,
};

const BY_AGE: &str = "select id, email, age from users where age > ?";

fn script_users(driver: &ScriptedDriver) {
    driver.script_rows(
        BY_AGE,
        user_columns()
            .row(user_row(1, "ann@example.com", 31))
            .row(user_row(2, "bob@example.com", 45)),
    );
}

#[test]
fn test_entities_are_registered_once_per_session() -> Result<()> {
    let driver = ScriptedDriver::new();
    script_users(&driver);
    let session = standard_session(&driver);
    let age = JdbcParameter::untyped();
    let select = user_select(BY_AGE, &[&age]);
    let bindings = bind_all(&[(&age, DataValue::Integer(30))]);
    let context = ExecutionContext::new(&session);

    let first: Vec<Arc<EntityInstance>> =
        StandardJdbcSelectExecutor.list(&select, &bindings, &context, UniqueSemantic::Allow)?;
    let second: Vec<Arc<EntityInstance>> =
        StandardJdbcSelectExecutor.list(&select, &bindings, &context, UniqueSemantic::Allow)?;

    assert_eq!(first.len(), 2);
    assert_eq!(first[0].attribute("email"), Some(&DataValue::Text("ann@example.com".into())));
    assert!(Arc::ptr_eq(&first[0], &second[0]));
    assert!(Arc::ptr_eq(&first[1], &second[1]));
    assert_eq!(session.persistence_context().entity_count(), 2);
    assert_eq!(driver.open_statement_count(), 0);
    assert_eq!(driver.open_result_set_count(), 0);
    Ok(())
}

#[test]
fn test_repeated_entity_rows_collapse_under_allow() -> Result<()> {
    let driver = ScriptedDriver::new();
    driver.script_rows(
        BY_AGE,
        user_columns()
            .row(user_row(1, "ann@example.com", 31))
            .row(user_row(1, "ann@example.com", 31))
            .row(user_row(2, "bob@example.com", 45)),
    );
    let session = standard_session(&driver);
    let age = JdbcParameter::untyped();
    let select = user_select(BY_AGE, &[&age]);
    let bindings = bind_all(&[(&age, DataValue::Integer(30))]);
    let context = ExecutionContext::new(&session);

    let allowed: Vec<Arc<EntityInstance>> =
        StandardJdbcSelectExecutor.list(&select, &bindings, &context, UniqueSemantic::Allow)?;
    assert_eq!(allowed.len(), 2);

    let kept: Vec<Arc<EntityInstance>> =
        StandardJdbcSelectExecutor.list(&select, &bindings, &context, UniqueSemantic::Never)?;
    assert_eq!(kept.len(), 3);

    let err = StandardJdbcSelectExecutor
        .list::<Arc<EntityInstance>>(&select, &bindings, &context, UniqueSemantic::Assert)
        .unwrap_err();
    assert!(matches!(err, ExecError::DuplicateRow(_)), "{:?}", err);
    assert_eq!(driver.open_statement_count(), 0);
    Ok(())
}

#[test]
fn test_collection_fetch_rows_fill_one_collection() -> Result<()> {
    let sql = "select u.id, u.email, u.age, r.role from users u left join user_roles r on r.owner_id = u.id";
    let driver = ScriptedDriver::new();
    let mut rows = ScriptedRows::new(&[
        ("id", SqlType::BigInt),
        ("email", SqlType::Varchar),
        ("age", SqlType::Integer),
        ("role", SqlType::Varchar),
    ]);
    for role in ["admin", "editor"] {
        let mut row = user_row(1, "ann@example.com", 31);
        row.push(DataValue::Text(role.into()));
        rows = rows.row(row);
    }
    let mut lonely = user_row(2, "bob@example.com", 45);
    lonely.push(DataValue::Null);
    rows = rows.row(lonely);
    driver.script_rows(sql, rows);
    let session = standard_session(&driver);

    let root = NavigablePath::root("u");
    let user = EntityResult::by_column_names(root.clone(), user_descriptor()).with_fetch(CollectionFetch::new(
        root.append("roles"),
        roles_descriptor(),
        vec![ColumnRef::label("role")],
    ));
    let select = JdbcSelect::builder(sql, Arc::new(RowMapping::new(vec![user.into()]))).build();
    let users: Vec<Arc<EntityInstance>> = StandardJdbcSelectExecutor.list(
        &select,
        &Default::default(),
        &ExecutionContext::new(&session),
        UniqueSemantic::Assert,
    )?;

    assert_eq!(users.len(), 2);
    assert_eq!(session.persistence_context().collection_count(), 2);
    Ok(())
}

#[test]
fn test_unique_rejects_two_results() -> Result<()> {
    let driver = ScriptedDriver::new();
    script_users(&driver);
    let session = standard_session(&driver);
    let age = JdbcParameter::untyped();
    let select = user_select(BY_AGE, &[&age]);
    let bindings = bind_all(&[(&age, DataValue::Integer(30))]);
    let context = ExecutionContext::new(&session);

    let first: Option<Arc<EntityInstance>> = StandardJdbcSelectExecutor.first(&select, &bindings, &context)?;
    assert_eq!(first.map(|user| user.id().clone()), Some(DataValue::Integer(1)));

    let err = StandardJdbcSelectExecutor
        .unique::<Arc<EntityInstance>>(&select, &bindings, &context)
        .unwrap_err();
    assert!(matches!(err, ExecError::NonUniqueResult(2)));
    assert_eq!(driver.open_result_set_count(), 0);
    Ok(())
}

#[test]
fn test_rows_to_skip_are_read_past_and_counted_in_max_rows() -> Result<()> {
    let sql = "select name from tags";
    let driver = ScriptedDriver::new();
    let mut rows = ScriptedRows::new(&[("name", SqlType::Varchar)]);
    for name in ["a", "b", "c", "d", "e"] {
        rows = rows.row(vec![DataValue::Text(name.into())]);
    }
    driver.script_rows(sql, rows);
    let session = standard_session(&driver);
    let select = JdbcSelect::builder(sql, Arc::new(RowMapping::new(vec![BasicResult::new(1, None).into()])))
        .rows_to_skip(1)
        .max_rows(2)
        .build();

    let names: Vec<String> = StandardJdbcSelectExecutor.list(
        &select,
        &Default::default(),
        &ExecutionContext::new(&session),
        UniqueSemantic::None,
    )?;
    assert_eq!(names, vec!["b".to_string(), "c".to_string()]);
    assert_eq!(driver.executions_of(sql)[0].max_rows, Some(3));
    Ok(())
}

#[test]
fn test_after_load_actions_run_once_per_loaded_entity() -> Result<()> {
    let driver = ScriptedDriver::new();
    script_users(&driver);
    let session = standard_session(&driver);
    let age = JdbcParameter::untyped();
    let select = user_select(BY_AGE, &[&age]);
    let bindings = bind_all(&[(&age, DataValue::Integer(30))]);

    let loaded = Rc::new(RefCell::new(Vec::new()));
    let sink = loaded.clone();
    let callback = Rc::new(Callback::new());
    callback.register_after_load_action(move |entity, _session| sink.borrow_mut().push(entity.id().clone()));
    let context = ExecutionContext::new(&session).with_callback(callback);

    StandardJdbcSelectExecutor.list::<Arc<EntityInstance>>(&select, &bindings, &context, UniqueSemantic::Allow)?;
    // already managed entities are not loaded again
    StandardJdbcSelectExecutor.list::<Arc<EntityInstance>>(&select, &bindings, &context, UniqueSemantic::Allow)?;
    assert_eq!(*loaded.borrow(), vec![DataValue::Integer(1), DataValue::Integer(2)]);
    Ok(())
}

#[test]
fn test_read_only_query_loads_read_only_entities() -> Result<()> {
    let driver = ScriptedDriver::new();
    script_users(&driver);
    let session = standard_session(&driver);
    let age = JdbcParameter::untyped();
    let select = user_select(BY_AGE, &[&age]);
    let bindings = bind_all(&[(&age, DataValue::Integer(30))]);
    let context = ExecutionContext::new(&session).with_query_options(QueryOptions::new().with_read_only(true));

    let users: Vec<Arc<EntityInstance>> =
        StandardJdbcSelectExecutor.list(&select, &bindings, &context, UniqueSemantic::Allow)?;
    assert!(users.iter().all(|user| user.is_read_only()));
    assert!(!session.persistence_context().is_default_read_only());
    Ok(())
}

#[test]
fn test_comment_and_tuple_transformer() -> Result<()> {
    let sql = "select id, email from users";
    let commented = "/* list users */ select id, email from users";
    let driver = ScriptedDriver::new();
    driver.script_rows(
        commented,
        ScriptedRows::new(&[("id", SqlType::BigInt), ("email", SqlType::Varchar)])
            .row(vec![DataValue::Integer(1), DataValue::Text("ann@example.com".into())]),
    );
    let settings = ExecutorSettings {
        comments_enabled: true,
        ..ExecutorSettings::default()
    };
    let (session, _) = scripted_session_with(&driver, Arc::new(StandardDialect::new()), settings);
    let mapping = RowMapping::new(vec![
        BasicResult::new("id", None).with_alias("id").into(),
        BasicResult::new("email", None).with_alias("email").into(),
    ]);
    let select = JdbcSelect::builder(sql, Arc::new(mapping)).build();
    let options = QueryOptions::new()
        .with_comment("list users")
        .with_tuple_transformer(Arc::new(|tuple: Vec<DomainValue>, aliases: &[String]| {
            let rendered = aliases
                .iter()
                .zip(tuple)
                .map(|(alias, value)| match value {
                    DomainValue::Basic(value) => format!("{}={}", alias, value.to_log_string()),
                    other => format!("{}={:?}", alias, other),
                })
                .collect::<Vec<_>>()
                .join(",");
            DomainValue::Basic(DataValue::Text(rendered))
        }));

    let rows: Vec<String> = StandardJdbcSelectExecutor.list(
        &select,
        &Default::default(),
        &ExecutionContext::new(&session).with_query_options(options),
        UniqueSemantic::None,
    )?;
    assert_eq!(driver.execution_count(commented), 1);
    assert_eq!(rows.len(), 1);
    assert!(rows[0].starts_with("id=1,email="));
    Ok(())
}

#[test]
fn test_cache_modes() -> Result<()> {
    let driver = ScriptedDriver::new();
    script_users(&driver);
    let settings = ExecutorSettings {
        statistics_enabled: true,
        query_cache_enabled: true,
        ..ExecutorSettings::default()
    };
    let (session, statistics) = scripted_session_with(&driver, Arc::new(StandardDialect::new()), settings);
    let age = JdbcParameter::untyped();
    let select = user_select(BY_AGE, &[&age]);
    let bindings = bind_all(&[(&age, DataValue::Integer(30))]);
    let cached = |mode: CacheMode| {
        ExecutionContext::new(&session).with_query_options(
            QueryOptions::new().with_result_caching(true).with_cache_mode(mode),
        )
    };

    StandardJdbcSelectExecutor.list::<DomainValue>(&select, &bindings, &cached(CacheMode::Ignore), UniqueSemantic::Allow)?;
    StandardJdbcSelectExecutor.list::<DomainValue>(&select, &bindings, &cached(CacheMode::Get), UniqueSemantic::Allow)?;
    assert_eq!(driver.execution_count(BY_AGE), 2);
    assert_eq!(statistics.query_cache_put_count(), 0);

    StandardJdbcSelectExecutor.list::<DomainValue>(&select, &bindings, &cached(CacheMode::Put), UniqueSemantic::Allow)?;
    assert_eq!(statistics.query_cache_put_count(), 1);
    let users: Vec<Arc<EntityInstance>> =
        StandardJdbcSelectExecutor.list(&select, &bindings, &cached(CacheMode::Normal), UniqueSemantic::Allow)?;
    assert_eq!(users.len(), 2);
    assert_eq!(driver.execution_count(BY_AGE), 3);
    assert_eq!(statistics.query_cache_hit_count(), 1);
    Ok(())
}

#[test]
fn test_cache_key_follows_parameter_positions() -> Result<()> {
    let sql = "select id, email, age from users where age > ? and id < ?";
    let driver = ScriptedDriver::new();
    driver.script_rows(sql, user_columns().row(user_row(1, "ann@example.com", 31)));
    let settings = ExecutorSettings {
        query_cache_enabled: true,
        ..ExecutorSettings::default()
    };
    let (session, _) = scripted_session_with(&driver, Arc::new(StandardDialect::new()), settings);
    let age = JdbcParameter::untyped();
    let id = JdbcParameter::untyped();
    let select = user_select(sql, &[&age, &id]);
    let context = ExecutionContext::new(&session).with_query_options(QueryOptions::new().with_result_caching(true));

    let first = bind_all(&[(&age, DataValue::Integer(1)), (&id, DataValue::Integer(2))]);
    StandardJdbcSelectExecutor.list::<DomainValue>(&select, &first, &context, UniqueSemantic::Allow)?;
    // same values bound in the same order, but to the other slots
    let swapped = bind_all(&[(&id, DataValue::Integer(1)), (&age, DataValue::Integer(2))]);
    StandardJdbcSelectExecutor.list::<DomainValue>(&select, &swapped, &context, UniqueSemantic::Allow)?;
    assert_eq!(driver.execution_count(sql), 2);
    assert_eq!(driver.executions_of(sql)[1].positional_values(), vec![DataValue::Integer(2), DataValue::Integer(1)]);

    // binding order alone does not change the key
    let reordered = bind_all(&[(&id, DataValue::Integer(2)), (&age, DataValue::Integer(1))]);
    StandardJdbcSelectExecutor.list::<DomainValue>(&select, &reordered, &context, UniqueSemantic::Allow)?;
    assert_eq!(driver.execution_count(sql), 2);
    Ok(())
}
