use std::sync::Arc;

use anyhow::Result;
use sqlexec::common::DataValue;
use sqlexec::exec::row::{CollectionFetch, ColumnRef, ColumnsMappingProducer, EntityResult, RowMapping};
use sqlexec::exec::{ExecutionContext, JdbcSelect, NavigablePath, StandardJdbcSelectExecutor};
use sqlexec::jdbc::scripted::{ScriptedDriver, ScriptedRows};
use sqlexec::jdbc::{ScrollMode, SqlType};
use sqlexec::mapping::EntityInstance;

#[path = "../common/mod.rs"]
mod common;
use common::{roles_descriptor, standard_session, user_descriptor, user_row};

const IDS: &str = "select id from events order by id";

fn script_ids(driver: &ScriptedDriver, ids: &[i64]) {
    let mut rows = ScriptedRows::new(&[("id", SqlType::BigInt)]);
    for id in ids {
        rows = rows.row(vec![DataValue::Integer(*id)]);
    }
    driver.script_rows(IDS, rows);
}

fn ids_select() -> JdbcSelect {
    JdbcSelect::builder(IDS, Arc::new(ColumnsMappingProducer)).build()
}

#[test]
fn test_cursor_moves_in_both_directions() -> Result<()> {
    let driver = ScriptedDriver::new();
    script_ids(&driver, &[10, 20, 30, 40]);
    let session = standard_session(&driver);
    let select = ids_select();
    let context = ExecutionContext::new(&session);
    let mut cursor = StandardJdbcSelectExecutor.scroll::<i64>(&select, &Default::default(), &context)?;

    assert_eq!(cursor.get(), None);
    assert!(cursor.next()?);
    assert!(cursor.is_first());
    assert!(cursor.next()?);
    assert_eq!(cursor.get(), Some(&20));
    assert!(cursor.previous()?);
    assert_eq!(cursor.current()?, &10);
    assert!(!cursor.previous()?);
    assert_eq!(cursor.position(), None);

    assert!(cursor.last()?);
    assert_eq!(cursor.get(), Some(&40));
    assert_eq!(cursor.position(), Some(4));
    assert!(cursor.is_last()?);
    // reading the last row exhausted the result set
    assert!(!cursor.is_open());
    assert_eq!(driver.open_statement_count(), 0);

    assert!(cursor.set_position(-2)?);
    assert_eq!(cursor.get(), Some(&30));
    assert!(!cursor.set_position(0)?);
    assert!(cursor.current().is_err());
    assert!(cursor.scroll(2)?);
    assert_eq!(cursor.get(), Some(&20));
    assert!(!cursor.scroll(5)?);

    cursor.after_last()?;
    assert!(!cursor.next()?);
    assert!(cursor.previous()?);
    assert_eq!(cursor.get(), Some(&40));
    Ok(())
}

#[test]
fn test_cursor_reads_rows_on_demand() -> Result<()> {
    let driver = ScriptedDriver::new();
    script_ids(&driver, &[1, 2, 3]);
    let session = standard_session(&driver);
    let select = ids_select();
    let context = ExecutionContext::new(&session);
    let mut cursor = StandardJdbcSelectExecutor.scroll::<i64>(&select, &Default::default(), &context)?;

    assert!(cursor.next()?);
    assert!(cursor.is_open());
    assert_eq!(driver.open_statement_count(), 1);
    assert_eq!(driver.open_result_set_count(), 1);
    assert_eq!(driver.executions_of(IDS)[0].scroll_mode, ScrollMode::ScrollInsensitive);

    cursor.close()?;
    assert!(!cursor.is_open());
    assert_eq!(driver.open_statement_count(), 0);
    assert_eq!(driver.open_result_set_count(), 0);
    // rows read before closing stay reachable
    assert_eq!(cursor.get(), Some(&1));
    assert!(!cursor.next()?);
    Ok(())
}

#[test]
fn test_dropping_open_cursor_releases_statement() -> Result<()> {
    let driver = ScriptedDriver::new();
    script_ids(&driver, &[1, 2, 3]);
    let session = standard_session(&driver);
    let select = ids_select();
    let context = ExecutionContext::new(&session);
    {
        let mut cursor = StandardJdbcSelectExecutor.scroll::<i64>(&select, &Default::default(), &context)?;
        assert!(cursor.next()?);
        assert_eq!(driver.open_statement_count(), 1);
    }
    assert_eq!(driver.open_statement_count(), 0);
    assert_eq!(driver.open_result_set_count(), 0);
    Ok(())
}

#[test]
fn test_empty_result() -> Result<()> {
    let driver = ScriptedDriver::new();
    script_ids(&driver, &[]);
    let session = standard_session(&driver);
    let select = ids_select();
    let context = ExecutionContext::new(&session);
    let mut cursor = StandardJdbcSelectExecutor.scroll::<i64>(&select, &Default::default(), &context)?;

    assert!(!cursor.first()?);
    assert!(!cursor.last()?);
    assert!(!cursor.next()?);
    assert_eq!(cursor.get(), None);
    assert_eq!(driver.open_statement_count(), 0);
    Ok(())
}

#[test]
fn test_fetching_cursor_groups_rows_by_root_entity() -> Result<()> {
    let sql = "select u.id, u.email, u.age, r.role from users u join user_roles r on r.owner_id = u.id";
    let driver = ScriptedDriver::new();
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
        (3, "cid@example.com", "admin"),
        (3, "cid@example.com", "viewer"),
    ] {
        let mut row = user_row(id, email, 30);
        row.push(DataValue::Text(role.into()));
        rows = rows.row(row);
    }
    driver.script_rows(sql, rows);
    let session = standard_session(&driver);

    let root = NavigablePath::root("u");
    let user = EntityResult::by_column_names(root.clone(), user_descriptor()).with_fetch(CollectionFetch::new(
        root.append("roles"),
        roles_descriptor(),
        vec![ColumnRef::label("role")],
    ));
    let select = JdbcSelect::builder(sql, Arc::new(RowMapping::new(vec![user.into()]))).build();
    let context = ExecutionContext::new(&session);
    let mut cursor = StandardJdbcSelectExecutor.scroll::<Arc<EntityInstance>>(&select, &Default::default(), &context)?;
    assert!(cursor.is_fetching());

    let mut ids = Vec::new();
    while cursor.next()? {
        ids.push(cursor.current()?.id().clone());
    }
    assert_eq!(ids, vec![DataValue::Integer(1), DataValue::Integer(2), DataValue::Integer(3)]);

    assert!(cursor.set_position(2)?);
    assert_eq!(cursor.current()?.id(), &DataValue::Integer(2));
    assert_eq!(session.persistence_context().collection_count(), 3);
    assert_eq!(driver.open_statement_count(), 0);
    Ok(())
}
