// Shared test fixtures: sessions over the scripted driver and SQLite, and
// the user/order model most tests select from.
#![allow(dead_code)]


use std::sync::Arc;

use sqlexec::common::{DataValue, ExecutorSettings};
use sqlexec::dialect::{Dialect, SqliteDialect, StandardDialect};
use sqlexec::exec::loaded::NavigablePath;
use sqlexec::exec::row::{EntityResult, RowMapping};
use sqlexec::exec::{JdbcParameter, JdbcParameterBinding, JdbcParameterBindings, JdbcSelect};
use sqlexec::jdbc::scripted::{ScriptedDriver, ScriptedRows};
use sqlexec::jdbc::SqlType;
use sqlexec::mapping::{CollectionDescriptor, EntityDescriptor, JdbcMapping};
use sqlexec::session::{SessionContext, SessionFactory};
use sqlexec::stats::StatisticsImpl;

use self::sqlite::SqliteConnection;

pub const USERS_DDL: &str = "create table users (
    id integer primary key,
    email text not null,
    age integer,
    active integer not null default 1,
    constraint uq_email unique (email)
);
create table user_roles (
    owner_id integer not null,
    role text not null
);";

/// Session over the scripted driver with statistics enabled
pub fn scripted_session(driver: &ScriptedDriver, dialect: Arc<dyn Dialect>) -> SessionContext {
    let settings = ExecutorSettings {
        statistics_enabled: true,
        ..ExecutorSettings::default()
    };
    scripted_session_with(driver, dialect, settings).0
}

/// Session over the scripted driver, and the statistics it records into
pub fn scripted_session_with(
    driver: &ScriptedDriver,
    dialect: Arc<dyn Dialect>,
    settings: ExecutorSettings,
) -> (SessionContext, Arc<StatisticsImpl>) {
    let statistics = Arc::new(StatisticsImpl::new(settings.statistics_enabled));
    let session = SessionFactory::builder(dialect)
        .settings(settings)
        .statistics(statistics.clone())
        .build()
        .open_session(Box::new(driver.connect()));
    (session, statistics)
}

pub fn standard_session(driver: &ScriptedDriver) -> SessionContext {
    scripted_session(driver, Arc::new(StandardDialect::new()))
}

/// In-memory SQLite database with the user tables, and a session over it.
/// The returned connection shares the session's database.
pub fn sqlite_session(settings: ExecutorSettings) -> anyhow::Result<(SessionContext, SqliteConnection)> {
    let connection = SqliteConnection::open_in_memory()?;
    connection.execute_batch(USERS_DDL)?;
    let handle = connection.share();
    let statistics = Arc::new(StatisticsImpl::new(settings.statistics_enabled));
    let session = SessionFactory::builder(Arc::new(SqliteDialect::new()))
        .settings(settings)
        .statistics(statistics)
        .build()
        .open_session(Box::new(connection));
    Ok((session, handle))
}

pub fn user_descriptor() -> Arc<EntityDescriptor> {
    Arc::new(
        EntityDescriptor::new("User", "users", "id", JdbcMapping::long())
            .with_attribute("email", "email", JdbcMapping::string())
            .with_attribute("age", "age", JdbcMapping::integer()),
    )
}

pub fn roles_descriptor() -> Arc<CollectionDescriptor> {
    Arc::new(CollectionDescriptor::new(
        "User.roles",
        "user_roles",
        "owner_id",
        JdbcMapping::long(),
        vec![JdbcMapping::string()],
    ))
}

pub fn user_columns() -> ScriptedRows {
    ScriptedRows::new(&[("id", SqlType::BigInt), ("email", SqlType::Varchar), ("age", SqlType::Integer)])
}

pub fn user_row(id: i64, email: &str, age: i64) -> Vec<DataValue> {
    vec![DataValue::Integer(id), DataValue::Text(email.to_string()), DataValue::Integer(age)]
}

/// Select of whole users with one `?` per given parameter
pub fn user_select(sql: &str, parameters: &[&JdbcParameter]) -> JdbcSelect {
    let mapping = RowMapping::new(vec![]).with_result(EntityResult::by_column_names(
        NavigablePath::root("u"),
        user_descriptor(),
    ));
    let mut builder = JdbcSelect::builder(sql, Arc::new(mapping)).affected_table("users");
    for parameter in parameters {
        builder = builder.parameter(parameter);
    }
    builder.build()
}

/// Bindings giving each parameter an untyped value
pub fn bind_all(values: &[(&JdbcParameter, DataValue)]) -> JdbcParameterBindings {
    let mut bindings = JdbcParameterBindings::new();
    for (parameter, value) in values {
        bindings.add_binding(parameter, JdbcParameterBinding::untyped(value.clone()));
    }
    bindings
}
