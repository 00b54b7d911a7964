use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;
use sqlexec::common::{DataValue, ExecutorSettings};
use sqlexec::dialect::{PostgreSqlDialect, StandardDialect};
use sqlexec::exec::{
    CallResult, ExecError, ExecutionContext, FunctionReturn, JdbcCall, JdbcCallExecutor, JdbcCallParameterRegistration,
    JdbcParameter, QueryOptions, RefCursorExtractor,
};
use sqlexec::jdbc::scripted::{ParameterKey, ScriptedCall, ScriptedDriver, ScriptedRows};
use sqlexec::jdbc::{CallableStatement, ColumnMetadata, ResultSetMetadata, SqlError, SqlResult, SqlType};
use sqlexec::mapping::{JdbcMapping, YesNoConverter};
use sqlexec::session::SessionContext;

#[path = "../common/mod.rs"]
mod common;
use common::{bind_all, scripted_session, scripted_session_with, standard_session};

#[test]
fn test_named_registrations_fall_back_to_positions() -> Result<()> {
    let sql = "{call toggle_newsletter(?, ?)}";
    let driver = ScriptedDriver::new();
    driver.script_call(
        sql,
        ScriptedCall {
            out_values: vec![(ParameterKey::Position(2), DataValue::Text("Y".into()))],
            ..ScriptedCall::default()
        },
    );
    let session = standard_session(&driver);
    let user = JdbcParameter::untyped();
    let flag = JdbcParameter::untyped();
    let yes_no = JdbcMapping::string().with_converter("yes_no", Arc::new(YesNoConverter))?;
    let call = JdbcCall::builder(sql)
        .parameter(JdbcCallParameterRegistration::input(&user, Some(JdbcMapping::long())).named("user_id"))
        .parameter(JdbcCallParameterRegistration::in_out(&flag, yes_no).named("subscribed"))
        .build();
    let bindings = bind_all(&[(&user, DataValue::Integer(3)), (&flag, DataValue::Text("N".into()))]);

    let outputs = JdbcCallExecutor.execute(&call, &bindings, &ExecutionContext::new(&session))?;

    // the standard dialect cannot bind by name
    let execution = &driver.executions_of(sql)[0];
    assert_eq!(execution.positional_values(), vec![DataValue::Integer(3), DataValue::Text("N".into())]);
    assert_eq!(execution.named_value("user_id"), None);
    assert_eq!(execution.out_parameters, vec![(ParameterKey::Position(2), SqlType::Varchar)]);
    assert_eq!(outputs.out_value("subscribed"), Some(&DataValue::Boolean(true)));
    Ok(())
}

#[test]
fn test_named_binding_can_be_disabled() -> Result<()> {
    let sql = "{call archive_user(?)}";
    let driver = ScriptedDriver::new();
    driver.script_call(sql, ScriptedCall::default());
    let settings = ExecutorSettings {
        prefer_named_call_parameters: false,
        ..ExecutorSettings::default()
    };
    let (session, _) = scripted_session_with(&driver, Arc::new(PostgreSqlDialect::new()), settings);
    let user = JdbcParameter::untyped();
    let call = JdbcCall::builder(sql)
        .parameter(JdbcCallParameterRegistration::input(&user, Some(JdbcMapping::long())).named("user_id"))
        .build();

    JdbcCallExecutor.execute(&call, &bind_all(&[(&user, DataValue::Integer(8))]), &ExecutionContext::new(&session))?;
    let execution = &driver.executions_of(sql)[0];
    assert_eq!(execution.value_at(1), Some(&DataValue::Integer(8)));
    assert_eq!(execution.named_value("user_id"), None);
    Ok(())
}

#[test]
fn test_call_result_set_and_update_count() -> Result<()> {
    let sql = "{call purge_sessions(?)}";
    let driver = ScriptedDriver::new();
    driver.script_call(
        sql,
        ScriptedCall {
            result: Some(
                ScriptedRows::new(&[("user_id", SqlType::BigInt), ("purged", SqlType::Integer)])
                    .row(vec![DataValue::Integer(1), DataValue::Integer(4)])
                    .row(vec![DataValue::Integer(2), DataValue::Integer(1)]),
            ),
            update_count: Some(5),
            ..ScriptedCall::default()
        },
    );
    let session = standard_session(&driver);
    let days = JdbcParameter::untyped();
    let call = JdbcCall::builder(sql)
        .parameter(JdbcCallParameterRegistration::input(&days, None))
        .affected_table("sessions")
        .build();
    let context = ExecutionContext::new(&session).with_query_options(QueryOptions::new().with_timeout(5));

    let outputs = JdbcCallExecutor.execute(&call, &bind_all(&[(&days, DataValue::Integer(30))]), &context)?;
    let result = outputs.result().ok_or_else(|| anyhow::anyhow!("call returned no result set"))?;
    assert_eq!(result.rows().len(), 2);
    assert_eq!(result.rows()[0], vec![DataValue::Integer(1), DataValue::Integer(4)]);
    assert_eq!(outputs.update_count(), Some(5));
    assert_eq!(driver.executions_of(sql)[0].query_timeout, Some(5));
    assert_eq!(driver.open_result_set_count(), 0);
    assert_eq!(driver.open_statement_count(), 0);
    Ok(())
}

#[test]
fn test_call_flushes_pending_changes_to_its_tables() -> Result<()> {
    let sql = "{call recompute_totals()}";
    let driver = ScriptedDriver::new();
    driver.script_call(sql, ScriptedCall::default());
    let session = standard_session(&driver);
    let flushed = Rc::new(Cell::new(false));
    let marker = flushed.clone();
    session.set_flush_handler(Rc::new(move |_: &SessionContext, _: &[String]| {
        marker.set(true);
        Ok(())
    }));
    session.mark_pending("orders");
    let call = JdbcCall::builder(sql).affected_table("orders").build();

    JdbcCallExecutor.execute(&call, &Default::default(), &ExecutionContext::new(&session))?;
    assert!(flushed.get());
    Ok(())
}

#[test]
fn test_call_failure_is_classified_and_releases_statement() -> Result<()> {
    let sql = "{call slow_report()}";
    let driver = ScriptedDriver::new();
    driver.script_failure(sql, SqlError::with_state("canceling statement due to statement timeout", "57014", 0));
    let session = scripted_session(&driver, Arc::new(PostgreSqlDialect::new()));
    let call = JdbcCall::builder(sql).build();

    let err = JdbcCallExecutor
        .execute(&call, &Default::default(), &ExecutionContext::new(&session))
        .unwrap_err();
    assert!(matches!(err, ExecError::QueryTimeout { .. }), "{:?}", err);
    assert_eq!(driver.open_statement_count(), 0);
    Ok(())
}

/// Serves a fixed cursor and counts how often it was asked
#[derive(Debug, Default)]
struct CannedCursor {
    calls: Cell<usize>,
}

impl RefCursorExtractor for CannedCursor {
    fn extract_results(
        &self,
        _statement: &mut dyn CallableStatement,
        position: usize,
        name: Option<&str>,
        _session: &SessionContext,
    ) -> SqlResult<CallResult> {
        self.calls.set(self.calls.get() + 1);
        assert_eq!((position, name), (1, None));
        Ok(CallResult::new(
            ResultSetMetadata::new(vec![ColumnMetadata::new("code", SqlType::Varchar)]),
            vec![vec![DataValue::Text("EUR".into())], vec![DataValue::Text("USD".into())]],
        ))
    }
}

#[test]
fn test_function_returning_cursor_uses_extractor() -> Result<()> {
    let sql = "{? = call currencies()}";
    let driver = ScriptedDriver::new();
    driver.script_call(sql, ScriptedCall::default());
    let session = scripted_session(&driver, Arc::new(StandardDialect::new()));
    let call = JdbcCall::builder(sql).function_return(FunctionReturn::RefCursor).build();
    let extractor = CannedCursor::default();

    let outputs = JdbcCallExecutor.execute_with(&call, &Default::default(), &ExecutionContext::new(&session), &extractor)?;
    assert_eq!(extractor.calls.get(), 1);
    let currencies = outputs
        .ref_cursor_at(1)
        .ok_or_else(|| anyhow::anyhow!("no cursor at position 1"))?;
    assert_eq!(currencies.rows().len(), 2);
    assert_eq!(outputs.function_return(), None);
    assert_eq!(driver.executions_of(sql)[0].out_parameters, vec![(ParameterKey::Position(1), SqlType::RefCursor)]);
    Ok(())
}
