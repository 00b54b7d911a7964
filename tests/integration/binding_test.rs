use std::sync::Arc;

use anyhow::Result;
use sqlexec::common::{DataValue, ExecutorSettings, MissingBindingPolicy};
use sqlexec::dialect::StandardDialect;
use sqlexec::exec::row::ColumnsMappingProducer;
use sqlexec::exec::{
    create_bindings, BindValue, CompositeParameterBinder, ExecError, ExecutionContext, JdbcMutation, JdbcOperation,
    JdbcParameter, JdbcParameterBinding, JdbcSelect, Limit, MutationKind, ParameterSlots, QueryOptions,
    QueryParameterBinding, QueryParameterBindings, StandardJdbcMutationExecutor, StandardJdbcSelectExecutor,
    UniqueSemantic, VersionSeedParameterBinder,
};
use sqlexec::jdbc::scripted::{ScriptedDriver, ScriptedRows};
use sqlexec::jdbc::SqlType;
use sqlexec::mapping::{BindableType, JdbcMapping, YesNoConverter};

#[path = "../common/mod.rs"]
mod common;
use common::{bind_all, scripted_session_with, standard_session};

fn id_rows() -> ScriptedRows {
    ScriptedRows::new(&[("id", SqlType::BigInt)]).row(vec![DataValue::Integer(1)])
}

fn padded_settings() -> ExecutorSettings {
    ExecutorSettings {
        in_clause_parameter_padding: true,
        ..ExecutorSettings::default()
    }
}

#[test]
fn test_in_list_is_padded_and_bound_in_order() -> Result<()> {
    let driver = ScriptedDriver::new();
    let (session, _) = scripted_session_with(&driver, Arc::new(StandardDialect::new()), padded_settings());

    let mut domain = QueryParameterBindings::new();
    domain.bind("status", QueryParameterBinding::single(None, DataValue::Text("open".into())));
    domain.bind(
        "ids",
        QueryParameterBinding::multi(
            Some(BindableType::basic(JdbcMapping::long())),
            vec![5i64, 6, 7].into_iter().map(|id| BindValue::Single(id.into())).collect(),
        ),
    );

    // render the SQL the way a translator would, one slot group per element
    let status = JdbcParameter::untyped();
    let id_count = sqlexec::exec::domain::padded_group_count(
        domain.get("ids").ok_or_else(|| anyhow::anyhow!("ids not bound"))?,
        &session,
    );
    assert_eq!(id_count, 4);
    let ids: Vec<JdbcParameter> = (0..id_count).map(|_| JdbcParameter::typed(JdbcMapping::long())).collect();
    let placeholders = vec!["?"; id_count].join(", ");
    let sql = format!("select id from orders where status = ? and id in ({})", placeholders);
    driver.script_rows(&sql, id_rows());

    let mut slots = ParameterSlots::new();
    slots.add("status", vec![vec![status.clone()]]);
    slots.add("ids", ids.iter().map(|id| vec![id.clone()]).collect());
    let bindings = create_bindings(&domain, &slots, &session)?;

    let mut builder = JdbcSelect::builder(sql.as_str(), Arc::new(ColumnsMappingProducer)).parameter(&status);
    for id in &ids {
        builder = builder.parameter(id);
    }
    let select = builder.build();
    let found: Vec<i64> =
        StandardJdbcSelectExecutor.list(&select, &bindings, &ExecutionContext::new(&session), UniqueSemantic::None)?;

    assert_eq!(found, vec![1]);
    assert_eq!(
        driver.executions_of(&sql)[0].positional_values(),
        vec![
            DataValue::Text("open".into()),
            DataValue::Integer(5),
            DataValue::Integer(6),
            DataValue::Integer(7),
            DataValue::Integer(7),
        ]
    );
    Ok(())
}

#[test]
fn test_embeddable_value_binds_one_position_per_column() -> Result<()> {
    let sql = "select id from shipments where zip = ? and country = ? and weight > ?";
    let driver = ScriptedDriver::new();
    driver.script_rows(sql, id_rows());
    let session = standard_session(&driver);

    let zip = JdbcParameter::typed(JdbcMapping::string());
    let country = JdbcParameter::typed(JdbcMapping::string());
    let weight = JdbcParameter::untyped();
    let mut domain = QueryParameterBindings::new();
    domain.bind(
        "address",
        QueryParameterBinding::single(
            Some(BindableType::composite("Address", vec![JdbcMapping::string(), JdbcMapping::string()])),
            BindValue::Tuple(vec![DataValue::Text("10115".into()), DataValue::Text("DE".into())]),
        ),
    );
    domain.bind("weight", QueryParameterBinding::single(None, DataValue::Float(2.5)));
    let mut slots = ParameterSlots::new();
    slots.add("address", vec![vec![zip.clone(), country.clone()]]);
    slots.add("weight", vec![vec![weight.clone()]]);
    let bindings = create_bindings(&domain, &slots, &session)?;

    let select = JdbcSelect::builder(sql, Arc::new(ColumnsMappingProducer))
        .binder(Arc::new(CompositeParameterBinder::new(vec![zip, country])))
        .parameter(&weight)
        .build();
    StandardJdbcSelectExecutor.list::<i64>(&select, &bindings, &ExecutionContext::new(&session), UniqueSemantic::None)?;

    assert_eq!(
        driver.executions_of(sql)[0].positional_values(),
        vec![DataValue::Text("10115".into()), DataValue::Text("DE".into()), DataValue::Float(2.5)]
    );
    Ok(())
}

#[test]
fn test_converter_applies_to_bound_value() -> Result<()> {
    let sql = "select id from users where newsletter = ?";
    let driver = ScriptedDriver::new();
    driver.script_rows(sql, id_rows());
    let session = standard_session(&driver);

    let yes_no = JdbcMapping::string().with_converter("yes_no", Arc::new(YesNoConverter))?;
    let flag = JdbcParameter::typed(yes_no.clone());
    let mut domain = QueryParameterBindings::new();
    domain.bind(
        "newsletter",
        QueryParameterBinding::single(Some(BindableType::basic(yes_no)), DataValue::Boolean(true)),
    );
    let mut slots = ParameterSlots::new();
    slots.add("newsletter", vec![vec![flag.clone()]]);
    let bindings = create_bindings(&domain, &slots, &session)?;

    let select = JdbcSelect::builder(sql, Arc::new(ColumnsMappingProducer)).parameter(&flag).build();
    StandardJdbcSelectExecutor.list::<i64>(&select, &bindings, &ExecutionContext::new(&session), UniqueSemantic::None)?;
    assert_eq!(driver.executions_of(sql)[0].value_at(1), Some(&DataValue::Text("Y".into())));
    Ok(())
}

#[test]
fn test_pagination_slots_take_values_from_options() -> Result<()> {
    let sql = "select id from users order by id limit ? offset ?";
    let driver = ScriptedDriver::new();
    driver.script_rows(sql, id_rows());
    let session = standard_session(&driver);

    let limit = JdbcParameter::limit();
    let offset = JdbcParameter::offset();
    let select = JdbcSelect::builder(sql, Arc::new(ColumnsMappingProducer))
        .parameter(&limit)
        .parameter(&offset)
        .limit_parameter(&limit)
        .offset_parameter(&offset)
        .applied_parameter(&limit, None)
        .applied_parameter(&offset, None)
        .build();
    let paged = QueryOptions::new().with_limit(Limit::new(Some(20), Some(10)));
    let context = ExecutionContext::new(&session).with_query_options(paged.clone());

    StandardJdbcSelectExecutor.list::<i64>(&select, &Default::default(), &context, UniqueSemantic::None)?;
    assert_eq!(
        driver.executions_of(sql)[0].positional_values(),
        vec![DataValue::Integer(10), DataValue::Integer(20)]
    );

    // rendered without pagination values, so a paged request needs new SQL
    let unbound = bind_all(&[]);
    assert!(!select.is_compatible_with(Some(&unbound), &paged));
    assert!(select.is_compatible_with(Some(&unbound), &QueryOptions::new()));
    Ok(())
}

#[test]
fn test_rendered_literal_requires_equal_binding() -> Result<()> {
    let tenant = JdbcParameter::typed(JdbcMapping::long());
    let select = JdbcSelect::builder("select id from users where tenant_id = 42", Arc::new(ColumnsMappingProducer))
        .applied_parameter(&tenant, Some(JdbcParameterBinding::typed(JdbcMapping::long(), 42i64)?))
        .build();
    let options = QueryOptions::new();

    assert!(select.is_compatible_with(Some(&bind_all(&[(&tenant, DataValue::Integer(42))])), &options));
    assert!(!select.is_compatible_with(Some(&bind_all(&[(&tenant, DataValue::Integer(7))])), &options));
    assert!(!select.is_compatible_with(None, &options));
    Ok(())
}

#[test]
fn test_missing_binding_policy() -> Result<()> {
    let sql = "select id from users where email = ?";
    let driver = ScriptedDriver::new();
    driver.script_rows(sql, id_rows());
    let email = JdbcParameter::untyped();
    let select = JdbcSelect::builder(sql, Arc::new(ColumnsMappingProducer)).parameter(&email).build();

    let strict = standard_session(&driver);
    let err = StandardJdbcSelectExecutor
        .list::<i64>(&select, &Default::default(), &ExecutionContext::new(&strict), UniqueSemantic::None)
        .unwrap_err();
    assert!(matches!(err, ExecError::ParameterNotBound(_)));
    assert_eq!(driver.execution_count(sql), 0);
    assert_eq!(driver.open_statement_count(), 0);

    let lenient = ExecutorSettings {
        missing_binding_policy: MissingBindingPolicy::UseDatabaseDefault,
        ..ExecutorSettings::default()
    };
    let (session, _) = scripted_session_with(&driver, Arc::new(StandardDialect::new()), lenient);
    StandardJdbcSelectExecutor.list::<i64>(&select, &Default::default(), &ExecutionContext::new(&session), UniqueSemantic::None)?;
    assert_eq!(driver.executions_of(sql)[0].value_at(1), None);
    Ok(())
}

#[test]
fn test_insert_seeds_version_column() -> Result<()> {
    let sql = "insert into documents (title, version) values (?, ?)";
    let driver = ScriptedDriver::new();
    driver.script_update(sql, 1);
    let session = standard_session(&driver);
    let title = JdbcParameter::untyped();
    let mutation = JdbcMutation::builder(
        MutationKind::Insert {
            unique_constraint_name_that_may_fail: None,
        },
        sql,
    )
    .parameter(&title)
    .binder(Arc::new(VersionSeedParameterBinder::new(JdbcMapping::integer())))
    .affected_table("documents")
    .build();

    StandardJdbcMutationExecutor.execute_update(
        &mutation,
        &bind_all(&[(&title, DataValue::Text("draft".into()))]),
        &ExecutionContext::new(&session),
    )?;
    assert_eq!(
        driver.executions_of(sql)[0].positional_values(),
        vec![DataValue::Text("draft".into()), DataValue::Integer(0)]
    );
    Ok(())
}
