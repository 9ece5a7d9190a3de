#![allow(clippy::unwrap_used, clippy::expect_used)]

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;
use uuid::Uuid;

use super::Repository;
use crate::config::DbConnConfig;
use crate::connection::PgConnector;
use crate::context::ExecutionContext;
use crate::mapper::{
    ColumnSpec, DataModel, DataModelRecord, DbType, DbValue, MapperError, MapperResult,
};
use crate::test_support::Customer;
use crate::uow::UnitOfWork;

fn closed_unit_of_work() -> UnitOfWork<PgConnector> {
    UnitOfWork::new(PgConnector::new(DbConnConfig {
        dsn: Some("postgres://app@127.0.0.1:1/app".to_owned()),
        ..Default::default()
    }))
}

fn ctx() -> ExecutionContext {
    ExecutionContext::new(Uuid::new_v4(), "tester")
}

#[derive(Debug, Default)]
struct Misdeclared {
    record: DataModelRecord,
    score: i32,
}

impl DataModel for Misdeclared {
    const SCHEMA: &'static str = "crm";
    const TABLE: &'static str = "misdeclared";
    const COLUMNS: &'static [ColumnSpec] = &[ColumnSpec::new("score", "score", DbType::BigInt)];

    fn record(&self) -> &DataModelRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut DataModelRecord {
        &mut self.record
    }

    fn extension_values(&self) -> Vec<DbValue> {
        vec![self.score.into()]
    }

    fn apply_extension_value(&mut self, _: &str, value: DbValue) -> MapperResult<()> {
        self.score = value.extract()?;
        Ok(())
    }
}

#[tokio::test]
#[traced_test]
async fn infrastructure_failures_become_false_or_none() {
    let uow = closed_unit_of_work();
    let repo = Repository::<Customer>::for_model(&uow).unwrap();
    let ctx = ctx();
    let cancel = CancellationToken::new();
    let id = Uuid::new_v4();

    assert_eq!(repo.get_by_id(&ctx, id, &cancel).await.unwrap(), None);
    assert!(!repo.exists(&ctx, id, &cancel).await.unwrap());
    assert!(!repo.delete(&ctx, id, &cancel).await.unwrap());
    assert_eq!(repo.count(&ctx, None, &cancel).await.unwrap(), None);
    assert!(repo.find(&ctx, None, None, None, &cancel).await.unwrap().is_none());
    assert!(!repo.enumerate_all(&ctx, |_| true, &cancel).await.unwrap());

    assert_eq!(ctx.errors().len(), 6);
    assert!(ctx.errors().iter().all(|e| e == "Connection is not open"));
    assert!(logs_contain("repository operation failed"));
    assert!(logs_contain("crm.customer"));
}

#[tokio::test]
async fn failed_writes_leave_model_untouched() {
    let uow = closed_unit_of_work();
    let repo = Repository::<Customer>::for_model(&uow).unwrap();
    let ctx = ctx();
    let cancel = CancellationToken::new();

    let mut customer = Customer {
        name: "Ada".to_owned(),
        credit_limit: Decimal::new(1_000, 0),
        active: true,
        ..Default::default()
    };
    let before = customer.clone();

    assert!(!repo.insert(&ctx, &mut customer, &cancel).await.unwrap());
    assert_eq!(customer, before);

    customer.record.id = Uuid::new_v4();
    customer.record.entity_version = 3;
    let before = customer.clone();
    assert!(!repo.update(&ctx, &mut customer, &cancel).await.unwrap());
    assert_eq!(customer, before);
}

#[tokio::test]
async fn bulk_insert_surfaces_mapping_errors_before_io() {
    let uow = closed_unit_of_work();
    let repo = Repository::<Misdeclared>::for_model(&uow).unwrap();
    let ctx = ctx();
    let mut rows = vec![Misdeclared::default(), Misdeclared::default()];

    let err = repo
        .bulk_insert(&ctx, &mut rows, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MapperError::TypeMismatch {
            expected: DbType::BigInt,
            got: DbType::Integer,
            ..
        }
    ));
    // nothing reached the connection
    assert!(!ctx.has_errors());
    assert!(rows.iter().all(|row| row.record.id.is_nil()));
    assert!(rows.iter().all(|row| row.record.entity_version == 0));
}

#[tokio::test]
async fn failed_bulk_insert_leaves_models_untouched() {
    let uow = closed_unit_of_work();
    let repo = Repository::<Customer>::for_model(&uow).unwrap();
    let ctx = ctx();
    let mut rows = vec![
        Customer {
            name: "Ada".to_owned(),
            ..Default::default()
        },
        Customer {
            name: "Grace".to_owned(),
            ..Default::default()
        },
    ];
    let before = rows.clone();

    let copied = repo
        .bulk_insert(&ctx, &mut rows, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(copied, None);
    assert_eq!(rows, before);
    assert_eq!(ctx.errors(), ["Connection is not open"]);
}

#[tokio::test]
async fn empty_bulk_insert_is_a_noop() {
    let uow = closed_unit_of_work();
    let repo = Repository::<Customer>::for_model(&uow).unwrap();
    let ctx = ctx();

    let copied = repo
        .bulk_insert(&ctx, &mut [], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(copied, Some(0));
    assert!(!ctx.has_errors());
}

#[test]
fn modified_since_filter_covers_both_audit_timestamps() {
    let uow = closed_unit_of_work();
    let repo = Repository::<Customer>::for_model(&uow).unwrap();
    let mapper = repo.mapper();
    let since = chrono::Utc::now();

    let filter = mapper
        .where_field("changedAt")
        .unwrap()
        .ge(since)
        .unwrap()
        .or(mapper.where_field("createdAt").unwrap().ge(since).unwrap());
    let generated = mapper.generate_select_command(Some(&filter), None, None);
    assert!(
        generated
            .text
            .ends_with("WHERE (changed_at >= $1 OR created_at >= $2)"),
        "{}",
        generated.text
    );
}
