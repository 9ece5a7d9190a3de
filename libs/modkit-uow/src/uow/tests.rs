#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;
use uuid::Uuid;

use super::UnitOfWork;
use crate::DbError;
use crate::context::ExecutionContext;
use crate::test_support::{FakeConnector, FakeState};

fn unit_of_work() -> (UnitOfWork<FakeConnector>, Arc<FakeState>) {
    let (connector, state) = FakeConnector::new();
    (UnitOfWork::new(connector), state)
}

fn ctx() -> ExecutionContext {
    ExecutionContext::new(Uuid::new_v4(), "tester").with_operation("test.run")
}

#[tokio::test]
async fn commits_when_handler_succeeds() {
    let (uow, state) = unit_of_work();
    let ctx = ctx();

    let committed = uow
        .run(
            &ctx,
            7_i64,
            |uow, _, n, _| {
                Box::pin(async move {
                    assert!(uow.transaction().is_some());
                    Ok(n == 7)
                })
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(committed);
    assert_eq!(state.statements(), ["BEGIN", "COMMIT"]);
    assert!(!uow.connection().is_open());
    assert!(uow.transaction().is_none());
    assert_eq!(state.live_handles(), 0);
    assert!(!ctx.has_errors());
}

#[tokio::test]
async fn rolls_back_when_handler_declines() {
    let (uow, state) = unit_of_work();
    let ctx = ctx();

    let committed = uow
        .run(
            &ctx,
            (),
            |_, _, (), _| Box::pin(async { Ok(false) }),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!committed);
    assert_eq!(state.statements(), ["BEGIN", "ROLLBACK"]);
    assert!(!uow.connection().is_open());
    assert!(!ctx.has_errors());
}

#[tokio::test]
#[traced_test]
async fn handler_error_is_logged_recorded_and_rolled_back() {
    let (uow, state) = unit_of_work();
    let ctx = ctx();

    let committed = uow
        .run(
            &ctx,
            (),
            |_, _, (), _| {
                Box::pin(async { Err(DbError::Other(anyhow::anyhow!("ledger out of balance"))) })
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!committed);
    assert_eq!(state.statements(), ["BEGIN", "ROLLBACK"]);
    assert_eq!(ctx.errors(), ["ledger out of balance"]);
    assert!(!uow.connection().is_open());
    assert!(logs_contain("unit of work failed"));
    assert!(logs_contain("ledger out of balance"));
}

#[tokio::test]
async fn open_failure_propagates() {
    let (uow, state) = unit_of_work();
    state.fail_open.store(true, Ordering::SeqCst);

    let err = uow
        .run(
            &ctx(),
            (),
            |_, _, (), _| Box::pin(async { Ok(true) }),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::InvalidConfig(_)));
    assert!(state.statements().is_empty());
    assert_eq!(state.live_handles(), 0);
}

#[tokio::test]
async fn commit_failure_rolls_back() {
    let (uow, state) = unit_of_work();
    *state.fail_on.lock() = Some("COMMIT");
    let ctx = ctx();

    let committed = uow
        .run(
            &ctx,
            (),
            |_, _, (), _| Box::pin(async { Ok(true) }),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!committed);
    assert_eq!(state.statements(), ["BEGIN", "COMMIT", "ROLLBACK"]);
    assert_eq!(ctx.errors(), ["COMMIT failed"]);
    assert!(!uow.connection().is_open());
}

#[tokio::test]
async fn cancellation_inside_transaction_rolls_back() {
    let (uow, state) = unit_of_work();
    let ctx = ctx();

    let committed = uow
        .run(
            &ctx,
            (),
            |_, _, (), cancel| {
                Box::pin(async move {
                    cancel.cancel();
                    Ok(true)
                })
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!committed);
    assert_eq!(state.statements(), ["BEGIN", "ROLLBACK"]);
    assert_eq!(ctx.errors(), ["Operation cancelled"]);
}

#[tokio::test]
async fn nested_run_joins_ambient_transaction() {
    let (uow, state) = unit_of_work();
    let ctx = ctx();

    let committed = uow
        .run(
            &ctx,
            (),
            |uow, ctx, (), cancel| {
                Box::pin(async move {
                    let outer_tx = uow.transaction();
                    let inner = uow
                        .run(
                            ctx,
                            outer_tx,
                            |uow, _, outer_tx, _| {
                                Box::pin(async move { Ok(uow.transaction() == outer_tx) })
                            },
                            cancel,
                        )
                        .await?;
                    assert!(uow.connection().is_open());
                    Ok(inner)
                })
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(committed);
    assert_eq!(state.statements(), ["BEGIN", "COMMIT"]);
    assert_eq!(state.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_nested_run_forces_rollback() {
    let (uow, state) = unit_of_work();
    let ctx = ctx();

    let committed = uow
        .run(
            &ctx,
            (),
            |uow, ctx, (), cancel| {
                Box::pin(async move {
                    let inner = uow
                        .run(ctx, (), |_, _, (), _| Box::pin(async { Ok(false) }), cancel)
                        .await?;
                    assert!(!inner);
                    // the outer handler ignores the inner result on purpose
                    Ok(true)
                })
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!committed);
    assert_eq!(state.statements(), ["BEGIN", "ROLLBACK"]);

    // the flag does not leak into the next run
    let committed = uow
        .run(
            &ctx,
            (),
            |_, _, (), _| Box::pin(async { Ok(true) }),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(committed);
}

#[tokio::test]
async fn commands_are_bound_to_connection_and_transaction() {
    let (uow, _state) = unit_of_work();
    assert!(matches!(
        uow.create_command("SELECT 1"),
        Err(DbError::ConnectionClosed)
    ));

    let committed = uow
        .run(
            &ctx(),
            (),
            |uow, _, (), _| {
                Box::pin(async move {
                    let mut cmd = uow.create_command("SELECT $1")?;
                    cmd.bind("answer", 42_i32);
                    assert_eq!(cmd.text(), "SELECT $1");
                    assert_eq!(cmd.parameters().len(), 1);
                    Ok(cmd.transaction().is_some() && cmd.transaction() == uow.transaction())
                })
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(committed);
}

#[tokio::test]
async fn transaction_operations_are_noops_when_inactive() {
    let (uow, state) = unit_of_work();
    let ctx = ctx();
    let cancel = CancellationToken::new();

    uow.commit(&ctx, &cancel).await.unwrap();
    uow.rollback(&ctx, &cancel).await.unwrap();
    uow.close(&ctx).await;
    uow.close(&ctx).await;
    assert!(matches!(
        uow.begin_transaction(&ctx, &cancel).await,
        Err(DbError::ConnectionClosed)
    ));

    uow.connection().try_open(&ctx, &cancel).await.unwrap();
    let first = uow.begin_transaction(&ctx, &cancel).await.unwrap();
    let second = uow.begin_transaction(&ctx, &cancel).await.unwrap();
    assert_eq!(first, second);
    uow.commit(&ctx, &cancel).await.unwrap();
    uow.commit(&ctx, &cancel).await.unwrap();
    assert_eq!(state.statements(), ["BEGIN", "COMMIT"]);
}

#[tokio::test]
async fn disposed_unit_of_work_refuses_to_run() {
    let (uow, state) = unit_of_work();
    uow.dispose().await;

    let err = uow
        .run(
            &ctx(),
            (),
            |_, _, (), _| Box::pin(async { Ok(true) }),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Disposed));
    assert_eq!(state.created.load(Ordering::SeqCst), 0);
}
