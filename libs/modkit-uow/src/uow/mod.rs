//! Transaction lifecycle for one logical business operation.

mod command;

#[cfg(test)]
mod tests;

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, debug, error, info_span, warn};
use uuid::Uuid;

pub use command::Command;

use crate::connection::{Connection, Connector, PgConnector, PhysicalHandle, cancellable};
use crate::context::ExecutionContext;
use crate::mapper::GeneratedCommand;
use crate::{DbError, Result};

/// Identity of the transaction a unit of work currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionInfo {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Owns one [`Connection`] and at most one transaction on it.
///
/// Meant for a single logical operation at a time; it is not re-entrant
/// across unrelated concurrent callers. A [`run`](Self::run) started from
/// inside another `run` on the same instance joins the ambient transaction.
pub struct UnitOfWork<C: Connector = PgConnector> {
    connection: Connection<C>,
    transaction: Mutex<Option<TransactionInfo>>,
    depth: AtomicUsize,
    rollback_only: AtomicBool,
}

impl<C: Connector> UnitOfWork<C> {
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self {
            connection: Connection::new(connector),
            transaction: Mutex::new(None),
            depth: AtomicUsize::new(0),
            rollback_only: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn connection(&self) -> &Connection<C> {
        &self.connection
    }

    #[must_use]
    pub fn transaction(&self) -> Option<TransactionInfo> {
        *self.transaction.lock()
    }

    /// Starts a transaction unless one is already active.
    ///
    /// # Errors
    /// Returns [`DbError::ConnectionClosed`] if the connection is not open,
    /// [`DbError::Cancelled`], or the driver error.
    pub async fn begin_transaction(
        &self,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<TransactionInfo> {
        if let Some(active) = self.transaction() {
            return Ok(active);
        }
        let handle = self.connection.handle().ok_or(DbError::ConnectionClosed)?;
        cancellable(cancel, handle.execute_script("BEGIN")).await?;

        let info = TransactionInfo {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
        };
        *self.transaction.lock() = Some(info);
        debug!(
            correlation_id = %ctx.correlation_id(),
            transaction_id = %info.id,
            "transaction started"
        );
        Ok(info)
    }

    /// Commits the active transaction. A no-op when none is active.
    ///
    /// The transaction stays active if `COMMIT` fails, so a following
    /// [`rollback`](Self::rollback) still reaches the server.
    ///
    /// # Errors
    /// Returns [`DbError::ConnectionClosed`], [`DbError::Cancelled`] or the driver error.
    pub async fn commit(&self, ctx: &ExecutionContext, cancel: &CancellationToken) -> Result<()> {
        let Some(info) = self.transaction() else {
            return Ok(());
        };
        let handle = self.connection.handle().ok_or(DbError::ConnectionClosed)?;
        cancellable(cancel, handle.execute_script("COMMIT")).await?;
        *self.transaction.lock() = None;
        debug!(
            correlation_id = %ctx.correlation_id(),
            transaction_id = %info.id,
            "transaction committed"
        );
        Ok(())
    }

    /// Rolls back the active transaction. A no-op when none is active.
    ///
    /// # Errors
    /// Returns [`DbError::Cancelled`] or the driver error. The transaction is
    /// forgotten either way.
    pub async fn rollback(&self, ctx: &ExecutionContext, cancel: &CancellationToken) -> Result<()> {
        let Some(info) = self.transaction.lock().take() else {
            return Ok(());
        };
        // a closed connection has already ended the transaction server side
        let Some(handle) = self.connection.handle() else {
            return Ok(());
        };
        cancellable(cancel, handle.execute_script("ROLLBACK")).await?;
        debug!(
            correlation_id = %ctx.correlation_id(),
            transaction_id = %info.id,
            "transaction rolled back"
        );
        Ok(())
    }

    /// Forgets the transaction and closes the connection. Idempotent.
    pub async fn close(&self, ctx: &ExecutionContext) {
        if let Some(info) = self.transaction.lock().take() {
            debug!(transaction_id = %info.id, "discarding transaction on close");
        }
        self.connection.try_close(ctx).await;
    }

    /// Closes for good; later opens fail with [`DbError::Disposed`].
    pub async fn dispose(&self) {
        self.transaction.lock().take();
        self.connection.dispose().await;
    }

    /// A command bound to the current connection and transaction.
    ///
    /// # Errors
    /// Returns [`DbError::ConnectionClosed`] if the connection is not open.
    pub fn create_command<'a>(
        &self,
        text: impl Into<Cow<'a, str>>,
    ) -> Result<Command<'a, C::Handle>> {
        let handle = self.connection.handle().ok_or(DbError::ConnectionClosed)?;
        Ok(Command::new(handle, text.into(), self.transaction()))
    }

    /// Like [`create_command`](Self::create_command) for mapper-generated SQL,
    /// parameters included.
    ///
    /// # Errors
    /// Returns [`DbError::ConnectionClosed`] if the connection is not open.
    pub fn create_generated(
        &self,
        generated: GeneratedCommand,
    ) -> Result<Command<'static, C::Handle>> {
        let handle = self.connection.handle().ok_or(DbError::ConnectionClosed)?;
        Ok(Command::from_generated(handle, generated, self.transaction()))
    }

    /// Runs `handler` inside one transaction.
    ///
    /// Opens the connection and begins a transaction, then commits if the
    /// handler returns `Ok(true)` and rolls back otherwise. Handler errors,
    /// transaction errors and cancellation are logged, attached to `ctx` and
    /// reported as `Ok(false)`. The connection is closed before returning in
    /// every case.
    ///
    /// When called from inside another `run` on the same unit of work, only
    /// the handler runs; a `false` or failed result marks the ambient
    /// transaction rollback-only.
    ///
    /// # Errors
    /// Only a failure to open the connection is returned as an error.
    pub async fn run<I, F>(
        &self,
        ctx: &ExecutionContext,
        input: I,
        handler: F,
        cancel: &CancellationToken,
    ) -> Result<bool>
    where
        I: Send,
        F: for<'a> FnOnce(
                &'a Self,
                &'a ExecutionContext,
                I,
                &'a CancellationToken,
            ) -> BoxFuture<'a, Result<bool>>
            + Send,
    {
        if self.depth.load(Ordering::Acquire) > 0 {
            return Ok(self.run_nested(ctx, input, handler, cancel).await);
        }
        let span = info_span!(
            "unit_of_work",
            correlation_id = %ctx.correlation_id(),
            tenant_id = %ctx.tenant_id(),
            operation = %ctx.operation(),
        );
        self.run_outer(ctx, input, handler, cancel)
            .instrument(span)
            .await
    }

    async fn run_outer<I, F>(
        &self,
        ctx: &ExecutionContext,
        input: I,
        handler: F,
        cancel: &CancellationToken,
    ) -> Result<bool>
    where
        I: Send,
        F: for<'a> FnOnce(
                &'a Self,
                &'a ExecutionContext,
                I,
                &'a CancellationToken,
            ) -> BoxFuture<'a, Result<bool>>
            + Send,
    {
        if let Err(e) = self.connection.try_open(ctx, cancel).await {
            error!(error = %e, "failed to open connection for unit of work");
            self.close(ctx).await;
            return Err(e);
        }

        let outcome = {
            let _depth = DepthGuard::enter(&self.depth);
            self.rollback_only.store(false, Ordering::Release);
            self.transact(ctx, input, handler, cancel).await
        };

        self.close(ctx).await;
        Ok(outcome)
    }

    async fn transact<I, F>(
        &self,
        ctx: &ExecutionContext,
        input: I,
        handler: F,
        cancel: &CancellationToken,
    ) -> bool
    where
        I: Send,
        F: for<'a> FnOnce(
                &'a Self,
                &'a ExecutionContext,
                I,
                &'a CancellationToken,
            ) -> BoxFuture<'a, Result<bool>>
            + Send,
    {
        let result = async {
            self.begin_transaction(ctx, cancel).await?;
            let succeeded = cancellable(cancel, handler(self, ctx, input, cancel)).await?;
            if succeeded && !self.rollback_only.load(Ordering::Acquire) {
                self.commit(ctx, cancel).await?;
                return Ok::<_, DbError>(true);
            }
            if succeeded {
                warn!("a nested unit of work failed; rolling back");
            }
            self.rollback(ctx, cancel).await?;
            Ok(false)
        }
        .await;

        match result {
            Ok(committed) => committed,
            Err(e) => {
                error!(error = %e, "unit of work failed; rolling back");
                ctx.record_error(&e);
                // `cancel` may be what failed us; rollback must still reach the server
                if let Err(e) = self.rollback(ctx, &CancellationToken::new()).await {
                    warn!(error = %e, "rollback failed");
                }
                false
            }
        }
    }

    async fn run_nested<I, F>(
        &self,
        ctx: &ExecutionContext,
        input: I,
        handler: F,
        cancel: &CancellationToken,
    ) -> bool
    where
        I: Send,
        F: for<'a> FnOnce(
                &'a Self,
                &'a ExecutionContext,
                I,
                &'a CancellationToken,
            ) -> BoxFuture<'a, Result<bool>>
            + Send,
    {
        debug!(correlation_id = %ctx.correlation_id(), "joining ambient transaction");
        match cancellable(cancel, handler(self, ctx, input, cancel)).await {
            Ok(true) => true,
            Ok(false) => {
                self.rollback_only.store(true, Ordering::Release);
                false
            }
            Err(e) => {
                warn!(
                    correlation_id = %ctx.correlation_id(),
                    error = %e,
                    "nested unit of work failed"
                );
                ctx.record_error(&e);
                self.rollback_only.store(true, Ordering::Release);
                false
            }
        }
    }
}

impl<C: Connector> std::fmt::Debug for UnitOfWork<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("connection", &self.connection)
            .field("transaction", &self.transaction())
            .finish_non_exhaustive()
    }
}

/// Marks a `run` as in progress for as long as it lives, even if the run's
/// future is dropped midway.
struct DepthGuard<'a>(&'a AtomicUsize);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a AtomicUsize) -> Self {
        depth.fetch_add(1, Ordering::AcqRel);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
