//! A single lazily opened physical connection that can be replaced or closed
//! from any task.
//!
//! The current handle lives in an [`ArcSwapOption`], so readers never block.
//! A short synchronous lock only serializes the "is someone already open?"
//! check and handle construction; the network round trip of `open` happens
//! outside of it. If two openers race, the later successful one replaces the
//! earlier handle and disposes it, so no physical connection is leaked.

mod pg;


use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use pg::{PgConnector, PgHandle, PgSessionOptions};

use crate::context::ExecutionContext;
use crate::{DbError, Result};

/// Configuration hook and handle factory for one kind of physical connection.
pub trait Connector: Send + Sync + 'static {
    /// Fully resolved connect options.
    type Options: Send + 'static;
    type Handle: PhysicalHandle;

    /// Produces connect options; called on every open attempt.
    ///
    /// # Errors
    /// Returns an error if configuration is missing or invalid.
    fn connect_options(&self) -> Result<Self::Options>;

    /// Creates an unopened handle.
    fn create_handle(&self, options: Self::Options) -> Self::Handle;
}

/// The driver side of a connection.
#[async_trait]
pub trait PhysicalHandle: Send + Sync + 'static {
    /// Establishes the physical connection.
    ///
    /// # Errors
    /// Returns the driver error; the caller disposes the handle afterwards.
    async fn open(&self) -> Result<()>;

    /// Non-blocking state check.
    fn is_open(&self) -> bool;

    /// Runs a parameterless statement such as `BEGIN` or `COMMIT`.
    ///
    /// # Errors
    /// Returns [`DbError::ConnectionClosed`] if not open, or the driver error.
    async fn execute_script(&self, sql: &str) -> Result<()>;

    /// Releases the physical connection. Must be idempotent.
    async fn dispose(&self);
}

pub struct Connection<C: Connector> {
    connector: C,
    current: ArcSwapOption<C::Handle>,
    open_lock: Mutex<()>,
    disposed: AtomicBool,
}

impl<C: Connector> Connection<C> {
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            current: ArcSwapOption::empty(),
            open_lock: Mutex::new(()),
            disposed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Lock-free check of the current handle.
    #[must_use]
    pub fn is_open(&self) -> bool {
        let current = self.current.load();
        match &*current {
            Some(handle) => handle.is_open(),
            None => false,
        }
    }

    /// The current handle, if any.
    #[must_use]
    pub fn handle(&self) -> Option<Arc<C::Handle>> {
        self.current.load_full()
    }

    /// Opens the connection unless it already is. Fails fast: there is no retry.
    ///
    /// # Errors
    /// Returns [`DbError::Disposed`] after [`Self::dispose`],
    /// [`DbError::Cancelled`] when `cancel` fires first, or the open error.
    pub async fn try_open(&self, ctx: &ExecutionContext, cancel: &CancellationToken) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        let candidate = {
            let _guard = self.open_lock.lock();
            if self.disposed.load(Ordering::Acquire) {
                return Err(DbError::Disposed);
            }
            if self.is_open() {
                return Ok(());
            }
            let options = self.connector.connect_options()?;
            self.connector.create_handle(options)
        };

        let opened = cancellable(cancel, candidate.open()).await;
        if let Err(e) = opened {
            warn!(correlation_id = %ctx.correlation_id(), error = %e, "failed to open connection");
            candidate.dispose().await;
            return Err(e);
        }

        let previous = self.current.swap(Some(Arc::new(candidate)));
        debug!(correlation_id = %ctx.correlation_id(), "connection opened");
        if let Some(previous) = previous {
            debug!(correlation_id = %ctx.correlation_id(), "disposing replaced connection");
            previous.dispose().await;
        }
        // dispose() may have run while we were opening
        if self.disposed.load(Ordering::Acquire) {
            self.release().await;
            return Err(DbError::Disposed);
        }
        Ok(())
    }

    /// Detaches and disposes the current handle. A no-op when nothing is open.
    pub async fn try_close(&self, ctx: &ExecutionContext) {
        if let Some(handle) = self.current.swap(None) {
            handle.dispose().await;
            debug!(correlation_id = %ctx.correlation_id(), "connection closed");
        }
    }

    /// Closes the connection and refuses further opens. Idempotent.
    pub async fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.release().await;
        }
    }

    async fn release(&self) {
        if let Some(handle) = self.current.swap(None) {
            handle.dispose().await;
        }
    }
}

impl<C: Connector> Drop for Connection<C> {
    fn drop(&mut self) {
        // Dropping the last `Arc` drops the driver connection without a
        // graceful close; call `dispose` first to close cleanly.
        if !self.disposed.swap(true, Ordering::AcqRel) {
            drop(self.current.swap(None));
        }
    }
}

impl<C: Connector> std::fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("open", &self.is_open())
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Races `fut` against `cancel`.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DbError::Cancelled),
        res = fut => res,
    }
}
