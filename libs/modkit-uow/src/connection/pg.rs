use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection as _, Executor as _, PgConnection};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::debug;

use super::{Connector, PhysicalHandle};
use crate::config::ConnectionSettings;
use crate::{DbError, Result};

/// Typed options for one `PostgreSQL` session.
#[derive(Debug, Clone)]
pub struct PgSessionOptions {
    pub connect: PgConnectOptions,
    pub connect_timeout: Option<Duration>,
}

/// Connector for `PostgreSQL`, configured through a [`ConnectionSettings`] hook.
#[derive(Clone)]
pub struct PgConnector {
    settings: Arc<dyn ConnectionSettings>,
}

impl PgConnector {
    pub fn new(settings: impl ConnectionSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

impl std::fmt::Debug for PgConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnector").finish_non_exhaustive()
    }
}

impl Connector for PgConnector {
    type Options = PgSessionOptions;
    type Handle = PgHandle;

    fn connect_options(&self) -> Result<PgSessionOptions> {
        let cfg = self.settings.connection_config()?.resolved()?;
        let connect = self.settings.configure_options(cfg.to_pg_options()?);
        Ok(PgSessionOptions {
            connect,
            connect_timeout: cfg.connect_timeout,
        })
    }

    fn create_handle(&self, options: PgSessionOptions) -> PgHandle {
        PgHandle {
            options,
            conn: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }
}

/// One `sqlx` connection behind an async mutex.
pub struct PgHandle {
    options: PgSessionOptions,
    conn: Mutex<Option<PgConnection>>,
    open: AtomicBool,
}

impl PgHandle {
    /// Exclusive access to the live connection.
    ///
    /// # Errors
    /// Returns [`DbError::ConnectionClosed`] if the handle is not open.
    pub async fn lock(&self) -> Result<MappedMutexGuard<'_, PgConnection>> {
        MutexGuard::try_map(self.conn.lock().await, Option::as_mut)
            .map_err(|_| DbError::ConnectionClosed)
    }
}

#[async_trait]
impl PhysicalHandle for PgHandle {
    async fn open(&self) -> Result<()> {
        let connect = PgConnection::connect_with(&self.options.connect);
        let conn = match self.options.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| DbError::ConnectTimeout(limit))??,
            None => connect.await?,
        };
        *self.conn.lock().await = Some(conn);
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn execute_script(&self, sql: &str) -> Result<()> {
        let mut conn = self.lock().await?;
        (&mut *conn).execute(sql).await?;
        Ok(())
    }

    async fn dispose(&self) {
        self.open.store(false, Ordering::Release);
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn
            && let Err(e) = conn.close().await
        {
            debug!(error = %e, "connection did not close cleanly");
        }
    }
}

impl std::fmt::Debug for PgHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgHandle")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
