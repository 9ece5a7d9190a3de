use std::any::Any;
use std::borrow::Cow;
use std::sync::Arc;

use futures::{Stream, TryStreamExt};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row as _};
use tokio_util::sync::CancellationToken;

use super::TransactionInfo;
use crate::connection::{PgHandle, cancellable};
use crate::mapper::{DbValue, GeneratedCommand, MapperResult, Parameter};
use crate::{DbError, Result};

/// A statement bound to a unit of work's connection and transaction.
#[derive(Debug)]
pub struct Command<'a, H> {
    handle: Arc<H>,
    text: Cow<'a, str>,
    parameters: Vec<Parameter>,
    transaction: Option<TransactionInfo>,
}

impl<'a, H> Command<'a, H> {
    pub(crate) fn new(
        handle: Arc<H>,
        text: Cow<'a, str>,
        transaction: Option<TransactionInfo>,
    ) -> Self {
        Self {
            handle,
            text,
            parameters: Vec::new(),
            transaction,
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// The transaction the command was enlisted in when it was created.
    #[must_use]
    pub fn transaction(&self) -> Option<TransactionInfo> {
        self.transaction
    }

    /// Appends the next positional parameter.
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<DbValue>) -> &mut Self {
        self.parameters.push(Parameter::new(name, value.into()));
        self
    }

    /// Appends a parameter whose Rust type is only known at runtime.
    ///
    /// # Errors
    /// Returns an out-of-range error naming `type` if `V` has no database mapping.
    pub fn bind_any<V: Any>(
        &mut self,
        name: impl Into<String>,
        value: &V,
    ) -> MapperResult<&mut Self> {
        let value = DbValue::from_any(value)?;
        self.parameters.push(Parameter::new(name, value));
        Ok(self)
    }

    pub fn extend_parameters(&mut self, parameters: impl IntoIterator<Item = Parameter>) {
        self.parameters.extend(parameters);
    }
}

impl<H> Command<'static, H> {
    pub(crate) fn from_generated(
        handle: Arc<H>,
        generated: GeneratedCommand,
        transaction: Option<TransactionInfo>,
    ) -> Self {
        Self {
            handle,
            text: Cow::Owned(generated.text),
            parameters: generated.parameters,
            transaction,
        }
    }
}

impl Command<'_, PgHandle> {
    fn query(&self) -> Query<'_, Postgres, PgArguments> {
        self.parameters
            .iter()
            .fold(sqlx::query(&self.text), |q, p| bind_value(q, &p.value))
    }

    /// Runs the statement and returns the number of affected rows.
    ///
    /// # Errors
    /// Returns the driver error, [`DbError::ConnectionClosed`] or [`DbError::Cancelled`].
    pub async fn execute(&self, cancel: &CancellationToken) -> Result<u64> {
        cancellable(cancel, async {
            let mut conn = self.handle.lock().await?;
            Ok::<_, DbError>(self.query().execute(&mut *conn).await?.rows_affected())
        })
        .await
    }

    /// # Errors
    /// Returns the driver error, [`DbError::ConnectionClosed`] or [`DbError::Cancelled`].
    pub async fn fetch_optional(&self, cancel: &CancellationToken) -> Result<Option<PgRow>> {
        cancellable(cancel, async {
            let mut conn = self.handle.lock().await?;
            Ok::<_, DbError>(self.query().fetch_optional(&mut *conn).await?)
        })
        .await
    }

    /// # Errors
    /// Returns the driver error, [`DbError::ConnectionClosed`] or [`DbError::Cancelled`].
    pub async fn fetch_all(&self, cancel: &CancellationToken) -> Result<Vec<PgRow>> {
        cancellable(cancel, async {
            let mut conn = self.handle.lock().await?;
            Ok::<_, DbError>(self.query().fetch_all(&mut *conn).await?)
        })
        .await
    }

    /// First column of the single result row.
    ///
    /// # Errors
    /// Returns the driver error (including no row), [`DbError::ConnectionClosed`]
    /// or [`DbError::Cancelled`].
    pub async fn fetch_scalar<T>(&self, cancel: &CancellationToken) -> Result<T>
    where
        T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres> + Send,
    {
        cancellable(cancel, async {
            let mut conn = self.handle.lock().await?;
            let row = self.query().fetch_one(&mut *conn).await?;
            Ok::<_, DbError>(row.try_get::<T, _>(0)?)
        })
        .await
    }

    /// Streams rows into `visit` until it returns `false` or rows run out.
    /// Returns the number of rows visited.
    ///
    /// The connection stays locked while streaming, so `visit` must not use
    /// the same unit of work.
    ///
    /// # Errors
    /// Returns the driver error, the first error from `visit`, or [`DbError::Cancelled`].
    pub async fn for_each_row<F>(&self, cancel: &CancellationToken, visit: F) -> Result<usize>
    where
        F: FnMut(PgRow) -> Result<bool> + Send,
    {
        cancellable(cancel, async {
            let mut conn = self.handle.lock().await?;
            let rows = self.query().fetch(&mut *conn);
            visit_rows(rows, visit).await
        })
        .await
    }
}

/// Feeds stream items to `visit` until it asks to stop.
pub(crate) async fn visit_rows<S, R, E, F>(mut rows: S, mut visit: F) -> Result<usize>
where
    S: Stream<Item = std::result::Result<R, E>> + Unpin,
    E: Into<DbError>,
    F: FnMut(R) -> Result<bool>,
{
    let mut visited = 0;
    while let Some(row) = rows.try_next().await.map_err(Into::<DbError>::into)? {
        visited += 1;
        if !visit(row)? {
            break;
        }
    }
    Ok(visited)
}

fn bind_value<'q>(
    q: Query<'q, Postgres, PgArguments>,
    value: &DbValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        DbValue::Uuid(v) => q.bind(*v),
        DbValue::Text(v) => q.bind(v.clone()),
        DbValue::TimestampTz(v) => q.bind(*v),
        DbValue::Timestamp(v) => q.bind(*v),
        DbValue::Bool(v) => q.bind(*v),
        DbValue::BigInt(v) => q.bind(*v),
        DbValue::Integer(v) => q.bind(*v),
        DbValue::SmallInt(v) => q.bind(*v),
        DbValue::Double(v) => q.bind(*v),
        DbValue::Real(v) => q.bind(*v),
        DbValue::Numeric(v) => q.bind(*v),
        DbValue::Bytes(v) => q.bind(v.clone()),
    }
}
