//! Generic CRUD, counting, enumeration and bulk import for one data-model type.
//!
//! Infrastructure failures (driver errors, a closed connection, cancellation)
//! never escape a repository call: they are logged, attached to the
//! [`ExecutionContext`] and reported as `false` / `None`. Mapping errors are
//! programming errors and are returned as [`MapperError`].

#[cfg(test)]
mod tests;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::connection::{PgConnector, cancellable};
use crate::context::ExecutionContext;
use crate::mapper::{
    ColumnDef, DataModel, Mapper, MapperRegistry, MapperResult, OrderByClause,
    Pagination, RowValues, SortDir, WhereClause,
};
use crate::uow::UnitOfWork;
use crate::{DbError, Result};

/// Bytes handed to the server per `COPY` data message.
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Persistence for `T` over a unit of work's connection and transaction.
pub struct Repository<'u, T: DataModel> {
    uow: &'u UnitOfWork<PgConnector>,
    mapper: Arc<Mapper<T>>,
}

impl<'u, T: DataModel> Repository<'u, T> {
    #[must_use]
    pub fn new(uow: &'u UnitOfWork<PgConnector>, mapper: Arc<Mapper<T>>) -> Self {
        Self { uow, mapper }
    }

    /// Repository using the process-wide mapper for `T`.
    ///
    /// # Errors
    /// Returns the catalog validation error if `T`'s mapping is invalid.
    pub fn for_model(uow: &'u UnitOfWork<PgConnector>) -> MapperResult<Self> {
        Ok(Self::new(uow, MapperRegistry::global().get_or_init::<T>()?))
    }

    #[must_use]
    pub fn mapper(&self) -> &Mapper<T> {
        &self.mapper
    }

    /// # Errors
    /// Returns a [`MapperError`] if the stored row does not fit `T`.
    pub async fn get_by_id(
        &self,
        ctx: &ExecutionContext,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> MapperResult<Option<T>> {
        let result: Result<Option<T>> = async {
            let mut cmd = self.uow.create_command(self.mapper.select_by_id_command())?;
            cmd.bind(self.key_property(), id);
            match cmd.fetch_optional(cancel).await? {
                Some(row) => Ok(Some(self.materialize(&row)?)),
                None => Ok(None),
            }
        }
        .await;
        Ok(self.settle(ctx, "get_by_id", result)?.flatten())
    }

    /// # Errors
    /// Never fails for infrastructure reasons; the signature matches the other
    /// operations.
    pub async fn exists(
        &self,
        ctx: &ExecutionContext,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> MapperResult<bool> {
        let result = async {
            let mut cmd = self.uow.create_command(self.mapper.exists_command())?;
            cmd.bind(self.key_property(), id);
            cmd.fetch_scalar::<bool>(cancel).await
        }
        .await;
        Ok(self.settle(ctx, "exists", result)?.unwrap_or(false))
    }

    /// Inserts `model`, stamping tenant and creation audit from `ctx`.
    ///
    /// A nil id is replaced by a fresh one and a version below 1 starts at 1.
    /// On failure `model` is left as it was.
    ///
    /// # Errors
    /// Returns a [`MapperError`] if `model`'s values do not fit its catalog.
    pub async fn insert(
        &self,
        ctx: &ExecutionContext,
        model: &mut T,
        cancel: &CancellationToken,
    ) -> MapperResult<bool> {
        let previous = model.record().clone();
        stamp_creation(ctx, model);

        let result = async {
            let mut cmd = self.uow.create_command(self.mapper.insert_command())?;
            self.mapper.configure_command_from_record(&mut cmd, model)?;
            cmd.execute(cancel).await
        }
        .await;

        let inserted = self.settle(ctx, "insert", result).map(|n| n == Some(1));
        if !matches!(inserted, Ok(true)) {
            *model.record_mut() = previous;
        }
        inserted
    }

    /// Optimistic update: succeeds only if the stored row still has the
    /// version `model` was read with. The stored version becomes that version
    /// plus one and change audit is stamped from `ctx`.
    ///
    /// On a conflict or failure `model` is left as it was.
    ///
    /// # Errors
    /// Returns a [`MapperError`] if `model`'s values do not fit its catalog.
    pub async fn update(
        &self,
        ctx: &ExecutionContext,
        model: &mut T,
        cancel: &CancellationToken,
    ) -> MapperResult<bool> {
        let previous = model.record().clone();
        let expected = previous.entity_version;
        {
            let record = model.record_mut();
            record.changed = Some(ctx.audit_stamp());
            record.entity_version = expected.saturating_add(1);
        }

        let result = async {
            let mut cmd = self.uow.create_command(self.mapper.update_command())?;
            cmd.extend_parameters(self.mapper.update_parameters(model, expected)?);
            cmd.execute(cancel).await
        }
        .await;

        let updated = match self.settle(ctx, "update", result) {
            Ok(Some(0)) => {
                warn!(
                    table = %self.mapper.catalog().table(),
                    id = %previous.id,
                    expected_version = expected,
                    correlation_id = %ctx.correlation_id(),
                    "update lost an optimistic concurrency race"
                );
                Ok(false)
            }
            Ok(affected) => Ok(affected.is_some()),
            Err(e) => Err(e),
        };
        if !matches!(updated, Ok(true)) {
            *model.record_mut() = previous;
        }
        updated
    }

    /// Deletes by id; `false` if nothing was deleted.
    ///
    /// # Errors
    /// Never fails for infrastructure reasons.
    pub async fn delete(
        &self,
        ctx: &ExecutionContext,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> MapperResult<bool> {
        let result = async {
            let mut cmd = self.uow.create_command(self.mapper.delete_command())?;
            cmd.bind(self.key_property(), id);
            cmd.execute(cancel).await
        }
        .await;
        Ok(self.settle(ctx, "delete", result)?.is_some_and(|n| n > 0))
    }

    /// Rows matching `filter`, ordered and windowed; `None` on failure.
    ///
    /// # Errors
    /// Returns a [`MapperError`] if a stored row does not fit `T`.
    pub async fn find(
        &self,
        ctx: &ExecutionContext,
        filter: Option<&WhereClause>,
        order_by: Option<&OrderByClause>,
        page: Option<Pagination>,
        cancel: &CancellationToken,
    ) -> MapperResult<Option<Vec<T>>> {
        let result = async {
            let generated = self.mapper.generate_select_command(filter, order_by, page);
            let rows = self.uow.create_generated(generated)?.fetch_all(cancel).await?;
            rows.iter()
                .map(|row| self.materialize(row))
                .collect::<Result<Vec<_>>>()
        }
        .await;
        self.settle(ctx, "find", result)
    }

    /// Number of rows matching `filter`; `None` on failure.
    ///
    /// # Errors
    /// Never fails for infrastructure reasons.
    pub async fn count(
        &self,
        ctx: &ExecutionContext,
        filter: Option<&WhereClause>,
        cancel: &CancellationToken,
    ) -> MapperResult<Option<i64>> {
        let result = async {
            let generated = self.mapper.generate_count_command(filter);
            self.uow
                .create_generated(generated)?
                .fetch_scalar::<i64>(cancel)
                .await
        }
        .await;
        self.settle(ctx, "count", result)
    }

    /// Streams matching rows into `handler` until it returns `false`.
    ///
    /// Returns `true` when the scan ended without error, whether it ran to
    /// the end or was stopped by `handler`.
    ///
    /// # Errors
    /// Returns a [`MapperError`] if a stored row does not fit `T`; the scan
    /// stops at that row.
    pub async fn enumerate<F>(
        &self,
        ctx: &ExecutionContext,
        filter: Option<&WhereClause>,
        order_by: Option<&OrderByClause>,
        mut handler: F,
        cancel: &CancellationToken,
    ) -> MapperResult<bool>
    where
        F: FnMut(T) -> bool + Send,
    {
        let result = async {
            let generated = self.mapper.generate_select_command(filter, order_by, None);
            let cmd = self.uow.create_generated(generated)?;
            cmd.for_each_row(cancel, |row| Ok(handler(self.materialize(&row)?)))
                .await
        }
        .await;
        let visited = self.settle(ctx, "enumerate", result)?;
        if let Some(visited) = visited {
            debug!(table = %self.mapper.catalog().table(), visited, "enumeration finished");
        }
        Ok(visited.is_some())
    }

    /// Every row in key order.
    ///
    /// # Errors
    /// See [`Self::enumerate`].
    pub async fn enumerate_all<F>(
        &self,
        ctx: &ExecutionContext,
        handler: F,
        cancel: &CancellationToken,
    ) -> MapperResult<bool>
    where
        F: FnMut(T) -> bool + Send,
    {
        let order_by = self.mapper.order_by(self.key_property(), SortDir::Asc)?;
        self.enumerate(ctx, None, Some(&order_by), handler, cancel)
            .await
    }

    /// Rows created or changed at or after `since`, in key order.
    ///
    /// # Errors
    /// See [`Self::enumerate`].
    pub async fn enumerate_modified_since<F>(
        &self,
        ctx: &ExecutionContext,
        since: DateTime<Utc>,
        handler: F,
        cancel: &CancellationToken,
    ) -> MapperResult<bool>
    where
        F: FnMut(T) -> bool + Send,
    {
        let filter = self
            .mapper
            .where_field("changedAt")?
            .ge(since)?
            .or(self.mapper.where_field("createdAt")?.ge(since)?);
        let order_by = self.mapper.order_by(self.key_property(), SortDir::Asc)?;
        self.enumerate(ctx, Some(&filter), Some(&order_by), handler, cancel)
            .await
    }

    /// Inserts many rows through `COPY ... FROM STDIN`, stamping each like
    /// [`Self::insert`]. Returns the number of rows copied, `None` on failure.
    ///
    /// All rows are encoded before anything is sent, so a mapping error
    /// leaves the table untouched. On failure every model is left as it was.
    ///
    /// # Errors
    /// Returns a [`MapperError`] if a model's values do not fit its catalog.
    pub async fn bulk_insert(
        &self,
        ctx: &ExecutionContext,
        models: &mut [T],
        cancel: &CancellationToken,
    ) -> MapperResult<Option<u64>> {
        if models.is_empty() {
            return Ok(Some(0));
        }
        let previous = models
            .iter()
            .map(|model| model.record().clone())
            .collect::<Vec<_>>();

        let copied = match self.encode_bulk(ctx, models) {
            Ok(buf) => {
                let result = self.copy_in(&buf, cancel).await;
                self.settle(ctx, "bulk_insert", result)
            }
            Err(e) => Err(e),
        };
        if !matches!(copied, Ok(Some(_))) {
            for (model, record) in models.iter_mut().zip(previous) {
                *model.record_mut() = record;
            }
        }
        copied
    }

    fn encode_bulk(&self, ctx: &ExecutionContext, models: &mut [T]) -> MapperResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(models.len().saturating_mul(128));
        for model in models.iter_mut() {
            stamp_creation(ctx, model);
            self.mapper.write_bulk_row(&mut buf, model)?;
        }
        Ok(buf)
    }

    async fn copy_in(&self, data: &[u8], cancel: &CancellationToken) -> Result<u64> {
        let handle = self
            .uow
            .connection()
            .handle()
            .ok_or(DbError::ConnectionClosed)?;
        cancellable(cancel, async {
            let mut conn = handle.lock().await?;
            let mut copy = conn.copy_in_raw(self.mapper.copy_command()).await?;
            for chunk in data.chunks(COPY_CHUNK_SIZE) {
                let sent = copy.send(chunk).await.map(|_| ());
                if let Err(e) = sent {
                    if let Err(abort) = copy.abort(e.to_string()).await {
                        debug!(error = %abort, "COPY abort did not complete");
                    }
                    return Err(e.into());
                }
            }
            Ok::<_, DbError>(copy.finish().await?)
        })
        .await
    }

    fn key_property(&self) -> &'static str {
        self.mapper
            .catalog()
            .key()
            .map_or("id", ColumnDef::property)
    }

    fn materialize(&self, row: &PgRow) -> Result<T> {
        let values = RowValues::from_pg_row(row, self.mapper.catalog())?;
        Ok(self.mapper.populate_record(&values)?)
    }

    /// Splits a result into the mapping error the caller must see and the
    /// infrastructure error that is only logged and recorded.
    fn settle<V>(
        &self,
        ctx: &ExecutionContext,
        operation: &'static str,
        result: Result<V>,
    ) -> MapperResult<Option<V>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(DbError::Mapper(e)) => Err(e),
            Err(e) => {
                error!(
                    table = %self.mapper.catalog().table(),
                    operation,
                    correlation_id = %ctx.correlation_id(),
                    error = %e,
                    "repository operation failed"
                );
                ctx.record_error(&e);
                Ok(None)
            }
        }
    }
}

impl<T: DataModel> std::fmt::Debug for Repository<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("table", &self.mapper.catalog().table())
            .finish_non_exhaustive()
    }
}

fn stamp_creation<T: DataModel>(ctx: &ExecutionContext, model: &mut T) {
    let record = model.record_mut();
    if record.id.is_nil() {
        record.id = Uuid::new_v4();
    }
    record.tenant_id = ctx.tenant_id();
    record.created = ctx.audit_stamp();
    record.changed = None;
    record.entity_version = record.entity_version.max(1);
}
