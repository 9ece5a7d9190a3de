//! Column mapping and SQL command generation for data-model types.
//!
//! A [`Mapper`] owns the [`ColumnCatalog`] of one type and a write-once cache
//! of its canonical command text. Ad-hoc commands are assembled from
//! [`WhereClause`], [`OrderByClause`] and [`Pagination`] values that can only
//! be built through the mapper, so unknown properties never reach SQL.

mod bulk;
mod cache;
mod catalog;
mod clause;
mod error;
mod record;
mod registry;
mod row;
mod sql;
mod types;


use std::marker::PhantomData;

pub use cache::CanonicalCommand;
pub use catalog::{ColumnCatalog, ColumnDef, ColumnRole, ColumnSpec, TableName};
pub use clause::{
    Field, FilterInfo, FilterOp, FilterValue, OrderByClause, Pagination, PaginationLimits,
    SortDir, SortInfo, WhereClause,
};
pub use error::{MapperError, MapperResult};
pub use record::{DataModel, DataModelRecord};
pub use registry::MapperRegistry;
pub use row::{RowValues, RowView};
pub use sql::{GeneratedCommand, Parameter};
pub use types::{DbType, DbValue, FromDbValue, db_type_of};

use cache::CommandCache;
use clause::ColumnRef;
use record::{BASE_COLUMN_COUNT, BASE_COLUMNS};
use sql::{SqlWriter, placeholders};

/// Parameter name of the expected version in the canonical update.
pub const EXPECTED_VERSION_PARAM: &str = "expectedEntityVersion";

/// `SET column = value` of an ad-hoc update.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    column: ColumnRef,
    value: DbValue,
}

/// Catalog, cached command text and record conversion for `T`.
#[derive(Debug)]
pub struct Mapper<T: DataModel> {
    catalog: ColumnCatalog,
    cache: CommandCache,
    _model: PhantomData<fn() -> T>,
}

impl<T: DataModel> Mapper<T> {
    /// Builds the catalog from the base columns followed by `T::COLUMNS`.
    ///
    /// # Errors
    /// Returns an error if an identifier is invalid or a property is mapped twice.
    pub fn new() -> MapperResult<Self> {
        let specs = BASE_COLUMNS
            .iter()
            .copied()
            .chain(T::COLUMNS.iter().map(|s| (*s, ColumnRole::Data)));
        Ok(Self {
            catalog: ColumnCatalog::build(T::SCHEMA, T::TABLE, specs)?,
            cache: CommandCache::default(),
            _model: PhantomData,
        })
    }

    #[must_use]
    pub fn catalog(&self) -> &ColumnCatalog {
        &self.catalog
    }

    fn key(&self) -> &ColumnDef {
        &self.catalog.columns()[0]
    }

    fn version(&self) -> &ColumnDef {
        &self.catalog.columns()[BASE_COLUMN_COUNT - 1]
    }

    // ---- clause builders ----

    /// Starts a predicate on a mapped property.
    ///
    /// # Errors
    /// Returns [`MapperError::UnknownColumn`] if the property is not mapped.
    pub fn where_field(&self, property: &str) -> MapperResult<Field> {
        self.catalog.resolve(property).map(Field::new)
    }

    /// # Errors
    /// Returns [`MapperError::UnknownColumn`] if the property is not mapped.
    pub fn order_by(&self, property: &str, dir: SortDir) -> MapperResult<OrderByClause> {
        self.catalog
            .resolve(property)
            .map(|def| OrderByClause::new(def, dir))
    }

    /// # Errors
    /// Returns an error if the property is unknown or the value does not fit.
    pub fn assign(&self, property: &str, value: impl Into<DbValue>) -> MapperResult<Assignment> {
        let def = self.catalog.resolve(property)?;
        let value = value.into();
        if def.role() == ColumnRole::Key {
            return Err(MapperError::InvalidOperator {
                property: def.property().to_owned(),
                op: "assign",
                db_type: def.db_type(),
            });
        }
        if value.db_type() != def.db_type() {
            return Err(MapperError::TypeMismatch {
                property: def.property().to_owned(),
                expected: def.db_type(),
                got: value.db_type(),
            });
        }
        Ok(Assignment {
            column: def.into(),
            value,
        })
    }

    /// Translates one [`FilterInfo`].
    ///
    /// # Errors
    /// Returns an error if the property is unknown or the value does not fit.
    pub fn filter(&self, filter: &FilterInfo) -> MapperResult<WhereClause> {
        self.where_field(&filter.field)?
            .apply(filter.op, filter.value.clone())
    }

    /// Translates and AND-combines filters; `None` when the list is empty.
    ///
    /// # Errors
    /// Returns the first translation error.
    pub fn filters(&self, filters: &[FilterInfo]) -> MapperResult<Option<WhereClause>> {
        filters.iter().try_fold(None, |acc: Option<WhereClause>, f| {
            let clause = self.filter(f)?;
            Ok(Some(match acc {
                Some(prev) => prev.and(clause),
                None => clause,
            }))
        })
    }

    /// Translates sort keys in priority order; `None` when the list is empty.
    ///
    /// # Errors
    /// Returns [`MapperError::UnknownColumn`] for an unmapped property.
    pub fn sort(&self, sort: &[SortInfo]) -> MapperResult<Option<OrderByClause>> {
        sort.iter().try_fold(None, |acc: Option<OrderByClause>, s| {
            let key = self.order_by(&s.field, s.dir)?;
            Ok(Some(match acc {
                Some(prev) => prev.then(key),
                None => key,
            }))
        })
    }

    // ---- canonical commands ----

    /// Cached text of a canonical command.
    #[must_use]
    pub fn canonical(&self, command: CanonicalCommand) -> &str {
        self.cache
            .get_or_build(command, || self.build_canonical(command))
    }

    fn build_canonical(&self, command: CanonicalCommand) -> String {
        let table = self.catalog.table();
        let columns = self.catalog.column_list();
        let key = self.key().column();
        match command {
            CanonicalCommand::Select => format!("SELECT {columns} FROM {table}"),
            CanonicalCommand::SelectById => {
                format!("SELECT {columns} FROM {table} WHERE {key} = $1")
            }
            CanonicalCommand::Exists => {
                format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE {key} = $1)")
            }
            CanonicalCommand::Count => format!("SELECT COUNT(*) FROM {table}"),
            CanonicalCommand::Insert => format!(
                "INSERT INTO {table} ({columns}) VALUES ({})",
                placeholders(1, self.catalog.len())
            ),
            CanonicalCommand::Update => {
                let set = self
                    .catalog
                    .updatable()
                    .enumerate()
                    .map(|(i, c)| format!("{} = ${}", c.column(), i + 1))
                    .collect::<Vec<_>>();
                format!(
                    "UPDATE {table} SET {} WHERE {key} = ${} AND {} = ${}",
                    set.join(", "),
                    set.len() + 1,
                    self.version().column(),
                    set.len() + 2
                )
            }
            CanonicalCommand::Delete => format!("DELETE FROM {table} WHERE {key} = $1"),
            CanonicalCommand::Copy => {
                format!("COPY {table} ({columns}) FROM STDIN WITH (FORMAT text)")
            }
        }
    }

    #[must_use]
    pub fn select_command(&self) -> &str {
        self.canonical(CanonicalCommand::Select)
    }

    #[must_use]
    pub fn select_by_id_command(&self) -> &str {
        self.canonical(CanonicalCommand::SelectById)
    }

    #[must_use]
    pub fn exists_command(&self) -> &str {
        self.canonical(CanonicalCommand::Exists)
    }

    #[must_use]
    pub fn count_command(&self) -> &str {
        self.canonical(CanonicalCommand::Count)
    }

    #[must_use]
    pub fn insert_command(&self) -> &str {
        self.canonical(CanonicalCommand::Insert)
    }

    #[must_use]
    pub fn update_command(&self) -> &str {
        self.canonical(CanonicalCommand::Update)
    }

    #[must_use]
    pub fn delete_command(&self) -> &str {
        self.canonical(CanonicalCommand::Delete)
    }

    #[must_use]
    pub fn copy_command(&self) -> &str {
        self.canonical(CanonicalCommand::Copy)
    }

    // ---- ad-hoc commands ----

    /// `SELECT` with optional filter, ordering and window. A window without
    /// an ordering is ordered by the key.
    #[must_use]
    pub fn generate_select_command(
        &self,
        filter: Option<&WhereClause>,
        order_by: Option<&OrderByClause>,
        page: Option<Pagination>,
    ) -> GeneratedCommand {
        let mut w = SqlWriter::new(self.select_command());
        if let Some(filter) = filter {
            w.push(" WHERE ");
            filter.render(&mut w);
        }
        match (order_by, page) {
            (Some(order_by), _) => order_by.render(&mut w),
            // a page window is only stable over a total order
            (None, Some(_)) => OrderByClause::new(self.key(), SortDir::Asc).render(&mut w),
            (None, None) => {}
        }
        if let Some(page) = page {
            page.render(&mut w);
        }
        w.finish()
    }

    #[must_use]
    pub fn generate_count_command(&self, filter: Option<&WhereClause>) -> GeneratedCommand {
        let mut w = SqlWriter::new(self.count_command());
        if let Some(filter) = filter {
            w.push(" WHERE ");
            filter.render(&mut w);
        }
        w.finish()
    }

    /// `UPDATE ... SET ... WHERE ...` over arbitrary rows.
    ///
    /// # Errors
    /// Returns [`MapperError::EmptyAssignment`] when nothing is assigned.
    pub fn generate_update_command(
        &self,
        assignments: &[Assignment],
        filter: &WhereClause,
    ) -> MapperResult<GeneratedCommand> {
        if assignments.is_empty() {
            return Err(MapperError::EmptyAssignment(self.catalog.table().to_string()));
        }
        let mut w = SqlWriter::new("UPDATE ");
        w.push(&self.catalog.table().to_string()).push(" SET ");
        for (i, a) in assignments.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push(a.column.column())
                .push(" = ")
                .push_param(a.column.property(), a.value.clone());
        }
        w.push(" WHERE ");
        filter.render(&mut w);
        Ok(w.finish())
    }

    #[must_use]
    pub fn generate_delete_command(&self, filter: &WhereClause) -> GeneratedCommand {
        let mut w = SqlWriter::new("DELETE FROM ");
        w.push(&self.catalog.table().to_string()).push(" WHERE ");
        filter.render(&mut w);
        w.finish()
    }

    // ---- records ----

    /// All column values of `model` in declared order.
    ///
    /// # Errors
    /// Returns an error if the extension values do not match `T::COLUMNS` in
    /// count or type.
    pub fn record_values(&self, model: &T) -> MapperResult<Vec<DbValue>> {
        let mut values = model.record().base_values();
        let extension = model.extension_values();
        if extension.len() != T::COLUMNS.len() {
            return Err(MapperError::ValueCountMismatch {
                table: self.catalog.table().to_string(),
                expected: self.catalog.len(),
                got: values.len() + extension.len(),
            });
        }
        for (value, spec) in extension.iter().zip(T::COLUMNS) {
            if value.db_type() != spec.db_type {
                return Err(MapperError::TypeMismatch {
                    property: spec.property.to_owned(),
                    expected: spec.db_type,
                    got: value.db_type(),
                });
            }
        }
        values.extend(extension);
        Ok(values)
    }

    /// Parameters of the canonical insert, named by property.
    ///
    /// # Errors
    /// See [`Self::record_values`].
    pub fn insert_parameters(&self, model: &T) -> MapperResult<Vec<Parameter>> {
        Ok(self
            .catalog
            .columns()
            .iter()
            .zip(self.record_values(model)?)
            .map(|(def, value)| Parameter::new(def.property(), value))
            .collect())
    }

    /// Parameters of the canonical update: updatable columns, then the key,
    /// then the version the stored row must still have.
    ///
    /// # Errors
    /// See [`Self::record_values`].
    pub fn update_parameters(
        &self,
        model: &T,
        expected_version: i64,
    ) -> MapperResult<Vec<Parameter>> {
        let values = self.record_values(model)?;
        let mut params = self
            .catalog
            .updatable()
            .map(|def| Parameter::new(def.property(), values[def.ordinal()].clone()))
            .collect::<Vec<_>>();
        params.push(Parameter::new(
            self.key().property(),
            values[self.key().ordinal()].clone(),
        ));
        params.push(Parameter::new(
            EXPECTED_VERSION_PARAM,
            DbValue::from(expected_version),
        ));
        Ok(params)
    }

    /// Binds the canonical insert parameters of `model` to `command`.
    ///
    /// # Errors
    /// See [`Self::record_values`].
    pub fn configure_command_from_record<H>(
        &self,
        command: &mut crate::uow::Command<'_, H>,
        model: &T,
    ) -> MapperResult<()> {
        command.extend_parameters(self.insert_parameters(model)?);
        Ok(())
    }

    /// Builds a model from a decoded row.
    ///
    /// # Errors
    /// Returns an error if the row does not match the catalog.
    pub fn populate_record(&self, row: &RowValues) -> MapperResult<T> {
        self.populate_record_with(row, |_, _| Ok(()))
    }

    /// Builds a model from a decoded row, then lets `extension` read further
    /// subtype-specific state from the same row.
    ///
    /// # Errors
    /// Returns an error if the row does not match the catalog or the callback fails.
    pub fn populate_record_with<F>(&self, row: &RowValues, extension: F) -> MapperResult<T>
    where
        F: FnOnce(&mut T, &RowView<'_>) -> MapperResult<()>,
    {
        if row.len() != self.catalog.len() {
            return Err(MapperError::ValueCountMismatch {
                table: self.catalog.table().to_string(),
                expected: self.catalog.len(),
                got: row.len(),
            });
        }
        let values = row.values();
        let mut model = T::default();
        *model.record_mut() = DataModelRecord::from_base_values(values)?;
        for def in &self.catalog.columns()[BASE_COLUMN_COUNT..] {
            model.apply_extension_value(def.property(), values[def.ordinal()].clone())?;
        }
        extension(&mut model, &RowView::new(&self.catalog, values))?;
        Ok(model)
    }

    /// Appends `model` as one `COPY` text-format row.
    ///
    /// # Errors
    /// See [`Self::record_values`].
    pub fn write_bulk_row(&self, buf: &mut Vec<u8>, model: &T) -> MapperResult<()> {
        bulk::write_copy_row(buf, &self.record_values(model)?);
        Ok(())
    }
}
