//! Decoded result rows.

use sqlx::Row;
use sqlx::postgres::PgRow;

use super::catalog::ColumnCatalog;
use super::error::{MapperError, MapperResult};
use super::types::{DbType, DbValue, FromDbValue};

/// One row's values, aligned with the catalog's declared column order.
#[derive(Debug, Clone, PartialEq)]
pub struct RowValues(Vec<DbValue>);

impl RowValues {
    #[must_use]
    pub fn new(values: Vec<DbValue>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn values(&self) -> &[DbValue] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decodes every catalog column from a `PostgreSQL` row by column name.
    ///
    /// # Errors
    /// Returns the driver error if a column is missing or has an incompatible type.
    pub fn from_pg_row(row: &PgRow, catalog: &ColumnCatalog) -> Result<Self, sqlx::Error> {
        catalog
            .columns()
            .iter()
            .map(|def| decode_column(row, def.column(), def.db_type()))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

fn decode_column(row: &PgRow, name: &str, db_type: DbType) -> Result<DbValue, sqlx::Error> {
    Ok(match db_type {
        DbType::Uuid => DbValue::Uuid(row.try_get(name)?),
        DbType::Varchar => DbValue::Text(row.try_get(name)?),
        DbType::TimestampTz => DbValue::TimestampTz(row.try_get(name)?),
        DbType::Timestamp => DbValue::Timestamp(row.try_get(name)?),
        DbType::Boolean => DbValue::Bool(row.try_get(name)?),
        DbType::BigInt => DbValue::BigInt(row.try_get(name)?),
        DbType::Integer => DbValue::Integer(row.try_get(name)?),
        DbType::SmallInt => DbValue::SmallInt(row.try_get(name)?),
        DbType::Double => DbValue::Double(row.try_get(name)?),
        DbType::Real => DbValue::Real(row.try_get(name)?),
        DbType::Numeric => DbValue::Numeric(row.try_get(name)?),
        DbType::Bytea => DbValue::Bytes(row.try_get(name)?),
    })
}

/// Read access to a row by property name, handed to extension callbacks.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'r> {
    catalog: &'r ColumnCatalog,
    values: &'r [DbValue],
}

impl<'r> RowView<'r> {
    pub(crate) fn new(catalog: &'r ColumnCatalog, values: &'r [DbValue]) -> Self {
        Self { catalog, values }
    }

    /// # Errors
    /// Returns an error if the property is not mapped.
    pub fn get(&self, property: &str) -> MapperResult<&'r DbValue> {
        let def = self.catalog.resolve(property)?;
        self.values
            .get(def.ordinal())
            .ok_or_else(|| MapperError::ValueCountMismatch {
                table: self.catalog.table().to_string(),
                expected: self.catalog.len(),
                got: self.values.len(),
            })
    }

    /// # Errors
    /// Returns an error if the property is not mapped or the value does not convert.
    pub fn extract<V: FromDbValue>(&self, property: &str) -> MapperResult<V> {
        self.get(property)?.clone().extract()
    }
}
