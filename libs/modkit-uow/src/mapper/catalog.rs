//! Column catalog: the property → column table of one data-model type.

use std::collections::HashMap;
use std::fmt;

use super::error::{MapperError, MapperResult};
use super::types::DbType;

/// Static description of a mapped column, as declared by a data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub property: &'static str,
    pub column: &'static str,
    pub db_type: DbType,
}

impl ColumnSpec {
    #[must_use]
    pub const fn new(property: &'static str, column: &'static str, db_type: DbType) -> Self {
        Self {
            property,
            column,
            db_type,
        }
    }
}

/// What a column means to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnRole {
    /// Primary key, used by by-id commands.
    Key,
    Tenant,
    CreationAudit,
    ChangeAudit,
    /// Optimistic concurrency counter.
    Version,
    /// Subtype-specific column.
    Data,
}

impl ColumnRole {
    /// Columns written by the canonical update command.
    #[must_use]
    pub const fn is_updatable(self) -> bool {
        matches!(self, Self::ChangeAudit | Self::Version | Self::Data)
    }
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    spec: ColumnSpec,
    ordinal: usize,
    role: ColumnRole,
}

impl ColumnDef {
    #[must_use]
    pub fn property(&self) -> &'static str {
        self.spec.property
    }

    #[must_use]
    pub fn column(&self) -> &'static str {
        self.spec.column
    }

    #[must_use]
    pub fn db_type(&self) -> DbType {
        self.spec.db_type
    }

    /// Zero-based position in the table's declared column order.
    #[must_use]
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    #[must_use]
    pub fn role(&self) -> ColumnRole {
        self.role
    }
}

/// Schema-qualified table name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableName {
    pub schema: &'static str,
    pub table: &'static str,
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Immutable property → column table, built once per data-model type.
#[derive(Debug, Clone)]
pub struct ColumnCatalog {
    table: TableName,
    columns: Vec<ColumnDef>,
    by_property: HashMap<String, usize>,
}

impl ColumnCatalog {
    /// Builds a catalog from role-tagged column specs in declared order.
    ///
    /// # Errors
    /// Returns an error if an identifier is not a plain SQL identifier or a
    /// property or column is mapped twice.
    pub fn build(
        schema: &'static str,
        table: &'static str,
        specs: impl IntoIterator<Item = (ColumnSpec, ColumnRole)>,
    ) -> MapperResult<Self> {
        validate_identifier(schema)?;
        validate_identifier(table)?;

        let mut columns = Vec::new();
        let mut by_property = HashMap::new();
        let mut seen_columns = HashMap::new();
        for (ordinal, (spec, role)) in specs.into_iter().enumerate() {
            validate_identifier(spec.column)?;
            if by_property
                .insert(spec.property.to_ascii_lowercase(), ordinal)
                .is_some()
            {
                return Err(MapperError::DuplicateColumn(spec.property.to_owned()));
            }
            if seen_columns.insert(spec.column, ordinal).is_some() {
                return Err(MapperError::DuplicateColumn(spec.column.to_owned()));
            }
            columns.push(ColumnDef {
                spec,
                ordinal,
                role,
            });
        }

        Ok(Self {
            table: TableName { schema, table },
            columns,
            by_property,
        })
    }

    #[must_use]
    pub fn table(&self) -> TableName {
        self.table
    }

    /// All columns in declared order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Resolves a logical property name (case-insensitive).
    ///
    /// # Errors
    /// Returns [`MapperError::UnknownColumn`] if the property is not mapped.
    pub fn resolve(&self, property: &str) -> MapperResult<&ColumnDef> {
        self.by_property
            .get(&property.to_ascii_lowercase())
            .map(|&ordinal| &self.columns[ordinal])
            .ok_or_else(|| MapperError::UnknownColumn {
                table: self.table.to_string(),
                property: property.to_owned(),
            })
    }

    pub fn with_role(&self, role: ColumnRole) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(move |c| c.role == role)
    }

    /// The single key column, if the catalog has one.
    #[must_use]
    pub fn key(&self) -> Option<&ColumnDef> {
        self.with_role(ColumnRole::Key).next()
    }

    #[must_use]
    pub fn version(&self) -> Option<&ColumnDef> {
        self.with_role(ColumnRole::Version).next()
    }

    pub fn updatable(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.role.is_updatable())
    }

    /// Comma-separated column list in declared order.
    #[must_use]
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(ColumnDef::column)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Accepts plain, unquoted SQL identifiers only.
fn validate_identifier(ident: &str) -> MapperResult<()> {
    let mut chars = ident.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(MapperError::InvalidIdentifier(ident.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn specs() -> Vec<(ColumnSpec, ColumnRole)> {
        vec![
            (ColumnSpec::new("id", "id", DbType::Uuid), ColumnRole::Key),
            (
                ColumnSpec::new("displayName", "display_name", DbType::Varchar),
                ColumnRole::Data,
            ),
            (
                ColumnSpec::new("entityVersion", "entity_version", DbType::BigInt),
                ColumnRole::Version,
            ),
        ]
    }

    #[test]
    fn resolves_properties_case_insensitively() {
        let catalog = ColumnCatalog::build("crm", "customer", specs()).unwrap();
        let col = catalog.resolve("DISPLAYNAME").unwrap();
        assert_eq!(col.column(), "display_name");
        assert_eq!(col.ordinal(), 1);
        assert_eq!(catalog.key().unwrap().column(), "id");
        assert_eq!(catalog.version().unwrap().column(), "entity_version");
        assert_eq!(catalog.column_list(), "id, display_name, entity_version");
        assert_eq!(catalog.table().to_string(), "crm.customer");
    }

    #[test]
    fn unknown_property_is_rejected() {
        let catalog = ColumnCatalog::build("crm", "customer", specs()).unwrap();
        let err = catalog.resolve("nickname").unwrap_err();
        assert_eq!(
            err,
            MapperError::UnknownColumn {
                table: "crm.customer".to_owned(),
                property: "nickname".to_owned(),
            }
        );
    }

    #[test]
    fn rejects_duplicates_and_bad_identifiers() {
        let mut dup = specs();
        dup.push((
            ColumnSpec::new("DisplayName", "other", DbType::Varchar),
            ColumnRole::Data,
        ));
        assert_eq!(
            ColumnCatalog::build("crm", "customer", dup).unwrap_err(),
            MapperError::DuplicateColumn("DisplayName".to_owned())
        );

        assert!(matches!(
            ColumnCatalog::build("crm", "customer; DROP TABLE x", specs()),
            Err(MapperError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            ColumnCatalog::build(
                "crm",
                "customer",
                [(ColumnSpec::new("x", "1x", DbType::Uuid), ColumnRole::Data)]
            ),
            Err(MapperError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn updatable_columns_skip_key() {
        let catalog = ColumnCatalog::build("crm", "customer", specs()).unwrap();
        let cols: Vec<_> = catalog.updatable().map(ColumnDef::column).collect();
        assert_eq!(cols, ["display_name", "entity_version"]);
    }
}
