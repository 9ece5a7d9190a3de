//! Base record shared by every persisted entity and the data-model contract.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::catalog::{ColumnRole, ColumnSpec};
use super::error::{MapperError, MapperResult};
use super::types::{DbType, DbValue};
use crate::context::AuditStamp;

/// Identity, tenancy, audit and version columns every entity carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataModelRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub created: AuditStamp,
    /// `None` until the first update.
    pub changed: Option<AuditStamp>,
    /// Optimistic concurrency counter, starts at 1.
    pub entity_version: i64,
}

pub(crate) const BASE_COLUMNS: [(ColumnSpec, ColumnRole); 13] = [
    (ColumnSpec::new("id", "id", DbType::Uuid), ColumnRole::Key),
    (
        ColumnSpec::new("tenantId", "tenant_id", DbType::Uuid),
        ColumnRole::Tenant,
    ),
    (
        ColumnSpec::new("createdBy", "created_by", DbType::Varchar),
        ColumnRole::CreationAudit,
    ),
    (
        ColumnSpec::new("createdAt", "created_at", DbType::TimestampTz),
        ColumnRole::CreationAudit,
    ),
    (
        ColumnSpec::new("createdCorrelationId", "created_correlation_id", DbType::Uuid),
        ColumnRole::CreationAudit,
    ),
    (
        ColumnSpec::new("createdOrigin", "created_origin", DbType::Varchar),
        ColumnRole::CreationAudit,
    ),
    (
        ColumnSpec::new("createdOperation", "created_operation", DbType::Varchar),
        ColumnRole::CreationAudit,
    ),
    (
        ColumnSpec::new("changedBy", "changed_by", DbType::Varchar),
        ColumnRole::ChangeAudit,
    ),
    (
        ColumnSpec::new("changedAt", "changed_at", DbType::TimestampTz),
        ColumnRole::ChangeAudit,
    ),
    (
        ColumnSpec::new("changedCorrelationId", "changed_correlation_id", DbType::Uuid),
        ColumnRole::ChangeAudit,
    ),
    (
        ColumnSpec::new("changedOrigin", "changed_origin", DbType::Varchar),
        ColumnRole::ChangeAudit,
    ),
    (
        ColumnSpec::new("changedOperation", "changed_operation", DbType::Varchar),
        ColumnRole::ChangeAudit,
    ),
    (
        ColumnSpec::new("entityVersion", "entity_version", DbType::BigInt),
        ColumnRole::Version,
    ),
];

pub(crate) const BASE_COLUMN_COUNT: usize = BASE_COLUMNS.len();

impl DataModelRecord {
    /// Base column values in declared order.
    #[must_use]
    pub fn base_values(&self) -> Vec<DbValue> {
        let changed = self.changed.as_ref();
        vec![
            self.id.into(),
            self.tenant_id.into(),
            self.created.actor.clone().into(),
            self.created.at.into(),
            self.created.correlation_id.into(),
            self.created.origin.clone().into(),
            self.created.operation.clone().into(),
            changed.map(|c| c.actor.clone()).into(),
            changed.map(|c| c.at).into(),
            changed.map(|c| c.correlation_id).into(),
            changed.map(|c| c.origin.clone()).into(),
            changed.map(|c| c.operation.clone()).into(),
            self.entity_version.into(),
        ]
    }

    /// Rebuilds the base record from values in declared order.
    ///
    /// # Errors
    /// Returns an error if the slice is too short or a value has the wrong type.
    pub fn from_base_values(values: &[DbValue]) -> MapperResult<Self> {
        let [
            id,
            tenant_id,
            created_by,
            created_at,
            created_correlation_id,
            created_origin,
            created_operation,
            changed_by,
            changed_at,
            changed_correlation_id,
            changed_origin,
            changed_operation,
            entity_version,
        ] = values
            .first_chunk::<BASE_COLUMN_COUNT>()
            .ok_or(MapperError::ValueCountMismatch {
                table: "base record".to_owned(),
                expected: BASE_COLUMN_COUNT,
                got: values.len(),
            })?;

        let changed = changed_at
            .clone()
            .extract::<Option<DateTime<Utc>>>()?
            .map(|at| -> MapperResult<AuditStamp> {
                Ok(AuditStamp {
                    actor: changed_by.clone().extract::<Option<String>>()?.unwrap_or_default(),
                    at,
                    correlation_id: changed_correlation_id
                        .clone()
                        .extract::<Option<Uuid>>()?
                        .unwrap_or_default(),
                    origin: changed_origin.clone().extract::<Option<String>>()?.unwrap_or_default(),
                    operation: changed_operation
                        .clone()
                        .extract::<Option<String>>()?
                        .unwrap_or_default(),
                })
            })
            .transpose()?;

        Ok(Self {
            id: id.clone().extract()?,
            tenant_id: tenant_id.clone().extract()?,
            created: AuditStamp {
                actor: created_by.clone().extract()?,
                at: created_at.clone().extract()?,
                correlation_id: created_correlation_id.clone().extract()?,
                origin: created_origin.clone().extract()?,
                operation: created_operation.clone().extract()?,
            },
            changed,
            entity_version: entity_version.clone().extract()?,
        })
    }
}

/// A persisted entity type: the base record plus subtype-specific columns.
///
/// ```rust
/// use modkit_uow::{ColumnSpec, DataModel, DataModelRecord, DbType, DbValue};
/// use modkit_uow::mapper::MapperResult;
///
/// #[derive(Debug, Default)]
/// struct Tag {
///     record: DataModelRecord,
///     label: String,
/// }
///
/// impl DataModel for Tag {
///     const SCHEMA: &'static str = "catalog";
///     const TABLE: &'static str = "tag";
///     const COLUMNS: &'static [ColumnSpec] = &[ColumnSpec::new("label", "label", DbType::Varchar)];
///
///     fn record(&self) -> &DataModelRecord { &self.record }
///     fn record_mut(&mut self) -> &mut DataModelRecord { &mut self.record }
///     fn extension_values(&self) -> Vec<DbValue> { vec![self.label.clone().into()] }
///     fn apply_extension_value(&mut self, property: &str, value: DbValue) -> MapperResult<()> {
///         if property == "label" {
///             self.label = value.extract()?;
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait DataModel: Default + Send + Sync + 'static {
    const SCHEMA: &'static str;
    const TABLE: &'static str;
    /// Subtype-specific columns, mapped after the base columns.
    const COLUMNS: &'static [ColumnSpec];

    fn record(&self) -> &DataModelRecord;

    fn record_mut(&mut self) -> &mut DataModelRecord;

    /// Values of [`Self::COLUMNS`] in the same order.
    fn extension_values(&self) -> Vec<DbValue>;

    /// Stores a value read for one of [`Self::COLUMNS`].
    ///
    /// # Errors
    /// Returns an error if the value cannot be converted to the field type.
    fn apply_extension_value(&mut self, property: &str, value: DbValue) -> MapperResult<()>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn base_values_follow_declared_order() {
        let record = DataModelRecord {
            id: Uuid::new_v4(),
            entity_version: 3,
            ..Default::default()
        };
        let values = record.base_values();
        assert_eq!(values.len(), BASE_COLUMN_COUNT);
        for (value, (spec, _)) in values.iter().zip(BASE_COLUMNS.iter()) {
            assert_eq!(value.db_type(), spec.db_type, "{}", spec.property);
        }
        assert_eq!(values[0], DbValue::Uuid(Some(record.id)));
        assert!(values[8].is_null(), "changed_at is null before first update");
        assert_eq!(values[12], DbValue::BigInt(Some(3)));
    }

    #[test]
    fn change_audit_is_rebuilt_only_when_present() {
        let mut record = DataModelRecord {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            entity_version: 1,
            ..Default::default()
        };
        let rebuilt = DataModelRecord::from_base_values(&record.base_values()).unwrap();
        assert_eq!(rebuilt.changed, None);

        record.changed = Some(AuditStamp {
            actor: "carol".to_owned(),
            at: Utc::now(),
            correlation_id: Uuid::new_v4(),
            origin: "batch".to_owned(),
            operation: "recalc".to_owned(),
        });
        let rebuilt = DataModelRecord::from_base_values(&record.base_values()).unwrap();
        assert_eq!(rebuilt, record);
    }

    #[test]
    fn short_value_slice_is_rejected() {
        let err = DataModelRecord::from_base_values(&[DbValue::Uuid(None)]).unwrap_err();
        assert!(matches!(
            err,
            MapperError::ValueCountMismatch {
                expected: 13,
                got: 1,
                ..
            }
        ));
    }
}
