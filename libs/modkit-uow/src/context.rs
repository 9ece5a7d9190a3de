//! Per-operation execution context.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

/// Who did what, when and under which correlation id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditStamp {
    pub actor: String,
    pub at: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub origin: String,
    pub operation: String,
}

/// Context of one logical business operation.
///
/// Carries the correlation id and audit identity used by repositories, and
/// collects the failures a [`crate::UnitOfWork`] recovered from.
#[derive(Debug)]
pub struct ExecutionContext {
    correlation_id: Uuid,
    tenant_id: Uuid,
    actor: String,
    origin: String,
    operation: String,
    errors: Mutex<Vec<String>>,
}

impl ExecutionContext {
    /// New context with a fresh correlation id.
    #[must_use]
    pub fn new(tenant_id: Uuid, actor: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            tenant_id,
            actor: actor.into(),
            origin: String::new(),
            operation: String::new(),
            errors: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Originating system or endpoint, recorded in audit columns.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Business operation code, recorded in audit columns.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    #[must_use]
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    #[must_use]
    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }

    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Audit stamp for a change made now under this context.
    #[must_use]
    pub fn audit_stamp(&self) -> AuditStamp {
        AuditStamp {
            actor: self.actor.clone(),
            at: Utc::now(),
            correlation_id: self.correlation_id,
            origin: self.origin.clone(),
            operation: self.operation.clone(),
        }
    }

    pub fn record_error(&self, error: &dyn std::error::Error) {
        self.errors.lock().push(error.to_string());
    }

    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.lock().is_empty()
    }
}
