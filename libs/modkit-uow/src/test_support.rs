#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Shared fixtures for unit tests: a sample data model and an in-memory
//! connector that records the statements it is asked to run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::Barrier;

use crate::connection::{Connector, PhysicalHandle};
use crate::mapper::{ColumnSpec, DataModel, DataModelRecord, DbType, DbValue, MapperResult};
use crate::{DbError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Customer {
    pub record: DataModelRecord,
    pub name: String,
    pub email: Option<String>,
    pub credit_limit: Decimal,
    pub active: bool,
}

impl DataModel for Customer {
    const SCHEMA: &'static str = "crm";
    const TABLE: &'static str = "customer";
    const COLUMNS: &'static [ColumnSpec] = &[
        ColumnSpec::new("name", "name", DbType::Varchar),
        ColumnSpec::new("email", "email", DbType::Varchar),
        ColumnSpec::new("creditLimit", "credit_limit", DbType::Numeric),
        ColumnSpec::new("active", "active", DbType::Boolean),
    ];

    fn record(&self) -> &DataModelRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut DataModelRecord {
        &mut self.record
    }

    fn extension_values(&self) -> Vec<DbValue> {
        vec![
            self.name.clone().into(),
            self.email.clone().into(),
            self.credit_limit.into(),
            self.active.into(),
        ]
    }

    fn apply_extension_value(&mut self, property: &str, value: DbValue) -> MapperResult<()> {
        match property {
            "name" => self.name = value.extract()?,
            "email" => self.email = value.extract()?,
            "creditLimit" => self.credit_limit = value.extract()?,
            "active" => self.active = value.extract()?,
            _ => {}
        }
        Ok(())
    }
}

/// Counters and statement log shared by every handle a [`FakeConnector`] creates.
#[derive(Debug, Default)]
pub struct FakeState {
    pub created: AtomicUsize,
    pub opened: AtomicUsize,
    pub disposed: AtomicUsize,
    pub statements: Mutex<Vec<String>>,
    pub fail_open: AtomicBool,
    /// Statement that fails when executed, e.g. `"COMMIT"`.
    pub fail_on: Mutex<Option<&'static str>>,
}

impl FakeState {
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    pub fn live_handles(&self) -> usize {
        self.created.load(Ordering::SeqCst) - self.disposed.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    pub state: Arc<FakeState>,
    /// When set, every `open` waits here so concurrent opens overlap.
    pub open_barrier: Option<Arc<Barrier>>,
}

impl FakeConnector {
    pub fn new() -> (Self, Arc<FakeState>) {
        let connector = Self::default();
        let state = Arc::clone(&connector.state);
        (connector, state)
    }
}

impl Connector for FakeConnector {
    type Options = ();
    type Handle = FakeHandle;

    fn connect_options(&self) -> Result<Self::Options> {
        Ok(())
    }

    fn create_handle(&self, (): Self::Options) -> Self::Handle {
        self.state.created.fetch_add(1, Ordering::SeqCst);
        FakeHandle {
            state: Arc::clone(&self.state),
            barrier: self.open_barrier.clone(),
            open: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }
}

pub struct FakeHandle {
    state: Arc<FakeState>,
    barrier: Option<Arc<Barrier>>,
    open: AtomicBool,
    disposed: AtomicBool,
}

#[async_trait]
impl PhysicalHandle for FakeHandle {
    async fn open(&self) -> Result<()> {
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(DbError::InvalidConfig("connection refused".to_owned()));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn execute_script(&self, sql: &str) -> Result<()> {
        if !self.is_open() {
            return Err(DbError::ConnectionClosed);
        }
        self.state.statements.lock().push(sql.to_owned());
        if *self.state.fail_on.lock() == Some(sql) {
            return Err(DbError::Other(anyhow::anyhow!("{sql} failed")));
        }
        Ok(())
    }

    async fn dispose(&self) {
        self.open.store(false, Ordering::SeqCst);
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.state.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
