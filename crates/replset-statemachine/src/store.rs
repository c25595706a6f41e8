//! Persistence of the state record

use crate::record::StateRecord;
use parking_lot::Mutex;

/// Errors from a [`RecordStore`]
#[derive(Debug, thiserror::Error)]
pub enum RecordStoreError {
    /// Optimistic concurrency check failed
    #[error("conflicting update: {0}")]
    Conflict(String),

    /// Owning resource is gone
    #[error("owner not found: {0}")]
    NotFound(String),

    /// Stored record cannot be decoded
    #[error("corrupt state record: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("record store failure: {0}")]
    Backend(String),
}

impl RecordStoreError {
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Loads and saves the record of one resource
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// `None` when no record was ever saved
    async fn load(&self) -> Result<Option<StateRecord>, RecordStoreError>;

    async fn save(&self, record: &StateRecord) -> Result<(), RecordStoreError>;
}

/// Process-local store, mostly for tests
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    record: Mutex<Option<StateRecord>>,
    saves: Mutex<Vec<StateRecord>>,
}

impl InMemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a record
    #[must_use]
    pub fn with_record(record: StateRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            saves: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<StateRecord> {
        self.record.lock().clone()
    }

    /// Every record saved so far, oldest first
    #[must_use]
    pub fn saves(&self) -> Vec<StateRecord> {
        self.saves.lock().clone()
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn load(&self) -> Result<Option<StateRecord>, RecordStoreError> {
        Ok(self.record.lock().clone())
    }

    async fn save(&self, record: &StateRecord) -> Result<(), RecordStoreError> {
        *self.record.lock() = Some(record.clone());
        self.saves.lock().push(record.clone());
        Ok(())
    }
}
