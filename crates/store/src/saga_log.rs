//! Durable saga state records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// The persisted state of one saga run.
///
/// The store treats `payload` as opaque; `step` and `terminal` are kept
/// alongside it so unfinished sagas can be found without decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    pub saga_id: String,
    pub saga_type: String,
    pub step: String,
    pub terminal: bool,
    pub payload: Value,
    /// Incremented by every save; starts at 1.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait SagaLogRepository: Send {
    async fn find(&mut self, saga_id: &str) -> Result<Option<SagaRecord>>;

    /// Inserts a new record at version 1. Fails with `Conflict` if the id exists.
    async fn insert(&mut self, record: SagaRecord) -> Result<()>;

    /// Replaces a record if its stored version is still `expected_version`.
    ///
    /// The record is stored with `version = expected_version + 1`.
    async fn save(&mut self, record: SagaRecord, expected_version: i64) -> Result<()>;

    /// Returns every record that has not reached a terminal step.
    async fn find_unfinished(&mut self) -> Result<Vec<SagaRecord>>;
}
