//! `RecordStore` trait: the single async interface for persistence.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::DatabaseError;
use crate::pipeline::types::{Person, WorkloadId, WorkloadState, normalize_identity};

/// A person record together with the key it is stored under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPerson {
    pub workload: WorkloadId,
    pub identity: String,
    pub person: Person,
}

/// Durable storage for workload state and person records.
///
/// `put_*` is a full overwrite. The store never merges; callers
/// read-modify-write (see `PersonHandle`).
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ── People ──────────────────────────────────────────────────────

    /// Store `person` under `(workload, identity)`, replacing any previous record.
    async fn put_person(
        &self,
        workload: &WorkloadId,
        identity: &str,
        person: &Person,
    ) -> Result<(), DatabaseError>;

    async fn get_person(
        &self,
        workload: &WorkloadId,
        identity: &str,
    ) -> Result<Option<Person>, DatabaseError>;

    /// All people of one workload, in insertion order.
    async fn list_people(&self, workload: &WorkloadId) -> Result<Vec<StoredPerson>, DatabaseError>;

    /// Every person in every workload.
    async fn list_all_people(&self) -> Result<Vec<StoredPerson>, DatabaseError>;

    /// Find a person by display name alone.
    ///
    /// Linear scan across all workloads; returns the first match. The result
    /// is a snapshot: re-fetch by `(workload, identity)` for the
    /// authoritative copy.
    async fn find_person_by_name(&self, name: &str) -> Result<Option<StoredPerson>, DatabaseError> {
        let Ok(wanted) = normalize_identity(name) else {
            return Ok(None);
        };
        Ok(self
            .list_all_people()
            .await?
            .into_iter()
            .find(|p| p.identity == wanted))
    }

    // ── Workloads ───────────────────────────────────────────────────

    async fn put_workload(&self, state: &WorkloadState) -> Result<(), DatabaseError>;

    async fn get_workload(&self, id: &WorkloadId) -> Result<Option<WorkloadState>, DatabaseError>;

    /// All workloads, oldest first.
    async fn list_workloads(&self) -> Result<Vec<WorkloadState>, DatabaseError>;
}
