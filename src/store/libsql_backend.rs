//! libSQL backend: async `RecordStore` implementation.
//!
//! Supports local file and in-memory databases. Records are stored as JSON
//! documents keyed by workload id and person identity.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, Row, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::types::{Person, WorkloadId, WorkloadState};
use crate::store::migrations;
use crate::store::traits::{RecordStore, StoredPerson};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    /// Owner of the connection's underlying database. Never read, but an
    /// in-memory database is gone once this is dropped.
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::init_schema(&backend.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::init_schema(&backend.conn).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn row_to_person(row: &Row) -> Result<StoredPerson, DatabaseError> {
    let workload: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("people.workload_id: {e}")))?;
    let identity: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("people.identity: {e}")))?;
    let record: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("people.record: {e}")))?;
    let person = serde_json::from_str::<Person>(&record).map_err(|e| {
        DatabaseError::Serialization(format!("person {workload}/{identity}: {e}"))
    })?;
    Ok(StoredPerson {
        workload: WorkloadId(workload),
        identity,
        person,
    })
}

fn row_to_workload(row: &Row) -> Result<WorkloadState, DatabaseError> {
    let state: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("workloads.state: {e}")))?;
    serde_json::from_str(&state)
        .map_err(|e| DatabaseError::Serialization(format!("workload state: {e}")))
}

const PERSON_COLUMNS: &str = "workload_id, identity, record";

#[async_trait]
impl RecordStore for LibSqlBackend {
    // ── People ──────────────────────────────────────────────────────

    async fn put_person(
        &self,
        workload: &WorkloadId,
        identity: &str,
        person: &Person,
    ) -> Result<(), DatabaseError> {
        let record = serde_json::to_string(person)
            .map_err(|e| DatabaseError::Serialization(format!("person {identity}: {e}")))?;
        let now = Utc::now().to_rfc3339();

        // Upsert keeps the rowid, so list order stays insertion order.
        self.conn()
            .execute(
                "INSERT INTO people (workload_id, identity, name, record, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(workload_id, identity) DO UPDATE SET
                    name = excluded.name,
                    record = excluded.record,
                    updated_at = excluded.updated_at",
                params![workload.as_str(), identity, person.name.as_str(), record, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("put_person: {e}")))?;

        debug!(workload = %workload, entity = %identity, "Person stored");
        Ok(())
    }

    async fn get_person(
        &self,
        workload: &WorkloadId,
        identity: &str,
    ) -> Result<Option<Person>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PERSON_COLUMNS} FROM people WHERE workload_id = ?1 AND identity = ?2"
                ),
                params![workload.as_str(), identity],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_person: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_person(&row)?.person)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_person: {e}"))),
        }
    }

    async fn list_people(&self, workload: &WorkloadId) -> Result<Vec<StoredPerson>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PERSON_COLUMNS} FROM people WHERE workload_id = ?1 ORDER BY rowid"),
                params![workload.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_people: {e}")))?;

        let mut people = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_people: {e}")))?
        {
            people.push(row_to_person(&row)?);
        }
        Ok(people)
    }

    async fn list_all_people(&self) -> Result<Vec<StoredPerson>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PERSON_COLUMNS} FROM people ORDER BY rowid"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_all_people: {e}")))?;

        let mut people = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_all_people: {e}")))?
        {
            people.push(row_to_person(&row)?);
        }
        Ok(people)
    }

    // ── Workloads ───────────────────────────────────────────────────

    async fn put_workload(&self, state: &WorkloadState) -> Result<(), DatabaseError> {
        let json = serde_json::to_string(state)
            .map_err(|e| DatabaseError::Serialization(format!("workload {}: {e}", state.id)))?;

        self.conn()
            .execute(
                "INSERT INTO workloads (id, stage, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    stage = excluded.stage,
                    state = excluded.state,
                    updated_at = excluded.updated_at",
                params![
                    state.id.as_str(),
                    state.stage.as_str(),
                    json,
                    state.created_at.to_rfc3339(),
                    state.updated_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("put_workload: {e}")))?;

        debug!(workload = %state.id, stage = %state.stage, "Workload state stored");
        Ok(())
    }

    async fn get_workload(&self, id: &WorkloadId) -> Result<Option<WorkloadState>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT state FROM workloads WHERE id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_workload: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_workload(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_workload: {e}"))),
        }
    }

    async fn list_workloads(&self) -> Result<Vec<WorkloadState>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT state FROM workloads ORDER BY created_at, id", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_workloads: {e}")))?;

        let mut workloads = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_workloads: {e}")))?
        {
            workloads.push(row_to_workload(&row)?);
        }
        Ok(workloads)
    }
}
