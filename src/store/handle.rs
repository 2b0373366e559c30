//! Write-through handle over one person record.

use std::sync::Arc;

use crate::error::{DatabaseError, Result};
use crate::pipeline::types::{FieldValue, Person, PersonPatch, WorkloadId, normalize_identity};
use crate::store::traits::RecordStore;

/// A person record bound to its store.
///
/// Every mutating method re-reads the stored record, applies its change to
/// that copy and writes it back before returning. Reads go to the in-memory
/// copy, which is refreshed by each write; call [`PersonHandle::reload`] to
/// pick up edits made by someone else in between.
pub struct PersonHandle {
    store: Arc<dyn RecordStore>,
    workload: WorkloadId,
    identity: String,
    person: Person,
}

impl PersonHandle {
    /// Load the stored record, if any.
    pub async fn load(
        store: Arc<dyn RecordStore>,
        workload: &WorkloadId,
        identity: &str,
    ) -> std::result::Result<Option<Self>, DatabaseError> {
        let Some(person) = store.get_person(workload, identity).await? else {
            return Ok(None);
        };
        Ok(Some(Self {
            store,
            workload: workload.clone(),
            identity: identity.to_string(),
            person,
        }))
    }

    /// Load the record for `name`, creating and persisting an empty one if
    /// none exists yet.
    pub async fn open(
        store: Arc<dyn RecordStore>,
        workload: &WorkloadId,
        name: &str,
    ) -> Result<Self> {
        let identity = normalize_identity(name)?;
        if let Some(handle) = Self::load(store.clone(), workload, &identity).await? {
            return Ok(handle);
        }
        let handle = Self {
            store,
            workload: workload.clone(),
            identity,
            person: Person::new(name.trim()),
        };
        handle.persist().await?;
        Ok(handle)
    }

    pub fn person(&self) -> &Person {
        &self.person
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.person.name
    }

    /// Replace the in-memory copy with the stored one.
    pub async fn reload(&mut self) -> std::result::Result<(), DatabaseError> {
        if let Some(person) = self.store.get_person(&self.workload, &self.identity).await? {
            self.person = person;
        }
        Ok(())
    }

    pub async fn set(
        &mut self,
        key: &str,
        value: impl Into<FieldValue>,
    ) -> std::result::Result<(), DatabaseError> {
        self.apply(PersonPatch::new().field(key, value)).await
    }

    pub async fn apply(&mut self, patch: PersonPatch) -> std::result::Result<(), DatabaseError> {
        self.merge(|person| {
            person.apply(patch);
            (true, ())
        })
        .await
    }

    /// Append `item` to the list under `key` unless already present.
    /// A non-list value under `key` is replaced. Returns true if appended.
    pub async fn push_unique(
        &mut self,
        key: &str,
        item: &str,
    ) -> std::result::Result<bool, DatabaseError> {
        self.merge(|person| {
            let entry = person
                .fields
                .entry(key.to_string())
                .or_insert_with(|| FieldValue::List(Vec::new()));
            if !matches!(entry, FieldValue::List(_)) {
                *entry = FieldValue::List(Vec::new());
            }
            let FieldValue::List(items) = entry else {
                return (false, false);
            };
            if items.iter().any(|i| i == item) {
                return (false, false);
            }
            items.push(item.to_string());
            (true, true)
        })
        .await
    }

    pub async fn remove(&mut self, key: &str) -> std::result::Result<(), DatabaseError> {
        self.merge(|person| (person.fields.remove(key).is_some(), ()))
            .await
    }

    /// Read-modify-write against the stored record, so fields written by
    /// someone else since our last read survive. `edit` returns whether it
    /// changed anything; unchanged records are not written.
    async fn merge<R>(
        &mut self,
        edit: impl FnOnce(&mut Person) -> (bool, R),
    ) -> std::result::Result<R, DatabaseError> {
        let mut person = self
            .store
            .get_person(&self.workload, &self.identity)
            .await?
            .unwrap_or_else(|| self.person.clone());
        let (changed, result) = edit(&mut person);
        if changed {
            self.store
                .put_person(&self.workload, &self.identity, &person)
                .await?;
        }
        self.person = person;
        Ok(result)
    }

    async fn persist(&self) -> std::result::Result<(), DatabaseError> {
        self.store
            .put_person(&self.workload, &self.identity, &self.person)
            .await
    }
}
