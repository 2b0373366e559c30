//! File hand-off collaborators.
//!
//! An external automation process (browser scraper, LLM drafter) writes its
//! results as JSON under `<root>/<workload>/`:
//!
//! - `candidates.json`: array of objects, each with a `name` plus any
//!   scraped fields
//! - `enrichment/<identity>.json`: object of fields to merge
//! - `drafts/<identity>.json`: `{subject, body, direct_message?}`
//!
//! A file that does not exist yet is reported as `NotReady`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::GatewayError;
use crate::gateway::{Candidate, Discoverer, DraftedMessage, Drafter, Enricher, WorkloadContext};
use crate::pipeline::types::{Person, PersonPatch};

/// Reads collaborator output from a hand-off directory.
#[derive(Debug, Clone)]
pub struct FileGateway {
    root: PathBuf,
}

impl FileGateway {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn workload_dir(&self, ctx: &WorkloadContext) -> PathBuf {
        self.root.join(ctx.workload.as_str())
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, GatewayError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GatewayError::NotReady(path.display().to_string()));
            }
            Err(e) => {
                return Err(GatewayError::Network(format!("{}: {e}", path.display())));
            }
        };
        debug!(path = %path.display(), "Read hand-off file");
        serde_json::from_str(&raw).map_err(|e| GatewayError::Parse(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl Discoverer for FileGateway {
    async fn discover(&self, ctx: &WorkloadContext) -> Result<Vec<Candidate>, GatewayError> {
        let path = self.workload_dir(ctx).join("candidates.json");
        let entries: Vec<serde_json::Map<String, serde_json::Value>> =
            Self::read_json(&path).await?;

        let mut candidates = Vec::with_capacity(entries.len());
        for mut entry in entries {
            let name = match entry.remove("name") {
                Some(serde_json::Value::String(name)) if !name.trim().is_empty() => name,
                _ => {
                    return Err(GatewayError::Parse(format!(
                        "{}: candidate without a name",
                        path.display()
                    )));
                }
            };
            candidates.push(Candidate::new(name).with_fields(PersonPatch::from_object(entry)));
        }
        Ok(candidates)
    }
}

#[async_trait]
impl Enricher for FileGateway {
    async fn enrich(
        &self,
        person: &Person,
        ctx: &WorkloadContext,
    ) -> Result<PersonPatch, GatewayError> {
        let identity = person
            .identity()
            .map_err(|e| GatewayError::Scrape {
                entity: person.name.clone(),
                reason: e.to_string(),
            })?;
        let path = self
            .workload_dir(ctx)
            .join("enrichment")
            .join(format!("{identity}.json"));
        let fields: serde_json::Map<String, serde_json::Value> = Self::read_json(&path).await?;
        Ok(PersonPatch::from_object(fields))
    }
}

#[async_trait]
impl Drafter for FileGateway {
    async fn draft(
        &self,
        person: &Person,
        ctx: &WorkloadContext,
    ) -> Result<DraftedMessage, GatewayError> {
        let identity = person
            .identity()
            .map_err(|e| GatewayError::Generation(e.to_string()))?;
        let path = self
            .workload_dir(ctx)
            .join("drafts")
            .join(format!("{identity}.json"));
        Self::read_json(&path).await
    }
}
