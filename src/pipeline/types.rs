//! Data model: person records, partial updates, and per-workload state.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::WorkloadError;
use crate::pipeline::stage::ProcessingStage;

/// Well-known person field keys. Records may carry any other key too.
pub mod fields {
    pub const PROFILE_LINK: &str = "profile_link";
    pub const TWITTER_HANDLE: &str = "twitter_handle";
    pub const NOTES: &str = "notes";
    pub const SUMMARY: &str = "summary";
    pub const INSIGHTS: &str = "insights";
    pub const DRAFT_EMAIL: &str = "draft_email";
    pub const DRAFT_DM: &str = "draft_dm";
    pub const APPROVED_EMAIL: &str = "approved_email";
    pub const APPROVED_DM: &str = "approved_dm";
    pub const EMAIL_ADDRESS: &str = "email_address";
    pub const POSSIBLE_EMAILS: &str = "possible_emails";
    pub const SENT_TO: &str = "sent_to";
    pub const SEND_FAILURES: &str = "send_failures";
    pub const DM_SENT: &str = "dm_sent";
    pub const LAST_ERROR: &str = "last_error";
}

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// Workload identifier: the target company's domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkloadId(pub String);

impl WorkloadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkloadId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9 _-]").expect("static regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

/// Normalize a display name into a person identity.
///
/// Keeps ASCII alphanumerics, spaces, `-` and `_`, trims, joins words with
/// `_` and lowercases. "Jesse Zhang" and " jesse  zhang!" map to the same
/// identity.
pub fn normalize_identity(name: &str) -> Result<String, WorkloadError> {
    let kept = DISALLOWED.replace_all(name, "");
    let joined = WHITESPACE.replace_all(kept.trim(), "_");
    let identity = joined.to_ascii_lowercase();
    if identity.trim_matches(|c| c == '_' || c == '-').is_empty() {
        return Err(WorkloadError::InvalidIdentity(name.to_string()));
    }
    Ok(identity)
}

// ---------------------------------------------------------------------------
// Field values
// ---------------------------------------------------------------------------

/// Value stored under a person field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Text(String),
    List(Vec<String>),
    /// Arbitrary scrape output kept verbatim.
    Json(serde_json::Value),
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Flag(b)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        Self::List(v)
    }
}

// ---------------------------------------------------------------------------
// Person
// ---------------------------------------------------------------------------

/// A candidate person within a workload.
///
/// Schema-less: stages add fields as they run. Writers must merge into the
/// stored record (see `PersonPatch`) rather than replace it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Person {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Normalized identity derived from the display name.
    pub fn identity(&self) -> Result<String, WorkloadError> {
        normalize_identity(&self.name)
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Non-empty text value for `key`.
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.fields.get(key) {
            Some(FieldValue::Text(s)) if !s.trim().is_empty() => Some(s),
            _ => None,
        }
    }

    /// List value for `key`; empty if absent or of another type.
    pub fn list(&self, key: &str) -> &[String] {
        match self.fields.get(key) {
            Some(FieldValue::List(v)) => v,
            _ => &[],
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.fields.get(key), Some(FieldValue::Flag(true)))
    }

    /// Whether `key` holds something non-empty.
    pub fn has(&self, key: &str) -> bool {
        match self.fields.get(key) {
            None => false,
            Some(FieldValue::Text(s)) => !s.trim().is_empty(),
            Some(FieldValue::List(v)) => !v.is_empty(),
            Some(FieldValue::Flag(b)) => *b,
            Some(FieldValue::Json(v)) => !v.is_null(),
        }
    }

    /// Merge a patch into this record. Keys not in the patch are untouched.
    pub fn apply(&mut self, patch: PersonPatch) {
        for (key, value) in patch.set {
            self.fields.insert(key, value);
        }
        for key in patch.remove {
            self.fields.remove(&key);
        }
    }
}

/// Partial update to a person record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonPatch {
    #[serde(default)]
    set: BTreeMap<String, FieldValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    remove: Vec<String>,
}

impl PersonPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set.insert(key.into(), value.into());
        self
    }

    pub fn text(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.field(key, FieldValue::Text(value.into()))
    }

    pub fn list(self, key: impl Into<String>, value: Vec<String>) -> Self {
        self.field(key, FieldValue::List(value))
    }

    pub fn flag(self, key: impl Into<String>, value: bool) -> Self {
        self.field(key, FieldValue::Flag(value))
    }

    pub fn json(self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.field(key, FieldValue::Json(value))
    }

    pub fn unset(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.set.remove(&key);
        self.remove.push(key);
        self
    }

    /// Build a patch from a JSON object, mapping each member to a field.
    pub fn from_object(map: serde_json::Map<String, serde_json::Value>) -> Self {
        let mut patch = Self::new();
        for (key, value) in map {
            let value = serde_json::from_value::<FieldValue>(value.clone())
                .unwrap_or(FieldValue::Json(value));
            patch.set.insert(key, value);
        }
        patch
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// An email-style message. Stored on a person as text: the first line is
/// the subject, everything after it the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageText {
    pub subject: String,
    pub body: String,
}

impl MessageText {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }

    pub fn to_text(&self) -> String {
        format!("{}\n{}", self.subject.trim(), self.body.trim())
    }

    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        match text.split_once('\n') {
            Some((subject, body)) => Self::new(subject.trim(), body.trim()),
            None => Self::new(text, ""),
        }
    }
}

// ---------------------------------------------------------------------------
// Workload state
// ---------------------------------------------------------------------------

/// Stages that may be forced to redo work whose output already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RerunFlags {
    #[serde(default)]
    pub discover: bool,
    #[serde(default)]
    pub enrich: bool,
    #[serde(default)]
    pub messages: bool,
}

/// What the workload was registered with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSeed {
    /// Company page the discoverer starts from.
    #[serde(default)]
    pub company_url: Option<String>,
}

/// Persisted state of one workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadState {
    pub id: WorkloadId,
    #[serde(default)]
    pub seed: WorkloadSeed,
    pub stage: ProcessingStage,
    /// Discovered person identities, in discovery order. Selection indices
    /// point into this list.
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default)]
    pub chosen: Vec<usize>,
    #[serde(default)]
    pub rerun: RerunFlags,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Stage the workload was at when it was forced to `Error`.
    #[serde(default)]
    pub failed_at: Option<ProcessingStage>,
    /// Consecutive stage-scoped failures at the current stage.
    #[serde(default)]
    pub stage_failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkloadState {
    pub fn new(id: WorkloadId, seed: WorkloadSeed, rerun: RerunFlags) -> Self {
        let now = Utc::now();
        Self {
            id,
            seed,
            stage: ProcessingStage::NotStarted,
            people: Vec::new(),
            chosen: Vec::new(),
            rerun,
            last_error: None,
            failed_at: None,
            stage_failures: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `Error`, remembering where the workload stopped.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        if self.stage != ProcessingStage::Error {
            self.failed_at = Some(self.stage);
        }
        self.stage = ProcessingStage::Error;
        self.last_error = Some(error.into());
    }

    /// Latest stage an operator may reset to: the current one, or where the
    /// workload stopped if it failed.
    pub fn reset_ceiling(&self) -> ProcessingStage {
        match self.stage {
            ProcessingStage::Error => self.failed_at.unwrap_or(ProcessingStage::NotStarted),
            stage => stage,
        }
    }

    /// Identities of the chosen people, skipping out-of-range indices.
    pub fn chosen_identities(&self) -> Vec<&str> {
        self.chosen
            .iter()
            .filter_map(|&i| self.people.get(i).map(String::as_str))
            .collect()
    }

    /// Append an identity unless it is already known. Returns true if added.
    pub fn add_person(&mut self, identity: String) -> bool {
        if self.people.contains(&identity) {
            return false;
        }
        self.people.push(identity);
        true
    }

    /// Validate and store a human selection.
    pub fn set_selection(&mut self, indices: &[usize]) -> Result<(), WorkloadError> {
        let mut chosen = Vec::with_capacity(indices.len());
        for &i in indices {
            if i >= self.people.len() {
                return Err(WorkloadError::InvalidSelection {
                    id: self.id.to_string(),
                    reason: format!("index {i} out of range (have {} people)", self.people.len()),
                });
            }
            if !chosen.contains(&i) {
                chosen.push(i);
            }
        }
        self.chosen = chosen;
        Ok(())
    }
}
