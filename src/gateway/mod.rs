//! External collaborators: discovery, enrichment, drafting and delivery.
//!
//! The pipeline only sees these traits. Browser sessions, LLM clients and
//! mail transports belong to the implementations and are injected by the
//! binary.

pub mod addresses;
pub mod file;
pub mod smtp;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::pipeline::types::{Person, PersonPatch, WorkloadId, WorkloadSeed};

pub use addresses::email_permutations;
pub use file::FileGateway;
pub use smtp::{SmtpConfig, SmtpSender};

/// What a collaborator knows about the workload it is working for.
#[derive(Debug, Clone)]
pub struct WorkloadContext {
    pub workload: WorkloadId,
    pub seed: WorkloadSeed,
}

impl WorkloadContext {
    /// The company domain, used for address guessing.
    pub fn domain(&self) -> &str {
        self.workload.as_str()
    }
}

/// A person found by discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub name: String,
    pub fields: PersonPatch,
}

impl Candidate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: PersonPatch::new(),
        }
    }

    pub fn with_fields(mut self, fields: PersonPatch) -> Self {
        self.fields = fields;
        self
    }
}

/// A generated message awaiting human approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftedMessage {
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_message: Option<String>,
}

/// Where a message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    Email(String),
    DirectMessage(String),
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Email(addr) => write!(f, "email:{addr}"),
            Channel::DirectMessage(handle) => write!(f, "dm:{handle}"),
        }
    }
}

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub channel: Channel,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Discoverer: Send + Sync {
    /// Find candidate people for the workload.
    async fn discover(&self, ctx: &WorkloadContext) -> Result<Vec<Candidate>, GatewayError>;
}

#[async_trait]
pub trait Enricher: Send + Sync {
    /// Fields to merge into the person's record.
    async fn enrich(&self, person: &Person, ctx: &WorkloadContext)
    -> Result<PersonPatch, GatewayError>;
}

#[async_trait]
pub trait Drafter: Send + Sync {
    async fn draft(
        &self,
        person: &Person,
        ctx: &WorkloadContext,
    ) -> Result<DraftedMessage, GatewayError>;
}

#[async_trait]
pub trait Sender: Send + Sync {
    /// Deliver one message. Never fails loudly: `false` means not delivered.
    async fn send(&self, delivery: &Delivery) -> bool;
}

/// Stand-in when no transport is configured. Logs and reports not delivered,
/// so the address lands in the person's send failures.
pub struct LogOnlySender;

#[async_trait]
impl Sender for LogOnlySender {
    async fn send(&self, delivery: &Delivery) -> bool {
        tracing::warn!(
            channel = %delivery.channel,
            subject = %delivery.subject,
            "No transport configured, message not sent"
        );
        false
    }
}

/// The full set of collaborators a workload needs.
#[derive(Clone)]
pub struct Gateway {
    pub discoverer: Arc<dyn Discoverer>,
    pub enricher: Arc<dyn Enricher>,
    pub drafter: Arc<dyn Drafter>,
    pub sender: Arc<dyn Sender>,
}

impl Gateway {
    pub fn new(
        discoverer: Arc<dyn Discoverer>,
        enricher: Arc<dyn Enricher>,
        drafter: Arc<dyn Drafter>,
        sender: Arc<dyn Sender>,
    ) -> Self {
        Self {
            discoverer,
            enricher,
            drafter,
            sender,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_only_sender_never_delivers() {
        let delivery = Delivery {
            channel: Channel::Email("ada@acme.com".into()),
            subject: "Hello".into(),
            body: "Hi Ada".into(),
        };
        assert!(!LogOnlySender.send(&delivery).await);
    }

    #[test]
    fn channel_display() {
        assert_eq!(Channel::Email("a@b.com".into()).to_string(), "email:a@b.com");
        assert_eq!(Channel::DirectMessage("@ada".into()).to_string(), "dm:@ada");
    }
}
