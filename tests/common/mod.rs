//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use outreach::error::GatewayError;
use outreach::events::BroadcastNotifier;
use outreach::gateway::{
    Candidate, Delivery, Discoverer, DraftedMessage, Drafter, Enricher, Gateway, Sender,
    WorkloadContext,
};
use outreach::pipeline::{Person, PersonPatch, fields};
use outreach::store::{LibSqlBackend, RecordStore};
use outreach::worker::{Scheduler, SchedulerConfig};

pub const FIRST_NAMES: [&str; 12] = [
    "Ada", "Grace", "Alan", "Edsger", "Barbara", "Donald", "Frances", "John", "Margaret", "Ken",
    "Radia", "Niklaus",
];

/// Deterministic collaborators. Discovery returns `people` candidates;
/// domains listed in `failing` error on discovery.
pub struct StubGateway {
    pub people: usize,
    pub failing: HashSet<String>,
    pub deliveries: Mutex<Vec<Delivery>>,
    pub discover_calls: Mutex<usize>,
    pub enrich_calls: Mutex<usize>,
}

impl StubGateway {
    pub fn new(people: usize) -> Self {
        Self {
            people,
            failing: HashSet::new(),
            deliveries: Mutex::new(Vec::new()),
            discover_calls: Mutex::new(0),
            enrich_calls: Mutex::new(0),
        }
    }

    pub fn failing_on(mut self, domain: &str) -> Self {
        self.failing.insert(domain.to_string());
        self
    }

    pub fn delivered(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn discover_calls(&self) -> usize {
        *self.discover_calls.lock().unwrap()
    }

    pub fn enrich_calls(&self) -> usize {
        *self.enrich_calls.lock().unwrap()
    }
}

#[async_trait]
impl Discoverer for StubGateway {
    async fn discover(&self, ctx: &WorkloadContext) -> Result<Vec<Candidate>, GatewayError> {
        *self.discover_calls.lock().unwrap() += 1;
        if self.failing.contains(ctx.domain()) {
            return Err(GatewayError::Network(format!("{} unreachable", ctx.domain())));
        }
        Ok(FIRST_NAMES
            .iter()
            .cycle()
            .take(self.people)
            .enumerate()
            .map(|(i, first)| {
                Candidate::new(format!("{first} Tester{i}")).with_fields(
                    PersonPatch::new().text(fields::PROFILE_LINK, format!("https://profiles.example/{i}")),
                )
            })
            .collect())
    }
}

#[async_trait]
impl Enricher for StubGateway {
    async fn enrich(&self, person: &Person, _ctx: &WorkloadContext) -> Result<PersonPatch, GatewayError> {
        *self.enrich_calls.lock().unwrap() += 1;
        Ok(PersonPatch::new()
            .text(fields::SUMMARY, format!("{} builds things", person.name))
            .text(fields::INSIGHTS, "likes compilers"))
    }
}

#[async_trait]
impl Drafter for StubGateway {
    async fn draft(&self, person: &Person, ctx: &WorkloadContext) -> Result<DraftedMessage, GatewayError> {
        Ok(DraftedMessage {
            subject: format!("Hello from {}", ctx.domain()),
            body: format!("Hi {}, loved your work.", person.name),
            direct_message: None,
        })
    }
}

#[async_trait]
impl Sender for StubGateway {
    async fn send(&self, delivery: &Delivery) -> bool {
        self.deliveries.lock().unwrap().push(delivery.clone());
        true
    }
}

pub struct Harness {
    pub store: Arc<dyn RecordStore>,
    pub stub: Arc<StubGateway>,
    pub events: Arc<BroadcastNotifier>,
    pub scheduler: Arc<Scheduler>,
}

pub async fn harness(stub: StubGateway, config: SchedulerConfig) -> Harness {
    let store: Arc<dyn RecordStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    harness_with_store(store, stub, config)
}

pub fn harness_with_store(
    store: Arc<dyn RecordStore>,
    stub: StubGateway,
    config: SchedulerConfig,
) -> Harness {
    let stub = Arc::new(stub);
    let gateway = Gateway::new(stub.clone(), stub.clone(), stub.clone(), stub.clone());
    let events = BroadcastNotifier::new();
    let scheduler = Scheduler::new(store.clone(), gateway, events.clone(), config);
    Harness {
        store,
        stub,
        events,
        scheduler,
    }
}
