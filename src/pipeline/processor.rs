//! Workload processor: runs one stage of one workload per call.
//!
//! Each `step()` reloads the workload and its people from the store,
//! consults the transition table, performs the stage's I/O and persists the
//! result. Stages are re-entrant: work already recorded on a person is
//! skipped, so a step interrupted by a crash is simply run again.
//!
//! Failures are scoped:
//! - a single person's enrichment, draft or send error is recorded on that
//!   person and the stage carries on
//! - a failed discovery leaves the stage unchanged for a retry, up to
//!   `max_stage_failures` times in a row
//! - anything else (storage errors) forces the workload to `Error`

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{DatabaseError, Error, GatewayError, Result, WorkloadError};
use crate::events::{EventKind, Notifier};
use crate::gateway::{Channel, Delivery, Gateway, WorkloadContext, email_permutations};
use crate::pipeline::machine::{self, Action, BlockReason, Decision, Guards};
use crate::pipeline::stage::ProcessingStage;
use crate::pipeline::types::{
    MessageText, PersonPatch, RerunFlags, WorkloadId, WorkloadSeed, WorkloadState, fields, normalize_identity,
};
use crate::store::{PersonHandle, RecordStore};

/// Default bound on consecutive stage-scoped failures.
pub const DEFAULT_MAX_STAGE_FAILURES: u32 = 3;

/// Why a step ended the way it did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepReason {
    Advanced {
        from: ProcessingStage,
        to: ProcessingStage,
    },
    Blocked(BlockReason),
    /// The stage failed as a whole and may be retried.
    StageFailed(String),
    /// Nothing to do: the workload is `Completed` or `Error`.
    Terminal,
    /// Too many consecutive stage failures; the workload is now `Error`.
    Exhausted(String),
}

/// What the scheduler should do with a workload after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Back of the ready queue.
    Requeue,
    /// Waiting set, until input arrives.
    Park,
    /// Never scheduled again.
    Retire,
}

/// Result of one `step()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub worked: bool,
    /// Stage after the step.
    pub stage: ProcessingStage,
    pub reason: StepReason,
}

impl StepOutcome {
    fn terminal(stage: ProcessingStage) -> Self {
        Self {
            worked: false,
            stage,
            reason: StepReason::Terminal,
        }
    }

    pub fn disposition(&self) -> Disposition {
        match &self.reason {
            StepReason::Advanced { to, .. } if to.is_terminal() => Disposition::Retire,
            StepReason::Advanced { .. } => Disposition::Requeue,
            StepReason::StageFailed(_) => Disposition::Requeue,
            StepReason::Blocked(_) => Disposition::Park,
            StepReason::Terminal | StepReason::Exhausted(_) => Disposition::Retire,
        }
    }
}

/// A human-approved message for one person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedDraft {
    pub name: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub direct_message: Option<String>,
}

/// How a stage attempt went wrong.
enum StageFault {
    /// Stage-scoped: stay at this stage and retry.
    Retry(String),
    /// A collaborator's input is not there yet: park until signalled.
    Wait(String),
    /// Workload-fatal.
    Fatal(Error),
}

impl From<DatabaseError> for StageFault {
    fn from(e: DatabaseError) -> Self {
        Self::Fatal(e.into())
    }
}

impl From<Error> for StageFault {
    fn from(e: Error) -> Self {
        Self::Fatal(e)
    }
}

/// Drives one workload through the pipeline.
#[derive(Clone)]
pub struct WorkloadProcessor {
    id: WorkloadId,
    store: Arc<dyn RecordStore>,
    gateway: Gateway,
    notifier: Arc<dyn Notifier>,
    max_stage_failures: u32,
}

impl WorkloadProcessor {
    pub fn new(
        id: WorkloadId,
        store: Arc<dyn RecordStore>,
        gateway: Gateway,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            id,
            store,
            gateway,
            notifier,
            max_stage_failures: DEFAULT_MAX_STAGE_FAILURES,
        }
    }

    pub fn with_max_stage_failures(mut self, max: u32) -> Self {
        self.max_stage_failures = max;
        self
    }

    pub fn id(&self) -> &WorkloadId {
        &self.id
    }

    /// Current persisted state.
    pub async fn load(&self) -> Result<WorkloadState> {
        self.store
            .get_workload(&self.id)
            .await?
            .ok_or_else(|| {
                WorkloadError::NotFound {
                    id: self.id.to_string(),
                }
                .into()
            })
    }

    /// Create the workload if it does not exist yet. An existing workload is
    /// returned as stored; its seed and rerun flags are only replaced when
    /// new ones are given.
    pub async fn register(&self, seed: WorkloadSeed, rerun: RerunFlags) -> Result<WorkloadState> {
        if let Some(mut state) = self.store.get_workload(&self.id).await? {
            let mut changed = false;
            if seed.company_url.is_some() && seed != state.seed {
                state.seed = seed;
                changed = true;
            }
            if rerun != RerunFlags::default() && rerun != state.rerun {
                state.rerun = rerun;
                changed = true;
            }
            if changed {
                state.updated_at = Utc::now();
                self.store.put_workload(&state).await?;
            }
            info!(workload = %self.id, stage = %state.stage, "Resuming workload");
            return Ok(state);
        }

        let state = WorkloadState::new(self.id.clone(), seed, rerun);
        self.store.put_workload(&state).await?;
        info!(workload = %self.id, "Workload registered");
        Ok(state)
    }

    /// Run at most one stage transition.
    pub async fn step(&self) -> Result<StepOutcome> {
        let mut state = self.load().await?;
        if state.stage.is_terminal() {
            debug!(workload = %self.id, stage = %state.stage, "Step on terminal workload");
            return Ok(StepOutcome::terminal(state.stage));
        }

        let from = state.stage;
        let guards = match self.guards(&state).await {
            Ok(guards) => guards,
            Err(e) => return self.fail(&mut state, e).await,
        };

        let (action, next) = match machine::decide(from, &guards) {
            Decision::Terminal => return Ok(StepOutcome::terminal(from)),
            Decision::Blocked(reason) => return self.park(&mut state, reason).await,
            Decision::Run { action, next } => (action, next),
        };

        debug!(workload = %self.id, stage = %from, action = %action, "Running stage");
        match self.run_action(action, &mut state).await {
            Ok(()) => self.advance(&mut state, next).await,
            Err(StageFault::Retry(msg)) => self.stage_failed(&mut state, msg).await,
            Err(StageFault::Wait(msg)) => {
                self.park(&mut state, BlockReason::AwaitingInput(msg)).await
            }
            Err(StageFault::Fatal(e)) => self.fail(&mut state, e).await,
        }
    }

    /// Record a human selection. Only valid at `ProfilesScraped`.
    pub async fn submit_selection(&self, indices: &[usize]) -> Result<WorkloadState> {
        let mut state = self.load().await?;
        if state.stage != ProcessingStage::ProfilesScraped {
            return Err(WorkloadError::InvalidStage {
                id: self.id.to_string(),
                stage: state.stage,
                expected: ProcessingStage::ProfilesScraped.to_string(),
            }
            .into());
        }
        state.set_selection(indices)?;
        state.updated_at = Utc::now();
        self.store.put_workload(&state).await?;
        info!(workload = %self.id, chosen = ?state.chosen, "Selection recorded");
        Ok(state)
    }

    /// Write approved messages onto the named people.
    ///
    /// All names are checked before anything is written.
    pub async fn submit_approved_drafts(&self, drafts: &[ApprovedDraft]) -> Result<WorkloadState> {
        let state = self.load().await?;
        if state.stage.is_terminal() {
            return Err(WorkloadError::InvalidStage {
                id: self.id.to_string(),
                stage: state.stage,
                expected: "a non-terminal stage".into(),
            }
            .into());
        }

        let mut resolved = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let identity = normalize_identity(&draft.name)?;
            if !state.people.contains(&identity) {
                return Err(WorkloadError::UnknownPerson {
                    id: self.id.to_string(),
                    name: draft.name.clone(),
                }
                .into());
            }
            resolved.push((identity, draft));
        }

        for (identity, draft) in resolved {
            let Some(mut handle) =
                PersonHandle::load(self.store.clone(), &self.id, &identity).await?
            else {
                return Err(WorkloadError::UnknownPerson {
                    id: self.id.to_string(),
                    name: draft.name.clone(),
                }
                .into());
            };
            let text = MessageText::new(&draft.subject, &draft.body).to_text();
            handle.set(fields::APPROVED_EMAIL, text).await?;
            if let Some(dm) = draft.direct_message.as_deref().filter(|dm| !dm.trim().is_empty()) {
                handle.set(fields::APPROVED_DM, dm).await?;
            }
            info!(workload = %self.id, entity = %handle.name(), "Draft approved");
        }
        Ok(state)
    }

    /// Force the workload to `Error`. No-op if it already is.
    pub async fn force_error(&self, reason: &str) -> Result<WorkloadState> {
        let mut state = self.load().await?;
        if state.stage == ProcessingStage::Error {
            return Ok(state);
        }
        state.mark_failed(reason);
        state.updated_at = Utc::now();
        self.store.put_workload(&state).await?;
        self.notifier
            .emit(EventKind::WorkloadFailed {
                workload: self.id.clone(),
                error: reason.to_string(),
            })
            .await;
        Ok(state)
    }

    /// Move the workload back to `stage` and clear its error history.
    ///
    /// Only the current stage or an earlier one is accepted. A failed
    /// workload may go back as far as the stage it failed at, never past it.
    pub async fn reset(&self, stage: ProcessingStage) -> Result<WorkloadState> {
        let mut state = self.load().await?;
        let ceiling = state.reset_ceiling();
        let earlier_or_same = matches!(
            stage.partial_cmp(&ceiling),
            Some(Ordering::Less | Ordering::Equal)
        );
        if !earlier_or_same {
            return Err(WorkloadError::InvalidStage {
                id: self.id.to_string(),
                stage: state.stage,
                expected: format!("a reset target no later than {ceiling}, got {stage}"),
            }
            .into());
        }
        info!(workload = %self.id, from = %state.stage, to = %stage, "Workload reset");
        state.stage = stage;
        state.last_error = None;
        state.failed_at = None;
        state.stage_failures = 0;
        state.updated_at = Utc::now();
        self.store.put_workload(&state).await?;
        Ok(state)
    }

    // ── Step internals ──────────────────────────────────────────────

    fn context(&self, state: &WorkloadState) -> WorkloadContext {
        WorkloadContext {
            workload: self.id.clone(),
            seed: state.seed.clone(),
        }
    }

    async fn guards(&self, state: &WorkloadState) -> Result<Guards> {
        let chosen = state.chosen_identities();
        let mut guards = Guards {
            has_selection: !chosen.is_empty(),
            missing_approvals: Vec::new(),
        };
        if state.stage == ProcessingStage::MessagesDrafted {
            for identity in chosen {
                match self.store.get_person(&self.id, identity).await? {
                    Some(person) if person.has(fields::APPROVED_EMAIL) => {}
                    Some(person) => guards.missing_approvals.push(person.name),
                    None => guards.missing_approvals.push(identity.to_string()),
                }
            }
        }
        Ok(guards)
    }

    async fn run_action(
        &self,
        action: Action,
        state: &mut WorkloadState,
    ) -> std::result::Result<(), StageFault> {
        match action {
            Action::Discover => self.discover(state).await,
            Action::Enrich => self.enrich(state).await,
            Action::Draft => self.draft(state).await,
            Action::Send => self.send(state).await,
            Action::Select | Action::Approve | Action::Finalize => Ok(()),
        }
    }

    async fn discover(&self, state: &mut WorkloadState) -> std::result::Result<(), StageFault> {
        if !state.people.is_empty() && !state.rerun.discover {
            debug!(workload = %self.id, people = state.people.len(), "Already discovered, skipping");
            return Ok(());
        }

        let candidates = match self.gateway.discoverer.discover(&self.context(state)).await {
            Ok(candidates) => candidates,
            Err(GatewayError::NotReady(what)) => return Err(StageFault::Wait(what)),
            Err(e) => return Err(StageFault::Retry(e.to_string())),
        };
        if candidates.is_empty() && state.people.is_empty() {
            return Err(StageFault::Retry("discovery returned no candidates".into()));
        }

        let mut added = 0usize;
        for candidate in candidates {
            let mut handle =
                match PersonHandle::open(self.store.clone(), &self.id, &candidate.name).await {
                    Ok(handle) => handle,
                    Err(Error::Workload(e)) => {
                        self.entity_error(None, &candidate.name, state.stage, e.to_string())
                            .await?;
                        continue;
                    }
                    Err(e) => return Err(StageFault::Fatal(e)),
                };
            if !candidate.fields.is_empty() {
                handle.apply(candidate.fields).await?;
            }
            if state.add_person(handle.identity().to_string()) {
                added += 1;
            }
        }
        state.rerun.discover = false;
        info!(workload = %self.id, added, total = state.people.len(), "Candidates discovered");
        Ok(())
    }

    async fn enrich(&self, state: &mut WorkloadState) -> std::result::Result<(), StageFault> {
        let ctx = self.context(state);
        let mut waiting_on = Vec::new();

        for identity in state.chosen_identities() {
            let Some(mut handle) = PersonHandle::load(self.store.clone(), &self.id, identity).await?
            else {
                self.entity_error(None, identity, state.stage, "no stored record".into())
                    .await?;
                continue;
            };
            if handle.person().has(fields::INSIGHTS) && !state.rerun.enrich {
                debug!(workload = %self.id, entity = %handle.name(), "Already enriched, skipping");
                continue;
            }

            match self.gateway.enricher.enrich(handle.person(), &ctx).await {
                Ok(patch) => {
                    handle.apply(patch.unset(fields::LAST_ERROR)).await?;
                    debug!(workload = %self.id, entity = %handle.name(), "Enriched");
                }
                Err(GatewayError::NotReady(what)) => waiting_on.push(what),
                Err(e) => {
                    self.entity_error(Some(&mut handle), identity, state.stage, e.to_string())
                        .await?;
                }
            }
        }

        if !waiting_on.is_empty() {
            return Err(StageFault::Wait(waiting_on.join(", ")));
        }
        state.rerun.enrich = false;
        Ok(())
    }

    async fn draft(&self, state: &mut WorkloadState) -> std::result::Result<(), StageFault> {
        let ctx = self.context(state);
        let mut waiting_on = Vec::new();

        for identity in state.chosen_identities() {
            let Some(mut handle) = PersonHandle::load(self.store.clone(), &self.id, identity).await?
            else {
                self.entity_error(None, identity, state.stage, "no stored record".into())
                    .await?;
                continue;
            };
            if handle.person().has(fields::DRAFT_EMAIL) && !state.rerun.messages {
                debug!(workload = %self.id, entity = %handle.name(), "Already drafted, skipping");
                continue;
            }

            match self.gateway.drafter.draft(handle.person(), &ctx).await {
                Ok(drafted) => {
                    let text = MessageText::new(&drafted.subject, &drafted.body).to_text();
                    let mut patch = PersonPatch::new()
                        .text(fields::DRAFT_EMAIL, text)
                        .unset(fields::LAST_ERROR);
                    if let Some(dm) = drafted.direct_message {
                        patch = patch.text(fields::DRAFT_DM, dm);
                    }
                    handle.apply(patch).await?;
                    debug!(workload = %self.id, entity = %handle.name(), "Drafted");
                }
                Err(GatewayError::NotReady(what)) => waiting_on.push(what),
                Err(e) => {
                    self.entity_error(Some(&mut handle), identity, state.stage, e.to_string())
                        .await?;
                }
            }
        }

        if !waiting_on.is_empty() {
            return Err(StageFault::Wait(waiting_on.join(", ")));
        }
        state.rerun.messages = false;
        Ok(())
    }

    async fn send(&self, state: &mut WorkloadState) -> std::result::Result<(), StageFault> {
        let domain = self.id.as_str().to_string();

        for identity in state.chosen_identities() {
            let Some(mut handle) = PersonHandle::load(self.store.clone(), &self.id, identity).await?
            else {
                self.entity_error(None, identity, state.stage, "no stored record".into())
                    .await?;
                continue;
            };
            let approved = handle.person().text(fields::APPROVED_EMAIL).map(str::to_string);
            let Some(approved) = approved else {
                self.entity_error(Some(&mut handle), identity, state.stage, "no approved message".into())
                    .await?;
                continue;
            };
            let message = MessageText::parse(&approved);

            let addresses = match handle.person().text(fields::EMAIL_ADDRESS) {
                Some(explicit) => vec![explicit.trim().to_string()],
                None => email_permutations(handle.name(), &domain),
            };
            if handle.person().list(fields::POSSIBLE_EMAILS) != addresses.as_slice() {
                handle.set(fields::POSSIBLE_EMAILS, addresses.clone()).await?;
            }
            if addresses.is_empty() {
                self.entity_error(Some(&mut handle), identity, state.stage, "no delivery address".into())
                    .await?;
                continue;
            }

            let mut failed = Vec::new();
            for address in &addresses {
                if handle.person().list(fields::SENT_TO).contains(address) {
                    continue;
                }
                let delivery = Delivery {
                    channel: Channel::Email(address.clone()),
                    subject: message.subject.clone(),
                    body: message.body.clone(),
                };
                if self.gateway.sender.send(&delivery).await {
                    handle.push_unique(fields::SENT_TO, address).await?;
                } else {
                    handle.push_unique(fields::SEND_FAILURES, address).await?;
                    failed.push(address.clone());
                }
            }

            let handle_and_dm = (
                handle.person().text(fields::TWITTER_HANDLE).map(str::to_string),
                handle.person().text(fields::APPROVED_DM).map(str::to_string),
            );
            if let (Some(twitter), Some(dm)) = handle_and_dm {
                if !handle.person().flag(fields::DM_SENT) {
                    let delivery = Delivery {
                        channel: Channel::DirectMessage(twitter.clone()),
                        subject: String::new(),
                        body: dm,
                    };
                    if self.gateway.sender.send(&delivery).await {
                        handle.set(fields::DM_SENT, true).await?;
                    } else {
                        failed.push(format!("dm {twitter}"));
                    }
                }
            }

            if failed.is_empty() {
                info!(workload = %self.id, entity = %handle.name(), "Messages sent");
            } else {
                let reason = format!("send failed: {}", failed.join(", "));
                self.entity_error(Some(&mut handle), identity, state.stage, reason)
                    .await?;
            }
        }
        Ok(())
    }

    /// Record a per-person failure without touching the stage.
    async fn entity_error(
        &self,
        handle: Option<&mut PersonHandle>,
        entity: &str,
        stage: ProcessingStage,
        error: String,
    ) -> std::result::Result<(), DatabaseError> {
        let entity = match handle {
            Some(handle) => {
                handle.set(fields::LAST_ERROR, error.as_str()).await?;
                handle.name().to_string()
            }
            None => entity.to_string(),
        };
        self.notifier
            .emit(EventKind::EntityError {
                workload: self.id.clone(),
                entity,
                stage,
                error,
            })
            .await;
        Ok(())
    }

    // ── Step endings ────────────────────────────────────────────────

    async fn advance(&self, state: &mut WorkloadState, next: ProcessingStage) -> Result<StepOutcome> {
        let from = state.stage;
        state.stage = next;
        state.stage_failures = 0;
        state.last_error = None;
        state.updated_at = Utc::now();
        if let Err(e) = self.store.put_workload(state).await {
            return self.fail(state, e.into()).await;
        }

        self.notifier
            .emit(EventKind::StageAdvanced {
                workload: self.id.clone(),
                from,
                to: next,
            })
            .await;
        if next == ProcessingStage::Completed {
            self.notifier
                .emit(EventKind::WorkloadCompleted {
                    workload: self.id.clone(),
                })
                .await;
        }

        Ok(StepOutcome {
            worked: true,
            stage: next,
            reason: StepReason::Advanced { from, to: next },
        })
    }

    async fn park(&self, state: &mut WorkloadState, reason: BlockReason) -> Result<StepOutcome> {
        state.updated_at = Utc::now();
        if let Err(e) = self.store.put_workload(state).await {
            return self.fail(state, e.into()).await;
        }
        self.notifier
            .emit(EventKind::WaitingForInput {
                workload: self.id.clone(),
                stage: state.stage,
                reason: reason.to_string(),
            })
            .await;
        Ok(StepOutcome {
            worked: false,
            stage: state.stage,
            reason: StepReason::Blocked(reason),
        })
    }

    async fn stage_failed(&self, state: &mut WorkloadState, msg: String) -> Result<StepOutcome> {
        state.stage_failures += 1;
        state.last_error = Some(msg.clone());
        state.updated_at = Utc::now();

        if state.stage_failures > self.max_stage_failures {
            let error = format!(
                "{msg} (gave up after {} consecutive failures)",
                state.stage_failures
            );
            state.mark_failed(error.clone());
            if let Err(e) = self.store.put_workload(state).await {
                return self.fail(state, e.into()).await;
            }
            self.notifier
                .emit(EventKind::WorkloadFailed {
                    workload: self.id.clone(),
                    error: error.clone(),
                })
                .await;
            return Ok(StepOutcome {
                worked: false,
                stage: ProcessingStage::Error,
                reason: StepReason::Exhausted(error),
            });
        }

        if let Err(e) = self.store.put_workload(state).await {
            return self.fail(state, e.into()).await;
        }
        self.notifier
            .emit(EventKind::StageError {
                workload: self.id.clone(),
                stage: state.stage,
                error: msg.clone(),
            })
            .await;
        Ok(StepOutcome {
            worked: false,
            stage: state.stage,
            reason: StepReason::StageFailed(msg),
        })
    }

    /// Force `Error`, persist best-effort, and hand the error back.
    async fn fail(&self, state: &mut WorkloadState, error: Error) -> Result<StepOutcome> {
        let message = error.to_string();
        state.mark_failed(message.clone());
        state.updated_at = Utc::now();
        if let Err(e) = self.store.put_workload(state).await {
            warn!(workload = %self.id, error = %e, "Could not persist failed workload");
        }
        self.notifier
            .emit(EventKind::WorkloadFailed {
                workload: self.id.clone(),
                error: message,
            })
            .await;
        Err(error)
    }
}
