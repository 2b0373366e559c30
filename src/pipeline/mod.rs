//! Outreach pipeline: stages, transition table, data model and the
//! per-workload processor.
//!
//! A workload moves NotStarted → ProfilesScraped → ProfilesSelected →
//! ProfilesProcessed → MessagesDrafted → MessagesApproved → Completed.
//! Selection and approval are human gates; everything else calls out to
//! the collaborators in `crate::gateway`.

pub mod machine;
pub mod processor;
pub mod stage;
pub mod types;

pub use machine::{Action, BlockReason, Decision};
pub use processor::{ApprovedDraft, Disposition, StepOutcome, StepReason, WorkloadProcessor};
pub use stage::ProcessingStage;
pub use types::{
    FieldValue, MessageText, Person, PersonPatch, RerunFlags, WorkloadId, WorkloadSeed,
    WorkloadState, fields, normalize_identity,
};
