//! Stage transition table.
//!
//! Pure: given the current stage and the guard inputs, say what the next
//! step should do. All I/O lives in the processor.

use serde::{Deserialize, Serialize};

use crate::pipeline::stage::ProcessingStage;

/// Work performed by a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Ask the discoverer for candidates.
    Discover,
    /// Accept the human selection. No I/O.
    Select,
    /// Enrich each chosen person.
    Enrich,
    /// Draft a message for each chosen person.
    Draft,
    /// Accept the human-approved drafts. No I/O.
    Approve,
    /// Deliver approved messages.
    Send,
    /// Close out a workload whose messages are already out. No I/O.
    Finalize,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Discover => "discover",
            Self::Select => "select",
            Self::Enrich => "enrich",
            Self::Draft => "draft",
            Self::Approve => "approve",
            Self::Send => "send",
            Self::Finalize => "finalize",
        };
        write!(f, "{s}")
    }
}

/// Why a stage cannot run yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum BlockReason {
    /// No people have been chosen.
    NoSelection,
    /// These chosen people have no approved message.
    MissingApprovals(Vec<String>),
    /// A collaborator has not produced its output yet.
    AwaitingInput(String),
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSelection => write!(f, "waiting for a selection"),
            Self::MissingApprovals(names) => {
                write!(f, "waiting for approved drafts: {}", names.join(", "))
            }
            Self::AwaitingInput(what) => write!(f, "waiting for collaborator output: {what}"),
        }
    }
}

/// Outcome of consulting the transition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Run {
        action: Action,
        next: ProcessingStage,
    },
    Blocked(BlockReason),
    Terminal,
}

/// Inputs the gated stages depend on.
#[derive(Debug, Clone, Default)]
pub struct Guards {
    pub has_selection: bool,
    /// Chosen people lacking an approved message. Only consulted at
    /// `MessagesDrafted`.
    pub missing_approvals: Vec<String>,
}

/// The stage a successful step at `stage` moves to.
pub fn successor(stage: ProcessingStage) -> Option<ProcessingStage> {
    use ProcessingStage::*;
    match stage {
        NotStarted => Some(ProfilesScraped),
        ProfilesScraped => Some(ProfilesSelected),
        ProfilesSelected => Some(ProfilesProcessed),
        ProfilesProcessed => Some(MessagesDrafted),
        MessagesDrafted => Some(MessagesApproved),
        // Sending completes the workload directly; MessagesSent only
        // appears in legacy data or after an operator reset.
        MessagesApproved => Some(Completed),
        MessagesSent => Some(Completed),
        Completed | Error => None,
    }
}

/// Whether the pipeline itself may move a workload from `from` to `to`.
///
/// Forward moves go one step at a time. Any non-terminal stage may be
/// forced to `Error`. Moves out of terminal stages are operator resets and
/// are not covered here.
pub fn can_transition(from: ProcessingStage, to: ProcessingStage) -> bool {
    if from.is_terminal() {
        return false;
    }
    to == ProcessingStage::Error || successor(from) == Some(to)
}

/// Decide what a step at `stage` should do.
pub fn decide(stage: ProcessingStage, guards: &Guards) -> Decision {
    use ProcessingStage::*;
    let action = match stage {
        Completed | Error => return Decision::Terminal,
        NotStarted => Action::Discover,
        ProfilesScraped => {
            if !guards.has_selection {
                return Decision::Blocked(BlockReason::NoSelection);
            }
            Action::Select
        }
        ProfilesSelected => Action::Enrich,
        ProfilesProcessed => Action::Draft,
        MessagesDrafted => {
            if !guards.missing_approvals.is_empty() {
                return Decision::Blocked(BlockReason::MissingApprovals(
                    guards.missing_approvals.clone(),
                ));
            }
            Action::Approve
        }
        MessagesApproved => Action::Send,
        MessagesSent => Action::Finalize,
    };
    match successor(stage) {
        Some(next) => Decision::Run { action, next },
        None => Decision::Terminal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessingStage::*;

    fn open() -> Guards {
        Guards {
            has_selection: true,
            missing_approvals: Vec::new(),
        }
    }

    #[test]
    fn happy_path_visits_every_stage_in_order() {
        let mut stage = NotStarted;
        let mut actions = Vec::new();
        while let Decision::Run { action, next } = decide(stage, &open()) {
            assert!(next > stage);
            assert!(can_transition(stage, next));
            actions.push(action);
            stage = next;
        }
        assert_eq!(stage, Completed);
        assert_eq!(
            actions,
            vec![
                Action::Discover,
                Action::Select,
                Action::Enrich,
                Action::Draft,
                Action::Approve,
                Action::Send,
            ]
        );
    }

    #[test]
    fn selection_gate() {
        assert_eq!(
            decide(ProfilesScraped, &Guards::default()),
            Decision::Blocked(BlockReason::NoSelection)
        );
    }

    #[test]
    fn approval_gate_reports_missing_names() {
        let guards = Guards {
            has_selection: true,
            missing_approvals: vec!["Ada".into(), "Grace".into()],
        };
        assert_eq!(
            decide(MessagesDrafted, &guards),
            Decision::Blocked(BlockReason::MissingApprovals(vec![
                "Ada".into(),
                "Grace".into()
            ]))
        );
        // Only the approval stage looks at approvals.
        assert!(matches!(
            decide(ProfilesProcessed, &guards),
            Decision::Run {
                action: Action::Draft,
                ..
            }
        ));
    }

    #[test]
    fn messages_sent_finalizes() {
        assert_eq!(
            decide(MessagesSent, &Guards::default()),
            Decision::Run {
                action: Action::Finalize,
                next: Completed
            }
        );
    }

    #[test]
    fn terminal_stages_do_nothing() {
        assert_eq!(decide(Completed, &open()), Decision::Terminal);
        assert_eq!(decide(Error, &open()), Decision::Terminal);
    }

    #[test]
    fn transitions() {
        assert!(can_transition(NotStarted, ProfilesScraped));
        assert!(!can_transition(NotStarted, ProfilesSelected));
        assert!(can_transition(MessagesDrafted, Error));
        assert!(!can_transition(Completed, Error));
        assert!(!can_transition(Error, NotStarted));
        assert!(!can_transition(ProfilesScraped, NotStarted));
    }

    #[test]
    fn block_reason_display() {
        let reason = BlockReason::MissingApprovals(vec!["Ada".into(), "Grace".into()]);
        assert_eq!(reason.to_string(), "waiting for approved drafts: Ada, Grace");
    }
}
