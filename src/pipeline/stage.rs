//! Processing stages: the ordered points a workload moves through.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Stage a workload has reached.
///
/// Progresses linearly: NotStarted → ProfilesScraped → ProfilesSelected →
/// ProfilesProcessed → MessagesDrafted → MessagesApproved → MessagesSent →
/// Completed. `Error` sits outside the ordering: comparing it with any
/// other stage yields `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    #[default]
    NotStarted,
    ProfilesScraped,
    ProfilesSelected,
    ProfilesProcessed,
    MessagesDrafted,
    MessagesApproved,
    MessagesSent,
    Completed,
    Error,
}

impl ProcessingStage {
    /// All stages, in declaration order.
    pub const ALL: [ProcessingStage; 9] = [
        Self::NotStarted,
        Self::ProfilesScraped,
        Self::ProfilesSelected,
        Self::ProfilesProcessed,
        Self::MessagesDrafted,
        Self::MessagesApproved,
        Self::MessagesSent,
        Self::Completed,
        Self::Error,
    ];

    /// Position in the pipeline ordering. `None` for `Error`.
    pub fn rank(self) -> Option<u8> {
        use ProcessingStage::*;
        match self {
            NotStarted => Some(0),
            ProfilesScraped => Some(1),
            ProfilesSelected => Some(2),
            ProfilesProcessed => Some(3),
            MessagesDrafted => Some(4),
            MessagesApproved => Some(5),
            MessagesSent => Some(6),
            Completed => Some(7),
            Error => None,
        }
    }

    /// Whether the scheduler should stop driving a workload in this stage.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// True when `self` has reached at least `other`. False whenever
    /// exactly one side is `Error`.
    pub fn reached(self, other: ProcessingStage) -> bool {
        matches!(
            self.partial_cmp(&other),
            Some(Ordering::Greater | Ordering::Equal)
        )
    }

    /// The snake_case value used on disk and on the wire.
    pub fn as_str(self) -> &'static str {
        use ProcessingStage::*;
        match self {
            NotStarted => "not_started",
            ProfilesScraped => "profiles_scraped",
            ProfilesSelected => "profiles_selected",
            ProfilesProcessed => "profiles_processed",
            MessagesDrafted => "messages_drafted",
            MessagesApproved => "messages_approved",
            MessagesSent => "messages_sent",
            Completed => "completed",
            Error => "error",
        }
    }
}

impl PartialOrd for ProcessingStage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        match (self.rank(), other.rank()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingStage {
    type Err = String;

    /// Accepts the snake_case value or the upper-case name, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == wanted)
            .ok_or_else(|| format!("unknown processing stage: {s}"))
    }
}
