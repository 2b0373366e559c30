//! Scheduler bookkeeping: which workloads are ready, waiting, running or done.
//!
//! Every known workload id sits in exactly one slot. Moving an id always
//! detaches it from its current slot first.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::pipeline::processor::Disposition;
use crate::pipeline::stage::ProcessingStage;
use crate::pipeline::types::WorkloadId;

/// Where a workload currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Ready,
    Waiting,
    Running,
    /// Terminal; not scheduled until reset.
    Retired,
}

/// Result of trying to take exclusive hold of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// A step is in flight.
    Busy,
    /// Now held as running. Carries the slot it was taken from.
    Claimed(Option<Slot>),
}

/// Point-in-time view of the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub ready: Vec<WorkloadId>,
    pub waiting: Vec<WorkloadId>,
    pub running: Vec<WorkloadId>,
    pub retired: Vec<WorkloadId>,
}

#[derive(Debug, Default)]
pub struct QueueState {
    ready: VecDeque<WorkloadId>,
    waiting: HashSet<WorkloadId>,
    running: HashSet<WorkloadId>,
    retired: HashSet<WorkloadId>,
    /// Input arrived while a step was running: do not park it afterwards.
    rewake: HashSet<WorkloadId>,
    /// Cancelled while a step was running.
    cancelled: HashSet<WorkloadId>,
    /// Last stage seen for every known workload.
    stages: HashMap<WorkloadId, ProcessingStage>,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locate(&self, id: &WorkloadId) -> Option<Slot> {
        if self.running.contains(id) {
            Some(Slot::Running)
        } else if self.waiting.contains(id) {
            Some(Slot::Waiting)
        } else if self.retired.contains(id) {
            Some(Slot::Retired)
        } else if self.ready.contains(id) {
            Some(Slot::Ready)
        } else {
            None
        }
    }

    pub fn is_known(&self, id: &WorkloadId) -> bool {
        self.stages.contains_key(id)
    }

    pub fn stage(&self, id: &WorkloadId) -> Option<ProcessingStage> {
        self.stages.get(id).copied()
    }

    /// Record the latest stage of a workload.
    pub fn track(&mut self, id: &WorkloadId, stage: ProcessingStage) {
        self.stages.insert(id.clone(), stage);
    }

    fn detach(&mut self, id: &WorkloadId) {
        self.ready.retain(|r| r != id);
        self.waiting.remove(id);
        self.running.remove(id);
        self.retired.remove(id);
    }

    fn place(&mut self, id: &WorkloadId, slot: Slot) {
        self.detach(id);
        match slot {
            Slot::Ready => self.ready.push_back(id.clone()),
            Slot::Waiting => {
                self.waiting.insert(id.clone());
            }
            Slot::Running => {
                self.running.insert(id.clone());
            }
            Slot::Retired => {
                self.retired.insert(id.clone());
            }
        }
    }

    /// Make a workload eligible for the next tick. Returns true if it moved
    /// to the ready queue. A running workload is requeued when its step
    /// finishes instead.
    pub fn enqueue(&mut self, id: &WorkloadId) -> bool {
        match self.locate(id) {
            Some(Slot::Running) => {
                self.rewake.insert(id.clone());
                false
            }
            Some(Slot::Ready) | Some(Slot::Retired) => false,
            Some(Slot::Waiting) | None => {
                self.place(id, Slot::Ready);
                true
            }
        }
    }

    /// Take the next ready workload and mark it running.
    pub fn pop_ready(&mut self) -> Option<WorkloadId> {
        let id = self.ready.pop_front()?;
        self.running.insert(id.clone());
        Some(id)
    }

    /// Take exclusive hold of a workload unless a step is in flight.
    pub fn claim(&mut self, id: &WorkloadId) -> Claim {
        let previous = self.locate(id);
        if previous == Some(Slot::Running) {
            return Claim::Busy;
        }
        self.place(id, Slot::Running);
        Claim::Claimed(previous)
    }

    /// Put a claimed workload back where it was. `None` forgets it.
    pub fn restore(&mut self, id: &WorkloadId, previous: Option<Slot>) {
        match previous {
            Some(slot) => self.place(id, slot),
            None => {
                self.detach(id);
                self.stages.remove(id);
            }
        }
        self.rewake.remove(id);
    }

    /// Release a running workload according to `disposition`.
    pub fn settle(&mut self, id: &WorkloadId, disposition: Disposition, stage: ProcessingStage) {
        self.track(id, stage);
        let rewake = self.rewake.remove(id);
        let slot = match disposition {
            _ if stage.is_terminal() => Slot::Retired,
            Disposition::Retire => Slot::Retired,
            Disposition::Requeue => Slot::Ready,
            Disposition::Park if rewake => Slot::Ready,
            Disposition::Park => Slot::Waiting,
        };
        self.place(id, slot);
    }

    pub fn mark_cancelled(&mut self, id: &WorkloadId) {
        self.cancelled.insert(id.clone());
    }

    pub fn take_cancelled(&mut self, id: &WorkloadId) -> bool {
        self.cancelled.remove(id)
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Nothing queued, nothing running, and every known workload terminal.
    pub fn is_finished(&self) -> bool {
        self.ready.is_empty()
            && self.running.is_empty()
            && self.stages.values().all(|s| s.is_terminal())
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let sorted = |set: &HashSet<WorkloadId>| {
            let mut ids: Vec<_> = set.iter().cloned().collect();
            ids.sort();
            ids
        };
        QueueSnapshot {
            ready: self.ready.iter().cloned().collect(),
            waiting: sorted(&self.waiting),
            running: sorted(&self.running),
            retired: sorted(&self.retired),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> WorkloadId {
        WorkloadId::new(s)
    }

    fn slots(q: &QueueState, id: &WorkloadId) -> usize {
        let s = q.snapshot();
        [s.ready, s.waiting, s.running, s.retired]
            .iter()
            .map(|v| v.iter().filter(|x| *x == id).count())
            .sum()
    }

    #[test]
    fn round_robin_order() {
        let mut q = QueueState::new();
        for name in ["a.com", "b.com"] {
            q.track(&id(name), ProcessingStage::NotStarted);
            q.enqueue(&id(name));
        }

        let first = q.pop_ready().unwrap();
        assert_eq!(first, id("a.com"));
        q.settle(&first, Disposition::Requeue, ProcessingStage::ProfilesScraped);

        assert_eq!(q.pop_ready().unwrap(), id("b.com"));
        assert_eq!(q.snapshot().ready, vec![id("a.com")]);
    }

    #[test]
    fn an_id_is_never_in_two_slots() {
        let mut q = QueueState::new();
        let a = id("a.com");
        q.track(&a, ProcessingStage::NotStarted);

        q.enqueue(&a);
        q.enqueue(&a);
        assert_eq!(slots(&q, &a), 1);

        let popped = q.pop_ready().unwrap();
        assert_eq!(q.locate(&popped), Some(Slot::Running));
        assert!(!q.enqueue(&a));
        assert_eq!(slots(&q, &a), 1);

        q.settle(&a, Disposition::Park, ProcessingStage::ProfilesScraped);
        assert_eq!(slots(&q, &a), 1);
    }

    #[test]
    fn park_then_signal() {
        let mut q = QueueState::new();
        let a = id("a.com");
        q.track(&a, ProcessingStage::ProfilesScraped);
        q.enqueue(&a);
        q.pop_ready();
        q.settle(&a, Disposition::Park, ProcessingStage::ProfilesScraped);
        assert_eq!(q.locate(&a), Some(Slot::Waiting));
        assert!(!q.has_ready());

        assert!(q.enqueue(&a));
        assert_eq!(q.locate(&a), Some(Slot::Ready));
    }

    #[test]
    fn signal_during_step_is_not_lost() {
        let mut q = QueueState::new();
        let a = id("a.com");
        q.track(&a, ProcessingStage::ProfilesScraped);
        q.enqueue(&a);
        q.pop_ready();

        q.enqueue(&a);
        q.settle(&a, Disposition::Park, ProcessingStage::ProfilesScraped);
        assert_eq!(q.locate(&a), Some(Slot::Ready));
    }

    #[test]
    fn terminal_stage_always_retires() {
        let mut q = QueueState::new();
        let a = id("a.com");
        q.track(&a, ProcessingStage::MessagesApproved);
        q.enqueue(&a);
        q.pop_ready();
        q.settle(&a, Disposition::Requeue, ProcessingStage::Completed);
        assert_eq!(q.locate(&a), Some(Slot::Retired));
        assert!(!q.enqueue(&a));
    }

    #[test]
    fn claim_is_exclusive() {
        let mut q = QueueState::new();
        let a = id("a.com");
        q.track(&a, ProcessingStage::ProfilesScraped);
        q.enqueue(&a);
        q.pop_ready();
        assert_eq!(q.claim(&a), Claim::Busy);

        q.settle(&a, Disposition::Park, ProcessingStage::ProfilesScraped);
        assert_eq!(q.claim(&a), Claim::Claimed(Some(Slot::Waiting)));
        assert_eq!(q.locate(&a), Some(Slot::Running));

        q.restore(&a, Some(Slot::Waiting));
        assert_eq!(q.locate(&a), Some(Slot::Waiting));
    }

    #[test]
    fn restore_unknown_forgets() {
        let mut q = QueueState::new();
        let a = id("a.com");
        assert_eq!(q.claim(&a), Claim::Claimed(None));
        q.restore(&a, None);
        assert_eq!(q.locate(&a), None);
        assert!(!q.is_known(&a));
    }

    #[test]
    fn finished_only_when_all_terminal_and_idle() {
        let mut q = QueueState::new();
        assert!(q.is_finished());

        let a = id("a.com");
        let b = id("b.com");
        q.track(&a, ProcessingStage::Completed);
        q.track(&b, ProcessingStage::ProfilesScraped);
        q.enqueue(&b);
        q.pop_ready();
        q.settle(&b, Disposition::Park, ProcessingStage::ProfilesScraped);
        assert!(!q.is_finished(), "waiting non-terminal workload keeps the loop alive");

        q.claim(&b);
        q.settle(&b, Disposition::Retire, ProcessingStage::Error);
        assert!(q.is_finished());
    }
}
