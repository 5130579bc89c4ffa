//! Reconciliation of scheduler state against slave-reported task
//! inventories.
//!
//! The engine keeps a heartbeat ledger: the last moment each task was
//! vouched for by its slave (its launch, or the most recent report that
//! mentioned it). A STARTING/RUNNING task absent from its slave's report is
//! marked LOST only once the configured grace period has elapsed since its
//! last heartbeat; a terminal task the slave has forgotten is garbage
//! collected once the retention window passes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::scheduler::task::{ResourceConsumption, ScheduleStatus, TaskId};

/// One slave's claim about a task it is hosting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveTaskInfo {
    pub task_id: TaskId,
    pub status: ScheduleStatus,
    pub resources: Option<ResourceConsumption>,
}

/// A full task inventory reported by one slave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredTaskUpdate {
    pub slave_host: String,
    pub task_infos: Vec<LiveTaskInfo>,
}

#[derive(Debug)]
pub struct ReconciliationEngine {
    missing_grace: Duration,
    retention: Duration,
    last_seen: HashMap<TaskId, Instant>,
}

impl ReconciliationEngine {
    pub fn new(missing_grace: Duration, retention: Duration) -> Self {
        Self {
            missing_grace,
            retention,
            last_seen: HashMap::new(),
        }
    }

    /// Record that a slave vouched for this task at `now`.
    pub fn record_heartbeat(&mut self, task_id: TaskId, now: Instant) {
        self.last_seen.insert(task_id, now);
    }

    pub fn forget(&mut self, task_id: TaskId) {
        self.last_seen.remove(&task_id);
    }

    /// True once the missing-task grace period has elapsed since the task's
    /// last heartbeat. A task never heard from starts its clock now.
    pub fn lost_deadline_passed(&mut self, task_id: TaskId, now: Instant) -> bool {
        self.deadline_passed(task_id, now, self.missing_grace)
    }

    /// True once a forgotten terminal task has outlived its retention
    /// window.
    pub fn retention_expired(&mut self, task_id: TaskId, now: Instant) -> bool {
        self.deadline_passed(task_id, now, self.retention)
    }

    fn deadline_passed(&mut self, task_id: TaskId, now: Instant, window: Duration) -> bool {
        let last = *self.last_seen.entry(task_id).or_insert(now);
        now.saturating_duration_since(last) >= window
    }
}
