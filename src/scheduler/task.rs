use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cluster-wide task identifier. Ids are assigned from a single counter and
/// strictly increase over the life of the scheduler.
pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleStatus {
    Pending,
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
    KilledByClient,
}

impl ScheduleStatus {
    /// An active task occupies its (job, shard) slot: at most one active task
    /// may exist per shard.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Starting | Self::Running)
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleStatus::Pending => write!(f, "pending"),
            ScheduleStatus::Starting => write!(f, "starting"),
            ScheduleStatus::Running => write!(f, "running"),
            ScheduleStatus::Finished => write!(f, "finished"),
            ScheduleStatus::Failed => write!(f, "failed"),
            ScheduleStatus::Killed => write!(f, "killed"),
            ScheduleStatus::Lost => write!(f, "lost"),
            ScheduleStatus::KilledByClient => write!(f, "killed_by_client"),
        }
    }
}

pub const ACTIVE_STATUSES: [ScheduleStatus; 3] = [
    ScheduleStatus::Pending,
    ScheduleStatus::Starting,
    ScheduleStatus::Running,
];

pub const TERMINAL_STATUSES: [ScheduleStatus; 5] = [
    ScheduleStatus::Finished,
    ScheduleStatus::Failed,
    ScheduleStatus::Killed,
    ScheduleStatus::Lost,
    ScheduleStatus::KilledByClient,
];

/// The (owner, name) pair identifying a job. Globally unique across active
/// jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub owner: String,
    pub name: String,
}

impl JobKey {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Immutable description of one shard of a job.
///
/// `daemon`, `max_task_failures`, and `priority` are optional on submission;
/// configuration population fills in the defaults (false, 1, 0) before a task
/// enters the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub start_command: String,
    pub cpus: f64,
    pub ram_mb: u64,
    pub disk_mb: u64,
    pub ports: Vec<u16>,
    pub shard_id: Option<u32>,
    pub daemon: Option<bool>,
    pub max_task_failures: Option<u32>,
    pub priority: Option<i32>,
}

impl TaskInfo {
    pub fn is_daemon(&self) -> bool {
        self.daemon.unwrap_or(false)
    }

    pub fn max_failures(&self) -> u32 {
        self.max_task_failures.unwrap_or(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CronCollisionPolicy {
    KillExisting,
    CancelNew,
    RunOverlap,
}

impl Default for CronCollisionPolicy {
    fn default() -> Self {
        Self::KillExisting
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfiguration {
    pub owner: String,
    pub name: String,
    pub task_configs: Vec<TaskInfo>,
    pub cron_schedule: Option<String>,
    pub cron_collision_policy: Option<CronCollisionPolicy>,
}

impl JobConfiguration {
    pub fn key(&self) -> JobKey {
        JobKey::new(self.owner.clone(), self.name.clone())
    }

    pub fn is_cron(&self) -> bool {
        self.cron_schedule.is_some()
    }
}

/// Where a task runs once it has been matched to an offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub slave_id: String,
    pub slave_host: String,
}

/// Lifecycle state of a task, carrying only the fields valid in that state.
/// A task has a slave assignment exactly when it has left PENDING through the
/// offer path; LOST and KILLED_BY_CLIENT can also be reached straight from
/// PENDING, where no assignment exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskLifecycle {
    Pending,
    Starting(Assignment),
    Running(Assignment),
    Finished(Assignment),
    Failed(Assignment),
    Killed(Assignment),
    Lost(Option<Assignment>),
    KilledByClient(Option<Assignment>),
}

impl TaskLifecycle {
    pub fn status(&self) -> ScheduleStatus {
        match self {
            TaskLifecycle::Pending => ScheduleStatus::Pending,
            TaskLifecycle::Starting(_) => ScheduleStatus::Starting,
            TaskLifecycle::Running(_) => ScheduleStatus::Running,
            TaskLifecycle::Finished(_) => ScheduleStatus::Finished,
            TaskLifecycle::Failed(_) => ScheduleStatus::Failed,
            TaskLifecycle::Killed(_) => ScheduleStatus::Killed,
            TaskLifecycle::Lost(_) => ScheduleStatus::Lost,
            TaskLifecycle::KilledByClient(_) => ScheduleStatus::KilledByClient,
        }
    }

    pub fn assignment(&self) -> Option<&Assignment> {
        match self {
            TaskLifecycle::Pending => None,
            TaskLifecycle::Starting(a)
            | TaskLifecycle::Running(a)
            | TaskLifecycle::Finished(a)
            | TaskLifecycle::Failed(a)
            | TaskLifecycle::Killed(a) => Some(a),
            TaskLifecycle::Lost(a) | TaskLifecycle::KilledByClient(a) => a.as_ref(),
        }
    }
}

/// Resource usage as last reported by the slave. Volatile: not persisted in
/// snapshots and reset on restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConsumption {
    pub cpus_used: f64,
    pub mem_used_mb: u64,
    pub disk_used_mb: u64,
    pub leased_ports: HashMap<String, u16>,
    pub nice_level: i32,
}

/// A resource advertisement from a slave node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOffer {
    pub cpus: f64,
    pub ram_mb: u64,
    pub disk_mb: u64,
}

/// A live record of one attempt to run one shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: TaskId,
    pub job: JobKey,
    pub shard_id: u32,
    pub info: TaskInfo,
    pub lifecycle: TaskLifecycle,
    pub failure_count: u32,
    /// Id of the prior attempt this task replaces, if it was rescheduled.
    pub ancestor_id: Option<TaskId>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub resources: Option<ResourceConsumption>,
}

impl ScheduledTask {
    pub fn pending(
        task_id: TaskId,
        job: JobKey,
        shard_id: u32,
        info: TaskInfo,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            job,
            shard_id,
            info,
            lifecycle: TaskLifecycle::Pending,
            failure_count: 0,
            ancestor_id: None,
            created_at,
            resources: None,
        }
    }

    /// A fresh PENDING task replacing this (terminal) one on the same shard.
    /// Carries the failure count forward so a shard's failure budget spans
    /// attempts.
    pub fn replacement(&self, task_id: TaskId, created_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            job: self.job.clone(),
            shard_id: self.shard_id,
            info: self.info.clone(),
            lifecycle: TaskLifecycle::Pending,
            failure_count: self.failure_count,
            ancestor_id: Some(self.task_id),
            created_at,
            resources: None,
        }
    }

    pub fn status(&self) -> ScheduleStatus {
        self.lifecycle.status()
    }

    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    pub fn slave_host(&self) -> Option<&str> {
        self.lifecycle.assignment().map(|a| a.slave_host.as_str())
    }

    pub fn slave_id(&self) -> Option<&str> {
        self.lifecycle.assignment().map(|a| a.slave_id.as_str())
    }
}
