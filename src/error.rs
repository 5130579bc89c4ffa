use thiserror::Error;

use crate::scheduler::task::{JobKey, TaskId};

#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Structurally invalid job configuration: empty task set, missing or
    /// non-contiguous shard ids, nonsensical resource requests.
    #[error("invalid task description: {0}")]
    TaskDescription(String),

    #[error("invalid cron expression {expr:?}: {message}")]
    InvalidCron { expr: String, message: String },

    #[error("job already exists: {0}")]
    DuplicateJob(JobKey),

    #[error("no such job: {0}")]
    JobNotFound(JobKey),

    #[error("no job manager accepted job: {0}")]
    JobNotAccepted(JobKey),

    #[error("no tasks matched the query")]
    NoMatchingTasks,

    #[error("duplicate task id: {0}")]
    DuplicateTaskId(TaskId),

    #[error("persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
