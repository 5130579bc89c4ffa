//! Job configuration validation and field population.

use std::collections::HashSet;

use crate::error::{Result, SchedulerError};
use crate::scheduler::cron;
use crate::scheduler::task::JobConfiguration;

const DEFAULT_MAX_TASK_FAILURES: u32 = 1;
const DEFAULT_PRIORITY: i32 = 0;

/// Check a submitted job for structural validity and return a copy with the
/// optional per-task policy fields populated from their defaults. Everything
/// downstream of intake (the store, the state machine, the update planner)
/// assumes it only ever sees populated configurations.
pub fn validate_and_populate(job: &JobConfiguration) -> Result<JobConfiguration> {
    if job.task_configs.is_empty() {
        return Err(SchedulerError::TaskDescription(format!(
            "job {} has no task configurations",
            job.key()
        )));
    }

    let mut shards = HashSet::new();
    for task in &job.task_configs {
        let Some(shard) = task.shard_id else {
            return Err(SchedulerError::TaskDescription(format!(
                "job {} has a task with no shard id",
                job.key()
            )));
        };
        if !shards.insert(shard) {
            return Err(SchedulerError::TaskDescription(format!(
                "job {} has duplicate shard id {}",
                job.key(),
                shard
            )));
        }
        if task.start_command.trim().is_empty() {
            return Err(SchedulerError::TaskDescription(format!(
                "shard {} has an empty start command",
                shard
            )));
        }
        if task.cpus <= 0.0 {
            return Err(SchedulerError::TaskDescription(format!(
                "shard {} requests non-positive cpus",
                shard
            )));
        }
        if task.ram_mb == 0 {
            return Err(SchedulerError::TaskDescription(format!(
                "shard {} requests zero ram",
                shard
            )));
        }
    }

    // Shard ids must form the contiguous range [0, N).
    let count = job.task_configs.len() as u32;
    for shard in 0..count {
        if !shards.contains(&shard) {
            return Err(SchedulerError::TaskDescription(format!(
                "job {} is missing shard id {} (ids must cover [0, {}))",
                job.key(),
                shard,
                count
            )));
        }
    }

    if let Some(schedule) = &job.cron_schedule {
        cron::parse_schedule(schedule)?;
    }

    let mut populated = job.clone();
    for task in &mut populated.task_configs {
        task.daemon = Some(task.daemon.unwrap_or(false));
        task.max_task_failures = Some(task.max_task_failures.unwrap_or(DEFAULT_MAX_TASK_FAILURES));
        task.priority = Some(task.priority.unwrap_or(DEFAULT_PRIORITY));
    }
    Ok(populated)
}
