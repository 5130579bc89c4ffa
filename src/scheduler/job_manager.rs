//! Job ownership and task materialization.
//!
//! An incoming job is offered to managers in priority order; the first that
//! accepts owns the job. The cron manager claims anything with a cron
//! schedule and holds the configuration until the trigger clock fires; the
//! immediate manager claims the rest and materializes tasks at accept time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::scheduler::cron;
use crate::scheduler::store::{TaskQuery, TaskStore};
use crate::scheduler::task::{JobConfiguration, JobKey, ScheduledTask, TaskId};

/// Task-creation handle passed down into manager calls for the duration of
/// one operation. Managers never hold a reference back to the scheduler.
pub struct Materializer<'a> {
    store: &'a mut TaskStore,
    task_id_counter: &'a mut TaskId,
}

impl<'a> Materializer<'a> {
    pub fn new(store: &'a mut TaskStore, task_id_counter: &'a mut TaskId) -> Self {
        Self {
            store,
            task_id_counter,
        }
    }

    /// Create one PENDING task per task config and insert them into the
    /// store. The configuration must already be validated and populated.
    pub fn materialize(&mut self, job: &JobConfiguration) -> Result<Vec<TaskId>> {
        let key = job.key();
        let now = Utc::now();
        let mut tasks = Vec::with_capacity(job.task_configs.len());
        for info in &job.task_configs {
            *self.task_id_counter += 1;
            let task_id = *self.task_id_counter;
            let shard_id = info.shard_id.unwrap_or_default();
            tasks.push(ScheduledTask::pending(
                task_id,
                key.clone(),
                shard_id,
                info.clone(),
                now,
            ));
        }
        let ids: Vec<TaskId> = tasks.iter().map(|t| t.task_id).collect();
        self.store.add(tasks)?;
        tracing::info!(job = %key, count = ids.len(), "materialized pending tasks");
        Ok(ids)
    }
}

pub trait JobManager {
    /// Offer a job to this manager. Returns true if the manager claims
    /// ownership of it.
    fn receive_job(
        &mut self,
        job: &JobConfiguration,
        materializer: &mut Materializer<'_>,
    ) -> Result<bool>;

    fn has_job(&self, key: &JobKey, store: &TaskStore) -> bool;

    fn delete_job(&mut self, key: &JobKey) -> bool;
}

/// Materializes tasks into the store the moment a job is accepted. Owns no
/// state of its own: the store's active tasks are the job.
#[derive(Debug, Default)]
pub struct ImmediateJobManager;

impl JobManager for ImmediateJobManager {
    fn receive_job(
        &mut self,
        job: &JobConfiguration,
        materializer: &mut Materializer<'_>,
    ) -> Result<bool> {
        if job.is_cron() {
            return Ok(false);
        }
        materializer.materialize(job)?;
        Ok(true)
    }

    fn has_job(&self, key: &JobKey, store: &TaskStore) -> bool {
        !store.fetch(&TaskQuery::active_job(key)).is_empty()
    }

    fn delete_job(&mut self, _key: &JobKey) -> bool {
        false
    }
}

/// Holds cron-scheduled job configurations, keyed by job key. Tasks are
/// materialized only when the external trigger clock fires the job.
#[derive(Debug, Default)]
pub struct CronJobManager {
    jobs: HashMap<JobKey, JobConfiguration>,
}

impl CronJobManager {
    pub fn job(&self, key: &JobKey) -> Option<&JobConfiguration> {
        self.jobs.get(key)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobConfiguration> {
        self.jobs.values()
    }

    /// Replace the stored configuration for an existing job (the update
    /// path).
    pub(crate) fn replace(&mut self, job: JobConfiguration) {
        let key = job.key();
        tracing::info!(job = %key, schedule = ?job.cron_schedule, "replacing cron job configuration");
        self.jobs.insert(key, job);
    }

    pub(crate) fn restore(&mut self, jobs: Vec<JobConfiguration>) {
        for job in jobs {
            self.jobs.insert(job.key(), job);
        }
    }

    /// The job's first fire time strictly after `after`, for the external
    /// trigger clock.
    pub fn next_fire_time(&self, key: &JobKey, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let schedule = self.jobs.get(key)?.cron_schedule.as_deref()?;
        cron::next_fire_time(schedule, after).ok().flatten()
    }
}

impl JobManager for CronJobManager {
    fn receive_job(
        &mut self,
        job: &JobConfiguration,
        _materializer: &mut Materializer<'_>,
    ) -> Result<bool> {
        let Some(schedule) = &job.cron_schedule else {
            return Ok(false);
        };
        let key = job.key();
        tracing::info!(job = %key, schedule = %schedule, "accepted cron job");
        self.jobs.insert(key, job.clone());
        Ok(true)
    }

    fn has_job(&self, key: &JobKey, _store: &TaskStore) -> bool {
        self.jobs.contains_key(key)
    }

    fn delete_job(&mut self, key: &JobKey) -> bool {
        let removed = self.jobs.remove(key).is_some();
        if removed {
            tracing::info!(job = %key, "removed cron job");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::TaskInfo;

    fn task_info(shard: u32) -> TaskInfo {
        TaskInfo {
            start_command: "date".to_string(),
            cpus: 1.0,
            ram_mb: 1024,
            disk_mb: 1024,
            ports: Vec::new(),
            shard_id: Some(shard),
            daemon: Some(false),
            max_task_failures: Some(1),
            priority: Some(0),
        }
    }

    fn immediate_job() -> JobConfiguration {
        JobConfiguration {
            owner: "owner".to_string(),
            name: "job".to_string(),
            task_configs: vec![task_info(0), task_info(1)],
            cron_schedule: None,
            cron_collision_policy: None,
        }
    }

    #[test]
    fn test_immediate_manager_materializes_on_accept() {
        let mut store = TaskStore::new();
        let mut counter = 0;
        let mut manager = ImmediateJobManager;

        let accepted = manager
            .receive_job(&immediate_job(), &mut Materializer::new(&mut store, &mut counter))
            .unwrap();

        assert!(accepted);
        assert_eq!(store.len(), 2);
        assert_eq!(counter, 2);
        assert!(manager.has_job(&JobKey::new("owner", "job"), &store));
    }

    #[test]
    fn test_immediate_manager_declines_cron_jobs() {
        let mut store = TaskStore::new();
        let mut counter = 0;
        let mut manager = ImmediateJobManager;

        let mut job = immediate_job();
        job.cron_schedule = Some("1 1 1 1 1".to_string());
        let accepted = manager
            .receive_job(&job, &mut Materializer::new(&mut store, &mut counter))
            .unwrap();

        assert!(!accepted);
        assert!(store.is_empty());
    }

    #[test]
    fn test_cron_manager_stores_without_materializing() {
        let mut store = TaskStore::new();
        let mut counter = 0;
        let mut manager = CronJobManager::default();

        let mut job = immediate_job();
        job.cron_schedule = Some("1 1 1 1 1".to_string());
        let accepted = manager
            .receive_job(&job, &mut Materializer::new(&mut store, &mut counter))
            .unwrap();

        assert!(accepted);
        assert!(store.is_empty());
        assert!(manager.has_job(&JobKey::new("owner", "job"), &store));
        assert!(manager.delete_job(&JobKey::new("owner", "job")));
        assert!(!manager.has_job(&JobKey::new("owner", "job"), &store));
    }

    #[test]
    fn test_cron_manager_declines_plain_jobs() {
        let mut store = TaskStore::new();
        let mut counter = 0;
        let mut manager = CronJobManager::default();

        let accepted = manager
            .receive_job(&immediate_job(), &mut Materializer::new(&mut store, &mut counter))
            .unwrap();
        assert!(!accepted);
    }

    #[test]
    fn test_next_fire_time() {
        let mut store = TaskStore::new();
        let mut counter = 0;
        let mut manager = CronJobManager::default();

        let mut job = immediate_job();
        job.cron_schedule = Some("* * * * *".to_string());
        manager
            .receive_job(&job, &mut Materializer::new(&mut store, &mut counter))
            .unwrap();

        let after = Utc::now();
        let next = manager.next_fire_time(&job.key(), after).unwrap();
        assert!(next > after);
    }
}
