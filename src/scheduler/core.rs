//! The scheduler facade.
//!
//! `SchedulerCore` coordinates job intake, offer matching, status updates,
//! reconciliation against slave reports, kill/restart, and job updates. It
//! is single-writer: every mutating operation takes `&mut self`, and the
//! embedding daemon wraps the core in `Arc<RwLock<_>>`. Driver kills are the
//! one piece of external I/O, and they run off the lock through the
//! WorkQueue.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::driver::{Driver, ExecutorStatus, ExecutorTracker, SchedulingFilter, UpdateLauncher};
use crate::error::{Result, SchedulerError};
use crate::persistence::PersistenceLayer;
use crate::scheduler::configuration;
use crate::scheduler::job_manager::{
    CronJobManager, ImmediateJobManager, JobManager, Materializer,
};
use crate::scheduler::reconcile::{ReconciliationEngine, RegisteredTaskUpdate};
use crate::scheduler::state_machine::{self, SideEffect, StatusSource};
use crate::scheduler::store::{TaskQuery, TaskStore};
use crate::scheduler::task::{
    Assignment, CronCollisionPolicy, JobConfiguration, JobKey, ResourceOffer, ScheduleStatus,
    ScheduledTask, TaskId, TaskInfo, TERMINAL_STATUSES,
};
use crate::scheduler::update::{self, JobUpdateResult, ShardDiff, UpdatePlan};
use crate::work_queue::WorkQueue;

/// Everything that survives a scheduler restart.
#[derive(Serialize, Deserialize)]
struct SchedulerSnapshot {
    task_id_counter: TaskId,
    framework_id: Option<String>,
    tasks: Vec<ScheduledTask>,
    cron_jobs: Vec<JobConfiguration>,
}

pub struct SchedulerCore {
    config: SchedulerConfig,
    store: TaskStore,
    task_id_counter: TaskId,
    cron: CronJobManager,
    immediate: ImmediateJobManager,
    reconciler: ReconciliationEngine,
    scheduling_filter: Arc<dyn SchedulingFilter>,
    update_launcher: Arc<dyn UpdateLauncher>,
    executor_tracker: Arc<dyn ExecutorTracker>,
    work_queue: Arc<dyn WorkQueue>,
    persistence: Arc<dyn PersistenceLayer>,
    driver: Option<Arc<dyn Driver>>,
    framework_id: Option<String>,
}

impl SchedulerCore {
    /// Build a scheduler, restoring the last snapshot if the persistence
    /// layer has one. The task id counter resumes where it left off so ids
    /// stay strictly increasing across restarts.
    pub fn new(
        config: SchedulerConfig,
        scheduling_filter: Arc<dyn SchedulingFilter>,
        update_launcher: Arc<dyn UpdateLauncher>,
        executor_tracker: Arc<dyn ExecutorTracker>,
        work_queue: Arc<dyn WorkQueue>,
        persistence: Arc<dyn PersistenceLayer>,
    ) -> Result<Self> {
        let reconciler = ReconciliationEngine::new(
            config.missing_task_grace_period,
            config.terminal_task_retention,
        );
        let mut core = Self {
            config,
            store: TaskStore::new(),
            task_id_counter: 0,
            cron: CronJobManager::default(),
            immediate: ImmediateJobManager,
            reconciler,
            scheduling_filter,
            update_launcher,
            executor_tracker,
            work_queue,
            persistence,
            driver: None,
            framework_id: None,
        };
        core.restore()?;
        Ok(core)
    }

    /// Bind the driver used for kill dispatches.
    pub fn registered(&mut self, driver: Arc<dyn Driver>, framework_id: impl Into<String>) {
        let framework_id = framework_id.into();
        tracing::info!(framework_id = %framework_id, "registered with cluster master");
        self.driver = Some(driver);
        self.framework_id = Some(framework_id);
        self.checkpoint();
    }

    /// Validate a job and route it through the manager chain. The job key
    /// must not be active in any manager; a cron job with no materialized
    /// tasks still blocks its key.
    pub fn create_job(&mut self, job: &JobConfiguration) -> Result<()> {
        let populated = configuration::validate_and_populate(job)?;
        let key = populated.key();
        if self.cron.has_job(&key, &self.store) || self.immediate.has_job(&key, &self.store) {
            return Err(SchedulerError::DuplicateJob(key));
        }

        let mut materializer = Materializer::new(&mut self.store, &mut self.task_id_counter);
        let mut accepted = false;
        for manager in [
            &mut self.cron as &mut dyn JobManager,
            &mut self.immediate as &mut dyn JobManager,
        ] {
            if manager.receive_job(&populated, &mut materializer)? {
                accepted = true;
                break;
            }
        }
        if !accepted {
            return Err(SchedulerError::JobNotAccepted(key));
        }

        tracing::info!(
            job = %key,
            tasks = populated.task_configs.len(),
            cron = populated.is_cron(),
            "job accepted"
        );
        self.checkpoint();
        Ok(())
    }

    /// Match a resource offer against the pending set. At most one task is
    /// placed per offer, lowest task id first; returns the launched task, or
    /// None to decline the offer.
    pub fn offer(
        &mut self,
        slave_id: &str,
        slave_host: &str,
        offer: &ResourceOffer,
    ) -> Option<ScheduledTask> {
        let policy = Arc::clone(&self.scheduling_filter);
        let filter = policy.make_filter(offer, slave_host);
        let pending = self.store.fetch(&TaskQuery::by_status(ScheduleStatus::Pending));
        let Some(candidate) = pending.into_iter().find(|task| filter(task)) else {
            tracing::debug!(slave_host, "no pending task matches offer; declining");
            return None;
        };

        let assignment = Assignment {
            slave_id: slave_id.to_string(),
            slave_host: slave_host.to_string(),
        };
        let launched = self
            .store
            .mutate(&TaskQuery::by_id(candidate.task_id), |task| {
                state_machine::assign(task, assignment.clone());
            })
            .pop()?;
        self.reconciler.record_heartbeat(launched.task_id, Instant::now());
        tracing::info!(
            task_id = launched.task_id,
            job = %launched.job,
            shard = launched.shard_id,
            slave_host,
            "task launched on slave"
        );
        self.checkpoint();
        Some(launched)
    }

    /// Drive the state machine for every task matching the query. Rejected
    /// transitions are logged and skipped; they are not errors.
    pub fn set_task_status(&mut self, query: &TaskQuery, status: ScheduleStatus) {
        self.apply_status(query, status, StatusSource::Direct);
        self.checkpoint();
    }

    /// Kill matching tasks: pending ones are removed outright, assigned
    /// active ones move to KILLED_BY_CLIENT with a driver kill enqueued, and
    /// a cron job matching the query's (owner, job) has its definition
    /// deleted. Killing already-terminal tasks is a no-op. Fails only when
    /// nothing at all matched.
    pub fn kill_tasks(&mut self, query: &TaskQuery) -> Result<()> {
        let mut cron_deleted = false;
        if let (Some(owner), Some(name)) = (query.owner(), query.job_name()) {
            cron_deleted = self.cron.delete_job(&JobKey::new(owner, name));
        }
        let matched = self.kill_matching(query);
        if matched == 0 && !cron_deleted {
            return Err(SchedulerError::NoMatchingTasks);
        }
        self.checkpoint();
        Ok(())
    }

    /// Restart the given tasks. Returns exactly the subset that were active;
    /// unknown and inactive ids are dropped. Each accepted task moves to
    /// KILLED_BY_CLIENT and a PENDING replacement is created on the same
    /// shard.
    pub fn restart_tasks(&mut self, task_ids: &HashSet<TaskId>) -> HashSet<TaskId> {
        let mut sorted: Vec<TaskId> = task_ids.iter().copied().collect();
        sorted.sort_unstable();

        let mut accepted = HashSet::new();
        for task_id in sorted {
            let Some(task) = self.store.fetch(&TaskQuery::by_id(task_id)).pop() else {
                tracing::info!(task_id, "restart requested for unknown task; ignoring");
                continue;
            };
            if !task.is_active() {
                tracing::info!(
                    task_id,
                    status = %task.status(),
                    "restart requested for inactive task; ignoring"
                );
                continue;
            }

            let had_assignment = task.slave_host().is_some();
            self.apply_status(
                &TaskQuery::by_id(task_id),
                ScheduleStatus::KilledByClient,
                StatusSource::Direct,
            );
            if had_assignment {
                self.enqueue_driver_kill(task_id);
            }
            if let Some(killed) = self.store.fetch(&TaskQuery::by_id(task_id)).pop() {
                self.reschedule(&killed);
            }
            accepted.insert(task_id);
        }
        self.checkpoint();
        accepted
    }

    /// Update a job in place where possible, or hand the change to the
    /// external rolling updater. Fails if no job with that key exists.
    pub fn update_job(&mut self, job: &JobConfiguration) -> Result<JobUpdateResult> {
        let populated = configuration::validate_and_populate(job)?;
        let key = populated.key();

        if let Some(existing) = self.cron.job(&key).cloned() {
            if update::configs_equal(&existing, &populated) {
                return Ok(JobUpdateResult::UnchangedCron);
            }
            self.cron.replace(populated);
            self.checkpoint();
            return Ok(JobUpdateResult::Completed);
        }

        let active = self.store.fetch(&TaskQuery::active_job(&key));
        if active.is_empty() {
            return Err(SchedulerError::JobNotFound(key));
        }
        let current = reconstruct_config(&key, &active);

        match update::plan(&current, &populated) {
            UpdatePlan::Unchanged => Ok(JobUpdateResult::Unchanged),
            UpdatePlan::LaunchUpdater => {
                tracing::info!(job = %key, "delegating update to the rolling updater");
                self.update_launcher.launch_updater(&populated);
                Ok(JobUpdateResult::UpdaterLaunched)
            }
            UpdatePlan::InPlace(diff) => {
                self.execute_in_place(&key, diff);
                self.checkpoint();
                Ok(JobUpdateResult::Completed)
            }
        }
    }

    /// Reconcile against one slave's reported task inventory.
    ///
    /// Reports for tasks this slave does not own are ignored. Known tasks
    /// get their heartbeat and volatile resources refreshed, and a differing
    /// status drives the state machine with slave authority. Live tasks the
    /// slave failed to mention become LOST once their grace period elapses;
    /// forgotten terminal tasks age out of the store after the retention
    /// window.
    pub fn update_registered_tasks(&mut self, update: &RegisteredTaskUpdate) {
        let now = Instant::now();
        let slave_host = update.slave_host.as_str();
        let mut reported: HashSet<TaskId> = HashSet::new();

        for live in &update.task_infos {
            reported.insert(live.task_id);
            let Some(task) = self.store.fetch(&TaskQuery::by_id(live.task_id)).pop() else {
                tracing::warn!(
                    task_id = live.task_id,
                    slave_host,
                    "slave reported an unknown task; ignoring"
                );
                continue;
            };
            if task.slave_host() != Some(slave_host) {
                tracing::warn!(
                    task_id = live.task_id,
                    slave_host,
                    recorded = ?task.slave_host(),
                    "slave reported a task it does not own; ignoring"
                );
                continue;
            }

            self.reconciler.record_heartbeat(live.task_id, now);
            if let Some(resources) = &live.resources {
                self.store.mutate(&TaskQuery::by_id(live.task_id), |t| {
                    t.resources = Some(resources.clone());
                });
            }
            if task.status() != live.status {
                self.apply_status(
                    &TaskQuery::by_id(live.task_id),
                    live.status,
                    StatusSource::Reconciled,
                );
            }
        }

        // Live tasks this slave should have vouched for but did not.
        let host = update.slave_host.clone();
        let expected = self.store.fetch(
            &TaskQuery::by_statuses([ScheduleStatus::Starting, ScheduleStatus::Running])
                .filtered(move |t| t.slave_host() == Some(host.as_str())),
        );
        for task in expected {
            if reported.contains(&task.task_id) {
                continue;
            }
            if self.reconciler.lost_deadline_passed(task.task_id, now) {
                tracing::warn!(
                    task_id = task.task_id,
                    slave_host,
                    "slave no longer reports live task; marking lost"
                );
                self.apply_status(
                    &TaskQuery::by_id(task.task_id),
                    ScheduleStatus::Lost,
                    StatusSource::Reconciled,
                );
                self.reconciler.forget(task.task_id);
            }
        }

        // Terminal history the slave has forgotten ages out of the store.
        let host = update.slave_host.clone();
        let terminal = self.store.fetch(
            &TaskQuery::by_statuses(TERMINAL_STATUSES)
                .filtered(move |t| t.slave_host() == Some(host.as_str())),
        );
        for task in terminal {
            if reported.contains(&task.task_id) {
                continue;
            }
            if self.reconciler.retention_expired(task.task_id, now) {
                tracing::info!(
                    task_id = task.task_id,
                    slave_host,
                    status = %task.status(),
                    "dropping terminal task its slave no longer reports"
                );
                self.store.remove(&TaskQuery::by_id(task.task_id));
                self.reconciler.forget(task.task_id);
            }
        }

        self.checkpoint();
    }

    /// Materialize a cron job's tasks because its schedule fired. Invoked by
    /// the external trigger clock.
    pub fn cron_triggered(&mut self, key: &JobKey) -> Result<()> {
        let Some(job) = self.cron.job(key).cloned() else {
            return Err(SchedulerError::JobNotFound(key.clone()));
        };

        let active = self.store.fetch(&TaskQuery::active_job(key));
        if !active.is_empty() {
            match job.cron_collision_policy.unwrap_or_default() {
                CronCollisionPolicy::KillExisting => {
                    tracing::info!(
                        job = %key,
                        active = active.len(),
                        "cron fired with live tasks; killing the existing run"
                    );
                    self.kill_matching(&TaskQuery::active_job(key));
                }
                CronCollisionPolicy::CancelNew => {
                    tracing::info!(job = %key, "cron fired with live tasks; cancelling this run");
                    return Ok(());
                }
                CronCollisionPolicy::RunOverlap => {
                    tracing::warn!(job = %key, "cron fired with live tasks; scheduling overlapping run");
                }
            }
        }

        let mut materializer = Materializer::new(&mut self.store, &mut self.task_id_counter);
        materializer.materialize(&job)?;
        self.checkpoint();
        Ok(())
    }

    /// Forward an executor status report and treat it as a heartbeat for the
    /// slave's live tasks.
    pub fn executor_status(&mut self, status: &ExecutorStatus) {
        let now = Instant::now();
        let host = status.slave_host.clone();
        let live = self.store.fetch(
            &TaskQuery::by_statuses([ScheduleStatus::Starting, ScheduleStatus::Running])
                .filtered(move |t| t.slave_host() == Some(host.as_str())),
        );
        for task in live {
            self.reconciler.record_heartbeat(task.task_id, now);
        }
        self.executor_tracker.add_status(status);
    }

    pub fn get_tasks(&self, query: &TaskQuery) -> Vec<ScheduledTask> {
        self.store.fetch(query)
    }

    pub fn cron_jobs(&self) -> Vec<JobConfiguration> {
        self.cron.jobs().cloned().collect()
    }

    pub fn has_cron_job(&self, key: &JobKey) -> bool {
        self.cron.has_job(key, &self.store)
    }

    /// The job's next firing strictly after now, for the trigger clock.
    pub fn next_cron_fire_time(&self, key: &JobKey) -> Option<DateTime<Utc>> {
        self.cron.next_fire_time(key, Utc::now())
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn apply_status(&mut self, query: &TaskQuery, status: ScheduleStatus, source: StatusSource) {
        let mut to_reschedule = Vec::new();
        self.store.mutate(query, |task| {
            if let Some(SideEffect::Reschedule) = state_machine::apply(task, status, source) {
                to_reschedule.push(task.clone());
            }
        });
        for task in to_reschedule {
            self.reschedule(&task);
        }
    }

    /// Create the PENDING replacement for a task that just went terminal.
    fn reschedule(&mut self, terminal: &ScheduledTask) {
        self.task_id_counter += 1;
        let replacement = terminal.replacement(self.task_id_counter, Utc::now());
        tracing::info!(
            task_id = replacement.task_id,
            ancestor = terminal.task_id,
            job = %terminal.job,
            shard = terminal.shard_id,
            "rescheduling task"
        );
        if let Err(e) = self.store.add(vec![replacement]) {
            tracing::error!(error = %e, "could not insert rescheduled task");
        }
    }

    /// Kill every task matching the query, without touching cron
    /// definitions. Returns how many tasks matched at all.
    fn kill_matching(&mut self, query: &TaskQuery) -> usize {
        let matches = self.store.fetch(query);
        let total = matches.len();

        let mut pending_ids = Vec::new();
        let mut to_kill = Vec::new();
        for task in matches {
            match task.status() {
                ScheduleStatus::Pending => pending_ids.push(task.task_id),
                status if status.is_active() => to_kill.push(task.task_id),
                _ => {}
            }
        }

        if !pending_ids.is_empty() {
            let removed = self.store.remove(&TaskQuery::by_ids(pending_ids));
            tracing::info!(count = removed.len(), "removed pending tasks");
        }
        for task_id in to_kill {
            self.apply_status(
                &TaskQuery::by_id(task_id),
                ScheduleStatus::KilledByClient,
                StatusSource::Direct,
            );
            self.enqueue_driver_kill(task_id);
        }
        total
    }

    fn enqueue_driver_kill(&self, task_id: TaskId) {
        let Some(driver) = self.driver.clone() else {
            tracing::warn!(task_id, "no driver registered; cannot dispatch kill");
            return;
        };
        self.work_queue.do_work(Box::new(move || {
            let code = driver.kill_task(task_id);
            tracing::info!(task_id, code, "driver kill dispatched");
            code == 0
        }));
    }

    fn execute_in_place(&mut self, key: &JobKey, diff: ShardDiff) {
        for (shard, info) in diff.retained {
            let shard_query = TaskQuery::active_job(key).filtered(move |t| t.shard_id == shard);
            let updated = self.store.mutate(&shard_query, |task| {
                task.info = info.clone();
            });
            if updated.is_empty() {
                // The shard's prior task ended or was removed; bring it back
                // fresh with no ancestor.
                self.create_pending(key, shard, info);
            }
        }
        for (shard, info) in diff.added {
            self.create_pending(key, shard, info);
        }
        if !diff.removed.is_empty() {
            let retired: HashSet<u32> = diff.removed.iter().copied().collect();
            let query = TaskQuery::active_job(key).filtered(move |t| retired.contains(&t.shard_id));
            let matched = self.kill_matching(&query);
            tracing::info!(job = %key, shards = ?diff.removed, matched, "retired shards");
        }
    }

    fn create_pending(&mut self, key: &JobKey, shard: u32, info: TaskInfo) {
        self.task_id_counter += 1;
        let task = ScheduledTask::pending(
            self.task_id_counter,
            key.clone(),
            shard,
            info,
            Utc::now(),
        );
        tracing::info!(task_id = task.task_id, job = %key, shard, "creating pending task");
        if let Err(e) = self.store.add(vec![task]) {
            tracing::error!(error = %e, "could not insert pending task");
        }
    }

    fn restore(&mut self) -> Result<()> {
        let Some(bytes) = self.persistence.fetch()? else {
            return Ok(());
        };
        let snapshot: SchedulerSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| SchedulerError::Persistence(format!("corrupt snapshot: {e}")))?;
        self.task_id_counter = snapshot.task_id_counter;
        self.framework_id = snapshot.framework_id;
        self.cron.restore(snapshot.cron_jobs);
        self.store.add(snapshot.tasks)?;
        tracing::info!(
            tasks = self.store.len(),
            next_task_id = self.task_id_counter + 1,
            "restored scheduler state from snapshot"
        );
        Ok(())
    }

    /// Persist a snapshot. Failures are logged and swallowed: the triggering
    /// operation has already committed, and recovery degrades to the last
    /// snapshot that stuck.
    fn checkpoint(&self) {
        let snapshot = SchedulerSnapshot {
            task_id_counter: self.task_id_counter,
            framework_id: self.framework_id.clone(),
            tasks: self.store.fetch(&TaskQuery::all()),
            cron_jobs: self.cron.jobs().cloned().collect(),
        };
        match serde_json::to_vec(&snapshot) {
            Ok(bytes) => {
                if let Err(e) = self.persistence.persist(&bytes) {
                    tracing::warn!(error = %e, "failed to persist scheduler snapshot");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode scheduler snapshot"),
        }
    }
}

/// The configuration a non-cron job is currently running, reconstructed from
/// its active tasks.
fn reconstruct_config(key: &JobKey, active: &[ScheduledTask]) -> JobConfiguration {
    JobConfiguration {
        owner: key.owner.clone(),
        name: key.name.clone(),
        task_configs: active.iter().map(|t| t.info.clone()).collect(),
        cron_schedule: None,
        cron_collision_policy: None,
    }
}
