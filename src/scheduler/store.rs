use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::error::{Result, SchedulerError};
use crate::scheduler::task::{JobKey, ScheduleStatus, ScheduledTask, TaskId, ACTIVE_STATUSES};

type Predicate = Arc<dyn Fn(&ScheduledTask) -> bool + Send + Sync>;

/// Selection over the task store. All provided fields must match
/// (conjunction); the optional predicate runs as the final stage.
#[derive(Clone, Default)]
pub struct TaskQuery {
    owner: Option<String>,
    job_name: Option<String>,
    task_ids: Option<HashSet<TaskId>>,
    statuses: Option<HashSet<ScheduleStatus>>,
    predicate: Option<Predicate>,
}

impl std::fmt::Debug for TaskQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQuery")
            .field("owner", &self.owner)
            .field("job_name", &self.job_name)
            .field("task_ids", &self.task_ids)
            .field("statuses", &self.statuses)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl TaskQuery {
    /// Matches every task in the store.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: TaskId) -> Self {
        Self::by_ids([id])
    }

    pub fn by_ids(ids: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            task_ids: Some(ids.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn by_status(status: ScheduleStatus) -> Self {
        Self::by_statuses([status])
    }

    pub fn by_statuses(statuses: impl IntoIterator<Item = ScheduleStatus>) -> Self {
        Self {
            statuses: Some(statuses.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn by_owner(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..Self::default()
        }
    }

    pub fn by_job(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            job_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// The PENDING/STARTING/RUNNING tasks of one job.
    pub fn active_job(key: &JobKey) -> Self {
        Self::by_job(key.owner.clone(), key.name.clone()).with_statuses(ACTIVE_STATUSES)
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = Some(name.into());
        self
    }

    pub fn with_status(self, status: ScheduleStatus) -> Self {
        self.with_statuses([status])
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = ScheduleStatus>) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    pub fn with_ids(mut self, ids: impl IntoIterator<Item = TaskId>) -> Self {
        self.task_ids = Some(ids.into_iter().collect());
        self
    }

    /// Attach an arbitrary predicate, evaluated after the indexed fields.
    pub fn filtered(
        mut self,
        predicate: impl Fn(&ScheduledTask) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn job_name(&self) -> Option<&str> {
        self.job_name.as_deref()
    }

    fn matches(&self, task: &ScheduledTask) -> bool {
        if let Some(owner) = &self.owner {
            if &task.job.owner != owner {
                return false;
            }
        }
        if let Some(name) = &self.job_name {
            if &task.job.name != name {
                return false;
            }
        }
        if let Some(ids) = &self.task_ids {
            if !ids.contains(&task.task_id) {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&task.status()) {
                return false;
            }
        }
        if let Some(predicate) = &self.predicate {
            if !predicate(task) {
                return false;
            }
        }
        true
    }
}

/// Indexed collection of all scheduled tasks, live and historical.
///
/// Backed by an id-ordered map, so iteration is always in ascending task-id
/// order (which is also insertion order, since ids increase monotonically).
/// Secondary indices by owner and status narrow query candidate sets; the
/// remaining conjuncts and the predicate run as a final filter stage.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: BTreeMap<TaskId, ScheduledTask>,
    by_owner: HashMap<String, BTreeSet<TaskId>>,
    by_status: HashMap<ScheduleStatus, BTreeSet<TaskId>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert new tasks. Rejects the whole batch if any id is already
    /// present.
    pub fn add(&mut self, tasks: Vec<ScheduledTask>) -> Result<()> {
        for task in &tasks {
            if self.tasks.contains_key(&task.task_id) {
                return Err(SchedulerError::DuplicateTaskId(task.task_id));
            }
        }
        for task in tasks {
            self.index_insert(&task);
            self.tasks.insert(task.task_id, task);
        }
        Ok(())
    }

    /// Atomically apply `mutation` to every matching task. Returns the
    /// updated tasks, in id order.
    pub fn mutate(
        &mut self,
        query: &TaskQuery,
        mut mutation: impl FnMut(&mut ScheduledTask),
    ) -> Vec<ScheduledTask> {
        let ids = self.matching_ids(query);
        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(task) = self.tasks.get_mut(&id) {
                let old_status = task.status();
                mutation(task);
                let new_status = task.status();
                let snapshot = task.clone();
                if new_status != old_status {
                    if let Some(index) = self.by_status.get_mut(&old_status) {
                        index.remove(&id);
                    }
                    self.by_status.entry(new_status).or_default().insert(id);
                }
                updated.push(snapshot);
            }
        }
        updated
    }

    /// Delete every matching task. Returns the removed tasks.
    pub fn remove(&mut self, query: &TaskQuery) -> Vec<ScheduledTask> {
        let ids = self.matching_ids(query);
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(task) = self.tasks.remove(&id) {
                self.index_remove(&task);
                removed.push(task);
            }
        }
        removed
    }

    /// Snapshot of every matching task, in id order.
    pub fn fetch(&self, query: &TaskQuery) -> Vec<ScheduledTask> {
        self.matching_ids(query)
            .into_iter()
            .filter_map(|id| self.tasks.get(&id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Candidate ids from the narrowest applicable index, then the full
    /// conjunction, ascending.
    fn matching_ids(&self, query: &TaskQuery) -> Vec<TaskId> {
        let candidates: Vec<TaskId> = if let Some(ids) = &query.task_ids {
            let mut sorted: Vec<TaskId> = ids.iter().copied().collect();
            sorted.sort_unstable();
            sorted
        } else if let Some(owner) = &query.owner {
            self.by_owner
                .get(owner)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default()
        } else if let Some(statuses) = &query.statuses {
            let mut merged = BTreeSet::new();
            for status in statuses {
                if let Some(set) = self.by_status.get(status) {
                    merged.extend(set.iter().copied());
                }
            }
            merged.into_iter().collect()
        } else {
            self.tasks.keys().copied().collect()
        };

        candidates
            .into_iter()
            .filter(|id| self.tasks.get(id).is_some_and(|t| query.matches(t)))
            .collect()
    }

    fn index_insert(&mut self, task: &ScheduledTask) {
        self.by_owner
            .entry(task.job.owner.clone())
            .or_default()
            .insert(task.task_id);
        self.by_status
            .entry(task.status())
            .or_default()
            .insert(task.task_id);
    }

    fn index_remove(&mut self, task: &ScheduledTask) {
        if let Some(set) = self.by_owner.get_mut(&task.job.owner) {
            set.remove(&task.task_id);
        }
        if let Some(set) = self.by_status.get_mut(&task.status()) {
            set.remove(&task.task_id);
        }
    }
}
