//! Diff engine for job updates.
//!
//! Given the configuration a job is currently running and a proposed
//! replacement, decides whether the change is a no-op, can be applied in
//! place (policy-only field changes and shard set changes), or needs the
//! external rolling updater (anything that changes what actually runs).

use std::collections::BTreeMap;

use crate::scheduler::task::{JobConfiguration, TaskInfo};

/// Outcome of `SchedulerCore::update_job`, reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobUpdateResult {
    Unchanged,
    UnchangedCron,
    Completed,
    UpdaterLaunched,
}

/// How to carry out an update of a non-cron job.
#[derive(Debug)]
pub enum UpdatePlan {
    Unchanged,
    InPlace(ShardDiff),
    LaunchUpdater,
}

#[derive(Debug, Default)]
pub struct ShardDiff {
    /// Shards present only in the new configuration: create fresh PENDING
    /// tasks.
    pub added: Vec<(u32, TaskInfo)>,
    /// Shards present only in the old configuration: kill their active
    /// tasks.
    pub removed: Vec<u32>,
    /// Shards present in both: refresh the embedded task info in place, and
    /// reincarnate the shard if no active task survives for it.
    pub retained: Vec<(u32, TaskInfo)>,
}

/// Configuration equality over the populated form, insensitive to task
/// ordering: same key, same schedule and collision policy, same per-shard
/// task infos.
pub fn configs_equal(old: &JobConfiguration, new: &JobConfiguration) -> bool {
    old.owner == new.owner
        && old.name == new.name
        && old.cron_schedule == new.cron_schedule
        && old.cron_collision_policy == new.cron_collision_policy
        && shard_map(old) == shard_map(new)
}

/// Plan an update of a non-cron job. Both configurations must be populated.
pub fn plan(old: &JobConfiguration, new: &JobConfiguration) -> UpdatePlan {
    if configs_equal(old, new) {
        return UpdatePlan::Unchanged;
    }
    // Attaching a schedule to a live job cannot be applied in place.
    if old.cron_schedule != new.cron_schedule {
        return UpdatePlan::LaunchUpdater;
    }

    let old_shards = shard_map(old);
    let new_shards = shard_map(new);

    let mut diff = ShardDiff::default();
    for (&shard, &info) in &new_shards {
        match old_shards.get(&shard) {
            None => diff.added.push((shard, info.clone())),
            Some(&prior) => {
                if !runtime_fields_equal(prior, info) {
                    return UpdatePlan::LaunchUpdater;
                }
                diff.retained.push((shard, info.clone()));
            }
        }
    }
    for &shard in old_shards.keys() {
        if !new_shards.contains_key(&shard) {
            diff.removed.push(shard);
        }
    }

    UpdatePlan::InPlace(diff)
}

fn shard_map(job: &JobConfiguration) -> BTreeMap<u32, &TaskInfo> {
    job.task_configs
        .iter()
        .filter_map(|t| t.shard_id.map(|shard| (shard, t)))
        .collect()
}

/// True when the two infos agree on everything that changes what runs on the
/// slave. Priority and the failure budget are scheduler-side policy and may
/// be changed in place.
fn runtime_fields_equal(a: &TaskInfo, b: &TaskInfo) -> bool {
    a.start_command == b.start_command
        && a.cpus == b.cpus
        && a.ram_mb == b.ram_mb
        && a.disk_mb == b.disk_mb
        && a.ports == b.ports
        && a.daemon == b.daemon
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(shard: u32) -> TaskInfo {
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

    fn job(tasks: Vec<TaskInfo>) -> JobConfiguration {
        JobConfiguration {
            owner: "owner".to_string(),
            name: "job".to_string(),
            task_configs: tasks,
            cron_schedule: None,
            cron_collision_policy: None,
        }
    }

    #[test]
    fn test_identical_configs_unchanged() {
        let old = job(vec![info(0), info(1)]);
        let new = job(vec![info(1), info(0)]); // order does not matter
        assert!(matches!(plan(&old, &new), UpdatePlan::Unchanged));
    }

    #[test]
    fn test_priority_change_applies_in_place() {
        let old = job(vec![info(0)]);
        let mut changed = info(0);
        changed.priority = Some(100);
        let new = job(vec![changed]);

        match plan(&old, &new) {
            UpdatePlan::InPlace(diff) => {
                assert!(diff.added.is_empty());
                assert!(diff.removed.is_empty());
                assert_eq!(diff.retained.len(), 1);
                assert_eq!(diff.retained[0].1.priority, Some(100));
            }
            other => panic!("expected in-place plan, got {other:?}"),
        }
    }

    #[test]
    fn test_failure_budget_change_applies_in_place() {
        let old = job(vec![info(0)]);
        let mut changed = info(0);
        changed.max_task_failures = Some(9);
        let new = job(vec![changed]);
        assert!(matches!(plan(&old, &new), UpdatePlan::InPlace(_)));
    }

    #[test]
    fn test_start_command_change_needs_updater() {
        let old = job(vec![info(0)]);
        let mut changed = info(0);
        changed.start_command = "echo hi".to_string();
        let new = job(vec![changed]);
        assert!(matches!(plan(&old, &new), UpdatePlan::LaunchUpdater));
    }

    #[test]
    fn test_resource_change_needs_updater() {
        let old = job(vec![info(0)]);
        let mut changed = info(0);
        changed.ram_mb = 4096;
        let new = job(vec![changed]);
        assert!(matches!(plan(&old, &new), UpdatePlan::LaunchUpdater));
    }

    #[test]
    fn test_shard_set_diff() {
        // Shards 0..3 -> 0..2: shard 2 removed.
        let old = job(vec![info(0), info(1), info(2)]);
        let new = job(vec![info(0), info(1)]);
        match plan(&old, &new) {
            UpdatePlan::InPlace(diff) => {
                assert!(diff.added.is_empty());
                assert_eq!(diff.removed, vec![2]);
                assert_eq!(diff.retained.len(), 2);
            }
            other => panic!("expected in-place plan, got {other:?}"),
        }

        // Shards 0..2 -> 0..4: shards 2 and 3 added.
        let old = job(vec![info(0), info(1)]);
        let new = job(vec![info(0), info(1), info(2), info(3)]);
        match plan(&old, &new) {
            UpdatePlan::InPlace(diff) => {
                let added: Vec<u32> = diff.added.iter().map(|(s, _)| *s).collect();
                assert_eq!(added, vec![2, 3]);
                assert!(diff.removed.is_empty());
            }
            other => panic!("expected in-place plan, got {other:?}"),
        }
    }

    #[test]
    fn test_adding_cron_schedule_needs_updater() {
        let old = job(vec![info(0)]);
        let mut new = job(vec![info(0)]);
        new.cron_schedule = Some("1 1 1 1 1".to_string());
        assert!(matches!(plan(&old, &new), UpdatePlan::LaunchUpdater));
    }
}
