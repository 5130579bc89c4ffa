//! Integration tests for the job update planner and its execution.


use std::collections::HashSet;

use drover::error::SchedulerError;
use drover::scheduler::store::TaskQuery;
use drover::scheduler::task::{JobKey, ScheduleStatus, TaskId, TaskInfo};
use drover::scheduler::update::JobUpdateResult;

use harness::*;

fn prioritized(priority: i32) -> TaskInfo {
    let mut task = default_task();
    task.priority = Some(priority);
    task
}

#[test]
fn test_update_unchanged_job() {
    let mut s = scheduler();
    s.core
        .create_job(&make_job(OWNER_A, JOB_A, default_task(), 1))
        .unwrap();

    let result = s
        .core
        .update_job(&make_job(OWNER_A, JOB_A, default_task(), 1))
        .unwrap();
    assert_eq!(result, JobUpdateResult::Unchanged);
    assert_eq!(s.launcher.launch_count(), 0);
}

#[test]
fn test_update_start_command_launches_updater() {
    let mut s = scheduler();
    let mut task = default_task();
    task.start_command = "echo 'hello'".to_string();
    s.core
        .create_job(&make_job(OWNER_A, JOB_A, task, 1))
        .unwrap();

    let mut updated = default_task();
    updated.start_command = "echo 'hi'".to_string();
    let result = s
        .core
        .update_job(&make_job(OWNER_A, JOB_A, updated, 1))
        .unwrap();

    assert_eq!(result, JobUpdateResult::UpdaterLaunched);
    assert_eq!(s.launcher.launch_count(), 1);
}

#[test]
fn test_update_nonexistent_job_rejected() {
    let mut s = scheduler();
    s.core
        .create_job(&make_job(OWNER_A, JOB_A, default_task(), 1))
        .unwrap();

    let err = s
        .core
        .update_job(&make_job(OWNER_B, JOB_A, default_task(), 1))
        .unwrap_err();
    assert!(matches!(err, SchedulerError::JobNotFound(_)));
}

#[test]
fn test_update_priority_applies_in_place() {
    let mut s = scheduler();
    s.core
        .create_job(&make_job(OWNER_A, JOB_A, default_task(), 1))
        .unwrap();
    s.advance_to_running(OWNER_A, SLAVE_HOST_1);
    let task_id = s.only_task(&TaskQuery::by_owner(OWNER_A)).task_id;

    let result = s
        .core
        .update_job(&make_job(OWNER_A, JOB_A, prioritized(100), 1))
        .unwrap();
    assert_eq!(result, JobUpdateResult::Completed);

    // The running task keeps running; only its embedded config changed.
    let task = s.only_task(&TaskQuery::by_id(task_id));
    assert_eq!(task.status(), ScheduleStatus::Running);
    assert_eq!(task.info.priority, Some(100));
    assert_eq!(s.launcher.launch_count(), 0);
}

/// Build a ten-shard job whose shards sit in every lifecycle state, keyed by
/// a distinct priority so the test can address each one.
///
/// Shards 0..4: pending, starting, running, finished, killed-while-pending.
/// Shards 5..9: the same again.
fn ten_shard_fixture(s: &mut TestScheduler) -> Vec<TaskId> {
    let infos: Vec<TaskInfo> = (1..=10).map(prioritized).collect();
    s.core
        .create_job(&make_job_from(OWNER_A, JOB_A, infos))
        .unwrap();

    let id_of = |s: &TestScheduler, priority: i32| {
        s.only_task(&TaskQuery::all().filtered(move |t| t.info.priority == Some(priority)))
            .task_id
    };
    let ids: Vec<TaskId> = (1..=10).map(|p| id_of(s, p)).collect();

    for (index, &task_id) in ids.iter().enumerate() {
        let shard_state = index % 5;
        if shard_state == 0 {
            continue; // stays pending
        }
        if shard_state == 4 {
            // Killed while still pending: removed from the store outright.
            s.core.kill_tasks(&TaskQuery::by_id(task_id)).unwrap();
            continue;
        }
        s.filter.set(move |t| t.task_id == task_id);
        s.core
            .offer(SLAVE_ID, SLAVE_HOST_1, &standard_offer())
            .expect("targeted offer should launch the shard");
        if shard_state >= 2 {
            s.core
                .set_task_status(&TaskQuery::by_id(task_id), ScheduleStatus::Running);
        }
        if shard_state == 3 {
            s.core
                .set_task_status(&TaskQuery::by_id(task_id), ScheduleStatus::Finished);
        }
    }
    s.filter.accept_all();
    ids
}

#[test]
fn test_update_removes_and_reincarnates_shards() {
    let mut s = scheduler();
    let ids = ten_shard_fixture(&mut s);

    // Shrink from ten shards to five.
    let result = s
        .core
        .update_job(&make_job_from(
            OWNER_A,
            JOB_A,
            (1..=5).map(prioritized).collect(),
        ))
        .unwrap();
    assert_eq!(result, JobUpdateResult::Completed);

    // The two live tasks on retired shards get driver kills.
    assert_eq!(s.work_queue.run_all(), vec![true, true]);
    assert_eq!(
        s.driver.killed().into_iter().collect::<HashSet<_>>(),
        HashSet::from([ids[6], ids[7]])
    );

    let status_of = |s: &TestScheduler, id: TaskId| s.only_task(&TaskQuery::by_id(id)).status();

    // Retained shards keep their tasks.
    assert_eq!(status_of(&s, ids[0]), ScheduleStatus::Pending);
    assert_eq!(status_of(&s, ids[1]), ScheduleStatus::Starting);
    assert_eq!(status_of(&s, ids[2]), ScheduleStatus::Running);
    // The finished shard stays as history and is reincarnated fresh.
    assert_eq!(status_of(&s, ids[3]), ScheduleStatus::Finished);
    // Both killed-while-pending shards are long gone.
    assert!(s.core.get_tasks(&TaskQuery::by_id(ids[4])).is_empty());
    assert!(s.core.get_tasks(&TaskQuery::by_id(ids[9])).is_empty());
    // Retired shards: the pending one was removed, the live ones were
    // killed, the finished one is untouched history.
    assert!(s.core.get_tasks(&TaskQuery::by_id(ids[5])).is_empty());
    assert_eq!(status_of(&s, ids[6]), ScheduleStatus::KilledByClient);
    assert_eq!(status_of(&s, ids[7]), ScheduleStatus::KilledByClient);
    assert_eq!(status_of(&s, ids[8]), ScheduleStatus::Finished);

    // Active set: shards 0..2 survive, shards 3 and 4 were reincarnated.
    let active = s
        .core
        .get_tasks(&TaskQuery::active_job(&JobKey::new(OWNER_A, JOB_A)));
    assert_eq!(active.len(), 5);
    let reincarnated: Vec<_> = active
        .iter()
        .filter(|t| t.shard_id == 3 || t.shard_id == 4)
        .collect();
    assert_eq!(reincarnated.len(), 2);
    for task in reincarnated {
        assert_eq!(task.status(), ScheduleStatus::Pending);
        assert_eq!(task.ancestor_id, None);
    }
}

#[test]
fn test_update_adds_shards() {
    let mut s = scheduler();
    let infos: Vec<TaskInfo> = (1..=5).map(prioritized).collect();
    s.core
        .create_job(&make_job_from(OWNER_A, JOB_A, infos.clone()))
        .unwrap();

    let id_of = |s: &TestScheduler, priority: i32| {
        s.only_task(&TaskQuery::all().filtered(move |t| t.info.priority == Some(priority)))
            .task_id
    };

    // Shard 1 starting, shard 2 running, shard 3 finished, shard 4 killed
    // while pending.
    let starting = id_of(&s, 2);
    s.filter.set(move |t| t.task_id == starting);
    s.core.offer(SLAVE_ID, SLAVE_HOST_1, &standard_offer()).unwrap();
    let running = id_of(&s, 3);
    s.filter.set(move |t| t.task_id == running);
    s.core.offer(SLAVE_ID, SLAVE_HOST_1, &standard_offer()).unwrap();
    s.core
        .set_task_status(&TaskQuery::by_id(running), ScheduleStatus::Running);
    let finished = id_of(&s, 4);
    s.filter.set(move |t| t.task_id == finished);
    s.core.offer(SLAVE_ID, SLAVE_HOST_1, &standard_offer()).unwrap();
    s.core
        .set_task_status(&TaskQuery::by_id(finished), ScheduleStatus::Running);
    s.core
        .set_task_status(&TaskQuery::by_id(finished), ScheduleStatus::Finished);
    let killed = id_of(&s, 5);
    s.core.kill_tasks(&TaskQuery::by_id(killed)).unwrap();
    s.filter.accept_all();

    // Grow from five shards to eight.
    let grown: Vec<TaskInfo> = (1..=8).map(prioritized).collect();
    let result = s
        .core
        .update_job(&make_job_from(OWNER_A, JOB_A, grown))
        .unwrap();
    assert_eq!(result, JobUpdateResult::Completed);

    // 0..2 survive; 3 and 4 are reincarnated; 5..7 are brand new.
    let active = s
        .core
        .get_tasks(&TaskQuery::active_job(&JobKey::new(OWNER_A, JOB_A)));
    assert_eq!(active.len(), 8);
    for shard in [5u32, 6, 7] {
        let task = active
            .iter()
            .find(|t| t.shard_id == shard)
            .expect("added shard should be active");
        assert_eq!(task.status(), ScheduleStatus::Pending);
        assert_eq!(task.ancestor_id, None);
    }
}

#[test]
fn test_update_cron_job_replaces_schedule() {
    let mut s = scheduler();
    let old_schedule = "1 1 1 1 1";
    s.core
        .create_job(&cron_job(OWNER_A, JOB_A, default_task(), 1, old_schedule))
        .unwrap();

    let new_schedule = "* * * * 1";
    let result = s
        .core
        .update_job(&cron_job(OWNER_A, JOB_A, default_task(), 1, new_schedule))
        .unwrap();
    assert_eq!(result, JobUpdateResult::Completed);

    let jobs = s.core.cron_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].cron_schedule.as_deref(), Some(new_schedule));
}

#[test]
fn test_update_cron_job_unchanged() {
    let mut s = scheduler();
    s.core
        .create_job(&cron_job(OWNER_A, JOB_A, default_task(), 1, "1 1 1 1 1"))
        .unwrap();
    let original = s.core.cron_jobs().pop().unwrap();

    let result = s
        .core
        .update_job(&cron_job(OWNER_A, JOB_A, default_task(), 1, "1 1 1 1 1"))
        .unwrap();
    assert_eq!(result, JobUpdateResult::UnchangedCron);
    assert_eq!(s.core.cron_jobs().pop().unwrap(), original);
}
