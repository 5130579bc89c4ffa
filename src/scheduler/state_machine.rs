//! The canonical status-transition table for a task.
//!
//! Transitions only ever move forward: PENDING -> STARTING -> RUNNING -> a
//! terminal state, with LOST and KILLED_BY_CLIENT reachable straight from
//! PENDING. Terminal states are frozen. Anything else is rejected and logged;
//! stray reports are routine in a cluster and must not destabilize the
//! scheduler, so a rejection is not an error to the caller.

use crate::scheduler::task::{Assignment, ScheduleStatus, ScheduledTask, TaskLifecycle};

/// Who is asserting a status change. The slave is authoritative during
/// reconciliation: a KILLED it reports for a task the scheduler believes live
/// means the cluster restarted underneath it, and the task must run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    /// A status update delivered through `set_task_status`.
    Direct,
    /// A status observed while reconciling a slave's task inventory.
    Reconciled,
}

/// What the scheduler must do after a committed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    None,
    /// Create a PENDING replacement with ancestor = this task.
    Reschedule,
}

/// Move a PENDING task onto a slave. Returns false (and leaves the task
/// untouched) if the task is no longer PENDING.
pub fn assign(task: &mut ScheduledTask, assignment: Assignment) -> bool {
    match task.lifecycle {
        TaskLifecycle::Pending => {
            task.lifecycle = TaskLifecycle::Starting(assignment);
            true
        }
        _ => {
            tracing::warn!(
                task_id = task.task_id,
                status = %task.status(),
                "cannot assign a task that is not pending"
            );
            false
        }
    }
}

/// Apply `target` to the task in place. Returns the side effect of the
/// committed transition, or None if the transition was rejected (the task is
/// left unchanged).
pub fn apply(
    task: &mut ScheduledTask,
    target: ScheduleStatus,
    source: StatusSource,
) -> Option<SideEffect> {
    let current = task.status();
    if current == target {
        tracing::debug!(task_id = task.task_id, status = %current, "task already in reported state");
        return None;
    }
    if current.is_terminal() {
        tracing::warn!(
            task_id = task.task_id,
            from = %current,
            to = %target,
            "rejecting transition out of a terminal state"
        );
        return None;
    }

    let next = match (&task.lifecycle, target) {
        // STARTING needs a slave assignment, which only the offer path
        // supplies; see `assign`.
        (_, ScheduleStatus::Pending) | (_, ScheduleStatus::Starting) => None,

        (TaskLifecycle::Starting(a), ScheduleStatus::Running) => {
            Some(TaskLifecycle::Running(a.clone()))
        }

        (TaskLifecycle::Starting(a), ScheduleStatus::Finished)
        | (TaskLifecycle::Running(a), ScheduleStatus::Finished) => {
            Some(TaskLifecycle::Finished(a.clone()))
        }
        (TaskLifecycle::Starting(a), ScheduleStatus::Failed)
        | (TaskLifecycle::Running(a), ScheduleStatus::Failed) => {
            Some(TaskLifecycle::Failed(a.clone()))
        }
        (TaskLifecycle::Starting(a), ScheduleStatus::Killed)
        | (TaskLifecycle::Running(a), ScheduleStatus::Killed) => {
            Some(TaskLifecycle::Killed(a.clone()))
        }

        (lifecycle, ScheduleStatus::Lost) => {
            Some(TaskLifecycle::Lost(lifecycle.assignment().cloned()))
        }
        (lifecycle, ScheduleStatus::KilledByClient) => {
            Some(TaskLifecycle::KilledByClient(lifecycle.assignment().cloned()))
        }

        _ => None,
    };

    let Some(next) = next else {
        tracing::warn!(
            task_id = task.task_id,
            from = %current,
            to = %target,
            "rejecting illegal status transition"
        );
        return None;
    };

    task.lifecycle = next;
    tracing::debug!(task_id = task.task_id, from = %current, to = %target, "task transitioned");
    Some(side_effect(task, target, source))
}

fn side_effect(task: &mut ScheduledTask, entered: ScheduleStatus, source: StatusSource) -> SideEffect {
    match entered {
        ScheduleStatus::Finished if task.info.is_daemon() => SideEffect::Reschedule,
        ScheduleStatus::Failed => {
            task.failure_count += 1;
            if task.failure_count < task.info.max_failures() {
                SideEffect::Reschedule
            } else {
                tracing::info!(
                    task_id = task.task_id,
                    failures = task.failure_count,
                    "task exhausted its failure budget"
                );
                SideEffect::None
            }
        }
        // A lost slave says nothing about the task itself: always run it
        // again, and do not charge the failure budget.
        ScheduleStatus::Lost => SideEffect::Reschedule,
        ScheduleStatus::Killed if source == StatusSource::Reconciled => SideEffect::Reschedule,
        _ => SideEffect::None,
    }
}
