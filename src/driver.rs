//! Interfaces to the scheduler's external collaborators: the cluster-master
//! driver, the scheduling-filter policy, the rolling-update launcher, and
//! the executor tracker.

use serde::{Deserialize, Serialize};

use crate::scheduler::task::{JobConfiguration, ResourceOffer, ScheduledTask, TaskId};

/// Handle to the cluster master for outbound commands.
pub trait Driver: Send + Sync {
    /// Issue a kill for the given task. The return code is logged;
    /// correctness never depends on it, since the slave's subsequent status
    /// report drives the observable terminal state.
    fn kill_task(&self, task_id: TaskId) -> i32;
}

/// Pluggable placement policy. For each offer the scheduler asks for a
/// predicate deciding which pending tasks may run on that slave with those
/// resources.
pub trait SchedulingFilter: Send + Sync {
    fn make_filter<'a>(
        &'a self,
        offer: &'a ResourceOffer,
        slave_host: &'a str,
    ) -> Box<dyn Fn(&ScheduledTask) -> bool + 'a>;
}

/// Accepts a task iff the offer covers its resource request.
#[derive(Debug, Default)]
pub struct ResourceFilter;

impl SchedulingFilter for ResourceFilter {
    fn make_filter<'a>(
        &'a self,
        offer: &'a ResourceOffer,
        _slave_host: &'a str,
    ) -> Box<dyn Fn(&ScheduledTask) -> bool + 'a> {
        Box::new(move |task| {
            task.info.cpus <= offer.cpus
                && task.info.ram_mb <= offer.ram_mb
                && task.info.disk_mb <= offer.disk_mb
        })
    }
}

/// Launches the separately-scheduled rolling updater for changes the
/// scheduler cannot apply in place.
pub trait UpdateLauncher: Send + Sync {
    fn launch_updater(&self, job: &JobConfiguration);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorStatus {
    pub slave_id: String,
    pub slave_host: String,
}

pub type RestartCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Tracks executor (slave daemon) health. The embedding daemon wires the
/// restart callback; the core forwards status reports and treats them as
/// heartbeats for the slave's tasks.
pub trait ExecutorTracker: Send + Sync {
    fn start(&self, on_restart: RestartCallback);
    fn add_status(&self, status: &ExecutorStatus);
}

#[derive(Debug, Default)]
pub struct NullExecutorTracker;

impl ExecutorTracker for NullExecutorTracker {
    fn start(&self, _on_restart: RestartCallback) {}

    fn add_status(&self, status: &ExecutorStatus) {
        tracing::debug!(slave_host = %status.slave_host, "executor status");
    }
}
