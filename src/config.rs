use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long a STARTING/RUNNING task may go unreported by its slave before
    /// reconciliation marks it LOST and reschedules it. Measured from the
    /// task's last heartbeat (its launch, or the most recent slave report
    /// that mentioned it).
    pub missing_task_grace_period: Duration,
    /// How long a terminal task is kept as history once its slave stops
    /// reporting it. After this window the task is removed from the store.
    pub terminal_task_retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            missing_task_grace_period: Duration::from_secs(60),
            terminal_task_retention: Duration::from_secs(600),
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_missing_task_grace_period(mut self, grace: Duration) -> Self {
        self.missing_task_grace_period = grace;
        self
    }

    pub fn with_terminal_task_retention(mut self, retention: Duration) -> Self {
        self.terminal_task_retention = retention;
        self
    }
}
