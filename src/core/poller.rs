use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollingSettings;
use crate::core::api::ManagementApi;
use crate::core::vm::{AsyncTask, TaskStatus};
use crate::errors::{CloneError, CloneResult, RetryPolicy};

/// How long and how often to poll, and how much wire trouble to put up with.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
    pub retry: RetryPolicy,
}

impl From<&PollingSettings> for PollSettings {
    fn from(s: &PollingSettings) -> Self {
        Self {
            interval: s.interval(),
            max_wait: s.max_wait(),
            retry: s.retry_policy(),
        }
    }
}

/// Drives one server-side task to a terminal state.
///
/// Every wait is bounded by the deadline and races the cancellation token, so
/// a task that never reports completion ends in `Timeout` rather than a spin.
pub struct TaskPoller<'a> {
    api: &'a dyn ManagementApi,
    settings: PollSettings,
}

impl<'a> TaskPoller<'a> {
    pub fn new(api: &'a dyn ManagementApi, settings: PollSettings) -> Self {
        Self { api, settings }
    }

    /// Returns the succeeded task, or `TaskFailed` / `PollingExhausted` /
    /// `Timeout` / `Cancelled`.
    pub async fn await_completion(
        &self,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> CloneResult<AsyncTask> {
        let started = Instant::now();
        let deadline = started + self.settings.max_wait;
        let mut polls: u32 = 0;
        let mut transport_failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(task_id));
            }

            polls += 1;
            debug!(task_id, poll = polls, "Polling task for completion");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(task_id)),
                _ = sleep_until(deadline) => return Err(self.timeout(task_id, started)),
                res = self.api.poll_task(task_id) => res,
            };

            let pause = match outcome {
                Ok(task) => {
                    transport_failures = 0;
                    match &task.status {
                        TaskStatus::Succeeded => {
                            info!(
                                task_id,
                                polls,
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "Task completed"
                            );
                            return Ok(task);
                        }
                        TaskStatus::Failed { code, detail } => {
                            warn!(task_id, code = %code, detail = %detail, "Task failed");
                            return Err(CloneError::TaskFailed {
                                task_id: task_id.to_string(),
                                code: code.clone(),
                                detail: detail.clone(),
                            });
                        }
                        TaskStatus::Pending => self.settings.interval,
                    }
                }
                Err(err) => {
                    transport_failures += 1;
                    if !self.settings.retry.should_retry(&err, transport_failures) {
                        if !err.is_retryable() {
                            return Err(err);
                        }
                        return Err(CloneError::PollingExhausted {
                            task_id: task_id.to_string(),
                            attempts: transport_failures,
                            last_error: err.to_string(),
                        });
                    }
                    self.settings.retry.delay_for(transport_failures)
                }
            };

            let wake_at = Instant::now() + pause;
            if wake_at >= deadline {
                // Sleep out the remaining budget so the reported wait is honest,
                // unless somebody cancels first.
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(cancelled(task_id)),
                    _ = sleep_until(deadline) => return Err(self.timeout(task_id, started)),
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(task_id)),
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    fn timeout(&self, task_id: &str, started: Instant) -> CloneError {
        let waited = started.elapsed();
        warn!(task_id, waited_ms = waited.as_millis() as u64, "Gave up waiting on task");
        CloneError::Timeout {
            task_id: task_id.to_string(),
            waited,
        }
    }
}

fn cancelled(task_id: &str) -> CloneError {
    warn!(task_id, "Polling cancelled, task left running on the cluster");
    CloneError::Cancelled {
        what: format!("task {}", task_id),
    }
}
