use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{ensure_not_cancelled, Orchestrator};
use crate::core::VmIdentity;
use crate::errors::{CloneError, CloneResult};

/// Outcome of one cleanup run. Failures are per VM so an operator can retry
/// just those.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub name: String,
    pub succeeded: Vec<VmIdentity>,
    pub failed: Vec<FailedDeletion>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedDeletion {
    pub vm: VmIdentity,
    pub kind: String,
    pub error: String,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

impl Orchestrator<'_> {
    /// Deletes every VM matching `name` under the configured match policy.
    ///
    /// Zero matches is a successful, empty report. Individual deletions that
    /// fail land in `failed`; only a failed or cancelled lookup fails the call.
    pub async fn cleanup_clones(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> CloneResult<CleanupReport> {
        let started_at = Utc::now();
        ensure_not_cancelled(cancel, "cleanup resolution")?;
        let resolver = self.resolver(self.settings.cleanup.match_policy);
        let matches = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(CloneError::Cancelled {
                    what: "cleanup resolution".to_string(),
                });
            }
            found = resolver.resolve_all(name) => found?,
        };

        if matches.is_empty() {
            info!(vm_name = name, "No clones to clean up");
        } else {
            info!(vm_name = name, count = matches.len(), "Deleting clones");
        }

        let concurrency = self.settings.cleanup.concurrency.max(1);
        let outcomes: Vec<(VmIdentity, CloneResult<()>)> = stream::iter(matches)
            .map(|vm| async move {
                let result = self.delete_one(&vm, cancel).await;
                (vm, result)
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (vm, result) in outcomes {
            match result {
                Ok(()) => succeeded.push(vm),
                Err(err) => {
                    warn!(vm = %vm, kind = err.kind(), error = %err, "Failed to delete clone");
                    failed.push(FailedDeletion {
                        vm,
                        kind: err.kind().to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }

        let report = CleanupReport {
            name: name.to_string(),
            succeeded,
            failed,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            vm_name = name,
            deleted = report.succeeded.len(),
            failed = report.failed.len(),
            "Cleanup finished"
        );
        Ok(report)
    }

    async fn delete_one(&self, vm: &VmIdentity, cancel: &CancellationToken) -> Result<(), CloneError> {
        ensure_not_cancelled(cancel, "delete submission")?;
        info!(vm = %vm, "Deleting VM");
        let task_id = self.api.submit_delete(&vm.id).await?;
        self.poller().await_completion(&task_id, cancel).await?;
        Ok(())
    }
}
