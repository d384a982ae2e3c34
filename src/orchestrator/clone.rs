use chrono::Utc;
use std::collections::HashSet;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ensure_not_cancelled, Orchestrator};
use crate::config::MatchPolicy;
use crate::core::{SpecBuilder, VmIdentity};
use crate::errors::{CloneError, CloneResult};

impl Orchestrator<'_> {
    /// Clones the VM called `name` and returns the new VM's identity.
    ///
    /// The source must resolve to exactly one VM. No step is retried as a
    /// whole; only the poller retries transport faults.
    pub async fn clone_vm(&self, name: &str, cancel: &CancellationToken) -> CloneResult<VmIdentity> {
        let source = self.resolver(MatchPolicy::Exact).resolve_unique(name).await?;

        let mut descriptor = self.api.get_vm(&source.id).await?;
        if descriptor.config.name.is_empty() {
            descriptor.config.name = source.name.clone();
        }

        let builder = SpecBuilder::new(self.settings.clone.name_suffix.as_str());
        let request = builder.build(&descriptor)?;
        let clone_name = request.name().to_string();

        // Earlier clones share the derived name; remember them so they are
        // never mistaken for the one we are about to create.
        let existing: HashSet<String> = self
            .resolver(MatchPolicy::Exact)
            .resolve_all(&clone_name)
            .await?
            .into_iter()
            .map(|vm| vm.id)
            .collect();
        if !existing.is_empty() {
            debug!(clone_name = %clone_name, existing = existing.len(), "Clone name already in use");
        }

        ensure_not_cancelled(cancel, "clone submission")?;
        let started = Instant::now();
        info!(
            source = %source,
            clone_name = %clone_name,
            start_time = %Utc::now().format("%H:%M:%S"),
            "Clone started"
        );

        let task_id = self.api.submit_clone(&source.id, &request).await?;
        let task = self.poller().await_completion(&task_id, cancel).await?;

        let clone = match task.entity_ids.last() {
            Some(id) => VmIdentity::new(clone_name, id.clone()),
            // Older API versions don't list the created entity; find it by name.
            None => self.find_new_clone(&clone_name, &existing).await?,
        };

        info!(
            clone = %clone,
            end_time = %Utc::now().format("%H:%M:%S"),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Clone finished"
        );
        Ok(clone)
    }

    /// The one VM named `clone_name` whose id was not there before submission.
    async fn find_new_clone(
        &self,
        clone_name: &str,
        existing: &HashSet<String>,
    ) -> CloneResult<VmIdentity> {
        let mut fresh: Vec<VmIdentity> = self
            .resolver(MatchPolicy::Exact)
            .resolve_all(clone_name)
            .await?
            .into_iter()
            .filter(|vm| !existing.contains(&vm.id))
            .collect();

        match fresh.len() {
            0 => Err(CloneError::NotFound {
                name: clone_name.to_string(),
            }),
            1 => Ok(fresh.remove(0)),
            count => Err(CloneError::Ambiguous {
                name: clone_name.to_string(),
                count,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::config::{generate_default_config, Settings};
    use crate::core::mock::{MockManagementApi, PollStep};
    use crate::core::vm::{AsyncTask, CloneRequest, TaskStatus, VmDescriptor};
    use crate::core::ManagementApi;

    // Lists VMs in reverse order and can meddle with the clone name while the
    // clone task runs, the way a busy cluster with other operators would.
    struct BusyCluster {
        inner: MockManagementApi,
        clone_name: &'static str,
        racing_clone: Option<&'static str>,
        clone_vanishes: bool,
    }

    impl BusyCluster {
        fn new(inner: MockManagementApi) -> Self {
            inner.set_report_entities(false);
            Self {
                inner,
                clone_name: "db1-clone",
                racing_clone: None,
                clone_vanishes: false,
            }
        }
    }

    #[async_trait]
    impl ManagementApi for BusyCluster {
        async fn list_vms(&self, name: &str) -> CloneResult<Vec<VmIdentity>> {
            let mut vms = self.inner.list_vms(name).await?;
            vms.reverse();
            Ok(vms)
        }

        async fn get_vm(&self, id: &str) -> CloneResult<VmDescriptor> {
            self.inner.get_vm(id).await
        }

        async fn submit_clone(&self, id: &str, request: &CloneRequest) -> CloneResult<String> {
            let task_id = self.inner.submit_clone(id, request).await?;
            if let Some(other) = self.racing_clone {
                self.inner.add_vm(self.clone_name, other);
            }
            Ok(task_id)
        }

        async fn submit_delete(&self, id: &str) -> CloneResult<String> {
            self.inner.submit_delete(id).await
        }

        async fn poll_task(&self, task_id: &str) -> CloneResult<AsyncTask> {
            let task = self.inner.poll_task(task_id).await?;
            if self.clone_vanishes && task.status == TaskStatus::Succeeded {
                for vm in self.inner.vms() {
                    if vm.name == self.clone_name {
                        self.inner.remove_vm(&vm.id);
                    }
                }
            }
            Ok(task)
        }
    }

    fn settings() -> Settings {
        let mut s = generate_default_config();
        s.cluster.host = "mock".into();
        s.polling.interval_ms = 1000;
        s.polling.max_wait_secs = 60;
        s
    }

    #[tokio::test(start_paused = true)]
    async fn clone_returns_reported_entity() {
        let api = MockManagementApi::new();
        api.add_vm("db1", "uuid-db1");
        api.set_pending_polls(2);
        let s = settings();

        let clone = Orchestrator::new(&api, &s)
            .clone_vm("db1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(clone.name, "db1-clone");
        assert!(api.vms().contains(&clone));
        assert_eq!(api.submitted_specs()[0].num_vcpus, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn clone_falls_back_to_name_lookup() {
        let api = MockManagementApi::new();
        api.add_vm("db1", "uuid-db1");
        api.set_report_entities(false);
        let s = settings();

        let clone = Orchestrator::new(&api, &s)
            .clone_vm("db1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(clone.name, "db1-clone");
        assert_ne!(clone.id, "uuid-db1");
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_skips_clones_that_already_existed() {
        let inner = MockManagementApi::new();
        inner.add_vm("db1", "uuid-db1");
        inner.add_vm("db1-clone", "old-clone");
        let api = BusyCluster::new(inner);
        let s = settings();

        let clone = Orchestrator::new(&api, &s)
            .clone_vm("db1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(clone.name, "db1-clone");
        assert_ne!(clone.id, "old-clone");
        assert!(api.inner.vms().contains(&clone));
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_without_a_new_vm_is_not_found() {
        let inner = MockManagementApi::new();
        inner.add_vm("db1", "uuid-db1");
        let mut api = BusyCluster::new(inner);
        api.clone_vanishes = true;
        let s = settings();

        let err = Orchestrator::new(&api, &s)
            .clone_vm("db1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CloneError::NotFound { ref name } if name == "db1-clone"));
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_with_several_new_vms_is_ambiguous() {
        let inner = MockManagementApi::new();
        inner.add_vm("db1", "uuid-db1");
        inner.add_vm("db1-clone", "old-clone");
        let mut api = BusyCluster::new(inner);
        api.racing_clone = Some("someone-elses-clone");
        let s = settings();

        let err = Orchestrator::new(&api, &s)
            .clone_vm("db1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CloneError::Ambiguous { count: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn ambiguous_source_fails_before_submitting() {
        let api = MockManagementApi::new();
        api.add_vm("tmp", "a");
        api.add_vm("tmp", "b");
        let s = settings();

        let err = Orchestrator::new(&api, &s)
            .clone_vm("tmp", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CloneError::Ambiguous { count: 2, .. }));
        assert!(api.submitted_specs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn clone_task_failure_surfaces() {
        let api = MockManagementApi::new();
        api.add_vm("db1", "uuid-db1");
        api.script_next_task(vec![PollStep::Fail {
            code: "kNoResources".into(),
            detail: "not enough memory".into(),
        }]);
        let s = settings();

        let err = Orchestrator::new(&api, &s)
            .clone_vm("db1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TaskFailed");
        assert_eq!(api.vms().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_clone_never_submits() {
        let api = MockManagementApi::new();
        api.add_vm("db1", "uuid-db1");
        let s = settings();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Orchestrator::new(&api, &s)
            .clone_vm("db1", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CloneError::Cancelled { .. }));
        assert!(api.submitted_specs().is_empty());
    }
}
