use tracing::{debug, info};

use crate::config::MatchPolicy;
use crate::core::api::ManagementApi;
use crate::core::vm::VmIdentity;
use crate::errors::{CloneError, CloneResult};

/// Maps VM names to API identifiers.
pub struct IdentityResolver<'a> {
    api: &'a dyn ManagementApi,
    policy: MatchPolicy,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(api: &'a dyn ManagementApi, policy: MatchPolicy) -> Self {
        Self { api, policy }
    }

    /// Every VM whose name matches `name` under the configured policy.
    /// An empty result is not an error.
    pub async fn resolve_all(&self, name: &str) -> CloneResult<Vec<VmIdentity>> {
        let candidates = self.api.list_vms(name).await?;
        let total = candidates.len();
        let matches: Vec<VmIdentity> = candidates
            .into_iter()
            .filter(|vm| self.policy.matches(name, &vm.name))
            .collect();

        debug!(
            vm_name = name,
            policy = ?self.policy,
            candidates = total,
            matches = matches.len(),
            "Resolved VM name"
        );
        Ok(matches)
    }

    /// Exactly one VM, or `NotFound` / `Ambiguous`.
    pub async fn resolve_unique(&self, name: &str) -> CloneResult<VmIdentity> {
        let mut matches = self.resolve_all(name).await?;
        match matches.len() {
            0 => Err(CloneError::NotFound {
                name: name.to_string(),
            }),
            1 => {
                let vm = matches.remove(0);
                info!(vm_name = %vm.name, vm_id = %vm.id, "Resolved VM");
                Ok(vm)
            }
            count => Err(CloneError::Ambiguous {
                name: name.to_string(),
                count,
            }),
        }
    }

    pub async fn resolve(&self, name: &str, require_unique: bool) -> CloneResult<Vec<VmIdentity>> {
        if require_unique {
            self.resolve_unique(name).await.map(|vm| vec![vm])
        } else {
            self.resolve_all(name).await
        }
    }
}

/// The gateway reports ids as `<cluster>::<vm uuid>`; the API wants the last part.
pub fn extract_vm_uuid(raw_id: &str) -> &str {
    raw_id.rsplit(':').next().unwrap_or(raw_id)
}
