use async_trait::async_trait;

use crate::core::vm::{AsyncTask, CloneRequest, VmDescriptor, VmIdentity};
use crate::errors::CloneResult;

/// The five calls the engine needs from a hypervisor management API.
///
/// `PrismClient` talks HTTP, `MockManagementApi` keeps everything in memory
/// for tests. Orchestrators only ever see this trait.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// VMs whose name matches `name` according to the server-side filter.
    /// The server filter can be fuzzy; callers re-check names themselves.
    async fn list_vms(&self, name: &str) -> CloneResult<Vec<VmIdentity>>;

    async fn get_vm(&self, id: &str) -> CloneResult<VmDescriptor>;

    /// Submits a clone of `id` with the already stripped request body,
    /// returns the task id.
    async fn submit_clone(&self, id: &str, request: &CloneRequest) -> CloneResult<String>;

    /// Submits deletion of `id`, returns the task id.
    async fn submit_delete(&self, id: &str) -> CloneResult<String>;

    async fn poll_task(&self, task_id: &str) -> CloneResult<AsyncTask>;
}
