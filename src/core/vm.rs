use serde::{Deserialize, Serialize};
use serde_json::Value;

// Who a VM is, as far as the management API cares. `id` is the only thing
// later calls accept; `name` is for humans and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmIdentity {
    pub name: String,
    pub id: String,
}

impl VmIdentity {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for VmIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Snapshot of a source VM's configuration, fetched once per clone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmDescriptor {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub config: VmConfig,
    #[serde(default)]
    pub logical_timestamp: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub num_vcpus: u32,
    #[serde(default)]
    pub num_cores_per_vcpu: u32,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub vm_nics: Vec<VmNic>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmNic {
    #[serde(default)]
    pub network_uuid: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub requested_ip_address: Option<String>,
}

/// What gets POSTed to ask for a clone. Built fresh every time, never read back.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneSpec {
    pub name: String,
    pub num_vcpus: u32,
    pub num_cores_per_vcpu: u32,
    pub memory_mb: u64,
    pub override_networking_config: bool,
    pub uuid: Option<String>,
    pub vm_nics: Vec<NicSpec>,
    #[serde(rename = "sourceVMLogicalTimestamp")]
    pub source_vm_logical_timestamp: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NicSpec {
    pub network_uuid: Option<String>,
}

/// A built clone request: the typed spec plus the stripped body that goes on
/// the wire. Only `SpecBuilder::build` makes these.
#[derive(Debug, Clone, PartialEq)]
pub struct CloneRequest {
    spec: CloneSpec,
    body: Value,
}

impl CloneRequest {
    pub(crate) fn new(spec: CloneSpec, body: Value) -> Self {
        Self { spec, body }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &CloneSpec {
        &self.spec
    }

    /// `{"specList": [<stripped spec>]}`
    pub fn body(&self) -> &Value {
        &self.body
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    Pending,
    Succeeded,
    Failed { code: String, detail: String },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

// Server-side async operation handle, observed only by polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AsyncTask {
    pub id: String,
    pub status: TaskStatus,
    /// Entities the task created, when the API bothers to tell us.
    pub entity_ids: Vec<String>,
}

impl AsyncTask {
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Pending,
            entity_ids: Vec::new(),
        }
    }
}
