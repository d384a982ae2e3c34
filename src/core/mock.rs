use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::core::api::ManagementApi;
use crate::core::vm::{
    AsyncTask, CloneRequest, CloneSpec, TaskStatus, VmConfig, VmDescriptor, VmIdentity,
};
use crate::errors::{CloneError, CloneResult};

/// One scripted answer to a task poll.
#[derive(Debug, Clone)]
pub enum PollStep {
    Pending,
    TransportError(String),
    Succeed,
    Fail { code: String, detail: String },
}

#[derive(Debug)]
enum Effect {
    Create { name: String },
    Delete { id: String },
}

#[derive(Debug)]
struct MockTask {
    steps: VecDeque<PollStep>,
    pending_left: u32,
    terminal: PollStep,
    effect: Effect,
    finished: Option<AsyncTask>,
}

#[derive(Debug, Default)]
struct MockState {
    vms: Vec<VmIdentity>,
    descriptors: HashMap<String, VmDescriptor>,
    tasks: HashMap<String, MockTask>,
    scripted_tasks: VecDeque<Vec<PollStep>>,
    failing_deletes: HashMap<String, (String, String)>,
    rejected_deletes: HashSet<String>,
    list_failures: VecDeque<CloneError>,
    submitted: Vec<CloneRequest>,
    pending_polls: u32,
    report_entities: bool,
    next_id: u64,
    list_calls: u32,
    poll_calls: u32,
}

/// In-memory cluster that behaves like the management API: clone and delete
/// hand out tasks, the tasks finish after a scripted number of polls and only
/// then does the VM appear or disappear.
#[derive(Debug)]
pub struct MockManagementApi {
    state: Mutex<MockState>,
}

impl Default for MockManagementApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockManagementApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                report_entities: true,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_vm(&self, name: &str, id: &str) {
        let mut state = self.state();
        state.vms.push(VmIdentity::new(name, id));
        state.descriptors.insert(
            id.to_string(),
            VmDescriptor {
                uuid: Some(id.to_string()),
                config: VmConfig {
                    name: name.to_string(),
                    num_vcpus: 2,
                    num_cores_per_vcpu: 1,
                    memory_mb: 4096,
                    vm_nics: Vec::new(),
                },
                logical_timestamp: Some(1),
            },
        );
    }

    pub fn set_descriptor(&self, id: &str, descriptor: VmDescriptor) {
        self.state().descriptors.insert(id.to_string(), descriptor);
    }

    /// Every task submitted from now on reports pending this many times first.
    pub fn set_pending_polls(&self, polls: u32) {
        self.state().pending_polls = polls;
    }

    /// Whether finished clone tasks list the new VM in their entity list.
    pub fn set_report_entities(&self, report: bool) {
        self.state().report_entities = report;
    }

    /// Overrides the poll script of the next submitted task.
    pub fn script_next_task(&self, steps: Vec<PollStep>) {
        self.state().scripted_tasks.push_back(steps);
    }

    /// Delete tasks for `id` end in a terminal failure.
    pub fn fail_delete(&self, id: &str, code: &str, detail: &str) {
        self.state()
            .failing_deletes
            .insert(id.to_string(), (code.to_string(), detail.to_string()));
    }

    /// Delete submissions for `id` are refused at the HTTP layer.
    pub fn reject_delete(&self, id: &str) {
        self.state().rejected_deletes.insert(id.to_string());
    }

    pub fn fail_next_list(&self, error: CloneError) {
        self.state().list_failures.push_back(error);
    }

    pub fn vms(&self) -> Vec<VmIdentity> {
        self.state().vms.clone()
    }

    pub fn submitted_specs(&self) -> Vec<CloneSpec> {
        self.state().submitted.iter().map(|r| r.spec().clone()).collect()
    }

    /// Exactly what would have gone over the wire.
    pub fn submitted_bodies(&self) -> Vec<Value> {
        self.state().submitted.iter().map(|r| r.body().clone()).collect()
    }

    /// Drops a VM without going through a task, as if someone else removed it.
    pub fn remove_vm(&self, id: &str) {
        let mut state = self.state();
        state.vms.retain(|vm| vm.id != id);
        state.descriptors.remove(id);
    }

    pub fn list_calls(&self) -> u32 {
        self.state().list_calls
    }

    pub fn poll_calls(&self) -> u32 {
        self.state().poll_calls
    }

    fn new_task(state: &mut MockState, effect: Effect, terminal: PollStep) -> String {
        state.next_id += 1;
        let task_id = format!("task-{}", state.next_id);
        let (steps, pending_left) = match state.scripted_tasks.pop_front() {
            Some(script) => (script.into(), 0),
            None => (VecDeque::new(), state.pending_polls),
        };
        state.tasks.insert(
            task_id.clone(),
            MockTask {
                steps,
                pending_left,
                terminal,
                effect,
                finished: None,
            },
        );
        task_id
    }
}

#[async_trait]
impl ManagementApi for MockManagementApi {
    async fn list_vms(&self, name: &str) -> CloneResult<Vec<VmIdentity>> {
        let mut state = self.state();
        state.list_calls += 1;
        if let Some(err) = state.list_failures.pop_front() {
            return Err(err);
        }
        // The real filter is a substring match, so is this one.
        Ok(state
            .vms
            .iter()
            .filter(|vm| vm.name.contains(name))
            .cloned()
            .collect())
    }

    async fn get_vm(&self, id: &str) -> CloneResult<VmDescriptor> {
        self.state()
            .descriptors
            .get(id)
            .cloned()
            .ok_or_else(|| CloneError::Transport {
                message: format!("GET vms/{}: 404", id),
                status: Some(404),
            })
    }

    async fn submit_clone(&self, id: &str, request: &CloneRequest) -> CloneResult<String> {
        let mut state = self.state();
        if !state.descriptors.contains_key(id) {
            return Err(CloneError::Transport {
                message: format!("POST vms/{}/clone: 404", id),
                status: Some(404),
            });
        }
        state.submitted.push(request.clone());
        let effect = Effect::Create {
            name: request.name().to_string(),
        };
        Ok(Self::new_task(&mut state, effect, PollStep::Succeed))
    }

    async fn submit_delete(&self, id: &str) -> CloneResult<String> {
        let mut state = self.state();
        if state.rejected_deletes.contains(id) {
            return Err(CloneError::Transport {
                message: format!("DELETE vms/{}: 500", id),
                status: Some(500),
            });
        }
        let terminal = match state.failing_deletes.get(id) {
            Some((code, detail)) => PollStep::Fail {
                code: code.clone(),
                detail: detail.clone(),
            },
            None => PollStep::Succeed,
        };
        let effect = Effect::Delete { id: id.to_string() };
        Ok(Self::new_task(&mut state, effect, terminal))
    }

    async fn poll_task(&self, task_id: &str) -> CloneResult<AsyncTask> {
        let mut state = self.state();
        state.poll_calls += 1;
        let report_entities = state.report_entities;

        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| CloneError::InvalidResponse(format!("unknown task {}", task_id)))?;
        if let Some(done) = &task.finished {
            return Ok(done.clone());
        }

        let step = match task.steps.pop_front() {
            Some(step) => step,
            None if task.pending_left > 0 => {
                task.pending_left -= 1;
                PollStep::Pending
            }
            None => task.terminal.clone(),
        };

        match step {
            PollStep::Pending => Ok(AsyncTask::pending(task_id)),
            PollStep::TransportError(message) => Err(CloneError::transport(message)),
            PollStep::Fail { code, detail } => {
                let done = AsyncTask {
                    id: task_id.to_string(),
                    status: TaskStatus::Failed { code, detail },
                    entity_ids: Vec::new(),
                };
                task.finished = Some(done.clone());
                Ok(done)
            }
            PollStep::Succeed => {
                let mut entity_ids = Vec::new();
                let effect = match &task.effect {
                    Effect::Create { name } => Effect::Create { name: name.clone() },
                    Effect::Delete { id } => Effect::Delete { id: id.clone() },
                };
                match effect {
                    Effect::Create { name } => {
                        state.next_id += 1;
                        let new_id = format!("vm-{}", state.next_id);
                        state.vms.push(VmIdentity::new(name, new_id.clone()));
                        if report_entities {
                            entity_ids.push(new_id);
                        }
                    }
                    Effect::Delete { id } => {
                        state.vms.retain(|vm| vm.id != id);
                        state.descriptors.remove(&id);
                    }
                }
                let done = AsyncTask {
                    id: task_id.to_string(),
                    status: TaskStatus::Succeeded,
                    entity_ids,
                };
                if let Some(task) = state.tasks.get_mut(task_id) {
                    task.finished = Some(done.clone());
                }
                Ok(done)
            }
        }
    }
}
