use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ClusterSettings;
use crate::core::api::ManagementApi;
use crate::core::resolver::extract_vm_uuid;
use crate::core::vm::{AsyncTask, CloneRequest, TaskStatus, VmDescriptor, VmIdentity};
use crate::errors::{CloneError, CloneResult};

const NO_ERROR: &str = "kNoError";

/// A logged-in session against one cluster's management API.
///
/// Built per command and dropped when the command returns, error or not;
/// nothing about it outlives the call.
pub struct PrismClient {
    session_id: Uuid,
    http: reqwest::Client,
    acropolis_base: String,
    prism_base: String,
    username: String,
    password: String,
}

impl PrismClient {
    pub fn connect(cluster: &ClusterSettings) -> CloneResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(cluster.accept_invalid_certs)
            .timeout(cluster.request_timeout())
            .default_headers(headers)
            .build()?;

        let session_id = Uuid::new_v4();
        info!(
            session = %session_id,
            host = %cluster.host,
            user = %cluster.username,
            "Opened management API session"
        );

        Ok(Self {
            session_id,
            http,
            acropolis_base: cluster.acropolis_base(),
            prism_base: cluster.prism_base(),
            username: cluster.username.clone(),
            password: cluster.password.clone(),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn acropolis_url(&self, path: &str) -> String {
        format!("{}/{}", self.acropolis_base, path)
    }

    fn prism_url(&self, path: &str) -> String {
        format!("{}/{}", self.prism_base, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> CloneResult<T> {
        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        let status = response.status();
        let url = response.url().to_string();
        if !status.is_success() {
            return Err(CloneError::Transport {
                message: format!("{} returned {}", url, status),
                status: Some(status.as_u16()),
            });
        }

        let body = response.text().await?;
        debug!(session = %self.session_id, url = %url, bytes = body.len(), "API response");
        Ok(serde_json::from_str(&body)?)
    }
}

impl Drop for PrismClient {
    fn drop(&mut self) {
        debug!(session = %self.session_id, "Closed management API session");
    }
}

#[derive(Debug, Deserialize)]
struct VmListResponse {
    #[serde(default)]
    entities: Vec<VmListEntity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmListEntity {
    vm_id: String,
    #[serde(default)]
    vm_name: String,
}

impl VmListResponse {
    /// Entities with an id that has no uuid part are a malformed answer,
    /// not a VM we could act on later.
    fn into_identities(self) -> CloneResult<Vec<VmIdentity>> {
        self.entities
            .into_iter()
            .map(|e| {
                let id = extract_vm_uuid(&e.vm_id);
                if id.is_empty() {
                    return Err(CloneError::InvalidResponse(format!(
                        "VM '{}' listed with unusable id '{}'",
                        e.vm_name, e.vm_id
                    )));
                }
                Ok(VmIdentity::new(e.vm_name.as_str(), id))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskSubmitResponse {
    task_uuid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TaskPollResponse {
    task_info: TaskInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskInfo {
    #[serde(default)]
    meta_response: Option<MetaResponse>,
    #[serde(default)]
    entity_list: Vec<TaskEntity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetaResponse {
    error: String,
    #[serde(default, alias = "mrerrorDetail")]
    error_detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskEntity {
    uuid: String,
}

impl TaskPollResponse {
    /// No `metaResponse` yet means the task is still running.
    pub(crate) fn into_task(self, task_id: &str) -> AsyncTask {
        let status = match self.task_info.meta_response {
            None => TaskStatus::Pending,
            Some(mr) if mr.error == NO_ERROR => TaskStatus::Succeeded,
            Some(mr) => TaskStatus::Failed {
                code: mr.error,
                detail: mr.error_detail.unwrap_or_default(),
            },
        };
        let entity_ids = match status {
            TaskStatus::Succeeded => self
                .task_info
                .entity_list
                .into_iter()
                .map(|e| e.uuid)
                .collect(),
            _ => Vec::new(),
        };
        AsyncTask {
            id: task_id.to_string(),
            status,
            entity_ids,
        }
    }
}

#[async_trait]
impl ManagementApi for PrismClient {
    async fn list_vms(&self, name: &str) -> CloneResult<Vec<VmIdentity>> {
        let request = self
            .http
            .get(self.prism_url("vms"))
            .query(&[("filterCriteria", format!("vm_name=={}", name))]);
        let list: VmListResponse = self.send(request).await?;
        list.into_identities()
    }

    async fn get_vm(&self, id: &str) -> CloneResult<VmDescriptor> {
        let request = self.http.get(self.acropolis_url(&format!("vms/{}", id)));
        self.send(request).await
    }

    async fn submit_clone(&self, id: &str, clone: &CloneRequest) -> CloneResult<String> {
        let request = self
            .http
            .post(self.acropolis_url(&format!("vms/{}/clone", id)))
            .json(clone.body());
        let submitted: TaskSubmitResponse = self.send(request).await?;
        Ok(submitted.task_uuid)
    }

    async fn submit_delete(&self, id: &str) -> CloneResult<String> {
        let request = self.http.delete(self.acropolis_url(&format!("vms/{}", id)));
        let submitted: TaskSubmitResponse = self.send(request).await?;
        Ok(submitted.task_uuid)
    }

    async fn poll_task(&self, task_id: &str) -> CloneResult<AsyncTask> {
        let request = self
            .http
            .get(self.acropolis_url(&format!("tasks/{}/poll", task_id)));
        let poll: TaskPollResponse = self.send(request).await?;
        Ok(poll.into_task(task_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::generate_default_config;

    fn parse(raw: &str) -> AsyncTask {
        serde_json::from_str::<TaskPollResponse>(raw)
            .unwrap()
            .into_task("t-1")
    }

    #[test]
    fn missing_meta_response_means_pending() {
        let task = parse(r#"{"taskInfo":{"progressStatus":"Running"}}"#);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn no_error_means_success_with_entities() {
        let task = parse(
            r#"{"taskInfo":{"metaResponse":{"error":"kNoError"},"entityList":[{"uuid":"new-vm"}]}}"#,
        );
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.entity_ids, vec!["new-vm".to_string()]);
    }

    #[test]
    fn error_code_and_detail_are_kept() {
        let task = parse(
            r#"{"taskInfo":{"metaResponse":{"error":"kInvalidArgument","errorDetail":"bad nic"}}}"#,
        );
        assert_eq!(
            task.status,
            TaskStatus::Failed {
                code: "kInvalidArgument".into(),
                detail: "bad nic".into()
            }
        );
    }

    #[test]
    fn legacy_detail_field_is_accepted() {
        let task = parse(
            r#"{"taskInfo":{"metaResponse":{"error":"kTimeout","mrerrorDetail":"stuck"}}}"#,
        );
        assert!(matches!(task.status, TaskStatus::Failed { ref detail, .. } if detail == "stuck"));
    }

    #[test]
    fn list_entities_parse() {
        let list: VmListResponse = serde_json::from_str(
            r#"{"metadata":{"count":1},"entities":[{"vmId":"c1::vm-9","vmName":"db1"}]}"#,
        )
        .unwrap();
        assert_eq!(list.entities.len(), 1);
        assert_eq!(
            list.into_identities().unwrap(),
            vec![VmIdentity::new("db1", "vm-9")]
        );
    }

    #[test]
    fn list_entity_without_uuid_is_rejected() {
        let list: VmListResponse = serde_json::from_str(
            r#"{"entities":[{"vmId":"c1::vm-9","vmName":"db1"},{"vmId":"c1::","vmName":"db2"}]}"#,
        )
        .unwrap();
        let err = list.into_identities().unwrap_err();
        assert_eq!(err.kind(), "InvalidResponse");
        assert!(err.to_string().contains("db2"));
    }

    #[test]
    fn urls_use_configured_bases() {
        let mut settings = generate_default_config();
        settings.cluster.host = "10.1.1.1".into();
        let client = PrismClient::connect(&settings.cluster).unwrap();
        assert_eq!(
            client.acropolis_url("tasks/abc/poll"),
            "https://10.1.1.1:9440/api/nutanix/v0.8/tasks/abc/poll"
        );
        assert_eq!(
            client.prism_url("vms"),
            "https://10.1.1.1:9440/PrismGateway/services/rest/v1/vms"
        );
    }
}
