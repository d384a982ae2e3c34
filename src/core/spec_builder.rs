use serde_json::{json, Map, Value};
use tracing::debug;

use crate::core::vm::{CloneRequest, CloneSpec, NicSpec, VmDescriptor};
use crate::errors::CloneResult;

/// Turns a source VM descriptor into the clone request the API expects.
///
/// Deterministic on purpose: no timestamps, no random names. The clone name is
/// always `<source name><suffix>`.
#[derive(Debug, Clone)]
pub struct SpecBuilder {
    name_suffix: String,
}

impl SpecBuilder {
    pub fn new(name_suffix: impl Into<String>) -> Self {
        Self {
            name_suffix: name_suffix.into(),
        }
    }

    pub fn clone_name(&self, source_name: &str) -> String {
        format!("{}{}", source_name, self.name_suffix)
    }

    /// The typed spec, before empty fields are stripped.
    pub fn spec(&self, descriptor: &VmDescriptor) -> CloneSpec {
        let config = &descriptor.config;
        CloneSpec {
            name: self.clone_name(&config.name),
            num_vcpus: config.num_vcpus,
            num_cores_per_vcpu: config.num_cores_per_vcpu,
            memory_mb: config.memory_mb,
            // Clones keep the source's networks but get fresh MACs and IPs.
            override_networking_config: false,
            uuid: None,
            vm_nics: config
                .vm_nics
                .iter()
                .map(|nic| NicSpec {
                    network_uuid: nic.network_uuid.clone(),
                })
                .collect(),
            source_vm_logical_timestamp: descriptor.logical_timestamp,
        }
    }

    /// Builds the spec and strips it into the `{"specList": [..]}` body.
    pub fn build(&self, descriptor: &VmDescriptor) -> CloneResult<CloneRequest> {
        let spec = self.spec(descriptor);
        let stripped = strip_empty(serde_json::to_value(&spec)?).unwrap_or_else(|| json!({}));
        debug!(clone_name = %spec.name, spec = %stripped, "Built clone spec");
        Ok(CloneRequest::new(spec, json!({ "specList": [stripped] })))
    }
}

/// Drops null, false, zero, empty strings and empty collections at every
/// level, children first, so a parent left empty by its children goes too.
/// Returns `None` when the value itself is empty.
pub fn strip_empty(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Bool(false) => None,
        Value::Bool(true) => Some(Value::Bool(true)),
        Value::Number(n) => {
            if n.as_f64() == Some(0.0) {
                None
            } else {
                Some(Value::Number(n))
            }
        }
        Value::String(s) => (!s.is_empty()).then_some(Value::String(s)),
        Value::Array(items) => {
            let kept: Vec<Value> = items.into_iter().filter_map(strip_empty).collect();
            (!kept.is_empty()).then_some(Value::Array(kept))
        }
        Value::Object(fields) => {
            let kept: Map<String, Value> = fields
                .into_iter()
                .filter_map(|(k, v)| strip_empty(v).map(|v| (k, v)))
                .collect();
            (!kept.is_empty()).then_some(Value::Object(kept))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vm::{VmConfig, VmNic};

    fn descriptor() -> VmDescriptor {
        VmDescriptor {
            uuid: Some("src-uuid".into()),
            config: VmConfig {
                name: "db1".into(),
                num_vcpus: 4,
                num_cores_per_vcpu: 0,
                memory_mb: 8192,
                vm_nics: vec![
                    VmNic {
                        network_uuid: Some("net-a".into()),
                        mac_address: Some("50:6b:8d:00:00:01".into()),
                        requested_ip_address: Some("10.0.0.10".into()),
                    },
                    VmNic::default(),
                ],
            },
            logical_timestamp: None,
        }
    }

    #[test]
    fn strips_recursively_bottom_up() {
        let input = json!({ "a": { "b": 0, "c": "x" }, "d": [] });
        assert_eq!(strip_empty(input), Some(json!({ "a": { "c": "x" } })));
    }

    #[test]
    fn parent_emptied_by_children_is_removed() {
        let input = json!({ "a": { "b": 0, "c": "" }, "e": [{}, null, [0]], "f": 1 });
        assert_eq!(strip_empty(input), Some(json!({ "f": 1 })));
        assert_eq!(strip_empty(json!({ "a": { "b": false } })), None);
    }

    #[test]
    fn non_empty_scalars_survive() {
        let input = json!({ "t": true, "n": -1, "f": 0.5, "s": "false" });
        assert_eq!(strip_empty(input.clone()), Some(input));
    }

    #[test]
    fn spec_copies_clone_fields_and_names_deterministically() {
        let builder = SpecBuilder::new("-clone");
        let spec = builder.spec(&descriptor());
        assert_eq!(spec.name, "db1-clone");
        assert_eq!(spec.num_vcpus, 4);
        assert_eq!(spec.memory_mb, 8192);
        assert_eq!(spec.vm_nics.len(), 2);
        assert_eq!(spec.vm_nics[0].network_uuid.as_deref(), Some("net-a"));
    }

    #[test]
    fn built_request_omits_empty_fields() {
        let request = SpecBuilder::new("-clone").build(&descriptor()).unwrap();
        assert_eq!(request.name(), "db1-clone");
        assert_eq!(
            request.body(),
            &json!({
                "specList": [{
                    "name": "db1-clone",
                    "numVcpus": 4,
                    "memoryMb": 8192,
                    "vmNics": [{ "networkUuid": "net-a" }]
                }]
            })
        );
    }

    #[test]
    fn built_request_never_carries_zero_valued_fields() {
        let request = SpecBuilder::new("-clone")
            .build(&VmDescriptor::default())
            .unwrap();
        // Nothing but the derived name survives an empty descriptor.
        assert_eq!(request.body(), &json!({ "specList": [{ "name": "-clone" }] }));
        assert!(!request.spec().override_networking_config);
    }

    #[test]
    fn building_twice_is_byte_identical() {
        let builder = SpecBuilder::new("-clone");
        let d = descriptor();
        let first = serde_json::to_string(builder.build(&d).unwrap().body()).unwrap();
        let second = serde_json::to_string(builder.build(&d).unwrap().body()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn build_leaves_descriptor_untouched() {
        let d = descriptor();
        let before = d.clone();
        let _ = SpecBuilder::new("-x").build(&d).unwrap();
        assert_eq!(d, before);
    }
}
