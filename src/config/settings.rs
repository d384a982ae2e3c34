/*
* Clone Manager Configuration
* ---------------------------
* @project: vm-clone-manager
*
* Hierarchical configuration, lowest to highest priority:
*
* 1. Hardcoded defaults (the ones below, sane for a stock Prism cluster)
* 2. <dir>/default.toml
* 3. <dir>/local.toml (environment-specific overrides, not committed)
* 4. Environment variables, VM_CLONE__SECTION__KEY (e.g. VM_CLONE__CLUSTER__HOST)
* 5. CLI flags, applied by the cli module after loading
*
* Sections:
* --------
* - cluster: where the management API lives and how to log into it. Both API
*   base paths are configurable because every deployment seems to pin a
*   different API version.
* - polling: how patient we are with async tasks.
* - cleanup: which VMs count as "clones of X" and how many to delete at once.
* - clone: how clones get named.
*
* Nothing here is global; a Settings value is loaded once in main and passed
* by reference to whoever needs it.
*/

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::errors::{CloneError, CloneResult, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub cluster: ClusterSettings,
    pub polling: PollingSettings,
    pub cleanup: CleanupSettings,
    pub clone: CloneSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub acropolis_path: String,
    pub prism_path: String,
    pub accept_invalid_certs: bool,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    pub interval_ms: u64,
    pub max_wait_secs: u64,
    pub transport_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupSettings {
    pub match_policy: MatchPolicy,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneSettings {
    pub name_suffix: String,
}

/// How a VM name is compared against the requested one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    #[default]
    Exact,
    Prefix,
}

impl MatchPolicy {
    pub fn matches(&self, requested: &str, candidate: &str) -> bool {
        match self {
            MatchPolicy::Exact => candidate == requested,
            MatchPolicy::Prefix => candidate.starts_with(requested),
        }
    }
}

impl ClusterSettings {
    fn base(&self, path: &str) -> String {
        format!(
            "https://{}:{}/{}",
            self.host,
            self.port,
            path.trim_matches('/')
        )
    }

    pub fn acropolis_base(&self) -> String {
        self.base(&self.acropolis_path)
    }

    pub fn prism_base(&self) -> String {
        self.base(&self.prism_path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl PollingSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.transport_retries,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }
}

impl Default for Settings {
    fn default() -> Self {
        generate_default_config()
    }
}

impl Settings {
    /// Loads settings from `<dir>/default.toml`, `<dir>/local.toml` and the
    /// environment, on top of the built-in defaults. `dir` falls back to
    /// `$CONFIG_PATH`, then `config`.
    pub fn load(dir: Option<&Path>) -> CloneResult<Self> {
        let config_path = match dir {
            Some(d) => d.display().to_string(),
            None => std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string()),
        };

        info!("Loading configuration from path: {}", config_path);

        let d = generate_default_config();
        let config = Config::builder()
            .set_default("cluster.host", d.cluster.host)?
            .set_default("cluster.port", i64::from(d.cluster.port))?
            .set_default("cluster.username", d.cluster.username)?
            .set_default("cluster.password", d.cluster.password)?
            .set_default("cluster.acropolis_path", d.cluster.acropolis_path)?
            .set_default("cluster.prism_path", d.cluster.prism_path)?
            .set_default("cluster.accept_invalid_certs", d.cluster.accept_invalid_certs)?
            .set_default("cluster.request_timeout_secs", d.cluster.request_timeout_secs as i64)?
            .set_default("polling.interval_ms", d.polling.interval_ms as i64)?
            .set_default("polling.max_wait_secs", d.polling.max_wait_secs as i64)?
            .set_default("polling.transport_retries", i64::from(d.polling.transport_retries))?
            .set_default("polling.backoff_base_ms", d.polling.backoff_base_ms as i64)?
            .set_default("polling.backoff_max_ms", d.polling.backoff_max_ms as i64)?
            .set_default("cleanup.match_policy", "exact")?
            .set_default("cleanup.concurrency", d.cleanup.concurrency as i64)?
            .set_default("clone.name_suffix", d.clone.name_suffix)?
            .add_source(File::with_name(&format!("{}/default", config_path)).required(false))
            .add_source(File::with_name(&format!("{}/local", config_path)).required(false))
            .add_source(
                Environment::with_prefix("VM_CLONE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Rejects values that would make the engine spin or never start.
    pub fn validate(&self) -> CloneResult<()> {
        if self.cluster.host.trim().is_empty() {
            return Err(CloneError::Config(
                "cluster.host is empty (set it in config or pass --cluster)".into(),
            ));
        }
        if self.polling.interval_ms == 0 {
            return Err(CloneError::Config("polling.interval_ms must be > 0".into()));
        }
        if self.polling.max_wait_secs == 0 {
            return Err(CloneError::Config("polling.max_wait_secs must be > 0".into()));
        }
        if self.cleanup.concurrency == 0 {
            return Err(CloneError::Config("cleanup.concurrency must be > 0".into()));
        }
        Ok(())
    }
}

pub fn generate_default_config() -> Settings {
    Settings {
        cluster: ClusterSettings {
            host: String::new(),
            port: 9440,
            username: "admin".to_string(),
            password: "admin".to_string(),
            acropolis_path: "/api/nutanix/v0.8".to_string(),
            prism_path: "/PrismGateway/services/rest/v1".to_string(),
            accept_invalid_certs: true,
            request_timeout_secs: 30,
        },
        polling: PollingSettings {
            interval_ms: 2000,
            max_wait_secs: 1800,
            transport_retries: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 10_000,
        },
        cleanup: CleanupSettings {
            match_policy: MatchPolicy::Exact,
            concurrency: 4,
        },
        clone: CloneSettings {
            name_suffix: "-clone".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_distinct_api_bases() {
        let mut s = generate_default_config();
        s.cluster.host = "10.0.0.5".into();
        assert_eq!(s.cluster.acropolis_base(), "https://10.0.0.5:9440/api/nutanix/v0.8");
        assert_eq!(
            s.cluster.prism_base(),
            "https://10.0.0.5:9440/PrismGateway/services/rest/v1"
        );
    }

    #[test]
    fn validate_requires_host() {
        let s = generate_default_config();
        assert!(matches!(s.validate(), Err(CloneError::Config(_))));

        let mut s = s;
        s.cluster.host = "cluster.local".into();
        assert!(s.validate().is_ok());

        s.cleanup.concurrency = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn match_policy_semantics() {
        assert!(MatchPolicy::Exact.matches("tmp-clone", "tmp-clone"));
        assert!(!MatchPolicy::Exact.matches("tmp-clone", "tmp-clone-2"));
        assert!(MatchPolicy::Prefix.matches("tmp-clone", "tmp-clone-2"));
        assert!(!MatchPolicy::Prefix.matches("tmp-clone", "tmp"));
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let s = generate_default_config();
        let text = toml::to_string_pretty(&s).unwrap();
        assert!(text.contains("match_policy = \"exact\""));
        let back: Settings = toml::from_str(&text).unwrap();
        assert_eq!(back.polling.interval_ms, s.polling.interval_ms);
    }

    #[test]
    fn load_from_missing_dir_uses_defaults() {
        let s = Settings::load(Some(Path::new("/nonexistent/vm-clone-config"))).unwrap();
        assert_eq!(s.cluster.port, 9440);
        assert_eq!(s.cleanup.match_policy, MatchPolicy::Exact);
        assert_eq!(s.clone.name_suffix, "-clone");
    }
}
