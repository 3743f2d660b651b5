use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::JobService;

/// Label name/value pair constraining which nodes may run job pods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelectorEntry {
    pub label_name: String,
    pub label_value: String,
}

impl NodeSelectorEntry {
    pub fn new<K, V>(label_name: K, label_value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            label_name: label_name.into(),
            label_value: label_value.into(),
        }
    }
}

/// Registry credentials used to build the image-pull secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryLogin {
    /// Registry url; `None` means the default public registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_url: Option<String>,
    pub user_name: String,
    pub password: String,
}

/// Overrides where a matching service pod is scheduled.
///
/// The first applicable locator wins; with no match the executor's own node
/// selector is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLocator {
    /// Service name this locator applies to; `None` matches any service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    pub node_selector: Vec<NodeSelectorEntry>,
}

impl ServiceLocator {
    pub fn is_applicable(&self, service: &JobService) -> bool {
        match &self.service_name {
            Some(name) => name == &service.name,
            None => true,
        }
    }
}

/// Static configuration of the Kubernetes executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorConfig {
    /// Node selector applied to job pods.
    pub node_selector: Vec<NodeSelectorEntry>,
    /// Prefix of the per-job namespace.
    pub namespace_prefix: String,
    /// Service account to run job pods under, if any.
    pub service_account: Option<String>,
    pub registry_logins: Vec<RegistryLogin>,
    pub service_locators: Vec<ServiceLocator>,
    /// Explicit kubeconfig; `None` lets kubectl resolve cluster access itself.
    pub config_file: Option<PathBuf>,
    /// Explicit kubectl binary; `None` resolves from the search path.
    pub kubectl_path: Option<PathBuf>,
    /// Record per-key cache counts as node labels to steer scheduling.
    pub create_cache_labels: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            node_selector: Vec::new(),
            namespace_prefix: "kapsel-ci".to_string(),
            service_account: None,
            registry_logins: Vec::new(),
            service_locators: Vec::new(),
            config_file: None,
            kubectl_path: None,
            create_cache_labels: true,
        }
    }
}

/// Server-side settings the executor consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Base url injected into helper containers for the in-cluster callback.
    pub server_url: String,
    /// PEM bundle whose content becomes the `server-cert` trust entry.
    pub keystore_file: Option<PathBuf>,
    /// Directory of loose certificate files to trust.
    pub trust_certs_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Env;

    fn service(name: &str) -> JobService {
        JobService {
            name: name.into(),
            image: "redis:7".into(),
            env: Env::new(),
            arguments: None,
            cpu_request: "250m".into(),
            memory_request: "128Mi".into(),
            readiness_check_command: "redis-cli ping".into(),
        }
    }

    #[test]
    fn default_config_values() {
        let cfg = ExecutorConfig::default();
        assert_eq!(cfg.namespace_prefix, "kapsel-ci");
        assert!(cfg.create_cache_labels);
        assert!(cfg.kubectl_path.is_none());
    }

    #[test]
    fn locator_matches_by_name_or_any() {
        let named = ServiceLocator {
            service_name: Some("db".into()),
            node_selector: vec![NodeSelectorEntry::new("disk", "ssd")],
        };
        let any = ServiceLocator {
            service_name: None,
            node_selector: Vec::new(),
        };

        assert!(named.is_applicable(&service("db")));
        assert!(!named.is_applicable(&service("cache")));
        assert!(any.is_applicable(&service("cache")));
    }

    #[test]
    fn config_deserializes_partial_document() {
        let cfg: ExecutorConfig = serde_json::from_str(
            r#"{"namespacePrefix": "ci", "createCacheLabels": false}"#,
        )
        .unwrap();
        assert_eq!(cfg.namespace_prefix, "ci");
        assert!(!cfg.create_cache_labels);
        assert!(cfg.node_selector.is_empty());
    }
}
