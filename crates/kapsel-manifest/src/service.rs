use std::collections::BTreeMap;

use kapsel_model::{JobService, NodeSelectorEntry};
use serde::Serialize;

use crate::resources::{
    Container, EnvEntry, Metadata, NameRef, PodManifest, PodSpec, Resources,
};

const SERVICE_CONTAINER: &str = "default";

/// Pod name backing a job service.
pub fn service_pod_name(service_name: &str) -> String {
    format!("service-{service_name}")
}

/// Inputs for synthesizing a service pod manifest.
#[derive(Debug)]
pub struct ServicePodParams<'a> {
    pub namespace: &'a str,
    pub service: &'a JobService,
    pub node_selector: &'a [NodeSelectorEntry],
    pub image_pull_secret: Option<&'a str>,
    pub service_account: Option<&'a str>,
}

/// Synthesize the pod running a job service container.
pub fn service_pod(params: &ServicePodParams<'_>) -> PodManifest {
    let service = params.service;

    let mut container = Container::new(SERVICE_CONTAINER, &service.image);
    if let Some(arguments) = &service.arguments {
        container.args = Some(parse_quoted(arguments));
    }
    container.env = service.env.iter().map(EnvEntry::from).collect();
    container.resources = Some(Resources::requests(
        &service.cpu_request,
        &service.memory_request,
    ));

    let node_selector: BTreeMap<String, String> = params
        .node_selector
        .iter()
        .map(|entry| (entry.label_name.clone(), entry.label_value.clone()))
        .collect();

    PodManifest::new(
        Metadata::namespaced(service_pod_name(&service.name), params.namespace)
            .with_label("service", &service.name),
        PodSpec {
            containers: vec![container],
            image_pull_secrets: params
                .image_pull_secret
                .map(|name| vec![NameRef::new(name)])
                .unwrap_or_default(),
            service_account_name: params.service_account.map(str::to_string),
            restart_policy: "Never".into(),
            node_selector,
            ..PodSpec::default()
        },
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: ServiceSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    // camelCase would render "clusterIp"; the api field capitalizes the suffix.
    #[serde(rename = "clusterIP")]
    pub cluster_ip: String,
    pub selector: BTreeMap<String, String>,
}

/// Headless service exposing the service pod under its service name.
pub fn headless_service(namespace: &str, service_name: &str) -> ServiceManifest {
    let mut selector = BTreeMap::new();
    selector.insert("service".to_string(), service_name.to_string());
    ServiceManifest {
        api_version: "v1".into(),
        kind: "Service".into(),
        metadata: Metadata::namespaced(service_name, namespace),
        spec: ServiceSpec {
            cluster_ip: "None".into(),
            selector,
        },
    }
}

/// Split a command line into arguments, honoring double-quoted segments.
fn parse_quoted(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in input.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}
