mod error;
pub use error::ManifestError;

mod resources;
pub use resources::{
    Container, EnvEntry, HostPath, Metadata, NameRef, PodManifest, PodSpec, Resources, Volume,
    VolumeMount,
};

mod affinity;
pub use affinity::{Affinity, MAX_AFFINITY_WEIGHT, node_affinity};

mod pod;
pub use pod::{
    INIT_CONTAINER, JOB_POD_NAME, JobPodParams, MAIN_CONTAINER, SIDECAR_CONTAINER, job_pod,
};

mod secret;
pub use secret::{DEFAULT_REGISTRY_URL, IMAGE_PULL_SECRET_NAME, SecretManifest, image_pull_secret};

mod configmap;
pub use configmap::{ConfigMapManifest, TRUST_CERTS_CONFIG_MAP_NAME, trust_certs_config_map};

mod service;
pub use service::{
    ServiceManifest, ServicePodParams, headless_service, service_pod, service_pod_name,
};

/// Serialize a manifest to the cluster's document text format.
pub fn render<T: serde::Serialize>(manifest: &T) -> Result<String, ManifestError> {
    Ok(serde_yaml::to_string(manifest)?)
}
