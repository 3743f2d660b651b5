use std::collections::BTreeMap;

use kapsel_model::{
    CacheSpec, ENV_JOB_TOKEN, ENV_SERVER_URL, NodeSelectorEntry, OsBaseline,
};

use crate::affinity::node_affinity;
use crate::resources::{
    Container, EnvEntry, Metadata, NameRef, PodManifest, PodSpec, Resources, Volume, VolumeMount,
};

pub const JOB_POD_NAME: &str = "job";
pub const INIT_CONTAINER: &str = "init";
pub const MAIN_CONTAINER: &str = "main";
pub const SIDECAR_CONTAINER: &str = "sidecar";

const HELPER_IMAGE_REPO: &str = "kapsel/k8s-helper";
const HELPER_IMAGE_VERSION: &str = "latest";

/// Inputs for synthesizing the job pod manifest.
#[derive(Debug)]
pub struct JobPodParams<'a> {
    pub namespace: &'a str,
    pub image: &'a str,
    pub job_token: &'a str,
    pub server_url: &'a str,
    pub baseline: &'a OsBaseline,
    /// Main-container resource requests; absent in executor self-test mode.
    pub cpu_request: Option<&'a str>,
    pub memory_request: Option<&'a str>,
    pub node_selector: &'a [NodeSelectorEntry],
    pub cache_specs: &'a [CacheSpec],
    pub image_pull_secret: Option<&'a str>,
    pub service_account: Option<&'a str>,
    pub trust_certs: bool,
    pub test_mode: bool,
}

/// Synthesize the job pod: init + main + sidecar over shared volumes.
///
/// The main container's entrypoint is the command script materialized by the
/// init helper into the ephemeral working directory; init and sidecar run
/// the matching helper image for the OS baseline.
pub fn job_pod(params: &JobPodParams<'_>) -> PodManifest {
    let baseline = params.baseline;

    let (ci_home, cache_home, trust_certs_home, docker_sock) = if baseline.is_linux() {
        (
            "/kapsel-ci".to_string(),
            "/kapsel-ci/cache".to_string(),
            "/kapsel-ci/trust-certs".to_string(),
            Some("/var/run/docker.sock".to_string()),
        )
    } else {
        (
            r"C:\kapsel-ci".to_string(),
            r"C:\kapsel-ci\cache".to_string(),
            r"C:\kapsel-ci\trust-certs".to_string(),
            None,
        )
    };

    let mut volume_mounts = vec![
        VolumeMount::new("ci-home", &ci_home),
        VolumeMount::new("cache-home", &cache_home),
    ];
    if params.trust_certs {
        volume_mounts.push(VolumeMount::new("trust-certs-home", &trust_certs_home));
    }
    if let Some(sock) = &docker_sock {
        volume_mounts.push(VolumeMount::new("docker-sock", sock));
    }

    let mut main = Container::new(MAIN_CONTAINER, params.image);
    if baseline.is_linux() {
        main.command = Some(vec!["sh".into()]);
        main.args = Some(vec![format!("{ci_home}/commands.sh")]);
    } else {
        main.command = Some(vec!["cmd".into()]);
        main.args = Some(vec!["/c".into(), format!("{ci_home}\\commands.bat")]);
    }
    main.volume_mounts = volume_mounts.clone();
    if let (Some(cpu), Some(memory)) = (params.cpu_request, params.memory_request) {
        main.resources = Some(Resources::requests(cpu, memory));
    }

    let helper_env = vec![
        EnvEntry::new(ENV_SERVER_URL, params.server_url),
        EnvEntry::new(ENV_JOB_TOKEN, params.job_token),
    ];
    let helper_image = format!(
        "{HELPER_IMAGE_REPO}-{}:{HELPER_IMAGE_VERSION}",
        baseline.helper_image_suffix()
    );

    let helper_container = |name: &str, role: &str| {
        let mut container = Container::new(name, &helper_image);
        container.command = Some(vec!["kapsel-helper".into()]);
        let mut args = vec![role.to_string()];
        if params.test_mode {
            args.push("test".into());
        }
        container.args = Some(args);
        container.env = helper_env.clone();
        container.volume_mounts = volume_mounts.clone();
        container
    };

    let init = helper_container(INIT_CONTAINER, "init");
    let sidecar = helper_container(SIDECAR_CONTAINER, "sidecar");

    let mut volumes = vec![
        Volume::empty_dir("ci-home"),
        Volume::host_path("cache-home", baseline.cache_home(), "DirectoryOrCreate"),
    ];
    if params.trust_certs {
        volumes.push(Volume::config_map(
            "trust-certs-home",
            crate::configmap::TRUST_CERTS_CONFIG_MAP_NAME,
        ));
    }
    if let Some(sock) = &docker_sock {
        volumes.push(Volume::host_path("docker-sock", sock, "File"));
    }

    let node_selector: BTreeMap<String, String> = params
        .node_selector
        .iter()
        .map(|entry| (entry.label_name.clone(), entry.label_value.clone()))
        .collect();

    PodManifest::new(
        Metadata::namespaced(JOB_POD_NAME, params.namespace),
        PodSpec {
            init_containers: vec![init],
            containers: vec![main, sidecar],
            affinity: node_affinity(params.node_selector, params.cache_specs),
            image_pull_secrets: params
                .image_pull_secret
                .map(|name| vec![NameRef::new(name)])
                .unwrap_or_default(),
            service_account_name: params.service_account.map(str::to_string),
            restart_policy: "Never".into(),
            node_selector,
            volumes,
        },
    )
}
