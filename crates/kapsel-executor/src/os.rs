use serde_json::Value;

use kapsel_kubectl::Kubectl;
use kapsel_model::{JobLogger, NodeSelectorEntry, OsBaseline, OsFamily};

use crate::error::{ExecuteError, ExecuteResult};

/// Kernel version substrings mapped to Windows release numbers, newest
/// first. Containers built for a release only run on matching node kernels,
/// so the fleet's lowest release decides the helper image.
const WINDOWS_RELEASES: [(&str, u32); 5] = [
    (".18362.", 1903),
    (".17763.", 1809),
    (".17134.", 1803),
    (".16299.", 1709),
    (".14393.", 1607),
];

fn windows_release(kernel_version: &str) -> Option<u32> {
    WINDOWS_RELEASES
        .iter()
        .find(|(needle, _)| kernel_version.contains(needle))
        .map(|&(_, release)| release)
}

/// Pick the fleet baseline from node snapshots.
///
/// Nodes marked unschedulable are ignored. A fleet mixing Linux and Windows
/// under one selector cannot host a single pod spec and is rejected.
pub fn baseline(nodes: &Value) -> ExecuteResult<OsBaseline> {
    let items = nodes["items"].as_array().map(Vec::as_slice).unwrap_or(&[]);

    let mut picked: Option<OsBaseline> = None;
    for node in items {
        if node["spec"]["unschedulable"].as_bool() == Some(true) {
            continue;
        }
        let info = &node["status"]["nodeInfo"];
        let os = info["operatingSystem"].as_str().unwrap_or_default();
        let kernel = info["kernelVersion"].as_str().unwrap_or_default();

        let family = match os {
            "linux" => OsFamily::Linux,
            "windows" => OsFamily::Windows,
            other => {
                return Err(ExecuteError::Configuration(format!(
                    "Unsupported node operating system: {other}"
                )));
            }
        };

        let candidate = OsBaseline {
            family,
            kernel_version: kernel.to_string(),
            windows_release: match family {
                OsFamily::Linux => None,
                OsFamily::Windows => Some(windows_release(kernel).ok_or_else(|| {
                    ExecuteError::Configuration(format!(
                        "Unsupported Windows kernel version: {kernel}"
                    ))
                })?),
            },
        };

        picked = Some(match picked {
            None => candidate,
            Some(current) if current.family != candidate.family => {
                return Err(ExecuteError::Configuration(
                    "Linux and Windows nodes can not be mixed under one node selector"
                        .to_string(),
                ));
            }
            // Lowest release wins; containers for it run everywhere.
            Some(current)
                if candidate.windows_release.is_some()
                    && candidate.windows_release < current.windows_release =>
            {
                candidate
            }
            Some(current) => current,
        });
    }

    picked.ok_or_else(|| {
        ExecuteError::Configuration("No applicable working nodes found".to_string())
    })
}

/// Resolve the baseline from the live fleet, restricted to the executor's
/// node selector.
pub async fn resolve_baseline(
    kubectl: &Kubectl,
    node_selector: &[NodeSelectorEntry],
    job_log: &dyn JobLogger,
) -> ExecuteResult<OsBaseline> {
    let mut args = vec!["get".to_string(), "nodes".to_string()];
    for entry in node_selector {
        args.push("-l".to_string());
        args.push(format!("{}={}", entry.label_name, entry.label_value));
    }
    args.push("-o".to_string());
    args.push("json".to_string());

    let nodes = kubectl.run_json(&args, job_log).await?;
    baseline(&nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(os: &str, kernel: &str, unschedulable: bool) -> Value {
        json!({
            "spec": { "unschedulable": unschedulable },
            "status": { "nodeInfo": {
                "operatingSystem": os,
                "kernelVersion": kernel,
            }},
        })
    }

    #[test]
    fn linux_fleet_yields_linux_baseline() {
        let nodes = json!({ "items": [node("linux", "5.15.0-91-generic", false)] });
        let baseline = baseline(&nodes).unwrap();
        assert!(baseline.is_linux());
        assert_eq!(baseline.helper_image_suffix(), "linux");
    }

    #[test]
    fn unschedulable_nodes_are_skipped() {
        let nodes = json!({ "items": [node("linux", "5.15.0", true)] });
        let err = baseline(&nodes).unwrap_err();
        assert!(matches!(err, ExecuteError::Configuration(_)));
        assert!(err.to_string().contains("No applicable working nodes"));
    }

    #[test]
    fn mixed_fleet_is_rejected() {
        let nodes = json!({ "items": [
            node("linux", "5.15.0", false),
            node("windows", "10.0.17763.4131", false),
        ]});
        assert!(matches!(
            baseline(&nodes).unwrap_err(),
            ExecuteError::Configuration(_)
        ));
    }

    #[test]
    fn lowest_windows_release_wins() {
        let nodes = json!({ "items": [
            node("windows", "10.0.18362.1016", false),
            node("windows", "10.0.17763.4131", false),
        ]});
        let baseline = baseline(&nodes).unwrap();
        assert_eq!(baseline.windows_release, Some(1809));
        assert_eq!(baseline.helper_image_suffix(), "windows-1809");
    }

    #[test]
    fn unknown_windows_kernel_fails() {
        let nodes = json!({ "items": [node("windows", "10.0.99999.1", false)] });
        let err = baseline(&nodes).unwrap_err();
        assert!(err.to_string().contains("Unsupported Windows kernel"));
    }
}
