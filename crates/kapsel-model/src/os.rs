use serde::{Deserialize, Serialize};

/// Operating-system family of a node fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OsFamily {
    Linux,
    Windows,
}

/// Resolved OS/kernel baseline shared by all candidate nodes of a job.
///
/// The fleet must be homogeneous; for Windows the baseline carries the
/// release number the job image must stay compatible with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsBaseline {
    pub family: OsFamily,
    pub kernel_version: String,
    /// Windows release number (e.g. 1809); `None` on Linux.
    pub windows_release: Option<u32>,
}

impl OsBaseline {
    pub fn is_linux(&self) -> bool {
        self.family == OsFamily::Linux
    }

    /// Host directory backing the per-node build cache.
    pub fn cache_home(&self) -> &'static str {
        match self.family {
            OsFamily::Linux => "/var/cache/kapsel-ci",
            OsFamily::Windows => r"C:\ProgramData\kapsel-ci\cache",
        }
    }

    /// Suffix selecting the matching helper image variant.
    pub fn helper_image_suffix(&self) -> String {
        match self.family {
            OsFamily::Linux => "linux".to_string(),
            OsFamily::Windows => {
                format!("windows-{}", self.windows_release.unwrap_or_default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linux_baseline_paths_and_suffix() {
        let baseline = OsBaseline {
            family: OsFamily::Linux,
            kernel_version: "5.15.0".into(),
            windows_release: None,
        };
        assert!(baseline.is_linux());
        assert_eq!(baseline.cache_home(), "/var/cache/kapsel-ci");
        assert_eq!(baseline.helper_image_suffix(), "linux");
    }

    #[test]
    fn windows_baseline_suffix_carries_release() {
        let baseline = OsBaseline {
            family: OsFamily::Windows,
            kernel_version: "10.0.17763.1234".into(),
            windows_release: Some(1809),
        };
        assert!(!baseline.is_linux());
        assert_eq!(baseline.helper_image_suffix(), "windows-1809");
    }
}
