use std::collections::BTreeMap;
use std::fs;

use kapsel_model::ServerSettings;
use serde::Serialize;

use crate::error::ManifestError;
use crate::resources::Metadata;

pub const TRUST_CERTS_CONFIG_MAP_NAME: &str = "trust-certs";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub data: BTreeMap<String, String>,
}

/// Collect trusted certificates into a config map, or None when the server
/// settings carry no certificate material.
///
/// The server certificate bundle is published under `server-cert`; each file
/// in the extra trust directory under `specified-cert-<file name>`.
pub fn trust_certs_config_map(
    namespace: &str,
    server: &ServerSettings,
) -> Result<Option<ConfigMapManifest>, ManifestError> {
    let mut data = BTreeMap::new();

    if let Some(bundle) = &server.keystore_file {
        let pem = fs::read_to_string(bundle)?;
        data.insert("server-cert".to_string(), pem);
    }

    if let Some(dir) = &server.trust_certs_dir {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let pem = fs::read_to_string(entry.path())?;
            data.insert(format!("specified-cert-{name}"), pem);
        }
    }

    if data.is_empty() {
        return Ok(None);
    }

    Ok(Some(ConfigMapManifest {
        api_version: "v1".into(),
        kind: "ConfigMap".into(),
        metadata: Metadata::namespaced(TRUST_CERTS_CONFIG_MAP_NAME, namespace),
        data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn settings() -> ServerSettings {
        ServerSettings {
            server_url: "https://kapsel.example.com".into(),
            keystore_file: None,
            trust_certs_dir: None,
        }
    }

    #[test]
    fn no_certificate_material_yields_none() {
        let map = trust_certs_config_map("ns", &settings()).unwrap();
        assert!(map.is_none());
    }

    #[test]
    fn server_bundle_and_directory_files_are_collected() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("server.pem");
        fs::write(&bundle, "SERVER PEM").unwrap();

        let certs = tempfile::tempdir().unwrap();
        let mut extra = fs::File::create(certs.path().join("corp-ca.pem")).unwrap();
        extra.write_all(b"CORP CA").unwrap();

        let mut server = settings();
        server.keystore_file = Some(bundle);
        server.trust_certs_dir = Some(certs.path().to_path_buf());

        let map = trust_certs_config_map("ns", &server).unwrap().unwrap();
        assert_eq!(map.data["server-cert"], "SERVER PEM");
        assert_eq!(map.data["specified-cert-corp-ca.pem"], "CORP CA");
        assert_eq!(map.metadata.name, TRUST_CERTS_CONFIG_MAP_NAME);
    }
}
