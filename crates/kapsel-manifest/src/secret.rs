use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kapsel_model::RegistryLogin;
use serde::Serialize;
use serde_json::json;

use crate::error::ManifestError;
use crate::resources::Metadata;

pub const IMAGE_PULL_SECRET_NAME: &str = "image-pull-secret";

/// Registry assumed when a login omits the registry URL.
pub const DEFAULT_REGISTRY_URL: &str = "https://index.docker.io/v1/";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    #[serde(rename = "type")]
    pub secret_type: String,
    pub data: BTreeMap<String, String>,
}

/// Build the docker-config pull secret for the configured registry logins.
///
/// Returns the manifest together with the literals that must be masked before
/// the document is written to any log.
pub fn image_pull_secret(
    namespace: &str,
    logins: &[RegistryLogin],
) -> Result<(SecretManifest, Vec<String>), ManifestError> {
    let mut auths = serde_json::Map::new();
    let mut mask_literals = Vec::new();

    for login in logins {
        let registry = login
            .registry_url
            .as_deref()
            .unwrap_or(DEFAULT_REGISTRY_URL);
        let auth = STANDARD.encode(format!("{}:{}", login.user_name, login.password));
        mask_literals.push(login.password.clone());
        mask_literals.push(auth.clone());
        auths.insert(
            registry.to_string(),
            json!({
                "username": login.user_name,
                "password": login.password,
                "auth": auth,
            }),
        );
    }

    let docker_config = serde_json::to_string(&json!({ "auths": auths }))?;
    let encoded = STANDARD.encode(&docker_config);
    mask_literals.push(encoded.clone());

    let mut data = BTreeMap::new();
    data.insert(".dockerconfigjson".to_string(), encoded);

    let manifest = SecretManifest {
        api_version: "v1".into(),
        kind: "Secret".into(),
        metadata: Metadata::namespaced(IMAGE_PULL_SECRET_NAME, namespace),
        secret_type: "kubernetes.io/dockerconfigjson".into(),
        data,
    };
    Ok((manifest, mask_literals))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login(registry: Option<&str>) -> RegistryLogin {
        RegistryLogin {
            registry_url: registry.map(str::to_string),
            user_name: "builder".into(),
            password: "s3cret".into(),
        }
    }

    #[test]
    fn encodes_docker_config_with_default_registry() {
        let (secret, _) = image_pull_secret("ns", &[login(None)]).unwrap();

        assert_eq!(secret.secret_type, "kubernetes.io/dockerconfigjson");
        let encoded = &secret.data[".dockerconfigjson"];
        let decoded = STANDARD.decode(encoded).unwrap();
        let config: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(config["auths"][DEFAULT_REGISTRY_URL]["username"], "builder");
        assert_eq!(
            config["auths"][DEFAULT_REGISTRY_URL]["auth"],
            STANDARD.encode("builder:s3cret")
        );
    }

    #[test]
    fn explicit_registry_url_is_kept() {
        let (secret, _) =
            image_pull_secret("ns", &[login(Some("registry.example.com"))]).unwrap();

        let decoded = STANDARD
            .decode(&secret.data[".dockerconfigjson"])
            .unwrap();
        let config: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert!(config["auths"]["registry.example.com"].is_object());
    }

    #[test]
    fn mask_literals_cover_password_and_encodings() {
        let (secret, masks) = image_pull_secret("ns", &[login(None)]).unwrap();

        assert!(masks.contains(&"s3cret".to_string()));
        assert!(masks.contains(&STANDARD.encode("builder:s3cret")));
        assert!(masks.contains(&secret.data[".dockerconfigjson"]));
    }
}
