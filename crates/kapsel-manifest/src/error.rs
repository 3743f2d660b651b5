use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}
