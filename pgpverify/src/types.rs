use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use pgpverify_core::{ArtifactCoordinate, PolicyLoadError};
use thiserror::Error;

/// Where the bytes of an artifact or signature live.
#[derive(Clone, Debug)]
pub enum ByteSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

impl ByteSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Bytes(bytes.into())
    }

    /// Read the whole source. Blocking; call from a blocking worker.
    pub fn read(&self) -> std::io::Result<Arc<[u8]>> {
        match self {
            Self::Path(path) => fs::read(path).map(Arc::from),
            Self::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Bytes(bytes) => format!("<{} bytes in memory>", bytes.len()),
        }
    }
}

/// One artifact to verify, with its detached signature when there is one.
#[derive(Clone, Debug)]
pub struct ArtifactInput {
    pub coordinate: ArtifactCoordinate,
    pub artifact: ByteSource,
    pub signature: Option<ByteSource>,
}

impl ArtifactInput {
    pub fn new(
        coordinate: ArtifactCoordinate,
        artifact: ByteSource,
        signature: Option<ByteSource>,
    ) -> Self {
        Self {
            coordinate,
            artifact,
            signature,
        }
    }

    /// Artifact file plus `<file>.asc` when that file exists.
    pub fn from_file(coordinate: ArtifactCoordinate, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut asc = path.clone().into_os_string();
        asc.push(".asc");
        let asc = PathBuf::from(asc);
        let signature = asc.is_file().then(|| ByteSource::Path(asc));
        Self::new(coordinate, ByteSource::Path(path), signature)
    }
}

/// Process-level errors. Per-artifact problems are reported as outcomes instead.
#[derive(Debug, Error)]
pub enum PgpVerifyError {
    #[error(transparent)]
    Policy(#[from] PolicyLoadError),
    #[error("invalid key server `{input}`: {reason}")]
    InvalidEndpoint { input: String, reason: String },
    #[error("no key servers configured")]
    NoKeyServers,
    #[error("artifact `{0}` listed more than once")]
    DuplicateArtifact(ArtifactCoordinate),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] serde_yaml_bw::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PgpVerifyError {
    pub fn invalid_endpoint(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            input: input.into(),
            reason: reason.into(),
        }
    }
}
