use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::openpgp::PublicKeyRing;

/// Where a resolved key block came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyOrigin {
    KeyServer { url: String },
    DiskCache(PathBuf),
    Provided,
}

impl fmt::Display for KeyOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyServer { url } => write!(f, "key server {url}"),
            Self::DiskCache(path) => write!(f, "cache {}", path.display()),
            Self::Provided => f.write_str("caller"),
        }
    }
}

/// Result of looking up a public key.
#[derive(Clone, Debug)]
pub enum ResolvedKey {
    Found {
        ring: Arc<PublicKeyRing>,
        origin: KeyOrigin,
    },
    /// A reachable server answered that it has no such key.
    NotFound,
    /// Every attempted endpoint failed at the transport level.
    FetchError(String),
}

impl ResolvedKey {
    pub fn found(ring: PublicKeyRing, origin: KeyOrigin) -> Self {
        Self::Found {
            ring: Arc::new(ring),
            origin,
        }
    }

    pub fn ring(&self) -> Option<&Arc<PublicKeyRing>> {
        match self {
            Self::Found { ring, .. } => Some(ring),
            _ => None,
        }
    }
}

/// Hex SHA-256 of artifact bytes, recorded in reports.
pub fn compute_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hash = hasher.finalize();
    hex::encode(hash)
}
