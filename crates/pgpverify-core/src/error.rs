use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Malformed artifact or key pattern.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("invalid artifact pattern `{input}`: {reason}")]
    InvalidArtifact { input: String, reason: String },
    #[error("invalid key `{input}`: {reason}")]
    InvalidKey { input: String, reason: String },
    #[error("invalid artifact coordinate `{input}`: expected group:artifact:type:version")]
    InvalidCoordinate { input: String },
}

/// Fatal errors raised while building a [`TrustPolicy`](crate::TrustPolicy).
#[derive(Debug, Error)]
pub enum PolicyLoadError {
    #[error("failed to read keys map `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{source_name}:{line}: {message}")]
    Syntax {
        source_name: String,
        line: usize,
        message: String,
    },
    #[error("{source_name}:{line}: {source}")]
    Pattern {
        source_name: String,
        line: usize,
        #[source]
        source: PatternError,
    },
    #[error("keys map include cycle: {}", chain.join(" -> "))]
    IncludeCycle { chain: Vec<String> },
}

impl PolicyLoadError {
    pub fn syntax(source_name: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            source_name: source_name.into(),
            line,
            message: message.into(),
        }
    }

    pub fn pattern(source_name: impl Into<String>, line: usize, source: PatternError) -> Self {
        Self::Pattern {
            source_name: source_name.into(),
            line,
            source,
        }
    }
}

/// Failures reported by the OpenPGP primitive.
#[derive(Debug, Error)]
pub enum OpenPgpError {
    #[error("invalid public key block: {0}")]
    InvalidKey(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("signature carries no issuer key ID or fingerprint")]
    MissingIssuer,
    #[error("key ring {primary} has no key {wanted}")]
    UnknownSigningKey { primary: String, wanted: String },
    #[error("signature verification failed: {0}")]
    VerificationFailed(String),
}

impl OpenPgpError {
    pub(crate) fn invalid_key(err: anyhow::Error) -> Self {
        Self::InvalidKey(render_chain(&err))
    }

    pub(crate) fn invalid_signature(err: anyhow::Error) -> Self {
        Self::InvalidSignature(render_chain(&err))
    }

    pub(crate) fn verification(err: anyhow::Error) -> Self {
        Self::VerificationFailed(render_chain(&err))
    }
}

fn render_chain(err: &anyhow::Error) -> String {
    err.chain()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}
