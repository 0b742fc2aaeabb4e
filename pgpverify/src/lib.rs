//! Key-server resolution and parallel verification of OpenPGP-signed artifacts.

pub mod cache;
pub mod config;
pub mod keyserver;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod types;

pub use cache::{DiskCache, KeyCache};
pub use config::{RunConfig, load_config};
pub use keyserver::{
    AttemptOutcome, FetchAttempt, KeyFetcher, KeyLookup, KeyServerClient, KeyServerEndpoint,
    KeyServerGroup, Protocol, Strategy, TransportError,
};
pub use orchestrator::Verifier;
pub use report::{ArtifactReport, RunReport};
pub use types::{ArtifactInput, ByteSource, PgpVerifyError};

pub use pgpverify_core;

/// Load a run configuration from disk and verify `inputs` with it.
pub async fn verify_with_config(
    path: &std::path::Path,
    inputs: Vec<ArtifactInput>,
) -> Result<RunReport, PgpVerifyError> {
    let config = load_config(path)?;
    let verifier = config.build_verifier()?;
    let report = verifier.verify_all(inputs).await?;
    report.log();
    Ok(report)
}
