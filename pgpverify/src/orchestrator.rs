use std::sync::Arc;

use indexmap::IndexMap;
use pgpverify_core::{
    ArtifactCoordinate, DetachedSignature, Evidence, ResolvedKey, TrustPolicy,
    VerificationOutcome, VerificationStatus, VerifyOptions, VerifyRequest, compute_digest, verify,
};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::instrument;

use crate::cache::KeyCache;
use crate::report::{ArtifactReport, RunReport};
use crate::types::{ArtifactInput, PgpVerifyError};

pub const DEFAULT_PARALLELISM: usize = 8;

/// Verifies batches of artifacts against one keys map and one key cache.
#[derive(Clone)]
pub struct Verifier {
    policy: Arc<TrustPolicy>,
    keys: Arc<KeyCache>,
    options: VerifyOptions,
    parallelism: usize,
}

enum Prepared {
    Unsigned,
    Unreadable(String),
    Signed(DetachedSignature, ResolvedKey),
}

impl Verifier {
    pub fn new(policy: Arc<TrustPolicy>, keys: Arc<KeyCache>) -> Self {
        Self {
            policy,
            keys,
            options: VerifyOptions::default(),
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    pub fn with_options(mut self, options: VerifyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn policy(&self) -> &TrustPolicy {
        &self.policy
    }

    /// Verify every artifact. Individual failures end up in the report; only a
    /// malformed batch is an error.
    pub async fn verify_all(
        &self,
        inputs: Vec<ArtifactInput>,
    ) -> Result<RunReport, PgpVerifyError> {
        let mut unique = IndexMap::with_capacity(inputs.len());
        for input in inputs {
            if unique.contains_key(&input.coordinate) {
                return Err(PgpVerifyError::DuplicateArtifact(input.coordinate));
            }
            unique.insert(input.coordinate.clone(), input);
        }

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = JoinSet::new();
        for input in unique.into_values() {
            let verifier = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                verifier.verify_one(input).await
            });
        }

        let mut entries = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let entry = joined.map_err(|err| {
                PgpVerifyError::Internal(format!("verification task failed: {err}"))
            })?;
            entries.push(entry);
        }

        let report = RunReport::new(entries);
        tracing::debug!(
            artifacts = report.entries.len(),
            failures = report.failures().count(),
            "verification run finished"
        );
        Ok(report)
    }

    #[instrument(skip(self, input), fields(coordinate = %input.coordinate))]
    pub async fn verify_one(&self, input: ArtifactInput) -> ArtifactReport {
        let ArtifactInput {
            coordinate,
            artifact,
            signature,
        } = input;

        let read = tokio::task::spawn_blocking(move || {
            let artifact_bytes = artifact
                .read()
                .map_err(|err| format!("failed to read artifact {}: {err}", artifact.describe()))?;
            let signature_bytes = signature.map(|source| {
                source
                    .read()
                    .map_err(|err| format!("failed to read {}: {err}", source.describe()))
            });
            Ok::<_, String>((artifact_bytes, signature_bytes))
        })
        .await;

        let (artifact_bytes, signature_bytes) = match read {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(detail)) => return invalid(coordinate, detail),
            Err(err) => return invalid(coordinate, join_failure(err)),
        };
        let digest = compute_digest(&artifact_bytes);

        let prepared = match signature_bytes {
            None => Prepared::Unsigned,
            Some(Err(detail)) => Prepared::Unreadable(detail),
            Some(Ok(bytes)) => match DetachedSignature::parse(&bytes) {
                Err(err) => Prepared::Unreadable(err.to_string()),
                Ok(signature) => {
                    let handle = self
                        .policy
                        .key_hint(&coordinate, signature.issuer())
                        .unwrap_or(signature.issuer())
                        .clone();
                    let key = self.keys.resolve(&handle).await;
                    Prepared::Signed(signature, key)
                }
            },
        };

        let policy = self.policy.clone();
        let options = self.options.clone();
        let target = coordinate.clone();
        let checked = tokio::task::spawn_blocking(move || {
            let evidence = match &prepared {
                Prepared::Unsigned => Evidence::Unsigned,
                Prepared::Unreadable(reason) => Evidence::Unreadable(reason),
                Prepared::Signed(signature, key) => Evidence::Signed { signature, key },
            };
            verify(
                &VerifyRequest {
                    coordinate: &target,
                    artifact: &artifact_bytes,
                    evidence,
                },
                &policy,
                &options,
            )
        })
        .await;

        match checked {
            Ok(outcome) => ArtifactReport::new(outcome, Some(digest)),
            Err(err) => ArtifactReport::new(
                VerificationOutcome::new(
                    coordinate,
                    VerificationStatus::SignatureInvalid,
                    None,
                    join_failure(err),
                ),
                Some(digest),
            ),
        }
    }
}

fn invalid(coordinate: ArtifactCoordinate, detail: String) -> ArtifactReport {
    tracing::warn!(coordinate = %coordinate, %detail, "artifact could not be read");
    ArtifactReport::new(
        VerificationOutcome::new(coordinate, VerificationStatus::SignatureInvalid, None, detail),
        None,
    )
}

fn join_failure(err: JoinError) -> String {
    format!("verification worker failed: {err}")
}
