use pgpverify_core::{ArtifactCoordinate, VerificationOutcome};
use serde::Serialize;

/// Outcome for one artifact plus the digest of the bytes that were checked.
#[derive(Clone, Debug, Serialize)]
pub struct ArtifactReport {
    #[serde(flatten)]
    pub outcome: VerificationOutcome,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ArtifactReport {
    pub fn new(outcome: VerificationOutcome, sha256: Option<String>) -> Self {
        Self {
            accepted: outcome.is_accepted(),
            outcome,
            sha256,
        }
    }

    pub fn coordinate(&self) -> &ArtifactCoordinate {
        &self.outcome.coordinate
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub entries: Vec<ArtifactReport>,
}

impl RunReport {
    /// Sort entries by coordinate and compute the overall verdict.
    pub fn new(mut entries: Vec<ArtifactReport>) -> Self {
        entries.sort_by(|a, b| a.coordinate().cmp(b.coordinate()));
        Self {
            success: entries.iter().all(|entry| entry.accepted),
            entries,
        }
    }

    pub fn get(&self, coordinate: &ArtifactCoordinate) -> Option<&ArtifactReport> {
        self.entries
            .binary_search_by(|entry| entry.coordinate().cmp(coordinate))
            .ok()
            .map(|index| &self.entries[index])
    }

    pub fn failures(&self) -> impl Iterator<Item = &ArtifactReport> {
        self.entries.iter().filter(|entry| !entry.accepted)
    }

    /// One event per artifact: `info` when accepted, `error` otherwise.
    pub fn log(&self) {
        for entry in &self.entries {
            let outcome = &entry.outcome;
            if entry.accepted {
                tracing::info!(
                    coordinate = %outcome.coordinate,
                    status = %outcome.status,
                    detail = %outcome.detail,
                    "artifact signature accepted"
                );
            } else {
                tracing::error!(
                    coordinate = %outcome.coordinate,
                    status = %outcome.status,
                    detail = %outcome.detail,
                    "artifact signature rejected"
                );
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use pgpverify_core::VerificationStatus;
    use serde_json::Value;

    use super::*;

    fn entry(coordinate: &str, status: VerificationStatus) -> ArtifactReport {
        ArtifactReport::new(
            VerificationOutcome::new(coordinate.parse().unwrap(), status, None, "detail"),
            Some("00".into()),
        )
    }

    #[test]
    fn entries_are_sorted_and_success_requires_all_accepted() {
        let report = RunReport::new(vec![
            entry("org.b:b:jar:1", VerificationStatus::SignatureOk),
            entry("org.a:a:jar:1", VerificationStatus::KeyNotFoundOnServer),
        ]);
        let order: Vec<String> = report
            .entries
            .iter()
            .map(|entry| entry.coordinate().to_string())
            .collect();
        assert_eq!(order, ["org.a:a:jar:1", "org.b:b:jar:1"]);
        assert!(!report.success);
        assert_eq!(report.failures().count(), 1);

        let found = report.get(&"org.b:b:jar:1".parse().unwrap()).unwrap();
        assert!(found.accepted);
    }

    #[test]
    fn empty_run_succeeds() {
        assert!(RunReport::new(Vec::new()).success);
    }

    #[test]
    fn serializes_flat_entries() {
        let report = RunReport::new(vec![entry(
            "org.a:a:jar:1",
            VerificationStatus::KeyRevokedWithPublicKey {
                allowed_by_policy: true,
            },
        )]);
        let json: Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        let first = &json["entries"][0];
        assert_eq!(json["success"], true);
        assert_eq!(first["coordinate"]["type"], "jar");
        assert_eq!(first["status"]["kind"], "key_revoked_with_public_key");
        assert_eq!(first["status"]["allowed_by_policy"], true);
        assert_eq!(first["sha256"], "00");
    }
}
