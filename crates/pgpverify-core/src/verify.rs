use crate::keys_map::{Decision, TrustPolicy};
use crate::openpgp::{DetachedSignature, Revocation};
use crate::outcome::{
    SIGNATURE_UNAVAILABLE_CONSISTENT, SignerInfo, VerificationOutcome, VerificationStatus,
};
use crate::pattern::{ArtifactCoordinate, Signer};
use crate::resolve::ResolvedKey;

/// Knobs that are not part of the keys map itself.
#[derive(Clone, Debug)]
pub struct VerifyOptions {
    /// Treat unsigned artifacts that no keys-map rule mentions as failures.
    pub fail_on_unsigned: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            fail_on_unsigned: true,
        }
    }
}

/// What is known about an artifact's signature once its key was looked up.
#[derive(Clone, Copy, Debug)]
pub enum Evidence<'a> {
    Unsigned,
    Unreadable(&'a str),
    Signed {
        signature: &'a DetachedSignature,
        key: &'a ResolvedKey,
    },
}

#[derive(Clone, Copy, Debug)]
pub struct VerifyRequest<'a> {
    pub coordinate: &'a ArtifactCoordinate,
    pub artifact: &'a [u8],
    pub evidence: Evidence<'a>,
}

pub fn verify(
    request: &VerifyRequest<'_>,
    policy: &TrustPolicy,
    options: &VerifyOptions,
) -> VerificationOutcome {
    let coordinate = request.coordinate;
    let outcome = match request.evidence {
        Evidence::Unsigned => verify_unsigned(coordinate, policy, options),
        Evidence::Unreadable(reason) => VerificationOutcome::new(
            coordinate.clone(),
            VerificationStatus::SignatureInvalid,
            None,
            format!("PGP Signature unreadable: {reason}"),
        ),
        Evidence::Signed { signature, key } => {
            verify_signed(coordinate, request.artifact, signature, key, policy)
        }
    };

    tracing::debug!(
        coordinate = %outcome.coordinate,
        status = %outcome.status,
        detail = %outcome.detail,
        "artifact verified"
    );
    outcome
}

fn verify_unsigned(
    coordinate: &ArtifactCoordinate,
    policy: &TrustPolicy,
    options: &VerifyOptions,
) -> VerificationOutcome {
    let (status, detail) = match policy.lookup(coordinate, Signer::Unsigned) {
        Decision::Allowed { .. } => (
            VerificationStatus::SignatureUnavailableConsistentWithPolicy,
            SIGNATURE_UNAVAILABLE_CONSISTENT,
        ),
        Decision::Rejected => (
            VerificationStatus::SignatureUnavailableNotAllowed,
            "PGP Signature unavailable, not allowed by keys map.",
        ),
        Decision::Unlisted if options.fail_on_unsigned => (
            VerificationStatus::SignatureUnavailableNotAllowed,
            "PGP Signature unavailable, artifact is not listed in keys map.",
        ),
        Decision::Unlisted => (
            VerificationStatus::SignatureUnavailableConsistentWithPolicy,
            SIGNATURE_UNAVAILABLE_CONSISTENT,
        ),
    };
    VerificationOutcome::new(coordinate.clone(), status, None, detail)
}

fn verify_signed(
    coordinate: &ArtifactCoordinate,
    artifact: &[u8],
    signature: &DetachedSignature,
    key: &ResolvedKey,
    policy: &TrustPolicy,
) -> VerificationOutcome {
    let issuer = signature.issuer();
    let not_found = |detail: String| {
        VerificationOutcome::new(
            coordinate.clone(),
            VerificationStatus::KeyNotFoundOnServer,
            None,
            detail,
        )
    };

    let ring = match key {
        ResolvedKey::Found { ring, .. } => ring,
        ResolvedKey::NotFound => {
            return not_found(format!("KeyId: {issuer} not found on key server"));
        }
        ResolvedKey::FetchError(cause) => {
            return not_found(format!(
                "KeyId: {issuer} could not be fetched from any key server: {cause}"
            ));
        }
    };

    let Some(signing) = ring.signing_key(issuer) else {
        return not_found(format!(
            "KeyId: {issuer} is not a signing key of {}",
            ring.primary().fingerprint
        ));
    };

    let signer = SignerInfo::new(ring, signing);
    let description = signer.describe();
    let policy_signer = Signer::Key {
        primary: &ring.primary().fingerprint,
        signing: &signing.fingerprint,
    };
    let outcome = |status: VerificationStatus, detail: String| {
        VerificationOutcome::new(coordinate.clone(), status, Some(signer.clone()), detail)
    };

    let revocation = if signing.revocation.is_revoked() {
        &signing.revocation
    } else {
        &ring.primary().revocation
    };
    let crypto = ring.verify(signature, artifact);

    if let Revocation::Revoked {
        reason,
        comment,
        date,
    } = revocation
    {
        let mut detail = format!("{description}, key is revoked, reason: {reason}");
        if let Some(comment) = comment {
            detail.push_str(&format!(" ({comment})"));
        }
        if let Some(date) = date {
            detail.push_str(&format!(", date: {}", date.format("%Y-%m-%d %H:%M:%S UTC")));
        }

        return match crypto {
            Err(err) => outcome(
                VerificationStatus::KeyRevokedNoPublicKey,
                format!("{detail}, {err}"),
            ),
            Ok(()) => {
                let allowed = policy.lookup(coordinate, policy_signer).is_explicit_allow();
                if allowed {
                    detail.push_str(", allowed by keys map");
                }
                outcome(
                    VerificationStatus::KeyRevokedWithPublicKey {
                        allowed_by_policy: allowed,
                    },
                    detail,
                )
            }
        };
    }

    if let Err(err) = crypto {
        return outcome(
            VerificationStatus::SignatureInvalid,
            format!("{description}, {err}"),
        );
    }

    match policy.lookup(coordinate, policy_signer) {
        Decision::Allowed { .. } | Decision::Unlisted => {
            outcome(VerificationStatus::SignatureOk, description)
        }
        Decision::Rejected => outcome(
            VerificationStatus::KeyNotAllowedByPolicy,
            format!(
                "{description}, fingerprint: {} does not match keys map",
                signer.signing_key()
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::KeyHandle;
    use crate::openpgp::PublicKeyRing;
    use crate::resolve::KeyOrigin;

    const ALICE: &[u8] = include_bytes!("../tests/fixtures/keys/alice.asc");
    const BOB: &[u8] = include_bytes!("../tests/fixtures/keys/bob.asc");
    const CAROL_REVOKED: &[u8] = include_bytes!("../tests/fixtures/keys/carol-revoked.asc");
    const DEMO_JAR: &[u8] = include_bytes!("../tests/fixtures/artifacts/demo-core-1.0.0.jar");
    const DEMO_JAR_ASC: &[u8] =
        include_bytes!("../tests/fixtures/artifacts/demo-core-1.0.0.jar.asc");
    const TOOLS_JAR: &[u8] = include_bytes!("../tests/fixtures/artifacts/release-tools-2.3.jar");
    const TOOLS_JAR_ASC: &[u8] =
        include_bytes!("../tests/fixtures/artifacts/release-tools-2.3.jar.asc");
    const LEGACY_JAR: &[u8] = include_bytes!("../tests/fixtures/artifacts/legacy-utils-0.9.jar");
    const LEGACY_JAR_SIG: &[u8] =
        include_bytes!("../tests/fixtures/artifacts/legacy-utils-0.9.jar.sig");

    const DAVE: &[u8] = include_bytes!("../tests/fixtures/keys/dave-subkey-revoked.asc");
    const DAVE_JAR: &[u8] = include_bytes!("../tests/fixtures/artifacts/dave-tools-2.0.jar");
    const DAVE_JAR_ASC: &[u8] =
        include_bytes!("../tests/fixtures/artifacts/dave-tools-2.0.jar.asc");
    const VICTOR_UNBOUND: &[u8] =
        include_bytes!("../tests/fixtures/keys/victor-unbound-subkey.asc");
    const FORGED_JAR: &[u8] = include_bytes!("../tests/fixtures/artifacts/forged-plugin-1.0.jar");
    const FORGED_JAR_ASC: &[u8] =
        include_bytes!("../tests/fixtures/artifacts/forged-plugin-1.0.jar.asc");

    const ALICE_PRIMARY: &str = "DA841DA350951644A50D006412211E187B7C5E3F";
    const ALICE_SUBKEY: &str = "1C0D8F55EFAE456779F95222090A2F17D37F6D8C";
    const BOB_FPR: &str = "C9B538A91B30EEBA97613B78FCB2E3BEADF588F4";
    const CAROL_FPR: &str = "D3EEF92790B4F4A58F089D9CA8358E951FF4B241";
    const DAVE_FPR: &str = "7AD7B89D6E48E0FAFB8FC10A19A1F502CDEC31BE";
    const DAVE_SUBKEY: &str = "D1F2B14A368BF7E33B495F9626666B13587961D8";
    const VICTOR_FPR: &str = "428D02D7C086F8FF841C6990AA1D85E3D2AC5A64";

    fn coord(s: &str) -> ArtifactCoordinate {
        s.parse().unwrap()
    }

    fn found(bytes: &[u8]) -> ResolvedKey {
        ResolvedKey::found(PublicKeyRing::parse(bytes).unwrap(), KeyOrigin::Provided)
    }

    fn policy(text: &str) -> TrustPolicy {
        TrustPolicy::from_text("keys.list", text).unwrap()
    }

    fn run_signed(
        coordinate: &str,
        artifact: &[u8],
        signature: &[u8],
        key: &ResolvedKey,
        policy: &TrustPolicy,
    ) -> VerificationOutcome {
        let coordinate = coord(coordinate);
        let signature = DetachedSignature::parse(signature).unwrap();
        verify(
            &VerifyRequest {
                coordinate: &coordinate,
                artifact,
                evidence: Evidence::Signed {
                    signature: &signature,
                    key,
                },
            },
            policy,
            &VerifyOptions::default(),
        )
    }

    fn run_unsigned(
        coordinate: &str,
        policy: &TrustPolicy,
        options: &VerifyOptions,
    ) -> VerificationOutcome {
        let coordinate = coord(coordinate);
        verify(
            &VerifyRequest {
                coordinate: &coordinate,
                artifact: b"",
                evidence: Evidence::Unsigned,
            },
            policy,
            options,
        )
    }

    #[test]
    fn subkey_signature_accepted_by_key_id_rule() {
        let policy = policy("org.demo:demo-core = 0x090A2F17D37F6D8C");
        let outcome = run_signed(
            "org.demo:demo-core:jar:1.0.0",
            DEMO_JAR,
            DEMO_JAR_ASC,
            &found(ALICE),
            &policy,
        );

        assert_eq!(outcome.status, VerificationStatus::SignatureOk);
        assert!(outcome.detail.contains(&format!(
            "SubKeyId: 0x{ALICE_SUBKEY} of 0x{ALICE_PRIMARY}"
        )));
        assert!(
            outcome
                .detail
                .contains("UserIds: [Alice Builder <alice@example.org>]")
        );
        let signer = outcome.signer.expect("signer");
        assert_eq!(signer.signing_key().hex(), ALICE_SUBKEY);
    }

    #[test]
    fn primary_key_signature_reports_key_id() {
        let outcome = run_signed(
            "org.tools:release-tools:jar:2.3",
            TOOLS_JAR,
            TOOLS_JAR_ASC,
            &found(BOB),
            &policy(&format!("org.tools = 0x{BOB_FPR}")),
        );
        assert_eq!(outcome.status, VerificationStatus::SignatureOk);
        assert_eq!(
            outcome.detail,
            format!("KeyId: 0x{BOB_FPR} UserIds: [Bob Releaser <bob@example.org>]")
        );
    }

    #[test]
    fn unlisted_artifact_accepts_any_valid_signature() {
        let outcome = run_signed(
            "org.tools:release-tools:jar:2.3",
            TOOLS_JAR,
            TOOLS_JAR_ASC,
            &found(BOB),
            &TrustPolicy::empty(),
        );
        assert_eq!(outcome.status, VerificationStatus::SignatureOk);
    }

    #[test]
    fn flipped_byte_is_signature_invalid() {
        let mut tampered = DEMO_JAR.to_vec();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xff;

        let outcome = run_signed(
            "org.demo:demo-core:jar:1.0.0",
            &tampered,
            DEMO_JAR_ASC,
            &found(ALICE),
            &TrustPolicy::empty(),
        );
        assert_eq!(outcome.status, VerificationStatus::SignatureInvalid);
        assert!(!outcome.is_accepted());
    }

    #[test]
    fn key_outside_keys_map_is_not_allowed() {
        let outcome = run_signed(
            "org.tools:release-tools:jar:2.3",
            TOOLS_JAR,
            TOOLS_JAR_ASC,
            &found(BOB),
            &policy(&format!("org.tools = 0x{ALICE_PRIMARY}")),
        );
        assert_eq!(outcome.status, VerificationStatus::KeyNotAllowedByPolicy);
        assert!(outcome.detail.contains(&format!("fingerprint: 0x{BOB_FPR}")));
    }

    #[test]
    fn missing_key_is_never_downgraded() {
        let lenient = policy("* = *");
        let outcome = run_signed(
            "org.demo:demo-core:jar:1.0.0",
            DEMO_JAR,
            DEMO_JAR_ASC,
            &ResolvedKey::NotFound,
            &lenient,
        );
        assert_eq!(outcome.status, VerificationStatus::KeyNotFoundOnServer);
        assert!(outcome.detail.contains(&format!("0x{ALICE_SUBKEY}")));

        let outcome = run_signed(
            "org.demo:demo-core:jar:1.0.0",
            DEMO_JAR,
            DEMO_JAR_ASC,
            &ResolvedKey::FetchError("hkps://a: timed out".into()),
            &lenient,
        );
        assert_eq!(outcome.status, VerificationStatus::KeyNotFoundOnServer);
        assert!(outcome.detail.contains("timed out"));
    }

    #[test]
    fn key_block_without_issuer_is_key_not_found() {
        let outcome = run_signed(
            "org.demo:demo-core:jar:1.0.0",
            DEMO_JAR,
            DEMO_JAR_ASC,
            &found(BOB),
            &TrustPolicy::empty(),
        );
        assert_eq!(outcome.status, VerificationStatus::KeyNotFoundOnServer);
    }

    #[test]
    fn revoked_key_reports_reason_verbatim() {
        let outcome = run_signed(
            "org.legacy:legacy-utils:jar:0.9",
            LEGACY_JAR,
            LEGACY_JAR_SIG,
            &found(CAROL_REVOKED),
            &policy("org.legacy = *"),
        );
        assert_eq!(
            outcome.status,
            VerificationStatus::KeyRevokedWithPublicKey {
                allowed_by_policy: false
            }
        );
        assert!(outcome.detail.contains("key is revoked"));
        assert!(outcome.detail.contains("reason: Key is superseded"));
        assert!(outcome.detail.contains("(Replaced by a new release key)"));
        assert!(outcome.detail.contains("date: 2021-03-01"));
        assert!(!outcome.is_accepted());
    }

    #[test]
    fn revoked_key_passes_only_when_explicitly_listed() {
        let outcome = run_signed(
            "org.legacy:legacy-utils:jar:0.9",
            LEGACY_JAR,
            LEGACY_JAR_SIG,
            &found(CAROL_REVOKED),
            &policy(&format!("org.legacy:legacy-utils:jar:0.9 = 0x{CAROL_FPR}")),
        );
        assert_eq!(
            outcome.status,
            VerificationStatus::KeyRevokedWithPublicKey {
                allowed_by_policy: true
            }
        );
        assert!(outcome.is_accepted());
    }

    #[test]
    fn revoked_key_that_cannot_verify_is_no_public_key() {
        let mut tampered = LEGACY_JAR.to_vec();
        tampered[0] ^= 0x20;
        let outcome = run_signed(
            "org.legacy:legacy-utils:jar:0.9",
            &tampered,
            LEGACY_JAR_SIG,
            &found(CAROL_REVOKED),
            &policy(&format!("org.legacy = 0x{CAROL_FPR}")),
        );
        assert_eq!(outcome.status, VerificationStatus::KeyRevokedNoPublicKey);
        assert!(outcome.detail.contains("reason: Key is superseded"));
    }

    #[test]
    fn revoked_signing_subkey_on_valid_primary() {
        let outcome = run_signed(
            "org.dave:dave-tools:jar:2.0",
            DAVE_JAR,
            DAVE_JAR_ASC,
            &found(DAVE),
            &TrustPolicy::empty(),
        );
        assert_eq!(
            outcome.status,
            VerificationStatus::KeyRevokedWithPublicKey {
                allowed_by_policy: false
            }
        );
        assert!(outcome.detail.contains(&format!(
            "SubKeyId: 0x{DAVE_SUBKEY} of 0x{DAVE_FPR}"
        )));
        assert!(
            outcome
                .detail
                .contains("reason: Key material has been compromised (subkey leaked)")
        );
        assert!(outcome.detail.contains("date: 2021-05-01"));
        assert!(!outcome.is_accepted());

        let listed = run_signed(
            "org.dave:dave-tools:jar:2.0",
            DAVE_JAR,
            DAVE_JAR_ASC,
            &found(DAVE),
            &policy(&format!("org.dave = 0x{DAVE_FPR}")),
        );
        assert_eq!(
            listed.status,
            VerificationStatus::KeyRevokedWithPublicKey {
                allowed_by_policy: true
            }
        );
    }

    #[test]
    fn unbound_subkey_cannot_sign_for_its_host_key() {
        let outcome = run_signed(
            "org.victim:plugin:jar:1.0",
            FORGED_JAR,
            FORGED_JAR_ASC,
            &found(VICTOR_UNBOUND),
            &policy(&format!("org.victim = 0x{VICTOR_FPR}")),
        );
        assert_eq!(outcome.status, VerificationStatus::KeyNotFoundOnServer);
        assert!(outcome.signer.is_none());
        assert!(!outcome.is_accepted());
    }

    #[test]
    fn unsigned_artifact_consistent_with_keys_map() {
        let policy = policy("commons-chain:commons-chain:jar:1.1 = noSig");
        let outcome = run_unsigned(
            "commons-chain:commons-chain:jar:1.1",
            &policy,
            &VerifyOptions::default(),
        );
        assert_eq!(
            outcome.status,
            VerificationStatus::SignatureUnavailableConsistentWithPolicy
        );
        assert_eq!(
            outcome.detail,
            "PGP Signature unavailable, consistent with keys map."
        );
    }

    #[test]
    fn unsigned_artifact_with_key_rule_is_rejected() {
        let policy = policy(&format!("commons-chain = 0x{BOB_FPR}"));
        let outcome = run_unsigned(
            "commons-chain:commons-chain:jar:1.1",
            &policy,
            &VerifyOptions {
                fail_on_unsigned: false,
            },
        );
        assert_eq!(
            outcome.status,
            VerificationStatus::SignatureUnavailableNotAllowed
        );
    }

    #[test]
    fn unlisted_unsigned_artifact_follows_default() {
        let strict = run_unsigned("a:b:jar:1", &TrustPolicy::empty(), &VerifyOptions::default());
        assert_eq!(
            strict.status,
            VerificationStatus::SignatureUnavailableNotAllowed
        );

        let lenient = run_unsigned(
            "a:b:jar:1",
            &TrustPolicy::empty(),
            &VerifyOptions {
                fail_on_unsigned: false,
            },
        );
        assert_eq!(
            lenient.status,
            VerificationStatus::SignatureUnavailableConsistentWithPolicy
        );
    }

    #[test]
    fn unreadable_signature_is_invalid() {
        let coordinate = coord("a:b:jar:1");
        let outcome = verify(
            &VerifyRequest {
                coordinate: &coordinate,
                artifact: b"data",
                evidence: Evidence::Unreadable("no document signature packet found"),
            },
            &TrustPolicy::empty(),
            &VerifyOptions::default(),
        );
        assert_eq!(outcome.status, VerificationStatus::SignatureInvalid);
        assert!(outcome.detail.contains("no document signature packet found"));
    }

    #[test]
    fn key_handles_in_detail_are_uppercase_hex() {
        let outcome = run_signed(
            "org.demo:demo-core:jar:1.0.0",
            DEMO_JAR,
            DEMO_JAR_ASC,
            &found(ALICE),
            &TrustPolicy::empty(),
        );
        let subkey = KeyHandle::parse(&ALICE_SUBKEY.to_lowercase()).unwrap();
        assert!(outcome.detail.contains(&subkey.to_string()));
    }
}
