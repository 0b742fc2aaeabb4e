use std::fmt;

use serde::Serialize;

use crate::identity::KeyHandle;
use crate::openpgp::{KeyInfo, PublicKeyRing};
use crate::pattern::ArtifactCoordinate;

pub const SIGNATURE_UNAVAILABLE_CONSISTENT: &str =
    "PGP Signature unavailable, consistent with keys map.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationStatus {
    SignatureOk,
    SignatureUnavailableConsistentWithPolicy,
    SignatureUnavailableNotAllowed,
    SignatureInvalid,
    KeyRevokedNoPublicKey,
    KeyRevokedWithPublicKey { allowed_by_policy: bool },
    KeyNotFoundOnServer,
    KeyNotAllowedByPolicy,
}

impl VerificationStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            Self::SignatureOk
                | Self::SignatureUnavailableConsistentWithPolicy
                | Self::KeyRevokedWithPublicKey {
                    allowed_by_policy: true
                }
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignatureOk => "signature-ok",
            Self::SignatureUnavailableConsistentWithPolicy => "signature-unavailable-allowed",
            Self::SignatureUnavailableNotAllowed => "signature-unavailable",
            Self::SignatureInvalid => "signature-invalid",
            Self::KeyRevokedNoPublicKey => "key-revoked-no-public-key",
            Self::KeyRevokedWithPublicKey { .. } => "key-revoked",
            Self::KeyNotFoundOnServer => "key-not-found",
            Self::KeyNotAllowedByPolicy => "key-not-allowed",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The key that produced a signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SignerInfo {
    pub primary: KeyHandle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subkey: Option<KeyHandle>,
    pub user_ids: Vec<String>,
}

impl SignerInfo {
    pub fn new(ring: &PublicKeyRing, signing: &KeyInfo) -> Self {
        Self {
            primary: ring.primary().fingerprint.clone(),
            subkey: (!ring.is_primary(signing)).then(|| signing.fingerprint.clone()),
            user_ids: ring.user_ids().to_vec(),
        }
    }

    pub fn signing_key(&self) -> &KeyHandle {
        self.subkey.as_ref().unwrap_or(&self.primary)
    }

    /// `KeyId: 0x.. UserIds: [..]` or `SubKeyId: 0x.. of 0x.. UserIds: [..]`.
    pub fn describe(&self) -> String {
        let id = match &self.subkey {
            Some(subkey) => format!("SubKeyId: {subkey} of {}", self.primary),
            None => format!("KeyId: {}", self.primary),
        };
        format!("{id} UserIds: [{}]", self.user_ids.join(", "))
    }
}

/// Terminal verification result for one artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationOutcome {
    pub coordinate: ArtifactCoordinate,
    pub status: VerificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer: Option<SignerInfo>,
    pub detail: String,
}

impl VerificationOutcome {
    pub fn new(
        coordinate: ArtifactCoordinate,
        status: VerificationStatus,
        signer: Option<SignerInfo>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            coordinate,
            status,
            signer,
            detail: detail.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status.is_accepted()
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.coordinate, self.status, self.detail)
    }
}
