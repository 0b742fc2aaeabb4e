//! Keys-map policy, OpenPGP signature checks and the per-artifact verification
//! state machine. Network access and scheduling live in the `pgpverify` crate.

mod error;
mod identity;
mod openpgp;
mod outcome;
mod pattern;
mod resolve;
mod verify;

pub mod keys_map;

pub use error::{OpenPgpError, PatternError, PolicyLoadError};
pub use identity::KeyHandle;
pub use keys_map::{Decision, PolicyRule, PolicySource, RuleOrigin, TrustPolicy};
pub use openpgp::{
    DetachedSignature, KeyInfo, PublicKeyRing, Revocation, revocation_reason_text,
};
pub use outcome::{
    SIGNATURE_UNAVAILABLE_CONSISTENT, SignerInfo, VerificationOutcome, VerificationStatus,
};
pub use pattern::{ArtifactCoordinate, ArtifactPattern, KeyPattern, Signer};
pub use resolve::{KeyOrigin, ResolvedKey, compute_digest};
pub use verify::{Evidence, VerifyOptions, VerifyRequest, verify};
