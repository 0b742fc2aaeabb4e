//! Thin adapter over `sequoia-openpgp`.
//!
//! Everything outside this module works with [`KeyHandle`]s and the plain
//! [`KeyInfo`] view; parsing keys, parsing signatures, and the cryptographic
//! check itself happen here.

use std::borrow::Cow;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sequoia_openpgp as openpgp;

use openpgp::cert::prelude::*;
use openpgp::packet::Signature;
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::types::{KeyFlags, RevocationStatus, SignatureType};
use openpgp::{Cert, Packet, PacketPile};

use crate::error::OpenPgpError;
use crate::identity::KeyHandle;

/// Revocation state of a single key or subkey.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Revocation {
    Valid,
    Revoked {
        reason: String,
        comment: Option<String>,
        date: Option<DateTime<Utc>>,
    },
}

impl Revocation {
    pub fn is_revoked(&self) -> bool {
        matches!(self, Self::Revoked { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyInfo {
    pub key_id: KeyHandle,
    pub fingerprint: KeyHandle,
    pub revocation: Revocation,
    pub can_sign: bool,
}

/// A parsed public certificate: primary key, user IDs and subkeys.
#[derive(Clone, Debug)]
pub struct PublicKeyRing {
    cert: Cert,
    primary: KeyInfo,
    user_ids: Vec<String>,
    subkeys: Vec<KeyInfo>,
    raw: Arc<[u8]>,
}

impl PublicKeyRing {
    /// Parse an ASCII-armored or binary public key block.
    ///
    /// Only subkeys carrying a binding signature that is valid under the
    /// standard policy become part of the ring; anything else in the block is
    /// ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self, OpenPgpError> {
        let cert = Cert::from_bytes(bytes).map_err(OpenPgpError::invalid_key)?;
        let policy = StandardPolicy::new();
        let valid = cert
            .with_policy(&policy, None)
            .map_err(OpenPgpError::invalid_key)?;

        let fingerprint = fingerprint_handle(&cert.fingerprint())?;
        let primary = KeyInfo {
            key_id: fingerprint.key_id(),
            fingerprint,
            revocation: revocation_from(cert.revocation_status(&policy, None)),
            can_sign: signing_capable(valid.primary_key().key_flags()),
        };

        let user_ids = cert
            .userids()
            .map(|uid| String::from_utf8_lossy(uid.userid().value()).into_owned())
            .collect();

        let mut subkeys = Vec::new();
        for ka in valid.keys().subkeys() {
            let fingerprint = fingerprint_handle(&ka.key().fingerprint())?;
            subkeys.push(KeyInfo {
                key_id: fingerprint.key_id(),
                fingerprint,
                revocation: revocation_from(ka.revocation_status()),
                can_sign: signing_capable(ka.key_flags()),
            });
        }

        let bound = subkeys.len();
        let total = cert.keys().subkeys().count();
        if bound < total {
            tracing::debug!(
                primary = %primary.fingerprint,
                ignored = total - bound,
                "dropping subkeys without a valid binding signature"
            );
        }

        Ok(Self {
            cert,
            primary,
            user_ids,
            subkeys,
            raw: Arc::from(bytes),
        })
    }

    pub fn primary(&self) -> &KeyInfo {
        &self.primary
    }

    pub fn user_ids(&self) -> &[String] {
        &self.user_ids
    }

    pub fn subkeys(&self) -> &[KeyInfo] {
        &self.subkeys
    }

    /// The key block exactly as it was received.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    fn key(&self, handle: &KeyHandle) -> Option<&KeyInfo> {
        std::iter::once(&self.primary)
            .chain(self.subkeys.iter())
            .find(|key| key.fingerprint.aliases(handle))
    }

    /// The signing-capable primary key or bound subkey named by `handle`.
    pub fn signing_key(&self, handle: &KeyHandle) -> Option<&KeyInfo> {
        self.key(handle).filter(|key| key.can_sign)
    }

    pub fn contains(&self, handle: &KeyHandle) -> bool {
        self.key(handle).is_some()
    }

    pub fn is_primary(&self, key: &KeyInfo) -> bool {
        key.fingerprint == self.primary.fingerprint
    }

    /// Check `signature` over `data` with the issuing key's material.
    pub fn verify(&self, signature: &DetachedSignature, data: &[u8]) -> Result<(), OpenPgpError> {
        let issuer = signature.issuer();
        let unknown = || OpenPgpError::UnknownSigningKey {
            primary: self.primary.fingerprint.to_string(),
            wanted: issuer.to_string(),
        };
        let signing = self.signing_key(issuer).ok_or_else(unknown)?;
        let key = self
            .cert
            .keys()
            .find(|ka| {
                fingerprint_handle(&ka.key().fingerprint())
                    .map(|fpr| fpr == signing.fingerprint)
                    .unwrap_or(false)
            })
            .ok_or_else(unknown)?;

        let message = match signature.signature.typ() {
            SignatureType::Text => canonical_text(data),
            _ => Cow::Borrowed(data),
        };
        signature
            .signature
            .verify_message(key.key(), message.as_ref())
            .map_err(OpenPgpError::verification)
    }
}

/// A detached signature over an artifact.
#[derive(Clone, Debug)]
pub struct DetachedSignature {
    signature: Signature,
    issuer: KeyHandle,
}

impl DetachedSignature {
    /// Parse an ASCII-armored (`.asc`) or binary (`.sig`) detached signature.
    /// When several signatures are present the first one is used.
    pub fn parse(bytes: &[u8]) -> Result<Self, OpenPgpError> {
        let pile = PacketPile::from_bytes(bytes).map_err(OpenPgpError::invalid_signature)?;
        let signature = pile
            .into_children()
            .find_map(|packet| match packet {
                Packet::Signature(sig)
                    if matches!(sig.typ(), SignatureType::Binary | SignatureType::Text) =>
                {
                    Some(sig)
                }
                _ => None,
            })
            .ok_or_else(|| {
                OpenPgpError::InvalidSignature("no document signature packet found".into())
            })?;

        let issuer = signature
            .get_issuers()
            .iter()
            .find_map(issuer_handle)
            .ok_or(OpenPgpError::MissingIssuer)?;

        Ok(Self { signature, issuer })
    }

    /// Issuer fingerprint when the signature carries one, else its key ID.
    pub fn issuer(&self) -> &KeyHandle {
        &self.issuer
    }

    pub fn hash_algorithm(&self) -> String {
        self.signature.hash_algo().to_string()
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.signature
            .signature_creation_time()
            .map(DateTime::<Utc>::from)
    }
}

/// Reason text for an OpenPGP revocation code.
pub fn revocation_reason_text(code: u8) -> String {
    match code {
        0 => "No reason specified".to_string(),
        1 => "Key is superseded".to_string(),
        2 => "Key material has been compromised".to_string(),
        3 => "Key is retired and no longer used".to_string(),
        32 => "User ID information is no longer valid".to_string(),
        100..=110 => format!("Private/Experimental revocation reason {code}"),
        other => format!("Unknown revocation reason {other}"),
    }
}

fn revocation_from(status: RevocationStatus<'_>) -> Revocation {
    let RevocationStatus::Revoked(signatures) = status else {
        return Revocation::Valid;
    };

    let Some(sig) = signatures.first() else {
        return Revocation::Revoked {
            reason: revocation_reason_text(0),
            comment: None,
            date: None,
        };
    };

    let (reason, comment) = match sig.reason_for_revocation() {
        Some((code, message)) => {
            let message = String::from_utf8_lossy(message).trim().to_string();
            (
                revocation_reason_text(u8::from(code)),
                Some(message).filter(|m| !m.is_empty()),
            )
        }
        None => (revocation_reason_text(0), None),
    };

    Revocation::Revoked {
        reason,
        comment,
        date: sig.signature_creation_time().map(DateTime::<Utc>::from),
    }
}

fn signing_capable(flags: Option<KeyFlags>) -> bool {
    flags.is_some_and(|flags| flags.for_signing())
}

/// Text-mode signatures are made over the document with `<CR><LF>` line endings.
fn canonical_text(data: &[u8]) -> Cow<'_, [u8]> {
    if !data.contains(&b'\n') {
        return Cow::Borrowed(data);
    }

    let mut out = Vec::with_capacity(data.len() + data.len() / 16);
    let mut lines = data.split(|byte| *byte == b'\n').peekable();
    while let Some(line) = lines.next() {
        if lines.peek().is_some() {
            out.extend_from_slice(line.strip_suffix(b"\r").unwrap_or(line));
            out.extend_from_slice(b"\r\n");
        } else {
            out.extend_from_slice(line);
        }
    }
    Cow::Owned(out)
}

fn fingerprint_handle(fpr: &openpgp::Fingerprint) -> Result<KeyHandle, OpenPgpError> {
    KeyHandle::parse(&fpr.to_hex()).map_err(|err| OpenPgpError::InvalidKey(err.to_string()))
}

fn issuer_handle(handle: &openpgp::KeyHandle) -> Option<KeyHandle> {
    KeyHandle::parse(&handle.to_hex()).ok()
}
