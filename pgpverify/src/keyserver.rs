//! HKP key-server client.
//!
//! Keys are fetched with the machine-readable lookup
//! `GET /pks/lookup?op=get&options=mr&search=0x<HEX>`. A `404` or an empty
//! answer is a definitive "not found"; everything else that does not produce
//! the requested key is a transport failure and may be retried elsewhere.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pgpverify_core::{KeyHandle, KeyOrigin, PublicKeyRing, ResolvedKey};
use rand::Rng;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::instrument;

use crate::retry;
use crate::types::PgpVerifyError;

const ARMOR_HEADER: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
    Hkp,
    Hkps,
}

impl Protocol {
    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "hkp" => Some(Self::Hkp),
            "hkps" => Some(Self::Hkps),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Hkp => "hkp",
            Self::Hkps => "hkps",
        }
    }

    /// Scheme actually spoken on the wire.
    pub fn transport_scheme(&self) -> &'static str {
        match self {
            Self::Http | Self::Hkp => "http",
            Self::Https | Self::Hkps => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Hkp => 11371,
            Self::Https | Self::Hkps => 443,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyServerEndpoint {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
}

impl KeyServerEndpoint {
    /// Parse `hkps://keys.openpgp.org`, `http://127.0.0.1:8080` and the like.
    pub fn parse(input: &str) -> Result<Self, PgpVerifyError> {
        let url = Url::parse(input.trim())
            .map_err(|err| PgpVerifyError::invalid_endpoint(input, err.to_string()))?;
        let protocol = Protocol::from_scheme(url.scheme()).ok_or_else(|| {
            PgpVerifyError::invalid_endpoint(
                input,
                format!("unsupported scheme `{}`", url.scheme()),
            )
        })?;
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| PgpVerifyError::invalid_endpoint(input, "missing host"))?
            .to_string();
        if !matches!(url.path(), "" | "/") || url.query().is_some() {
            return Err(PgpVerifyError::invalid_endpoint(
                input,
                "key server address must not carry a path or query",
            ));
        }

        Ok(Self {
            port: url.port().unwrap_or_else(|| protocol.default_port()),
            protocol,
            host,
        })
    }

    pub fn lookup_url(&self, handle: &KeyHandle) -> Result<Url, TransportError> {
        let raw = format!(
            "{}://{}:{}/pks/lookup?op=get&options=mr&search={handle}",
            self.protocol.transport_scheme(),
            self.host,
            self.port
        );
        Url::parse(&raw).map_err(|err| TransportError::Request(err.to_string()))
    }
}

impl fmt::Display for KeyServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol.as_str(), self.host, self.port)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Try endpoints in order until one answers.
    #[default]
    Fallback,
    /// One endpoint per lookup, rotating between calls.
    LoadBalance,
}

/// Ordered endpoints plus the rules for querying them.
#[derive(Clone, Debug)]
pub struct KeyServerGroup {
    endpoints: Vec<KeyServerEndpoint>,
    strategy: Strategy,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl KeyServerGroup {
    pub fn new(
        endpoints: Vec<KeyServerEndpoint>,
        strategy: Strategy,
    ) -> Result<Self, PgpVerifyError> {
        if endpoints.is_empty() {
            return Err(PgpVerifyError::NoKeyServers);
        }
        Ok(Self {
            endpoints,
            strategy,
            timeout: DEFAULT_TIMEOUT,
            max_retries: 0,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        })
    }

    /// Parse every address, failing on the first malformed one.
    pub fn parse<S: AsRef<str>>(
        addresses: &[S],
        strategy: Strategy,
    ) -> Result<Self, PgpVerifyError> {
        let endpoints = addresses
            .iter()
            .map(|address| KeyServerEndpoint::parse(address.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(endpoints, strategy)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

}

/// Why a single endpoint did not deliver the key.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("unreadable key block: {0}")]
    InvalidKeyBlock(String),
    #[error("returned key block does not contain {0}")]
    MissingKey(KeyHandle),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Found,
    NotFound,
    Failed(TransportError),
}

/// Diagnostics for one endpoint consulted during a lookup.
#[derive(Clone, Debug)]
pub struct FetchAttempt {
    pub endpoint: KeyServerEndpoint,
    pub outcome: AttemptOutcome,
}

#[derive(Clone, Debug)]
pub struct KeyLookup {
    pub key: ResolvedKey,
    pub attempts: Vec<FetchAttempt>,
}

/// Source of public keys. Implemented by [`KeyServerClient`] and by test doubles.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    async fn fetch_key(&self, handle: &KeyHandle) -> KeyLookup;
}

pub struct KeyServerClient {
    http: reqwest::Client,
    group: KeyServerGroup,
    cursor: AtomicUsize,
}

impl KeyServerClient {
    pub fn new(group: KeyServerGroup) -> Result<Self, PgpVerifyError> {
        let http = reqwest::Client::builder()
            .timeout(group.timeout)
            .build()
            .map_err(PgpVerifyError::HttpClient)?;
        let start = rand::rng().random_range(0..group.endpoints.len());
        Ok(Self {
            http,
            group,
            cursor: AtomicUsize::new(start),
        })
    }

    /// Pin the load-balancing rotation to a known first endpoint.
    pub fn starting_at(self, index: usize) -> Self {
        self.cursor.store(index, Ordering::Relaxed);
        self
    }

    #[instrument(skip(self), fields(key = %handle, strategy = ?self.group.strategy))]
    pub async fn fetch(&self, handle: &KeyHandle) -> KeyLookup {
        match self.group.strategy {
            Strategy::Fallback => self.fetch_fallback(handle).await,
            Strategy::LoadBalance => {
                let index =
                    self.cursor.fetch_add(1, Ordering::Relaxed) % self.group.endpoints.len();
                self.fetch_single(&self.group.endpoints[index], handle).await
            }
        }
    }

    async fn fetch_fallback(&self, handle: &KeyHandle) -> KeyLookup {
        let mut attempts = Vec::with_capacity(self.group.endpoints.len());
        for endpoint in &self.group.endpoints {
            match self.fetch_with_retries(endpoint, handle).await {
                Ok(Some(ring)) => {
                    attempts.push(attempt(endpoint, AttemptOutcome::Found));
                    return KeyLookup {
                        key: found(endpoint, ring),
                        attempts,
                    };
                }
                Ok(None) => {
                    attempts.push(attempt(endpoint, AttemptOutcome::NotFound));
                    return KeyLookup {
                        key: ResolvedKey::NotFound,
                        attempts,
                    };
                }
                Err(err) => {
                    tracing::warn!(
                        endpoint = %endpoint,
                        key = %handle,
                        error = %err,
                        "key server failed, trying next"
                    );
                    attempts.push(attempt(endpoint, AttemptOutcome::Failed(err)));
                }
            }
        }

        KeyLookup {
            key: ResolvedKey::FetchError(aggregate(&attempts)),
            attempts,
        }
    }

    async fn fetch_single(&self, endpoint: &KeyServerEndpoint, handle: &KeyHandle) -> KeyLookup {
        let (key, outcome) = match self.fetch_with_retries(endpoint, handle).await {
            Ok(Some(ring)) => (found(endpoint, ring), AttemptOutcome::Found),
            Ok(None) => (ResolvedKey::NotFound, AttemptOutcome::NotFound),
            Err(err) => {
                tracing::warn!(
                    endpoint = %endpoint,
                    key = %handle,
                    error = %err,
                    "key server failed"
                );
                (
                    ResolvedKey::FetchError(format!("{endpoint}: {err}")),
                    AttemptOutcome::Failed(err),
                )
            }
        };
        KeyLookup {
            key,
            attempts: vec![attempt(endpoint, outcome)],
        }
    }

    async fn fetch_with_retries(
        &self,
        endpoint: &KeyServerEndpoint,
        handle: &KeyHandle,
    ) -> Result<Option<PublicKeyRing>, TransportError> {
        let tries = self.group.max_retries.saturating_add(1);
        let mut failed = 0;
        loop {
            match self.request_once(endpoint, handle).await {
                Err(err) if failed + 1 < tries => {
                    let delay = retry::backoff(self.group.retry_backoff, failed);
                    tracing::debug!(
                        endpoint = %endpoint,
                        failed,
                        ?delay,
                        error = %err,
                        "retrying key server"
                    );
                    sleep(delay).await;
                    failed += 1;
                }
                result => return result,
            }
        }
    }

    async fn request_once(
        &self,
        endpoint: &KeyServerEndpoint,
        handle: &KeyHandle,
    ) -> Result<Option<PublicKeyRing>, TransportError> {
        let url = endpoint.lookup_url(handle)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(err))?;
        let text = String::from_utf8_lossy(&body);
        if text.trim().is_empty() || !text.contains(ARMOR_HEADER) {
            return Ok(None);
        }

        let ring = PublicKeyRing::parse(&body)
            .map_err(|err| TransportError::InvalidKeyBlock(err.to_string()))?;
        if !ring.contains(handle) {
            return Err(TransportError::MissingKey(handle.clone()));
        }
        Ok(Some(ring))
    }

    fn transport_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            return TransportError::Timeout(self.group.timeout);
        }
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        TransportError::Request(message)
    }
}

#[async_trait]
impl KeyFetcher for KeyServerClient {
    async fn fetch_key(&self, handle: &KeyHandle) -> KeyLookup {
        self.fetch(handle).await
    }
}

fn attempt(endpoint: &KeyServerEndpoint, outcome: AttemptOutcome) -> FetchAttempt {
    FetchAttempt {
        endpoint: endpoint.clone(),
        outcome,
    }
}

fn found(endpoint: &KeyServerEndpoint, ring: PublicKeyRing) -> ResolvedKey {
    ResolvedKey::found(
        ring,
        KeyOrigin::KeyServer {
            url: endpoint.to_string(),
        },
    )
}

fn aggregate(attempts: &[FetchAttempt]) -> String {
    attempts
        .iter()
        .filter_map(|attempt| match &attempt.outcome {
            AttemptOutcome::Failed(err) => Some(format!("{}: {err}", attempt.endpoint)),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_endpoints_with_default_ports() {
        let hkps = KeyServerEndpoint::parse("hkps://keys.openpgp.org").unwrap();
        assert_eq!(hkps.protocol, Protocol::Hkps);
        assert_eq!(hkps.port, 443);
        assert_eq!(hkps.to_string(), "hkps://keys.openpgp.org:443");

        let hkp = KeyServerEndpoint::parse("hkp://keyserver.ubuntu.com").unwrap();
        assert_eq!(hkp.port, 11371);

        let local = KeyServerEndpoint::parse("http://127.0.0.1:8080/").unwrap();
        assert_eq!(local.host, "127.0.0.1");
        assert_eq!(local.port, 8080);
    }

    #[test]
    fn rejects_bad_endpoints() {
        for input in ["ftp://keys.example", "keys.example", "hkps://keys.example/pks", ""] {
            assert!(
                matches!(
                    KeyServerEndpoint::parse(input),
                    Err(PgpVerifyError::InvalidEndpoint { .. })
                ),
                "{input}"
            );
        }
    }

    #[test]
    fn lookup_url_uses_transport_scheme() {
        let endpoint = KeyServerEndpoint::parse("hkp://keys.example").unwrap();
        let handle = KeyHandle::parse("090a2f17d37f6d8c").unwrap();
        assert_eq!(
            endpoint.lookup_url(&handle).unwrap().as_str(),
            "http://keys.example:11371/pks/lookup?op=get&options=mr&search=0x090A2F17D37F6D8C"
        );
    }

    #[test]
    fn empty_group_is_rejected() {
        assert!(matches!(
            KeyServerGroup::new(Vec::new(), Strategy::Fallback),
            Err(PgpVerifyError::NoKeyServers)
        ));
    }

    #[test]
    fn strategy_names_deserialize() {
        let strategy: Strategy = serde_json::from_str("\"load_balance\"").unwrap();
        assert_eq!(strategy, Strategy::LoadBalance);
    }
}
