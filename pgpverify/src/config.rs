use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pgpverify_core::{PolicySource, TrustPolicy, VerifyOptions};
use serde::{Deserialize, Serialize};

use crate::cache::KeyCache;
use crate::keyserver::{
    DEFAULT_RETRY_BACKOFF, DEFAULT_TIMEOUT, KeyServerClient, KeyServerGroup, Strategy,
};
use crate::orchestrator::{DEFAULT_PARALLELISM, Verifier};
use crate::types::PgpVerifyError;

/// Run configuration, loaded from JSON or YAML.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RunConfig {
    pub key_servers: Vec<String>,
    #[serde(default)]
    pub strategy: Strategy,
    /// Keys-map files, relative to the configuration file.
    #[serde(default)]
    pub keys_map: Vec<PathBuf>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_backoff_ms: Option<u64>,
    #[serde(default = "default_fail_on_unsigned")]
    pub fail_on_unsigned: bool,
    #[serde(default)]
    pub key_cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub parallelism: Option<usize>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

fn default_fail_on_unsigned() -> bool {
    true
}

impl RunConfig {
    pub fn new(key_servers: Vec<String>) -> Self {
        Self {
            key_servers,
            strategy: Strategy::default(),
            keys_map: Vec::new(),
            timeout_ms: None,
            max_retries: None,
            retry_backoff_ms: None,
            fail_on_unsigned: default_fail_on_unsigned(),
            key_cache_dir: None,
            parallelism: None,
            base_dir: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(0)
    }

    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RETRY_BACKOFF)
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism.unwrap_or(DEFAULT_PARALLELISM).max(1)
    }

    /// Keys-map paths resolved against the configuration file's directory.
    pub fn keys_map_paths(&self) -> Vec<PathBuf> {
        self.keys_map.iter().map(|path| self.resolve(path)).collect()
    }

    pub fn key_cache_path(&self) -> Option<PathBuf> {
        self.key_cache_dir.as_deref().map(|path| self.resolve(path))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if let Ok(rest) = path.strip_prefix("~") {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Parse endpoints, load the keys map and wire up the key cache.
    pub fn build_verifier(&self) -> Result<Verifier, PgpVerifyError> {
        let group = KeyServerGroup::parse(&self.key_servers, self.strategy)?
            .with_timeout(self.timeout())
            .with_retries(self.max_retries(), self.retry_backoff());
        let client = KeyServerClient::new(group)?;

        let sources: Vec<PolicySource> = self
            .keys_map_paths()
            .into_iter()
            .map(PolicySource::File)
            .collect();
        let policy = TrustPolicy::build(&sources)?;

        let mut keys = KeyCache::new(Arc::new(client));
        if let Some(dir) = self.key_cache_path() {
            keys = keys.with_disk_cache(dir);
        }

        tracing::debug!(
            key_servers = self.key_servers.len(),
            strategy = ?self.strategy,
            rules = policy.len(),
            "verifier configured"
        );

        Ok(Verifier::new(Arc::new(policy), Arc::new(keys))
            .with_options(VerifyOptions {
                fail_on_unsigned: self.fail_on_unsigned,
            })
            .with_parallelism(self.parallelism()))
    }
}

/// Load a [`RunConfig`] from JSON or YAML.
pub fn load_config(path: &Path) -> Result<RunConfig, PgpVerifyError> {
    let content = fs::read_to_string(path)?;
    let mut config = parse_config(path, &content)?;
    config.base_dir = path.parent().map(Path::to_path_buf);
    Ok(config)
}

fn parse_config(path: &Path, content: &str) -> Result<RunConfig, PgpVerifyError> {
    if is_json(path, content) {
        Ok(serde_json::from_str(content)?)
    } else {
        Ok(serde_yaml_bw::from_str(content)?)
    }
}

fn is_json(path: &Path, content: &str) -> bool {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => return true,
        Some("yaml" | "yml") => return false,
        _ => {}
    }

    content
        .chars()
        .find(|c| !c.is_whitespace())
        .is_some_and(|c| c == '{')
}
