use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use pgpverify_core::{KeyHandle, KeyOrigin, PublicKeyRing, ResolvedKey};
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::keyserver::KeyFetcher;

type Slot = Arc<OnceCell<ResolvedKey>>;

/// Per-run key cache keyed by long key ID.
///
/// Concurrent lookups of the same key share one in-flight fetch, so each key
/// ID reaches the key servers at most once per run. Negative results are
/// cached as well.
pub struct KeyCache {
    fetcher: Arc<dyn KeyFetcher>,
    disk: Option<DiskCache>,
    slots: Mutex<HashMap<KeyHandle, Slot>>,
}

impl KeyCache {
    pub fn new(fetcher: Arc<dyn KeyFetcher>) -> Self {
        Self {
            fetcher,
            disk: None,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_disk_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.disk = Some(DiskCache::new(dir));
        self
    }

    /// Seed the cache with a key supplied by the caller. Every key ID in the
    /// ring resolves to it without touching the network.
    pub fn preload(&self, ring: PublicKeyRing) {
        let key_ids: Vec<KeyHandle> = std::iter::once(ring.primary())
            .chain(ring.subkeys())
            .map(|key| key.key_id.clone())
            .collect();
        let resolved = ResolvedKey::found(ring, KeyOrigin::Provided);

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        for key_id in key_ids {
            slots.insert(key_id, Arc::new(OnceCell::new_with(Some(resolved.clone()))));
        }
    }

    #[instrument(skip(self), fields(key = %handle))]
    pub async fn resolve(&self, handle: &KeyHandle) -> ResolvedKey {
        let slot = self.slot(handle);
        if let Some(cached) = slot.get() {
            tracing::debug!("key cache hit");
            return cached.clone();
        }
        slot.get_or_init(|| self.load(handle)).await.clone()
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, handle: &KeyHandle) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(handle.key_id()).or_default().clone()
    }

    async fn load(&self, handle: &KeyHandle) -> ResolvedKey {
        if let Some(disk) = &self.disk {
            if let Some(resolved) = disk.load(handle).await {
                return resolved;
            }
        }

        let lookup = self.fetcher.fetch_key(handle).await;
        if let (Some(disk), Some(ring)) = (&self.disk, lookup.key.ring()) {
            disk.store(handle, ring).await;
        }
        lookup.key
    }
}

/// Key blocks persisted across runs as `<dir>/AB/CD/<KEYID>.asc`.
#[derive(Clone, Debug)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, handle: &KeyHandle) -> PathBuf {
        let key_id = handle.key_id();
        let hex = key_id.hex();
        self.root
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(format!("{hex}.asc"))
    }

    async fn load(&self, handle: &KeyHandle) -> Option<ResolvedKey> {
        let path = self.path_for(handle);
        let bytes = tokio::fs::read(&path).await.ok()?;
        match PublicKeyRing::parse(&bytes) {
            Ok(ring) if ring.contains(handle) => {
                tracing::debug!(path = %path.display(), "key loaded from disk cache");
                Some(ResolvedKey::found(ring, KeyOrigin::DiskCache(path)))
            }
            Ok(_) => {
                tracing::warn!(
                    path = %path.display(),
                    "cached key block does not contain the key, ignoring"
                );
                None
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "unreadable cached key block, ignoring"
                );
                None
            }
        }
    }

    async fn store(&self, handle: &KeyHandle, ring: &PublicKeyRing) {
        let path = self.path_for(handle);
        if let Err(err) = write_atomically(&path, ring.as_bytes()).await {
            tracing::warn!(path = %path.display(), error = %err, "failed to write key cache");
        }
    }
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("asc.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}
