use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeDelta, Utc};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info};
use zeroize::Zeroize;

use super::model::{Secret, SecretRecord};

/// Lifetime applied when a caller asks for zero or an unrepresentable lifetime.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Random bytes per identifier (128 bits, 22 base64url characters).
const ID_BYTES: usize = 16;

/// Lower bound for the sweep period; `tokio::time::interval` rejects zero.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("maximum number of unread secrets ({max}) reached")]
    CapacityExceeded { max: usize },
}

/// Thread-safe handle to the in-memory secret map.
///
/// Clones share the same map. Every operation takes the lock once and does
/// all of its work (lookup, expiry check, removal, wipe, copy) under it, so a
/// given id can be handed out at most once no matter how many readers race.
#[derive(Clone)]
pub struct Store {
    secrets: Arc<Mutex<HashMap<String, SecretRecord>>>,
    max_unread: usize,
}

impl Store {
    /// Create an empty store holding at most `max_unread` live secrets.
    pub fn new(max_unread: usize) -> Self {
        Self {
            secrets: Arc::new(Mutex::new(HashMap::new())),
            max_unread,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SecretRecord>> {
        // A panic elsewhere cannot leave the map half-updated: every mutation
        // is a single insert/remove/retain call.
        self.secrets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `payload` and return its freshly generated identifier.
    ///
    /// A zero `lifetime` falls back to [`DEFAULT_LIFETIME`]. When the store is
    /// full, already-expired entries are reclaimed first; if it is still full
    /// the payload is wiped and `CapacityExceeded` returned.
    pub fn put(&self, mut payload: Vec<u8>, lifetime: Duration) -> Result<String, StoreError> {
        let created_at = Utc::now();
        let expires_at = expiry_for(created_at, lifetime);

        let mut secrets = self.lock();
        if secrets.len() >= self.max_unread {
            let reclaimed = evict_expired(&mut secrets, created_at);
            if reclaimed > 0 {
                debug!(reclaimed, "reclaimed expired secrets at capacity");
            }
        }
        if secrets.len() >= self.max_unread {
            payload.zeroize();
            return Err(StoreError::CapacityExceeded {
                max: self.max_unread,
            });
        }

        let id = loop {
            let candidate = generate_id();
            if !secrets.contains_key(&candidate) {
                break candidate;
            }
        };
        secrets.insert(
            id.clone(),
            SecretRecord {
                payload,
                created_at,
                expires_at,
            },
        );

        debug!(unread = secrets.len(), "stored secret");
        Ok(id)
    }

    /// Remove and return the secret stored under `id`.
    ///
    /// Returns `None` if the id is unknown, already read, or expired; an
    /// expired entry is evicted by the lookup that discovers it.
    pub fn get(&self, id: &str) -> Option<Secret> {
        let now = Utc::now();
        let mut secrets = self.lock();
        let (mut key, record) = secrets.remove_entry(id)?;
        key.zeroize();

        if record.is_expired(now) {
            debug!("lazy-evicted expired secret");
            return None;
        }

        debug!(unread = secrets.len(), "secret read and burned");
        Some(Secret::from(&record))
    }

    /// Number of secrets currently held (expired-but-unswept included).
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Maximum number of live secrets.
    pub fn capacity(&self) -> usize {
        self.max_unread
    }

    /// Remove every expired secret. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let removed = evict_expired(&mut self.lock(), now);

        if removed > 0 {
            info!(removed, "swept expired secrets");
        }
        removed
    }

    /// Spawn a background Tokio task that calls `sweep_expired()` every `interval`.
    ///
    /// The task runs until [`SweepHandle::stop`] is called or the handle is dropped.
    pub fn spawn_sweep(&self, interval: Duration) -> SweepHandle {
        let store = self.clone();
        let (stop, mut stopped) = watch::channel(false);
        let interval = interval.max(MIN_SWEEP_INTERVAL);

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            let mut total = 0usize;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        total += store.sweep_expired();
                    }
                    // Fires on an explicit stop and when the handle is dropped.
                    _ = stopped.changed() => break,
                }
            }
            debug!(total, "sweep task stopped");
            total
        });

        SweepHandle { stop, task }
    }
}

/// Control handle for the periodic sweep task.
pub struct SweepHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<usize>,
}

impl SweepHandle {
    /// Signal the task to stop, wait for it, and return the total number of
    /// secrets it removed over its lifetime.
    pub async fn stop(self) -> usize {
        let _ = self.stop.send(true);
        self.task.await.unwrap_or_default()
    }
}

/// Remove every entry expired at `now`, wiping ids along with payloads.
fn evict_expired(secrets: &mut HashMap<String, SecretRecord>, now: DateTime<Utc>) -> usize {
    let expired: Vec<String> = secrets
        .iter()
        .filter(|(_, record)| record.is_expired(now))
        .map(|(id, _)| id.clone())
        .collect();

    let mut removed = 0;
    for mut id in expired {
        if let Some((mut key, _record)) = secrets.remove_entry(&id) {
            key.zeroize();
            removed += 1;
        }
        id.zeroize();
    }
    removed
}

fn expiry_for(created_at: DateTime<Utc>, lifetime: Duration) -> DateTime<Utc> {
    let default = TimeDelta::seconds(DEFAULT_LIFETIME.as_secs() as i64);
    if lifetime.is_zero() {
        return created_at + default;
    }
    TimeDelta::from_std(lifetime)
        .ok()
        .and_then(|delta| created_at.checked_add_signed(delta))
        .unwrap_or(created_at + default)
}

/// 128 random bits from the OS generator, base64url without padding.
pub fn generate_id() -> String {
    let mut bytes = [0u8; ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
