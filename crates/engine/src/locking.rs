//! Machine-independent locking
//!
//! Locks live in the document store's lock registry, so mutual exclusion
//! works across processes and hosts. Acquisition is an atomic insert keyed
//! `{database}:{purpose}`; contention falls back to a jittered retry loop.
//! A stale lock (its holder stopped refreshing `acquired_at` for longer
//! than the TTL) is taken over with a CAS replace against the old owner
//! token, so two waiters cannot both claim it.
//!
//! While a lock is held, a keeper thread refreshes `acquired_at` so the
//! lock never looks stale to other processes. Dropping the guard stops the
//! keeper and conditionally deletes the lock by owner token.

use crate::stores::{DocumentStore, LockDocument};
use rand::Rng;
use splitgill_core::{Result, SplitgillError, Version};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Default time to wait for a contended lock.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// How stale a lock must be before it can be taken over.
const LOCK_TTL: Duration = Duration::from_secs(60);

/// How often the keeper refreshes `acquired_at`.
const REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// What a lock is protecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPurpose {
    /// The commit protocol
    Commit,
    /// A sync run
    Sync,
}

impl LockPurpose {
    /// The purpose's name in lock ids.
    pub const fn as_str(&self) -> &'static str {
        match self {
            LockPurpose::Commit => "commit",
            LockPurpose::Sync => "sync",
        }
    }
}

/// The registry id of a database-scoped lock.
pub fn lock_id(database: &str, purpose: LockPurpose) -> String {
    format!("{database}:{}", purpose.as_str())
}

/// Lock acquisition and release against the document store's registry.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn DocumentStore>,
}

impl LockManager {
    /// A manager over the given store.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        LockManager { store }
    }

    /// Acquire a database-scoped lock, waiting up to `timeout`.
    ///
    /// Returns a guard that keeps the lock refreshed and releases it on
    /// drop. Fails with `LockTimeout` at the deadline.
    pub fn acquire(
        &self,
        database: &str,
        purpose: LockPurpose,
        timeout: Duration,
    ) -> Result<LockGuard> {
        let lock_id = lock_id(database, purpose);
        let owner = Uuid::new_v4().to_string();
        let started = Instant::now();
        let deadline = started + timeout;
        let mut rng = rand::thread_rng();

        loop {
            let candidate = LockDocument {
                lock_id: lock_id.clone(),
                owner: owner.clone(),
                acquired_at: Version::now(),
                metadata: lock_metadata(database, purpose),
            };
            if self.store.insert_lock(&candidate)? {
                debug!(lock = %lock_id, "lock acquired");
                return Ok(LockGuard::new(self.store.clone(), lock_id, owner));
            }

            // contended: a holder that stopped refreshing is fair game
            if let Some(existing) = self.store.read_lock(&lock_id)? {
                let age_ms = Version::now()
                    .as_millis()
                    .saturating_sub(existing.acquired_at.as_millis());
                if age_ms > LOCK_TTL.as_millis() as u64
                    && self
                        .store
                        .replace_lock(&lock_id, &existing.owner, &candidate)?
                {
                    warn!(lock = %lock_id, stale_owner = %existing.owner, "took over stale lock");
                    return Ok(LockGuard::new(self.store.clone(), lock_id, owner));
                }
            }

            if Instant::now() >= deadline {
                return Err(SplitgillError::LockTimeout {
                    lock_id,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            let jitter = Duration::from_millis(rng.gen_range(25..100));
            std::thread::sleep(jitter);
        }
    }

    /// Whether a lock is currently held.
    pub fn is_locked(&self, database: &str, purpose: LockPurpose) -> Result<bool> {
        Ok(self.store.read_lock(&lock_id(database, purpose))?.is_some())
    }
}

fn lock_metadata(database: &str, purpose: LockPurpose) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert("database".to_string(), database.to_string());
    metadata.insert("purpose".to_string(), purpose.as_str().to_string());
    if let Ok(host) = std::env::var("HOSTNAME") {
        metadata.insert("host".to_string(), host);
    }
    metadata
}

/// A held lock. Refreshes itself while alive, releases on drop.
pub struct LockGuard {
    store: Arc<dyn DocumentStore>,
    lock_id: String,
    owner: String,
    stop: Arc<AtomicBool>,
    keeper: Option<JoinHandle<()>>,
}

impl LockGuard {
    fn new(store: Arc<dyn DocumentStore>, lock_id: String, owner: String) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let keeper = spawn_keeper(
            store.clone(),
            lock_id.clone(),
            owner.clone(),
            stop.clone(),
        );
        LockGuard {
            store,
            lock_id,
            owner,
            stop,
            keeper,
        }
    }

    /// The registry id this guard holds.
    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(keeper) = self.keeper.take() {
            let _ = keeper.join();
        }
        match self.store.remove_lock(&self.lock_id, &self.owner) {
            Ok(true) => debug!(lock = %self.lock_id, "lock released"),
            Ok(false) => warn!(lock = %self.lock_id, "lock was already gone at release"),
            Err(error) => warn!(lock = %self.lock_id, %error, "failed to release lock"),
        }
    }
}

fn spawn_keeper(
    store: Arc<dyn DocumentStore>,
    lock_id: String,
    owner: String,
    stop: Arc<AtomicBool>,
) -> Option<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("sg-lock-keeper".to_string())
        .spawn(move || {
            let mut since_refresh = Duration::ZERO;
            let tick = Duration::from_millis(50);
            while !stop.load(Ordering::Acquire) {
                std::thread::sleep(tick);
                since_refresh += tick;
                if since_refresh >= REFRESH_INTERVAL {
                    since_refresh = Duration::ZERO;
                    match store.refresh_lock(&lock_id, &owner, Version::now()) {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!(lock = %lock_id, "lock lost while held");
                            return;
                        }
                        Err(error) => {
                            warn!(lock = %lock_id, %error, "lock refresh failed");
                        }
                    }
                }
            }
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::MemoryDocumentStore;

    fn manager() -> LockManager {
        LockManager::new(Arc::new(MemoryDocumentStore::new()))
    }

    #[test]
    fn test_acquire_and_release() {
        let locks = manager();
        {
            let guard = locks
                .acquire("db", LockPurpose::Commit, Duration::from_millis(100))
                .unwrap();
            assert_eq!(guard.lock_id(), "db:commit");
            assert!(locks.is_locked("db", LockPurpose::Commit).unwrap());
        }
        assert!(!locks.is_locked("db", LockPurpose::Commit).unwrap());
    }

    #[test]
    fn test_contention_times_out() {
        let locks = manager();
        let _held = locks
            .acquire("db", LockPurpose::Commit, Duration::from_millis(100))
            .unwrap();
        let result = locks.acquire("db", LockPurpose::Commit, Duration::from_millis(150));
        assert!(matches!(result, Err(SplitgillError::LockTimeout { .. })));
    }

    #[test]
    fn test_purposes_do_not_contend() {
        let locks = manager();
        let _commit = locks
            .acquire("db", LockPurpose::Commit, Duration::from_millis(100))
            .unwrap();
        let sync = locks.acquire("db", LockPurpose::Sync, Duration::from_millis(100));
        assert!(sync.is_ok());
    }

    #[test]
    fn test_databases_do_not_contend() {
        let locks = manager();
        let _a = locks
            .acquire("a", LockPurpose::Commit, Duration::from_millis(100))
            .unwrap();
        assert!(locks
            .acquire("b", LockPurpose::Commit, Duration::from_millis(100))
            .is_ok());
    }

    #[test]
    fn test_stale_lock_takeover() {
        let store = Arc::new(MemoryDocumentStore::new());
        let locks = LockManager::new(store.clone());
        // plant a lock whose holder stopped refreshing long ago
        let stale = LockDocument {
            lock_id: "db:sync".into(),
            owner: "dead-process".into(),
            acquired_at: Version::from_millis(1),
            metadata: BTreeMap::new(),
        };
        assert!(store.insert_lock(&stale).unwrap());

        let guard = locks
            .acquire("db", LockPurpose::Sync, Duration::from_millis(500))
            .unwrap();
        drop(guard);
        assert!(!locks.is_locked("db", LockPurpose::Sync).unwrap());
    }

    #[test]
    fn test_release_after_takeover_is_owner_scoped() {
        let store = Arc::new(MemoryDocumentStore::new());
        let locks = LockManager::new(store.clone());
        let guard = locks
            .acquire("db", LockPurpose::Commit, Duration::from_millis(100))
            .unwrap();
        // someone else's token cannot release it
        assert!(!store.remove_lock("db:commit", "intruder").unwrap());
        drop(guard);
    }
}
