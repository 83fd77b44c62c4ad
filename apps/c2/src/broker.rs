//! The shared cache/lock broker the C2 coordinates through.
//!
//! The contract is a small key-value store with named mutexes and atomic
//! counters: active-node entries live under `environments:{ip}:{port}`,
//! replay nonces under `nonce:{signature}`, and every cross-worker critical
//! section takes a named mutex with a TTL and a fencing token.
//!
//! [`MemoryBroker`] is the in-process implementation used by a
//! single-process deployment. Multi-process deployments can substitute any
//! store with the same semantics; handlers only ever see `dyn Broker`,
//! injected at startup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

/// Token proving ownership of an acquired mutex.
pub type FencingToken = u64;

pub trait Broker: Send + Sync {
    /// Reads a value, honoring its TTL.
    fn get(&self, key: &str) -> Option<Value>;

    /// Writes a value with an optional TTL.
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>);

    /// Removes a value. Returns whether it was present.
    fn remove(&self, key: &str) -> bool;

    /// Lists all live `(key, value)` pairs under a key prefix.
    fn scan(&self, prefix: &str) -> Vec<(String, Value)>;

    /// Tries to take the named mutex. `None` means it is held. The lock
    /// auto-expires after `ttl` so a crashed holder cannot wedge the
    /// system.
    fn acquire(&self, name: &str, ttl: Duration) -> Option<FencingToken>;

    /// Releases a mutex if `token` still owns it.
    fn release(&self, name: &str, token: FencingToken) -> bool;

    /// Atomically increments a counter, creating it with the TTL on first
    /// touch. Returns the new count.
    fn incr(&self, key: &str, ttl: Duration) -> u64;
}

#[derive(Default)]
pub struct MemoryBroker {
    entries: Mutex<HashMap<String, (Value, Option<Instant>)>>,
    locks: Mutex<HashMap<String, (FencingToken, Instant)>>,
    counters: Mutex<HashMap<String, (u64, Instant)>>,
    next_token: AtomicU64,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

fn expired(deadline: &Option<Instant>) -> bool {
    deadline.is_some_and(|d| d <= Instant::now())
}

impl Broker for MemoryBroker {
    fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, deadline)) if expired(deadline) => {
                entries.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .insert(key.to_string(), (value, deadline));
    }

    fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    fn scan(&self, prefix: &str) -> Vec<(String, Value)> {
        let mut entries = self.entries.lock();
        entries.retain(|_, (_, deadline)| !expired(deadline));
        let mut found: Vec<(String, Value)> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (value, _))| (key.clone(), value.clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    fn acquire(&self, name: &str, ttl: Duration) -> Option<FencingToken> {
        let now = Instant::now();
        let mut locks = self.locks.lock();
        if let Some((_, deadline)) = locks.get(name) {
            if *deadline > now {
                return None;
            }
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        locks.insert(name.to_string(), (token, now + ttl));
        Some(token)
    }

    fn release(&self, name: &str, token: FencingToken) -> bool {
        let mut locks = self.locks.lock();
        match locks.get(name) {
            Some((held, _)) if *held == token => {
                locks.remove(name);
                true
            }
            _ => false,
        }
    }

    fn incr(&self, key: &str, ttl: Duration) -> u64 {
        let now = Instant::now();
        let mut counters = self.counters.lock();
        let entry = counters.entry(key.to_string()).or_insert((0, now + ttl));
        if entry.1 <= now {
            *entry = (0, now + ttl);
        }
        entry.0 += 1;
        entry.0
    }
}

/// Guard of a held broker mutex; releases on drop.
pub struct LockGuard {
    broker: Arc<dyn Broker>,
    name: String,
    token: FencingToken,
}

impl LockGuard {
    pub fn token(&self) -> FencingToken {
        self.token
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.broker.release(&self.name, self.token);
    }
}

/// Acquires a named mutex, retrying until `wait` has elapsed.
pub async fn lock(
    broker: &Arc<dyn Broker>,
    name: &str,
    ttl: Duration,
    wait: Duration,
) -> Option<LockGuard> {
    let deadline = Instant::now() + wait;
    loop {
        if let Some(token) = broker.acquire(name, ttl) {
            return Some(LockGuard {
                broker: broker.clone(),
                name: name.to_string(),
                token,
            });
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_get_remove() {
        let broker = MemoryBroker::new();
        broker.set("k", json!({"a": 1}), None);
        assert_eq!(broker.get("k"), Some(json!({"a": 1})));
        assert!(broker.remove("k"));
        assert!(!broker.remove("k"));
        assert_eq!(broker.get("k"), None);
    }

    #[test]
    fn ttl_expires_values() {
        let broker = MemoryBroker::new();
        broker.set("k", json!(1), Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(broker.get("k"), None);
    }

    #[test]
    fn scan_lists_prefix_matches_sorted() {
        let broker = MemoryBroker::new();
        broker.set("environments:10.0.0.2:4900", json!(2), None);
        broker.set("environments:10.0.0.1:4900", json!(1), None);
        broker.set("repository:p1", json!(3), None);
        let found = broker.scan("environments:");
        let keys: Vec<&str> = found.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["environments:10.0.0.1:4900", "environments:10.0.0.2:4900"]
        );
    }

    #[test]
    fn mutex_is_exclusive_until_released() {
        let broker = MemoryBroker::new();
        let ttl = Duration::from_secs(30);
        let token = broker.acquire("m", ttl).unwrap();
        assert!(broker.acquire("m", ttl).is_none());
        assert!(broker.release("m", token));
        assert!(broker.acquire("m", ttl).is_some());
    }

    #[test]
    fn release_requires_the_fencing_token() {
        let broker = MemoryBroker::new();
        let ttl = Duration::from_secs(30);
        let token = broker.acquire("m", ttl).unwrap();
        assert!(!broker.release("m", token + 1));
        assert!(broker.release("m", token));
    }

    #[test]
    fn expired_mutex_can_be_retaken() {
        let broker = MemoryBroker::new();
        let stale = broker.acquire("m", Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let fresh = broker.acquire("m", Duration::from_secs(30)).unwrap();
        assert_ne!(stale, fresh);
        // The stale holder can no longer release the retaken lock.
        assert!(!broker.release("m", stale));
    }

    #[test]
    fn incr_counts_within_a_window() {
        let broker = MemoryBroker::new();
        assert_eq!(broker.incr("nonce:sig", Duration::from_secs(30)), 1);
        assert_eq!(broker.incr("nonce:sig", Duration::from_secs(30)), 2);
    }

    #[test]
    fn incr_resets_after_expiry() {
        let broker = MemoryBroker::new();
        assert_eq!(broker.incr("n", Duration::from_millis(1)), 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(broker.incr("n", Duration::from_millis(1)), 1);
    }

    #[tokio::test]
    async fn lock_guard_releases_on_drop() {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let ttl = Duration::from_secs(30);
        let wait = Duration::from_millis(10);
        {
            let _guard = lock(&broker, "m", ttl, wait).await.unwrap();
            assert!(broker.acquire("m", ttl).is_none());
        }
        assert!(broker.acquire("m", ttl).is_some());
    }
}
