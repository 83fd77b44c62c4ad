//! The active-node table in the broker.
//!
//! One entry per registered node, keyed `environments:{ip}:{port}`. The
//! table is the single source of truth for "is this node reachable now";
//! historical truth lives in the database. Writers hold the endpoint's
//! broker mutex (`environments:{ip}:{port}:mutex`).

use std::sync::Arc;

use secchiware_protocol::PlatformInfo;
use serde::{Deserialize, Serialize};

use crate::broker::Broker;

const KEY_PREFIX: &str = "environments:";

/// Cache-resident record of a live node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveEntry {
    pub session_id: i32,
    pub session_start: String,
    pub platform_info: PlatformInfo,
}

pub fn entry_key(ip: &str, port: u16) -> String {
    format!("{KEY_PREFIX}{ip}:{port}")
}

/// Name of the mutex serializing registration state for one endpoint.
pub fn mutex_name(ip: &str, port: u16) -> String {
    format!("{KEY_PREFIX}{ip}:{port}:mutex")
}

pub fn get(broker: &Arc<dyn Broker>, ip: &str, port: u16) -> Option<ActiveEntry> {
    broker
        .get(&entry_key(ip, port))
        .and_then(|value| serde_json::from_value(value).ok())
}

pub fn put(broker: &Arc<dyn Broker>, ip: &str, port: u16, entry: &ActiveEntry) {
    let value = serde_json::to_value(entry).expect("active entry always serializes");
    broker.set(&entry_key(ip, port), value, None);
}

pub fn remove(broker: &Arc<dyn Broker>, ip: &str, port: u16) -> bool {
    broker.remove(&entry_key(ip, port))
}

/// Every live entry as `(ip, port, entry)`, ordered by key.
pub fn list(broker: &Arc<dyn Broker>) -> Vec<(String, u16, ActiveEntry)> {
    broker
        .scan(KEY_PREFIX)
        .into_iter()
        .filter_map(|(key, value)| {
            let endpoint = key.strip_prefix(KEY_PREFIX)?;
            // Mutex keys share the prefix; they carry a second suffix.
            let (ip, port) = endpoint.rsplit_once(':')?;
            let port: u16 = port.parse().ok()?;
            let entry: ActiveEntry = serde_json::from_value(value).ok()?;
            Some((ip.to_string(), port, entry))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::db::sessions::tests::sample_platform;

    fn entry(session_id: i32) -> ActiveEntry {
        ActiveEntry {
            session_id,
            session_start: "2026-03-01T00:00:00Z".to_string(),
            platform_info: sample_platform(),
        }
    }

    #[test]
    fn put_get_remove_round_trip() {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        put(&broker, "10.0.0.2", 4900, &entry(1));
        assert_eq!(get(&broker, "10.0.0.2", 4900), Some(entry(1)));
        assert!(remove(&broker, "10.0.0.2", 4900));
        assert_eq!(get(&broker, "10.0.0.2", 4900), None);
        assert!(!remove(&broker, "10.0.0.2", 4900));
    }

    #[test]
    fn list_parses_endpoints_back_out_of_keys() {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        put(&broker, "10.0.0.2", 4900, &entry(1));
        put(&broker, "10.0.0.1", 4901, &entry(2));

        let listed = list(&broker);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].0, "10.0.0.1");
        assert_eq!(listed[0].1, 4901);
        assert_eq!(listed[1].0, "10.0.0.2");
        assert_eq!(listed[1].1, 4900);
    }
}
