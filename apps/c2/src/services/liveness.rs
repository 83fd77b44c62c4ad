//! Liveness sweeper for registered nodes.
//!
//! Periodically probes every active entry; a node that fails all probe
//! attempts gets its session closed and its entry dropped, under the same
//! per-endpoint mutex registration uses. The sweep is idempotent, so
//! running it on several workers at once is safe.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, sleep};
use tracing::{error, info, warn};

use crate::broker::{self, Broker};
use crate::db::{sessions, DbPool};
use crate::services::{active_nodes, NodeClient};

/// Backoff between probe attempts, in seconds.
const PROBE_BACKOFF_SECS: [u64; 3] = [1, 2, 4];

#[derive(Clone)]
pub struct SweeperConfig {
    pub interval_secs: u64,
    pub lock_ttl: Duration,
    pub lock_wait: Duration,
}

/// Starts the background sweeper task.
pub fn start(
    pool: DbPool,
    broker: Arc<dyn Broker>,
    client: Arc<NodeClient>,
    config: SweeperConfig,
) {
    tokio::spawn(async move {
        info!(
            "starting liveness sweeper (interval: {} seconds)",
            config.interval_secs
        );
        let mut ticker = interval(Duration::from_secs(config.interval_secs));
        loop {
            ticker.tick().await;
            if let Err(e) = sweep(&pool, &broker, &client, &config).await {
                error!("liveness sweep error: {e}");
            }
        }
    });
}

/// Runs one sweep cycle over the active-node table.
pub async fn sweep(
    pool: &DbPool,
    broker: &Arc<dyn Broker>,
    client: &Arc<NodeClient>,
    config: &SweeperConfig,
) -> Result<(), crate::error::AppError> {
    let entries = active_nodes::list(broker);
    if entries.is_empty() {
        return Ok(());
    }

    let mut closed = 0usize;
    for (ip, port, entry) in entries {
        if probe_with_backoff(client, &ip, port).await {
            continue;
        }

        let Some(_guard) = broker::lock(
            broker,
            &active_nodes::mutex_name(&ip, port),
            config.lock_ttl,
            config.lock_wait,
        )
        .await
        else {
            warn!("could not lock {ip}:{port} for liveness cleanup, skipping");
            continue;
        };

        // Another worker may have swept or the node re-registered while we
        // were probing; only act on the session we observed.
        match active_nodes::get(broker, &ip, port) {
            Some(current) if current.session_id == entry.session_id => {}
            _ => continue,
        }

        sessions::close_active(pool.connection(), &ip, port).await?;
        active_nodes::remove(broker, &ip, port);
        warn!("node at {ip}:{port} is unresponsive, session {} closed", entry.session_id);
        closed += 1;
    }

    if closed > 0 {
        info!("liveness sweep closed {closed} session(s)");
    }
    Ok(())
}

async fn probe_with_backoff(client: &Arc<NodeClient>, ip: &str, port: u16) -> bool {
    for (attempt, backoff) in PROBE_BACKOFF_SECS.iter().enumerate() {
        if client.probe(ip, port).await {
            return true;
        }
        if attempt + 1 < PROBE_BACKOFF_SECS.len() {
            sleep(Duration::from_secs(*backoff)).await;
        }
    }
    false
}
