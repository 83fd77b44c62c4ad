//! Shutdown of the managed fleet.
//!
//! Orders every node with an open session to stop, then closes all open
//! sessions. Runs when the C2 itself goes down and behind the
//! `--stop-environments` maintenance flag. Works from the database, not
//! the cache: a rebooted C2 has an empty broker but may still own open
//! sessions.

use std::sync::Arc;

use tracing::{info, warn};

use crate::db::{sessions, DbPool};
use crate::error::AppResult;
use crate::services::NodeClient;

pub async fn stop_active_environments(pool: &DbPool, client: &Arc<NodeClient>) -> AppResult<()> {
    let conn = pool.connection();
    let active = sessions::all_active(conn).await?;
    if active.is_empty() {
        info!("no active environments to stop");
        return Ok(());
    }

    for session in &active {
        let ip = &session.env_ip;
        let port = session.env_port as u16;
        match client.shutdown(ip, port).await {
            Ok(response) if response.status().as_u16() == 204 => {
                info!("node at {ip}:{port} reached");
            }
            Ok(response) => {
                warn!(
                    "unexpected response from node at {ip}:{port}: {}",
                    response.status()
                );
            }
            Err(_) => {
                warn!("node at {ip}:{port} could not be reached");
            }
        }
    }

    let closed = sessions::close_all_active(conn).await?;
    info!("closed {closed} session(s)");
    Ok(())
}
