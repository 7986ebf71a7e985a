use log::{debug, warn};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::peer::{run_connection, Inbound};
use super::registry::PeerRegistry;

/// Accept inbound peer connections forever, spawning a connection driver
/// for each.
pub async fn run_listener(
    listener: TcpListener,
    local_id: u64,
    registry: PeerRegistry,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("accepted connection from {addr}");
                let registry = registry.clone();
                let inbound = inbound.clone();
                tokio::spawn(async move {
                    if let Err(err) = run_connection(stream, local_id, registry, inbound).await {
                        debug!("connection from {addr} ended: {err}");
                    }
                });
            }
            Err(err) => {
                warn!("accept failed: {err}");
                sleep(Duration::from_millis(100)).await;
            }
        }
    }
}
