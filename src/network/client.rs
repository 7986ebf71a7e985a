use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::peer::{run_connection, Inbound};
use super::registry::PeerRegistry;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Keep one outbound peer connection alive, redialing after every
/// disconnect or failed attempt.
pub async fn run_dialer(
    addr: SocketAddr,
    local_id: u64,
    registry: PeerRegistry,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                info!("connected to peer at {addr}");
                let outcome =
                    run_connection(stream, local_id, registry.clone(), inbound.clone()).await;
                if let Err(err) = outcome {
                    debug!("connection to {addr} ended: {err}");
                }
            }
            Err(err) => {
                debug!("dialing {addr} failed: {err}");
            }
        }
        sleep(RECONNECT_DELAY).await;
    }
}
