use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;

use crate::common::Clock;
use crate::network::{run_dialer, run_listener, Inbound, PeerRegistry};
use crate::role::{AppendError, Callbacks, Commit, Role, StateKind};

/// How often the event loop ticks the protocol engine.
const TICK_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("node id must be nonzero")]
    InvalidId,

    #[error("cluster size must be at least 1")]
    InvalidClusterSize,

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("node is already running")]
    AlreadyRunning,

    #[error("event loop channel closed")]
    ChannelClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One cluster member: the protocol engine plus the network plumbing that
/// feeds it.
///
/// The engine itself is synchronous; `run` drives it from a single event
/// loop, and [`NodeHandle`] serializes embedder calls against that loop
/// through the shared engine lock.
pub struct Node {
    id: u64,
    role: Arc<Mutex<Role<PeerRegistry>>>,
    registry: PeerRegistry,
    clock: Clock,
    listener: Option<TcpListener>,
    peers: Vec<SocketAddr>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: Option<mpsc::UnboundedReceiver<Inbound>>,
}

impl Node {
    pub fn new(
        id: u64,
        cluster_size: usize,
        callbacks: Box<dyn Callbacks>,
    ) -> Result<Self, NodeError> {
        if id == 0 {
            return Err(NodeError::InvalidId);
        }
        if cluster_size < 1 {
            return Err(NodeError::InvalidClusterSize);
        }

        let registry = PeerRegistry::new();
        let role = Role::new(id, cluster_size, registry.clone(), callbacks);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Ok(Self {
            id,
            role: Arc::new(Mutex::new(role)),
            registry,
            clock: Clock::new(),
            listener: None,
            peers: Vec::new(),
            inbound_tx,
            inbound_rx: Some(inbound_rx),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bind the TCP listener this node accepts peers on.
    pub async fn listen(&mut self, address: &str) -> Result<(), NodeError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|_| NodeError::InvalidAddress(address.to_string()))?;
        let listener = TcpListener::bind(addr).await?;
        info!("node {}: listening on {}", self.id, listener.local_addr()?);
        self.listener = Some(listener);
        Ok(())
    }

    /// The bound listener address, once `listen` has succeeded. Useful
    /// when listening on port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Record a peer address; dialing starts when the event loop runs and
    /// retries for as long as it runs.
    pub fn connect_peer(&mut self, address: &str) -> Result<(), NodeError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|_| NodeError::InvalidAddress(address.to_string()))?;
        self.peers.push(addr);
        Ok(())
    }

    /// Handle for submitting appends and probing state while `run` owns
    /// the node.
    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            role: Arc::clone(&self.role),
            clock: self.clock.clone(),
        }
    }

    /// Drive the event loop: periodic engine ticks plus inbound protocol
    /// messages. Returns only on fatal error.
    pub async fn run(&mut self) -> Result<(), NodeError> {
        let mut inbound_rx = self.inbound_rx.take().ok_or(NodeError::AlreadyRunning)?;

        if let Some(listener) = self.listener.take() {
            tokio::spawn(run_listener(
                listener,
                self.id,
                self.registry.clone(),
                self.inbound_tx.clone(),
            ));
        }
        for addr in self.peers.clone() {
            tokio::spawn(run_dialer(
                addr,
                self.id,
                self.registry.clone(),
                self.inbound_tx.clone(),
            ));
        }

        let mut tick = interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let now = self.clock.now_ns();
                    self.role.lock().unwrap().periodic(now);
                }
                inbound = inbound_rx.recv() => {
                    let Some(Inbound { from, message }) = inbound else {
                        error!("node {}: inbound channel closed, stopping", self.id);
                        return Err(NodeError::ChannelClosed);
                    };
                    debug!("node {}: message from peer {}", self.id, from);
                    let now = self.clock.now_ns();
                    self.role.lock().unwrap().handle(now, &message);
                }
            }
        }
    }
}

/// Cloneable handle onto a running node.
#[derive(Clone)]
pub struct NodeHandle {
    role: Arc<Mutex<Role<PeerRegistry>>>,
    clock: Clock,
}

impl NodeHandle {
    /// Submit one payload for replication with an explicit completion.
    ///
    /// Acceptance is checked synchronously: the node must currently lead
    /// with no other append in flight. Once accepted, `completion` fires
    /// exactly once with the outcome.
    pub fn append_with<F>(&self, payload: Vec<u8>, completion: F) -> Result<u64, AppendError>
    where
        F: FnOnce(Result<Commit, AppendError>) + Send + 'static,
    {
        let now = self.clock.now_ns();
        self.role
            .lock()
            .unwrap()
            .append(now, payload, Box::new(completion))
    }

    /// Submit one payload for replication; the outcome arrives on the
    /// returned receiver.
    pub fn append(
        &self,
        payload: Vec<u8>,
    ) -> Result<oneshot::Receiver<Result<Commit, AppendError>>, AppendError> {
        let (tx, rx) = oneshot::channel();
        self.append_with(payload, move |result| {
            let _ = tx.send(result);
        })?;
        Ok(rx)
    }

    /// Confirm that the payload delivered via `on_append` for `round` is
    /// durable, releasing the acknowledgment to the leader.
    pub fn confirm_append(&self, round: u64) {
        self.role.lock().unwrap().confirm_append(round);
    }

    pub fn state(&self) -> StateKind {
        self.role.lock().unwrap().state()
    }

    pub fn is_leader(&self) -> bool {
        self.role.lock().unwrap().is_leader()
    }

    pub fn round(&self) -> u64 {
        self.role.lock().unwrap().round()
    }

    pub fn commit(&self) -> u64 {
        self.role.lock().unwrap().commit()
    }

    pub fn current_leader(&self) -> Option<u64> {
        self.role.lock().unwrap().current_leader()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopCallbacks;

    impl Callbacks for NoopCallbacks {}

    #[test]
    fn zero_id_is_rejected() {
        assert!(matches!(
            Node::new(0, 3, Box::new(NoopCallbacks)),
            Err(NodeError::InvalidId)
        ));
    }

    #[test]
    fn empty_cluster_is_rejected() {
        assert!(matches!(
            Node::new(1, 0, Box::new(NoopCallbacks)),
            Err(NodeError::InvalidClusterSize)
        ));
    }

    #[test]
    fn malformed_peer_address_is_rejected() {
        let mut node = Node::new(1, 3, Box::new(NoopCallbacks)).unwrap();
        assert!(matches!(
            node.connect_peer("not-an-address"),
            Err(NodeError::InvalidAddress(_))
        ));
    }

    #[test]
    fn append_on_a_follower_fails_synchronously() {
        let node = Node::new(1, 3, Box::new(NoopCallbacks)).unwrap();
        let handle = node.handle();
        assert!(matches!(
            handle.append(b"x".to_vec()),
            Err(AppendError::NotLeader)
        ));
    }

    #[tokio::test]
    async fn listen_binds_an_ephemeral_port() {
        let mut node = Node::new(1, 1, Box::new(NoopCallbacks)).unwrap();
        node.listen("127.0.0.1:0").await.expect("bind");
        let addr = node.local_addr().expect("bound address");
        assert_ne!(addr.port(), 0);
    }
}
