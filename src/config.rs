use serde::{Deserialize, Serialize};

/// Static configuration for one cluster node.
///
/// Cluster membership is fixed for the lifetime of a node: `cluster_size`
/// counts every node including this one, and `peers` lists the addresses
/// of the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: u64,
    pub cluster_size: usize,
    pub listen: String,
    #[serde(default)]
    pub peers: Vec<String>,
}

impl NodeConfig {
    pub fn new(id: u64, cluster_size: usize) -> Self {
        Self {
            id,
            cluster_size,
            listen: "127.0.0.1:4100".to_string(),
            peers: Vec::new(),
        }
    }

    pub fn add_peer(&mut self, address: &str) {
        self.peers.push(address.to_string());
    }
}
