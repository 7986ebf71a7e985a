use clap::Parser;
use env_logger::Env;
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use abcast::{Callbacks, Node, NodeConfig};

#[derive(Parser)]
#[command(name = "abcast")]
#[command(about = "Leader-based atomic broadcast cluster node")]
struct Cli {
    /// Unique nonzero id for this node; lower ids win leadership ties
    #[arg(short, long)]
    id: u64,

    /// Total number of nodes in the cluster, this one included
    #[arg(short, long, default_value_t = 1)]
    cluster_size: usize,

    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:4100")]
    listen: String,

    /// Peer address to connect to (repeatable)
    #[arg(short, long)]
    peer: Vec<String>,
}

/// Demo embedder: logs every event and confirms appends immediately. A
/// real embedder would persist the payload before confirming.
struct LoggingCallbacks {
    confirms: mpsc::UnboundedSender<u64>,
}

impl Callbacks for LoggingCallbacks {
    fn on_append(&mut self, round: u64, payload: &[u8]) {
        info!(
            "append round {}: {}",
            round,
            String::from_utf8_lossy(payload)
        );
        let _ = self.confirms.send(round);
    }

    fn on_commit(&mut self, _round: u64, commit: u64) {
        info!("commit index is now {commit}");
    }

    fn gained_leadership(&mut self) {
        info!("gained leadership");
    }

    fn lost_leadership(&mut self) {
        info!("lost leadership");
    }

    fn on_leader_change(&mut self, leader: Option<u64>) {
        match leader {
            Some(id) => info!("following leader {id}"),
            None => info!("leader lost"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = NodeConfig::new(cli.id, cli.cluster_size);
    config.listen = cli.listen;
    for peer in &cli.peer {
        config.add_peer(peer);
    }

    let (confirm_tx, mut confirm_rx) = mpsc::unbounded_channel();
    let mut node = Node::new(
        config.id,
        config.cluster_size,
        Box::new(LoggingCallbacks {
            confirms: confirm_tx,
        }),
    )?;
    node.listen(&config.listen).await?;
    for peer in &config.peers {
        node.connect_peer(peer)?;
    }

    // Confirms are enqueued by the callback and applied outside it.
    let handle = node.handle();
    let confirm_handle = handle.clone();
    tokio::spawn(async move {
        while let Some(round) = confirm_rx.recv().await {
            confirm_handle.confirm_append(round);
        }
    });

    // Propose stdin lines once this node leads.
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match handle.append(line.into_bytes()) {
                Ok(outcome) => match outcome.await {
                    Ok(Ok(commit)) => info!("appended as round {}", commit.round),
                    Ok(Err(err)) => info!("append failed: {err}"),
                    Err(_) => info!("append completion dropped"),
                },
                Err(err) => info!("append rejected: {err}"),
            }
        }
    });

    node.run().await?;
    Ok(())
}
