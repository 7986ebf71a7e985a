mod client;
mod error;
mod peer;
mod registry;
mod server;

pub use self::client::run_dialer;
pub use self::error::NetworkError;
pub use self::peer::{run_connection, Inbound};
pub use self::registry::PeerRegistry;
pub use self::server::run_listener;
