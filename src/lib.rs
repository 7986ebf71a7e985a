pub mod common;
pub mod config;
pub mod ffi;
pub mod message;
pub mod network;
pub mod node;
pub mod role;

// Public exports
pub use config::NodeConfig;
pub use node::{Node, NodeError, NodeHandle};
pub use role::{AppendError, Callbacks, Commit, Registry, Role, RoleState, StateKind};
