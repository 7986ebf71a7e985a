mod engine;
mod error;
mod state;

pub use self::engine::Role;
pub use self::error::AppendError;
pub use self::state::{FollowerData, LeaderData, PotentialLeaderData, RoleState, StateKind};

use crate::message::Message;

/// How often a leader re-broadcasts its heartbeat, in nanoseconds.
pub const HEARTBEAT_INTERVAL: u64 = 50_000_000;

/// How long a leader or campaigner waits for a majority of acks before
/// giving up, in nanoseconds.
pub const LEADERSHIP_TIMEOUT: u64 = 300_000_000;

/// How long a follower tolerates silence from its leader before
/// campaigning, in nanoseconds.
pub const FOLLOWER_TIMEOUT: u64 = 1_000_000_000;

/// Position reached by a committed append. With the round counter doubling
/// as the commit index, both fields carry the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    pub round: u64,
    pub commit: u64,
}

/// Completion hook for a single append. Owned by the leader state and
/// moved out exactly once: with `Ok` when a majority acks the round, with
/// `Err(AppendError::Cancelled)` when leadership is lost first.
pub type AppendCompletion = Box<dyn FnOnce(Result<Commit, AppendError>) + Send>;

/// Outbound capability the engine consumes from the network layer.
///
/// Both operations are fire-and-forget; unreachable peers are the
/// transport's problem, the protocol tolerates loss.
pub trait Registry {
    fn broadcast(&self, msg: &Message);
    fn send_to_id(&self, peer_id: u64, msg: &Message);
}

/// Application-facing notifications, invoked synchronously on the engine
/// thread. Implementations must not re-enter the engine beyond enqueueing
/// work.
pub trait Callbacks: Send {
    /// A payload for `round` was delivered: on a follower when the leader
    /// proposes it, on the leader once its own append commits. Followers
    /// answer with `confirm_append(round)` once the payload is durable.
    fn on_append(&mut self, _round: u64, _payload: &[u8]) {}

    /// The commit index advanced.
    fn on_commit(&mut self, _round: u64, _commit: u64) {}

    fn gained_leadership(&mut self) {}

    fn lost_leadership(&mut self) {}

    /// The known leader changed; `None` means the leader was lost.
    fn on_leader_change(&mut self, _leader: Option<u64>) {}
}
