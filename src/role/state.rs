use std::collections::HashMap;
use std::fmt;

use super::{AppendCompletion, AppendError};

/// Per-role data. Exactly one variant is populated at a time, so holding
/// data for the wrong role is unrepresentable.
pub enum RoleState {
    Follower(FollowerData),
    PotentialLeader(PotentialLeaderData),
    Leader(LeaderData),
}

impl RoleState {
    pub fn kind(&self) -> StateKind {
        match self {
            RoleState::Follower(_) => StateKind::Follower,
            RoleState::PotentialLeader(_) => StateKind::PotentialLeader,
            RoleState::Leader(_) => StateKind::Leader,
        }
    }
}

impl fmt::Debug for RoleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleState::Follower(data) => f.debug_tuple("Follower").field(data).finish(),
            RoleState::PotentialLeader(data) => {
                f.debug_tuple("PotentialLeader").field(data).finish()
            }
            RoleState::Leader(data) => f.debug_tuple("Leader").field(data).finish(),
        }
    }
}

/// Copyable view of the current role, for embedders and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Follower,
    PotentialLeader,
    Leader,
}

#[derive(Debug, Default)]
pub struct FollowerData {
    /// Leader this node currently follows.
    pub current_leader: Option<u64>,
    /// Timestamp of the last accepted heartbeat; `None` until the first
    /// periodic tick initializes it.
    pub last_leader_active: Option<u64>,
    /// Round delivered via `on_append` but not yet confirmed by the
    /// application.
    pub pending_round: Option<u64>,
}

#[derive(Debug, Default)]
pub struct PotentialLeaderData {
    /// Timestamp of the last campaign broadcast; 0 on entry, which makes
    /// the first periodic tick campaign immediately.
    pub last_broadcast: u64,
    /// Ack sender id -> the round that sender reported.
    pub acks: HashMap<u64, u64>,
}

pub struct LeaderData {
    pub last_broadcast: u64,
    /// Ack sender id -> the round that sender reported. Never contains
    /// this node's own id; the self-vote is implicit.
    pub acks: HashMap<u64, u64>,
    /// Round currently being proposed.
    pub pending_round: Option<u64>,
    /// Payload of the pending round, delivered back via `on_append` when
    /// it commits.
    pub pending_content: Vec<u8>,
    /// Completion for the single in-flight append.
    pub completion: Option<AppendCompletion>,
}

impl LeaderData {
    pub fn promoted_from(campaign: &mut PotentialLeaderData) -> Self {
        Self {
            last_broadcast: campaign.last_broadcast,
            acks: std::mem::take(&mut campaign.acks),
            pending_round: None,
            pending_content: Vec::new(),
            completion: None,
        }
    }
}

impl Drop for LeaderData {
    fn drop(&mut self) {
        // Backstop for teardown: an append still in flight when the
        // leader state goes away must complete with a failure, never
        // vanish. Transition paths take the completion first, so this
        // only fires when the whole role is dropped.
        if let Some(completion) = self.completion.take() {
            completion(Err(AppendError::Cancelled));
        }
    }
}

impl fmt::Debug for LeaderData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaderData")
            .field("last_broadcast", &self.last_broadcast)
            .field("acks", &self.acks)
            .field("pending_round", &self.pending_round)
            .field("pending_content_len", &self.pending_content.len())
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}
