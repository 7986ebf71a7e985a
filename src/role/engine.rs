use log::{debug, info};

use crate::message::{LeaderActive, LeaderActiveAck, Message};

use super::state::{FollowerData, LeaderData, PotentialLeaderData, RoleState, StateKind};
use super::{
    AppendCompletion, AppendError, Callbacks, Commit, Registry, FOLLOWER_TIMEOUT,
    HEARTBEAT_INTERVAL, LEADERSHIP_TIMEOUT,
};

/// The replication protocol engine for one node.
///
/// The engine is synchronous and owns no clock or socket: time arrives as
/// the monotonic nanosecond `ts` argument of `periodic` and the message
/// handlers, and outbound traffic goes through the injected [`Registry`].
/// `periodic` must be driven at least every ~25 ms for the timing
/// constants to hold.
pub struct Role<R: Registry> {
    id: u64,
    cluster_size: usize,
    /// Heartbeat sequence number. Outbound heartbeats are strictly
    /// increasing; inbound messages with an older seq are stale.
    seq: u64,
    /// Highest committed round this node knows of. Never decreases.
    round: u64,
    state: RoleState,
    registry: R,
    callbacks: Box<dyn Callbacks>,
}

impl<R: Registry> Role<R> {
    /// A node starts as a follower with no known leader; the first
    /// follower timeout turns it into a campaigner.
    pub fn new(id: u64, cluster_size: usize, registry: R, callbacks: Box<dyn Callbacks>) -> Self {
        Self {
            id,
            cluster_size,
            seq: 0,
            round: 0,
            state: RoleState::Follower(FollowerData::default()),
            registry,
            callbacks,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    /// The commit index. The round counter doubles as the commit index in
    /// this protocol: a round becomes visible here once it is
    /// majority-acknowledged (leader) or learned from the leader
    /// (follower).
    pub fn commit(&self) -> u64 {
        self.round
    }

    pub fn state(&self) -> StateKind {
        self.state.kind()
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.state, RoleState::Leader(_))
    }

    /// The leader this node currently recognizes, itself included.
    pub fn current_leader(&self) -> Option<u64> {
        match &self.state {
            RoleState::Follower(data) => data.current_leader,
            RoleState::PotentialLeader(_) => None,
            RoleState::Leader(_) => Some(self.id),
        }
    }

    /// Acks from other nodes needed for a majority; the self-vote is
    /// implicit.
    fn majority(&self) -> usize {
        self.cluster_size / 2
    }

    /// Time-driven progress. Must run to completion before the next
    /// handler or tick is delivered.
    pub fn periodic(&mut self, ts: u64) {
        match self.state.kind() {
            StateKind::Leader => self.periodic_leader(ts),
            StateKind::PotentialLeader => self.periodic_potential_leader(ts),
            StateKind::Follower => self.periodic_follower(ts),
        }
    }

    /// Dispatch one inbound protocol message, tagged with a timestamp.
    /// Identity traffic is connection handshake and never reaches the
    /// engine.
    pub fn handle(&mut self, ts: u64, msg: &Message) {
        match msg {
            Message::LeaderActive(m) => self.handle_leader_active(ts, m),
            Message::LeaderActiveAck(m) => self.handle_leader_active_ack(ts, m),
            Message::IdentityRequest | Message::Identity { .. } => {}
        }
    }

    fn periodic_leader(&mut self, ts: u64) {
        let majority = self.majority();
        let RoleState::Leader(data) = &mut self.state else {
            return;
        };

        let Some(pending) = data.pending_round else {
            if ts.saturating_sub(data.last_broadcast) < HEARTBEAT_INTERVAL {
                return;
            }
            if data.acks.len() >= majority {
                // Majority still acking: send the next heartbeat.
                self.seq += 1;
                let msg = Message::LeaderActive(LeaderActive {
                    id: self.id,
                    seq: self.seq,
                    round: self.round,
                    next: 0,
                    next_content: Vec::new(),
                });
                self.registry.broadcast(&msg);
                data.last_broadcast = ts;
                data.acks.clear();
            } else if ts.saturating_sub(data.last_broadcast) > LEADERSHIP_TIMEOUT {
                info!(
                    "node {}: no majority ack within leadership timeout, stepping down",
                    self.id
                );
                self.callbacks.lost_leadership();
                self.state = RoleState::PotentialLeader(PotentialLeaderData::default());
            }
            return;
        };

        // An append for `pending` is in flight.
        let votes = data.acks.values().filter(|&&round| round == pending).count();
        if votes >= majority {
            let payload = std::mem::take(&mut data.pending_content);
            let completion = data.completion.take();
            data.pending_round = None;
            self.round = pending;
            info!("node {}: committed round {}", self.id, pending);
            if let Some(completion) = completion {
                completion(Ok(Commit {
                    round: pending,
                    commit: pending,
                }));
            }
            self.callbacks.on_append(pending, &payload);
            self.callbacks.on_commit(pending, pending);
        } else if ts.saturating_sub(data.last_broadcast) > LEADERSHIP_TIMEOUT {
            info!(
                "node {}: round {} failed to reach a majority, stepping down",
                self.id, pending
            );
            if let Some(completion) = data.completion.take() {
                completion(Err(AppendError::Cancelled));
            }
            self.callbacks.lost_leadership();
            self.state = RoleState::PotentialLeader(PotentialLeaderData::default());
        }
    }

    fn periodic_potential_leader(&mut self, ts: u64) {
        let majority = self.majority();
        let RoleState::PotentialLeader(data) = &mut self.state else {
            return;
        };
        if ts.saturating_sub(data.last_broadcast) <= LEADERSHIP_TIMEOUT {
            return;
        }

        if data.acks.len() >= majority {
            info!(
                "node {}: campaign acknowledged by a majority, gained leadership at round {}",
                self.id, self.round
            );
            let promoted = LeaderData::promoted_from(data);
            self.state = RoleState::Leader(promoted);
            self.callbacks.gained_leadership();
            return;
        }

        // Campaign (again) under a fresh sequence number.
        self.seq += 1;
        data.acks.clear();
        let msg = Message::LeaderActive(LeaderActive {
            id: self.id,
            seq: self.seq,
            round: self.round,
            next: 0,
            next_content: Vec::new(),
        });
        self.registry.broadcast(&msg);
        data.last_broadcast = ts;
        debug!(
            "node {}: campaigning with seq {} round {}",
            self.id, self.seq, self.round
        );
    }

    fn periodic_follower(&mut self, ts: u64) {
        let RoleState::Follower(data) = &mut self.state else {
            return;
        };
        let Some(last) = data.last_leader_active else {
            data.last_leader_active = Some(ts);
            return;
        };
        if ts.saturating_sub(last) <= FOLLOWER_TIMEOUT {
            return;
        }

        let previous_leader = data.current_leader;
        info!(
            "node {}: leader silent beyond follower timeout, campaigning",
            self.id
        );
        self.state = RoleState::PotentialLeader(PotentialLeaderData::default());
        if previous_leader.is_some() {
            self.callbacks.on_leader_change(None);
        }
    }

    pub fn handle_leader_active(&mut self, ts: u64, msg: &LeaderActive) {
        if msg.seq < self.seq {
            debug!(
                "node {}: dropping stale heartbeat from {} (seq {} < {})",
                self.id, msg.id, msg.seq, self.seq
            );
            return;
        }
        self.seq = msg.seq;

        if !matches!(self.state, RoleState::Follower(_)) && msg.id < self.id {
            // A more authoritative node claims leadership; step down.
            if let RoleState::Leader(data) = &mut self.state {
                if let Some(completion) = data.completion.take() {
                    completion(Err(AppendError::Cancelled));
                }
                self.callbacks.lost_leadership();
            }
            info!("node {}: yielding to leader {}", self.id, msg.id);
            self.state = RoleState::Follower(FollowerData {
                current_leader: Some(msg.id),
                last_leader_active: None,
                pending_round: None,
            });
            self.callbacks.on_leader_change(Some(msg.id));
        }

        if self.id < msg.id {
            // This node outranks the sender; never acknowledge it.
            return;
        }

        let RoleState::Follower(data) = &mut self.state else {
            return;
        };

        // An unconfirmed append gates everything until the application
        // confirms it or the leader moves past it.
        if let Some(pending) = data.pending_round {
            if msg.round >= pending {
                data.pending_round = None;
            } else {
                return;
            }
        }

        // Among competing leaders, follow the lowest id.
        match data.current_leader {
            Some(current) if msg.id > current => return,
            Some(current) if msg.id < current => {
                data.current_leader = Some(msg.id);
                data.pending_round = None;
                self.callbacks.on_leader_change(Some(msg.id));
            }
            None => {
                data.current_leader = Some(msg.id);
                data.pending_round = None;
                self.callbacks.on_leader_change(Some(msg.id));
            }
            Some(_) => {}
        }

        if msg.round > self.round {
            self.round = msg.round;
            self.callbacks.on_commit(msg.round, msg.round);
        }

        if msg.next != 0 {
            // Proposal: deliver to the application and hold the ack until
            // it confirms durability.
            self.callbacks.on_append(msg.next, &msg.next_content);
            data.pending_round = Some(msg.next);
            data.last_leader_active = Some(ts);
            return;
        }

        // Plain heartbeat: acknowledge with our committed round.
        let ack = Message::LeaderActiveAck(LeaderActiveAck {
            id: self.id,
            seq: self.seq,
            round: self.round,
        });
        self.registry.send_to_id(msg.id, &ack);
        data.current_leader = Some(msg.id);
        data.last_leader_active = Some(ts);
    }

    pub fn handle_leader_active_ack(&mut self, ts: u64, msg: &LeaderActiveAck) {
        if msg.seq != self.seq {
            // Ack for an older heartbeat.
            return;
        }
        if msg.id == self.id {
            // The self-vote is implicit and never recorded.
            return;
        }

        match &mut self.state {
            RoleState::Follower(_) => return,
            RoleState::PotentialLeader(data) => {
                data.acks.insert(msg.id, msg.round);
                return;
            }
            RoleState::Leader(data) => {
                data.acks.insert(msg.id, msg.round);
            }
        }
        // A just-completed majority should commit now, not a tick later.
        self.periodic_leader(ts);
    }

    /// Submit a payload for replication as the next round.
    ///
    /// Fails synchronously unless this node is the leader with no append
    /// in flight; on success the outcome is reported exactly once through
    /// `completion`.
    pub fn append(
        &mut self,
        ts: u64,
        payload: Vec<u8>,
        completion: AppendCompletion,
    ) -> Result<u64, AppendError> {
        let RoleState::Leader(data) = &mut self.state else {
            return Err(AppendError::NotLeader);
        };
        if data.pending_round.is_some() || data.completion.is_some() {
            return Err(AppendError::AppendInFlight);
        }

        let round = self.round + 1;
        data.pending_round = Some(round);
        data.pending_content = payload.clone();
        data.completion = Some(completion);
        self.seq += 1;
        let msg = Message::LeaderActive(LeaderActive {
            id: self.id,
            seq: self.seq,
            round,
            next: round,
            next_content: payload,
        });
        self.registry.broadcast(&msg);
        data.last_broadcast = ts;
        data.acks.clear();
        info!("node {}: proposing round {}", self.id, round);
        Ok(round)
    }

    /// Application confirmation that the payload delivered for `round` is
    /// durable; releases the held acknowledgment to the leader. Confirms
    /// for anything but the current pending round are ignored.
    pub fn confirm_append(&mut self, round: u64) {
        let RoleState::Follower(data) = &mut self.state else {
            return;
        };
        if data.pending_round != Some(round) {
            return;
        }
        data.pending_round = None;
        if round > self.round {
            self.round = round;
            self.callbacks.on_commit(round, round);
        }
        let Some(leader) = data.current_leader else {
            return;
        };
        let ack = Message::LeaderActiveAck(LeaderActiveAck {
            id: self.id,
            seq: self.seq,
            round: self.round,
        });
        self.registry.send_to_id(leader, &ack);
        debug!("node {}: confirmed round {} to leader {}", self.id, round, leader);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MockRegistry {
        sent: Arc<Mutex<Vec<(Option<u64>, Message)>>>,
    }

    impl MockRegistry {
        fn take(&self) -> Vec<(Option<u64>, Message)> {
            std::mem::take(&mut self.sent.lock().unwrap())
        }
    }

    impl Registry for MockRegistry {
        fn broadcast(&self, msg: &Message) {
            self.sent.lock().unwrap().push((None, msg.clone()));
        }

        fn send_to_id(&self, peer_id: u64, msg: &Message) {
            self.sent.lock().unwrap().push((Some(peer_id), msg.clone()));
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Append(u64, Vec<u8>),
        Commit(u64),
        Gained,
        Lost,
        LeaderChange(Option<u64>),
    }

    #[derive(Clone, Default)]
    struct MockCallbacks {
        events: Arc<Mutex<Vec<Event>>>,
    }

    impl MockCallbacks {
        fn take(&self) -> Vec<Event> {
            std::mem::take(&mut self.events.lock().unwrap())
        }
    }

    impl Callbacks for MockCallbacks {
        fn on_append(&mut self, round: u64, payload: &[u8]) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Append(round, payload.to_vec()));
        }

        fn on_commit(&mut self, round: u64, _commit: u64) {
            self.events.lock().unwrap().push(Event::Commit(round));
        }

        fn gained_leadership(&mut self) {
            self.events.lock().unwrap().push(Event::Gained);
        }

        fn lost_leadership(&mut self) {
            self.events.lock().unwrap().push(Event::Lost);
        }

        fn on_leader_change(&mut self, leader: Option<u64>) {
            self.events.lock().unwrap().push(Event::LeaderChange(leader));
        }
    }

    fn new_role(id: u64, cluster_size: usize) -> (Role<MockRegistry>, MockRegistry, MockCallbacks) {
        let registry = MockRegistry::default();
        let callbacks = MockCallbacks::default();
        let role = Role::new(id, cluster_size, registry.clone(), Box::new(callbacks.clone()));
        (role, registry, callbacks)
    }

    const MS: u64 = 1_000_000;

    /// Drive a follower through its timeout and one campaign broadcast.
    fn campaign(role: &mut Role<MockRegistry>) {
        role.periodic(0);
        role.periodic(1100 * MS);
        assert_eq!(role.state(), StateKind::PotentialLeader);
        role.periodic(1500 * MS);
    }

    #[test]
    fn stale_heartbeat_is_dropped() {
        let (mut role, registry, callbacks) = new_role(2, 3);
        role.periodic(0);
        campaign(&mut role);
        let seq = role.seq();
        registry.take();
        callbacks.take();

        role.handle_leader_active(
            1600 * MS,
            &LeaderActive {
                id: 1,
                seq: seq - 1,
                round: 0,
                next: 0,
                next_content: Vec::new(),
            },
        );

        // Nothing adopted, nothing sent.
        assert_eq!(role.state(), StateKind::PotentialLeader);
        assert!(registry.take().is_empty());
        assert!(callbacks.take().is_empty());
    }

    #[test]
    fn follower_ignores_less_authoritative_sender() {
        let (mut role, registry, callbacks) = new_role(1, 3);
        role.handle_leader_active(
            10 * MS,
            &LeaderActive {
                id: 3,
                seq: 5,
                round: 2,
                next: 0,
                next_content: Vec::new(),
            },
        );

        // The seq is adopted, but node 1 outranks node 3: no ack, no
        // leader.
        assert_eq!(role.seq(), 5);
        assert_eq!(role.current_leader(), None);
        assert_eq!(role.round(), 0);
        assert!(registry.take().is_empty());
        assert!(callbacks.take().is_empty());
    }

    #[test]
    fn follower_adopts_and_acks_heartbeat() {
        let (mut role, registry, callbacks) = new_role(3, 3);
        role.handle_leader_active(
            10 * MS,
            &LeaderActive {
                id: 1,
                seq: 1,
                round: 4,
                next: 0,
                next_content: Vec::new(),
            },
        );

        assert_eq!(role.current_leader(), Some(1));
        assert_eq!(role.round(), 4);
        let sent = registry.take();
        assert_eq!(
            sent,
            vec![(
                Some(1),
                Message::LeaderActiveAck(LeaderActiveAck {
                    id: 3,
                    seq: 1,
                    round: 4,
                })
            )]
        );
        assert_eq!(
            callbacks.take(),
            vec![Event::LeaderChange(Some(1)), Event::Commit(4)]
        );
    }

    #[test]
    fn follower_prefers_lowest_id_leader() {
        let (mut role, _registry, callbacks) = new_role(5, 3);
        let heartbeat = |id, seq| LeaderActive {
            id,
            seq,
            round: 0,
            next: 0,
            next_content: Vec::new(),
        };

        role.handle_leader_active(10 * MS, &heartbeat(3, 1));
        assert_eq!(role.current_leader(), Some(3));

        // A higher-id claimant is ignored outright.
        role.handle_leader_active(20 * MS, &heartbeat(4, 1));
        assert_eq!(role.current_leader(), Some(3));

        // A lower-id claimant replaces the current leader.
        role.handle_leader_active(30 * MS, &heartbeat(2, 1));
        assert_eq!(role.current_leader(), Some(2));

        let changes: Vec<_> = callbacks
            .take()
            .into_iter()
            .filter(|e| matches!(e, Event::LeaderChange(_)))
            .collect();
        assert_eq!(
            changes,
            vec![Event::LeaderChange(Some(3)), Event::LeaderChange(Some(2))]
        );
    }

    #[test]
    fn unconfirmed_append_blocks_acks_until_superseded() {
        let (mut role, registry, callbacks) = new_role(2, 3);
        role.handle_leader_active(
            10 * MS,
            &LeaderActive {
                id: 1,
                seq: 1,
                round: 0,
                next: 0,
                next_content: Vec::new(),
            },
        );
        registry.take();
        callbacks.take();

        // Proposal for round 1 arrives; no ack until confirmed.
        role.handle_leader_active(
            20 * MS,
            &LeaderActive {
                id: 1,
                seq: 2,
                round: 1,
                next: 1,
                next_content: b"x".to_vec(),
            },
        );
        assert!(registry.take().is_empty());

        // While unconfirmed, even heartbeats for older rounds are ignored
        // entirely.
        role.handle_leader_active(
            30 * MS,
            &LeaderActive {
                id: 1,
                seq: 3,
                round: 0,
                next: 0,
                next_content: Vec::new(),
            },
        );
        assert!(registry.take().is_empty());

        // The leader moving past the pending round clears it, and the
        // heartbeat is acknowledged normally.
        role.handle_leader_active(
            40 * MS,
            &LeaderActive {
                id: 1,
                seq: 4,
                round: 1,
                next: 0,
                next_content: Vec::new(),
            },
        );
        let sent = registry.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Some(1));
    }

    #[test]
    fn confirm_append_acks_pending_round() {
        let (mut role, registry, callbacks) = new_role(2, 3);
        role.handle_leader_active(
            10 * MS,
            &LeaderActive {
                id: 1,
                seq: 1,
                round: 5,
                next: 6,
                next_content: b"payload".to_vec(),
            },
        );
        assert_eq!(
            callbacks.take(),
            vec![
                Event::LeaderChange(Some(1)),
                Event::Commit(5),
                Event::Append(6, b"payload".to_vec()),
            ]
        );
        assert!(registry.take().is_empty());

        // Confirming an unrelated round does nothing.
        role.confirm_append(9);
        assert!(registry.take().is_empty());

        role.confirm_append(6);
        let sent = registry.take();
        assert_eq!(
            sent,
            vec![(
                Some(1),
                Message::LeaderActiveAck(LeaderActiveAck {
                    id: 2,
                    seq: 1,
                    round: 6,
                })
            )]
        );
        assert_eq!(callbacks.take(), vec![Event::Commit(6)]);

        // A second confirm is stale.
        role.confirm_append(6);
        assert!(registry.take().is_empty());
    }

    #[test]
    fn ack_with_mismatched_seq_is_dropped() {
        let (mut role, _registry, _callbacks) = new_role(1, 3);
        campaign(&mut role);
        let seq = role.seq();

        role.handle_leader_active_ack(
            1600 * MS,
            &LeaderActiveAck {
                id: 2,
                seq: seq - 1,
                round: 0,
            },
        );
        role.periodic(2000 * MS);
        assert_eq!(role.state(), StateKind::PotentialLeader);
    }

    #[test]
    fn own_ack_is_never_recorded() {
        let (mut role, _registry, _callbacks) = new_role(1, 3);
        campaign(&mut role);
        let seq = role.seq();

        role.handle_leader_active_ack(1600 * MS, &LeaderActiveAck { id: 1, seq, round: 0 });
        // With no external ack the campaign keeps going instead of
        // promoting.
        role.periodic(2000 * MS);
        assert_eq!(role.state(), StateKind::PotentialLeader);
    }

    #[test]
    fn leader_steps_down_without_majority() {
        let (mut role, _registry, callbacks) = new_role(1, 3);
        campaign(&mut role);
        role.handle_leader_active_ack(
            1501 * MS,
            &LeaderActiveAck {
                id: 2,
                seq: role.seq(),
                round: 0,
            },
        );
        role.periodic(1900 * MS);
        assert_eq!(role.state(), StateKind::Leader);
        callbacks.take();

        // One heartbeat goes out and clears the inherited acks; silence
        // past LEADERSHIP_TIMEOUT then forfeits leadership.
        role.periodic(1960 * MS);
        role.periodic(2300 * MS);
        assert_eq!(role.state(), StateKind::PotentialLeader);
        assert_eq!(callbacks.take(), vec![Event::Lost]);
    }

    #[test]
    fn append_fails_when_not_leader() {
        let (mut role, _registry, _callbacks) = new_role(2, 3);
        let fired = Arc::new(Mutex::new(false));
        let fired_in = Arc::clone(&fired);
        let err = role
            .append(0, b"x".to_vec(), Box::new(move |_| *fired_in.lock().unwrap() = true))
            .unwrap_err();
        assert_eq!(err, AppendError::NotLeader);
        assert!(!*fired.lock().unwrap());
    }

    #[test]
    fn second_append_is_rejected_while_one_is_in_flight() {
        let (mut role, _registry, _callbacks) = new_role(1, 3);
        campaign(&mut role);
        role.handle_leader_active_ack(
            1501 * MS,
            &LeaderActiveAck {
                id: 2,
                seq: role.seq(),
                round: 0,
            },
        );
        role.periodic(1900 * MS);
        assert!(role.is_leader());

        role.append(1900 * MS, b"one".to_vec(), Box::new(|_| {}))
            .expect("first append accepted");
        let err = role
            .append(1901 * MS, b"two".to_vec(), Box::new(|_| {}))
            .unwrap_err();
        assert_eq!(err, AppendError::AppendInFlight);
    }

    #[test]
    fn dropping_a_leader_with_pending_append_cancels_it() {
        let (mut role, _registry, _callbacks) = new_role(1, 3);
        campaign(&mut role);
        role.handle_leader_active_ack(
            1501 * MS,
            &LeaderActiveAck {
                id: 2,
                seq: role.seq(),
                round: 0,
            },
        );
        role.periodic(1900 * MS);
        assert!(role.is_leader());

        let outcome = Arc::new(Mutex::new(None));
        let outcome_in = Arc::clone(&outcome);
        role.append(
            1900 * MS,
            b"x".to_vec(),
            Box::new(move |result| *outcome_in.lock().unwrap() = Some(result)),
        )
        .expect("append accepted");

        drop(role);
        assert_eq!(
            *outcome.lock().unwrap(),
            Some(Err(AppendError::Cancelled))
        );
    }
}
