use std::net::SocketAddr;

use quorum_core::error::Result;
use slog::Logger;
use tokio::sync::mpsc;

use crate::candidate::Candidate;
use crate::config::RaftConfig;
use crate::follower::Follower;
use crate::fsm::Instruction;
use crate::leader::Leader;
use crate::log::Log;
use crate::rpc::{Address, Message};
use crate::store::{PersistedState, Store};
use crate::timer::RaftTimers;

/// An id that uniquely identifies a server within the cluster. Configured,
/// or derived from the advertised bind address.
pub type NodeId = String;
pub type Term = u64;
pub type LogIndex = u64;

/// An entry in the replicated log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Entry {
    /// The term in which the entry was created.
    pub term: Term,
    /// The entry's position in the log, counted from 1.
    pub index: LogIndex,
    /// The opaque command handed to the state machine once committed.
    pub data: Vec<u8>,
}

/// A remote member of the cluster. The id is learned from its traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub addr: SocketAddr,
    pub id: Option<NodeId>,
}

/// Everything the state machine reacts to: timer events and the raft RPCs.
///
/// Requests carry a wall-clock `timestamp` which replies echo back, so the
/// originator can measure round trips and discard replies from a previous
/// election or leadership period.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Command {
    /// Heartbeat timer tick. Only a leader acts on it.
    Tick,
    /// Election timer fired.
    Timeout,
    /// Request that this server vote for the named candidate.
    VoteRequest {
        term: Term,
        candidate_id: NodeId,
        last_log_index: LogIndex,
        last_log_term: Term,
        timestamp: u64,
    },
    VoteResponse {
        term: Term,
        from: NodeId,
        granted: bool,
        timestamp: u64,
    },
    /// Replicate entries (or assert leadership, when empty).
    AppendEntries {
        term: Term,
        leader_id: NodeId,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<Entry>,
        leader_commit: LogIndex,
        timestamp: u64,
    },
    AppendResponse {
        term: Term,
        from: NodeId,
        success: bool,
        /// Index of the last entry the follower now holds from this leader.
        match_index: LogIndex,
        timestamp: u64,
    },
}

impl Command {
    /// The term carried by an RPC, if this is one.
    pub fn term(&self) -> Option<Term> {
        match self {
            Command::VoteRequest { term, .. }
            | Command::VoteResponse { term, .. }
            | Command::AppendEntries { term, .. }
            | Command::AppendResponse { term, .. } => Some(*term),
            Command::Tick | Command::Timeout => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Tick => "Tick",
            Command::Timeout => "Timeout",
            Command::VoteRequest { .. } => "VoteRequest",
            Command::VoteResponse { .. } => "VoteResponse",
            Command::AppendEntries { .. } => "AppendEntries",
            Command::AppendResponse { .. } => "AppendResponse",
        }
    }
}

/// State common to all roles.
///
/// `current_term` and `voted_for` are persistent; they go through the store
/// before any reply that reveals them. The commit cursors are volatile and
/// rebuilt after a restart.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
}

/// Behavior shared by the three roles.
pub trait Role {
    /// A new term was adopted; drop any per-role election state.
    fn term(&mut self, term: Term);
    fn role(&self) -> RaftRole;
    fn log(&self) -> &Logger;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

/// The primary struct representing one raft server. Fields common to all
/// roles live here; role-specific state lives in `role`.
pub struct Raft<T: Role> {
    /// The identifier for this server.
    pub id: NodeId,
    /// The advertised bind address; peers know this server by it.
    pub addr: SocketAddr,
    pub logger: Logger,
    pub config: RaftConfig,
    /// The remote members of the cluster. Quorum arithmetic counts this
    /// server too: the cluster size is `peers.len() + 1`.
    pub peers: Vec<Node>,
    pub state: State,
    /// The replicated command log.
    pub log: Log,
    /// Durable storage for term, vote and log.
    pub store: Store,
    pub timers: RaftTimers,
    /// Outbound messages; the server loop routes them to the transport.
    pub rpc_tx: mpsc::UnboundedSender<Message>,
    /// Committed entries on their way to the state machine driver.
    pub fsm_tx: mpsc::UnboundedSender<Instruction>,
    pub role: T,
}

impl<T: Role> Raft<T> {
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    /// Adopt a newer term. Clears the vote, which is only ever written once
    /// per term. The caller persists before sending anything that reveals
    /// the new term.
    pub fn term(&mut self, term: Term) {
        assert!(term > self.state.current_term);
        self.state.current_term = term;
        self.state.voted_for = None;
        self.role.term(term);
    }

    /// Flush term, vote and log through the store.
    pub fn save(&self) -> Result<()> {
        self.store.save(&PersistedState {
            current_term: self.state.current_term,
            voted_for: self.state.voted_for.clone(),
            entries: self.log.entries().to_vec(),
        })
    }

    pub fn send(&self, to: Address, command: Command) -> Result<()> {
        self.rpc_tx.send(Message {
            to,
            from: Address::Peer(self.addr),
            command,
        })?;
        Ok(())
    }

    pub fn send_all(&self, command: Command) -> Result<()> {
        self.send(Address::Peers, command)
    }

    pub fn reset_election_timer(&self) {
        self.timers
            .election
            .restart(self.config.random_election_timeout());
    }

    /// Hand every newly committed entry to the state machine driver, in
    /// order.
    pub fn apply_committed(&mut self) -> Result<()> {
        while self.state.last_applied < self.state.commit_index {
            self.state.last_applied += 1;
            if let Some(entry) = self.log.get(self.state.last_applied) {
                self.fsm_tx.send(Instruction::Apply {
                    entry: entry.clone(),
                })?;
            }
        }
        Ok(())
    }

    /// Remember the id a peer advertises in its traffic.
    pub fn note_peer(&mut self, addr: SocketAddr, id: &str) {
        if let Some(peer) = self.peers.iter_mut().find(|p| p.addr == addr) {
            if peer.id.as_deref() != Some(id) {
                peer.id = Some(id.to_string());
            }
        }
    }

    pub fn is_known_peer(&self, addr: SocketAddr) -> bool {
        addr == self.addr || self.peers.iter().any(|p| p.addr == addr)
    }

    pub fn log_command(&self, msg: &Message) {
        if !matches!(msg.command, Command::Tick) {
            debug!(self.role.log(), "applying";
                   "command" => msg.command.name(),
                   "from" => format!("{:?}", msg.from));
        }
    }
}

impl Raft<Follower> {
    pub fn new(
        config: RaftConfig,
        id: NodeId,
        addr: SocketAddr,
        peers: Vec<Node>,
        logger: Logger,
        store: Store,
        timers: RaftTimers,
        rpc_tx: mpsc::UnboundedSender<Message>,
        fsm_tx: mpsc::UnboundedSender<Instruction>,
    ) -> Result<Raft<Follower>> {
        let persisted = store.load_or_default()?;
        info!(logger, "loaded persistent state";
              "term" => persisted.current_term,
              "entries" => persisted.entries.len());
        let raft = Raft {
            id,
            addr,
            logger: logger.clone(),
            config,
            peers,
            state: State {
                current_term: persisted.current_term,
                voted_for: persisted.voted_for,
                commit_index: 0,
                last_applied: 0,
            },
            log: Log::new(persisted.entries),
            store,
            timers,
            rpc_tx,
            fsm_tx,
            role: Follower {
                leader_id: None,
                logger: logger.new(o!("role" => "follower")),
            },
        };
        raft.reset_election_timer();
        Ok(raft)
    }
}

/// A snapshot of the server's externally visible state, published after
/// every event.
#[derive(Debug, Clone, PartialEq)]
pub struct RaftStatus {
    pub id: NodeId,
    pub term: Term,
    pub role: RaftRole,
    pub leader: Option<NodeId>,
    pub commit_index: LogIndex,
}

impl Default for RaftStatus {
    fn default() -> Self {
        RaftStatus {
            id: NodeId::new(),
            term: 0,
            role: RaftRole::Follower,
            leader: None,
            commit_index: 0,
        }
    }
}

/// The state machine at rest: exactly one role is active at any instant.
/// Applying a command can move it to any other role, so the sized enum is
/// what the server loop holds.
pub enum RaftHandle {
    Follower(Raft<Follower>),
    Candidate(Raft<Candidate>),
    Leader(Raft<Leader>),
}

impl RaftHandle {
    pub fn status(&self) -> RaftStatus {
        match self {
            RaftHandle::Follower(raft) => RaftStatus {
                id: raft.id.clone(),
                term: raft.state.current_term,
                role: RaftRole::Follower,
                leader: raft.role.leader_id.clone(),
                commit_index: raft.state.commit_index,
            },
            RaftHandle::Candidate(raft) => RaftStatus {
                id: raft.id.clone(),
                term: raft.state.current_term,
                role: RaftRole::Candidate,
                leader: None,
                commit_index: raft.state.commit_index,
            },
            RaftHandle::Leader(raft) => RaftStatus {
                id: raft.id.clone(),
                term: raft.state.current_term,
                role: RaftRole::Leader,
                leader: Some(raft.id.clone()),
                commit_index: raft.state.commit_index,
            },
        }
    }
}

/// Applying a message is the only way the state machine moves forward. Each
/// role decides how it responds (or does not respond) to each command.
pub trait Apply {
    /// Apply a message, producing the next state of the server. Errors are
    /// reserved for truly exceptional conditions -- a failed flush of
    /// persistent state, a torn-down channel -- and terminate the server.
    fn apply(self, msg: Message) -> Result<RaftHandle>;
}

impl Apply for RaftHandle {
    fn apply(self, msg: Message) -> Result<RaftHandle> {
        match self {
            RaftHandle::Follower(raft) => raft.apply(msg),
            RaftHandle::Candidate(raft) => raft.apply(msg),
            RaftHandle::Leader(raft) => raft.apply(msg),
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::time::Duration;

    use quorum_core::logger::get_root_logger;
    use tempfile::TempDir;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use tokio::time::timeout;

    use super::*;
    use crate::store::Store;
    use crate::timer::{RaftTimers, Timer};

    /// Channels and scratch state backing a raft under test.
    pub(crate) struct Harness {
        pub rpc_rx: UnboundedReceiver<Message>,
        pub fsm_rx: UnboundedReceiver<Instruction>,
        pub in_rx: UnboundedReceiver<Message>,
        pub self_addr: SocketAddr,
        pub peers: Vec<SocketAddr>,
        _dir: TempDir,
    }

    impl Harness {
        /// An inbound message as the transport would deliver it from the
        /// i-th peer.
        pub(crate) fn from_peer(&self, i: usize, command: Command) -> Message {
            Message {
                to: Address::Peer(self.self_addr),
                from: Address::Peer(self.peers[i]),
                command,
            }
        }

        /// Collect everything the raft has sent so far.
        pub(crate) async fn sent(&mut self) -> Vec<Message> {
            let mut out = Vec::new();
            while let Ok(Some(msg)) =
                timeout(Duration::from_millis(20), self.rpc_rx.recv()).await
            {
                out.push(msg);
            }
            out
        }
    }

    pub(crate) fn follower(peer_count: usize) -> (Raft<Follower>, Harness) {
        let dir = tempfile::tempdir().unwrap();
        let config = RaftConfig {
            var_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let self_addr: SocketAddr = "127.0.0.1:24100".parse().unwrap();
        let peers: Vec<SocketAddr> = (0..peer_count)
            .map(|i| format!("127.0.0.1:{}", 24101 + i).parse().unwrap())
            .collect();
        let nodes = peers
            .iter()
            .map(|addr| Node {
                addr: *addr,
                id: None,
            })
            .collect();

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (rpc_tx, rpc_rx) = mpsc::unbounded_channel();
        let (fsm_tx, fsm_rx) = mpsc::unbounded_channel();
        let timers = RaftTimers {
            election: Timer::one_shot(Message::local(Command::Timeout), in_tx.clone()),
            heartbeat: Timer::auto_restart(
                Duration::from_millis(50),
                Message::local(Command::Tick),
                in_tx,
            ),
        };
        let store = Store::open(dir.path(), "test-node").unwrap();
        let raft = Raft::new(
            config,
            "test-node".to_string(),
            self_addr,
            nodes,
            get_root_logger().new(o!()),
            store,
            timers,
            rpc_tx,
            fsm_tx,
        )
        .unwrap();
        let harness = Harness {
            rpc_rx,
            fsm_rx,
            in_rx,
            self_addr,
            peers,
            _dir: dir,
        };
        (raft, harness)
    }

    /// Drive a fresh follower through an election so tests can start from a
    /// candidate that has already broadcast its vote requests.
    pub(crate) async fn candidate(
        peer_count: usize,
    ) -> (Raft<Candidate>, Harness, u64) {
        let (raft, mut harness) = follower(peer_count);
        let handle = raft.apply(Message::local(Command::Timeout)).unwrap();
        let sent = harness.sent().await;
        let timestamp = sent
            .iter()
            .find_map(|m| match m.command {
                Command::VoteRequest { timestamp, .. } => Some(timestamp),
                _ => None,
            })
            .expect("candidate broadcast no vote requests");
        match handle {
            RaftHandle::Candidate(raft) => (raft, harness, timestamp),
            _ => panic!("expected candidate"),
        }
    }
}
