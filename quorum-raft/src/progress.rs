use std::cmp;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::raft::{LogIndex, Node, NodeId};

/// Per-peer replication state, reinitialized when a leader takes office.
#[derive(Debug)]
pub struct NodeProgress {
    /// Server id, learned from the peer's replies.
    pub id: Option<NodeId>,
    /// Next log index to send this peer.
    pub next_index: LogIndex,
    /// Highest log index known replicated on this peer.
    pub match_index: LogIndex,
    /// When this peer should next receive an AppendEntries.
    pub rpc_due: Instant,
}

/// The leader's view of how far each peer has gotten.
#[derive(Debug)]
pub struct ReplicationProgress {
    nodes: HashMap<SocketAddr, NodeProgress>,
}

impl ReplicationProgress {
    pub fn new(peers: &[Node], last_log_index: LogIndex) -> ReplicationProgress {
        let now = Instant::now();
        let nodes = peers
            .iter()
            .map(|peer| {
                (
                    peer.addr,
                    NodeProgress {
                        id: peer.id.clone(),
                        next_index: last_log_index + 1,
                        match_index: 0,
                        rpc_due: now,
                    },
                )
            })
            .collect();
        ReplicationProgress { nodes }
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&NodeProgress> {
        self.nodes.get(addr)
    }

    /// Peers whose next AppendEntries is due.
    pub fn due(&self, now: Instant) -> Vec<SocketAddr> {
        self.nodes
            .iter()
            .filter(|(_, p)| p.rpc_due <= now)
            .map(|(addr, _)| *addr)
            .collect()
    }

    pub fn sent(&mut self, addr: SocketAddr, interval: Duration, now: Instant) {
        if let Some(progress) = self.nodes.get_mut(&addr) {
            progress.rpc_due = now + interval;
        }
    }

    pub fn record_success(&mut self, addr: SocketAddr, match_index: LogIndex) {
        if let Some(progress) = self.nodes.get_mut(&addr) {
            progress.match_index = cmp::max(progress.match_index, match_index);
            progress.next_index = progress.match_index + 1;
        }
    }

    /// The consistency check failed; back the cursor off one entry and try
    /// again without waiting for the next period.
    pub fn record_failure(&mut self, addr: SocketAddr) {
        if let Some(progress) = self.nodes.get_mut(&addr) {
            progress.next_index = cmp::max(1, progress.next_index.saturating_sub(1));
            progress.rpc_due = Instant::now();
        }
    }

    pub fn note_id(&mut self, addr: SocketAddr, id: &str) {
        if let Some(progress) = self.nodes.get_mut(&addr) {
            if progress.id.as_deref() != Some(id) {
                progress.id = Some(id.to_string());
            }
        }
    }

    /// The highest index replicated on a strict majority of the cluster,
    /// counting the leader's own log.
    pub fn majority_match(&self, last_log_index: LogIndex) -> LogIndex {
        let mut matches: Vec<LogIndex> =
            self.nodes.values().map(|p| p.match_index).collect();
        matches.push(last_log_index);
        matches.sort_unstable_by(|a, b| b.cmp(a));
        matches[matches.len() / 2]
    }
}
