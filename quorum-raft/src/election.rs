use std::collections::HashMap;
use std::net::SocketAddr;

use crate::rpc;

#[derive(Debug, PartialEq)]
pub enum ElectionStatus {
    /// A strict majority of the cluster granted its vote.
    Elected,
    /// Still waiting on enough replies to decide either way.
    Voting,
    /// Enough refusals that a majority is no longer reachable.
    Defeated,
}

/// Vote bookkeeping for one candidacy, keyed by peer address. The self-vote
/// is recorded like any other.
///
/// A candidate wins when its yes-votes exceed half the full cluster size;
/// unheard peers count for nothing, so a tie is never a win.
#[derive(Debug)]
pub struct Election {
    cluster_size: usize,
    started_at: u64,
    votes: HashMap<SocketAddr, bool>,
}

impl Election {
    pub fn new(cluster_size: usize) -> Election {
        Election {
            cluster_size,
            started_at: 0,
            votes: HashMap::new(),
        }
    }

    /// Forget all votes and stamp the start of a new candidacy. Replies
    /// echoing an older stamp belong to a previous election.
    pub fn reset(&mut self) {
        self.votes.clear();
        self.started_at = rpc::now_millis();
    }

    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    pub fn vote(&mut self, peer: SocketAddr, granted: bool) {
        self.votes.insert(peer, granted);
    }

    pub fn majority(&self) -> usize {
        self.cluster_size / 2 + 1
    }

    pub fn election_status(&self) -> ElectionStatus {
        let granted = self.votes.values().filter(|g| **g).count();
        let unheard = self.cluster_size.saturating_sub(self.votes.len());
        if granted >= self.majority() {
            ElectionStatus::Elected
        } else if granted + unheard < self.majority() {
            ElectionStatus::Defeated
        } else {
            ElectionStatus::Voting
        }
    }
}
