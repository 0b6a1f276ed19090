use std::time::Instant;

use quorum_core::error::Result;
use slog::Logger;

use crate::follower::Follower;
use crate::progress::ReplicationProgress;
use crate::raft::{Apply, Command, Raft, RaftHandle, RaftRole, Role};
use crate::rpc::{self, Address, Message};

#[derive(Debug)]
pub struct Leader {
    pub progress: ReplicationProgress,
    pub logger: Logger,
}

impl Role for Leader {
    fn term(&mut self, _term: u64) {}

    fn role(&self) -> RaftRole {
        RaftRole::Leader
    }

    fn log(&self) -> &Logger {
        &self.logger
    }
}

impl Raft<Leader> {
    /// Assert leadership to every peer right away, ahead of the first tick.
    pub(crate) fn heartbeat(&mut self) -> Result<()> {
        self.replicate(Instant::now())
    }

    /// Send AppendEntries to every peer whose RPC is due: the entries it is
    /// missing, or nothing at all if it is caught up.
    fn replicate(&mut self, now: Instant) -> Result<()> {
        let interval = self.config.heartbeat_interval();
        let timestamp = rpc::now_millis();
        for addr in self.role.progress.due(now) {
            let next_index = self.role.progress.get(&addr).map_or(1, |p| p.next_index);
            let prev_log_index = next_index - 1;
            let prev_log_term = self.log.term_at(prev_log_index).unwrap_or(0);
            self.send(
                Address::Peer(addr),
                Command::AppendEntries {
                    term: self.state.current_term,
                    leader_id: self.id.clone(),
                    prev_log_index,
                    prev_log_term,
                    entries: self.log.entries_from(next_index),
                    leader_commit: self.state.commit_index,
                    timestamp,
                },
            )?;
            self.role.progress.sent(addr, interval, now);
        }
        Ok(())
    }

    /// Raise the commit index to the highest entry of the current term that
    /// a majority holds. Entries from earlier terms are never counted
    /// directly; they commit along with the first current-term entry.
    fn advance_commit(&mut self) -> Result<()> {
        let majority = self.role.progress.majority_match(self.log.last_index());
        if majority > self.state.commit_index
            && self.log.term_at(majority) == Some(self.state.current_term)
        {
            debug!(self.role.logger, "advancing commit index";
                   "from" => self.state.commit_index, "to" => majority);
            self.state.commit_index = majority;
            self.apply_committed()?;
        }
        Ok(())
    }
}

impl Apply for Raft<Leader> {
    fn apply(mut self, msg: Message) -> Result<RaftHandle> {
        self.log_command(&msg);

        // Leadership ends the moment anyone shows us a newer term.
        if let Some(term) = msg.command.term() {
            if term > self.state.current_term {
                info!(self.role.logger, "newer term observed, stepping down";
                      "term" => term);
                self.term(term);
                self.save()?;
                let follower: Raft<Follower> = Raft::from(self);
                return follower.apply(msg);
            }
        }

        let Message { to: _, from, command } = msg;
        match command {
            Command::Tick => {
                self.replicate(Instant::now())?;
                Ok(RaftHandle::Leader(self))
            }
            // The election timer is stopped while leading; a late firing
            // means nothing.
            Command::Timeout => Ok(RaftHandle::Leader(self)),
            Command::AppendResponse {
                term,
                from: sender,
                success,
                match_index,
                timestamp,
            } => {
                if term < self.state.current_term {
                    debug!(self.role.logger, "dropping response from an old term";
                           "from" => &sender, "term" => term);
                    return Ok(RaftHandle::Leader(self));
                }
                let addr = match from.peer_addr() {
                    Some(addr) if self.is_known_peer(addr) => addr,
                    _ => return Ok(RaftHandle::Leader(self)),
                };
                self.note_peer(addr, &sender);
                self.role.progress.note_id(addr, &sender);
                debug!(self.role.logger, "append response";
                       "from" => &sender,
                       "success" => success,
                       "match_index" => match_index,
                       "rtt_ms" => rpc::now_millis().saturating_sub(timestamp));

                if success {
                    self.role.progress.record_success(addr, match_index);
                    self.advance_commit()?;
                } else {
                    self.role.progress.record_failure(addr);
                }
                Ok(RaftHandle::Leader(self))
            }
            Command::VoteRequest {
                candidate_id,
                timestamp,
                ..
            } => {
                // Our term is at least the candidate's; we are the leader.
                debug!(self.role.logger, "refusing vote while leading";
                       "candidate" => &candidate_id);
                self.send(
                    from,
                    Command::VoteResponse {
                        term: self.state.current_term,
                        from: self.id.clone(),
                        granted: false,
                        timestamp,
                    },
                )?;
                Ok(RaftHandle::Leader(self))
            }
            Command::AppendEntries { leader_id, term, .. } => {
                // Election safety says a second leader for our term cannot
                // exist; whatever sent this is stale or broken.
                warn!(self.role.logger, "ignoring append entries while leading";
                      "from" => &leader_id, "term" => term);
                Ok(RaftHandle::Leader(self))
            }
            Command::VoteResponse { from: voter, .. } => {
                debug!(self.role.logger, "dropping late vote response";
                       "from" => &voter);
                Ok(RaftHandle::Leader(self))
            }
        }
    }
}

impl From<Raft<Leader>> for Raft<Follower> {
    fn from(val: Raft<Leader>) -> Raft<Follower> {
        val.reset_election_timer();
        let logger = val.logger;
        Raft {
            id: val.id,
            addr: val.addr,
            logger: logger.clone(),
            config: val.config,
            peers: val.peers,
            state: val.state,
            log: val.log,
            store: val.store,
            timers: val.timers,
            rpc_tx: val.rpc_tx,
            fsm_tx: val.fsm_tx,
            role: Follower {
                leader_id: None,
                logger: logger.new(o!("role" => "follower")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::Instruction;
    use crate::raft::testutil::{self, Harness};
    use std::time::Duration;
    use tokio::time::timeout;

    /// Elect a leader over `peer_count` remote peers, granting it exactly
    /// enough peer votes for a majority.
    async fn leader(peer_count: usize) -> (Raft<Leader>, Harness) {
        let (raft, mut harness, timestamp) = testutil::candidate(peer_count).await;
        let needed = (peer_count + 1) / 2;
        let mut handle = RaftHandle::Candidate(raft);
        for i in 0..needed {
            handle = handle
                .apply(harness.from_peer(
                    i,
                    Command::VoteResponse {
                        term: 1,
                        from: format!("peer-{}", i),
                        granted: true,
                        timestamp,
                    },
                ))
                .unwrap();
        }
        // Drain the vote requests and initial heartbeats.
        harness.sent().await;
        match handle {
            RaftHandle::Leader(raft) => (raft, harness),
            _ => panic!("expected leader"),
        }
    }

    fn append_response(term: u64, from: &str, success: bool, match_index: u64) -> Command {
        Command::AppendResponse {
            term,
            from: from.to_string(),
            success,
            match_index,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn ticks_send_heartbeats_to_due_peers() {
        let (raft, mut harness) = leader(2).await;
        // Nothing is due immediately after the election heartbeat...
        let handle = raft.apply(Message::local(Command::Tick)).unwrap();
        assert!(harness.sent().await.is_empty());

        // ...but once the heartbeat interval passes, every peer is.
        tokio::time::sleep(Duration::from_millis(60)).await;
        let handle = handle.apply(Message::local(Command::Tick)).unwrap();
        drop(handle);
        let beats = harness.sent().await;
        assert_eq!(beats.len(), 2);
        for msg in beats {
            match msg.command {
                Command::AppendEntries { term, entries, .. } => {
                    assert_eq!(term, 1);
                    assert!(entries.is_empty());
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn replicates_missing_entries() {
        let (mut raft, mut harness) = leader(2).await;
        raft.log.append(1, b"a".to_vec());
        raft.log.append(1, b"b".to_vec());
        raft.save().unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let handle = raft.apply(Message::local(Command::Tick)).unwrap();
        drop(handle);

        let sent = harness.sent().await;
        match &sent[0].command {
            Command::AppendEntries {
                prev_log_index,
                prev_log_term,
                entries,
                ..
            } => {
                // next_index was initialized past an empty log.
                assert_eq!(*prev_log_index, 0);
                assert_eq!(*prev_log_term, 0);
                assert_eq!(entries.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn commits_once_a_majority_acknowledges() {
        let (mut raft, mut harness) = leader(2).await;
        raft.log.append(1, b"a".to_vec());
        raft.save().unwrap();

        let handle = raft
            .apply(harness.from_peer(0, append_response(1, "peer-0", true, 1)))
            .unwrap();
        assert_eq!(handle.status().commit_index, 1);

        let instruction = timeout(Duration::from_millis(100), harness.fsm_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let Instruction::Apply { entry } = instruction;
        assert_eq!(entry.index, 1);
    }

    #[tokio::test]
    async fn minority_acknowledgement_does_not_commit() {
        let (mut raft, harness) = leader(3).await;
        raft.log.append(1, b"a".to_vec());
        raft.save().unwrap();

        // One of three remote peers: two of four servers is not a majority.
        let handle = raft
            .apply(harness.from_peer(0, append_response(1, "peer-0", true, 1)))
            .unwrap();
        assert_eq!(handle.status().commit_index, 0);
    }

    #[tokio::test]
    async fn prior_term_entries_commit_only_transitively() {
        // The leader holds an entry from term 1 but leads in term 2 (one
        // failed election in between). Majority replication of the old
        // entry alone must not commit it.
        let (raft, harness, _) = testutil::candidate(2).await;
        let handle = raft.apply(Message::local(Command::Timeout)).unwrap();
        let mut raft = match handle {
            RaftHandle::Candidate(mut raft) => {
                raft.log.append(1, b"old".to_vec());
                raft.save().unwrap();
                raft
            }
            _ => panic!("expected candidate"),
        };
        let timestamp = raft.role.election.started_at();
        let handle = raft
            .apply(harness.from_peer(
                0,
                Command::VoteResponse {
                    term: 2,
                    from: "peer-0".to_string(),
                    granted: true,
                    timestamp,
                },
            ))
            .unwrap();
        let mut raft = match handle {
            RaftHandle::Leader(raft) => raft,
            _ => panic!("expected leader"),
        };
        assert_eq!(raft.state.current_term, 2);

        let handle = raft
            .apply(harness.from_peer(0, append_response(2, "peer-0", true, 1)))
            .unwrap();
        assert_eq!(handle.status().commit_index, 0);

        // A current-term entry replicated to the majority commits both.
        let mut raft = match handle {
            RaftHandle::Leader(raft) => raft,
            _ => panic!("expected leader"),
        };
        raft.log.append(2, b"new".to_vec());
        raft.save().unwrap();
        let handle = raft
            .apply(harness.from_peer(0, append_response(2, "peer-0", true, 2)))
            .unwrap();
        assert_eq!(handle.status().commit_index, 2);
    }

    #[tokio::test]
    async fn backs_off_after_a_failed_consistency_check() {
        let (mut raft, _harness) = leader(2).await;
        raft.log.append(1, b"a".to_vec());
        raft.log.append(1, b"b".to_vec());
        let peer = raft.peers[0].addr;
        raft.role.progress.record_success(peer, 2);

        let handle = raft
            .apply(Message {
                to: Address::Local,
                from: Address::Peer(peer),
                command: append_response(1, "peer-0", false, 0),
            })
            .unwrap();
        match handle {
            RaftHandle::Leader(raft) => {
                assert_eq!(raft.role.progress.get(&peer).unwrap().next_index, 2);
            }
            _ => panic!("expected leader"),
        }
    }

    #[tokio::test]
    async fn steps_down_on_higher_term_response() {
        let (raft, harness) = leader(2).await;
        let handle = raft
            .apply(harness.from_peer(0, append_response(7, "peer-0", false, 0)))
            .unwrap();
        assert_eq!(handle.status().role, crate::raft::RaftRole::Follower);
        assert_eq!(handle.status().term, 7);
    }

    #[tokio::test]
    async fn refuses_votes_while_leading() {
        let (raft, mut harness) = leader(2).await;
        let handle = raft
            .apply(harness.from_peer(
                1,
                Command::VoteRequest {
                    term: 1,
                    candidate_id: "peer-1".to_string(),
                    last_log_index: 0,
                    last_log_term: 0,
                    timestamp: 3,
                },
            ))
            .unwrap();
        assert_eq!(handle.status().role, crate::raft::RaftRole::Leader);
        let refused = harness.sent().await.into_iter().any(|m| {
            matches!(
                m.command,
                Command::VoteResponse { granted: false, .. }
            )
        });
        assert!(refused);
    }

    #[tokio::test]
    async fn ignores_responses_from_old_terms() {
        let (raft, harness) = leader(2).await;
        let handle = raft
            .apply(harness.from_peer(0, append_response(0, "peer-0", true, 5)))
            .unwrap();
        match handle {
            RaftHandle::Leader(raft) => {
                let peer = raft.peers[0].addr;
                assert_eq!(raft.role.progress.get(&peer).unwrap().match_index, 0);
            }
            _ => panic!("expected leader"),
        }
    }
}
