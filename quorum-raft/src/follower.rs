use std::cmp;

use quorum_core::error::Result;
use slog::Logger;

use crate::candidate::Candidate;
use crate::election::Election;
use crate::raft::{Apply, Command, NodeId, Raft, RaftHandle, RaftRole, Role};
use crate::rpc::Message;

#[derive(Debug)]
pub struct Follower {
    /// The leader this follower last heard from in the current term.
    pub leader_id: Option<NodeId>,
    pub logger: Logger,
}

impl Role for Follower {
    fn term(&mut self, _term: u64) {
        self.leader_id = None;
    }

    fn role(&self) -> RaftRole {
        RaftRole::Follower
    }

    fn log(&self) -> &Logger {
        &self.logger
    }
}

impl Apply for Raft<Follower> {
    fn apply(mut self, msg: Message) -> Result<RaftHandle> {
        self.log_command(&msg);

        // A newer term is adopted before anything else, and persisted before
        // any reply can reveal it.
        if let Some(term) = msg.command.term() {
            if term > self.state.current_term {
                self.term(term);
                self.save()?;
            }
        }

        let Message { to: _, from, command } = msg;
        match command {
            Command::Timeout => {
                info!(self.role.logger, "election timeout";
                      "term" => self.state.current_term);
                let raft: Raft<Candidate> = Raft::from(self);
                raft.seek_election()
            }
            Command::Tick => Ok(RaftHandle::Follower(self)),
            Command::VoteRequest {
                term,
                candidate_id,
                last_log_index,
                last_log_term,
                timestamp,
            } => {
                if term < self.state.current_term {
                    debug!(self.role.logger, "refusing vote for stale term";
                           "candidate" => &candidate_id, "term" => term);
                    self.send(
                        from,
                        Command::VoteResponse {
                            term: self.state.current_term,
                            from: self.id.clone(),
                            granted: false,
                            timestamp,
                        },
                    )?;
                    return Ok(RaftHandle::Follower(self));
                }
                if let Some(addr) = from.peer_addr() {
                    self.note_peer(addr, &candidate_id);
                }

                let unspent = match &self.state.voted_for {
                    None => true,
                    Some(id) => *id == candidate_id,
                };
                let granted =
                    unspent && self.log.up_to_date(last_log_index, last_log_term);
                if granted {
                    self.state.voted_for = Some(candidate_id.clone());
                    self.save()?;
                    self.reset_election_timer();
                    info!(self.role.logger, "vote granted";
                          "candidate" => &candidate_id,
                          "term" => self.state.current_term);
                } else {
                    debug!(self.role.logger, "vote refused";
                           "candidate" => &candidate_id,
                           "voted_for" => format!("{:?}", self.state.voted_for));
                }
                self.send(
                    from,
                    Command::VoteResponse {
                        term: self.state.current_term,
                        from: self.id.clone(),
                        granted,
                        timestamp,
                    },
                )?;
                Ok(RaftHandle::Follower(self))
            }
            Command::AppendEntries {
                term,
                leader_id,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
                timestamp,
            } => {
                if term < self.state.current_term {
                    debug!(self.role.logger, "rejecting entries from stale leader";
                           "leader" => &leader_id, "term" => term);
                    self.send(
                        from,
                        Command::AppendResponse {
                            term: self.state.current_term,
                            from: self.id.clone(),
                            success: false,
                            match_index: 0,
                            timestamp,
                        },
                    )?;
                    return Ok(RaftHandle::Follower(self));
                }

                // A current leader is speaking; its authority suppresses our
                // own election.
                self.role.leader_id = Some(leader_id.clone());
                if let Some(addr) = from.peer_addr() {
                    self.note_peer(addr, &leader_id);
                }
                self.reset_election_timer();

                if !self.log.matches(prev_log_index, prev_log_term) {
                    debug!(self.role.logger, "log inconsistent with leader";
                           "prev_log_index" => prev_log_index,
                           "prev_log_term" => prev_log_term,
                           "last_index" => self.log.last_index());
                    self.send(
                        from,
                        Command::AppendResponse {
                            term: self.state.current_term,
                            from: self.id.clone(),
                            success: false,
                            match_index: 0,
                            timestamp,
                        },
                    )?;
                    return Ok(RaftHandle::Follower(self));
                }

                let last_new = self.log.splice(prev_log_index, entries);
                if leader_commit > self.state.commit_index {
                    self.state.commit_index = cmp::min(leader_commit, last_new);
                    self.apply_committed()?;
                }
                self.save()?;
                self.send(
                    from,
                    Command::AppendResponse {
                        term: self.state.current_term,
                        from: self.id.clone(),
                        success: true,
                        match_index: last_new,
                        timestamp,
                    },
                )?;
                Ok(RaftHandle::Follower(self))
            }
            Command::VoteResponse { from: voter, .. } => {
                debug!(self.role.logger, "dropping vote response while follower";
                       "from" => &voter);
                Ok(RaftHandle::Follower(self))
            }
            Command::AppendResponse { from: sender, .. } => {
                debug!(self.role.logger, "dropping append response while follower";
                       "from" => &sender);
                Ok(RaftHandle::Follower(self))
            }
        }
    }
}

impl From<Raft<Follower>> for Raft<Candidate> {
    fn from(val: Raft<Follower>) -> Raft<Candidate> {
        let election = Election::new(val.peers.len() + 1);
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
            role: Candidate {
                election,
                logger: logger.new(o!("role" => "candidate")),
            },
        }
    }
}
