use quorum_core::error::Result;
use slog::Logger;

use crate::election::{Election, ElectionStatus};
use crate::follower::Follower;
use crate::leader::Leader;
use crate::progress::ReplicationProgress;
use crate::raft::{Apply, Command, Raft, RaftHandle, RaftRole, Role};
use crate::rpc::{self, Address, Message};

#[derive(Debug)]
pub struct Candidate {
    pub election: Election,
    pub logger: Logger,
}

impl Raft<Candidate> {
    /// Start (or restart) a candidacy: bump the term, vote for ourselves,
    /// and ask everyone else. The self-vote travels the same path as every
    /// other vote, so a single-server cluster elects itself immediately.
    pub(crate) fn seek_election(mut self) -> Result<RaftHandle> {
        self.state.current_term += 1;
        self.state.voted_for = Some(self.id.clone());
        self.save()?;
        info!(self.role.logger, "seeking election";
              "term" => self.state.current_term);

        self.role.election.reset();
        self.reset_election_timer();
        let timestamp = self.role.election.started_at();
        self.send_all(Command::VoteRequest {
            term: self.state.current_term,
            candidate_id: self.id.clone(),
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
            timestamp,
        })?;

        let addr = self.addr;
        let term = self.state.current_term;
        let id = self.id.clone();
        self.apply(Message {
            to: Address::Local,
            from: Address::Peer(addr),
            command: Command::VoteResponse {
                term,
                from: id,
                granted: true,
                timestamp,
            },
        })
    }
}

impl Role for Candidate {
    fn term(&mut self, _term: u64) {
        self.election.reset();
    }

    fn role(&self) -> RaftRole {
        RaftRole::Candidate
    }

    fn log(&self) -> &Logger {
        &self.logger
    }
}

impl Apply for Raft<Candidate> {
    fn apply(mut self, msg: Message) -> Result<RaftHandle> {
        self.log_command(&msg);

        // Any message with a newer term ends the candidacy; the follower
        // then processes the message under the adopted term.
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

        let Message { to, from, command } = msg;

        // A leader for our own term has emerged; recognize it and process
        // its request as a follower.
        if let Command::AppendEntries { term, .. } = &command {
            if *term == self.state.current_term {
                info!(self.role.logger, "leader elected for this term";
                      "term" => term);
                let follower: Raft<Follower> = Raft::from(self);
                return follower.apply(Message { to, from, command });
            }
        }

        match command {
            Command::Tick => Ok(RaftHandle::Candidate(self)),
            Command::Timeout => {
                info!(self.role.logger, "election timed out, starting over");
                self.seek_election()
            }
            Command::VoteRequest {
                candidate_id,
                timestamp,
                ..
            } => {
                // We already voted for ourselves this term.
                debug!(self.role.logger, "refusing competing candidate";
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
                Ok(RaftHandle::Candidate(self))
            }
            Command::VoteResponse {
                term,
                from: voter,
                granted,
                timestamp,
            } => {
                if term < self.state.current_term
                    || timestamp < self.role.election.started_at()
                {
                    debug!(self.role.logger, "ignoring vote from a previous election";
                           "from" => &voter);
                    return Ok(RaftHandle::Candidate(self));
                }
                let addr = match from.peer_addr() {
                    Some(addr) if self.is_known_peer(addr) => addr,
                    Some(addr) => {
                        warn!(self.role.logger, "vote from unknown peer";
                              "addr" => format!("{}", addr));
                        return Ok(RaftHandle::Candidate(self));
                    }
                    None => return Ok(RaftHandle::Candidate(self)),
                };
                self.note_peer(addr, &voter);
                info!(self.role.logger, "received vote";
                      "from" => &voter,
                      "granted" => granted,
                      "rtt_ms" => rpc::now_millis().saturating_sub(timestamp));

                self.role.election.vote(addr, granted);
                match self.role.election.election_status() {
                    ElectionStatus::Elected => {
                        let mut raft: Raft<Leader> = Raft::from(self);
                        raft.heartbeat()?;
                        Ok(RaftHandle::Leader(raft))
                    }
                    ElectionStatus::Voting => Ok(RaftHandle::Candidate(self)),
                    ElectionStatus::Defeated => {
                        info!(self.role.logger, "defeated in election";
                              "term" => self.state.current_term);
                        Ok(RaftHandle::Follower(Raft::from(self)))
                    }
                }
            }
            Command::AppendEntries { timestamp, .. } => {
                // Stale leader; tell it the current term so it steps down.
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
                Ok(RaftHandle::Candidate(self))
            }
            Command::AppendResponse { from: sender, .. } => {
                debug!(self.role.logger, "dropping append response while candidate";
                       "from" => &sender);
                Ok(RaftHandle::Candidate(self))
            }
        }
    }
}

impl From<Raft<Candidate>> for Raft<Follower> {
    fn from(val: Raft<Candidate>) -> Raft<Follower> {
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

impl From<Raft<Candidate>> for Raft<Leader> {
    fn from(val: Raft<Candidate>) -> Raft<Leader> {
        info!(val.role.logger, "becoming leader";
              "term" => val.state.current_term);
        val.timers.election.stop();
        let progress = ReplicationProgress::new(&val.peers, val.log.last_index());
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
            role: Leader {
                progress,
                logger: logger.new(o!("role" => "leader")),
            },
        }
    }
}
