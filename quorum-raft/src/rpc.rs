use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::raft::Command;

/// Where a message is headed, or where it came from.
///
/// Peers are identified on the wire by their advertised bind address; server
/// ids are carried inside the commands themselves and learned from traffic.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Address {
    /// This server. Timer events and self-addressed commands.
    Local,
    /// Every peer in the cluster.
    Peers,
    /// A single peer, by advertised bind address.
    Peer(SocketAddr),
}

impl Address {
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            Address::Peer(addr) => Some(*addr),
            _ => None,
        }
    }
}

/// The envelope every command travels in, on the wire and off it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    pub to: Address,
    pub from: Address,
    pub command: Command,
}

impl Message {
    /// A message that never leaves this server.
    pub fn local(command: Command) -> Message {
        Message {
            to: Address::Local,
            from: Address::Local,
            command,
        }
    }
}

/// Wall-clock milliseconds, used to stamp requests. Replies echo the stamp so
/// the originator can measure round trips and discard late replies.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::Command;

    #[test]
    fn messages_round_trip_as_json() {
        let msg = Message {
            to: Address::Peer("127.0.0.1:7581".parse().unwrap()),
            from: Address::Peer("127.0.0.1:7582".parse().unwrap()),
            command: Command::VoteRequest {
                term: 3,
                candidate_id: "127.0.0.1:7582".into(),
                last_log_index: 7,
                last_log_term: 2,
                timestamp: 12345,
            },
        };

        let encoded = serde_json::to_vec(&msg).unwrap();
        let decoded: Message = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn peer_addr_only_for_peers() {
        let addr: SocketAddr = "127.0.0.1:7581".parse().unwrap();
        assert_eq!(Address::Peer(addr).peer_addr(), Some(addr));
        assert_eq!(Address::Local.peer_addr(), None);
        assert_eq!(Address::Peers.peer_addr(), None);
    }
}
