use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use futures::FutureExt;
use quorum_core::error::Result;
use slog::Logger;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};

use crate::config::RaftConfig;
use crate::fsm::{Driver, Fsm};
use crate::raft::{Apply, Command, Node, Raft, RaftHandle, RaftStatus};
use crate::rpc::{Address, Message};
use crate::store::Store;
use crate::tcp;
use crate::timer::{RaftTimers, Timer};

/// One raft server: listener, transport tasks, timers, state machine driver
/// and the event loop that owns the role state machine.
///
/// All raft state is touched from the single `run` loop; timers and the
/// transport only enqueue messages, so handlers never race each other.
pub struct RaftServer<F: Fsm> {
    config: RaftConfig,
    logger: Logger,
    fsm: F,
    status_tx: watch::Sender<RaftStatus>,
    status_rx: watch::Receiver<RaftStatus>,
}

impl<F: Fsm + 'static> RaftServer<F> {
    pub fn new(config: RaftConfig, logger: Logger, fsm: F) -> RaftServer<F> {
        let (status_tx, status_rx) = watch::channel(RaftStatus::default());
        RaftServer {
            config,
            logger,
            fsm,
            status_tx,
            status_rx,
        }
    }

    /// Observe the server's role, term and leader as they change.
    pub fn status(&self) -> watch::Receiver<RaftStatus> {
        self.status_rx.clone()
    }

    /// Run until shutdown is signalled or something fatal happens. Binds the
    /// listener, loads persistent state, builds the peer set and then
    /// serializes every event through the role state machine.
    pub async fn run(self, shutdown: broadcast::Sender<()>) -> Result<()> {
        self.config.validate()?;
        let mut shutdown_rx = shutdown.subscribe();

        let listener =
            TcpListener::bind((self.config.bind_address.as_str(), self.config.port)).await?;
        let local = listener.local_addr()?;
        let addr = advertised_addr(local);
        let id = match &self.config.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => addr.to_string(),
        };
        let logger = self.logger.new(o!("id" => id.clone()));

        let peers: Vec<Node> = self
            .config
            .parse_peers()?
            .into_iter()
            .filter(|peer| {
                if is_self(*peer, local) {
                    debug!(logger, "eliding local address from peer list";
                           "addr" => format!("{}", peer));
                    false
                } else {
                    true
                }
            })
            .map(|addr| Node { addr, id: None })
            .collect();
        info!(logger, "starting";
              "addr" => format!("{}", addr),
              "peers" => peers.len());

        let store = Store::open(&self.config.var_dir, &id)?;

        let (in_tx, mut in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (rpc_tx, mut rpc_rx) = mpsc::unbounded_channel();
        let (fsm_tx, fsm_rx) = mpsc::unbounded_channel();

        let timers = RaftTimers {
            election: Timer::one_shot(Message::local(Command::Timeout), in_tx.clone()),
            heartbeat: Timer::auto_restart(
                self.config.heartbeat_interval(),
                Message::local(Command::Tick),
                in_tx.clone(),
            ),
        };
        let timer_ctl = timers.clone();

        let (task, mut tcp_receiver) =
            tcp::receive_task(logger.new(o!()), listener, in_tx.clone()).remote_handle();
        tokio::spawn(task);
        let peer_addrs: Vec<SocketAddr> = peers.iter().map(|p| p.addr).collect();
        let (task, mut tcp_sender) =
            tcp::send_task(logger.new(o!()), peer_addrs, out_rx).remote_handle();
        tokio::spawn(task);
        let driver = Driver::new(logger.new(o!()), fsm_rx, self.fsm);
        let (task, mut fsm_driver) = driver.run(shutdown.subscribe()).remote_handle();
        tokio::spawn(task);

        let mut raft = RaftHandle::Follower(Raft::new(
            self.config.clone(),
            id,
            addr,
            peers,
            logger.new(o!()),
            store,
            timers,
            rpc_tx,
            fsm_tx,
        )?);
        let _ = self.status_tx.send(raft.status());

        let result = loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break Ok(()),
                res = &mut tcp_receiver => break res,
                res = &mut tcp_sender => break res,
                res = &mut fsm_driver => break res,
                Some(msg) = in_rx.recv() => {
                    raft = raft.apply(msg)?;
                    let _ = self.status_tx.send(raft.status());
                }
                Some(msg) = rpc_rx.recv() => {
                    match msg.to {
                        Address::Local => in_tx.send(msg)?,
                        _ => out_tx.send(msg)?,
                    }
                }
            }
        };

        timer_ctl.election.stop();
        timer_ctl.heartbeat.stop();
        info!(logger, "stopped");
        result
    }
}

/// The address peers should know this server by. An unspecified bind
/// address has no single advertisable form, so loopback stands in.
fn advertised_addr(local: SocketAddr) -> SocketAddr {
    if local.ip().is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local.port())
    } else {
        local
    }
}

/// Whether a configured peer entry names this server's own socket: the
/// locally bound address itself, or any loopback or unspecified spelling
/// of the local port. A remote address stays a peer even when this node
/// listens on all interfaces.
fn is_self(peer: SocketAddr, local: SocketAddr) -> bool {
    peer.port() == local.port()
        && (peer.ip() == local.ip()
            || peer.ip().is_loopback()
            || peer.ip().is_unspecified())
}
