use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, TryStreamExt};
use quorum_core::error::Result;
use slog::Logger;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_serde::formats::SymmetricalJson;
use tokio_serde::SymmetricallyFramed;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::rpc::{Address, Message};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

type MessageSink =
    SymmetricallyFramed<FramedWrite<TcpStream, LengthDelimitedCodec>, Message, SymmetricalJson<Message>>;

/// Accept connections from peers and forward every frame they send into the
/// server's inbound queue. A malformed frame costs the sender its
/// connection, nothing more; it will reconnect and retry.
pub async fn receive_task(
    logger: Logger,
    listener: TcpListener,
    in_tx: mpsc::UnboundedSender<Message>,
) -> Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        debug!(logger, "peer connected"; "addr" => format!("{}", addr));
        let logger = logger.new(o!());
        let in_tx = in_tx.clone();
        tokio::spawn(async move {
            let framed = FramedRead::new(stream, LengthDelimitedCodec::new());
            let mut messages =
                SymmetricallyFramed::new(framed, SymmetricalJson::<Message>::default());
            loop {
                match messages.try_next().await {
                    Ok(Some(msg)) => {
                        if in_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        debug!(logger, "dropping connection";
                               "addr" => format!("{}", addr),
                               "error" => format!("{}", err));
                        break;
                    }
                }
            }
        });
    }
}

/// Deliver outbound messages, dialing each peer lazily and fanning
/// `Address::Peers` out to the whole cluster. Delivery is fire-and-forget:
/// an unreachable peer costs us the message and the cached connection, and
/// the protocol's own retries cover the loss.
pub async fn send_task(
    logger: Logger,
    peers: Vec<SocketAddr>,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
) -> Result<()> {
    let mut connections: HashMap<SocketAddr, MessageSink> = HashMap::new();
    while let Some(msg) = out_rx.recv().await {
        let targets: Vec<SocketAddr> = match msg.to {
            Address::Peers => peers.clone(),
            Address::Peer(addr) => vec![addr],
            Address::Local => continue,
        };
        for addr in targets {
            let msg = Message {
                to: Address::Peer(addr),
                from: msg.from.clone(),
                command: msg.command.clone(),
            };
            if let Err(err) = send_to(&mut connections, addr, msg).await {
                debug!(logger, "dropping message to unreachable peer";
                       "addr" => format!("{}", addr),
                       "error" => format!("{}", err));
                connections.remove(&addr);
            }
        }
    }
    Ok(())
}

async fn send_to(
    connections: &mut HashMap<SocketAddr, MessageSink>,
    addr: SocketAddr,
    msg: Message,
) -> Result<()> {
    let connection = match connections.entry(addr) {
        MapEntry::Occupied(entry) => entry.into_mut(),
        MapEntry::Vacant(entry) => {
            let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
                .await
                .map_err(|_| {
                    io::Error::new(io::ErrorKind::TimedOut, "connection timed out")
                })??;
            let framed = FramedWrite::new(stream, LengthDelimitedCodec::new());
            entry.insert(SymmetricallyFramed::new(
                framed,
                SymmetricalJson::default(),
            ))
        }
    };
    connection.send(msg).await?;
    Ok(())
}
