use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use containers::{NodeId, PeerId};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::time::timeout;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use super::codec::{encode_frame, read_frame};
use super::config::{CONNECTION_WRITE_QUEUE, DIAL_TIMEOUT_SECS, HANDSHAKE_TIMEOUT_SECS};
use super::handle::{Network, P2pHandle, Shared};
use super::handshake::{Handshake, ReqHandshake, ResActiveNodes, ResHandshake, action};
use super::message::{Ctrl, Handler, Msg, MsgIn, WireMessage};
use super::node_table::{Node, TempNode};
use crate::types::Direction;

/// Everything a connection task needs, fixed once the service is running.
pub(crate) struct Context {
    pub shared: Arc<Shared>,
    pub handshake: Arc<Handshake>,
    pub handlers: Arc<HashMap<u32, Vec<Arc<dyn Handler>>>>,
    pub recv_tx: mpsc::Sender<MsgIn>,
}

/// Open an outbound connection and run the dialer side of the handshake.
pub(crate) async fn dial(ctx: Arc<Context>, temp: TempNode) {
    if let Err(rejection) = ctx.shared.nodes.lock().validate_node(&temp.node_id, &temp.addr) {
        trace!(%rejection, "skipping dial");
        return;
    }

    let started = Instant::now();
    let stream = match timeout(Duration::from_secs(DIAL_TIMEOUT_SECS), TcpStream::connect(temp.addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            debug!(%err, "connect failed");
            return;
        }
        Err(_) => {
            debug!("connect timed out");
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();

    if let Err(err) = writer.write_all(ctx.handshake.request_frame()).await {
        debug!(%err, "failed to send handshake");
        return;
    }

    let response = match timeout(Duration::from_secs(HANDSHAKE_TIMEOUT_SECS), read_frame(&mut reader)).await {
        Ok(Ok(msg)) if msg.header == ResHandshake::HEADER => msg,
        Ok(Ok(msg)) => {
            debug!(msg = %msg.header, "expected handshake response");
            return;
        }
        Ok(Err(err)) => {
            debug!(%err, "failed to read handshake response");
            return;
        }
        Err(_) => {
            debug!("handshake timed out");
            return;
        }
    };

    let response = match ResHandshake::from_body(&response.body) {
        Ok(response) => response,
        Err(err) => {
            debug!(%err, "undecodable handshake response");
            return;
        }
    };
    if !response.success {
        debug!("handshake rejected by peer");
        return;
    }

    let latency = u32::try_from(started.elapsed().as_millis()).unwrap_or(u32::MAX);
    let link = Link {
        node_id: temp.node_id,
        addr: temp.addr,
        listen_port: temp.addr.port(),
        direction: Direction::Outbound,
        revision: response.revision,
        latency,
    };
    activate(&ctx, reader, writer, link);
}

/// Run the acceptor side of the handshake on a freshly accepted socket.
pub(crate) async fn accept(ctx: Arc<Context>, stream: TcpStream, addr: SocketAddr) {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();

    let request = match timeout(Duration::from_secs(HANDSHAKE_TIMEOUT_SECS), read_frame(&mut reader)).await {
        Ok(Ok(msg)) if msg.header == ReqHandshake::HEADER => msg,
        Ok(Ok(msg)) => {
            debug!(msg = %msg.header, "expected handshake request");
            return;
        }
        Ok(Err(err)) => {
            debug!(%err, "failed to read handshake request");
            return;
        }
        Err(_) => {
            debug!("handshake timed out");
            return;
        }
    };
    let request = match ReqHandshake::from_body(&request.body) {
        Ok(request) => request,
        Err(err) => {
            debug!(%err, "undecodable handshake request");
            return;
        }
    };

    let listen = SocketAddr::new(addr.ip(), request.port);
    let verdict = if request.chain_id != ctx.handshake.chain_id {
        Err(format!("chain id {} does not match", request.chain_id))
    } else {
        ctx.shared
            .nodes
            .lock()
            .validate_node(&request.node_id, &listen)
            .map_err(|rejection| rejection.to_string())
    };

    if let Err(err) = writer.write_all(ctx.handshake.response_frame(verdict.is_ok())).await {
        debug!(%err, "failed to answer handshake");
        return;
    }
    if let Err(reason) = verdict {
        debug!(node = %request.node_id.display_id(), reason, "rejected inbound handshake");
        return;
    }

    let link = Link {
        node_id: request.node_id,
        addr,
        listen_port: request.port,
        direction: Direction::Inbound,
        revision: request.revision,
        latency: 0,
    };
    activate(&ctx, reader, writer, link);
}

struct Link {
    node_id: NodeId,
    addr: SocketAddr,
    listen_port: u16,
    direction: Direction,
    revision: String,
    latency: u32,
}

/// Register a handshaken connection and start its reader and writer tasks.
fn activate(ctx: &Arc<Context>, reader: OwnedReadHalf, writer: OwnedWriteHalf, link: Link) {
    let (frame_tx, frame_rx) = mpsc::channel(CONNECTION_WRITE_QUEUE);
    let mut node = Node::new(link.node_id, link.addr, link.listen_port, link.direction, link.revision, frame_tx);
    node.latency = link.latency;
    let display_id = node.display_id.clone();
    let span = info_span!("p2p-conn", peer = %display_id);

    let active = {
        let mut nodes = ctx.shared.nodes.lock();
        let peer_id = match nodes.add_active(node) {
            Ok(peer_id) => peer_id,
            Err(rejection) => {
                debug!(peer = %display_id, %rejection, "not activating peer");
                return;
            }
        };
        tokio::spawn(write_loop(writer, frame_rx).instrument(span.clone()));
        let reader_task = tokio::spawn(read_loop(Arc::clone(ctx), reader, peer_id, display_id.clone()).instrument(span));
        if let Some(node) = nodes.get_active_mut(&peer_id) {
            node.set_reader(reader_task.abort_handle());
        }
        nodes.active_count()
    };

    info!(peer = %display_id, addr = %link.addr, direction = %link.direction, active, "peer connected");
    if let Some(metrics) = &ctx.shared.metrics {
        metrics.set_peers(active as i64);
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut frames: mpsc::Receiver<Vec<u8>>) {
    while let Some(frame) = frames.recv().await {
        if let Err(err) = writer.write_all(&frame).await {
            debug!(%err, "write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(ctx: Arc<Context>, mut reader: OwnedReadHalf, peer_id: PeerId, display_id: String) {
    let offer_timeout = Duration::from_millis(ctx.shared.config.offer_timeout_ms);
    loop {
        let msg = match read_frame(&mut reader).await {
            Ok(msg) => msg,
            Err(err) if err.is_eof() => {
                debug!("peer closed connection");
                break;
            }
            Err(err) => {
                debug!(%err, "read failed");
                break;
            }
        };
        ctx.shared.nodes.lock().touch(&peer_id, Instant::now());

        if msg.header.ctrl == Ctrl::NET {
            if !handle_net(&ctx, peer_id, &display_id, msg) {
                break;
            }
            continue;
        }

        let route = msg.header.route();
        if !ctx.handlers.contains_key(&route) {
            trace!(msg = %msg.header, "no handler for message");
            continue;
        }

        let incoming = MsgIn { peer_id, display_id: display_id.clone(), route, body: msg.body };
        match ctx.recv_tx.send_timeout(incoming, offer_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(dropped)) => {
                warn!(route = dropped.route, "receive queue full, dropping message");
                ctx.shared.inc_dropped("receive");
            }
            Err(SendTimeoutError::Closed(_)) => break,
        }
    }
    ctx.shared.drop_active(&peer_id, "connection closed");
}

/// Handle a connection-management message. Returns false to close the connection.
fn handle_net(ctx: &Arc<Context>, peer_id: PeerId, display_id: &str, msg: Msg) -> bool {
    match msg.header.action {
        action::REQ_ACTIVE_NODES => {
            let nodes = ctx.shared.nodes.lock();
            let response = ResActiveNodes { nodes: nodes.shareable_nodes(&peer_id) };
            match response.to_msg().and_then(|msg| encode_frame(&msg)) {
                Ok(frame) => {
                    if let Some(node) = nodes.get_active(&peer_id) {
                        if !node.enqueue(frame) {
                            debug!("connection write queue full, dropping active nodes response");
                        }
                    }
                }
                Err(err) => warn!(%err, "failed to encode active nodes"),
            }
        }
        action::RES_ACTIVE_NODES => match ResActiveNodes::from_body(&msg.body) {
            Ok(response) if !ctx.shared.config.seeds_only => {
                let mut nodes = ctx.shared.nodes.lock();
                let added = response
                    .nodes
                    .into_iter()
                    .filter(|node| {
                        nodes.add_temp(TempNode { node_id: node.node_id, addr: node.addr, seed: false })
                    })
                    .count();
                trace!(added, "discovered nodes");
            }
            Ok(_) => {}
            Err(err) => {
                debug!(%err, "undecodable active nodes response");
                P2pHandle::new(Arc::clone(&ctx.shared)).err_check(peer_id, display_id);
            }
        },
        action::DISCONNECT => {
            debug!("peer requested disconnect");
            return false;
        }
        action::REQ_HANDSHAKE | action::RES_HANDSHAKE => {
            trace!("ignoring handshake on an established connection");
        }
        other => trace!(action = other, "unknown net message"),
    }
    true
}
