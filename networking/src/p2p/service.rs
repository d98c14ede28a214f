use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use metrics::Metrics;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{Instrument, Level, debug, enabled, error, info, info_span, trace, warn};

use super::codec::encode_frame;
use super::config::{
    CONNECT_INTERVAL_SECS, DISCOVERY_DELAY_SECS, DISCOVERY_INTERVAL_SECS, MAX_DIALS_PER_TICK, P2pConfig,
    STALE_SWEEP_INTERVAL_SECS, STALE_TIMEOUT_SECS, STATUS_INTERVAL_SECS,
};
use super::connection::{self, Context};
use super::handle::{P2pHandle, Shared, notify_disconnect};
use super::handshake::{Handshake, ReqActiveNodes};
use super::message::{Ctrl, Dest, Handler, MsgIn, MsgOut, Ver, WireMessage};
use crate::error::WireError;
use crate::types::Direction;

type Handlers = HashMap<u32, Vec<Arc<dyn Handler>>>;

/// TCP transport: accepts and dials peers, moves frames between sockets and
/// registered handlers, and keeps the node table fresh.
pub struct P2pService {
    shared: Arc<Shared>,
    send_rx: Option<mpsc::Receiver<MsgOut>>,
    handlers: Handlers,
    versions: BTreeSet<u16>,
    handshake: Option<Arc<Handshake>>,
    local_addr: Option<SocketAddr>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl P2pService {
    pub fn new(config: P2pConfig, metrics: Option<Arc<Metrics>>) -> Result<Self> {
        let local_id = config.node_id()?;
        let boot_nodes = config.boot_nodes();
        let (send_tx, send_rx) = mpsc::channel(config.send_queue_capacity.max(1));
        let shared = Arc::new(Shared::new(config, local_id, send_tx, metrics));
        shared.nodes.lock().add_boot_nodes(&boot_nodes);

        info!(node = %local_id, boot_nodes = boot_nodes.len(), "p2p service created");

        Ok(Self {
            shared,
            send_rx: Some(send_rx),
            handlers: HashMap::new(),
            versions: BTreeSet::new(),
            handshake: None,
            local_addr: None,
            tasks: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn handle(&self) -> P2pHandle {
        P2pHandle::new(Arc::clone(&self.shared))
    }

    /// Address the listener is bound to, once running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn handshake(&self) -> Option<Arc<Handshake>> {
        self.handshake.clone()
    }

    /// Attach handlers to their routes and rebuild the cached handshake.
    ///
    /// Handlers for unknown versions or message families are skipped.
    pub fn register(&mut self, handlers: Vec<Arc<dyn Handler>>) -> Result<(), WireError> {
        for handler in handlers {
            let header = handler.header();
            if !Ver::is_known(header.ver) || !Ctrl::is_known(header.ctrl) {
                debug!(msg = %header, "ignoring handler for unknown route");
                continue;
            }
            self.versions.insert(header.ver);
            self.handlers.entry(header.route()).or_default().push(handler);
        }

        if enabled!(Level::DEBUG) {
            let mut routes: Vec<_> = self.handlers.keys().copied().collect();
            routes.sort_unstable();
            for route in routes {
                debug!(route = %format!("{route:#08x}"), "handler registered");
            }
        }

        let versions = self.versions.iter().copied().collect();
        self.handshake = Some(Arc::new(Handshake::build(self.shared.local_id, &self.shared.config, versions)?));
        Ok(())
    }

    /// Bind the listener and start every transport task.
    ///
    /// A bind failure is logged and leaves the node dial-only.
    pub async fn run(&mut self) -> Result<()> {
        let send_rx = self.send_rx.take().ok_or_else(|| anyhow!("p2p service already started"))?;
        self.shared.running.store(true, Ordering::Release);
        let config = self.shared.config.clone();

        let listener = match TcpListener::bind(config.listen_socket()).await {
            Ok(listener) => Some(listener),
            Err(err) => {
                error!(%err, addr = %config.listen_socket(), "failed to bind listener, inbound connections disabled");
                None
            }
        };
        self.local_addr = listener.as_ref().and_then(|listener| listener.local_addr().ok());

        let handshake = match (self.local_addr, &self.handshake) {
            // An ephemeral port is only known after binding.
            (Some(addr), _) if addr.port() != config.port => {
                self.shared.nodes.lock().set_local_addr(addr);
                let announced = P2pConfig { port: addr.port(), ..config.clone() };
                let versions = self.versions.iter().copied().collect();
                Arc::new(Handshake::build(self.shared.local_id, &announced, versions)?)
            }
            (_, Some(handshake)) => Arc::clone(handshake),
            (_, None) => Arc::new(Handshake::build(self.shared.local_id, &config, Vec::new())?),
        };
        self.handshake = Some(Arc::clone(&handshake));

        let (recv_tx, recv_rx) = mpsc::channel(config.receive_queue_capacity.max(1));
        let ctx = Arc::new(Context {
            shared: Arc::clone(&self.shared),
            handshake,
            handlers: Arc::new(self.handlers.clone()),
            recv_tx,
        });

        let mut tasks = Vec::new();
        if let Some(listener) = listener {
            tasks.push(tokio::spawn(accept_loop(Arc::clone(&ctx), listener).instrument(info_span!("p2p-in"))));
        }
        tasks.push(tokio::spawn(send_loop(Arc::clone(&ctx), send_rx).instrument(info_span!("p2p-out"))));

        let recv_rx = Arc::new(tokio::sync::Mutex::new(recv_rx));
        for id in 0..config.receive_workers() {
            tasks.push(tokio::spawn(
                receive_loop(Arc::clone(&ctx), Arc::clone(&recv_rx)).instrument(info_span!("p2p-worker", id)),
            ));
        }

        tasks.push(tokio::spawn(status_loop(Arc::clone(&ctx)).instrument(info_span!("p2p-ts"))));
        tasks.push(tokio::spawn(clear_loop(Arc::clone(&ctx)).instrument(info_span!("p2p-clear"))));
        if !config.seeds_only {
            tasks.push(tokio::spawn(discovery_loop(self.handle()).instrument(info_span!("p2p-discovery"))));
        }
        tasks.push(tokio::spawn(connect_loop(Arc::clone(&ctx)).instrument(info_span!("p2p-connect"))));

        self.tasks.lock().extend(tasks);
        info!(
            node = %self.shared.local_id.display_id(),
            listen = ?self.local_addr,
            receive_workers = config.receive_workers(),
            "p2p service started"
        );
        Ok(())
    }

    /// Stop every task, notify handlers and close all connections.
    ///
    /// Only the first call has an effect.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.running.store(false, Ordering::Release);

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        for handler in self.handlers.values().flatten() {
            handler.shutdown();
        }

        let nodes = self.shared.nodes.lock().shutdown();
        let closed = nodes.len();
        for node in nodes {
            notify_disconnect(&node);
            node.close();
        }
        info!(closed, "p2p service shut down");
    }
}

async fn accept_loop(ctx: Arc<Context>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if !ctx.shared.is_running() {
                    break;
                }
                trace!(%addr, "inbound connection");
                tokio::spawn(
                    connection::accept(Arc::clone(&ctx), stream, addr).instrument(info_span!("p2p-accept", %addr)),
                );
            }
            Err(err) => {
                warn!(%err, "accept failed");
                sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn send_loop(ctx: Arc<Context>, mut queue: mpsc::Receiver<MsgOut>) {
    while let Some(out) = queue.recv().await {
        let frame = match encode_frame(&out.msg) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(peer = %out.display_id, msg = %out.msg.header, %err, "failed to encode message");
                continue;
            }
        };

        let mut dropped = 0;
        {
            let nodes = ctx.shared.nodes.lock();
            match out.dest {
                Dest::Peer(peer_id) => match nodes.get_active(&peer_id) {
                    Some(node) => dropped += usize::from(!node.enqueue(frame)),
                    None => debug!(peer = %out.display_id, "peer not active, dropping message"),
                },
                Dest::Outbound | Dest::Active => {
                    for node in nodes
                        .active_nodes()
                        .filter(|node| out.dest == Dest::Active || node.direction == Direction::Outbound)
                    {
                        dropped += usize::from(!node.enqueue(frame.clone()));
                    }
                }
            }
        }

        if dropped > 0 {
            warn!(peer = %out.display_id, msg = %out.msg.header, dropped, "connection write queue full, dropping message");
            ctx.shared.inc_dropped("connection");
        }
    }
}

async fn receive_loop(ctx: Arc<Context>, queue: Arc<tokio::sync::Mutex<mpsc::Receiver<MsgIn>>>) {
    loop {
        let incoming = queue.lock().await.recv().await;
        let Some(incoming) = incoming else {
            break;
        };
        let Some(handlers) = ctx.handlers.get(&incoming.route) else {
            continue;
        };
        for handler in handlers {
            handler.receive(incoming.peer_id, &incoming.display_id, &incoming.body).await;
        }
    }
}

async fn status_loop(ctx: Arc<Context>) {
    let mut ticker = interval(Duration::from_secs(STATUS_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let local = ctx.shared.local_chain.read().clone();
        let (dump, active) = {
            let nodes = ctx.shared.nodes.lock();
            (nodes.dump(&local), nodes.active_count())
        };
        if let Some(metrics) = &ctx.shared.metrics {
            metrics.set_peers(active as i64);
        }
        debug!("{dump}");
    }
}

async fn clear_loop(ctx: Arc<Context>) {
    let mut ticker = interval(Duration::from_secs(STALE_SWEEP_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let stale = ctx
            .shared
            .nodes
            .lock()
            .drop_stale(Instant::now(), Duration::from_secs(STALE_TIMEOUT_SECS));
        for node in stale {
            info!(peer = %node.display_id, addr = %node.addr, "dropping stale peer");
            notify_disconnect(&node);
            node.close();
        }
    }
}

async fn discovery_loop(handle: P2pHandle) {
    sleep(Duration::from_secs(DISCOVERY_DELAY_SECS)).await;
    let mut ticker = interval(Duration::from_secs(DISCOVERY_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(peer_id) = handle.shared.nodes.lock().random_active() else {
            continue;
        };
        match ReqActiveNodes.to_msg() {
            Ok(msg) => {
                handle
                    .enqueue(MsgOut { dest: Dest::Peer(peer_id), display_id: peer_id.to_string(), msg })
                    .await;
            }
            Err(err) => warn!(%err, "failed to encode active nodes request"),
        }
    }
}

async fn connect_loop(ctx: Arc<Context>) {
    let mut ticker = interval(Duration::from_secs(CONNECT_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        {
            let mut nodes = ctx.shared.nodes.lock();
            if nodes.temp_count() == 0 && !nodes.is_full() {
                nodes.refill_from_boot_nodes();
            }
        }
        for _ in 0..MAX_DIALS_PER_TICK {
            let temp = {
                let mut nodes = ctx.shared.nodes.lock();
                if nodes.is_full() {
                    break;
                }
                nodes.take_temp()
            };
            let Some(temp) = temp else {
                break;
            };
            tokio::spawn(
                connection::dial(Arc::clone(&ctx), temp).instrument(info_span!("p2p-dial", addr = %temp.addr)),
            );
        }
    }
}
