//! PearsyncNetwork - wires endpoint, gossip topic and replication
//!
//! One instance per open workspace. Dials peers the topic surfaces,
//! accepts inbound channels via the iroh router, runs the writer
//! exchange on every connection, and replicates every known log in
//! both directions. Connections are symmetric: whichever side holds
//! the channel runs the same per-log sessions over it.

use crate::endpoint::{PearsyncEndpoint, PEARSYNC_ALPN};
use crate::error::NetError;
use crate::exchange;
use crate::replicate::{self, SyncOutcome};
use crate::topic::{Topic, TopicEvent};
use crate::wire::{Frame, FrameSink, FrameStream};
use iroh::endpoint::Connection;
use iroh::protocol::{AcceptError, ProtocolHandler, Router};
use pearsync_model::{Operation, PubKey, SyncEvent, WriterIdentity};
use pearsync_state::{StateEvent, WorkspaceHandle};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

/// Dial attempts before giving up on a peer (reconnect is retried on
/// the next topic event anyway).
const DIAL_ATTEMPTS: u32 = 4;
const DIAL_BASE_DELAY: Duration = Duration::from_secs(1);

/// Delay between learning a peer's writer key and the follow-up pull.
const ADMISSION_PULL_DELAY: Duration = Duration::from_secs(1);

fn to_model(key: &iroh::PublicKey) -> PubKey {
    PubKey::from(*key.as_bytes())
}

/// The per-workspace network service.
pub struct PearsyncNetwork {
    endpoint: PearsyncEndpoint,
    topic: Topic,
    handle: WorkspaceHandle,
    workspace: PubKey,
    local_writer: PubKey,
    events: broadcast::Sender<SyncEvent>,
    /// Peers with a sync pass currently in flight.
    syncing: Arc<Mutex<HashSet<iroh::PublicKey>>>,
    /// Peers seen on the topic since we joined.
    known_peers: Arc<Mutex<HashSet<iroh::PublicKey>>>,
    /// Flips true once the first topic neighbor appears.
    joined: tokio::sync::watch::Sender<bool>,
    router: Router,
}

/// Accept-side handler for pearsync connections
struct SyncProtocol {
    network: std::sync::Weak<PearsyncNetwork>,
}

impl std::fmt::Debug for SyncProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncProtocol").finish()
    }
}

impl ProtocolHandler for SyncProtocol {
    fn accept(
        &self,
        conn: Connection,
    ) -> impl std::future::Future<Output = Result<(), AcceptError>> + Send {
        let network = self.network.clone();
        Box::pin(async move {
            let Some(network) = network.upgrade() else {
                return Ok(());
            };
            if let Err(e) = network.handle_connection(conn, false).await {
                tracing::debug!(error = %e, "connection handler error");
            }
            Ok(())
        })
    }
}

impl PearsyncNetwork {
    /// Bind the endpoint, join the workspace topic and start serving.
    pub async fn spawn(
        identity: &WriterIdentity,
        workspace: PubKey,
        handle: WorkspaceHandle,
        bootstrap_addrs: Vec<iroh::EndpointAddr>,
    ) -> Result<Arc<Self>, NetError> {
        let endpoint = PearsyncEndpoint::new(identity.signing_key().clone())
            .await
            .map_err(|e| NetError::Endpoint(e.to_string()))?;

        let mut bootstrap_ids = Vec::new();
        for addr in bootstrap_addrs {
            bootstrap_ids.push(addr.id);
            endpoint.add_peer_addr(addr);
        }

        let gossip = crate::topic::spawn_gossip(&endpoint);
        let (topic, topic_events) = Topic::join(&gossip, &workspace, bootstrap_ids).await?;

        let (events, _) = broadcast::channel(256);
        let (joined, _) = tokio::sync::watch::channel(false);

        let network = Arc::new_cyclic(|weak| {
            let router = Router::builder(endpoint.endpoint().clone())
                .accept(
                    PEARSYNC_ALPN,
                    SyncProtocol {
                        network: weak.clone(),
                    },
                )
                .accept(iroh_gossip::ALPN, gossip.clone())
                .spawn();

            Self {
                endpoint,
                topic,
                handle,
                workspace,
                local_writer: identity.public_key(),
                events,
                syncing: Arc::new(Mutex::new(HashSet::new())),
                known_peers: Arc::new(Mutex::new(HashSet::new())),
                joined,
                router,
            }
        });

        tokio::spawn(Self::run_topic_loop(network.clone(), topic_events));
        tokio::spawn(Self::run_announce_forwarder(network.clone()));

        tracing::info!(
            workspace = %workspace.fmt_short(),
            node = %network.endpoint.public_key().fmt_short(),
            "network service started"
        );

        Ok(network)
    }

    /// Subscribe to peer/replication events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// This node's dialable address (for out-of-band bootstrap).
    pub fn addr(&self) -> iroh::EndpointAddr {
        self.endpoint.addr()
    }

    /// Completes once the initial discovery round trip has produced a
    /// topic neighbor (i.e. the swarm knows about us and we about it).
    pub async fn flushed(&self) {
        let mut rx = self.joined.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Leave the topic and tear down all channels.
    pub async fn leave(&self) {
        self.router.shutdown().await.ok();
        self.endpoint.close().await;
    }

    /// Fetch one block, syncing against known peers until it becomes
    /// readable locally or the deadline passes with `NotAvailable`.
    pub async fn fetch_block(
        self: &Arc<Self>,
        writer: PubKey,
        seq: u64,
        deadline: Duration,
    ) -> Result<pearsync_log::Block, NetError> {
        let fetch = async {
            loop {
                if let Some(block) = self.handle.get_block(writer, seq).await? {
                    return Ok(block);
                }
                let peers: Vec<iroh::PublicKey> =
                    self.known_peers.lock().await.iter().copied().collect();
                for peer in peers {
                    let _ = self.sync_with(peer).await;
                    if let Some(block) = self.handle.get_block(writer, seq).await? {
                        return Ok(block);
                    }
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        };
        tokio::time::timeout(deadline, fetch)
            .await
            .map_err(|_| NetError::NotAvailable {
                writer: writer.fmt_short(),
                seq,
            })?
    }

    /// Kick a sync pass toward every peer seen on the topic.
    pub async fn sync_now(self: &Arc<Self>) {
        let peers: Vec<iroh::PublicKey> =
            self.known_peers.lock().await.iter().copied().collect();
        for peer in peers {
            Self::spawn_sync(self, peer);
        }
    }

    async fn run_topic_loop(
        network: Arc<Self>,
        mut events: tokio::sync::mpsc::Receiver<TopicEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                TopicEvent::PeerUp(peer) => {
                    tracing::debug!(peer = %peer.fmt_short(), "topic peer up");
                    network.known_peers.lock().await.insert(peer);
                    network.joined.send_replace(true);
                    Self::spawn_sync(&network, peer);
                }
                TopicEvent::PeerDown(peer) => {
                    let _ = network.events.send(SyncEvent::PeerDisconnected {
                        peer: to_model(&peer),
                    });
                }
                TopicEvent::Announce { from, writer, seq } => {
                    let behind = network
                        .handle
                        .sync_state()
                        .await
                        .map(|state| state.get(&writer) < seq)
                        .unwrap_or(false);
                    if behind {
                        tracing::debug!(
                            from = %from.fmt_short(),
                            writer = %writer.fmt_short(),
                            seq,
                            "behind announced block, syncing"
                        );
                        Self::spawn_sync(&network, from);
                    }
                }
            }
        }
    }

    /// Forward local appends to the topic as block announcements.
    async fn run_announce_forwarder(network: Arc<Self>) {
        let mut events = network.handle.subscribe();
        loop {
            match events.recv().await {
                Ok(StateEvent::Appended { writer, seq }) => {
                    if let Err(e) = network.topic.announce(&writer, seq).await {
                        tracing::debug!(error = %e, "announce failed");
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "announce forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn spawn_sync(network: &Arc<Self>, peer: iroh::PublicKey) {
        if peer == network.endpoint.public_key() {
            return;
        }
        let network = network.clone();
        tokio::spawn(async move {
            if let Err(e) = network.sync_with(peer).await {
                tracing::debug!(peer = %peer.fmt_short(), error = %e, "sync failed");
            }
        });
    }

    /// Dial a peer (with jittered exponential backoff) and run a full
    /// outbound pass: writer exchange plus one session per known log.
    pub async fn sync_with(self: &Arc<Self>, peer: iroh::PublicKey) -> Result<(), NetError> {
        {
            let mut syncing = self.syncing.lock().await;
            if !syncing.insert(peer) {
                return Ok(()); // already in flight
            }
        }
        let result = self.sync_with_inner(peer).await;
        self.syncing.lock().await.remove(&peer);
        result
    }

    async fn sync_with_inner(self: &Arc<Self>, peer: iroh::PublicKey) -> Result<(), NetError> {
        let conn = self.dial_with_backoff(peer).await?;
        self.handle_connection(conn, true).await
    }

    async fn dial_with_backoff(&self, peer: iroh::PublicKey) -> Result<Connection, NetError> {
        use rand::Rng;
        let mut delay = DIAL_BASE_DELAY;
        let mut last_err = None;
        for attempt in 0..DIAL_ATTEMPTS {
            match self.endpoint.connect(peer).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    tracing::debug!(
                        peer = %peer.fmt_short(),
                        attempt,
                        error = %e,
                        "dial failed"
                    );
                    last_err = Some(e);
                }
            }
            // Jitter avoids herds when a whole swarm reconnects at once.
            let jitter_ms = rand::thread_rng().gen_range(0..500);
            tokio::time::sleep(delay + Duration::from_millis(jitter_ms)).await;
            delay = (delay * 2).min(Duration::from_secs(60));
        }
        Err(NetError::Transport(format!(
            "dial {} failed: {}",
            peer.fmt_short(),
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Drive one connection: run the outbound half (writer exchange and
    /// per-log initiator sessions), then keep accepting inbound streams
    /// until the channel closes.
    async fn handle_connection(
        self: &Arc<Self>,
        conn: Connection,
        initiated: bool,
    ) -> Result<(), NetError> {
        let remote = conn.remote_id();
        let remote_model = to_model(&remote);
        self.known_peers.lock().await.insert(remote);
        tracing::debug!(
            peer = %remote.fmt_short(),
            initiated,
            "peer channel open"
        );
        let _ = self.events.send(SyncEvent::PeerConnected { peer: remote_model });

        // Per-connection writer-exchange dedup.
        let seen = Arc::new(Mutex::new(HashSet::<PubKey>::new()));

        // The outbound half runs on both sides, so logs only the other
        // peer knows about still replicate (its own outbound half opens
        // the streams for them).
        let outbound = {
            let network = self.clone();
            let conn = conn.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                if let Err(e) = network.run_outbound_half(&conn, remote, &seen).await {
                    tracing::debug!(peer = %remote.fmt_short(), error = %e, "outbound half failed");
                }
            })
        };

        // Inbound half: dispatch streams the peer opens at us.
        loop {
            match conn.accept_bi().await {
                Ok((send, recv)) => {
                    let network = self.clone();
                    let seen = seen.clone();
                    tokio::spawn(async move {
                        if let Err(e) = network.handle_stream(send, recv, remote, &seen).await {
                            tracing::debug!(error = %e, "stream handler error");
                        }
                    });
                }
                Err(e) => {
                    tracing::debug!(peer = %remote.fmt_short(), "connection closed: {}", e);
                    break;
                }
            }
        }

        outbound.abort();
        let _ = self.events.send(SyncEvent::PeerDisconnected { peer: remote_model });
        Ok(())
    }

    /// Writer exchange plus an initiator session per known log.
    async fn run_outbound_half(
        self: &Arc<Self>,
        conn: &Connection,
        remote: iroh::PublicKey,
        seen: &Arc<Mutex<HashSet<PubKey>>>,
    ) -> Result<(), NetError> {
        // Writer exchange first: admission should never wait on bulk
        // replication.
        let (send, recv) = conn
            .open_bi()
            .await
            .map_err(|e| NetError::Transport(e.to_string()))?;
        let mut sink = FrameSink::new(send);
        let mut stream = FrameStream::new(recv);
        let topic = *crate::topic::topic_for_workspace(&self.workspace).as_bytes();
        let remote_writer =
            exchange::run_initiator(topic, self.local_writer, &mut sink, &mut stream).await?;
        self.process_remote_writer(remote, remote_writer, seen).await?;

        // One session per log we know about.
        let state = self.handle.sync_state().await?;
        let mut total = SyncOutcome::default();
        for (writer, _) in state.writers() {
            let (send, recv) = conn
                .open_bi()
                .await
                .map_err(|e| NetError::Transport(e.to_string()))?;
            let mut sink = FrameSink::new(send);
            let mut stream = FrameStream::new(recv);
            match replicate::run_initiator(
                &self.handle,
                *writer,
                to_model(&remote),
                &mut sink,
                &mut stream,
            )
            .await
            {
                Ok(outcome) => total.merge(outcome),
                Err(e) => {
                    // Per-log isolation: a bad log session does not end
                    // the channel or the other logs.
                    tracing::warn!(
                        writer = %writer.fmt_short(),
                        peer = %remote.fmt_short(),
                        error = %e,
                        "log session failed"
                    );
                    let _ = self.events.send(SyncEvent::ReplicationRejected {
                        peer: to_model(&remote),
                        writer: *writer,
                    });
                }
            }
        }

        if total.blocks_received > 0 || total.blocks_sent > 0 {
            tracing::info!(
                peer = %remote.fmt_short(),
                received = total.blocks_received,
                sent = total.blocks_sent,
                "sync pass complete"
            );
        }
        Ok(())
    }

    /// Dispatch one inbound stream by its first frame.
    async fn handle_stream(
        self: &Arc<Self>,
        send: iroh::endpoint::SendStream,
        recv: iroh::endpoint::RecvStream,
        remote: iroh::PublicKey,
        seen: &Arc<Mutex<HashSet<PubKey>>>,
    ) -> Result<(), NetError> {
        let mut sink = FrameSink::new(send);
        let mut stream = FrameStream::new(recv);

        match stream.recv().await? {
            Some(Frame::OpenLog { writer }) => {
                let outcome = replicate::run_responder(
                    &self.handle,
                    writer,
                    to_model(&remote),
                    &mut sink,
                    &mut stream,
                )
                .await;
                if let Err(e) = outcome {
                    let _ = self.events.send(SyncEvent::ReplicationRejected {
                        peer: to_model(&remote),
                        writer,
                    });
                    return Err(e);
                }
            }
            Some(Frame::ExchangeHello { topic }) => {
                let ours = *crate::topic::topic_for_workspace(&self.workspace).as_bytes();
                if topic != ours {
                    return Err(NetError::Sync("writer exchange for wrong topic".into()));
                }
                let remote_writer =
                    exchange::run_responder(self.local_writer, &mut sink, &mut stream).await?;
                self.process_remote_writer(remote, remote_writer, seen).await?;
            }
            Some(other) => {
                return Err(NetError::Sync(format!(
                    "unexpected opening frame: {:?}",
                    other
                )))
            }
            None => {}
        }
        Ok(())
    }

    /// Handle a peer's writer key: writable nodes admit unknown keys by
    /// appending `add-writer`; everyone schedules a follow-up pull.
    async fn process_remote_writer(
        self: &Arc<Self>,
        peer: iroh::PublicKey,
        remote_writer: PubKey,
        seen: &Arc<Mutex<HashSet<PubKey>>>,
    ) -> Result<(), NetError> {
        if remote_writer == self.local_writer {
            return Ok(());
        }
        if !seen.lock().await.insert(remote_writer) {
            return Ok(()); // already handled on this connection
        }

        if self.handle.writable().await? {
            let already = self.handle.writers().await?.contains(&remote_writer);
            if !already {
                tracing::info!(
                    writer = %remote_writer.fmt_short(),
                    "admitting new writer"
                );
                let payload = pearsync_proto::encode_operation(Operation::AddWriter {
                    writer: remote_writer,
                });
                self.handle.append(payload).await?;
            }
        }

        // Let replication settle, then pull once more so the newly
        // admitted writer's data lands promptly.
        let network = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ADMISSION_PULL_DELAY).await;
            if let Err(e) = network.sync_with(peer).await {
                tracing::debug!(peer = %peer.fmt_short(), error = %e, "follow-up sync failed");
            }
        });
        Ok(())
    }
}

impl std::fmt::Debug for PearsyncNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PearsyncNetwork")
            .field("workspace", &self.workspace.fmt_short())
            .field("local_writer", &self.local_writer.fmt_short())
            .finish()
    }
}
