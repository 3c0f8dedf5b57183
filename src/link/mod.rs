//! Link Lifecycle Manager.
//!
//! The only component that creates, holds, or destroys links. External code
//! holds [`LinkId`] handles, never direct references, so termination can
//! never leave a dangling consumer.
//!
//! # Architecture
//!
//! ```text
//! LinkManager
//!     ├── links: LinkId → LinkHandle (the one authoritative collection)
//!     │       └── runtime: SignalingClient + transport + pump tasks
//!     ├── MessageRouter (shared; inbound bytes fan out through it)
//!     ├── LinkStore (pluggable persistence of link metadata)
//!     └── link_states(): broadcast stream for connectivity UI
//! ```
//!
//! Establishing a link drives: signaling connect (waits for the peer) →
//! offer → trickle ICE → data channel open → inbound pump into the router.
//! On transport loss the manager renegotiates with the same identity, a
//! bounded number of times, then parks the link in [`LinkState::NeedsReconnect`].

// Rust guideline compliant 2026-02

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock as StdRwLock};

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::ConnectConfig;
use crate::constants::{MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY};
use crate::crypto::{ConnectionSecret, EncryptionKey, LinkId};
use crate::protocol::messages::MessageEnvelope;
use crate::protocol::{CodecError, MessageCodec};
use crate::router::MessageRouter;
use crate::signaling::messages::{SignalingEvent, SignalingViolation};
use crate::signaling::{ConnectError, SignalingClient};
use crate::transport::{
    DeliveryError, MessageTransport, NegotiationError, PeerTransport, PeerTransportState,
};

/// User-visible lifecycle state of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Added but not yet established.
    Idle,
    /// Establish in progress.
    Connecting,
    /// Transport open; traffic flows.
    Connected,
    /// Transport lost; background renegotiation running.
    Reconnecting,
    /// Bounded renegotiation exhausted; user action required.
    NeedsReconnect,
    /// Link corrupted (repeated decrypt failures); re-pairing required.
    Failed,
    /// Removed from the active set.
    Terminated,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting",
            Self::NeedsReconnect => "NeedsReconnect",
            Self::Failed => "Failed",
            Self::Terminated => "Terminated",
        };
        f.write_str(s)
    }
}

/// One state transition on the link-state stream.
#[derive(Debug, Clone)]
pub struct LinkStateChange {
    pub link_id: LinkId,
    pub state: LinkState,
}

/// Lifecycle operation failure.
#[derive(Debug)]
pub enum LinkError {
    /// No link with that id in the active set.
    UnknownLink(LinkId),
    /// Signaling connection failure.
    Connect(ConnectError),
    /// SDP/ICE negotiation failure.
    Negotiation(NegotiationError),
    /// Signaling protocol violation that ended the attempt.
    Protocol(SignalingViolation),
    /// Send failed for this link's transport.
    Delivery(DeliveryError),
    /// Message encoding failed.
    Codec(CodecError),
    /// Repeated decrypt failures: the shared secret no longer matches.
    PairingLost,
    /// Link metadata persistence failed.
    Store(String),
    /// Invariant breach inside the manager.
    Internal(String),
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownLink(id) => write!(f, "unknown link {id}"),
            Self::Connect(e) => write!(f, "{e}"),
            Self::Negotiation(e) => write!(f, "{e}"),
            Self::Protocol(v) => write!(f, "{v}"),
            Self::Delivery(e) => write!(f, "{e}"),
            Self::Codec(e) => write!(f, "{e}"),
            Self::PairingLost => write!(f, "pairing lost, link must be re-paired"),
            Self::Store(detail) => write!(f, "link store error: {detail}"),
            Self::Internal(detail) => write!(f, "internal link manager error: {detail}"),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<ConnectError> for LinkError {
    fn from(e: ConnectError) -> Self {
        Self::Connect(e)
    }
}

impl From<NegotiationError> for LinkError {
    fn from(e: NegotiationError) -> Self {
        Self::Negotiation(e)
    }
}

impl From<CodecError> for LinkError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

/// Persistence hook for link metadata. The manager stores only the link id;
/// secrets live in the host application's secure storage.
#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn persist(&self, link_id: &LinkId) -> anyhow::Result<()>;
    async fn remove(&self, link_id: &LinkId) -> anyhow::Result<()>;
    async fn list(&self) -> anyhow::Result<Vec<LinkId>>;
}

/// Default store: keeps link ids for the process lifetime only.
#[derive(Default)]
pub struct InMemoryLinkStore {
    ids: StdRwLock<HashSet<LinkId>>,
}

#[async_trait]
impl LinkStore for InMemoryLinkStore {
    async fn persist(&self, link_id: &LinkId) -> anyhow::Result<()> {
        self.ids
            .write()
            .map_err(|_| anyhow::anyhow!("link store lock poisoned"))?
            .insert(link_id.clone());
        Ok(())
    }

    async fn remove(&self, link_id: &LinkId) -> anyhow::Result<()> {
        self.ids
            .write()
            .map_err(|_| anyhow::anyhow!("link store lock poisoned"))?
            .remove(link_id);
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<LinkId>> {
        Ok(self
            .ids
            .read()
            .map_err(|_| anyhow::anyhow!("link store lock poisoned"))?
            .iter()
            .cloned()
            .collect())
    }
}

/// Result of a broadcast: which links got the message, which failed and why.
///
/// One down link never blocks delivery to the others.
#[derive(Debug, Default)]
pub struct BroadcastOutcome {
    pub delivered: Vec<LinkId>,
    pub failed: Vec<(LinkId, LinkError)>,
}

/// Live resources of one established link.
struct LinkRuntime {
    transport: Arc<dyn MessageTransport>,
    signaling: Option<Arc<SignalingClient>>,
    tasks: Vec<JoinHandle<()>>,
}

impl LinkRuntime {
    async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Some(signaling) = &self.signaling {
            signaling.close().await;
        }
        self.transport.close().await;
    }
}

/// One active link. Owned exclusively by the manager.
struct LinkHandle {
    link_id: LinkId,
    key: EncryptionKey,
    state: StdRwLock<LinkState>,
    runtime: Mutex<Option<LinkRuntime>>,
    /// Serializes `establish` per link: held across the whole negotiation so
    /// two concurrent attempts can never both commit a runtime.
    negotiating: Mutex<()>,
}

struct ManagerInner {
    config: ConnectConfig,
    codec: MessageCodec,
    router: Arc<MessageRouter>,
    store: Arc<dyn LinkStore>,
    links: RwLock<HashMap<LinkId, Arc<LinkHandle>>>,
    states_tx: broadcast::Sender<LinkStateChange>,
}

/// The Link Lifecycle Manager. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LinkManager {
    inner: Arc<ManagerInner>,
}

impl LinkManager {
    /// Build a manager with the default in-memory store.
    #[must_use]
    pub fn new(config: ConnectConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryLinkStore::default()))
    }

    /// Build a manager with a host-provided persistence hook.
    #[must_use]
    pub fn with_store(config: ConnectConfig, store: Arc<dyn LinkStore>) -> Self {
        let codec = MessageCodec::new();
        let (states_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                codec,
                router: Arc::new(MessageRouter::new(codec)),
                store,
                links: RwLock::new(HashMap::new()),
                states_tx,
            }),
        }
    }

    /// The shared router: subscribe here for decoded inbound traffic.
    #[must_use]
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.inner.router
    }

    /// Subscribe to link state transitions (connectivity UI).
    #[must_use]
    pub fn link_states(&self) -> broadcast::Receiver<LinkStateChange> {
        self.inner.states_tx.subscribe()
    }

    /// Register a link for the given connection secret.
    ///
    /// Idempotent: the same secret always maps to the same [`LinkId`] and
    /// never creates a second link.
    ///
    /// # Errors
    ///
    /// [`LinkError::Store`] if persisting metadata fails.
    pub async fn add_link(&self, secret: &ConnectionSecret) -> Result<LinkId, LinkError> {
        let link_id = secret.derive_link_id();
        let key = secret.derive_encryption_key();

        {
            let mut links = self.inner.links.write().await;
            if links.contains_key(&link_id) {
                log::debug!("[Link] add_link: {link_id} already present");
                return Ok(link_id);
            }
            links.insert(
                link_id.clone(),
                Arc::new(LinkHandle {
                    link_id: link_id.clone(),
                    key,
                    state: StdRwLock::new(LinkState::Idle),
                    runtime: Mutex::new(None),
                    negotiating: Mutex::new(()),
                }),
            );
        }

        self.inner
            .store
            .persist(&link_id)
            .await
            .map_err(|e| LinkError::Store(e.to_string()))?;

        log::info!("[Link] Added link {link_id}");
        self.publish(&link_id, LinkState::Idle);
        Ok(link_id)
    }

    /// Active link ids.
    pub async fn links(&self) -> Vec<LinkId> {
        self.inner.links.read().await.keys().cloned().collect()
    }

    /// Current state of one link, if it is in the active set.
    pub async fn link_state(&self, link_id: &LinkId) -> Option<LinkState> {
        let handle = self.inner.links.read().await.get(link_id).cloned()?;
        handle.state.read().ok().map(|guard| *guard)
    }

    /// Drive the link through signaling and negotiation to an open channel.
    ///
    /// Replaces any previous transport for this link. On success the link is
    /// [`LinkState::Connected`] and inbound traffic flows into the router;
    /// on failure the link is parked in [`LinkState::NeedsReconnect`]
    /// (or [`LinkState::Failed`] when the pairing itself is corrupt).
    ///
    /// # Errors
    ///
    /// The full taxonomy: [`LinkError::Connect`], [`LinkError::Negotiation`],
    /// [`LinkError::Protocol`], [`LinkError::PairingLost`].
    pub async fn establish(&self, link_id: &LinkId) -> Result<(), LinkError> {
        let handle = self.get_handle(link_id).await?;

        // One negotiation at a time per link, held to the end of the commit
        let _negotiation = handle.negotiating.lock().await;

        // Replaces the old transport
        if let Some(old) = handle.runtime.lock().await.take() {
            old.shutdown().await;
        }

        self.set_state(&handle, LinkState::Connecting);

        match self.negotiate(&handle).await {
            Ok(()) => {
                self.set_state(&handle, LinkState::Connected);
                log::info!("[Link] Link {link_id} connected");
                Ok(())
            }
            Err(LinkError::PairingLost) => {
                self.set_state(&handle, LinkState::Failed);
                Err(LinkError::PairingLost)
            }
            // Terminated mid-establish; the link already left the active set
            Err(e @ LinkError::UnknownLink(_)) => Err(e),
            Err(e) => {
                // No state publish for a link terminated while we were failing
                if self.inner.links.read().await.contains_key(link_id) {
                    self.set_state(&handle, LinkState::NeedsReconnect);
                }
                Err(e)
            }
        }
    }

    async fn negotiate(&self, handle: &Arc<LinkHandle>) -> Result<(), LinkError> {
        let link_id = &handle.link_id;
        let config = &self.inner.config;

        let transport = Arc::new(PeerTransport::new(config).await?);

        let mut signaling =
            match SignalingClient::connect(config, link_id.clone(), handle.key.clone()).await {
                Ok(signaling) => signaling,
                Err(e) => {
                    transport.close().await;
                    return Err(e.into());
                }
            };
        transport.mark_signaling_connected();

        let mut events = signaling
            .take_events()
            .ok_or_else(|| LinkError::Internal("signaling events already taken".to_string()))?;
        let signaling = Arc::new(signaling);

        // Negotiation proper; close both ends on any failure
        let result = self
            .drive_negotiation(handle, &transport, &signaling, &mut events)
            .await;

        let mut tasks = match result {
            Ok(tasks) => tasks,
            Err(e) => {
                transport.fail();
                transport.close().await;
                signaling.close().await;
                return Err(e);
            }
        };

        // Post-open plumbing: inbound pump, signaling watcher, state monitor
        let inbound = transport.take_inbound().await.ok_or_else(|| {
            LinkError::Internal("transport inbound already taken".to_string())
        })?;
        tasks.push(tokio::spawn(inbound_pump(
            Arc::clone(&self.inner.router),
            link_id.clone(),
            inbound,
        )));
        tasks.push(tokio::spawn(signaling_watch(
            self.clone(),
            link_id.clone(),
            Arc::clone(&transport),
            Arc::clone(&signaling),
            events,
        )));
        tasks.push(tokio::spawn(transport_monitor(
            self.clone(),
            link_id.clone(),
            transport.state_changes(),
        )));

        let runtime = LinkRuntime {
            transport: transport as Arc<dyn MessageTransport>,
            signaling: Some(signaling),
            tasks,
        };

        // Commit under the map lock so a concurrent terminate cannot lose
        // the runtime: terminate removes from the map first.
        let links = self.inner.links.read().await;
        if !links.contains_key(link_id) {
            drop(links);
            runtime.shutdown().await;
            return Err(LinkError::UnknownLink(link_id.clone()));
        }
        let displaced = handle.runtime.lock().await.replace(runtime);
        drop(links);
        if let Some(old) = displaced {
            // The negotiation gate makes this unreachable, but a displaced
            // runtime must never leak its tasks or peer connection
            old.shutdown().await;
        }
        Ok(())
    }

    /// Offer, trickle ICE, wait for Open. Returns the candidate pump task.
    async fn drive_negotiation(
        &self,
        handle: &Arc<LinkHandle>,
        transport: &Arc<PeerTransport>,
        signaling: &Arc<SignalingClient>,
        events: &mut tokio::sync::mpsc::Receiver<SignalingEvent>,
    ) -> Result<Vec<JoinHandle<()>>, LinkError> {
        let link_id = &handle.link_id;

        let offer = transport.create_offer().await?;
        signaling.send_offer(&offer).await?;

        let local_candidates = transport.take_local_candidates().await.ok_or_else(|| {
            LinkError::Internal("local candidates already taken".to_string())
        })?;
        let candidate_task = tokio::spawn(candidate_pump(
            link_id.clone(),
            Arc::clone(signaling),
            local_candidates,
        ));

        let mut state_rx = transport.state_changes();
        let wait = async {
            loop {
                tokio::select! {
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            return Err(LinkError::Internal("transport state stream ended".to_string()));
                        }
                        match *state_rx.borrow_and_update() {
                            PeerTransportState::Open => return Ok(()),
                            PeerTransportState::Failed => {
                                return Err(LinkError::Negotiation(NegotiationError::Webrtc(
                                    "transport failed during negotiation".to_string(),
                                )));
                            }
                            _ => {}
                        }
                    }
                    event = events.recv() => {
                        let Some(event) = event else {
                            return Err(LinkError::Connect(ConnectError::Closed));
                        };
                        match event {
                            SignalingEvent::RemoteAnswer(sdp) => {
                                transport.apply_remote_answer(&sdp.sdp).await?;
                            }
                            SignalingEvent::RemoteIceCandidates(candidates) => {
                                transport.add_remote_ice_candidates(&candidates).await?;
                            }
                            SignalingEvent::ProtocolError(SignalingViolation::Undecryptable) => {
                                if signaling.decrypt_failures_exceeded() {
                                    return Err(LinkError::PairingLost);
                                }
                                log::warn!("[Link] Decrypt failure during negotiation of {link_id}");
                            }
                            SignalingEvent::ProtocolError(SignalingViolation::MissingRemoteClient) => {
                                // The remote vanished between presence and offer
                                return Err(LinkError::Protocol(
                                    SignalingViolation::MissingRemoteClient,
                                ));
                            }
                            SignalingEvent::ProtocolError(violation) => {
                                log::warn!("[Link] Signaling violation on {link_id}: {violation}");
                            }
                            SignalingEvent::PeerDisconnected => {
                                log::info!("[Link] Peer left rendezvous during negotiation of {link_id}");
                            }
                            SignalingEvent::PeerPresent { .. } => {}
                        }
                    }
                }
            }
        };

        let negotiated = tokio::time::timeout(self.inner.config.negotiation_timeout(), wait).await;
        match negotiated {
            Ok(Ok(())) => Ok(vec![candidate_task]),
            Ok(Err(e)) => {
                candidate_task.abort();
                Err(e)
            }
            Err(_) => {
                candidate_task.abort();
                Err(LinkError::Negotiation(NegotiationError::Timeout))
            }
        }
    }

    /// Tear down one link and remove it from the active set.
    ///
    /// Safe to call concurrently with an in-progress `establish`; late
    /// traffic for the id is dropped, never queued.
    ///
    /// # Errors
    ///
    /// [`LinkError::UnknownLink`] if the id is not active.
    pub async fn terminate(&self, link_id: &LinkId) -> Result<(), LinkError> {
        let handle = self
            .inner
            .links
            .write()
            .await
            .remove(link_id)
            .ok_or_else(|| LinkError::UnknownLink(link_id.clone()))?;

        if let Some(runtime) = handle.runtime.lock().await.take() {
            runtime.shutdown().await;
        }

        self.inner.router.forget_link(link_id);
        if let Err(e) = self.inner.store.remove(link_id).await {
            log::warn!("[Link] Store removal for {link_id} failed: {e}");
        }

        self.set_state(&handle, LinkState::Terminated);
        log::info!("[Link] Terminated link {link_id}");
        Ok(())
    }

    /// Encode and deliver one message on one link.
    ///
    /// # Errors
    ///
    /// [`LinkError::UnknownLink`], [`LinkError::Codec`], or
    /// [`LinkError::Delivery`] when the transport is not Open.
    pub async fn send(
        &self,
        link_id: &LinkId,
        envelope: &MessageEnvelope,
    ) -> Result<(), LinkError> {
        let handle = self.get_handle(link_id).await?;
        let bytes = self.inner.codec.encode(envelope)?;
        self.send_bytes(&handle, &bytes).await
    }

    /// Encode once and deliver to every active link.
    ///
    /// Partial-failure semantics: a down link is reported in the outcome
    /// without blocking delivery to the rest.
    ///
    /// # Errors
    ///
    /// [`LinkError::Codec`] if the message itself cannot be encoded.
    pub async fn broadcast(
        &self,
        envelope: &MessageEnvelope,
    ) -> Result<BroadcastOutcome, LinkError> {
        let bytes = self.inner.codec.encode(envelope)?;
        let handles: Vec<Arc<LinkHandle>> =
            self.inner.links.read().await.values().cloned().collect();

        let mut outcome = BroadcastOutcome::default();
        for handle in handles {
            match self.send_bytes(&handle, &bytes).await {
                Ok(()) => outcome.delivered.push(handle.link_id.clone()),
                Err(e) => {
                    log::debug!("[Link] Broadcast skipped {}: {e}", handle.link_id);
                    outcome.failed.push((handle.link_id.clone(), e));
                }
            }
        }
        Ok(outcome)
    }

    async fn send_bytes(&self, handle: &Arc<LinkHandle>, bytes: &[u8]) -> Result<(), LinkError> {
        let runtime = handle.runtime.lock().await;
        let Some(runtime) = runtime.as_ref() else {
            return Err(LinkError::Delivery(DeliveryError::NotOpen(
                PeerTransportState::Idle,
            )));
        };
        runtime
            .transport
            .send(bytes)
            .await
            .map_err(LinkError::Delivery)
    }

    async fn transport_state(&self, link_id: &LinkId) -> Option<PeerTransportState> {
        let handle = self.get_handle(link_id).await.ok()?;
        let runtime = handle.runtime.lock().await;
        runtime.as_ref().map(|runtime| runtime.transport.state())
    }

    async fn get_handle(&self, link_id: &LinkId) -> Result<Arc<LinkHandle>, LinkError> {
        self.inner
            .links
            .read()
            .await
            .get(link_id)
            .cloned()
            .ok_or_else(|| LinkError::UnknownLink(link_id.clone()))
    }

    fn set_state(&self, handle: &Arc<LinkHandle>, state: LinkState) {
        if let Ok(mut guard) = handle.state.write() {
            if *guard == state {
                return;
            }
            log::debug!("[Link] {} state {} -> {state}", handle.link_id, *guard);
            *guard = state;
        }
        self.publish(&handle.link_id, state);
    }

    async fn set_state_by_id(&self, link_id: &LinkId, state: LinkState) {
        if let Ok(handle) = self.get_handle(link_id).await {
            self.set_state(&handle, state);
        }
    }

    fn publish(&self, link_id: &LinkId, state: LinkState) {
        // send fails only with zero subscribers; that is fine
        let _ = self.inner.states_tx.send(LinkStateChange {
            link_id: link_id.clone(),
            state,
        });
    }

    /// Mark a link corrupt and tear down its runtime.
    async fn fail_link(&self, link_id: &LinkId) {
        let Ok(handle) = self.get_handle(link_id).await else {
            return;
        };
        self.set_state(&handle, LinkState::Failed);
        if let Some(runtime) = handle.runtime.lock().await.take() {
            // The caller may be one of the runtime's own tasks; shut down
            // from a fresh task so the abort cannot strand the cleanup.
            tokio::spawn(async move {
                runtime.shutdown().await;
            });
        };
    }

    #[cfg(test)]
    pub(crate) async fn inject_transport(
        &self,
        link_id: &LinkId,
        transport: Arc<dyn MessageTransport>,
    ) {
        let handle = self.get_handle(link_id).await.unwrap();
        *handle.runtime.lock().await = Some(LinkRuntime {
            transport,
            signaling: None,
            tasks: Vec::new(),
        });
        self.set_state(&handle, LinkState::Connected);
    }
}

/// Feed decoded inbound traffic into the router until the channel ends.
async fn inbound_pump(
    router: Arc<MessageRouter>,
    link_id: LinkId,
    mut inbound: tokio::sync::mpsc::Receiver<Vec<u8>>,
) {
    while let Some(bytes) = inbound.recv().await {
        if let Err(e) = router.route(&link_id, &bytes) {
            // Malformed messages are isolated; the stream continues
            log::warn!("[Link] Dropping undecodable message on {link_id}: {e}");
        }
    }
    log::debug!("[Link] Inbound pump for {link_id} ended");
}

/// Trickle local ICE candidates out through the signaling relay.
async fn candidate_pump(
    link_id: LinkId,
    signaling: Arc<SignalingClient>,
    mut candidates: tokio::sync::mpsc::Receiver<crate::signaling::messages::IceCandidate>,
) {
    while let Some(candidate) = candidates.recv().await {
        if let Err(e) = signaling.send_ice_candidates(std::slice::from_ref(&candidate)).await {
            log::warn!("[Link] Candidate relay for {link_id} failed: {e}");
            return;
        }
    }
}

/// Keep consuming signaling events after the channel opens: late ICE,
/// decrypt-failure escalation, peer departure notices.
async fn signaling_watch(
    manager: LinkManager,
    link_id: LinkId,
    transport: Arc<PeerTransport>,
    signaling: Arc<SignalingClient>,
    mut events: tokio::sync::mpsc::Receiver<SignalingEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SignalingEvent::RemoteIceCandidates(candidates) => {
                if let Err(e) = transport.add_remote_ice_candidates(&candidates).await {
                    log::warn!("[Link] Late candidates for {link_id} rejected: {e}");
                }
            }
            SignalingEvent::ProtocolError(SignalingViolation::Undecryptable) => {
                if signaling.decrypt_failures_exceeded() {
                    log::error!("[Link] Repeated decrypt failures on {link_id}; pairing lost");
                    manager.fail_link(&link_id).await;
                    return;
                }
            }
            SignalingEvent::ProtocolError(violation) => {
                log::warn!("[Link] Signaling violation on {link_id}: {violation}");
            }
            SignalingEvent::PeerDisconnected => {
                // The transport's own state callbacks drive reconnection
                log::info!("[Link] Peer left rendezvous for {link_id}");
            }
            SignalingEvent::PeerPresent { .. } | SignalingEvent::RemoteAnswer(_) => {}
        }
    }
}

/// Watch transport state; on loss, hand off to the bounded reconnect driver.
async fn transport_monitor(
    manager: LinkManager,
    link_id: LinkId,
    mut state_rx: tokio::sync::watch::Receiver<PeerTransportState>,
) {
    while state_rx.changed().await.is_ok() {
        let state = *state_rx.borrow_and_update();
        match state {
            PeerTransportState::Disconnected | PeerTransportState::Failed => {
                log::warn!("[Link] Transport for {link_id} reported {state}");
                tokio::spawn(reconnect_driver(manager.clone(), link_id.clone()));
                return;
            }
            _ => {}
        }
    }
}

/// Bounded renegotiation with the same identity. Never retries forever:
/// after the limit the link is parked for the user to act on.
///
/// Boxed because the future is indirectly recursive (`reconnect_driver` →
/// `establish` → `transport_monitor` → `reconnect_driver`), which the
/// compiler cannot otherwise prove `Send`.
fn reconnect_driver(
    manager: LinkManager,
    link_id: LinkId,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
    manager.set_state_by_id(&link_id, LinkState::Reconnecting).await;

    for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
        tokio::time::sleep(RECONNECT_DELAY).await;

        // Bail if the link was terminated or someone else took over
        if manager.link_state(&link_id).await != Some(LinkState::Reconnecting) {
            return;
        }

        // The transport may have recovered on its own during the delay
        if manager.transport_state(&link_id).await == Some(PeerTransportState::Open) {
            log::info!("[Link] Transport for {link_id} recovered without renegotiation");
            manager.set_state_by_id(&link_id, LinkState::Connected).await;
            return;
        }

        match manager.establish(&link_id).await {
            Ok(()) => {
                log::info!("[Link] Renegotiated {link_id} on attempt {attempt}");
                return;
            }
            Err(LinkError::PairingLost) => return,
            Err(e) => {
                log::warn!(
                    "[Link] Renegotiation {attempt}/{MAX_RECONNECT_ATTEMPTS} for {link_id} failed: {e}"
                );
                manager.set_state_by_id(&link_id, LinkState::Reconnecting).await;
            }
        }
    }

    log::warn!("[Link] Renegotiation exhausted for {link_id}; user action required");
    manager.set_state_by_id(&link_id, LinkState::NeedsReconnect).await;
    })
}
