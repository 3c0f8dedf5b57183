//! Peer Transport.
//!
//! Owns one WebRTC peer connection instance and its negotiation. Raw
//! `on_*` callbacks never leave this module: they are bridged into a state
//! watch channel, an inbound message queue and a local ICE candidate queue,
//! so upstream code works with streams and suspend-capable setup calls only.
//!
//! # State machine
//!
//! ```text
//! Idle → SignalingConnected → Negotiating → Open ⇄ Disconnected
//!   └───────────────┴──────────────┴──────────┴──→ Failed (terminal)
//! ```
//!
//! Open ⇄ Disconnected may cycle on transient network loss. Failed is
//! terminal for the instance; renegotiation creates a fresh transport.

// Rust guideline compliant 2026-02

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::ConnectConfig;
use crate::constants::TRANSPORT_INBOUND_CAPACITY;
use crate::signaling::messages::IceCandidate;

/// Label of the single ordered data channel per link.
const DATA_CHANNEL_LABEL: &str = "data";

/// Transport lifecycle states (see module docs for the transition graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerTransportState {
    Idle,
    SignalingConnected,
    Negotiating,
    Open,
    Disconnected,
    Failed,
}

impl std::fmt::Display for PeerTransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::SignalingConnected => "SignalingConnected",
            Self::Negotiating => "Negotiating",
            Self::Open => "Open",
            Self::Disconnected => "Disconnected",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// SDP/ICE negotiation failure.
#[derive(Debug)]
pub enum NegotiationError {
    /// `create_offer` called twice within one negotiation attempt.
    OfferAlreadyCreated,
    /// The negotiation did not complete within the allowed time.
    Timeout,
    /// The underlying peer connection reported an error.
    Webrtc(String),
}

impl std::fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OfferAlreadyCreated => {
                write!(f, "offer already created for this negotiation attempt")
            }
            Self::Timeout => write!(f, "negotiation timed out"),
            Self::Webrtc(detail) => write!(f, "peer connection error: {detail}"),
        }
    }
}

impl std::error::Error for NegotiationError {}

/// Send attempted while the transport cannot deliver.
#[derive(Debug)]
pub enum DeliveryError {
    /// Transport is not Open; carries the state it was in.
    NotOpen(PeerTransportState),
    /// The data channel rejected the write.
    ChannelClosed(String),
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOpen(state) => write!(f, "transport not open (state: {state})"),
            Self::ChannelClosed(detail) => write!(f, "data channel write failed: {detail}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Seam between the Link Lifecycle Manager and a concrete transport.
///
/// [`PeerTransport`] is the production implementation; tests substitute
/// in-memory fakes to exercise lifecycle and broadcast semantics without a
/// network.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Current lifecycle state.
    fn state(&self) -> PeerTransportState;

    /// Deliver one message to the remote peer. Only valid in Open.
    async fn send(&self, bytes: &[u8]) -> Result<(), DeliveryError>;

    /// Tear the transport down. Idempotent.
    async fn close(&self);
}

/// One WebRTC peer connection plus its ordered data channel.
pub struct PeerTransport {
    peer_connection: Arc<RTCPeerConnection>,
    data_channel: Arc<RTCDataChannel>,

    state_tx: Arc<watch::Sender<PeerTransportState>>,

    inbound_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    local_candidates_rx: Mutex<Option<mpsc::Receiver<IceCandidate>>>,

    /// `create_offer` is once per negotiation attempt.
    offer_created: AtomicBool,

    /// Remote candidates arriving before the answer are buffered here and
    /// flushed when the remote description lands.
    pending_remote_candidates: Mutex<Vec<IceCandidate>>,
    remote_description_set: AtomicBool,
}

impl PeerTransport {
    /// Build a transport: peer connection, data channel, callback bridges.
    ///
    /// The transport starts Idle; the caller marks it SignalingConnected
    /// once the rendezvous is up, then drives negotiation.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::Webrtc`] if the peer connection or data channel
    /// cannot be constructed.
    pub async fn new(config: &ConnectConfig) -> Result<Self, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| NegotiationError::Webrtc(e.to_string()))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
                ..Default::default()
            })
            .collect();

        let peer_connection = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| NegotiationError::Webrtc(e.to_string()))?,
        );

        let (state_tx, _state_rx) = watch::channel(PeerTransportState::Idle);
        let state_tx = Arc::new(state_tx);

        // Connection-state callback → state watch channel
        {
            let state_tx = Arc::clone(&state_tx);
            peer_connection.on_peer_connection_state_change(Box::new(move |s| {
                let state_tx = Arc::clone(&state_tx);
                Box::pin(async move {
                    log::debug!("[Transport] Peer connection state: {s}");
                    match s {
                        RTCPeerConnectionState::Disconnected => {
                            transition(&state_tx, PeerTransportState::Disconnected);
                        }
                        RTCPeerConnectionState::Connected => {
                            // First-time Open comes from the data channel's
                            // on_open; this handles recovery after a blip
                            reopen(&state_tx);
                        }
                        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                            transition(&state_tx, PeerTransportState::Failed);
                        }
                        _ => {}
                    }
                })
            }));
        }

        // Local ICE candidates → candidate queue (trickled out via signaling)
        let (candidates_tx, candidates_rx) = mpsc::channel(TRANSPORT_INBOUND_CAPACITY);
        {
            peer_connection.on_ice_candidate(Box::new(
                move |candidate: Option<RTCIceCandidate>| {
                    let candidates_tx = candidates_tx.clone();
                    Box::pin(async move {
                        let Some(candidate) = candidate else {
                            // End of gathering
                            return;
                        };
                        match candidate.to_json() {
                            Ok(init) => {
                                let candidate = IceCandidate {
                                    candidate: init.candidate,
                                    sdp_mid: init.sdp_mid,
                                    sdp_m_line_index: init.sdp_mline_index,
                                };
                                if candidates_tx.send(candidate).await.is_err() {
                                    log::debug!("[Transport] Candidate queue dropped");
                                }
                            }
                            Err(e) => {
                                log::warn!("[Transport] Candidate serialization failed: {e}");
                            }
                        }
                    })
                },
            ));
        }

        // As the offerer we create the channel; the remote's on_data_channel
        // mirrors it.
        let data_channel = peer_connection
            .create_data_channel(DATA_CHANNEL_LABEL, None)
            .await
            .map_err(|e| NegotiationError::Webrtc(e.to_string()))?;

        let (inbound_tx, inbound_rx) = mpsc::channel(TRANSPORT_INBOUND_CAPACITY);
        {
            let state_tx_open = Arc::clone(&state_tx);
            data_channel.on_open(Box::new(move || {
                let state_tx = Arc::clone(&state_tx_open);
                Box::pin(async move {
                    log::info!("[Transport] Data channel open");
                    transition(&state_tx, PeerTransportState::Open);
                })
            }));

            let state_tx_close = Arc::clone(&state_tx);
            data_channel.on_close(Box::new(move || {
                let state_tx = Arc::clone(&state_tx_close);
                Box::pin(async move {
                    log::info!("[Transport] Data channel closed");
                    transition(&state_tx, PeerTransportState::Disconnected);
                })
            }));

            data_channel.on_message(Box::new(move |message: DataChannelMessage| {
                let inbound_tx = inbound_tx.clone();
                Box::pin(async move {
                    if inbound_tx.send(message.data.to_vec()).await.is_err() {
                        log::debug!("[Transport] Inbound queue dropped");
                    }
                })
            }));
        }

        Ok(Self {
            peer_connection,
            data_channel,
            state_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            local_candidates_rx: Mutex::new(Some(candidates_rx)),
            offer_created: AtomicBool::new(false),
            pending_remote_candidates: Mutex::new(Vec::new()),
            remote_description_set: AtomicBool::new(false),
        })
    }

    /// Record that the signaling rendezvous is up for this transport.
    pub fn mark_signaling_connected(&self) {
        transition(&self.state_tx, PeerTransportState::SignalingConnected);
    }

    /// Generate the local session description and start negotiating.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::OfferAlreadyCreated`] on a second call within the
    /// same attempt; [`NegotiationError::Webrtc`] on SDP failure.
    pub async fn create_offer(&self) -> Result<String, NegotiationError> {
        if self.offer_created.swap(true, Ordering::SeqCst) {
            return Err(NegotiationError::OfferAlreadyCreated);
        }

        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| NegotiationError::Webrtc(e.to_string()))?;
        let sdp = offer.sdp.clone();
        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| NegotiationError::Webrtc(e.to_string()))?;

        transition(&self.state_tx, PeerTransportState::Negotiating);
        log::debug!("[Transport] Local offer created ({} bytes)", sdp.len());
        Ok(sdp)
    }

    /// Apply the remote answer and flush any buffered remote candidates.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::Webrtc`] if the SDP is rejected.
    pub async fn apply_remote_answer(&self, sdp: &str) -> Result<(), NegotiationError> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| NegotiationError::Webrtc(e.to_string()))?;
        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| NegotiationError::Webrtc(e.to_string()))?;
        self.remote_description_set.store(true, Ordering::SeqCst);

        let buffered: Vec<IceCandidate> =
            std::mem::take(&mut *self.pending_remote_candidates.lock().await);
        if !buffered.is_empty() {
            log::debug!(
                "[Transport] Applying {} candidate(s) buffered before answer",
                buffered.len()
            );
            self.apply_candidates(&buffered).await?;
        }
        Ok(())
    }

    /// Add remote ICE candidates.
    ///
    /// Candidates arriving before the remote answer are buffered and flushed
    /// by [`apply_remote_answer`](Self::apply_remote_answer); they may
    /// legitimately arrive first.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::Webrtc`] if a candidate is rejected.
    pub async fn add_remote_ice_candidates(
        &self,
        candidates: &[IceCandidate],
    ) -> Result<(), NegotiationError> {
        if !self.remote_description_set.load(Ordering::SeqCst) {
            let mut pending = self.pending_remote_candidates.lock().await;
            // Re-check under the lock: the answer may have landed meanwhile
            if !self.remote_description_set.load(Ordering::SeqCst) {
                pending.extend_from_slice(candidates);
                log::debug!(
                    "[Transport] Buffered {} candidate(s) awaiting answer",
                    candidates.len()
                );
                return Ok(());
            }
        }
        self.apply_candidates(candidates).await
    }

    async fn apply_candidates(&self, candidates: &[IceCandidate]) -> Result<(), NegotiationError> {
        for candidate in candidates {
            let init = RTCIceCandidateInit {
                candidate: candidate.candidate.clone(),
                sdp_mid: candidate.sdp_mid.clone(),
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: None,
            };
            self.peer_connection
                .add_ice_candidate(init)
                .await
                .map_err(|e| NegotiationError::Webrtc(e.to_string()))?;
        }
        Ok(())
    }

    /// Take the inbound message stream. Yields `None` after the first call.
    pub async fn take_inbound(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.inbound_rx.lock().await.take()
    }

    /// Take the local ICE candidate stream (to trickle out via signaling).
    pub async fn take_local_candidates(&self) -> Option<mpsc::Receiver<IceCandidate>> {
        self.local_candidates_rx.lock().await.take()
    }

    /// Subscribe to state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<PeerTransportState> {
        self.state_tx.subscribe()
    }

    /// Force the terminal Failed state (unrecoverable error or abort).
    pub fn fail(&self) {
        transition(&self.state_tx, PeerTransportState::Failed);
    }
}

#[async_trait]
impl MessageTransport for PeerTransport {
    fn state(&self) -> PeerTransportState {
        *self.state_tx.borrow()
    }

    async fn send(&self, bytes: &[u8]) -> Result<(), DeliveryError> {
        let state = self.state();
        if state != PeerTransportState::Open {
            return Err(DeliveryError::NotOpen(state));
        }
        self.data_channel
            .send(&Bytes::copy_from_slice(bytes))
            .await
            .map(|_| ())
            .map_err(|e| DeliveryError::ChannelClosed(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.peer_connection.close().await {
            log::debug!("[Transport] Close: {e}");
        }
        transition(&self.state_tx, PeerTransportState::Failed);
    }
}

/// Reopen after a transient network drop. Only Disconnected goes back to
/// Open: negotiation-phase states wait for the data channel's own on_open,
/// and Failed stays terminal.
fn reopen(state_tx: &watch::Sender<PeerTransportState>) {
    state_tx.send_if_modified(|state| {
        if *state != PeerTransportState::Disconnected {
            return false;
        }
        log::info!("[Transport] Data channel recovered after transient drop");
        *state = PeerTransportState::Open;
        true
    });
}

/// Apply a transition, honoring Failed as terminal and dropping no-ops.
fn transition(state_tx: &watch::Sender<PeerTransportState>, next: PeerTransportState) {
    state_tx.send_if_modified(|state| {
        if *state == PeerTransportState::Failed || *state == next {
            return false;
        }
        log::debug!("[Transport] State {state} -> {next}");
        *state = next;
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_is_terminal() {
        let (tx, rx) = watch::channel(PeerTransportState::Negotiating);
        transition(&tx, PeerTransportState::Failed);
        transition(&tx, PeerTransportState::Open);
        assert_eq!(*rx.borrow(), PeerTransportState::Failed);
    }

    #[test]
    fn test_open_disconnected_may_cycle() {
        let (tx, rx) = watch::channel(PeerTransportState::Open);
        transition(&tx, PeerTransportState::Disconnected);
        assert_eq!(*rx.borrow(), PeerTransportState::Disconnected);
        transition(&tx, PeerTransportState::Open);
        assert_eq!(*rx.borrow(), PeerTransportState::Open);
    }

    #[test]
    fn test_reopen_recovers_only_from_disconnected() {
        let (tx, rx) = watch::channel(PeerTransportState::Disconnected);
        reopen(&tx);
        assert_eq!(*rx.borrow(), PeerTransportState::Open);

        // Peer connection reports Connected before the channel ever opened;
        // Open must still come from the data channel callback
        let (tx, rx) = watch::channel(PeerTransportState::Negotiating);
        reopen(&tx);
        assert_eq!(*rx.borrow(), PeerTransportState::Negotiating);

        let (tx, rx) = watch::channel(PeerTransportState::Failed);
        reopen(&tx);
        assert_eq!(*rx.borrow(), PeerTransportState::Failed);
    }

    #[tokio::test]
    async fn test_offer_is_at_most_once_per_attempt() {
        let transport = PeerTransport::new(&ConnectConfig::default()).await.unwrap();
        let first = transport.create_offer().await;
        assert!(first.is_ok());
        let second = transport.create_offer().await;
        assert!(matches!(second, Err(NegotiationError::OfferAlreadyCreated)));
        transport.close().await;
    }

    #[tokio::test]
    async fn test_candidates_before_answer_are_buffered() {
        let transport = PeerTransport::new(&ConnectConfig::default()).await.unwrap();
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.1 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        };

        transport
            .add_remote_ice_candidates(std::slice::from_ref(&candidate))
            .await
            .unwrap();
        assert_eq!(transport.pending_remote_candidates.lock().await.len(), 1);
        transport.close().await;
    }

    #[tokio::test]
    async fn test_send_fails_typed_when_not_open() {
        let transport = PeerTransport::new(&ConnectConfig::default()).await.unwrap();
        let err = transport.send(b"hello").await.unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::NotOpen(PeerTransportState::Idle)
        ));
        transport.close().await;
    }
}
