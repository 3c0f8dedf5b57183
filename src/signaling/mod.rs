//! Signaling Client.
//!
//! Maintains the rendezvous channel to the signaling server for one link and
//! bridges its raw WebSocket frames into a typed event stream.
//!
//! # Architecture
//!
//! ```text
//! SignalingClient
//!     ├── WebSocket connection (ws module, one per link)
//!     ├── receive loop task: frame → classify → decrypt → SignalingEvent
//!     ├── events: mpsc::Receiver<SignalingEvent> (taken once by the caller)
//!     └── sends: encrypt payload → SignalingEnvelope → text frame
//! ```
//!
//! The server is an untrusted relay: negotiation payloads are AES-GCM
//! encrypted under the link key before they are handed to it, and inbound
//! envelopes are validated against the session (`connectionId`, `source`)
//! before decryption. Anything that violates the protocol is surfaced as
//! [`SignalingEvent::ProtocolError`], never silently dropped.

// Rust guideline compliant 2026-02

pub mod messages;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ConnectConfig;
use crate::constants::{DECRYPT_FAILURE_LIMIT, SIGNALING_EVENT_CAPACITY};
use crate::crypto::{self, EncryptionKey, LinkId};
use crate::ws::{self, WsMessage, WsReader, WsWriter};

use messages::{
    classification, method, IceCandidate, NegotiationPayload, ServerFrame, SessionDescription,
    SignalingEnvelope, SignalingEvent, SignalingViolation, SOURCE_WALLET, TARGET_EXTENSION,
};

/// Failure to establish or use the signaling connection.
#[derive(Debug)]
pub enum ConnectError {
    /// The WebSocket handshake failed.
    Handshake(String),
    /// The handshake did not complete within the allowed time.
    ConnectTimeout,
    /// The remote peer never showed up at the rendezvous.
    PeerWaitTimeout,
    /// A send failed because the connection is gone.
    SendFailed(String),
    /// The client was already closed.
    Closed,
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handshake(detail) => write!(f, "signaling handshake failed: {detail}"),
            Self::ConnectTimeout => write!(f, "signaling connect timed out"),
            Self::PeerWaitTimeout => write!(f, "timed out waiting for remote peer"),
            Self::SendFailed(detail) => write!(f, "signaling send failed: {detail}"),
            Self::Closed => write!(f, "signaling client is closed"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Aborts the wrapped task when dropped before being disarmed.
///
/// Covers the window in [`SignalingClient::connect`] between spawning the
/// receive loop and handing its handle to the constructed client: if the
/// caller's connect future is cancelled mid-wait, the loop is torn down with
/// it instead of lingering on the open socket.
struct AbortOnDrop(Option<JoinHandle<()>>);

impl AbortOnDrop {
    fn new(task: JoinHandle<()>) -> Self {
        Self(Some(task))
    }

    /// Hand the task over; the guard no longer aborts it.
    fn disarm(mut self) -> Option<JoinHandle<()>> {
        self.0.take()
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(task) = self.0.take() {
            task.abort();
        }
    }
}

/// One link's connection to the signaling server.
///
/// Created by [`SignalingClient::connect`], which only returns once the
/// remote peer is present at the rendezvous (or times out). Dropped or
/// [`close`](Self::close)d, the socket is shut down and the receive loop
/// aborted.
pub struct SignalingClient {
    link_id: LinkId,
    key: EncryptionKey,

    /// Write half, shared with the receive loop for ping/pong.
    writer: Arc<Mutex<WsWriter>>,

    /// Event stream, handed out once via `take_events`.
    events_rx: Option<mpsc::Receiver<SignalingEvent>>,

    /// Server-assigned id of the remote client, recorded from presence
    /// frames and used as `targetClientId` on sends.
    remote_client_id: Arc<StdRwLock<Option<String>>>,

    /// Consecutive inbound decrypt failures. Reset on every success.
    decrypt_failures: Arc<AtomicU32>,

    receive_task: StdMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SignalingClient {
    /// Connect to the rendezvous for `link_id` and wait for the remote peer.
    ///
    /// Suspends until the server reports the peer present, then returns the
    /// live client. On every failure path the socket is closed before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// [`ConnectError::Handshake`] / [`ConnectError::ConnectTimeout`] if the
    /// WebSocket cannot be established, [`ConnectError::PeerWaitTimeout`] if
    /// the peer does not appear within `config.peer_presence_timeout`.
    pub async fn connect(
        config: &ConnectConfig,
        link_id: LinkId,
        key: EncryptionKey,
    ) -> Result<Self, ConnectError> {
        let url = format!(
            "{}/{}?source={}&target={}",
            ws::http_to_ws_scheme(config.signaling_base_url.trim_end_matches('/')),
            link_id.as_str(),
            SOURCE_WALLET,
            TARGET_EXTENSION,
        );

        log::info!("[Signaling] Connecting rendezvous for link {link_id}");

        let (writer, reader) =
            tokio::time::timeout(config.signaling_connect_timeout(), ws::connect(&url))
                .await
                .map_err(|_| ConnectError::ConnectTimeout)?
                .map_err(|e| ConnectError::Handshake(e.to_string()))?;

        let writer = Arc::new(Mutex::new(writer));
        let (events_tx, mut events_rx) = mpsc::channel(SIGNALING_EVENT_CAPACITY);
        let remote_client_id = Arc::new(StdRwLock::new(None));
        let decrypt_failures = Arc::new(AtomicU32::new(0));

        // Guarded until the client owns it: cancellation of this future must
        // not leave the loop running on the open socket
        let receive_task = AbortOnDrop::new(tokio::spawn(receive_loop(
            reader,
            Arc::clone(&writer),
            events_tx,
            link_id.clone(),
            key.clone(),
            Arc::clone(&remote_client_id),
            Arc::clone(&decrypt_failures),
        )));

        // Hold the event stream ourselves until the peer shows up; presence
        // is a connect precondition, not something callers should poll for.
        let wait = async {
            while let Some(event) = events_rx.recv().await {
                match event {
                    SignalingEvent::PeerPresent { .. } => return Ok(()),
                    SignalingEvent::ProtocolError(violation) => {
                        log::warn!("[Signaling] Violation while waiting for peer: {violation}");
                    }
                    other => {
                        log::debug!("[Signaling] Ignoring pre-presence event: {other:?}");
                    }
                }
            }
            Err(ConnectError::Closed)
        };

        let waited = tokio::time::timeout(config.peer_presence_timeout(), wait).await;

        let client = Self {
            link_id,
            key,
            writer,
            events_rx: Some(events_rx),
            remote_client_id,
            decrypt_failures,
            receive_task: StdMutex::new(receive_task.disarm()),
            closed: AtomicBool::new(false),
        };

        match waited {
            Ok(Ok(())) => {
                log::info!("[Signaling] Remote peer present for link {}", client.link_id);
                Ok(client)
            }
            Ok(Err(e)) => {
                client.close().await;
                Err(e)
            }
            Err(_) => {
                client.close().await;
                Err(ConnectError::PeerWaitTimeout)
            }
        }
    }

    /// Take the event stream. Yields `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SignalingEvent>> {
        self.events_rx.take()
    }

    /// The server-assigned remote client id, once a presence frame carried one.
    #[must_use]
    pub fn remote_client_id(&self) -> Option<String> {
        self.remote_client_id
            .read()
            .ok()
            .and_then(|guard| guard.clone())
    }

    /// Consecutive inbound decrypt failures since the last success.
    #[must_use]
    pub fn decrypt_failures(&self) -> u32 {
        self.decrypt_failures.load(Ordering::Relaxed)
    }

    /// Whether decrypt failures have crossed the corruption threshold.
    #[must_use]
    pub fn decrypt_failures_exceeded(&self) -> bool {
        self.decrypt_failures() >= DECRYPT_FAILURE_LIMIT
    }

    /// Encrypt and relay our SDP offer to the remote peer.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::SendFailed`] if encryption or the socket
    /// write fails, [`ConnectError::Closed`] after `close`.
    pub async fn send_offer(&self, sdp: &str) -> Result<(), ConnectError> {
        let payload = SessionDescription {
            sdp: sdp.to_string(),
        };
        self.send_payload(method::OFFER, &payload).await
    }

    /// Encrypt and relay a batch of local ICE candidates.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`send_offer`](Self::send_offer).
    pub async fn send_ice_candidates(
        &self,
        candidates: &[IceCandidate],
    ) -> Result<(), ConnectError> {
        self.send_payload(method::ICE_CANDIDATES, &candidates).await
    }

    async fn send_payload<T: serde::Serialize>(
        &self,
        method: &str,
        payload: &T,
    ) -> Result<(), ConnectError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectError::Closed);
        }

        let plaintext = serde_json::to_vec(payload)
            .map_err(|e| ConnectError::SendFailed(format!("payload encode: {e}")))?;
        let ciphertext = crypto::encrypt(&self.key, &plaintext)
            .map_err(|e| ConnectError::SendFailed(format!("payload encrypt: {e}")))?;

        let envelope = SignalingEnvelope {
            request_id: Uuid::new_v4().to_string(),
            method: method.to_string(),
            source: SOURCE_WALLET.to_string(),
            connection_id: self.link_id.as_str().to_string(),
            target_client_id: self.remote_client_id(),
            encrypted_payload: hex::encode(ciphertext),
        };

        let text = serde_json::to_string(&envelope)
            .map_err(|e| ConnectError::SendFailed(format!("envelope encode: {e}")))?;

        log::debug!(
            "[Signaling] Sending {} (request {}) on link {}",
            envelope.method,
            envelope.request_id,
            self.link_id
        );

        self.writer
            .lock()
            .await
            .send_text(&text)
            .await
            .map_err(|e| ConnectError::SendFailed(e.to_string()))
    }

    /// Close the connection and stop the receive loop. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.writer.lock().await.close().await {
            log::debug!("[Signaling] Close for link {}: {e}", self.link_id);
        }
        let task = self.receive_task.lock().ok().and_then(|mut guard| guard.take());
        if let Some(task) = task {
            task.abort();
        }
        log::info!("[Signaling] Closed rendezvous for link {}", self.link_id);
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        // Async close may not have run; make sure the loop cannot outlive us
        let task = self.receive_task.lock().ok().and_then(|mut guard| guard.take());
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Background frame pump: read, classify, decrypt, emit.
async fn receive_loop(
    mut reader: WsReader,
    writer: Arc<Mutex<WsWriter>>,
    events_tx: mpsc::Sender<SignalingEvent>,
    link_id: LinkId,
    key: EncryptionKey,
    remote_client_id: Arc<StdRwLock<Option<String>>>,
    decrypt_failures: Arc<AtomicU32>,
) {
    while let Some(result) = reader.recv().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                log::warn!("[Signaling] Read error on link {link_id}: {e}");
                break;
            }
        };

        match message {
            WsMessage::Text(text) => {
                let event = match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(frame) => classify_frame(
                        frame,
                        &link_id,
                        &key,
                        &remote_client_id,
                        &decrypt_failures,
                    ),
                    Err(e) => Some(SignalingEvent::ProtocolError(SignalingViolation::Malformed {
                        detail: format!("server frame: {e}"),
                    })),
                };

                if let Some(event) = event {
                    if events_tx.send(event).await.is_err() {
                        // Receiver dropped; nobody is listening anymore
                        break;
                    }
                }
            }
            WsMessage::Ping(data) => {
                if let Err(e) = writer.lock().await.send_pong(data).await {
                    log::warn!("[Signaling] Pong failed on link {link_id}: {e}");
                    break;
                }
            }
            WsMessage::Close { code, reason } => {
                log::info!("[Signaling] Server closed link {link_id} ({code}: {reason})");
                break;
            }
        }
    }

    log::debug!("[Signaling] Receive loop ended for link {link_id}");
}

/// Map one server frame to at most one event.
///
/// Confirmations are consumed here (correlated to our request ids at debug
/// level); everything unmapped becomes a `ProtocolError` so misbehaving
/// servers stay visible.
fn classify_frame(
    frame: ServerFrame,
    link_id: &LinkId,
    key: &EncryptionKey,
    remote_client_id: &StdRwLock<Option<String>>,
    decrypt_failures: &AtomicU32,
) -> Option<SignalingEvent> {
    match frame.info.as_str() {
        classification::CONFIRMATION => {
            log::debug!(
                "[Signaling] Server confirmed request {} on link {link_id}",
                frame.request_id.as_deref().unwrap_or("<none>")
            );
            None
        }
        classification::REMOTE_CLIENT_JUST_CONNECTED
        | classification::REMOTE_CLIENT_ALREADY_CONNECTED => {
            if let Some(id) = &frame.remote_client_id {
                if let Ok(mut guard) = remote_client_id.write() {
                    *guard = Some(id.clone());
                }
            }
            Some(SignalingEvent::PeerPresent {
                remote_client_id: frame.remote_client_id,
            })
        }
        classification::REMOTE_CLIENT_DISCONNECTED => Some(SignalingEvent::PeerDisconnected),
        classification::REMOTE_DATA => Some(decode_remote_data(
            frame,
            link_id,
            key,
            decrypt_failures,
        )),
        classification::MISSING_REMOTE_CLIENT_ERROR => Some(SignalingEvent::ProtocolError(
            SignalingViolation::MissingRemoteClient,
        )),
        classification::INVALID_MESSAGE_ERROR | classification::VALIDATION_ERROR => {
            Some(SignalingEvent::ProtocolError(SignalingViolation::Rejected {
                info: frame.info,
                detail: frame
                    .error
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "<no detail>".to_string()),
            }))
        }
        _ => Some(SignalingEvent::ProtocolError(
            SignalingViolation::UnknownClassification { info: frame.info },
        )),
    }
}

/// Validate, decrypt and decode a `remoteData` frame.
fn decode_remote_data(
    frame: ServerFrame,
    link_id: &LinkId,
    key: &EncryptionKey,
    decrypt_failures: &AtomicU32,
) -> SignalingEvent {
    let Some(envelope) = frame.data else {
        return SignalingEvent::ProtocolError(SignalingViolation::Malformed {
            detail: "remoteData frame without data".to_string(),
        });
    };

    // Cross-session envelopes are a distinct violation: the relay delivered
    // traffic that was never meant for this session.
    if envelope.connection_id != link_id.as_str() {
        return SignalingEvent::ProtocolError(SignalingViolation::CrossSession {
            field: "connectionId",
            value: envelope.connection_id,
        });
    }
    if envelope.source != TARGET_EXTENSION {
        return SignalingEvent::ProtocolError(SignalingViolation::CrossSession {
            field: "source",
            value: envelope.source,
        });
    }

    let ciphertext = match hex::decode(&envelope.encrypted_payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            return SignalingEvent::ProtocolError(SignalingViolation::Malformed {
                detail: format!("encryptedPayload hex: {e}"),
            });
        }
    };

    let plaintext = match crypto::decrypt(key, &ciphertext) {
        Ok(plaintext) => {
            decrypt_failures.store(0, Ordering::Relaxed);
            plaintext
        }
        Err(e) => {
            let failures = decrypt_failures.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!(
                "[Signaling] Decrypt failure #{failures} on link {link_id}: {e}"
            );
            return SignalingEvent::ProtocolError(SignalingViolation::Undecryptable);
        }
    };

    match messages::decode_negotiation_payload(&envelope.method, &plaintext) {
        // The wallet offers; an inbound offer means the peer has its roles
        // reversed and negotiation cannot proceed.
        Ok(NegotiationPayload::Offer(_)) => SignalingEvent::ProtocolError(
            SignalingViolation::UnexpectedMethod {
                method: method::OFFER.to_string(),
            },
        ),
        Ok(NegotiationPayload::Answer(sdp)) => SignalingEvent::RemoteAnswer(sdp),
        Ok(NegotiationPayload::IceCandidates(candidates)) => {
            SignalingEvent::RemoteIceCandidates(candidates)
        }
        Err(violation) => SignalingEvent::ProtocolError(violation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ConnectionSecret;
    use serde_json::json;

    fn test_link() -> (LinkId, EncryptionKey) {
        let secret = ConnectionSecret::new([7u8; 32]);
        (secret.derive_link_id(), secret.derive_encryption_key())
    }

    fn remote_data_frame(link_id: &LinkId, key: &EncryptionKey, method: &str, payload: &serde_json::Value) -> ServerFrame {
        let plaintext = serde_json::to_vec(payload).unwrap();
        let ciphertext = crypto::encrypt(key, &plaintext).unwrap();
        ServerFrame {
            info: classification::REMOTE_DATA.to_string(),
            request_id: None,
            remote_client_id: None,
            data: Some(SignalingEnvelope {
                request_id: "req".to_string(),
                method: method.to_string(),
                source: TARGET_EXTENSION.to_string(),
                connection_id: link_id.as_str().to_string(),
                target_client_id: None,
                encrypted_payload: hex::encode(ciphertext),
            }),
            error: None,
        }
    }

    #[test]
    fn test_classify_presence_records_remote_client_id() {
        let (link_id, key) = test_link();
        let remote = StdRwLock::new(None);
        let failures = AtomicU32::new(0);

        let frame = ServerFrame {
            info: classification::REMOTE_CLIENT_JUST_CONNECTED.to_string(),
            request_id: None,
            remote_client_id: Some("client-4".to_string()),
            data: None,
            error: None,
        };

        let event = classify_frame(frame, &link_id, &key, &remote, &failures);
        assert!(matches!(
            event,
            Some(SignalingEvent::PeerPresent { remote_client_id: Some(id) }) if id == "client-4"
        ));
        assert_eq!(remote.read().unwrap().as_deref(), Some("client-4"));
    }

    #[test]
    fn test_classify_confirmation_is_consumed() {
        let (link_id, key) = test_link();
        let remote = StdRwLock::new(None);
        let failures = AtomicU32::new(0);

        let frame = ServerFrame {
            info: classification::CONFIRMATION.to_string(),
            request_id: Some("req-1".to_string()),
            remote_client_id: None,
            data: None,
            error: None,
        };

        assert!(classify_frame(frame, &link_id, &key, &remote, &failures).is_none());
    }

    #[test]
    fn test_remote_answer_decrypts() {
        let (link_id, key) = test_link();
        let remote = StdRwLock::new(None);
        let failures = AtomicU32::new(0);

        let frame = remote_data_frame(&link_id, &key, method::ANSWER, &json!({ "sdp": "v=0" }));
        let event = classify_frame(frame, &link_id, &key, &remote, &failures);
        assert!(matches!(
            event,
            Some(SignalingEvent::RemoteAnswer(sdp)) if sdp.sdp == "v=0"
        ));
        assert_eq!(failures.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_cross_session_envelope_is_distinct_violation() {
        let (link_id, key) = test_link();
        let other = ConnectionSecret::new([8u8; 32]).derive_link_id();
        let remote = StdRwLock::new(None);
        let failures = AtomicU32::new(0);

        let mut frame = remote_data_frame(&link_id, &key, method::ANSWER, &json!({ "sdp": "v=0" }));
        frame.data.as_mut().unwrap().connection_id = other.as_str().to_string();

        let event = classify_frame(frame, &link_id, &key, &remote, &failures);
        assert!(matches!(
            event,
            Some(SignalingEvent::ProtocolError(SignalingViolation::CrossSession {
                field: "connectionId",
                ..
            }))
        ));
    }

    #[test]
    fn test_wrong_key_increments_decrypt_failures() {
        let (link_id, _key) = test_link();
        let wrong = ConnectionSecret::new([9u8; 32]).derive_encryption_key();
        let right = ConnectionSecret::new([7u8; 32]).derive_encryption_key();
        let remote = StdRwLock::new(None);
        let failures = AtomicU32::new(0);

        // Encrypted under the right key, decrypted with the wrong one
        let frame = remote_data_frame(&link_id, &right, method::ANSWER, &json!({ "sdp": "v=0" }));
        let event = classify_frame(frame, &link_id, &wrong, &remote, &failures);
        assert!(matches!(
            event,
            Some(SignalingEvent::ProtocolError(SignalingViolation::Undecryptable))
        ));
        assert_eq!(failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unknown_classification_surfaces() {
        let (link_id, key) = test_link();
        let remote = StdRwLock::new(None);
        let failures = AtomicU32::new(0);

        let frame = ServerFrame {
            info: "somethingNew".to_string(),
            request_id: None,
            remote_client_id: None,
            data: None,
            error: None,
        };

        let event = classify_frame(frame, &link_id, &key, &remote, &failures);
        assert!(matches!(
            event,
            Some(SignalingEvent::ProtocolError(
                SignalingViolation::UnknownClassification { info }
            )) if info == "somethingNew"
        ));
    }

    #[tokio::test]
    async fn test_pending_receive_task_aborts_when_guard_drops() {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let guard = AbortOnDrop::new(tokio::spawn(async move {
            let _held = tx;
            std::future::pending::<()>().await;
        }));

        // Dropping the guard, as a cancelled connect would, kills the task
        drop(guard);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_disarmed_guard_leaves_task_running() {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let guard = AbortOnDrop::new(tokio::spawn(async move {
            tx.send(()).await.ok();
        }));

        let task = guard.disarm();
        assert!(rx.recv().await.is_some());
        if let Some(task) = task {
            task.await.ok();
        }
    }

    #[test]
    fn test_inbound_offer_is_unexpected_for_offerer() {
        let (link_id, key) = test_link();
        let remote = StdRwLock::new(None);
        let failures = AtomicU32::new(0);

        let frame = remote_data_frame(&link_id, &key, method::OFFER, &json!({ "sdp": "v=0" }));
        let event = classify_frame(frame, &link_id, &key, &remote, &failures);
        assert!(matches!(
            event,
            Some(SignalingEvent::ProtocolError(
                SignalingViolation::UnexpectedMethod { .. }
            ))
        ));
    }
}
