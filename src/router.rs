//! Message Router.
//!
//! Stateless fan-out (save for duplicate suppression): decodes each link's
//! inbound bytes through the [`MessageCodec`] and republishes them on two
//! independently subscribable streams, dApp interaction requests and
//! hardware-wallet responses. Messages from one link keep their arrival
//! order; no ordering exists across links.

// Rust guideline compliant 2026-02

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::constants::{ROUTER_DEDUP_CAPACITY, ROUTER_STREAM_CAPACITY};
use crate::crypto::LinkId;
use crate::protocol::messages::{
    DappRequest, LedgerResponseError, LedgerResponseSuccess, MessageEnvelope,
};
use crate::protocol::{CodecError, MessageCodec};

/// A dApp interaction request tagged with the link it arrived on.
#[derive(Debug, Clone)]
pub struct RoutedDappRequest {
    pub link_id: LinkId,
    pub request: DappRequest,
}

/// A hardware-wallet response (success or error).
#[derive(Debug, Clone)]
pub enum LedgerResponse {
    Success(LedgerResponseSuccess),
    Error(LedgerResponseError),
}

impl LedgerResponse {
    #[must_use]
    pub fn interaction_id(&self) -> &str {
        match self {
            Self::Success(r) => &r.interaction_id,
            Self::Error(r) => &r.interaction_id,
        }
    }
}

/// A hardware-wallet response tagged with the link it arrived on.
#[derive(Debug, Clone)]
pub struct RoutedLedgerResponse {
    pub link_id: LinkId,
    pub response: LedgerResponse,
}

/// Bounded first-in-first-out set of delivered response interaction ids.
#[derive(Debug, Default)]
struct DedupWindow {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupWindow {
    /// Returns false when `id` was already delivered.
    fn first_delivery(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        if self.order.len() > ROUTER_DEDUP_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

/// Decodes and fans out inbound traffic from all active links.
pub struct MessageRouter {
    codec: MessageCodec,
    dapp_tx: broadcast::Sender<RoutedDappRequest>,
    ledger_tx: broadcast::Sender<RoutedLedgerResponse>,
    delivered_responses: Mutex<HashMap<LinkId, DedupWindow>>,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new(MessageCodec::new())
    }
}

impl MessageRouter {
    #[must_use]
    pub fn new(codec: MessageCodec) -> Self {
        let (dapp_tx, _) = broadcast::channel(ROUTER_STREAM_CAPACITY);
        let (ledger_tx, _) = broadcast::channel(ROUTER_STREAM_CAPACITY);
        Self {
            codec,
            dapp_tx,
            ledger_tx,
            delivered_responses: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to incoming dApp interaction requests from all links.
    #[must_use]
    pub fn dapp_requests(&self) -> broadcast::Receiver<RoutedDappRequest> {
        self.dapp_tx.subscribe()
    }

    /// Subscribe to incoming hardware-wallet responses from all links.
    #[must_use]
    pub fn ledger_responses(&self) -> broadcast::Receiver<RoutedLedgerResponse> {
        self.ledger_tx.subscribe()
    }

    /// Decode one inbound message and publish it on the matching stream.
    ///
    /// Decode failures are isolated per message: the error is returned for
    /// logging and the stream stays usable. A duplicate response for an
    /// already-delivered interaction id is dropped silently (at most one
    /// response is delivered upstream per request).
    ///
    /// # Errors
    ///
    /// [`CodecError`] when the message does not parse.
    pub fn route(&self, link_id: &LinkId, bytes: &[u8]) -> Result<(), CodecError> {
        let envelope = self.codec.decode(bytes)?;

        match envelope {
            MessageEnvelope::DappRequest(request) => {
                log::debug!(
                    "[Router] dApp request {} from link {link_id}",
                    request.interaction_id
                );
                // send fails only with zero subscribers; that is not an error
                let _ = self.dapp_tx.send(RoutedDappRequest {
                    link_id: link_id.clone(),
                    request,
                });
            }
            MessageEnvelope::LedgerResponseSuccess(response) => {
                self.publish_ledger(link_id, LedgerResponse::Success(response));
            }
            MessageEnvelope::LedgerResponseError(response) => {
                self.publish_ledger(link_id, LedgerResponse::Error(response));
            }
            MessageEnvelope::Unrecognized(message) => {
                log::warn!(
                    "[Router] Unrecognized message from link {link_id} (discriminator {:?})",
                    message.discriminator
                );
            }
            other => {
                // Outbound-shaped traffic arriving inbound; not routable
                log::debug!(
                    "[Router] Dropping non-inbound envelope from link {link_id}: {:?}",
                    other.interaction_id()
                );
            }
        }
        Ok(())
    }

    fn publish_ledger(&self, link_id: &LinkId, response: LedgerResponse) {
        let first = self
            .delivered_responses
            .lock()
            .map(|mut map| {
                map.entry(link_id.clone())
                    .or_default()
                    .first_delivery(response.interaction_id())
            })
            .unwrap_or(true);

        if !first {
            log::debug!(
                "[Router] Duplicate response {} on link {link_id} dropped",
                response.interaction_id()
            );
            return;
        }

        log::debug!(
            "[Router] Ledger response {} from link {link_id}",
            response.interaction_id()
        );
        let _ = self.ledger_tx.send(RoutedLedgerResponse {
            link_id: link_id.clone(),
            response,
        });
    }

    /// Drop per-link routing state (called on link termination).
    pub fn forget_link(&self, link_id: &LinkId) {
        if let Ok(mut map) = self.delivered_responses.lock() {
            map.remove(link_id);
        }
    }
}
