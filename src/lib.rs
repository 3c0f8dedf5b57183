//! Peerlink - encrypted wallet-to-extension peer links.
//!
//! This crate provides the connectivity layer between a wallet and its
//! browser extension counterpart: pairing-derived link identities, a
//! signaling rendezvous over WebSocket, peer-to-peer data channels, and a
//! typed message protocol routed to the rest of the application.
//!
//! # Architecture
//!
//! All link state flows through one owner:
//!
//! - **LinkManager** - Central orchestrator, owns every link, drives lifecycle
//! - **SignalingClient** - Encrypted rendezvous adapter (untrusted relay)
//! - **PeerTransport** - WebRTC peer connection and data channel
//! - **MessageCodec** - Discriminated JSON wire protocol
//! - **MessageRouter** - Fan-out of decoded inbound traffic
//!
//! # Modules
//!
//! - [`link`] - Link lifecycle: add, establish, reconnect, terminate
//! - [`signaling`] - Rendezvous client and signaling wire types
//! - [`transport`] - Peer connection, negotiation, delivery
//! - [`protocol`] - Message envelope types and codec
//! - [`router`] - Inbound message fan-out streams
//! - [`crypto`] - AES-GCM payload encryption and identity derivation

// Rust guideline compliant 2026-02

pub mod config;
pub mod constants;
pub mod crypto;
pub mod link;
pub mod protocol;
pub mod router;
pub mod signaling;
pub mod transport;
pub mod ws;

// Re-export commonly used types
pub use config::{ConnectConfig, IceServer};
pub use crypto::{ConnectionSecret, EncryptionKey, LinkId};
pub use protocol::messages::MessageEnvelope;
pub use protocol::{CodecError, MessageCodec};
pub use router::{MessageRouter, RoutedDappRequest, RoutedLedgerResponse};
pub use transport::{DeliveryError, MessageTransport, PeerTransportState};

// Re-export LinkManager
pub use link::{BroadcastOutcome, LinkError, LinkManager, LinkState, LinkStateChange, LinkStore};
