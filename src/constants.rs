//! Subsystem-wide constants.
//!
//! Centralizes the timeouts, retry limits and channel capacities used across
//! the link subsystem, grouped by domain with the reasoning for each value.

// Rust guideline compliant 2026-02

use std::time::Duration;

// ============================================================================
// Signaling
// ============================================================================

/// Maximum time to wait for the remote peer to show up on the signaling
/// server after we connect.
///
/// The extension polls its side of the rendezvous as soon as the user scans
/// the pairing QR; a minute covers slow devices without leaving the wallet
/// stuck in "connecting" forever.
pub const PEER_PRESENCE_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for the initial WebSocket handshake with the signaling server.
pub const SIGNALING_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the decoded signaling event queue.
///
/// Negotiation exchanges a handful of messages; 64 absorbs ICE candidate
/// bursts without ever being a meaningful buffer.
pub const SIGNALING_EVENT_CAPACITY: usize = 64;

// ============================================================================
// Negotiation / transport
// ============================================================================

/// Maximum time for a full SDP + ICE negotiation to reach an open data
/// channel before the attempt is failed.
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the inbound data-channel message queue per transport.
pub const TRANSPORT_INBOUND_CAPACITY: usize = 256;

// ============================================================================
// Link lifecycle
// ============================================================================

/// Maximum renegotiation attempts after a transport drops to Disconnected
/// before the link is parked in a user-visible "needs reconnect" state.
///
/// Background retries are never unbounded; past this the user must act.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Delay between renegotiation attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Consecutive decrypt failures on one link before it is treated as
/// corrupted (wrong key / lost pairing) and failed out.
pub const DECRYPT_FAILURE_LIMIT: u32 = 3;

// ============================================================================
// Routing
// ============================================================================

/// Capacity of each router output stream (dApp requests, ledger responses).
pub const ROUTER_STREAM_CAPACITY: usize = 256;

/// How many delivered response interaction ids the router remembers per
/// link for duplicate suppression, evicting oldest-first.
pub const ROUTER_DEDUP_CAPACITY: usize = 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_ordered() {
        // The presence wait dominates; handshake and negotiation fit inside it
        assert!(SIGNALING_CONNECT_TIMEOUT < NEGOTIATION_TIMEOUT);
        assert!(NEGOTIATION_TIMEOUT < PEER_PRESENCE_TIMEOUT);
    }

    #[test]
    fn test_retry_policy_is_bounded() {
        assert!(MAX_RECONNECT_ATTEMPTS >= 1);
        assert!(MAX_RECONNECT_ATTEMPTS <= 10);
        assert!(RECONNECT_DELAY >= Duration::from_millis(500));
    }

    #[test]
    fn test_queue_capacities_are_positive() {
        assert!(SIGNALING_EVENT_CAPACITY > 0);
        assert!(TRANSPORT_INBOUND_CAPACITY > 0);
        assert!(ROUTER_DEDUP_CAPACITY >= ROUTER_STREAM_CAPACITY);
    }
}
