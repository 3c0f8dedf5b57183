//! Signaling wire DTOs.
//!
//! Everything that crosses the signaling WebSocket is defined here: the
//! envelope we send, the frames the server sends back, and the negotiation
//! payloads carried encrypted inside `remoteData` frames. The server never
//! sees plaintext negotiation data; it only relays envelopes and reports
//! peer presence.

// Rust guideline compliant 2026-02

use serde::{Deserialize, Serialize};

/// Role strings used in the rendezvous query and envelope `source` field.
pub const SOURCE_WALLET: &str = "wallet";
/// The peer role on the other side of every link.
pub const TARGET_EXTENSION: &str = "extension";

/// Envelope methods, shared by both directions of the protocol.
pub mod method {
    pub const OFFER: &str = "offer";
    pub const ANSWER: &str = "answer";
    pub const ICE_CANDIDATE: &str = "iceCandidate";
    pub const ICE_CANDIDATES: &str = "iceCandidates";
}

/// Server frame classifications (`info` field).
pub mod classification {
    pub const CONFIRMATION: &str = "confirmation";
    pub const REMOTE_DATA: &str = "remoteData";
    pub const REMOTE_CLIENT_JUST_CONNECTED: &str = "remoteClientJustConnected";
    pub const REMOTE_CLIENT_ALREADY_CONNECTED: &str = "remoteClientIsAlreadyConnected";
    pub const REMOTE_CLIENT_DISCONNECTED: &str = "remoteClientDisconnected";
    pub const MISSING_REMOTE_CLIENT_ERROR: &str = "missingRemoteClientError";
    pub const INVALID_MESSAGE_ERROR: &str = "invalidMessageError";
    pub const VALIDATION_ERROR: &str = "validationError";
}

/// One relayed message: the unit both peers exchange through the server.
///
/// `encrypted_payload` is the hex-encoded AES-GCM blob produced by
/// [`crate::crypto::encrypt`]; the envelope itself travels in the clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingEnvelope {
    pub request_id: String,
    pub method: String,
    pub source: String,
    pub connection_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target_client_id: Option<String>,
    pub encrypted_payload: String,
}

/// Raw frame from the signaling server.
///
/// The server multiplexes everything through one shape; `info` decides which
/// optional fields are populated.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFrame {
    pub info: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub remote_client_id: Option<String>,
    #[serde(default)]
    pub data: Option<SignalingEnvelope>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// SDP blob exchanged during negotiation (decrypted payload of an
/// `offer` / `answer` envelope).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescription {
    pub sdp: String,
}

/// One ICE candidate (decrypted payload element of an `iceCandidate(s)`
/// envelope). Field names match the browser RTCIceCandidateInit shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
}

/// Decrypted negotiation payload, keyed by the envelope's `method`.
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidates(Vec<IceCandidate>),
}

/// A signaling-protocol violation. Surfaced as an event rather than a silent
/// drop so callers can see misbehaving peers and servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingViolation {
    /// Server sent a classification we do not recognize.
    UnknownClassification { info: String },
    /// Envelope addressed to a different session (wrong `connectionId`) or
    /// from an unexpected `source`.
    CrossSession { field: &'static str, value: String },
    /// Frame or payload did not parse.
    Malformed { detail: String },
    /// Payload failed to decrypt (wrong key or corrupted relay).
    Undecryptable,
    /// Server reported the remote peer is not connected for a send of ours.
    MissingRemoteClient,
    /// Server rejected one of our messages.
    Rejected { info: String, detail: String },
    /// Peer sent a negotiation method that makes no sense for our role.
    UnexpectedMethod { method: String },
}

impl std::fmt::Display for SignalingViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownClassification { info } => {
                write!(f, "unknown server classification: {info}")
            }
            Self::CrossSession { field, value } => {
                write!(f, "cross-session envelope: unexpected {field} {value:?}")
            }
            Self::Malformed { detail } => write!(f, "malformed signaling message: {detail}"),
            Self::Undecryptable => write!(f, "signaling payload failed to decrypt"),
            Self::MissingRemoteClient => write!(f, "remote client not connected"),
            Self::Rejected { info, detail } => {
                write!(f, "server rejected message ({info}): {detail}")
            }
            Self::UnexpectedMethod { method } => {
                write!(f, "unexpected negotiation method: {method}")
            }
        }
    }
}

impl std::error::Error for SignalingViolation {}

/// Event stream yielded by the Signaling Client.
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// The remote peer is connected to the rendezvous (either it just
    /// arrived or it was already there when we connected).
    PeerPresent {
        /// Server-assigned id of the remote client, used as the
        /// `targetClientId` on subsequent sends when known.
        remote_client_id: Option<String>,
    },
    /// Remote answered our offer.
    RemoteAnswer(SessionDescription),
    /// Remote trickled ICE candidates.
    RemoteIceCandidates(Vec<IceCandidate>),
    /// The remote peer left the rendezvous.
    PeerDisconnected,
    /// Something on the wire violated the protocol. Never silent.
    ProtocolError(SignalingViolation),
}

/// Decode a decrypted negotiation payload according to the envelope method.
///
/// Both directions of the protocol decode: `iceCandidate` carries a single
/// candidate object, `iceCandidates` an array.
pub fn decode_negotiation_payload(
    method: &str,
    plaintext: &[u8],
) -> Result<NegotiationPayload, SignalingViolation> {
    let malformed = |e: serde_json::Error| SignalingViolation::Malformed {
        detail: format!("{method} payload: {e}"),
    };

    match method {
        method::OFFER => {
            let sdp: SessionDescription = serde_json::from_slice(plaintext).map_err(malformed)?;
            Ok(NegotiationPayload::Offer(sdp))
        }
        method::ANSWER => {
            let sdp: SessionDescription = serde_json::from_slice(plaintext).map_err(malformed)?;
            Ok(NegotiationPayload::Answer(sdp))
        }
        method::ICE_CANDIDATE => {
            let candidate: IceCandidate = serde_json::from_slice(plaintext).map_err(malformed)?;
            Ok(NegotiationPayload::IceCandidates(vec![candidate]))
        }
        method::ICE_CANDIDATES => {
            let candidates: Vec<IceCandidate> =
                serde_json::from_slice(plaintext).map_err(malformed)?;
            Ok(NegotiationPayload::IceCandidates(candidates))
        }
        other => Err(SignalingViolation::UnexpectedMethod {
            method: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_serializes_camel_case() {
        let envelope = SignalingEnvelope {
            request_id: "req-1".to_string(),
            method: method::OFFER.to_string(),
            source: SOURCE_WALLET.to_string(),
            connection_id: "abc".to_string(),
            target_client_id: Some("client-9".to_string()),
            encrypted_payload: "deadbeef".to_string(),
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "requestId": "req-1",
                "method": "offer",
                "source": "wallet",
                "connectionId": "abc",
                "targetClientId": "client-9",
                "encryptedPayload": "deadbeef",
            })
        );
    }

    #[test]
    fn test_envelope_omits_absent_target() {
        let envelope = SignalingEnvelope {
            request_id: "req-1".to_string(),
            method: method::OFFER.to_string(),
            source: SOURCE_WALLET.to_string(),
            connection_id: "abc".to_string(),
            target_client_id: None,
            encrypted_payload: "00".to_string(),
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert!(value.get("targetClientId").is_none());
    }

    #[test]
    fn test_server_frame_remote_data() {
        let frame: ServerFrame = serde_json::from_value(json!({
            "info": "remoteData",
            "remoteClientId": "client-9",
            "data": {
                "requestId": "req-2",
                "method": "answer",
                "source": "extension",
                "connectionId": "abc",
                "encryptedPayload": "beef",
            }
        }))
        .unwrap();

        assert_eq!(frame.info, classification::REMOTE_DATA);
        assert_eq!(frame.remote_client_id.as_deref(), Some("client-9"));
        let data = frame.data.unwrap();
        assert_eq!(data.method, method::ANSWER);
        assert_eq!(data.target_client_id, None);
    }

    #[test]
    fn test_server_frame_confirmation() {
        let frame: ServerFrame = serde_json::from_value(json!({
            "info": "confirmation",
            "requestId": "req-1",
        }))
        .unwrap();

        assert_eq!(frame.info, classification::CONFIRMATION);
        assert_eq!(frame.request_id.as_deref(), Some("req-1"));
        assert!(frame.data.is_none());
    }

    #[test]
    fn test_decode_answer_payload() {
        let plaintext = serde_json::to_vec(&json!({ "sdp": "v=0..." })).unwrap();
        let payload = decode_negotiation_payload(method::ANSWER, &plaintext).unwrap();
        assert_eq!(
            payload,
            NegotiationPayload::Answer(SessionDescription {
                sdp: "v=0...".to_string()
            })
        );
    }

    #[test]
    fn test_decode_single_and_plural_ice_candidates() {
        let single = serde_json::to_vec(&json!({
            "candidate": "candidate:1 1 udp 2122260223 10.0.0.1 50000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
        }))
        .unwrap();
        let NegotiationPayload::IceCandidates(candidates) =
            decode_negotiation_payload(method::ICE_CANDIDATE, &single).unwrap()
        else {
            panic!("expected candidates");
        };
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].sdp_m_line_index, Some(0));

        let plural = serde_json::to_vec(&json!([
            { "candidate": "candidate:1", "sdpMid": "0", "sdpMLineIndex": 0 },
            { "candidate": "candidate:2" },
        ]))
        .unwrap();
        let NegotiationPayload::IceCandidates(candidates) =
            decode_negotiation_payload(method::ICE_CANDIDATES, &plural).unwrap()
        else {
            panic!("expected candidates");
        };
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].sdp_mid, None);
    }

    #[test]
    fn test_decode_unknown_method_is_violation() {
        let err = decode_negotiation_payload("renegotiate", b"{}").unwrap_err();
        assert_eq!(
            err,
            SignalingViolation::UnexpectedMethod {
                method: "renegotiate".to_string()
            }
        );
    }

    #[test]
    fn test_decode_garbage_payload_is_malformed() {
        let err = decode_negotiation_payload(method::OFFER, b"not json").unwrap_err();
        assert!(matches!(err, SignalingViolation::Malformed { .. }));
    }
}
