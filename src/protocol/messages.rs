//! Application message envelope types.
//!
//! The closed set of variants exchanged over an open data channel. Every
//! variant carries an `interactionId` correlating requests with responses.
//! Payload bodies the wallet does not interpret (dApp interaction items,
//! ledger success payloads other than device info) stay as raw JSON values;
//! this layer owns framing, not application meaning.

// Rust guideline compliant 2026-02

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hardware-wallet command discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerCommand {
    GetDeviceInfo,
    DerivePublicKeys,
    SignTransaction,
    SignChallenge,
    DeriveAndDisplayAddress,
}

impl LedgerCommand {
    /// The wire discriminator string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetDeviceInfo => "getDeviceInfo",
            Self::DerivePublicKeys => "derivePublicKeys",
            Self::SignTransaction => "signTransaction",
            Self::SignChallenge => "signChallenge",
            Self::DeriveAndDisplayAddress => "deriveAndDisplayAddress",
        }
    }

    /// Reverse mapping; `None` for anything outside the closed set.
    #[must_use]
    pub fn from_discriminator(s: &str) -> Option<Self> {
        match s {
            "getDeviceInfo" => Some(Self::GetDeviceInfo),
            "derivePublicKeys" => Some(Self::DerivePublicKeys),
            "signTransaction" => Some(Self::SignTransaction),
            "signChallenge" => Some(Self::SignChallenge),
            "deriveAndDisplayAddress" => Some(Self::DeriveAndDisplayAddress),
            _ => None,
        }
    }
}

/// Error body carried by failure/error variants: numeric code plus message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: i64,
    pub message: String,
}

/// Hardware wallet device models reported by `getDeviceInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerDeviceModel {
    #[serde(rename = "nanoS")]
    NanoS,
    #[serde(rename = "nanoS+")]
    NanoSPlus,
    #[serde(rename = "nanoX")]
    NanoX,
}

/// Typed view of a `getDeviceInfo` success payload.
///
/// `model` stays `None` when the peer omitted it; absence is a domain state
/// the caller judges, never silently defaulted to a fixed model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub model: Option<LedgerDeviceModel>,
    pub id: String,
}

/// Incoming dApp interaction request. Selected structurally by the presence
/// of the `items` field, before any discriminator is consulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DappRequest {
    pub interaction_id: String,
    pub items: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// dApp interaction success response (`discriminator: "success"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DappResponseSuccess {
    pub interaction_id: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub items: Value,
}

/// dApp interaction failure response (`discriminator: "failure"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DappResponseFailure {
    pub interaction_id: String,
    pub error: ErrorDetail,
}

/// Outgoing hardware-wallet command. The command discriminator travels in
/// the `discriminator` field; remaining parameters are kept verbatim so the
/// envelope round-trips exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRequest {
    pub command: LedgerCommand,
    pub interaction_id: String,
    pub params: serde_json::Map<String, Value>,
}

/// Hardware-wallet success response: command discriminator plus a `success`
/// payload object.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerResponseSuccess {
    pub command: LedgerCommand,
    pub interaction_id: String,
    pub success: Value,
}

impl LedgerResponseSuccess {
    /// Decode the success payload as device info (for `getDeviceInfo`
    /// responses). `None` if the payload has a different shape.
    #[must_use]
    pub fn device_info(&self) -> Option<DeviceInfo> {
        if self.command != LedgerCommand::GetDeviceInfo {
            return None;
        }
        serde_json::from_value(self.success.clone()).ok()
    }
}

/// Hardware-wallet error response.
///
/// Two wire spellings exist: a bare `discriminator: "error"` envelope, and a
/// command-discriminated envelope carrying an `error` body instead of
/// `success`. `command` distinguishes them so encoding is exact.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerResponseError {
    pub command: Option<LedgerCommand>,
    pub interaction_id: String,
    pub error: ErrorDetail,
}

/// A message with an unknown discriminator. Preserved verbatim so one
/// unknown message never breaks a batch, and re-encoding is lossless.
#[derive(Debug, Clone, PartialEq)]
pub struct UnrecognizedMessage {
    pub discriminator: Option<String>,
    pub raw: Value,
}

/// The application-level envelope: the closed variant set plus the
/// guaranteed fallback arm.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageEnvelope {
    DappRequest(DappRequest),
    DappResponseSuccess(DappResponseSuccess),
    DappResponseFailure(DappResponseFailure),
    LedgerRequest(LedgerRequest),
    LedgerResponseSuccess(LedgerResponseSuccess),
    LedgerResponseError(LedgerResponseError),
    Unrecognized(UnrecognizedMessage),
}

impl MessageEnvelope {
    /// The correlation id, when the variant carries one.
    #[must_use]
    pub fn interaction_id(&self) -> Option<&str> {
        match self {
            Self::DappRequest(m) => Some(&m.interaction_id),
            Self::DappResponseSuccess(m) => Some(&m.interaction_id),
            Self::DappResponseFailure(m) => Some(&m.interaction_id),
            Self::LedgerRequest(m) => Some(&m.interaction_id),
            Self::LedgerResponseSuccess(m) => Some(&m.interaction_id),
            Self::LedgerResponseError(m) => Some(&m.interaction_id),
            Self::Unrecognized(m) => m.raw.get("interactionId").and_then(Value::as_str),
        }
    }

    /// Whether this is hardware-wallet traffic (for router fan-out).
    #[must_use]
    pub fn is_ledger(&self) -> bool {
        matches!(
            self,
            Self::LedgerRequest(_) | Self::LedgerResponseSuccess(_) | Self::LedgerResponseError(_)
        )
    }
}
