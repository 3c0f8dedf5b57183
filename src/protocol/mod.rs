//! Message Protocol Codec.
//!
//! Maps between data-channel bytes (JSON) and [`MessageEnvelope`] variants.
//! Decoding is content-based polymorphic: the structural `items` marker is
//! consulted first, then the `discriminator` string. Unknown discriminators
//! decode to [`MessageEnvelope::Unrecognized`] instead of failing, and
//! encoding is the exact structural inverse (round-trip law).
//!
//! The codec is an explicitly constructed, immutable value — components that
//! need it receive an instance, there is no global serializer state.

// Rust guideline compliant 2026-02

pub mod messages;

use serde_json::{Map, Value};

use messages::{
    DappRequest, DappResponseFailure, DappResponseSuccess, LedgerCommand, LedgerRequest,
    LedgerResponseError, LedgerResponseSuccess, MessageEnvelope, UnrecognizedMessage,
};

const DISCRIMINATOR: &str = "discriminator";
const ITEMS: &str = "items";
const INTERACTION_ID: &str = "interactionId";
const SUCCESS: &str = "success";
const ERROR: &str = "error";

const DAPP_SUCCESS: &str = "success";
const DAPP_FAILURE: &str = "failure";
const LEDGER_ERROR: &str = "error";

/// Failed to decode or encode a message envelope.
#[derive(Debug)]
pub enum CodecError {
    /// Input was not valid JSON.
    Json(String),
    /// Top level was valid JSON but not an object.
    NotAnObject,
    /// Variant was selected but its required fields are missing or mistyped.
    Shape { variant: &'static str, detail: String },
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(detail) => write!(f, "message is not valid JSON: {detail}"),
            Self::NotAnObject => write!(f, "message envelope must be a JSON object"),
            Self::Shape { variant, detail } => {
                write!(f, "malformed {variant} envelope: {detail}")
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// The codec instance. Stateless; construct once and share by reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec;

impl MessageCodec {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Decode data-channel bytes into a typed envelope.
    ///
    /// # Errors
    ///
    /// [`CodecError`] only for unparseable input or a selected variant with
    /// broken required fields. Unknown discriminators are not errors; they
    /// yield [`MessageEnvelope::Unrecognized`].
    pub fn decode(&self, bytes: &[u8]) -> Result<MessageEnvelope, CodecError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Json(e.to_string()))?;
        let Some(object) = value.as_object() else {
            return Err(CodecError::NotAnObject);
        };

        let discriminator = object.get(DISCRIMINATOR).and_then(Value::as_str);

        // Content first: the items marker selects the dApp request shape
        // before any discriminator is consulted.
        if object.contains_key(ITEMS) && discriminator.is_none() {
            let request: DappRequest = serde_json::from_value(value.clone()).map_err(|e| {
                CodecError::Shape {
                    variant: "dApp request",
                    detail: e.to_string(),
                }
            })?;
            return Ok(MessageEnvelope::DappRequest(request));
        }

        match discriminator {
            Some(DAPP_SUCCESS) => {
                let response: DappResponseSuccess =
                    serde_json::from_value(value.clone()).map_err(|e| CodecError::Shape {
                        variant: "dApp success response",
                        detail: e.to_string(),
                    })?;
                Ok(MessageEnvelope::DappResponseSuccess(response))
            }
            Some(DAPP_FAILURE) => {
                let response: DappResponseFailure =
                    serde_json::from_value(value.clone()).map_err(|e| CodecError::Shape {
                        variant: "dApp failure response",
                        detail: e.to_string(),
                    })?;
                Ok(MessageEnvelope::DappResponseFailure(response))
            }
            Some(LEDGER_ERROR) => {
                let (interaction_id, error) = decode_error_body(object, "ledger error response")?;
                Ok(MessageEnvelope::LedgerResponseError(LedgerResponseError {
                    command: None,
                    interaction_id,
                    error,
                }))
            }
            Some(other) => match LedgerCommand::from_discriminator(other) {
                Some(command) => decode_ledger(command, object),
                None => Ok(MessageEnvelope::Unrecognized(UnrecognizedMessage {
                    discriminator: Some(other.to_string()),
                    raw: value,
                })),
            },
            None => Ok(MessageEnvelope::Unrecognized(UnrecognizedMessage {
                discriminator: None,
                raw: value,
            })),
        }
    }

    /// Encode a typed envelope to data-channel bytes. Exact inverse of
    /// [`decode`](Self::decode): decoding the output reproduces the input.
    ///
    /// # Errors
    ///
    /// [`CodecError::Json`] only if serialization itself fails.
    pub fn encode(&self, envelope: &MessageEnvelope) -> Result<Vec<u8>, CodecError> {
        let value = self.encode_value(envelope)?;
        serde_json::to_vec(&value).map_err(|e| CodecError::Json(e.to_string()))
    }

    fn encode_value(&self, envelope: &MessageEnvelope) -> Result<Value, CodecError> {
        let to_value = |v: Result<Value, serde_json::Error>| {
            v.map_err(|e| CodecError::Json(e.to_string()))
        };

        match envelope {
            MessageEnvelope::DappRequest(m) => to_value(serde_json::to_value(m)),
            MessageEnvelope::DappResponseSuccess(m) => {
                let mut object = object_of(to_value(serde_json::to_value(m))?);
                object.insert(DISCRIMINATOR.into(), Value::String(DAPP_SUCCESS.into()));
                Ok(Value::Object(object))
            }
            MessageEnvelope::DappResponseFailure(m) => {
                let mut object = object_of(to_value(serde_json::to_value(m))?);
                object.insert(DISCRIMINATOR.into(), Value::String(DAPP_FAILURE.into()));
                Ok(Value::Object(object))
            }
            MessageEnvelope::LedgerRequest(m) => {
                let mut object = m.params.clone();
                object.insert(
                    DISCRIMINATOR.into(),
                    Value::String(m.command.as_str().into()),
                );
                object.insert(INTERACTION_ID.into(), Value::String(m.interaction_id.clone()));
                Ok(Value::Object(object))
            }
            MessageEnvelope::LedgerResponseSuccess(m) => {
                let mut object = Map::new();
                object.insert(
                    DISCRIMINATOR.into(),
                    Value::String(m.command.as_str().into()),
                );
                object.insert(INTERACTION_ID.into(), Value::String(m.interaction_id.clone()));
                object.insert(SUCCESS.into(), m.success.clone());
                Ok(Value::Object(object))
            }
            MessageEnvelope::LedgerResponseError(m) => {
                let mut object = Map::new();
                let discriminator = m
                    .command
                    .map_or(LEDGER_ERROR, |c| c.as_str())
                    .to_string();
                object.insert(DISCRIMINATOR.into(), Value::String(discriminator));
                object.insert(INTERACTION_ID.into(), Value::String(m.interaction_id.clone()));
                object.insert(ERROR.into(), to_value(serde_json::to_value(&m.error))?);
                Ok(Value::Object(object))
            }
            // Preserved verbatim: re-encoding an unknown message is lossless
            MessageEnvelope::Unrecognized(m) => Ok(m.raw.clone()),
        }
    }
}

fn object_of(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(object) => object,
        // Serialized from a struct; always an object
        _ => Map::new(),
    }
}

fn decode_error_body(
    object: &Map<String, Value>,
    variant: &'static str,
) -> Result<(String, messages::ErrorDetail), CodecError> {
    let interaction_id = object
        .get(INTERACTION_ID)
        .and_then(Value::as_str)
        .ok_or(CodecError::Shape {
            variant,
            detail: "missing interactionId".to_string(),
        })?
        .to_string();
    let error = object.get(ERROR).cloned().ok_or(CodecError::Shape {
        variant,
        detail: "missing error body".to_string(),
    })?;
    let error: messages::ErrorDetail =
        serde_json::from_value(error).map_err(|e| CodecError::Shape {
            variant,
            detail: e.to_string(),
        })?;
    Ok((interaction_id, error))
}

/// Decode a command-discriminated ledger envelope: `success` body wins,
/// then `error`, otherwise it is an outgoing-style request.
fn decode_ledger(
    command: LedgerCommand,
    object: &Map<String, Value>,
) -> Result<MessageEnvelope, CodecError> {
    let interaction_id = object
        .get(INTERACTION_ID)
        .and_then(Value::as_str)
        .ok_or(CodecError::Shape {
            variant: "ledger envelope",
            detail: "missing interactionId".to_string(),
        })?
        .to_string();

    if let Some(success) = object.get(SUCCESS) {
        return Ok(MessageEnvelope::LedgerResponseSuccess(
            LedgerResponseSuccess {
                command,
                interaction_id,
                success: success.clone(),
            },
        ));
    }

    if object.contains_key(ERROR) {
        let (interaction_id, error) = decode_error_body(object, "ledger error response")?;
        return Ok(MessageEnvelope::LedgerResponseError(LedgerResponseError {
            command: Some(command),
            interaction_id,
            error,
        }));
    }

    let mut params = object.clone();
    params.remove(DISCRIMINATOR);
    params.remove(INTERACTION_ID);
    Ok(MessageEnvelope::LedgerRequest(LedgerRequest {
        command,
        interaction_id,
        params,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use messages::{ErrorDetail, LedgerDeviceModel};
    use serde_json::json;

    fn roundtrip(codec: &MessageCodec, envelope: &MessageEnvelope) {
        let bytes = codec.encode(envelope).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(&decoded, envelope);
    }

    #[test]
    fn test_items_marker_selects_dapp_request() {
        let codec = MessageCodec::new();
        let bytes = serde_json::to_vec(&json!({
            "interactionId": "i-1",
            "items": { "discriminator": "transaction", "send": {} },
            "metadata": { "origin": "https://dapp.example" },
        }))
        .unwrap();

        let envelope = codec.decode(&bytes).unwrap();
        let MessageEnvelope::DappRequest(request) = &envelope else {
            panic!("expected dApp request, got {envelope:?}");
        };
        assert_eq!(request.interaction_id, "i-1");
        // Nested discriminators inside items must not confuse selection
        assert_eq!(request.items["discriminator"], "transaction");

        roundtrip(&codec, &envelope);
    }

    #[test]
    fn test_dapp_success_and_failure_round_trip() {
        let codec = MessageCodec::new();

        roundtrip(
            &codec,
            &MessageEnvelope::DappResponseSuccess(DappResponseSuccess {
                interaction_id: "i-2".to_string(),
                items: json!({ "proof": "ok" }),
            }),
        );

        roundtrip(
            &codec,
            &MessageEnvelope::DappResponseFailure(DappResponseFailure {
                interaction_id: "i-3".to_string(),
                error: ErrorDetail {
                    code: 4,
                    message: "rejected by user".to_string(),
                },
            }),
        );
    }

    #[test]
    fn test_ledger_request_round_trip() {
        let codec = MessageCodec::new();
        let mut params = Map::new();
        params.insert("keysParameters".to_string(), json!([{ "curve": "curve25519" }]));
        params.insert("ledgerDevice".to_string(), json!({ "id": "ab".repeat(32) }));

        roundtrip(
            &codec,
            &MessageEnvelope::LedgerRequest(LedgerRequest {
                command: LedgerCommand::DerivePublicKeys,
                interaction_id: "i-4".to_string(),
                params,
            }),
        );
    }

    #[test]
    fn test_sign_transaction_success_decodes() {
        let codec = MessageCodec::new();
        let bytes = serde_json::to_vec(&json!({
            "discriminator": "signTransaction",
            "interactionId": "req-1",
            "success": [
                { "signature": "aa11", "derivedPublicKey":
                    { "curve": "curve25519", "publicKey": "bb22", "derivationPath": "m/44H" } }
            ],
        }))
        .unwrap();

        let envelope = codec.decode(&bytes).unwrap();
        let MessageEnvelope::LedgerResponseSuccess(response) = &envelope else {
            panic!("expected ledger success, got {envelope:?}");
        };
        assert_eq!(response.command, LedgerCommand::SignTransaction);
        assert_eq!(response.interaction_id, "req-1");

        roundtrip(&codec, &envelope);
    }

    #[test]
    fn test_device_info_success_with_absent_model() {
        let codec = MessageCodec::new();
        let bytes = serde_json::to_vec(&json!({
            "discriminator": "getDeviceInfo",
            "interactionId": "i-5",
            "success": { "id": "cd".repeat(32) },
        }))
        .unwrap();

        let MessageEnvelope::LedgerResponseSuccess(response) = codec.decode(&bytes).unwrap()
        else {
            panic!("expected ledger success");
        };
        let info = response.device_info().unwrap();
        assert_eq!(info.model, None);
    }

    #[test]
    fn test_device_info_success_with_model() {
        let codec = MessageCodec::new();
        let bytes = serde_json::to_vec(&json!({
            "discriminator": "getDeviceInfo",
            "interactionId": "i-5",
            "success": { "model": "nanoS", "id": "cd".repeat(32) },
        }))
        .unwrap();

        let MessageEnvelope::LedgerResponseSuccess(response) = codec.decode(&bytes).unwrap()
        else {
            panic!("expected ledger success");
        };
        assert_eq!(
            response.device_info().unwrap().model,
            Some(LedgerDeviceModel::NanoS)
        );
    }

    #[test]
    fn test_ledger_error_both_spellings_round_trip() {
        let codec = MessageCodec::new();

        // Bare "error" discriminator
        roundtrip(
            &codec,
            &MessageEnvelope::LedgerResponseError(LedgerResponseError {
                command: None,
                interaction_id: "i-6".to_string(),
                error: ErrorDetail {
                    code: 0,
                    message: "generic".to_string(),
                },
            }),
        );

        // Command-discriminated envelope with an error body
        roundtrip(
            &codec,
            &MessageEnvelope::LedgerResponseError(LedgerResponseError {
                command: Some(LedgerCommand::SignTransaction),
                interaction_id: "i-7".to_string(),
                error: ErrorDetail {
                    code: 2,
                    message: "user rejected signing of transaction".to_string(),
                },
            }),
        );
    }

    #[test]
    fn test_unknown_discriminator_is_unrecognized_not_error() {
        let codec = MessageCodec::new();
        let original = json!({
            "discriminator": "quantumSign",
            "interactionId": "i-8",
            "payload": { "x": 1 },
        });
        let bytes = serde_json::to_vec(&original).unwrap();

        let envelope = codec.decode(&bytes).unwrap();
        let MessageEnvelope::Unrecognized(unrecognized) = &envelope else {
            panic!("expected unrecognized, got {envelope:?}");
        };
        assert_eq!(unrecognized.discriminator.as_deref(), Some("quantumSign"));
        assert_eq!(unrecognized.raw, original);

        // Lossless: re-encoding reproduces the original bytes' value
        let reencoded = codec.encode(&envelope).unwrap();
        let reencoded: Value = serde_json::from_slice(&reencoded).unwrap();
        assert_eq!(reencoded, original);
    }

    #[test]
    fn test_missing_discriminator_without_items_is_unrecognized() {
        let codec = MessageCodec::new();
        let bytes = serde_json::to_vec(&json!({ "interactionId": "i-9" })).unwrap();

        let envelope = codec.decode(&bytes).unwrap();
        assert!(matches!(
            envelope,
            MessageEnvelope::Unrecognized(UnrecognizedMessage { discriminator: None, .. })
        ));
    }

    #[test]
    fn test_invalid_json_is_codec_error() {
        let codec = MessageCodec::new();
        assert!(matches!(codec.decode(b"not json"), Err(CodecError::Json(_))));
        assert!(matches!(codec.decode(b"[1,2]"), Err(CodecError::NotAnObject)));
    }

    #[test]
    fn test_ledger_envelope_without_interaction_id_is_shape_error() {
        let codec = MessageCodec::new();
        let bytes = serde_json::to_vec(&json!({ "discriminator": "getDeviceInfo" })).unwrap();
        assert!(matches!(
            codec.decode(&bytes),
            Err(CodecError::Shape { .. })
        ));
    }
}
