//! OCPP-J message envelope framing
//!
//! OCPP-J carries every exchange as a JSON array over WebSocket:
//! - CALL: [2, messageId, action, payload]
//! - CALLRESULT: [3, messageId, payload]
//! - CALLERROR: [4, messageId, errorCode, errorDescription, errorDetails]
//!
//! The discriminator and arity are the same for every protocol version; only
//! the spelling of some error codes differs (see `ErrorCode::wire_name`).

use serde_json::{json, Value};
use thiserror::Error;

use crate::error::{ErrorCode, Fault};
use crate::schema::{Extensions, Payload, Request, SchemaError};
use crate::types::{CorrelationId, ProtocolVersion};

/// OCPP message type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl MessageType {
    pub fn from_discriminator(value: u64) -> Option<Self> {
        match value {
            2 => Some(MessageType::Call),
            3 => Some(MessageType::CallResult),
            4 => Some(MessageType::CallError),
            _ => None,
        }
    }

    /// Number of array elements the envelope must have
    pub fn arity(self) -> usize {
        match self {
            MessageType::Call => 4,
            MessageType::CallResult => 3,
            MessageType::CallError => 5,
        }
    }
}

/// Reason an envelope could not be unframed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatErrorKind {
    InvalidJson,
    NotAnArray,
    InvalidMessageType,
    WrongArity,
    InvalidCorrelationId,
    InvalidAction,
    InvalidErrorCode,
    InvalidErrorDescription,
}

impl FormatErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FormatErrorKind::InvalidJson => "invalid_json",
            FormatErrorKind::NotAnArray => "not_an_array",
            FormatErrorKind::InvalidMessageType => "invalid_message_type",
            FormatErrorKind::WrongArity => "wrong_arity",
            FormatErrorKind::InvalidCorrelationId => "invalid_message_id",
            FormatErrorKind::InvalidAction => "invalid_action",
            FormatErrorKind::InvalidErrorCode => "invalid_error_code",
            FormatErrorKind::InvalidErrorDescription => "invalid_error_description",
        }
    }
}

/// Unframing failure
///
/// Carries whatever could be salvaged from the frame so a CALLERROR can be
/// built without the original bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{detail}")]
pub struct FormatError {
    pub kind: FormatErrorKind,
    pub correlation_id: Option<CorrelationId>,
    pub message_type: Option<MessageType>,
    pub detail: String,
}

impl FormatError {
    fn new(kind: FormatErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            correlation_id: None,
            message_type: None,
            detail: detail.into(),
        }
    }

    fn salvaged(
        mut self,
        correlation_id: Option<CorrelationId>,
        message_type: Option<MessageType>,
    ) -> Self {
        self.correlation_id = correlation_id;
        self.message_type = message_type;
        self
    }

    /// Wire code this failure maps to
    pub fn error_code(&self) -> ErrorCode {
        Fault::from_format_error(self).code
    }

    /// Whether the receiver should answer with a CALLERROR
    ///
    /// Broken CALLRESULT/CALLERROR frames are never answered.
    pub fn should_reply(&self) -> bool {
        !matches!(
            self.message_type,
            Some(MessageType::CallResult) | Some(MessageType::CallError)
        )
    }

    /// CALLERROR answering this frame (`"-1"` when the id was unreadable)
    pub fn to_call_error(&self) -> CallError {
        let id = self
            .correlation_id
            .clone()
            .unwrap_or_else(CorrelationId::unknown);
        CallError::from_fault(id, Fault::from_format_error(self))
    }
}

/// OCPP CALL message (request)
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub correlation_id: CorrelationId,
    pub action: String,
    pub payload: Value,
}

impl Call {
    pub fn new(correlation_id: CorrelationId, action: impl Into<String>, payload: Value) -> Self {
        Self {
            correlation_id,
            action: action.into(),
            payload,
        }
    }

    /// Build a CALL from a typed request
    pub fn from_request<R: Request>(
        correlation_id: CorrelationId,
        request: &R,
        ext: &Extensions,
    ) -> Self {
        Self::new(correlation_id, R::ACTION, request.to_document(ext))
    }

    /// Parse the payload as a specific request type
    pub fn parse_payload<R: Request>(&self, version: ProtocolVersion) -> Result<R, SchemaError> {
        R::try_parse(&self.payload, version)
    }
}

/// OCPP CALLRESULT message (success response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub correlation_id: CorrelationId,
    pub payload: Value,
}

impl CallResult {
    pub fn new(correlation_id: CorrelationId, payload: Value) -> Self {
        Self {
            correlation_id,
            payload,
        }
    }

    pub fn from_response<P: Payload>(
        correlation_id: CorrelationId,
        response: &P,
        ext: &Extensions,
    ) -> Self {
        Self::new(correlation_id, response.to_document(ext))
    }

    /// Parse the payload as a specific response type
    pub fn parse_payload<P: Payload>(&self, version: ProtocolVersion) -> Result<P, SchemaError> {
        P::try_parse(&self.payload, version)
    }
}

/// OCPP CALLERROR message (error response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub correlation_id: CorrelationId,
    pub error_code: ErrorCode,
    pub error_description: String,
    pub error_details: Value,
}

impl CallError {
    pub fn new(
        correlation_id: CorrelationId,
        error_code: ErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            error_code,
            error_description: error_description.into(),
            error_details: json!({}),
        }
    }

    pub fn from_fault(correlation_id: CorrelationId, fault: Fault) -> Self {
        Self {
            correlation_id,
            error_code: fault.code,
            error_description: fault.description,
            error_details: fault.details,
        }
    }

    pub fn into_fault(self) -> Fault {
        Fault {
            code: self.error_code,
            description: self.error_description,
            details: self.error_details,
        }
    }
}

/// Any OCPP-J envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

impl Envelope {
    pub fn message_type(&self) -> MessageType {
        match self {
            Envelope::Call(_) => MessageType::Call,
            Envelope::CallResult(_) => MessageType::CallResult,
            Envelope::CallError(_) => MessageType::CallError,
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        match self {
            Envelope::Call(c) => &c.correlation_id,
            Envelope::CallResult(r) => &r.correlation_id,
            Envelope::CallError(e) => &e.correlation_id,
        }
    }

    /// Frame into the OCPP-J array form
    ///
    /// `version` only affects the spelling of CALLERROR codes.
    pub fn frame(&self, version: ProtocolVersion) -> Value {
        match self {
            Envelope::Call(c) => json!([
                MessageType::Call as u8,
                c.correlation_id.as_str(),
                &c.action,
                &c.payload
            ]),
            Envelope::CallResult(r) => json!([
                MessageType::CallResult as u8,
                r.correlation_id.as_str(),
                &r.payload
            ]),
            Envelope::CallError(e) => json!([
                MessageType::CallError as u8,
                e.correlation_id.as_str(),
                e.error_code.wire_name(version),
                &e.error_description,
                &e.error_details
            ]),
        }
    }

    /// Frame and render as JSON text
    pub fn to_text(&self, version: ProtocolVersion) -> String {
        self.frame(version).to_string()
    }

    /// Parse an envelope from JSON text
    pub fn parse(text: &str) -> Result<Self, FormatError> {
        let doc: Value = serde_json::from_str(text)
            .map_err(|e| {
                FormatError::new(FormatErrorKind::InvalidJson, format!("invalid JSON: {e}"))
            })?;
        Self::unframe(&doc)
    }

    /// Unframe a parsed JSON document
    pub fn unframe(doc: &Value) -> Result<Self, FormatError> {
        let array = doc
            .as_array()
            .ok_or_else(|| {
                FormatError::new(FormatErrorKind::NotAnArray, "message is not a JSON array")
            })?;

        // Salvage the id early so every later error can still be answered
        let salvaged_id = array
            .get(1)
            .and_then(Value::as_str)
            .and_then(|s| CorrelationId::new(s).ok());

        let message_type = array
            .first()
            .and_then(Value::as_u64)
            .and_then(MessageType::from_discriminator)
            .ok_or_else(|| {
                let found = array.first().map(Value::to_string).unwrap_or_else(|| "nothing".into());
                FormatError::new(
                    FormatErrorKind::InvalidMessageType,
                    format!("unknown message type {found}"),
                )
                .salvaged(salvaged_id.clone(), None)
            })?;

        let fail = |kind: FormatErrorKind, detail: String| {
            FormatError::new(kind, detail).salvaged(salvaged_id.clone(), Some(message_type))
        };

        if array.len() != message_type.arity() {
            return Err(fail(
                FormatErrorKind::WrongArity,
                format!(
                    "{:?} must have {} elements, found {}",
                    message_type,
                    message_type.arity(),
                    array.len()
                ),
            ));
        }

        let correlation_id = salvaged_id.clone().ok_or_else(|| {
            fail(
                FormatErrorKind::InvalidCorrelationId,
                format!("message id must be a non-empty string, found {}", array[1]),
            )
        })?;

        match message_type {
            MessageType::Call => {
                let action = array[2]
                    .as_str()
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| {
                        fail(
                            FormatErrorKind::InvalidAction,
                            format!("action must be a non-empty string, found {}", array[2]),
                        )
                    })?;

                Ok(Envelope::Call(Call {
                    correlation_id,
                    action: action.to_string(),
                    payload: array[3].clone(),
                }))
            }
            MessageType::CallResult => Ok(Envelope::CallResult(CallResult {
                correlation_id,
                payload: array[2].clone(),
            })),
            MessageType::CallError => {
                let code = array[2].as_str().ok_or_else(|| {
                    fail(
                        FormatErrorKind::InvalidErrorCode,
                        format!("error code must be a string, found {}", array[2]),
                    )
                })?;
                let description = array[3].as_str().ok_or_else(|| {
                    fail(
                        FormatErrorKind::InvalidErrorDescription,
                        format!("error description must be a string, found {}", array[3]),
                    )
                })?;

                Ok(Envelope::CallError(CallError {
                    correlation_id,
                    error_code: ErrorCode::from_wire_lossy(code),
                    error_description: description.to_string(),
                    error_details: array[4].clone(),
                }))
            }
        }
    }
}

impl From<Call> for Envelope {
    fn from(call: Call) -> Self {
        Envelope::Call(call)
    }
}

impl From<CallResult> for Envelope {
    fn from(result: CallResult) -> Self {
        Envelope::CallResult(result)
    }
}

impl From<CallError> for Envelope {
    fn from(error: CallError) -> Self {
        Envelope::CallError(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> CorrelationId {
        CorrelationId::new(s).unwrap()
    }

    #[test]
    fn test_call_framing_is_bit_exact() {
        let call = Envelope::Call(Call::new(id("100000"), "Heartbeat", json!({})));
        assert_eq!(call.to_text(ProtocolVersion::V16), r#"[2,"100000","Heartbeat",{}]"#);

        let result =
            Envelope::CallResult(CallResult::new(id("100000"), json!({"status": "Accepted"})));
        assert_eq!(
            result.to_text(ProtocolVersion::V201),
            r#"[3,"100000",{"status":"Accepted"}]"#
        );
    }

    #[test]
    fn test_call_error_framing_per_version() {
        let err =
            Envelope::CallError(CallError::new(id("7"), ErrorCode::FormationViolation, "bad"));
        assert_eq!(
            err.to_text(ProtocolVersion::V16),
            r#"[4,"7","FormationViolation","bad",{}]"#
        );
        assert_eq!(
            err.to_text(ProtocolVersion::V21),
            r#"[4,"7","FormatViolation","bad",{}]"#
        );
    }

    #[test]
    fn test_call_parsing() {
        let msg = Envelope::parse(r#"[2, "msg-123", "Heartbeat", {}]"#).unwrap();
        match msg {
            Envelope::Call(call) => {
                assert_eq!(call.correlation_id.as_str(), "msg-123");
                assert_eq!(call.action, "Heartbeat");
                assert_eq!(call.payload, json!({}));
            }
            _ => panic!("Expected Call"),
        }
    }

    #[test]
    fn test_call_result_parsing() {
        let msg =
            Envelope::parse(r#"[3, "msg-123", {"currentTime": "2026-01-20T12:00:00Z"}]"#).unwrap();
        match msg {
            Envelope::CallResult(result) => {
                assert_eq!(result.correlation_id.as_str(), "msg-123");
                assert_eq!(result.payload["currentTime"], "2026-01-20T12:00:00Z");
            }
            _ => panic!("Expected CallResult"),
        }
    }

    #[test]
    fn test_call_error_parsing() {
        let msg =
            Envelope::parse(r#"[4, "msg-123", "NotImplemented", "Action not supported", {}]"#)
                .unwrap();
        match msg {
            Envelope::CallError(error) => {
                assert_eq!(error.correlation_id.as_str(), "msg-123");
                assert_eq!(error.error_code, ErrorCode::NotImplemented);
                assert_eq!(error.error_description, "Action not supported");
            }
            _ => panic!("Expected CallError"),
        }
    }

    #[test]
    fn test_unknown_error_code_degrades() {
        let msg = Envelope::parse(r#"[4, "9", "Teapot", "", {}]"#).unwrap();
        match msg {
            Envelope::CallError(error) => assert_eq!(error.error_code, ErrorCode::GenericError),
            _ => panic!("Expected CallError"),
        }
    }

    #[test]
    fn test_wrong_arity_is_formation_violation() {
        let err = Envelope::parse(r#"[2, "1"]"#).unwrap_err();
        assert_eq!(err.kind, FormatErrorKind::WrongArity);
        assert_eq!(err.error_code(), ErrorCode::FormationViolation);
        assert_eq!(err.correlation_id, Some(id("1")));
        assert!(err.should_reply());

        let reply = err.to_call_error();
        assert_eq!(reply.correlation_id.as_str(), "1");
        assert_eq!(reply.error_code, ErrorCode::FormationViolation);
    }

    #[test]
    fn test_bad_discriminator_is_protocol_error() {
        for text in [r#"[7, "1", {}]"#, r#"["2", "1", "Heartbeat", {}]"#, "[]"] {
            let err = Envelope::parse(text).unwrap_err();
            assert_eq!(err.kind, FormatErrorKind::InvalidMessageType, "{text}");
            assert_eq!(err.error_code(), ErrorCode::ProtocolError);
            assert!(err.should_reply());
        }
    }

    #[test]
    fn test_non_string_id_and_action() {
        let err = Envelope::parse(r#"[2, 17, "Heartbeat", {}]"#).unwrap_err();
        assert_eq!(err.kind, FormatErrorKind::InvalidCorrelationId);
        assert_eq!(err.error_code(), ErrorCode::FormationViolation);
        assert_eq!(err.to_call_error().correlation_id.as_str(), "-1");

        let err = Envelope::parse(r#"[2, "", "Heartbeat", {}]"#).unwrap_err();
        assert_eq!(err.kind, FormatErrorKind::InvalidCorrelationId);

        let err = Envelope::parse(r#"[2, "5", 42, {}]"#).unwrap_err();
        assert_eq!(err.kind, FormatErrorKind::InvalidAction);
        assert_eq!(err.correlation_id, Some(id("5")));

        let err = Envelope::parse(r#"[2, "5", "", {}]"#).unwrap_err();
        assert_eq!(err.kind, FormatErrorKind::InvalidAction);
    }

    #[test]
    fn test_garbage_input() {
        let err = Envelope::parse("not json").unwrap_err();
        assert_eq!(err.kind, FormatErrorKind::InvalidJson);
        assert_eq!(err.error_code(), ErrorCode::FormationViolation);

        let err = Envelope::parse(r#"{"id": 1}"#).unwrap_err();
        assert_eq!(err.kind, FormatErrorKind::NotAnArray);
    }

    #[test]
    fn test_broken_responses_are_not_answered() {
        let err = Envelope::parse(r#"[3, "1"]"#).unwrap_err();
        assert_eq!(err.message_type, Some(MessageType::CallResult));
        assert!(!err.should_reply());

        let err = Envelope::parse(r#"[4, "1", 5, "x", {}]"#).unwrap_err();
        assert_eq!(err.kind, FormatErrorKind::InvalidErrorCode);
        assert!(!err.should_reply());
    }

    #[test]
    fn test_frame_unframe_identity() {
        let envelopes = vec![
            Envelope::Call(Call::new(id("a"), "Authorize", json!({"idTag": "X"}))),
            Envelope::CallResult(CallResult::new(id("b"), json!({}))),
            Envelope::CallError(CallError::new(id("c"), ErrorCode::SecurityError, "denied")),
        ];
        for env in envelopes {
            for version in ProtocolVersion::ALL {
                assert_eq!(Envelope::unframe(&env.frame(version)).unwrap(), env);
            }
        }
    }
}
