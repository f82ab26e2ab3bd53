//! Error taxonomy for the OCPP-J engine
//!
//! Two families:
//! - wire-visible: `ErrorCode` + `Fault`, carried by a CALLERROR
//! - local-only: `CallFailure`, delivered to the issuer of an outbound call
//!   and never serialized
//!
//! ## Fault mapping
//!
//! | Cause | Code |
//! |-------|------|
//! | invalid JSON, not an array, wrong arity, bad id/action/error fields | FormationViolation |
//! | missing or unknown message type discriminator | ProtocolError |
//! | action not in the version vocabulary | NotImplemented |
//! | action known but no handler bound | NotSupported |
//! | request payload rejected by its schema | FormationViolation |
//! | `HandlerError::NotSupported` | NotSupported |
//! | `HandlerError::Security` | SecurityError |
//! | `HandlerError::Rejected { code, .. }` | `code` |
//! | `HandlerError::Internal`, handler panic | InternalError |

use std::fmt;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

use crate::messages::{FormatError, FormatErrorKind};
use crate::schema::SchemaError;
use crate::types::{NetworkIdentity, ProtocolVersion};

/// OCPP-J CALLERROR codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurrenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 10] = [
        ErrorCode::NotImplemented,
        ErrorCode::NotSupported,
        ErrorCode::InternalError,
        ErrorCode::ProtocolError,
        ErrorCode::SecurityError,
        ErrorCode::FormationViolation,
        ErrorCode::PropertyConstraintViolation,
        ErrorCode::OccurrenceConstraintViolation,
        ErrorCode::TypeConstraintViolation,
        ErrorCode::GenericError,
    ];

    /// Spelling on the wire for a protocol generation
    ///
    /// 1.6 keeps its historical `FormationViolation` and
    /// `OccurenceConstraintViolation`; 2.x renamed both.
    pub fn wire_name(self, version: ProtocolVersion) -> &'static str {
        match (self, version.is_v2()) {
            (ErrorCode::FormationViolation, false) => "FormationViolation",
            (ErrorCode::FormationViolation, true) => "FormatViolation",
            (ErrorCode::OccurrenceConstraintViolation, false) => "OccurenceConstraintViolation",
            (ErrorCode::OccurrenceConstraintViolation, true) => "OccurrenceConstraintViolation",
            (code, _) => code.canonical_name(),
        }
    }

    fn canonical_name(self) -> &'static str {
        match self {
            ErrorCode::NotImplemented => "NotImplemented",
            ErrorCode::NotSupported => "NotSupported",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::ProtocolError => "ProtocolError",
            ErrorCode::SecurityError => "SecurityError",
            ErrorCode::FormationViolation => "FormationViolation",
            ErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            ErrorCode::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            ErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
            ErrorCode::GenericError => "GenericError",
        }
    }

    /// Parse any known spelling, case-insensitively
    pub fn from_wire(text: &str) -> Option<Self> {
        if let Some(code) = Self::ALL
            .into_iter()
            .find(|c| c.canonical_name().eq_ignore_ascii_case(text))
        {
            return Some(code);
        }
        const ALIASES: &[(&str, ErrorCode)] = &[
            ("FormatViolation", ErrorCode::FormationViolation),
            ("OccurenceConstraintViolation", ErrorCode::OccurrenceConstraintViolation),
            ("MessageTypeNotSupported", ErrorCode::ProtocolError),
            ("RpcFrameworkError", ErrorCode::ProtocolError),
        ];
        ALIASES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(text))
            .map(|(_, code)| *code)
    }

    /// Parse a received code; unrecognised codes degrade to `GenericError`
    pub fn from_wire_lossy(text: &str) -> Self {
        Self::from_wire(text).unwrap_or(ErrorCode::GenericError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// A failure that crosses the transport boundary as a CALLERROR
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub code: ErrorCode,
    pub description: String,
    pub details: Value,
}

impl Fault {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            details: json!({}),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn not_implemented(action: &str) -> Self {
        Self::new(
            ErrorCode::NotImplemented,
            format!("Unknown action {action}"),
        )
        .with_details(json!({ "action": action }))
    }

    pub fn not_supported(action: &str) -> Self {
        Self::new(
            ErrorCode::NotSupported,
            format!("Action {action} is not supported"),
        )
        .with_details(json!({ "action": action }))
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, description)
    }

    /// Envelope that could not be unframed
    pub fn from_format_error(err: &FormatError) -> Self {
        let code = match err.kind {
            FormatErrorKind::InvalidMessageType => ErrorCode::ProtocolError,
            _ => ErrorCode::FormationViolation,
        };
        Self::new(code, err.to_string()).with_details(json!({ "reason": err.kind.as_str() }))
    }

    /// Request payload rejected by its schema
    pub fn from_schema_error(action: &str, err: &SchemaError) -> Self {
        Self::new(
            ErrorCode::FormationViolation,
            format!("Payload for {action} is invalid: {err}"),
        )
        .with_details(json!({
            "field": err.path,
            "reason": err.kind.to_string(),
        }))
    }
}

impl From<HandlerError> for Fault {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::NotSupported(description) => {
                Fault::new(ErrorCode::NotSupported, description)
            }
            HandlerError::Security(description) => {
                Fault::new(ErrorCode::SecurityError, description)
            }
            HandlerError::Rejected {
                code,
                description,
                details,
            } => Fault::new(code, description).with_details(details),
            HandlerError::Internal(description) => Fault::internal(description),
        }
    }
}

/// Failure raised by an application handler
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("security error: {0}")]
    Security(String),

    #[error("{code}: {description}")]
    Rejected {
        code: ErrorCode,
        description: String,
        details: Value,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn rejected(code: ErrorCode, description: impl Into<String>) -> Self {
        HandlerError::Rejected {
            code,
            description: description.into(),
            details: json!({}),
        }
    }

    pub fn internal(description: impl Into<String>) -> Self {
        HandlerError::Internal(description.into())
    }
}

/// Local outcome of an outbound call that did not produce a response payload
#[derive(Debug, Error)]
pub enum CallFailure {
    #[error("peer answered {code}: {description}")]
    Remote {
        code: ErrorCode,
        description: String,
        details: Value,
    },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("destination {0} is unreachable")]
    Unreachable(NetworkIdentity),

    #[error("invalid response payload: {0}")]
    InvalidResponse(SchemaError),

    #[error("{0} calls already in flight")]
    TooManyInFlight(usize),

    #[error("action {action} is not part of OCPP {version}")]
    UnsupportedAction {
        action: &'static str,
        version: ProtocolVersion,
    },
}

impl CallFailure {
    /// True when the peer never answered (timeout or lost channel)
    pub fn is_unanswered(&self) -> bool {
        matches!(
            self,
            CallFailure::Timeout(_) | CallFailure::ConnectionLost(_) | CallFailure::Unreachable(_)
        )
    }

    pub fn remote_code(&self) -> Option<ErrorCode> {
        match self {
            CallFailure::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaErrorKind;

    #[test]
    fn test_wire_names_per_version() {
        assert_eq!(
            ErrorCode::FormationViolation.wire_name(ProtocolVersion::V16),
            "FormationViolation"
        );
        assert_eq!(
            ErrorCode::FormationViolation.wire_name(ProtocolVersion::V201),
            "FormatViolation"
        );
        assert_eq!(
            ErrorCode::OccurrenceConstraintViolation.wire_name(ProtocolVersion::V16),
            "OccurenceConstraintViolation"
        );
        assert_eq!(
            ErrorCode::NotImplemented.wire_name(ProtocolVersion::V21),
            "NotImplemented"
        );
    }

    #[test]
    fn test_from_wire_accepts_every_spelling() {
        for code in ErrorCode::ALL {
            for version in ProtocolVersion::ALL {
                assert_eq!(ErrorCode::from_wire(code.wire_name(version)), Some(code));
            }
        }
        assert_eq!(ErrorCode::from_wire("notimplemented"), Some(ErrorCode::NotImplemented));
        assert_eq!(
            ErrorCode::from_wire("RpcFrameworkError"),
            Some(ErrorCode::ProtocolError)
        );
        assert_eq!(ErrorCode::from_wire_lossy("Teapot"), ErrorCode::GenericError);
    }

    #[test]
    fn test_handler_error_mapping() {
        let cases = [
            (HandlerError::NotSupported("x".into()), ErrorCode::NotSupported),
            (HandlerError::Security("x".into()), ErrorCode::SecurityError),
            (HandlerError::internal("x"), ErrorCode::InternalError),
            (
                HandlerError::rejected(ErrorCode::PropertyConstraintViolation, "x"),
                ErrorCode::PropertyConstraintViolation,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(Fault::from(err).code, code);
        }
    }

    #[test]
    fn test_schema_error_fault_names_field() {
        let err = SchemaError::new("idToken.type", SchemaErrorKind::Missing);
        let fault = Fault::from_schema_error("Authorize", &err);
        assert_eq!(fault.code, ErrorCode::FormationViolation);
        assert_eq!(fault.details["field"], "idToken.type");
        assert!(fault.description.contains("idToken.type"));
    }

    #[test]
    fn test_unanswered_classification() {
        assert!(CallFailure::Timeout(Duration::from_millis(5)).is_unanswered());
        assert!(CallFailure::ConnectionLost("closed".into()).is_unanswered());
        let remote = CallFailure::Remote {
            code: ErrorCode::GenericError,
            description: String::new(),
            details: Value::Null,
        };
        assert!(!remote.is_unanswered());
        assert_eq!(remote.remote_code(), Some(ErrorCode::GenericError));
    }
}
