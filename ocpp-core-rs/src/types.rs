//! Core identifier and enumeration types for OCPP-J
//!
//! - `ProtocolVersion`: negotiated protocol generation of a connection
//! - `CorrelationId`: the unique-id slot of an envelope
//! - `NetworkIdentity`: charging station / networking node / CSMS identity
//! - `text_enum!`: closed string vocabularies with strict text mapping
//! - per-version action vocabularies

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// OCPP protocol generation, fixed per connection by subprotocol negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "1.6")]
    V16,
    #[serde(rename = "2.0.1")]
    V201,
    #[serde(rename = "2.1")]
    V21,
}

impl ProtocolVersion {
    pub const ALL: [ProtocolVersion; 3] = [
        ProtocolVersion::V16,
        ProtocolVersion::V201,
        ProtocolVersion::V21,
    ];

    /// WebSocket subprotocol token (`Sec-WebSocket-Protocol`)
    pub fn subprotocol(self) -> &'static str {
        match self {
            ProtocolVersion::V16 => "ocpp1.6",
            ProtocolVersion::V201 => "ocpp2.0.1",
            ProtocolVersion::V21 => "ocpp2.1",
        }
    }

    pub fn from_subprotocol(token: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.subprotocol().eq_ignore_ascii_case(token.trim()))
    }

    /// Pick the highest version offered in a comma-separated subprotocol header
    pub fn negotiate(offered: &str) -> Option<Self> {
        offered
            .split(',')
            .filter_map(Self::from_subprotocol)
            .max()
    }

    /// True for the 2.x generations (shared schema family)
    pub fn is_v2(self) -> bool {
        !matches!(self, ProtocolVersion::V16)
    }

    /// Multi-hop networking paths exist only in 2.1
    pub fn supports_network_paths(self) -> bool {
        matches!(self, ProtocolVersion::V21)
    }

    /// Action vocabulary of this generation
    pub fn actions(self) -> impl Iterator<Item = &'static str> {
        let (base, added): (&'static [&'static str], &'static [&'static str]) = match self {
            ProtocolVersion::V16 => (V16_ACTIONS, &[]),
            ProtocolVersion::V201 => (V201_ACTIONS, &[]),
            ProtocolVersion::V21 => (V201_ACTIONS, V21_ACTIONS),
        };
        base.iter().chain(added.iter()).copied()
    }

    pub fn knows_action(self, action: &str) -> bool {
        self.actions().any(|known| known == action)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V16 => write!(f, "1.6"),
            ProtocolVersion::V201 => write!(f, "2.0.1"),
            ProtocolVersion::V21 => write!(f, "2.1"),
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bare = trimmed
            .strip_prefix("ocpp")
            .or_else(|| trimmed.strip_prefix("OCPP"))
            .unwrap_or(trimmed);
        match bare {
            "1.6" | "16" => Ok(ProtocolVersion::V16),
            "2.0.1" | "201" => Ok(ProtocolVersion::V201),
            "2.1" | "21" => Ok(ProtocolVersion::V21),
            _ => Err(IdentifierError::UnknownVersion(s.to_string())),
        }
    }
}

/// Errors building identifier values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{kind} exceeds {max} characters")]
    TooLong { kind: &'static str, max: usize },

    #[error("unknown protocol version: {0}")]
    UnknownVersion(String),
}

/// Correlation id linking a Call to its CallResult/CallError
///
/// Opaque to the engine: ids received from a peer are echoed verbatim, so only
/// emptiness is rejected. Locally generated ids are UUIDv4 strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdentifierError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdentifierError::Empty("correlation id"));
        }
        Ok(Self(id))
    }

    /// Fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Placeholder used when answering a frame whose id could not be read
    pub fn unknown() -> Self {
        Self("-1".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Logical identity of an endpoint (station id, node id or CSMS id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkIdentity(String);

/// OCPP identity strings are limited to 48 characters
pub const MAX_IDENTITY_LEN: usize = 48;

impl NetworkIdentity {
    pub fn new(id: impl Into<String>) -> Result<Self, IdentifierError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdentifierError::Empty("network identity"));
        }
        if id.chars().count() > MAX_IDENTITY_LEN {
            return Err(IdentifierError::TooLong {
                kind: "network identity",
                max: MAX_IDENTITY_LEN,
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NetworkIdentity {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NetworkIdentity> for String {
    fn from(value: NetworkIdentity) -> Self {
        value.0
    }
}

impl fmt::Display for NetworkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NetworkIdentity {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// Closed string vocabularies
// ============================================================================

/// A closed string enumeration with strict text mapping
///
/// Implemented by `text_enum!`. Parsing is a case-insensitive exact match;
/// `as_str` always yields the canonical spelling.
pub trait TextEnum: Sized + Copy + Eq + std::hash::Hash + fmt::Debug + 'static {
    /// Name used in parse error messages
    const TYPE_NAME: &'static str;

    fn variants() -> &'static [Self];

    fn as_str(&self) -> &'static str;

    /// Value substituted for unrecognised text, when the protocol defines one
    fn fallback() -> Option<Self> {
        None
    }

    fn from_text(text: &str) -> Option<Self> {
        Self::variants()
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(text))
    }

    /// Strict parse, then the fallback (if any)
    fn from_text_or_fallback(text: &str) -> Option<Self> {
        Self::from_text(text).or_else(Self::fallback)
    }
}

/// Unrecognised text for a closed vocabulary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{value}' is not a valid {type_name}")]
pub struct UnknownVariant {
    pub type_name: &'static str,
    pub value: String,
}

/// Declare a closed string enumeration
///
/// ```
/// ocpp_core::text_enum! {
///     /// Example vocabulary
///     pub enum Colour fallback Other {
///         Red = "Red",
///         Other = "Other",
///     }
/// }
///
/// use ocpp_core::TextEnum;
/// assert_eq!(Colour::from_text("red"), Some(Colour::Red));
/// assert_eq!(Colour::from_text_or_fallback("Teal"), Some(Colour::Other));
/// ```
#[macro_export]
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident $(fallback $fallback:ident)? {
            $( $(#[$vmeta:meta])* $variant:ident = $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $crate::types::TextEnum for $name {
            const TYPE_NAME: &'static str = stringify!($name);

            fn variants() -> &'static [Self] {
                &[ $( $name::$variant, )+ ]
            }

            fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text, )+
                }
            }

            fn fallback() -> Option<Self> {
                None $( .or(Some($name::$fallback)) )?
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::types::TextEnum::as_str(self))
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::types::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$name as $crate::types::TextEnum>::from_text(s).ok_or_else(|| {
                    $crate::types::UnknownVariant {
                        type_name: stringify!($name),
                        value: s.to_string(),
                    }
                })
            }
        }
    };
}

// ============================================================================
// Action vocabularies
// ============================================================================

/// OCPP 1.6 core and feature profiles, plus the security whitepaper actions
pub const V16_ACTIONS: &[&str] = &[
    "Authorize",
    "BootNotification",
    "CancelReservation",
    "CertificateSigned",
    "ChangeAvailability",
    "ChangeConfiguration",
    "ClearCache",
    "ClearChargingProfile",
    "DataTransfer",
    "DeleteCertificate",
    "DiagnosticsStatusNotification",
    "ExtendedTriggerMessage",
    "FirmwareStatusNotification",
    "GetCompositeSchedule",
    "GetConfiguration",
    "GetDiagnostics",
    "GetInstalledCertificateIds",
    "GetLocalListVersion",
    "GetLog",
    "Heartbeat",
    "InstallCertificate",
    "LogStatusNotification",
    "MeterValues",
    "RemoteStartTransaction",
    "RemoteStopTransaction",
    "ReserveNow",
    "Reset",
    "SecurityEventNotification",
    "SendLocalList",
    "SetChargingProfile",
    "SignCertificate",
    "SignedFirmwareStatusNotification",
    "SignedUpdateFirmware",
    "StartTransaction",
    "StatusNotification",
    "StopTransaction",
    "TriggerMessage",
    "UnlockConnector",
    "UpdateFirmware",
];

/// OCPP 2.0.1
pub const V201_ACTIONS: &[&str] = &[
    "Authorize",
    "BootNotification",
    "CancelReservation",
    "CertificateSigned",
    "ChangeAvailability",
    "ClearCache",
    "ClearChargingProfile",
    "ClearDisplayMessage",
    "ClearedChargingLimit",
    "ClearVariableMonitoring",
    "CostUpdated",
    "CustomerInformation",
    "DataTransfer",
    "DeleteCertificate",
    "FirmwareStatusNotification",
    "Get15118EVCertificate",
    "GetBaseReport",
    "GetCertificateStatus",
    "GetChargingProfiles",
    "GetCompositeSchedule",
    "GetDisplayMessages",
    "GetInstalledCertificateIds",
    "GetLocalListVersion",
    "GetLog",
    "GetMonitoringReport",
    "GetReport",
    "GetTransactionStatus",
    "GetVariables",
    "Heartbeat",
    "InstallCertificate",
    "LogStatusNotification",
    "MeterValues",
    "NotifyChargingLimit",
    "NotifyCustomerInformation",
    "NotifyDisplayMessages",
    "NotifyEVChargingNeeds",
    "NotifyEVChargingSchedule",
    "NotifyEvent",
    "NotifyMonitoringReport",
    "NotifyReport",
    "PublishFirmware",
    "PublishFirmwareStatusNotification",
    "ReportChargingProfiles",
    "RequestStartTransaction",
    "RequestStopTransaction",
    "ReservationStatusUpdate",
    "ReserveNow",
    "Reset",
    "SecurityEventNotification",
    "SendLocalList",
    "SetChargingProfile",
    "SetDisplayMessage",
    "SetMonitoringBase",
    "SetMonitoringLevel",
    "SetNetworkProfile",
    "SetVariableMonitoring",
    "SetVariables",
    "SignCertificate",
    "StatusNotification",
    "TransactionEvent",
    "TriggerMessage",
    "UnlockConnector",
    "UnpublishFirmware",
    "UpdateFirmware",
];

/// Actions added by OCPP 2.1 on top of the 2.0.1 vocabulary
pub const V21_ACTIONS: &[&str] = &[
    "AdjustPeriodicEventStream",
    "AFRRSignal",
    "BatterySwap",
    "ChangeTransactionTariff",
    "ClearDERControl",
    "ClearTariffs",
    "ClosePeriodicEventStream",
    "GetCertificateChainStatus",
    "GetDERControl",
    "GetPeriodicEventStream",
    "GetTariffs",
    "NotifyAllowedEnergyTransfer",
    "NotifyDERAlarm",
    "NotifyDERStartStop",
    "NotifyPeriodicEventStream",
    "NotifyPriorityCharging",
    "NotifyQRCodeScanned",
    "NotifySettlement",
    "NotifyWebPaymentStarted",
    "OpenPeriodicEventStream",
    "PullDynamicScheduleUpdate",
    "ReportDERControl",
    "RequestBatterySwap",
    "SetDefaultTariff",
    "SetDERControl",
    "UpdateDynamicSchedule",
    "UsePriorityCharging",
    "VatNumberValidation",
];
