//! OCPP 2.0.1 / 2.1 message schemas
//!
//! Both generations share one shape per message; the differences handled
//! here are field rules that depend on the negotiated version:
//! - `IdToken.type` is a closed vocabulary in 2.0.1, an open string in 2.1
//! - `IdToken.idToken` grows from 36 to 255 characters in 2.1
//!
//! Every object carries an optional `customData` extension container.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{
    CustomData, DocBuilder, Extensions, Fields, Opaque, Payload, Request, SchemaError, ValueSet,
};
use crate::types::{ProtocolVersion, TextEnum};

const V2: &[ProtocolVersion] = &[ProtocolVersion::V201, ProtocolVersion::V21];

/// Maximum entries in `AuthorizeRequest.iso15118CertificateHashData`
pub const MAX_OCSP_HASHES: usize = 4;

crate::text_enum! {
    /// `IdTokenEnumType` of OCPP 2.0.1
    pub enum IdTokenEnum {
        Central = "Central",
        EMaid = "eMAID",
        Iso14443 = "ISO14443",
        Iso15693 = "ISO15693",
        KeyCode = "KeyCode",
        Local = "Local",
        MacAddress = "MacAddress",
        NoAuthorization = "NoAuthorization",
    }
}

crate::text_enum! {
    pub enum AuthorizationStatus {
        Accepted = "Accepted",
        Blocked = "Blocked",
        ConcurrentTx = "ConcurrentTx",
        Expired = "Expired",
        Invalid = "Invalid",
        NoCredit = "NoCredit",
        NotAllowedTypeEVSE = "NotAllowedTypeEVSE",
        NotAtThisLocation = "NotAtThisLocation",
        NotAtThisTime = "NotAtThisTime",
        Unknown = "Unknown",
    }
}

crate::text_enum! {
    pub enum AuthorizeCertificateStatus {
        Accepted = "Accepted",
        SignatureError = "SignatureError",
        CertificateExpired = "CertificateExpired",
        CertificateRevoked = "CertificateRevoked",
        NoCertificateAvailable = "NoCertificateAvailable",
        CertChainError = "CertChainError",
        ContractCancelled = "ContractCancelled",
    }
}

crate::text_enum! {
    pub enum HashAlgorithm {
        Sha256 = "SHA256",
        Sha384 = "SHA384",
        Sha512 = "SHA512",
    }
}

crate::text_enum! {
    /// Reasons added by later firmware degrade to `Unknown`
    pub enum BootReason fallback Unknown {
        ApplicationReset = "ApplicationReset",
        FirmwareUpdate = "FirmwareUpdate",
        LocalReset = "LocalReset",
        PowerUp = "PowerUp",
        RemoteReset = "RemoteReset",
        ScheduledReset = "ScheduledReset",
        Triggered = "Triggered",
        Unknown = "Unknown",
        Watchdog = "Watchdog",
    }
}

crate::text_enum! {
    pub enum RegistrationStatus {
        Accepted = "Accepted",
        Pending = "Pending",
        Rejected = "Rejected",
    }
}

crate::text_enum! {
    pub enum ConnectorStatus {
        Available = "Available",
        Occupied = "Occupied",
        Reserved = "Reserved",
        Unavailable = "Unavailable",
        Faulted = "Faulted",
    }
}

crate::text_enum! {
    pub enum DataTransferStatus {
        Accepted = "Accepted",
        Rejected = "Rejected",
        UnknownMessageId = "UnknownMessageId",
        UnknownVendorId = "UnknownVendorId",
    }
}

crate::text_enum! {
    pub enum UpdateFirmwareStatus {
        Accepted = "Accepted",
        Rejected = "Rejected",
        AcceptedCanceled = "AcceptedCanceled",
        InvalidCertificate = "InvalidCertificate",
        RevokedCertificate = "RevokedCertificate",
    }
}

// ============================================================================
// Identity tokens
// ============================================================================

/// `IdToken.type`
///
/// Canonical: vocabulary names (in any case) are always `Known`, so an
/// `Other` never shadows a closed variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdTokenType {
    Known(IdTokenEnum),
    /// 2.1 only: any other token type, at most 20 characters
    Other(CustomTokenType),
}

/// Token type outside the 2.0.1 vocabulary; built through [`IdTokenType::from_text`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomTokenType(String);

impl CustomTokenType {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl IdTokenType {
    pub const MAX_LEN: usize = 20;

    /// Map text onto the vocabulary, keeping anything else as `Other`
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        match IdTokenEnum::from_text(&text) {
            Some(kind) => IdTokenType::Known(kind),
            None => IdTokenType::Other(CustomTokenType(text)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            IdTokenType::Known(kind) => kind.as_str(),
            IdTokenType::Other(custom) => custom.as_str(),
        }
    }

    fn parse(f: &Fields<'_>, name: &str) -> Result<Self, SchemaError> {
        match f.version() {
            ProtocolVersion::V21 => f.string(name, Self::MAX_LEN).map(Self::from_text),
            _ => f.enumeration(name).map(IdTokenType::Known),
        }
    }
}

impl From<IdTokenEnum> for IdTokenType {
    fn from(kind: IdTokenEnum) -> Self {
        IdTokenType::Known(kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdditionalInfo {
    pub additional_id_token: String,
    pub kind: String,
    pub custom_data: Option<CustomData>,
}

impl Payload for AdditionalInfo {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            additional_id_token: f.string("additionalIdToken", IdToken::max_len(version))?,
            kind: f.string("type", 50)?,
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .field("additionalIdToken", self.additional_id_token.as_str())
            .field("type", self.kind.as_str())
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdToken {
    pub id_token: String,
    pub kind: IdTokenType,
    pub additional_info: ValueSet<AdditionalInfo>,
    pub custom_data: Option<CustomData>,
}

impl IdToken {
    pub fn new(id_token: impl Into<String>, kind: impl Into<IdTokenType>) -> Self {
        Self {
            id_token: id_token.into(),
            kind: kind.into(),
            additional_info: ValueSet::new(),
            custom_data: None,
        }
    }

    pub fn with_custom_data(mut self, custom_data: CustomData) -> Self {
        self.custom_data = Some(custom_data);
        self
    }

    fn max_len(version: ProtocolVersion) -> usize {
        match version {
            ProtocolVersion::V21 => 255,
            _ => 36,
        }
    }
}

impl Payload for IdToken {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            id_token: f.string("idToken", Self::max_len(version))?,
            kind: IdTokenType::parse(&f, "type")?,
            additional_info: f.opt_set("additionalInfo", usize::MAX)?,
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .field("idToken", self.id_token.as_str())
            .field("type", self.kind.as_str())
            .set("additionalInfo", &self.additional_info)
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OcspRequestData {
    pub hash_algorithm: HashAlgorithm,
    pub issuer_name_hash: String,
    pub issuer_key_hash: String,
    pub serial_number: String,
    pub responder_url: String,
    pub custom_data: Option<CustomData>,
}

impl Payload for OcspRequestData {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            hash_algorithm: f.enumeration("hashAlgorithm")?,
            issuer_name_hash: f.string("issuerNameHash", 128)?,
            issuer_key_hash: f.string("issuerKeyHash", 128)?,
            serial_number: f.string("serialNumber", 40)?,
            responder_url: f.string("responderURL", 512)?,
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .enumeration("hashAlgorithm", self.hash_algorithm)
            .field("issuerNameHash", self.issuer_name_hash.as_str())
            .field("issuerKeyHash", self.issuer_key_hash.as_str())
            .field("serialNumber", self.serial_number.as_str())
            .field("responderURL", self.responder_url.as_str())
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusInfo {
    pub reason_code: String,
    pub additional_info: Option<String>,
    pub custom_data: Option<CustomData>,
}

impl StatusInfo {
    pub fn new(reason_code: impl Into<String>) -> Self {
        Self {
            reason_code: reason_code.into(),
            additional_info: None,
            custom_data: None,
        }
    }
}

impl Payload for StatusInfo {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            reason_code: f.string("reasonCode", 20)?,
            additional_info: f.opt_string("additionalInfo", 512)?,
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .field("reasonCode", self.reason_code.as_str())
            .opt_field("additionalInfo", self.additional_info.as_deref())
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdTokenInfo {
    pub status: AuthorizationStatus,
    pub cache_expiry_date_time: Option<DateTime<Utc>>,
    /// -9 (lowest) ..= 9 (highest)
    pub charging_priority: Option<i32>,
    pub language1: Option<String>,
    pub language2: Option<String>,
    /// EVSEs the token is valid for; empty means all
    pub evse_id: ValueSet<i32>,
    pub group_id_token: Option<IdToken>,
    pub custom_data: Option<CustomData>,
}

impl IdTokenInfo {
    pub fn new(status: AuthorizationStatus) -> Self {
        Self {
            status,
            cache_expiry_date_time: None,
            charging_priority: None,
            language1: None,
            language2: None,
            evse_id: ValueSet::new(),
            group_id_token: None,
            custom_data: None,
        }
    }
}

impl Payload for IdTokenInfo {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            status: f.enumeration("status")?,
            cache_expiry_date_time: f.opt_datetime("cacheExpiryDateTime")?,
            charging_priority: f.opt_integer_in("chargingPriority", -9, 9)?,
            language1: f.opt_string("language1", 8)?,
            language2: f.opt_string("language2", 8)?,
            evse_id: f.opt_integer_set("evseId", usize::MAX)?,
            group_id_token: f.opt_object("groupIdToken")?,
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .enumeration("status", self.status)
            .opt_datetime("cacheExpiryDateTime", self.cache_expiry_date_time.as_ref())
            .opt_field("chargingPriority", self.charging_priority)
            .opt_field("language1", self.language1.as_deref())
            .integer_set("evseId", &self.evse_id)
            .opt_field("language2", self.language2.as_deref())
            .opt_object("groupIdToken", self.group_id_token.as_ref())
            .build()
    }
}

// ============================================================================
// Authorize
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthorizeRequest {
    pub id_token: IdToken,
    /// PEM encoded contract certificate chain
    pub certificate: Option<String>,
    pub iso15118_certificate_hash_data: ValueSet<OcspRequestData>,
    pub custom_data: Option<CustomData>,
}

impl AuthorizeRequest {
    pub fn new(id_token: IdToken) -> Self {
        Self {
            id_token,
            certificate: None,
            iso15118_certificate_hash_data: ValueSet::new(),
            custom_data: None,
        }
    }

    /// # Panics
    /// If `hashes` is empty or holds more than 4 entries.
    pub fn with_certificate_hash_data(mut self, hashes: ValueSet<OcspRequestData>) -> Self {
        assert!(
            (1..=MAX_OCSP_HASHES).contains(&hashes.len()),
            "iso15118CertificateHashData must hold 1..=4 entries"
        );
        self.iso15118_certificate_hash_data = hashes;
        self
    }

    pub fn with_custom_data(mut self, custom_data: CustomData) -> Self {
        self.custom_data = Some(custom_data);
        self
    }
}

impl Payload for AuthorizeRequest {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            id_token: f.object("idToken")?,
            certificate: f.opt_string("certificate", 5500)?,
            iso15118_certificate_hash_data: f
                .opt_set("iso15118CertificateHashData", MAX_OCSP_HASHES)?,
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .object("idToken", &self.id_token)
            .opt_field("certificate", self.certificate.as_deref())
            .set("iso15118CertificateHashData", &self.iso15118_certificate_hash_data)
            .build()
    }
}

impl Request for AuthorizeRequest {
    const ACTION: &'static str = "Authorize";
    const VERSIONS: &'static [ProtocolVersion] = V2;
    type Response = AuthorizeResponse;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthorizeResponse {
    pub id_token_info: IdTokenInfo,
    pub certificate_status: Option<AuthorizeCertificateStatus>,
    pub custom_data: Option<CustomData>,
}

impl AuthorizeResponse {
    pub fn new(status: AuthorizationStatus) -> Self {
        Self {
            id_token_info: IdTokenInfo::new(status),
            certificate_status: None,
            custom_data: None,
        }
    }
}

impl Payload for AuthorizeResponse {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            id_token_info: f.object("idTokenInfo")?,
            certificate_status: f.opt_enumeration("certificateStatus")?,
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .object("idTokenInfo", &self.id_token_info)
            .opt_enumeration("certificateStatus", self.certificate_status)
            .build()
    }
}

// ============================================================================
// BootNotification
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Modem {
    pub iccid: Option<String>,
    pub imsi: Option<String>,
    pub custom_data: Option<CustomData>,
}

impl Payload for Modem {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            iccid: f.opt_string("iccid", 20)?,
            imsi: f.opt_string("imsi", 20)?,
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .opt_field("iccid", self.iccid.as_deref())
            .opt_field("imsi", self.imsi.as_deref())
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChargingStation {
    pub serial_number: Option<String>,
    pub model: String,
    pub modem: Option<Modem>,
    pub vendor_name: String,
    pub firmware_version: Option<String>,
    pub custom_data: Option<CustomData>,
}

impl ChargingStation {
    pub fn new(vendor_name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            serial_number: None,
            model: model.into(),
            modem: None,
            vendor_name: vendor_name.into(),
            firmware_version: None,
            custom_data: None,
        }
    }
}

impl Payload for ChargingStation {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            serial_number: f.opt_string("serialNumber", 25)?,
            model: f.string("model", 20)?,
            modem: f.opt_object("modem")?,
            vendor_name: f.string("vendorName", 50)?,
            firmware_version: f.opt_string("firmwareVersion", 50)?,
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .opt_field("serialNumber", self.serial_number.as_deref())
            .field("model", self.model.as_str())
            .opt_object("modem", self.modem.as_ref())
            .field("vendorName", self.vendor_name.as_str())
            .opt_field("firmwareVersion", self.firmware_version.as_deref())
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BootNotificationRequest {
    pub charging_station: ChargingStation,
    pub reason: BootReason,
    pub custom_data: Option<CustomData>,
}

impl BootNotificationRequest {
    pub fn new(charging_station: ChargingStation, reason: BootReason) -> Self {
        Self {
            charging_station,
            reason,
            custom_data: None,
        }
    }
}

impl Payload for BootNotificationRequest {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            charging_station: f.object("chargingStation")?,
            reason: f.enumeration("reason")?,
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .object("chargingStation", &self.charging_station)
            .enumeration("reason", self.reason)
            .build()
    }
}

impl Request for BootNotificationRequest {
    const ACTION: &'static str = "BootNotification";
    const VERSIONS: &'static [ProtocolVersion] = V2;
    type Response = BootNotificationResponse;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BootNotificationResponse {
    pub current_time: DateTime<Utc>,
    /// Heartbeat interval in seconds
    pub interval: i32,
    pub status: RegistrationStatus,
    pub status_info: Option<StatusInfo>,
    pub custom_data: Option<CustomData>,
}

impl Payload for BootNotificationResponse {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            current_time: f.datetime("currentTime")?,
            interval: f.integer("interval")?,
            status: f.enumeration("status")?,
            status_info: f.opt_object("statusInfo")?,
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .datetime("currentTime", &self.current_time)
            .field("interval", self.interval)
            .enumeration("status", self.status)
            .opt_object("statusInfo", self.status_info.as_ref())
            .build()
    }
}

// ============================================================================
// Heartbeat
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct HeartbeatRequest {
    pub custom_data: Option<CustomData>,
}

impl Payload for HeartbeatRequest {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .build()
    }
}

impl Request for HeartbeatRequest {
    const ACTION: &'static str = "Heartbeat";
    const VERSIONS: &'static [ProtocolVersion] = V2;
    type Response = HeartbeatResponse;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeartbeatResponse {
    pub current_time: DateTime<Utc>,
    pub custom_data: Option<CustomData>,
}

impl HeartbeatResponse {
    pub fn new(current_time: DateTime<Utc>) -> Self {
        Self {
            current_time,
            custom_data: None,
        }
    }
}

impl Payload for HeartbeatResponse {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            current_time: f.datetime("currentTime")?,
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .datetime("currentTime", &self.current_time)
            .build()
    }
}

// ============================================================================
// StatusNotification
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusNotificationRequest {
    pub timestamp: DateTime<Utc>,
    pub connector_status: ConnectorStatus,
    pub evse_id: i32,
    pub connector_id: i32,
    pub custom_data: Option<CustomData>,
}

impl Payload for StatusNotificationRequest {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            timestamp: f.datetime("timestamp")?,
            connector_status: f.enumeration("connectorStatus")?,
            evse_id: f.unsigned("evseId")?,
            connector_id: f.unsigned("connectorId")?,
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .datetime("timestamp", &self.timestamp)
            .enumeration("connectorStatus", self.connector_status)
            .field("evseId", self.evse_id)
            .field("connectorId", self.connector_id)
            .build()
    }
}

impl Request for StatusNotificationRequest {
    const ACTION: &'static str = "StatusNotification";
    const VERSIONS: &'static [ProtocolVersion] = V2;
    type Response = StatusNotificationResponse;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StatusNotificationResponse {
    pub custom_data: Option<CustomData>,
}

impl Payload for StatusNotificationResponse {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .build()
    }
}

// ============================================================================
// DataTransfer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataTransferRequest {
    pub message_id: Option<String>,
    /// Any JSON value in 2.x
    pub data: Option<Opaque>,
    pub vendor_id: String,
    pub custom_data: Option<CustomData>,
}

impl Payload for DataTransferRequest {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            message_id: f.opt_string("messageId", 50)?,
            data: f.opaque("data"),
            vendor_id: f.string("vendorId", 255)?,
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .opt_field("messageId", self.message_id.as_deref())
            .opaque("data", self.data.as_ref())
            .field("vendorId", self.vendor_id.as_str())
            .build()
    }
}

impl Request for DataTransferRequest {
    const ACTION: &'static str = "DataTransfer";
    const VERSIONS: &'static [ProtocolVersion] = V2;
    type Response = DataTransferResponse;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataTransferResponse {
    pub status: DataTransferStatus,
    pub status_info: Option<StatusInfo>,
    pub data: Option<Opaque>,
    pub custom_data: Option<CustomData>,
}

impl Payload for DataTransferResponse {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            status: f.enumeration("status")?,
            status_info: f.opt_object("statusInfo")?,
            data: f.opaque("data"),
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .enumeration("status", self.status)
            .opt_object("statusInfo", self.status_info.as_ref())
            .opaque("data", self.data.as_ref())
            .build()
    }
}

// ============================================================================
// UpdateFirmware
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Firmware {
    pub location: String,
    pub retrieve_date_time: DateTime<Utc>,
    pub install_date_time: Option<DateTime<Utc>>,
    pub signing_certificate: Option<String>,
    pub signature: Option<String>,
    pub custom_data: Option<CustomData>,
}

impl Payload for Firmware {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            location: f.string("location", 512)?,
            retrieve_date_time: f.datetime("retrieveDateTime")?,
            install_date_time: f.opt_datetime("installDateTime")?,
            signing_certificate: f.opt_string("signingCertificate", 5500)?,
            signature: f.opt_string("signature", 800)?,
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .field("location", self.location.as_str())
            .datetime("retrieveDateTime", &self.retrieve_date_time)
            .opt_datetime("installDateTime", self.install_date_time.as_ref())
            .opt_field("signingCertificate", self.signing_certificate.as_deref())
            .opt_field("signature", self.signature.as_deref())
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpdateFirmwareRequest {
    pub retries: Option<i32>,
    /// Seconds between download attempts
    pub retry_interval: Option<i32>,
    pub request_id: i32,
    pub firmware: Firmware,
    pub custom_data: Option<CustomData>,
}

impl Payload for UpdateFirmwareRequest {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            retries: f.opt_unsigned("retries")?,
            retry_interval: f.opt_unsigned("retryInterval")?,
            request_id: f.integer("requestId")?,
            firmware: f.object("firmware")?,
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .opt_field("retries", self.retries)
            .opt_field("retryInterval", self.retry_interval)
            .field("requestId", self.request_id)
            .object("firmware", &self.firmware)
            .build()
    }
}

impl Request for UpdateFirmwareRequest {
    const ACTION: &'static str = "UpdateFirmware";
    const VERSIONS: &'static [ProtocolVersion] = V2;
    type Response = UpdateFirmwareResponse;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpdateFirmwareResponse {
    pub status: UpdateFirmwareStatus,
    pub status_info: Option<StatusInfo>,
    pub custom_data: Option<CustomData>,
}

impl Payload for UpdateFirmwareResponse {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            status: f.enumeration("status")?,
            status_info: f.opt_object("statusInfo")?,
            custom_data: f.custom_data()?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .custom_data(self.custom_data.as_ref())
            .enumeration("status", self.status)
            .opt_object("statusInfo", self.status_info.as_ref())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaErrorKind;
    use serde_json::json;

    #[test]
    fn test_authorize_example_payload() {
        let doc = json!({"idToken": {"idToken": "046938F2FC6880", "type": "ISO14443"}});
        let req = AuthorizeRequest::try_parse(&doc, ProtocolVersion::V201).unwrap();
        assert_eq!(req.id_token.id_token, "046938F2FC6880");
        assert_eq!(req.id_token.kind, IdTokenType::Known(IdTokenEnum::Iso14443));
        assert_eq!(req.to_json(), doc);

        let resp = AuthorizeResponse::new(AuthorizationStatus::Accepted);
        assert_eq!(resp.to_json(), json!({"idTokenInfo": {"status": "Accepted"}}));
    }

    #[test]
    fn test_missing_nested_field_is_qualified() {
        let doc = json!({"idToken": {"idToken": "046938F2FC6880"}});
        let err = AuthorizeRequest::try_parse(&doc, ProtocolVersion::V201).unwrap_err();
        assert_eq!(err.path, "idToken.type");
        assert_eq!(err.kind, SchemaErrorKind::Missing);
    }

    #[test]
    fn test_id_token_type_open_in_v21() {
        let doc = json!({"idToken": {"idToken": "abc", "type": "DirectPayment"}});
        assert!(AuthorizeRequest::try_parse(&doc, ProtocolVersion::V201).is_err());
        let req = AuthorizeRequest::try_parse(&doc, ProtocolVersion::V21).unwrap();
        assert_eq!(req.id_token.kind, IdTokenType::from_text("DirectPayment"));
        assert_eq!(req.id_token.kind.as_str(), "DirectPayment");
        assert_eq!(req.to_json(), doc);

        let long = json!({"idToken": {"idToken": "abc", "type": "x".repeat(21)}});
        let err = AuthorizeRequest::try_parse(&long, ProtocolVersion::V21).unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::TooLong(20));
    }

    #[test]
    fn test_id_token_type_is_canonical() {
        assert_eq!(
            IdTokenType::from_text("Central"),
            IdTokenType::Known(IdTokenEnum::Central)
        );
        assert_eq!(
            IdTokenType::from_text("iso14443"),
            IdTokenType::Known(IdTokenEnum::Iso14443)
        );

        for text in ["Central", "central", "EMAID", "DirectPayment"] {
            let token = IdToken::new("ABC", IdTokenType::from_text(text));
            let doc = token.to_json();
            let parsed = IdToken::try_parse(&doc, ProtocolVersion::V21).unwrap();
            assert_eq!(parsed, token, "{text} did not survive a round trip");
        }
    }

    #[test]
    fn test_additional_id_token_length_depends_on_version() {
        let doc = json!({
            "idToken": "abc",
            "type": "Central",
            "additionalInfo": [{"additionalIdToken": "a".repeat(100), "type": "x"}]
        });
        let err = IdToken::try_parse(&doc, ProtocolVersion::V201).unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::TooLong(36));
        let token = IdToken::try_parse(&doc, ProtocolVersion::V21).unwrap();
        assert_eq!(token.to_json(), doc);
    }

    #[test]
    fn test_null_optional_field_is_a_wrong_type() {
        let doc = json!({
            "idToken": {"idToken": "046938F2FC6880", "type": "ISO14443"},
            "certificate": null
        });
        let err = AuthorizeRequest::try_parse(&doc, ProtocolVersion::V201).unwrap_err();
        assert_eq!(err.path, "certificate");
        assert!(matches!(err.kind, SchemaErrorKind::WrongType { found: "null", .. }));
    }

    #[test]
    fn test_id_token_length_depends_on_version() {
        let doc = json!({"idToken": {"idToken": "t".repeat(40), "type": "Central"}});
        let err = AuthorizeRequest::try_parse(&doc, ProtocolVersion::V201).unwrap_err();
        assert_eq!(err.path, "idToken.idToken");
        assert!(AuthorizeRequest::try_parse(&doc, ProtocolVersion::V21).is_ok());
    }

    #[test]
    fn test_boot_reason_fallback() {
        let doc = json!({
            "chargingStation": {"model": "M1", "vendorName": "V"},
            "reason": "SolarFlare"
        });
        let req = BootNotificationRequest::try_parse(&doc, ProtocolVersion::V201).unwrap();
        assert_eq!(req.reason, BootReason::Unknown);
    }

    #[test]
    fn test_custom_data_round_trip_and_equality() {
        let doc = json!({
            "customData": {"vendorId": "com.example", "slot": 7},
            "idToken": {
                "idToken": "A1",
                "type": "Local",
                "customData": {"vendorId": "com.example", "color": "red"}
            }
        });
        let req = AuthorizeRequest::try_parse(&doc, ProtocolVersion::V201).unwrap();
        assert_eq!(req.to_json(), doc);

        let mut other = req.clone();
        other.custom_data = Some(CustomData::new("com.example").with_field("slot", json!(8)));
        assert_ne!(req, other);
    }

    #[test]
    fn test_extension_rewrite_applies_to_nested_objects() {
        let token = IdToken::new("A1", IdTokenEnum::Local)
            .with_custom_data(CustomData::new("acme").with_field("pin", json!("1234")));
        let req = AuthorizeRequest::new(token);
        let ext = Extensions::new().with_rewrite("acme", |_| None);
        let doc = req.to_document(&ext);
        assert_eq!(doc, json!({"idToken": {"idToken": "A1", "type": "Local"}}));
    }

    #[test]
    fn test_evse_set_equality_ignores_order() {
        let a = json!({"status": "Accepted", "evseId": [1, 2, 3]});
        let b = json!({"status": "Accepted", "evseId": [3, 2, 1, 2]});
        let a = IdTokenInfo::try_parse(&a, ProtocolVersion::V201).unwrap();
        let b = IdTokenInfo::try_parse(&b, ProtocolVersion::V201).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_charging_priority_range() {
        let doc = json!({"status": "Accepted", "chargingPriority": 10});
        let err = IdTokenInfo::try_parse(&doc, ProtocolVersion::V201).unwrap_err();
        assert_eq!(err.path, "chargingPriority");
    }

    #[test]
    fn test_ocsp_hash_cardinality() {
        let hash = json!({
            "hashAlgorithm": "SHA256",
            "issuerNameHash": "a",
            "issuerKeyHash": "b",
            "serialNumber": "c",
            "responderURL": "http://ocsp.example.com"
        });
        let hashes: Vec<Value> = (0..5)
            .map(|i| {
                let mut h = hash.clone();
                h["serialNumber"] = json!(format!("s{i}"));
                h
            })
            .collect();
        let doc = json!({
            "idToken": {"idToken": "A1", "type": "eMAID"},
            "iso15118CertificateHashData": hashes
        });
        let err = AuthorizeRequest::try_parse(&doc, ProtocolVersion::V201).unwrap_err();
        assert_eq!(err.path, "iso15118CertificateHashData");
        assert!(matches!(err.kind, SchemaErrorKind::Cardinality { found: 5, .. }));
    }

    #[test]
    #[should_panic(expected = "iso15118CertificateHashData")]
    fn test_empty_hash_set_is_contract_violation() {
        AuthorizeRequest::new(IdToken::new("A1", IdTokenEnum::EMaid))
            .with_certificate_hash_data(ValueSet::new());
    }

    #[test]
    fn test_update_firmware_document() {
        let doc = json!({
            "retries": 2,
            "retryInterval": 30,
            "requestId": 17,
            "firmware": {
                "location": "https://fw.example.com/cs.bin",
                "retrieveDateTime": "2026-03-01T02:00:00Z"
            }
        });
        let req = UpdateFirmwareRequest::try_parse(&doc, ProtocolVersion::V21).unwrap();
        assert_eq!(req.request_id, 17);
        assert_eq!(req.to_json(), doc);
    }

    #[test]
    fn test_data_transfer_opaque_data() {
        let doc = json!({"vendorId": "com.example", "data": {"nested": [1, {"k": "v"}]}});
        let req = DataTransferRequest::try_parse(&doc, ProtocolVersion::V201).unwrap();
        assert_eq!(req.data, Some(Opaque(json!({"nested": [1, {"k": "v"}]}))));
        assert_eq!(req.to_json(), doc);
    }
}
