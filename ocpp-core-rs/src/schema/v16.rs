//! OCPP 1.6 message schemas
//!
//! 1.6 payloads are flat: identifiers are plain strings (`idTag`) and there
//! is no `customData` container.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{DocBuilder, Extensions, Fields, Payload, Request, SchemaError};
use crate::types::ProtocolVersion;

const V16: &[ProtocolVersion] = &[ProtocolVersion::V16];

/// `IdToken` in 1.6 is a CiString20
pub const MAX_ID_TAG_LEN: usize = 20;

crate::text_enum! {
    pub enum AuthorizationStatus {
        Accepted = "Accepted",
        Blocked = "Blocked",
        Expired = "Expired",
        Invalid = "Invalid",
        ConcurrentTx = "ConcurrentTx",
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
    pub enum ChargePointStatus {
        Available = "Available",
        Preparing = "Preparing",
        Charging = "Charging",
        SuspendedEVSE = "SuspendedEVSE",
        SuspendedEV = "SuspendedEV",
        Finishing = "Finishing",
        Reserved = "Reserved",
        Unavailable = "Unavailable",
        Faulted = "Faulted",
    }
}

crate::text_enum! {
    /// Unrecognised codes from newer firmware map to `OtherError`
    pub enum ChargePointErrorCode fallback OtherError {
        ConnectorLockFailure = "ConnectorLockFailure",
        EVCommunicationError = "EVCommunicationError",
        GroundFailure = "GroundFailure",
        HighTemperature = "HighTemperature",
        InternalError = "InternalError",
        LocalListConflict = "LocalListConflict",
        NoError = "NoError",
        OtherError = "OtherError",
        OverCurrentFailure = "OverCurrentFailure",
        PowerMeterFailure = "PowerMeterFailure",
        PowerSwitchFailure = "PowerSwitchFailure",
        ReaderFailure = "ReaderFailure",
        ResetFailure = "ResetFailure",
        UnderVoltage = "UnderVoltage",
        OverVoltage = "OverVoltage",
        WeakSignal = "WeakSignal",
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

// ============================================================================
// Shared types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdTagInfo {
    pub status: AuthorizationStatus,
    pub expiry_date: Option<DateTime<Utc>>,
    pub parent_id_tag: Option<String>,
}

impl IdTagInfo {
    pub fn new(status: AuthorizationStatus) -> Self {
        Self {
            status,
            expiry_date: None,
            parent_id_tag: None,
        }
    }
}

impl Payload for IdTagInfo {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            status: f.enumeration("status")?,
            expiry_date: f.opt_datetime("expiryDate")?,
            parent_id_tag: f.opt_string("parentIdTag", MAX_ID_TAG_LEN)?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .opt_datetime("expiryDate", self.expiry_date.as_ref())
            .opt_field("parentIdTag", self.parent_id_tag.as_deref())
            .enumeration("status", self.status)
            .build()
    }
}

// ============================================================================
// Authorize
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthorizeRequest {
    pub id_tag: String,
}

impl AuthorizeRequest {
    /// # Panics
    /// If `id_tag` is empty or longer than 20 characters.
    pub fn new(id_tag: impl Into<String>) -> Self {
        let id_tag = id_tag.into();
        assert!(
            !id_tag.is_empty() && id_tag.chars().count() <= MAX_ID_TAG_LEN,
            "idTag must be 1..=20 characters"
        );
        Self { id_tag }
    }
}

impl Payload for AuthorizeRequest {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            id_tag: f.string("idTag", MAX_ID_TAG_LEN)?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext).field("idTag", self.id_tag.as_str()).build()
    }
}

impl Request for AuthorizeRequest {
    const ACTION: &'static str = "Authorize";
    const VERSIONS: &'static [ProtocolVersion] = V16;
    type Response = AuthorizeResponse;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthorizeResponse {
    pub id_tag_info: IdTagInfo,
}

impl Payload for AuthorizeResponse {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            id_tag_info: f.object("idTagInfo")?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .object("idTagInfo", &self.id_tag_info)
            .build()
    }
}

// ============================================================================
// BootNotification
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BootNotificationRequest {
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    pub charge_point_serial_number: Option<String>,
    pub charge_box_serial_number: Option<String>,
    pub firmware_version: Option<String>,
    pub iccid: Option<String>,
    pub imsi: Option<String>,
    pub meter_type: Option<String>,
    pub meter_serial_number: Option<String>,
}

impl BootNotificationRequest {
    pub fn new(vendor: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            charge_point_vendor: vendor.into(),
            charge_point_model: model.into(),
            charge_point_serial_number: None,
            charge_box_serial_number: None,
            firmware_version: None,
            iccid: None,
            imsi: None,
            meter_type: None,
            meter_serial_number: None,
        }
    }

    pub fn with_firmware_version(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = Some(version.into());
        self
    }

    pub fn with_serial_number(mut self, serial: impl Into<String>) -> Self {
        self.charge_point_serial_number = Some(serial.into());
        self
    }
}

impl Payload for BootNotificationRequest {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            charge_point_vendor: f.string("chargePointVendor", 20)?,
            charge_point_model: f.string("chargePointModel", 20)?,
            charge_point_serial_number: f.opt_string("chargePointSerialNumber", 25)?,
            charge_box_serial_number: f.opt_string("chargeBoxSerialNumber", 25)?,
            firmware_version: f.opt_string("firmwareVersion", 50)?,
            iccid: f.opt_string("iccid", 20)?,
            imsi: f.opt_string("imsi", 20)?,
            meter_type: f.opt_string("meterType", 25)?,
            meter_serial_number: f.opt_string("meterSerialNumber", 25)?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .field("chargePointVendor", self.charge_point_vendor.as_str())
            .field("chargePointModel", self.charge_point_model.as_str())
            .opt_field("chargePointSerialNumber", self.charge_point_serial_number.as_deref())
            .opt_field("chargeBoxSerialNumber", self.charge_box_serial_number.as_deref())
            .opt_field("firmwareVersion", self.firmware_version.as_deref())
            .opt_field("iccid", self.iccid.as_deref())
            .opt_field("imsi", self.imsi.as_deref())
            .opt_field("meterType", self.meter_type.as_deref())
            .opt_field("meterSerialNumber", self.meter_serial_number.as_deref())
            .build()
    }
}

impl Request for BootNotificationRequest {
    const ACTION: &'static str = "BootNotification";
    const VERSIONS: &'static [ProtocolVersion] = V16;
    type Response = BootNotificationResponse;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BootNotificationResponse {
    pub status: RegistrationStatus,
    pub current_time: DateTime<Utc>,
    /// Heartbeat interval in seconds
    pub interval: i32,
}

impl Payload for BootNotificationResponse {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            status: f.enumeration("status")?,
            current_time: f.datetime("currentTime")?,
            interval: f.integer("interval")?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .enumeration("status", self.status)
            .datetime("currentTime", &self.current_time)
            .field("interval", self.interval)
            .build()
    }
}

// ============================================================================
// Heartbeat
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct HeartbeatRequest;

impl Payload for HeartbeatRequest {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        Fields::of(doc, version)?;
        Ok(Self)
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext).build()
    }
}

impl Request for HeartbeatRequest {
    const ACTION: &'static str = "Heartbeat";
    const VERSIONS: &'static [ProtocolVersion] = V16;
    type Response = HeartbeatResponse;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeartbeatResponse {
    pub current_time: DateTime<Utc>,
}

impl Payload for HeartbeatResponse {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            current_time: f.datetime("currentTime")?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .datetime("currentTime", &self.current_time)
            .build()
    }
}

// ============================================================================
// StatusNotification
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusNotificationRequest {
    /// 0 addresses the charge point as a whole
    pub connector_id: i32,
    pub error_code: ChargePointErrorCode,
    pub info: Option<String>,
    pub status: ChargePointStatus,
    pub timestamp: Option<DateTime<Utc>>,
    pub vendor_id: Option<String>,
    pub vendor_error_code: Option<String>,
}

impl StatusNotificationRequest {
    /// # Panics
    /// If `connector_id` is negative.
    pub fn new(
        connector_id: i32,
        status: ChargePointStatus,
        error_code: ChargePointErrorCode,
    ) -> Self {
        assert!(connector_id >= 0, "connectorId must not be negative");
        Self {
            connector_id,
            error_code,
            info: None,
            status,
            timestamp: None,
            vendor_id: None,
            vendor_error_code: None,
        }
    }
}

impl Payload for StatusNotificationRequest {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            connector_id: f.unsigned("connectorId")?,
            error_code: f.enumeration("errorCode")?,
            info: f.opt_string("info", 50)?,
            status: f.enumeration("status")?,
            timestamp: f.opt_datetime("timestamp")?,
            vendor_id: f.opt_string("vendorId", 255)?,
            vendor_error_code: f.opt_string("vendorErrorCode", 50)?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .field("connectorId", self.connector_id)
            .enumeration("errorCode", self.error_code)
            .opt_field("info", self.info.as_deref())
            .enumeration("status", self.status)
            .opt_datetime("timestamp", self.timestamp.as_ref())
            .opt_field("vendorId", self.vendor_id.as_deref())
            .opt_field("vendorErrorCode", self.vendor_error_code.as_deref())
            .build()
    }
}

impl Request for StatusNotificationRequest {
    const ACTION: &'static str = "StatusNotification";
    const VERSIONS: &'static [ProtocolVersion] = V16;
    type Response = StatusNotificationResponse;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StatusNotificationResponse;

impl Payload for StatusNotificationResponse {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        Fields::of(doc, version)?;
        Ok(Self)
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext).build()
    }
}

// ============================================================================
// DataTransfer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataTransferRequest {
    pub vendor_id: String,
    pub message_id: Option<String>,
    /// Free text in 1.6
    pub data: Option<String>,
}

impl Payload for DataTransferRequest {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            vendor_id: f.string("vendorId", 255)?,
            message_id: f.opt_string("messageId", 50)?,
            data: f.opt_string("data", usize::MAX)?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .field("vendorId", self.vendor_id.as_str())
            .opt_field("messageId", self.message_id.as_deref())
            .opt_field("data", self.data.as_deref())
            .build()
    }
}

impl Request for DataTransferRequest {
    const ACTION: &'static str = "DataTransfer";
    const VERSIONS: &'static [ProtocolVersion] = V16;
    type Response = DataTransferResponse;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataTransferResponse {
    pub status: DataTransferStatus,
    pub data: Option<String>,
}

impl Payload for DataTransferResponse {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            status: f.enumeration("status")?,
            data: f.opt_string("data", usize::MAX)?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .enumeration("status", self.status)
            .opt_field("data", self.data.as_deref())
            .build()
    }
}

// ============================================================================
// UpdateFirmware
// ============================================================================

/// Retry policy for the download lives in the payload; the RPC layer never retries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpdateFirmwareRequest {
    pub location: String,
    pub retrieve_date: DateTime<Utc>,
    pub retries: Option<i32>,
    /// Seconds between download attempts
    pub retry_interval: Option<i32>,
}

impl Payload for UpdateFirmwareRequest {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        let f = Fields::of(doc, version)?;
        Ok(Self {
            location: f.string("location", usize::MAX)?,
            retrieve_date: f.datetime("retrieveDate")?,
            retries: f.opt_unsigned("retries")?,
            retry_interval: f.opt_unsigned("retryInterval")?,
        })
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext)
            .field("location", self.location.as_str())
            .datetime("retrieveDate", &self.retrieve_date)
            .opt_field("retries", self.retries)
            .opt_field("retryInterval", self.retry_interval)
            .build()
    }
}

impl Request for UpdateFirmwareRequest {
    const ACTION: &'static str = "UpdateFirmware";
    const VERSIONS: &'static [ProtocolVersion] = V16;
    type Response = UpdateFirmwareResponse;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UpdateFirmwareResponse;

impl Payload for UpdateFirmwareResponse {
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        Fields::of(doc, version)?;
        Ok(Self)
    }

    fn to_document(&self, ext: &Extensions) -> Value {
        DocBuilder::new(ext).build()
    }
}
