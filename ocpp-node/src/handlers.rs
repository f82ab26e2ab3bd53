//! Demo handlers for both ends of the link

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use ocpp_core::schema::{v16, v2, Opaque};
use ocpp_core::{ActionDispatchTable, CallContext, HandlerError, ProtocolVersion, RegistrationError};
use serde_json::json;
use tracing::info;

/// Authorization policy of the demo CSMS
#[derive(Debug, Clone, Default)]
pub struct IdTagPolicy {
    /// Empty accepts every tag
    allowed: HashSet<String>,
}

impl IdTagPolicy {
    pub fn new(allowed: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    fn accepts(&self, tag: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains(tag)
    }
}

fn station(ctx: &CallContext) -> &str {
    ctx.peer.as_ref().map_or("-", |p| p.as_str())
}

/// Handlers for calls initiated by charging stations
pub fn csms_table(
    heartbeat_interval: i32,
    policy: IdTagPolicy,
) -> Result<ActionDispatchTable, RegistrationError> {
    let policy = Arc::new(policy);
    let mut table = ActionDispatchTable::new();

    // OCPP 1.6
    let version = ProtocolVersion::V16;
    table
        .register::<v16::BootNotificationRequest, _, _>(version, move |req, ctx| async move {
            info!(
                station = station(&ctx),
                vendor = %req.charge_point_vendor,
                model = %req.charge_point_model,
                "BootNotification"
            );
            Ok(v16::BootNotificationResponse {
                status: v16::RegistrationStatus::Accepted,
                current_time: Utc::now(),
                interval: heartbeat_interval,
            })
        })?
        .register::<v16::HeartbeatRequest, _, _>(version, |_req, _ctx| async {
            Ok(v16::HeartbeatResponse { current_time: Utc::now() })
        })?
        .register::<v16::StatusNotificationRequest, _, _>(version, |req, ctx| async move {
            info!(
                station = station(&ctx),
                connector = req.connector_id,
                status = %req.status,
                error = %req.error_code,
                "StatusNotification"
            );
            Ok(v16::StatusNotificationResponse)
        })?
        .register::<v16::DataTransferRequest, _, _>(version, |_req, _ctx| async {
            Ok(v16::DataTransferResponse {
                status: v16::DataTransferStatus::UnknownVendorId,
                data: None,
            })
        })?;

    let v16_policy = Arc::clone(&policy);
    table.register::<v16::AuthorizeRequest, _, _>(version, move |req, ctx| {
        let policy = Arc::clone(&v16_policy);
        async move {
            let status = if policy.accepts(&req.id_tag) {
                v16::AuthorizationStatus::Accepted
            } else {
                v16::AuthorizationStatus::Invalid
            };
            info!(station = station(&ctx), id_tag = %req.id_tag, status = %status, "Authorize");
            Ok(v16::AuthorizeResponse {
                id_tag_info: v16::IdTagInfo::new(status),
            })
        }
    })?;

    // OCPP 2.0.1 and 2.1 share the schema family
    for version in [ProtocolVersion::V201, ProtocolVersion::V21] {
        let policy = Arc::clone(&policy);
        table
            .register::<v2::BootNotificationRequest, _, _>(version, move |req, ctx| async move {
                info!(
                    station = station(&ctx),
                    vendor = %req.charging_station.vendor_name,
                    model = %req.charging_station.model,
                    reason = %req.reason,
                    "BootNotification"
                );
                Ok(v2::BootNotificationResponse {
                    current_time: Utc::now(),
                    interval: heartbeat_interval,
                    status: v2::RegistrationStatus::Accepted,
                    status_info: None,
                    custom_data: None,
                })
            })?
            .register::<v2::HeartbeatRequest, _, _>(version, |_req, _ctx| async {
                Ok(v2::HeartbeatResponse::new(Utc::now()))
            })?
            .register::<v2::StatusNotificationRequest, _, _>(version, |req, ctx| async move {
                info!(
                    station = station(&ctx),
                    evse = req.evse_id,
                    connector = req.connector_id,
                    status = %req.connector_status,
                    "StatusNotification"
                );
                Ok(v2::StatusNotificationResponse::default())
            })?
            .register::<v2::AuthorizeRequest, _, _>(version, move |req, ctx| {
                let policy = Arc::clone(&policy);
                async move {
                    let status = if policy.accepts(&req.id_token.id_token) {
                        v2::AuthorizationStatus::Accepted
                    } else {
                        v2::AuthorizationStatus::Unknown
                    };
                    info!(
                        station = station(&ctx),
                        id_token = %req.id_token.id_token,
                        status = %status,
                        "Authorize"
                    );
                    Ok(v2::AuthorizeResponse::new(status))
                }
            })?;
    }

    Ok(table)
}

/// Handlers for calls initiated by the CSMS
pub fn station_table() -> Result<ActionDispatchTable, RegistrationError> {
    let mut table = ActionDispatchTable::new();

    table
        .register::<v16::UpdateFirmwareRequest, _, _>(ProtocolVersion::V16, |req, _ctx| async move {
            info!(location = %req.location, at = %req.retrieve_date, "Firmware update scheduled");
            Ok(v16::UpdateFirmwareResponse)
        })?
        .register::<v16::DataTransferRequest, _, _>(ProtocolVersion::V16, |_req, _ctx| async {
            Ok(v16::DataTransferResponse {
                status: v16::DataTransferStatus::UnknownVendorId,
                data: None,
            })
        })?;

    for version in [ProtocolVersion::V201, ProtocolVersion::V21] {
        table
            .register::<v2::UpdateFirmwareRequest, _, _>(version, |req, _ctx| async move {
                if req.firmware.location.is_empty() {
                    return Err(HandlerError::rejected(
                        ocpp_core::ErrorCode::PropertyConstraintViolation,
                        "firmware location is empty",
                    ));
                }
                info!(
                    request_id = req.request_id,
                    location = %req.firmware.location,
                    "Firmware update scheduled"
                );
                Ok(v2::UpdateFirmwareResponse {
                    status: v2::UpdateFirmwareStatus::Accepted,
                    status_info: None,
                    custom_data: None,
                })
            })?
            .register::<v2::DataTransferRequest, _, _>(version, |req, _ctx| async move {
                let known = req.vendor_id == "org.openchargealliance.demo";
                Ok(v2::DataTransferResponse {
                    status: if known {
                        v2::DataTransferStatus::Accepted
                    } else {
                        v2::DataTransferStatus::UnknownVendorId
                    },
                    status_info: None,
                    data: known.then(|| Opaque(json!({ "echo": req.data.map(|d| d.0) }))),
                    custom_data: None,
                })
            })?;
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_bind_expected_actions() {
        let csms = csms_table(300, IdTagPolicy::default()).unwrap();
        for version in ProtocolVersion::ALL {
            let bound = csms.bound_actions(version);
            for action in ["Authorize", "BootNotification", "Heartbeat", "StatusNotification"] {
                assert!(bound.contains(&action), "{action} missing for {version}");
            }
        }

        let station = station_table().unwrap();
        assert!(station.bound_actions(ProtocolVersion::V16).contains(&"UpdateFirmware"));
        assert!(station.bound_actions(ProtocolVersion::V21).contains(&"DataTransfer"));
    }

    #[test]
    fn test_policy() {
        assert!(IdTagPolicy::default().accepts("anything"));
        let policy = IdTagPolicy::new(["B4A63CDF".to_string()]);
        assert!(policy.accepts("B4A63CDF"));
        assert!(!policy.accepts("DEADBEEF"));
    }
}
