//! Charging-station side of the demo

use std::time::Duration;

use chrono::Utc;
use ocpp_core::schema::{v16, v2};
use ocpp_core::{CallFailure, Connection, ProtocolVersion};
use tracing::{info, warn};

/// Station session settings
#[derive(Debug, Clone)]
pub struct StationProfile {
    pub vendor: String,
    pub model: String,
    pub id_tag: Option<String>,
    /// Stop after this many heartbeats (None = run until interrupted)
    pub heartbeats: Option<u32>,
}

/// Boot, report connector 1, optionally authorize, then heartbeat
pub async fn run(connection: Connection, profile: StationProfile) -> Result<(), CallFailure> {
    let interval = match connection.version() {
        ProtocolVersion::V16 => boot_v16(&connection, &profile).await?,
        _ => boot_v2(&connection, &profile).await?,
    };
    let interval = Duration::from_secs(u64::try_from(interval).unwrap_or(0).max(1));

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    let mut sent = 0u32;
    while profile.heartbeats.map_or(true, |max| sent < max) {
        ticker.tick().await;
        let server_time = match connection.version() {
            ProtocolVersion::V16 => connection.call(&v16::HeartbeatRequest).await?.current_time,
            _ => connection.call(&v2::HeartbeatRequest::default()).await?.current_time,
        };
        sent += 1;
        let drift_ms = (Utc::now() - server_time).num_milliseconds();
        info!(server_time = %server_time, drift_ms, "Heartbeat");
    }
    Ok(())
}

async fn boot_v16(connection: &Connection, profile: &StationProfile) -> Result<i32, CallFailure> {
    let boot = v16::BootNotificationRequest::new(&profile.vendor, &profile.model)
        .with_firmware_version(env!("CARGO_PKG_VERSION"));
    let resp = connection.call(&boot).await?;
    info!(status = %resp.status, interval = resp.interval, "Boot answered");
    if resp.status == v16::RegistrationStatus::Rejected {
        warn!("CSMS rejected registration");
    }

    connection
        .call(&v16::StatusNotificationRequest::new(
            1,
            v16::ChargePointStatus::Available,
            v16::ChargePointErrorCode::NoError,
        ))
        .await?;

    if let Some(tag) = &profile.id_tag {
        let auth = connection.call(&v16::AuthorizeRequest::new(tag.as_str())).await?;
        info!(id_tag = %tag, status = %auth.id_tag_info.status, "Authorize answered");
    }
    Ok(resp.interval)
}

async fn boot_v2(connection: &Connection, profile: &StationProfile) -> Result<i32, CallFailure> {
    let mut station = v2::ChargingStation::new(&profile.vendor, &profile.model);
    station.firmware_version = Some(env!("CARGO_PKG_VERSION").to_string());
    let resp = connection
        .call(&v2::BootNotificationRequest::new(station, v2::BootReason::PowerUp))
        .await?;
    info!(status = %resp.status, interval = resp.interval, "Boot answered");
    if resp.status == v2::RegistrationStatus::Rejected {
        warn!("CSMS rejected registration");
    }

    connection
        .call(&v2::StatusNotificationRequest {
            timestamp: Utc::now(),
            connector_status: v2::ConnectorStatus::Available,
            evse_id: 1,
            connector_id: 1,
            custom_data: None,
        })
        .await?;

    if let Some(tag) = &profile.id_tag {
        let token = v2::IdToken::new(tag.as_str(), v2::IdTokenEnum::Iso14443);
        let auth = connection.call(&v2::AuthorizeRequest::new(token)).await?;
        info!(id_token = %tag, status = %auth.id_token_info.status, "Authorize answered");
    }
    Ok(resp.interval)
}
