//! OCPP Node - CLI for the OCPP-J engine
//!
//! Runs either end of an OCPP-J WebSocket link.
//!
//! # Usage
//!
//! ```bash
//! # CSMS accepting ocpp1.6, ocpp2.0.1 and ocpp2.1 stations
//! ocpp-node csms --listen 0.0.0.0:9000 --audit-log frames.jsonl
//!
//! # Station connecting as CS001 over OCPP 2.0.1
//! ocpp-node station --url ws://localhost:9000/ocpp --station CS001 --version 2.0.1
//!
//! # Station offering every version, authorizing one tag
//! ocpp-node station --station CS002 --id-tag B4A63CDF
//! ```

mod handlers;
mod station;
mod ws;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ocpp_core::audit::AuditHandle;
use ocpp_core::schema::v16;
use ocpp_core::{
    ActionDispatchTable, AuditConfig, AuditSink, Connection, JsonLinesWriter, NetworkIdentity,
    ProtocolVersion, RpcConfig,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::handlers::IdTagPolicy;
use crate::station::StationProfile;

/// OCPP-J node (CSMS or charging station)
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Outbound call timeout in seconds
    #[arg(long, default_value = "30", global = true)]
    call_timeout: u64,

    /// Append every frame as JSON lines to this file
    #[arg(long, global = true)]
    audit_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept charging stations
    Csms {
        /// Listen address
        #[arg(long, default_value = "0.0.0.0:9000")]
        listen: SocketAddr,

        /// Heartbeat interval handed out at boot, in seconds
        #[arg(long, default_value = "300")]
        heartbeat_interval: i32,

        /// Accepted id tags (can be repeated; none accepts all)
        #[arg(long)]
        id_tag: Vec<String>,
    },

    /// Connect to a CSMS as a charging station
    Station {
        /// CSMS WebSocket base URL; the station id is appended
        #[arg(long, default_value = "ws://localhost:9000/ocpp")]
        url: String,

        /// Station identity
        #[arg(short, long, default_value = "CS001")]
        station: String,

        /// Protocol version to offer (can be repeated; none offers all)
        #[arg(long = "version")]
        versions: Vec<ProtocolVersion>,

        /// Vendor name
        #[arg(long, default_value = "Elektrokombinacija")]
        vendor: String,

        /// Model name
        #[arg(long, default_value = "EK-OCPP")]
        model: String,

        /// Id tag to authorize after boot (1 to 20 characters)
        #[arg(long, value_parser = parse_id_tag)]
        id_tag: Option<String>,

        /// Stop after this many heartbeats
        #[arg(long)]
        heartbeats: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let config =
        RpcConfig::default().with_call_timeout(Duration::from_secs(args.call_timeout.max(1)));

    let audit = match &args.audit_log {
        Some(path) => {
            let writer = JsonLinesWriter::append(path)?;
            Some(AuditSink::spawn(writer, &config.audit)?)
        }
        None => None,
    };
    let sink = audit.as_ref().map(|(sink, _)| sink.clone());

    match args.command {
        Command::Csms {
            listen,
            heartbeat_interval,
            id_tag,
        } => {
            print_banner("CSMS", &listen.to_string(), "ocpp1.6, ocpp2.0.1, ocpp2.1");
            let table = handlers::csms_table(heartbeat_interval, IdTagPolicy::new(id_tag))?;
            run_csms(listen, Arc::new(table), config, sink).await?;
        }
        Command::Station {
            url,
            station,
            versions,
            vendor,
            model,
            id_tag,
            heartbeats,
        } => {
            let versions = if versions.is_empty() {
                ProtocolVersion::ALL.to_vec()
            } else {
                versions
            };
            let identity = NetworkIdentity::new(&station)?;
            let offered = versions.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
            print_banner("Station", &format!("{} @ {}", station, url), &offered);

            let profile = StationProfile {
                vendor,
                model,
                id_tag,
                heartbeats,
            };
            run_station(&url, identity, &versions, profile, config, sink).await?;
        }
    }

    if let Some((sink, handle)) = audit {
        drop(sink);
        finish_audit(handle).await;
    }
    Ok(())
}

async fn run_csms(
    listen: SocketAddr,
    table: Arc<ActionDispatchTable>,
    config: RpcConfig,
    audit: Option<AuditSink>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(listen).await?;
    info!("Listening on {}", listen);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                let table = Arc::clone(&table);
                let config = config.clone();
                let audit = audit.clone();
                tokio::spawn(async move {
                    let (ws, version, identity) = match ws::accept(stream).await {
                        Ok(link) => link,
                        Err(e) => {
                            warn!(%addr, "Handshake failed: {}", e);
                            return;
                        }
                    };
                    info!(%addr, station = %identity, %version, "Station connected");

                    let mut builder = Connection::builder(version)
                        .peer(identity)
                        .config(config)
                        .dispatch(table);
                    if let Some(sink) = audit {
                        builder = builder.audit(sink);
                    }
                    let (connection, outbound) = builder.build();
                    ws::run_link(ws, connection.clone(), outbound).await;
                    info!(%addr, stats = ?connection.stats(), "Station disconnected");
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}

async fn run_station(
    url: &str,
    identity: NetworkIdentity,
    versions: &[ProtocolVersion],
    profile: StationProfile,
    config: RpcConfig,
    audit: Option<AuditSink>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (ws, version) = ws::connect(url, &identity, versions).await?;

    let mut builder = Connection::builder(version)
        .config(config)
        .dispatch(Arc::new(handlers::station_table()?));
    if let Some(sink) = audit {
        builder = builder.audit(sink);
    }
    let (connection, outbound) = builder.build();
    let link = tokio::spawn(ws::run_link(ws, connection.clone(), outbound));

    let result = tokio::select! {
        result = station::run(connection.clone(), profile) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };
    connection.close("station stopped");
    link.abort();

    if let Err(e) = &result {
        error!("Station session failed: {}", e);
    }
    info!(stats = ?connection.stats(), "Session finished");
    Ok(result?)
}

async fn finish_audit(handle: AuditHandle) {
    match tokio::task::spawn_blocking(move || handle.join()).await {
        Ok(report) => info!(written = report.written, failed = report.failed, "Audit log closed"),
        Err(e) => error!("Audit writer join failed: {}", e),
    }
}

fn print_banner(role: &str, endpoint: &str, versions: &str) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                  OCPP Node - OCPP-J Engine                   ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Role:     {:<50} ║", role);
    println!("║  Endpoint: {:<50} ║", truncate(endpoint, 50));
    println!("║  Versions: {:<50} ║", truncate(versions, 50));
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

/// Id tags must fit the OCPP 1.6 `idTag` limit, the tightest of all versions
fn parse_id_tag(s: &str) -> Result<String, String> {
    let len = s.chars().count();
    if (1..=v16::MAX_ID_TAG_LEN).contains(&len) {
        Ok(s.to_string())
    } else {
        Err(format!(
            "id tag must be 1 to {} characters, got {}",
            v16::MAX_ID_TAG_LEN,
            len
        ))
    }
}

/// Truncate string with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
