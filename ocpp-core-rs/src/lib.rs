//! # OCPP Core
//!
//! OCPP-J RPC engine shared by charging stations, CSMS back-ends and
//! networking nodes.
//!
//! The crate covers everything between "a text frame arrived" and "a typed
//! handler ran": envelope framing, correlation of outbound calls with their
//! responses, version-aware payload schemas and dispatch of inbound calls.
//! Sockets, TLS and ping/pong stay with the transport.
//!
//! ## Architecture
//!
//! ```text
//!   WebSocket transport (subprotocol ocpp1.6 / ocpp2.0.1 / ocpp2.1)
//!        │ text frames                      ▲ OutboundFrame
//!        ▼                                  │
//! ┌──────────────────────────────────────────────────┐
//! │ Connection                                       │
//! │  ┌──────────┐   ┌──────────────────┐             │
//! │  │ Envelope │──►│ PendingCall      │ ◄── call()  │
//! │  │ codec    │   │ Registry         │             │
//! │  └────┬─────┘   └──────────────────┘             │
//! │       │ CALL                                     │
//! │       ▼                                          │
//! │  ┌──────────────────────┐   ┌────────────────┐   │
//! │  │ ActionDispatchTable  │──►│ typed handlers │   │
//! │  │ (version, action)    │   └────────────────┘   │
//! │  └──────────────────────┘                        │
//! └──────────────────────────────────────────────────┘
//!        │ frames
//!        ▼
//!   AuditSink (bounded, dedicated writer thread)
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use ocpp_core::schema::v2;
//! use ocpp_core::{ActionDispatchTable, Connection, ProtocolVersion};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut table = ActionDispatchTable::new();
//!     table.register::<v2::AuthorizeRequest, _, _>(ProtocolVersion::V201, |_req, _ctx| async {
//!         Ok(v2::AuthorizeResponse::new(v2::AuthorizationStatus::Accepted))
//!     })?;
//!
//!     let (conn, mut outbound) = Connection::builder(ProtocolVersion::V201)
//!         .dispatch(Arc::new(table))
//!         .build();
//!
//!     conn.receive_frame(r#"[2,"100000","Authorize",{"idToken":{"idToken":"X","type":"Central"}}]"#)
//!         .await;
//!     let reply = outbound.recv().await.ok_or("transport closed")?;
//!     println!("{}", reply.text);
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod messages;
pub mod registry;
pub mod routing;
pub mod schema;
pub mod types;

pub use audit::{AuditRecord, AuditSink, Direction, JsonLinesWriter, TracingWriter};
pub use config::{AuditConfig, RpcConfig};
pub use connection::{Connection, ConnectionBuilder, ConnectionStats, OutboundFrame};
pub use dispatch::{ActionDispatchTable, CallContext, RegistrationError};
pub use error::{CallFailure, ErrorCode, Fault, HandlerError};
pub use messages::{Call, CallError, CallResult, Envelope, FormatError, MessageType};
pub use registry::{PendingCallRegistry, RegistryStats};
pub use routing::{NetworkPath, NetworkPathResolver, Route};
pub use schema::{CustomData, Extensions, Payload, Request, SchemaError};
pub use types::{CorrelationId, NetworkIdentity, ProtocolVersion, TextEnum};
