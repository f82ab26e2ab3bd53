//! Per-connection OCPP-J engine
//!
//! A `Connection` sits between one transport link and the application:
//!
//! ```text
//!             transport read loop
//!                    │ receive_frame(text)
//!                    ▼
//! ┌───────────────────────────────────────────────┐
//! │ Connection                                    │
//! │   Envelope codec ──► Call ──► dispatch table ─┼──► handler (spawned)
//! │                 └──► CallResult/CallError     │
//! │                        └──► pending registry ─┼──► waiting caller
//! └──────────────┬────────────────────────────────┘
//!                │ OutboundFrame (mpsc)
//!                ▼
//!        transport write loop
//! ```
//!
//! The transport owns the socket, ping/pong and subprotocol negotiation; it
//! feeds whole text frames in order, drains `OutboundFrame`s, and calls
//! `close` on teardown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audit::{AuditRecord, AuditSink, Direction};
use crate::config::RpcConfig;
use crate::dispatch::{ActionDispatchTable, CallContext};
use crate::error::CallFailure;
use crate::messages::{Call, Envelope};
use crate::registry::{PendingCall, PendingCallRegistry, RegistryStats};
use crate::routing::{NetworkPath, Route};
use crate::schema::{Extensions, Request};
use crate::types::{NetworkIdentity, ProtocolVersion};

/// A text frame for the transport to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub text: String,
    /// Logical destination when it differs from the link peer (2.1)
    pub destination: Option<NetworkIdentity>,
    /// Hops to embed for multi-hop delivery, empty when direct
    pub path: NetworkPath,
}

impl OutboundFrame {
    fn direct(text: String) -> Self {
        Self {
            text,
            destination: None,
            path: NetworkPath::direct(),
        }
    }
}

/// Counters of one connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub registry: RegistryStats,
    pub inbound_calls: u64,
    /// Inbound frames that failed envelope validation
    pub format_errors: u64,
}

struct ConnectionInner {
    version: ProtocolVersion,
    peer: Option<NetworkIdentity>,
    config: RpcConfig,
    registry: PendingCallRegistry,
    dispatch: Arc<ActionDispatchTable>,
    extensions: Extensions,
    outbound: mpsc::Sender<OutboundFrame>,
    audit: Option<AuditSink>,
    inbound_calls: AtomicU64,
    format_errors: AtomicU64,
}

/// Handle to one OCPP-J connection; clones share the same state
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("version", &self.inner.version)
            .field("peer", &self.inner.peer)
            .finish()
    }
}

/// Builder for a connection
pub struct ConnectionBuilder {
    version: ProtocolVersion,
    peer: Option<NetworkIdentity>,
    config: RpcConfig,
    dispatch: Arc<ActionDispatchTable>,
    extensions: Extensions,
    audit: Option<AuditSink>,
}

impl ConnectionBuilder {
    /// `version` is the subprotocol negotiated by the transport
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            peer: None,
            config: RpcConfig::default(),
            dispatch: Arc::new(ActionDispatchTable::new()),
            extensions: Extensions::default(),
            audit: None,
        }
    }

    /// Identity of the remote endpoint
    pub fn peer(mut self, peer: NetworkIdentity) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    /// Shared handler table for inbound Calls
    pub fn dispatch(mut self, table: Arc<ActionDispatchTable>) -> Self {
        self.dispatch = table;
        self
    }

    /// Extension serializers for outbound requests
    pub fn extensions(mut self, extensions: Extensions) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn audit(mut self, sink: AuditSink) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Returns the connection and the frame stream the transport must write
    pub fn build(self) -> (Connection, mpsc::Receiver<OutboundFrame>) {
        let (outbound, outbound_rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let registry = PendingCallRegistry::new(self.config.max_in_flight);
        let connection = Connection {
            inner: Arc::new(ConnectionInner {
                version: self.version,
                peer: self.peer,
                config: self.config,
                registry,
                dispatch: self.dispatch,
                extensions: self.extensions,
                outbound,
                audit: self.audit,
                inbound_calls: AtomicU64::new(0),
                format_errors: AtomicU64::new(0),
            }),
        };
        (connection, outbound_rx)
    }
}

impl Connection {
    pub fn builder(version: ProtocolVersion) -> ConnectionBuilder {
        ConnectionBuilder::new(version)
    }

    pub fn version(&self) -> ProtocolVersion {
        self.inner.version
    }

    pub fn peer(&self) -> Option<&NetworkIdentity> {
        self.inner.peer.as_ref()
    }

    pub fn registry(&self) -> &PendingCallRegistry {
        &self.inner.registry
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            registry: self.inner.registry.stats(),
            inbound_calls: self.inner.inbound_calls.load(Ordering::Relaxed),
            format_errors: self.inner.format_errors.load(Ordering::Relaxed),
        }
    }

    /// Send a request and wait for its response, using the configured timeout
    pub async fn call<R: Request>(&self, request: &R) -> Result<R::Response, CallFailure> {
        self.call_with_timeout(request, self.inner.config.call_timeout)
            .await
    }

    pub async fn call_with_timeout<R: Request>(
        &self,
        request: &R,
        timeout: Duration,
    ) -> Result<R::Response, CallFailure> {
        self.start_call(request, None, NetworkPath::direct(), timeout)
            .await?
            .wait()
            .await
    }

    /// Send a request to a station behind this link (OCPP 2.1 networking)
    pub async fn call_routed<R: Request>(
        &self,
        request: &R,
        destination: NetworkIdentity,
        path: NetworkPath,
        timeout: Duration,
    ) -> Result<R::Response, CallFailure> {
        if !path.is_direct() && !self.inner.version.supports_network_paths() {
            debug!(
                destination = %destination,
                version = %self.inner.version,
                "Multi-hop delivery needs OCPP 2.1"
            );
            return Err(CallFailure::Unreachable(destination));
        }
        self.start_call(request, Some(destination), path, timeout)
            .await?
            .wait()
            .await
    }

    /// Frame and send a request; the returned handle resolves exactly once
    pub async fn start_call<R: Request>(
        &self,
        request: &R,
        destination: Option<NetworkIdentity>,
        path: NetworkPath,
        timeout: Duration,
    ) -> Result<PendingCall<R>, CallFailure> {
        let version = self.inner.version;
        if !R::supports(version) {
            return Err(CallFailure::UnsupportedAction {
                action: R::ACTION,
                version,
            });
        }

        let pending = self
            .inner
            .registry
            .register_call::<R>(version, destination.clone(), timeout)?;
        let call = Call::from_request(
            pending.correlation_id().clone(),
            request,
            &self.inner.extensions,
        );
        let frame = OutboundFrame {
            text: Envelope::from(call).to_text(version),
            destination,
            path,
        };

        if self.transmit(frame).await.is_err() {
            self.inner.registry.cancel(
                pending.correlation_id(),
                CallFailure::ConnectionLost("transport closed".to_string()),
            );
        }
        Ok(pending)
    }

    /// Feed one inbound text frame
    pub async fn receive_frame(&self, text: &str) {
        self.receive_frame_via(text, NetworkPath::direct()).await
    }

    /// Feed one inbound text frame that travelled `path`
    pub async fn receive_frame_via(&self, text: &str, path: NetworkPath) {
        self.audit(Direction::Inbound, text);

        match Envelope::parse(text) {
            Ok(Envelope::Call(call)) => {
                self.inner.inbound_calls.fetch_add(1, Ordering::Relaxed);
                self.spawn_handler(call, path);
            }
            Ok(Envelope::CallResult(result)) => {
                self.inner
                    .registry
                    .complete(&result.correlation_id, Ok(result.payload));
            }
            Ok(Envelope::CallError(err)) => {
                let id = err.correlation_id.clone();
                let fault = err.into_fault();
                self.inner.registry.complete(
                    &id,
                    Err(CallFailure::Remote {
                        code: fault.code,
                        description: fault.description,
                        details: fault.details,
                    }),
                );
            }
            Err(err) => {
                self.inner.format_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    peer = ?self.inner.peer,
                    kind = err.kind.as_str(),
                    error = %err,
                    "Malformed frame"
                );
                if err.should_reply() {
                    let reply = Envelope::from(err.to_call_error()).to_text(self.inner.version);
                    if self.transmit(OutboundFrame::direct(reply)).await.is_err() {
                        debug!("Transport closed before CALLERROR could be sent");
                    }
                }
            }
        }
    }

    fn spawn_handler(&self, call: Call, path: NetworkPath) {
        let connection = self.clone();
        tokio::spawn(async move {
            let inner = &connection.inner;
            let mut ctx = CallContext::new(inner.version, &call).with_path(path);
            if let Some(peer) = &inner.peer {
                ctx = ctx.with_peer(peer.clone());
            }
            debug!(id = %call.correlation_id, action = %call.action, "Dispatching call");

            let reply = inner.dispatch.dispatch(call, ctx).await;
            let text = reply.to_text(inner.version);
            if connection.transmit(OutboundFrame::direct(text)).await.is_err() {
                debug!(id = %reply.correlation_id(), "Transport closed before reply could be sent");
            }
        });
    }

    async fn transmit(&self, frame: OutboundFrame) -> Result<(), CallFailure> {
        self.audit(Direction::Outbound, &frame.text);
        self.inner
            .outbound
            .send(frame)
            .await
            .map_err(|_| CallFailure::ConnectionLost("transport closed".to_string()))
    }

    fn audit(&self, direction: Direction, text: &str) {
        if let Some(sink) = &self.inner.audit {
            sink.record(AuditRecord::new(self.inner.peer.clone(), direction, text));
        }
    }

    /// Teardown: every pending call resolves to `ConnectionLost(reason)`
    pub fn close(&self, reason: &str) {
        let cancelled = self.inner.registry.cancel_all(reason);
        info!(
            peer = ?self.inner.peer,
            cancelled,
            reason,
            "Connection closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.inner.registry.is_closed()
    }
}

impl Route<Connection> {
    /// Issue `request` over the resolved link
    pub async fn call<R: Request>(self, request: &R) -> Result<R::Response, CallFailure> {
        let timeout = self.link.inner.config.call_timeout;
        self.link
            .call_routed(request, self.destination, self.path, timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, HandlerError};
    use crate::routing::NetworkPathResolver;
    use crate::schema::{v16, v2};
    use serde_json::Value;

    const LONG: Duration = Duration::from_secs(60);

    fn reply_to(frame: &OutboundFrame) -> String {
        let doc: Value = serde_json::from_str(&frame.text).unwrap();
        doc[1].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_outbound_call_round_trip() {
        let (conn, mut rx) = Connection::builder(ProtocolVersion::V201).build();
        let caller = conn.clone();
        let task = tokio::spawn(async move { caller.call(&v2::HeartbeatRequest::default()).await });

        let frame = rx.recv().await.unwrap();
        assert!(frame.text.starts_with("[2,"));
        assert!(frame.text.contains(r#""Heartbeat",{}]"#));

        let id = reply_to(&frame);
        conn.receive_frame(&format!(r#"[3,"{id}",{{"currentTime":"2026-01-20T12:00:00Z"}}]"#))
            .await;
        let resp = task.await.unwrap().unwrap();
        assert_eq!(resp.current_time.to_rfc3339(), "2026-01-20T12:00:00+00:00");
        assert_eq!(conn.stats().registry.completed, 1);
    }

    #[tokio::test]
    async fn test_call_error_reaches_caller() {
        let (conn, mut rx) = Connection::builder(ProtocolVersion::V16).build();
        let caller = conn.clone();
        let task = tokio::spawn(async move {
            caller
                .call(&v16::AuthorizeRequest::new("B4A63CDF"))
                .await
        });
        let id = reply_to(&rx.recv().await.unwrap());
        conn.receive_frame(&format!(
            r#"[4,"{id}","OccurenceConstraintViolation","bad",{{}}]"#
        ))
        .await;
        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.remote_code(), Some(ErrorCode::OccurrenceConstraintViolation));
    }

    #[tokio::test]
    async fn test_wrong_version_request_rejected_locally() {
        let (conn, mut rx) = Connection::builder(ProtocolVersion::V16).build();
        let err = conn
            .call(&v2::HeartbeatRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CallFailure::UnsupportedAction { action: "Heartbeat", .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_call_answered() {
        let (conn, mut rx) = Connection::builder(ProtocolVersion::V201).build();
        conn.receive_frame(r#"[2,"1"]"#).await;
        let frame = rx.recv().await.unwrap();
        assert_eq!(
            frame.text,
            r#"[4,"1","FormatViolation","Call must have 4 elements, found 2",{"reason":"wrong_arity"}]"#
        );

        conn.receive_frame("not json").await;
        let frame = rx.recv().await.unwrap();
        assert!(frame.text.starts_with(r#"[4,"-1","FormatViolation""#));
        assert_eq!(conn.stats().format_errors, 2);
    }

    #[tokio::test]
    async fn test_malformed_response_not_answered() {
        let (conn, mut rx) = Connection::builder(ProtocolVersion::V201).build();
        conn.receive_frame(r#"[3,"1"]"#).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(conn.stats().format_errors, 1);
    }

    #[tokio::test]
    async fn test_inbound_call_dispatched() {
        let mut table = ActionDispatchTable::new();
        table
            .register::<v2::DataTransferRequest, _, _>(ProtocolVersion::V21, |req, ctx| async move {
                if ctx.peer.as_ref().map(|p| p.as_str()) != Some("CS001") {
                    return Err(HandlerError::Security("unknown peer".into()));
                }
                Ok(v2::DataTransferResponse {
                    status: v2::DataTransferStatus::Accepted,
                    status_info: None,
                    data: req.data,
                    custom_data: None,
                })
            })
            .unwrap();
        let (conn, mut rx) = Connection::builder(ProtocolVersion::V21)
            .peer(NetworkIdentity::new("CS001").unwrap())
            .dispatch(Arc::new(table))
            .build();

        conn.receive_frame(r#"[2,"dt-1","DataTransfer",{"vendorId":"acme","data":[1,2]}]"#)
            .await;
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.text, r#"[3,"dt-1",{"data":[1,2],"status":"Accepted"}]"#);
        assert_eq!(conn.stats().inbound_calls, 1);
    }

    #[tokio::test]
    async fn test_close_cancels_pending() {
        let (conn, mut rx) = Connection::builder(ProtocolVersion::V201).build();
        let caller = conn.clone();
        let task = tokio::spawn(async move {
            caller
                .call_with_timeout(&v2::HeartbeatRequest::default(), LONG)
                .await
        });
        rx.recv().await.unwrap();
        conn.close("peer reset");

        match task.await.unwrap() {
            Err(CallFailure::ConnectionLost(reason)) => assert_eq!(reason, "peer reset"),
            other => panic!("expected ConnectionLost, got {other:?}"),
        }
        assert!(conn.is_closed());
        assert!(matches!(
            conn.call(&v2::HeartbeatRequest::default()).await,
            Err(CallFailure::ConnectionLost(_))
        ));
    }

    #[tokio::test]
    async fn test_transport_gone_is_connection_lost() {
        let (conn, rx) = Connection::builder(ProtocolVersion::V201).build();
        drop(rx);
        let err = conn
            .call(&v2::HeartbeatRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CallFailure::ConnectionLost(_)));
    }

    #[tokio::test]
    async fn test_routed_call_embeds_path() {
        let (link, mut rx) = Connection::builder(ProtocolVersion::V21).build();
        let mut resolver = NetworkPathResolver::default();
        let lc = NetworkIdentity::new("LC01").unwrap();
        let cs = NetworkIdentity::new("CS042").unwrap();
        resolver.add_link(lc.clone(), link.clone());
        resolver.add_route(cs.clone(), lc.clone());

        let route = resolver.resolve(&cs).unwrap();
        let task = tokio::spawn(async move { route.call(&v2::HeartbeatRequest::default()).await });

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.destination, Some(cs.clone()));
        assert_eq!(frame.path.hops(), &[lc, cs]);

        let id = reply_to(&frame);
        link.receive_frame(&format!(r#"[3,"{id}",{{"currentTime":"2026-01-20T12:00:00Z"}}]"#))
            .await;
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_multi_hop_needs_v21() {
        let (conn, _rx) = Connection::builder(ProtocolVersion::V201).build();
        let cs = NetworkIdentity::new("CS042").unwrap();
        let path = NetworkPath::new(vec![NetworkIdentity::new("LC01").unwrap(), cs.clone()], &cs);
        let err = conn
            .call_routed(&v2::HeartbeatRequest::default(), cs, path, LONG)
            .await
            .unwrap_err();
        assert!(matches!(err, CallFailure::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_frames_are_audited() {
        let (sink, handle) = AuditSink::spawn(
            crate::audit::TracingWriter,
            &crate::config::AuditConfig::default(),
        )
        .unwrap();
        let (conn, mut rx) = Connection::builder(ProtocolVersion::V201)
            .audit(sink.clone())
            .build();
        conn.receive_frame(r#"[3,"nobody",{}]"#).await;
        conn.receive_frame(r#"[2,"1"]"#).await;
        rx.recv().await.unwrap();
        assert_eq!(sink.dropped(), 0);
        assert_eq!(conn.stats().registry.unmatched, 1);

        drop(conn);
        drop(sink);
        let report = tokio::task::spawn_blocking(move || handle.join()).await.unwrap();
        assert_eq!(report.written, 3);
    }
}
