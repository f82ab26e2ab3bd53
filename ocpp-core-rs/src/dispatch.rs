//! Action dispatch table
//!
//! Maps (protocol version, action) to a handler binding. A binding owns the
//! request/response schema pair of its `Request` type and the application
//! handler; inbound Calls are parsed, handled and answered here.
//!
//! Resolution is version-exclusive: a handler bound for 2.0.1 is never used
//! for a 2.1 or 1.6 connection. Unknown actions are answered
//! `NotImplemented`, known-but-unbound ones `NotSupported`; in both cases no
//! handler runs.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::error::{Fault, HandlerError};
use crate::messages::{Call, CallError, CallResult, Envelope};
use crate::routing::NetworkPath;
use crate::schema::{Extensions, Payload, Request};
use crate::types::{CorrelationId, NetworkIdentity, ProtocolVersion};

/// What a handler knows about the Call it is answering
#[derive(Debug, Clone)]
pub struct CallContext {
    pub version: ProtocolVersion,
    pub correlation_id: CorrelationId,
    pub action: String,
    /// Identity of the sending endpoint, when the transport knows it
    pub peer: Option<NetworkIdentity>,
    /// Hops the Call travelled (2.1 networking), empty when direct
    pub path: NetworkPath,
    pub received_at: DateTime<Utc>,
}

impl CallContext {
    pub fn new(version: ProtocolVersion, call: &Call) -> Self {
        Self {
            version,
            correlation_id: call.correlation_id.clone(),
            action: call.action.clone(),
            peer: None,
            path: NetworkPath::direct(),
            received_at: Utc::now(),
        }
    }

    pub fn with_peer(mut self, peer: NetworkIdentity) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_path(mut self, path: NetworkPath) -> Self {
        self.path = path;
        self
    }
}

type HandlerFuture = BoxFuture<'static, Result<Value, Fault>>;
type ErasedHandler =
    Arc<dyn Fn(Value, CallContext, Arc<Extensions>) -> HandlerFuture + Send + Sync>;

/// Request schema, response schema and application handler for one action
pub struct HandlerBinding {
    action: &'static str,
    version: ProtocolVersion,
    handler: ErasedHandler,
}

impl HandlerBinding {
    pub fn action(&self) -> &'static str {
        self.action
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }
}

impl std::fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("action", &self.action)
            .field("version", &self.version)
            .finish()
    }
}

/// Result of looking up an inbound action
#[derive(Debug)]
pub enum Resolution<'a> {
    Bound(&'a HandlerBinding),
    /// In the version vocabulary, but no handler registered
    Unsupported,
    /// Not an action of this protocol version
    Unknown,
}

/// Invalid handler registration; raised at startup, never at runtime
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("{action} has no schema for OCPP {version}")]
    VersionMismatch {
        action: &'static str,
        version: ProtocolVersion,
    },

    #[error("{action} is not an OCPP {version} action")]
    UnknownAction {
        action: &'static str,
        version: ProtocolVersion,
    },

    #[error("{action} already has a handler for OCPP {version}")]
    Duplicate {
        action: &'static str,
        version: ProtocolVersion,
    },
}

/// Read-mostly table shared by every connection; populate before accepting
#[derive(Debug, Default)]
pub struct ActionDispatchTable {
    bindings: HashMap<ProtocolVersion, HashMap<&'static str, HandlerBinding>>,
    extensions: Arc<Extensions>,
}

impl ActionDispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extension serializers applied to every response
    pub fn with_extensions(mut self, extensions: Extensions) -> Self {
        self.extensions = Arc::new(extensions);
        self
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Bind `handler` to request type `R` under `version`
    pub fn register<R, F, Fut>(
        &mut self,
        version: ProtocolVersion,
        handler: F,
    ) -> Result<&mut Self, RegistrationError>
    where
        R: Request,
        F: Fn(R, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Response, HandlerError>> + Send + 'static,
    {
        let action = R::ACTION;
        if !version.knows_action(action) {
            return Err(RegistrationError::UnknownAction { action, version });
        }
        if !R::supports(version) {
            return Err(RegistrationError::VersionMismatch { action, version });
        }
        let table = self.bindings.entry(version).or_default();
        if table.contains_key(action) {
            return Err(RegistrationError::Duplicate { action, version });
        }

        let handler = Arc::new(handler);
        let erased: ErasedHandler = Arc::new(move |payload, ctx, extensions| {
            let handler = Arc::clone(&handler);
            async move {
                let request = R::try_parse(&payload, ctx.version).map_err(|err| {
                    warn!(
                        action = R::ACTION,
                        id = %ctx.correlation_id,
                        error = %err,
                        "Request payload rejected"
                    );
                    Fault::from_schema_error(R::ACTION, &err)
                })?;
                let response = (*handler)(request, ctx).await.map_err(Fault::from)?;
                Ok(response.to_document(&extensions))
            }
            .boxed()
        });

        debug!(action, %version, "Handler bound");
        table.insert(
            action,
            HandlerBinding {
                action,
                version,
                handler: erased,
            },
        );
        Ok(self)
    }

    pub fn resolve(&self, version: ProtocolVersion, action: &str) -> Resolution<'_> {
        match self.bindings.get(&version).and_then(|t| t.get(action)) {
            Some(binding) => Resolution::Bound(binding),
            None if version.knows_action(action) => Resolution::Unsupported,
            None => Resolution::Unknown,
        }
    }

    /// Actions with a handler under `version`
    pub fn bound_actions(&self, version: ProtocolVersion) -> Vec<&'static str> {
        let mut actions: Vec<&'static str> = self
            .bindings
            .get(&version)
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default();
        actions.sort_unstable();
        actions
    }

    /// Answer one inbound Call with a CallResult or CallError
    pub async fn dispatch(&self, call: Call, ctx: CallContext) -> Envelope {
        let id = call.correlation_id.clone();
        match self.respond(call, ctx).await {
            Ok(payload) => CallResult::new(id, payload).into(),
            Err(fault) => CallError::from_fault(id, fault).into(),
        }
    }

    async fn respond(&self, call: Call, ctx: CallContext) -> Result<Value, Fault> {
        let binding = match self.resolve(ctx.version, &call.action) {
            Resolution::Bound(binding) => binding,
            Resolution::Unsupported => {
                debug!(action = %call.action, version = %ctx.version, "No handler bound");
                return Err(Fault::not_supported(&call.action));
            }
            Resolution::Unknown => {
                warn!(action = %call.action, version = %ctx.version, "Unknown action");
                return Err(Fault::not_implemented(&call.action));
            }
        };

        let action = binding.action;
        let future = (binding.handler)(call.payload, ctx, Arc::clone(&self.extensions));
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                error!(action, "Handler panicked: {}", panic_message(&*panic));
                Err(Fault::internal(format!("Handler for {action} failed")))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
