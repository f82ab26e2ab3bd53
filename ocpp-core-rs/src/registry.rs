//! Pending-call registry
//!
//! One registry per connection. Every outbound Call is registered under a
//! fresh correlation id with a completion sink and a timer; exactly one of
//! `complete`, `expire`, `cancel` or `cancel_all` removes the entry and
//! delivers its outcome. Removal happens under the table lock, delivery
//! after it is released, so a response racing its own timeout can never be
//! delivered twice.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::CallFailure;
use crate::schema::{Payload, Request};
use crate::types::{CorrelationId, NetworkIdentity, ProtocolVersion};

/// What an outbound call resolves to: the raw response payload or a failure
pub type Outcome = Result<Value, CallFailure>;

struct Entry {
    action: String,
    version: ProtocolVersion,
    destination: Option<NetworkIdentity>,
    issued_at: Instant,
    timeout: Duration,
    sink: oneshot::Sender<Outcome>,
    timer: Option<AbortHandle>,
}

impl Entry {
    fn deadline(&self) -> Instant {
        self.issued_at + self.timeout
    }

    fn deliver(self, id: &CorrelationId, outcome: Outcome) {
        if let Some(timer) = &self.timer {
            timer.abort();
        }
        if self.sink.send(outcome).is_err() {
            debug!(id = %id, action = %self.action, "Caller stopped waiting for outcome");
        }
    }
}

#[derive(Default)]
struct Table {
    entries: HashMap<CorrelationId, Entry>,
    closed: Option<String>,
    stats: RegistryStats,
}

struct Inner {
    table: Mutex<Table>,
    max_in_flight: Option<usize>,
}

/// Counters for operators and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub registered: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    /// Responses that matched no pending call
    pub unmatched: u64,
    pub in_flight: usize,
}

/// Per-connection table of in-flight outbound calls
#[derive(Clone)]
pub struct PendingCallRegistry {
    inner: Arc<Inner>,
}

impl Default for PendingCallRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for PendingCallRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCallRegistry")
            .field("stats", &self.stats())
            .finish()
    }
}

impl PendingCallRegistry {
    pub fn new(max_in_flight: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(Table::default()),
                max_in_flight,
            }),
        }
    }

    /// Record a new outbound call and arm its timer
    ///
    /// The timer needs a tokio runtime; without one, overdue calls are only
    /// reaped by `expire_overdue`.
    pub fn register(
        &self,
        action: &str,
        version: ProtocolVersion,
        destination: Option<NetworkIdentity>,
        timeout: Duration,
    ) -> Result<PendingHandle, CallFailure> {
        let (sink, receiver) = oneshot::channel();
        let mut table = self.inner.table.lock();

        if let Some(reason) = &table.closed {
            return Err(CallFailure::ConnectionLost(reason.clone()));
        }
        if let Some(limit) = self.inner.max_in_flight {
            if table.entries.len() >= limit {
                return Err(CallFailure::TooManyInFlight(limit));
            }
        }

        let id = loop {
            let candidate = CorrelationId::generate();
            if !table.entries.contains_key(&candidate) {
                break candidate;
            }
        };

        let timer = tokio::runtime::Handle::try_current().ok().map(|runtime| {
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            let timer_id = id.clone();
            runtime
                .spawn(async move {
                    tokio::time::sleep(timeout).await;
                    if let Some(inner) = weak.upgrade() {
                        PendingCallRegistry { inner }.expire(&timer_id);
                    }
                })
                .abort_handle()
        });

        table.entries.insert(
            id.clone(),
            Entry {
                action: action.to_string(),
                version,
                destination,
                issued_at: Instant::now(),
                timeout,
                sink,
                timer,
            },
        );
        table.stats.registered += 1;
        drop(table);

        debug!(id = %id, action, %version, ?timeout, "Registered pending call");
        Ok(PendingHandle {
            correlation_id: id,
            receiver,
        })
    }

    /// Typed registration for request `R`
    pub fn register_call<R: Request>(
        &self,
        version: ProtocolVersion,
        destination: Option<NetworkIdentity>,
        timeout: Duration,
    ) -> Result<PendingCall<R>, CallFailure> {
        let handle = self.register(R::ACTION, version, destination, timeout)?;
        Ok(PendingCall {
            handle,
            version,
            _request: PhantomData,
        })
    }

    fn take(&self, id: &CorrelationId, count: impl FnOnce(&mut RegistryStats)) -> Option<Entry> {
        let mut table = self.inner.table.lock();
        let entry = table.entries.remove(id)?;
        count(&mut table.stats);
        Some(entry)
    }

    /// Deliver a response; returns false when nothing was pending under `id`
    pub fn complete(&self, id: &CorrelationId, outcome: Outcome) -> bool {
        let entry = {
            let mut table = self.inner.table.lock();
            let removed = table.entries.remove(id);
            match removed {
                Some(entry) => {
                    table.stats.completed += 1;
                    entry
                }
                None => {
                    table.stats.unmatched += 1;
                    drop(table);
                    warn!(id = %id, "Unmatched response dropped");
                    return false;
                }
            }
        };
        debug!(
            id = %id,
            action = %entry.action,
            elapsed = ?entry.issued_at.elapsed(),
            "Completed pending call"
        );
        entry.deliver(id, outcome);
        true
    }

    /// Deliver `Timeout` if the call is still pending
    pub fn expire(&self, id: &CorrelationId) -> bool {
        let Some(entry) = self.take(id, |stats| stats.timed_out += 1) else {
            return false;
        };
        debug!(
            id = %id,
            action = %entry.action,
            timeout = ?entry.timeout,
            "Pending call timed out"
        );
        let timeout = entry.timeout;
        entry.deliver(id, Err(CallFailure::Timeout(timeout)));
        true
    }

    /// Expire every call whose deadline is at or before `now`
    pub fn expire_overdue(&self, now: Instant) -> usize {
        let overdue: Vec<(CorrelationId, Entry)> = {
            let mut table = self.inner.table.lock();
            let ids: Vec<CorrelationId> = table
                .entries
                .iter()
                .filter(|(_, entry)| entry.deadline() <= now)
                .map(|(id, _)| id.clone())
                .collect();
            let taken: Vec<(CorrelationId, Entry)> = ids
                .into_iter()
                .filter_map(|id| table.entries.remove(&id).map(|entry| (id, entry)))
                .collect();
            table.stats.timed_out += taken.len() as u64;
            taken
        };

        let count = overdue.len();
        for (id, entry) in overdue {
            let timeout = entry.timeout;
            entry.deliver(&id, Err(CallFailure::Timeout(timeout)));
        }
        count
    }

    /// Fail one pending call with a local failure
    pub fn cancel(&self, id: &CorrelationId, failure: CallFailure) -> bool {
        let Some(entry) = self.take(id, |stats| stats.cancelled += 1) else {
            return false;
        };
        debug!(id = %id, action = %entry.action, %failure, "Pending call cancelled");
        entry.deliver(id, Err(failure));
        true
    }

    /// Connection teardown: fail everything and refuse new registrations
    pub fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<(CorrelationId, Entry)> = {
            let mut table = self.inner.table.lock();
            table.closed.get_or_insert_with(|| reason.to_string());
            let drained: Vec<_> = table.entries.drain().collect();
            table.stats.cancelled += drained.len() as u64;
            drained
        };

        let count = drained.len();
        if count > 0 {
            debug!(count, reason, "Cancelling pending calls");
        }
        for (id, entry) in drained {
            entry.deliver(&id, Err(CallFailure::ConnectionLost(reason.to_string())));
        }
        count
    }

    pub fn is_pending(&self, id: &CorrelationId) -> bool {
        self.inner.table.lock().entries.contains_key(id)
    }

    /// Destination and version of a pending call
    pub fn describe(
        &self,
        id: &CorrelationId,
    ) -> Option<(ProtocolVersion, Option<NetworkIdentity>)> {
        self.inner
            .table
            .lock()
            .entries
            .get(id)
            .map(|entry| (entry.version, entry.destination.clone()))
    }

    pub fn is_closed(&self) -> bool {
        self.inner.table.lock().closed.is_some()
    }

    pub fn stats(&self) -> RegistryStats {
        let table = self.inner.table.lock();
        RegistryStats {
            in_flight: table.entries.len(),
            ..table.stats
        }
    }
}

/// Caller side of one registered call
#[derive(Debug)]
pub struct PendingHandle {
    correlation_id: CorrelationId,
    receiver: oneshot::Receiver<Outcome>,
}

impl PendingHandle {
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Wait for the single outcome of this call
    pub async fn wait(self) -> Outcome {
        self.receiver
            .await
            .unwrap_or_else(|_| Err(CallFailure::ConnectionLost("registry dropped".to_string())))
    }
}

/// Caller side of a typed call; resolves to `R::Response`
#[derive(Debug)]
pub struct PendingCall<R: Request> {
    handle: PendingHandle,
    version: ProtocolVersion,
    _request: PhantomData<fn() -> R>,
}

impl<R: Request> PendingCall<R> {
    pub fn correlation_id(&self) -> &CorrelationId {
        self.handle.correlation_id()
    }

    /// Wait for the response and parse it with the response schema
    pub async fn wait(self) -> Result<R::Response, CallFailure> {
        let payload = self.handle.wait().await?;
        R::Response::try_parse(&payload, self.version).map_err(CallFailure::InvalidResponse)
    }
}
