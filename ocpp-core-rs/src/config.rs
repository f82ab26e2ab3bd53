//! Configuration for the OCPP-J engine
//!
//! Per-connection RPC settings plus the audit sink settings.

use std::time::Duration;

use crate::audit::RetryPolicy;

/// Per-connection RPC configuration
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Default timeout for outbound calls
    pub call_timeout: Duration,

    /// Maximum concurrently pending outbound calls (None = unlimited)
    pub max_in_flight: Option<usize>,

    /// Capacity of the outbound frame channel towards the transport
    pub outbound_capacity: usize,

    pub audit: AuditConfig,
}

/// Audit sink configuration
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Records buffered before new ones are dropped
    pub capacity: usize,

    /// Write retry policy of the writer thread
    pub retry: RetryPolicy,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            max_in_flight: None,
            outbound_capacity: 64,
            audit: AuditConfig::default(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            retry: RetryPolicy::default(),
        }
    }
}

impl RpcConfig {
    /// Set the default call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Limit concurrent outbound calls (OCPP 1.6 peers usually expect 1)
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit);
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    pub fn with_audit(mut self, audit: AuditConfig) -> Self {
        self.audit = audit;
        self
    }
}

impl AuditConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RpcConfig::default();
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert_eq!(config.max_in_flight, None);
        assert_eq!(config.outbound_capacity, 64);
        assert_eq!(config.audit.capacity, 1024);
        assert_eq!(config.audit.retry.max_attempts, 3);
    }

    #[test]
    fn test_config_builder() {
        let config = RpcConfig::default()
            .with_call_timeout(Duration::from_millis(200))
            .with_max_in_flight(1)
            .with_outbound_capacity(0)
            .with_audit(AuditConfig::default().with_capacity(8));

        assert_eq!(config.call_timeout, Duration::from_millis(200));
        assert_eq!(config.max_in_flight, Some(1));
        assert_eq!(config.outbound_capacity, 1);
        assert_eq!(config.audit.capacity, 8);
    }
}
