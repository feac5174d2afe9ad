// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Gateway Connections
//!
//! A gateway may be connected through several live replicas at once (rolling
//! upgrades, clustered gateways). Each replica is one [`GatewayConnection`];
//! the [`ConnectionRegistry`] maps a gateway id to all of them.
//!
//! Connections own their write path and its timeout. Their delivery counters
//! are touched by concurrent broadcasts, so [`DeliveryStats`] is atomics plus
//! a small lock for the last failure reason.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::domain::api::GatewayId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    #[error("send timed out after {0}ms")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Running delivery counters for one connection
#[derive(Debug, Default)]
pub struct DeliveryStats {
    total_sent: AtomicU64,
    total_failed: AtomicU64,
    last_failure: Mutex<Option<FailureRecord>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryStatsSnapshot {
    pub total_sent: u64,
    pub total_failed: u64,
    pub last_failure: Option<FailureRecord>,
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_total_sent(&self) {
        self.total_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self, reason: impl Into<String>) {
        self.total_failed.fetch_add(1, Ordering::Relaxed);
        *self.last_failure.lock() = Some(FailureRecord {
            reason: reason.into(),
            at: Utc::now(),
        });
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent.load(Ordering::Relaxed)
    }

    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            total_sent: self.total_sent(),
            total_failed: self.total_failed(),
            last_failure: self.last_failure.lock().clone(),
        }
    }
}

/// Write-side sizing for channel-backed connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    pub capacity: usize,
    pub send_timeout: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            capacity: 256,
            send_timeout: Duration::from_millis(5000),
        }
    }
}

/// One live, independently writable connection to a gateway replica
#[async_trait]
pub trait GatewayConnection: Send + Sync {
    fn connection_id(&self) -> &str;

    fn gateway_id(&self) -> GatewayId;

    /// Deliver one serialized envelope. Must be safe to call concurrently;
    /// calls made one after another are delivered in that order.
    async fn send(&self, message: Bytes) -> Result<(), ConnectionError>;

    fn stats(&self) -> &DeliveryStats;
}

/// Shared lookup from gateway id to its live connections
pub trait ConnectionRegistry: Send + Sync {
    fn get_connections(&self, gateway_id: GatewayId) -> Vec<Arc<dyn GatewayConnection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_record_failures_with_reason() {
        let stats = DeliveryStats::new();
        stats.increment_total_sent();
        stats.increment_failed("broken pipe");
        stats.increment_failed("send timed out after 5000ms");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_sent, 1);
        assert_eq!(snapshot.total_failed, 2);
        assert_eq!(
            snapshot.last_failure.map(|f| f.reason).as_deref(),
            Some("send timed out after 5000ms")
        );
    }

    #[test]
    fn test_stats_are_shared_across_threads() {
        let stats = Arc::new(DeliveryStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        stats.increment_total_sent();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.total_sent(), 800);
    }
}
