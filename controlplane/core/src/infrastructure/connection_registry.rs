// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Gateway Connection Registry
//!
//! `DashMap`-backed registry of live gateway connections, plus
//! [`ChannelConnection`], a connection whose write side is a bounded tokio
//! channel. The transport (WebSocket, gRPC stream) drains the receiving end;
//! framing, handshakes and reconnects live there, not here.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `ConnectionRegistry` and `GatewayConnection`

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::api::GatewayId;
use crate::domain::connection::{
    ChannelSettings, ConnectionError, ConnectionRegistry, DeliveryStats, DeliveryStatsSnapshot,
    GatewayConnection,
};

/// Connection whose sends are enqueued on a bounded channel.
///
/// The channel preserves per-connection order; a full channel that stays
/// full past `send_timeout` fails the send rather than blocking the caller.
pub struct ChannelConnection {
    connection_id: String,
    gateway_id: GatewayId,
    sender: mpsc::Sender<Bytes>,
    send_timeout: Duration,
    stats: DeliveryStats,
}

impl ChannelConnection {
    pub fn new(
        connection_id: impl Into<String>,
        gateway_id: GatewayId,
        capacity: usize,
        send_timeout: Duration,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let connection = Self {
            connection_id: connection_id.into(),
            gateway_id,
            sender,
            send_timeout,
            stats: DeliveryStats::new(),
        };
        (connection, receiver)
    }
}

#[async_trait]
impl GatewayConnection for ChannelConnection {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn gateway_id(&self) -> GatewayId {
        self.gateway_id
    }

    async fn send(&self, message: Bytes) -> Result<(), ConnectionError> {
        match tokio::time::timeout(self.send_timeout, self.sender.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ConnectionError::Closed),
            Err(_) => Err(ConnectionError::Timeout(self.send_timeout.as_millis() as u64)),
        }
    }

    fn stats(&self) -> &DeliveryStats {
        &self.stats
    }
}

/// Delivery counters for one registered connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatsEntry {
    pub connection_id: String,
    pub stats: DeliveryStatsSnapshot,
}

#[derive(Default)]
pub struct InMemoryConnectionRegistry {
    connections: DashMap<GatewayId, Vec<Arc<dyn GatewayConnection>>>,
    settings: ChannelSettings,
}

impl InMemoryConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: ChannelSettings) -> Self {
        Self {
            connections: DashMap::new(),
            settings,
        }
    }

    /// Register a channel-backed connection for an accepted gateway session.
    /// The transport drains the returned receiver onto the wire.
    pub fn open_channel(
        &self,
        connection_id: impl Into<String>,
        gateway_id: GatewayId,
    ) -> mpsc::Receiver<Bytes> {
        let (connection, receiver) = ChannelConnection::new(
            connection_id,
            gateway_id,
            self.settings.capacity,
            self.settings.send_timeout,
        );
        self.register(Arc::new(connection));
        receiver
    }

    /// Add a connection; replaces any existing one with the same id on that gateway
    pub fn register(&self, connection: Arc<dyn GatewayConnection>) {
        let gateway_id = connection.gateway_id();
        let connection_id = connection.connection_id().to_string();
        let mut entry = self.connections.entry(gateway_id).or_default();
        entry.retain(|existing| existing.connection_id() != connection_id);
        entry.push(connection);
        info!(
            "Registered connection {} for gateway {} ({} live)",
            connection_id,
            gateway_id,
            entry.len()
        );
    }

    pub fn unregister(&self, gateway_id: GatewayId, connection_id: &str) -> bool {
        let mut removed = false;
        if let Some(mut entry) = self.connections.get_mut(&gateway_id) {
            let before = entry.len();
            entry.retain(|existing| existing.connection_id() != connection_id);
            removed = entry.len() != before;
        }
        self.connections.remove_if(&gateway_id, |_, conns| conns.is_empty());
        if removed {
            debug!("Unregistered connection {} for gateway {}", connection_id, gateway_id);
        }
        removed
    }

    pub fn connection_count(&self, gateway_id: GatewayId) -> usize {
        self.connections
            .get(&gateway_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    pub fn stats_for_gateway(&self, gateway_id: GatewayId) -> Vec<ConnectionStatsEntry> {
        self.get_connections(gateway_id)
            .iter()
            .map(|conn| ConnectionStatsEntry {
                connection_id: conn.connection_id().to_string(),
                stats: conn.stats().snapshot(),
            })
            .collect()
    }
}

impl ConnectionRegistry for InMemoryConnectionRegistry {
    fn get_connections(&self, gateway_id: GatewayId) -> Vec<Arc<dyn GatewayConnection>> {
        // Clone out so no shard lock is held while callers await sends
        self.connections
            .get(&gateway_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_connection_preserves_order() {
        let gateway_id = GatewayId::new();
        let (conn, mut rx) = ChannelConnection::new("c1", gateway_id, 8, Duration::from_millis(100));

        for i in 0..5 {
            conn.send(Bytes::from(format!("event-{}", i))).await.unwrap();
        }

        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap(), Bytes::from(format!("event-{}", i)));
        }
    }

    #[tokio::test]
    async fn test_channel_connection_times_out_when_full() {
        let (conn, _rx) = ChannelConnection::new("c1", GatewayId::new(), 1, Duration::from_millis(20));
        conn.send(Bytes::from_static(b"first")).await.unwrap();

        assert_eq!(
            conn.send(Bytes::from_static(b"second")).await,
            Err(ConnectionError::Timeout(20))
        );
    }

    #[tokio::test]
    async fn test_channel_connection_reports_closed() {
        let (conn, rx) = ChannelConnection::new("c1", GatewayId::new(), 1, Duration::from_millis(20));
        drop(rx);
        assert_eq!(
            conn.send(Bytes::from_static(b"lost")).await,
            Err(ConnectionError::Closed)
        );
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = InMemoryConnectionRegistry::new();
        let gateway_id = GatewayId::new();
        let (a, _rx_a) = ChannelConnection::new("a", gateway_id, 1, Duration::from_secs(1));
        let (b, _rx_b) = ChannelConnection::new("b", gateway_id, 1, Duration::from_secs(1));
        registry.register(Arc::new(a));
        registry.register(Arc::new(b));

        assert_eq!(registry.connection_count(gateway_id), 2);
        assert_eq!(registry.get_connections(GatewayId::new()).len(), 0);

        assert!(registry.unregister(gateway_id, "a"));
        assert!(!registry.unregister(gateway_id, "a"));
        assert_eq!(registry.connection_count(gateway_id), 1);

        assert!(registry.unregister(gateway_id, "b"));
        assert_eq!(registry.connection_count(gateway_id), 0);
    }

    #[tokio::test]
    async fn test_open_channel_applies_settings() {
        let registry = InMemoryConnectionRegistry::with_settings(ChannelSettings {
            capacity: 1,
            send_timeout: Duration::from_millis(10),
        });
        let gateway_id = GatewayId::new();
        let _rx = registry.open_channel("replica-1", gateway_id);

        let connections = registry.get_connections(gateway_id);
        let conn = &connections[0];
        conn.send(Bytes::from_static(b"first")).await.unwrap();
        assert_eq!(
            conn.send(Bytes::from_static(b"second")).await,
            Err(ConnectionError::Timeout(10))
        );
    }

    #[test]
    fn test_reregistering_same_id_replaces_connection() {
        let registry = InMemoryConnectionRegistry::new();
        let gateway_id = GatewayId::new();
        let (first, _rx1) = ChannelConnection::new("replica-1", gateway_id, 1, Duration::from_secs(1));
        let (second, _rx2) = ChannelConnection::new("replica-1", gateway_id, 1, Duration::from_secs(1));
        registry.register(Arc::new(first));
        registry.register(Arc::new(second));

        assert_eq!(registry.connection_count(gateway_id), 1);
        assert_eq!(registry.stats_for_gateway(gateway_id)[0].connection_id, "replica-1");
    }
}
