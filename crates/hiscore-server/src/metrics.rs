//! Metrics collection and export for hiscore.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use async_trait::async_trait;
use hiscore_core::HubStats;
use hiscore_transport::{Connection, FrameReader, FrameWriter, Inbound, TransportError};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "hiscore_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "hiscore_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "hiscore_connections_rejected_total";
    pub const FRAMES_INBOUND: &str = "hiscore_frames_inbound_total";
    pub const EVENTS_TOTAL: &str = "hiscore_events_total";
    pub const HUB_CLIENTS: &str = "hiscore_hub_clients";
    pub const HUB_TOPICS: &str = "hiscore_hub_topics";
    pub const HUB_SUBSCRIPTIONS: &str = "hiscore_hub_subscriptions";
    pub const HUB_EVICTIONS: &str = "hiscore_hub_evictions";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Connections refused at the upgrade"
    );
    metrics::describe_counter!(names::FRAMES_INBOUND, "Frames received from clients");
    metrics::describe_counter!(names::EVENTS_TOTAL, "Domain events ingested for fan-out");
    metrics::describe_gauge!(names::HUB_CLIENTS, "Clients registered with the hub");
    metrics::describe_gauge!(names::HUB_TOPICS, "Games with at least one subscriber");
    metrics::describe_gauge!(names::HUB_SUBSCRIPTIONS, "Total client subscriptions");
    metrics::describe_gauge!(
        names::HUB_EVICTIONS,
        "Clients evicted as slow consumers since start"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a refused connection.
pub fn record_rejection(reason: &'static str) {
    counter!(names::CONNECTIONS_REJECTED, "reason" => reason).increment(1);
}

/// Record an ingested event.
pub fn record_event(kind: &'static str) {
    counter!(names::EVENTS_TOTAL, "kind" => kind).increment(1);
}

/// Publish a hub statistics snapshot.
pub fn set_hub_stats(stats: &HubStats) {
    gauge!(names::HUB_CLIENTS).set(stats.client_count as f64);
    gauge!(names::HUB_TOPICS).set(stats.topic_count as f64);
    gauge!(names::HUB_SUBSCRIPTIONS).set(stats.total_subscriptions as f64);
    gauge!(names::HUB_EVICTIONS).set(stats.evicted_total as f64);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

/// A connection whose reader counts inbound frames.
pub struct MeteredConnection<C> {
    inner: C,
}

impl<C: Connection> MeteredConnection<C> {
    #[must_use]
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<C: Connection + 'static> Connection for MeteredConnection<C> {
    fn split(self: Box<Self>) -> (Box<dyn FrameWriter>, Box<dyn FrameReader>) {
        let MeteredConnection { inner } = *self;
        let (writer, reader) = Box::new(inner).split();
        (writer, Box::new(MeteredReader { inner: reader }))
    }

    fn remote_addr(&self) -> Option<String> {
        self.inner.remote_addr()
    }
}

struct MeteredReader {
    inner: Box<dyn FrameReader>,
}

#[async_trait]
impl FrameReader for MeteredReader {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        let frame = self.inner.recv().await?;
        match &frame {
            Some(Inbound::Text(_)) => counter!(names::FRAMES_INBOUND, "kind" => "text").increment(1),
            Some(Inbound::Binary(_)) => {
                counter!(names::FRAMES_INBOUND, "kind" => "binary").increment(1);
            }
            _ => {}
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiscore_transport::memory::pair;

    #[test]
    fn test_metrics_guard() {
        // No recorder installed; must not panic.
        let _guard = ConnectionMetricsGuard::new();
        set_hub_stats(&HubStats::default());
    }

    #[tokio::test]
    async fn test_metered_connection_passes_frames() {
        let (conn, mut peer) = pair();
        let metered: Box<dyn Connection> = Box::new(MeteredConnection::new(conn));
        assert_eq!(metered.remote_addr().as_deref(), Some("memory"));

        let (mut writer, mut reader) = metered.split();
        assert!(peer.send_text("hello"));
        assert!(peer.send_pong());
        assert_eq!(
            reader.recv().await.unwrap(),
            Some(Inbound::Text("hello".into()))
        );
        assert_eq!(reader.recv().await.unwrap(), Some(Inbound::Pong));

        writer.send_ping().await.unwrap();
        assert!(peer.recv().await.is_some());
    }
}
