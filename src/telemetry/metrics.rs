//! Prometheus metrics

use ::metrics::{counter, gauge};

/// Counter metric types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterMetric {
    /// `open` completed with a connection
    ConnectionsOpened,
    /// `open` failed
    OpenFailures,
    /// Text messages delivered to handlers
    MessagesReceived,
    /// Payloads accepted by the underlying socket
    MessagesSent,
    /// Sends refused with `NotOpen` or `BadString`
    SendsRefused,
    /// `close` calls rejected by the underlying socket
    ClosesRejected,
    /// Close events observed
    ConnectionsClosed,
}

impl CounterMetric {
    /// Exported metric name
    pub fn name(self) -> &'static str {
        match self {
            CounterMetric::ConnectionsOpened => "wsfacade_connections_opened_total",
            CounterMetric::OpenFailures => "wsfacade_open_failures_total",
            CounterMetric::MessagesReceived => "wsfacade_messages_received_total",
            CounterMetric::MessagesSent => "wsfacade_messages_sent_total",
            CounterMetric::SendsRefused => "wsfacade_sends_refused_total",
            CounterMetric::ClosesRejected => "wsfacade_closes_rejected_total",
            CounterMetric::ConnectionsClosed => "wsfacade_connections_closed_total",
        }
    }
}

/// Gauge metric types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaugeMetric {
    /// Connections that reached `Open` and have not closed yet
    OpenConnections,
}

impl GaugeMetric {
    /// Exported metric name
    pub fn name(self) -> &'static str {
        match self {
            GaugeMetric::OpenConnections => "wsfacade_open_connections",
        }
    }
}

/// Increment a counter by one
pub fn increment(metric: CounterMetric) {
    counter!(metric.name()).increment(1);
}

/// Increment a counter by one, labelled with the failure reason
pub fn increment_with_reason(metric: CounterMetric, reason: &'static str) {
    counter!(metric.name(), "reason" => reason).increment(1);
}

/// Move a gauge up or down
pub fn adjust_gauge(metric: GaugeMetric, delta: f64) {
    gauge!(metric.name()).increment(delta);
}
