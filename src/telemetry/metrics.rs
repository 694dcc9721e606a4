//! Prometheus metrics

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    /// JSON frames received on the push feed
    StreamMessages,
    /// Malformed, unknown or error frames
    StreamProtocolErrors,
    /// Significant cross-source discrepancies
    PriceDiscrepancies,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// 1 while the push feed is connected
    StreamConnected,
}

/// Start the Prometheus scrape endpoint on `0.0.0.0:port`
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics exporter: {}", e))?;

    tracing::info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Record one request against a price source
pub fn record_source_request(source: &'static str, success: bool, latency_ms: f64) {
    let outcome = if success { "success" } else { "failure" };
    ::metrics::counter!("polyfeed_source_requests_total", "source" => source, "outcome" => outcome)
        .increment(1);

    if success {
        ::metrics::histogram!("polyfeed_source_latency_ms", "source" => source).record(latency_ms);
    }
}

/// Increment a counter by one
pub fn increment_counter(metric: CounterMetric) {
    let metric_name = match metric {
        CounterMetric::StreamMessages => "polyfeed_stream_messages_total",
        CounterMetric::StreamProtocolErrors => "polyfeed_stream_protocol_errors_total",
        CounterMetric::PriceDiscrepancies => "polyfeed_price_discrepancies_total",
    };

    ::metrics::counter!(metric_name).increment(1);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    let metric_name = match metric {
        GaugeMetric::StreamConnected => "polyfeed_stream_connected",
    };

    ::metrics::gauge!(metric_name).set(value);
}
