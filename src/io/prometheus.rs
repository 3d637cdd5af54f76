//! Prometheus metrics HTTP endpoint
//!
//! Exposes monitor metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server. Reads cumulative values only, so
//! scraping never disturbs the periodic log report.

use crate::domain::types::SafetyState;
use crate::infra::metrics::{Metrics, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let mut output = String::with_capacity(4096);

    write_cycle_metrics(&mut output, site_id, metrics);
    write_observation_metrics(&mut output, site_id, metrics);
    write_state_metrics(&mut output, site_id, metrics);
    write_ingress_metrics(&mut output, site_id, metrics);

    output
}

fn write_cycle_metrics(output: &mut String, site: &str, metrics: &Metrics) {
    write_metric(
        output,
        "geofence_cycles_total",
        "Total polling cycles processed",
        MetricType::Counter,
        site,
        metrics.cycles_total(),
    );

    let (buckets, sum) = metrics.cycle_latency_histogram();
    write_histogram(
        output,
        "geofence_cycle_latency_us",
        "Cycle processing latency in microseconds",
        site,
        &buckets,
        &METRICS_BUCKET_BOUNDS,
        sum,
    );
}

fn write_observation_metrics(output: &mut String, site: &str, metrics: &Metrics) {
    write_metric(
        output,
        "geofence_observations_accepted_total",
        "Observations admitted into a cycle",
        MetricType::Counter,
        site,
        metrics.observations_accepted(),
    );
    write_metric(
        output,
        "geofence_observations_rejected_total",
        "Observations rejected as malformed",
        MetricType::Counter,
        site,
        metrics.observations_rejected(),
    );
    write_metric(
        output,
        "geofence_observations_ignored_total",
        "Observations for ignored entities",
        MetricType::Counter,
        site,
        metrics.observations_ignored(),
    );
    write_metric(
        output,
        "geofence_anchors_set_total",
        "Anchors established",
        MetricType::Counter,
        site,
        metrics.anchors_set(),
    );
}

fn write_state_metrics(output: &mut String, site: &str, metrics: &Metrics) {
    let name = "geofence_entities";
    let _ = writeln!(output, "# HELP {name} Tracked entities by safety state");
    let _ = writeln!(output, "# TYPE {name} gauge");
    for state in SafetyState::ALL {
        let _ = writeln!(
            output,
            "{name}{{site=\"{site}\",state=\"{}\"}} {}",
            state.as_str(),
            metrics.entities_in(state)
        );
    }

    write_metric(
        output,
        "geofence_breaches_total",
        "Transitions into Breach",
        MetricType::Counter,
        site,
        metrics.breaches_total(),
    );
    write_metric(
        output,
        "geofence_forecast_breaches_total",
        "Transitions into ForecastBreach",
        MetricType::Counter,
        site,
        metrics.forecast_breaches_total(),
    );
    write_metric(
        output,
        "geofence_stale_total",
        "Transitions into Stale",
        MetricType::Counter,
        site,
        metrics.stale_total(),
    );
}

fn write_ingress_metrics(output: &mut String, site: &str, metrics: &Metrics) {
    write_metric(
        output,
        "geofence_batches_received_total",
        "Observation batches received",
        MetricType::Counter,
        site,
        metrics.batches_received(),
    );
    write_metric(
        output,
        "geofence_batches_superseded_total",
        "Batches replaced by a newer one before their cycle ran",
        MetricType::Counter,
        site,
        metrics.batches_superseded(),
    );
    write_metric(
        output,
        "geofence_batches_dropped_total",
        "Batches dropped because the runner channel was full",
        MetricType::Counter,
        site,
        metrics.batches_dropped(),
    );
    write_metric(
        output,
        "geofence_payloads_undecodable_total",
        "Ingress payloads that were not a batch",
        MetricType::Counter,
        site,
        metrics.payloads_undecodable(),
    );
    write_metric(
        output,
        "geofence_egress_dropped_total",
        "Egress messages dropped because the publisher queue was full",
        MetricType::Counter,
        site,
        metrics.egress_dropped(),
    );
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
        }
        (&Method::GET, "/health") => {
            Response::builder().status(StatusCode::OK).body(Full::new(Bytes::from("ok")))
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found"))),
    };
    Ok(response.unwrap_or_else(|e| {
        error!(error = %e, "prometheus_response_build_failed");
        Response::new(Full::new(Bytes::new()))
    }))
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
