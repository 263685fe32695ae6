// ===============================
// src/metrics.rs
// ===============================
use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tracing::{error, info};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Decision cycle --------
pub static CYCLES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("decision_cycles_total", "decision cycles started").unwrap());

pub static CYCLE_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(HistogramOpts::new("decision_cycle_seconds", "wall time of one decision cycle")).unwrap()
});

pub static ADMISSION: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("admission_verdicts_total", "entry admission verdicts (label: verdict)"),
        &["verdict"],
    )
    .unwrap()
});

pub static ORDERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orders_total", "order lifecycle outcomes (labels: action=open|close, result)"),
        &["action", "result"],
    )
    .unwrap()
});

pub static LOT_SIZE: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(Opts::new("last_lot_size", "last computed lot size per symbol"), &["symbol"]).unwrap()
});

// -------- Venue health --------
pub static VENUE_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("venue_failed_attempts_total", "failed venue call attempts"), &["op"]).unwrap()
});

pub static VENUE_UNAVAILABLE: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("venue_unavailable_total", "venue calls that exhausted their retries"),
        &["op"],
    )
    .unwrap()
});

// -------- Operator-facing state --------
pub static TRADING_ENABLED: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("trading_enabled", "1 if trading is enabled, 0 if paused").unwrap());

pub static RISK_CURRENT: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("risk_percent_current", "current effective risk fraction").unwrap());

pub static NOTIFY_FAILURES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("notify_failures_total", "notifications that failed to send").unwrap());

pub static LEDGER_TRADES: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("ledger_trades", "closed trades recorded in the ledger").unwrap());

// ---- Config visibility (venue / symbols) ----
pub static CONFIG_VENUE_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_venue_mode", "venue mode (label: mode)"), &["mode"]).unwrap()
});

pub static CONFIG_SYMBOL: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_symbol", "configured symbols (label: symbol)"), &["symbol"]).unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(CYCLES.clone())),
        REGISTRY.register(Box::new(CYCLE_SECONDS.clone())),
        REGISTRY.register(Box::new(ADMISSION.clone())),
        REGISTRY.register(Box::new(ORDERS.clone())),
        REGISTRY.register(Box::new(LOT_SIZE.clone())),
        REGISTRY.register(Box::new(VENUE_RETRIES.clone())),
        REGISTRY.register(Box::new(VENUE_UNAVAILABLE.clone())),
        REGISTRY.register(Box::new(TRADING_ENABLED.clone())),
        REGISTRY.register(Box::new(RISK_CURRENT.clone())),
        REGISTRY.register(Box::new(NOTIFY_FAILURES.clone())),
        REGISTRY.register(Box::new(LEDGER_TRADES.clone())),
        REGISTRY.register(Box::new(CONFIG_VENUE_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_SYMBOL.clone())),
    ] {
        if let Err(e) = m {
            error!(?e, "metric registration failed");
        }
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

async fn handle(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let rsp = Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Body::from(encode_metrics()))
        .unwrap_or_else(|_| Response::new(Body::from("# no metrics\n")));
    Ok(rsp)
}

/// Serve GET / (dan /metrics) di 0.0.0.0:port.
pub async fn serve_metrics(port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle)) });
    let server = match Server::try_bind(&addr) {
        Ok(b) => b.serve(make_svc),
        Err(e) => {
            error!(?e, %addr, "metrics bind failed");
            return;
        }
    };
    info!(%addr, "metrics listening (/ and /metrics)");
    if let Err(e) = server.await {
        error!(?e, "metrics server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_metrics_are_encoded() {
        init();
        CYCLES.inc();
        let text = String::from_utf8(encode_metrics()).unwrap();
        assert!(text.contains("decision_cycles_total"));
    }
}
