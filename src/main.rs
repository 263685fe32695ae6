// ===============================
// src/main.rs
// ===============================
/*
 cargo run -- --once                      # satu decision cycle di paper venue
 cargo run -- --venue rest --env-file prod.env

 # konfigurasi & aktivitas
curl -s localhost:9898/metrics | egrep '^config_(venue_mode|symbol)'
curl -s localhost:9898/metrics | grep '^admission_verdicts_total'
curl -s localhost:9898/metrics | grep '^orders_total'
*/
/*
=============================================================================
Project : fx_exec_bot — async FX trade execution & risk engine in Rust
Module  : main.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Runs a fixed-interval decision cycle over FX instruments (paper or
          REST bridge venue): signal, Kalman-smoothed admission with regime
          and event blackout, ATR stops, drawdown-aware risk sizing, resilient
          order submission. Operator commands via Telegram, Prometheus
          metrics, JSONL closed-trade ledger.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
mod admission;
mod calendar;
mod commands;
mod config;
mod domain;
mod engine;
mod indicators;
mod ledger;
mod metrics;
mod notifier;
mod orders;
mod regime;
mod retry;
mod signal;
mod sizing;
mod smoother;
mod state;
mod stops;
mod venue;
mod venue_paper; // in-memory random-walk venue (default)
mod venue_rest;  // REST bridge ke terminal broker (signed)

use std::sync::Arc;

use clap::Parser;
use tokio::{select, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::admission::AdmissionController;
use crate::calendar::{EventOracle, HttpCalendar, StaticCalendar};
use crate::commands::{Operator, TelegramCommands};
use crate::config::{Cli, Settings, VenueMode};
use crate::engine::{Engine, EngineConfig};
use crate::ledger::TradeLedger;
use crate::notifier::{notify, LogNotifier, SharedNotifier, TelegramNotifier};
use crate::orders::OrderManager;
use crate::regime::EfficiencyRegime;
use crate::retry::RetryPolicy;
use crate::signal::MaCrossSignal;
use crate::sizing::RiskSizer;
use crate::state::TradingState;
use crate::venue::{default_connect_policy, Venue, VenueClient};
use crate::venue_paper::PaperVenue;
use crate::venue_rest::{RestCredentials, RestVenue};

const PAPER_FEED_EVERY: Duration = Duration::from_secs(1);

/// Log + notify error fatal saat startup. Caller lanjut dengan exit(1).
async fn report_fatal(notifier: &SharedNotifier, msg: String) {
    error!("{msg}");
    // harus terkirim sebelum exit
    let _ = notify(notifier, format!("FATAL: {msg}")).await;
}

/// Notifier sebelum settings valid: Telegram kalau token & chat id ada di env.
fn env_notifier() -> SharedNotifier {
    match (std::env::var("TELEGRAM_TOKEN"), std::env::var("TELEGRAM_CHAT_ID")) {
        (Ok(token), Ok(chat)) if !token.is_empty() && !chat.is_empty() => match TelegramNotifier::new(&token, chat) {
            Ok(tg) => Arc::new(tg),
            Err(_) => Arc::new(LogNotifier),
        },
        _ => Arc::new(LogNotifier),
    }
}

#[tokio::main]
async fn main() {
    // ---- Logging ----
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ---- Load config ----
    let cli = Cli::parse();
    let settings: Settings = match config::load(&cli) {
        Ok(s) => s,
        Err(e) => {
            report_fatal(&env_notifier(), format!("configuration error: {e}")).await;
            std::process::exit(1);
        }
    };

    // ---- Notifier ----
    let telegram: Option<(Arc<TelegramNotifier>, String)> = match &settings.telegram {
        Some(t) => match TelegramNotifier::new(&t.token, t.chat_id.clone()) {
            Ok(tg) => Some((Arc::new(tg), t.chat_id.clone())),
            Err(e) => {
                warn!(err = %e, "telegram client init failed, notifications go to log");
                None
            }
        },
        None => {
            info!("TELEGRAM_TOKEN not set, notifications go to log");
            None
        }
    };
    let notifier: SharedNotifier = match &telegram {
        Some((tg, _)) => tg.clone(),
        None => Arc::new(LogNotifier),
    };

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(cli.metrics_port));

    info!(
        venue_mode = cli.venue.as_str(),
        symbols = ?settings.symbols,
        base_risk = settings.base_risk,
        max_risk = settings.max_risk,
        cycle_s = settings.cycle.as_secs(),
        timeframe = settings.timeframe.as_str(),
        once = cli.once,
        "startup config"
    );
    metrics::CONFIG_VENUE_MODE.with_label_values(&[cli.venue.as_str()]).set(1);
    for s in &settings.symbols {
        metrics::CONFIG_SYMBOL.with_label_values(&[s]).set(1);
    }

    // ---- Venue ----
    let raw: Arc<dyn Venue> = match (cli.venue, &settings.rest) {
        (VenueMode::Rest, Some(r)) => {
            let creds = RestCredentials {
                api_key: r.api_key.clone(),
                api_secret: r.api_secret.clone(),
                recv_window: r.recv_window,
            };
            match RestVenue::new(&r.url, creds) {
                Ok(v) => Arc::new(v),
                Err(e) => {
                    report_fatal(&notifier, format!("rest venue init failed: {e}")).await;
                    std::process::exit(1);
                }
            }
        }
        _ => {
            let paper = Arc::new(PaperVenue::demo());
            tokio::spawn(venue_paper::run_feed(paper.clone(), PAPER_FEED_EVERY));
            paper
        }
    };
    let venue = VenueClient::new(
        raw,
        RetryPolicy::new(settings.retry_max, settings.retry_base),
        default_connect_policy(settings.connect_max),
    );
    if let Err(e) = venue.connect().await {
        report_fatal(&notifier, format!("venue connection failed after {} attempts: {e}", settings.connect_max)).await;
        std::process::exit(1);
    }

    // ---- Shared state + background tasks ----
    let state = TradingState::new(settings.base_risk, settings.max_risk);
    tokio::spawn(config::run_reloader(cli.env_file.clone(), state.clone(), settings.reload_every));

    let orders = Arc::new(OrderManager::new(venue.clone(), notifier.clone()));
    if let Some((tg, chat)) = telegram {
        let operator = Operator::new(state.clone(), venue.clone(), orders.clone());
        tokio::spawn(TelegramCommands::new(&tg, chat, operator, notifier.clone()).run());
    }

    match TradeLedger::open(&settings.ledger_file).await {
        Ok(ledger) => {
            tokio::spawn(ledger::run_sync(venue.clone(), ledger, settings.ledger_every));
        }
        Err(e) => warn!(err = %e, path = %settings.ledger_file.display(), "ledger disabled"),
    }

    // ---- Decision cycle ----
    let oracle: Arc<dyn EventOracle> = match &settings.calendar_url {
        Some(url) => match HttpCalendar::new(url.clone(), settings.event_lookahead) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                report_fatal(&notifier, format!("calendar init failed: {e}")).await;
                std::process::exit(1);
            }
        },
        None => {
            warn!("CALENDAR_URL not set, event blackout disabled");
            Arc::new(StaticCalendar(false))
        }
    };
    let admission = AdmissionController::new(
        venue.clone(),
        Arc::new(EfficiencyRegime { timeframe: settings.timeframe, ..Default::default() }),
        oracle,
        settings.tick_window,
    );
    let engine = Engine::new(
        EngineConfig {
            symbols: settings.symbols.clone(),
            timeframe: settings.timeframe,
            bars: settings.bars,
            atr_period: settings.atr_period,
            cycle: settings.cycle,
        },
        venue.clone(),
        state.clone(),
        Arc::new(MaCrossSignal::default()),
        admission,
        RiskSizer { min_lot: settings.min_lot },
        orders,
    );

    if cli.once {
        for (symbol, outcome) in engine.run_cycle().await {
            info!(%symbol, ?outcome, "cycle outcome");
        }
        return;
    }

    notify(&notifier, format!("fx_exec_bot started ({}, {})", cli.venue.as_str(), settings.symbols.join(",")));
    select! {
        _ = engine.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            let _ = notify(&notifier, "fx_exec_bot stopped").await;
        }
    }
}
