// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : fx_exec_bot — async FX trade execution & risk engine in Rust
Module  : config.rs
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
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use clap::{Parser, ValueEnum};
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::Timeframe;
use crate::state::TradingState;

/// Venue tempat order dieksekusi
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum VenueMode {
    Mock,
    Rest,
}

impl VenueMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueMode::Mock => "mock",
            VenueMode::Rest => "rest",
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "fx_exec_bot", version, about = "FX trade execution & risk engine")]
pub struct Cli {
    /// File .env yang dibaca saat start dan dipantau untuk hot reload
    #[arg(long, default_value = ".env")]
    pub env_file: PathBuf,

    #[arg(long, env = "VENUE_MODE", value_enum, default_value_t = VenueMode::Mock)]
    pub venue: VenueMode,

    /// Jalankan satu decision cycle lalu keluar
    #[arg(long)]
    pub once: bool,

    #[arg(long, env = "METRICS_PORT", default_value_t = 9898)]
    pub metrics_port: u16,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key}: cannot parse {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("BASE_RISK_PERCENT ({base}) must be within [0, MAX_RISK_PERCENT ({max})]")]
    RiskRange { base: f64, max: f64 },
    #[error("SYMBOLS is empty")]
    NoSymbols,
}

#[derive(Debug, Clone)]
pub struct RestSettings {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
    pub recv_window: u64,
}

#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub symbols: Vec<String>,
    pub base_risk: f64,
    pub max_risk: f64,
    pub min_lot: f64,
    pub cycle: Duration,
    pub reload_every: Duration,
    pub ledger_every: Duration,
    pub retry_max: u32,
    pub retry_base: Duration,
    pub connect_max: u32,
    pub timeframe: Timeframe,
    pub bars: usize,
    pub atr_period: usize,
    pub tick_window: usize,
    pub event_lookahead: chrono::Duration,
    pub ledger_file: PathBuf,
    pub calendar_url: Option<String>,
    pub rest: Option<RestSettings>,
    pub telegram: Option<TelegramSettings>,
}

fn text(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn num<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match text(lookup, key) {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid { key, value: v }),
    }
}

/// Seperti `num`, tapi nilai yang lolos parse juga harus memenuhi `ok`.
fn num_where<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
    ok: impl Fn(&T) -> bool,
) -> Result<T, ConfigError> {
    match text(lookup, key) {
        None => Ok(default),
        Some(v) => match v.parse::<T>() {
            Ok(x) if ok(&x) => Ok(x),
            _ => Err(ConfigError::Invalid { key, value: v }),
        },
    }
}

// interval 0 membuat tokio::time::interval panik
fn nonzero_u64(v: &u64) -> bool {
    *v > 0
}

fn nonzero_usize(v: &usize) -> bool {
    *v > 0
}

fn risk_pair(lookup: &impl Fn(&str) -> Option<String>, base: f64, max: f64) -> Result<(f64, f64), ConfigError> {
    let base: f64 = num(lookup, "BASE_RISK_PERCENT", base)?;
    let max: f64 = num(lookup, "MAX_RISK_PERCENT", max)?;
    if !(base.is_finite() && max.is_finite()) || base < 0.0 || base > max {
        return Err(ConfigError::RiskRange { base, max });
    }
    Ok((base, max))
}

impl Settings {
    /// Bangun settings dari sumber key/value apa pun (env proses, map di test).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, venue: VenueMode) -> Result<Self, ConfigError> {
        let lookup = &lookup;

        // SYMBOLS=EURUSD,GBPUSD,USDJPY
        let symbols: Vec<String> = match text(lookup, "SYMBOLS") {
            Some(s) => s
                .split(',')
                .map(|x| x.trim())
                .filter(|x| !x.is_empty())
                .map(|x| x.to_ascii_uppercase())
                .collect(),
            None => vec!["EURUSD".into(), "GBPUSD".into(), "USDJPY".into()],
        };
        if symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }

        let (base_risk, max_risk) = risk_pair(lookup, 0.01, 0.03)?;

        let timeframe = match text(lookup, "TIMEFRAME") {
            None => Timeframe::M15,
            Some(v) => Timeframe::parse(&v).ok_or(ConfigError::Invalid { key: "TIMEFRAME", value: v })?,
        };

        let rest = match venue {
            VenueMode::Mock => None,
            VenueMode::Rest => Some(RestSettings {
                url: text(lookup, "VENUE_REST_URL").ok_or(ConfigError::Missing("VENUE_REST_URL"))?,
                api_key: text(lookup, "VENUE_API_KEY").ok_or(ConfigError::Missing("VENUE_API_KEY"))?,
                api_secret: text(lookup, "VENUE_API_SECRET").ok_or(ConfigError::Missing("VENUE_API_SECRET"))?,
                recv_window: num(lookup, "VENUE_RECV_WINDOW", 5000)?,
            }),
        };

        let telegram = match text(lookup, "TELEGRAM_TOKEN") {
            None => None,
            Some(token) => Some(TelegramSettings {
                token,
                chat_id: text(lookup, "TELEGRAM_CHAT_ID").ok_or(ConfigError::Missing("TELEGRAM_CHAT_ID"))?,
            }),
        };

        Ok(Self {
            symbols,
            base_risk,
            max_risk,
            min_lot: num_where(lookup, "MIN_LOT", 0.01, |v: &f64| v.is_finite() && *v > 0.0)?,
            cycle: Duration::from_secs(num_where(lookup, "CYCLE_SECS", 60, nonzero_u64)?),
            reload_every: Duration::from_secs(num_where(lookup, "RELOAD_SECS", 60, nonzero_u64)?),
            ledger_every: Duration::from_secs(num_where(lookup, "LEDGER_SYNC_SECS", 300, nonzero_u64)?),
            retry_max: num_where(lookup, "RETRY_MAX", 3, |v: &u32| *v > 0)?,
            retry_base: Duration::from_millis(num(lookup, "RETRY_BASE_MS", 2000)?),
            connect_max: num_where(lookup, "CONNECT_MAX", 5, |v: &u32| *v > 0)?,
            timeframe,
            bars: num_where(lookup, "BARS", 100, nonzero_usize)?,
            atr_period: num_where(lookup, "ATR_PERIOD", 14, nonzero_usize)?,
            tick_window: num_where(lookup, "TICK_WINDOW", 50, nonzero_usize)?,
            event_lookahead: chrono::Duration::minutes(num(lookup, "EVENT_LOOKAHEAD_MINS", 60)?),
            ledger_file: PathBuf::from(text(lookup, "LEDGER_FILE").unwrap_or_else(|| "trade_history.jsonl".into())),
            calendar_url: text(lookup, "CALENDAR_URL"),
            rest,
            telegram,
        })
    }
}

/// Baca .env (kalau ada) lalu settings dari environment proses.
pub fn load(cli: &Cli) -> Result<Settings, ConfigError> {
    match dotenvy::from_path(&cli.env_file) {
        Ok(()) => info!(path = %cli.env_file.display(), "env file loaded"),
        Err(e) => warn!(path = %cli.env_file.display(), err = %e, "env file not loaded, using process env"),
    }
    Settings::from_lookup(|k| std::env::var(k).ok(), cli.venue)
}

/// Terapkan BASE/MAX_RISK_PERCENT ke state. Nilai yang tidak ada = nilai state saat ini.
pub fn apply_risk(lookup: impl Fn(&str) -> Option<String>, state: &TradingState) -> Result<(f64, f64), ConfigError> {
    let (base, max) = risk_pair(&lookup, state.risk(), state.max_risk())?;
    state.set_max_risk(max);
    state.set_risk(base);
    Ok((state.risk(), state.max_risk()))
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Hot reload: cek mtime env file tiap `every`; kalau berubah, baca ulang (override)
/// dan terapkan parameter risk. Reload yang gagal di-log dan diabaikan.
pub async fn run_reloader(path: PathBuf, state: TradingState, every: Duration) {
    let mut last = modified(&path);
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(path = %path.display(), every_s = every.as_secs(), "config reloader: started");
    loop {
        tick.tick().await;
        let now = modified(&path);
        if now.is_none() || now == last {
            debug!("config reloader: no change");
            continue;
        }
        last = now;
        if let Err(e) = dotenvy::from_path_override(&path) {
            warn!(err = %e, "config reloader: read failed");
            continue;
        }
        match apply_risk(|k| std::env::var(k).ok(), &state) {
            Ok((risk, max)) => info!(risk, max, "config reloaded"),
            Err(e) => warn!(err = %e, "config reload rejected"),
        }
    }
}
