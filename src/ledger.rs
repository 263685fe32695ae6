// ===============================
// src/ledger.rs
// ===============================
//
// Ledger trade tertutup (JSONL, append-only):
// - sumber: deal penutup (entry_out) dari history venue 7 hari terakhir
// - dedup per deal ticket; ticket yang sudah ada di file tidak ditulis ulang
// - parent directory dibuat otomatis
// - baris rusak di file di-skip dengan warning, tidak menggagalkan load
// Performance metrics dihitung dari isi ledger.
//
use std::path::{Path, PathBuf};

use ahash::AHashSet as HashSet;
use chrono::{Duration as ChronoDuration, Utc};
use thiserror::Error;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::domain::Deal;
use crate::metrics::LEDGER_TRADES;
use crate::venue::VenueClient;

pub const HISTORY_DAYS: i64 = 7;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger serialize: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("deal history unavailable")]
    HistoryUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceMetrics {
    pub trades: usize,
    /// Persen (0..100).
    pub win_rate: f64,
    pub avg_win: f64,
    /// Rata-rata profit trade kalah (<= 0).
    pub avg_loss: f64,
    /// Total win / |total loss|; infinity kalau belum ada loss.
    pub profit_factor: f64,
    /// Penurunan terbesar dari puncak balance, sebagai fraksi puncak.
    pub max_drawdown: f64,
}

pub fn performance(trades: &[Deal]) -> Option<PerformanceMetrics> {
    if trades.is_empty() {
        return None;
    }
    let (wins, losses): (Vec<f64>, Vec<f64>) = trades.iter().map(|d| d.profit).partition(|p| *p > 0.0);
    let mean = |v: &[f64]| if v.is_empty() { 0.0 } else { v.iter().sum::<f64>() / v.len() as f64 };
    let gross_win: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().sum::<f64>().abs();
    let profit_factor = if gross_loss > 0.0 {
        gross_win / gross_loss
    } else if gross_win > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let mut by_time: Vec<&Deal> = trades.iter().collect();
    by_time.sort_by_key(|d| (d.time, d.ticket));
    let mut peak = f64::MIN;
    let mut max_dd: f64 = 0.0;
    for d in by_time {
        peak = peak.max(d.balance);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - d.balance) / peak);
        }
    }

    Some(PerformanceMetrics {
        trades: trades.len(),
        win_rate: wins.len() as f64 / trades.len() as f64 * 100.0,
        avg_win: mean(&wins),
        avg_loss: mean(&losses),
        profit_factor,
        max_drawdown: max_dd,
    })
}

#[derive(Debug)]
pub struct TradeLedger {
    path: PathBuf,
    seen: HashSet<u64>,
    trades: Vec<Deal>,
}

impl TradeLedger {
    /// Buka (atau buat) ledger dan muat isi yang sudah ada.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let mut ledger = Self { path, seen: HashSet::new(), trades: Vec::new() };
        let text = match fs::read_to_string(&ledger.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        for (n, line) in text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
            match serde_json::from_str::<Deal>(line) {
                Ok(d) => {
                    if ledger.seen.insert(d.ticket) {
                        ledger.trades.push(d);
                    }
                }
                Err(e) => warn!(line = n + 1, ?e, path = %ledger.path.display(), "ledger: skip malformed line"),
            }
        }
        LEDGER_TRADES.set(ledger.trades.len() as i64);
        Ok(ledger)
    }

    pub fn trades(&self) -> &[Deal] {
        &self.trades
    }

    pub fn performance(&self) -> Option<PerformanceMetrics> {
        performance(&self.trades)
    }

    /// Tambahkan deal penutup yang belum tercatat. Return jumlah yang ditulis.
    pub async fn record(&mut self, deals: &[Deal]) -> Result<usize, LedgerError> {
        let mut fresh: Vec<&Deal> = deals.iter().filter(|d| d.entry_out && !self.seen.contains(&d.ticket)).collect();
        fresh.sort_by_key(|d| (d.time, d.ticket));
        fresh.dedup_by_key(|d| d.ticket);
        if fresh.is_empty() {
            return Ok(0);
        }

        let file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        let mut writer = BufWriter::new(file);
        for d in &fresh {
            let line = serde_json::to_string(d)?;
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        writer.flush().await?;

        for d in fresh.iter() {
            self.seen.insert(d.ticket);
            self.trades.push((*d).clone());
        }
        LEDGER_TRADES.set(self.trades.len() as i64);
        Ok(fresh.len())
    }

    /// Tarik history venue `HISTORY_DAYS` terakhir lalu catat yang baru.
    pub async fn sync(&mut self, venue: &VenueClient) -> Result<usize, LedgerError> {
        let now = Utc::now();
        let deals = venue
            .closed_deals(now - ChronoDuration::days(HISTORY_DAYS), now)
            .await
            .ok_or(LedgerError::HistoryUnavailable)?;
        self.record(&deals).await
    }
}

/// Task sinkronisasi ledger periodik.
pub async fn run_sync(venue: VenueClient, mut ledger: TradeLedger, every: Duration) {
    info!(path = %ledger.path.display(), every_s = every.as_secs(), "ledger: started");
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        match ledger.sync(&venue).await {
            Ok(0) => {}
            Ok(n) => {
                info!(added = n, total = ledger.trades().len(), "ledger: closed trades recorded");
                if let Some(p) = ledger.performance() {
                    info!(
                        win_rate = p.win_rate,
                        avg_win = p.avg_win,
                        avg_loss = p.avg_loss,
                        profit_factor = p.profit_factor,
                        max_drawdown = p.max_drawdown,
                        "ledger: performance"
                    );
                }
            }
            Err(e) => error!(err = %e, "ledger: sync failed"),
        }
    }
}
