// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Return code venue untuk order yang tereksekusi penuh.
pub const RETCODE_DONE: u32 = 10009;
pub const RETCODE_REJECT: u32 = 10006;
pub const RETCODE_INVALID_VOLUME: u32 = 10014;
pub const RETCODE_NO_MONEY: u32 = 10019;
pub const RETCODE_POSITION_CLOSED: u32 = 10036;
/// Bukan kode venue: dipakai saat submit habis retry (venue unavailable).
pub const RETCODE_UNAVAILABLE: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side { Buy, Sell }
impl Side {
    pub fn sign(&self) -> f64 { match self { Side::Buy => 1.0, Side::Sell => -1.0 } }
    pub fn opposite(&self) -> Side { match self { Side::Buy => Side::Sell, Side::Sell => Side::Buy } }
    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "BUY", Side::Sell => "SELL" } }
}

/// Output model sinyal (kontrak eksternal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalLabel { Buy, Sell, None }
impl SignalLabel {
    pub fn side(&self) -> Option<Side> {
        match self { SignalLabel::Buy => Some(Side::Buy), SignalLabel::Sell => Some(Side::Sell), SignalLabel::None => None }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountState { pub balance: f64, pub equity: f64, pub free_margin: f64 }

impl AccountState {
    /// Fractional loss of equity relative to balance, 0 when equity is not positive
    /// or when equity is above balance.
    pub fn drawdown(&self) -> f64 {
        if self.equity > 0.0 {
            ((self.balance - self.equity) / self.equity).max(0.0)
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentMetadata {
    pub symbol: String,
    pub point: f64,
    pub tick_value: f64,
    pub tick_size: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    #[serde(default = "default_contract_size")]
    pub contract_size: f64,
    pub bid: f64,
    pub ask: f64,
}
fn default_contract_size() -> f64 { 100_000.0 }

impl InstrumentMetadata {
    pub fn spread(&self) -> f64 { self.ask - self.bid }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick { pub time: DateTime<Utc>, pub bid: f64, pub ask: f64, pub last: f64 }

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar { pub time: DateTime<Utc>, pub open: f64, pub high: f64, pub low: f64, pub close: f64 }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe { M1, M5, M15, H1 }
impl Timeframe {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "M1" => Some(Timeframe::M1),
            "M5" => Some(Timeframe::M5),
            "M15" => Some(Timeframe::M15),
            "H1" => Some(Timeframe::H1),
            _ => None,
        }
    }
    pub fn as_str(&self) -> &'static str {
        match self { Timeframe::M1 => "M1", Timeframe::M5 => "M5", Timeframe::M15 => "M15", Timeframe::H1 => "H1" }
    }
}

/// Deal historis dari venue. `entry_out` = deal yang menutup posisi.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub ticket: u64,
    pub position: u64,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub price: f64,
    pub profit: f64,
    pub balance: f64,
    pub entry_out: bool,
    pub time: DateTime<Utc>,
}

/// Order siap kirim: hanya dibangun setelah admission, stops dan sizing lolos.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeIntent {
    pub symbol: String,
    pub side: Side,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub volume: f64,
}

/// Market order request ke venue. `position` terisi saat menutup posisi.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub price: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub position: Option<u64>,
    pub deviation: u32,
    pub magic: u64,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub ticket: Option<u64>,
    pub price: f64,
    pub retcode: u32,
    pub reason: Option<String>,
}

impl OrderResult {
    pub fn unavailable() -> Self {
        Self {
            success: false,
            ticket: None,
            price: 0.0,
            retcode: RETCODE_UNAVAILABLE,
            reason: Some("venue unavailable".into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub open_price: f64,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub magic: u64,
}
