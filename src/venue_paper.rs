// ===============================
// src/venue_paper.rs
// ===============================
//
// Paper venue in-memory:
// - harga random walk (~step tiap `every`), tick + bar (20 tick per bar)
// - fill market order langsung di ask (BUY) / bid (SELL)
// - margin = volume * contract_size * price / leverage
// - close posisi merealisasi PnL ke balance dan mencatat deal OUT
//
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::domain::{
    AccountState, Bar, Deal, InstrumentMetadata, OrderRequest, OrderResult, Position, Side, Tick, Timeframe,
    RETCODE_DONE, RETCODE_INVALID_VOLUME, RETCODE_NO_MONEY, RETCODE_POSITION_CLOSED,
};
use crate::venue::{Venue, VenueError};

const HISTORY_CAP: usize = 2_000;
const TICKS_PER_BAR: u32 = 20;

struct PaperSymbol {
    meta: InstrumentMetadata,
    ticks: VecDeque<Tick>,
    bars: VecDeque<Bar>,
    ticks_in_bar: u32,
}

impl PaperSymbol {
    fn mid(&self) -> f64 { (self.meta.bid + self.meta.ask) / 2.0 }

    fn push_tick(&mut self, bid: f64, ask: f64, now: DateTime<Utc>) {
        self.meta.bid = bid;
        self.meta.ask = ask;
        let last = (bid + ask) / 2.0;
        if self.ticks.len() == HISTORY_CAP { self.ticks.pop_front(); }
        self.ticks.push_back(Tick { time: now, bid, ask, last });

        match self.bars.back_mut() {
            Some(bar) if self.ticks_in_bar < TICKS_PER_BAR => {
                bar.high = bar.high.max(last);
                bar.low = bar.low.min(last);
                bar.close = last;
                self.ticks_in_bar += 1;
            }
            _ => {
                if self.bars.len() == HISTORY_CAP { self.bars.pop_front(); }
                self.bars.push_back(Bar { time: now, open: last, high: last, low: last, close: last });
                self.ticks_in_bar = 1;
            }
        }
    }
}

struct PaperBook {
    balance: f64,
    symbols: HashMap<String, PaperSymbol>,
    positions: HashMap<u64, Position>,
    deals: Vec<Deal>,
    next_ticket: u64,
}

impl PaperBook {
    fn floating(&self, pos: &Position) -> f64 {
        match self.symbols.get(&pos.symbol) {
            Some(s) => {
                let exit = match pos.side { Side::Buy => s.meta.bid, Side::Sell => s.meta.ask };
                profit(&s.meta, pos.side, pos.volume, pos.open_price, exit)
            }
            None => 0.0,
        }
    }

    fn used_margin(&self, leverage: f64) -> f64 {
        self.positions
            .values()
            .filter_map(|p| self.symbols.get(&p.symbol).map(|s| margin(&s.meta, p.volume, p.open_price, leverage)))
            .sum()
    }

    fn account(&self, leverage: f64) -> AccountState {
        let equity = self.balance + self.positions.values().map(|p| self.floating(p)).sum::<f64>();
        let free_margin = (equity - self.used_margin(leverage)).max(0.0);
        AccountState { balance: self.balance, equity, free_margin }
    }

    fn ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }
}

fn profit(meta: &InstrumentMetadata, side: Side, volume: f64, open: f64, close: f64) -> f64 {
    if meta.tick_size <= 0.0 { return 0.0; }
    (close - open) * side.sign() * volume * meta.tick_value / meta.tick_size
}

fn margin(meta: &InstrumentMetadata, volume: f64, price: f64, leverage: f64) -> f64 {
    volume * meta.contract_size * price / leverage.max(1.0)
}

fn reject(retcode: u32, reason: &str) -> OrderResult {
    OrderResult { success: false, ticket: None, price: 0.0, retcode, reason: Some(reason.to_string()) }
}

pub struct PaperVenue {
    book: Mutex<PaperBook>,
    leverage: f64,
}

impl PaperVenue {
    pub fn new(balance: f64, leverage: f64) -> Self {
        Self {
            book: Mutex::new(PaperBook {
                balance,
                symbols: HashMap::new(),
                positions: HashMap::new(),
                deals: Vec::new(),
                next_ticket: 100_000,
            }),
            leverage,
        }
    }

    /// Tambah instrumen; history awal dibangun dari `closes` (spread = ask - bid dari meta).
    pub fn with_symbol(self, meta: InstrumentMetadata, closes: &[f64]) -> Self {
        self.seed_history(meta, closes);
        self
    }

    pub fn seed_history(&self, meta: InstrumentMetadata, closes: &[f64]) {
        let spread = meta.spread();
        let start = Utc::now() - chrono::Duration::seconds(closes.len() as i64);
        let mut sym = PaperSymbol { meta, ticks: VecDeque::new(), bars: VecDeque::new(), ticks_in_bar: 0 };
        for (i, c) in closes.iter().enumerate() {
            let ts = start + chrono::Duration::seconds(i as i64);
            let bid = c - spread / 2.0;
            // satu tick = satu bar supaya history bar sama panjang dengan closes
            sym.ticks_in_bar = TICKS_PER_BAR;
            sym.push_tick(bid, bid + spread, ts);
        }
        let mut book = self.lock();
        book.symbols.insert(sym.meta.symbol.clone(), sym);
    }

    /// Venue demo: 3 pair FX dengan history random walk.
    pub fn demo() -> Self {
        let venue = Self::new(10_000.0, 100.0);
        for (symbol, px, point) in [("EURUSD", 1.1000, 0.00001), ("GBPUSD", 1.2700, 0.00001), ("USDJPY", 150.00, 0.001)] {
            let meta = InstrumentMetadata {
                symbol: symbol.to_string(),
                point,
                tick_value: 1.0,
                tick_size: point,
                volume_min: 0.01,
                volume_max: 100.0,
                contract_size: 100_000.0,
                bid: px,
                ask: px + 10.0 * point,
            };
            let mut rng = rand::thread_rng();
            let mut p: f64 = px;
            let closes: Vec<f64> = (0..300)
                .map(|_| {
                    p += rng.gen_range(-30..=30) as f64 * point;
                    p
                })
                .collect();
            venue.seed_history(meta, &closes);
        }
        venue
    }

    pub fn set_quote(&self, symbol: &str, bid: f64, ask: f64) {
        let mut book = self.lock();
        if let Some(s) = book.symbols.get_mut(symbol) {
            s.push_tick(bid, ask, Utc::now());
        }
    }

    /// Satu langkah random walk untuk semua instrumen.
    pub fn step(&self) {
        let mut book = self.lock();
        let now = Utc::now();
        for s in book.symbols.values_mut() {
            // jangan simpan ThreadRng melewati .await (fungsi ini sync)
            let ticks = rand::thread_rng().gen_range(-3..=3) as f64;
            let spread = s.meta.spread();
            let bid = (s.meta.bid + ticks * s.meta.point).max(s.meta.point);
            s.push_tick(bid, bid + spread, now);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PaperBook> {
        // mutex tidak pernah di-hold melewati panic di modul ini
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open(&self, req: &OrderRequest) -> OrderResult {
        let mut book = self.lock();
        let account = book.account(self.leverage);
        let Some(sym) = book.symbols.get(&req.symbol) else {
            return reject(crate::domain::RETCODE_REJECT, "unknown symbol");
        };
        if req.volume < sym.meta.volume_min || req.volume > sym.meta.volume_max {
            return reject(RETCODE_INVALID_VOLUME, "invalid volume");
        }
        let fill = match req.side { Side::Buy => sym.meta.ask, Side::Sell => sym.meta.bid };
        let need = margin(&sym.meta, req.volume, fill, self.leverage);
        if need > account.free_margin {
            return reject(RETCODE_NO_MONEY, "not enough money");
        }

        let ticket = book.ticket();
        let deal_ticket = book.ticket();
        let now = Utc::now();
        let balance = book.balance;
        book.positions.insert(
            ticket,
            Position {
                ticket,
                symbol: req.symbol.clone(),
                side: req.side,
                volume: req.volume,
                open_price: fill,
                opened_at: now,
                magic: req.magic,
            },
        );
        book.deals.push(Deal {
            ticket: deal_ticket,
            position: ticket,
            symbol: req.symbol.clone(),
            side: req.side,
            volume: req.volume,
            price: fill,
            profit: 0.0,
            balance,
            entry_out: false,
            time: now,
        });
        debug!(ticket, symbol = %req.symbol, side = req.side.as_str(), volume = req.volume, fill, "paper: opened");
        OrderResult { success: true, ticket: Some(ticket), price: fill, retcode: RETCODE_DONE, reason: None }
    }

    fn close(&self, req: &OrderRequest, ticket: u64) -> OrderResult {
        let mut book = self.lock();
        let Some(pos) = book.positions.get(&ticket).cloned() else {
            return reject(RETCODE_POSITION_CLOSED, "position already closed");
        };
        if req.side != pos.side.opposite() {
            return reject(crate::domain::RETCODE_REJECT, "close side must oppose position");
        }
        let Some(sym) = book.symbols.get(&pos.symbol) else {
            return reject(crate::domain::RETCODE_REJECT, "unknown symbol");
        };
        let fill = match pos.side { Side::Buy => sym.meta.bid, Side::Sell => sym.meta.ask };
        let pnl = profit(&sym.meta, pos.side, pos.volume, pos.open_price, fill);

        book.positions.remove(&ticket);
        book.balance += pnl;
        let deal_ticket = book.ticket();
        let balance = book.balance;
        book.deals.push(Deal {
            ticket: deal_ticket,
            position: ticket,
            symbol: pos.symbol.clone(),
            side: req.side,
            volume: pos.volume,
            price: fill,
            profit: pnl,
            balance,
            entry_out: true,
            time: Utc::now(),
        });
        debug!(ticket, symbol = %pos.symbol, pnl, "paper: closed");
        OrderResult { success: true, ticket: Some(deal_ticket), price: fill, retcode: RETCODE_DONE, reason: None }
    }
}

/// Feed harga paper, pengganti stream market data live.
pub async fn run_feed(venue: Arc<PaperVenue>, every: Duration) {
    info!(every_ms = every.as_millis() as u64, "paper feed: started");
    loop {
        venue.step();
        sleep(every).await;
    }
}

#[async_trait]
impl Venue for PaperVenue {
    async fn connect(&self) -> Result<(), VenueError> {
        Ok(())
    }

    async fn account(&self) -> Result<AccountState, VenueError> {
        Ok(self.lock().account(self.leverage))
    }

    async fn instrument(&self, symbol: &str) -> Result<InstrumentMetadata, VenueError> {
        self.lock()
            .symbols
            .get(symbol)
            .map(|s| s.meta.clone())
            .ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))
    }

    async fn tick(&self, symbol: &str) -> Result<Tick, VenueError> {
        let book = self.lock();
        let s = book.symbols.get(symbol).ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))?;
        s.ticks.back().copied().ok_or(VenueError::NoData)
    }

    async fn recent_ticks(&self, symbol: &str, count: usize) -> Result<Vec<Tick>, VenueError> {
        let book = self.lock();
        let s = book.symbols.get(symbol).ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))?;
        let skip = s.ticks.len().saturating_sub(count);
        Ok(s.ticks.iter().skip(skip).copied().collect())
    }

    async fn recent_bars(&self, symbol: &str, _timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, VenueError> {
        let book = self.lock();
        let s = book.symbols.get(symbol).ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))?;
        if s.bars.is_empty() {
            return Err(VenueError::NoData);
        }
        let skip = s.bars.len().saturating_sub(count);
        Ok(s.bars.iter().skip(skip).copied().collect())
    }

    async fn closed_deals(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Deal>, VenueError> {
        Ok(self.lock().deals.iter().filter(|d| d.time >= from && d.time <= to).cloned().collect())
    }

    async fn positions(&self) -> Result<Vec<Position>, VenueError> {
        let mut out: Vec<Position> = self.lock().positions.values().cloned().collect();
        out.sort_by_key(|p| p.ticket);
        Ok(out)
    }

    async fn margin_for(&self, symbol: &str, _side: Side, volume: f64, price: f64) -> Result<f64, VenueError> {
        let book = self.lock();
        let s = book.symbols.get(symbol).ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))?;
        Ok(margin(&s.meta, volume, price, self.leverage))
    }

    async fn submit_order(&self, req: &OrderRequest) -> Result<OrderResult, VenueError> {
        Ok(match req.position {
            Some(ticket) => self.close(req, ticket),
            None => self.open(req),
        })
    }
}

#[cfg(test)]
pub mod fixtures {
    use super::*;

    pub fn eurusd(bid: f64, ask: f64) -> InstrumentMetadata {
        InstrumentMetadata {
            symbol: "EURUSD".into(),
            point: 0.0001,
            tick_value: 1.0,
            tick_size: 0.0001,
            volume_min: 0.01,
            volume_max: 50.0,
            contract_size: 100_000.0,
            bid,
            ask,
        }
    }

    pub fn market_req(symbol: &str, side: Side, volume: f64, position: Option<u64>) -> OrderRequest {
        OrderRequest {
            symbol: symbol.into(),
            side,
            volume,
            price: 0.0,
            sl: None,
            tp: None,
            position,
            deviation: 10,
            magic: 234000,
            comment: "test".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn venue() -> PaperVenue {
        PaperVenue::new(10_000.0, 100.0).with_symbol(eurusd(1.1000, 1.1002), &[1.1001; 30])
    }

    #[tokio::test]
    async fn open_then_close_realises_profit() {
        let v = venue();
        let opened = v.submit_order(&market_req("EURUSD", Side::Buy, 1.0, None)).await.unwrap();
        assert!(opened.success);
        assert_eq!(opened.price, 1.1002);

        v.set_quote("EURUSD", 1.1012, 1.1014);
        let ticket = opened.ticket.unwrap();
        let closed = v.submit_order(&market_req("EURUSD", Side::Sell, 1.0, Some(ticket))).await.unwrap();
        assert!(closed.success);

        // 10 point * 1.0 lot * tick_value 1
        let acc = v.account().await.unwrap();
        assert!((acc.balance - 10_010.0).abs() < 1e-6);
        assert!(v.positions().await.unwrap().is_empty());

        let deals = v.closed_deals(Utc::now() - chrono::Duration::hours(1), Utc::now()).await.unwrap();
        assert_eq!(deals.iter().filter(|d| d.entry_out).count(), 1);
    }

    #[tokio::test]
    async fn rejects_volume_out_of_bounds_and_missing_margin() {
        let v = venue();
        let r = v.submit_order(&market_req("EURUSD", Side::Buy, 0.001, None)).await.unwrap();
        assert_eq!(r.retcode, RETCODE_INVALID_VOLUME);
        // 50 lot * 100k * 1.1 / 100 = 55k > 10k
        let r = v.submit_order(&market_req("EURUSD", Side::Buy, 50.0, None)).await.unwrap();
        assert_eq!(r.retcode, RETCODE_NO_MONEY);
    }

    #[tokio::test]
    async fn closing_twice_is_rejected() {
        let v = venue();
        let t = v.submit_order(&market_req("EURUSD", Side::Sell, 0.1, None)).await.unwrap().ticket.unwrap();
        assert!(v.submit_order(&market_req("EURUSD", Side::Buy, 0.1, Some(t))).await.unwrap().success);
        let again = v.submit_order(&market_req("EURUSD", Side::Buy, 0.1, Some(t))).await.unwrap();
        assert_eq!(again.retcode, RETCODE_POSITION_CLOSED);
    }

    #[tokio::test]
    async fn history_windows_are_bounded() {
        let v = venue();
        assert_eq!(v.recent_ticks("EURUSD", 10).await.unwrap().len(), 10);
        assert_eq!(v.recent_bars("EURUSD", Timeframe::M15, 100).await.unwrap().len(), 30);
        v.step();
        assert_eq!(v.recent_ticks("EURUSD", 100).await.unwrap().len(), 31);
        assert!(matches!(v.tick("XAUUSD").await, Err(VenueError::UnknownSymbol(_))));
    }
}
