// ===============================
// src/engine.rs
// ===============================
//
// Decision cycle. Tiap interval:
//   1) baca TradingState (enabled / risk) -- tidak di-cache antar iterasi
//   2) satu snapshot AccountState untuk seluruh cycle + budget free margin
//   3) rekonsiliasi position book dengan venue, retry close posisi orphan
//   4) per instrumen (paralel): signal -> tick -> ATR -> admission -> stops -> sizing -> open
// Pause berlaku segera: instrumen yang belum jalan di-skip, order baru tidak dikirim.
//
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::admission::AdmissionController;
use crate::domain::{AccountState, Side, TradeIntent, Timeframe};
use crate::indicators::atr;
use crate::metrics::{CYCLES, CYCLE_SECONDS};
use crate::orders::OrderManager;
use crate::signal::SignalSource;
use crate::sizing::RiskSizer;
use crate::state::{StateView, TradingState};
use crate::stops::compute_stops;
use crate::venue::VenueClient;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub bars: usize,
    pub atr_period: usize,
    pub cycle: Duration,
}

/// Hasil per instrumen dalam satu cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Skipped(&'static str),
    Rejected,
    Opened(u64),
    Failed,
}

/// Snapshot account untuk satu cycle. Free margin jadi budget yang dipotong
/// setiap order yang dibuka di cycle yang sama.
#[derive(Debug)]
pub struct CycleBudget {
    account: AccountState,
    free_margin: Mutex<f64>,
}

impl CycleBudget {
    pub fn new(account: AccountState) -> Self {
        Self { free_margin: Mutex::new(account.free_margin), account }
    }

    /// Account snapshot dengan free margin sisa budget saat ini.
    pub fn view(&self) -> AccountState {
        AccountState { free_margin: self.remaining(), ..self.account }
    }

    pub fn remaining(&self) -> f64 {
        *self.free_margin.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pesan margin; gagal kalau sisa budget tidak cukup.
    pub fn reserve(&self, amount: f64) -> bool {
        let mut free = self.free_margin.lock().unwrap_or_else(|e| e.into_inner());
        if !amount.is_finite() || amount > *free {
            return false;
        }
        *free -= amount;
        true
    }

    pub fn refund(&self, amount: f64) {
        *self.free_margin.lock().unwrap_or_else(|e| e.into_inner()) += amount;
    }
}

pub struct Engine {
    cfg: EngineConfig,
    venue: VenueClient,
    state: TradingState,
    signal: Arc<dyn SignalSource>,
    admission: AdmissionController,
    sizer: RiskSizer,
    orders: Arc<OrderManager>,
}

impl Engine {
    pub fn new(
        cfg: EngineConfig,
        venue: VenueClient,
        state: TradingState,
        signal: Arc<dyn SignalSource>,
        admission: AdmissionController,
        sizer: RiskSizer,
        orders: Arc<OrderManager>,
    ) -> Self {
        Self { cfg, venue, state, signal, admission, sizer, orders }
    }

    pub async fn run(&self) {
        let mut ticker = interval(self.cfg.cycle);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(symbols = ?self.cfg.symbols, every_s = self.cfg.cycle.as_secs(), "decision cycle started");
        loop {
            ticker.tick().await;
            self.run_cycle().await;
        }
    }

    pub async fn run_cycle(&self) -> Vec<(String, Outcome)> {
        let view = self.state.view();
        if !view.enabled {
            debug!("trading paused, cycle skipped");
            return self.cfg.symbols.iter().map(|s| (s.clone(), Outcome::Skipped("paused"))).collect();
        }
        CYCLES.inc();
        let started = Instant::now();

        self.reconcile().await;

        let Some(account) = self.venue.account().await else {
            warn!("account unavailable, cycle skipped");
            return self.cfg.symbols.iter().map(|s| (s.clone(), Outcome::Skipped("account_unavailable"))).collect();
        };
        let budget = CycleBudget::new(account);
        let (view, shared) = (&view, &budget);

        let outcomes = join_all(self.cfg.symbols.iter().map(|s| async move {
            let out = self.process(s, view, shared).await;
            (s.clone(), out)
        }))
        .await;

        let secs = started.elapsed().as_secs_f64();
        CYCLE_SECONDS.observe(secs);
        info!(
            elapsed_ms = (secs * 1000.0) as u64,
            opened = outcomes.iter().filter(|(_, o)| matches!(o, Outcome::Opened(_))).count(),
            margin_left = budget.remaining(),
            "cycle done"
        );
        outcomes
    }

    /// Sinkronkan book dengan posisi venue lalu coba tutup lagi posisi orphan.
    async fn reconcile(&self) {
        let Some(open) = self.venue.positions().await else {
            return;
        };
        let tickets: Vec<u64> = open.iter().map(|p| p.ticket).collect();
        let gone = self.orders.book().retain_open(&tickets);
        if gone > 0 {
            info!(gone, "positions closed at venue removed from book");
        }
        for pos in self.orders.book().orphaned() {
            warn!(ticket = pos.ticket, symbol = %pos.symbol, "retrying close of orphaned position");
            self.orders.close(&pos).await;
        }
    }

    async fn process(&self, symbol: &str, view: &StateView, budget: &CycleBudget) -> Outcome {
        if !self.state.is_enabled() {
            return Outcome::Skipped("paused");
        }
        if self.orders.book().has_symbol(symbol) {
            return Outcome::Skipped("position_open");
        }

        let Some(bars) = self.venue.recent_bars(symbol, self.cfg.timeframe, self.cfg.bars).await else {
            return Outcome::Skipped("bars_unavailable");
        };
        let side = match self.signal.predict(symbol, &bars).await.and_then(|l| l.side()) {
            Some(s) => s,
            None => return Outcome::Skipped("no_signal"),
        };

        let Some(tick) = self.venue.tick(symbol).await else {
            return Outcome::Skipped("tick_unavailable");
        };
        let entry = match side {
            Side::Buy => tick.ask,
            Side::Sell => tick.bid,
        };

        let Some(meta) = self.venue.instrument(symbol).await else {
            return Outcome::Skipped("instrument_unavailable");
        };
        let Some(atr_price) = atr(&bars, self.cfg.atr_period) else {
            return Outcome::Skipped("atr_unavailable");
        };
        let atr_points = atr_price / meta.point;

        if !self.admission.should_enter(symbol, side, entry).await {
            return Outcome::Rejected;
        }

        let Some(levels) = compute_stops(&self.venue, symbol, entry, side, atr_points).await else {
            return Outcome::Skipped("stops_unavailable");
        };

        let snapshot = budget.view();
        let volume =
            self.sizer.size_position(&self.venue, Some(&snapshot), symbol, entry, levels.stop, view.risk).await;

        let margin = self.venue.margin_for(symbol, side, volume, entry).await.unwrap_or(f64::INFINITY);
        if !budget.reserve(margin) {
            warn!(%symbol, volume, margin, free = budget.remaining(), "cycle margin budget exhausted");
            return Outcome::Skipped("margin_budget");
        }

        // pause bisa datang selama await di atas
        if !self.state.is_enabled() {
            budget.refund(margin);
            return Outcome::Skipped("paused");
        }

        let intent = TradeIntent {
            symbol: symbol.to_string(),
            side,
            entry,
            stop: levels.stop,
            target: levels.target,
            volume,
        };
        let result = self.orders.open(&intent).await;
        match (result.success, result.ticket) {
            (true, Some(ticket)) => Outcome::Opened(ticket),
            _ => {
                budget.refund(margin);
                Outcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::StaticCalendar;
    use crate::domain::{Bar, InstrumentMetadata, SignalLabel};
    use crate::notifier::testing::RecordingNotifier;
    use crate::venue::testing::FlakyVenue;
    use std::sync::atomic::Ordering;
    use crate::regime::{FixedRegime, Regime};
    use crate::signal::testing::FixedSignal;
    use crate::venue::Venue;
    use crate::venue_paper::fixtures::eurusd;
    use crate::venue_paper::PaperVenue;

    fn closes() -> Vec<f64> {
        (0..60).map(|i| 1.1000 + (i % 5) as f64 * 0.0002).collect()
    }

    fn engine_with(
        venue: Arc<dyn Venue>,
        state: TradingState,
        signal: Arc<dyn SignalSource>,
        event: bool,
        symbols: &[&str],
    ) -> Engine {
        let venue = VenueClient::for_tests(venue);
        let notifier = Arc::new(RecordingNotifier::default());
        let admission = AdmissionController::new(
            venue.clone(),
            Arc::new(FixedRegime(Regime::Ranging)),
            Arc::new(StaticCalendar(event)),
            50,
        );
        let cfg = EngineConfig {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            timeframe: Timeframe::M15,
            bars: 100,
            atr_period: 14,
            cycle: Duration::from_secs(60),
        };
        let orders = Arc::new(OrderManager::new(venue.clone(), notifier));
        Engine::new(cfg, venue, state, signal, admission, RiskSizer::default(), orders)
    }

    fn engine(paper: Arc<PaperVenue>, label: SignalLabel, event: bool, symbols: &[&str]) -> (Engine, TradingState) {
        let state = TradingState::new(0.01, 0.03);
        let e = engine_with(paper, state.clone(), Arc::new(FixedSignal(Some(label))), event, symbols);
        (e, state)
    }

    /// Operator menekan /pause saat model sedang memprediksi.
    struct PausingSignal(TradingState);

    #[async_trait::async_trait]
    impl SignalSource for PausingSignal {
        async fn predict(&self, _symbol: &str, _bars: &[Bar]) -> Option<SignalLabel> {
            self.0.pause();
            Some(SignalLabel::Buy)
        }
    }

    fn two_symbols() -> Arc<PaperVenue> {
        let gbpusd = InstrumentMetadata { symbol: "GBPUSD".into(), ..eurusd(1.2700, 1.2702) };
        let closes_gbp: Vec<f64> = closes().iter().map(|c| c + 0.17).collect();
        Arc::new(
            PaperVenue::new(10_000.0, 100.0)
                .with_symbol(eurusd(1.1000, 1.1002), &closes())
                .with_symbol(gbpusd, &closes_gbp),
        )
    }

    fn paper() -> Arc<PaperVenue> {
        Arc::new(PaperVenue::new(10_000.0, 100.0).with_symbol(eurusd(1.1000, 1.1002), &closes()))
    }

    #[tokio::test]
    async fn buy_signal_opens_once_per_symbol() {
        let venue = paper();
        let (e, _) = engine(venue.clone(), SignalLabel::Buy, false, &["EURUSD"]);

        let out = e.run_cycle().await;
        assert!(matches!(out[0].1, Outcome::Opened(_)));
        let pos = venue.positions().await.unwrap();
        assert_eq!(pos.len(), 1);
        assert_eq!(pos[0].side, Side::Buy);

        // posisi masih terbuka -> instrumen di-skip
        let out = e.run_cycle().await;
        assert_eq!(out[0].1, Outcome::Skipped("position_open"));
    }

    #[tokio::test]
    async fn position_closed_at_venue_frees_the_symbol() {
        let venue = paper();
        let (e, _) = engine(venue.clone(), SignalLabel::Sell, false, &["EURUSD"]);
        let out = e.run_cycle().await;
        let ticket = match &out[0].1 {
            Outcome::Opened(t) => *t,
            other => panic!("not opened: {other:?}"),
        };

        // venue menutup posisi sendiri (mis. kena TP)
        let req = crate::venue_paper::fixtures::market_req("EURUSD", Side::Buy, 0.0, Some(ticket));
        assert!(venue.submit_order(&req).await.unwrap().success);

        assert!(matches!(e.run_cycle().await[0].1, Outcome::Opened(_)));
    }

    #[tokio::test]
    async fn paused_state_submits_nothing() {
        let venue = paper();
        let (e, state) = engine(venue.clone(), SignalLabel::Buy, false, &["EURUSD"]);
        state.pause();
        assert_eq!(e.run_cycle().await[0].1, Outcome::Skipped("paused"));
        assert!(venue.positions().await.unwrap().is_empty());

        state.resume();
        assert!(matches!(e.run_cycle().await[0].1, Outcome::Opened(_)));
    }

    #[tokio::test]
    async fn pause_during_cycle_submits_nothing() {
        let venue = two_symbols();
        let state = TradingState::new(0.01, 0.03);
        let e = engine_with(
            venue.clone(),
            state.clone(),
            Arc::new(PausingSignal(state.clone())),
            false,
            &["EURUSD", "GBPUSD"],
        );

        let out = e.run_cycle().await;
        assert!(!state.is_enabled());
        for (symbol, o) in &out {
            assert_eq!(*o, Outcome::Skipped("paused"), "{symbol}");
        }
        assert!(venue.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn account_is_read_once_per_cycle() {
        let paper = two_symbols();
        let counting = Arc::new(FlakyVenue::new(paper.clone(), 0));
        let state = TradingState::new(0.01, 0.03);
        let e = engine_with(
            counting.clone(),
            state,
            Arc::new(FixedSignal(Some(SignalLabel::Buy))),
            false,
            &["EURUSD", "GBPUSD"],
        );

        let out = e.run_cycle().await;
        assert!(out.iter().all(|(_, o)| matches!(o, Outcome::Opened(_))), "{out:?}");
        assert_eq!(counting.account_reads.load(Ordering::SeqCst), 1);
        assert_eq!(paper.positions().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn no_signal_and_event_blackout_open_nothing() {
        let venue = paper();
        let (e, _) = engine(venue.clone(), SignalLabel::None, false, &["EURUSD"]);
        assert_eq!(e.run_cycle().await[0].1, Outcome::Skipped("no_signal"));

        let (e, _) = engine(venue.clone(), SignalLabel::Buy, true, &["EURUSD"]);
        assert_eq!(e.run_cycle().await[0].1, Outcome::Rejected);
        assert!(venue.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_symbol_does_not_block_others() {
        let venue = paper();
        let (e, _) = engine(venue.clone(), SignalLabel::Buy, false, &["XAUUSD", "EURUSD"]);
        let out = e.run_cycle().await;
        assert_eq!(out[0], ("XAUUSD".to_string(), Outcome::Skipped("bars_unavailable")));
        assert!(matches!(out[1].1, Outcome::Opened(_)));
    }

    #[test]
    fn budget_reserves_and_refunds() {
        let b = CycleBudget::new(AccountState { balance: 10_000.0, equity: 10_000.0, free_margin: 1_000.0 });
        assert!(b.reserve(600.0));
        assert!(!b.reserve(600.0));
        assert_eq!(b.view().free_margin, 400.0);
        assert_eq!(b.view().balance, 10_000.0);
        b.refund(600.0);
        assert!(b.reserve(1_000.0));
        assert!(!b.reserve(f64::INFINITY));
    }
}
