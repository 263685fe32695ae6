// ===============================
// src/admission.rs
// ===============================
//
// Admission: go / no-go untuk entry baru. Tiga cek, semua harus lolos:
// 1) smoothed price bisa dihitung dari window tick terakhir
// 2) regime trending -> arah harus searah MA(9) vs MA(21) pada harga last
// 3) tidak ada event high-impact dalam lookahead window
// Kegagalan apa pun saat menghitung cek = tolak (fail safe).
//
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::calendar::EventOracle;
use crate::domain::Side;
use crate::indicators::sma_last;
use crate::metrics::ADMISSION;
use crate::regime::{Regime, RegimeDetector};
use crate::smoother::PriceSmoother;
use crate::venue::VenueClient;

pub const FAST_MA: usize = 9;
pub const SLOW_MA: usize = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TicksUnavailable,
    NoSmoothedPrice,
    RegimeUnknown,
    NotEnoughTicksForTrend,
    AgainstTrend,
    EventBlackout,
    CalendarUnavailable,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::TicksUnavailable => "ticks_unavailable",
            Rejection::NoSmoothedPrice => "no_smoothed_price",
            Rejection::RegimeUnknown => "regime_unknown",
            Rejection::NotEnoughTicksForTrend => "not_enough_ticks",
            Rejection::AgainstTrend => "against_trend",
            Rejection::EventBlackout => "event_blackout",
            Rejection::CalendarUnavailable => "calendar_unavailable",
        }
    }
}

/// Arah boleh masuk kalau MA cepat tidak melawan MA lambat.
pub fn trend_allows(side: Side, prices: &[f64]) -> Result<(), Rejection> {
    let (Some(fast), Some(slow)) = (sma_last(prices, FAST_MA), sma_last(prices, SLOW_MA)) else {
        return Err(Rejection::NotEnoughTicksForTrend);
    };
    match side {
        Side::Buy if fast < slow => Err(Rejection::AgainstTrend),
        Side::Sell if fast > slow => Err(Rejection::AgainstTrend),
        _ => Ok(()),
    }
}

pub struct AdmissionController {
    venue: VenueClient,
    // filter per instrumen: milik controller ini saja, mutex tidak di-hold melewati await
    smoother: Mutex<PriceSmoother>,
    regime: Arc<dyn RegimeDetector>,
    oracle: Arc<dyn EventOracle>,
    tick_window: usize,
}

impl AdmissionController {
    pub fn new(
        venue: VenueClient,
        regime: Arc<dyn RegimeDetector>,
        oracle: Arc<dyn EventOracle>,
        tick_window: usize,
    ) -> Self {
        Self { venue, smoother: Mutex::new(PriceSmoother::new()), regime, oracle, tick_window }
    }

    pub async fn evaluate(&self, symbol: &str, side: Side, current_price: f64) -> Result<(), Rejection> {
        let ticks = self.venue.recent_ticks(symbol, self.tick_window).await.ok_or(Rejection::TicksUnavailable)?;
        let prices: Vec<f64> = ticks.iter().map(|t| t.last).collect();

        let smoothed = {
            let mut sm = self.smoother.lock().unwrap_or_else(|e| e.into_inner());
            sm.smooth(symbol, &prices)
        };
        let smoothed = smoothed.ok_or(Rejection::NoSmoothedPrice)?;
        debug!(%symbol, smoothed, current_price, deviation = current_price - smoothed, "admission: smoothed price");

        match self.regime.classify(&self.venue, symbol).await {
            Some(Regime::Trending) => trend_allows(side, &prices)?,
            Some(Regime::Ranging) => {}
            None => return Err(Rejection::RegimeUnknown),
        }

        match self.oracle.high_impact_event_now().await {
            Ok(false) => Ok(()),
            Ok(true) => Err(Rejection::EventBlackout),
            Err(e) => {
                info!(%symbol, err = %e, "admission: calendar unavailable");
                Err(Rejection::CalendarUnavailable)
            }
        }
    }

    pub async fn should_enter(&self, symbol: &str, side: Side, current_price: f64) -> bool {
        match self.evaluate(symbol, side, current_price).await {
            Ok(()) => {
                ADMISSION.with_label_values(&["accepted"]).inc();
                true
            }
            Err(r) => {
                ADMISSION.with_label_values(&[r.as_str()]).inc();
                info!(%symbol, side = side.as_str(), reason = r.as_str(), "entry rejected");
                false
            }
        }
    }
}
