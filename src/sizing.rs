// ===============================
// src/sizing.rs
// ===============================
//
// Risk sizing: risk% * balance -> lot, dengan throttle saat drawdown dan cek
// free margin. Tidak pernah error: setiap jalur gagal jatuh ke lot minimum.
//
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{AccountState, InstrumentMetadata, Side};
use crate::metrics::LOT_SIZE;
use crate::venue::VenueClient;

pub const DRAWDOWN_THROTTLE: f64 = 0.05;
pub const THROTTLED_RISK_FLOOR: f64 = 0.005;

#[derive(Debug, Error, PartialEq)]
pub enum SizingError {
    #[error("account or instrument data unavailable")]
    DataUnavailable,
    #[error("zero pips at risk (entry == stop)")]
    DegenerateStop,
    #[error("non-finite lot size")]
    NonFinite,
    #[error("bad volume bounds [{min}, {max}]")]
    BadVolumeBounds { min: f64, max: f64 },
    #[error("margin {required:?} exceeds free margin {free}")]
    MarginInsufficient { required: Option<f64>, free: f64 },
}

/// Risk efektif setelah throttle drawdown.
pub fn effective_risk(account: &AccountState, risk_percent: f64) -> f64 {
    if account.drawdown() > DRAWDOWN_THROTTLE {
        (risk_percent * 0.5).max(THROTTLED_RISK_FLOOR)
    } else {
        risk_percent
    }
}

fn valid_bounds(meta: &InstrumentMetadata) -> bool {
    meta.volume_min.is_finite() && meta.volume_max.is_finite() && meta.volume_min <= meta.volume_max
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Langkah 2..5: lot mentah dari risk, dibulatkan 2 desimal dan di-clamp ke batas volume.
pub fn lot_for_risk(
    account: &AccountState,
    meta: &InstrumentMetadata,
    entry: f64,
    stop: f64,
    risk_percent: f64,
) -> Result<f64, SizingError> {
    // metadata datang dari venue; clamp panik kalau min > max atau NaN
    if !valid_bounds(meta) {
        return Err(SizingError::BadVolumeBounds { min: meta.volume_min, max: meta.volume_max });
    }
    let risk = effective_risk(account, risk_percent);
    let risk_amount = account.balance * risk;

    // nilai uang per point per lot; sama dengan tick_value kalau point == tick_size
    let pip_value = meta.tick_value * meta.point / meta.tick_size;
    let pips_at_risk = (entry - stop).abs() / meta.point;
    if pips_at_risk == 0.0 {
        return Err(SizingError::DegenerateStop);
    }

    let raw = round2((risk_amount / pips_at_risk) / pip_value);
    if !raw.is_finite() {
        return Err(SizingError::NonFinite);
    }
    Ok(raw.clamp(meta.volume_min, meta.volume_max))
}

#[derive(Debug, Clone, Copy)]
pub struct RiskSizer {
    /// Lot fallback kebijakan (default 0.01).
    pub min_lot: f64,
}

impl Default for RiskSizer {
    fn default() -> Self {
        Self { min_lot: 0.01 }
    }
}

impl RiskSizer {
    /// Lot fallback yang tetap menghormati batas volume instrumen kalau diketahui.
    pub fn fallback(&self, meta: Option<&InstrumentMetadata>) -> f64 {
        match meta {
            Some(m) if valid_bounds(m) => self.min_lot.clamp(m.volume_min, m.volume_max),
            _ => self.min_lot,
        }
    }

    /// Lot untuk satu trade. `snapshot` = AccountState yang diambil sekali di awal cycle;
    /// `None` membuat sizer membaca account sendiri dari venue.
    pub async fn size_position(
        &self,
        venue: &VenueClient,
        snapshot: Option<&AccountState>,
        symbol: &str,
        entry: f64,
        stop: f64,
        risk_percent: f64,
    ) -> f64 {
        let fetched;
        let account = match snapshot {
            Some(a) => Some(a),
            None => {
                fetched = venue.account().await;
                fetched.as_ref()
            }
        };
        let meta = venue.instrument(symbol).await;

        let lot = match (account, meta.as_ref()) {
            (Some(acc), Some(m)) => match self.sized(venue, acc, m, entry, stop, risk_percent).await {
                Ok(lot) => lot,
                Err(e) => {
                    warn!(%symbol, err = %e, "sizing fallback to minimum lot");
                    self.fallback(Some(m))
                }
            },
            _ => {
                warn!(%symbol, err = %SizingError::DataUnavailable, "sizing fallback to minimum lot");
                self.fallback(meta.as_ref())
            }
        };
        LOT_SIZE.with_label_values(&[symbol]).set(lot);
        lot
    }

    async fn sized(
        &self,
        venue: &VenueClient,
        account: &AccountState,
        meta: &InstrumentMetadata,
        entry: f64,
        stop: f64,
        risk_percent: f64,
    ) -> Result<f64, SizingError> {
        let lot = lot_for_risk(account, meta, entry, stop, risk_percent)?;
        let side = if entry > stop { Side::Buy } else { Side::Sell };
        let required = venue.margin_for(&meta.symbol, side, lot, entry).await;
        match required {
            Some(m) if m <= account.free_margin => {
                debug!(symbol = %meta.symbol, lot, margin = m, free = account.free_margin, "sized");
                Ok(lot)
            }
            _ => Err(SizingError::MarginInsufficient { required, free: account.free_margin }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue_paper::fixtures::eurusd;
    use crate::venue_paper::PaperVenue;
    use std::sync::Arc;

    fn flat() -> AccountState {
        AccountState { balance: 10_000.0, equity: 10_000.0, free_margin: 10_000.0 }
    }

    #[test]
    fn reference_scenario_gives_two_lots() {
        let meta = eurusd(1.0999, 1.1000);
        let lot = lot_for_risk(&flat(), &meta, 1.1000, 1.0950, 0.01).unwrap();
        assert!((lot - 2.0).abs() < 1e-9);
    }

    #[test]
    fn drawdown_halves_risk_with_floor() {
        let acc = AccountState { balance: 10_000.0, equity: 9_000.0, free_margin: 9_000.0 };
        assert_eq!(effective_risk(&acc, 0.01), 0.005);
        assert_eq!(effective_risk(&acc, 0.03), 0.015);
        assert_eq!(effective_risk(&acc, 0.002), 0.005);
        assert_eq!(effective_risk(&flat(), 0.002), 0.002);

        let meta = eurusd(1.0999, 1.1000);
        let lot = lot_for_risk(&acc, &meta, 1.1000, 1.0950, 0.01).unwrap();
        assert!((lot - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_pips_is_degenerate() {
        let meta = eurusd(1.0999, 1.1000);
        assert_eq!(lot_for_risk(&flat(), &meta, 1.1, 1.1, 0.01), Err(SizingError::DegenerateStop));
    }

    #[test]
    fn lot_is_always_within_volume_bounds() {
        let meta = eurusd(1.0999, 1.1000);
        for r in [-1.0, 0.0, 1e-9, 0.01, 0.5, 10.0, 1e9] {
            let lot = lot_for_risk(&flat(), &meta, 1.1000, 1.0950, r).unwrap();
            assert!(lot >= meta.volume_min && lot <= meta.volume_max, "r={r} lot={lot}");
            assert!(lot > 0.0);
        }
    }

    #[test]
    fn fallback_respects_instrument_bounds() {
        let sizer = RiskSizer::default();
        let mut meta = eurusd(1.0999, 1.1000);
        meta.volume_min = 0.1;
        assert_eq!(sizer.fallback(Some(&meta)), 0.1);
        assert_eq!(sizer.fallback(None), 0.01);
    }

    #[test]
    fn inverted_or_nan_bounds_are_rejected() {
        let mut meta = eurusd(1.0999, 1.1000);
        meta.volume_min = 5.0;
        meta.volume_max = 1.0;
        assert_eq!(
            lot_for_risk(&flat(), &meta, 1.1000, 1.0950, 0.01),
            Err(SizingError::BadVolumeBounds { min: 5.0, max: 1.0 })
        );
        assert_eq!(RiskSizer::default().fallback(Some(&meta)), 0.01);

        meta.volume_min = f64::NAN;
        assert!(matches!(
            lot_for_risk(&flat(), &meta, 1.1000, 1.0950, 0.01),
            Err(SizingError::BadVolumeBounds { .. })
        ));
    }

    #[tokio::test]
    async fn inverted_bounds_from_venue_fall_back_to_minimum() {
        let mut meta = eurusd(1.0999, 1.1000);
        meta.volume_min = 5.0;
        meta.volume_max = 1.0;
        let paper = Arc::new(PaperVenue::new(10_000.0, 100.0).with_symbol(meta, &[1.09995; 30]));
        let venue = VenueClient::for_tests(paper);
        let lot = RiskSizer::default().size_position(&venue, None, "EURUSD", 1.1000, 1.0950, 0.01).await;
        assert_eq!(lot, 0.01);
    }

    fn client(balance: f64) -> (Arc<PaperVenue>, VenueClient) {
        let paper = Arc::new(PaperVenue::new(balance, 100.0).with_symbol(eurusd(1.0999, 1.1000), &[1.09995; 30]));
        (paper.clone(), VenueClient::for_tests(paper))
    }

    #[tokio::test]
    async fn size_position_uses_snapshot_and_margin() {
        let (_paper, venue) = client(10_000.0);
        let snap = flat();
        let lot = RiskSizer::default().size_position(&venue, Some(&snap), "EURUSD", 1.1000, 1.0950, 0.01).await;
        // margin 2 lot = 2 * 100k * 1.1 / 100 = 2200 <= 10000
        assert!((lot - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn insufficient_margin_falls_back_to_minimum() {
        let (_paper, venue) = client(10_000.0);
        let snap = AccountState { free_margin: 500.0, ..flat() };
        let lot = RiskSizer::default().size_position(&venue, Some(&snap), "EURUSD", 1.1000, 1.0950, 0.01).await;
        assert_eq!(lot, 0.01);
    }

    #[tokio::test]
    async fn unknown_instrument_falls_back_to_policy_minimum() {
        let (_paper, venue) = client(10_000.0);
        let lot = RiskSizer::default().size_position(&venue, None, "XAUUSD", 2000.0, 1990.0, 0.01).await;
        assert_eq!(lot, 0.01);
    }

    #[tokio::test]
    async fn degenerate_stop_falls_back_to_minimum() {
        let (_paper, venue) = client(10_000.0);
        let lot = RiskSizer::default().size_position(&venue, None, "EURUSD", 1.1, 1.1, 0.01).await;
        assert_eq!(lot, 0.01);
    }
}
