// ===============================
// src/stops.rs
// ===============================
//
// Stop-loss / take-profit dinamis dari ATR (dalam point) + spread.
//   BUY : SL = entry - 1.5*ATR*point - spread ; TP = entry + 3*ATR*point - spread
//   SELL: SL = entry + 1.5*ATR*point + spread ; TP = entry - 3*ATR*point + spread
// Rasio risk:reward 1:2 tetap (1.5 vs 3 ATR).
// Clamp: jarak SL maksimal 5% dari harga kini (ask untuk BUY, bid untuk SELL),
// dan SL/TP minimal 1 point dari entry di sisi yang benar. TP SELL tidak pernah di bawah 1 point.
//
use tracing::warn;

use crate::domain::{InstrumentMetadata, Side};
use crate::venue::VenueClient;

pub const SL_ATR_MULT: f64 = 1.5;
pub const TP_ATR_MULT: f64 = 3.0;
pub const MAX_STOP_FRACTION: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopLevels {
    pub stop: f64,
    pub target: f64,
}

pub fn levels(meta: &InstrumentMetadata, entry: f64, side: Side, atr_points: f64) -> Option<StopLevels> {
    if !entry.is_finite() || !atr_points.is_finite() || meta.point <= 0.0 {
        warn!(symbol = %meta.symbol, entry, atr_points, "stops: degenerate input");
        return None;
    }
    let pt = meta.point;
    let dist = atr_points.max(0.0) * pt;
    let spread = meta.spread().max(0.0);

    let (stop, target) = match side {
        Side::Buy => {
            let mut sl = entry - SL_ATR_MULT * dist - spread;
            let mut tp = entry + TP_ATR_MULT * dist - spread;
            sl = sl.max(meta.ask - meta.ask * MAX_STOP_FRACTION);
            sl = sl.min(entry - pt);
            tp = tp.max(entry + pt);
            (sl, tp)
        }
        Side::Sell => {
            let mut sl = entry + SL_ATR_MULT * dist + spread;
            let mut tp = entry - TP_ATR_MULT * dist + spread;
            sl = sl.min(meta.bid + meta.bid * MAX_STOP_FRACTION);
            sl = sl.max(entry + pt);
            tp = tp.max(pt);
            tp = tp.min(entry - pt);
            (sl, tp)
        }
    };
    Some(StopLevels { stop, target })
}

/// Ambil metadata instrumen lalu hitung level. `None` kalau metadata tidak tersedia.
pub async fn compute_stops(
    venue: &VenueClient,
    symbol: &str,
    entry: f64,
    side: Side,
    atr_points: f64,
) -> Option<StopLevels> {
    let Some(meta) = venue.instrument(symbol).await else {
        warn!(%symbol, "stops: instrument metadata unavailable");
        return None;
    };
    levels(&meta, entry, side, atr_points)
}
