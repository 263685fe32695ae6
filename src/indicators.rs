// ===============================
// src/indicators.rs
// ===============================
use crate::domain::Bar;

/// SMA dari `period` nilai terakhir. `None` kalau data kurang.
pub fn sma_last(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// True range: max(high-low, |high-prev_close|, |low-prev_close|); bar pertama cukup high-low.
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, b)| {
            let hl = b.high - b.low;
            match i.checked_sub(1).map(|p| bars[p].close) {
                Some(pc) => hl.max((b.high - pc).abs()).max((b.low - pc).abs()),
                None => hl,
            }
        })
        .collect()
}

/// ATR Wilder (alpha = 1/period) dalam satuan harga, nilai pada bar terakhir.
/// Seed = rata-rata `period` true range pertama.
pub fn atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }
    let tr = true_range(bars);
    let mut value = tr[1..=period].iter().sum::<f64>() / period as f64;
    for x in &tr[period + 1..] {
        value = (value * (period as f64 - 1.0) + x) / period as f64;
    }
    value.is_finite().then_some(value)
}

/// Kaufman efficiency ratio: |net move| / total path. 1 = lurus, ~0 = choppy.
pub fn efficiency_ratio(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let net = (values[values.len() - 1] - values[0]).abs();
    let path: f64 = values.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    if path <= 0.0 {
        return Some(0.0);
    }
    Some(net / path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bar(o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar { time: Utc::now(), open: o, high: h, low: l, close: c }
    }

    #[test]
    fn sma_needs_full_window() {
        assert_eq!(sma_last(&[1.0, 2.0], 3), None);
        assert_eq!(sma_last(&[5.0, 1.0, 2.0, 3.0], 3), Some(2.0));
    }

    #[test]
    fn true_range_uses_previous_close_gap() {
        let bars = [bar(10.0, 11.0, 9.0, 10.0), bar(13.0, 14.0, 12.5, 13.0)];
        let tr = true_range(&bars);
        assert_eq!(tr[0], 2.0);
        assert_eq!(tr[1], 4.0);
    }

    #[test]
    fn atr_of_constant_range_is_that_range() {
        let bars: Vec<Bar> = (0..30).map(|_| bar(1.0, 1.5, 0.5, 1.0)).collect();
        let v = atr(&bars, 14).unwrap();
        assert!((v - 1.0).abs() < 1e-12);
        assert_eq!(atr(&bars[..14], 14), None);
    }

    #[test]
    fn efficiency_ratio_separates_trend_from_chop() {
        let trend: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert_eq!(efficiency_ratio(&trend), Some(1.0));
        let chop: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 1.0 } else { 2.0 }).collect();
        assert!(efficiency_ratio(&chop).unwrap() < 0.1);
        assert_eq!(efficiency_ratio(&[1.0, 1.0, 1.0]), Some(0.0));
    }
}
