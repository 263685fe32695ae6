// ===============================
// src/signal.rs
// ===============================
//
// Sumber sinyal arah. Model prediktif diperlakukan black box lewat trait
// `SignalSource`; bawaan crate ini MA crossover atas close bar:
//   Ide: MA cepat menembus ke atas MA lambat -> Buy (golden cross)
//        MA cepat menembus ke bawah MA lambat -> Sell (dead cross)
//   Filtering: selisih MA harus >= min_edge agar tak sensitif pada noise kecil.
//
use async_trait::async_trait;

use crate::domain::{Bar, SignalLabel};
use crate::indicators::sma_last;

#[async_trait]
pub trait SignalSource: Send + Sync {
    /// `None` = model tidak bisa memberi prediksi (unavailable).
    async fn predict(&self, symbol: &str, bars: &[Bar]) -> Option<SignalLabel>;
}

#[derive(Debug, Clone)]
pub struct MaCrossSignal {
    pub fast: usize,
    pub slow: usize,
    pub min_edge: f64,
}

impl Default for MaCrossSignal {
    fn default() -> Self {
        Self { fast: 9, slow: 21, min_edge: 0.0 }
    }
}

impl MaCrossSignal {
    fn diff(&self, closes: &[f64]) -> Option<f64> {
        Some(sma_last(closes, self.fast)? - sma_last(closes, self.slow)?)
    }

    pub fn label(&self, closes: &[f64]) -> Option<SignalLabel> {
        if closes.len() < self.slow + 1 {
            return None;
        }
        let prev = self.diff(&closes[..closes.len() - 1])?;
        let cur = self.diff(closes)?;
        if cur.abs() < self.min_edge {
            return Some(SignalLabel::None);
        }
        Some(if prev <= 0.0 && cur > 0.0 {
            SignalLabel::Buy
        } else if prev >= 0.0 && cur < 0.0 {
            SignalLabel::Sell
        } else {
            SignalLabel::None
        })
    }
}

#[async_trait]
impl SignalSource for MaCrossSignal {
    async fn predict(&self, _symbol: &str, bars: &[Bar]) -> Option<SignalLabel> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        self.label(&closes)
    }
}
