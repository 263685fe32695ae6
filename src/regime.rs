// ===============================
// src/regime.rs
// ===============================
//
// Klasifikasi regime pasar: trending vs ranging.
// Default: efficiency ratio atas close bar terakhir (>= threshold -> trending).
//
use async_trait::async_trait;

use crate::domain::Timeframe;
use crate::indicators::efficiency_ratio;
use crate::venue::VenueClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime { Trending, Ranging }

#[async_trait]
pub trait RegimeDetector: Send + Sync {
    /// `None` = regime tidak bisa ditentukan (data tidak tersedia).
    async fn classify(&self, venue: &VenueClient, symbol: &str) -> Option<Regime>;
}

#[derive(Debug, Clone)]
pub struct EfficiencyRegime {
    pub timeframe: Timeframe,
    pub lookback: usize,
    pub threshold: f64,
}

impl Default for EfficiencyRegime {
    fn default() -> Self {
        Self { timeframe: Timeframe::M15, lookback: 30, threshold: 0.3 }
    }
}

impl EfficiencyRegime {
    pub fn classify_closes(&self, closes: &[f64]) -> Option<Regime> {
        if closes.len() < self.lookback.max(2) {
            return None;
        }
        let er = efficiency_ratio(&closes[closes.len() - self.lookback.max(2)..])?;
        Some(if er >= self.threshold { Regime::Trending } else { Regime::Ranging })
    }
}

#[async_trait]
impl RegimeDetector for EfficiencyRegime {
    async fn classify(&self, venue: &VenueClient, symbol: &str) -> Option<Regime> {
        let bars = venue.recent_bars(symbol, self.timeframe, self.lookback).await?;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        self.classify_closes(&closes)
    }
}

/// Regime tetap, untuk paper run dan test.
#[derive(Debug, Clone, Copy)]
pub struct FixedRegime(pub Regime);

#[async_trait]
impl RegimeDetector for FixedRegime {
    async fn classify(&self, _venue: &VenueClient, _symbol: &str) -> Option<Regime> {
        Some(self.0)
    }
}
