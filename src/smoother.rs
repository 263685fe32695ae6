// ===============================
// src/smoother.rs
// ===============================
//
// Kalman filter skalar per instrumen (state = harga, transisi & observasi identitas).
//   predict : P = P + Q
//   update  : K = P / (P + R);  x = x + K (z - x);  P = (1 - K) P
// Observasi pertama memakai prior awal tanpa langkah predict.
//
use ahash::AHashMap as HashMap;

pub const MIN_OBSERVATIONS: usize = 10;
pub const PROCESS_NOISE: f64 = 0.01;
pub const OBSERVATION_NOISE: f64 = 1.0;
const INITIAL_MEAN: f64 = 0.0;
const INITIAL_COVARIANCE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanState {
    pub mean: f64,
    pub covariance: f64,
}

impl Default for KalmanState {
    fn default() -> Self {
        Self { mean: INITIAL_MEAN, covariance: INITIAL_COVARIANCE }
    }
}

impl KalmanState {
    fn update(&mut self, z: f64) {
        let k = self.covariance / (self.covariance + OBSERVATION_NOISE);
        self.mean += k * (z - self.mean);
        self.covariance *= 1.0 - k;
    }

    fn predict(&mut self) {
        self.covariance += PROCESS_NOISE;
    }
}

/// Satu filter per instrumen, dibuat lazy saat pertama dipakai.
#[derive(Debug, Default)]
pub struct PriceSmoother {
    filters: HashMap<String, KalmanState>,
}

impl PriceSmoother {
    pub fn new() -> Self { Self::default() }

    /// Estimasi harga ter-filter dari `prices` (urut lama -> baru).
    ///
    /// Kurang dari [`MIN_OBSERVATIONS`] titik: harga terakhir apa adanya
    /// (atau `None` kalau kosong). Selain itu filter dijalankan ulang dari
    /// prior awal atas seluruh window dan state akhirnya disimpan.
    pub fn smooth(&mut self, symbol: &str, prices: &[f64]) -> Option<f64> {
        let state = self.filters.entry(symbol.to_string()).or_default();
        if prices.len() < MIN_OBSERVATIONS {
            return prices.last().copied();
        }

        let mut kf = KalmanState::default();
        for (i, &z) in prices.iter().enumerate() {
            if i > 0 {
                kf.predict();
            }
            kf.update(z);
        }
        *state = kf;
        kf.mean.is_finite().then_some(kf.mean)
    }

    pub fn state(&self, symbol: &str) -> Option<KalmanState> {
        self.filters.get(symbol).copied()
    }
}
