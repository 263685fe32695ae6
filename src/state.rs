// ===============================
// src/state.rs
// ===============================
//
// State trading bersama antara decision cycle, listener operator dan config
// reloader. Semua akses atomik; handle di-clone (Arc) ke setiap task.
//
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::metrics::{RISK_CURRENT, TRADING_ENABLED};

#[derive(Debug)]
struct Inner {
    enabled: AtomicBool,
    // f64 disimpan sebagai bit pattern
    risk: AtomicU64,
    max_risk: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct TradingState {
    inner: Arc<Inner>,
}

/// Snapshot yang dibaca sekali di awal tiap iterasi cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateView {
    pub enabled: bool,
    pub risk: f64,
    pub max_risk: f64,
}

impl TradingState {
    pub fn new(base_risk: f64, max_risk: f64) -> Self {
        let s = Self {
            inner: Arc::new(Inner {
                enabled: AtomicBool::new(true),
                risk: AtomicU64::new(0),
                max_risk: AtomicU64::new(max_risk.to_bits()),
            }),
        };
        s.set_risk(base_risk);
        TRADING_ENABLED.set(1);
        s
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    pub fn pause(&self) {
        self.inner.enabled.store(false, Ordering::Release);
        TRADING_ENABLED.set(0);
    }

    pub fn resume(&self) {
        self.inner.enabled.store(true, Ordering::Release);
        TRADING_ENABLED.set(1);
    }

    pub fn risk(&self) -> f64 {
        f64::from_bits(self.inner.risk.load(Ordering::Acquire))
    }

    pub fn max_risk(&self) -> f64 {
        f64::from_bits(self.inner.max_risk.load(Ordering::Acquire))
    }

    /// Set risk, di-clamp ke [0, max_risk]. Nilai non-finite ditolak. Return nilai efektif.
    pub fn set_risk(&self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        let applied = value.clamp(0.0, self.max_risk());
        self.inner.risk.store(applied.to_bits(), Ordering::Release);
        RISK_CURRENT.set(applied);
        Some(applied)
    }

    /// Ganti plafon risk; risk saat ini ikut di-clamp agar current <= max tetap berlaku.
    pub fn set_max_risk(&self, max: f64) -> Option<f64> {
        if !max.is_finite() || max < 0.0 {
            return None;
        }
        self.inner.max_risk.store(max.to_bits(), Ordering::Release);
        let cur = self.risk();
        if cur > max {
            self.set_risk(max);
        }
        Some(max)
    }

    pub fn view(&self) -> StateView {
        StateView { enabled: self.is_enabled(), risk: self.risk(), max_risk: self.max_risk() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_is_clamped_to_ceiling() {
        let st = TradingState::new(0.01, 0.03);
        assert_eq!(st.risk(), 0.01);
        assert_eq!(st.set_risk(0.05), Some(0.03));
        assert_eq!(st.risk(), 0.03);
        assert_eq!(st.set_risk(-1.0), Some(0.0));
        assert_eq!(st.set_risk(f64::NAN), None);
        assert_eq!(st.risk(), 0.0);
    }

    #[test]
    fn lowering_ceiling_pulls_current_down() {
        let st = TradingState::new(0.02, 0.03);
        st.set_max_risk(0.015);
        assert_eq!(st.risk(), 0.015);
        assert!(st.risk() <= st.max_risk());
    }

    #[test]
    fn pause_resume_visible_across_clones() {
        let st = TradingState::new(0.01, 0.03);
        let other = st.clone();
        other.pause();
        assert!(!st.is_enabled());
        other.resume();
        assert!(st.view().enabled);
    }
}
