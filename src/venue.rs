// ===============================
// src/venue.rs
// ===============================
//
// Boundary ke execution venue.
// - `Venue`        : operasi mentah (paper / REST bridge), boleh gagal kapan saja
// - `VenueClient`  : wrapper resilient; semua panggilan lewat RetryPolicy dan
//                    slot koneksi (semaphore) yang dilepas di setiap jalur keluar
//
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::domain::{AccountState, Bar, Deal, InstrumentMetadata, OrderRequest, OrderResult, Position, Side, Tick, Timeframe};
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum VenueError {
    #[error("venue returned no data")]
    NoData,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("venue not connected")]
    NotConnected,
    #[error("unknown symbol {0}")]
    UnknownSymbol(String),
}

#[async_trait]
pub trait Venue: Send + Sync {
    async fn connect(&self) -> Result<(), VenueError>;
    async fn account(&self) -> Result<AccountState, VenueError>;
    async fn instrument(&self, symbol: &str) -> Result<InstrumentMetadata, VenueError>;
    async fn tick(&self, symbol: &str) -> Result<Tick, VenueError>;
    async fn recent_ticks(&self, symbol: &str, count: usize) -> Result<Vec<Tick>, VenueError>;
    async fn recent_bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, VenueError>;
    async fn closed_deals(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Deal>, VenueError>;
    async fn positions(&self) -> Result<Vec<Position>, VenueError>;
    async fn margin_for(&self, symbol: &str, side: Side, volume: f64, price: f64) -> Result<f64, VenueError>;
    async fn submit_order(&self, req: &OrderRequest) -> Result<OrderResult, VenueError>;
}

/// Resilient venue client. Murah untuk di-clone (Arc di dalam).
#[derive(Clone)]
pub struct VenueClient {
    venue: Arc<dyn Venue>,
    policy: RetryPolicy,
    connect_policy: RetryPolicy,
    slots: Arc<Semaphore>,
}

impl VenueClient {
    pub fn new(venue: Arc<dyn Venue>, policy: RetryPolicy, connect_policy: RetryPolicy) -> Self {
        // satu slot: terminal venue memproses satu request dalam satu waktu
        Self { venue, policy, connect_policy, slots: Arc::new(Semaphore::new(1)) }
    }

    /// Connect dengan exponential backoff. Gagal di sini fatal bagi caller saat startup.
    pub async fn connect(&self) -> Result<(), VenueError> {
        let max = self.connect_policy.max_attempts;
        let mut last_err = VenueError::NotConnected;
        for attempt in 0..max {
            match self.venue.connect().await {
                Ok(()) => {
                    info!(attempt = attempt + 1, "venue connected");
                    return Ok(());
                }
                Err(e) => {
                    error!(attempt = attempt + 1, max, err = %e, "venue connect failed");
                    last_err = e;
                    if attempt + 1 < max {
                        let wait = self.connect_policy.delay_for(attempt);
                        info!(wait_ms = wait.as_millis() as u64, "retrying venue connection");
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }
        warn!(max, "venue connect attempts exhausted");
        Err(last_err)
    }

    async fn call<'a, T, F, Fut>(&'a self, op: &'static str, f: F) -> Option<T>
    where
        F: Fn(&'a dyn Venue) -> Fut,
        Fut: std::future::Future<Output = Result<T, VenueError>>,
    {
        let venue: &'a dyn Venue = self.venue.as_ref();
        let slots: &'a Semaphore = self.slots.as_ref();
        let f = &f;
        self.policy
            .run(op, move || async move {
                // permit dilepas saat future selesai (sukses, error, maupun sebelum backoff)
                let _slot = slots.acquire().await.map_err(|_| VenueError::NotConnected)?;
                f(venue).await
            })
            .await
    }

    pub async fn account(&self) -> Option<AccountState> {
        self.call("account", |v| v.account()).await
    }

    pub async fn instrument(&self, symbol: &str) -> Option<InstrumentMetadata> {
        self.call("instrument", |v| v.instrument(symbol)).await
    }

    pub async fn tick(&self, symbol: &str) -> Option<Tick> {
        self.call("tick", |v| v.tick(symbol)).await
    }

    pub async fn recent_ticks(&self, symbol: &str, count: usize) -> Option<Vec<Tick>> {
        self.call("recent_ticks", |v| v.recent_ticks(symbol, count)).await
    }

    pub async fn recent_bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Option<Vec<Bar>> {
        self.call("recent_bars", |v| v.recent_bars(symbol, timeframe, count)).await
    }

    pub async fn closed_deals(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Option<Vec<Deal>> {
        self.call("closed_deals", |v| v.closed_deals(from, to)).await
    }

    pub async fn positions(&self) -> Option<Vec<Position>> {
        self.call("positions", |v| v.positions()).await
    }

    pub async fn margin_for(&self, symbol: &str, side: Side, volume: f64, price: f64) -> Option<f64> {
        self.call("margin_for", |v| v.margin_for(symbol, side, volume, price)).await
    }

    pub async fn submit_order(&self, req: &OrderRequest) -> Option<OrderResult> {
        self.call("submit_order", |v| v.submit_order(req)).await
    }

    #[cfg(test)]
    pub fn for_tests(venue: Arc<dyn Venue>) -> Self {
        let fast = RetryPolicy::new(3, Duration::from_millis(1));
        Self::new(venue, fast, fast)
    }
}

pub fn default_connect_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_secs(2))
}

#[cfg(test)]
pub mod testing {
    //! Venue yang gagal sesuai skrip, membungkus venue lain.
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    pub struct FlakyVenue {
        pub inner: Arc<dyn Venue>,
        pub fail_next: AtomicU32,
        pub calls: AtomicU32,
        pub account_reads: AtomicU32,
    }

    impl FlakyVenue {
        pub fn new(inner: Arc<dyn Venue>, fail_next: u32) -> Self {
            Self {
                inner,
                fail_next: AtomicU32::new(fail_next),
                calls: AtomicU32::new(0),
                account_reads: AtomicU32::new(0),
            }
        }
        fn gate(&self) -> Result<(), VenueError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.fail_next.load(Ordering::SeqCst);
            if left > 0 {
                self.fail_next.store(left - 1, Ordering::SeqCst);
                return Err(VenueError::Transport("injected".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Venue for FlakyVenue {
        async fn connect(&self) -> Result<(), VenueError> { self.gate()?; self.inner.connect().await }
        async fn account(&self) -> Result<AccountState, VenueError> {
            self.account_reads.fetch_add(1, Ordering::SeqCst);
            self.gate()?;
            self.inner.account().await
        }
        async fn instrument(&self, symbol: &str) -> Result<InstrumentMetadata, VenueError> {
            self.gate()?;
            self.inner.instrument(symbol).await
        }
        async fn tick(&self, symbol: &str) -> Result<Tick, VenueError> { self.gate()?; self.inner.tick(symbol).await }
        async fn recent_ticks(&self, symbol: &str, count: usize) -> Result<Vec<Tick>, VenueError> {
            self.gate()?;
            self.inner.recent_ticks(symbol, count).await
        }
        async fn recent_bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, VenueError> {
            self.gate()?;
            self.inner.recent_bars(symbol, timeframe, count).await
        }
        async fn closed_deals(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Deal>, VenueError> {
            self.gate()?;
            self.inner.closed_deals(from, to).await
        }
        async fn positions(&self) -> Result<Vec<Position>, VenueError> { self.gate()?; self.inner.positions().await }
        async fn margin_for(&self, symbol: &str, side: Side, volume: f64, price: f64) -> Result<f64, VenueError> {
            self.gate()?;
            self.inner.margin_for(symbol, side, volume, price).await
        }
        async fn submit_order(&self, req: &OrderRequest) -> Result<OrderResult, VenueError> {
            self.gate()?;
            self.inner.submit_order(req).await
        }
    }
}
