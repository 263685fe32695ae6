// ===============================
// src/orders.rs
// ===============================
//
// Order lifecycle: open / close market order lewat VenueClient.
// - sukses HANYA jika retcode == RETCODE_DONE (termasuk "unavailable" = gagal)
// - setiap hasil (sukses/gagal) di-log dan dikirim ke notifier
// - tidak ada retry internal di layer ini; retry transport ada di VenueClient
//
use std::sync::Mutex;

use ahash::AHashMap as HashMap;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::domain::{OrderRequest, OrderResult, Position, TradeIntent, RETCODE_DONE};
use crate::metrics::ORDERS;
use crate::notifier::{notify, SharedNotifier};
use crate::venue::VenueClient;

/// Identifier strategi yang menempel di setiap order.
pub const MAGIC: u64 = 234000;
pub const DEVIATION: u32 = 10;
const OPEN_COMMENT: &str = "fx_exec_bot";
const CLOSE_COMMENT: &str = "fx_exec_bot close";

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPosition {
    pub position: Position,
    /// Close pernah gagal; caller wajib mencoba lagi.
    pub orphaned: bool,
}

/// Posisi yang dibuka engine ini, per ticket.
#[derive(Debug, Default)]
pub struct PositionBook {
    inner: Mutex<HashMap<u64, TrackedPosition>>,
}

impl PositionBook {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, TrackedPosition>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, position: Position) {
        self.lock().insert(position.ticket, TrackedPosition { position, orphaned: false });
    }

    pub fn remove(&self, ticket: u64) -> Option<TrackedPosition> {
        self.lock().remove(&ticket)
    }

    pub fn mark_orphaned(&self, ticket: u64) {
        if let Some(t) = self.lock().get_mut(&ticket) {
            t.orphaned = true;
        }
    }

    /// Buang posisi yang sudah tidak ada di venue (kena SL/TP). Return jumlah yang dibuang.
    pub fn retain_open(&self, open_tickets: &[u64]) -> usize {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|ticket, _| open_tickets.contains(ticket));
        before - map.len()
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.lock().values().any(|t| t.position.symbol == symbol)
    }

    pub fn orphaned(&self) -> Vec<Position> {
        self.lock().values().filter(|t| t.orphaned).map(|t| t.position.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<TrackedPosition> {
        let mut v: Vec<_> = self.lock().values().cloned().collect();
        v.sort_by_key(|t| t.position.ticket);
        v
    }
}

pub struct OrderManager {
    venue: VenueClient,
    notifier: SharedNotifier,
    book: PositionBook,
}

impl OrderManager {
    pub fn new(venue: VenueClient, notifier: SharedNotifier) -> Self {
        Self { venue, notifier, book: PositionBook::default() }
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    fn validate(result: Option<OrderResult>) -> OrderResult {
        match result {
            Some(mut r) => {
                r.success = r.retcode == RETCODE_DONE;
                r
            }
            None => OrderResult::unavailable(),
        }
    }

    /// Buka posisi market sesuai intent.
    pub async fn open(&self, intent: &TradeIntent) -> OrderResult {
        let req = OrderRequest {
            symbol: intent.symbol.clone(),
            side: intent.side,
            volume: intent.volume,
            price: intent.entry,
            sl: Some(intent.stop),
            tp: Some(intent.target),
            position: None,
            deviation: DEVIATION,
            magic: MAGIC,
            comment: OPEN_COMMENT.to_string(),
        };
        let result = Self::validate(self.venue.submit_order(&req).await);

        if result.success {
            let msg = format!(
                "Position opened: {} {:.2} lots on {} at {:.5}",
                intent.side.as_str(),
                intent.volume,
                intent.symbol,
                result.price
            );
            info!(symbol = %intent.symbol, ticket = ?result.ticket, volume = intent.volume, price = result.price, "{msg}");
            if let Some(ticket) = result.ticket {
                self.book.insert(Position {
                    ticket,
                    symbol: intent.symbol.clone(),
                    side: intent.side,
                    volume: intent.volume,
                    open_price: result.price,
                    opened_at: Utc::now(),
                    magic: MAGIC,
                });
            }
            ORDERS.with_label_values(&["open", "done"]).inc();
            notify(&self.notifier, msg);
        } else {
            let reason = result.reason.as_deref().unwrap_or("-");
            error!(symbol = %intent.symbol, retcode = result.retcode, %reason, "failed to open position");
            ORDERS.with_label_values(&["open", "failed"]).inc();
            let msg = format!(
                "Open FAILED: {} {:.2} lots on {} (retcode {}, {})",
                intent.side.as_str(),
                intent.volume,
                intent.symbol,
                result.retcode,
                reason
            );
            notify(&self.notifier, msg);
        }
        result
    }

    /// Tutup posisi dengan order berlawanan di harga kini (bid untuk BUY, ask untuk SELL).
    pub async fn close(&self, position: &Position) -> bool {
        let Some(tick) = self.venue.tick(&position.symbol).await else {
            warn!(ticket = position.ticket, symbol = %position.symbol, "close: tick unavailable");
            self.book.mark_orphaned(position.ticket);
            ORDERS.with_label_values(&["close", "failed"]).inc();
            notify(
                &self.notifier,
                format!("Close FAILED: {} ticket {} (no price)", position.symbol, position.ticket),
            );
            return false;
        };
        let price = match position.side {
            crate::domain::Side::Buy => tick.bid,
            crate::domain::Side::Sell => tick.ask,
        };
        let req = OrderRequest {
            symbol: position.symbol.clone(),
            side: position.side.opposite(),
            volume: position.volume,
            price,
            sl: None,
            tp: None,
            position: Some(position.ticket),
            deviation: DEVIATION,
            magic: MAGIC,
            comment: CLOSE_COMMENT.to_string(),
        };
        let result = Self::validate(self.venue.submit_order(&req).await);

        if result.success {
            let msg = format!("Position closed: {:.2} lots on {} at {:.5}", position.volume, position.symbol, price);
            info!(ticket = position.ticket, symbol = %position.symbol, price, "{msg}");
            self.book.remove(position.ticket);
            ORDERS.with_label_values(&["close", "done"]).inc();
            notify(&self.notifier, msg);
            true
        } else {
            let reason = result.reason.as_deref().unwrap_or("-");
            error!(ticket = position.ticket, retcode = result.retcode, %reason, "failed to close position");
            self.book.mark_orphaned(position.ticket);
            ORDERS.with_label_values(&["close", "failed"]).inc();
            notify(
                &self.notifier,
                format!(
                    "Close FAILED: {} ticket {} (retcode {}, {})",
                    position.symbol, position.ticket, result.retcode, reason
                ),
            );
            false
        }
    }
}
