// ===============================
// src/commands.rs
// ===============================
//
// Command operator:
// - `Operator`        : pause / resume / set_risk / status / positions di atas TradingState,
//                       close posisi per ticket lewat OrderManager (gagal -> orphan, di-retry cycle berikut)
// - `TelegramCommands`: polling getUpdates tiap 3 detik, hanya dari chat yang dikonfigurasi,
//                       balasan lewat notifier
//
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::notifier::{reply, SharedNotifier, TelegramNotifier};
use crate::orders::OrderManager;
use crate::state::TradingState;
use crate::venue::VenueClient;

pub const POLL_EVERY: Duration = Duration::from_secs(3);

pub const USAGE: &str = "Available commands:\n\
/status - Bot status\n\
/pause - Pause trading\n\
/resume - Resume trading\n\
/positions - Show open positions\n\
/risk 0.02 - Set risk percentage\n\
/close 12345 - Close position by ticket\n\
/help - Show this help";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorCommand {
    Status,
    Pause,
    Resume,
    Positions,
    Risk(f64),
    Close(u64),
    Help,
}

impl OperatorCommand {
    /// Parse teks chat. `Err` berisi balasan untuk operator.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut parts = text.split_whitespace();
        let head = parts.next().unwrap_or_default();
        // "/status@NamaBot" di grup
        let cmd = head.split('@').next().unwrap_or_default().to_ascii_lowercase();
        match cmd.as_str() {
            "/status" => Ok(Self::Status),
            "/pause" => Ok(Self::Pause),
            "/resume" => Ok(Self::Resume),
            "/positions" => Ok(Self::Positions),
            "/help" | "/start" => Ok(Self::Help),
            "/risk" => match parts.next().map(str::parse::<f64>) {
                Some(Ok(v)) if v.is_finite() && v >= 0.0 => Ok(Self::Risk(v)),
                _ => Err("Invalid risk value. Usage: /risk 0.02".to_string()),
            },
            "/close" => match parts.next().map(str::parse::<u64>) {
                Some(Ok(t)) => Ok(Self::Close(t)),
                _ => Err("Invalid ticket. Usage: /close 12345".to_string()),
            },
            _ => Err(format!("Unknown command.\n{USAGE}")),
        }
    }
}

#[derive(Clone)]
pub struct Operator {
    state: TradingState,
    venue: VenueClient,
    orders: Arc<OrderManager>,
}

impl Operator {
    pub fn new(state: TradingState, venue: VenueClient, orders: Arc<OrderManager>) -> Self {
        Self { state, venue, orders }
    }

    pub fn pause(&self) -> String {
        self.state.pause();
        info!("operator: trading paused");
        "Trading PAUSED".to_string()
    }

    pub fn resume(&self) -> String {
        self.state.resume();
        info!("operator: trading resumed");
        "Trading RESUMED".to_string()
    }

    pub fn set_risk(&self, value: f64) -> String {
        match self.state.set_risk(value) {
            Some(applied) => {
                info!(requested = value, applied, "operator: risk changed");
                format!("Risk set to {:.1}% (max {:.1}%)", applied * 100.0, self.state.max_risk() * 100.0)
            }
            None => "Invalid risk value. Usage: /risk 0.02".to_string(),
        }
    }

    pub async fn query_status(&self) -> String {
        let v = self.state.view();
        let mut out = format!(
            "Trading: {}\nRisk: {:.2}% (max {:.2}%)",
            if v.enabled { "ACTIVE" } else { "PAUSED" },
            v.risk * 100.0,
            v.max_risk * 100.0
        );
        match self.venue.account().await {
            Some(a) => out.push_str(&format!(
                "\nEquity: ${:.2}\nBalance: ${:.2}\nFree margin: ${:.2}",
                a.equity, a.balance, a.free_margin
            )),
            None => out.push_str("\nAccount: unavailable"),
        }
        out
    }

    pub async fn query_positions(&self) -> String {
        match self.venue.positions().await {
            None => "Positions unavailable".to_string(),
            Some(p) if p.is_empty() => "No open positions".to_string(),
            Some(p) => {
                let mut msg = String::from("Open Positions:");
                for pos in p {
                    msg.push_str(&format!(
                        "\n#{} {} {} {:.2} lots @ {:.5}",
                        pos.ticket,
                        pos.symbol,
                        pos.side.as_str(),
                        pos.volume,
                        pos.open_price
                    ));
                }
                msg
            }
        }
    }

    /// Tutup posisi venue per ticket. Posisi dicatat di book dulu supaya close
    /// yang gagal jadi orphan dan dicoba lagi oleh decision cycle.
    pub async fn close_position(&self, ticket: u64) -> String {
        let Some(open) = self.venue.positions().await else {
            return "Positions unavailable".to_string();
        };
        let Some(pos) = open.into_iter().find(|p| p.ticket == ticket) else {
            return format!("Position #{ticket} not found");
        };
        self.orders.book().insert(pos.clone());
        info!(ticket, symbol = %pos.symbol, "operator: close requested");
        if self.orders.close(&pos).await {
            format!("Position #{ticket} closed")
        } else {
            format!("Close FAILED for #{ticket}, retrying next cycle")
        }
    }

    pub async fn execute(&self, cmd: OperatorCommand) -> String {
        match cmd {
            OperatorCommand::Status => self.query_status().await,
            OperatorCommand::Pause => self.pause(),
            OperatorCommand::Resume => self.resume(),
            OperatorCommand::Positions => self.query_positions().await,
            OperatorCommand::Risk(v) => self.set_risk(v),
            OperatorCommand::Close(t) => self.close_position(t).await,
            OperatorCommand::Help => USAGE.to_string(),
        }
    }

    pub async fn handle_text(&self, text: &str) -> String {
        match OperatorCommand::parse(text) {
            Ok(cmd) => self.execute(cmd).await,
            Err(usage) => usage,
        }
    }
}

// ---- Telegram getUpdates ----
#[derive(Debug, Deserialize)]
pub struct Updates {
    #[serde(default)]
    pub result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Ambil teks command dari batch update dan majukan offset.
/// Pesan dari chat selain `allowed_chat` diabaikan.
pub fn accept_updates(updates: Vec<Update>, allowed_chat: &str, offset: &mut i64) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for u in updates {
        *offset = (*offset).max(u.update_id + 1);
        let Some(msg) = u.message else { continue };
        let Some(text) = msg.text else { continue };
        let chat = msg.chat.id.to_string();
        if chat != allowed_chat {
            warn!(%chat, "telegram: command from unknown chat ignored");
            continue;
        }
        out.push((chat, text));
    }
    out
}

pub struct TelegramCommands {
    http: reqwest::Client,
    api_base: String,
    allowed_chat: String,
    operator: Operator,
    notifier: SharedNotifier,
    offset: i64,
}

impl TelegramCommands {
    pub fn new(tg: &TelegramNotifier, allowed_chat: String, operator: Operator, notifier: SharedNotifier) -> Self {
        Self {
            http: tg.http().clone(),
            api_base: tg.api_base().to_string(),
            allowed_chat,
            operator,
            notifier,
            offset: 0,
        }
    }

    async fn poll(&mut self) -> Result<Vec<(String, String)>, Box<dyn std::error::Error + Send + Sync>> {
        let mut url = Url::parse(&format!("{}/getUpdates", self.api_base))?;
        url.query_pairs_mut().append_pair("offset", &self.offset.to_string());
        let updates: Updates = self.http.get(url).send().await?.error_for_status()?.json().await?;
        Ok(accept_updates(updates.result, &self.allowed_chat, &mut self.offset))
    }

    pub async fn run(mut self) {
        info!("telegram commands: listening");
        loop {
            match self.poll().await {
                Ok(cmds) => {
                    for (chat, text) in cmds {
                        debug!(%chat, %text, "telegram command");
                        let answer = self.operator.handle_text(&text).await;
                        reply(self.notifier.as_ref(), &chat, &answer).await;
                    }
                }
                Err(e) => warn!(err = %e, "telegram command poll failed"),
            }
            sleep(POLL_EVERY).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue_paper::fixtures::{eurusd, market_req};
    use crate::venue_paper::PaperVenue;
    use crate::venue::Venue;
    use crate::domain::Side;
    use crate::notifier::testing::RecordingNotifier;

    fn operator() -> (Operator, TradingState, Arc<PaperVenue>) {
        let paper = Arc::new(PaperVenue::new(10_000.0, 100.0).with_symbol(eurusd(1.1000, 1.1002), &[1.1001; 30]));
        let state = TradingState::new(0.01, 0.03);
        let venue = VenueClient::for_tests(paper.clone());
        let orders = Arc::new(OrderManager::new(venue.clone(), Arc::new(RecordingNotifier::default())));
        (Operator::new(state.clone(), venue, orders), state, paper)
    }

    #[test]
    fn parses_known_commands() {
        assert_eq!(OperatorCommand::parse("/status"), Ok(OperatorCommand::Status));
        assert_eq!(OperatorCommand::parse("/pause@fx_bot"), Ok(OperatorCommand::Pause));
        assert_eq!(OperatorCommand::parse("  /risk 0.02 "), Ok(OperatorCommand::Risk(0.02)));
        assert!(OperatorCommand::parse("/risk").unwrap_err().contains("Usage: /risk"));
        assert!(OperatorCommand::parse("/risk abc").is_err());
        assert!(OperatorCommand::parse("/risk -1").is_err());
        assert_eq!(OperatorCommand::parse("/close 42"), Ok(OperatorCommand::Close(42)));
        assert!(OperatorCommand::parse("/close abc").unwrap_err().contains("Usage: /close"));
        assert!(OperatorCommand::parse("hello").unwrap_err().contains("/positions"));
    }

    #[tokio::test]
    async fn pause_resume_and_risk_mutate_shared_state() {
        let (op, state, _) = operator();
        assert_eq!(op.handle_text("/pause").await, "Trading PAUSED");
        assert!(!state.is_enabled());
        assert!(op.handle_text("/status").await.starts_with("Trading: PAUSED"));
        op.handle_text("/resume").await;
        assert!(state.is_enabled());

        assert_eq!(op.handle_text("/risk 0.02").await, "Risk set to 2.0% (max 3.0%)");
        assert_eq!(op.handle_text("/risk 0.5").await, "Risk set to 3.0% (max 3.0%)");
        assert_eq!(state.risk(), 0.03);
    }

    #[tokio::test]
    async fn positions_are_listed() {
        let (op, _, paper) = operator();
        assert_eq!(op.query_positions().await, "No open positions");
        let t = paper.submit_order(&market_req("EURUSD", Side::Buy, 0.1, None)).await.unwrap().ticket.unwrap();
        let msg = op.query_positions().await;
        assert!(msg.contains(&format!("#{t} EURUSD BUY 0.10 lots @ 1.10020")));
        assert!(op.query_status().await.contains("Balance: $10000.00"));
    }

    #[tokio::test]
    async fn close_command_closes_venue_position() {
        let (op, _, paper) = operator();
        let t = paper.submit_order(&market_req("EURUSD", Side::Buy, 0.1, None)).await.unwrap().ticket.unwrap();

        assert_eq!(op.handle_text("/close 999").await, "Position #999 not found");
        assert_eq!(op.handle_text(&format!("/close {t}")).await, format!("Position #{t} closed"));
        assert!(paper.positions().await.unwrap().is_empty());
        assert!(op.orders.book().snapshot().is_empty());
    }

    #[test]
    fn updates_advance_offset_and_filter_chat() {
        let raw = r#"{"ok":true,"result":[
            {"update_id":10,"message":{"chat":{"id":42},"text":"/status"}},
            {"update_id":11,"message":{"chat":{"id":7},"text":"/pause"}},
            {"update_id":12,"message":{"chat":{"id":42}}},
            {"update_id":13}
        ]}"#;
        let updates: Updates = serde_json::from_str(raw).unwrap();
        let mut offset = 0;
        let cmds = accept_updates(updates.result, "42", &mut offset);
        assert_eq!(cmds, vec![("42".to_string(), "/status".to_string())]);
        assert_eq!(offset, 14);
    }
}
