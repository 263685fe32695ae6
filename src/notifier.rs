// ===============================
// src/notifier.rs
// ===============================
//
// Channel notifikasi ke operator. Fire-and-forget: kegagalan hanya di-log,
// tidak pernah menggagalkan caller.
//
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::metrics::NOTIFY_FAILURES;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("telegram http: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat_id: Option<&str>, text: &str) -> Result<(), NotifyError>;
}

/// Kirim pesan di task terpisah; caller tidak menunggu transport.
/// Error di-log dan ditelan. Await handle-nya hanya kalau pesan harus terkirim
/// sebelum proses selesai (fatal, shutdown).
pub fn notify(notifier: &SharedNotifier, text: impl Into<String>) -> JoinHandle<()> {
    let notifier = notifier.clone();
    let text = text.into();
    tokio::spawn(async move {
        if let Err(e) = notifier.send(None, &text).await {
            NOTIFY_FAILURES.inc();
            warn!(err = %e, "notification failed");
        }
    })
}

/// Balas ke chat tertentu (dipakai listener command).
pub async fn reply(notifier: &dyn Notifier, chat_id: &str, text: &str) {
    if let Err(e) = notifier.send(Some(chat_id), text).await {
        NOTIFY_FAILURES.inc();
        warn!(err = %e, %chat_id, "reply failed");
    }
}

pub struct TelegramNotifier {
    http: reqwest::Client,
    api_base: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: String) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { http, api_base: format!("https://api.telegram.org/bot{token}"), chat_id })
    }

    pub fn api_base(&self) -> &str { &self.api_base }
    pub fn http(&self) -> &reqwest::Client { &self.http }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, chat_id: Option<&str>, text: &str) -> Result<(), NotifyError> {
        let chat = chat_id.unwrap_or(&self.chat_id);
        let url = format!("{}/sendMessage", self.api_base);
        self.http
            .post(url)
            .json(&json!({ "chat_id": chat, "text": text, "parse_mode": "HTML" }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Notifier tanpa transport: hanya log. Dipakai kalau TELEGRAM_TOKEN tidak diset.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, chat_id: Option<&str>, text: &str) -> Result<(), NotifyError> {
        info!(chat_id = chat_id.unwrap_or("-"), %text, "notify");
        Ok(())
    }
}

pub type SharedNotifier = Arc<dyn Notifier>;

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Menyimpan semua pesan untuk assertion.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub messages: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        pub fn all(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }

        /// Tunggu sampai task notify yang di-spawn sempat jalan.
        pub async fn settled(&self, expected: usize) -> Vec<String> {
            for _ in 0..100 {
                if self.messages.lock().unwrap().len() >= expected {
                    break;
                }
                tokio::task::yield_now().await;
            }
            self.all()
        }
    }

    /// Notifier yang transport-nya lambat (mis. Telegram timeout).
    pub struct SlowNotifier {
        pub delay: Duration,
        pub inner: RecordingNotifier,
    }

    #[async_trait]
    impl Notifier for SlowNotifier {
        async fn send(&self, chat_id: Option<&str>, text: &str) -> Result<(), NotifyError> {
            tokio::time::sleep(self.delay).await;
            self.inner.send(chat_id, text).await
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, _chat_id: Option<&str>, text: &str) -> Result<(), NotifyError> {
            self.messages.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_send_is_swallowed() {
        // port 9 (discard) di localhost: koneksi ditolak -> error, tapi notify tidak panik
        let mut tg = TelegramNotifier::new("x", "1".into()).unwrap();
        tg.api_base = "http://127.0.0.1:9".into();
        let shared: SharedNotifier = Arc::new(tg);
        notify(&shared, "hello").await.unwrap();
        assert!(NOTIFY_FAILURES.get() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn notify_does_not_wait_for_transport() {
        let slow = Arc::new(testing::SlowNotifier {
            delay: Duration::from_secs(10),
            inner: testing::RecordingNotifier::default(),
        });
        let shared: SharedNotifier = slow.clone();
        let started = tokio::time::Instant::now();
        let handle = notify(&shared, "order done");
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(slow.inner.all().is_empty());

        handle.await.unwrap();
        assert_eq!(slow.inner.all(), vec!["order done".to_string()]);
    }
}
