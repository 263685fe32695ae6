// ===============================
// src/calendar.rs
// ===============================
//
// Event oracle: apakah ada event ekonomi high-impact dalam lookahead window.
// Error apa pun diperlakukan sebagai "ada event" oleh admission (fail safe).
//
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("calendar url: {0}")]
    Url(#[from] url::ParseError),
    #[error("calendar payload is not a list")]
    Payload,
}

#[async_trait]
pub trait EventOracle: Send + Sync {
    async fn high_impact_event_now(&self) -> Result<bool, CalendarError>;
}

/// Kalender HTTP: GET `{base}?minImportance=high&from=..&to=..`, balasan JSON array.
pub struct HttpCalendar {
    http: reqwest::Client,
    base: String,
    lookahead: chrono::Duration,
}

impl HttpCalendar {
    pub fn new(base: String, lookahead: chrono::Duration) -> Result<Self, CalendarError> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { http, base, lookahead })
    }

    fn url(&self) -> Result<Url, CalendarError> {
        let now = Utc::now();
        let to = now + self.lookahead;
        let mut url = Url::parse(&self.base)?;
        url.query_pairs_mut()
            .append_pair("minImportance", "high")
            .append_pair("from", &now.to_rfc3339())
            .append_pair("to", &to.to_rfc3339());
        Ok(url)
    }
}

#[async_trait]
impl EventOracle for HttpCalendar {
    async fn high_impact_event_now(&self) -> Result<bool, CalendarError> {
        let rsp = self.http.get(self.url()?).send().await?.error_for_status()?;
        let v = rsp.json::<serde_json::Value>().await?;
        // beberapa provider membungkus list di field "result"
        let list = v.get("result").unwrap_or(&v);
        list.as_array().map(|a| !a.is_empty()).ok_or(CalendarError::Payload)
    }
}

/// Oracle tetap: dipakai kalau `CALENDAR_URL` tidak diset, dan di test.
#[derive(Debug, Clone, Copy)]
pub struct StaticCalendar(pub bool);

#[async_trait]
impl EventOracle for StaticCalendar {
    async fn high_impact_event_now(&self) -> Result<bool, CalendarError> {
        Ok(self.0)
    }
}
