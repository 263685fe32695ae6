// ===============================
// src/venue_rest.rs
// ===============================
//
// Venue lewat REST bridge (HTTP JSON di depan terminal broker).
// Semua request ditandatangani:
//   query = k1=v1&...&timestamp=<ms>&recvWindow=<ms>   (value di-urlencode)
//   signature = hex(HMAC-SHA256(secret, query))
//   POST: query juga memuat bodyHash = hex(SHA256(json body)), jadi isi order ikut ditandatangani
//   header X-API-KEY: <api key>
// Balasan `null` = NoData; status non-2xx dan error jaringan = Transport (transient).
//
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::domain::{AccountState, Bar, Deal, InstrumentMetadata, OrderRequest, OrderResult, Position, Side, Tick, Timeframe};
use crate::venue::{Venue, VenueError};

const API_KEY_HEADER: &str = "X-API-KEY";

pub fn timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn sign_query(secret: &str, query: &str) -> Result<String, VenueError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| VenueError::Transport(format!("hmac key: {e}")))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn body_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

pub fn build_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn transport(e: reqwest::Error) -> VenueError {
    VenueError::Transport(e.to_string())
}

#[derive(Debug, Clone)]
pub struct RestCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub recv_window: u64,
}

pub struct RestVenue {
    http: reqwest::Client,
    base: String,
    creds: RestCredentials,
}

impl RestVenue {
    pub fn new(base: &str, creds: RestCredentials) -> Result<Self, VenueError> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(10)).build().map_err(transport)?;
        Ok(Self { http, base: base.trim_end_matches('/').to_string(), creds })
    }

    fn signed_url(&self, path: &str, mut params: Vec<(&str, String)>) -> Result<String, VenueError> {
        params.push(("timestamp", timestamp_ms().to_string()));
        params.push(("recvWindow", self.creds.recv_window.to_string()));
        let query = build_query(&params);
        let sig = sign_query(&self.creds.api_secret, &query)?;
        Ok(format!("{}{}?{}&signature={}", self.base, path, query, sig))
    }

    /// URL bertanda tangan + body JSON yang hash-nya ada di query.
    fn signed_post<B: Serialize>(&self, path: &str, body: &B) -> Result<(String, Vec<u8>), VenueError> {
        let payload = serde_json::to_vec(body).map_err(|e| VenueError::Transport(format!("encode body: {e}")))?;
        let url = self.signed_url(path, vec![("bodyHash", body_hash(&payload))])?;
        Ok((url, payload))
    }

    async fn decode<T: DeserializeOwned>(rsp: reqwest::Response) -> Result<T, VenueError> {
        let status = rsp.status();
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            return Err(VenueError::Transport(format!("{status}: {body}")));
        }
        let v: Option<T> = rsp.json().await.map_err(transport)?;
        v.ok_or(VenueError::NoData)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: Vec<(&str, String)>) -> Result<T, VenueError> {
        let url = self.signed_url(path, params)?;
        debug!(%path, "rest venue: GET");
        let rsp = self.http.get(url).header(API_KEY_HEADER, &self.creds.api_key).send().await.map_err(transport)?;
        Self::decode(rsp).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, VenueError> {
        let (url, payload) = self.signed_post(path, body)?;
        debug!(%path, "rest venue: POST");
        let rsp = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.creds.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(transport)?;
        Self::decode(rsp).await
    }
}

#[async_trait]
impl Venue for RestVenue {
    async fn connect(&self) -> Result<(), VenueError> {
        let _: serde_json::Value = self.get("/ping", Vec::new()).await?;
        Ok(())
    }

    async fn account(&self) -> Result<AccountState, VenueError> {
        self.get("/account", Vec::new()).await
    }

    async fn instrument(&self, symbol: &str) -> Result<InstrumentMetadata, VenueError> {
        let path = format!("/symbols/{}", urlencoding::encode(symbol));
        match self.get(&path, Vec::new()).await {
            Err(VenueError::NoData) => Err(VenueError::UnknownSymbol(symbol.to_string())),
            other => other,
        }
    }

    async fn tick(&self, symbol: &str) -> Result<Tick, VenueError> {
        self.get("/tick", vec![("symbol", symbol.to_string())]).await
    }

    async fn recent_ticks(&self, symbol: &str, count: usize) -> Result<Vec<Tick>, VenueError> {
        self.get("/ticks", vec![("symbol", symbol.to_string()), ("count", count.to_string())]).await
    }

    async fn recent_bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, VenueError> {
        self.get(
            "/bars",
            vec![
                ("symbol", symbol.to_string()),
                ("timeframe", timeframe.as_str().to_string()),
                ("count", count.to_string()),
            ],
        )
        .await
    }

    async fn closed_deals(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Deal>, VenueError> {
        self.get("/deals", vec![("from", from.to_rfc3339()), ("to", to.to_rfc3339())]).await
    }

    async fn positions(&self) -> Result<Vec<Position>, VenueError> {
        self.get("/positions", Vec::new()).await
    }

    async fn margin_for(&self, symbol: &str, side: Side, volume: f64, price: f64) -> Result<f64, VenueError> {
        self.get(
            "/margin",
            vec![
                ("symbol", symbol.to_string()),
                ("side", side.as_str().to_string()),
                ("volume", format!("{volume}")),
                ("price", format!("{price}")),
            ],
        )
        .await
    }

    async fn submit_order(&self, req: &OrderRequest) -> Result<OrderResult, VenueError> {
        self.post("/orders", req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn venue(base: &str) -> RestVenue {
        RestVenue::new(
            base,
            RestCredentials { api_key: "k".into(), api_secret: "key".into(), recv_window: 5000 },
        )
        .unwrap()
    }

    #[test]
    fn hmac_matches_reference_vector() {
        let sig = sign_query("key", "The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(sig, "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8");
    }

    #[test]
    fn query_values_are_encoded() {
        let q = build_query(&[("symbol", "EURUSD".into()), ("from", "2024-01-01T00:00:00+00:00".into())]);
        assert_eq!(q, "symbol=EURUSD&from=2024-01-01T00%3A00%3A00%2B00%3A00");
    }

    #[test]
    fn signed_url_ends_with_signature_of_query() {
        let v = venue("http://bridge.local/");
        let url = v.signed_url("/tick", vec![("symbol", "EURUSD".into())]).unwrap();
        let (head, sig) = url.rsplit_once("&signature=").unwrap();
        let query = head.strip_prefix("http://bridge.local/tick?").unwrap();
        assert!(query.starts_with("symbol=EURUSD&timestamp="));
        assert!(query.ends_with("&recvWindow=5000"));
        assert_eq!(sig, sign_query("key", query).unwrap());
    }

    #[test]
    fn order_body_hash_is_part_of_signed_query() {
        assert_eq!(body_hash(b""), "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");

        let v = venue("http://bridge.local");
        let req = crate::venue_paper::fixtures::market_req("EURUSD", Side::Buy, 0.1, None);
        let (url, payload) = v.signed_post("/orders", &req).unwrap();
        let (head, sig) = url.rsplit_once("&signature=").unwrap();
        let query = head.strip_prefix("http://bridge.local/orders?").unwrap();
        assert!(query.starts_with(&format!("bodyHash={}&timestamp=", body_hash(&payload))));
        assert_eq!(sig, sign_query("key", query).unwrap());

        // volume lain -> hash lain
        let bigger = crate::venue_paper::fixtures::market_req("EURUSD", Side::Buy, 5.0, None);
        let (_, other) = v.signed_post("/orders", &bigger).unwrap();
        assert_ne!(body_hash(&payload), body_hash(&other));
    }

    #[tokio::test]
    async fn unreachable_bridge_is_transport_error() {
        let v = venue("http://127.0.0.1:9");
        assert!(matches!(v.connect().await, Err(VenueError::Transport(_))));
    }
}
