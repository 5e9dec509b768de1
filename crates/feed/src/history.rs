//! REST client used to backfill a freshly created aggregator with recent
//! minute bars before the streaming connection has produced any of its own.

use async_trait::async_trait;
use barstream_core::common::{Minute, Symbol};
use barstream_core::market::entity::Candle;
use barstream_core::market::error::MarketError;
use barstream_core::market::port::HistoryProvider;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::time::Duration;

const BACKFILL_WINDOW_DAYS: i64 = 7;
const MAX_ROWS: usize = 10_000;
/// Retail-tier data feed tag; matches the vendor's free/IEX-equivalent plan.
const FEED_TAG: &str = "iex";

pub struct HistoryBackfill {
    client: reqwest::Client,
    history_url: String,
    api_key_id: String,
    api_secret_key: String,
}

impl HistoryBackfill {
    pub fn new(
        history_url: String,
        api_key_id: String,
        api_secret_key: String,
        timeout: Duration,
    ) -> Result<Self, MarketError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MarketError::Unknown(e.to_string()))?;
        Ok(Self {
            client,
            history_url,
            api_key_id,
            api_secret_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    bars: Vec<HistoryBar>,
}

#[derive(Debug, Deserialize)]
struct HistoryBar {
    t: DateTime<Utc>,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

#[async_trait]
impl HistoryProvider for HistoryBackfill {
    async fn fetch_recent_bars(
        &self,
        symbol: &Symbol,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketError> {
        let end = Utc::now();
        let start = end - ChronoDuration::days(BACKFILL_WINDOW_DAYS);
        let bounded_limit = limit.min(MAX_ROWS);
        let url = format!("{}/{}/bars", self.history_url, symbol.as_str());

        let response = self
            .client
            .get(&url)
            .header("APCA-API-KEY-ID", &self.api_key_id)
            .header("APCA-API-SECRET-KEY", &self.api_secret_key)
            .query(&[
                ("start", start.to_rfc3339()),
                ("end", end.to_rfc3339()),
                ("timeframe", "1Min".to_string()),
                ("limit", bounded_limit.to_string()),
                ("feed", FEED_TAG.to_string()),
            ])
            .send()
            .await
            .map_err(|e| MarketError::Network(e.to_string()))?;

        if !response.status().is_success() {
            if response.status().as_u16() == 404 {
                return Ok(Vec::new());
            }
            return Err(MarketError::Network(format!(
                "history backfill returned {}",
                response.status()
            )));
        }

        let parsed: HistoryResponse = response
            .json()
            .await
            .map_err(|e| MarketError::Parse(e.to_string()))?;

        Ok(parsed
            .bars
            .into_iter()
            .map(|bar| Candle {
                time: Minute::align(bar.t),
                open: bar.o,
                high: bar.h,
                low: bar.l,
                close: bar.c,
                volume: bar.v,
                trade_count: 0,
                is_final: true,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_recent_bars_parses_response() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "bars": [
                {"t": "2024-01-01T09:30:00Z", "o": 1.0, "h": 2.0, "l": 0.5, "c": 1.5, "v": 100.0}
            ]
        });
        Mock::given(method("GET"))
            .and(path("/AAPL/bars"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = HistoryBackfill::new(
            server.uri(),
            "key".into(),
            "secret".into(),
            Duration::from_secs(5),
        )
        .unwrap();

        let bars = client
            .fetch_recent_bars(&Symbol::new("AAPL"), 10)
            .await
            .unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 1.5);
    }

    #[tokio::test]
    async fn fetch_recent_bars_returns_empty_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/MISSING/bars"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HistoryBackfill::new(
            server.uri(),
            "key".into(),
            "secret".into(),
            Duration::from_secs(5),
        )
        .unwrap();

        let bars = client
            .fetch_recent_bars(&Symbol::new("MISSING"), 10)
            .await
            .unwrap();
        assert!(bars.is_empty());
    }
}
