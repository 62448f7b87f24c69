use super::types::*;
use crate::errors::{AppError, AppResult};
use chrono::NaiveDate;
use reqwest::Client;

/// Market-data REST client. All methods return Result, never panic.
#[derive(Clone)]
pub struct MarketDataClient {
    client: Client,
    base_url: String,
}

impl MarketDataClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .pool_max_idle_per_host(4)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).send().await?;
        Self::decode(resp, "GET", path).await
    }

    async fn post<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> AppResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.post(&url).json(body).send().await?;
        Self::decode(resp, "POST", path).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
        method: &str,
        path: &str,
    ) -> AppResult<T> {
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let body = match serde_json::from_str::<ApiPayload<serde_json::Value>>(&body) {
                Ok(ApiPayload::Failure { error }) => error,
                _ => body,
            };
            return Err(AppError::MarketApi {
                status: status.as_u16(),
                body,
            });
        }

        match serde_json::from_str::<ApiPayload<T>>(&body) {
            Ok(ApiPayload::Success(v)) => Ok(v),
            Ok(ApiPayload::Failure { error }) => Err(AppError::MarketApi {
                status: status.as_u16(),
                body: error,
            }),
            Err(e) => Err(AppError::Parse(format!("{method} {path}: {e}"))),
        }
    }

    pub async fn get_price(&self, ticker: &str) -> AppResult<StockQuote> {
        self.get(&format!("/price/{}", ticker.to_uppercase())).await
    }

    pub async fn get_chain(&self, ticker: &str, option_type: OptionType) -> AppResult<ChainResponse> {
        self.get(&format!("/chain/{}?type={}", ticker.to_uppercase(), option_type.as_str()))
            .await
    }

    pub async fn compare(&self, mode: ComparisonMode, req: &CompareRequest) -> AppResult<CompareResponse> {
        self.post(mode.endpoint(), req).await
    }

    pub async fn get_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AppResult<HistoryResponse> {
        self.get(&format!(
            "/history/{}?start={}&end={}",
            ticker.to_uppercase(),
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        ))
        .await
    }

    /// Liveness check; the body is ignored.
    pub async fn health(&self) -> AppResult<()> {
        let url = format!("{}/health", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::MarketApi {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// Fire-and-forget warmup, optionally repeated as a keep-alive.
pub async fn run_keepalive(client: MarketDataClient, interval_secs: u64) {
    match client.health().await {
        Ok(()) => tracing::info!(base = client.base_url(), "market API warm"),
        Err(e) => tracing::warn!(error = %e, "market API warmup failed"),
    }

    if interval_secs == 0 {
        return;
    }

    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
    interval.tick().await;
    loop {
        interval.tick().await;
        if let Err(e) = client.health().await {
            tracing::warn!(error = %e, "keep-alive ping failed");
        } else {
            tracing::debug!("keep-alive ping ok");
        }
    }
}
