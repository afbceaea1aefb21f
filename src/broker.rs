use crate::error::EngineError;
use crate::gateway::{BarFeed, OrderGateway};
use crate::models::{Bar, OrderAck, OrderStatus, Side};
use chrono::{DateTime, Utc};
use log::{info, warn};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::json;
use std::env;
use tokio::time::{sleep, Duration};

const API_KEY_ENV: &str = "BROKER_API_KEY";
const API_SECRET_ENV: &str = "BROKER_API_SECRET";
const TRADING_URL_ENV: &str = "BROKER_TRADING_URL";
const DATA_URL_ENV: &str = "BROKER_DATA_URL";
const REQUEST_DELAY: Duration = Duration::from_millis(350);

/// REST order gateway for an Alpaca-compatible brokerage API. Credentials
/// and endpoints come from the environment so they never land in config
/// files.
pub struct BrokerClient {
    http: Client,
    base_url: String,
    headers: HeaderMap,
    symbol: String,
}

impl BrokerClient {
    pub fn from_env(symbol: &str) -> Result<Self, EngineError> {
        let base_url = require_env(TRADING_URL_ENV)?;
        let headers = auth_headers()?;
        Ok(Self {
            http: Client::new(),
            base_url,
            headers,
            symbol: symbol.to_uppercase(),
        })
    }

    async fn submit_order(&self, body: serde_json::Value) -> Result<OrderAck, EngineError> {
        sleep(REQUEST_DELAY).await;
        let url = format!("{}/v2/orders", self.base_url);
        let response = self
            .http
            .post(url)
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY
            || response.status() == StatusCode::FORBIDDEN
        {
            let reason = response.text().await.unwrap_or_default();
            return Err(EngineError::GatewayRejected {
                side: "order",
                reason,
            });
        }

        let order: BrokerOrder = response.error_for_status()?.json().await?;
        let order_id = order.id.ok_or_else(|| {
            EngineError::BrokerResponse("order accepted without an id".to_string())
        })?;
        Ok(OrderAck { order_id })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, EngineError> {
        sleep(REQUEST_DELAY).await;
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    fn order_body(&self, side: Side, quantity: i64) -> serde_json::Value {
        json!({
            "symbol": self.symbol,
            "qty": quantity.to_string(),
            "side": side.as_str(),
            "time_in_force": "day",
        })
    }
}

impl OrderGateway for BrokerClient {
    async fn submit_market(&self, side: Side, quantity: i64) -> Result<OrderAck, EngineError> {
        let mut body = self.order_body(side, quantity);
        body["type"] = json!("market");
        self.submit_order(body).await
    }

    async fn submit_stop(
        &self,
        side: Side,
        quantity: i64,
        stop_price: f64,
    ) -> Result<OrderAck, EngineError> {
        let mut body = self.order_body(side, quantity);
        body["type"] = json!("stop");
        body["stop_price"] = json!(format!("{:.2}", stop_price));
        self.submit_order(body).await
    }

    async fn submit_limit(
        &self,
        side: Side,
        quantity: i64,
        limit_price: f64,
    ) -> Result<OrderAck, EngineError> {
        let mut body = self.order_body(side, quantity);
        body["type"] = json!("limit");
        body["limit_price"] = json!(format!("{:.2}", limit_price));
        self.submit_order(body).await
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus, EngineError> {
        let order: BrokerOrder = self.get(&format!("/v2/orders/{}", order_id)).await?;
        Ok(order.normalized_status())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), EngineError> {
        sleep(REQUEST_DELAY).await;
        let url = format!("{}/v2/orders/{}", self.base_url, order_id);
        let response = self
            .http
            .delete(url)
            .headers(self.headers.clone())
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                warn!("Order {} missing while cancelling (404)", order_id);
                Ok(())
            }
            // Already filled or otherwise not cancelable.
            StatusCode::UNPROCESSABLE_ENTITY => {
                info!("Order {} not cancelable (422)", order_id);
                Ok(())
            }
            StatusCode::NO_CONTENT => Ok(()),
            _ => {
                response.error_for_status()?;
                Ok(())
            }
        }
    }

    async fn account_equity(&self) -> Result<f64, EngineError> {
        let account: BrokerAccount = self.get("/v2/account").await?;
        account
            .equity
            .ok_or_else(|| EngineError::BrokerResponse("account has no equity field".to_string()))
    }

    async fn observe_bar(&self, _bar: &Bar) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Polls the market-data endpoint for the latest completed bar, dropping
/// bars already seen so the engine receives a strictly increasing series.
pub struct LatestBarFeed {
    http: Client,
    data_url: String,
    headers: HeaderMap,
    symbol: String,
    poll_interval: Duration,
    last_timestamp: Option<DateTime<Utc>>,
}

impl LatestBarFeed {
    pub fn from_env(symbol: &str, poll_interval: Duration) -> Result<Self, EngineError> {
        let data_url = require_env(DATA_URL_ENV)?;
        let headers = auth_headers()?;
        Ok(Self {
            http: Client::new(),
            data_url,
            headers,
            symbol: symbol.to_uppercase(),
            poll_interval,
            last_timestamp: None,
        })
    }

    async fn fetch_latest(&self) -> Result<Option<Bar>, EngineError> {
        let url = format!("{}/v2/stocks/{}/bars/latest", self.data_url, self.symbol);
        let response = self
            .http
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await?
            .error_for_status()?;
        let payload: LatestBarResponse = response.json().await?;
        Ok(payload.bar.map(BrokerBar::into_bar))
    }
}

impl BarFeed for LatestBarFeed {
    async fn next_bar(&mut self) -> Result<Option<Bar>, EngineError> {
        loop {
            if let Some(bar) = self.fetch_latest().await? {
                if self.last_timestamp.map_or(true, |seen| bar.timestamp > seen) {
                    self.last_timestamp = Some(bar.timestamp);
                    return Ok(Some(bar));
                }
            }
            sleep(self.poll_interval).await;
        }
    }
}

fn require_env(name: &str) -> Result<String, EngineError> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| EngineError::Config(format!("missing required environment variable {}", name)))
}

fn auth_headers() -> Result<HeaderMap, EngineError> {
    let api_key = require_env(API_KEY_ENV)?;
    let api_secret = require_env(API_SECRET_ENV)?;
    let mut headers = HeaderMap::new();
    headers.insert(
        "APCA-API-KEY-ID",
        HeaderValue::from_str(&api_key)
            .map_err(|_| EngineError::Config("API key is not a valid header value".to_string()))?,
    );
    headers.insert(
        "APCA-API-SECRET-KEY",
        HeaderValue::from_str(&api_secret).map_err(|_| {
            EngineError::Config("API secret is not a valid header value".to_string())
        })?,
    );
    Ok(headers)
}

#[derive(Debug, Deserialize)]
struct BrokerAccount {
    #[serde(default, deserialize_with = "flexible_f64")]
    equity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BrokerOrder {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, deserialize_with = "flexible_f64")]
    filled_avg_price: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64")]
    limit_price: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64")]
    stop_price: Option<f64>,
    #[serde(default)]
    filled_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

impl BrokerOrder {
    fn normalized_status(&self) -> OrderStatus {
        let status = self
            .status
            .as_deref()
            .unwrap_or("unknown")
            .trim()
            .to_lowercase();
        match status.as_str() {
            "filled" | "done_for_day" => OrderStatus::Filled {
                price: self
                    .filled_avg_price
                    .or(self.limit_price)
                    .or(self.stop_price)
                    .unwrap_or(0.0),
                filled_at: parse_timestamp(self.filled_at.as_deref())
                    .or_else(|| parse_timestamp(self.updated_at.as_deref()))
                    .unwrap_or_else(Utc::now),
            },
            value if is_dead_status(value) => OrderStatus::Rejected {
                reason: status.clone(),
            },
            _ => OrderStatus::Pending,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LatestBarResponse {
    #[serde(default)]
    bar: Option<BrokerBar>,
}

#[derive(Debug, Deserialize)]
struct BrokerBar {
    #[serde(rename = "t")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "o")]
    open: f64,
    #[serde(rename = "h")]
    high: f64,
    #[serde(rename = "l")]
    low: f64,
    #[serde(rename = "c")]
    close: f64,
    #[serde(rename = "v")]
    volume: f64,
}

impl BrokerBar {
    fn into_bar(self) -> Bar {
        Bar {
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// Brokers report prices as either JSON numbers or decimal strings.
fn flexible_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    let raw = Option::<Raw>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Raw::Number(value)) => Some(value),
        Some(Raw::Text(value)) => value.trim().parse::<f64>().ok(),
        None => None,
    })
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|value| {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

fn is_dead_status(status: &str) -> bool {
    matches!(
        status,
        "canceled"
            | "cancelled"
            | "expired"
            | "rejected"
            | "stopped"
            | "suspended"
            | "pending_cancel"
    )
}
