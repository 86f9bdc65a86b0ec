//! Futures Venue Client
//!
//! REST client for an LN-Markets-style futures API. Requests are signed with
//! the account's key, passphrase and an HMAC-SHA256 signature over
//! `timestamp + method + path + params`.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{ActiveAccount, PositionSnapshot, Side};
use crate::ports::{Credentials, VenueClient, VenueConnector, VenueError};

type HmacSha256 = Hmac<Sha256>;

const FUTURES_PATH: &str = "/v2/futures";
const USER_PATH: &str = "/v2/user";

#[derive(Debug, Clone)]
pub struct VenueSettings {
    /// Base URL, e.g. `https://api.lnmarkets.com`
    pub api_url: String,
    pub timeout: Duration,
    pub network: String,
}

impl Default for VenueSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.lnmarkets.com".to_string(),
            timeout: Duration::from_secs(30),
            network: "mainnet".to_string(),
        }
    }
}

/// Trade as returned by the venue
#[derive(Debug, Clone, Deserialize)]
struct WireTrade {
    id: String,
    side: String,
    quantity: f64,
    margin: f64,
    leverage: f64,
    price: f64,
    #[serde(default)]
    exit_price: Option<f64>,
    #[serde(default)]
    pl: f64,
    #[serde(default)]
    opening_fee: f64,
    #[serde(default)]
    closing_fee: f64,
    /// Milliseconds since epoch
    creation_ts: i64,
    #[serde(default)]
    closed_ts: Option<i64>,
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, VenueError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| VenueError::Decode(format!("invalid timestamp {}", ms)))
}

impl TryFrom<WireTrade> for PositionSnapshot {
    type Error = VenueError;

    fn try_from(trade: WireTrade) -> Result<Self, Self::Error> {
        let side = match trade.side.as_str() {
            "b" | "buy" => Side::Buy,
            "s" | "sell" => Side::Sell,
            other => return Err(VenueError::Decode(format!("unknown side '{}'", other))),
        };
        Ok(PositionSnapshot {
            id: trade.id,
            side,
            quantity: trade.quantity,
            margin: trade.margin,
            leverage: trade.leverage,
            entry_price: trade.price,
            exit_price: trade.exit_price,
            realized_pnl: trade.pl,
            opening_fee: trade.opening_fee,
            closing_fee: trade.closing_fee,
            opened_at: from_millis(trade.creation_ts)?,
            closed_at: trade.closed_ts.map(from_millis).transpose()?,
        })
    }
}

/// Venue client bound to one account's credentials
pub struct FuturesClient {
    http: Client,
    settings: VenueSettings,
    credentials: Credentials,
}

impl FuturesClient {
    pub fn new(http: Client, settings: VenueSettings, credentials: Credentials) -> Self {
        Self {
            http,
            settings,
            credentials,
        }
    }

    fn signature(&self, timestamp: &str, method: &Method, path: &str, params: &str) -> Result<String, VenueError> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.api_secret.as_bytes())
            .map_err(|e| VenueError::InvalidCredentials(format!("bad secret: {}", e)))?;
        mac.update(timestamp.as_bytes());
        mac.update(method.as_str().as_bytes());
        mac.update(path.as_bytes());
        mac.update(params.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, VenueError> {
        let params = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = self.signature(&timestamp, &method, path, &params)?;

        let url = format!("{}{}", self.settings.api_url.trim_end_matches('/'), path);
        let response = self
            .http
            .request(method, &url)
            .query(query)
            .header("LNM-ACCESS-KEY", &self.credentials.api_key)
            .header("LNM-ACCESS-PASSPHRASE", &self.credentials.passphrase)
            .header("LNM-ACCESS-TIMESTAMP", &timestamp)
            .header("LNM-ACCESS-SIGNATURE", signature)
            .timeout(self.settings.timeout)
            .send()
            .await
            .map_err(|e| VenueError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, body))
    }

    async fn list(&self, kind: &str) -> Result<Vec<PositionSnapshot>, VenueError> {
        let trades: Vec<WireTrade> = self
            .request(Method::GET, FUTURES_PATH, &[("type", kind)])
            .await?
            .json()
            .await
            .map_err(|e| VenueError::Decode(e.to_string()))?;
        trades.into_iter().map(PositionSnapshot::try_from).collect()
    }

    async fn closed_snapshot(&self, position_id: &str) -> Result<Option<PositionSnapshot>, VenueError> {
        Ok(self
            .list("closed")
            .await?
            .into_iter()
            .find(|p| p.id == position_id))
    }
}

fn map_status(status: StatusCode, body: String) -> VenueError {
    let detail = format!("{}: {}", status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => VenueError::InvalidCredentials(detail),
        s if s.is_server_error() => VenueError::Unreachable(detail),
        // Throttled requests clear on the next cycle
        StatusCode::TOO_MANY_REQUESTS => VenueError::Unreachable(detail),
        _ => VenueError::Rejected(detail),
    }
}

#[async_trait]
impl VenueClient for FuturesClient {
    async fn test_connection(&self) -> Result<(), VenueError> {
        self.request(Method::GET, USER_PATH, &[]).await?;
        Ok(())
    }

    async fn list_open_positions(&self) -> Result<Vec<PositionSnapshot>, VenueError> {
        self.list("running").await
    }

    async fn list_closed_positions(&self) -> Result<Vec<PositionSnapshot>, VenueError> {
        self.list("closed").await
    }

    async fn close_position(&self, position_id: &str) -> Result<PositionSnapshot, VenueError> {
        let response = match self
            .request(Method::DELETE, FUTURES_PATH, &[("id", position_id)])
            .await
        {
            Ok(response) => response,
            Err(VenueError::Rejected(detail)) if detail.starts_with("404") => {
                return Err(VenueError::AlreadyClosed(position_id.to_string()))
            }
            Err(e) => return Err(e),
        };

        tracing::info!("Closed trade {} on {} venue", position_id, self.settings.network);
        let decoded = match response.text().await {
            Ok(body) => serde_json::from_str::<WireTrade>(&body)
                .map_err(|e| VenueError::Decode(e.to_string()))
                .and_then(PositionSnapshot::try_from),
            Err(e) => Err(VenueError::Decode(e.to_string())),
        };

        match decoded {
            Ok(snapshot) => Ok(snapshot),
            // The venue accepted the close; recover the figures from the closed list
            Err(e) => {
                tracing::warn!("Unreadable close response for {}: {}; re-fetching", position_id, e);
                self.closed_snapshot(position_id).await?.ok_or(e)
            }
        }
    }
}

/// Builds a signed client per account, sharing one connection pool
pub struct HttpVenueConnector {
    http: Client,
    settings: VenueSettings,
}

impl HttpVenueConnector {
    pub fn new(settings: VenueSettings) -> Result<Self, VenueError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| VenueError::Unreachable(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http, settings })
    }
}

impl VenueConnector for HttpVenueConnector {
    fn connect(
        &self,
        account: &ActiveAccount,
        credentials: &Credentials,
    ) -> Result<Arc<dyn VenueClient>, VenueError> {
        if credentials.api_key.is_empty() || credentials.api_secret.is_empty() {
            return Err(VenueError::InvalidCredentials(format!(
                "missing key or secret for account {}",
                account.account_id
            )));
        }
        Ok(Arc::new(FuturesClient::new(
            self.http.clone(),
            self.settings.clone(),
            credentials.clone(),
        )))
    }
}
