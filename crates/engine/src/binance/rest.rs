use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

use common::{
    BinanceEnv, Candle, Error, ExchangeClient, Fill, MarketDataClient, Order, Result,
};

/// Klines are always read from mainnet; the testnet does not serve them.
const MARKET_DATA_URL: &str = "https://api.binance.com";
const MAINNET_URL: &str = "https://api.binance.com";
const TESTNET_URL: &str = "https://testnet.binance.vision";

/// REST API client for Binance Spot: public klines plus signed market orders.
///
/// Built without credentials it can only serve market data, which is all a
/// dry run needs.
pub struct BinanceClient {
    credentials: Option<Credentials>,
    trade_url: &'static str,
    http: Client,
}

struct Credentials {
    api_key: String,
    secret: String,
}

impl BinanceClient {
    /// Client that places orders on `env`.
    pub fn new(env: BinanceEnv, api_key: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let trade_url = match env {
            BinanceEnv::SpotMainnet => MAINNET_URL,
            BinanceEnv::SpotTestnet => TESTNET_URL,
        };
        info!(market_data = MARKET_DATA_URL, execution = trade_url, "BinanceClient initialized");
        Ok(Self {
            credentials: Some(Credentials {
                api_key: api_key.into(),
                secret: secret.into(),
            }),
            trade_url,
            http: build_http()?,
        })
    }

    /// Market-data-only client. Order submission fails with a config error.
    pub fn market_data_only() -> Result<Self> {
        info!(market_data = MARKET_DATA_URL, "BinanceClient initialized without credentials");
        Ok(Self {
            credentials: None,
            trade_url: MAINNET_URL,
            http: build_http()?,
        })
    }

    fn credentials(&self) -> Result<&Credentials> {
        self.credentials.as_ref().ok_or_else(|| {
            Error::Config("Binance API credentials are required to place orders".into())
        })
    }

    fn sign(secret: &str, query: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(secret: &str, params: &str) -> String {
        let ts = Utc::now().timestamp_millis();
        let query = if params.is_empty() {
            format!("timestamp={ts}")
        } else {
            format!("{params}&timestamp={ts}")
        };
        let signature = Self::sign(secret, &query);
        format!("{query}&signature={signature}")
    }

    async fn signed_get(&self, path: &str, params: &str) -> Result<String> {
        let creds = self.credentials()?;
        let url = format!(
            "{}{path}?{}",
            self.trade_url,
            Self::signed_query(&creds.secret, params)
        );

        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }

    async fn signed_post(&self, path: &str, params: &str) -> Result<String> {
        let creds = self.credentials()?;
        let body = Self::signed_query(&creds.secret, params);
        let url = format!("{}{path}", self.trade_url);

        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {text}")));
        }
        Ok(text)
    }

    /// Free balance of `asset` on the execution account.
    pub async fn free_balance(&self, asset: &str) -> Result<f64> {
        let body = self.signed_get("/api/v3/account", "").await?;
        let account: AccountResponse =
            serde_json::from_str(&body).map_err(|e| Error::Exchange(e.to_string()))?;

        Ok(account
            .balances
            .iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .and_then(|b| b.free.parse::<f64>().ok())
            .unwrap_or(0.0))
    }
}

fn build_http() -> Result<Client> {
    Client::builder()
        .use_rustls_tls()
        .build()
        .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))
}

#[async_trait]
impl MarketDataClient for BinanceClient {
    async fn fetch_closed_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        // One extra row: the last kline Binance returns is usually still forming.
        let url = format!(
            "{MARKET_DATA_URL}/api/v3/klines?symbol={symbol}&interval={interval}&limit={}",
            limit + 1
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::MarketData(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::MarketData(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::MarketData(format!("HTTP {status}: {body}")));
        }

        let candles = parse_klines(&body)?;
        let candles = closed_only(candles, Utc::now(), limit);
        debug!(symbol, interval, count = candles.len(), "Fetched closed klines");
        Ok(candles)
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn submit_order(&self, order: &Order) -> Result<Fill> {
        let params = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&newClientOrderId={}&newOrderRespType=FULL",
            order.pair, order.side, order.quantity, order.id
        );

        debug!(pair = %order.pair, side = %order.side, qty = order.quantity, "Submitting order to Binance");
        let body = self.signed_post("/api/v3/order", &params).await?;
        parse_order_fill(&body, order)
    }
}

// ─── Response parsing ─────────────────────────────────────────────────────────

/// Binance kline row:
/// `[open_time, open, high, low, close, volume, close_time, quote_volume,
///   trades, taker_base, taker_quote, ignore]`
type RawKline = (
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
);

/// Parse a `/api/v3/klines` body into candles, oldest first.
pub fn parse_klines(body: &str) -> Result<Vec<Candle>> {
    let rows: Vec<RawKline> =
        serde_json::from_str(body).map_err(|e| Error::MarketData(format!("bad kline payload: {e}")))?;

    rows.into_iter()
        .map(|(open_ms, open, high, low, close, volume, close_ms, ..)| {
            Ok(Candle {
                open_time: millis(open_ms)?,
                close_time: millis(close_ms)?,
                open: price_field("open", &open)?,
                high: price_field("high", &high)?,
                low: price_field("low", &low)?,
                close: price_field("close", &close)?,
                volume: price_field("volume", &volume)?,
            })
        })
        .collect()
}

/// Drop bars that have not closed yet and keep at most `limit` of the rest.
pub fn closed_only(mut candles: Vec<Candle>, now: DateTime<Utc>, limit: usize) -> Vec<Candle> {
    candles.retain(|c| c.close_time < now);
    if candles.len() > limit {
        candles.drain(..candles.len() - limit);
    }
    candles
}

fn millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::MarketData(format!("invalid kline timestamp {ms}")))
}

fn price_field(name: &str, raw: &str) -> Result<f64> {
    let value: f64 = raw
        .parse()
        .map_err(|_| Error::MarketData(format!("kline {name} is not numeric: '{raw}'")))?;
    if !value.is_finite() || value < 0.0 {
        return Err(Error::MarketData(format!("kline {name} out of range: {value}")));
    }
    Ok(value)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    client_order_id: String,
    transact_time: Option<i64>,
    #[serde(default)]
    fills: Vec<FillDetail>,
}

#[derive(Deserialize)]
struct FillDetail {
    price: String,
    qty: String,
}

/// Aggregate the per-trade fills of a FULL order response.
///
/// An order that reports no fills, or fills summing to zero quantity, is a
/// failure: the caller cannot know whether a position exists.
pub fn parse_order_fill(body: &str, order: &Order) -> Result<Fill> {
    let resp: OrderResponse =
        serde_json::from_str(body).map_err(|e| Error::Exchange(e.to_string()))?;

    if resp.fills.is_empty() {
        return Err(Error::OrderFailed(format!(
            "{} {} executed but no fills returned",
            order.side, order.pair
        )));
    }

    let mut executed_qty = 0.0;
    let mut notional = 0.0;
    for f in &resp.fills {
        let price: f64 = f
            .price
            .parse()
            .map_err(|_| Error::Exchange(format!("fill price is not numeric: '{}'", f.price)))?;
        let qty: f64 = f
            .qty
            .parse()
            .map_err(|_| Error::Exchange(format!("fill qty is not numeric: '{}'", f.qty)))?;
        executed_qty += qty;
        notional += price * qty;
    }

    if executed_qty <= 0.0 {
        return Err(Error::OrderFailed(format!(
            "{} {} reported zero executed quantity",
            order.side, order.pair
        )));
    }

    let timestamp = match resp.transact_time {
        Some(ms) => Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now),
        None => {
            warn!(order_id = %resp.client_order_id, "Order response missing transactTime");
            Utc::now()
        }
    };

    Ok(Fill {
        order_id: resp.client_order_id,
        pair: order.pair.clone(),
        side: order.side,
        fill_price: notional / executed_qty,
        quantity: executed_qty,
        timestamp,
    })
}

#[derive(Deserialize)]
struct AccountResponse {
    balances: Vec<Balance>,
}

#[derive(Deserialize)]
struct Balance {
    asset: String,
    free: String,
}
