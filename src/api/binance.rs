use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, RequestBuilder, Response};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

use super::Exchange;
use crate::config::BinanceSettings;
use crate::error::BotError;
use crate::models::{AssetBalance, Candle, ExchangeFilters, OrderFill, Side, SymbolId};
use crate::Result;

const API_KEY_HEADER: &str = "X-MBX-APIKEY";
const REQUEST_TIMEOUT_SECS: u64 = 10;
const MAX_KLINES: u32 = 1000;
/// "Order does not exist."
const UNKNOWN_ORDER: i64 = -2013;

// Type alias for the rate limiter to simplify signatures
type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Binance spot REST client
///
/// Cloneable; all clones share the same HTTP pool and request quota.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    rate_limiter: Arc<BinanceRateLimiter>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    asset: String,
    free: Decimal,
    locked: Decimal,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    client_order_id: String,
    executed_qty: Decimal,
    #[serde(default)]
    cummulative_quote_qty: Option<Decimal>,
    status: String,
    #[serde(default)]
    side: Option<Side>,
    #[serde(default)]
    fills: Vec<RawFill>,
}

#[derive(Debug, Deserialize)]
struct RawFill {
    price: Decimal,
    qty: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListenKeyResponse {
    listen_key: String,
}

impl BinanceClient {
    pub fn new(settings: &BinanceSettings) -> Result<Self> {
        Self::with_base_url(
            settings.rest_url(),
            &settings.api_key,
            &settings.api_secret,
            settings.requests_per_minute,
        )
        .map(|client| client.with_recv_window(settings.recv_window_ms))
    }

    pub fn with_base_url(
        base_url: &str,
        api_key: &str,
        api_secret: &str,
        requests_per_minute: u32,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            recv_window_ms: 5000,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    pub fn with_recv_window(mut self, recv_window_ms: u64) -> Self {
        self.recv_window_ms = recv_window_ms;
        self
    }

    /// Hex HMAC-SHA256 of the query string with the API secret
    fn sign(&self, query: &str) -> String {
        // HMAC accepts keys of any length
        let mut mac = match Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, params: &[(&str, String)]) -> String {
        let mut query = encode(params);
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!(
            "recvWindow={}&timestamp={}",
            self.recv_window_ms,
            Utc::now().timestamp_millis()
        ));
        let signature = self.sign(&query);
        format!("{}&signature={}", query, signature)
    }

    fn request(&self, method: Method, path: &str, query: &str) -> RequestBuilder {
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        self.client.request(method, url)
    }

    /// Rate-limited send; non-2xx bodies become `BotError::Exchange` when they carry a code
    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        self.rate_limiter.until_ready().await;

        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if let Ok(err) = serde_json::from_str::<ApiError>(&body) {
            tracing::warn!(status = %status, code = err.code, "Binance rejected request: {}", err.msg);
            return Err(BotError::Exchange {
                code: err.code,
                msg: err.msg,
            });
        }

        // No structured error body; keep the HTTP status for the retry decision
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(BotError::Exchange {
                code: -1000,
                msg: format!("HTTP {}: {}", status, body),
            });
        }
        Err(BotError::Malformed(format!("HTTP {}: {}", status, body)))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.send(builder).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn encode(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn field_str<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| BotError::Malformed(format!("missing field {}", key)))
}

fn parse_f64(value: &Value) -> Result<f64> {
    match value {
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| BotError::Malformed(format!("not a number: {}", s))),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| BotError::Malformed(format!("not a number: {}", n))),
        other => Err(BotError::Malformed(format!("not a number: {}", other))),
    }
}

/// One kline row: `[openTime, open, high, low, close, volume, ...]`
fn parse_kline(row: &Value) -> Result<Candle> {
    let fields = row
        .as_array()
        .filter(|f| f.len() >= 6)
        .ok_or_else(|| BotError::Malformed(format!("kline row: {}", row)))?;

    let open_ms = fields[0]
        .as_i64()
        .ok_or_else(|| BotError::Malformed("kline open time".to_string()))?;
    let open_time = Utc
        .timestamp_millis_opt(open_ms)
        .single()
        .ok_or_else(|| BotError::Malformed(format!("kline open time {}", open_ms)))?;

    Ok(Candle {
        open_time,
        open: parse_f64(&fields[1])?,
        high: parse_f64(&fields[2])?,
        low: parse_f64(&fields[3])?,
        close: parse_f64(&fields[4])?,
        volume: parse_f64(&fields[5])?,
    })
}

/// LOT_SIZE is mandatory; MIN_NOTIONAL or NOTIONAL is optional
fn parse_filters(info: &SymbolInfo) -> Result<ExchangeFilters> {
    let mut lot_size = None;
    let mut min_notional = None;

    for filter in &info.filters {
        match filter.get("filterType").and_then(Value::as_str) {
            Some("LOT_SIZE") => {
                lot_size = Some((
                    Decimal::from_str(field_str(filter, "stepSize")?)?,
                    Decimal::from_str(field_str(filter, "minQty")?)?,
                    Decimal::from_str(field_str(filter, "maxQty")?)?,
                ));
            }
            Some("MIN_NOTIONAL") | Some("NOTIONAL") => {
                if let Ok(raw) = field_str(filter, "minNotional") {
                    min_notional = Some(Decimal::from_str(raw)?);
                }
            }
            _ => {}
        }
    }

    let (step_size, min_qty, max_qty) = lot_size
        .ok_or_else(|| BotError::DataUnavailable(format!("no LOT_SIZE filter for {}", info.symbol)))?;

    Ok(ExchangeFilters {
        step_size,
        min_qty,
        max_qty,
        min_notional,
    })
}

fn average_price(order: &OrderResponse) -> Option<Decimal> {
    if order.executed_qty.is_zero() {
        return None;
    }
    if let Some(quote) = order.cummulative_quote_qty {
        return Some(quote / order.executed_qty);
    }

    let qty: Decimal = order.fills.iter().map(|f| f.qty).sum();
    if qty.is_zero() {
        return None;
    }
    let notional: Decimal = order.fills.iter().map(|f| f.price * f.qty).sum();
    Some(notional / qty)
}

fn to_fill(symbol: &SymbolId, side: Side, order: OrderResponse) -> OrderFill {
    OrderFill {
        symbol: symbol.clone(),
        side,
        order_id: order.order_id,
        avg_price: average_price(&order),
        client_order_id: order.client_order_id,
        executed_qty: order.executed_qty,
        status: order.status,
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    async fn klines(&self, symbol: &SymbolId, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let query = encode(&[
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.clamp(1, MAX_KLINES).to_string()),
        ]);
        let rows: Vec<Value> = self
            .get_json(self.request(Method::GET, "/api/v3/klines", &query))
            .await?;

        let candles = rows.iter().map(parse_kline).collect::<Result<Vec<_>>>()?;
        tracing::debug!(symbol = %symbol, interval, count = candles.len(), "Fetched klines");
        Ok(candles)
    }

    async fn balances(&self) -> Result<Vec<AssetBalance>> {
        let query = self.signed_query(&[]);
        let account: AccountResponse = self
            .get_json(
                self.request(Method::GET, "/api/v3/account", &query)
                    .header(API_KEY_HEADER, &self.api_key),
            )
            .await?;

        Ok(account
            .balances
            .into_iter()
            .map(|b| AssetBalance {
                asset: b.asset,
                free: b.free,
                locked: b.locked,
            })
            .collect())
    }

    async fn filters(&self, symbol: &SymbolId) -> Result<ExchangeFilters> {
        let query = encode(&[("symbol", symbol.to_string())]);
        let info: ExchangeInfo = self
            .get_json(self.request(Method::GET, "/api/v3/exchangeInfo", &query))
            .await?;

        let entry = info
            .symbols
            .iter()
            .find(|s| s.symbol == symbol.as_str())
            .ok_or_else(|| BotError::DataUnavailable(format!("no exchange info for {}", symbol)))?;
        parse_filters(entry)
    }

    async fn market_order(
        &self,
        symbol: &SymbolId,
        side: Side,
        quantity: Decimal,
        client_order_id: &str,
    ) -> Result<OrderFill> {
        let query = self.signed_query(&[
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", crate::execution::format_quantity(quantity)),
            ("newClientOrderId", client_order_id.to_string()),
            ("newOrderRespType", "FULL".to_string()),
        ]);

        let order: OrderResponse = self
            .get_json(
                self.request(Method::POST, "/api/v3/order", &query)
                    .header(API_KEY_HEADER, &self.api_key),
            )
            .await?;

        tracing::info!(
            symbol = %symbol,
            side = %side,
            order_id = order.order_id,
            client_order_id,
            status = %order.status,
            "📝 Market order accepted"
        );
        Ok(to_fill(symbol, side, order))
    }

    async fn find_order(&self, symbol: &SymbolId, client_order_id: &str) -> Result<Option<OrderFill>> {
        let query = self.signed_query(&[
            ("symbol", symbol.to_string()),
            ("origClientOrderId", client_order_id.to_string()),
        ]);

        let result: Result<OrderResponse> = self
            .get_json(
                self.request(Method::GET, "/api/v3/order", &query)
                    .header(API_KEY_HEADER, &self.api_key),
            )
            .await;

        match result {
            Ok(order) => {
                let side = order
                    .side
                    .ok_or_else(|| BotError::Malformed(format!("order {} has no side", order.order_id)))?;
                Ok(Some(to_fill(symbol, side, order)))
            }
            Err(BotError::Exchange { code: UNKNOWN_ORDER, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_listen_key(&self) -> Result<String> {
        let response: ListenKeyResponse = self
            .get_json(
                self.request(Method::POST, "/api/v3/userDataStream", "")
                    .header(API_KEY_HEADER, &self.api_key),
            )
            .await?;
        Ok(response.listen_key)
    }

    async fn keepalive_listen_key(&self, listen_key: &str) -> Result<()> {
        let query = encode(&[("listenKey", listen_key.to_string())]);
        self.send(
            self.request(Method::PUT, "/api/v3/userDataStream", &query)
                .header(API_KEY_HEADER, &self.api_key),
        )
        .await?;
        Ok(())
    }
}
