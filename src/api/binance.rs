use crate::api::precision::{floor_to_step, format_to_step, round_to_tick, to_decimal, to_f64};
use crate::error::BotError;
use crate::models::{BracketKind, BracketLeg, Candle, OrderType, Side, SymbolFilters};
use crate::settings::{Credentials, ExchangeSettings};
use crate::Result;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

type HmacSha256 = Hmac<Sha256>;

/// Sentinel stored in the offset cell until the first successful sync
const NOT_SYNCED: i64 = i64::MIN;

/// Client for the Binance USDⓈ-M futures REST API
///
/// Public market-data calls work right away. Signed calls (account, leverage,
/// orders) are refused with `BotError::ClockSync` until `sync_clock` has
/// succeeded, so an unsynchronized clock can never produce an order.
///
/// Cloning is cheap; clones share the HTTP pool and the clock offset.
#[derive(Clone)]
pub struct BinanceFuturesClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    clock_offset_ms: Arc<AtomicI64>,
    leverage_floor: u32,
    leverage_retry_budget: u32,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTime {
    server_time: i64,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    #[serde(default)]
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    filters: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerRaw {
    symbol: String,
    last_price: String,
    quote_volume: String,
    price_change_percent: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrderRaw {
    order_id: i64,
    symbol: String,
    #[serde(rename = "type", default)]
    order_type: String,
}

// ============== Public Types ==============

/// 24h rolling statistics for one instrument
#[derive(Debug, Clone, PartialEq)]
pub struct Ticker24h {
    pub symbol: String,
    pub last_price: f64,
    pub quote_volume: f64,
    pub price_change_pct: f64,
}

/// Order still resting on the book
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    pub order_id: i64,
    pub symbol: String,
    pub order_type: String,
}

/// Venue answer to an order submission.
///
/// `order_id` is `None` when the venue did not acknowledge the order; the
/// raw payload is kept so callers can log the rejection.
#[derive(Debug, Clone)]
pub struct OrderResponse {
    pub order_id: Option<i64>,
    pub raw: Value,
}

impl OrderResponse {
    fn from_value(raw: Value) -> Self {
        let order_id = raw.get("orderId").and_then(Value::as_i64);
        Self { order_id, raw }
    }

    pub fn is_acknowledged(&self) -> bool {
        self.order_id.is_some()
    }
}

struct OrderRequest<'a> {
    symbol: &'a str,
    side: Side,
    order_type: OrderType,
    quantity: String,
    price: Option<String>,
    stop_price: Option<String>,
    reduce_only: bool,
}

/// Extract a venue error payload (`{"code": -XXXX, "msg": ".."}`) if present
pub fn venue_error(payload: &Value) -> Option<BotError> {
    let code = payload.get("code").and_then(Value::as_i64)?;
    if code >= 0 {
        return None;
    }
    let msg = payload
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or("unknown venue error")
        .to_string();
    Some(BotError::VenueRejection { code, msg })
}

fn parse_f64(raw: &Value) -> Option<f64> {
    match raw {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Filter values arrive as decimal strings; keep them exact
fn parse_decimal(raw: &Value) -> Option<Decimal> {
    match raw {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

// ============== Implementation ==============

impl BinanceFuturesClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            clock_offset_ms: Arc::new(AtomicI64::new(NOT_SYNCED)),
            leverage_floor: 5,
            leverage_retry_budget: 4,
        })
    }

    pub fn from_settings(settings: &ExchangeSettings, credentials: &Credentials) -> Result<Self> {
        let mut client = Self::new(
            settings.base_url.clone(),
            credentials.binance_api_key.clone(),
            credentials.binance_api_secret.clone(),
            Duration::from_secs(settings.request_timeout_secs),
        )?;
        client.leverage_floor = settings.leverage_floor;
        client.leverage_retry_budget = settings.leverage_retry_budget.max(1);
        Ok(client)
    }

    // ---------- clock ----------

    /// Fetch venue time and store the local-to-server offset
    ///
    /// Endpoint: GET /fapi/v1/time
    pub async fn sync_clock(&self) -> Result<i64> {
        let url = format!("{}/fapi/v1/time", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BotError::ClockSync(format!("server time unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(BotError::ClockSync(format!(
                "server time request failed: {}",
                response.status()
            )));
        }

        let server: ServerTime = response
            .json()
            .await
            .map_err(|e| BotError::ClockSync(format!("bad server time payload: {}", e)))?;

        let offset = server.server_time - Utc::now().timestamp_millis();
        self.clock_offset_ms.store(offset, Ordering::SeqCst);
        tracing::info!("Time synced. Difference: {} ms", offset);

        Ok(offset)
    }

    /// `sync_clock` with a fixed attempt budget and linear backoff
    pub async fn sync_clock_with_retry(&self, attempts: u32, backoff: Duration) -> Result<i64> {
        let attempts = attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.sync_clock().await {
                Ok(offset) => return Ok(offset),
                Err(e) => {
                    tracing::warn!("Clock sync attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        sleep(backoff * attempt).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BotError::ClockSync("no attempts made".into())))
    }

    pub fn is_clock_synced(&self) -> bool {
        self.clock_offset_ms.load(Ordering::SeqCst) != NOT_SYNCED
    }

    /// Server-skewed timestamp in milliseconds
    fn timestamp(&self) -> Result<i64> {
        let offset = self.clock_offset_ms.load(Ordering::SeqCst);
        if offset == NOT_SYNCED {
            return Err(BotError::ClockSync(
                "refusing signed request before clock sync".into(),
            ));
        }
        Ok(Utc::now().timestamp_millis() + offset)
    }

    // ---------- transport ----------

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Canonical query: keys sorted, `timestamp` included, signature last
    fn signed_query(&self, params: &[(&str, String)]) -> Result<String> {
        let mut sorted: BTreeMap<&str, String> = params
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        sorted.insert("timestamp", self.timestamp()?.to_string());

        let query = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let signature = self.sign(&query);

        Ok(format!("{}&signature={}", query, signature))
    }

    /// Issue an authenticated request.
    ///
    /// Non-2xx answers are not errors here: the venue payload is returned so
    /// the caller can inspect `code`/`msg`. Only transport failures and
    /// non-JSON bodies become `Err`.
    pub async fn signed_request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value> {
        let query = self.signed_query(params)?;
        let url = format!("{}{}?{}", self.base_url, path, query);

        let response = self
            .client
            .request(method.clone(), &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::debug!("{} {} returned {}: {}", method, path, status, body);
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn public_get(&self, path: &str, query: &str) -> Result<Value> {
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let value: Value = serde_json::from_str(&body)?;
        if !status.is_success() {
            return Err(venue_error(&value).unwrap_or(BotError::VenueRejection {
                code: status.as_u16() as i64,
                msg: body,
            }));
        }
        Ok(value)
    }

    // ---------- account ----------

    /// Available quote balance; 0 when the venue omits the field
    ///
    /// Endpoint: GET /fapi/v2/account
    pub async fn get_balance(&self) -> Result<f64> {
        let account = self
            .signed_request(Method::GET, "/fapi/v2/account", &[])
            .await?;

        match account.get("availableBalance").and_then(parse_f64) {
            Some(balance) => Ok(balance),
            None => {
                if let Some(err) = venue_error(&account) {
                    tracing::warn!("Balance query rejected: {}", err);
                }
                Ok(0.0)
            }
        }
    }

    /// Check that the credentials work; returns total wallet balance
    pub async fn verify_account(&self) -> Result<f64> {
        let account = self
            .signed_request(Method::GET, "/fapi/v2/account", &[])
            .await?;

        account
            .get("totalWalletBalance")
            .and_then(parse_f64)
            .ok_or_else(|| {
                venue_error(&account).unwrap_or(BotError::VenueRejection {
                    code: 0,
                    msg: format!("unexpected account payload: {}", account),
                })
            })
    }

    /// Set leverage, halving on rejection until the floor is reached.
    ///
    /// Returns the leverage the venue accepted, or `None` when every attempt
    /// was rejected; the caller proceeds with whatever the venue holds.
    ///
    /// Endpoint: POST /fapi/v1/leverage
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<Option<u32>> {
        let mut current = leverage.max(1);

        for _ in 0..self.leverage_retry_budget {
            let result = self
                .signed_request(
                    Method::POST,
                    "/fapi/v1/leverage",
                    &[("symbol", symbol.to_string()), ("leverage", current.to_string())],
                )
                .await?;

            match venue_error(&result) {
                None => {
                    tracing::debug!("Leverage for {} set to {}x", symbol, current);
                    return Ok(Some(current));
                }
                Some(err) => {
                    tracing::warn!("Leverage {}x rejected for {}: {}", current, symbol, err);
                    if current <= self.leverage_floor {
                        break;
                    }
                    current = (current / 2).max(self.leverage_floor);
                }
            }
        }

        Ok(None)
    }

    // ---------- metadata ----------

    /// Trading filters for one symbol; empty when the symbol is unknown
    ///
    /// Endpoint: GET /fapi/v1/exchangeInfo
    pub async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        let raw = self.public_get("/fapi/v1/exchangeInfo", "").await?;
        let info: ExchangeInfo = serde_json::from_value(raw)?;

        let Some(entry) = info.symbols.into_iter().find(|s| s.symbol == symbol) else {
            return Ok(SymbolFilters::default());
        };

        let mut filters = SymbolFilters::default();
        for f in &entry.filters {
            match f.get("filterType").and_then(Value::as_str) {
                Some("PRICE_FILTER") => {
                    filters.tick_size = f.get("tickSize").and_then(parse_decimal);
                }
                Some("LOT_SIZE") => {
                    filters.step_size = f.get("stepSize").and_then(parse_decimal);
                    filters.min_qty = f.get("minQty").and_then(parse_decimal);
                }
                Some("MIN_NOTIONAL") => {
                    filters.min_notional = f.get("notional").and_then(parse_decimal);
                }
                _ => {}
            }
        }

        Ok(filters)
    }

    /// Endpoint: GET /fapi/v1/ticker/24hr
    pub async fn get_tickers_24h(&self) -> Result<Vec<Ticker24h>> {
        let raw = self.public_get("/fapi/v1/ticker/24hr", "").await?;
        let tickers: Vec<TickerRaw> = serde_json::from_value(raw)?;

        Ok(tickers
            .into_iter()
            .filter_map(|t| {
                Some(Ticker24h {
                    last_price: t.last_price.parse().ok()?,
                    quote_volume: t.quote_volume.parse().ok()?,
                    price_change_pct: t.price_change_percent.parse().ok()?,
                    symbol: t.symbol,
                })
            })
            .collect())
    }

    /// Endpoint: GET /fapi/v1/klines
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let query = format!("symbol={}&interval={}&limit={}", symbol, interval, limit);
        let raw = self.public_get("/fapi/v1/klines", &query).await?;
        let rows: Vec<Vec<Value>> = serde_json::from_value(raw)?;

        let candles = rows
            .iter()
            .filter_map(|k| {
                let open_time = Utc.timestamp_millis_opt(k.first()?.as_i64()?).single()?;
                Some(Candle {
                    open_time,
                    open: parse_f64(k.get(1)?)?,
                    high: parse_f64(k.get(2)?)?,
                    low: parse_f64(k.get(3)?)?,
                    close: parse_f64(k.get(4)?)?,
                    volume: parse_f64(k.get(5)?)?,
                })
            })
            .collect();

        Ok(candles)
    }

    // ---------- orders ----------

    async fn submit_order(&self, order: OrderRequest<'_>) -> Result<OrderResponse> {
        let mut params = vec![
            ("symbol", order.symbol.to_string()),
            ("side", order.side.as_str().to_string()),
            ("type", order.order_type.as_str().to_string()),
            ("quantity", order.quantity),
            ("positionSide", "BOTH".to_string()),
        ];
        if let Some(price) = order.price {
            params.push(("price", price));
            params.push(("timeInForce", "GTC".to_string()));
        }
        if let Some(stop_price) = order.stop_price {
            params.push(("stopPrice", stop_price));
        }
        if order.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }

        let raw = self
            .signed_request(Method::POST, "/fapi/v1/order", &params)
            .await?;
        Ok(OrderResponse::from_value(raw))
    }

    /// Place an order after quantizing it to the symbol's filters.
    ///
    /// Quantity is floored to the step size and raised to the minimum
    /// quantity. LIMIT prices are rounded to the tick size.
    ///
    /// Endpoint: POST /fapi/v1/order
    pub async fn place_order(
        &self,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
    ) -> Result<OrderResponse> {
        self.timestamp()?;

        let filters = self.get_symbol_filters(symbol).await?;
        let step = filters.step_size_or_default();
        let tick = filters.tick_size_or_default();

        let qty = floor_to_step(to_decimal(quantity), step).max(filters.min_qty_or_default());
        let price = match (order_type, price) {
            (OrderType::Limit, Some(p)) => {
                Some(format_to_step(round_to_tick(to_decimal(p), tick), tick))
            }
            _ => None,
        };

        self.submit_order(OrderRequest {
            symbol,
            side,
            order_type,
            quantity: format_to_step(qty, step),
            price,
            stop_price: None,
            reduce_only: false,
        })
        .await
    }

    /// Reduce-only market order closing `quantity` of a position
    pub async fn close_position_market(
        &self,
        symbol: &str,
        position_side: Side,
        quantity: f64,
    ) -> Result<OrderResponse> {
        self.timestamp()?;

        let filters = self.get_symbol_filters(symbol).await?;
        let step = filters.step_size_or_default();

        self.submit_order(OrderRequest {
            symbol,
            side: position_side.opposite(),
            order_type: OrderType::Market,
            quantity: format_to_step(floor_to_step(to_decimal(quantity), step), step),
            price: None,
            stop_price: None,
            reduce_only: true,
        })
        .await
    }

    /// Attach a take-profit and a stop-loss to a position opened on `side`.
    ///
    /// Both legs are reduce-only triggers on the opposite side. Each leg is
    /// submitted independently: the returned list holds only the legs the
    /// venue acknowledged, which may be fewer than two.
    pub async fn place_bracket(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        tp_price: f64,
        sl_price: f64,
    ) -> Result<Vec<BracketLeg>> {
        self.timestamp()?;

        let filters = self.get_symbol_filters(symbol).await?;
        let step = filters.step_size_or_default();
        let tick = filters.tick_size_or_default();
        let qty = format_to_step(floor_to_step(to_decimal(quantity), step), step);
        let exit_side = side.opposite();

        let plan = [
            (
                BracketKind::TakeProfit,
                OrderType::TakeProfitMarket,
                round_to_tick(to_decimal(tp_price), tick),
            ),
            (
                BracketKind::StopLoss,
                OrderType::StopMarket,
                round_to_tick(to_decimal(sl_price), tick),
            ),
        ];

        let mut legs = Vec::with_capacity(plan.len());
        for (kind, order_type, trigger) in plan {
            let result = self
                .submit_order(OrderRequest {
                    symbol,
                    side: exit_side,
                    order_type,
                    quantity: qty.clone(),
                    price: None,
                    stop_price: Some(format_to_step(trigger, tick)),
                    reduce_only: true,
                })
                .await;

            match result {
                Ok(OrderResponse { order_id: Some(order_id), .. }) => {
                    tracing::info!("✅ {:?} order placed @ ${} (id {})", kind, trigger, order_id);
                    legs.push(BracketLeg {
                        kind,
                        order_id,
                        trigger_price: to_f64(trigger),
                    });
                }
                Ok(OrderResponse { raw, .. }) => {
                    tracing::warn!("⚠️ {:?} order for {} not acknowledged: {}", kind, symbol, raw);
                }
                Err(e) => {
                    tracing::warn!("⚠️ {:?} order for {} failed: {}", kind, symbol, e);
                }
            }
        }

        Ok(legs)
    }

    /// All open orders across every symbol
    ///
    /// Endpoint: GET /fapi/v1/openOrders
    pub async fn get_open_orders(&self) -> Result<Vec<OpenOrder>> {
        let raw = self
            .signed_request(Method::GET, "/fapi/v1/openOrders", &[])
            .await?;

        if !raw.is_array() {
            return Err(venue_error(&raw).unwrap_or_else(|| {
                BotError::validation(format!("open orders payload is not a list: {}", raw))
            }));
        }

        let orders: Vec<OpenOrderRaw> = serde_json::from_value(raw)?;
        Ok(orders
            .into_iter()
            .map(|o| OpenOrder {
                order_id: o.order_id,
                symbol: o.symbol,
                order_type: o.order_type,
            })
            .collect())
    }

    /// Endpoint: DELETE /fapi/v1/allOpenOrders
    pub async fn cancel_all_orders(&self, symbol: &str) -> Result<()> {
        let result = self
            .signed_request(
                Method::DELETE,
                "/fapi/v1/allOpenOrders",
                &[("symbol", symbol.to_string())],
            )
            .await?;

        match venue_error(&result) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
