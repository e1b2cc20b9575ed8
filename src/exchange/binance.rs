//! Binance spot REST client.

use super::rest::RestClient;
use super::{
    decimal, decimal_to_json, iso8601, number, param_pairs, split_symbol, Capability, Exchange,
    ExchangeClass, ExchangeConfig, OhlcvRequest, OrderRequest,
};
use crate::error::{ExchangeError, ExchangeResult};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Method, RequestBuilder, StatusCode};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};
use url::form_urlencoded;

type HmacSha256 = Hmac<Sha256>;

const API_URL: &str = "https://api.binance.com";
const TEST_URL: &str = "https://testnet.binance.vision";
const RATE_LIMIT: Duration = Duration::from_millis(50);
const DEFAULT_RECV_WINDOW: u64 = 5000;

const PRICED_TYPES: [&str; 4] = ["LIMIT", "LIMIT_MAKER", "STOP_LOSS_LIMIT", "TAKE_PROFIT_LIMIT"];
const TIME_IN_FORCE_TYPES: [&str; 3] = ["LIMIT", "STOP_LOSS_LIMIT", "TAKE_PROFIT_LIMIT"];

const TIMEFRAMES: [&str; 16] = [
    "1s", "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w",
    "1M",
];

pub struct BinanceClass;

impl ExchangeClass for BinanceClass {
    fn id(&self) -> &'static str {
        "binance"
    }

    fn has_sandbox_toggle(&self) -> bool {
        true
    }

    fn test_url(&self) -> Option<&str> {
        Some(TEST_URL)
    }

    fn option_keys(&self) -> &[&'static str] {
        &["recvWindow"]
    }

    fn build(&self, config: ExchangeConfig) -> ExchangeResult<Box<dyn Exchange>> {
        Ok(Box::new(BinanceClient::new(config)?))
    }
}

pub struct BinanceClient {
    rest: RestClient,
    api_key: Option<String>,
    secret: Option<String>,
    recv_window: u64,
    api_url: String,
    sandbox: bool,
}

impl BinanceClient {
    pub fn new(config: ExchangeConfig) -> ExchangeResult<Self> {
        let api_url = config.api_url().unwrap_or(API_URL).to_string();
        let recv_window = config
            .options
            .get("recvWindow")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_RECV_WINDOW);
        let rest = RestClient::new("binance", &api_url, RATE_LIMIT, config.enable_rate_limit)?;

        Ok(Self {
            rest,
            api_key: config.api_key,
            secret: config.secret,
            recv_window,
            api_url,
            sandbox: false,
        })
    }

    async fn public(&self, path: &str, params: &[(String, String)]) -> ExchangeResult<Value> {
        let query = encode(params);
        let url = self.rest.endpoint(path, Some(query.as_str()))?;
        let request = self.rest.request(Method::GET, url)?;
        self.execute(request).await
    }

    async fn signed(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> ExchangeResult<Value> {
        let (api_key, secret) = match (&self.api_key, &self.secret) {
            (Some(key), Some(secret)) => (key, secret),
            _ => {
                return Err(ExchangeError::Authentication(
                    "binance requires apiKey and secret for private endpoints".into(),
                ))
            }
        };

        params.push(("recvWindow".into(), self.recv_window.to_string()));
        params.push(("timestamp".into(), Utc::now().timestamp_millis().to_string()));
        let query = encode(&params);
        let signature = sign(secret, &query)?;
        let query = format!("{}&signature={}", query, signature);

        let url = self.rest.endpoint(path, Some(query.as_str()))?;
        let request = self
            .rest
            .request(method, url)?
            .header("X-MBX-APIKEY", api_key.as_str());
        self.execute(request).await
    }

    async fn execute(&self, request: RequestBuilder) -> ExchangeResult<Value> {
        let (status, body) = self.rest.send(request).await?;
        if !status.is_success() {
            return Err(parse_error(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait::async_trait]
impl Exchange for BinanceClient {
    fn id(&self) -> &str {
        "binance"
    }

    fn has(&self, capability: Capability) -> bool {
        matches!(
            capability,
            Capability::FetchTicker
                | Capability::CreateOrder
                | Capability::FetchBalance
                | Capability::FetchOhlcv
        )
    }

    fn set_sandbox_mode(&mut self, enabled: bool) {
        let url = if enabled { TEST_URL } else { self.api_url.as_str() };
        match self.rest.set_base_url(url) {
            Ok(()) => self.sandbox = enabled,
            Err(e) => warn!("Failed to switch binance sandbox mode: {}", e),
        }
    }

    fn describe(&self) -> Value {
        let has: Map<String, Value> = Capability::ALL
            .iter()
            .map(|c| (c.as_str().to_string(), Value::Bool(self.has(*c))))
            .collect();
        let timeframes: Map<String, Value> = TIMEFRAMES
            .iter()
            .map(|tf| (tf.to_string(), Value::String(tf.to_string())))
            .collect();

        json!({
            "id": "binance",
            "name": "Binance",
            "countries": ["JP", "MT"],
            "version": "v3",
            "rateLimit": RATE_LIMIT.as_millis() as u64,
            "sandbox": self.sandbox,
            "urls": {
                "api": self.rest.base_url().as_str(),
                "test": TEST_URL,
                "www": "https://www.binance.com",
                "doc": "https://developers.binance.com/docs/binance-spot-api-docs",
            },
            "has": has,
            "timeframes": timeframes,
            "requiredCredentials": { "apiKey": true, "secret": true },
        })
    }

    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<Value> {
        let params = vec![("symbol".to_string(), market_id(symbol)?)];
        let raw = self.public("/api/v3/ticker/24hr", &params).await?;
        Ok(parse_ticker(symbol, &raw))
    }

    async fn create_order(&self, order: &OrderRequest) -> ExchangeResult<Value> {
        let params = order_params(order)?;
        debug!(symbol = %order.symbol, side = %order.side, "Submitting binance order");
        let raw = self.signed(Method::POST, "/api/v3/order", params).await?;
        Ok(parse_order(&order.symbol, &raw))
    }

    async fn fetch_balance(&self, params: &Map<String, Value>) -> ExchangeResult<Value> {
        let raw = self
            .signed(Method::GET, "/api/v3/account", param_pairs(params))
            .await?;
        Ok(parse_balance(&raw))
    }

    async fn fetch_ohlcv(&self, request: &OhlcvRequest) -> ExchangeResult<Value> {
        if !TIMEFRAMES.contains(&request.timeframe.as_str()) {
            return Err(ExchangeError::NotSupported(format!(
                "binance does not support timeframe '{}'",
                request.timeframe
            )));
        }

        let mut params = vec![
            ("symbol".to_string(), market_id(&request.symbol)?),
            ("interval".to_string(), request.timeframe.clone()),
        ];
        if let Some(since) = request.since {
            params.push(("startTime".into(), since.to_string()));
        }
        if let Some(limit) = request.limit {
            params.push(("limit".into(), limit.to_string()));
        }
        params.extend(param_pairs(&request.params));

        let raw = self.public("/api/v3/klines", &params).await?;
        parse_ohlcv(&raw)
    }

    async fn close(&mut self) -> ExchangeResult<()> {
        self.rest.close();
        Ok(())
    }
}

fn market_id(symbol: &str) -> ExchangeResult<String> {
    let (base, quote) = split_symbol(symbol)?;
    Ok(format!("{}{}", base, quote).to_uppercase())
}

fn encode(params: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish()
}

fn sign(secret: &str, payload: &str) -> ExchangeResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Other(format!("invalid secret: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn format_quantity(value: f64, field: &str) -> ExchangeResult<String> {
    Decimal::from_f64(value)
        .filter(|d| d.is_sign_positive() && !d.is_zero())
        .map(|d| d.normalize().to_string())
        .ok_or_else(|| ExchangeError::InvalidOrder(format!("{} must be a positive number", field)))
}

fn order_params(order: &OrderRequest) -> ExchangeResult<Vec<(String, String)>> {
    let order_type = order.order_type.to_uppercase();
    let side = order.side.to_uppercase();
    if side != "BUY" && side != "SELL" {
        return Err(ExchangeError::InvalidOrder(format!(
            "side must be 'buy' or 'sell', got '{}'",
            order.side
        )));
    }

    let mut params = vec![
        ("symbol".to_string(), market_id(&order.symbol)?),
        ("side".to_string(), side),
        ("type".to_string(), order_type.clone()),
        ("quantity".to_string(), format_quantity(order.amount, "amount")?),
        ("newOrderRespType".to_string(), "FULL".to_string()),
    ];

    match order.price {
        Some(_) if order_type == "MARKET" => {}
        Some(price) => params.push(("price".into(), format_quantity(price, "price")?)),
        None if PRICED_TYPES.contains(&order_type.as_str()) => {
            return Err(ExchangeError::InvalidOrder(format!(
                "{} order requires a price",
                order.order_type
            )))
        }
        None => {}
    }
    if TIME_IN_FORCE_TYPES.contains(&order_type.as_str())
        && !order.params.contains_key("timeInForce")
    {
        params.push(("timeInForce".into(), "GTC".into()));
    }

    // Built-in keys win over caller params of the same name.
    for (key, value) in param_pairs(&order.params) {
        if !params.iter().any(|(existing, _)| *existing == key) {
            params.push((key, value));
        }
    }
    Ok(params)
}

#[derive(Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

fn parse_error(status: StatusCode, body: &str) -> ExchangeError {
    let Ok(err) = serde_json::from_str::<ApiError>(body) else {
        return ExchangeError::Exchange(format!("binance {} {}", status, body));
    };
    let message = format!("binance {} {}", err.code, err.msg);
    match err.code {
        -2014 | -2015 | -1022 => ExchangeError::Authentication(message),
        -1121 => ExchangeError::BadSymbol(message),
        -1013 | -2010 | -1102 => ExchangeError::InvalidOrder(message),
        _ => ExchangeError::Exchange(message),
    }
}

fn parse_ticker(symbol: &str, raw: &Value) -> Value {
    let timestamp = raw["closeTime"].as_i64();
    json!({
        "symbol": symbol,
        "timestamp": timestamp,
        "datetime": timestamp.and_then(iso8601),
        "high": number(&raw["highPrice"]),
        "low": number(&raw["lowPrice"]),
        "bid": number(&raw["bidPrice"]),
        "bidVolume": number(&raw["bidQty"]),
        "ask": number(&raw["askPrice"]),
        "askVolume": number(&raw["askQty"]),
        "vwap": number(&raw["weightedAvgPrice"]),
        "open": number(&raw["openPrice"]),
        "close": number(&raw["lastPrice"]),
        "last": number(&raw["lastPrice"]),
        "previousClose": number(&raw["prevClosePrice"]),
        "change": number(&raw["priceChange"]),
        "percentage": number(&raw["priceChangePercent"]),
        "baseVolume": number(&raw["volume"]),
        "quoteVolume": number(&raw["quoteVolume"]),
        "info": raw,
    })
}

/// Klines come back as `[openTime, open, high, low, close, volume, closeTime, ...]`.
fn parse_ohlcv(raw: &Value) -> ExchangeResult<Value> {
    let rows = raw
        .as_array()
        .ok_or_else(|| ExchangeError::BadResponse("binance klines: expected an array".into()))?;

    let candles = rows
        .iter()
        .map(|row| {
            let timestamp = row[0].as_i64().ok_or_else(|| {
                ExchangeError::BadResponse("binance klines: missing open time".into())
            })?;
            Ok(json!([
                timestamp,
                number(&row[1]),
                number(&row[2]),
                number(&row[3]),
                number(&row[4]),
                number(&row[5]),
            ]))
        })
        .collect::<ExchangeResult<Vec<_>>>()?;

    Ok(Value::Array(candles))
}

fn order_status(status: &str) -> &str {
    match status {
        "NEW" | "PARTIALLY_FILLED" | "PENDING_NEW" => "open",
        "FILLED" => "closed",
        "CANCELED" | "PENDING_CANCEL" => "canceled",
        "REJECTED" => "rejected",
        "EXPIRED" | "EXPIRED_IN_MATCH" => "expired",
        other => other,
    }
}

fn parse_order(symbol: &str, raw: &Value) -> Value {
    let timestamp = raw["transactTime"].as_i64().or_else(|| raw["time"].as_i64());
    let amount = decimal(&raw["origQty"]);
    let filled = decimal(&raw["executedQty"]);
    let remaining = match (amount, filled) {
        (Some(a), Some(f)) => decimal_to_json(a - f),
        _ => Value::Null,
    };
    let lower = |v: &Value| v.as_str().map(str::to_lowercase);

    json!({
        "id": raw["orderId"].as_i64().map(|id| id.to_string()),
        "clientOrderId": raw["clientOrderId"],
        "timestamp": timestamp,
        "datetime": timestamp.and_then(iso8601),
        "symbol": symbol,
        "type": lower(&raw["type"]),
        "side": lower(&raw["side"]),
        "timeInForce": raw["timeInForce"],
        "price": number(&raw["price"]),
        "amount": amount.map(decimal_to_json),
        "filled": filled.map(decimal_to_json),
        "remaining": remaining,
        "cost": number(&raw["cummulativeQuoteQty"]),
        "status": raw["status"].as_str().map(order_status),
        "info": raw,
    })
}

fn parse_balance(raw: &Value) -> Value {
    let mut result = Map::new();
    let mut free = Map::new();
    let mut used = Map::new();
    let mut total = Map::new();

    for entry in raw["balances"].as_array().into_iter().flatten() {
        let Some(asset) = entry["asset"].as_str() else {
            continue;
        };
        let available = decimal(&entry["free"]).unwrap_or(Decimal::ZERO);
        let locked = decimal(&entry["locked"]).unwrap_or(Decimal::ZERO);
        let account = json!({
            "free": decimal_to_json(available),
            "used": decimal_to_json(locked),
            "total": decimal_to_json(available + locked),
        });

        free.insert(asset.to_string(), account["free"].clone());
        used.insert(asset.to_string(), account["used"].clone());
        total.insert(asset.to_string(), account["total"].clone());
        result.insert(asset.to_string(), account);
    }

    let timestamp = raw["updateTime"].as_i64();
    result.insert("info".into(), raw.clone());
    result.insert("timestamp".into(), json!(timestamp));
    result.insert("datetime".into(), json!(timestamp.and_then(iso8601)));
    result.insert("free".into(), Value::Object(free));
    result.insert("used".into(), Value::Object(used));
    result.insert("total".into(), Value::Object(total));
    Value::Object(result)
}
