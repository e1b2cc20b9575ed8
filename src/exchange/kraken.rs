//! Kraken spot REST client, public market data only.

use super::rest::RestClient;
use super::{
    decimal, decimal_to_json, number, param_pairs, split_symbol, Capability, Exchange,
    ExchangeClass, ExchangeConfig, OhlcvRequest,
};
use crate::error::{ExchangeError, ExchangeResult};
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;
use url::form_urlencoded;

const API_URL: &str = "https://api.kraken.com";
const RATE_LIMIT: Duration = Duration::from_millis(1000);

/// Timeframe to interval minutes.
const TIMEFRAMES: [(&str, u32); 9] = [
    ("1m", 1),
    ("5m", 5),
    ("15m", 15),
    ("30m", 30),
    ("1h", 60),
    ("4h", 240),
    ("1d", 1440),
    ("1w", 10080),
    ("2w", 21600),
];

pub struct KrakenClass;

impl ExchangeClass for KrakenClass {
    fn id(&self) -> &'static str {
        "kraken"
    }

    fn build(&self, config: ExchangeConfig) -> ExchangeResult<Box<dyn Exchange>> {
        Ok(Box::new(KrakenClient::new(config)?))
    }
}

pub struct KrakenClient {
    rest: RestClient,
}

impl KrakenClient {
    pub fn new(config: ExchangeConfig) -> ExchangeResult<Self> {
        let api_url = config.api_url().unwrap_or(API_URL);
        Ok(Self {
            rest: RestClient::new("kraken", api_url, RATE_LIMIT, config.enable_rate_limit)?,
        })
    }

    async fn public(&self, method: &str, params: &[(String, String)]) -> ExchangeResult<Value> {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        let url = self
            .rest
            .endpoint(&format!("/0/public/{}", method), Some(query.as_str()))?;
        let request = self.rest.request(Method::GET, url)?;
        let (status, body) = self.rest.send(request).await?;
        if !status.is_success() {
            return Err(ExchangeError::Exchange(format!("kraken {} {}", status, body)));
        }
        unwrap_result(serde_json::from_str(&body)?)
    }
}

#[async_trait::async_trait]
impl Exchange for KrakenClient {
    fn id(&self) -> &str {
        "kraken"
    }

    fn has(&self, capability: Capability) -> bool {
        matches!(capability, Capability::FetchTicker | Capability::FetchOhlcv)
    }

    fn set_sandbox_mode(&mut self, enabled: bool) {
        if enabled {
            debug!("kraken has no sandbox environment; ignoring");
        }
    }

    fn describe(&self) -> Value {
        let has: Map<String, Value> = Capability::ALL
            .iter()
            .map(|c| (c.as_str().to_string(), Value::Bool(self.has(*c))))
            .collect();
        let timeframes: Map<String, Value> = TIMEFRAMES
            .iter()
            .map(|(tf, minutes)| (tf.to_string(), json!(minutes)))
            .collect();

        json!({
            "id": "kraken",
            "name": "Kraken",
            "countries": ["US"],
            "version": "0",
            "rateLimit": RATE_LIMIT.as_millis() as u64,
            "sandbox": false,
            "urls": {
                "api": self.rest.base_url().as_str(),
                "www": "https://www.kraken.com",
                "doc": "https://docs.kraken.com/rest/",
            },
            "has": has,
            "timeframes": timeframes,
            "requiredCredentials": { "apiKey": true, "secret": true },
        })
    }

    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<Value> {
        let params = vec![("pair".to_string(), pair_id(symbol)?)];
        let result = self.public("Ticker", &params).await?;
        let raw = first_pair(&result)?;
        Ok(parse_ticker(symbol, raw))
    }

    async fn fetch_ohlcv(&self, request: &OhlcvRequest) -> ExchangeResult<Value> {
        let interval = interval_minutes(&request.timeframe)?;
        let mut params = vec![
            ("pair".to_string(), pair_id(&request.symbol)?),
            ("interval".to_string(), interval.to_string()),
        ];
        if let Some(since) = request.since {
            params.push(("since".into(), (since / 1000).to_string()));
        }
        params.extend(param_pairs(&request.params));

        let result = self.public("OHLC", &params).await?;
        let rows = first_pair(&result)?;
        let candles = parse_ohlcv(rows)?;
        Ok(Value::Array(apply_limit(
            candles,
            request.limit,
            request.since.is_some(),
        )))
    }

    async fn close(&mut self) -> ExchangeResult<()> {
        self.rest.close();
        Ok(())
    }
}

fn asset_code(asset: &str) -> String {
    match asset.to_uppercase().as_str() {
        "BTC" => "XBT".to_string(),
        "DOGE" => "XDG".to_string(),
        other => other.to_string(),
    }
}

fn pair_id(symbol: &str) -> ExchangeResult<String> {
    let (base, quote) = split_symbol(symbol)?;
    Ok(format!("{}{}", asset_code(base), asset_code(quote)))
}

fn interval_minutes(timeframe: &str) -> ExchangeResult<u32> {
    TIMEFRAMES
        .iter()
        .find(|(tf, _)| *tf == timeframe)
        .map(|(_, minutes)| *minutes)
        .ok_or_else(|| {
            ExchangeError::NotSupported(format!(
                "kraken does not support timeframe '{}'",
                timeframe
            ))
        })
}

/// Kraken wraps every payload as `{"error": [...], "result": {...}}`.
fn unwrap_result(envelope: Value) -> ExchangeResult<Value> {
    let errors: Vec<&str> = envelope["error"]
        .as_array()
        .map(|errs| errs.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if let Some(first) = errors.first() {
        let message = format!("kraken {}", errors.join(", "));
        return Err(if first.starts_with("EQuery:Unknown asset pair") {
            ExchangeError::BadSymbol(message)
        } else {
            ExchangeError::Exchange(message)
        });
    }

    match envelope {
        Value::Object(mut map) => map
            .remove("result")
            .ok_or_else(|| ExchangeError::BadResponse("kraken: missing result".into())),
        _ => Err(ExchangeError::BadResponse(
            "kraken: expected a JSON object".into(),
        )),
    }
}

/// The result is keyed by Kraken's own pair name, next to a `last` cursor.
fn first_pair(result: &Value) -> ExchangeResult<&Value> {
    result
        .as_object()
        .and_then(|map| map.iter().find(|(k, _)| k.as_str() != "last"))
        .map(|(_, v)| v)
        .ok_or_else(|| ExchangeError::BadResponse("kraken: empty result".into()))
}

fn parse_ticker(symbol: &str, raw: &Value) -> Value {
    let base_volume = decimal(&raw["v"][1]);
    let vwap = decimal(&raw["p"][1]);
    let quote_volume = match (base_volume, vwap) {
        (Some(volume), Some(price)) => decimal_to_json(volume * price),
        _ => Value::Null,
    };

    json!({
        "symbol": symbol,
        "timestamp": null,
        "datetime": null,
        "high": number(&raw["h"][1]),
        "low": number(&raw["l"][1]),
        "bid": number(&raw["b"][0]),
        "bidVolume": number(&raw["b"][2]),
        "ask": number(&raw["a"][0]),
        "askVolume": number(&raw["a"][2]),
        "vwap": vwap.map(decimal_to_json),
        "open": number(&raw["o"]),
        "close": number(&raw["c"][0]),
        "last": number(&raw["c"][0]),
        "baseVolume": base_volume.map(decimal_to_json),
        "quoteVolume": quote_volume,
        "info": raw,
    })
}

/// Rows are `[time, open, high, low, close, vwap, volume, count]` with time in seconds.
fn parse_ohlcv(rows: &Value) -> ExchangeResult<Vec<Value>> {
    rows.as_array()
        .ok_or_else(|| ExchangeError::BadResponse("kraken OHLC: expected an array".into()))?
        .iter()
        .map(|row| {
            let seconds = row[0].as_i64().ok_or_else(|| {
                ExchangeError::BadResponse("kraken OHLC: missing timestamp".into())
            })?;
            Ok(json!([
                seconds * 1000,
                number(&row[1]),
                number(&row[2]),
                number(&row[3]),
                number(&row[4]),
                number(&row[6]),
            ]))
        })
        .collect()
}

/// With a start time the oldest candles are kept, otherwise the newest.
fn apply_limit(mut candles: Vec<Value>, limit: Option<u32>, from_start: bool) -> Vec<Value> {
    let Some(limit) = limit.map(|l| l as usize) else {
        return candles;
    };
    if candles.len() <= limit {
        return candles;
    }
    if from_start {
        candles.truncate(limit);
        candles
    } else {
        candles.split_off(candles.len() - limit)
    }
}
