//! Exchange connectivity.
//!
//! An [`ExchangeClass`] describes a venue before any client exists (its id,
//! test URL, sandbox markers and option schema) and knows how to build an
//! [`Exchange`] client from an [`ExchangeConfig`]. Clients advertise what they
//! can do through [`Capability`] flags and must be released with
//! [`Exchange::close`] when the caller is done.

pub mod binance;
pub mod kraken;
pub mod registry;
pub mod rest;
pub mod sandbox;

pub use registry::ExchangeRegistry;
pub use sandbox::SandboxPath;

use crate::error::{ExchangeError, ExchangeResult};
use chrono::{SecondsFormat, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Per-operation capability flags, named the way callers see them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    FetchTicker,
    CreateOrder,
    FetchBalance,
    FetchOhlcv,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::FetchTicker => "fetchTicker",
            Capability::CreateOrder => "createOrder",
            Capability::FetchBalance => "fetchBalance",
            Capability::FetchOhlcv => "fetchOHLCV",
        }
    }

    pub const ALL: [Capability; 4] = [
        Capability::FetchTicker,
        Capability::CreateOrder,
        Capability::FetchBalance,
        Capability::FetchOhlcv,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client configuration, built fresh for every tool call.
///
/// Credential fields are only set when the caller supplied a non-empty value.
#[derive(Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub enable_rate_limit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

impl ExchangeConfig {
    /// Overridden REST endpoint, if any.
    pub fn api_url(&self) -> Option<&str> {
        self.urls
            .as_ref()
            .and_then(|urls| urls.get("api"))
            .map(String::as_str)
    }

    /// Whether `options.sandboxMode` was set to `true`.
    pub fn sandbox_option(&self) -> bool {
        self.options
            .get("sandboxMode")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.secret.is_some()
    }
}

impl fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("ExchangeConfig")
            .field("api_key", &redact(&self.api_key))
            .field("secret", &redact(&self.secret))
            .field("password", &redact(&self.password))
            .field("enable_rate_limit", &self.enable_rate_limit)
            .field("urls", &self.urls)
            .field("options", &self.options)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub order_type: String,
    pub side: String,
    pub amount: f64,
    pub price: Option<f64>,
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OhlcvRequest {
    pub symbol: String,
    pub timeframe: String,
    pub since: Option<i64>,
    pub limit: Option<u32>,
    pub params: Map<String, Value>,
}

/// Class-level description of a venue.
pub trait ExchangeClass: Send + Sync {
    fn id(&self) -> &'static str;

    /// Whether built clients accept [`Exchange::set_sandbox_mode`].
    fn has_sandbox_toggle(&self) -> bool {
        false
    }

    /// Test-environment REST endpoint, if the venue publishes one.
    fn test_url(&self) -> Option<&str> {
        None
    }

    /// Venue-specific sandbox marker outside the option schema.
    fn has_sandbox_marker(&self) -> bool {
        false
    }

    /// Keys recognized in [`ExchangeConfig::options`].
    fn option_keys(&self) -> &[&'static str] {
        &[]
    }

    fn build(&self, config: ExchangeConfig) -> ExchangeResult<Box<dyn Exchange>>;
}

/// A live client for a single venue.
///
/// Operations a venue does not implement default to
/// [`ExchangeError::NotSupported`]; callers are expected to consult
/// [`Exchange::has`] first.
#[async_trait::async_trait]
pub trait Exchange: Send + Sync {
    fn id(&self) -> &str;

    fn has(&self, capability: Capability) -> bool;

    fn set_sandbox_mode(&mut self, enabled: bool);

    /// Static description of the venue: urls, capabilities, timeframes.
    fn describe(&self) -> Value;

    async fn fetch_ticker(&self, _symbol: &str) -> ExchangeResult<Value> {
        Err(ExchangeError::NotSupported(format!("{} fetchTicker", self.id())))
    }

    async fn create_order(&self, _order: &OrderRequest) -> ExchangeResult<Value> {
        Err(ExchangeError::NotSupported(format!("{} createOrder", self.id())))
    }

    async fn fetch_balance(&self, _params: &Map<String, Value>) -> ExchangeResult<Value> {
        Err(ExchangeError::NotSupported(format!("{} fetchBalance", self.id())))
    }

    async fn fetch_ohlcv(&self, _request: &OhlcvRequest) -> ExchangeResult<Value> {
        Err(ExchangeError::NotSupported(format!("{} fetchOHLCV", self.id())))
    }

    /// Release the underlying connection.
    async fn close(&mut self) -> ExchangeResult<()>;
}

/// Splits a unified `BASE/QUOTE` symbol.
pub(crate) fn split_symbol(symbol: &str) -> ExchangeResult<(&str, &str)> {
    match symbol.split_once('/') {
        Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
            // Drop a settle suffix such as `BTC/USDT:USDT`.
            let quote = quote.split(':').next().unwrap_or(quote);
            Ok((base, quote))
        }
        _ => Err(ExchangeError::BadSymbol(format!(
            "expected BASE/QUOTE, got '{}'",
            symbol
        ))),
    }
}

/// Extra caller params as query pairs; nulls are dropped.
pub(crate) fn param_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    params
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

/// Venues send prices as strings; parse them without going through f64.
pub(crate) fn decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

pub(crate) fn decimal_to_json(value: Decimal) -> Value {
    value.to_f64().map(Value::from).unwrap_or(Value::Null)
}

pub(crate) fn number(value: &Value) -> Value {
    decimal(value).map(decimal_to_json).unwrap_or(Value::Null)
}

pub(crate) fn iso8601(timestamp_ms: i64) -> Option<String> {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}
