pub mod balance;
pub mod exchange_info;
pub mod ohlcv;
pub mod order;
pub mod runner;
pub mod ticker;

use crate::exchange::{ExchangeConfig, ExchangeRegistry};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// An MCP tool. Calls never fail: every outcome, including bad arguments,
/// comes back as a result record, either `{<payload-key>: ...}` or
/// `{"error": ...}`.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schema(&self) -> Value;
    fn output_schema(&self) -> Value;
    async fn call(&self, exchanges: &ExchangeRegistry, args: Value) -> Value;
}

/// Arguments every tool accepts.
#[derive(Debug, Default, Deserialize)]
pub struct ExchangeArgs {
    #[serde(default)]
    pub exchange_id: String,
    #[serde(rename = "apiKey", default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(rename = "sandboxMode", default)]
    pub sandbox_mode: Option<bool>,
}

impl ExchangeArgs {
    pub fn sandbox(&self) -> bool {
        self.sandbox_mode.unwrap_or(false)
    }

    /// Client configuration; credentials are only set when non-empty.
    pub fn client_config(&self) -> ExchangeConfig {
        let supplied = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        ExchangeConfig {
            api_key: supplied(&self.api_key),
            secret: supplied(&self.secret),
            password: supplied(&self.password),
            enable_rate_limit: true,
            ..Default::default()
        }
    }
}

pub fn error_record(message: impl Into<String>) -> Value {
    json!({ "error": message.into() })
}

pub fn success_record(key: &str, data: Value) -> Value {
    let mut record = Map::new();
    record.insert(key.to_string(), data);
    Value::Object(record)
}

pub(crate) fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, Value> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args)
        .map_err(|e| error_record(format!("Invalid arguments for {}: {}", tool, e)))
}

/// JSON schema for a tool's inputs, with the shared exchange arguments appended.
pub(crate) fn input_schema(
    properties: Value,
    required: &[&str],
    credentials_required: bool,
) -> Value {
    let mut props = match properties {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let credential_note = if credentials_required {
        "(required)"
    } else {
        "(optional)"
    };

    props.insert(
        "exchange_id".into(),
        json!({
            "type": "string",
            "description": "Exchange ID (e.g. 'binance', 'kraken')"
        }),
    );
    props.insert(
        "apiKey".into(),
        json!({ "type": "string", "description": format!("API key {}", credential_note) }),
    );
    props.insert(
        "secret".into(),
        json!({ "type": "string", "description": format!("API secret {}", credential_note) }),
    );
    props.insert(
        "password".into(),
        json!({
            "type": "string",
            "description": "API passphrase (optional, required by some exchanges)"
        }),
    );
    props.insert(
        "sandboxMode".into(),
        json!({
            "type": "boolean",
            "description": "Enable sandbox mode (optional, supported by some exchanges)"
        }),
    );

    let mut required_fields = vec!["exchange_id"];
    required_fields.extend_from_slice(required);
    if credentials_required {
        required_fields.extend(["apiKey", "secret"]);
    }

    json!({
        "type": "object",
        "properties": props,
        "required": required_fields
    })
}

/// Output schema with a single named field.
pub(crate) fn output_schema(field: &str, kind: &str, description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            field: { "type": kind, "description": description }
        }
    })
}
