use super::runner::{self, Operation};
use super::{input_schema, output_schema, parse_args, ExchangeArgs, Tool};
use crate::exchange::{ExchangeRegistry, OhlcvRequest};
use serde::Deserialize;
use serde_json::{json, Map, Value};

fn default_timeframe() -> String {
    "1h".to_string()
}

#[derive(Deserialize)]
struct FetchOhlcvArgs {
    symbol: String,
    #[serde(default = "default_timeframe")]
    timeframe: String,
    #[serde(default)]
    since: Option<i64>,
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    params: Option<Map<String, Value>>,
    #[serde(flatten)]
    exchange: ExchangeArgs,
}

pub struct FetchOhlcvTool;

#[async_trait::async_trait]
impl Tool for FetchOhlcvTool {
    fn name(&self) -> &'static str {
        "fetch_ohlcv"
    }

    fn description(&self) -> &'static str {
        "Get OHLCV candles (open, high, low, close, volume) for a trading pair."
    }

    fn schema(&self) -> Value {
        input_schema(
            json!({
                "symbol": {
                    "type": "string",
                    "description": "Trading pair (e.g. 'BTC/USDT')"
                },
                "timeframe": {
                    "type": "string",
                    "description": "Candle timeframe (e.g. '1m', '5m', '1h', '1d'). Default '1h'.",
                    "default": "1h"
                },
                "since": {
                    "type": "integer",
                    "description": "Start time in epoch milliseconds (optional)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of candles (optional, exchanges may cap it)"
                },
                "params": {
                    "type": "object",
                    "description": "Extra exchange-specific parameters"
                }
            }),
            &["symbol"],
            false,
        )
    }

    fn output_schema(&self) -> Value {
        output_schema(
            "ohlcv_data",
            "array",
            "Candles, each [timestamp, open, high, low, close, volume]",
        )
    }

    async fn call(&self, exchanges: &ExchangeRegistry, args: Value) -> Value {
        let args: FetchOhlcvArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(record) => return record,
        };
        let operation = Operation::FetchOhlcv(OhlcvRequest {
            symbol: args.symbol,
            timeframe: args.timeframe,
            since: args.since,
            limit: args.limit,
            params: args.params.unwrap_or_default(),
        });
        runner::invoke(exchanges, &args.exchange, operation).await
    }
}
