use super::runner::{self, Operation};
use super::{input_schema, output_schema, parse_args, ExchangeArgs, Tool};
use crate::exchange::ExchangeRegistry;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
struct FetchTickerArgs {
    symbol: String,
    #[serde(flatten)]
    exchange: ExchangeArgs,
}

pub struct FetchTickerTool;

#[async_trait::async_trait]
impl Tool for FetchTickerTool {
    fn name(&self) -> &'static str {
        "fetch_ticker"
    }

    fn description(&self) -> &'static str {
        "Get the latest market ticker for a trading pair."
    }

    fn schema(&self) -> Value {
        input_schema(
            json!({
                "symbol": {
                    "type": "string",
                    "description": "Trading pair (e.g. 'BTC/USDT')"
                }
            }),
            &["symbol"],
            false,
        )
    }

    fn output_schema(&self) -> Value {
        output_schema("ticker_data", "object", "Ticker data for the trading pair")
    }

    async fn call(&self, exchanges: &ExchangeRegistry, args: Value) -> Value {
        let args: FetchTickerArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(record) => return record,
        };
        let operation = Operation::FetchTicker {
            symbol: args.symbol,
        };
        runner::invoke(exchanges, &args.exchange, operation).await
    }
}
