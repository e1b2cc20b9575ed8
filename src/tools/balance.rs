use super::runner::{self, Operation};
use super::{error_record, input_schema, output_schema, parse_args, ExchangeArgs, Tool};
use crate::exchange::ExchangeRegistry;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

#[derive(Deserialize)]
struct FetchBalanceArgs {
    #[serde(default)]
    params: Option<Map<String, Value>>,
    #[serde(flatten)]
    exchange: ExchangeArgs,
}

pub struct FetchBalanceTool;

#[async_trait::async_trait]
impl Tool for FetchBalanceTool {
    fn name(&self) -> &'static str {
        "fetch_balance"
    }

    fn description(&self) -> &'static str {
        "Get the account balance on the specified exchange. Requires apiKey and secret."
    }

    fn schema(&self) -> Value {
        input_schema(
            json!({
                "params": {
                    "type": "object",
                    "description": "Extra exchange-specific parameters"
                }
            }),
            &[],
            true,
        )
    }

    fn output_schema(&self) -> Value {
        output_schema("balance_info", "object", "Account balances")
    }

    async fn call(&self, exchanges: &ExchangeRegistry, args: Value) -> Value {
        let args: FetchBalanceArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(record) => return record,
        };

        let config = args.exchange.client_config();
        if !config.has_credentials() {
            debug!(exchange = %args.exchange.exchange_id, "Rejecting balance request without credentials");
            return error_record("API key and secret are required.");
        }

        let operation = Operation::FetchBalance {
            params: args.params.unwrap_or_default(),
        };
        runner::invoke(exchanges, &args.exchange, operation).await
    }
}
