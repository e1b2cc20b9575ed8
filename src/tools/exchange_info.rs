use super::runner::{self, Operation};
use super::{input_schema, output_schema, parse_args, ExchangeArgs, Tool};
use crate::exchange::ExchangeRegistry;
use serde_json::{json, Value};

pub struct GetExchangeInfoTool;

#[async_trait::async_trait]
impl Tool for GetExchangeInfoTool {
    fn name(&self) -> &'static str {
        "get_exchange_info"
    }

    fn description(&self) -> &'static str {
        "Get information about the specified exchange: urls, supported capabilities and timeframes."
    }

    fn schema(&self) -> Value {
        input_schema(json!({}), &[], false)
    }

    fn output_schema(&self) -> Value {
        output_schema("exchange_info", "object", "Detailed information about the exchange")
    }

    async fn call(&self, exchanges: &ExchangeRegistry, args: Value) -> Value {
        let args: ExchangeArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(record) => return record,
        };
        runner::invoke(exchanges, &args, Operation::Describe).await
    }
}
