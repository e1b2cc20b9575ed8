use super::runner::{self, Operation};
use super::{input_schema, output_schema, parse_args, ExchangeArgs, Tool};
use crate::exchange::{ExchangeRegistry, OrderRequest};
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Deserialize)]
struct CreateOrderArgs {
    symbol: String,
    #[serde(rename = "type")]
    order_type: String,
    side: String,
    amount: f64,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    params: Option<Map<String, Value>>,
    #[serde(flatten)]
    exchange: ExchangeArgs,
}

pub struct CreateOrderTool;

#[async_trait::async_trait]
impl Tool for CreateOrderTool {
    fn name(&self) -> &'static str {
        "create_order"
    }

    fn description(&self) -> &'static str {
        "Create an order on the specified exchange."
    }

    fn schema(&self) -> Value {
        input_schema(
            json!({
                "symbol": {
                    "type": "string",
                    "description": "Trading pair (e.g. 'BTC/USDT')"
                },
                "type": {
                    "type": "string",
                    "description": "Order type (e.g. 'market', 'limit')"
                },
                "side": {
                    "type": "string",
                    "description": "Order side ('buy' or 'sell')"
                },
                "amount": {
                    "type": "number",
                    "description": "Order amount in base currency"
                },
                "price": {
                    "type": "number",
                    "description": "Order price (omit for market orders)"
                },
                "params": {
                    "type": "object",
                    "description": "Extra exchange-specific parameters (e.g. 'stopPrice')"
                }
            }),
            &["symbol", "type", "side", "amount"],
            false,
        )
    }

    fn output_schema(&self) -> Value {
        output_schema("order_info", "object", "The created order")
    }

    async fn call(&self, exchanges: &ExchangeRegistry, args: Value) -> Value {
        let args: CreateOrderArgs = match parse_args(self.name(), args) {
            Ok(args) => args,
            Err(record) => return record,
        };
        let operation = Operation::CreateOrder(OrderRequest {
            symbol: args.symbol,
            order_type: args.order_type,
            side: args.side,
            amount: args.amount,
            price: args.price,
            params: args.params.unwrap_or_default(),
        });
        runner::invoke(exchanges, &args.exchange, operation).await
    }
}
