//! The lifecycle shared by every exchange tool:
//! configure, resolve sandbox, check capability, call, format, release.

use super::{error_record, success_record, ExchangeArgs};
use crate::error::{ExchangeError, ExchangeResult};
use crate::exchange::{
    sandbox, Capability, Exchange, ExchangeRegistry, OhlcvRequest, OrderRequest,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// A single library call together with how its result is reported.
#[derive(Debug, Clone)]
pub enum Operation {
    Describe,
    FetchTicker { symbol: String },
    CreateOrder(OrderRequest),
    FetchBalance { params: Map<String, Value> },
    FetchOhlcv(OhlcvRequest),
}

impl Operation {
    pub fn capability(&self) -> Option<Capability> {
        match self {
            Operation::Describe => None,
            Operation::FetchTicker { .. } => Some(Capability::FetchTicker),
            Operation::CreateOrder(_) => Some(Capability::CreateOrder),
            Operation::FetchBalance { .. } => Some(Capability::FetchBalance),
            Operation::FetchOhlcv(_) => Some(Capability::FetchOhlcv),
        }
    }

    pub fn payload_key(&self) -> &'static str {
        match self {
            Operation::Describe => "exchange_info",
            Operation::FetchTicker { .. } => "ticker_data",
            Operation::CreateOrder(_) => "order_info",
            Operation::FetchBalance { .. } => "balance_info",
            Operation::FetchOhlcv(_) => "ohlcv_data",
        }
    }

    fn action(&self) -> &'static str {
        match self {
            Operation::Describe => "fetching exchange info",
            Operation::FetchTicker { .. } => "fetching ticker",
            Operation::CreateOrder(_) => "creating order",
            Operation::FetchBalance { .. } => "fetching balance",
            Operation::FetchOhlcv(_) => "fetching OHLCV data",
        }
    }

    async fn execute(&self, exchange: &dyn Exchange) -> ExchangeResult<Value> {
        match self {
            Operation::Describe => Ok(exchange.describe()),
            Operation::FetchTicker { symbol } => exchange.fetch_ticker(symbol).await,
            Operation::CreateOrder(order) => exchange.create_order(order).await,
            Operation::FetchBalance { params } => exchange.fetch_balance(params).await,
            Operation::FetchOhlcv(request) => exchange.fetch_ohlcv(request).await,
        }
    }

    pub fn failure_record(&self, err: &ExchangeError) -> Value {
        if err.is_network() {
            error_record(format!("Network error: {}", err))
        } else if err.is_exchange() {
            error_record(format!("Exchange error: {}", err))
        } else {
            error_record(format!("Unexpected error while {}: {}", self.action(), err))
        }
    }
}

/// Runs `operation` against a fresh client for `args.exchange_id`.
///
/// Once a client has been built, `close` is awaited exactly once whatever the
/// outcome; a failing close is logged and otherwise ignored.
pub async fn invoke(
    exchanges: &ExchangeRegistry,
    args: &ExchangeArgs,
    operation: Operation,
) -> Value {
    let exchange_id = args.exchange_id.as_str();
    if exchange_id.is_empty() {
        return error_record("Missing required argument 'exchange_id'.");
    }
    let Some(class) = exchanges.get(exchange_id) else {
        return error_record(format!("Exchange '{}' not found.", exchange_id));
    };

    let config = args.client_config();
    debug!(exchange = exchange_id, ?config, sandbox = args.sandbox(), "Creating exchange client");

    let (mut exchange, _) = match sandbox::instantiate(class.as_ref(), config, args.sandbox()) {
        Ok(built) => built,
        Err(e) => {
            warn!(exchange = exchange_id, "Failed to create exchange client: {}", e);
            return operation.failure_record(&e);
        }
    };

    let record = run(exchange.as_ref(), exchange_id, &operation).await;

    if let Err(e) = exchange.close().await {
        warn!(
            exchange = exchange_id,
            "Error closing exchange {} connection: {}", exchange_id, e
        );
    }

    record
}

async fn run(exchange: &dyn Exchange, exchange_id: &str, operation: &Operation) -> Value {
    if let Some(capability) = operation.capability() {
        if !exchange.has(capability) {
            return error_record(format!(
                "Exchange '{}' does not support {}.",
                exchange_id, capability
            ));
        }
    }

    match operation.execute(exchange).await {
        Ok(data) => success_record(operation.payload_key(), data),
        Err(e) => {
            warn!(exchange = exchange_id, "Error while {}: {}", operation.action(), e);
            operation.failure_record(&e)
        }
    }
}
