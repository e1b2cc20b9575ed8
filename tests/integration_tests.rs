use axum::body::Body;
use axum::http::{Request, StatusCode};
use exchange_trading_mcp::{
    error::{ExchangeError, ExchangeResult},
    exchange::{
        Capability, Exchange, ExchangeClass, ExchangeConfig, ExchangeRegistry, OhlcvRequest,
        OrderRequest,
    },
    http::build_router,
    server::McpServer,
    tools::{
        balance::FetchBalanceTool, exchange_info::GetExchangeInfoTool, ohlcv::FetchOhlcvTool,
        order::CreateOrderTool, ticker::FetchTickerTool, Tool,
    },
};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::fmt;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    NetworkError,
    ExchangeError,
    OtherError,
}

#[derive(Default)]
struct Calls {
    built: AtomicUsize,
    requests: AtomicUsize,
    closes: AtomicUsize,
    sandbox: AtomicBool,
    last_config: Mutex<Option<ExchangeConfig>>,
}

impl Calls {
    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn config(&self) -> ExchangeConfig {
        self.last_config.lock().unwrap().clone().expect("client was never built")
    }
}

struct MockClass {
    id: &'static str,
    capabilities: Vec<Capability>,
    behavior: Behavior,
    toggle: bool,
    test_url: Option<&'static str>,
    fail_close: bool,
    calls: Arc<Calls>,
}

impl MockClass {
    fn new(id: &'static str) -> Self {
        Self {
            id,
            capabilities: Capability::ALL.to_vec(),
            behavior: Behavior::Succeed,
            toggle: false,
            test_url: None,
            fail_close: false,
            calls: Arc::new(Calls::default()),
        }
    }
}

impl ExchangeClass for MockClass {
    fn id(&self) -> &'static str {
        self.id
    }

    fn has_sandbox_toggle(&self) -> bool {
        self.toggle
    }

    fn test_url(&self) -> Option<&str> {
        self.test_url
    }

    fn build(&self, config: ExchangeConfig) -> ExchangeResult<Box<dyn Exchange>> {
        self.calls.built.fetch_add(1, Ordering::SeqCst);
        *self.calls.last_config.lock().unwrap() = Some(config);
        Ok(Box::new(MockClient {
            id: self.id,
            capabilities: self.capabilities.clone(),
            behavior: self.behavior,
            fail_close: self.fail_close,
            calls: self.calls.clone(),
        }))
    }
}

struct MockClient {
    id: &'static str,
    capabilities: Vec<Capability>,
    behavior: Behavior,
    fail_close: bool,
    calls: Arc<Calls>,
}

impl MockClient {
    fn respond(&self, data: Value) -> ExchangeResult<Value> {
        self.calls.requests.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Succeed => Ok(data),
            Behavior::NetworkError => Err(ExchangeError::Network("connection reset".into())),
            Behavior::ExchangeError => {
                Err(ExchangeError::InvalidOrder("insufficient balance".into()))
            }
            Behavior::OtherError => Err(ExchangeError::Other("unexpected state".into())),
        }
    }
}

#[async_trait::async_trait]
impl Exchange for MockClient {
    fn id(&self) -> &str {
        self.id
    }

    fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    fn set_sandbox_mode(&mut self, enabled: bool) {
        self.calls.sandbox.store(enabled, Ordering::SeqCst);
    }

    fn describe(&self) -> Value {
        json!({ "id": self.id, "name": "Mock Exchange" })
    }

    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<Value> {
        self.respond(json!({ "symbol": symbol, "last": 100.5 }))
    }

    async fn create_order(&self, order: &OrderRequest) -> ExchangeResult<Value> {
        self.respond(json!({
            "id": "1",
            "symbol": order.symbol,
            "type": order.order_type,
            "side": order.side,
            "amount": order.amount,
            "price": order.price,
            "params": order.params,
        }))
    }

    async fn fetch_balance(&self, params: &Map<String, Value>) -> ExchangeResult<Value> {
        self.respond(json!({ "free": { "USDT": 10.0 }, "params": params }))
    }

    async fn fetch_ohlcv(&self, request: &OhlcvRequest) -> ExchangeResult<Value> {
        self.respond(json!([[request.since.unwrap_or(0), 1.0, 2.0, 0.5, 1.5, 10.0]]))
    }

    async fn close(&mut self) -> ExchangeResult<()> {
        self.calls.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            Err(ExchangeError::Network("socket already closed".into()))
        } else {
            Ok(())
        }
    }
}

/// Records the message of every WARN event seen while installed.
#[derive(Clone, Default)]
struct Warnings(Arc<Mutex<Vec<String>>>);

impl Warnings {
    fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for Warnings {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.0.lock().unwrap().push(visitor.0);
        }
    }
}

fn registry_with(class: MockClass) -> (ExchangeRegistry, Arc<Calls>) {
    let calls = class.calls.clone();
    (ExchangeRegistry::empty().with(Arc::new(class)), calls)
}

/// Every tool with arguments that would succeed against a full-featured venue.
fn all_tool_calls(exchange_id: &str) -> Vec<(Box<dyn Tool>, Value)> {
    vec![
        (
            Box::new(GetExchangeInfoTool) as Box<dyn Tool>,
            json!({ "exchange_id": exchange_id }),
        ),
        (
            Box::new(FetchTickerTool) as Box<dyn Tool>,
            json!({ "exchange_id": exchange_id, "symbol": "BTC/USDT" }),
        ),
        (
            Box::new(CreateOrderTool) as Box<dyn Tool>,
            json!({
                "exchange_id": exchange_id,
                "symbol": "BTC/USDT",
                "type": "limit",
                "side": "buy",
                "amount": 0.5,
                "price": 65000.0
            }),
        ),
        (
            Box::new(FetchBalanceTool) as Box<dyn Tool>,
            json!({ "exchange_id": exchange_id, "apiKey": "key", "secret": "secret" }),
        ),
        (
            Box::new(FetchOhlcvTool) as Box<dyn Tool>,
            json!({ "exchange_id": exchange_id, "symbol": "BTC/USDT" }),
        ),
    ]
}

#[tokio::test]
async fn test_unknown_exchange_yields_error_record() {
    let (registry, calls) = registry_with(MockClass::new("mock"));

    for (tool, args) in all_tool_calls("mtgox") {
        let result = tool.call(&registry, args).await;
        println!("{}: {}", tool.name(), result);
        assert_eq!(
            result["error"].as_str(),
            Some("Exchange 'mtgox' not found."),
            "tool {}",
            tool.name()
        );
    }
    assert_eq!(calls.built.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_exchange_id_yields_error_record() {
    let (registry, _) = registry_with(MockClass::new("mock"));

    for (tool, mut args) in all_tool_calls("mock") {
        args.as_object_mut().unwrap().remove("exchange_id");
        let result = tool.call(&registry, args).await;
        let error = result["error"].as_str().unwrap_or_default();
        assert!(error.contains("exchange_id"), "tool {}: {}", tool.name(), error);
    }
}

#[tokio::test]
async fn test_success_records_use_tool_payload_keys() {
    let expected = [
        "exchange_info",
        "ticker_data",
        "order_info",
        "balance_info",
        "ohlcv_data",
    ];

    for ((tool, args), key) in all_tool_calls("mock").into_iter().zip(expected) {
        let (registry, calls) = registry_with(MockClass::new("mock"));
        let result = tool.call(&registry, args).await;
        assert!(result.get(key).is_some(), "tool {}: {}", tool.name(), result);
        assert_eq!(result.as_object().unwrap().len(), 1);
        assert_eq!(calls.closes(), 1, "tool {}", tool.name());
    }
}

#[tokio::test]
async fn test_missing_capability_is_named() {
    let expected = [
        None,
        Some("fetchTicker"),
        Some("createOrder"),
        Some("fetchBalance"),
        Some("fetchOHLCV"),
    ];

    for ((tool, args), capability) in all_tool_calls("bare").into_iter().zip(expected) {
        let mut class = MockClass::new("bare");
        class.capabilities = vec![];
        let (registry, calls) = registry_with(class);

        let result = tool.call(&registry, args).await;
        match capability {
            Some(name) => {
                assert_eq!(
                    result["error"].as_str(),
                    Some(format!("Exchange 'bare' does not support {}.", name).as_str())
                );
                assert_eq!(calls.requests.load(Ordering::SeqCst), 0);
            }
            None => assert!(result.get("exchange_info").is_some()),
        }
        assert_eq!(calls.closes(), 1, "tool {}", tool.name());
    }
}

#[tokio::test]
async fn test_fetch_balance_requires_both_credentials() {
    let tool = FetchBalanceTool;
    let cases = [
        json!({ "exchange_id": "mock" }),
        json!({ "exchange_id": "mock", "apiKey": "key" }),
        json!({ "exchange_id": "mock", "secret": "secret" }),
        json!({ "exchange_id": "mock", "apiKey": "", "secret": "secret" }),
        json!({ "exchange_id": "mtgox", "apiKey": "key" }),
    ];

    for args in cases {
        let (registry, calls) = registry_with(MockClass::new("mock"));
        let result = tool.call(&registry, args).await;
        assert_eq!(
            result["error"].as_str(),
            Some("API key and secret are required.")
        );
        assert_eq!(calls.built.load(Ordering::SeqCst), 0);
        assert_eq!(calls.requests.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn test_sandbox_prefers_toggle() {
    let mut class = MockClass::new("mock");
    class.toggle = true;
    class.test_url = Some("https://testnet.mock.example");
    let (registry, calls) = registry_with(class);
    let warnings = Warnings::default();
    let _guard =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(warnings.clone()));

    let result = FetchTickerTool
        .call(
            &registry,
            json!({ "exchange_id": "mock", "symbol": "BTC/USDT", "sandboxMode": true }),
        )
        .await;

    assert!(result.get("ticker_data").is_some());
    assert!(calls.sandbox.load(Ordering::SeqCst));
    assert!(calls.config().urls.is_none());
    assert!(warnings.messages().is_empty());
}

#[tokio::test]
async fn test_sandbox_uses_test_url_without_toggle() {
    let mut class = MockClass::new("mock");
    class.test_url = Some("https://testnet.mock.example");
    let (registry, calls) = registry_with(class);

    GetExchangeInfoTool
        .call(&registry, json!({ "exchange_id": "mock", "sandboxMode": true }))
        .await;

    assert!(!calls.sandbox.load(Ordering::SeqCst));
    assert_eq!(calls.config().api_url(), Some("https://testnet.mock.example"));
}

#[tokio::test]
async fn test_sandbox_without_markers_passes_through() {
    let (registry, calls) = registry_with(MockClass::new("mock"));
    let warnings = Warnings::default();
    let _guard =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(warnings.clone()));

    let result = FetchTickerTool
        .call(
            &registry,
            json!({
                "exchange_id": "mock",
                "symbol": "ETH/USDT",
                "apiKey": "key",
                "sandboxMode": true
            }),
        )
        .await;

    assert_eq!(result["ticker_data"]["symbol"], "ETH/USDT");
    let config = calls.config();
    assert!(config.urls.is_none());
    assert!(config.options.is_empty());
    assert_eq!(config.api_key.as_deref(), Some("key"));
    assert!(config.secret.is_none());
    assert!(config.enable_rate_limit);
    assert!(!calls.sandbox.load(Ordering::SeqCst));

    let warnings = warnings.messages();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("mock may not support enabling sandbox mode"));
}

#[tokio::test]
async fn test_errors_are_tagged_and_client_released_once() {
    let cases = [
        (Behavior::NetworkError, "Network error: connection reset"),
        (
            Behavior::ExchangeError,
            "Exchange error: invalid order: insufficient balance",
        ),
        (
            Behavior::OtherError,
            "Unexpected error while creating order: unexpected state",
        ),
    ];

    for (behavior, expected) in cases {
        let mut class = MockClass::new("mock");
        class.behavior = behavior;
        let (registry, calls) = registry_with(class);

        let (tool, args) = all_tool_calls("mock").remove(2);
        let result = tool.call(&registry, args).await;
        assert_eq!(result["error"].as_str(), Some(expected));
        assert_eq!(calls.requests.load(Ordering::SeqCst), 1);
        assert_eq!(calls.closes(), 1);
    }
}

#[tokio::test]
async fn test_close_failure_is_swallowed() {
    let mut class = MockClass::new("mock");
    class.fail_close = true;
    let (registry, calls) = registry_with(class);

    let result = FetchOhlcvTool
        .call(
            &registry,
            json!({ "exchange_id": "mock", "symbol": "BTC/USDT", "since": 1700000000000i64 }),
        )
        .await;

    assert_eq!(result["ohlcv_data"][0][0], json!(1700000000000i64));
    assert_eq!(calls.closes(), 1);
}

#[tokio::test]
async fn test_create_order_passes_parameters_through() {
    let (registry, _) = registry_with(MockClass::new("mock"));

    let result = CreateOrderTool
        .call(
            &registry,
            json!({
                "exchange_id": "mock",
                "symbol": "BTC/USDT",
                "type": "market",
                "side": "sell",
                "amount": 2,
                "params": { "stopPrice": 60000 }
            }),
        )
        .await;

    let order = &result["order_info"];
    assert_eq!(order["type"], "market");
    assert_eq!(order["amount"], json!(2.0));
    assert_eq!(order["price"], Value::Null);
    assert_eq!(order["params"]["stopPrice"], 60000);
}

#[tokio::test]
async fn test_invalid_arguments_yield_error_record() {
    let (registry, calls) = registry_with(MockClass::new("mock"));

    let result = CreateOrderTool
        .call(
            &registry,
            json!({ "exchange_id": "mock", "symbol": "BTC/USDT", "side": "buy", "amount": "lots" }),
        )
        .await;

    let error = result["error"].as_str().unwrap();
    assert!(error.starts_with("Invalid arguments for create_order"), "{}", error);
    assert_eq!(calls.built.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_kraken_reports_missing_order_capability() {
    let registry = ExchangeRegistry::builtin();
    let (tool, args) = all_tool_calls("kraken").remove(2);

    let result = tool.call(&registry, args).await;
    assert_eq!(
        result["error"].as_str(),
        Some("Exchange 'kraken' does not support createOrder.")
    );
}

#[tokio::test]
async fn test_builtin_exchange_info_in_sandbox() {
    let registry = ExchangeRegistry::builtin();

    let result = GetExchangeInfoTool
        .call(
            &registry,
            json!({ "exchange_id": "binance", "sandboxMode": true }),
        )
        .await;

    let info = &result["exchange_info"];
    assert_eq!(info["id"], "binance");
    assert_eq!(info["sandbox"], true);
    assert_eq!(info["has"]["fetchOHLCV"], true);
}

async fn post_mcp(server: Arc<McpServer>, body: Value) -> (StatusCode, Option<Value>) {
    post_raw(server, Some("application/json"), &body.to_string()).await
}

async fn post_raw(
    server: Arc<McpServer>,
    content_type: Option<&str>,
    body: &str,
) -> (StatusCode, Option<Value>) {
    let mut request = Request::builder().method("POST").uri("/mcp");
    if let Some(content_type) = content_type {
        request = request.header("content-type", content_type);
    }
    let response = build_router(server)
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).ok())
}

#[tokio::test]
async fn test_http_tools_call_round_trip() {
    let (registry, calls) = registry_with(MockClass::new("mock"));
    let server = Arc::new(McpServer::new(registry));

    let (status, body) = post_mcp(
        server,
        json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {
                "name": "fetch_ticker",
                "arguments": { "exchange_id": "mock", "symbol": "BTC/USDT" }
            }
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let body = body.unwrap();
    assert_eq!(body["id"], 7);
    assert_eq!(body["result"]["isError"], false);
    assert_eq!(body["result"]["data"]["ticker_data"]["last"], 100.5);
    assert_eq!(body["result"]["content"][0]["type"], "text");
    assert_eq!(calls.closes(), 1);
}

#[tokio::test]
async fn test_http_notifications_and_bad_requests() {
    let server = Arc::new(McpServer::new(ExchangeRegistry::empty()));

    let (status, _) = post_mcp(
        server.clone(),
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = post_mcp(server.clone(), json!({ "hello": "world" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.unwrap()["error"]["code"], -32600);

    let (status, body) = post_raw(server.clone(), Some("application/json"), "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body = body.unwrap();
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["error"]["code"], -32700);

    let (status, body) = post_raw(
        server.clone(),
        None,
        r#"{"jsonrpc":"2.0","id":"p1","method":"ping"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = body.unwrap();
    assert_eq!(body["id"], "p1");
    assert_eq!(body["result"], json!({}));

    let response = build_router(server)
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
#[ignore = "requires network access to api.binance.com"]
async fn test_live_binance_ticker() {
    let registry = ExchangeRegistry::builtin();

    let result = FetchTickerTool
        .call(
            &registry,
            json!({ "exchange_id": "binance", "symbol": "BTC/USDT" }),
        )
        .await;
    println!("BTC/USDT ticker: {}", result);
    assert!(result["ticker_data"]["last"].as_f64().is_some());
}

#[tokio::test]
#[ignore = "requires network access to api.kraken.com"]
async fn test_live_kraken_ohlcv() {
    let registry = ExchangeRegistry::builtin();

    let result = FetchOhlcvTool
        .call(
            &registry,
            json!({ "exchange_id": "kraken", "symbol": "BTC/USD", "timeframe": "1h", "limit": 5 }),
        )
        .await;
    println!("BTC/USD candles: {}", result);
    assert_eq!(result["ohlcv_data"].as_array().map(Vec::len), Some(5));
}
