use crate::exchange::ExchangeRegistry;
use crate::tools::{
    balance::FetchBalanceTool, exchange_info::GetExchangeInfoTool, ohlcv::FetchOhlcvTool,
    order::CreateOrderTool, ticker::FetchTickerTool, Tool,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

pub const PROTOCOL_VERSION: &str = "2025-03-26";
pub const SERVER_NAME: &str = "Exchange Trading MCP";

#[derive(Serialize, Deserialize, Debug)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Value>,
    pub id: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }
}

/// Tool registrations plus the exchange registry they run against.
pub struct McpServer {
    tools: BTreeMap<String, Box<dyn Tool>>,
    exchanges: ExchangeRegistry,
}

impl McpServer {
    pub fn new(exchanges: ExchangeRegistry) -> Self {
        let mut tools: BTreeMap<String, Box<dyn Tool>> = BTreeMap::new();

        // Register tools
        let registered: [Box<dyn Tool>; 5] = [
            Box::new(GetExchangeInfoTool),
            Box::new(FetchTickerTool),
            Box::new(CreateOrderTool),
            Box::new(FetchBalanceTool),
            Box::new(FetchOhlcvTool),
        ];
        for tool in registered {
            tools.insert(tool.name().to_string(), tool);
        }
        info!(
            tools = ?tools.keys().collect::<Vec<_>>(),
            exchanges = ?exchanges.ids().collect::<Vec<_>>(),
            "Tools registered"
        );

        Self { tools, exchanges }
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Returns `None` for notifications, which get no reply.
    pub async fn handle_request(&self, req: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        if req.method.starts_with("notifications/") {
            debug!("Received notification: {}", req.method);
            return None;
        }

        let response = match req.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                req.id.clone(),
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": {
                        "name": SERVER_NAME,
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            ),
            "ping" => JsonRpcResponse::success(req.id.clone(), json!({})),
            "tools/list" => {
                let tool_list: Vec<Value> = self
                    .tools
                    .values()
                    .map(|t| {
                        json!({
                            "name": t.name(),
                            "description": t.description(),
                            "inputSchema": t.schema(),
                            "outputSchema": t.output_schema()
                        })
                    })
                    .collect();

                JsonRpcResponse::success(req.id.clone(), json!({ "tools": tool_list }))
            }
            "tools/call" => self.call_tool(req).await,
            _ => JsonRpcResponse::failure(req.id.clone(), -32601, "Method not found"),
        };

        Some(response)
    }

    async fn call_tool(&self, req: &JsonRpcRequest) -> JsonRpcResponse {
        let Some(params) = &req.params else {
            return JsonRpcResponse::failure(req.id.clone(), -32602, "Missing params");
        };
        let Some(tool_name) = params.get("name").and_then(|v| v.as_str()) else {
            return JsonRpcResponse::failure(req.id.clone(), -32602, "Missing 'name' parameter");
        };
        let Some(tool) = self.tools.get(tool_name) else {
            return JsonRpcResponse::failure(
                req.id.clone(),
                -32601,
                format!("Tool not found: {}", tool_name),
            );
        };

        let args = params.get("arguments").cloned().unwrap_or(json!({}));
        debug!(tool = tool_name, "Calling tool");
        let record = tool.call(&self.exchanges, args).await;
        let is_error = record.get("error").is_some();

        // Standard MCP 'content' for compatibility, plus the raw record for agents.
        JsonRpcResponse::success(
            req.id.clone(),
            json!({
                "content": [{
                    "type": "text",
                    "text": serde_json::to_string_pretty(&record).unwrap_or_else(|_| record.to_string())
                }],
                "data": record,
                "isError": is_error
            }),
        )
    }
}

/// Newline-delimited JSON-RPC over stdin/stdout.
pub async fn run_stdio(server: &McpServer) -> Result<()> {
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();

    info!("MCP Server Ready. Waiting for JSON-RPC requests on stdin...");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        debug!("Received request: {}", line);

        let req: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                error!("Failed to parse JSON-RPC request: {}", e);
                continue;
            }
        };

        if let Some(response) = server.handle_request(&req).await {
            let mut response_str = serde_json::to_string(&response)?;
            response_str.push('\n');
            stdout.write_all(response_str.as_bytes()).await?;
            stdout.flush().await?;
        }
    }

    info!("stdin closed, shutting down");
    Ok(())
}
