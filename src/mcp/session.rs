//! Tool-server sessions and the stdio launcher.
//!
//! A [`ToolSession`] is one live, handshaken connection. A
//! [`ToolServerLauncher`] turns a [`ServerConfig`] into a session; the
//! production launcher spawns the configured command and speaks MCP over
//! its stdin/stdout via `rmcp`.

use std::future::Future;
use std::process::Stdio;

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, CallToolResult, ClientInfo, Content, JsonObject, ProtocolVersion};
use rmcp::service::{ClientInitializeError, DynService, RoleClient, RunningService, ServiceError, ServiceExt};
use rmcp::transport::TokioChildProcess;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::error::AgentError;
use crate::types::ToolSchema;

pub type DynClientService = Box<dyn DynService<RoleClient>>;
pub type McpRunningService = RunningService<RoleClient, DynClientService>;

/// One segment of a tool result, independent of the protocol library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolContent {
    Text(String),
    Image { mime_type: String },
    /// Resource, audio or any other segment kind, rendered as nothing.
    Other { kind: String },
}

/// Everything a tool call returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallOutput {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

impl ToolCallOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text(text.into())],
            is_error: false,
        }
    }

    /// Render as the plain text handed back to the model.
    ///
    /// Text segments are joined with newlines and images become
    /// `[Image: <mime>]`. An empty rendering reads `Tool executed successfully`.
    pub fn render(&self) -> String {
        let lines: Vec<String> = self
            .content
            .iter()
            .filter_map(|segment| match segment {
                ToolContent::Text(text) => Some(text.clone()),
                ToolContent::Image { mime_type } => Some(format!("[Image: {mime_type}]")),
                ToolContent::Other { .. } => None,
            })
            .collect();

        let body = lines.join("\n");
        match (self.is_error, body.is_empty()) {
            (true, true) => "Error: tool reported a failure".to_string(),
            (true, false) => format!("Error: {body}"),
            (false, true) => "Tool executed successfully".to_string(),
            (false, false) => body,
        }
    }
}

/// A live connection to one tool server.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Fetch the server's full tool catalog.
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, AgentError>;

    /// Invoke a tool by its local name.
    async fn call_tool(&self, name: &str, arguments: JsonObject) -> Result<ToolCallOutput, AgentError>;

    /// Tear down the connection. Calling it twice is a no-op.
    async fn close(&mut self) -> Result<(), AgentError>;
}

/// Creates sessions from server configs.
#[async_trait]
pub trait ToolServerLauncher: Send + Sync {
    async fn launch(&self, config: &ServerConfig) -> Result<Box<dyn ToolSession>, AgentError>;
}

/// Spawns tool servers as child processes speaking MCP over stdio.
///
/// The child's stderr is discarded so server chatter never lands on the
/// terminal. A server that rejects the current protocol version is spawned a
/// second time and offered `2024-11-05`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioLauncher;

#[async_trait]
impl ToolServerLauncher for StdioLauncher {
    async fn launch(&self, config: &ServerConfig) -> Result<Box<dyn ToolSession>, AgentError> {
        let service = connect_with_protocol_fallback(|protocol_version| serve_stdio(config, protocol_version))
            .await
            .map_err(|e| match e {
                ConnectError::Spawn(e) => AgentError::connection(
                    &config.name,
                    format!("failed to spawn '{}': {e}", config.command),
                ),
                ConnectError::Handshake(e) => {
                    AgentError::connection(&config.name, format!("handshake failed: {e}"))
                }
            })?;

        debug!(server = %config.name, "tool server handshake complete");

        Ok(Box::new(RmcpSession {
            server: config.name.clone(),
            service: Some(service),
        }))
    }
}

#[derive(Debug)]
enum ConnectError {
    Spawn(std::io::Error),
    Handshake(ClientInitializeError),
}

async fn serve_stdio(
    config: &ServerConfig,
    protocol_version: ProtocolVersion,
) -> Result<McpRunningService, ConnectError> {
    let mut command = Command::new(&config.command);
    command.args(&config.args).envs(&config.env);

    let (transport, _stderr) = TokioChildProcess::builder(command)
        .stderr(Stdio::null())
        .spawn()
        .map_err(ConnectError::Spawn)?;

    let client_info = ClientInfo {
        protocol_version,
        ..Default::default()
    };
    client_info
        .into_dyn()
        .serve(transport)
        .await
        .map_err(ConnectError::Handshake)
}

/// Handshake with the latest protocol version, retrying once with
/// `2024-11-05` when the server rejects the version.
///
/// `connect` must start from a fresh transport on every call.
async fn connect_with_protocol_fallback<F, Fut>(mut connect: F) -> Result<McpRunningService, ConnectError>
where
    F: FnMut(ProtocolVersion) -> Fut,
    Fut: Future<Output = Result<McpRunningService, ConnectError>>,
{
    match connect(ProtocolVersion::LATEST).await {
        Ok(service) => Ok(service),
        Err(error) if should_retry_protocol_fallback(&error) => {
            warn!(error = ?error, "protocol version rejected, retrying with 2024-11-05");
            drop(error);
            connect(ProtocolVersion::V_2024_11_05).await
        }
        Err(error) => Err(error),
    }
}

fn should_retry_protocol_fallback(error: &ConnectError) -> bool {
    match error {
        ConnectError::Handshake(ClientInitializeError::JsonRpcError(error)) => {
            let message = error.message.to_ascii_lowercase();
            message.contains("protocol") && message.contains("version")
        }
        _ => false,
    }
}

struct RmcpSession {
    server: String,
    service: Option<McpRunningService>,
}

impl RmcpSession {
    fn service(&self) -> Result<&McpRunningService, AgentError> {
        self.service
            .as_ref()
            .ok_or_else(|| AgentError::connection(&self.server, "session is closed"))
    }
}

#[async_trait]
impl ToolSession for RmcpSession {
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, AgentError> {
        let service = self.service()?;
        let tools = match service.list_all_tools().await {
            Ok(tools) => tools,
            Err(ServiceError::UnexpectedResponse) => service
                .list_tools(None)
                .await
                .map(|page| page.tools)
                .map_err(|e| map_service_error(&self.server, "list_tools", e))?,
            Err(e) => return Err(map_service_error(&self.server, "list_tools", e)),
        };

        Ok(tools
            .into_iter()
            .map(|tool| {
                ToolSchema::new(
                    tool.name.to_string(),
                    tool.description.map(|d| d.to_string()).unwrap_or_default(),
                    serde_json::Value::Object((*tool.input_schema).clone()),
                )
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: JsonObject) -> Result<ToolCallOutput, AgentError> {
        let result = self
            .service()?
            .call_tool(CallToolRequestParams {
                meta: None,
                name: name.to_owned().into(),
                arguments: Some(arguments),
                task: None,
            })
            .await
            .map_err(|e| AgentError::ToolExecution {
                tool_name: name.to_string(),
                message: map_service_error(&self.server, "call_tool", e).to_string(),
            })?;

        Ok(map_call_result(result))
    }

    async fn close(&mut self) -> Result<(), AgentError> {
        if let Some(service) = self.service.take() {
            service
                .cancel()
                .await
                .map_err(|e| AgentError::connection(&self.server, format!("shutdown failed: {e}")))?;
        }
        Ok(())
    }
}

fn map_call_result(result: CallToolResult) -> ToolCallOutput {
    ToolCallOutput {
        content: result.content.iter().map(map_content).collect(),
        is_error: result.is_error.unwrap_or(false),
    }
}

fn map_content(item: &Content) -> ToolContent {
    if let Some(text) = item.as_text() {
        return ToolContent::Text(text.text.clone());
    }
    if let Some(image) = item.as_image() {
        return ToolContent::Image {
            mime_type: image.mime_type.clone(),
        };
    }
    let kind = serde_json::to_value(item)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());
    ToolContent::Other { kind }
}

fn map_service_error(server: &str, context: &str, error: ServiceError) -> AgentError {
    let message = match error {
        ServiceError::McpError(error) => {
            format!("{context}: MCP error {}: {}", error.code.0, error.message)
        }
        ServiceError::TransportClosed => format!("{context}: transport closed"),
        other => format!("{context}: {other}"),
    };
    AgentError::connection(server, message)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;
    use rmcp::model::{ErrorData, ServerJsonRpcMessage};
    use rmcp::service::{serve_directly, RxJsonRpcMessage, TxJsonRpcMessage};
    use rmcp::transport::Transport as RmcpTransport;
    use serde_json::{json, Value};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

    use super::*;

    struct ChannelTransport {
        outbound: UnboundedSender<TxJsonRpcMessage<RoleClient>>,
        inbound: UnboundedReceiver<RxJsonRpcMessage<RoleClient>>,
    }

    impl RmcpTransport<RoleClient> for ChannelTransport {
        type Error = io::Error;

        fn send(
            &mut self,
            item: TxJsonRpcMessage<RoleClient>,
        ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static {
            let tx = self.outbound.clone();
            async move {
                tx.send(item)
                    .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"))
            }
        }

        async fn receive(&mut self) -> Option<RxJsonRpcMessage<RoleClient>> {
            self.inbound.recv().await
        }

        fn close(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send {
            self.inbound.close();
            std::future::ready(Ok(()))
        }
    }

    /// A running client whose server answers each request with
    /// `respond(method, params)`. `None` leaves the request unanswered.
    fn scripted_service<F>(mut respond: F) -> McpRunningService
    where
        F: FnMut(&str, &Value) -> Option<Value> + Send + 'static,
    {
        let (outbound_tx, mut outbound_rx) = unbounded_channel::<TxJsonRpcMessage<RoleClient>>();
        let (inbound_tx, inbound_rx) = unbounded_channel::<RxJsonRpcMessage<RoleClient>>();

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let Ok(value) = serde_json::to_value(message) else {
                    continue;
                };
                let Some(method) = value.get("method").and_then(|m| m.as_str()) else {
                    continue;
                };
                let params = value.get("params").cloned().unwrap_or(Value::Null);
                let Some(result) = respond(method, &params) else {
                    continue;
                };
                let id = value.get("id").cloned().unwrap_or(Value::Null);
                let reply: ServerJsonRpcMessage =
                    serde_json::from_value(json!({"jsonrpc": "2.0", "id": id, "result": result}))
                        .expect("scripted reply should deserialize");
                let _ = inbound_tx.send(reply);
            }
        });

        let transport = ChannelTransport {
            outbound: outbound_tx,
            inbound: inbound_rx,
        };
        serve_directly(().into_dyn(), transport, None)
    }

    fn session(service: McpRunningService) -> RmcpSession {
        RmcpSession {
            server: "calc".into(),
            service: Some(service),
        }
    }

    fn call_result(content: Value, is_error: bool) -> impl FnMut(&str, &Value) -> Option<Value> + Send + 'static {
        move |method: &str, _: &Value| {
            (method == "tools/call").then(|| json!({"content": content.clone(), "isError": is_error}))
        }
    }

    #[tokio::test]
    async fn list_tools_follows_every_page() {
        let session = session(scripted_service(|method, params| {
            if method != "tools/list" {
                return None;
            }
            if params.get("cursor").and_then(|c| c.as_str()) == Some("page-2") {
                return Some(json!({
                    "tools": [{"name": "sub", "inputSchema": {"type": "object"}}],
                    "nextCursor": null
                }));
            }
            Some(json!({
                "tools": [{
                    "name": "add",
                    "description": "Add two numbers",
                    "inputSchema": {"type": "object", "properties": {"a": {"type": "number"}}}
                }],
                "nextCursor": "page-2"
            }))
        }));

        let tools = session.list_tools().await.unwrap();

        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["add", "sub"]);
        assert_eq!(tools[0].description, "Add two numbers");
        assert_eq!(tools[0].parameters["properties"]["a"]["type"], "number");
        assert_eq!(tools[1].description, "");
    }

    #[tokio::test]
    async fn call_tool_sends_arguments_and_maps_segments() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();
        let session = session(scripted_service(move |method, params| {
            if method != "tools/call" {
                return None;
            }
            recorded.lock().unwrap().push(params.clone());
            Some(json!({
                "content": [
                    {"type": "text", "text": "sum is 3"},
                    {"type": "image", "data": "aGk=", "mimeType": "image/png"},
                    {"type": "resource", "resource": {"uri": "file:///tmp/a", "text": "x"}}
                ],
                "isError": false
            }))
        }));

        let mut arguments = JsonObject::new();
        arguments.insert("a".into(), json!(1));
        arguments.insert("b".into(), json!(2));
        let output = session.call_tool("add", arguments).await.unwrap();

        assert_eq!(
            output.content,
            vec![
                ToolContent::Text("sum is 3".into()),
                ToolContent::Image {
                    mime_type: "image/png".into()
                },
                ToolContent::Other {
                    kind: "resource".into()
                },
            ]
        );
        assert_eq!(output.render(), "sum is 3\n[Image: image/png]");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0]["name"], "add");
        assert_eq!(seen[0]["arguments"], json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn error_result_renders_with_error_prefix() {
        let session = session(scripted_service(call_result(
            json!([{"type": "text", "text": "division by zero"}]),
            true,
        )));

        let output = session.call_tool("div", JsonObject::new()).await.unwrap();

        assert!(output.is_error);
        assert_eq!(output.render(), "Error: division by zero");
    }

    #[tokio::test]
    async fn empty_result_reads_as_success() {
        let session = session(scripted_service(call_result(json!([]), false)));
        let output = session.call_tool("noop", JsonObject::new()).await.unwrap();
        assert_eq!(output.render(), "Tool executed successfully");
    }

    #[tokio::test]
    async fn closed_session_rejects_calls() {
        let mut session = session(scripted_service(|_, _| None));
        session.close().await.unwrap();
        session.close().await.unwrap();

        let err = session.list_tools().await.unwrap_err();
        assert!(matches!(err, AgentError::Connection { ref server, .. } if server == "calc"));
        let err = session.call_tool("add", JsonObject::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::Connection { .. }));
    }

    type ScriptedConnect = Result<McpRunningService, ConnectError>;

    async fn run_fallback(results: Vec<ScriptedConnect>) -> (ScriptedConnect, Vec<ProtocolVersion>) {
        let mut results = VecDeque::from(results);
        let mut attempted = Vec::new();
        let outcome = connect_with_protocol_fallback(|version| {
            attempted.push(version);
            let next = results
                .pop_front()
                .unwrap_or_else(|| Err(ConnectError::Handshake(ClientInitializeError::Cancelled)));
            async move { next }
        })
        .await;
        (outcome, attempted)
    }

    #[tokio::test]
    async fn rejected_protocol_version_retries_with_older_version() {
        let (outcome, attempted) = run_fallback(vec![
            Err(ConnectError::Handshake(ClientInitializeError::JsonRpcError(
                ErrorData::invalid_request("Unsupported protocol Version", None),
            ))),
            Ok(scripted_service(|_, _| None)),
        ])
        .await;

        assert!(outcome.is_ok());
        assert_eq!(
            attempted,
            vec![ProtocolVersion::LATEST, ProtocolVersion::V_2024_11_05]
        );
    }

    #[tokio::test]
    async fn unrelated_handshake_error_is_not_retried() {
        let (outcome, attempted) = run_fallback(vec![Err(ConnectError::Handshake(
            ClientInitializeError::JsonRpcError(ErrorData::internal_error("server crashed", None)),
        ))])
        .await;

        assert!(matches!(outcome, Err(ConnectError::Handshake(_))));
        assert_eq!(attempted, vec![ProtocolVersion::LATEST]);
    }

    #[tokio::test]
    async fn spawn_failure_is_not_retried() {
        let (outcome, attempted) = run_fallback(vec![Err(ConnectError::Spawn(io::Error::new(
            io::ErrorKind::NotFound,
            "no such file",
        )))])
        .await;

        assert!(matches!(outcome, Err(ConnectError::Spawn(_))));
        assert_eq!(attempted.len(), 1);
    }

    #[test]
    fn render_joins_text_and_image_placeholders() {
        let output = ToolCallOutput {
            content: vec![
                ToolContent::Text("line one".into()),
                ToolContent::Image {
                    mime_type: "image/png".into(),
                },
                ToolContent::Other {
                    kind: "resource".into(),
                },
                ToolContent::Text("line two".into()),
            ],
            is_error: false,
        };
        assert_eq!(output.render(), "line one\n[Image: image/png]\nline two");
    }

    #[test]
    fn empty_output_reads_as_success() {
        assert_eq!(ToolCallOutput::default().render(), "Tool executed successfully");
    }

    #[test]
    fn error_flag_prefixes_text() {
        let output = ToolCallOutput {
            content: vec![ToolContent::Text("division by zero".into())],
            is_error: true,
        };
        assert_eq!(output.render(), "Error: division by zero");
    }

    #[tokio::test]
    async fn launching_missing_binary_is_a_connection_error() {
        let config = ServerConfig::new("ghost", "toolbridge-definitely-missing-binary");
        let err = match StdioLauncher.launch(&config).await {
            Ok(_) => panic!("launch should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, AgentError::Connection { ref server, .. } if server == "ghost"));
    }
}
