//! End-to-end tests for the chat pipeline.
//!
//! An in-memory MCP server stands in for the tool-provider process and a
//! scripted provider stands in for the LLM; everything between them (MCP
//! client, tool discovery, agent loop, memory, console) is the real thing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use mcpchat_agent::AgentExecutor;
use mcpchat_console::{SessionStats, run_session};
use mcpchat_core::error::ProviderError;
use mcpchat_core::message::{Message, MessageToolCall, Role};
use mcpchat_core::provider::{Provider, ProviderRequest, ProviderResponse};
use mcpchat_memory::ConversationWindow;
use mcpchat_tools::{McpClient, discover_tools};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex, split};

// ── Fake MCP server ──────────────────────────────────────────────────────

/// Serves a release-controller-like tool set until the client disconnects.
/// Returns the client side plus a log of `tools/call` requests.
fn start_mcp_server() -> (McpClient, Arc<Mutex<Vec<Value>>>) {
    let (client_io, server_io) = duplex(64 * 1024);
    let (client_read, client_write) = split(client_io);
    let (server_read, mut server_write) = split(server_io);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&calls);

    tokio::spawn(async move {
        let mut lines = BufReader::new(server_read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let req: Value = serde_json::from_str(&line).unwrap();
            let result = match req["method"].as_str() {
                Some("initialize") => json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "fake-release-controller", "version": "1.0.0"}
                }),
                Some("tools/list") => json!({"tools": [
                    {
                        "name": "get_latest_release",
                        "description": "Latest accepted release for a stream",
                        "inputSchema": {
                            "type": "object",
                            "properties": {"stream": {"type": "string"}},
                            "required": ["stream"]
                        }
                    },
                    {"name": "list_streams", "description": "All release streams"}
                ]}),
                Some("tools/call") => {
                    log.lock().unwrap().push(req["params"].clone());
                    match req["params"]["name"].as_str() {
                        Some("get_latest_release") => json!({
                            "content": [{"type": "text", "text": "4.16.1"}]
                        }),
                        _ => json!({
                            "content": [{"type": "text", "text": "4-stable\n4-dev-preview"}]
                        }),
                    }
                }
                // Notifications get no reply.
                _ => continue,
            };
            let mut out = json!({"jsonrpc": "2.0", "id": req["id"], "result": result}).to_string();
            out.push('\n');
            if server_write.write_all(out.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    (McpClient::connect(client_read, client_write), calls)
}

// ── Scripted provider ────────────────────────────────────────────────────

struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(answer("(script exhausted)")))
    }
}

fn answer(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: None,
        model: "e2e-model".into(),
    }
}

fn tool_call(id: &str, name: &str, arguments: Value) -> ProviderResponse {
    let mut response = answer("");
    response.message.tool_calls.push(MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.to_string(),
    });
    response
}

async fn connected_agent(
    provider: Arc<ScriptedProvider>,
    window: usize,
) -> (AgentExecutor, Arc<McpClient>, Arc<Mutex<Vec<Value>>>) {
    let (client, calls) = start_mcp_server();
    let client = Arc::new(client);
    let info = client.initialize().await.unwrap();
    assert_eq!(info.server_info.name, "fake-release-controller");

    let tools = discover_tools(Arc::clone(&client)).await.unwrap();
    let agent = AgentExecutor::new(
        provider,
        "e2e-model",
        0.0,
        Arc::new(tools),
        Arc::new(ConversationWindow::new(window)),
    );
    (agent, client, calls)
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn discovered_tools_are_offered_to_the_model() {
    let provider = ScriptedProvider::new(vec![Ok(answer("Hi there."))]);
    let (agent, client, _) = connected_agent(provider.clone(), 6).await;

    agent.run("hello").await.unwrap();

    let names: Vec<String> = provider.requests()[0]
        .tools
        .iter()
        .map(|t| t.name.clone())
        .collect();
    assert_eq!(names, vec!["get_latest_release", "list_streams"]);
    client.close().await.unwrap();
}

#[tokio::test]
async fn tool_round_trip_through_mcp() {
    let provider = ScriptedProvider::new(vec![
        Ok(tool_call(
            "call_1",
            "get_latest_release",
            json!({"stream": "4-stable"}),
        )),
        Ok(answer("The latest 4-stable release is 4.16.1.")),
    ]);
    let (agent, client, calls) = connected_agent(provider.clone(), 6).await;

    let outcome = agent.run_detailed("What is the latest 4-stable release?").await.unwrap();
    assert_eq!(outcome.answer, "The latest 4-stable release is 4.16.1.");
    assert_eq!(outcome.steps.len(), 1);
    assert_eq!(outcome.steps[0].observation, "4.16.1");

    let recorded = calls.lock().unwrap().clone();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0]["name"], "get_latest_release");
    assert_eq!(recorded[0]["arguments"]["stream"], "4-stable");

    let second = &provider.requests()[1];
    let last = second.messages.last().unwrap();
    assert_eq!(last.role, Role::Tool);
    assert_eq!(last.content, "4.16.1");
    client.close().await.unwrap();
}

#[tokio::test]
async fn console_session_end_to_end() {
    let provider = ScriptedProvider::new(vec![
        Ok(tool_call("call_1", "list_streams", json!({}))),
        Ok(answer("There are two streams: 4-stable and 4-dev-preview.")),
        Err(ProviderError::MalformedOutput("list_streams(".into())),
        Ok(answer("You asked about streams.")),
    ]);
    let (agent, client, _) = connected_agent(provider.clone(), 6).await;

    let input = "Which streams exist?\n\nthis one breaks\nWhat did I ask first?\nexit\n";
    let mut output = Vec::new();
    let stats = run_session(&agent, input.as_bytes(), &mut output).await.unwrap();
    let transcript = String::from_utf8(output).unwrap();

    assert_eq!(stats, SessionStats { turns: 2, errors: 1 });
    assert_eq!(
        transcript,
        "\nYou: Agent: There are two streams: 4-stable and 4-dev-preview.\n\
         \nYou: \
         \nYou: Agent: list_streams(\n\
         \nYou: Agent: You asked about streams.\n\
         \nYou: Agent: Goodbye!\n"
    );

    // The failed turn was not remembered; the window holds turns 1 and 3.
    let last_request = provider.requests().pop().unwrap();
    let remembered: Vec<&str> = last_request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(
        remembered,
        vec![
            "Which streams exist?",
            "There are two streams: 4-stable and 4-dev-preview.",
            "What did I ask first?",
        ]
    );
    client.close().await.unwrap();
}

#[tokio::test]
async fn window_limits_context() {
    let provider = ScriptedProvider::new(vec![
        Ok(answer("a1")),
        Ok(answer("a2")),
        Ok(answer("a3")),
    ]);
    let (agent, client, _) = connected_agent(provider.clone(), 1).await;

    for q in ["q1", "q2", "q3"] {
        agent.run(q).await.unwrap();
    }

    let contents: Vec<String> = provider.requests()[2]
        .messages
        .iter()
        .skip(1)
        .map(|m| m.content.clone())
        .collect();
    assert_eq!(contents, vec!["q2", "a2", "q3"]);
    client.close().await.unwrap();
}

#[tokio::test]
async fn closed_server_turns_tool_calls_into_error_observations() {
    let provider = ScriptedProvider::new(vec![
        Ok(tool_call("call_1", "list_streams", json!({}))),
        Ok(answer("The tool server is unavailable.")),
    ]);
    let (agent, client, _) = connected_agent(provider, 6).await;
    client.close().await.unwrap();

    let outcome = agent.run_detailed("Which streams exist?").await.unwrap();
    assert!(!outcome.steps[0].success);
    assert!(outcome.steps[0].observation.starts_with("Error: "));
    assert!(outcome.steps[0].observation.contains("closed"));
}
