//! The agent executor: one user turn in, one final answer out.

use crate::prompt::DEFAULT_SYSTEM_PROMPT;
use mcpchat_core::error::{AgentError, ProviderError};
use mcpchat_core::memory::ChatMemory;
use mcpchat_core::message::{Message, MessageToolCall};
use mcpchat_core::provider::{Provider, ProviderRequest, Usage};
use mcpchat_core::tool::{ToolCall, ToolRegistry};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One tool invocation made while producing an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStep {
    pub tool: String,
    pub arguments: String,
    pub observation: String,
    pub success: bool,
}

/// Everything a turn produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub answer: String,
    /// Model calls made, including the one that produced the answer
    pub iterations: u32,
    pub steps: Vec<AgentStep>,
    pub usage: Usage,
}

/// Runs the tool-calling loop against a provider, with a rolling memory.
pub struct AgentExecutor {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    tools: Arc<ToolRegistry>,
    memory: Arc<dyn ChatMemory>,
    system_prompt: String,
    max_iterations: u32,
}

impl AgentExecutor {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        temperature: f32,
        tools: Arc<ToolRegistry>,
        memory: Arc<dyn ChatMemory>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
            max_tokens: None,
            tools,
            memory,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_iterations: 20,
        }
    }

    /// Cap the number of model calls per turn.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Answer one user input.
    pub async fn run(&self, input: &str) -> Result<String, mcpchat_core::Error> {
        self.run_detailed(input).await.map(|outcome| outcome.answer)
    }

    /// Answer one user input, reporting the tool steps taken along the way.
    ///
    /// The turn is remembered only when it produces an answer.
    pub async fn run_detailed(&self, input: &str) -> Result<RunOutcome, mcpchat_core::Error> {
        let history = self.memory.history().await?;
        info!(
            history = history.len(),
            tools = self.tools.len(),
            "Running agent turn"
        );

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(&self.system_prompt));
        messages.extend(history);
        messages.push(Message::user(input));

        let tool_definitions = self.tools.definitions();
        let mut steps = Vec::new();
        let mut usage = Usage::default();

        for iteration in 1..=self.max_iterations {
            debug!(iteration, "Agent loop iteration");

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: tool_definitions.clone(),
                stop: vec![],
            };

            let response = match self.provider.complete(request).await {
                Ok(response) => response,
                Err(ProviderError::MalformedOutput(raw)) => {
                    warn!(iteration, "Model output could not be parsed");
                    return Err(AgentError::UnparseableOutput(raw).into());
                }
                Err(e) => return Err(e.into()),
            };

            if let Some(u) = response.usage {
                usage.prompt_tokens += u.prompt_tokens;
                usage.completion_tokens += u.completion_tokens;
                usage.total_tokens += u.total_tokens;
            }

            if !response.message.has_tool_calls() {
                let answer = response.message.content.trim().to_string();
                if answer.is_empty() {
                    return Err(AgentError::EmptyResponse.into());
                }

                if let Err(e) = self.memory.save_turn(input, &answer).await {
                    warn!(memory = %self.memory.name(), error = %e, "Failed to remember turn");
                }

                info!(
                    iterations = iteration,
                    tool_calls = steps.len(),
                    tokens = usage.total_tokens,
                    "Agent produced final answer"
                );
                return Ok(RunOutcome {
                    answer,
                    iterations: iteration,
                    steps,
                    usage,
                });
            }

            let tool_calls = response.message.tool_calls.clone();
            messages.push(response.message);

            for tc in &tool_calls {
                let step = self.observe(tc).await;
                messages.push(Message::tool_result(&tc.id, &step.observation));
                steps.push(step);
            }
        }

        warn!(
            max_iterations = self.max_iterations,
            "Agent did not finish within the iteration limit"
        );
        Err(AgentError::NotFinished {
            max_iterations: self.max_iterations,
        }
        .into())
    }

    /// Execute one requested call. Every failure becomes an observation the
    /// model can react to.
    async fn observe(&self, tc: &MessageToolCall) -> AgentStep {
        let step = |observation: String, success: bool| AgentStep {
            tool: tc.name.clone(),
            arguments: tc.arguments.clone(),
            observation,
            success,
        };

        let arguments = if tc.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(&tc.arguments) {
                Ok(args) => args,
                Err(e) => {
                    warn!(tool = %tc.name, error = %e, "Model sent invalid tool arguments");
                    return step(
                        format!("Error: invalid JSON arguments for tool '{}': {e}", tc.name),
                        false,
                    );
                }
            }
        };

        let call = ToolCall {
            id: tc.id.clone(),
            name: tc.name.clone(),
            arguments,
        };

        match self.tools.execute(&call).await {
            Ok(result) if result.success => {
                debug!(tool = %tc.name, bytes = result.output.len(), "Tool succeeded");
                step(result.output, true)
            }
            Ok(result) => {
                warn!(tool = %tc.name, "Tool reported an error");
                step(format!("Error: {}", result.output), false)
            }
            Err(e) => {
                warn!(tool = %tc.name, error = %e, "Tool execution failed");
                step(format!("Error: {e}"), false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcpchat_core::error::ToolError;
    use mcpchat_core::message::Role;
    use mcpchat_core::provider::ProviderResponse;
    use mcpchat_core::tool::{Tool, ToolResult};
    use mcpchat_memory::ConversationWindow;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted responses in order and records every request.
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

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            self.requests.lock().unwrap().push(request);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(text("script exhausted")))
        }
    }

    fn text(content: &str) -> ProviderResponse {
        ProviderResponse {
            message: Message::assistant(content),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "scripted-model".into(),
        }
    }

    fn call(id: &str, name: &str, arguments: &str) -> ProviderResponse {
        let mut response = text("");
        response.message.tool_calls.push(MessageToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        });
        response
    }

    struct LookupTool;

    #[async_trait]
    impl Tool for LookupTool {
        fn name(&self) -> &str {
            "latest_release"
        }
        fn description(&self) -> &str {
            "Latest accepted release in a stream"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "stream": { "type": "string" } },
                "required": ["stream"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
            match arguments["stream"].as_str() {
                Some("4-stable") => Ok(ToolResult {
                    call_id: String::new(),
                    success: true,
                    output: "4.16.1".into(),
                    data: None,
                }),
                Some(other) => Ok(ToolResult {
                    call_id: String::new(),
                    success: false,
                    output: format!("unknown stream {other}"),
                    data: None,
                }),
                None => Err(ToolError::InvalidArguments("missing stream".into())),
            }
        }
    }

    fn agent(
        provider: Arc<ScriptedProvider>,
        memory: Arc<ConversationWindow>,
    ) -> AgentExecutor {
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(LookupTool));
        AgentExecutor::new(provider, "scripted-model", 0.2, Arc::new(tools), memory)
    }

    #[tokio::test]
    async fn direct_answer_is_remembered() {
        let provider = ScriptedProvider::new(vec![Ok(text("  Hello!  "))]);
        let memory = Arc::new(ConversationWindow::new(6));
        let agent = agent(provider.clone(), memory.clone());

        let outcome = agent.run_detailed("hi").await.unwrap();
        assert_eq!(outcome.answer, "Hello!");
        assert_eq!(outcome.iterations, 1);
        assert!(outcome.steps.is_empty());
        assert_eq!(outcome.usage.total_tokens, 15);

        let request = &provider.requests()[0];
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[0].content, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(request.messages[1].content, "hi");
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.model, "scripted-model");

        assert_eq!(memory.len().await, 1);
    }

    #[tokio::test]
    async fn tool_call_then_answer() {
        let provider = ScriptedProvider::new(vec![
            Ok(call("call_1", "latest_release", r#"{"stream":"4-stable"}"#)),
            Ok(text("The latest 4-stable release is 4.16.1.")),
        ]);
        let memory = Arc::new(ConversationWindow::new(6));
        let agent = agent(provider.clone(), memory.clone());

        let outcome = agent.run_detailed("latest 4-stable?").await.unwrap();
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.usage.total_tokens, 30);
        assert_eq!(
            outcome.steps,
            vec![AgentStep {
                tool: "latest_release".into(),
                arguments: r#"{"stream":"4-stable"}"#.into(),
                observation: "4.16.1".into(),
                success: true,
            }]
        );

        // Second request carries the call and its observation.
        let second = &provider.requests()[1];
        let n = second.messages.len();
        assert!(second.messages[n - 2].has_tool_calls());
        assert_eq!(second.messages[n - 1].role, Role::Tool);
        assert_eq!(second.messages[n - 1].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(second.messages[n - 1].content, "4.16.1");

        // Only the final answer is remembered, not the scratchpad.
        let history = memory.history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "The latest 4-stable release is 4.16.1.");
    }

    #[tokio::test]
    async fn history_precedes_new_input() {
        let provider = ScriptedProvider::new(vec![Ok(text("first")), Ok(text("second"))]);
        let memory = Arc::new(ConversationWindow::new(6));
        let agent = agent(provider.clone(), memory);

        agent.run("one").await.unwrap();
        agent.run("two").await.unwrap();

        let contents: Vec<String> = provider.requests()[1]
            .messages
            .iter()
            .skip(1)
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(contents, vec!["one", "first", "two"]);
    }

    #[tokio::test]
    async fn tool_problems_are_observations() {
        let provider = ScriptedProvider::new(vec![
            Ok(call("c1", "no_such_tool", "{}")),
            Ok(call("c2", "latest_release", "{not json")),
            Ok(call("c3", "latest_release", r#"{"stream":"9-dev"}"#)),
            Ok(call("c4", "latest_release", "")),
            Ok(text("Sorry, I could not find it.")),
        ]);
        let agent = agent(provider, Arc::new(ConversationWindow::new(6)));

        let outcome = agent.run_detailed("find it").await.unwrap();
        assert_eq!(outcome.iterations, 5);
        assert!(outcome.steps.iter().all(|s| !s.success));
        assert!(outcome.steps.iter().all(|s| s.observation.starts_with("Error: ")));
        assert!(outcome.steps[0].observation.contains("no_such_tool"));
        assert!(outcome.steps[1].observation.contains("invalid JSON"));
        assert_eq!(outcome.steps[2].observation, "Error: unknown stream 9-dev");
        assert!(outcome.steps[3].observation.contains("missing stream"));
    }

    #[tokio::test]
    async fn iteration_limit_is_an_error() {
        let provider = ScriptedProvider::new(
            (0..5)
                .map(|i| Ok(call(&format!("c{i}"), "latest_release", r#"{"stream":"4-stable"}"#)))
                .collect(),
        );
        let memory = Arc::new(ConversationWindow::new(6));
        let agent = agent(provider.clone(), memory.clone()).with_max_iterations(3);

        let err = agent.run("loop forever").await.unwrap_err();
        assert!(matches!(
            err,
            mcpchat_core::Error::Agent(AgentError::NotFinished { max_iterations: 3 })
        ));
        assert_eq!(provider.requests().len(), 3);
        assert!(memory.is_empty().await);
    }

    #[tokio::test]
    async fn malformed_output_is_unparseable() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::MalformedOutput(
            "print(default_api.latest_release(".into(),
        ))]);
        let memory = Arc::new(ConversationWindow::new(6));
        let agent = agent(provider, memory.clone());

        let err = agent.run("hi").await.unwrap_err();
        match err {
            mcpchat_core::Error::Agent(AgentError::UnparseableOutput(raw)) => {
                assert_eq!(raw, "print(default_api.latest_release(")
            }
            other => panic!("expected UnparseableOutput, got {other:?}"),
        }
        assert!(memory.is_empty().await);
    }

    #[tokio::test]
    async fn provider_errors_propagate() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::RateLimited {
            retry_after_secs: 5,
        })]);
        let agent = agent(provider, Arc::new(ConversationWindow::new(6)));
        let err = agent.run("hi").await.unwrap_err();
        assert!(matches!(
            err,
            mcpchat_core::Error::Provider(ProviderError::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn blank_answer_is_empty_response() {
        let provider = ScriptedProvider::new(vec![Ok(text("   "))]);
        let agent = agent(provider, Arc::new(ConversationWindow::new(6)));
        let err = agent.run("hi").await.unwrap_err();
        assert!(matches!(
            err,
            mcpchat_core::Error::Agent(AgentError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn custom_system_prompt_and_max_tokens() {
        let provider = ScriptedProvider::new(vec![Ok(text("ok"))]);
        let agent = agent(provider.clone(), Arc::new(ConversationWindow::new(6)))
            .with_system_prompt("Answer in French.")
            .with_max_tokens(256);
        agent.run("hi").await.unwrap();

        let request = &provider.requests()[0];
        assert_eq!(request.messages[0].content, "Answer in French.");
        assert_eq!(request.max_tokens, Some(256));
        assert!((request.temperature - 0.2).abs() < f32::EPSILON);
    }
}
