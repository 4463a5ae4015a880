//! Google Gemini native provider.
//!
//! Talks to the Generative Language API `generateContent` endpoint directly.
//!
//! Features:
//! - `x-goog-api-key` header authentication
//! - System prompt as top-level `systemInstruction`
//! - Native function calling with `functionCall` / `functionResponse` parts
//! - Tool schemas reduced to the OpenAPI subset Gemini accepts
//! - Thought signatures on function calls carried through message metadata

use crate::{status_error, transport_error};
use async_trait::async_trait;
use mcpchat_core::error::ProviderError;
use mcpchat_core::message::{Message, MessageToolCall, Role};
use mcpchat_core::provider::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Message metadata key holding `{call_id: signature}` for function calls.
const THOUGHT_SIGNATURES_KEY: &str = "gemini_thought_signatures";

/// Schema keywords Gemini's function declarations accept. Anything else
/// (`$schema`, `additionalProperties`, `oneOf`, ...) is rejected by the API.
const SUPPORTED_SCHEMA_KEYS: &[&str] = &[
    "type",
    "format",
    "title",
    "description",
    "nullable",
    "enum",
    "maxItems",
    "minItems",
    "properties",
    "required",
    "minProperties",
    "maxProperties",
    "minLength",
    "maxLength",
    "pattern",
    "example",
    "anyOf",
    "propertyOrdering",
    "default",
    "items",
    "minimum",
    "maximum",
];

/// Gemini `generateContent` provider.
pub struct GeminiProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: "gemini".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Use a custom base URL (e.g., a proxy or a regional endpoint).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    /// Split out the system instruction and convert the rest to `contents`.
    fn to_api_contents(messages: &[Message]) -> (Option<Content>, Vec<Content>) {
        let mut system_parts = Vec::new();
        let mut contents: Vec<Content> = Vec::new();
        // functionResponse parts must name the function; our tool messages
        // only carry the call id.
        let mut call_names: HashMap<&str, &str> = HashMap::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(Part::text(&msg.content)),
                Role::User => contents.push(Content::new("user", vec![Part::text(&msg.content)])),
                Role::Assistant => {
                    let signatures = msg.metadata.get(THOUGHT_SIGNATURES_KEY);
                    let mut parts = Vec::new();
                    if !msg.content.is_empty() {
                        parts.push(Part::text(&msg.content));
                    }
                    for tc in &msg.tool_calls {
                        call_names.insert(&tc.id, &tc.name);
                        let args = serde_json::from_str(&tc.arguments)
                            .unwrap_or_else(|_| serde_json::json!({}));
                        parts.push(Part {
                            function_call: Some(FunctionCall {
                                id: None,
                                name: tc.name.clone(),
                                args,
                            }),
                            thought_signature: signatures
                                .and_then(|s| s.get(&tc.id))
                                .and_then(Value::as_str)
                                .map(String::from),
                            ..Part::default()
                        });
                    }
                    if !parts.is_empty() {
                        contents.push(Content::new("model", parts));
                    }
                }
                Role::Tool => {
                    let call_id = msg.tool_call_id.as_deref().unwrap_or_default();
                    let name = call_names.get(call_id).copied().unwrap_or(call_id);
                    let part = Part {
                        function_response: Some(FunctionResponse {
                            name: name.to_string(),
                            response: serde_json::json!({ "content": msg.content }),
                        }),
                        ..Part::default()
                    };

                    // All responses to one model turn go back in a single content.
                    match contents.last_mut() {
                        Some(last) if last.is_function_responses() => last.parts.push(part),
                        _ => contents.push(Content::new("user", vec![part])),
                    }
                }
            }
        }

        let system = (!system_parts.is_empty()).then(|| Content {
            role: None,
            parts: system_parts,
        });
        (system, contents)
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<FunctionDeclaration> {
        tools
            .iter()
            .map(|t| FunctionDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: function_parameters(&t.parameters),
            })
            .collect()
    }

    fn parse_response(
        response: GenerateContentResponse,
        requested_model: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        let usage = response.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });
        let model = response
            .model_version
            .unwrap_or_else(|| requested_model.to_string());

        let Some(candidate) = response.candidates.into_iter().next() else {
            let reason = response
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates returned".into());
            return Err(ProviderError::Blocked(reason));
        };

        let finish_reason = candidate.finish_reason.unwrap_or_else(|| "STOP".into());
        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();

        let text: String = parts
            .iter()
            .filter(|p| !p.thought)
            .filter_map(|p| p.text.as_deref())
            .collect();

        if finish_reason == "MALFORMED_FUNCTION_CALL" {
            return Err(ProviderError::MalformedOutput(
                candidate.finish_message.unwrap_or(text),
            ));
        }

        let mut tool_calls = Vec::new();
        let mut signatures = serde_json::Map::new();
        for part in parts {
            let Some(fc) = part.function_call else {
                continue;
            };
            let id = fc
                .id
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
            if let Some(sig) = part.thought_signature {
                signatures.insert(id.clone(), Value::String(sig));
            }
            let arguments = if fc.args.is_null() {
                "{}".to_string()
            } else {
                fc.args.to_string()
            };
            tool_calls.push(MessageToolCall {
                id,
                name: fc.name,
                arguments,
            });
        }

        if text.is_empty() && tool_calls.is_empty() && finish_reason != "STOP" {
            return Err(ProviderError::Blocked(format!(
                "generation stopped: {finish_reason}"
            )));
        }

        let mut message = Message::assistant(text);
        message.tool_calls = tool_calls;
        if !signatures.is_empty() {
            message
                .metadata
                .insert(THOUGHT_SIGNATURES_KEY.into(), Value::Object(signatures));
        }

        Ok(ProviderResponse {
            message,
            usage,
            model,
        })
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let (system, contents) = Self::to_api_contents(&request.messages);

        let mut generation_config = serde_json::json!({ "temperature": request.temperature });
        if let Some(max_tokens) = request.max_tokens {
            generation_config["maxOutputTokens"] = serde_json::json!(max_tokens);
        }
        if !request.stop.is_empty() {
            generation_config["stopSequences"] = serde_json::json!(request.stop);
        }

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        if let Some(system) = system {
            body["systemInstruction"] = serde_json::json!(system);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!([{
                "functionDeclarations": Self::to_api_tools(&request.tools),
            }]);
        }

        debug!(
            provider = %self.name,
            model = %request.model,
            tools = request.tools.len(),
            "Sending generateContent request"
        );

        let response = self
            .client
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Gemini returned error");
            return Err(status_error(status, &error_body, &request.model));
        }

        let api_response: GenerateContentResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        Self::parse_response(api_response, &request.model)
    }
}

/// Reduce a JSON Schema to what Gemini accepts, or `None` when the tool
/// takes no parameters (Gemini rejects objects with empty `properties`).
fn function_parameters(schema: &Value) -> Option<Value> {
    let cleaned = sanitize_schema(schema);
    let has_properties = cleaned
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|p| !p.is_empty());
    has_properties.then_some(cleaned)
}

fn sanitize_schema(schema: &Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return schema.clone();
    };

    let mut out = serde_json::Map::new();
    for (key, value) in obj {
        if !SUPPORTED_SCHEMA_KEYS.contains(&key.as_str()) {
            continue;
        }
        let cleaned = match key.as_str() {
            "properties" => Value::Object(
                value
                    .as_object()
                    .map(|props| {
                        props
                            .iter()
                            .map(|(name, prop)| (name.clone(), sanitize_schema(prop)))
                            .collect()
                    })
                    .unwrap_or_default(),
            ),
            "items" => sanitize_schema(value),
            "anyOf" => Value::Array(
                value
                    .as_array()
                    .map(|variants| variants.iter().map(sanitize_schema).collect())
                    .unwrap_or_default(),
            ),
            // ["string", "null"] → "string" + nullable
            "type" => match value {
                Value::Array(types) => {
                    let concrete: Vec<&Value> =
                        types.iter().filter(|t| t.as_str() != Some("null")).collect();
                    if concrete.len() < types.len() {
                        out.insert("nullable".into(), Value::Bool(true));
                    }
                    concrete
                        .first()
                        .map(|t| (*t).clone())
                        .unwrap_or_else(|| Value::String("string".into()))
                }
                other => other.clone(),
            },
            _ => value.clone(),
        };
        out.insert(key.clone(), cleaned);
    }
    Value::Object(out)
}

// --- Gemini API types (internal) ---

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn new(role: &str, parts: Vec<Part>) -> Self {
        Self {
            role: Some(role.into()),
            parts,
        }
    }

    fn is_function_responses(&self) -> bool {
        !self.parts.is_empty() && self.parts.iter().all(|p| p.function_response.is_some())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    thought: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    finish_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}
