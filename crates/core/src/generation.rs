//! Generation adapter: routing decisions and free-text completion over an
//! OpenAI-compatible chat API.

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionToolArgs, CreateChatCompletionRequestArgs, FunctionObjectArgs,
    },
};
use async_trait::async_trait;
use tracing::warn;

use crate::conversation::{Message, Role};
use crate::error::GenerationError;
use crate::prompts;
use crate::registry::CapabilitySpec;

/// The routing outcome for one turn. Produced once per turn by `decide`
/// and consumed exactly once by the dispatch workflow; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Answer conversationally without invoking a capability.
    Direct,
    /// Invoke the named capability with a single free-text argument.
    Invoke { capability: String, argument: String },
}

/// A generic client for the language-generation service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// One classification round trip: either a recognized capability name
    /// plus argument, or the no-capability sentinel. Output naming an
    /// unregistered capability or missing a required argument fails with
    /// `GenerationError::MalformedDecision`.
    async fn decide(
        &self,
        messages: &[Message],
        capabilities: &[CapabilitySpec],
    ) -> Result<Decision, GenerationError>;

    /// One non-streaming completion round trip.
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Production client for any OpenAI-compatible API.
pub struct OpenAiGenerationClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAiGenerationClient {
    pub fn new(
        config: OpenAIConfig,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
            temperature,
            max_tokens,
        }
    }

    fn history_messages(
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, GenerationError> {
        let mut converted = Vec::with_capacity(messages.len());
        for msg in messages {
            let request_message: ChatCompletionRequestMessage = match msg.role {
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content.clone())
                    .build()
                    .map_err(map_openai_error)?
                    .into(),
                // Tool output is carried forward as assistant text; the
                // invocation metadata lives in the message origin.
                Role::Assistant | Role::Tool => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(msg.content.clone())
                    .build()
                    .map_err(map_openai_error)?
                    .into(),
            };
            converted.push(request_message);
        }
        Ok(converted)
    }
}

#[async_trait]
impl GenerationClient for OpenAiGenerationClient {
    async fn decide(
        &self,
        messages: &[Message],
        capabilities: &[CapabilitySpec],
    ) -> Result<Decision, GenerationError> {
        let mut request_messages: Vec<ChatCompletionRequestMessage> =
            vec![ChatCompletionRequestSystemMessageArgs::default()
                .content(prompts::ROUTER)
                .build()
                .map_err(map_openai_error)?
                .into()];
        request_messages.extend(Self::history_messages(messages)?);

        let mut tools = Vec::with_capacity(capabilities.len());
        for spec in capabilities {
            let parameters = serde_json::json!({
                "type": "object",
                "properties": {
                    "argument": {
                        "type": "string",
                        "description": spec.argument_contract,
                    }
                },
                "required": ["argument"],
            });
            tools.push(
                ChatCompletionToolArgs::default()
                    .function(
                        FunctionObjectArgs::default()
                            .name(spec.name.clone())
                            .description(spec.description.clone())
                            .parameters(parameters)
                            .build()
                            .map_err(map_openai_error)?,
                    )
                    .build()
                    .map_err(map_openai_error)?,
            );
        }

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .messages(request_messages)
            .tools(tools)
            .tool_choice("auto")
            .temperature(self.temperature);
        if let Some(max_tokens) = self.max_tokens {
            builder.max_tokens(max_tokens);
        }
        let request = builder.build().map_err(map_openai_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GenerationError::Api("no choices in response".to_string()))?;

        if let Some(tool_calls) = choice.message.tool_calls {
            if tool_calls.len() > 1 {
                warn!(count = tool_calls.len(), "router emitted multiple tool calls; using the first");
            }
            let call = tool_calls.into_iter().next().ok_or_else(|| {
                GenerationError::MalformedDecision("empty tool call list".to_string())
            })?;
            translate_tool_call(&call.function.name, &call.function.arguments, capabilities)
        } else {
            // Plain content, including the DIRECT_RESPONSE sentinel, means
            // no capability is needed.
            Ok(Decision::Direct)
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()
                    .map_err(map_openai_error)?
                    .into(),
            ])
            .temperature(self.temperature);
        if let Some(max_tokens) = self.max_tokens {
            builder.max_tokens(max_tokens);
        }
        let request = builder.build().map_err(map_openai_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| GenerationError::Api("empty completion".to_string()))
    }
}

/// Translates a raw tool call into a `Decision`, rejecting unregistered
/// capability names and missing arguments.
fn translate_tool_call(
    name: &str,
    raw_arguments: &str,
    capabilities: &[CapabilitySpec],
) -> Result<Decision, GenerationError> {
    if !capabilities.iter().any(|spec| spec.name == name) {
        return Err(GenerationError::MalformedDecision(format!(
            "unregistered capability '{name}'"
        )));
    }

    let parsed: serde_json::Value = serde_json::from_str(raw_arguments).map_err(|e| {
        GenerationError::MalformedDecision(format!("unparseable arguments for '{name}': {e}"))
    })?;
    let argument = parsed
        .get("argument")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            GenerationError::MalformedDecision(format!("missing argument for '{name}'"))
        })?;

    Ok(Decision::Invoke {
        capability: name.to_string(),
        argument: argument.to_string(),
    })
}

fn map_openai_error(err: OpenAIError) -> GenerationError {
    match err {
        OpenAIError::Reqwest(e) => {
            if e.is_timeout() || e.is_connect() {
                GenerationError::Timeout(e.to_string())
            } else {
                GenerationError::Api(e.to_string())
            }
        }
        OpenAIError::ApiError(api) => {
            let code = api.code.as_ref().map(|c| c.to_string()).unwrap_or_default();
            if code.contains("rate_limit") || api.message.to_ascii_lowercase().contains("rate limit")
            {
                GenerationError::RateLimited(api.message)
            } else {
                GenerationError::Api(api.message)
            }
        }
        other => GenerationError::Api(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs() -> Vec<CapabilitySpec> {
        vec![
            CapabilitySpec {
                name: "lookup".to_string(),
                description: "word lookup".to_string(),
                argument_contract: "a single English word".to_string(),
            },
            CapabilitySpec {
                name: "topic-list".to_string(),
                description: "topic vocabulary".to_string(),
                argument_contract: "a topic name".to_string(),
            },
        ]
    }

    #[test]
    fn translates_valid_tool_call() {
        let decision =
            translate_tool_call("lookup", r#"{"argument": "innovation"}"#, &specs()).unwrap();
        assert_eq!(
            decision,
            Decision::Invoke {
                capability: "lookup".to_string(),
                argument: "innovation".to_string(),
            }
        );
    }

    #[test]
    fn trims_whitespace_in_argument() {
        let decision =
            translate_tool_call("topic-list", r#"{"argument": " 商業 "}"#, &specs()).unwrap();
        assert_eq!(
            decision,
            Decision::Invoke {
                capability: "topic-list".to_string(),
                argument: "商業".to_string(),
            }
        );
    }

    #[test]
    fn rejects_unregistered_capability() {
        let err = translate_tool_call("translate", r#"{"argument": "x"}"#, &specs()).unwrap_err();
        assert!(matches!(err, GenerationError::MalformedDecision(_)));
    }

    #[test]
    fn rejects_missing_argument() {
        let err = translate_tool_call("lookup", r#"{}"#, &specs()).unwrap_err();
        assert!(matches!(err, GenerationError::MalformedDecision(_)));
    }

    #[test]
    fn rejects_empty_argument() {
        let err = translate_tool_call("lookup", r#"{"argument": "   "}"#, &specs()).unwrap_err();
        assert!(matches!(err, GenerationError::MalformedDecision(_)));
    }

    #[test]
    fn rejects_unparseable_argument_payload() {
        let err = translate_tool_call("lookup", "not json", &specs()).unwrap_err();
        assert!(matches!(err, GenerationError::MalformedDecision(_)));
    }
}
