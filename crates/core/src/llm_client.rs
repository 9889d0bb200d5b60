use crate::message::{Message, Role, ToolCall, TurnRequest, TurnResponse};
use anyhow::anyhow;
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse, FunctionCall,
        FunctionObjectArgs,
    },
};
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Failure of a model turn, classified so callers can decide whether waiting
/// for the next user message is worthwhile.
#[derive(Debug, Error)]
pub enum TurnError {
    /// Network hiccups, rate limits, dropped streams.
    #[error("transient model failure: {0}")]
    Transient(#[source] anyhow::Error),
    /// Bad credentials, malformed requests, unusable responses.
    #[error("fatal model failure: {0}")]
    Fatal(#[source] anyhow::Error),
}

impl TurnError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TurnError::Fatal(_))
    }

    pub fn into_source(self) -> anyhow::Error {
        match self {
            TurnError::Transient(e) | TurnError::Fatal(e) => e,
        }
    }
}

/// A generic client for one request/response exchange with a language model.
#[async_trait]
pub trait TurnClient: Send + Sync {
    /// Sends the rendered messages and tool declarations; returns the text to
    /// speak and any tool calls the model made.
    async fn submit_turn(&self, request: &TurnRequest) -> Result<TurnResponse, TurnError>;
}

/// An implementation of `TurnClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The specific model identifier to use for chat completions (e.g., "gpt-4o").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl TurnClient for OpenAICompatibleClient {
    async fn submit_turn(&self, request: &TurnRequest) -> Result<TurnResponse, TurnError> {
        let messages = to_openai_messages(&request.messages).map_err(TurnError::Fatal)?;
        let tools = to_openai_tools(request).map_err(TurnError::Fatal)?;

        // Providers reject an empty tool list, so terminal turns omit it.
        let built = if tools.is_empty() {
            CreateChatCompletionRequestArgs::default()
                .model(&self.model)
                .messages(messages)
                .build()
        } else {
            CreateChatCompletionRequestArgs::default()
                .model(&self.model)
                .messages(messages)
                .tools(tools)
                .tool_choice("auto")
                .build()
        };
        let chat_request = built.map_err(classify)?;

        let response: CreateChatCompletionResponse =
            self.client.chat().create(chat_request).await.map_err(classify)?;
        let choice = response
            .choices
            .first()
            .ok_or_else(|| TurnError::Fatal(anyhow!("LLM response had no choices.")))?;

        let text = choice.message.content.clone().unwrap_or_default();
        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .as_ref()
            .map(|calls| {
                calls
                    .iter()
                    .map(|c| ToolCall::new(&c.id, &c.function.name, &c.function.arguments))
                    .collect()
            })
            .unwrap_or_default();

        debug!(model = %self.model, text_len = text.len(), tool_calls = tool_calls.len(), "Model turn completed");
        Ok(TurnResponse { text, tool_calls })
    }
}

/// Network and stream failures are worth retrying on the next user turn;
/// everything else will fail the same way again.
fn classify(err: OpenAIError) -> TurnError {
    match err {
        OpenAIError::Reqwest(_) | OpenAIError::StreamError(_) => TurnError::Transient(err.into()),
        other => TurnError::Fatal(other.into()),
    }
}

pub(crate) fn to_openai_messages(
    messages: &[Message],
) -> anyhow::Result<Vec<ChatCompletionRequestMessage>> {
    messages
        .iter()
        .map(|m| -> anyhow::Result<ChatCompletionRequestMessage> {
            let message: ChatCompletionRequestMessage = match m.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(m.content.clone())
                    .build()?
                    .into(),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(m.content.clone())
                    .build()?
                    .into(),
                Role::Assistant => match &m.tool_call {
                    Some(call) => ChatCompletionRequestAssistantMessageArgs::default()
                        .tool_calls(vec![ChatCompletionMessageToolCall {
                            id: call.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        }])
                        .build()?
                        .into(),
                    None => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()?
                        .into(),
                },
                Role::Tool => ChatCompletionRequestToolMessageArgs::default()
                    .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
                    .content(m.content.clone())
                    .build()?
                    .into(),
            };
            Ok(message)
        })
        .collect()
}

fn to_openai_tools(request: &TurnRequest) -> anyhow::Result<Vec<ChatCompletionTool>> {
    request
        .tools
        .iter()
        .map(|t| -> anyhow::Result<ChatCompletionTool> {
            Ok(ChatCompletionToolArgs::default()
                .function(
                    FunctionObjectArgs::default()
                        .name(t.name.clone())
                        .description(t.description.clone())
                        .parameters(t.parameters.clone())
                        .build()?,
                )
                .build()?)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_every_role() {
        let messages = vec![
            Message::system("persona"),
            Message::user("hello"),
            Message::assistant("hi"),
            Message::tool_call(ToolCall::new("call_1", "collect_pitch", r#"{"pitch":"x"}"#)),
            Message::tool_result("call_1", r#"{"status":"acknowledged"}"#),
        ];
        let converted = to_openai_messages(&messages).unwrap();
        assert_eq!(converted.len(), 5);
        assert!(matches!(converted[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(converted[1], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(converted[2], ChatCompletionRequestMessage::Assistant(_)));
        match &converted[3] {
            ChatCompletionRequestMessage::Assistant(a) => {
                let calls = a.tool_calls.as_ref().expect("tool calls present");
                assert_eq!(calls[0].function.name, "collect_pitch");
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert!(matches!(converted[4], ChatCompletionRequestMessage::Tool(_)));
    }

    #[test]
    fn turn_error_classification() {
        let transient = TurnError::Transient(anyhow!("connection reset"));
        assert!(!transient.is_fatal());
        let fatal = classify(OpenAIError::InvalidArgument("model is required".into()));
        assert!(fatal.is_fatal());
        assert!(fatal.into_source().to_string().contains("model is required"));
    }
}
