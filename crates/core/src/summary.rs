//! Conversation Summarization Service
//!
//! Nodes configured with `reset_with_summary` compress everything said so far
//! into a single turn before they are rendered. This module defines the
//! summarization contract and the implementations used by the runner and by
//! tests.

use crate::message::{Message, Role};
use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;

/// Prompt used when a node does not provide its own `summary_prompt`.
pub const DEFAULT_SUMMARY_PROMPT: &str = "Summarize the conversation so far in a few sentences. \
Keep every fact the user provided (names, dates, numbers, choices) and any decisions that were made.";

/// Defines the contract for any service that can condense a conversation.
///
/// Summarization is never critical: callers fall back to keeping the full
/// history when it fails.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Produces the single turn that replaces `history`.
    ///
    /// # Arguments
    ///
    /// * `prompt` - Instructions describing what the summary must keep.
    /// * `history` - The turns to condense, oldest first.
    async fn summarize(&self, prompt: &str, history: &[Message]) -> Result<Message>;
}

/// Wraps summary text in the turn that replaces the history.
pub fn summary_turn(summary: &str) -> Message {
    Message::system(format!("Summary of the conversation so far: {}", summary.trim()))
}

/// Renders history as plain `role: content` lines for a summarization prompt.
pub fn transcript(history: &[Message]) -> String {
    history
        .iter()
        .map(|m| match (&m.role, &m.tool_call) {
            (Role::Assistant, Some(call)) => format!("assistant called {}({})", call.name, call.arguments),
            (role, _) => format!("{}: {}", role, m.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// An implementation of `Summarizer` that uses an OpenAI-compatible API.
pub struct LLMSummarizer {
    client: Client<OpenAIConfig>,
    model: String,
}

impl LLMSummarizer {
    /// Creates a new LLM-based summarizer.
    ///
    /// # Arguments
    ///
    /// * `config` - OpenAI API configuration (API key, base URL, etc.).
    /// * `model` - Model identifier to use for summaries (e.g., "gpt-4o-mini").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl Summarizer for LLMSummarizer {
    async fn summarize(&self, prompt: &str, history: &[Message]) -> Result<Message> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(prompt.to_string())
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(transcript(history))
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;

        let answer = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .as_ref()
            .context("No content in LLM response")?;

        Ok(summary_turn(answer))
    }
}

/// A mock `Summarizer` for development and integration testing.
///
/// Produces a deterministic summary that only counts the user's turns, so
/// tests can assert on it without a model.
pub struct MockSummarizer;

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, _prompt: &str, history: &[Message]) -> Result<Message> {
        let user_turns = history.iter().filter(|m| m.role == Role::User).count();
        Ok(summary_turn(&format!("{user_turns} user turns")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;

    #[test]
    fn transcript_lists_turns_in_order() {
        let history = vec![
            Message::user("My birthday is 1983-01-01"),
            Message::tool_call(ToolCall::new("c1", "verify_birthday", r#"{"birthday":"1983-01-01"}"#)),
            Message::tool_result("c1", r#"{"verified":true}"#),
        ];
        assert_eq!(
            transcript(&history),
            "user: My birthday is 1983-01-01\n\
             assistant called verify_birthday({\"birthday\":\"1983-01-01\"})\n\
             tool: {\"verified\":true}"
        );
    }

    #[tokio::test]
    async fn mock_summarizer_is_deterministic() {
        let history = vec![Message::user("a"), Message::assistant("b"), Message::user("c")];
        let summary = MockSummarizer
            .summarize(DEFAULT_SUMMARY_PROMPT, &history)
            .await
            .unwrap();
        assert_eq!(summary.role, Role::System);
        assert_eq!(summary.content, "Summary of the conversation so far: 2 user turns");
    }
}
