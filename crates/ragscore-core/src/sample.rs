// Evaluation sample
//
// Sample is the unit of evaluation: a question, an answer, and optionally a
// reference answer, retrieved contexts, a multi-turn conversation, reference
// tool calls and reference topics. Every field is optional; each metric
// declares what it requires and returns 0.0 with a warning when a required
// field is absent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single tool invocation, as produced by an agent or listed as a reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name
    pub name: String,
    /// Arguments as a JSON object
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// A message in a multi-turn conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// Human turn
    Human { content: String },
    /// AI turn, optionally carrying tool calls issued during the turn
    Ai {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    /// Tool result turn
    Tool { content: String },
}

impl Message {
    /// Create a human message
    pub fn human(content: impl Into<String>) -> Self {
        Message::Human {
            content: content.into(),
        }
    }

    /// Create an AI message without tool calls
    pub fn ai(content: impl Into<String>) -> Self {
        Message::Ai {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    /// Create an AI message with tool calls
    pub fn ai_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Ai {
            content: content.into(),
            tool_calls,
        }
    }

    /// Create a tool result message
    pub fn tool(content: impl Into<String>) -> Self {
        Message::Tool {
            content: content.into(),
        }
    }

    /// Message text regardless of role
    pub fn content(&self) -> &str {
        match self {
            Message::Human { content } | Message::Tool { content } => content,
            Message::Ai { content, .. } => content,
        }
    }

    /// Role label used when rendering a conversation into a prompt
    pub fn role_label(&self) -> &'static str {
        match self {
            Message::Human { .. } => "Human",
            Message::Ai { .. } => "AI",
            Message::Tool { .. } => "Tool",
        }
    }
}

/// The unit of evaluation. Immutable after construction; build with
/// [`Sample::builder`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(skip_serializing_if = "Option::is_none")]
    user_input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    retrieved_contexts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    user_input_messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    reference_tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    reference_topics: Vec<String>,
}

impl Sample {
    /// Start building a sample
    pub fn builder() -> SampleBuilder {
        SampleBuilder::default()
    }

    pub fn user_input(&self) -> Option<&str> {
        self.user_input.as_deref()
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn retrieved_contexts(&self) -> &[String] {
        &self.retrieved_contexts
    }

    pub fn user_input_messages(&self) -> &[Message] {
        &self.user_input_messages
    }

    pub fn reference_tool_calls(&self) -> &[ToolCall] {
        &self.reference_tool_calls
    }

    pub fn reference_topics(&self) -> &[String] {
        &self.reference_topics
    }

    /// True when `user_input` is present and not blank
    pub fn has_user_input(&self) -> bool {
        !is_blank(&self.user_input)
    }

    /// True when `response` is present and not blank
    pub fn has_response(&self) -> bool {
        !is_blank(&self.response)
    }

    /// True when `reference` is present and not blank
    pub fn has_reference(&self) -> bool {
        !is_blank(&self.reference)
    }

    /// Retrieved contexts joined into one block, in rank order
    pub fn joined_contexts(&self) -> String {
        self.retrieved_contexts.join("\n")
    }

    /// Content of every AI turn, in conversation order
    pub fn ai_turns(&self) -> Vec<&str> {
        self.user_input_messages
            .iter()
            .filter_map(|m| match m {
                Message::Ai { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Every tool call issued by AI turns, in conversation order
    pub fn ai_tool_calls(&self) -> Vec<&ToolCall> {
        self.user_input_messages
            .iter()
            .flat_map(|m| match m {
                Message::Ai { tool_calls, .. } => tool_calls.iter().collect::<Vec<_>>(),
                _ => Vec::new(),
            })
            .collect()
    }

    /// Render the conversation as role-labelled lines for a judge prompt
    pub fn conversation_text(&self) -> String {
        self.user_input_messages
            .iter()
            .map(|m| format!("{}: {}", m.role_label(), m.content()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|s| s.trim().is_empty())
}

/// Builder for [`Sample`]
#[derive(Debug, Clone, Default)]
pub struct SampleBuilder {
    sample: Sample,
}

impl SampleBuilder {
    pub fn user_input(mut self, value: impl Into<String>) -> Self {
        self.sample.user_input = Some(value.into());
        self
    }

    pub fn response(mut self, value: impl Into<String>) -> Self {
        self.sample.response = Some(value.into());
        self
    }

    pub fn reference(mut self, value: impl Into<String>) -> Self {
        self.sample.reference = Some(value.into());
        self
    }

    pub fn retrieved_context(mut self, value: impl Into<String>) -> Self {
        self.sample.retrieved_contexts.push(value.into());
        self
    }

    pub fn retrieved_contexts<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sample
            .retrieved_contexts
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn user_input_message(mut self, message: Message) -> Self {
        self.sample.user_input_messages.push(message);
        self
    }

    pub fn user_input_messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.sample.user_input_messages.extend(messages);
        self
    }

    pub fn reference_tool_call(mut self, call: ToolCall) -> Self {
        self.sample.reference_tool_calls.push(call);
        self
    }

    pub fn reference_tool_calls(mut self, calls: impl IntoIterator<Item = ToolCall>) -> Self {
        self.sample.reference_tool_calls.extend(calls);
        self
    }

    pub fn reference_topic(mut self, topic: impl Into<String>) -> Self {
        self.sample.reference_topics.push(topic.into());
        self
    }

    pub fn reference_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sample
            .reference_topics
            .extend(topics.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Sample {
        self.sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_collects_fields() {
        let sample = Sample::builder()
            .user_input("What is Java?")
            .response("Java is a language.")
            .reference("Java is a programming language.")
            .retrieved_context("Java is a high-level language.")
            .retrieved_context("Sun Microsystems created Java.")
            .build();

        assert_eq!(sample.user_input(), Some("What is Java?"));
        assert_eq!(sample.retrieved_contexts().len(), 2);
        assert!(sample.has_reference());
        assert!(sample
            .joined_contexts()
            .contains("Sun Microsystems created Java."));
    }

    #[test]
    fn test_blank_reference_is_not_present() {
        let sample = Sample::builder().reference("   ").build();
        assert!(!sample.has_reference());
    }

    #[test]
    fn test_ai_turns_and_tool_calls() {
        let sample = Sample::builder()
            .user_input_message(Message::human("Book a flight"))
            .user_input_message(Message::ai_with_tools(
                "Booking now",
                vec![ToolCall::new("book_flight", json!({"to": "SFO"}))],
            ))
            .user_input_message(Message::tool("booked"))
            .user_input_message(Message::ai("Done, your flight is booked."))
            .build();

        assert_eq!(sample.ai_turns().len(), 2);
        let calls = sample.ai_tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "book_flight");
        assert!(sample.conversation_text().starts_with("Human: Book a flight"));
    }

    #[test]
    fn test_message_serialization_is_role_tagged() {
        let message = Message::ai("hello");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "ai");
        assert_eq!(json["content"], "hello");

        let parsed: Message = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, message);
    }
}
