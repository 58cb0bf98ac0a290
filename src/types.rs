//! Core conversation data model: messages and content blocks.
//!
//! This is the wire-agnostic shape the engine reasons about. Transports
//! translate to and from their own request/response formats at the
//! boundary (see [`crate::transport`]); nothing in here is tied to any
//! particular model provider's API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A block of text content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseBlock {
    /// Unique identifier correlating this call to its eventual result.
    pub id: String,
    /// Name of the tool being invoked.
    pub name: String,
    /// Arguments the model supplied, validated against the tool's schema.
    pub input: Value,
}

impl ToolUseBlock {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// The result of executing a tool, correlated back to its `ToolUseBlock` by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: Value,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResultBlock {
    pub fn new(tool_use_id: impl Into<String>, content: Value) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content,
            is_error: false,
        }
    }

    pub fn error(tool_use_id: impl Into<String>, content: Value) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content,
            is_error: true,
        }
    }
}

/// A single block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text(TextBlock::new(text))
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        ContentBlock::ToolUse(ToolUseBlock::new(id, name, input))
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: Value) -> Self {
        ContentBlock::ToolResult(ToolResultBlock::new(tool_use_id, content))
    }

    /// The tool name if this block is a tool call, `None` otherwise.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            ContentBlock::ToolUse(t) => Some(&t.name),
            _ => None,
        }
    }
}

/// A single turn in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageRole::System, vec![ContentBlock::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, vec![ContentBlock::text(text)])
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Every tool-use block in this message, in document order.
    pub fn tool_uses(&self) -> Vec<&ToolUseBlock> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    /// The concatenated text of every text block in this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_constructors() {
        let sys = Message::system("be helpful");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.text(), "be helpful");

        let user = Message::user("hello");
        assert_eq!(user.role, MessageRole::User);
    }

    #[test]
    fn test_tool_uses_extraction() {
        let msg = Message::assistant(vec![
            ContentBlock::text("thinking..."),
            ContentBlock::tool_use("call_1", "search", json!({"query": "rust"})),
        ]);

        let uses = msg.tool_uses();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].name, "search");
    }

    #[test]
    fn test_tool_result_error_flag() {
        let ok = ToolResultBlock::new("id1", json!({"ok": true}));
        assert!(!ok.is_error);

        let err = ToolResultBlock::error("id1", json!("boom"));
        assert!(err.is_error);
    }

    #[test]
    fn test_content_block_serde_tag() {
        let block = ContentBlock::text("hi");
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "text");

        let round_tripped: ContentBlock = serde_json::from_value(value).unwrap();
        assert_eq!(round_tripped, block);
    }
}
