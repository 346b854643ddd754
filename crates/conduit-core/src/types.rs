//! Shared data model (spec §3): channel keys, content blocks, messages,
//! turn records, prompt layers, pending requests, extracted contracts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque identifier for a conversational context, formed as
/// `"{source}:{channel_id}"` (e.g. `"discord:1234"`). Case-sensitive,
/// uninterpreted by the core except for the `cron:*` concurrency-class rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `cron:*` keys map to the `cron` concurrency class; everything else
    /// maps to `default`.
    pub fn concurrency_class(&self) -> &'static str {
        if self.0.starts_with("cron:") {
            "cron"
        } else {
            "default"
        }
    }

    /// Compound temp-session key: `"{channel_key}:temp:{uuid}"`.
    pub fn temp_key(&self, suffix_uuid: &str) -> String {
        format!("{}:temp:{}", self.0, suffix_uuid)
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ChannelKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Tagged content-block variant (spec §3). Model-facing inputs are validated
/// into this type at the boundary; the rest of the core matches on it
/// exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        media_type: String,
        base64: String,
    },
    Document {
        media_type: String,
        base64: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Best-effort plain-text rendering of a single block, used when
    /// serializing the "last user message only" for a subprocess turn.
    pub fn as_label(&self) -> String {
        match self {
            ContentBlock::Text { text } => text.clone(),
            ContentBlock::Image { .. } => "[image attachment]".to_string(),
            ContentBlock::Document { .. } => "[document attachment]".to_string(),
            ContentBlock::ToolUse { name, input, .. } => {
                format!("[tool_use {name} input={input}]")
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                format!("[tool_result {tool_use_id} is_error={is_error}] {content}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A single message: either plain text or an ordered sequence of content
/// blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Plain(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Plain(text.into()),
        }
    }

    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Plain(text.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One turn of conversation history (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_number: u32,
    pub role: Role,
    pub content: MessageContent,
    pub stop_reason: Option<StopReason>,
    pub usage: Option<Usage>,
}

/// Priority of a system-prompt layer. 1 = never truncate, higher = more
/// expendable (spec §3, §4.3).
pub type LayerPriority = u8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptLayer {
    pub name: String,
    pub content: String,
    pub priority: LayerPriority,
}

impl PromptLayer {
    pub fn new(name: impl Into<String>, content: impl Into<String>, priority: LayerPriority) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            priority,
        }
    }

    pub fn len_chars(&self) -> usize {
        self.content.chars().count()
    }
}

/// Bookkeeping for one outstanding request to a persistent subprocess
/// (spec §3). The resolve/reject channels live alongside this record in
/// `conduit-process`; this struct carries only the metadata the pool/loop
/// need to observe.
#[derive(Debug, Clone)]
pub struct PendingRequestMeta {
    pub id: u64,
    pub method: String,
    pub started_at: std::time::Instant,
}

/// Extracted contract kinds (spec §3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractedContract {
    ApiEndpoint {
        method: String,
        path: String,
        file: String,
        confidence: f32,
    },
    FunctionSignature {
        signature: String,
        file: String,
        confidence: f32,
    },
    TypeDefinition {
        name: String,
        definition: String,
        file: String,
        confidence: f32,
    },
    SqlSchema {
        table: String,
        definition: String,
        file: String,
        confidence: f32,
    },
    GraphqlSchema {
        type_name: String,
        definition: String,
        file: String,
        confidence: f32,
    },
}

impl ExtractedContract {
    pub fn file(&self) -> &str {
        match self {
            ExtractedContract::ApiEndpoint { file, .. } => file,
            ExtractedContract::FunctionSignature { file, .. } => file,
            ExtractedContract::TypeDefinition { file, .. } => file,
            ExtractedContract::SqlSchema { file, .. } => file,
            ExtractedContract::GraphqlSchema { file, .. } => file,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            ExtractedContract::ApiEndpoint { confidence, .. } => *confidence,
            ExtractedContract::FunctionSignature { confidence, .. } => *confidence,
            ExtractedContract::TypeDefinition { confidence, .. } => *confidence,
            ExtractedContract::SqlSchema { confidence, .. } => *confidence,
            ExtractedContract::GraphqlSchema { confidence, .. } => *confidence,
        }
    }
}

/// Free-form agent context used by the prompt composer and the rules
/// filter's `matches_context` (spec §4.2, §4.12): agent id, tier, channel,
/// and the active keyword set for this turn.
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    pub agent_id: Option<String>,
    pub tier: Option<String>,
    pub channel: Option<String>,
    pub keywords: Vec<String>,
    pub extra: HashMap<String, String>,
}
