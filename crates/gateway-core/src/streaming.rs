//! Streaming (SSE) chunk types mirroring the OpenAI chat completion chunk shape.

use crate::request::{MessageRole, ToolCall};
use crate::response::{FinishReason, Usage};
use serde::{Deserialize, Serialize};

/// A single `data:` frame of a streamed chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunk {
    /// Response identifier, shared across all chunks of one completion.
    pub id: String,
    /// Object type, always `"chat.completion.chunk"`.
    pub object: String,
    /// Unix timestamp of creation.
    pub created: i64,
    /// Model that produced the response.
    pub model: String,
    /// One delta per requested `n`.
    pub choices: Vec<ChunkChoice>,
    /// Present only on the final usage frame requested via `stream_options.include_usage`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A single choice's incremental delta within a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Index of this choice among `n` requested completions.
    pub index: u32,
    /// The incremental content for this chunk.
    pub delta: ChunkDelta,
    /// Set on the final chunk for this choice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// Incremental content of a streamed choice. All fields are optional since a chunk may
/// carry only a role, only content, or only tool call fragments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    /// Present only on the first chunk of a choice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MessageRole>,
    /// Incremental text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Incremental tool call fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// Accumulates the last-wins `usage` object seen across a stream's `data:` frames.
///
/// Per the forwarding rules, every frame is folded in order (including any that arrive
/// after a literal `[DONE]` payload), and frames that fail to parse as JSON or carry no
/// `usage` field are silently ignored rather than treated as errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageAccumulator {
    usage: Option<Usage>,
}

impl UsageAccumulator {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one `data:` payload. Non-object JSON, parse failures, and frames without a
    /// `usage` field leave the accumulator unchanged.
    pub fn observe(&mut self, payload: &str) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) else {
            return;
        };
        let Some(usage_value) = value.get("usage") else {
            return;
        };
        if let Ok(usage) = serde_json::from_value::<Usage>(usage_value.clone()) {
            self.usage = Some(usage);
        }
    }

    /// The last-seen usage object, or `None` if no frame carried one.
    #[must_use]
    pub fn finish(self) -> Option<Usage> {
        self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_accumulator_last_wins() {
        let mut acc = UsageAccumulator::new();
        acc.observe(r#"{"choices":[]}"#);
        acc.observe(r#"{"usage":{"prompt_tokens":3,"completion_tokens":7,"total_tokens":10}}"#);
        acc.observe(r#"{"usage":{"prompt_tokens":3,"completion_tokens":9,"total_tokens":12}}"#);
        let usage = acc.finish().expect("usage observed");
        assert_eq!(usage.completion_tokens, 9);
    }

    #[test]
    fn test_usage_accumulator_ignores_malformed_frames() {
        let mut acc = UsageAccumulator::new();
        acc.observe("[DONE]");
        acc.observe("not json at all");
        assert!(acc.finish().is_none());
    }

    #[test]
    fn test_usage_accumulator_no_usage_frame() {
        let mut acc = UsageAccumulator::new();
        acc.observe(r#"{"choices":[{"delta":{"content":"hi"}}]}"#);
        assert!(acc.finish().is_none());
    }

    #[test]
    fn test_chunk_delta_default_is_empty() {
        let delta = ChunkDelta::default();
        assert!(delta.role.is_none());
        assert!(delta.content.is_none());
        assert!(delta.tool_calls.is_none());
    }
}
