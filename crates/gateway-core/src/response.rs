//! Non-streaming response types mirroring the OpenAI chat completion shape.

use crate::request::ChatMessage;
use serde::{Deserialize, Serialize};

/// A complete (non-streaming) chat completion response forwarded to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// Response identifier, as assigned by the upstream.
    pub id: String,
    /// Object type, always `"chat.completion"`.
    pub object: String,
    /// Unix timestamp of creation.
    pub created: i64,
    /// Model that produced the response.
    pub model: String,
    /// One completion per requested `n`.
    pub choices: Vec<Choice>,
    /// Token accounting for this response, used by the reconciler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A single completion choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Index of this choice among `n` requested completions.
    pub index: u32,
    /// The generated message.
    pub message: ChatMessage,
    /// Why generation stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// Reason generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop token or stop sequence reached.
    Stop,
    /// `max_tokens` was reached before completion.
    Length,
    /// The model invoked one or more tools.
    ToolCalls,
    /// Output was withheld by a content filter.
    ContentFilter,
}

/// Token usage, captured from the upstream response for the reconciler.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt/input.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Tokens generated in the completion/output.
    #[serde(default)]
    pub completion_tokens: u32,
    /// Sum of prompt and completion tokens.
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Build a `Usage` for an embeddings response, where output tokens are always zero
    /// and `total_tokens` is used as a fallback for `prompt_tokens` when the latter is absent.
    #[must_use]
    pub fn for_embeddings(prompt_tokens: Option<u32>, total_tokens: Option<u32>) -> Self {
        let prompt = prompt_tokens.or(total_tokens).unwrap_or(0);
        Self {
            prompt_tokens: prompt,
            completion_tokens: 0,
            total_tokens: total_tokens.unwrap_or(prompt),
        }
    }
}

/// A single entry of `GET /v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelObject {
    /// Model id, name, or alias as exposed to clients.
    pub id: String,
    /// Object type, always `"model"`.
    pub object: String,
    /// Unix timestamp the model row was created.
    pub created: i64,
    /// Owning organization, opaque passthrough.
    pub owned_by: String,
}

/// Response body for `GET /v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    /// Object type, always `"list"`.
    pub object: String,
    /// The models visible to the caller's token.
    pub data: Vec<ModelObject>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_for_embeddings_prefers_prompt_tokens() {
        let usage = Usage::for_embeddings(Some(12), Some(20));
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 0);
    }

    #[test]
    fn test_usage_for_embeddings_falls_back_to_total() {
        let usage = Usage::for_embeddings(None, Some(20));
        assert_eq!(usage.prompt_tokens, 20);
        assert_eq!(usage.total_tokens, 20);
    }

    #[test]
    fn test_usage_for_embeddings_defaults_to_zero() {
        let usage = Usage::for_embeddings(None, None);
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.total_tokens, 0);
    }

    #[test]
    fn test_gateway_response_serde_roundtrip() {
        let response = GatewayResponse {
            id: "chatcmpl-1".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: "gpt-4".to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant("hi"),
                finish_reason: Some(FinishReason::Stop),
            }],
            usage: Some(Usage {
                prompt_tokens: 3,
                completion_tokens: 7,
                total_tokens: 10,
            }),
        };
        let json = serde_json::to_string(&response).expect("serialize");
        let parsed: GatewayResponse = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.usage.expect("usage").total_tokens, 10);
    }
}
