// Inference client interface
//
// Processors reach an external model through `InferenceClient`. The engine
// never interprets prompts; it only enforces the prompt size limit and offers
// a helper to pull JSON out of a free-text answer.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::errors::InferenceError;

/// Prompts larger than this are rejected before anything is sent
pub const MAX_PROMPT_BYTES: usize = 1024 * 1024;

/// Answer returned by [`CannedInferenceClient`] unless configured otherwise
pub const CANNED_ANSWER: &str = "some random text";

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Send `prompt` to `endpoint` within the conversation `channel_id`
    async fn ask(
        &self,
        token: &str,
        channel_id: &str,
        endpoint: &str,
        prompt: &str,
    ) -> Result<String, InferenceError>;
}

pub fn check_prompt(prompt: &str) -> Result<(), InferenceError> {
    if prompt.len() > MAX_PROMPT_BYTES {
        return Err(InferenceError::PromptTooLarge {
            size: prompt.len(),
            limit: MAX_PROMPT_BYTES,
        });
    }
    Ok(())
}

/// Mock-mode client answering every prompt with the same text
#[derive(Debug, Clone)]
pub struct CannedInferenceClient {
    answer: String,
}

impl Default for CannedInferenceClient {
    fn default() -> Self {
        Self::new(CANNED_ANSWER)
    }
}

impl CannedInferenceClient {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
        }
    }
}

#[async_trait]
impl InferenceClient for CannedInferenceClient {
    async fn ask(
        &self,
        _token: &str,
        channel_id: &str,
        endpoint: &str,
        prompt: &str,
    ) -> Result<String, InferenceError> {
        check_prompt(prompt)?;
        debug!(channel_id = %channel_id, endpoint = %endpoint, "Answering with canned text");
        Ok(self.answer.clone())
    }
}

/// Extract a JSON value from a model answer, tolerating ``` fences
pub fn parse_json_answer(raw: &str) -> Result<Value, InferenceError> {
    let trimmed = raw.trim();
    let body = match trimmed.find("```") {
        Some(open) => {
            let after_fence = &trimmed[open + 3..];
            // Skip an info string such as `json` on the fence line
            let content_start = after_fence.find('\n').map_or(0, |pos| pos + 1);
            let content = &after_fence[content_start..];
            match content.find("```") {
                Some(close) => &content[..close],
                None => content,
            }
        }
        None => trimmed,
    };
    serde_json::from_str(body.trim()).map_err(|e| InferenceError::MalformedAnswer(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_json() {
        assert_eq!(parse_json_answer(r#" {"a": 1} "#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "Here you go:\n```json\n{\"items\": [1, 2]}\n```\nThanks";
        assert_eq!(parse_json_answer(raw).unwrap(), json!({"items": [1, 2]}));
    }

    #[test]
    fn test_parse_failure_is_malformed_answer() {
        assert!(matches!(
            parse_json_answer("no json here"),
            Err(InferenceError::MalformedAnswer(_))
        ));
    }

    #[tokio::test]
    async fn test_canned_client_rejects_large_prompts() {
        let client = CannedInferenceClient::default();
        assert_eq!(client.ask("t", "c", "e", "hi").await.unwrap(), CANNED_ANSWER);

        let prompt = "x".repeat(MAX_PROMPT_BYTES + 1);
        let err = client.ask("t", "c", "e", &prompt).await.unwrap_err();
        assert!(matches!(err, InferenceError::PromptTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_mock_client_is_callable() {
        let mut mock = MockInferenceClient::new();
        mock.expect_ask()
            .returning(|_, _, _, prompt| Ok(format!("echo: {prompt}")));
        assert_eq!(mock.ask("t", "c", "e", "ping").await.unwrap(), "echo: ping");
    }
}
