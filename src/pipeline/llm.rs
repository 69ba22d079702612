//! Inference call: one prompt plus one image in, free text out.
//!
//! [`VisionClient`] is the seam between the pipeline and whatever multimodal
//! service answers. [`LlmVisionClient`] adapts any edgequake-llm provider;
//! tests and embedders plug in their own implementation through
//! [`crate::config::ExtractionConfigBuilder::client`].
//!
//! There is deliberately no retry loop here. A failed call is reported once
//! and becomes a "no data extracted" outcome for the run.

use crate::pipeline::encode::EncodedImage;
use crate::error::{ServiceError, ServiceFailureKind};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// A multimodal text+image completion service.
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Short label for logs, e.g. `gemini/gemini-2.0-flash`.
    fn name(&self) -> &str;

    /// Submit `prompt` with `image` as a single request and return the text reply.
    async fn describe(&self, prompt: &str, image: &EncodedImage) -> Result<String, ServiceError>;
}

/// [`VisionClient`] backed by an edgequake-llm provider.
pub struct LlmVisionClient {
    provider: Arc<dyn LLMProvider>,
    label: String,
    temperature: f32,
    max_tokens: usize,
}

impl LlmVisionClient {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            label: label.into(),
            temperature,
            max_tokens,
        }
    }
}

#[async_trait]
impl VisionClient for LlmVisionClient {
    fn name(&self) -> &str {
        &self.label
    }

    /// The request is a single user turn carrying the prompt text and the
    /// PNG attachment together.
    async fn describe(&self, prompt: &str, image: &EncodedImage) -> Result<String, ServiceError> {
        let attachment = ImageData::new(image.base64.clone(), image.mime_type).with_detail("high");
        let messages = vec![ChatMessage::user_with_images(prompt, vec![attachment])];
        let options = build_options(self.temperature, self.max_tokens);

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ServiceError::classify(e.to_string()))?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.label, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Send the extraction request and wait for the reply, at most `timeout_secs`.
///
/// An empty or whitespace-only reply is a [`ServiceFailureKind::MalformedResponse`].
pub async fn request_extraction(
    client: &dyn VisionClient,
    prompt: &str,
    image: &EncodedImage,
    timeout_secs: u64,
) -> Result<String, ServiceError> {
    let start = Instant::now();
    let result = match timeout(Duration::from_secs(timeout_secs), client.describe(prompt, image)).await {
        Err(_) => Err(ServiceError::new(
            ServiceFailureKind::Timeout,
            format!("no response from {} after {}s", client.name(), timeout_secs),
        )),
        Ok(Ok(text)) if text.trim().is_empty() => Err(ServiceError::new(
            ServiceFailureKind::MalformedResponse,
            format!("{} returned an empty response", client.name()),
        )),
        Ok(other) => other,
    };

    match &result {
        Ok(text) => debug!(
            "{} answered with {} bytes in {:?}",
            client.name(),
            text.len(),
            start.elapsed()
        ),
        Err(e) => warn!("{} request failed after {:?}: {}", client.name(), start.elapsed(), e),
    }
    result
}

/// Build `CompletionOptions` for the extraction call.
fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(Result<String, ServiceError>);

    #[async_trait]
    impl VisionClient for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn describe(&self, _prompt: &str, _image: &EncodedImage) -> Result<String, ServiceError> {
            self.0.clone()
        }
    }

    struct Stalled;

    #[async_trait]
    impl VisionClient for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn describe(&self, _prompt: &str, _image: &EncodedImage) -> Result<String, ServiceError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("late".into())
        }
    }

    fn image() -> EncodedImage {
        EncodedImage {
            base64: "AAAA".into(),
            mime_type: "image/png",
            width: 1,
            height: 1,
        }
    }

    #[test]
    fn build_options_sets_sampling() {
        let opts = build_options(0.1, 2048);
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(2048));
    }

    #[tokio::test]
    async fn passes_text_through() {
        let client = Canned(Ok("```json\n{}\n```".into()));
        let text = request_extraction(&client, "p", &image(), 5).await.unwrap();
        assert_eq!(text, "```json\n{}\n```");
    }

    #[tokio::test]
    async fn empty_reply_is_malformed() {
        let client = Canned(Ok("  \n".into()));
        let err = request_extraction(&client, "p", &image(), 5).await.unwrap_err();
        assert_eq!(err.kind, ServiceFailureKind::MalformedResponse);
    }

    #[tokio::test]
    async fn service_error_is_returned_unchanged() {
        let client = Canned(Err(ServiceError::new(ServiceFailureKind::Authentication, "bad key")));
        let err = request_extraction(&client, "p", &image(), 5).await.unwrap_err();
        assert_eq!(err.kind, ServiceFailureKind::Authentication);
        assert_eq!(err.message, "bad key");
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let err = request_extraction(&Stalled, "p", &image(), 1).await.unwrap_err();
        assert_eq!(err.kind, ServiceFailureKind::Timeout);
        assert!(err.message.contains("stalled"));
    }
}
