//! LlmClient trait definition

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{CompletionRequest, CompletionResponse, LlmError, StreamChunk};

/// Stateless LLM client: each call is independent.
///
/// Conversation state lives in the agent loop's context ring buffer,
/// never in the client.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name used for rate-limit keys and cache keys
    fn provider(&self) -> &str;

    /// Model identifier sent on the wire
    fn model(&self) -> &str;

    /// Send a single completion request, blocking until complete
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Streaming completion. Chunks are sent to the channel as they
    /// arrive; the full response is returned at the end. Restartable
    /// only from scratch.
    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError>;

    /// Token count for budgeting. Providers without a native counter
    /// use the bytes/4 approximation.
    fn count_tokens(&self, text: &str) -> u64 {
        (text.len() / 4) as u64
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    type Scripted = Box<dyn FnMut(&CompletionRequest) -> Result<CompletionResponse, LlmError> + Send>;

    /// Mock client returning scripted responses in order
    pub struct MockLlmClient {
        script: Mutex<Vec<Scripted>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl MockLlmClient {
        /// Responses are consumed front-to-back; running out is an error
        pub fn new(responses: Vec<Result<CompletionResponse, LlmError>>) -> Self {
            let script = responses
                .into_iter()
                .map(|r| {
                    let mut slot = Some(r);
                    Box::new(move |_req: &CompletionRequest| {
                        slot.take().unwrap_or_else(|| {
                            Err(LlmError::InvalidResponse("mock response consumed twice".to_string()))
                        })
                    }) as Scripted
                })
                .collect();
            Self {
                script: Mutex::new(script),
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        fn provider(&self) -> &str {
            "mock"
        }

        fn model(&self) -> &str {
            "mock-model"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let idx = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            match script.get_mut(idx) {
                Some(f) => f(&request),
                None => Err(LlmError::InvalidResponse("no more mock responses".to_string())),
            }
        }

        async fn stream(
            &self,
            request: CompletionRequest,
            _chunk_tx: mpsc::Sender<StreamChunk>,
        ) -> Result<CompletionResponse, LlmError> {
            self.complete(request).await
        }
    }

    /// Shorthand for a plain end-turn text response
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            content: Some(text.to_string()),
            tool_calls: vec![],
            stop_reason: crate::llm::StopReason::EndTurn,
            usage: crate::llm::TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
                ..Default::default()
            },
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_mock_returns_in_order() {
            let client = MockLlmClient::new(vec![Ok(text_response("one")), Ok(text_response("two"))]);

            let r1 = client.complete(CompletionRequest::new("sys", 100)).await.unwrap();
            let r2 = client.complete(CompletionRequest::new("sys", 100)).await.unwrap();

            assert_eq!(r1.content.as_deref(), Some("one"));
            assert_eq!(r2.content.as_deref(), Some("two"));
            assert_eq!(client.call_count(), 2);
        }

        #[tokio::test]
        async fn test_mock_exhaustion_is_error() {
            let client = MockLlmClient::new(vec![]);
            let err = client.complete(CompletionRequest::new("sys", 100)).await.unwrap_err();
            assert!(matches!(err, LlmError::InvalidResponse(_)));
        }

        #[test]
        fn test_default_token_count_approximation() {
            let client = MockLlmClient::new(vec![]);
            assert_eq!(client.count_tokens("12345678"), 2);
        }
    }
}
