use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use dialogue_core::{
    ChatMessage, FinishReason, LLMConfig, LLMError, LLMProvider, LLMResponse, TokenUsage,
};

/// Mock LLM provider for testing
#[derive(Clone)]
pub struct MockLLMProvider {
    name: String,
    inner: Arc<RwLock<MockLLMProviderInner>>,
}

#[derive(Debug, Clone)]
pub enum MockOutcome {
    Respond(LLMResponse),
    Fail(String),
}

struct MockLLMProviderInner {
    script: Vec<MockOutcome>,
    script_index: usize,
    cycle_script: bool,
    call_history: Vec<MockCall>,
    should_error: bool,
    error_message: String,
    latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct MockCall {
    pub messages: Vec<ChatMessage>,
    pub config: Option<LLMConfig>,
    pub timestamp: std::time::Instant,
}

impl MockLLMProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(RwLock::new(MockLLMProviderInner {
                script: Vec::new(),
                script_index: 0,
                cycle_script: false,
                call_history: Vec::new(),
                should_error: false,
                error_message: "Mock error".to_string(),
                latency_ms: 0,
            })),
        }
    }

    /// Queue a response. Scripted outcomes are played in order and the last
    /// one repeats once the script is exhausted.
    pub fn add_response(&mut self, response: LLMResponse) {
        self.inner.write().script.push(MockOutcome::Respond(response));
    }

    /// Queue a failure.
    pub fn add_error(&mut self, error_message: impl Into<String>) {
        self.inner
            .write()
            .script
            .push(MockOutcome::Fail(error_message.into()));
    }

    pub fn set_response(&mut self, response: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.script = vec![MockOutcome::Respond(LLMResponse::new(
            response,
            FinishReason::Stop,
        ))];
        inner.script_index = 0;
    }

    pub fn set_responses(&mut self, responses: Vec<String>, cycle: bool) {
        let mut inner = self.inner.write();
        inner.script = responses
            .into_iter()
            .map(|r| MockOutcome::Respond(LLMResponse::new(r, FinishReason::Stop)))
            .collect();
        inner.script_index = 0;
        inner.cycle_script = cycle;
    }

    /// Fail every call regardless of the script.
    pub fn set_error(&mut self, error_message: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.should_error = true;
        inner.error_message = error_message.into();
    }

    pub fn set_latency(&mut self, latency_ms: u64) {
        self.inner.write().latency_ms = latency_ms;
    }

    pub fn call_count(&self) -> usize {
        self.inner.read().call_history.len()
    }

    pub fn call_history(&self) -> Vec<MockCall> {
        self.inner.read().call_history.clone()
    }

    pub fn last_call(&self) -> Option<MockCall> {
        self.inner.read().call_history.last().cloned()
    }

    fn next_outcome(&self) -> MockOutcome {
        let mut inner = self.inner.write();

        if inner.should_error {
            return MockOutcome::Fail(inner.error_message.clone());
        }

        if inner.script.is_empty() {
            return MockOutcome::Respond(
                LLMResponse::new("Mock response", FinishReason::Stop).with_model("mock-model"),
            );
        }

        let outcome = inner.script[inner.script_index].clone();
        if inner.cycle_script {
            inner.script_index = (inner.script_index + 1) % inner.script.len();
        } else if inner.script_index < inner.script.len() - 1 {
            inner.script_index += 1;
        }
        outcome
    }

    fn record_call(&self, messages: &[ChatMessage], config: Option<&LLMConfig>) {
        self.inner.write().call_history.push(MockCall {
            messages: messages.to_vec(),
            config: config.cloned(),
            timestamp: std::time::Instant::now(),
        });
    }

    async fn simulate_latency(&self) {
        let latency_ms = self.inner.read().latency_ms;
        if latency_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(latency_ms)).await;
        }
    }

    fn estimate_tokens(messages: &[ChatMessage]) -> u32 {
        let total_chars: usize = messages.iter().map(|m| m.content.len()).sum();
        (total_chars / 4) as u32
    }
}

impl Default for MockLLMProvider {
    fn default() -> Self {
        Self::new("default")
    }
}

#[async_trait]
impl LLMProvider for MockLLMProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        config: Option<&LLMConfig>,
    ) -> Result<LLMResponse, LLMError> {
        self.record_call(messages, config);
        self.simulate_latency().await;

        let mut response = match self.next_outcome() {
            MockOutcome::Respond(response) => response,
            MockOutcome::Fail(message) => return Err(LLMError::Other(message)),
        };

        if response.usage.is_none() {
            let prompt_tokens = Self::estimate_tokens(messages);
            let completion_tokens = (response.content.len() / 4) as u32;
            response.usage = Some(TokenUsage::new(prompt_tokens, completion_tokens));
        }

        Ok(response)
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_basic() {
        let mut mock = MockLLMProvider::new("test");

        mock.set_response("Mock response");
        let messages = vec![ChatMessage::user("Hello")];
        let response = mock.complete(&messages, None).await.unwrap();
        assert_eq!(response.content, "Mock response");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(mock.provider_name(), "test");
    }

    #[tokio::test]
    async fn test_multiple_responses() {
        let mut mock = MockLLMProvider::new("test");
        mock.set_responses(
            vec![
                "First".to_string(),
                "Second".to_string(),
                "Third".to_string(),
            ],
            false,
        );

        let messages = vec![ChatMessage::user("Hello")];

        assert_eq!(mock.complete(&messages, None).await.unwrap().content, "First");
        assert_eq!(mock.complete(&messages, None).await.unwrap().content, "Second");
        assert_eq!(mock.complete(&messages, None).await.unwrap().content, "Third");
        assert_eq!(mock.complete(&messages, None).await.unwrap().content, "Third");
    }

    #[tokio::test]
    async fn test_cycle_responses() {
        let mut mock = MockLLMProvider::new("test");
        mock.set_responses(vec!["A".to_string(), "B".to_string()], true);

        let messages = vec![ChatMessage::user("Hello")];

        assert_eq!(mock.complete(&messages, None).await.unwrap().content, "A");
        assert_eq!(mock.complete(&messages, None).await.unwrap().content, "B");
        assert_eq!(mock.complete(&messages, None).await.unwrap().content, "A");
    }

    #[tokio::test]
    async fn test_scripted_error_then_success() {
        let mut mock = MockLLMProvider::new("flaky");
        mock.add_error("quota exceeded");
        mock.add_response(LLMResponse::new("recovered", FinishReason::Stop));

        let messages = vec![ChatMessage::user("Hello")];
        let first = mock.complete(&messages, None).await;
        assert!(first.unwrap_err().to_string().contains("quota exceeded"));

        let second = mock.complete(&messages, None).await.unwrap();
        assert_eq!(second.content, "recovered");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_error_handling() {
        let mut mock = MockLLMProvider::new("test");
        mock.set_response("unused");
        mock.set_error("Test error");

        let messages = vec![ChatMessage::user("Hello")];
        let result = mock.complete(&messages, None).await;
        assert!(result.unwrap_err().to_string().contains("Test error"));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_call_history() {
        let mut mock = MockLLMProvider::new("test");
        mock.set_response("test");
        assert_eq!(mock.call_count(), 0);

        mock.complete(&[ChatMessage::user("First")], None)
            .await
            .unwrap();
        mock.complete(&[ChatMessage::user("Second")], None)
            .await
            .unwrap();

        assert_eq!(mock.call_history().len(), 2);
        let last = mock.last_call().unwrap();
        assert_eq!(last.messages[0].content, "Second");
        assert!(last.config.is_none());
    }

    #[tokio::test]
    async fn test_token_estimation() {
        let mut mock = MockLLMProvider::new("test");
        mock.set_response("test");
        let messages = vec![
            ChatMessage::user("Hello world"),
            ChatMessage::assistant("Hi there"),
        ];

        let usage = mock.complete(&messages, None).await.unwrap().usage.unwrap();
        assert!(usage.prompt_tokens > 0);
        assert_eq!(
            usage.total_tokens,
            usage.prompt_tokens + usage.completion_tokens
        );
    }
}
