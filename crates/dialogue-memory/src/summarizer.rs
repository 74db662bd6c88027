//! Multi-provider summary generation with bounded retries

use std::sync::Arc;
use std::time::Duration;

use minijinja::{Environment, context};

use dialogue_core::{ChatMessage, DialogueError, LLMConfig, LLMError, ProviderRouter, Result};

use crate::config::{BackoffConfig, CompactionConfig};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryOutcome {
    pub success: bool,
    pub text: Option<String>,
    /// Provider that produced `text`.
    pub provider_id: Option<String>,
    pub attempts: u32,
    pub calls: u32,
}

impl SummaryOutcome {
    fn failed(attempts: u32, calls: u32) -> Self {
        Self {
            success: false,
            text: None,
            provider_id: None,
            attempts,
            calls,
        }
    }
}

pub struct SummaryOrchestrator {
    router: Arc<dyn ProviderRouter>,
    env: Environment<'static>,
    prompt_template: String,
    marker: String,
    max_chars: usize,
    preferred_provider_id: Option<String>,
    max_retries: u32,
    timeout: Option<Duration>,
    backoff: Option<BackoffConfig>,
    llm_config: LLMConfig,
}

impl SummaryOrchestrator {
    pub fn new(router: Arc<dyn ProviderRouter>, config: &CompactionConfig) -> Self {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| minijinja::AutoEscape::None);

        Self {
            router,
            env,
            prompt_template: config.prompt_template.clone(),
            marker: config.marker.clone(),
            max_chars: config.max_summary_chars,
            preferred_provider_id: config.summary_provider_id.clone(),
            max_retries: config.max_retries,
            timeout: config.provider_timeout(),
            backoff: config.retry_backoff.clone(),
            llm_config: config.summary_llm_config(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn render_prompt(&self, history: &[ChatMessage]) -> Result<String> {
        let transcript: String = history.iter().map(ChatMessage::transcript_line).collect();

        self.env
            .render_str(
                &self.prompt_template,
                context! {
                    history => transcript,
                    marker => self.marker,
                    max_chars => self.max_chars,
                },
            )
            .map_err(|e| DialogueError::Template(e.to_string()))
    }

    /// Run the full retry sequence over `[preferred, default]`.
    ///
    /// The first non-empty completion wins. Provider errors and empty
    /// completions move on to the next candidate, then to the next attempt.
    pub async fn summarize(
        &self,
        history: &[ChatMessage],
        default_provider_id: Option<&str>,
    ) -> SummaryOutcome {
        let prompt = match self.render_prompt(history) {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::error!(error = %e, "Failed to render summary prompt");
                return SummaryOutcome::failed(0, 0);
            }
        };

        let mut attempts = 0;
        let mut calls = 0;

        for attempt in 1..=self.max_retries {
            let candidates =
                provider_candidates(self.preferred_provider_id.as_deref(), default_provider_id);
            if candidates.is_empty() {
                tracing::error!("No provider available for summarization");
                break;
            }

            attempts = attempt;
            tracing::info!(
                "Generating summary (attempt {}/{})",
                attempt,
                self.max_retries
            );

            for provider_id in &candidates {
                calls += 1;
                tracing::info!(provider_id = %provider_id, "Requesting summary");

                match self.call_provider(provider_id, &prompt).await {
                    Ok(text) => {
                        let text = text.trim();
                        if text.is_empty() {
                            tracing::warn!(provider_id = %provider_id, "Provider returned an empty summary");
                            continue;
                        }

                        let preview: String = text.chars().take(50).collect();
                        tracing::info!(provider_id = %provider_id, "Summary generated: {}...", preview);
                        return SummaryOutcome {
                            success: true,
                            text: Some(text.to_string()),
                            provider_id: Some(provider_id.clone()),
                            attempts,
                            calls,
                        };
                    }
                    Err(e) => {
                        tracing::warn!(
                            provider_id = %provider_id,
                            error = %e,
                            "Summary generation failed"
                        );
                    }
                }
            }

            if attempt < self.max_retries {
                if let Some(backoff) = &self.backoff {
                    let wait = backoff.delay(attempt);
                    tracing::debug!("Retrying summary in {:?}", wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }

        tracing::error!(attempts, calls, "All summary attempts failed, giving up");
        SummaryOutcome::failed(attempts, calls)
    }

    async fn call_provider(&self, provider_id: &str, prompt: &str) -> std::result::Result<String, LLMError> {
        let call = self
            .router
            .generate(provider_id, prompt, &[], Some(&self.llm_config));
        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| LLMError::Timeout(limit))??,
            None => call.await?,
        };
        Ok(response.content)
    }
}

/// Ordered, de-duplicated provider ids to try in one attempt.
pub fn provider_candidates(preferred: Option<&str>, default: Option<&str>) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::with_capacity(2);
    for id in [preferred, default].into_iter().flatten() {
        if id.is_empty() || candidates.iter().any(|c| c == id) {
            continue;
        }
        candidates.push(id.to_string());
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialogue_core::{FinishReason, LLMResponse};
    use dialogue_llm::{LLMRegistry, MockLLMProvider};

    fn history(n: usize) -> Vec<ChatMessage> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("question {}", i))
                } else {
                    ChatMessage::assistant(format!("answer {}", i))
                }
            })
            .collect()
    }

    fn registry(providers: &[(&str, &MockLLMProvider)]) -> Arc<LLMRegistry> {
        let mut registry = LLMRegistry::new();
        for (alias, provider) in providers {
            registry.register(*alias, Arc::new((*provider).clone()));
        }
        Arc::new(registry)
    }

    fn config_with_preferred(preferred: Option<&str>) -> CompactionConfig {
        CompactionConfig {
            summary_provider_id: preferred.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_provider_candidates() {
        assert_eq!(provider_candidates(Some("a"), Some("b")), vec!["a", "b"]);
        assert_eq!(provider_candidates(Some("a"), Some("a")), vec!["a"]);
        assert_eq!(provider_candidates(None, Some("b")), vec!["b"]);
        assert_eq!(provider_candidates(Some("a"), None), vec!["a"]);
        assert_eq!(provider_candidates(Some(""), Some("b")), vec!["b"]);
        assert!(provider_candidates(None, None).is_empty());
    }

    #[test]
    fn test_render_prompt_embeds_transcript() {
        let orchestrator =
            SummaryOrchestrator::new(registry(&[]), &CompactionConfig::default());
        let prompt = orchestrator
            .render_prompt(&[ChatMessage::user("<hi> & bye"), ChatMessage::assistant("ok")])
            .unwrap();

        assert!(prompt.contains("user: <hi> & bye\nassistant: ok\n"));
        assert!(prompt.contains("“【前情提要】”"));
        assert!(prompt.contains("500 字以内"));
    }

    #[tokio::test]
    async fn test_first_candidate_short_circuits() {
        let mut preferred = MockLLMProvider::new("preferred");
        preferred.set_response("【前情提要】Alice and Bob discussed X...");
        let fallback = MockLLMProvider::new("fallback");

        let router = registry(&[("preferred", &preferred), ("fallback", &fallback)]);
        let orchestrator = SummaryOrchestrator::new(router, &config_with_preferred(Some("preferred")));

        let outcome = orchestrator.summarize(&history(40), Some("fallback")).await;
        assert!(outcome.success);
        assert_eq!(
            outcome.text.as_deref(),
            Some("【前情提要】Alice and Bob discussed X...")
        );
        assert_eq!(outcome.provider_id.as_deref(), Some("preferred"));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.calls, 1);
        assert_eq!(preferred.call_count(), 1);
        assert_eq!(fallback.call_count(), 0);

        let call = preferred.last_call().unwrap();
        assert_eq!(call.messages.len(), 1);
        assert!(call.messages[0].content.contains("question 0"));
    }

    #[tokio::test]
    async fn test_summary_calls_carry_token_budget() {
        let mut provider = MockLLMProvider::new("only");
        provider.set_response("【前情提要】short");

        let router = registry(&[("only", &provider)]);
        let config = CompactionConfig {
            max_summary_chars: 100,
            summary_temperature: Some(0.2),
            ..Default::default()
        };
        let orchestrator = SummaryOrchestrator::new(router, &config);

        let outcome = orchestrator.summarize(&history(4), Some("only")).await;
        assert!(outcome.success);

        let sent = provider.last_call().unwrap().config.unwrap();
        assert_eq!(sent.max_tokens, Some(264));
        assert_eq!(sent.temperature, Some(0.2));
    }

    #[tokio::test]
    async fn test_recovers_on_later_attempt() {
        let mut provider = MockLLMProvider::new("flaky");
        provider.add_error("overloaded");
        provider.add_response(LLMResponse::new("【前情提要】back online", FinishReason::Stop));

        let router = registry(&[("flaky", &provider)]);
        let orchestrator = SummaryOrchestrator::new(router, &config_with_preferred(None));

        let outcome = orchestrator.summarize(&history(4), Some("flaky")).await;
        assert!(outcome.success);
        assert_eq!(outcome.text.as_deref(), Some("【前情提要】back online"));
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.calls, 2);
    }

    #[tokio::test]
    async fn test_falls_back_to_default_within_attempt() {
        let mut preferred = MockLLMProvider::new("preferred");
        preferred.set_error("quota exceeded");
        let mut fallback = MockLLMProvider::new("fallback");
        fallback.set_response("summary from fallback");

        let router = registry(&[("preferred", &preferred), ("fallback", &fallback)]);
        let orchestrator = SummaryOrchestrator::new(router, &config_with_preferred(Some("preferred")));

        let outcome = orchestrator.summarize(&history(40), Some("fallback")).await;
        assert!(outcome.success);
        assert_eq!(outcome.provider_id.as_deref(), Some("fallback"));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.calls, 2);
    }

    #[tokio::test]
    async fn test_total_failure_is_bounded() {
        let mut preferred = MockLLMProvider::new("preferred");
        preferred.set_error("down");
        let mut fallback = MockLLMProvider::new("fallback");
        fallback.set_error("also down");

        let router = registry(&[("preferred", &preferred), ("fallback", &fallback)]);
        let orchestrator = SummaryOrchestrator::new(router, &config_with_preferred(Some("preferred")));

        let outcome = orchestrator.summarize(&history(40), Some("fallback")).await;
        assert!(!outcome.success);
        assert!(outcome.text.is_none());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.calls, 6);
        assert_eq!(preferred.call_count(), 3);
        assert_eq!(fallback.call_count(), 3);
    }

    #[tokio::test]
    async fn test_empty_completion_counts_as_failure() {
        let mut provider = MockLLMProvider::new("only");
        provider.set_responses(vec!["   ".to_string(), "".to_string(), "  third time  ".to_string()], false);

        let router = registry(&[("only", &provider)]);
        let orchestrator = SummaryOrchestrator::new(router, &config_with_preferred(None));

        let outcome = orchestrator.summarize(&history(4), Some("only")).await;
        assert!(outcome.success);
        assert_eq!(outcome.text.as_deref(), Some("third time"));
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_no_candidates_aborts_immediately() {
        let orchestrator =
            SummaryOrchestrator::new(registry(&[]), &config_with_preferred(None));

        let outcome = orchestrator.summarize(&history(40), None).await;
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.calls, 0);
    }

    #[tokio::test]
    async fn test_unregistered_provider_is_a_provider_error() {
        let mut fallback = MockLLMProvider::new("fallback");
        fallback.set_response("ok");

        let router = registry(&[("fallback", &fallback)]);
        let orchestrator = SummaryOrchestrator::new(router, &config_with_preferred(Some("missing")));

        let outcome = orchestrator.summarize(&history(2), Some("fallback")).await;
        assert!(outcome.success);
        assert_eq!(outcome.calls, 2);
    }

    #[tokio::test]
    async fn test_zero_retries_never_calls() {
        let provider = MockLLMProvider::new("only");
        let router = registry(&[("only", &provider)]);
        let config = CompactionConfig {
            max_retries: 0,
            ..Default::default()
        };
        let orchestrator = SummaryOrchestrator::new(router, &config);

        let outcome = orchestrator.summarize(&history(2), Some("only")).await;
        assert!(!outcome.success);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_moves_to_next_candidate() {
        let mut slow = MockLLMProvider::new("slow");
        slow.set_latency(500);
        slow.set_response("too late");
        let mut fast = MockLLMProvider::new("fast");
        fast.set_response("in time");

        let router = registry(&[("slow", &slow), ("fast", &fast)]);
        let orchestrator = SummaryOrchestrator::new(router, &config_with_preferred(Some("slow")))
            .with_timeout(Duration::from_millis(50));

        let outcome = orchestrator.summarize(&history(2), Some("fast")).await;
        assert!(outcome.success);
        assert_eq!(outcome.text.as_deref(), Some("in time"));
    }
}
