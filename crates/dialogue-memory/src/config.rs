//! Compaction engine configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use dialogue_core::{DialogueError, LLMConfig, Result};

pub const DEFAULT_MARKER: &str = "【前情提要】";

pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"请作为第三方观察者，对以下对话历史进行高度概括的总结。你的总结将被用作AI的长期记忆，帮助AI在后续对话中无缝衔接。
要求：
1. **字数限制**：控制在 {{ max_chars }} 字以内，言简意赅。
2. **格式要求**：请直接输出总结内容，不要包含任何开场白或结束语。总结内容必须以“{{ marker }}”开头。
3. **内容重点**：
   - 参与者的身份、称呼及关系。
   - 已完成的关键任务、达成的共识或重要决策。
   - 当前正在进行但未完成的话题或任务。
   - 重要的上下文约束（如用户偏好、设定的场景规则等）。
   - AI（你）在总结中则表述你自己的身份，这将会给未来的你自己看。
   - 并且要让未来的你自己明白这个前情提要并非来自用户所为，而是全自动总结。
4. **语气**：使用客观、陈述性的语气。

对话记录：
{{ history }}"#;

pub const DEFAULT_FAILURE_NOTICE: &str = "【无限对话插件警告】\n总结系统故障，无法连接到模型提供商。\n本次总结已放弃，对话历史将保留。请检查模型配置或网络连接。";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Group or sender ids allowed to trigger compaction. Empty allows everyone.
    #[serde(default, deserialize_with = "deserialize_whitelist")]
    pub whitelist: Vec<String>,

    #[serde(default = "default_max_conversation_length")]
    pub max_conversation_length: usize,

    #[serde(default)]
    pub summary_provider_id: Option<String>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub provider_timeout_secs: Option<u64>,

    #[serde(default)]
    pub retry_backoff: Option<BackoffConfig>,

    #[serde(default = "default_refetch_delay_ms")]
    pub refetch_delay_ms: u64,

    #[serde(default = "default_marker")]
    pub marker: String,

    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,

    #[serde(default = "default_failure_notice")]
    pub failure_notice: String,

    #[serde(default = "default_max_summary_chars")]
    pub max_summary_chars: usize,

    #[serde(default)]
    pub summary_temperature: Option<f32>,

    /// Compaction records kept per engine. Oldest are dropped first.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default, rename = "type")]
    pub backoff_type: BackoffType,
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

fn default_max_conversation_length() -> usize {
    40
}

fn default_max_retries() -> u32 {
    3
}

fn default_refetch_delay_ms() -> u64 {
    100
}

fn default_marker() -> String {
    DEFAULT_MARKER.to_string()
}

fn default_prompt_template() -> String {
    DEFAULT_PROMPT_TEMPLATE.to_string()
}

fn default_failure_notice() -> String {
    DEFAULT_FAILURE_NOTICE.to_string()
}

fn default_max_summary_chars() -> usize {
    500
}

fn default_max_history() -> usize {
    100
}

fn default_initial_ms() -> u64 {
    1000
}

fn default_max_ms() -> u64 {
    30000
}

fn default_multiplier() -> f64 {
    2.0
}

/// Whitelist entries show up as strings or bare numbers in hand-written configs.
fn deserialize_whitelist<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Entry {
        Text(String),
        Int(i64),
        Uint(u64),
    }

    let entries: Option<Vec<Entry>> = Option::deserialize(deserializer)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .map(|entry| match entry {
            Entry::Text(s) => s,
            Entry::Int(n) => n.to_string(),
            Entry::Uint(n) => n.to_string(),
        })
        .collect())
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            whitelist: Vec::new(),
            max_conversation_length: default_max_conversation_length(),
            summary_provider_id: None,
            max_retries: default_max_retries(),
            provider_timeout_secs: None,
            retry_backoff: None,
            refetch_delay_ms: default_refetch_delay_ms(),
            marker: default_marker(),
            prompt_template: default_prompt_template(),
            failure_notice: default_failure_notice(),
            max_summary_chars: default_max_summary_chars(),
            summary_temperature: None,
            max_history: default_max_history(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            backoff_type: BackoffType::default(),
            initial_ms: default_initial_ms(),
            max_ms: default_max_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl BackoffConfig {
    /// Wait before the attempt following `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial_ms as f64;

        let wait_ms = match self.backoff_type {
            BackoffType::Fixed => base,
            BackoffType::Linear => base * attempt as f64,
            BackoffType::Exponential => base * self.multiplier.powi(attempt as i32 - 1),
        };

        Duration::from_millis(wait_ms.min(self.max_ms as f64) as u64)
    }
}

impl CompactionConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_conversation_length == 0 {
            return Err(DialogueError::Config(
                "max_conversation_length must be at least 1".to_string(),
            ));
        }
        if self.marker.trim().is_empty() {
            return Err(DialogueError::Config("marker must not be empty".to_string()));
        }
        if let Some(0) = self.provider_timeout_secs {
            return Err(DialogueError::Config(
                "provider_timeout_secs must be positive when set".to_string(),
            ));
        }
        if let Some(t) = self.summary_temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(DialogueError::Config(format!(
                    "summary_temperature must be within 0.0..=2.0, got {}",
                    t
                )));
            }
        }

        let env = minijinja::Environment::new();
        env.template_from_str(&self.prompt_template)
            .map_err(|e| DialogueError::Template(e.to_string()))?;
        Ok(())
    }

    pub fn is_allowed(&self, id: Option<&str>) -> bool {
        if self.whitelist.is_empty() {
            return true;
        }
        let id = id.unwrap_or_default();
        self.whitelist.iter().any(|entry| entry == id)
    }

    pub fn provider_timeout(&self) -> Option<Duration> {
        self.provider_timeout_secs.map(Duration::from_secs)
    }

    pub fn refetch_delay(&self) -> Duration {
        Duration::from_millis(self.refetch_delay_ms)
    }

    /// Completion settings for summary calls. A CJK character can cost two
    /// tokens, plus headroom for the marker.
    pub fn summary_llm_config(&self) -> LLMConfig {
        let budget = self.max_summary_chars.saturating_mul(2).saturating_add(64);
        let mut config = LLMConfig::new().with_max_tokens(u32::try_from(budget).unwrap_or(u32::MAX));
        if let Some(t) = self.summary_temperature {
            config = config.with_temperature(t);
        }
        config
    }
}
