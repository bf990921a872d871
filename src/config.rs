use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub env: EnvMode,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Environment mode. `demo` swaps the Google providers for deterministic
/// in-process mocks so the assistant can run without credentials.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnvMode {
    #[default]
    Dev,
    Demo,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailConfig {
    /// OAuth client secrets JSON downloaded from the provider console.
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    /// Directory holding per-account token files (`token_<email>.json`).
    #[serde(default = "default_token_dir")]
    pub token_dir: PathBuf,
    /// Initial backfill window in days when no cursor exists.
    #[serde(default = "default_backfill_days")]
    pub backfill_days: i64,
    /// Hard cap on messages fetched during a backfill.
    #[serde(default = "default_max_backfill")]
    pub max_backfill_messages: usize,
    /// Messages requested per provider list call.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            token_dir: default_token_dir(),
            backfill_days: default_backfill_days(),
            max_backfill_messages: default_max_backfill(),
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            accounts: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AccountConfig {
    pub email: String,
    #[serde(default)]
    pub primary: bool,
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.json")
}
fn default_token_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_backfill_days() -> i64 {
    30
}
fn default_max_backfill() -> usize {
    500
}
fn default_page_size() -> usize {
    50
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How many retrieved messages are folded into the prompt.
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,
    /// Days of calendar lookahead included as query context.
    #[serde(default = "default_calendar_days")]
    pub calendar_days: i64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            retrieval_k: default_retrieval_k(),
            calendar_days: default_calendar_days(),
        }
    }
}

fn default_llm_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_retrieval_k() -> usize {
    5
}
fn default_calendar_days() -> i64 {
    7
}

/// Rule set for the relevance filter. All weights and keyword lists are
/// configurable; the defaults mirror a conventional personal-inbox setup.
#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    #[serde(default)]
    pub trusted_senders: Vec<String>,
    #[serde(default = "default_subject_keywords")]
    pub subject_keywords: Vec<String>,
    #[serde(default = "default_body_keywords")]
    pub body_keywords: Vec<String>,
    #[serde(default = "default_spam_keywords")]
    pub spam_keywords: Vec<String>,
    #[serde(default = "default_marketing_sender_patterns")]
    pub marketing_sender_patterns: Vec<String>,
    /// Messages newer than this many days count as a weak positive signal.
    #[serde(default = "default_recency_days")]
    pub recency_days: i64,
    #[serde(default = "default_body_keyword_weight")]
    pub body_keyword_weight: f64,
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,
    #[serde(default = "default_spam_signal_weight")]
    pub spam_signal_weight: f64,
    /// A message is relevant when weak positives minus spam signals
    /// exceed this threshold (strong rules bypass scoring entirely).
    #[serde(default)]
    pub relevance_threshold: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            trusted_senders: Vec::new(),
            subject_keywords: default_subject_keywords(),
            body_keywords: default_body_keywords(),
            spam_keywords: default_spam_keywords(),
            marketing_sender_patterns: default_marketing_sender_patterns(),
            recency_days: default_recency_days(),
            body_keyword_weight: default_body_keyword_weight(),
            recency_weight: default_recency_weight(),
            spam_signal_weight: default_spam_signal_weight(),
            relevance_threshold: 0.0,
        }
    }
}

fn default_subject_keywords() -> Vec<String> {
    [
        "meeting",
        "deadline",
        "urgent",
        "important",
        "assignment",
        "project",
        "schedule",
        "appointment",
        "interview",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_body_keywords() -> Vec<String> {
    [
        "deadline",
        "due",
        "meeting",
        "appointment",
        "attached",
        "attachment",
        "action required",
        "please review",
        "please respond",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_spam_keywords() -> Vec<String> {
    [
        "unsubscribe",
        "promotion",
        "sale",
        "discount",
        "offer",
        "deal",
        "newsletter",
        "advertisement",
        "sponsored",
        "free trial",
        "view in browser",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_marketing_sender_patterns() -> Vec<String> {
    ["marketing", "promo"].iter().map(|s| s.to_string()).collect()
}

fn default_recency_days() -> i64 {
    30
}
fn default_body_keyword_weight() -> f64 {
    0.2
}
fn default_recency_weight() -> f64 {
    0.15
}
fn default_spam_signal_weight() -> f64 {
    0.25
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    300
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.mail.backfill_days < 1 {
        anyhow::bail!("mail.backfill_days must be >= 1");
    }
    if config.mail.page_size == 0 {
        anyhow::bail!("mail.page_size must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.llm.retrieval_k == 0 || config.llm.retrieval_k > 50 {
        anyhow::bail!("llm.retrieval_k must be in 1..=50");
    }
    if config.filter.recency_days < 0 {
        anyhow::bail!("filter.recency_days must be >= 0");
    }
    if config.scheduler.enabled && config.scheduler.interval_secs == 0 {
        anyhow::bail!("scheduler.interval_secs must be > 0 when enabled");
    }

    Ok(())
}
