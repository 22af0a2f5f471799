use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for git-quick
///
/// Loaded once per invocation and treated as an immutable snapshot afterwards.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    /// Quick-commit behaviour
    #[serde(default)]
    pub quick: QuickConfig,

    /// History summarization
    #[serde(default)]
    pub story: StoryConfig,

    /// Time tracking
    #[serde(default)]
    pub time: TimeConfig,

    /// Multi-branch synchronization
    #[serde(default)]
    pub sync: SyncConfig,

    /// AI provider credentials and endpoints
    #[serde(default)]
    pub ai: AiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Emoji decoration applied to commit subjects
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmojiStyle {
    #[default]
    Gitmoji,
    None,
}

/// Supported AI providers
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    Ollama,
    OpenAi,
    Anthropic,
}

impl AiProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiProvider::Ollama => "ollama",
            AiProvider::OpenAi => "openai",
            AiProvider::Anthropic => "anthropic",
        }
    }

    /// Model used when `quick.ai_model` is not set
    pub fn default_model(&self) -> &'static str {
        match self {
            AiProvider::Ollama => "llama3.2",
            AiProvider::OpenAi => "gpt-4o-mini",
            AiProvider::Anthropic => "claude-3-5-haiku-latest",
        }
    }
}

impl fmt::Display for AiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quick-commit configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct QuickConfig {
    /// Push after commit
    #[serde(default = "default_true")]
    pub auto_push: bool,

    #[serde(default)]
    pub emoji_style: EmojiStyle,

    /// Absent means heuristic messages only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_provider: Option<AiProvider>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_model: Option<String>,

    /// Enforce the conventional commit type enum
    #[serde(default = "default_true")]
    pub conventional_commits: bool,
}

/// Commit grouping in story reports
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    #[default]
    Date,
    Author,
    None,
}

/// Story configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StoryConfig {
    /// "last-release" or an explicit revision range
    #[serde(default = "default_range")]
    pub default_range: String,

    #[serde(default = "default_max_commits")]
    pub max_commits: usize,

    #[serde(default)]
    pub group_by: GroupBy,
}

/// Time tracking configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TimeConfig {
    /// Start tracking on the first command of a session
    #[serde(default = "default_true")]
    pub auto_track: bool,

    /// Seconds without activity before a session is closed
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold: u64,

    /// Directory holding the append-only time log
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Seconds between activity polls in watch mode
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SyncConfig {
    /// Auto-stash uncommitted changes
    #[serde(default = "default_true")]
    pub auto_stash: bool,

    /// Remove stale remote-tracking refs after sync
    #[serde(default = "default_true")]
    pub prune: bool,

    /// Fetch every remote before comparing
    #[serde(default = "default_true")]
    pub fetch_all: bool,

    /// Branches processed first, in this order
    #[serde(default)]
    pub priority: Vec<String>,

    /// Timeout for network git operations in seconds
    #[serde(default = "default_network_timeout")]
    pub network_timeout: u64,

    /// Delay before retrying a failed fetch
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// AI provider credentials
#[derive(Deserialize, Serialize, Clone, PartialEq)]
pub struct AiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_api_key: Option<String>,

    #[serde(default = "default_ollama_host")]
    pub ollama_host: String,

    /// Request timeout in seconds
    #[serde(default = "default_ai_timeout")]
    pub timeout: u64,
}

// Keys never end up in logs
impl fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |key: &Option<String>| key.as_ref().map(|_| "<redacted>");
        f.debug_struct("AiConfig")
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("anthropic_api_key", &redact(&self.anthropic_api_key))
            .field("ollama_host", &self.ollama_host)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_range() -> String {
    "last-release".to_string()
}
fn default_max_commits() -> usize {
    50
}
fn default_idle_threshold() -> u64 {
    300
}
fn default_data_dir() -> String {
    "~/.gitquick/time".to_string()
}
fn default_poll_interval() -> u64 {
    30
}
fn default_network_timeout() -> u64 {
    60
}
fn default_retry_backoff_ms() -> u64 {
    2000
}
fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}
fn default_ai_timeout() -> u64 {
    30
}
fn default_log_level() -> String {
    "warn".to_string()
}

// Default implementations
impl Default for QuickConfig {
    fn default() -> Self {
        Self {
            auto_push: default_true(),
            emoji_style: EmojiStyle::default(),
            ai_provider: None,
            ai_model: None,
            conventional_commits: default_true(),
        }
    }
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            default_range: default_range(),
            max_commits: default_max_commits(),
            group_by: GroupBy::default(),
        }
    }
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            auto_track: default_true(),
            idle_threshold: default_idle_threshold(),
            data_dir: default_data_dir(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_stash: default_true(),
            prune: default_true(),
            fetch_all: default_true(),
            priority: Vec::new(),
            network_timeout: default_network_timeout(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            anthropic_api_key: None,
            ollama_host: default_ollama_host(),
            timeout: default_ai_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Resolve the configuration for this invocation: defaults, then the
    /// config file (explicit path or the default location), then environment
    /// credentials.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::load_or_default()?,
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();
            config.expand_paths()?;
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Write the default configuration unless a file already exists
    pub fn init_file(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        Self::default().save(path)?;
        tracing::info!("Created default configuration at: {:?}", path);
        Ok(true)
    }

    /// Set a single `section.key` in the file at `path` (read-modify-write).
    ///
    /// The value is parsed as TOML when possible so `true`, `300` and
    /// `["main"]` keep their types; anything else is stored as a string. The
    /// edited document must still deserialize into a valid `Config`.
    pub fn set_value(path: &Path, key: &str, raw_value: &str) -> Result<()> {
        let (section, field) = key
            .split_once('.')
            .ok_or_else(|| anyhow!("Key must look like section.key, got '{}'", key))?;

        let mut document: toml::Table = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            toml::Table::new()
        };

        let value = parse_toml_value(raw_value);
        let table = document
            .entry(section.to_string())
            .or_insert(toml::Value::Table(toml::Table::new()));
        match table {
            toml::Value::Table(table) => {
                table.insert(field.to_string(), value);
            }
            _ => bail!("'{}' is not a section", section),
        }

        let content = toml::to_string_pretty(&document).context("Failed to serialize configuration")?;
        let _: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid value for {}: {}", key, raw_value))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (~/.gitquick/config.toml)
    pub fn default_config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get user home directory")?;

        Ok(home.join(".gitquick").join("config.toml"))
    }

    /// Expand `~` and environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.time.data_dir = shellexpand::full(&self.time.data_dir)
            .context("Failed to expand data_dir path")?
            .into_owned();

        Ok(())
    }

    /// Fill missing provider keys from the environment
    pub fn apply_env(&mut self) {
        if self.ai.openai_api_key.is_none() {
            self.ai.openai_api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        }
        if self.ai.anthropic_api_key.is_none() {
            self.ai.anthropic_api_key = std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|k| !k.is_empty());
        }
        if let Ok(host) = std::env::var("OLLAMA_HOST") {
            if !host.is_empty() {
                self.ai.ollama_host = host;
            }
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.time.data_dir)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.time.idle_threshold)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.network_timeout)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.sync.retry_backoff_ms)
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai.timeout)
    }

    /// Model for the configured provider, falling back to its default
    pub fn ai_model(&self) -> Option<String> {
        self.quick.ai_provider.map(|provider| {
            self.quick
                .ai_model
                .clone()
                .unwrap_or_else(|| provider.default_model().to_string())
        })
    }
}

fn parse_toml_value(raw: &str) -> toml::Value {
    // Parse as the right-hand side of an assignment to reuse TOML's scalar rules
    toml::from_str::<toml::Table>(&format!("v = {}", raw))
        .ok()
        .and_then(|mut table| table.remove("v"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}
