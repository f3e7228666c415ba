//! `.repobots.toml` settings.
//!
//! Model endpoints, the repository root, agent limits and memory tuning.
//! Values given on the command line override the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".repobots.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Repository access settings.
    #[serde(default)]
    pub repo: RepoConfig,

    /// Inspector agent settings.
    #[serde(default)]
    pub agent: AgentSettings,

    /// Retrieval memory settings.
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Bot handle used when none is given on the command line.
    #[serde(default = "default_bot")]
    pub default_bot: String,

    /// Display name of the local user.
    #[serde(default = "default_user_name")]
    pub user_name: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_bot: default_bot(),
            user_name: default_user_name(),
        }
    }
}

fn default_bot() -> String {
    "RepoInspector".to_string()
}

fn default_user_name() -> String {
    "user".to_string()
}

/// Which chat-completion API to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Ollama `/api/chat`
    #[default]
    Ollama,
    /// OpenAI-compatible `/chat/completions`
    Openai,
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// API flavour.
    #[serde(default)]
    pub provider: Provider,

    /// Base URL of the API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key (OpenAI-compatible only).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Cheap model used for file-path extraction.
    #[serde(default = "default_fast_model")]
    pub fast_model: String,

    /// Stronger model used by the inspector agent.
    #[serde(default = "default_slow_model")]
    pub slow_model: String,

    /// Temperature for agent generations.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds. `None` leaves model calls unbounded.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            fast_model: default_fast_model(),
            slow_model: default_slow_model(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_fast_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_slow_model() -> String {
    "qwen2.5-coder:32b".to_string()
}

fn default_temperature() -> f32 {
    0.0
}

fn default_timeout() -> Option<u64> {
    Some(600)
}

/// Repository access settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Root directory the bots may read from.
    #[serde(default = "default_repo_dir")]
    pub root_dir: PathBuf,

    /// Directory or file names to skip.
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,

    /// Maximum file size in bytes that may be read.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Maximum number of files to list.
    #[serde(default)]
    pub max_files: Option<usize>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            root_dir: default_repo_dir(),
            excludes: default_excludes(),
            max_file_size: default_max_file_size(),
            max_files: None,
        }
    }
}

fn default_repo_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_excludes() -> Vec<String> {
    vec![
        ".git",
        "target",
        "node_modules",
        "vendor",
        "dist",
        "build",
        "__pycache__",
        ".venv",
        "venv",
        ".idea",
        ".vscode",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_file_size() -> u64 {
    1024 * 1024 // 1MB
}

/// Inspector agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_ai_name")]
    pub ai_name: String,

    #[serde(default = "default_ai_role")]
    pub ai_role: String,

    /// Ask the user for feedback after every step.
    #[serde(default)]
    pub human_feedback: bool,

    /// Bound on the wait for human input. `None` waits forever.
    #[serde(default)]
    pub human_timeout_seconds: Option<u64>,

    /// Stop after this many iterations. `None` runs until `finish`.
    #[serde(default)]
    pub max_iterations: Option<usize>,

    /// Token budget for the whole prompt.
    #[serde(default = "default_send_token_limit")]
    pub send_token_limit: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            ai_name: default_ai_name(),
            ai_role: default_ai_role(),
            human_feedback: false,
            human_timeout_seconds: None,
            max_iterations: None,
            send_token_limit: default_send_token_limit(),
        }
    }
}

fn default_ai_name() -> String {
    "RepoInspector".to_string()
}

fn default_ai_role() -> String {
    "Source code researcher".to_string()
}

fn default_send_token_limit() -> usize {
    4196
}

/// Which embedder backs the retrieval memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Local feature-hashing embedder, no network.
    #[default]
    Hashing,
    /// The configured provider's embeddings endpoint.
    Remote,
}

/// Retrieval memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub embedder: EmbedderKind,

    /// Embedding model for the remote embedder.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Vector size of the hashing embedder.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Documents recalled per prompt.
    #[serde(default = "default_retrieve_k")]
    pub retrieve_k: usize,

    /// Token budget for recalled documents.
    #[serde(default = "default_memory_token_budget")]
    pub token_budget: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            embedder: EmbedderKind::default(),
            embedding_model: default_embedding_model(),
            dimension: default_dimension(),
            retrieve_k: default_retrieve_k(),
            token_budget: default_memory_token_budget(),
        }
    }
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_dimension() -> usize {
    512
}

fn default_retrieve_k() -> usize {
    4
}

fn default_memory_token_budget() -> usize {
    2500
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence, but only when they were actually given.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref bot) = args.bot {
            self.general.default_bot = bot.clone();
        }
        if let Some(ref dir) = args.repo_dir {
            self.repo.root_dir = dir.clone();
        }

        if let Some(provider) = args.provider {
            self.model.provider = provider;
        }
        if let Some(ref url) = args.base_url {
            self.model.base_url = url.clone();
        }
        if let Some(ref model) = args.fast_model {
            self.model.fast_model = model.clone();
        }
        if let Some(ref model) = args.slow_model {
            self.model.slow_model = model.clone();
        }
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = Some(timeout);
        }

        if args.human_feedback {
            self.agent.human_feedback = true;
        }
        if let Some(max) = args.max_iterations {
            self.agent.max_iterations = Some(max);
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
