use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const STRATA_DIR_NAME: &str = ".strata";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_HUGGINGFACE_API_KEY_ENV: &str = "HUGGINGFACE_API_TOKEN";
pub const DEFAULT_HUGGINGFACE_ENDPOINT: &str = "https://router.huggingface.co/v1/chat/completions";
pub const DEFAULT_HUGGINGFACE_MODEL: &str = "openai/gpt-oss-120b";
pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://127.0.0.1:11434/api/generate";
pub const DEFAULT_OLLAMA_MODEL: &str = "qwen2.5-coder:7b";

pub const DEFAULT_FILE_COUNT: usize = 5;
pub const DEFAULT_CONTEXT_FILE_COUNT: usize = 10;
pub const DEFAULT_JOURNEY_CONCURRENCY: usize = 2;
pub const MAX_JOURNEY_CONCURRENCY: usize = 4;
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_LESSONS: usize = 8;
pub const DEFAULT_MAX_NAMED_PIECES: usize = 10;
pub const DEFAULT_MAX_COMMITS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InferenceProviderKind {
    #[default]
    Auto,
    Mock,
    #[serde(rename = "huggingface")]
    HuggingFace,
    Ollama,
}

impl InferenceProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Mock => "mock",
            Self::HuggingFace => "huggingface",
            Self::Ollama => "ollama",
        }
    }
}

impl std::str::FromStr for InferenceProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "auto" => Ok(Self::Auto),
            "mock" => Ok(Self::Mock),
            "huggingface" => Ok(Self::HuggingFace),
            "ollama" => Ok(Self::Ollama),
            other => Err(format!(
                "invalid provider '{other}', expected one of: auto, mock, huggingface, ollama"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StrataConfig {
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default)]
    pub provider: InferenceProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            provider: InferenceProviderKind::Auto,
            model: None,
            endpoint: None,
            api_key_env: default_api_key_env(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_file_count")]
    pub default_file_count: usize,
    #[serde(default = "default_context_file_count")]
    pub context_file_count: usize,
    #[serde(default = "default_journey_concurrency")]
    pub journey_concurrency: usize,
    #[serde(default = "default_oracle_timeout_secs")]
    pub oracle_timeout_secs: u64,
    #[serde(default = "default_max_lessons")]
    pub max_lessons: usize,
    #[serde(default = "default_max_named_pieces")]
    pub max_named_pieces: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            default_file_count: DEFAULT_FILE_COUNT,
            context_file_count: DEFAULT_CONTEXT_FILE_COUNT,
            journey_concurrency: DEFAULT_JOURNEY_CONCURRENCY,
            oracle_timeout_secs: DEFAULT_ORACLE_TIMEOUT_SECS,
            max_lessons: DEFAULT_MAX_LESSONS,
            max_named_pieces: DEFAULT_MAX_NAMED_PIECES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_commits")]
    pub max_commits: usize,
    #[serde(default)]
    pub include_diffs: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_commits: DEFAULT_MAX_COMMITS,
            include_diffs: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn strata_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(STRATA_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    strata_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<StrataConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(StrataConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: StrataConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<StrataConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(strata_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = StrataConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

/// Flags values that load fine but will be clamped or ignored at run time.
pub fn validate_config(config: &StrataConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();
    let analysis = &config.analysis;

    if analysis.default_file_count == 0 {
        warnings.push(ConfigWarning {
            code: "analysis.default_file_count",
            message: "default_file_count is 0, runs without --file analyse nothing".to_owned(),
        });
    }
    if analysis.journey_concurrency == 0 || analysis.journey_concurrency > MAX_JOURNEY_CONCURRENCY
    {
        warnings.push(ConfigWarning {
            code: "analysis.journey_concurrency",
            message: format!(
                "journey_concurrency {} is outside 1..={MAX_JOURNEY_CONCURRENCY} and will be clamped",
                analysis.journey_concurrency
            ),
        });
    }
    if analysis.oracle_timeout_secs == 0 {
        warnings.push(ConfigWarning {
            code: "analysis.oracle_timeout_secs",
            message: format!(
                "oracle_timeout_secs is 0, using {DEFAULT_ORACLE_TIMEOUT_SECS} instead"
            ),
        });
    }
    if config.history.max_commits == 0 {
        warnings.push(ConfigWarning {
            code: "history.max_commits",
            message: "max_commits is 0, fetch will store an empty history".to_owned(),
        });
    }
    if config.inference.provider == InferenceProviderKind::Ollama
        && config.inference.endpoint.is_none()
    {
        warnings.push(ConfigWarning {
            code: "inference.endpoint",
            message: format!("no endpoint set for ollama, using {DEFAULT_OLLAMA_ENDPOINT}"),
        });
    }

    warnings
}

impl AnalysisConfig {
    pub fn effective_journey_concurrency(&self) -> usize {
        self.journey_concurrency.clamp(1, MAX_JOURNEY_CONCURRENCY)
    }

    pub fn effective_oracle_timeout_secs(&self) -> u64 {
        if self.oracle_timeout_secs == 0 {
            DEFAULT_ORACLE_TIMEOUT_SECS
        } else {
            self.oracle_timeout_secs
        }
    }
}

fn default_api_key_env() -> String {
    DEFAULT_HUGGINGFACE_API_KEY_ENV.to_owned()
}

fn default_file_count() -> usize {
    DEFAULT_FILE_COUNT
}

fn default_context_file_count() -> usize {
    DEFAULT_CONTEXT_FILE_COUNT
}

fn default_journey_concurrency() -> usize {
    DEFAULT_JOURNEY_CONCURRENCY
}

fn default_oracle_timeout_secs() -> u64 {
    DEFAULT_ORACLE_TIMEOUT_SECS
}

fn default_max_lessons() -> usize {
    DEFAULT_MAX_LESSONS
}

fn default_max_named_pieces() -> usize {
    DEFAULT_MAX_NAMED_PIECES
}

fn default_max_commits() -> usize {
    DEFAULT_MAX_COMMITS
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_config(mut config: StrataConfig) -> StrataConfig {
    config.inference.model = normalize_optional(config.inference.model.take());
    config.inference.endpoint = normalize_optional(config.inference.endpoint.take());

    let api_key_env = config.inference.api_key_env.trim();
    if api_key_env.is_empty() {
        config.inference.api_key_env = default_api_key_env();
    } else {
        config.inference.api_key_env = api_key_env.to_owned();
    }

    config
}
