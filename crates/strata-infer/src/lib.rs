use std::env;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use strata_config::{
    DEFAULT_HUGGINGFACE_API_KEY_ENV, InferenceProviderKind, ensure_workspace_config,
};
use strata_core::{
    ArchitecturalLesson, Impact, JourneyVerdict, NamedPiece, SynthesisVerdict, Timestamp,
    TokenUsage,
};
use thiserror::Error;

mod huggingface;
mod ollama;
mod prompt;
mod verdict;

pub use huggingface::HuggingFaceOracle;
pub use ollama::OllamaOracle;
pub use verdict::{
    DEFAULT_JOURNEY_DESCRIPTION, DEFAULT_LESSON_TITLE, DEFAULT_SYNTHESIS_SUMMARY,
    extract_json_object, is_context_window_message, parse_journey_verdict,
    parse_synthesis_verdict,
};

pub const MOCK_MODEL_NAME: &str = "mock";
const MOCK_HOTSPOT_MIN_SNAPSHOTS: usize = 3;
const HTTP_ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JourneySnapshot {
    pub message: String,
    pub diff: String,
    pub date: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JourneyRequest {
    pub file_path: String,
    /// Oldest first.
    pub snapshots: Vec<JourneySnapshot>,
    pub context: String,
    pub model_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub repo: String,
    pub verdicts: Vec<JourneyVerdict>,
    pub model_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProviderOverrides {
    pub provider: Option<InferenceProviderKind>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub api_key_env: Option<String>,
}

pub struct LoadedOracle {
    pub journey: Arc<dyn JourneyOracle>,
    pub synthesis: Arc<dyn SynthesisOracle>,
    pub provider_name: String,
    pub model_name: String,
}

#[derive(Debug, Error)]
pub enum InferError {
    #[error("missing API key in {0}")]
    MissingApiKey(String),
    #[error("config load failed: {0}")]
    Config(#[from] strata_config::ConfigError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("oracle returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("response decoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
    #[error("context window exceeded: {0}")]
    ContextWindowExceeded(String),
}

impl InferError {
    pub fn is_context_window_exceeded(&self) -> bool {
        matches!(self, Self::ContextWindowExceeded(_))
    }
}

/// Judges the history of one file.
#[async_trait]
pub trait JourneyOracle: Send + Sync {
    async fn analyze_journey(&self, request: &JourneyRequest) -> Result<JourneyVerdict, InferError>;
}

/// Folds every per-file verdict of a run into repository-wide lessons.
#[async_trait]
pub trait SynthesisOracle: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisVerdict, InferError>;
}

/// Deterministic oracle for offline runs and tests. Files with at least
/// three snapshots are reported as hotspots.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockOracle;

#[async_trait]
impl JourneyOracle for MockOracle {
    async fn analyze_journey(&self, request: &JourneyRequest) -> Result<JourneyVerdict, InferError> {
        let snapshot_count = request.snapshots.len();
        let is_hotspot = snapshot_count >= MOCK_HOTSPOT_MIN_SNAPSHOTS;

        let evolutionary_lessons = if is_hotspot {
            request
                .snapshots
                .iter()
                .rev()
                .take(3)
                .map(|snapshot| format!("Revisited: {}", snapshot.message))
                .collect()
        } else {
            Vec::new()
        };

        Ok(JourneyVerdict {
            path: request.file_path.clone(),
            description: format!(
                "Mock journey for {} across {snapshot_count} change(s)",
                request.file_path
            ),
            is_hotspot,
            evolutionary_lessons,
            reinforcement: (!is_hotspot)
                .then(|| format!("Mock reinforcement for {}", request.file_path)),
            tokens: TokenUsage::default(),
        })
    }
}

#[async_trait]
impl SynthesisOracle for MockOracle {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisVerdict, InferError> {
        let architectural_lessons = request
            .verdicts
            .iter()
            .filter(|verdict| verdict.is_hotspot)
            .map(|verdict| ArchitecturalLesson {
                title: format!("Churn in {}", verdict.path),
                lesson: verdict.evolutionary_lessons.join("; "),
                impact: Impact::High,
                affected_files: vec![verdict.path.clone()],
            })
            .collect();

        let files: Vec<String> = request
            .verdicts
            .iter()
            .map(|verdict| verdict.path.clone())
            .collect();
        let named_pieces = if files.is_empty() {
            Vec::new()
        } else {
            vec![NamedPiece {
                name: "Analysed files".to_owned(),
                description: format!("Mock grouping of {} file(s)", files.len()),
                files,
            }]
        };

        Ok(SynthesisVerdict {
            summary: format!(
                "Mock synthesis for {} over {} file(s)",
                request.repo,
                request.verdicts.len()
            ),
            architectural_lessons,
            named_pieces,
            tokens: TokenUsage::default(),
        })
    }
}

pub fn load_oracle_from_env_or_mock(
    workspace_root: impl AsRef<Path>,
    overrides: ProviderOverrides,
) -> Result<LoadedOracle, InferError> {
    let config = ensure_workspace_config(workspace_root)?;

    let selected_provider = overrides.provider.unwrap_or(config.inference.provider);
    let selected_model = first_non_empty(overrides.model, config.inference.model);
    let selected_endpoint = first_non_empty(overrides.endpoint, config.inference.endpoint);
    let selected_api_key_env =
        first_non_empty(overrides.api_key_env, Some(config.inference.api_key_env))
            .unwrap_or_else(|| DEFAULT_HUGGINGFACE_API_KEY_ENV.to_owned());

    let loaded = match selected_provider {
        InferenceProviderKind::Auto => match read_env_non_empty(&selected_api_key_env) {
            Some(api_key) => {
                let oracle = HuggingFaceOracle::new(api_key, selected_model, selected_endpoint);
                let model_name = oracle.model().to_owned();
                into_loaded(oracle, InferenceProviderKind::HuggingFace, model_name)
            }
            None => mock_loaded(),
        },
        InferenceProviderKind::Mock => mock_loaded(),
        InferenceProviderKind::HuggingFace => {
            let oracle = HuggingFaceOracle::from_env_key(
                &selected_api_key_env,
                selected_model,
                selected_endpoint,
            )?;
            let model_name = oracle.model().to_owned();
            into_loaded(oracle, InferenceProviderKind::HuggingFace, model_name)
        }
        InferenceProviderKind::Ollama => {
            let oracle = OllamaOracle::new(selected_endpoint, selected_model);
            let model_name = oracle.model().to_owned();
            into_loaded(oracle, InferenceProviderKind::Ollama, model_name)
        }
    };

    tracing::debug!(
        provider = %loaded.provider_name,
        model = %loaded.model_name,
        "loaded oracle provider"
    );
    Ok(loaded)
}

fn mock_loaded() -> LoadedOracle {
    into_loaded(MockOracle, InferenceProviderKind::Mock, MOCK_MODEL_NAME.to_owned())
}

fn into_loaded<T>(oracle: T, kind: InferenceProviderKind, model_name: String) -> LoadedOracle
where
    T: JourneyOracle + SynthesisOracle + 'static,
{
    let oracle = Arc::new(oracle);
    LoadedOracle {
        journey: oracle.clone(),
        synthesis: oracle,
        provider_name: kind.as_str().to_owned(),
        model_name,
    }
}

/// Sends a JSON request and decodes the JSON reply, turning non-success
/// statuses into [`InferError::Http`] or [`InferError::ContextWindowExceeded`].
pub(crate) async fn send_json(request: reqwest::RequestBuilder) -> Result<Value, InferError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_http_failure(status.as_u16(), body));
    }

    Ok(response.json().await?)
}

fn classify_http_failure(status: u16, body: String) -> InferError {
    let body: String = body.chars().take(HTTP_ERROR_BODY_LIMIT).collect();
    if status == 413 || is_context_window_message(&body) {
        return InferError::ContextWindowExceeded(format!("HTTP {status}: {body}"));
    }
    InferError::Http { status, body }
}

/// First non-empty string found at one of `candidate_paths`. Error payloads
/// delivered with a success status are classified like HTTP failures.
pub(crate) fn response_text(response: &Value, candidate_paths: &[&str]) -> Result<String, InferError> {
    for path in candidate_paths {
        if let Some(text) = response.pointer(path).and_then(Value::as_str)
            && !text.trim().is_empty()
        {
            return Ok(text.to_owned());
        }
    }

    let error_message = response
        .pointer("/error/message")
        .or_else(|| response.pointer("/error"))
        .and_then(Value::as_str);
    if let Some(message) = error_message {
        if is_context_window_message(message) {
            return Err(InferError::ContextWindowExceeded(message.to_owned()));
        }
        return Err(InferError::InvalidResponse(format!("oracle error: {message}")));
    }

    Err(InferError::InvalidResponse(
        "missing model text in oracle response".to_owned(),
    ))
}

pub(crate) fn token_usage_from(response: &Value, input_pointer: &str, output_pointer: &str) -> TokenUsage {
    let read = |pointer: &str| response.pointer(pointer).and_then(Value::as_u64).unwrap_or(0);
    TokenUsage::new(read(input_pointer), read(output_pointer))
}

pub(crate) fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn first_non_empty(left: Option<String>, right: Option<String>) -> Option<String> {
    normalize_optional(left).or_else(|| normalize_optional(right))
}

fn read_env_non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}
