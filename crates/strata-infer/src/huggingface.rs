use async_trait::async_trait;
use serde_json::{Value, json};
use strata_config::{DEFAULT_HUGGINGFACE_ENDPOINT, DEFAULT_HUGGINGFACE_MODEL};
use strata_core::{JourneyVerdict, SynthesisVerdict};

use crate::prompt::{
    JOURNEY_SYSTEM_PROMPT, SYNTHESIS_SYSTEM_PROMPT, journey_user_prompt, synthesis_user_prompt,
};
use crate::verdict::{parse_journey_verdict, parse_synthesis_verdict};
use crate::{
    InferError, JourneyOracle, JourneyRequest, SynthesisOracle, SynthesisRequest,
    normalize_optional, read_env_non_empty, response_text, send_json, token_usage_from,
};

const JOURNEY_MAX_TOKENS: u32 = 1000;
const SYNTHESIS_MAX_TOKENS: u32 = 1500;
const TEMPERATURE: f32 = 0.2;

/// OpenAI-compatible chat completions against the Hugging Face router.
#[derive(Debug, Clone)]
pub struct HuggingFaceOracle {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl HuggingFaceOracle {
    pub fn from_env_key(
        api_key_env: &str,
        model: Option<String>,
        endpoint: Option<String>,
    ) -> Result<Self, InferError> {
        let api_key = read_env_non_empty(api_key_env)
            .ok_or_else(|| InferError::MissingApiKey(api_key_env.to_owned()))?;

        Ok(Self::new(api_key, model, endpoint))
    }

    pub fn new(api_key: String, model: Option<String>, endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            endpoint: normalize_optional(endpoint)
                .unwrap_or_else(|| DEFAULT_HUGGINGFACE_ENDPOINT.to_owned()),
            model: normalize_optional(model)
                .unwrap_or_else(|| DEFAULT_HUGGINGFACE_MODEL.to_owned()),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        model_id: &str,
        system: &str,
        user: String,
        max_tokens: u32,
    ) -> Result<(String, Value), InferError> {
        let model = if model_id.trim().is_empty() {
            self.model.as_str()
        } else {
            model_id.trim()
        };

        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "max_tokens": max_tokens,
            "temperature": TEMPERATURE,
            "response_format": {"type": "json_object"}
        });

        let response = send_json(
            self.client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body),
        )
        .await?;

        let text = response_text(&response, &["/choices/0/message/content", "/choices/0/text"])?;
        Ok((text, response))
    }
}

#[async_trait]
impl JourneyOracle for HuggingFaceOracle {
    async fn analyze_journey(&self, request: &JourneyRequest) -> Result<JourneyVerdict, InferError> {
        let (text, response) = self
            .chat(
                &request.model_id,
                JOURNEY_SYSTEM_PROMPT,
                journey_user_prompt(request),
                JOURNEY_MAX_TOKENS,
            )
            .await?;

        let tokens = token_usage_from(&response, "/usage/prompt_tokens", "/usage/completion_tokens");
        parse_journey_verdict(&request.file_path, &text, tokens)
    }
}

#[async_trait]
impl SynthesisOracle for HuggingFaceOracle {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisVerdict, InferError> {
        let (text, response) = self
            .chat(
                &request.model_id,
                SYNTHESIS_SYSTEM_PROMPT,
                synthesis_user_prompt(request),
                SYNTHESIS_MAX_TOKENS,
            )
            .await?;

        let tokens = token_usage_from(&response, "/usage/prompt_tokens", "/usage/completion_tokens");
        parse_synthesis_verdict(&text, tokens)
    }
}
