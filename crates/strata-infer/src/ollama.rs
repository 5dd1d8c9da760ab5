use async_trait::async_trait;
use serde_json::json;
use strata_config::{DEFAULT_OLLAMA_ENDPOINT, DEFAULT_OLLAMA_MODEL};
use strata_core::{JourneyVerdict, SynthesisVerdict};

use crate::prompt::{
    JOURNEY_SYSTEM_PROMPT, SYNTHESIS_SYSTEM_PROMPT, journey_user_prompt, synthesis_user_prompt,
};
use crate::verdict::{parse_journey_verdict, parse_synthesis_verdict};
use crate::{
    InferError, JourneyOracle, JourneyRequest, SynthesisOracle, SynthesisRequest,
    normalize_optional, response_text, send_json, token_usage_from,
};

#[derive(Debug, Clone)]
pub struct OllamaOracle {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaOracle {
    pub fn new(endpoint: Option<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: normalize_optional(endpoint)
                .unwrap_or_else(|| DEFAULT_OLLAMA_ENDPOINT.to_owned()),
            model: normalize_optional(model).unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_owned()),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        model_id: &str,
        system: &str,
        prompt: String,
    ) -> Result<(String, strata_core::TokenUsage), InferError> {
        let model = if model_id.trim().is_empty() {
            self.model.as_str()
        } else {
            model_id.trim()
        };

        let body = json!({
            "model": model,
            "system": system,
            "prompt": prompt,
            "stream": false,
            "format": "json"
        });

        let response = send_json(self.client.post(&self.endpoint).json(&body)).await?;
        let text = response_text(&response, &["/response", "/message/content"])?;
        let tokens = token_usage_from(&response, "/prompt_eval_count", "/eval_count");
        Ok((text, tokens))
    }
}

#[async_trait]
impl JourneyOracle for OllamaOracle {
    async fn analyze_journey(&self, request: &JourneyRequest) -> Result<JourneyVerdict, InferError> {
        let (text, tokens) = self
            .generate(
                &request.model_id,
                JOURNEY_SYSTEM_PROMPT,
                journey_user_prompt(request),
            )
            .await?;
        parse_journey_verdict(&request.file_path, &text, tokens)
    }
}

#[async_trait]
impl SynthesisOracle for OllamaOracle {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisVerdict, InferError> {
        let (text, tokens) = self
            .generate(
                &request.model_id,
                SYNTHESIS_SYSTEM_PROMPT,
                synthesis_user_prompt(request),
            )
            .await?;
        parse_synthesis_verdict(&text, tokens)
    }
}
