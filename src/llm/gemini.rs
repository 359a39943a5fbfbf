//! Google Gemini (Gemini Developer API) provider.

use super::{LlmError, LlmProvider, DEFAULT_LLM_TIMEOUT};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const GEMINI_API_ROOT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Models offered when the live listing cannot be fetched.
const FALLBACK_MODELS: &[&str] = &["gemini-1.5-pro", "gemini-1.5-flash"];

/// Gemini provider using the `models.generateContent` REST API.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            timeout: DEFAULT_LLM_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The API addresses models as `models/<name>`; accept either form.
    fn normalize_model_name(model: &str) -> String {
        let trimmed = model.trim();
        if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{}", trimmed)
        }
    }

    fn extract_text(response: &GenerateContentResponse) -> Result<String, LlmError> {
        let candidate = response
            .candidates
            .as_ref()
            .and_then(|c| c.first())
            .ok_or_else(|| {
                LlmError::InvalidResponse("Gemini API returned no candidates".to_string())
            })?;

        let parts = candidate
            .content
            .as_ref()
            .map(|c| c.parts.as_slice())
            .unwrap_or_default();

        let mut combined = String::new();
        for part in parts {
            if let Some(text) = part.text.as_ref() {
                combined.push_str(text);
            }
        }

        if combined.trim().is_empty() {
            return Err(LlmError::InvalidResponse(
                "Gemini API returned empty candidate text".to_string(),
            ));
        }

        Ok(combined)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        if self.api_key.trim().is_empty() {
            return Err(LlmError::NoApiKey("gemini".to_string()));
        }

        let model = Self::normalize_model_name(&self.model);
        let url = format!("{}/{model}:generateContent", GEMINI_API_ROOT);

        let request = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }],
            }],
        });

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", self.api_key.trim())
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if let Ok(error) = serde_json::from_str::<GeminiErrorResponse>(&error_text) {
                return Err(LlmError::Api(format!(
                    "Gemini API error ({}): {}",
                    status, error.error.message
                )));
            }
            return Err(LlmError::Api(format!(
                "Gemini API error ({}): {}",
                status, error_text
            )));
        }

        let response: GenerateContentResponse = response.json().await.map_err(|e| {
            LlmError::InvalidResponse(format!("Failed to parse Gemini response: {}", e))
        })?;

        Self::extract_text(&response)
    }

    /// Fetch available Gemini model names; falls back to a built-in list on
    /// any error so the settings surface always has something to offer.
    async fn list_models(&self) -> Vec<String> {
        let fallback = || FALLBACK_MODELS.iter().map(|m| m.to_string()).collect();

        if self.api_key.trim().is_empty() {
            return fallback();
        }

        let result = self
            .client
            .get(format!("{}/models", GEMINI_API_ROOT))
            .header("x-goog-api-key", self.api_key.trim())
            .timeout(self.timeout)
            .send()
            .await;

        let response = match result {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                log::warn!("Model listing failed ({}); using defaults", r.status());
                return fallback();
            }
            Err(e) => {
                log::warn!("Model listing failed ({}); using defaults", e);
                return fallback();
            }
        };

        match response.json::<ListModelsResponse>().await {
            Ok(listing) => {
                let models: Vec<String> = listing
                    .models
                    .into_iter()
                    .map(|m| m.name.rsplit('/').next().unwrap_or(&m.name).to_string())
                    .filter(|name| name.to_lowercase().contains("gemini"))
                    .collect();
                if models.is_empty() {
                    fallback()
                } else {
                    models
                }
            }
            Err(e) => {
                log::warn!("Could not parse model listing ({}); using defaults", e);
                fallback()
            }
        }
    }

    fn name(&self) -> &'static str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
