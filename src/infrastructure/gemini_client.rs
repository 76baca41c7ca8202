use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use url::Url;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// JSON schema (Gemini OpenAPI subset) the model must answer with.
    pub response_schema: Value,
}

#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Returns the raw text of the first candidate part.
    async fn generate_content(
        &self,
        api_key: &str,
        request: &GenerationRequest,
    ) -> Result<String, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestGeminiClient {
    client: Client,
    base_url: String,
    model: String,
}

impl Default for ReqwestGeminiClient {
    fn default() -> Self {
        Self::new(DEFAULT_GEMINI_MODEL)
    }
}

#[derive(Debug, serde::Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, serde::Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, serde::Deserialize)]
struct CandidateContent {
    parts: Option<Vec<ContentPart>>,
}

#[derive(Debug, serde::Deserialize)]
struct ContentPart {
    text: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl ReqwestGeminiClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: GEMINI_API_BASE.to_string(),
            model: model.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn generate_endpoint(&self, api_key: &str) -> Result<Url, InfraError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid gemini base url: {error}")))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("gemini base URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push("models");
            segments.push(&format!("{}:generateContent", self.model));
        }
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url)
    }

    fn request_body(request: &GenerationRequest) -> Value {
        json!({
            "contents": [{ "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": request.response_schema,
            },
        })
    }

    fn provider_error(body: &str) -> InfraError {
        let message = serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .and_then(|envelope| envelope.error)
            .and_then(|error| error.message)
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| "Failed to generate journal".to_string());
        InfraError::Generation(message)
    }

    fn first_text(response: GenerateContentResponse) -> Option<String> {
        response
            .candidates?
            .into_iter()
            .next()?
            .content?
            .parts?
            .into_iter()
            .next()?
            .text
    }
}

#[async_trait]
impl GenerationClient for ReqwestGeminiClient {
    async fn generate_content(
        &self,
        api_key: &str,
        request: &GenerationRequest,
    ) -> Result<String, InfraError> {
        if api_key.trim().is_empty() {
            return Err(InfraError::MissingApiKey);
        }

        let endpoint = self.generate_endpoint(api_key)?;
        let response = self
            .client
            .post(endpoint)
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(|error| {
                InfraError::Network(format!("network error while generating content: {error}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Network(format!("failed reading generation response: {error}"))
        })?;

        if !status.is_success() {
            return Err(Self::provider_error(&body));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|error| {
            InfraError::Generation(format!("invalid generation payload: {error}; body={body}"))
        })?;
        Self::first_text(parsed).ok_or_else(|| InfraError::Generation("No content generated".to_string()))
    }
}
