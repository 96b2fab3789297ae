use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::LLMConfig;

const PDF_MIME_TYPE: &str = "application/pdf";
const PDF_MAGIC: &[u8] = b"%PDF-";
const DATA_URL_PREFIX: &str = "data:application/pdf;base64,";
const GEMINI_API_KEY_HEADER: &str = "x-goog-api-key";

/// A base64 PDF checked to decode and to carry a PDF header
#[derive(Debug, Clone)]
pub struct PdfAttachment {
    base64_data: String,
    byte_len: usize,
}

impl PdfAttachment {
    /// Accepts bare base64; a `data:application/pdf;base64,` prefix is tolerated and stripped
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let trimmed = encoded.trim();
        let data = trimmed.strip_prefix(DATA_URL_PREFIX).unwrap_or(trimmed);
        if data.is_empty() {
            return Err(anyhow!("PDF data is required"));
        }

        let bytes = STANDARD
            .decode(data)
            .context("PDF data is not valid base64")?;
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(anyhow!("Uploaded file is not a PDF document"));
        }

        Ok(Self {
            base64_data: data.to_string(),
            byte_len: bytes.len(),
        })
    }

    pub fn base64_data(&self) -> &str {
        &self.base64_data
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub fn mime_type(&self) -> &'static str {
        PDF_MIME_TYPE
    }
}

/// Enum-based LLM provider implementation
#[derive(Debug, Clone)]
pub enum LLMProvider {
    OpenAI(OpenAIProvider),
    Gemini(GeminiProvider),
}

impl LLMProvider {
    /// Send one prompt, optionally with an attached PDF
    pub async fn make_request(&self, prompt: &str, attachment: Option<&PdfAttachment>) -> Result<String> {
        match self {
            LLMProvider::OpenAI(provider) => provider.make_request(prompt, attachment).await,
            LLMProvider::Gemini(provider) => provider.make_request(prompt, attachment).await,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            LLMProvider::OpenAI(provider) => provider.provider_name(),
            LLMProvider::Gemini(provider) => provider.provider_name(),
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            LLMProvider::OpenAI(provider) => provider.model_name(),
            LLMProvider::Gemini(provider) => provider.model_name(),
        }
    }
}

/// OpenAI-compatible chat completions provider
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAIMessage {
    role: String,
    content: OpenAIContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum OpenAIContent {
    Text(String),
    Parts(Vec<OpenAIContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAIContentPart {
    Text { text: String },
    File { file: OpenAIFile },
}

#[derive(Debug, Clone, Serialize)]
struct OpenAIFile {
    filename: String,
    file_data: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAIProvider {
    pub fn new(client: Client, api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
        }
    }

    fn build_request(&self, prompt: &str, attachment: Option<&PdfAttachment>) -> OpenAIRequest {
        let content = match attachment {
            Some(pdf) => OpenAIContent::Parts(vec![
                OpenAIContentPart::File {
                    file: OpenAIFile {
                        filename: "answer-sheet.pdf".to_string(),
                        file_data: format!("data:{};base64,{}", pdf.mime_type(), pdf.base64_data()),
                    },
                },
                OpenAIContentPart::Text {
                    text: prompt.to_string(),
                },
            ]),
            None => OpenAIContent::Text(prompt.to_string()),
        };
        OpenAIRequest {
            model: self.model.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content,
            }],
        }
    }

    pub async fn make_request(&self, prompt: &str, attachment: Option<&PdfAttachment>) -> Result<String> {
        let request_body = self.build_request(prompt, attachment);

        info!(
            provider = self.provider_name(),
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = prompt.len(),
            has_attachment = attachment.is_some(),
            "Making LLM request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(redact_url)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = self.provider_name(),
                status = %status,
                error = %error_text,
                "LLM API request failed"
            );
            return Err(anyhow!("OpenAI API request failed ({}): {}", status, error_text));
        }

        let openai_response: OpenAIResponse = response.json().await.map_err(redact_url)?;
        let choice = openai_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No choices in OpenAI response"))?;

        let response_content = choice.message.content.unwrap_or_default();
        info!(
            provider = self.provider_name(),
            response_length = response_content.len(),
            "Successfully received LLM response"
        );

        Ok(response_content)
    }

    pub fn provider_name(&self) -> &'static str {
        "OpenAI"
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

/// Gemini generateContent provider
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "topK")]
    top_k: i32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: i32,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

impl GeminiProvider {
    pub fn new(client: Client, api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| "gemini-1.5-pro".to_string()),
        }
    }

    fn build_request(&self, prompt: &str, attachment: Option<&PdfAttachment>) -> GeminiRequest {
        // The document goes first so the instruction reads as applying to it
        let mut parts = Vec::new();
        if let Some(pdf) = attachment {
            parts.push(GeminiPart::InlineData {
                inline_data: GeminiInlineData {
                    mime_type: pdf.mime_type().to_string(),
                    data: pdf.base64_data().to_string(),
                },
            });
        }
        parts.push(GeminiPart::Text {
            text: prompt.to_string(),
        });

        GeminiRequest {
            contents: vec![GeminiContent { parts }],
            generation_config: GeminiGenerationConfig {
                temperature: 0.7,
                top_k: 40,
                top_p: 0.9,
                max_output_tokens: 2048,
            },
        }
    }

    pub async fn make_request(&self, prompt: &str, attachment: Option<&PdfAttachment>) -> Result<String> {
        let request_body = self.build_request(prompt, attachment);

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url,
            self.model.trim_start_matches("models/")
        );

        info!(
            provider = self.provider_name(),
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = prompt.len(),
            has_attachment = attachment.is_some(),
            "Making LLM request"
        );

        let response = self
            .client
            .post(&url)
            .header(GEMINI_API_KEY_HEADER, &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(redact_url)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = self.provider_name(),
                status = %status,
                error = %error_text,
                "LLM API request failed"
            );
            return Err(anyhow!("Gemini API request failed ({}): {}", status, error_text));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(redact_url)?;
        let candidate = gemini_response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No candidates in Gemini response"))?;

        let response_content = extract_candidate_text(candidate);
        if response_content.is_empty() {
            warn!(provider = self.provider_name(), "Gemini candidate carried no text parts");
        }
        info!(
            provider = self.provider_name(),
            response_length = response_content.len(),
            "Successfully received LLM response"
        );

        Ok(response_content)
    }

    pub fn provider_name(&self) -> &'static str {
        "Gemini"
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

// Transport errors print the request URL; keep it out of anything shown to callers
fn redact_url(err: reqwest::Error) -> anyhow::Error {
    anyhow::Error::new(err.without_url())
}

fn extract_candidate_text(candidate: GeminiCandidate) -> String {
    candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| match part {
                    GeminiPart::Text { text } => Some(text),
                    GeminiPart::InlineData { .. } => None,
                })
                .collect::<String>()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LLMProviderType {
    OpenAI,
    Gemini,
}

impl LLMProviderType {
    /// Maps configuration strings; anything unrecognised falls back to Gemini
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "gemini" | "google" => LLMProviderType::Gemini,
            "openai" | "chatgpt" | "gpt" => LLMProviderType::OpenAI,
            _ => {
                info!("Unknown LLM provider '{}', defaulting to Gemini", name);
                LLMProviderType::Gemini
            }
        }
    }
}

/// Factory for creating LLM providers based on provider type
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    pub fn create_provider(config: &LLMConfig) -> Result<LLMProvider> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let api_key = config.api_key.clone();
        let base_url = config.base_url.clone();
        let model = config.model.clone();

        Ok(match config.provider {
            LLMProviderType::OpenAI => LLMProvider::OpenAI(OpenAIProvider::new(client, api_key, base_url, model)),
            LLMProviderType::Gemini => LLMProvider::Gemini(GeminiProvider::new(client, api_key, base_url, model)),
        })
    }
}
