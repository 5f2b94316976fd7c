//! Blocking client for an OpenAI-compatible chat-completions endpoint that
//! classifies a still image as hazardous or not.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::{
    blocking::Client,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue},
};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info_span};

use crate::hazard::HazardVerdict;

/// Instruction sent alongside every image.
pub const HAZARD_PROMPT: &str = "Does the attached image depict a potential hazard? Answer in a \
JSON string format with the fields \"answer\" with either \"yes\" or \"no\" only and the field \
\"reason\" with a brief explanation for your answer. Do not include any further text, just the \
JSON string please.";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4-vision-preview";
pub const DEFAULT_MAX_TOKENS: u32 = 100;

#[derive(Clone, Debug)]
pub struct ClassifierConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("failed to read image {}", path.display())]
    ReadImage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("reply did not contain a JSON object: {reply:?}")]
    NoVerdict { reply: String },
}

/// Hazard classifier backed by a remote vision-capable chat model.
pub struct HazardClassifierClient {
    config: ClassifierConfig,
    client: Client,
}

impl HazardClassifierClient {
    pub fn new(config: ClassifierConfig) -> Result<Self, ClassifyError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClassifyError::Network)?;
        Ok(Self { config, client })
    }

    /// Send `image_path` for classification. One attempt, no retries.
    pub fn classify(&self, image_path: &Path) -> Result<HazardVerdict, ClassifyError> {
        let span = info_span!("classifier.request", model = %self.config.model);
        let _guard = span.enter();

        let data_uri = format!("data:image/jpeg;base64,{}", encode_image(image_path)?);
        let payload = build_payload(&self.config.model, HAZARD_PROMPT, &data_uri, self.config.max_tokens);
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(url)
            .headers(self.headers()?)
            .json(&payload)
            .send()
            .map_err(ClassifyError::Network)?;

        let status = response.status();
        let text = response.text().map_err(ClassifyError::Network)?;
        if !status.is_success() {
            return Err(ClassifyError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let body: Value = serde_json::from_str(&text)
            .map_err(|err| ClassifyError::MalformedResponse(err.to_string()))?;
        debug!(response = %body, "received classifier response");

        let reply = reply_text(&body)?;
        HazardVerdict::from_reply(reply).ok_or_else(|| ClassifyError::NoVerdict {
                reply: reply.to_string(),
            })
    }

    fn headers(&self) -> Result<HeaderMap, ClassifyError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.config.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|e| ClassifyError::InvalidRequest(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

/// Read `path` and return its bytes as standard base64.
pub fn encode_image(path: &Path) -> Result<String, ClassifyError> {
    let bytes = fs::read(path).map_err(|source| ClassifyError::ReadImage {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(STANDARD.encode(bytes))
}

fn build_payload(model: &str, prompt: &str, image_url: &str, max_tokens: u32) -> Value {
    json!({
        "model": model,
        "messages": [
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": image_url },
                ],
            }
        ],
        "max_tokens": max_tokens,
    })
}

fn reply_text(body: &Value) -> Result<&str, ClassifyError> {
    body.get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| ClassifyError::MalformedResponse("missing choices[0].message.content".into()))
}
