use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::util::truncate_chars;

use super::AiProvider;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const EMBED_TIMEOUT: Duration = Duration::from_secs(10);
const GENERATE_TIMEOUT: Duration = Duration::from_secs(30);
const EMBED_INPUT_MAX_CHARS: usize = 8000;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Option<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

/// Client for a local Ollama server. The whole app works without it; a failed
/// availability probe pins the client unavailable for the rest of the process
/// so background cycles stop re-probing a server that is not there.
pub struct OllamaClient {
    client: Client,
    base_url: String,
    embed_model: String,
    generate_model: String,
    known_unavailable: AtomicBool,
}

impl OllamaClient {
    pub fn new(base_url: String, embed_model: String, generate_model: String) -> Self {
        let client = Client::builder()
            .timeout(GENERATE_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            embed_model,
            generate_model,
            known_unavailable: AtomicBool::new(false),
        }
    }
}

impl AiProvider for OllamaClient {
    async fn is_available(&self) -> bool {
        if self.known_unavailable.load(Ordering::Relaxed) {
            return false;
        }
        let ok = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false);
        if !ok {
            self.known_unavailable.store(true, Ordering::Relaxed);
        }
        ok
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let request = EmbeddingRequest {
            model: &self.embed_model,
            prompt: truncate_chars(text, EMBED_INPUT_MAX_CHARS),
        };
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .timeout(EMBED_TIMEOUT)
            .json(&request)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: EmbeddingResponse = response.json().await.ok()?;
        body.embedding.filter(|v| !v.is_empty())
    }

    async fn generate(&self, prompt: &str) -> Option<String> {
        let request = GenerateRequest {
            model: &self.generate_model,
            prompt,
            stream: false,
        };
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: GenerateResponse = response.json().await.ok()?;
        body.response
    }
}
