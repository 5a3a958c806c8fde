mod ollama;

pub use ollama::OllamaClient;

use std::future::Future;

/// Capability-checked interface over the optional local AI runtime. Pipelines
/// check `is_available` once per invocation and become no-ops when it is
/// false; embed/generate failures collapse to `None` and are retried on a
/// later cycle (or not at all, for the scorer's neutral fallback).
pub trait AiProvider: Send + Sync + 'static {
    fn is_available(&self) -> impl Future<Output = bool> + Send;

    fn embed(&self, text: &str) -> impl Future<Output = Option<Vec<f32>>> + Send;

    fn generate(&self, prompt: &str) -> impl Future<Output = Option<String>> + Send;
}

/// Always-unavailable provider for running without an AI runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAi;

impl AiProvider for NoopAi {
    async fn is_available(&self) -> bool {
        false
    }

    async fn embed(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }

    async fn generate(&self, _prompt: &str) -> Option<String> {
        None
    }
}
