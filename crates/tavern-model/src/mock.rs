// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{AiProvider, Generation, GenerationRequest, ProviderError};

/// Deterministic mock provider. Echoes the prompt back as the artifact.
/// Refused in production by [`crate::from_config`].
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl AiProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn generate(&self, req: GenerationRequest) -> Result<Generation, ProviderError> {
        Ok(Generation {
            text: format!("MOCK: {}", req.prompt),
            model: "mock-model".to_string(),
            input_tokens: 10,
            output_tokens: 10,
        })
    }
}

/// A pre-scripted provider. Each call to `generate` pops the next script
/// entry, so tests can stage exact failure/success sequences (for example:
/// two upstream errors, then success) without network access.
pub struct ScriptedMockProvider {
    scripts: Mutex<Vec<Result<String, ProviderError>>>,
    calls: AtomicUsize,
    /// The last request seen, for assertions on prompt construction.
    pub last_request: Arc<Mutex<Option<GenerationRequest>>>,
}

impl ScriptedMockProvider {
    /// Build a provider from an ordered list of call outcomes.
    pub fn new(scripts: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            calls: AtomicUsize::new(0),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Convenience: fail `failures` times with an upstream error, then
    /// succeed with `text` forever.
    pub fn upstream_then_text(failures: usize, text: impl Into<String>) -> Self {
        let text = text.into();
        let mut scripts: Vec<Result<String, ProviderError>> = (0..failures)
            .map(|i| Err(ProviderError::Upstream(format!("synthetic outage #{i}"))))
            .collect();
        scripts.push(Ok(text));
        Self::new(scripts)
    }

    /// How many times `generate` has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn generate(&self, req: GenerationRequest) -> Result<Generation, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(req);

        let next = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Scripts exhausted: keep succeeding so retry tests can
                // overshoot without panicking.
                Ok("[no more scripts]".to_string())
            } else {
                scripts.remove(0)
            }
        };

        next.map(|text| Generation {
            text,
            model: "scripted-mock-model".to_string(),
            input_tokens: 5,
            output_tokens: 5,
        })
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
