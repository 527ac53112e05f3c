// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// A single generation request.
///
/// `context` lines are world facts and prior narration the handler wants
/// the model grounded in; drivers append them to the prompt in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: Option<String>,
    #[serde(default)]
    pub context: Vec<String>,
    /// `None` uses the provider's configured default.
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = context;
        self
    }

    /// The full user-side text sent to the model.
    pub fn user_text(&self) -> String {
        if self.context.is_empty() {
            return self.prompt.clone();
        }
        let mut text = String::with_capacity(self.prompt.len() + 64);
        text.push_str(&self.prompt);
        text.push_str("\n\nContext:\n");
        for line in &self.context {
            text.push_str("- ");
            text.push_str(line);
            text.push('\n');
        }
        text
    }
}

/// A completed generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_text_without_context_is_the_prompt() {
        let req = GenerationRequest::new("Describe the harbor district.");
        assert_eq!(req.user_text(), "Describe the harbor district.");
    }

    #[test]
    fn user_text_appends_context_lines() {
        let req = GenerationRequest::new("Describe the harbor district.")
            .with_context(vec!["the fleet burned last season".into()]);
        let text = req.user_text();
        assert!(text.starts_with("Describe the harbor district."));
        assert!(text.contains("- the fleet burned last season"));
    }
}
