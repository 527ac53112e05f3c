// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod anthropic;
mod error;
mod mock;
mod provider;
mod types;

pub use anthropic::AnthropicProvider;
pub use error::ProviderError;
pub use mock::{MockProvider, ScriptedMockProvider};
pub use provider::AiProvider;
pub use types::{Generation, GenerationRequest};

use std::sync::Arc;

use anyhow::bail;
use tavern_config::{AiConfig, Environment};

/// Construct a shared [`AiProvider`] from configuration.
///
/// The `mock` driver is a development/test convenience and is refused in
/// production. [`tavern_config::Config::validate`] already rejects that
/// combination at startup; this second check covers callers that construct
/// providers directly.
pub fn from_config(cfg: &AiConfig, env: Environment) -> anyhow::Result<Arc<dyn AiProvider>> {
    match cfg.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(
            cfg.model.clone(),
            cfg.api_key.clone(),
            None,
            cfg.max_tokens,
            cfg.temperature,
        ))),
        "mock" => {
            if env == Environment::Production {
                bail!("the mock AI provider is not allowed in production");
            }
            Ok(Arc::new(MockProvider::default()))
        }
        other => bail!("unknown AI provider {other:?} (expected \"anthropic\" or \"mock\")"),
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(provider: &str) -> AiConfig {
        AiConfig {
            provider: provider.into(),
            ..AiConfig::default()
        }
    }

    #[test]
    fn mock_allowed_in_development() {
        let p = from_config(&cfg("mock"), Environment::Development).unwrap();
        assert_eq!(p.name(), "mock");
    }

    #[test]
    fn mock_refused_in_production() {
        assert!(from_config(&cfg("mock"), Environment::Production).is_err());
    }

    #[test]
    fn anthropic_allowed_everywhere() {
        let p = from_config(&cfg("anthropic"), Environment::Production).unwrap();
        assert_eq!(p.name(), "anthropic");
    }

    #[test]
    fn unknown_provider_rejected() {
        assert!(from_config(&cfg("gpt-basement"), Environment::Development).is_err());
    }
}
