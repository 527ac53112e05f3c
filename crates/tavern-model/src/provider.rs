// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::{Generation, GenerationRequest, ProviderError};

/// The single capability the job pipeline needs from an AI backend.
///
/// Implementations must be cheap to share (`Arc<dyn AiProvider>`) — every
/// pipeline worker holds a clone and calls [`AiProvider::generate`]
/// concurrently.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Stable provider id ("anthropic", "mock").
    fn name(&self) -> &str;

    /// Model identifier as reported in artifacts and logs.
    fn model_name(&self) -> &str;

    /// Run one generation to completion.
    ///
    /// Deadlines are enforced by the caller (the worker wraps this call in
    /// a timeout); cancellation inside the provider maps to
    /// [`ProviderError::Canceled`].
    async fn generate(&self, req: GenerationRequest) -> Result<Generation, ProviderError>;
}
