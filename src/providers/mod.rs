/*!
 * Provider implementations for the batch translation engine.
 *
 * This module contains client implementations for the supported LLM services:
 * - OpenAI: chat completions API
 * - Gemini: Google generateContent API
 * - Anthropic: messages API
 *
 * The engine itself only sees the `TranslationClient` seam. `HttpTranslationClient`
 * adapts the raw providers to it, `CachingClient` puts a translation cache in
 * front of any client, and `MockClient` stands in for the providers in tests.
 */

use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;

use crate::errors::ProviderError;
use crate::task::models::ItemId;

/// Common trait for all LLM providers
///
/// This trait defines the interface that all provider implementations must follow,
/// allowing them to be used interchangeably by the HTTP translation client.
#[async_trait]
pub trait Provider: Send + Sync + Debug {
    /// The request type for this provider
    type Request: Send + Sync;

    /// The response type for this provider
    type Response: Send + Sync;

    /// Complete a request using this provider
    async fn complete(&self, request: Self::Request) -> Result<Self::Response, ProviderError>;

    /// Extract text from the provider response
    fn extract_text(response: &Self::Response) -> String;
}

/// Batch translation capability consumed by the scheduler
///
/// Implementations are stateless between calls. A partial map is a valid
/// success; an id missing from the result was not translated.
#[async_trait]
pub trait TranslationClient: Send + Sync + Debug {
    /// Translate every text in `items` with the given provider and model
    async fn translate_batch(
        &self,
        items: &BTreeMap<ItemId, String>,
        provider: &str,
        model: &str,
    ) -> Result<HashMap<ItemId, String>, ProviderError>;
}

/// Map a non-success HTTP status to a provider error
pub(crate) fn error_for_status(status: StatusCode, body: String) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::AuthenticationError(body),
        429 => ProviderError::RateLimitExceeded(body),
        code => ProviderError::ApiError {
            status_code: code,
            message: body,
        },
    }
}

/// Map a reqwest transport failure to a provider error
pub(crate) fn error_for_transport(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() || error.is_connect() {
        ProviderError::ConnectionError(error.to_string())
    } else {
        ProviderError::RequestFailed(error.to_string())
    }
}

pub mod anthropic;
pub mod cache;
pub mod client;
pub mod gemini;
pub mod mock;
pub mod openai;
pub mod prompt;

pub use cache::{CachingClient, TranslationCache};
pub use client::HttpTranslationClient;
pub use mock::MockClient;
