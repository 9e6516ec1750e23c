/*!
 * HTTP-backed `TranslationClient`.
 *
 * Holds one backend per configured provider and routes each batch to the
 * backend named by the task settings.
 */

use async_trait::async_trait;
use log::debug;
use std::collections::{BTreeMap, HashMap};

use crate::app_config::{Config, TranslationProvider};
use crate::errors::ProviderError;
use crate::providers::anthropic::{Anthropic, AnthropicRequest};
use crate::providers::gemini::{Gemini, GeminiRequest};
use crate::providers::openai::{OpenAI, OpenAIRequest};
use crate::providers::prompt::{build_batch_prompt, parse_batch_response, render_system_prompt};
use crate::providers::{Provider, TranslationClient};
use crate::task::models::ItemId;

/// Translation client talking to the configured LLM services
#[derive(Debug)]
pub struct HttpTranslationClient {
    openai: Option<OpenAI>,
    gemini: Option<Gemini>,
    anthropic: Option<Anthropic>,
    /// System prompt with languages filled in
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
}

impl HttpTranslationClient {
    /// Build backends for every provider entry that carries an API key
    pub fn from_config(config: &Config) -> Self {
        let translation = &config.translation;
        let backend = |provider: TranslationProvider| {
            translation
                .get_provider_config(&provider)
                .filter(|p| !p.api_key.is_empty())
        };

        Self {
            openai: backend(TranslationProvider::OpenAI)
                .map(|p| OpenAI::new(&p.api_key, &p.endpoint, p.timeout_secs)),
            gemini: backend(TranslationProvider::Google)
                .map(|p| Gemini::new(&p.api_key, &p.endpoint, p.timeout_secs)),
            anthropic: backend(TranslationProvider::Anthropic)
                .map(|p| Anthropic::new(&p.api_key, &p.endpoint, p.timeout_secs)),
            system_prompt: render_system_prompt(
                &translation.common.system_prompt,
                &config.source_language,
                &config.target_language,
            ),
            temperature: translation.common.temperature,
            max_tokens: translation.common.max_tokens,
        }
    }

    async fn complete_text(
        &self,
        provider: TranslationProvider,
        model: &str,
        user_prompt: String,
    ) -> Result<String, ProviderError> {
        let missing = || ProviderError::UnsupportedProvider(format!("{} has no API key configured", provider));

        match provider {
            TranslationProvider::OpenAI => {
                let backend = self.openai.as_ref().ok_or_else(missing)?;
                let request = OpenAIRequest::new(model)
                    .add_message("system", &self.system_prompt)
                    .add_message("user", user_prompt)
                    .temperature(self.temperature)
                    .max_tokens(self.max_tokens);
                let response = backend.complete(request).await?;
                Ok(OpenAI::extract_text(&response))
            }
            TranslationProvider::Google => {
                let backend = self.gemini.as_ref().ok_or_else(missing)?;
                let request = GeminiRequest::new(model)
                    .system(&self.system_prompt)
                    .user(user_prompt)
                    .temperature(self.temperature)
                    .max_output_tokens(self.max_tokens);
                let response = backend.complete(request).await?;
                Ok(Gemini::extract_text(&response))
            }
            TranslationProvider::Anthropic => {
                let backend = self.anthropic.as_ref().ok_or_else(missing)?;
                let request = AnthropicRequest::new(model, self.max_tokens)
                    .system(&self.system_prompt)
                    .add_message("user", user_prompt)
                    .temperature(self.temperature);
                let response = backend.complete(request).await?;
                Ok(Anthropic::extract_text(&response))
            }
        }
    }
}

#[async_trait]
impl TranslationClient for HttpTranslationClient {
    async fn translate_batch(
        &self,
        items: &BTreeMap<ItemId, String>,
        provider: &str,
        model: &str,
    ) -> Result<HashMap<ItemId, String>, ProviderError> {
        if items.is_empty() {
            return Ok(HashMap::new());
        }

        let provider: TranslationProvider = provider
            .parse()
            .map_err(|_| ProviderError::UnsupportedProvider(provider.to_string()))?;

        debug!("Sending {} items to {} ({})", items.len(), provider.display_name(), model);
        let reply = self.complete_text(provider, model, build_batch_prompt(items)).await?;
        parse_batch_response(&reply, items)
    }
}
