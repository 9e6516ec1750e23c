/*!
 * Mock translation client for testing and dry runs.
 *
 * This module provides a client that simulates different provider behaviors:
 * - `MockClient::working()` - Translates every item
 * - `MockClient::partial(n)` - Translates only the first `n` items of a batch
 * - `MockClient::failing()` - Always fails with an error
 * - `MockClient::fail_multi()` - Fails whole batches, succeeds on single items
 * - `MockClient::fail_calls(..)` - Fails the listed call numbers (1-based)
 * - `MockClient::slow(ms)` - Sleeps before translating
 *
 * `with_latency(ms)` adds a delay in front of any behavior.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::ProviderError;
use crate::providers::TranslationClient;
use crate::task::models::ItemId;

/// Behavior mode for the mock client
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Always succeeds for every item
    Working,
    /// Succeeds for the first `keep` items of each batch only
    Partial { keep: usize },
    /// Always fails with an error
    Failing,
    /// Fails batches of more than one item
    FailMulti,
    /// Fails the listed call numbers, counting from 1
    FailCalls(Vec<usize>),
    /// Simulates slow response (for timeout testing)
    Slow { delay_ms: u64 },
}

/// A recorded `translate_batch` call
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    /// Ids sent in the call, in ascending order
    pub item_ids: Vec<ItemId>,
    /// Provider name
    pub provider: String,
    /// Model name
    pub model: String,
}

/// Mock client for testing scheduler behavior
#[derive(Debug, Clone)]
pub struct MockClient {
    /// Behavior mode
    behavior: MockBehavior,
    /// Call counter shared between clones
    call_count: Arc<AtomicUsize>,
    /// Call log shared between clones
    calls: Arc<Mutex<Vec<MockCall>>>,
    /// Custom translation generator (optional)
    translator: Option<fn(&str) -> String>,
    /// Delay before every answer, in milliseconds
    latency_ms: u64,
}

impl MockClient {
    /// Create a new mock client with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            call_count: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
            translator: None,
            latency_ms: 0,
        }
    }

    /// Create a working mock client that always succeeds
    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    /// Create a client that drops all but `keep` items per batch
    pub fn partial(keep: usize) -> Self {
        Self::new(MockBehavior::Partial { keep })
    }

    /// Create a failing mock client that always errors
    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    /// Create a client that only succeeds on singleton batches
    pub fn fail_multi() -> Self {
        Self::new(MockBehavior::FailMulti)
    }

    /// Create a client failing the given call numbers
    pub fn fail_calls(calls: impl Into<Vec<usize>>) -> Self {
        Self::new(MockBehavior::FailCalls(calls.into()))
    }

    /// Create a client that sleeps before answering
    pub fn slow(delay_ms: u64) -> Self {
        Self::new(MockBehavior::Slow { delay_ms })
    }

    /// Set a custom translation generator
    pub fn with_translator(mut self, translator: fn(&str) -> String) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Delay every answer, whatever the behavior
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Number of calls made so far
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Snapshot of the recorded calls
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Translation produced for a source text
    pub fn translate_text(&self, text: &str) -> String {
        match self.translator {
            Some(translator) => translator(text),
            None => format!("[TRANSLATED] {}", text),
        }
    }

    fn translate_all(&self, items: &BTreeMap<ItemId, String>, keep: usize) -> HashMap<ItemId, String> {
        items
            .iter()
            .take(keep)
            .map(|(id, text)| (*id, self.translate_text(text)))
            .collect()
    }
}

#[async_trait]
impl TranslationClient for MockClient {
    async fn translate_batch(
        &self,
        items: &BTreeMap<ItemId, String>,
        provider: &str,
        model: &str,
    ) -> Result<HashMap<ItemId, String>, ProviderError> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().push(MockCall {
            item_ids: items.keys().copied().collect(),
            provider: provider.to_string(),
            model: model.to_string(),
        });

        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }

        match &self.behavior {
            MockBehavior::Working => Ok(self.translate_all(items, usize::MAX)),

            MockBehavior::Partial { keep } => Ok(self.translate_all(items, *keep)),

            MockBehavior::Failing => Err(ProviderError::ApiError {
                message: "Simulated provider failure".to_string(),
                status_code: 500,
            }),

            MockBehavior::FailMulti => {
                if items.len() > 1 {
                    Err(ProviderError::ApiError {
                        message: format!("Simulated batch failure ({} items)", items.len()),
                        status_code: 503,
                    })
                } else {
                    Ok(self.translate_all(items, usize::MAX))
                }
            }

            MockBehavior::FailCalls(failing) => {
                if failing.contains(&call) {
                    Err(ProviderError::ApiError {
                        message: format!("Simulated failure (request #{})", call),
                        status_code: 503,
                    })
                } else {
                    Ok(self.translate_all(items, usize::MAX))
                }
            }

            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                Ok(self.translate_all(items, usize::MAX))
            }
        }
    }
}
