/*!
 * Inter-batch delay computation.
 *
 * The base delay comes from the per-model table in the engine configuration.
 * It is scaled by the duration of the previous batch and backed off
 * exponentially under consecutive batch failures, then capped.
 */

use std::collections::BTreeMap;
use std::time::Duration;

use crate::app_config::EngineConfig;

/// Batches slower than this stretch the next delay
const SLOW_BATCH: Duration = Duration::from_secs(30);

/// Batches faster than this shrink the next delay
const FAST_BATCH: Duration = Duration::from_secs(5);

/// Backoff exponent cap
const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Computes the delay before the next batch dispatch
#[derive(Debug, Clone)]
pub struct RateController {
    /// Per-model base delays in milliseconds
    model_delays: BTreeMap<String, u64>,
    /// Base delay for models missing from the table
    default_delay_ms: u64,
    /// Hard upper bound for any delay
    max_delay_ms: u64,
}

impl RateController {
    /// Create a controller from explicit values
    pub fn new(model_delays: BTreeMap<String, u64>, default_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            model_delays,
            default_delay_ms,
            max_delay_ms,
        }
    }

    /// Create a controller from the engine configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.model_delays.clone(),
            config.default_delay_ms,
            config.max_delay_ms,
        )
    }

    /// Base delay configured for a model
    pub fn base_delay_ms(&self, model: &str) -> u64 {
        self.model_delays
            .get(model)
            .copied()
            .unwrap_or(self.default_delay_ms)
    }

    /// Delay before the next batch of `model`
    pub fn next_delay(
        &self,
        model: &str,
        previous_batch: Option<Duration>,
        consecutive_errors: u32,
    ) -> Duration {
        let ms = self.compute_delay_ms(self.base_delay_ms(model), previous_batch, consecutive_errors);
        Duration::from_millis(ms)
    }

    /// Core formula, in milliseconds
    pub fn compute_delay_ms(
        &self,
        base_ms: u64,
        previous_batch: Option<Duration>,
        consecutive_errors: u32,
    ) -> u64 {
        let mut delay = base_ms as f64;

        if let Some(duration) = previous_batch {
            if duration > SLOW_BATCH {
                delay *= 1.5;
            } else if duration < FAST_BATCH {
                delay *= 0.8;
            }
        }

        delay *= 2f64.powi(consecutive_errors.min(MAX_BACKOFF_EXPONENT) as i32);

        delay.clamp(0.0, self.max_delay_ms as f64).round() as u64
    }
}

impl Default for RateController {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
