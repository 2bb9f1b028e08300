//! Dispatcher configuration.
//!
//! The prefetch heuristics and the put size limit are workload-tuned values,
//! so they live here instead of being baked into the state machine.
//!
//! Default values match the standard host tuning: prefetch after 2 plain
//! continues, starting at 5 entries and doubling up to 100; puts limited to
//! one 128 MiB message minus 1 MiB of envelope.

use serde::{Deserialize, Serialize};

/// Largest message the channel carries.
pub const MAX_MESSAGE_SIZE_BYTES: usize = 128 * 1024 * 1024;

/// Room reserved for the request envelope around a put's value and key.
pub const MAX_MESSAGE_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Adaptive prefetch sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchPolicy {
    /// Plain continues tolerated before switching to prefetch requests
    pub continue_threshold: u32,
    /// First prefetch size, and the size after every reset
    pub min_amount: u32,
    /// Upper clamp for the doubling prefetch size
    pub max_amount: u32,
}

impl Default for PrefetchPolicy {
    fn default() -> Self {
        Self {
            continue_threshold: 2,
            min_amount: 5,
            max_amount: 100,
        }
    }
}

impl PrefetchPolicy {
    /// Create a policy with custom limits
    pub fn new(continue_threshold: u32, min_amount: u32, max_amount: u32) -> Self {
        Self {
            continue_threshold,
            min_amount,
            max_amount,
        }
    }

    /// Never prefetch; every continue is a round trip.
    pub fn disabled() -> Self {
        Self {
            continue_threshold: u32::MAX,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> idbx::Result<()> {
        if self.min_amount == 0 {
            return Err(idbx::Error::Config(
                "prefetch.min_amount must be at least 1".into(),
            ));
        }
        if self.min_amount > self.max_amount {
            return Err(idbx::Error::Config(format!(
                "prefetch.min_amount ({}) exceeds prefetch.max_amount ({})",
                self.min_amount, self.max_amount
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub prefetch: PrefetchPolicy,
    /// Puts whose value size plus key size estimate exceed this are rejected locally
    pub max_put_value_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            prefetch: PrefetchPolicy::default(),
            max_put_value_size: MAX_MESSAGE_SIZE_BYTES - MAX_MESSAGE_OVERHEAD_BYTES,
        }
    }
}

impl DispatcherConfig {
    pub fn with_prefetch(mut self, prefetch: PrefetchPolicy) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_max_put_value_size(mut self, max: usize) -> Self {
        self.max_put_value_size = max;
        self
    }

    /// Parse a JSON configuration document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> idbx::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> idbx::Result<()> {
        self.prefetch.validate()?;
        if self.max_put_value_size == 0 {
            return Err(idbx::Error::Config(
                "max_put_value_size must be positive".into(),
            ));
        }
        Ok(())
    }
}
