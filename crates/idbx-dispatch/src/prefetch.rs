//! Adaptive cursor prefetch cache.
//!
//! A cursor that keeps calling plain `continue()` starts asking the backend
//! for batches instead of single entries. The batch size starts at
//! `min_amount` and doubles on every prefetch request up to `max_amount`.
//! Cached entries are served locally until the cache drains, an explicit
//! key or an out-of-range advance forces a server round trip, or another
//! request in the same transaction invalidates the cache.
//!
//! `PrefetchCache` is a pure state machine. It never talks to the channel;
//! transitions hand back `CacheEffects` that the caller turns into
//! `AckReceivedBlobs` and `CursorPrefetchReset` messages.

use std::collections::VecDeque;

use idbx_core::{IdbKey, IdbValue};
use idbx_proto::CursorEntry;

use crate::config::PrefetchPolicy;
use crate::error::DispatchError;

/// Consumption report sent when a non-empty cache is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchReset {
    pub used_prefetches: u32,
    pub unused_prefetches: u32,
}

/// Outbound work produced by a cache transition.
#[derive(Debug, Default, PartialEq)]
pub struct CacheEffects {
    /// Blobs of entries dropped without being delivered
    pub ack_blobs: Vec<String>,
    pub reset: Option<PrefetchReset>,
}

impl CacheEffects {
    pub fn is_empty(&self) -> bool {
        self.ack_blobs.is_empty() && self.reset.is_none()
    }
}

/// What a keyless `continue()` should do.
#[derive(Debug, PartialEq)]
pub enum ContinuePlan {
    /// Serve the next entry from the cache
    Cached(CursorEntry, CacheEffects),
    /// Ask the backend for this many entries
    Prefetch(u32),
    /// Ask the backend for one entry
    Single,
}

/// What an `advance(count)` should do.
#[derive(Debug, PartialEq)]
pub enum AdvancePlan {
    Cached(CursorEntry, CacheEffects),
    /// The cache was reset; forward the advance to the backend
    Direct(CacheEffects),
}

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchStats {
    pub cached: usize,
    pub continue_count: u32,
    pub used_prefetches: u32,
    pub pending_onsuccess_callbacks: i32,
    pub prefetch_amount: u32,
}

#[derive(Debug)]
pub struct PrefetchCache {
    policy: PrefetchPolicy,
    entries: VecDeque<CursorEntry>,
    continue_count: u32,
    used_prefetches: u32,
    pending_onsuccess_callbacks: i32,
    prefetch_amount: u32,
}

impl PrefetchCache {
    pub fn new(policy: PrefetchPolicy) -> Self {
        Self {
            policy,
            entries: VecDeque::new(),
            continue_count: 0,
            used_prefetches: 0,
            pending_onsuccess_callbacks: 0,
            prefetch_amount: policy.min_amount,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> PrefetchStats {
        PrefetchStats {
            cached: self.entries.len(),
            continue_count: self.continue_count,
            used_prefetches: self.used_prefetches,
            pending_onsuccess_callbacks: self.pending_onsuccess_callbacks,
            prefetch_amount: self.prefetch_amount,
        }
    }

    /// Decide how to satisfy a `continue()` without a target key.
    pub fn plan_continue(&mut self) -> ContinuePlan {
        self.continue_count = self.continue_count.saturating_add(1);

        if let Some((entry, effects)) = self.cached_continue() {
            return ContinuePlan::Cached(entry, effects);
        }

        if self.continue_count > self.policy.continue_threshold {
            self.pending_onsuccess_callbacks += 1;
            let amount = self.prefetch_amount;
            self.prefetch_amount = amount
                .saturating_mul(2)
                .min(self.policy.max_amount)
                .max(self.policy.min_amount);
            return ContinuePlan::Prefetch(amount);
        }

        ContinuePlan::Single
    }

    /// Decide how to satisfy `advance(count)`.
    ///
    /// An advance that fits inside the cache skips `count - 1` entries
    /// locally and serves the next one; anything else resets the cache.
    pub fn plan_advance(&mut self, count: u32) -> AdvancePlan {
        let fits = count > 0 && (count as usize) <= self.entries.len();
        if !fits {
            return AdvancePlan::Direct(self.reset());
        }

        let mut skipped = Vec::new();
        for _ in 1..count {
            if let Some(entry) = self.entries.pop_front() {
                self.used_prefetches += 1;
                collect_blobs(&entry, &mut skipped);
            }
        }

        match self.cached_continue() {
            Some((entry, mut effects)) => {
                skipped.append(&mut effects.ack_blobs);
                effects.ack_blobs = skipped;
                AdvancePlan::Cached(entry, effects)
            }
            // count <= len guarantees an entry is left
            None => AdvancePlan::Direct(CacheEffects {
                ack_blobs: skipped,
                reset: None,
            }),
        }
    }

    /// Replace the cache with a fresh batch from the backend.
    ///
    /// The three sequences must have the same length.
    pub fn set_prefetch_data(
        &mut self,
        keys: Vec<IdbKey>,
        primary_keys: Vec<IdbKey>,
        values: Vec<Option<IdbValue>>,
    ) -> Result<(), DispatchError> {
        if keys.len() != primary_keys.len() || keys.len() != values.len() {
            return Err(DispatchError::Protocol(format!(
                "prefetch batch has {} keys, {} primary keys and {} values",
                keys.len(),
                primary_keys.len(),
                values.len()
            )));
        }

        self.entries = keys
            .into_iter()
            .zip(primary_keys)
            .zip(values)
            .map(|((key, primary_key), value)| CursorEntry {
                key,
                primary_key,
                value,
            })
            .collect();
        self.used_prefetches = 0;
        self.pending_onsuccess_callbacks = 0;
        Ok(())
    }

    /// Pop the next cached entry, if any.
    ///
    /// When no plain continues are outstanding (for example after an advance)
    /// the rest of the cache is discarded.
    pub fn cached_continue(&mut self) -> Option<(CursorEntry, CacheEffects)> {
        let entry = self.entries.pop_front()?;
        self.used_prefetches += 1;
        self.pending_onsuccess_callbacks += 1;

        let effects = if self.continue_count == 0 {
            self.reset()
        } else {
            CacheEffects::default()
        };
        Some((entry, effects))
    }

    /// Called after the caller finished handling one success delivery.
    ///
    /// Deliveries that came straight from the backend push the count below
    /// zero. Only a return to exactly zero means the last prefetched delivery
    /// was handled without a follow-up, so the cursor has gone idle and the
    /// cache is reset.
    pub fn post_success_handler_callback(&mut self) -> CacheEffects {
        self.pending_onsuccess_callbacks = self.pending_onsuccess_callbacks.saturating_sub(1);
        if self.pending_onsuccess_callbacks == 0 {
            return self.reset();
        }
        CacheEffects::default()
    }

    /// Return to the idle state, discarding any cached entries.
    ///
    /// A reset report is only produced when entries were actually discarded.
    pub fn reset(&mut self) -> CacheEffects {
        self.continue_count = 0;
        self.prefetch_amount = self.policy.min_amount;

        if self.entries.is_empty() {
            return CacheEffects::default();
        }

        let mut ack_blobs = Vec::new();
        for entry in &self.entries {
            collect_blobs(entry, &mut ack_blobs);
        }
        let reset = PrefetchReset {
            used_prefetches: self.used_prefetches,
            unused_prefetches: self.entries.len() as u32,
        };

        self.entries.clear();
        self.pending_onsuccess_callbacks = 0;
        CacheEffects {
            ack_blobs,
            reset: Some(reset),
        }
    }

    /// Drop everything when the cursor goes away. Only the blob holds matter
    /// at that point; the backend forgets the cursor itself.
    pub fn discard(&mut self) -> Vec<String> {
        let mut uuids = Vec::new();
        for entry in self.entries.drain(..) {
            collect_blobs(&entry, &mut uuids);
        }
        uuids
    }
}

pub(crate) fn collect_blobs(entry: &CursorEntry, out: &mut Vec<String>) {
    if let Some(value) = &entry.value {
        out.extend(value.blob_uuids().map(str::to_owned));
    }
}
