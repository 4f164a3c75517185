// src/cancel.rs

//! Generation-based cancellation for full heatmap rebuilds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A token issued for one generation of a shared counter.
///
/// The token reports itself cancelled as soon as the counter moves past the
/// generation it was issued for, which is how a newer reset supersedes a
/// rebuild that is still running.
#[derive(Debug, Clone)]
pub struct CancelToken {
    generation: Arc<AtomicU64>,
    issued: u64,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A fresh counter and a token for its current generation.
    pub fn new() -> Self {
        Self::for_generation(Arc::new(AtomicU64::new(0)))
    }

    /// A token for whatever generation `counter` currently holds.
    pub fn for_generation(counter: Arc<AtomicU64>) -> Self {
        let issued = counter.load(Ordering::Acquire);
        Self {
            generation: counter,
            issued,
        }
    }

    /// Bumps the shared counter, cancelling every outstanding token, and
    /// returns a token for the new generation.
    pub fn supersede(&self) -> CancelToken {
        let issued = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        CancelToken {
            generation: Arc::clone(&self.generation),
            issued,
        }
    }

    /// Generation this token was issued for.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn is_cancelled(&self) -> bool {
        self.generation.load(Ordering::Acquire) != self.issued
    }
}
