//! Process-wide, append-only registry of enrolled [`crate::key::ContextKey`]s.
//!
//! Traversed by [`crate::carrier::Carrier::capture`] to find every key with
//! an active binding on the capturing worker. Insertion is lock-free: the
//! backing `Vec` is swapped under `ArcSwap`, the same copy-on-write shape
//! used for this crate's transmitter registry.

use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;

use crate::key::{AnyContextKey, CapturedBinding};

static KEYS: Lazy<ArcSwap<Vec<Arc<dyn AnyContextKey>>>> = Lazy::new(|| ArcSwap::from_pointee(Vec::new()));

/// Adds `key` to the registry if no entry with the same identity exists yet.
pub(crate) fn enroll<T: AnyContextKey + 'static>(key: Arc<T>) {
    let erased: Arc<dyn AnyContextKey> = key;
    let id = erased.id();
    KEYS.rcu(|current| {
        if current.iter().any(|k| k.id() == id) {
            current.clone()
        } else {
            let mut next = (**current).clone();
            next.push(erased.clone());
            Arc::new(next)
        }
    });
}

/// Returns the captured binding for every enrolled key that is currently bound.
pub(crate) fn capture_all() -> Vec<CapturedBinding> {
    KEYS.load()
        .iter()
        .filter_map(|key| key.capture_current())
        .collect()
}

/// Number of enrolled keys. Exposed for diagnostics and tests.
#[must_use]
pub fn enrolled_key_count() -> usize {
    KEYS.load().len()
}
