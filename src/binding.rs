//! Dynamic scoping of typed key→value bindings with strictly lexical lifetime.
//!
//! Bindings live on an immutable cons-list (a [`Frame`] chain) stored in
//! `tokio::task_local!` when the `async` feature is enabled, so the chain
//! survives `.await` points under work-stealing multi-thread runtimes.
//! Without that feature the same chain lives in `thread_local!`, suitable
//! for purely synchronous call paths.

use std::any::Any;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::{ScopeError, ScopeResult};
use crate::key::{ContextKey, KeyId};

struct Frame {
    id: KeyId,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<Frame>>,
}

type Chain = Option<Arc<Frame>>;

fn lookup(chain: &Chain, id: KeyId) -> Option<Arc<dyn Any + Send + Sync>> {
    let mut node = chain.as_ref();
    while let Some(frame) = node {
        if frame.id == id {
            return Some(frame.value.clone());
        }
        node = frame.parent.as_ref();
    }
    None
}

fn push(chain: &Chain, id: KeyId, value: Arc<dyn Any + Send + Sync>) -> Chain {
    Some(Arc::new(Frame {
        id,
        value,
        parent: chain.clone(),
    }))
}

#[cfg(feature = "async")]
mod storage {
    use super::Chain;
    use std::future::Future;

    tokio::task_local! {
        static CHAIN: Chain;
    }

    pub(super) fn current() -> Chain {
        CHAIN.try_with(Clone::clone).unwrap_or(None)
    }

    pub(super) fn sync_scope<R>(chain: Chain, f: impl FnOnce() -> R) -> R {
        CHAIN.sync_scope(chain, f)
    }

    pub(super) async fn scope<F: Future>(chain: Chain, f: F) -> F::Output {
        CHAIN.scope(chain, f).await
    }
}

#[cfg(not(feature = "async"))]
mod storage {
    use super::Chain;
    use std::cell::RefCell;

    thread_local! {
        static CHAIN: RefCell<Chain> = const { RefCell::new(None) };
    }

    pub(super) fn current() -> Chain {
        CHAIN.with(|c| c.borrow().clone())
    }

    pub(super) fn sync_scope<R>(chain: Chain, f: impl FnOnce() -> R) -> R {
        CHAIN.with(|cell| {
            let prev = cell.replace(chain);
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
            *cell.borrow_mut() = prev;
            match result {
                Ok(value) => value,
                Err(payload) => std::panic::resume_unwind(payload),
            }
        })
    }
}

/// Type-erased lookup used by [`crate::key::AnyContextKey::capture_current`].
pub(crate) fn get_erased(id: KeyId) -> Option<Arc<dyn Any + Send + Sync>> {
    lookup(&storage::current(), id)
}

/// Reads the innermost bound value for `key`, falling back to its default.
///
/// # Errors
/// Returns [`ScopeError::Unbound`] if `key` has neither an active binding
/// nor a default.
pub fn get<T: Send + Sync + 'static>(key: &ContextKey<T>) -> ScopeResult<Arc<T>> {
    if let Some(value) = lookup(&storage::current(), key.id()) {
        return Ok(value
            .downcast::<T>()
            .unwrap_or_else(|_| unreachable!("binding type never mismatches its key")));
    }
    key.default_arc().ok_or_else(|| ScopeError::Unbound {
        key_name: key.name().to_string(),
    })
}

/// Reads the innermost bound value for `key`, falling back to its default,
/// then to `fallback`. Never fails.
pub fn get_or_default<T: Send + Sync + 'static>(key: &ContextKey<T>, fallback: Arc<T>) -> Arc<T> {
    lookup(&storage::current(), key.id())
        .map(|value| {
            value
                .downcast::<T>()
                .unwrap_or_else(|_| unreachable!("binding type never mismatches its key"))
        })
        .or_else(|| key.default_arc())
        .unwrap_or(fallback)
}

/// Whether `key` currently has an active binding (defaults do not count).
#[must_use]
pub fn is_bound<T: Send + Sync + 'static>(key: &ContextKey<T>) -> bool {
    lookup(&storage::current(), key.id()).is_some()
}

/// Runs `body` with `key` bound to `value`, synchronously.
///
/// The binding is popped before `bind_sync` returns, whether `body` returns
/// normally or panics.
pub fn bind_sync<T: Send + Sync + 'static, R>(
    key: &ContextKey<T>,
    value: T,
    body: impl FnOnce() -> R,
) -> R {
    let chain = push(&storage::current(), key.id(), Arc::new(value));
    storage::sync_scope(chain, body)
}

/// Runs `future` with `key` bound to `value` for its entire execution,
/// including across `.await` points.
#[cfg(feature = "async")]
pub async fn bind<T: Send + Sync + 'static, F: std::future::Future>(
    key: &ContextKey<T>,
    value: T,
    future: F,
) -> F::Output {
    let chain = push(&storage::current(), key.id(), Arc::new(value));
    storage::scope(chain, future).await
}

/// One `(key, value)` pair to be established atomically by [`bind_all`]/[`bind_all_sync`].
pub(crate) struct ErasedBinding {
    pub(crate) id: KeyId,
    pub(crate) value: Arc<dyn Any + Send + Sync>,
}

/// A set of bindings to be pushed as a single nested frame chain.
///
/// Most call sites establish a handful of bindings at once, so entries live
/// inline up to four before spilling to the heap.
#[derive(Default)]
pub struct Bindings {
    entries: SmallVec<[ErasedBinding; 4]>,
}

impl Bindings {
    /// An empty set of bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key => value` to this set, returning `self` for chaining.
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(mut self, key: &ContextKey<T>, value: T) -> Self {
        self.entries.push(ErasedBinding {
            id: key.id(),
            value: Arc::new(value),
        });
        self
    }

    pub(crate) fn push_all(&self, base: &Chain) -> Chain {
        let mut chain = base.clone();
        for entry in &self.entries {
            chain = push(&chain, entry.id, entry.value.clone());
        }
        chain
    }
}

/// Runs `body` with every binding in `bindings` established atomically
/// (a single nested push), synchronously.
pub fn bind_all_sync<R>(bindings: Bindings, body: impl FnOnce() -> R) -> R {
    let chain = bindings.push_all(&storage::current());
    storage::sync_scope(chain, body)
}

/// Runs `future` with every binding in `bindings` established atomically,
/// for the future's entire execution.
#[cfg(feature = "async")]
pub async fn bind_all<F: std::future::Future>(bindings: Bindings, future: F) -> F::Output {
    let chain = bindings.push_all(&storage::current());
    storage::scope(chain, future).await
}

pub(crate) fn current_chain() -> Chain {
    storage::current()
}

/// Builds a chain from `base` plus `entries`, in order — used by
/// [`crate::carrier::Carrier::restore`] to re-establish a captured set of
/// bindings as a single nested push.
pub(crate) fn build_chain(
    base: Chain,
    entries: impl Iterator<Item = (KeyId, Arc<dyn Any + Send + Sync>)>,
) -> Chain {
    let mut chain = base;
    for (id, value) in entries {
        chain = push(&chain, id, value);
    }
    chain
}

pub(crate) fn restore_chain_sync<R>(chain: Chain, body: impl FnOnce() -> R) -> R {
    storage::sync_scope(chain, body)
}

#[cfg(feature = "async")]
pub(crate) async fn restore_chain<F: std::future::Future>(chain: Chain, future: F) -> F::Output {
    storage::scope(chain, future).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_sync_is_lexical() {
        let key = ContextKey::<String>::new("binding.trace");
        assert!(!is_bound(&key));
        let seen = bind_sync(&key, "T1".to_string(), || get(&key).unwrap().to_string());
        assert_eq!(seen, "T1");
        assert!(!is_bound(&key));
    }

    #[test]
    fn nested_bind_shadows_and_restores() {
        let key = ContextKey::<&'static str>::new("binding.shadow");
        bind_sync(&key, "outer", || {
            assert_eq!(*get(&key).unwrap(), "outer");
            bind_sync(&key, "inner", || {
                assert_eq!(*get(&key).unwrap(), "inner");
            });
            assert_eq!(*get(&key).unwrap(), "outer");
        });
    }

    #[test]
    fn unbound_key_without_default_fails() {
        let key = ContextKey::<u32>::new("binding.unbound");
        assert!(matches!(get(&key), Err(ScopeError::Unbound { .. })));
    }

    #[test]
    fn default_value_used_when_unbound() {
        let key = ContextKey::with_default("binding.default", 42u32);
        assert_eq!(*get(&key).unwrap(), 42);
    }

    #[test]
    fn inner_panic_still_restores_outer_binding() {
        let key = ContextKey::<&'static str>::new("binding.panic");
        bind_sync(&key, "outer", || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                bind_sync(&key, "inner", || {
                    assert_eq!(*get(&key).unwrap(), "inner");
                    panic!("boom");
                })
            }));
            assert!(result.is_err());
            assert_eq!(*get(&key).unwrap(), "outer");
        });
    }

    #[test]
    fn bind_all_establishes_atomically() {
        let a = ContextKey::<u32>::new("binding.bind_all.a");
        let b = ContextKey::<u32>::new("binding.bind_all.b");
        let bindings = Bindings::new().with(&a, 1).with(&b, 2);
        bind_all_sync(bindings, || {
            assert_eq!(*get(&a).unwrap(), 1);
            assert_eq!(*get(&b).unwrap(), 2);
        });
        assert!(!is_bound(&a));
        assert!(!is_bound(&b));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn bind_survives_await_points() {
        let key = ContextKey::<&'static str>::new("binding.async");
        let seen = bind(&key, "T2", async {
            tokio::task::yield_now().await;
            get(&key).unwrap().to_string()
        })
        .await;
        assert_eq!(seen, "T2");
    }
}
