//! Typed identity for a scoped binding slot.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::binding;
use crate::registry;

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(0);

/// Opaque, globally unique identity for a [`ContextKey`].
///
/// Two keys constructed with the same name are *not* equal; identity is
/// assigned once at construction and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId(u64);

impl KeyId {
    fn next() -> Self {
        Self(NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A captured binding, type-erased for transport inside a [`crate::carrier::Carrier`].
pub(crate) struct CapturedBinding {
    pub(crate) id: KeyId,
    pub(crate) name: &'static str,
    pub(crate) value: Arc<dyn Any + Send + Sync>,
}

/// Object-safe view of a [`ContextKey`], used by the registry to traverse
/// every enrolled key without knowing its concrete type.
pub(crate) trait AnyContextKey: Send + Sync {
    fn id(&self) -> KeyId;
    fn name(&self) -> &'static str;
    /// Returns the currently bound value on this worker, if any, type-erased.
    fn capture_current(&self) -> Option<CapturedBinding>;
}

/// Identity object for one dynamically scoped slot of type `T`.
///
/// A key carries an optional default, returned by [`crate::get`] when no
/// binding is active. Construction enrolls the key in the process-wide
/// registry so it participates in [`crate::carrier::Carrier::capture`].
pub struct ContextKey<T> {
    id: KeyId,
    name: &'static str,
    default: Option<Arc<T>>,
}

impl<T: Send + Sync + 'static> ContextKey<T> {
    /// Creates a key with no default; reading it while unbound fails with
    /// [`crate::error::ScopeError::Unbound`].
    #[must_use]
    pub fn new(name: &'static str) -> Arc<Self> {
        Self::build(name, None)
    }

    /// Creates a key with a default value, returned by `get` when unbound.
    #[must_use]
    pub fn with_default(name: &'static str, default: T) -> Arc<Self> {
        Self::build(name, Some(Arc::new(default)))
    }

    fn build(name: &'static str, default: Option<Arc<T>>) -> Arc<Self> {
        let key = Arc::new(Self {
            id: KeyId::next(),
            name,
            default,
        });
        registry::enroll(key.clone());
        key
    }

    /// The key's debug name. Not required to be unique.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the key carries a default value.
    #[must_use]
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub(crate) fn id(&self) -> KeyId {
        self.id
    }

    pub(crate) fn default_arc(&self) -> Option<Arc<T>> {
        self.default.clone()
    }
}

impl<T: Send + Sync + 'static> AnyContextKey for ContextKey<T> {
    fn id(&self) -> KeyId {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn capture_current(&self) -> Option<CapturedBinding> {
        binding::get_erased(self.id).map(|value| CapturedBinding {
            id: self.id,
            name: self.name,
            value,
        })
    }
}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextKey")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}
