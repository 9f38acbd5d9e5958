//! Pluggable propagation of foreign ambient state (diagnostic maps, tracing
//! spans, or any other worker-local store the core doesn't know about).
//!
//! Transmitters are discovered two ways: at process start via
//! [`inventory::submit!`], and programmatically via [`register`]. The
//! registry itself is the same copy-on-write `ArcSwap` shape used by
//! [`crate::registry`].

mod diagnostic_map;

use std::any::Any;
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;

pub use diagnostic_map::DiagnosticMapTransmitter;

/// Plugin contract for propagating one kind of foreign ambient state across
/// a task submission boundary.
///
/// Implementations must be stateless with respect to the carrier: all
/// propagated state flows through the `snapshot`/`backup` values, never
/// through fields mutated by these calls.
pub trait Transmitter: Send + Sync {
    /// Stable name, used in diagnostics and [`crate::error::ScopeError::TransmitterFailure`].
    fn name(&self) -> &str;

    /// Captures this worker's current foreign state, or `None` if there is
    /// nothing to propagate. Must return a value-semantics snapshot: later
    /// mutation on this worker must not affect what was returned.
    fn capture(&self) -> Option<Box<dyn Any + Send + Sync>>;

    /// Saves this worker's current state into a backup, then installs
    /// `snapshot` as the active state.
    fn replay(&self, snapshot: &(dyn Any + Send + Sync)) -> Box<dyn Any + Send + Sync>;

    /// Restores the state saved by a prior [`Transmitter::replay`] call.
    fn restore(&self, backup: Box<dyn Any + Send + Sync>);
}

/// A transmitter registered for the built-in [`inventory`]-based discovery.
pub struct TransmitterRegistration(pub fn() -> Arc<dyn Transmitter>);

inventory::collect!(TransmitterRegistration);

static REGISTRY: Lazy<ArcSwap<Vec<Arc<dyn Transmitter>>>> = Lazy::new(|| {
    let discovered: Vec<Arc<dyn Transmitter>> = inventory::iter::<TransmitterRegistration>
        .into_iter()
        .map(|registration| (registration.0)())
        .collect();
    ArcSwap::from_pointee(discovered)
});

/// Adds `transmitter` to the active registry if not already present by name.
pub fn register(transmitter: Arc<dyn Transmitter>) {
    let name = transmitter.name().to_string();
    REGISTRY.rcu(|current| {
        if current.iter().any(|t| t.name() == name) {
            current.clone()
        } else {
            let mut next = (**current).clone();
            next.push(transmitter.clone());
            Arc::new(next)
        }
    });
}

/// Re-scans the [`inventory`] collection and merges anything not already
/// present in the active registry.
pub fn refresh() {
    for registration in inventory::iter::<TransmitterRegistration> {
        register((registration.0)());
    }
}

/// Snapshot of the active registry, in registration order.
pub(crate) fn active() -> Arc<Vec<Arc<dyn Transmitter>>> {
    REGISTRY.load_full()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting(&'static str);

    impl Transmitter for Counting {
        fn name(&self) -> &str {
            self.0
        }

        fn capture(&self) -> Option<Box<dyn Any + Send + Sync>> {
            Some(Box::new(1u32))
        }

        fn replay(&self, snapshot: &(dyn Any + Send + Sync)) -> Box<dyn Any + Send + Sync> {
            Box::new(*snapshot.downcast_ref::<u32>().unwrap())
        }

        fn restore(&self, _backup: Box<dyn Any + Send + Sync>) {}
    }

    #[test]
    fn register_is_idempotent_by_name() {
        let before = active().len();
        register(Arc::new(Counting("tests.counting")));
        register(Arc::new(Counting("tests.counting")));
        let after = active().len();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn diagnostic_map_is_discovered_via_inventory() {
        assert!(active().iter().any(|t| t.name() == "diagnostic-map"));
    }
}
