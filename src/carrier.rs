//! Immutable snapshots of ambient state, captured at task-submission time
//! and re-established on the worker that eventually runs the task.

use std::any::Any;
use std::sync::Arc;

use crate::binding;
use crate::key::CapturedBinding;
use crate::registry;
use crate::transmitter::{self, Transmitter};

struct TransmitterSnapshot {
    transmitter: Arc<dyn Transmitter>,
    snapshot: Arc<dyn Any + Send + Sync>,
}

/// An immutable snapshot of every bound [`crate::key::ContextKey`] and every
/// transmitter's foreign state, taken at one instant on one worker.
///
/// Cheap to clone (internals are `Arc`-backed) and safe to restore
/// concurrently on many workers, since capture freezes values up front.
#[derive(Clone)]
pub struct Carrier {
    bindings: Arc<Vec<CapturedBinding>>,
    transmitters: Arc<Vec<TransmitterSnapshot>>,
}

impl Carrier {
    /// Captures every enrolled, currently-bound key and every transmitter's
    /// non-empty foreign state on the calling worker.
    #[must_use]
    #[tracing::instrument(name = "carrier_capture", skip_all)]
    pub fn capture() -> Self {
        let bindings = registry::capture_all();
        let transmitters = transmitter::active()
            .iter()
            .filter_map(|t| {
                t.capture().map(|snapshot| TransmitterSnapshot {
                    transmitter: t.clone(),
                    snapshot: Arc::from(snapshot),
                })
            })
            .collect::<Vec<_>>();
        tracing::debug!(
            bound_keys = bindings.len(),
            active_transmitters = transmitters.len(),
            "captured carrier"
        );
        Self {
            bindings: Arc::new(bindings),
            transmitters: Arc::new(transmitters),
        }
    }

    /// Whether this carrier captured nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty() && self.transmitters.is_empty()
    }

    /// Runs `body` with every captured binding established, and every
    /// transmitter replayed *within* that binding scope, synchronously.
    ///
    /// Transmitters replay in capture order once bindings are active, so a
    /// transmitter can observe the captured bindings during `replay`.
    /// Teardown (`restore`) runs in reverse order before the bindings are
    /// popped, whether `body` returns normally or panics.
    #[tracing::instrument(name = "carrier_restore_sync", skip_all)]
    pub fn restore_sync<R>(&self, body: impl FnOnce() -> R) -> R {
        let base = binding::current_chain();
        let chain = binding::build_chain(
            base,
            self.bindings
                .iter()
                .map(|b| (b.id, b.value.clone())),
        );
        let transmitters = &*self.transmitters;
        binding::restore_chain_sync(chain, move || {
            let _guard = TeardownGuard::replay(transmitters);
            body()
        })
    }

    /// Runs `future` with every captured binding established, and every
    /// transmitter replayed *within* that binding scope, for the future's
    /// entire execution.
    ///
    /// Teardown runs in reverse order, before the bindings are popped, on
    /// normal completion, on panic, and when the returned future is dropped
    /// mid-poll (e.g. by structured-scope cancellation).
    #[cfg(feature = "async")]
    #[tracing::instrument(name = "carrier_restore", skip_all)]
    pub async fn restore<F>(&self, future: F) -> F::Output
    where
        F: std::future::Future,
    {
        let base = binding::current_chain();
        let chain = binding::build_chain(
            base,
            self.bindings
                .iter()
                .map(|b| (b.id, b.value.clone())),
        );
        let transmitters = &*self.transmitters;
        binding::restore_chain(chain, async move {
            let _guard = TeardownGuard::replay(transmitters);
            future.await
        })
        .await
    }
}

impl Default for Carrier {
    fn default() -> Self {
        Self {
            bindings: Arc::new(Vec::new()),
            transmitters: Arc::new(Vec::new()),
        }
    }
}

/// Replays transmitters in order on construction, tears them down in
/// reverse order on drop — normal return, panic, and mid-poll cancellation
/// all run the same teardown path. Teardown failures are caught and logged
/// rather than allowed to mask the primary result.
struct TeardownGuard<'a> {
    transmitters: &'a [TransmitterSnapshot],
    backups: Vec<Option<Box<dyn Any + Send + Sync>>>,
}

impl<'a> TeardownGuard<'a> {
    fn replay(transmitters: &'a [TransmitterSnapshot]) -> Self {
        let mut backups = Vec::with_capacity(transmitters.len());
        for entry in transmitters {
            let backup = entry.transmitter.replay(entry.snapshot.as_ref());
            backups.push(Some(backup));
        }
        Self {
            transmitters,
            backups,
        }
    }
}

impl<'a> Drop for TeardownGuard<'a> {
    fn drop(&mut self) {
        for (entry, backup) in self
            .transmitters
            .iter()
            .zip(self.backups.iter_mut())
            .rev()
        {
            let Some(backup) = backup.take() else {
                continue;
            };
            let name = entry.transmitter.name().to_string();
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                entry.transmitter.restore(backup);
            }));
            if outcome.is_err() {
                tracing::warn!(transmitter = %name, "transmitter teardown panicked; suppressing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ContextKey;

    #[test]
    fn capture_restore_round_trip() {
        let key = ContextKey::<&'static str>::new("carrier.trace");
        let carrier = crate::binding::bind_sync(&key, "T1", Carrier::capture);
        assert!(!crate::binding::is_bound(&key));
        let seen = carrier.restore_sync(|| crate::binding::get(&key).unwrap().to_string());
        assert_eq!(seen, "T1");
        assert!(!crate::binding::is_bound(&key));
    }

    #[test]
    fn empty_carrier_is_empty() {
        let carrier = Carrier::capture();
        assert!(carrier.is_empty());
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn restore_runs_across_worker_boundary() {
        let key = ContextKey::<&'static str>::new("carrier.cross_worker");
        let carrier = crate::binding::bind_sync(&key, "T2", Carrier::capture);
        let seen = tokio::spawn(async move {
            carrier
                .restore(async { crate::binding::get(&key).unwrap().to_string() })
                .await
        })
        .await
        .unwrap();
        assert_eq!(seen, "T2");
    }
}
