//! Transparent context propagation at task-submission boundaries.
//!
//! Deliberately narrow: rather than reflecting over arbitrary concrete
//! executor types, hosts expose their pools through [`TaskExecutor`] and get
//! automatic wrapping via [`wrap_executor`].

use std::sync::Arc;

use crate::carrier::Carrier;

/// A task-submission surface that can run a boxed closure.
///
/// Implement this over an existing thread pool or executor to make it
/// eligible for [`wrap_executor`].
pub trait TaskExecutor: Send + Sync {
    /// Submits `task` for execution. Must not block the caller indefinitely
    /// waiting for completion.
    fn execute(&self, task: Box<dyn FnOnce() + Send>);

    /// Whether this executor already propagates context on its own, making
    /// further wrapping a no-op. Defaults to `false`.
    fn is_context_propagating(&self) -> bool {
        false
    }
}

/// Wraps a synchronous closure so that, when invoked, it first restores the
/// context captured at the moment `wrap_sync` was called.
pub fn wrap_sync(f: impl FnOnce() + Send + 'static) -> impl FnOnce() + Send + 'static {
    let carrier = Carrier::capture();
    move || carrier.restore_sync(f)
}

/// Wraps a future so that its entire execution runs under the context
/// captured at the moment `wrap` was called.
#[cfg(feature = "async")]
pub fn wrap<F>(future: F) -> impl std::future::Future<Output = F::Output> + Send + 'static
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    let carrier = Carrier::capture();
    async move { carrier.restore(future).await }
}

/// A [`TaskExecutor`] decorator that captures context at submission time and
/// restores it before each task runs on the inner executor.
pub struct ContextPropagatingExecutor<E> {
    inner: E,
}

impl<E: TaskExecutor> ContextPropagatingExecutor<E> {
    /// Wraps `inner`. If `inner` already reports
    /// [`TaskExecutor::is_context_propagating`], prefer [`wrap_executor`],
    /// which returns `inner` unchanged in that case.
    pub fn new(inner: E) -> Self {
        Self { inner }
    }

    /// The wrapped executor.
    pub fn into_inner(self) -> E {
        self.inner
    }
}

impl<E: TaskExecutor> TaskExecutor for ContextPropagatingExecutor<E> {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        let wrapped = wrap_sync(move || task());
        self.inner.execute(Box::new(wrapped));
    }

    fn is_context_propagating(&self) -> bool {
        true
    }
}

/// Wraps `executor`, unless it already reports itself as context-propagating.
pub fn wrap_executor<E: TaskExecutor + 'static>(executor: E) -> Arc<dyn TaskExecutor> {
    if executor.is_context_propagating() {
        return Arc::new(executor);
    }
    Arc::new(ContextPropagatingExecutor::new(executor))
}

/// Spawns `future` on the current Tokio runtime, with context captured now
/// and restored for the spawned task's entire execution.
#[cfg(feature = "async")]
pub fn spawn_with_context<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(wrap(future))
}

/// Like [`spawn_with_context`], but on an explicitly supplied runtime handle.
#[cfg(feature = "async")]
pub fn spawn_with_context_on<F>(
    handle: &tokio::runtime::Handle,
    future: F,
) -> tokio::task::JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    handle.spawn(wrap(future))
}

/// Runs `f` on the blocking thread pool, with context captured now and
/// restored before `f` runs.
#[cfg(feature = "async")]
pub fn spawn_blocking_with_context<F, R>(f: F) -> tokio::task::JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(wrap_sync(f))
}

/// Like [`spawn_blocking_with_context`], but on an explicitly supplied
/// runtime handle.
#[cfg(feature = "async")]
pub fn spawn_blocking_with_context_on<F, R>(
    handle: &tokio::runtime::Handle,
    f: F,
) -> tokio::task::JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    handle.spawn_blocking(wrap_sync(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{bind, bind_sync, get};
    use crate::key::ContextKey;
    use std::sync::Mutex;

    struct RecordingExecutor {
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    impl TaskExecutor for RecordingExecutor {
        fn execute(&self, task: Box<dyn FnOnce() + Send>) {
            self.seen.lock().unwrap().push("executed");
            task();
        }
    }

    struct AlreadyPropagating;

    impl TaskExecutor for AlreadyPropagating {
        fn execute(&self, task: Box<dyn FnOnce() + Send>) {
            task();
        }

        fn is_context_propagating(&self) -> bool {
            true
        }
    }

    #[test]
    fn wrap_sync_restores_captured_binding() {
        let key = ContextKey::<&'static str>::new("executor.wrap_sync");
        let (tx, rx) = std::sync::mpsc::channel();
        bind_sync(&key, "T1", || {
            let wrapped = wrap_sync(move || {
                tx.send(get(&key).unwrap().to_string()).unwrap();
            });
            std::thread::spawn(wrapped).join().unwrap();
        });
        assert_eq!(rx.recv().unwrap(), "T1");
    }

    #[test]
    fn wrap_executor_is_idempotent_for_self_propagating_executors() {
        let wrapped = wrap_executor(AlreadyPropagating);
        assert!(wrapped.is_context_propagating());
    }

    #[test]
    fn wrap_executor_decorates_plain_executors() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let executor = wrap_executor(RecordingExecutor { seen: seen.clone() });
        let key = ContextKey::<&'static str>::new("executor.decorate");
        let (tx, rx) = std::sync::mpsc::channel();
        bind_sync(&key, "T2", || {
            executor.execute(Box::new(move || {
                tx.send(get(&key).unwrap().to_string()).unwrap();
            }));
        });
        assert_eq!(rx.recv().unwrap(), "T2");
        assert_eq!(seen.lock().unwrap().as_slice(), ["executed"]);
    }

    #[tokio::test]
    async fn spawn_with_context_restores_in_worker() {
        let key = ContextKey::<&'static str>::new("executor.spawn_with_context");
        let seen = bind(&key, "T3", async {
            spawn_with_context(async { get(&key).unwrap().to_string() })
                .await
                .unwrap()
        })
        .await;
        assert_eq!(seen, "T3");
    }
}
