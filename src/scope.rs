//! Structured fork/join concurrency with automatic inheritance of the
//! calling task's active bindings.
//!
//! Cancellation follows the same `tokio_util::sync::CancellationToken`
//! cooperative-cancellation idiom this codebase already uses for its own
//! shutdown coordination: children race their body against the token and
//! surface [`ScopeError::Interrupted`] if it fires first.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::carrier::Carrier;
use crate::error::{ScopeError, ScopeResult};

const OPEN: u8 = 0;
const JOINED: u8 = 1;
const CLOSED: u8 = 2;

fn state_name(state: u8) -> &'static str {
    match state {
        OPEN => "open",
        JOINED => "joined",
        _ => "closed",
    }
}

struct RawScope<T> {
    state: AtomicU8,
    token: CancellationToken,
    tasks: Mutex<JoinSet<Result<T, ScopeError>>>,
}

impl<T: Send + 'static> RawScope<T> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(OPEN),
            token: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    fn require(&self, expected: u8) -> ScopeResult<()> {
        let actual = self.state.load(Ordering::Acquire);
        if actual == expected {
            Ok(())
        } else {
            Err(ScopeError::InvalidScopeState {
                expected: state_name(expected),
                actual: state_name(actual),
            })
        }
    }

    fn fork<F, E>(&self, body: F) -> ScopeResult<()>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
        T: Send + 'static,
    {
        self.require(OPEN)?;
        let carrier = Carrier::capture();
        let token = self.token.clone();
        self.tasks.lock().spawn(async move {
            carrier
                .restore(async move {
                    tokio::select! {
                        result = body => result.map_err(|e| ScopeError::ExecutionFailure { cause: Box::new(e) }),
                        () = token.cancelled() => Err(ScopeError::Interrupted),
                    }
                })
                .await
        });
        Ok(())
    }

    async fn join_all(&self) -> ScopeResult<Vec<Result<T, ScopeError>>> {
        self.join_all_with(|_| false).await
    }

    /// Joins every child, invoking `on_result` as each one completes; if it
    /// returns `true` the remaining siblings are cancelled immediately
    /// rather than after the full batch finishes.
    async fn join_all_with(
        &self,
        mut on_result: impl FnMut(&Result<T, ScopeError>) -> bool,
    ) -> ScopeResult<Vec<Result<T, ScopeError>>> {
        self.require(OPEN)?;
        let mut results = Vec::new();
        let mut tasks = self.tasks.lock().split_off(0);
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(join_err) => Err(ScopeError::ExecutionFailure {
                    cause: Box::new(join_err),
                }),
            };
            if on_result(&result) {
                self.token.cancel();
            }
            results.push(result);
        }
        self.state.store(JOINED, Ordering::Release);
        Ok(results)
    }

    async fn join_all_timeout(
        &self,
        timeout: Duration,
    ) -> ScopeResult<Vec<Result<T, ScopeError>>> {
        self.require(OPEN)?;
        let mut results = Vec::new();
        let mut tasks = self.tasks.lock().split_off(0);
        let outcome = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.join_next().await {
                results.push(match joined {
                    Ok(result) => result,
                    Err(join_err) => Err(ScopeError::ExecutionFailure {
                        cause: Box::new(join_err),
                    }),
                });
            }
        })
        .await;
        self.token.cancel();
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        self.state.store(JOINED, Ordering::Release);
        match outcome {
            Ok(()) => Ok(results),
            Err(_) => Err(ScopeError::Timeout { duration: timeout }),
        }
    }

    fn close(&self) {
        self.token.cancel();
        self.tasks.lock().abort_all();
        self.state.store(CLOSED, Ordering::Release);
    }
}

impl<T> Drop for RawScope<T> {
    fn drop(&mut self) {
        self.token.cancel();
        self.tasks.lock().abort_all();
    }
}

/// A plain structured scope: forked tasks run to completion or are
/// cancelled on `close`, with no automatic shutdown policy.
pub struct Scope<T> {
    raw: RawScope<T>,
}

impl<T: Send + 'static> Scope<T> {
    /// Opens a new scope in the `Open` state.
    #[must_use]
    pub fn open() -> Self {
        Self { raw: RawScope::new() }
    }

    /// Forks a child task. The child observes every binding active on the
    /// caller at the moment of this call.
    ///
    /// # Errors
    /// Fails with [`ScopeError::InvalidScopeState`] if the scope is not `Open`.
    pub fn fork<F, E>(&self, body: F) -> ScopeResult<()>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.raw.fork(body)
    }

    /// Awaits every forked child, moving the scope to `Joined`.
    ///
    /// # Errors
    /// Fails with [`ScopeError::InvalidScopeState`] if the scope is not `Open`.
    pub async fn join(&self) -> ScopeResult<Vec<Result<T, ScopeError>>> {
        self.raw.join_all().await
    }

    /// Awaits every forked child with a deadline; on expiry, cancels the
    /// remaining children cooperatively and fails with [`ScopeError::Timeout`].
    ///
    /// # Errors
    /// Fails with [`ScopeError::InvalidScopeState`] or [`ScopeError::Timeout`].
    pub async fn join_timeout(
        &self,
        timeout: Duration,
    ) -> ScopeResult<Vec<Result<T, ScopeError>>> {
        self.raw.join_all_timeout(timeout).await
    }

    /// Cancels any outstanding children and moves the scope to `Closed`.
    pub fn close(&self) {
        self.raw.close();
    }
}

/// A structured scope where any child failure cancels the remaining
/// siblings; the joiner surfaces the first failure.
pub struct ShutdownOnFailureScope<T> {
    raw: RawScope<T>,
    first_failure: Mutex<Option<ScopeError>>,
}

impl<T: Send + 'static> ShutdownOnFailureScope<T> {
    /// Opens a new scope in the `Open` state.
    #[must_use]
    pub fn open() -> Self {
        Self {
            raw: RawScope::new(),
            first_failure: Mutex::new(None),
        }
    }

    /// Forks a child task under the shutdown-on-failure policy.
    ///
    /// # Errors
    /// Fails with [`ScopeError::InvalidScopeState`] if the scope is not `Open`.
    pub fn fork<F, E>(&self, body: F) -> ScopeResult<()>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.raw.fork(body)
    }

    /// Awaits every forked child, cancelling the rest as soon as one fails.
    ///
    /// # Errors
    /// Fails with [`ScopeError::InvalidScopeState`] if the scope is not `Open`.
    pub async fn join(&self) -> ScopeResult<()> {
        let results = self
            .raw
            .join_all_with(|result| result.is_err())
            .await?;
        let mut first_failure = self.first_failure.lock();
        for result in results {
            if let Err(err) = result {
                if first_failure.is_none() {
                    *first_failure = Some(err);
                }
            }
        }
        Ok(())
    }

    /// After `join`, surfaces the first child failure, if any.
    ///
    /// # Errors
    /// Fails with [`ScopeError::InvalidScopeState`] if the scope is not
    /// `Joined`, or with the first child's failure.
    pub fn throw_if_failed(&self) -> ScopeResult<()> {
        self.raw.require(JOINED)?;
        if let Some(err) = self.first_failure.lock().take() {
            return Err(err);
        }
        Ok(())
    }

    /// Cancels any outstanding children and moves the scope to `Closed`.
    pub fn close(&self) {
        self.raw.close();
    }
}

/// A structured scope where the first child success cancels the remaining
/// siblings; the joiner yields that result.
pub struct ShutdownOnSuccessScope<T> {
    raw: RawScope<T>,
    winner: Mutex<Option<T>>,
}

impl<T: Send + Clone + 'static> ShutdownOnSuccessScope<T> {
    /// Opens a new scope in the `Open` state.
    #[must_use]
    pub fn open() -> Self {
        Self {
            raw: RawScope::new(),
            winner: Mutex::new(None),
        }
    }

    /// Forks a child task under the shutdown-on-success policy.
    ///
    /// # Errors
    /// Fails with [`ScopeError::InvalidScopeState`] if the scope is not `Open`.
    pub fn fork<F, E>(&self, body: F) -> ScopeResult<()>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.raw.fork(body)
    }

    /// Awaits children until the first success arrives (cancelling the
    /// rest), or every child fails.
    ///
    /// # Errors
    /// Fails with [`ScopeError::InvalidScopeState`] if the scope is not `Open`.
    pub async fn join(&self) -> ScopeResult<()> {
        let results = self
            .raw
            .join_all_with(|result| result.is_ok())
            .await?;
        let mut winner = self.winner.lock();
        for result in results {
            if let Ok(value) = result {
                if winner.is_none() {
                    *winner = Some(value);
                }
            }
        }
        Ok(())
    }

    /// After `join`, yields the winning child's value, or fails if every
    /// child failed.
    ///
    /// # Errors
    /// Fails with [`ScopeError::InvalidScopeState`] if the scope is not
    /// `Joined`, or with [`ScopeError::ExecutionFailure`] if no child
    /// succeeded.
    pub fn result(&self) -> ScopeResult<T> {
        self.raw.require(JOINED)?;
        self.winner.lock().clone().ok_or_else(|| ScopeError::ExecutionFailure {
            cause: "every forked task failed".into(),
        })
    }

    /// Cancels any outstanding children and moves the scope to `Closed`.
    pub fn close(&self) {
        self.raw.close();
    }
}

/// Runs every task to completion and collects their results, using a plain
/// [`Scope`] internally.
pub async fn invoke_all<T, E, F, I>(tasks: I) -> ScopeResult<Vec<Result<T, ScopeError>>>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: Future<Output = Result<T, E>> + Send + 'static,
    I: IntoIterator<Item = F>,
{
    let scope = Scope::open();
    for task in tasks {
        scope.fork(task)?;
    }
    scope.join().await
}

/// Like [`invoke_all`], but fails the whole batch with [`ScopeError::Timeout`]
/// if `timeout` elapses before every task completes.
pub async fn invoke_all_with_timeout<T, E, F, I>(
    timeout: Duration,
    tasks: I,
) -> ScopeResult<Vec<Result<T, ScopeError>>>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: Future<Output = Result<T, E>> + Send + 'static,
    I: IntoIterator<Item = F>,
{
    let scope = Scope::open();
    for task in tasks {
        scope.fork(task)?;
    }
    scope.join_timeout(timeout).await
}

/// Returns the first task to succeed, cancelling the rest.
///
/// # Errors
/// Fails with [`ScopeError::ExecutionFailure`] if every task fails.
pub async fn invoke_any<T, E, F, I>(tasks: I) -> ScopeResult<T>
where
    T: Send + Clone + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: Future<Output = Result<T, E>> + Send + 'static,
    I: IntoIterator<Item = F>,
{
    let scope = ShutdownOnSuccessScope::open();
    for task in tasks {
        scope.fork(task)?;
    }
    scope.join().await?;
    scope.result()
}

/// Like [`invoke_any`], but fails with [`ScopeError::Timeout`] if no task
/// succeeds before `timeout` elapses.
pub async fn invoke_any_with_timeout<T, E, F, I>(
    timeout: Duration,
    tasks: I,
) -> ScopeResult<T>
where
    T: Send + Clone + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: Future<Output = Result<T, E>> + Send + 'static,
    I: IntoIterator<Item = F>,
{
    let scope = ShutdownOnSuccessScope::open();
    for task in tasks {
        scope.fork(task)?;
    }
    let joined = tokio::time::timeout(timeout, scope.join()).await;
    match joined {
        Ok(Ok(())) => scope.result(),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            scope.close();
            Err(ScopeError::Timeout { duration: timeout })
        }
    }
}

/// Runs every task to completion, then folds the results with `reducer`.
///
/// # Errors
/// Propagates any [`ScopeError`] from the underlying join.
pub async fn invoke_all_and_combine<T, E, F, I, R>(
    reducer: impl FnOnce(Vec<Result<T, ScopeError>>) -> R,
    tasks: I,
) -> ScopeResult<R>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: Future<Output = Result<T, E>> + Send + 'static,
    I: IntoIterator<Item = F>,
{
    let results = invoke_all(tasks).await?;
    Ok(reducer(results))
}
