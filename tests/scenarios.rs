//! End-to-end scenarios exercising the documented propagation guarantees.

use std::convert::Infallible;
use std::time::Duration;

use scoped_context::prelude::*;

fn trace_key() -> std::sync::Arc<ContextKey<String>> {
    ContextKey::new("scenarios.trace_id")
}

#[test]
fn basic_bind_and_get() {
    let key = trace_key();
    let seen = bind_sync(&key, "T1".to_string(), || get(&key).unwrap().to_string());
    assert_eq!(seen, "T1");
    assert!(!is_bound(&key));
}

#[tokio::test]
async fn cross_worker_propagation_via_wrapped_executor() {
    let key = trace_key();
    let seen = bind(&key, "T2".to_string(), async {
        spawn_with_context(async { get(&key).unwrap().to_string() })
            .await
            .unwrap()
    })
    .await;
    assert_eq!(seen, "T2");
}

#[tokio::test]
async fn foreign_state_propagates_without_explicit_binding() {
    let mut map = std::collections::HashMap::new();
    map.insert("traceId".to_string(), "auto-1".to_string());
    DiagnosticMapTransmitter::set(map);

    let seen = spawn_with_context(async { DiagnosticMapTransmitter::current() })
        .await
        .unwrap();
    assert_eq!(seen.get("traceId").map(String::as_str), Some("auto-1"));

    DiagnosticMapTransmitter::set(std::collections::HashMap::new());
}

#[tokio::test]
async fn structured_children_inherit_parent_bindings() {
    let key = trace_key();
    bind(&key, "S".to_string(), async {
        let scope: ShutdownOnFailureScope<String> = ShutdownOnFailureScope::open();
        scope
            .fork(async { Ok::<_, Infallible>(get(&key).unwrap().to_string()) })
            .unwrap();
        scope
            .fork(async { Ok::<_, Infallible>(get(&key).unwrap().to_string()) })
            .unwrap();
        scope.join().await.unwrap();
        scope.throw_if_failed().unwrap();
    })
    .await;
}

#[tokio::test]
async fn join_with_timeout_cancels_outstanding_work() {
    let scope: Scope<()> = Scope::open();
    scope
        .fork(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, Infallible>(())
        })
        .unwrap();
    let result = scope.join_timeout(Duration::from_millis(100)).await;
    assert!(matches!(result, Err(ScopeError::Timeout { .. })));
}

#[tokio::test]
async fn shutdown_on_success_returns_winner_and_cancels_rest() {
    let key = trace_key();
    let scope: ShutdownOnSuccessScope<String> = bind_sync(&key, "fast".to_string(), ShutdownOnSuccessScope::open);
    scope
        .fork(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, Infallible>("slow".to_string())
        })
        .unwrap();
    scope
        .fork(async { Ok::<_, Infallible>(get(&key).unwrap().to_string()) })
        .unwrap();
    scope.join().await.unwrap();
    assert_eq!(scope.result().unwrap(), "fast");
}

#[test]
fn nested_scope_restores_outer_value_even_when_inner_panics() {
    let key = trace_key();
    bind_sync(&key, "outer".to_string(), || {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            bind_sync(&key, "inner".to_string(), || {
                assert_eq!(*get(&key).unwrap(), "inner");
                panic!("injected failure");
            });
        }));
        assert!(result.is_err());
        assert_eq!(*get(&key).unwrap(), "outer");
    });
}
