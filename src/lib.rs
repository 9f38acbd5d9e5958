#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Lexically scoped, dynamically bound context propagation.
//!
//! Bind a typed value for the extent of a call ([`bind`]/[`bind_sync`]),
//! read it anywhere underneath ([`get`]), and carry it across thread and
//! task boundaries transparently via [`carrier::Carrier`], executor/future
//! decorators ([`executor`]), and structured fork/join scopes ([`scope`]).
//! Foreign ambient state (diagnostic maps, tracing spans, or anything else
//! not modeled as a [`key::ContextKey`]) propagates through the
//! [`transmitter::Transmitter`] plugin contract.

pub mod binding;
pub mod carrier;
pub mod config;
pub mod error;
#[cfg(feature = "async")]
pub mod executor;
pub mod key;
mod registry;
#[cfg(feature = "async")]
pub mod scope;
pub mod transmitter;

pub use binding::{Bindings, bind_all_sync, bind_sync, get, get_or_default, is_bound};
#[cfg(feature = "async")]
pub use binding::{bind, bind_all};
pub use carrier::Carrier;
pub use config::ScopeConfig;
pub use error::{ScopeError, ScopeResult};
pub use key::ContextKey;
pub use registry::enrolled_key_count;

/// Re-exports of the most commonly used items, for a single glob import.
pub mod prelude {
    pub use crate::{
        Bindings, Carrier, ContextKey, ScopeConfig, ScopeError, ScopeResult, bind_all_sync,
        bind_sync, get, get_or_default, is_bound,
    };

    #[cfg(feature = "async")]
    pub use crate::{bind, bind_all};

    #[cfg(feature = "async")]
    pub use crate::executor::{
        ContextPropagatingExecutor, TaskExecutor, spawn_blocking_with_context,
        spawn_with_context, wrap, wrap_executor, wrap_sync,
    };

    #[cfg(feature = "async")]
    pub use crate::scope::{
        Scope, ShutdownOnFailureScope, ShutdownOnSuccessScope, invoke_all,
        invoke_all_and_combine, invoke_all_with_timeout, invoke_any, invoke_any_with_timeout,
    };

    pub use crate::transmitter::Transmitter;
    #[cfg(feature = "diagnostic-map")]
    pub use crate::transmitter::DiagnosticMapTransmitter;
}

/// Library version, derived from the package manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
