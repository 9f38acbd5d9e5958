//! Built-in transmitter for a small MDC-like string map.
//!
//! Storage is thread-local rather than task-local: the `Transmitter` contract
//! is a `capture` / `replay` / `restore` triple invoked around a task's
//! lifetime on whichever worker runs it, which is a thread-local-shaped
//! contract by construction. Transmitters that need full task-local fidelity
//! across `.await` suspension points (surviving a work-stealing hop mid-task)
//! are free to implement that internally; this reference implementation
//! keeps the common case simple.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use super::{Transmitter, TransmitterRegistration};

thread_local! {
    static MAP: RefCell<HashMap<String, String>> = RefCell::new(HashMap::new());
}

/// Propagates a `HashMap<String, String>` diagnostic map across task
/// submission boundaries.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiagnosticMapTransmitter;

impl DiagnosticMapTransmitter {
    /// A fresh instance. Stateless — construction is cheap and side-effect-free.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// The diagnostic map active on the calling worker.
    #[must_use]
    pub fn current() -> HashMap<String, String> {
        MAP.with(|m| m.borrow().clone())
    }

    /// Replaces the diagnostic map active on the calling worker, returning
    /// the previous one.
    pub fn set(map: HashMap<String, String>) -> HashMap<String, String> {
        MAP.with(|cell| cell.replace(map))
    }
}

impl Transmitter for DiagnosticMapTransmitter {
    fn name(&self) -> &str {
        "diagnostic-map"
    }

    fn capture(&self) -> Option<Box<dyn Any + Send + Sync>> {
        let map = Self::current();
        if map.is_empty() { None } else { Some(Box::new(map)) }
    }

    fn replay(&self, snapshot: &(dyn Any + Send + Sync)) -> Box<dyn Any + Send + Sync> {
        let incoming = snapshot
            .downcast_ref::<HashMap<String, String>>()
            .cloned()
            .unwrap_or_default();
        Box::new(Self::set(incoming))
    }

    fn restore(&self, backup: Box<dyn Any + Send + Sync>) {
        if let Ok(previous) = backup.downcast::<HashMap<String, String>>() {
            Self::set(*previous);
        }
    }
}

inventory::submit! {
    TransmitterRegistration(|| Arc::new(DiagnosticMapTransmitter) as Arc<dyn Transmitter>)
}
