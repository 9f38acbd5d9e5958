//! Recognized configuration surface.

/// Options controlling how aggressively the runtime wraps task submission.
///
/// Mirrors the options a host application toggles when wiring this crate
/// into an existing executor setup: everything defaults to on, and can be
/// switched off to fall back to plain delegation with zero capture/restore
/// overhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ScopeConfig {
    /// Master switch. When `false`, wrapping helpers degrade to pass-through.
    pub enabled: bool,
    /// Whether executor-wrapping helpers (`wrap_executor`) are active.
    pub wrap_task_executor: bool,
    /// Whether the `spawn_with_context` family is active.
    pub wrap_async: bool,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wrap_task_executor: true,
            wrap_async: true,
        }
    }
}

impl ScopeConfig {
    /// A config with every wrapping behavior disabled.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            wrap_task_executor: false,
            wrap_async: false,
        }
    }
}
