//! Context lifecycle states.

/// Lifecycle of a currency context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Persisted state loaded; auto-refresh not started.
    Initializing,
    /// Auto-refresh scheduled (when enabled).
    Running,
    /// Auto-refresh cancelled. Reads keep working on the last table.
    Stopped,
}

impl ContextState {
    /// Check if the context has been started and not stopped.
    pub fn is_running(&self) -> bool {
        matches!(self, ContextState::Running)
    }

    /// Check if the context is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContextState::Stopped)
    }
}
