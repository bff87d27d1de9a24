use super::idle::IdleState;

/// Observations pushed by the browser. Each one may update the environment and trigger a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentSignal {
    /// Another tab became the active one.
    TabActivated { url: Option<String> },
    /// A tab navigated or finished loading. Only the active tab updates the environment.
    TabUpdated {
        url: Option<String>,
        status: Option<String>,
        active: bool,
    },
    WindowFocusChanged { focused: bool },
    IdleStateChanged { state: IdleState },
    /// Seconds since the last user input, evaluated against the idle threshold.
    IdleTime { seconds: u64 },
}

/// Page load status that triggers a tick even when the URL didn't change.
pub const LOAD_COMPLETE: &str = "complete";
