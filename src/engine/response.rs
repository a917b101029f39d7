//! Responses the control thread and its background workers emit, engine →
//! UI (§6).

/// Severity of a `message` response, per §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub enum Response {
    /// A state transition happened; the UI should follow up with
    /// `Engine::state` to get a fresh snapshot (§5's ordering guarantee).
    StateUpdated,
    /// The subordinate is gone (exited or force-killed).
    Reset,
    ReceivedTextOutput { bytes: Vec<u8> },
    LoadSymbols { err: Option<String> },
    Message { level: MessageLevel, text: String },
}
