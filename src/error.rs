use thiserror::Error;

/// Failures reported by a browser session or its launcher.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// The element reference no longer points into the live document.
    #[error("stale element reference")]
    StaleElement,

    #[error("script error: {0}")]
    Script(String),

    #[error("timed out after {0}ms waiting for {1}")]
    Timeout(u64, String),

    #[error("browser session is closed")]
    Closed,

    #[error("driver error: {0}")]
    Driver(String),
}

/// Locator and selector-spec validation failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LocatorError {
    #[error("empty locator")]
    Empty,

    #[error("selector spec contains no locators: {0:?}")]
    NoCandidates(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolveError {
    /// Every candidate in the spec timed out.
    #[error("element not found for selector '{spec}' (tried {tried} candidate(s))")]
    NotFound { spec: String, tried: usize },
}

/// Everything that can fail a single step. Converted into an error outcome,
/// never propagated out of the runner.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("invalid params for '{action}': {reason}")]
    InvalidParams { action: String, reason: String },

    #[error(transparent)]
    Locator(#[from] LocatorError),

    #[error(transparent)]
    NotFound(#[from] ResolveError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// The plan generator could not produce a usable plan.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no API key configured for the plan generator")]
    MissingApiKey,

    #[error("LLM request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("LLM API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("no content in LLM response")]
    EmptyResponse,

    #[error("failed to parse LLM response: {0}")]
    Parse(#[from] serde_json::Error),
}
