use thiserror::Error;

/// Failures surfaced by the classifier gateway.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClassifierError {
    /// No credential configured for the selected provider
    #[error("classifier unavailable: no API key configured for {0}")]
    Unavailable(String),

    /// Provider selected but not usable as configured
    #[error("classifier misconfigured: {0}")]
    MissingConfig(String),

    /// Non-2xx answer from the provider
    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection, timeout or body read failure
    #[error("transport error: {0}")]
    Transport(String),

    /// 2xx answer we could not interpret
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ClassifierError {
    /// Setup problems must reach the operator instead of silently failing open.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            ClassifierError::Unavailable(_) | ClassifierError::MissingConfig(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ClassifierError::Transport(_) => true,
            ClassifierError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// A click dispatched on a host-page element was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("click rejected ({strategy}): {reason}")]
pub struct ClickError {
    pub strategy: String,
    pub reason: String,
}

/// Reasons the agent loop refuses to start.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("agent mode not started: extension disabled")]
    Disabled,

    #[error("agent mode not started: mode is not \"agent\"")]
    WrongMode,

    #[error("agent mode cannot run on {0}; go to the home timeline")]
    DisallowedSurface(String),
}
