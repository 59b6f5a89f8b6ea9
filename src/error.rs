#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Rejected at construction; the run must not start.
    InvalidConfiguration(String),
    /// Nothing currently matches the requested classification.
    NotFound(&'static str),
    /// Illegal state transition or out-of-horizon data: the shared calendar
    /// would be corrupted if this were ignored.
    InvariantViolation(String),
    /// The caller's cancellation token fired while blocked.
    Canceled,
    /// The pool was closed, or its dispatcher is not running.
    Closed,
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::InvalidConfiguration(msg) => write!(f, "invalid configuration: {msg}"),
            CoreError::NotFound(what) => write!(f, "not found: {what}"),
            CoreError::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
            CoreError::Canceled => write!(f, "operation canceled"),
            CoreError::Closed => write!(f, "pool closed"),
        }
    }
}

impl std::error::Error for CoreError {}
