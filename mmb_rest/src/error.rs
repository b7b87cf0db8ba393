use hyper::StatusCode;

/// Error taxonomy for the shared REST client: transport failures are
/// distinguished from 4xx/5xx HTTP outcomes so callers can decide what's
/// retryable (reads on `Server`, never on `Client`) without inspecting status
/// codes themselves.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("transport error: {0}")]
    Transport(#[from] hyper::Error),

    #[error("client error {status}: {body}")]
    Client { status: StatusCode, body: String },

    #[error("server error {status}: {body}")]
    Server { status: StatusCode, body: String },

    #[error("authentication failed: {0}")]
    Auth(String),
}

impl RestError {
    /// Reads are safe to retry on a 5xx; writes never are — order placement
    /// is at-most-once, so a timed-out create must never be blindly resent.
    pub fn is_retryable_read(&self) -> bool {
        matches!(self, RestError::Server { .. } | RestError::Transport(_))
    }
}
