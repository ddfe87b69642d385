use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("http status={status} body={body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend attempt timed out after {0}ms")]
    Timeout(u64),

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("all backends unavailable after {attempts} attempt(s); last error: {last}")]
    Unavailable { attempts: usize, last: String },
}

impl LlmError {
    /// Quota exhaustion and attempt timeouts advance to the next backend;
    /// everything else stops the fallback chain.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Timeout(_))
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}
