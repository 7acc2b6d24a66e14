//! Error taxonomy for benchmark calls and result persistence
//!
//! Every per-call failure is a [`CallError`]. The runner catches these at the
//! call boundary, so none of them ever aborts a run.

/// A raw stream line could not be turned into a [`crate::StreamEvent`].
#[derive(Debug, thiserror::Error)]
pub enum StreamDecodeError {
    #[error("line {line_no}: expected `data:` prefix, got {line:?}")]
    MissingPrefix { line_no: usize, line: String },

    #[error("line {line_no}: invalid JSON payload {line:?}: {source}")]
    InvalidJson {
        line_no: usize,
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("line {line_no}: no text at choices[0].text in {line:?}")]
    MissingText { line_no: usize, line: String },
}

impl StreamDecodeError {
    /// 1-based number of the offending line within the response body
    pub fn line_no(&self) -> usize {
        match self {
            StreamDecodeError::MissingPrefix { line_no, .. }
            | StreamDecodeError::InvalidJson { line_no, .. }
            | StreamDecodeError::MissingText { line_no, .. } => *line_no,
        }
    }
}

/// Why a single inference call produced no measurement.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    #[error("stream decode error: {0}")]
    Decode(#[from] StreamDecodeError),

    #[error("incomplete stream: ended after {tokens} tokens without termination sentinel")]
    IncompleteStream { tokens: usize },

    #[error("empty stream: terminated before any token was produced")]
    EmptyStream,
}

impl From<reqwest::Error> for CallError {
    fn from(e: reqwest::Error) -> Self {
        let message = if e.is_timeout() {
            format!("request timed out: {}", e)
        } else {
            e.to_string()
        };
        CallError::Transport { message }
    }
}

/// Writing results to a [`crate::persist::DocumentStore`] failed.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to serialize benchmark document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write item {item_id}: {source}")]
    Write {
        item_id: String,
        #[source]
        source: std::io::Error,
    },
}
