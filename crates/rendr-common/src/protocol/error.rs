use thiserror::Error;

#[derive(Error, Debug)]
pub enum RendrError {
    #[error("Failed to start worker process {index} ({program}): {source}")]
    Spawn {
        index: usize,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to kill worker process {index}: {source}")]
    Kill {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Frame too large: {len} bytes (max {max} bytes)")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Connection {0} lost")]
    ConnectionLost(u64),

    #[error("Job timed out after {0}ms")]
    Timeout(u64),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Pool is closed")]
    PoolClosed,

    #[error("Shutdown failed: {}", join_messages(.0))]
    Shutdown(Vec<RendrError>),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Invalid render output: {0}")]
    InvalidOutput(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RendrError {
    /// Collapses a list of shutdown failures into a single result.
    ///
    /// An empty list means every resource was released cleanly.
    pub fn from_shutdown(errors: Vec<RendrError>) -> Result<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RendrError::Shutdown(errors))
        }
    }
}

fn join_messages(errors: &[RendrError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, RendrError>;
