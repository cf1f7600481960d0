use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

static JOB_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Correlation id shared by a [`Job`] and the [`Outcome`](super::Outcome) answering it.
///
/// Ids are strings on the wire. Ids produced by [`JobId::generate`] are unique
/// for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generates a fresh id.
    ///
    /// The upper 32 bits come from the wall clock, the lower 32 bits from a
    /// monotonic counter, so two calls never produce the same value while the
    /// counter has not wrapped.
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        let counter = JOB_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

        let raw = (timestamp & 0xFFFF_FFFF_0000_0000) | (counter & 0xFFFF_FFFF);
        JobId(format!("{:016x}", raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        JobId(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        JobId(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the worker should do with a job's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Import the module at `content` and answer with its default export.
    Import,
    /// Liveness probe; the worker answers `"pong"`.
    Ping,
}

/// One outbound unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub content: String,
}

impl Job {
    pub fn new(kind: JobKind, content: impl Into<String>) -> Self {
        Job {
            id: JobId::generate(),
            kind,
            content: content.into(),
        }
    }

    pub fn import(module: impl Into<String>) -> Self {
        Self::new(JobKind::Import, module)
    }

    pub fn ping() -> Self {
        Self::new(JobKind::Ping, "")
    }
}
