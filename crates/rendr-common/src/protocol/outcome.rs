//! rendr Outcome Types
//!
//! This module defines the record a worker sends back for every job, and the
//! handshake signal it sends once after booting.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{RendrError, Result};
use super::JobId;

/// Id a worker uses for its one-time "ready" signal.
pub const HANDSHAKE_ID: &str = "INITIALIZED";

/// Id a worker uses when it could not parse a job line at all.
pub const INVALID_MESSAGE_ID: &str = "INVALID_MESSAGE";

/// Result status of an [`Outcome`], decided when the line is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// One inbound result, matched to a [`Job`](super::Job) by `id`.
///
/// # Fields
///
/// - `id`: the job's correlation id
/// - `status`: whether the worker succeeded
/// - `content`: the job's result on success, the worker's message on error
///
/// # Example
///
/// ```
/// use rendr_common::protocol::{Outcome, JobId};
/// use serde_json::json;
///
/// let ok = Outcome::success(JobId::from("a1"), json!({"html": "<p/>"}));
/// assert_eq!(ok.into_result().unwrap(), json!({"html": "<p/>"}));
///
/// let failed = Outcome::error(JobId::from("a2"), "boom");
/// assert!(failed.into_result().unwrap_err().to_string().contains("boom"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub id: JobId,
    pub status: Status,
    #[serde(default)]
    pub content: Value,
}

impl Outcome {
    pub fn success(id: JobId, content: Value) -> Self {
        Outcome {
            id,
            status: Status::Success,
            content,
        }
    }

    pub fn error(id: JobId, message: impl Into<String>) -> Self {
        Outcome {
            id,
            status: Status::Error,
            content: Value::String(message.into()),
        }
    }

    /// The handshake record a worker sends once it has booted.
    pub fn handshake() -> Self {
        Outcome::success(JobId::from(HANDSHAKE_ID), Value::String("ready".to_string()))
    }

    /// Converts the outcome into the value a caller of `run` receives.
    ///
    /// An error outcome becomes [`RendrError::Worker`] carrying the worker's
    /// message. Non-string error content is rendered as its JSON text.
    pub fn into_result(self) -> Result<Value> {
        match self.status {
            Status::Success => Ok(self.content),
            Status::Error => {
                let message = match self.content {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Err(RendrError::Worker(message))
            }
        }
    }
}

/// A decoded inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The worker finished booting and may now receive jobs.
    Handshake,
    /// The answer to a job.
    Outcome(Outcome),
}

impl From<Outcome> for Inbound {
    fn from(outcome: Outcome) -> Self {
        if outcome.id.as_str() == HANDSHAKE_ID {
            Inbound::Handshake
        } else {
            Inbound::Outcome(outcome)
        }
    }
}
