use crate::protocol::error::{RendrError, Result};
use crate::protocol::{Inbound, Job, Outcome};

/// Newline-delimited JSON codec for jobs and outcomes.
///
/// Every record is one JSON object followed by `\n`. Encoded output always
/// carries the terminator; decoders accept input with or without it (and
/// tolerate a trailing `\r`).
///
/// # Example
///
/// ```
/// use rendr_common::transport::LineCodec;
/// use rendr_common::protocol::{Job, Outcome, Inbound};
/// use serde_json::json;
///
/// // Pool side: encode a job
/// let job = Job::import("/tmp/page.mjs");
/// let line = LineCodec::encode_job(&job).unwrap();
///
/// // Worker side: decode it and answer
/// let received = LineCodec::decode_job(&line).unwrap();
/// let answer = Outcome::success(received.id.clone(), json!("<p>ok</p>"));
/// let reply = LineCodec::encode_outcome(&answer).unwrap();
///
/// // Pool side: route the answer
/// assert_eq!(LineCodec::decode_inbound(&reply).unwrap(), Inbound::Outcome(answer));
/// ```
pub struct LineCodec;

impl LineCodec {
    /// Encode a job as one terminated line
    pub fn encode_job(job: &Job) -> Result<Vec<u8>> {
        Self::encode_line(job)
    }

    /// Decode a job line
    pub fn decode_job(data: &[u8]) -> Result<Job> {
        Ok(serde_json::from_slice(trim_line(data))?)
    }

    /// Encode an outcome as one terminated line
    pub fn encode_outcome(outcome: &Outcome) -> Result<Vec<u8>> {
        Self::encode_line(outcome)
    }

    /// Decode an outcome line
    pub fn decode_outcome(data: &[u8]) -> Result<Outcome> {
        Ok(serde_json::from_slice(trim_line(data))?)
    }

    /// Decode an inbound line, separating the handshake from job outcomes.
    ///
    /// Malformed input is reported as [`RendrError::Protocol`] so the caller
    /// can log and skip the line without tearing down the connection.
    pub fn decode_inbound(data: &[u8]) -> Result<Inbound> {
        let outcome = Self::decode_outcome(data).map_err(|e| {
            RendrError::Protocol(format!(
                "malformed outcome ({}): {}",
                e,
                String::from_utf8_lossy(trim_line(data))
            ))
        })?;
        Ok(Inbound::from(outcome))
    }

    fn encode_line<T: serde::Serialize>(record: &T) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        Ok(line)
    }
}

fn trim_line(data: &[u8]) -> &[u8] {
    let data = data.strip_suffix(b"\n").unwrap_or(data);
    data.strip_suffix(b"\r").unwrap_or(data)
}
