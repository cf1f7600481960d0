pub mod error;
pub mod job;
pub mod outcome;


pub use error::{RendrError, Result};
pub use job::{Job, JobId, JobKind};
pub use outcome::{Inbound, Outcome, Status, HANDSHAKE_ID, INVALID_MESSAGE_ID};
