// Copyright 2025 rendr Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! rendr Common Types and Transport
//!
//! This crate provides the wire protocol and framing shared by the worker pool
//! and everything that talks to it.
//!
//! # Overview
//!
//! rendr renders pages by handing work to a pool of external script workers.
//! Workers connect back to the pool over TCP and exchange two kinds of records:
//!
//! - **Job**: sent to a worker (`{id, type, content}`)
//! - **Outcome**: sent back by the worker (`{id, status, content}`)
//!
//! # Architecture
//!
//! The wire protocol is deliberately simple:
//! - **Transport**: TCP, initiated by the worker
//! - **Serialization**: JSON
//! - **Message Format**: one JSON object per line, terminated by `\n`, no length prefix
//! - **Max Frame Size**: 100 MB by default (prevents memory exhaustion)
//!
//! # Components
//!
//! - [`protocol`] - Job and Outcome types, correlation ids, error taxonomy
//! - [`transport`] - Newline-JSON codec and an async frame reader
//!
//! # Example
//!
//! ```
//! use rendr_common::{Job, Inbound, Status};
//! use rendr_common::transport::LineCodec;
//!
//! let job = Job::import("/tmp/page.mjs");
//! let line = LineCodec::encode_job(&job).unwrap();
//! assert_eq!(line.last(), Some(&b'\n'));
//!
//! let reply = format!(r#"{{"id":"{}","status":"success","content":"<p>hi</p>"}}"#, job.id);
//! match LineCodec::decode_inbound(reply.as_bytes()).unwrap() {
//!     Inbound::Outcome(outcome) => assert_eq!(outcome.status, Status::Success),
//!     Inbound::Handshake => unreachable!(),
//! }
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
