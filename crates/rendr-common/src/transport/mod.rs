//! rendr Transport Layer
//!
//! This module provides the framing used between the pool and its workers.
//!
//! # Architecture
//!
//! - **Transport**: TCP, one connection per worker process
//! - **Codec**: JSON serialization of jobs and outcomes
//! - **Wire Format**: `[JSON object]\n`, no length prefix
//!
//! # Components
//!
//! - **[`LineCodec`]**: Encode/decode jobs and outcomes as single lines
//! - **[`FrameReader`]**: Async reader yielding one frame per line
//! - **[`FrameWriter`]**: Async writer that flushes after each frame
//!
//! # Frame Size Limits
//!
//! [`FrameReader`] enforces a configurable maximum line length (100 MB by
//! default) so a misbehaving worker cannot exhaust memory.

pub mod codec;
pub mod frame;

pub use codec::LineCodec;
pub use frame::{FrameReader, FrameWriter, DEFAULT_MAX_FRAME_SIZE};
