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

//! rendr worker pool
//!
//! Runs a fixed fleet of JavaScript worker processes and hands them jobs
//! over loopback TCP.
//!
//! # Architecture
//!
//! ```text
//! caller ──run()──► Pool ──LoadBalancer──► WorkerConnection ──line──► worker process
//!                    ▲                          │
//!                    └──────── outcome ◄────────┘
//! ```
//!
//! - [`ProcessSupervisor`] spawns the workers with `HOST` and `PORT` set to
//!   the pool's listening address and kills them on close.
//! - [`Listener`] accepts each worker's connection back to the pool.
//! - [`WorkerConnection`] owns one socket: a writer task for jobs, a reader
//!   task routing outcomes to waiting callers by job id.
//! - [`ConnectionRegistry`] tracks live connections and wakes dispatchers
//!   when capacity changes.
//! - [`LoadBalancer`] picks the connection for each job.

pub mod config;
pub mod connection;
pub mod listener;
pub mod load_balancer;
pub mod pool;
pub mod registry;
pub mod supervisor;

pub use config::{OutputMode, PoolConfig, WorkerCommand, WORKER_RUNTIME};
pub use connection::{ConnectionId, ConnectionState, WorkerConnection};
pub use listener::Listener;
pub use load_balancer::{ConnectionLoad, LoadBalancer};
pub use pool::{ConnectionInfo, Pool, RunOptions};
pub use registry::ConnectionRegistry;
pub use supervisor::{ProcessSupervisor, WorkerProcess};

pub use tokio_util::sync::CancellationToken;
