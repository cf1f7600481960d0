//! In-process fake workers for pool tests.
//!
//! The pool under test spawns `sleep` placeholders as its processes; the
//! fake workers here connect to the pool's port and speak the worker side of
//! the line protocol, so tests control exactly how each worker behaves.

#![allow(dead_code)]

use rendr_common::transport::{FrameReader, FrameWriter, LineCodec};
use rendr_common::{JobKind, Outcome};
use rendr_pool::{OutputMode, PoolConfig, WorkerCommand};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// How a fake worker answers jobs.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Reply `rendered:<content>` after `delay`, one job at a time
    Echo { delay: Duration },
    /// Reply with an error outcome carrying the message
    Fail(&'static str),
    /// Close the socket on the first job
    Hangup,
    /// Read jobs and never answer
    Silent,
    /// Send a malformed line and an unmatched outcome before each real reply
    Noisy,
}

impl Behavior {
    pub fn echo() -> Self {
        Behavior::Echo {
            delay: Duration::ZERO,
        }
    }
}

/// Connect a fake worker to `addr`, handshake, and serve jobs.
pub fn spawn_worker(addr: SocketAddr, behavior: Behavior) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, write) = stream.into_split();
        let mut reader = FrameReader::new(BufReader::new(read));
        let mut writer = FrameWriter::new(write);

        let handshake = LineCodec::encode_outcome(&Outcome::handshake()).unwrap();
        writer.write_frame(&handshake).await.unwrap();

        while let Ok(Some(frame)) = reader.next_frame().await {
            let job = LineCodec::decode_job(&frame).unwrap();
            let reply = match behavior {
                Behavior::Echo { delay } => {
                    tokio::time::sleep(delay).await;
                    match job.kind {
                        JobKind::Ping => Outcome::success(job.id, json!("pong")),
                        JobKind::Import => {
                            Outcome::success(job.id, json!(format!("rendered:{}", job.content)))
                        }
                    }
                }
                Behavior::Fail(message) => Outcome::error(job.id, message),
                Behavior::Hangup => return,
                Behavior::Silent => continue,
                Behavior::Noisy => {
                    writer.write_frame(b"this is not json\n").await.unwrap();
                    let stray = Outcome::success("stray".into(), json!("ignored"));
                    writer
                        .write_frame(&LineCodec::encode_outcome(&stray).unwrap())
                        .await
                        .unwrap();
                    Outcome::success(job.id, json!(format!("rendered:{}", job.content)))
                }
            };
            let line = LineCodec::encode_outcome(&reply).unwrap();
            if writer.write_frame(&line).await.is_err() {
                return;
            }
        }
    })
}

/// Open a connection that never sends the handshake.
pub async fn connect_without_handshake(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

/// Pool config with placeholder processes on an ephemeral port.
pub fn test_config(processes: usize) -> PoolConfig {
    PoolConfig::default()
        .with_processes(processes)
        .with_port(0)
        .with_command(WorkerCommand::new("sleep").arg("30"))
        .with_output(OutputMode::Null)
        .with_job_timeout(Some(Duration::from_secs(5)))
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}
