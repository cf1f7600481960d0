//! One accepted worker connection.
//!
//! Each connection runs two tasks: a writer draining an outbound job queue
//! onto the socket, and a reader decoding outcome lines and routing them to
//! the receiver registered under the same job id. The first handshake line
//! moves the connection from `Connecting` to `Ready`. Any read or write
//! failure closes the connection, which fails every pending receiver with
//! [`RendrError::ConnectionLost`] and removes it from the registry.

use crate::registry::ConnectionRegistry;
use rendr_common::transport::{FrameReader, FrameWriter, LineCodec};
use rendr_common::{
    Inbound, Job, JobId, Outcome, RendrError, Result, INVALID_MESSAGE_ID,
};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection identifier, assigned in accept order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, handshake not yet seen
    Connecting,
    /// Handshake seen, eligible for jobs
    Ready,
    /// Closed; never eligible again
    Closed,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Ready,
            _ => ConnectionState::Closed,
        }
    }
}

const CONNECTING: u8 = 0;
const READY: u8 = 1;
const CLOSED: u8 = 2;

type OutcomeSender = oneshot::Sender<Result<Outcome>>;

/// Receiver for a single job's outcome.
pub type OutcomeReceiver = oneshot::Receiver<Result<Outcome>>;

/// A worker connection shared between the registry and its own tasks.
pub struct WorkerConnection {
    id: ConnectionId,
    peer: SocketAddr,
    state: AtomicU8,
    outbound: mpsc::UnboundedSender<Job>,
    pending: Mutex<HashMap<JobId, OutcomeSender>>,
    outstanding: AtomicUsize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    registry: Weak<ConnectionRegistry>,
}

impl fmt::Debug for WorkerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

impl WorkerConnection {
    /// Register a freshly accepted stream and start its reader and writer.
    pub fn spawn(
        id: ConnectionId,
        stream: TcpStream,
        peer: SocketAddr,
        registry: &Arc<ConnectionRegistry>,
        max_frame_size: usize,
    ) -> Arc<Self> {
        let (read, write) = stream.into_split();
        let (outbound, queue) = mpsc::unbounded_channel();

        let conn = Arc::new(Self {
            id,
            peer,
            state: AtomicU8::new(CONNECTING),
            outbound,
            pending: Mutex::new(HashMap::new()),
            outstanding: AtomicUsize::new(0),
            tasks: Mutex::new(Vec::with_capacity(2)),
            registry: Arc::downgrade(registry),
        });
        registry.register(conn.clone());
        debug!(connection_id = %id, %peer, "Worker connection accepted");

        let reader = FrameReader::with_max_frame_size(BufReader::new(read), max_frame_size);
        let writer = FrameWriter::new(write);
        let handles = vec![
            tokio::spawn(Self::write_loop(Arc::downgrade(&conn), writer, queue)),
            tokio::spawn(Self::read_loop(conn.clone(), reader)),
        ];

        let mut tasks = lock(&conn.tasks);
        if conn.state() == ConnectionState::Closed {
            handles.iter().for_each(JoinHandle::abort);
        }
        tasks.extend(handles);
        drop(tasks);

        conn
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Jobs dispatched here that have not yet been released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Register a receiver for `job_id` and count it as outstanding.
    ///
    /// Fails with [`RendrError::ConnectionLost`] once the connection is
    /// closed, so no receiver is ever left behind a drained table.
    pub fn add_receiver(&self, job_id: &JobId) -> Result<OutcomeReceiver> {
        let mut pending = lock(&self.pending);
        if self.state() == ConnectionState::Closed {
            return Err(RendrError::ConnectionLost(self.id.0));
        }
        if pending.contains_key(job_id) {
            return Err(RendrError::Protocol(format!(
                "job {} is already pending on connection {}",
                job_id, self.id
            )));
        }

        let (tx, rx) = oneshot::channel();
        pending.insert(job_id.clone(), tx);
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(rx)
    }

    /// Drop the receiver for `job_id` (if still present) and decrement the
    /// outstanding count. Must be called exactly once per `add_receiver`.
    pub fn release(&self, job_id: &JobId) {
        lock(&self.pending).remove(job_id);
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }

    /// Queue a job for the writer task.
    pub fn enqueue(&self, job: Job) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            return Err(RendrError::ConnectionLost(self.id.0));
        }
        self.outbound
            .send(job)
            .map_err(|_| RendrError::ConnectionLost(self.id.0))
    }

    /// Close the connection. Only the first call has any effect.
    pub fn close(&self, reason: &str) {
        if self.state.swap(CLOSED, Ordering::AcqRel) == CLOSED {
            return;
        }
        info!(connection_id = %self.id, peer = %self.peer, "Worker connection closed: {}", reason);

        let failed: Vec<OutcomeSender> = lock(&self.pending).drain().map(|(_, tx)| tx).collect();
        for tx in failed {
            let _ = tx.send(Err(RendrError::ConnectionLost(self.id.0)));
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
            registry.notify_changed();
        }

        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }

    fn mark_ready(&self) {
        match self
            .state
            .compare_exchange(CONNECTING, READY, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                info!(connection_id = %self.id, peer = %self.peer, "Worker connection ready");
                if let Some(registry) = self.registry.upgrade() {
                    registry.notify_changed();
                }
            }
            Err(_) => debug!(connection_id = %self.id, "Ignoring repeated handshake"),
        }
    }

    fn deliver(&self, outcome: Outcome) {
        if outcome.id.as_str() == INVALID_MESSAGE_ID {
            warn!(
                connection_id = %self.id,
                "Worker rejected a malformed job: {}", outcome.content
            );
            return;
        }

        let sender = lock(&self.pending).remove(&outcome.id);
        match sender {
            Some(tx) => {
                let _ = tx.send(Ok(outcome));
            }
            None => debug!(
                connection_id = %self.id,
                job_id = %outcome.id,
                "Dropping outcome with no waiting receiver"
            ),
        }
    }

    async fn read_loop(self: Arc<Self>, mut reader: FrameReader<BufReader<OwnedReadHalf>>) {
        let reason = loop {
            match reader.next_frame().await {
                Ok(Some(frame)) => match LineCodec::decode_inbound(&frame) {
                    Ok(Inbound::Handshake) => self.mark_ready(),
                    Ok(Inbound::Outcome(outcome)) => self.deliver(outcome),
                    Err(e) => warn!(connection_id = %self.id, "Dropping malformed line: {}", e),
                },
                Ok(None) => break "worker closed the connection".to_string(),
                Err(e) => break e.to_string(),
            }
        };
        self.close(&reason);
    }

    async fn write_loop(
        conn: Weak<Self>,
        mut writer: FrameWriter<OwnedWriteHalf>,
        mut queue: mpsc::UnboundedReceiver<Job>,
    ) {
        while let Some(job) = queue.recv().await {
            let result = match LineCodec::encode_job(&job) {
                Ok(line) => writer.write_frame(&line).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                if let Some(conn) = conn.upgrade() {
                    conn.close(&format!("failed to write job {}: {}", job.id, e));
                }
                return;
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
