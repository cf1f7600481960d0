use crate::config::PoolConfig;
use crate::connection::{ConnectionId, ConnectionState, OutcomeReceiver, WorkerConnection};
use crate::listener::Listener;
use crate::load_balancer::{ConnectionLoad, LoadBalancer};
use crate::registry::ConnectionRegistry;
use crate::supervisor::ProcessSupervisor;
use rendr_common::{Job, JobId, RendrError, Result};
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Per-call options for [`Pool::run_with`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the pool's job timeout for this call
    pub deadline: Option<Duration>,
    /// Abandons the call when cancelled
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Snapshot of one worker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub state: ConnectionState,
    pub outstanding: usize,
}

/// A pool of worker processes executing jobs over local TCP.
///
/// [`Pool::start`] binds a listener, spawns the worker processes with the
/// listener's address in `HOST` and `PORT`, and accepts their connections in the
/// background. Each job goes to one ready connection chosen by the
/// [`LoadBalancer`]; callers block until its outcome arrives, the connection
/// dies, their deadline passes, or they cancel.
///
/// # Example
///
/// ```no_run
/// use rendr_pool::{Pool, PoolConfig};
///
/// # async fn example() -> rendr_common::Result<()> {
/// let pool = Pool::start(PoolConfig::default()).await?;
/// let page = pool.run("/tmp/render-1234.mjs").await?;
/// println!("{}", page);
/// pool.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Pool {
    config: PoolConfig,
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    balancer: LoadBalancer,
    outstanding: AtomicUsize,
    selection: Mutex<()>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    supervisor: tokio::sync::Mutex<ProcessSupervisor>,
    closed: AtomicBool,
}

impl Pool {
    /// Bind the listener and start the worker processes.
    ///
    /// Returns as soon as the processes are spawned; use
    /// [`wait_ready`](Self::wait_ready) to block until they have connected.
    /// On a spawn failure the listener is released and already started
    /// processes are killed.
    pub async fn start(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let listener = Listener::bind(&config.bind_addr()).await?;
        let local_addr = listener.local_addr()?;

        let mut env = Vec::with_capacity(config.env.len() + 2);
        env.push(("HOST".to_string(), connect_host(local_addr.ip()).to_string()));
        env.push(("PORT".to_string(), local_addr.port().to_string()));
        env.extend(config.env.iter().cloned());

        let supervisor =
            ProcessSupervisor::start(config.processes, &config.command, &env, config.output)
                .inspect_err(|e| error!(%local_addr, "Pool failed to start: {}", e))?;

        let registry = Arc::new(ConnectionRegistry::new());
        let accept_task = tokio::spawn(listener.accept_loop(registry.clone(), config.max_frame_size));

        info!(
            %local_addr,
            processes = config.processes,
            "Worker pool listening"
        );

        Ok(Self {
            balancer: LoadBalancer::new(config.processes),
            config,
            local_addr,
            registry,
            outstanding: AtomicUsize::new(0),
            selection: Mutex::new(()),
            accept_task: Mutex::new(Some(accept_task)),
            supervisor: tokio::sync::Mutex::new(supervisor),
            closed: AtomicBool::new(false),
        })
    }

    /// Run an import job for `content` with the pool's default timeout.
    pub async fn run(&self, content: impl Into<String>) -> Result<Value> {
        self.submit(Job::import(content), RunOptions::default()).await
    }

    /// Run an import job for `content` with explicit options.
    pub async fn run_with(&self, content: impl Into<String>, options: RunOptions) -> Result<Value> {
        self.submit(Job::import(content), options).await
    }

    /// Round-trip a ping job through some ready worker.
    pub async fn ping(&self) -> Result<Value> {
        self.submit(Job::ping(), RunOptions::default()).await
    }

    /// Dispatch any job and wait for its outcome.
    pub async fn submit(&self, job: Job, options: RunOptions) -> Result<Value> {
        let cancel = options.cancel.unwrap_or_default();
        let deadline = options.deadline.or(self.config.job_timeout);
        let job_id = job.id.clone();

        let result = match deadline {
            Some(limit) => match tokio::time::timeout(limit, self.dispatch(job, &cancel)).await {
                Ok(result) => result,
                Err(_) => Err(RendrError::Timeout(limit.as_millis() as u64)),
            },
            None => self.dispatch(job, &cancel).await,
        };

        if let Err(e) = &result {
            debug!(job_id = %job_id, "Job failed: {}", e);
        }
        result
    }

    async fn dispatch(&self, job: Job, cancel: &CancellationToken) -> Result<Value> {
        let (claim, receiver) = self.acquire(&job.id, cancel).await?;
        let connection_id = claim.conn.id();
        debug!(job_id = %job.id, connection_id = %connection_id, "Dispatching job");

        claim.conn.enqueue(job)?;

        let received = tokio::select! {
            received = receiver => received,
            _ = cancel.cancelled() => return Err(RendrError::Cancelled),
        };

        match received {
            Ok(outcome) => outcome?.into_result(),
            Err(_) => Err(RendrError::ConnectionLost(connection_id.0)),
        }
    }

    /// Wait for an eligible connection and register a receiver on it.
    async fn acquire(
        &self,
        job_id: &JobId,
        cancel: &CancellationToken,
    ) -> Result<(Claim<'_>, OutcomeReceiver)> {
        loop {
            if self.is_closed() {
                return Err(RendrError::PoolClosed);
            }

            let changed = self.registry.changed();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if let Some(claimed) = self.try_claim(job_id) {
                return Ok(claimed);
            }

            tokio::select! {
                _ = &mut changed => {}
                _ = cancel.cancelled() => return Err(RendrError::Cancelled),
            }
        }
    }

    fn try_claim(&self, job_id: &JobId) -> Option<(Claim<'_>, OutcomeReceiver)> {
        let _selection = self.selection.lock().unwrap_or_else(PoisonError::into_inner);

        let connections = self.registry.snapshot();
        let loads: Vec<ConnectionLoad> = connections
            .iter()
            .map(|c| ConnectionLoad {
                id: c.id(),
                ready: c.is_ready(),
                outstanding: c.outstanding(),
            })
            .collect();

        let total = self.outstanding.load(Ordering::Acquire);
        let selected = self.balancer.select(&loads, total)?;
        let conn = connections.into_iter().find(|c| c.id() == selected)?;

        // A connection closing between snapshot and here refuses the receiver
        // and has already signalled the change, so the caller just waits again.
        let receiver = conn.add_receiver(job_id).ok()?;
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        Some((
            Claim {
                pool: self,
                conn,
                job_id: job_id.clone(),
            },
            receiver,
        ))
    }

    /// Block until at least `count` connections are ready.
    pub async fn wait_ready(&self, count: usize, timeout: Duration) -> Result<()> {
        let wait = async {
            loop {
                if self.is_closed() {
                    return Err(RendrError::PoolClosed);
                }
                let changed = self.registry.changed();
                tokio::pin!(changed);
                changed.as_mut().enable();

                if self.registry.ready_count() >= count {
                    return Ok(());
                }
                changed.await;
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| RendrError::Timeout(timeout.as_millis() as u64))?
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.registry
            .snapshot()
            .iter()
            .map(|c| ConnectionInfo {
                id: c.id(),
                peer: c.peer_addr(),
                state: c.state(),
                outstanding: c.outstanding(),
            })
            .collect()
    }

    /// Jobs dispatched and not yet finished, across all connections.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Configured number of worker processes.
    pub fn worker_count(&self) -> usize {
        self.config.processes
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting, close every connection, and kill every worker.
    ///
    /// Jobs in flight fail with [`RendrError::ConnectionLost`]; later calls to
    /// [`run`](Self::run) fail with [`RendrError::PoolClosed`]. Every step is
    /// attempted even if an earlier one fails, and the failures come back
    /// together as [`RendrError::Shutdown`]. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(local_addr = %self.local_addr, "Closing worker pool");

        let accept_task = self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = accept_task {
            task.abort();
            let _ = task.await;
        }

        for conn in self.registry.drain() {
            conn.close("pool closed");
        }
        self.registry.notify_changed();

        let errors = self.supervisor.lock().await.stop().await;
        for e in &errors {
            error!("Pool shutdown: {}", e);
        }
        RendrError::from_shutdown(errors)
    }
}

/// Address workers dial to reach a listener bound on `ip`.
fn connect_host(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Worker processes are killed when the supervisor drops.
        if let Some(task) = self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        for conn in self.registry.drain() {
            conn.close("pool dropped");
        }
    }
}

/// A job's hold on a connection. Dropping it releases the job's slot on
/// both the connection and the pool, whichever way the call ended.
struct Claim<'a> {
    pool: &'a Pool,
    conn: Arc<WorkerConnection>,
    job_id: JobId,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.conn.release(&self.job_id);
        self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.pool.registry.notify_changed();
    }
}
