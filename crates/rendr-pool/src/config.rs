use rendr_common::transport::DEFAULT_MAX_FRAME_SIZE;
use rendr_common::{RendrError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Number of worker processes started when none is configured.
pub const DEFAULT_PROCESSES: usize = 5;

/// Port the pool listens on when none is configured.
pub const DEFAULT_PORT: u16 = 6543;

/// Host the pool listens on. Workers always run on the same machine.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Time a job may take before its caller gets [`RendrError::Timeout`].
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30);

/// Flags passed to `node` ahead of an inline module.
pub const NODE_FLAGS: [&str; 3] = [
    "--experimental-detect-module",
    "--no-warnings",
    "--input-type=module",
];

/// JavaScript runtime executed by every default worker process.
pub const WORKER_RUNTIME: &str = include_str!("../runtime/worker.mjs");

/// The program each worker process runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
        }
    }

    /// `node` evaluating `source` as an ES module, with `flags` placed
    /// before the inline script.
    pub fn node_eval(source: &str, flags: &[String]) -> Self {
        let mut args: Vec<String> = NODE_FLAGS.iter().map(|f| f.to_string()).collect();
        args.extend(flags.iter().cloned());
        args.push("-e".to_string());
        args.push(source.to_string());
        Self {
            program: "node".to_string(),
            args,
            dir: None,
        }
    }

    /// `node` running the bundled worker runtime.
    pub fn node_runtime() -> Self {
        Self::node_eval(WORKER_RUNTIME, &[])
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub(crate) fn to_command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.dir {
            command.current_dir(dir);
        }
        command
    }
}

impl Default for WorkerCommand {
    fn default() -> Self {
        Self::node_runtime()
    }
}

/// Where worker stdout/stderr go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Share the host process's stdout and stderr
    #[default]
    Inherit,
    /// Discard all worker output
    Null,
    /// Forward each output line as a tracing event tagged with the worker index
    Log,
}

/// Configuration for a [`Pool`](crate::Pool).
///
/// # Example
///
/// ```
/// use rendr_pool::{OutputMode, PoolConfig, WorkerCommand};
/// use std::time::Duration;
///
/// let config = PoolConfig::default()
///     .with_processes(2)
///     .with_port(0)
///     .with_command(WorkerCommand::new("node").arg("worker.mjs"))
///     .with_output(OutputMode::Log)
///     .with_job_timeout(Some(Duration::from_secs(5)));
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.bind_addr(), "127.0.0.1:0");
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker processes to start; also the load-threshold denominator
    pub processes: usize,
    pub host: String,
    /// `0` asks the OS for an ephemeral port
    pub port: u16,
    pub command: WorkerCommand,
    /// Extra environment for every worker, on top of `HOST` and `PORT`
    pub env: Vec<(String, String)>,
    pub output: OutputMode,
    /// Applied to runs without their own deadline. `None` waits forever.
    pub job_timeout: Option<Duration>,
    pub max_frame_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            processes: DEFAULT_PROCESSES,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            command: WorkerCommand::default(),
            env: Vec::new(),
            output: OutputMode::default(),
            job_timeout: Some(DEFAULT_JOB_TIMEOUT),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl PoolConfig {
    pub fn with_processes(mut self, processes: usize) -> Self {
        self.processes = processes;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_command(mut self, command: WorkerCommand) -> Self {
        self.command = command;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.processes == 0 {
            return Err(RendrError::Config(
                "at least one worker process is required".to_string(),
            ));
        }
        if self.command.program.is_empty() {
            return Err(RendrError::Config("worker program is empty".to_string()));
        }
        if self.max_frame_size == 0 {
            return Err(RendrError::Config("max_frame_size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
