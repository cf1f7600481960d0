//! Worker process supervision.
//!
//! The supervisor starts a fixed number of identical worker processes and
//! tears them all down on [`ProcessSupervisor::stop`]. It does not restart
//! processes that exit on their own; their connections close and the pool
//! carries on with whoever is left.

use crate::config::{OutputMode, WorkerCommand};
use rendr_common::{RendrError, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tracing::{debug, error, info};

/// One spawned worker process.
#[derive(Debug)]
pub struct WorkerProcess {
    index: usize,
    child: Child,
}

impl WorkerProcess {
    pub fn index(&self) -> usize {
        self.index
    }

    /// `None` once the process has been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Owns the worker processes of one pool.
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    processes: Vec<WorkerProcess>,
}

impl ProcessSupervisor {
    /// Start `count` copies of `command`.
    ///
    /// Each process inherits the host environment plus `env`. If any spawn
    /// fails, processes started so far are killed and the spawn error is
    /// returned.
    pub fn start(
        count: usize,
        command: &WorkerCommand,
        env: &[(String, String)],
        output: OutputMode,
    ) -> Result<Self> {
        let mut processes: Vec<WorkerProcess> = Vec::with_capacity(count);

        for index in 0..count {
            let mut cmd = command.to_command();
            cmd.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .stdin(Stdio::null())
                .kill_on_drop(true);
            match output {
                OutputMode::Inherit => {
                    cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
                }
                OutputMode::Null => {
                    cmd.stdout(Stdio::null()).stderr(Stdio::null());
                }
                OutputMode::Log => {
                    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
                }
            }

            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(source) => {
                    error!(
                        worker = index,
                        program = %command.program,
                        "Failed to start worker process: {}", source
                    );
                    for process in &mut processes {
                        let _ = process.child.start_kill();
                    }
                    return Err(RendrError::Spawn {
                        index,
                        program: command.program.clone(),
                        source,
                    });
                }
            };

            if let Some(stdout) = child.stdout.take() {
                forward_output(index, "stdout", stdout);
            }
            if let Some(stderr) = child.stderr.take() {
                forward_output(index, "stderr", stderr);
            }

            debug!(worker = index, pid = ?child.id(), "Started worker process");
            processes.push(WorkerProcess { index, child });
        }

        info!(count, program = %command.program, "Started worker processes");
        Ok(Self { processes })
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn processes(&self) -> &[WorkerProcess] {
        &self.processes
    }

    /// Kill and reap every process, returning the kill failures.
    ///
    /// A process that exited on its own is reaped without error. One failure
    /// does not stop the remaining processes from being killed. Calling
    /// `stop` again is a no-op.
    pub async fn stop(&mut self) -> Vec<RendrError> {
        let mut errors = Vec::new();

        for mut process in self.processes.drain(..) {
            if let Err(source) = process.child.start_kill() {
                error!(worker = process.index, "Failed to kill worker process: {}", source);
                errors.push(RendrError::Kill {
                    index: process.index,
                    source,
                });
                continue;
            }
            match process.child.wait().await {
                Ok(status) => debug!(worker = process.index, %status, "Worker process stopped"),
                Err(source) => errors.push(RendrError::Kill {
                    index: process.index,
                    source,
                }),
            }
        }

        errors
    }
}

fn forward_output<R>(index: usize, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "rendr::worker", worker = index, stream, "{}", line);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    fn sleeper() -> WorkerCommand {
        WorkerCommand::new("sleep").arg("30")
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut supervisor = ProcessSupervisor::start(3, &sleeper(), &[], OutputMode::Null).unwrap();
        assert_eq!(supervisor.len(), 3);
        assert!(supervisor.processes().iter().all(|p| p.pid().is_some()));
        assert_eq!(
            supervisor.processes().iter().map(|p| p.index()).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        let errors = supervisor.stop().await;
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn test_stop_twice_is_noop() {
        let mut supervisor = ProcessSupervisor::start(1, &sleeper(), &[], OutputMode::Null).unwrap();
        assert!(supervisor.stop().await.is_empty());
        assert!(supervisor.stop().await.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_reports_index() {
        let command = WorkerCommand::new("/nonexistent/rendr-worker-binary");
        let err = ProcessSupervisor::start(2, &command, &[], OutputMode::Null).unwrap_err();
        match err {
            RendrError::Spawn { index, program, .. } => {
                assert_eq!(index, 0);
                assert_eq!(program, "/nonexistent/rendr-worker-binary");
            }
            other => panic!("expected spawn error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exited_process_is_not_an_error() {
        let command = WorkerCommand::new("true");
        let mut supervisor = ProcessSupervisor::start(1, &command, &[], OutputMode::Null).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(supervisor.stop().await.is_empty());
    }

    #[tokio::test]
    async fn test_kill_failure_does_not_stop_the_rest() {
        let mut supervisor = ProcessSupervisor::start(3, &sleeper(), &[], OutputMode::Null).unwrap();
        let pids: Vec<u32> = supervisor.processes()[1..]
            .iter()
            .map(|p| p.pid().unwrap())
            .collect();

        // reaped behind the supervisor's back, so its kill fails
        supervisor.processes[0].child.kill().await.unwrap();

        let errors = supervisor.stop().await;
        assert_eq!(errors.len(), 1, "unexpected errors: {:?}", errors);
        assert!(matches!(errors[0], RendrError::Kill { index: 0, .. }));
        assert!(supervisor.is_empty());
        for pid in pids {
            assert!(!Path::new(&format!("/proc/{}", pid)).exists(), "pid {} still alive", pid);
        }
    }

    #[tokio::test]
    async fn test_environment_reaches_worker() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("port.txt");
        let command = WorkerCommand::new("sh").args(["-c", "printf %s \"$PORT\" > \"$OUT\""]);
        let env = vec![
            ("PORT".to_string(), "7123".to_string()),
            ("OUT".to_string(), out.display().to_string()),
        ];

        let mut supervisor = ProcessSupervisor::start(1, &command, &env, OutputMode::Null).unwrap();
        for _ in 0..50 {
            if out.exists() && std::fs::read_to_string(&out).unwrap() == "7123" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "7123");
        supervisor.stop().await;
    }
}
