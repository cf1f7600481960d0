//! Pool Integration Tests
//!
//! Runs a real [`Pool`] (listener, supervisor, dispatcher) against in-process
//! fake workers from `support`. The supervised processes are `sleep`
//! placeholders, so these tests need no JavaScript runtime.
//!
//! Test Scenarios:
//! 1. Startup, readiness and connection bookkeeping
//! 2. Dispatch, load spreading and outcome routing
//! 3. Failure surfaces: worker errors, hangups, deadlines, cancellation
//! 4. Shutdown: in-flight jobs, idempotence, port release

mod support;

use rendr_common::RendrError;
use rendr_pool::{CancellationToken, ConnectionState, Pool, RunOptions, WorkerCommand};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use support::{
    connect_without_handshake, eventually, free_port, spawn_worker, test_config, Behavior,
};

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Startup
// ============================================================================

#[tokio::test]
async fn test_ready_connections_are_registered() {
    let pool = Pool::start(test_config(2)).await.unwrap();
    let addr = pool.local_addr();
    assert_ne!(addr.port(), 0);
    assert_eq!(pool.worker_count(), 2);

    spawn_worker(addr, Behavior::echo());
    spawn_worker(addr, Behavior::echo());
    pool.wait_ready(2, Duration::from_secs(2)).await.unwrap();

    let connections = pool.connections();
    assert_eq!(connections.len(), 2);
    assert!(connections.iter().all(|c| c.state == ConnectionState::Ready));
    let mut ids: Vec<u64> = connections.iter().map(|c| c.id.0).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2]);

    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_workers_receive_listener_address() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("addr.txt");
    let config = test_config(2)
        .with_command(WorkerCommand::new("sh").args([
            "-c",
            "printf '%s:%s\\n' \"$HOST\" \"$PORT\" >> \"$OUT\"; exec sleep 30",
        ]))
        .with_env("OUT", out.display().to_string());
    let pool = Pool::start(config).await.unwrap();

    eventually(|| read_lines(&out).len() == 2).await;
    let expected = format!("127.0.0.1:{}", pool.local_addr().port());
    assert!(read_lines(&out).iter().all(|line| *line == expected));

    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_zero_processes_rejected() {
    let err = Pool::start(test_config(0)).await.err().unwrap();
    assert!(matches!(err, RendrError::Config(_)));
}

#[tokio::test]
async fn test_spawn_failure_releases_port() {
    let port = free_port();
    let config = test_config(3)
        .with_port(port)
        .with_command(WorkerCommand::new("/nonexistent/rendr-worker"));

    let err = Pool::start(config).await.err().unwrap();
    assert!(matches!(err, RendrError::Spawn { index: 0, .. }));

    // the listener was dropped with the failed pool
    std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
}

#[tokio::test]
async fn test_wait_ready_times_out() {
    let pool = Pool::start(test_config(1)).await.unwrap();
    let err = pool
        .wait_ready(1, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, RendrError::Timeout(100)));
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn test_run_returns_worker_content() {
    let pool = Pool::start(test_config(1)).await.unwrap();
    spawn_worker(pool.local_addr(), Behavior::echo());

    let value = pool.run("/tmp/page.mjs").await.unwrap();
    assert_eq!(value, json!("rendered:/tmp/page.mjs"));
    assert_eq!(pool.ping().await.unwrap(), json!("pong"));
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn test_run_waits_for_first_worker() {
    let pool = Arc::new(Pool::start(test_config(1)).await.unwrap());

    let runner = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run("early").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!runner.is_finished());

    spawn_worker(pool.local_addr(), Behavior::echo());
    let value = runner.await.unwrap().unwrap();
    assert_eq!(value, json!("rendered:early"));
}

#[tokio::test]
async fn test_concurrent_runs_spread_by_load() {
    let pool = Arc::new(Pool::start(test_config(2)).await.unwrap());
    let addr = pool.local_addr();
    let slow = Behavior::Echo {
        delay: Duration::from_millis(300),
    };
    spawn_worker(addr, slow);
    spawn_worker(addr, slow);
    pool.wait_ready(2, Duration::from_secs(2)).await.unwrap();

    let runs: Vec<_> = ["A", "B", "C", "D"]
        .into_iter()
        .map(|content| {
            let pool = pool.clone();
            tokio::spawn(async move { (content, pool.run(content).await) })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.outstanding(), 4);
    let loads: Vec<usize> = pool.connections().iter().map(|c| c.outstanding).collect();
    assert_eq!(loads, vec![2, 2]);

    let results = futures::future::join_all(runs).await;
    for joined in results {
        let (content, result) = joined.unwrap();
        assert_eq!(result.unwrap(), json!(format!("rendered:{}", content)));
    }

    assert_eq!(pool.outstanding(), 0);
    assert!(pool.connections().iter().all(|c| c.outstanding == 0));
}

#[tokio::test]
async fn test_connection_without_handshake_is_never_selected() {
    let pool = Pool::start(test_config(1)).await.unwrap();
    let _socket = connect_without_handshake(pool.local_addr()).await;
    eventually(|| pool.connections().len() == 1).await;

    let err = pool
        .run_with("x", RunOptions::default().with_deadline(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert!(matches!(err, RendrError::Timeout(200)));
    assert_eq!(pool.connections()[0].state, ConnectionState::Connecting);
}

#[tokio::test]
async fn test_malformed_and_unmatched_lines_are_ignored() {
    let pool = Pool::start(test_config(1)).await.unwrap();
    spawn_worker(pool.local_addr(), Behavior::Noisy);

    assert_eq!(pool.run("one").await.unwrap(), json!("rendered:one"));
    assert_eq!(pool.run("two").await.unwrap(), json!("rendered:two"));
    assert_eq!(pool.connections()[0].state, ConnectionState::Ready);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_worker_error_surfaces_message() {
    let pool = Pool::start(test_config(1)).await.unwrap();
    spawn_worker(pool.local_addr(), Behavior::Fail("boom"));

    let err = pool.run("/tmp/bad.mjs").await.unwrap_err();
    match err {
        RendrError::Worker(message) => assert_eq!(message, "boom"),
        other => panic!("expected worker error, got {:?}", other),
    }
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn test_hangup_fails_in_flight_job() {
    let pool = Pool::start(test_config(1)).await.unwrap();
    spawn_worker(pool.local_addr(), Behavior::Hangup);
    pool.wait_ready(1, Duration::from_secs(2)).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), pool.run("x"))
        .await
        .expect("run did not finish after the worker hung up");
    assert!(matches!(result, Err(RendrError::ConnectionLost(1))));

    eventually(|| pool.connections().is_empty()).await;
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn test_job_timeout_from_config() {
    let config = test_config(1).with_job_timeout(Some(Duration::from_millis(100)));
    let pool = Pool::start(config).await.unwrap();
    spawn_worker(pool.local_addr(), Behavior::Silent);
    pool.wait_ready(1, Duration::from_secs(2)).await.unwrap();

    let err = pool.run("x").await.unwrap_err();
    assert!(matches!(err, RendrError::Timeout(100)));
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.connections()[0].outstanding, 0);
}

#[tokio::test]
async fn test_cancel_abandons_run() {
    let pool = Arc::new(Pool::start(test_config(1)).await.unwrap());
    spawn_worker(pool.local_addr(), Behavior::Silent);
    pool.wait_ready(1, Duration::from_secs(2)).await.unwrap();

    let token = CancellationToken::new();
    let runner = {
        let pool = pool.clone();
        let options = RunOptions::default().with_cancel(token.clone());
        tokio::spawn(async move { pool.run_with("x", options).await })
    };

    eventually(|| pool.outstanding() == 1).await;
    token.cancel();

    let result = runner.await.unwrap();
    assert!(matches!(result, Err(RendrError::Cancelled)));
    assert_eq!(pool.outstanding(), 0);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_close_fails_in_flight_and_rejects_new_runs() {
    let config = test_config(1).with_job_timeout(None);
    let pool = Arc::new(Pool::start(config).await.unwrap());
    spawn_worker(pool.local_addr(), Behavior::Silent);
    pool.wait_ready(1, Duration::from_secs(2)).await.unwrap();

    let runner = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run("x").await })
    };
    eventually(|| pool.outstanding() == 1).await;

    pool.close().await.unwrap();
    assert!(pool.is_closed());

    let result = runner.await.unwrap();
    assert!(matches!(result, Err(RendrError::ConnectionLost(_))));
    assert!(matches!(pool.run("y").await, Err(RendrError::PoolClosed)));
    assert!(pool.connections().is_empty());

    // second close has nothing left to release
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_close_with_run_in_flight_stops_processes() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("pids.txt");
    let config = test_config(2)
        .with_job_timeout(None)
        .with_command(WorkerCommand::new("sh").args(["-c", "echo $$ >> \"$OUT\"; exec sleep 30"]))
        .with_env("OUT", out.display().to_string());
    let pool = Arc::new(Pool::start(config).await.unwrap());
    spawn_worker(pool.local_addr(), Behavior::Silent);
    pool.wait_ready(1, Duration::from_secs(2)).await.unwrap();

    eventually(|| read_lines(&out).len() == 2).await;
    let pids = read_lines(&out);
    assert!(pids.iter().all(|pid| Path::new(&format!("/proc/{}", pid)).exists()));

    let runner = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run("x").await })
    };
    eventually(|| pool.outstanding() == 1).await;

    pool.close().await.unwrap();
    assert!(matches!(runner.await.unwrap(), Err(RendrError::ConnectionLost(_))));
    for pid in pids {
        assert!(!Path::new(&format!("/proc/{}", pid)).exists(), "pid {} still alive", pid);
    }
}

#[tokio::test]
async fn test_close_wakes_waiting_runs() {
    let pool = Arc::new(Pool::start(test_config(1)).await.unwrap());
    let runner = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run("x").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    pool.close().await.unwrap();
    let result = runner.await.unwrap();
    assert!(matches!(result, Err(RendrError::PoolClosed)));
}

#[tokio::test]
async fn test_close_releases_port() {
    let port = free_port();
    let pool = Pool::start(test_config(2).with_port(port)).await.unwrap();
    assert_eq!(pool.local_addr().port(), port);

    pool.close().await.unwrap();
    std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
}
