//! # rendr CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Serve a built application from ./my-app/dist
//! rendr serve ./my-app -b 127.0.0.1:3000
//!
//! # Same application through the development server
//! DEV=1 rendr serve ./my-app
//!
//! # Run a single module on a worker and print its default export
//! rendr run ./job.mjs --processes 1
//! ```

use anyhow::{Context, Result};
use argh::FromArgs;
use rendr_engine::{
    DevelopmentEngine, DevelopmentEngineOptions, Engine, ProductionEngine,
    ProductionEngineOptions,
};
use rendr_pool::{Pool, PoolConfig, RunOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// rendr - server-side rendering on a pool of JavaScript workers
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Run(RunArgs),
}

/// Arguments for serving an application over HTTP.
///
/// # Example
///
/// ```bash
/// rendr serve ./my-app -b 0.0.0.0:3000 --processes 8
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// serve an application over HTTP
struct ServeArgs {
    /// application directory (contains `dist/` in production)
    #[argh(positional)]
    app_dir: String,

    /// address to bind the HTTP server to
    #[argh(option, short = 'b', default = "\"127.0.0.1:3000\".into()")]
    bind: String,

    /// number of worker processes
    #[argh(option, long = "processes", default = "5")]
    processes: usize,

    /// port workers connect back to (0 picks a free port)
    #[argh(option, long = "port", default = "6543")]
    port: u16,

    /// use the development engine (also enabled by the DEV variable)
    #[argh(switch)]
    dev: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
/// run one module and print its default export as JSON
struct RunArgs {
    /// path of the module to import
    #[argh(positional)]
    module: String,

    /// number of worker processes
    #[argh(option, long = "processes", default = "1")]
    processes: usize,

    /// port workers connect back to (0 picks a free port)
    #[argh(option, long = "port", default = "0")]
    port: u16,

    /// job timeout in milliseconds
    #[argh(option, long = "timeout-ms", default = "30000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Keep `run` quiet by default so its stdout can be piped
    let default_level = match cli.command {
        Commands::Run(_) => "warn",
        Commands::Serve(_) => "info",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Run(args) => run(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let dev = args.dev || std::env::var_os("DEV").is_some();
    let listener = TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    let server_port = listener.local_addr()?.port();

    let engine: Arc<dyn Engine> = if dev {
        tracing::info!("Starting development engine");
        let options = DevelopmentEngineOptions::new(&args.app_dir)
            .with_port(args.port)
            .with_server_port(server_port);
        Arc::new(DevelopmentEngine::start(options).await?)
    } else {
        tracing::info!("Starting production engine");
        let options = ProductionEngineOptions::new(Path::new(&args.app_dir).join("dist"))
            .with_pool(pool_config(args.processes, args.port));
        Arc::new(ProductionEngine::start(options).await?)
    };

    let static_root = (!dev).then(|| engine.static_path());
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    let served = rendr_cli::server::serve(listener, engine.clone(), static_root, shutdown).await;
    engine.close().await?;
    served
}

async fn run(args: RunArgs) -> Result<()> {
    let module = absolute(&args.module)?;
    let config = pool_config(args.processes, args.port)
        .with_job_timeout(Some(Duration::from_millis(args.timeout_ms)));
    let pool = Pool::start(config).await?;

    let result = pool
        .run_with(module.display().to_string(), RunOptions::default())
        .await;
    for conn in pool.connections() {
        tracing::debug!(
            connection_id = %conn.id,
            state = ?conn.state,
            outstanding = conn.outstanding,
            "Pool status"
        );
    }
    pool.close().await?;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

fn pool_config(processes: usize, port: u16) -> PoolConfig {
    PoolConfig::default()
        .with_processes(processes)
        .with_port(port)
}

fn absolute(path: &str) -> Result<PathBuf> {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
