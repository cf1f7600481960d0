use crate::engine::{absolute, Engine, RenderResult};
use async_trait::async_trait;
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rendr_common::{RendrError, Result};
use rendr_pool::{OutputMode, ProcessSupervisor, WorkerCommand};
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Default port of the development render server.
pub const DEFAULT_DEV_PORT: u16 = 6543;

/// Default port of the hot-module-reload server.
pub const DEFAULT_HMR_PORT: u16 = 26543;

/// Module the development server is started from.
pub const DEFAULT_DEV_SERVER_MODULE: &str = "rendr/server";

/// Options for [`DevelopmentEngine::start`].
#[derive(Debug, Clone)]
pub struct DevelopmentEngineOptions {
    pub app_dir: PathBuf,
    /// Port the development server renders on
    pub port: u16,
    pub hmr_port: u16,
    /// Port of the HTTP front end, passed through as `SERVER_PORT`
    pub server_port: u16,
    pub server_module: String,
    pub node_flags: Vec<String>,
    pub env: Vec<(String, String)>,
    pub output: OutputMode,
    /// Replaces the `node` invocation entirely when set
    pub command: Option<WorkerCommand>,
}

impl Default for DevelopmentEngineOptions {
    fn default() -> Self {
        Self {
            app_dir: PathBuf::from("app"),
            port: DEFAULT_DEV_PORT,
            hmr_port: DEFAULT_HMR_PORT,
            server_port: 3000,
            server_module: DEFAULT_DEV_SERVER_MODULE.to_string(),
            node_flags: Vec::new(),
            env: Vec::new(),
            output: OutputMode::Inherit,
            command: None,
        }
    }
}

impl DevelopmentEngineOptions {
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_dir: app_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    pub fn with_command(mut self, command: WorkerCommand) -> Self {
        self.command = Some(command);
        self
    }

    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }
}

/// Renders by proxying to a development server with hot reload.
///
/// A single supervised `node` process runs the development server from the
/// application directory. Each render is a `GET` to that server with the
/// props JSON in the `props` query parameter.
pub struct DevelopmentEngine {
    app_dir: PathBuf,
    port: u16,
    client: Client<HttpConnector, Empty<Bytes>>,
    supervisor: Mutex<ProcessSupervisor>,
}

impl DevelopmentEngine {
    pub async fn start(options: DevelopmentEngineOptions) -> Result<Self> {
        let app_dir = absolute(&options.app_dir)?;

        let command = match options.command {
            Some(command) => command,
            None => {
                let script = format!("import '{}'", options.server_module);
                WorkerCommand::node_eval(&script, &options.node_flags)
            }
        }
        .current_dir(&app_dir);

        let mut env = vec![
            (
                "NODE_PATH".to_string(),
                app_dir.join("node_modules").display().to_string(),
            ),
            ("PORT".to_string(), options.port.to_string()),
            ("HMR_PORT".to_string(), options.hmr_port.to_string()),
            ("SERVER_PORT".to_string(), options.server_port.to_string()),
        ];
        env.extend(options.env);

        debug!(port = options.port, "Starting development server");
        let supervisor = ProcessSupervisor::start(1, &command, &env, options.output)?;
        info!(
            app_dir = %app_dir.display(),
            port = options.port,
            "Development engine started"
        );

        Ok(Self {
            app_dir,
            port: options.port,
            client: Client::builder(TokioExecutor::new()).build_http(),
            supervisor: Mutex::new(supervisor),
        })
    }

    /// URL of the development server for `path` and serialized `props`.
    pub fn render_url(&self, path: &str, props_json: &str) -> String {
        format!(
            "http://localhost:{}{}?props={}",
            self.port,
            path,
            urlencoding::encode(props_json)
        )
    }
}

#[async_trait]
impl Engine for DevelopmentEngine {
    async fn render(&self, path: &str, props: &Value) -> Result<RenderResult> {
        let props_json = serde_json::to_string(props)?;
        let url = self.render_url(path, &props_json);
        debug!(url = %url, "Requesting page from development server");

        let uri: Uri = url
            .parse()
            .map_err(|e| RendrError::Http(format!("invalid URL {}: {}", url, e)))?;
        let request = Request::get(uri)
            .body(Empty::<Bytes>::new())
            .map_err(|e| RendrError::Http(format!("failed to build request: {}", e)))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| RendrError::Http(format!("request to development server failed: {}", e)))?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| RendrError::Http(format!("failed to read response body: {}", e)))?
            .to_bytes();

        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(RenderResult {
            content: String::from_utf8_lossy(&body).into_owned(),
            content_type,
            headers: parts.headers,
        })
    }

    async fn close(&self) -> Result<()> {
        let errors = self.supervisor.lock().await.stop().await;
        RendrError::from_shutdown(errors)
    }

    fn static_path(&self) -> PathBuf {
        self.app_dir.join("public")
    }
}
