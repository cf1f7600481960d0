use crate::engine::{absolute, Engine, RenderResult};
use crate::template::{PageTemplate, RenderedPage};
use async_trait::async_trait;
use rendr_common::{JobId, RendrError, Result};
use rendr_pool::{Pool, PoolConfig};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Options for [`ProductionEngine::start`].
#[derive(Debug, Clone)]
pub struct ProductionEngineOptions {
    /// Build output directory holding `client/` and `server/`
    pub dist_dir: PathBuf,
    /// Pool settings; the worker directory defaults to `dist_dir`
    pub pool: PoolConfig,
}

impl Default for ProductionEngineOptions {
    fn default() -> Self {
        Self {
            dist_dir: PathBuf::from("dist"),
            pool: PoolConfig::default(),
        }
    }
}

impl ProductionEngineOptions {
    pub fn new(dist_dir: impl Into<PathBuf>) -> Self {
        Self {
            dist_dir: dist_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

/// Renders pages from a built bundle on the worker pool.
///
/// Each distinct props value gets a small module in a private temporary
/// directory that imports `render` from `server/entry-server.js` and exports
/// `render(props)`. The pool imports that module and the resulting
/// [`RenderedPage`] is spliced into `client/index.html`.
///
/// A module file is removed once no render is using it, so the directory
/// only holds modules for renders in flight. Workers still cache every
/// module they have imported, and props that change per request (such as a
/// timestamp) make each render a new module, so worker memory grows with the
/// number of distinct props rendered.
pub struct ProductionEngine {
    dist_dir: PathBuf,
    server_entry: PathBuf,
    template: PageTemplate,
    modules: TempDir,
    in_use: Mutex<HashMap<PathBuf, usize>>,
    pool: Pool,
}

impl ProductionEngine {
    pub async fn start(options: ProductionEngineOptions) -> Result<Self> {
        let dist_dir = absolute(&options.dist_dir)?;
        let template = PageTemplate::load(&dist_dir.join("client").join("index.html")).await?;
        let server_entry = dist_dir.join("server").join("entry-server.js");

        let modules = tempfile::Builder::new().prefix("rendr-").tempdir()?;

        let mut pool_config = options.pool;
        if pool_config.command.dir.is_none() {
            pool_config.command.dir = Some(dist_dir.clone());
        }
        let pool = Pool::start(pool_config).await?;

        info!(
            dist_dir = %dist_dir.display(),
            modules = %modules.path().display(),
            "Production engine started"
        );

        Ok(Self {
            dist_dir,
            server_entry,
            template,
            modules,
            in_use: Mutex::new(HashMap::new()),
            pool,
        })
    }

    /// The pool executing render modules.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Directory holding the generated render modules.
    pub fn module_dir(&self) -> &Path {
        self.modules.path()
    }

    fn module_path(&self, props_json: &str) -> PathBuf {
        let digest = Sha256::digest(props_json.as_bytes());
        self.modules.path().join(format!("{:x}.mjs", digest))
    }

    /// Path of the render module for `props_json`, writing it if missing.
    pub async fn render_module(&self, props_json: &str) -> Result<PathBuf> {
        let path = self.module_path(props_json);

        if tokio::fs::try_exists(&path).await? {
            return Ok(path);
        }

        let entry = serde_json::to_string(&self.server_entry.display().to_string())?;
        let source = format!(
            "import {{ render }} from {};\n\nexport default render({});\n",
            entry, props_json
        );

        // Concurrent renders of the same props race here; write aside and
        // rename so the pool never imports a half-written module.
        let staging = self
            .modules
            .path()
            .join(format!("{}.tmp", JobId::generate()));
        tokio::fs::write(&staging, source).await?;
        tokio::fs::rename(&staging, &path).await?;

        debug!(module = %path.display(), "Wrote render module");
        Ok(path)
    }

    /// Mark the module for `props_json` as in use until the lease drops.
    async fn lease_module(&self, props_json: &str) -> Result<ModuleLease<'_>> {
        let path = self.module_path(props_json);
        *self.lock_in_use().entry(path.clone()).or_insert(0) += 1;
        let lease = ModuleLease { engine: self, path };

        self.render_module(props_json).await?;
        Ok(lease)
    }

    fn lock_in_use(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, usize>> {
        self.in_use.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a render module on disk while a render is using it.
struct ModuleLease<'a> {
    engine: &'a ProductionEngine,
    path: PathBuf,
}

impl Drop for ModuleLease<'_> {
    fn drop(&mut self) {
        let mut in_use = self.engine.lock_in_use();
        let Some(count) = in_use.get_mut(&self.path) else {
            return;
        };
        *count -= 1;
        if *count > 0 {
            return;
        }
        in_use.remove(&self.path);

        // Removed under the lock so a concurrent lease sees the file gone
        // and writes it again.
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(module = %self.path.display(), "Removed render module"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(module = %self.path.display(), "Failed to remove render module: {}", e),
        }
    }
}

#[async_trait]
impl Engine for ProductionEngine {
    async fn render(&self, path: &str, props: &Value) -> Result<RenderResult> {
        let props_json = serde_json::to_string(props)?;
        let module = self.lease_module(&props_json).await?;
        debug!(path, module = %module.path.display(), "Rendering page");

        let output = self.pool.run(module.path.display().to_string()).await?;
        drop(module);
        let page: RenderedPage = serde_json::from_value(output)
            .map_err(|e| RendrError::InvalidOutput(e.to_string()))?;

        Ok(RenderResult::html(self.template.render(&page, &props_json)))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await
    }

    fn static_path(&self) -> PathBuf {
        self.dist_dir.join("client")
    }
}
