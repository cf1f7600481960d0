use async_trait::async_trait;
use hyper::HeaderMap;
use rendr_common::Result;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// A rendered response, ready to hand to an HTTP layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    pub content: String,
    pub content_type: String,
    /// Extra response headers; empty for pages assembled locally
    pub headers: HeaderMap,
}

impl RenderResult {
    pub fn html(content: String) -> Self {
        Self {
            content,
            content_type: "text/html".to_string(),
            headers: HeaderMap::new(),
        }
    }
}

/// Server-side renderer for a front-end application.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Render the page at `path` with `props` as its initial state.
    async fn render(&self, path: &str, props: &Value) -> Result<RenderResult>;

    /// Release worker processes and sockets. Safe to call more than once.
    async fn close(&self) -> Result<()>;

    /// Directory of static assets served alongside rendered pages.
    fn static_path(&self) -> PathBuf;
}

/// Resolve `dir` against the current directory when it is relative.
pub(crate) fn absolute(dir: &Path) -> Result<PathBuf> {
    if dir.is_absolute() {
        Ok(dir.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(dir))
    }
}
