//! HTML page assembly.
//!
//! The client bundle's `index.html` is the template. A render fills it in
//! four steps, each inserting before the first `</head>` or into the app
//! mount point:
//!
//! 1. `<script>window.__INITIAL_STATE__ = {props}</script>`
//! 2. the rendered body into `<div id="app"></div>`
//! 3. the rendered `head` fragment, if any
//! 4. `<style>{css}</style>`, if any

use rendr_common::{RendrError, Result};
use serde::Deserialize;
use std::path::Path;

const HEAD_CLOSE: &str = "</head>";
const APP_MOUNT: &str = "<div id=\"app\"></div>";

/// What a server entry's `render(props)` returns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RenderedPage {
    pub html: String,
    #[serde(default)]
    pub head: Option<String>,
    #[serde(default)]
    pub css: Option<String>,
}

/// A validated `index.html` template.
#[derive(Debug, Clone)]
pub struct PageTemplate {
    source: String,
}

impl PageTemplate {
    /// Parse a template, requiring both a `</head>` and an app mount point.
    pub fn parse(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        if !source.contains(HEAD_CLOSE) {
            return Err(RendrError::Template(format!("missing {}", HEAD_CLOSE)));
        }
        if !source.contains(APP_MOUNT) {
            return Err(RendrError::Template(format!("missing {}", APP_MOUNT)));
        }
        Ok(Self { source })
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RendrError::Template(format!("{}: {}", path.display(), e)))?;
        Self::parse(source)
    }

    /// Assemble a page. `props_json` must already be serialized JSON.
    pub fn render(&self, page: &RenderedPage, props_json: &str) -> String {
        let state = format!(
            "<script>\n  window.__INITIAL_STATE__ = {}\n</script>\n",
            escape_script(props_json)
        );
        let mut html = insert_before_head_close(&self.source, &state);
        html = html.replacen(APP_MOUNT, &format!("<div id=\"app\">{}</div>", page.html), 1);

        if let Some(head) = &page.head {
            html = insert_before_head_close(&html, head);
        }
        if let Some(css) = &page.css {
            html = insert_before_head_close(&html, &format!("<style>{}</style>", css));
        }
        html
    }
}

fn insert_before_head_close(html: &str, fragment: &str) -> String {
    html.replacen(HEAD_CLOSE, &format!("{}{}", fragment, HEAD_CLOSE), 1)
}

// A literal `</script>` inside the props would end the state script early.
fn escape_script(json: &str) -> String {
    json.replace("</", "<\\/")
}
