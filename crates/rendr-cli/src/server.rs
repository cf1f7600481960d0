//! HTTP front end for a render engine.
//!
//! Every `GET` renders the request path with props `{path, time}`. When a
//! static directory is configured, requests naming an existing file inside
//! it are answered from disk before any render happens. Render failures
//! become a bare `500`.

use chrono::{Local, SecondsFormat};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rendr_engine::{Engine, RenderResult};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

type HttpResponse = Response<Full<Bytes>>;

/// Serve `engine` on `listener` until `shutdown` resolves.
///
/// `static_root` enables disk-first serving from that directory.
pub async fn serve<F>(
    listener: TcpListener,
    engine: Arc<dyn Engine>,
    static_root: Option<PathBuf>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    info!("HTTP server listening on {}", listener.local_addr()?);
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = &mut shutdown => {
                info!("HTTP server shutting down");
                return Ok(());
            }
        };

        let engine = engine.clone();
        let static_root = static_root.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let engine = engine.clone();
                let static_root = static_root.clone();
                async move { handle_request(engine, static_root, req).await }
            });

            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(%peer, "Error serving connection: {}", err);
            }
        });
    }
}

async fn handle_request(
    engine: Arc<dyn Engine>,
    static_root: Option<PathBuf>,
    req: Request<Incoming>,
) -> Result<HttpResponse, Infallible> {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return Ok(status(StatusCode::METHOD_NOT_ALLOWED));
    }
    let path = req.uri().path().to_string();

    if let Some(root) = &static_root {
        if let Some(file) = static_file(root, &path).await {
            return Ok(file);
        }
    }

    let props = page_props(&path);
    match engine.render(&path, &props).await {
        Ok(result) => Ok(rendered(result)),
        Err(e) => {
            error!(path = %path, "Error rendering: {}", e);
            Ok(status(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

/// Props handed to every render.
pub fn page_props(path: &str) -> Value {
    json!({
        "path": path,
        "time": Local::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}

fn rendered(result: RenderResult) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from(result.content)));
    let headers = response.headers_mut();

    for (name, value) in result.headers.iter() {
        // the body is re-framed here
        if *name == CONTENT_LENGTH || *name == TRANSFER_ENCODING || *name == CONNECTION {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    if let Ok(content_type) = HeaderValue::from_str(&result.content_type) {
        headers.insert(CONTENT_TYPE, content_type);
    }
    response
}

async fn static_file(root: &Path, request_path: &str) -> Option<HttpResponse> {
    let file = resolve_static(root, request_path)?;
    let bytes = tokio::fs::read(&file).await.ok()?;

    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type_for(&file)));
    Some(response)
}

/// Map a request path to a regular file under `root`, refusing anything
/// that would step outside it.
pub fn resolve_static(root: &Path, request_path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(request_path).ok()?;
    let relative = Path::new(decoded.trim_start_matches('/'));
    if relative.as_os_str().is_empty() {
        return None;
    }
    if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
        return None;
    }

    let file = root.join(relative);
    file.is_file().then_some(file)
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or_default() {
        "html" | "htm" => "text/html",
        "js" | "mjs" => "text/javascript",
        "css" => "text/css",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

fn status(code: StatusCode) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = code;
    response
}
