//! Service Directory
//!
//! A small HTTP naming registry. The process that owns the directory serves it on the directory
//! port; every other party, including the owner itself, talks to it over HTTP. Losing the local
//! listener therefore shows up as a failed lookup, which is what the keep-alive loop reacts to.

use super::types::{BindRequest, ServiceEndpoint};
use crate::error::{CacheServerError, Result};

use async_trait::async_trait;
use axum::extract::Path;
use axum::routing::get;
use axum::{Extension, Json, Router, http::StatusCode};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub const ENDPOINT_DIRECTORY: &str = "/directory";

/// Naming registry the server advertises itself in.
#[async_trait]
pub trait ServiceDirectory: Send + Sync {
    /// Starts a local directory listener on `port` unless one is already running, and returns
    /// the port it listens on.
    async fn create(&self, port: u16) -> Result<u16>;

    /// Binds `name`; fails if the name is already taken.
    async fn bind(&self, name: &str, endpoint: &ServiceEndpoint) -> Result<()>;

    /// Binds `name`, replacing any existing binding.
    async fn rebind(&self, name: &str, endpoint: &ServiceEndpoint) -> Result<()>;

    /// Fails with `NotBound` if `name` is not bound.
    async fn unbind(&self, name: &str) -> Result<()>;

    async fn lookup(&self, name: &str) -> Result<ServiceEndpoint>;

    /// Stops the local listener, dropping every binding it held.
    async fn close(&self);
}

type Entries = Arc<DashMap<String, ServiceEndpoint>>;

struct LocalDirectory {
    port: u16,
    task: JoinHandle<()>,
}

pub struct HttpServiceDirectory {
    host: String,
    port: AtomicU16,
    http_client: reqwest::Client,
    local: Mutex<Option<LocalDirectory>>,
}

impl HttpServiceDirectory {
    /// A client of the directory at `host:port`. Nothing is served until `create` is called.
    pub fn new(host: &str, port: u16, http_client: reqwest::Client) -> Self {
        Self {
            host: host.to_string(),
            port: AtomicU16::new(port),
            http_client,
            local: Mutex::new(None),
        }
    }

    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    fn url(&self, name: &str) -> String {
        format!(
            "http://{}:{}{}/{}",
            self.host,
            self.port(),
            ENDPOINT_DIRECTORY,
            name
        )
    }

    async fn put(&self, name: &str, endpoint: &ServiceEndpoint, replace: bool) -> Result<()> {
        let response = self
            .http_client
            .put(self.url(name))
            .json(&BindRequest {
                endpoint: endpoint.clone(),
                replace,
            })
            .send()
            .await
            .map_err(|e| CacheServerError::Directory(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(CacheServerError::Directory(format!(
                "[{}] is already bound",
                name
            ))),
            status => Err(CacheServerError::Directory(format!(
                "bind of [{}] answered {}",
                name, status
            ))),
        }
    }
}

#[async_trait]
impl ServiceDirectory for HttpServiceDirectory {
    async fn create(&self, port: u16) -> Result<u16> {
        let mut local = self.local.lock().await;
        if let Some(existing) = local.as_ref() {
            if !existing.task.is_finished() {
                return Ok(existing.port);
            }
        }

        let listener = tokio::net::TcpListener::bind((self.host.as_str(), port))
            .await
            .map_err(|e| {
                CacheServerError::Directory(format!(
                    "cannot listen on {}:{}: {}",
                    self.host, port, e
                ))
            })?;
        let port = listener.local_addr()?.port();

        let entries: Entries = Arc::new(DashMap::new());
        let app = Router::new()
            .route(
                &format!("{}/:name", ENDPOINT_DIRECTORY),
                get(handle_lookup).put(handle_bind).delete(handle_unbind),
            )
            .layer(Extension(entries));

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Service directory stopped: {}", e);
            }
        });

        tracing::info!("Service directory listening on {}:{}", self.host, port);
        self.port.store(port, Ordering::SeqCst);
        *local = Some(LocalDirectory { port, task });
        Ok(port)
    }

    async fn bind(&self, name: &str, endpoint: &ServiceEndpoint) -> Result<()> {
        self.put(name, endpoint, false).await
    }

    async fn rebind(&self, name: &str, endpoint: &ServiceEndpoint) -> Result<()> {
        self.put(name, endpoint, true).await
    }

    async fn unbind(&self, name: &str) -> Result<()> {
        let response = self
            .http_client
            .delete(self.url(name))
            .send()
            .await
            .map_err(|e| CacheServerError::Directory(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(CacheServerError::NotBound(name.to_string())),
            status => Err(CacheServerError::Directory(format!(
                "unbind of [{}] answered {}",
                name, status
            ))),
        }
    }

    async fn lookup(&self, name: &str) -> Result<ServiceEndpoint> {
        let response = self
            .http_client
            .get(self.url(name))
            .send()
            .await
            .map_err(|e| CacheServerError::Directory(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::NOT_FOUND => Err(CacheServerError::NotBound(name.to_string())),
            status => Err(CacheServerError::Directory(format!(
                "lookup of [{}] answered {}",
                name, status
            ))),
        }
    }

    async fn close(&self) {
        if let Some(local) = self.local.lock().await.take() {
            local.task.abort();
            tracing::info!("Service directory on port {} closed", local.port);
        }
    }
}

async fn handle_lookup(
    Extension(entries): Extension<Entries>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Option<ServiceEndpoint>>) {
    match entries.get(&name) {
        Some(endpoint) => (StatusCode::OK, Json(Some(endpoint.value().clone()))),
        None => (StatusCode::NOT_FOUND, Json(None)),
    }
}

async fn handle_bind(
    Extension(entries): Extension<Entries>,
    Path(name): Path<String>,
    Json(req): Json<BindRequest>,
) -> StatusCode {
    if !req.replace && entries.contains_key(&name) {
        return StatusCode::CONFLICT;
    }

    tracing::info!("Binding [{}] to {}", name, req.endpoint);
    entries.insert(name, req.endpoint);
    StatusCode::OK
}

async fn handle_unbind(
    Extension(entries): Extension<Entries>,
    Path(name): Path<String>,
) -> StatusCode {
    match entries.remove(&name) {
        Some(_) => {
            tracing::info!("Unbound [{}]", name);
            StatusCode::OK
        }
        None => StatusCode::NOT_FOUND,
    }
}
