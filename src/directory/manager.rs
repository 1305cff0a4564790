//! Server lifecycle: startup, directory binding, keep-alive and shutdown of the one running
//! `RemoteCacheServer` a manager owns.

use super::keepalive::KeepAliveRunner;
use super::service::{HttpServiceDirectory, ServiceDirectory};
use super::types::{ServerState, ServiceEndpoint};
use crate::config::ServerAttributes;
use crate::error::{CacheServerError, Result};
use crate::server::handlers::router;
use crate::server::protocol::ShutdownRequest;
use crate::server::service::RemoteCacheServer;
use crate::storage::region::CacheManager;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

struct RunningServer {
    generation: u64,
    server: Arc<RemoteCacheServer>,
    directory: Arc<dyn ServiceDirectory>,
    endpoint: ServiceEndpoint,
    rpc_addr: SocketAddr,
    rpc_task: JoinHandle<()>,
    keep_alive: Option<JoinHandle<()>>,
}

pub struct ServerManager {
    running: Mutex<Option<RunningServer>>,
    directory: Option<Arc<dyn ServiceDirectory>>,
    generations: AtomicU64,
}

impl ServerManager {
    /// A manager that serves its own HTTP directory on the port passed to `startup`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            running: Mutex::new(None),
            directory: None,
            generations: AtomicU64::new(0),
        })
    }

    /// A manager that binds into the given directory instead.
    pub fn with_directory(directory: Arc<dyn ServiceDirectory>) -> Arc<Self> {
        Arc::new(Self {
            running: Mutex::new(None),
            directory: Some(directory),
            generations: AtomicU64::new(0),
        })
    }

    pub async fn state(&self) -> ServerState {
        match self.running.lock().await.as_ref() {
            Some(_) => ServerState::Running,
            None => ServerState::Stopped,
        }
    }

    /// The running server, for in-process collaborators.
    pub async fn server(&self) -> Option<Arc<RemoteCacheServer>> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| running.server.clone())
    }

    pub async fn rpc_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|running| running.rpc_addr)
    }

    /// Starts a server, serves its RPC surface on `servicePort` and binds it in the directory at
    /// `host:port`. Fails if this manager already runs a server.
    pub async fn startup(
        self: &Arc<Self>,
        host: &str,
        port: u16,
        attributes: ServerAttributes,
        cache_manager: Arc<dyn CacheManager>,
    ) -> Result<Arc<RemoteCacheServer>> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(CacheServerError::Configuration(
                "Server already started.".to_string(),
            ));
        }

        attributes.validate()?;
        let host = if host.is_empty() { "localhost" } else { host };
        let service_name = attributes.remote_service_name.clone();
        tracing::info!(
            "Starting [{}], host = [{}], port = [{}], servicePort = [{}]",
            service_name,
            host,
            port,
            attributes.service_port
        );

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let server = Arc::new(
            RemoteCacheServer::new(attributes.clone(), cache_manager)?.with_shutdown_hook(shutdown_tx),
        );

        let directory = match &self.directory {
            Some(directory) => directory.clone(),
            None => {
                let directory: Arc<dyn ServiceDirectory> = Arc::new(HttpServiceDirectory::new(
                    host,
                    port,
                    attributes.http_client()?,
                ));
                directory
            }
        };

        // 1. RPC listener:
        let listener = tokio::net::TcpListener::bind((host, attributes.service_port)).await?;
        let rpc_addr = listener.local_addr()?;
        let app = router(server.clone());
        let rpc_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("RPC listener stopped: {}", e);
            }
        });
        tracing::info!("Remote cache server listening on {}", rpc_addr);

        // 2. Directory and binding:
        let endpoint = ServiceEndpoint::new(
            service_name.as_str(),
            format!("http://{}:{}", host, rpc_addr.port()),
        );
        let directory_port = match bind_server(directory.as_ref(), port, &endpoint).await {
            Ok(directory_port) => directory_port,
            Err(e) => {
                tracing::error!("Problem binding {}: {}", endpoint, e);
                directory.close().await;
                rpc_task.abort();
                return Err(e);
            }
        };

        // 3. Keep-alive:
        let keep_alive = if attributes.use_registry_keep_alive {
            let runner = KeepAliveRunner::new(
                directory.clone(),
                endpoint.clone(),
                directory_port,
                attributes.keep_alive_interval(),
            );
            Some(runner.spawn())
        } else {
            None
        };

        // 4. Remote shutdown requests:
        tokio::spawn(watch_shutdown_requests(
            Arc::downgrade(self),
            generation,
            shutdown_rx,
        ));

        *running = Some(RunningServer {
            generation,
            server: server.clone(),
            directory,
            endpoint,
            rpc_addr,
            rpc_task,
            keep_alive,
        });
        Ok(server)
    }

    /// Unregisters all listeners, unbinds the server, stops the keep-alive loop, the directory
    /// and the RPC listener, and shuts down the cache manager. A no-op when nothing runs.
    pub async fn shutdown(&self, host: &str, port: u16) -> Result<()> {
        self.shutdown_generation(None, host, port).await
    }

    async fn shutdown_generation(
        &self,
        generation: Option<u64>,
        host: &str,
        port: u16,
    ) -> Result<()> {
        let mut guard = self.running.lock().await;
        let matches = match (guard.as_ref(), generation) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(running), Some(generation)) => running.generation == generation,
        };
        if !matches {
            tracing::debug!("No matching server running, nothing to shut down");
            return Ok(());
        }
        let Some(running) = guard.take() else {
            return Ok(());
        };

        let name = running.endpoint.service_name.as_str();
        tracing::info!("Unbinding host={}, port={}, serviceName={}", host, port, name);

        running.server.shutdown_listeners();

        let unbound = match running.directory.unbind(name).await {
            Ok(()) | Err(CacheServerError::NotBound(_)) => Ok(()),
            Err(e) => Err(e),
        };

        if let Some(keep_alive) = running.keep_alive {
            keep_alive.abort();
        }
        running.directory.close().await;
        running.rpc_task.abort();
        running.server.close().await;

        tracing::info!("Remote cache server stopped");
        unbound
    }
}

async fn bind_server(
    directory: &dyn ServiceDirectory,
    port: u16,
    endpoint: &ServiceEndpoint,
) -> Result<u16> {
    let directory_port = directory.create(port).await?;
    directory
        .rebind(&endpoint.service_name, endpoint)
        .await?;
    tracing::info!("Bound {} in directory on port {}", endpoint, directory_port);
    Ok(directory_port)
}

async fn watch_shutdown_requests(
    manager: Weak<ServerManager>,
    generation: u64,
    mut requests: mpsc::UnboundedReceiver<ShutdownRequest>,
) {
    let Some(request) = requests.recv().await else {
        return;
    };
    let Some(manager) = manager.upgrade() else {
        return;
    };

    if let Err(e) = manager
        .shutdown_generation(Some(generation), &request.host, request.port)
        .await
    {
        tracing::error!("Problem shutting down server: {}", e);
    }
}
