//! Directory Module Tests
//!
//! ## Test Scopes
//! - **HTTP directory**: bind, rebind, lookup and unbind over HTTP.
//! - **Keep-alive**: a lost binding is restored on the next check without restarting the server.
//! - **ServerManager**: single running instance, full teardown on shutdown, restart.

#[cfg(test)]
mod tests {
    use crate::config::ServerAttributes;
    use crate::directory::keepalive::KeepAliveRunner;
    use crate::directory::manager::ServerManager;
    use crate::directory::service::{HttpServiceDirectory, ServiceDirectory};
    use crate::directory::types::{KeepAliveOutcome, ServerState, ServiceEndpoint};
    use crate::error::{CacheServerError, Result};
    use crate::listeners::types::{ListenerDescriptor, ListenerId, RequesterType};
    use crate::server::protocol::{ENDPOINT_SHUTDOWN, ShutdownRequest};
    use crate::storage::memory::MemoryCacheManager;
    use crate::storage::region::CacheManager;
    use crate::testing::RecordingListener;

    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    const HOST: &str = "127.0.0.1";

    fn attributes() -> ServerAttributes {
        ServerAttributes {
            use_registry_keep_alive: false,
            ..ServerAttributes::default()
        }
    }

    fn http_directory() -> Arc<HttpServiceDirectory> {
        Arc::new(HttpServiceDirectory::new(HOST, 0, reqwest::Client::new()))
    }

    /// Loses its binding `outages` times before answering lookups again.
    #[derive(Default)]
    struct FlakyDirectory {
        outages: AtomicU32,
        refuse_binds: AtomicBool,
        creates: AtomicU32,
        rebinds: AtomicU32,
        closes: AtomicU32,
    }

    #[async_trait]
    impl ServiceDirectory for FlakyDirectory {
        async fn create(&self, port: u16) -> Result<u16> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(port)
        }

        async fn bind(&self, name: &str, endpoint: &ServiceEndpoint) -> Result<()> {
            self.rebind(name, endpoint).await
        }

        async fn rebind(&self, name: &str, _endpoint: &ServiceEndpoint) -> Result<()> {
            self.rebinds.fetch_add(1, Ordering::SeqCst);
            if self.refuse_binds.load(Ordering::SeqCst) {
                return Err(CacheServerError::Directory(format!("[{}] refused", name)));
            }
            Ok(())
        }

        async fn unbind(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn lookup(&self, name: &str) -> Result<ServiceEndpoint> {
            let down = self
                .outages
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if down {
                return Err(CacheServerError::Directory("connection refused".to_string()));
            }
            Ok(ServiceEndpoint::new(name, "http://127.0.0.1:1"))
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    // ============================================================
    // HTTP DIRECTORY
    // ============================================================

    #[tokio::test]
    async fn test_bind_lookup_unbind() {
        // ARRANGE
        let directory = http_directory();
        directory.create(0).await.unwrap();
        let endpoint = ServiceEndpoint::new("svc", "http://127.0.0.1:8100");

        // ACT & ASSERT
        directory.bind("svc", &endpoint).await.unwrap();
        assert_eq!(directory.lookup("svc").await.unwrap(), endpoint);

        assert!(matches!(
            directory.bind("svc", &endpoint).await,
            Err(CacheServerError::Directory(_))
        ));
        directory.rebind("svc", &endpoint).await.unwrap();

        directory.unbind("svc").await.unwrap();
        assert!(matches!(
            directory.lookup("svc").await,
            Err(CacheServerError::NotBound(_))
        ));
        assert!(matches!(
            directory.unbind("svc").await,
            Err(CacheServerError::NotBound(_))
        ));

        directory.close().await;
    }

    #[tokio::test]
    async fn test_create_is_idempotent_while_running() {
        let directory = http_directory();

        let first = directory.create(0).await.unwrap();
        let second = directory.create(0).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(directory.port(), first);
        directory.close().await;
    }

    // ============================================================
    // KEEP-ALIVE
    // ============================================================

    #[tokio::test]
    async fn test_keep_alive_restores_after_one_failed_cycle() {
        // ARRANGE
        let directory = Arc::new(FlakyDirectory::default());
        directory.outages.store(1, Ordering::SeqCst);
        let runner = KeepAliveRunner::new(
            directory.clone(),
            ServiceEndpoint::new("svc", "http://127.0.0.1:8100"),
            1099,
            Duration::from_secs(15),
        );

        // ACT
        let first = runner.check().await;
        let second = runner.check().await;

        // ASSERT
        assert_eq!(first, KeepAliveOutcome::Restored);
        assert_eq!(second, KeepAliveOutcome::Alive);
        assert_eq!(directory.creates.load(Ordering::SeqCst), 1);
        assert_eq!(directory.rebinds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_keep_alive_recreates_lost_http_directory() {
        // ARRANGE
        let directory = http_directory();
        let port = directory.create(0).await.unwrap();
        let endpoint = ServiceEndpoint::new("svc", "http://127.0.0.1:8100");
        directory.rebind("svc", &endpoint).await.unwrap();
        let runner = KeepAliveRunner::new(
            directory.clone(),
            endpoint.clone(),
            port,
            Duration::from_millis(50),
        );

        // ACT: the directory goes away with its bindings
        directory.close().await;
        let mut outcome = runner.check().await;
        for _ in 0..20 {
            if outcome != KeepAliveOutcome::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            outcome = runner.check().await;
        }

        // ASSERT
        assert_eq!(outcome, KeepAliveOutcome::Restored);
        assert_eq!(directory.lookup("svc").await.unwrap(), endpoint);
        assert_eq!(runner.check().await, KeepAliveOutcome::Alive);
        directory.close().await;
    }

    // ============================================================
    // SERVER MANAGER
    // ============================================================

    #[tokio::test]
    async fn test_second_startup_is_rejected() {
        let manager = ServerManager::new();
        manager
            .startup(HOST, 0, attributes(), MemoryCacheManager::new())
            .await
            .unwrap();

        let second = manager
            .startup(HOST, 0, attributes(), MemoryCacheManager::new())
            .await;

        assert!(matches!(second, Err(CacheServerError::Configuration(_))));
        assert_eq!(manager.state().await, ServerState::Running);
        manager.shutdown(HOST, 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_rejects_invalid_attributes() {
        let manager = ServerManager::new();
        let attrs = ServerAttributes {
            remote_service_name: String::new(),
            ..attributes()
        };

        let result = manager
            .startup(HOST, 0, attrs, MemoryCacheManager::new())
            .await;

        assert!(matches!(result, Err(CacheServerError::Configuration(_))));
        assert_eq!(manager.state().await, ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_startup_binds_server_in_directory() {
        let directory = http_directory();
        let manager = ServerManager::with_directory(directory.clone());

        manager
            .startup(HOST, 0, attributes(), MemoryCacheManager::new())
            .await
            .unwrap();

        let found = directory
            .lookup(&attributes().remote_service_name)
            .await
            .unwrap();
        let rpc_addr = manager.rpc_addr().await.unwrap();
        assert_eq!(found.url, format!("http://{}:{}", HOST, rpc_addr.port()));

        manager.shutdown(HOST, 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_bind_closes_directory_and_stays_stopped() {
        // ARRANGE
        let directory = Arc::new(FlakyDirectory::default());
        directory.refuse_binds.store(true, Ordering::SeqCst);
        let manager = ServerManager::with_directory(directory.clone());
        let cache_manager = MemoryCacheManager::new();

        // ACT
        let result = manager
            .startup(HOST, 0, attributes(), cache_manager.clone())
            .await;

        // ASSERT
        assert!(matches!(result, Err(CacheServerError::Directory(_))));
        assert_eq!(directory.creates.load(Ordering::SeqCst), 1);
        assert_eq!(directory.closes.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state().await, ServerState::Stopped);
        assert!(!cache_manager.is_shut_down());

        // The next attempt starts from scratch.
        directory.refuse_binds.store(false, Ordering::SeqCst);
        manager
            .startup(HOST, 0, attributes(), cache_manager)
            .await
            .unwrap();
        assert_eq!(manager.state().await, ServerState::Running);
        manager.shutdown(HOST, 0).await.unwrap();
        assert_eq!(directory.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_tears_everything_down_and_restart_works() {
        // ARRANGE
        let manager = ServerManager::new();
        let cache_manager = MemoryCacheManager::new();
        let server = manager
            .startup(HOST, 0, attributes(), cache_manager.clone())
            .await
            .unwrap();
        for region in ["a", "b"] {
            for _ in 0..2 {
                server
                    .add_cache_listener(
                        region,
                        &ListenerDescriptor {
                            listener_id: ListenerId::ANONYMOUS,
                            remote_type: RequesterType::Client,
                            local_host_address: None,
                            callback_url: None,
                        },
                        RecordingListener::new(),
                    )
                    .await
                    .unwrap();
            }
        }
        assert_eq!(server.registry().live_queue_count(), 4);

        // ACT
        manager.shutdown(HOST, 0).await.unwrap();

        // ASSERT
        assert_eq!(manager.state().await, ServerState::Stopped);
        assert!(manager.server().await.is_none());
        assert_eq!(server.registry().live_queue_count(), 0);
        assert!(cache_manager.is_shut_down());
        let refused = server
            .add_cache_listener(
                "a",
                &ListenerDescriptor::default(),
                RecordingListener::new(),
            )
            .await;
        assert!(matches!(refused, Err(CacheServerError::Configuration(_))));

        // A fresh startup builds a new instance.
        let restarted = manager
            .startup(HOST, 0, attributes(), MemoryCacheManager::new())
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&server, &restarted));
        assert!(!restarted.is_shut_down());
        manager.shutdown(HOST, 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_when_stopped_is_a_noop() {
        let manager = ServerManager::new();

        manager.shutdown(HOST, 0).await.unwrap();

        assert_eq!(manager.state().await, ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_remote_shutdown_request_stops_manager() {
        // ARRANGE
        let manager = ServerManager::new();
        manager
            .startup(HOST, 0, attributes(), MemoryCacheManager::new())
            .await
            .unwrap();
        let rpc_addr = manager.rpc_addr().await.unwrap();

        // ACT
        let response = reqwest::Client::new()
            .post(format!("http://{}{}", rpc_addr, ENDPOINT_SHUTDOWN))
            .json(&ShutdownRequest {
                host: HOST.to_string(),
                port: 0,
            })
            .send()
            .await
            .unwrap();

        // ASSERT
        assert!(response.status().is_success());
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while manager.state().await == ServerState::Running
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.state().await, ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_keep_alive_heals_binding_of_running_server() {
        // ARRANGE
        let directory = http_directory();
        let manager = ServerManager::with_directory(directory.clone());
        let attrs = ServerAttributes {
            use_registry_keep_alive: true,
            registry_keep_alive_delay_millis: 50,
            ..ServerAttributes::default()
        };
        manager
            .startup(HOST, 0, attrs.clone(), MemoryCacheManager::new())
            .await
            .unwrap();

        // ACT: the directory loses the binding while the server keeps running
        directory.unbind(&attrs.remote_service_name).await.unwrap();

        // ASSERT
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        let mut found = directory.lookup(&attrs.remote_service_name).await;
        while found.is_err() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
            found = directory.lookup(&attrs.remote_service_name).await;
        }
        assert!(found.is_ok());
        assert_eq!(manager.state().await, ServerState::Running);

        manager.shutdown(HOST, 0).await.unwrap();
    }
}
