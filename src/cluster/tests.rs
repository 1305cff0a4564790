//! Cluster Module Tests
//!
//! Two real servers wired to each other over HTTP on `127.0.0.1:0`.
//!
//! ## Test Scopes
//! - **Cascade**: client writes on one server reach the peer, which applies them locally only.
//! - **Peer restart**: registrations are redone after the peer comes back.
//! - **Fallback reads**: a miss on one server is served by the peer.
//! - **Client**: error mapping and retries of `RemoteCacheClient`.

#[cfg(test)]
mod tests {
    use crate::cluster::client::RemoteCacheClient;
    use crate::cluster::peer::PeerAuxiliary;
    use crate::config::ServerAttributes;
    use crate::error::CacheServerError;
    use crate::listeners::types::{ListenerDescriptor, ListenerId, RequesterType};
    use crate::server::handlers::router;
    use crate::server::service::RemoteCacheServer;
    use crate::storage::memory::MemoryCacheManager;
    use crate::storage::region::Auxiliary;
    use crate::testing::{RecordingListener, element};

    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    struct Node {
        url: String,
        server: Arc<RemoteCacheServer>,
        manager: Arc<MemoryCacheManager>,
        serving: JoinHandle<()>,
    }

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    fn peer(url: &str, peer: &str, http_client: reqwest::Client) -> Arc<PeerAuxiliary> {
        Arc::new(PeerAuxiliary::new(
            RemoteCacheClient::new(peer, http_client),
            url,
            Some("127.0.0.1".to_string()),
        ))
    }

    fn start(listener: TcpListener, url: String, peers: &[&str]) -> Node {
        let auxiliaries: Vec<Arc<dyn Auxiliary>> = peers
            .iter()
            .map(|p| {
                let aux: Arc<dyn Auxiliary> = peer(&url, p, reqwest::Client::new());
                aux
            })
            .collect();
        start_with(listener, url, auxiliaries)
    }

    fn start_with(listener: TcpListener, url: String, auxiliaries: Vec<Arc<dyn Auxiliary>>) -> Node {
        let manager = MemoryCacheManager::with_auxiliaries(auxiliaries);
        let server = Arc::new(
            RemoteCacheServer::new(ServerAttributes::default(), manager.clone()).unwrap(),
        );

        let app = router(server.clone());
        let serving = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Node {
            url,
            server,
            manager,
            serving,
        }
    }

    // ============================================================
    // CASCADE
    // ============================================================

    #[tokio::test]
    async fn test_client_write_reaches_peer_as_cluster_write() {
        // ARRANGE
        let (b_listener, b_url) = bind().await;
        let b = start(b_listener, b_url.clone(), &[]);
        let (a_listener, a_url) = bind().await;
        let a = start(a_listener, a_url, &[&b_url]);

        let b_listener = RecordingListener::new();
        b.server
            .add_cache_listener(
                "docs",
                &ListenerDescriptor::default(),
                b_listener.clone(),
            )
            .await
            .unwrap();

        // ACT
        a.server.put(element("docs", "k", 1)).await;

        // ASSERT
        let item = b.server.get("docs", "k", ListenerId::ANONYMOUS).await;
        assert_eq!(item.unwrap().value, serde_json::json!(1));

        let peer_ids: Vec<ListenerId> = b.server.registry().listener_ids("docs");
        assert_eq!(peer_ids.len(), 2);
        assert!(
            peer_ids
                .iter()
                .any(|id| b.server.registry().resolve(*id).is_cluster())
        );

        // Cluster writes do not fan out on the peer by default.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(b_listener.events().is_empty());
    }

    #[tokio::test]
    async fn test_mutual_peers_do_not_loop() {
        // ARRANGE
        let (a_listener, a_url) = bind().await;
        let (b_listener, b_url) = bind().await;
        let a = start(a_listener, a_url.clone(), &[&b_url]);
        let b = start(b_listener, b_url, &[&a_url]);

        // ACT
        a.server.put(element("docs", "k", 1)).await;
        b.server.remove("docs", "k", ListenerId::ANONYMOUS).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // ASSERT
        assert_eq!(a.server.puts(), 1);
        assert_eq!(b.server.puts(), 1);
        assert_eq!(a.manager.local_entry_count(), 0);
        assert_eq!(b.manager.local_entry_count(), 0);
    }

    // ============================================================
    // PEER RESTART
    // ============================================================

    #[tokio::test]
    async fn test_restarted_peer_still_sees_cluster_writes() {
        // ARRANGE
        let (b_listener, b_url) = bind().await;
        let b_addr = b_listener.local_addr().unwrap();
        let b = start(b_listener, b_url.clone(), &[]);

        // No pooled connections, so nothing reaches the old server after it stops.
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .unwrap();
        let (a_listener, a_url) = bind().await;
        let a_peer = peer(&a_url, &b_url, http_client);
        let auxiliaries: Vec<Arc<dyn Auxiliary>> = vec![a_peer.clone()];
        let a = start_with(a_listener, a_url, auxiliaries);

        a.server.put(element("docs", "before", 1)).await;
        assert!(b.server.get("docs", "before", ListenerId::ANONYMOUS).await.is_some());
        let first_id = a_peer.listener_id();
        assert!(!first_id.is_anonymous());

        // ACT
        b.serving.abort();
        let _ = b.serving.await;
        a.server.put(element("docs", "while-down", 2)).await;
        let id_while_down = a_peer.listener_id();

        let b2_listener = TcpListener::bind(b_addr).await.unwrap();
        let b2 = start(b2_listener, b_url, &[]);
        let watcher = RecordingListener::new();
        let watcher_descriptor = ListenerDescriptor {
            listener_id: ListenerId(500),
            ..ListenerDescriptor::default()
        };
        b2.server
            .add_cache_listener("docs", &watcher_descriptor, watcher.clone())
            .await
            .unwrap();

        a.server.put(element("docs", "after", 3)).await;

        // ASSERT
        assert!(id_while_down.is_anonymous());
        assert_eq!(a.manager.local_entry_count(), 3);

        let item = b2.server.get("docs", "after", ListenerId::ANONYMOUS).await;
        assert_eq!(item.unwrap().value, serde_json::json!(3));
        let peer_id = a_peer.listener_id();
        assert!(b2.server.registry().resolve(peer_id).is_cluster());
        assert!(b2.server.registry().listener_ids("docs").contains(&peer_id));

        // Applied as a cluster write, so the client listener on the peer hears nothing.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(watcher.events().is_empty());
    }

    #[tokio::test]
    async fn test_miss_is_served_by_peer() {
        // ARRANGE
        let (b_listener, b_url) = bind().await;
        let b = start(b_listener, b_url.clone(), &[]);
        let (a_listener, a_url) = bind().await;
        let a = start(a_listener, a_url, &[&b_url]);
        b.server.put(element("docs", "only-on-b", 9)).await;

        // ACT
        let item = a.server.get("docs", "only-on-b", ListenerId::ANONYMOUS).await;
        let matching = a
            .server
            .get_matching("docs", "only-.*", ListenerId::ANONYMOUS)
            .await;

        // ASSERT
        assert_eq!(item.unwrap().value, serde_json::json!(9));
        assert!(matching.contains_key("only-on-b"));
        // The hit was written back locally.
        assert!(a.manager.region("docs").unwrap().local_entry_count() >= 1);
    }

    // ============================================================
    // CLIENT
    // ============================================================

    #[tokio::test]
    async fn test_client_round_trip() {
        let (listener, url) = bind().await;
        let node = start(listener, url.clone(), &[]);
        let client = RemoteCacheClient::new(format!("{}/", url), reqwest::Client::new());

        client
            .update(&element("docs", "b", 2), ListenerId::ANONYMOUS)
            .await
            .unwrap();
        client
            .update(&element("docs", "a", 1), ListenerId::ANONYMOUS)
            .await
            .unwrap();
        client
            .remove("docs", "b", ListenerId::ANONYMOUS)
            .await
            .unwrap();

        assert_eq!(client.get_key_set("docs").await.unwrap(), vec!["a"]);
        assert!(client.stats().await.unwrap().contains("puts=2"));
        assert_eq!(node.server.puts(), 2);
        assert_eq!(client.base_url(), url);
    }

    #[tokio::test]
    async fn test_client_add_listener_reports_server_errors() {
        let (listener, url) = bind().await;
        let _node = start(listener, url.clone(), &[]);
        let client = RemoteCacheClient::new(url, reqwest::Client::new());

        let descriptor = ListenerDescriptor {
            remote_type: RequesterType::ClusterPeer,
            ..ListenerDescriptor::default()
        };
        let result = client.add_listener("docs", &descriptor).await;

        assert!(matches!(result, Err(CacheServerError::Transport(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_transport_error() {
        let (listener, url) = bind().await;
        drop(listener);
        let client = RemoteCacheClient::new(url, reqwest::Client::new()).with_attempts(2);

        let result = client.get("docs", "k", ListenerId::ANONYMOUS).await;

        assert!(matches!(result, Err(CacheServerError::Transport(_))));
    }
}
