use super::protocol::*;
use super::service::RemoteCacheServer;

use axum::routing::{get, post};
use axum::{Extension, Json, Router, extract::Path, http::StatusCode};
use std::sync::Arc;

/// The RPC surface of a `RemoteCacheServer`.
pub fn router(server: Arc<RemoteCacheServer>) -> Router {
    Router::new()
        .route(ENDPOINT_UPDATE, post(handle_update))
        .route(ENDPOINT_GET, post(handle_get))
        .route(ENDPOINT_GET_MATCHING, post(handle_get_matching))
        .route(ENDPOINT_GET_MULTIPLE, post(handle_get_multiple))
        .route(&format!("{}/:cache_name", ENDPOINT_KEYS), get(handle_get_key_set))
        .route(ENDPOINT_REMOVE, post(handle_remove))
        .route(ENDPOINT_REMOVE_ALL, post(handle_remove_all))
        .route(ENDPOINT_DISPOSE, post(handle_dispose))
        .route(ENDPOINT_RELEASE, post(handle_release))
        .route(ENDPOINT_ADD_LISTENER, post(handle_add_listener))
        .route(ENDPOINT_REMOVE_LISTENER, post(handle_remove_listener))
        .route(ENDPOINT_SHUTDOWN, post(handle_shutdown))
        .route(ENDPOINT_STATS, get(handle_stats))
        .route(ENDPOINT_PEER_EVENTS, post(handle_peer_event))
        .layer(Extension(server))
}

pub async fn handle_update(
    Extension(server): Extension<Arc<RemoteCacheServer>>,
    Json(req): Json<UpdateRequest>,
) -> (StatusCode, Json<OperationResponse>) {
    server.update(req.item, req.requester_id).await;
    (StatusCode::OK, Json(OperationResponse::ok()))
}

pub async fn handle_get(
    Extension(server): Extension<Arc<RemoteCacheServer>>,
    Json(req): Json<GetRequest>,
) -> (StatusCode, Json<GetResponse>) {
    let item = server.get(&req.cache_name, &req.key, req.requester_id).await;
    (StatusCode::OK, Json(GetResponse { item }))
}

pub async fn handle_get_matching(
    Extension(server): Extension<Arc<RemoteCacheServer>>,
    Json(req): Json<GetMatchingRequest>,
) -> (StatusCode, Json<ElementsResponse>) {
    let elements = server
        .get_matching(&req.cache_name, &req.pattern, req.requester_id)
        .await;
    (StatusCode::OK, Json(ElementsResponse { elements }))
}

pub async fn handle_get_multiple(
    Extension(server): Extension<Arc<RemoteCacheServer>>,
    Json(req): Json<GetMultipleRequest>,
) -> (StatusCode, Json<ElementsResponse>) {
    let elements = server
        .get_multiple(&req.cache_name, &req.keys, req.requester_id)
        .await;
    (StatusCode::OK, Json(ElementsResponse { elements }))
}

pub async fn handle_get_key_set(
    Extension(server): Extension<Arc<RemoteCacheServer>>,
    Path(cache_name): Path<String>,
) -> (StatusCode, Json<KeySetResponse>) {
    let mut keys: Vec<String> = server.get_key_set(&cache_name).await.into_iter().collect();
    keys.sort();
    (StatusCode::OK, Json(KeySetResponse { keys }))
}

pub async fn handle_remove(
    Extension(server): Extension<Arc<RemoteCacheServer>>,
    Json(req): Json<RemoveRequest>,
) -> (StatusCode, Json<OperationResponse>) {
    server
        .remove(&req.cache_name, &req.key, req.requester_id)
        .await;
    (StatusCode::OK, Json(OperationResponse::ok()))
}

pub async fn handle_remove_all(
    Extension(server): Extension<Arc<RemoteCacheServer>>,
    Json(req): Json<RegionRequest>,
) -> (StatusCode, Json<OperationResponse>) {
    server.remove_all(&req.cache_name, req.requester_id).await;
    (StatusCode::OK, Json(OperationResponse::ok()))
}

pub async fn handle_dispose(
    Extension(server): Extension<Arc<RemoteCacheServer>>,
    Json(req): Json<RegionRequest>,
) -> (StatusCode, Json<OperationResponse>) {
    server.dispose(&req.cache_name, req.requester_id).await;
    (StatusCode::OK, Json(OperationResponse::ok()))
}

pub async fn handle_release(
    Extension(server): Extension<Arc<RemoteCacheServer>>,
) -> (StatusCode, Json<OperationResponse>) {
    server.release().await;
    (StatusCode::OK, Json(OperationResponse::ok()))
}

pub async fn handle_add_listener(
    Extension(server): Extension<Arc<RemoteCacheServer>>,
    Json(req): Json<AddListenerRequest>,
) -> (StatusCode, Json<AddListenerResponse>) {
    let result = match server.http_listener(&req.descriptor) {
        Ok(listener) => {
            server
                .add_cache_listener(&req.cache_name, &req.descriptor, listener)
                .await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(listener_id) => (
            StatusCode::OK,
            Json(AddListenerResponse {
                success: true,
                listener_id,
                message: None,
            }),
        ),
        Err(e) => {
            tracing::error!(
                "Failed to add listener to [{}]: {}",
                req.cache_name,
                e
            );
            let status = if e.is_recoverable() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (
                status,
                Json(AddListenerResponse {
                    success: false,
                    listener_id: req.descriptor.listener_id,
                    message: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_remove_listener(
    Extension(server): Extension<Arc<RemoteCacheServer>>,
    Json(req): Json<RemoveListenerRequest>,
) -> (StatusCode, Json<OperationResponse>) {
    server.remove_cache_listener(&req.cache_name, req.listener_id);
    (StatusCode::OK, Json(OperationResponse::ok()))
}

/// Only signals the lifecycle owner; the response goes out before the listener is torn down.
pub async fn handle_shutdown(
    Extension(server): Extension<Arc<RemoteCacheServer>>,
    Json(req): Json<ShutdownRequest>,
) -> (StatusCode, Json<OperationResponse>) {
    server.shutdown(&req.host, req.port).await;
    (StatusCode::OK, Json(OperationResponse::ok()))
}

pub async fn handle_stats(
    Extension(server): Extension<Arc<RemoteCacheServer>>,
) -> (StatusCode, Json<StatsResponse>) {
    (
        StatusCode::OK,
        Json(StatsResponse {
            stats: server.get_stats(),
        }),
    )
}

pub async fn handle_peer_event(
    Extension(server): Extension<Arc<RemoteCacheServer>>,
    Json(req): Json<ListenerEventRequest>,
) -> (StatusCode, Json<OperationResponse>) {
    tracing::debug!(
        "Received {} as listener {}",
        req.event,
        req.listener_id
    );
    server.apply_peer_event(req.event).await;
    (StatusCode::OK, Json(OperationResponse::ok()))
}
