use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, Method},
    response::sse::{KeepAlive, KeepAliveStream, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use cumulus_crypto::{new_cryptor, Algorithm, CryptoError, MasterKeyVault, Source};
use cumulus_events::store::UserStore;
use cumulus_events::EventHub;
use cumulus_shared::constants::SSE_KEEP_ALIVE_SECS;
use cumulus_shared::{RequestContext, User};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::object_store::ObjectStore;
use crate::sse::EventSource;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<EventHub>,
    pub users: Arc<dyn UserStore>,
    pub objects: Arc<ObjectStore>,
    pub vault: Arc<dyn MasterKeyVault>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let body_limit = state.config.max_object_size;

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/api/events", get(subscribe_events))
        .route("/api/objects", post(object_upload))
        .route("/api/objects/{id}", get(object_download))
        .route("/api/objects/{id}", delete(object_delete))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
}

#[derive(Serialize)]
struct ObjectUploadResponse {
    id: Uuid,
    size: u64,
}

#[derive(Deserialize)]
struct EventsQuery {
    /// Folder id to watch.
    topic: i64,
}

#[derive(Deserialize)]
struct RangeQuery {
    /// First byte of the decrypted object to return.
    #[serde(default)]
    offset: u64,
    /// Number of bytes to return; the rest of the object when absent.
    len: Option<u64>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Resolve the bearer token to a user, or fail with 401.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, ServerError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let token = auth.strip_prefix("Bearer ").unwrap_or("");

    if token.is_empty() {
        return Err(ServerError::Unauthorized("Missing bearer token".into()));
    }

    state
        .users
        .user_by_token(token)
        .await
        .map_err(|e| ServerError::Internal(format!("User lookup failed: {e}")))?
        .ok_or_else(|| ServerError::Unauthorized("Unknown API token".into()))
}

/// Subscribe to change events of a folder over SSE.
///
/// The client identifies itself with an `X-Client-ID` UUID; reconnecting
/// under the same id within the retention window resumes the subscription
/// and replays buffered events.
async fn subscribe_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Sse<KeepAliveStream<EventSource>>, ServerError> {
    let user = authenticate(&state, &headers).await?;

    let client_id = headers
        .get("x-client-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::BadRequest("X-Client-ID header is required".into()))?;
    let client_id = Uuid::parse_str(client_id)
        .map_err(|e| ServerError::BadRequest(format!("Invalid client id: {e}")))?;

    let ctx = RequestContext::for_user(Arc::new(user)).with_client_id(client_id);
    let (rx, resumed) = state.hub.subscribe(query.topic, client_id, &ctx).await?;

    info!(topic = query.topic, client = %client_id, resumed, "SSE client subscribed");

    let source = EventSource::new(Arc::clone(&state.hub), query.topic, client_id, rx, resumed);
    Ok(Sse::new(source).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS))
            .text("keep-alive"),
    ))
}

/// Encrypt the request body under fresh per-object metadata and store it.
async fn object_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ObjectUploadResponse>, ServerError> {
    let _user = authenticate(&state, &headers).await?;

    if body.is_empty() {
        return Err(ServerError::BadRequest("Empty body".into()));
    }

    let vault = Arc::clone(&state.vault);
    let plaintext = body.to_vec();
    let (ciphertext, metadata) = tokio::task::spawn_blocking(move || {
        let mut cryptor = new_cryptor(Algorithm::Aes256Ctr, vault)?;
        let metadata = cryptor.generate_metadata()?;
        cryptor.load_metadata(&metadata)?;

        let size = plaintext.len() as u64;
        cryptor.set_source(Source::stream(Cursor::new(plaintext)), Some(size), 0)?;

        let mut ciphertext = Vec::with_capacity(size as usize);
        cryptor
            .read_to_end(&mut ciphertext)
            .map_err(CryptoError::from)?;
        Ok::<_, ServerError>((ciphertext, metadata))
    })
    .await
    .map_err(|e| ServerError::Internal(format!("Encryption task failed: {e}")))??;

    let id = state.objects.store_object(&ciphertext, &metadata).await?;
    info!(id = %id, size = ciphertext.len(), "Encrypted object stored");

    Ok(Json(ObjectUploadResponse {
        id,
        size: ciphertext.len() as u64,
    }))
}

/// Decrypt and return a byte range of a stored object.
///
/// The cryptor seeks the encrypted body directly; no ciphertext prefix is
/// read or decrypted.
async fn object_download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(range): Query<RangeQuery>,
    headers: HeaderMap,
) -> Result<Vec<u8>, ServerError> {
    let _user = authenticate(&state, &headers).await?;

    let metadata = state.objects.read_metadata(id).await?;
    let size = state.objects.body_size(id).await?;
    if range.offset > size {
        return Err(ServerError::BadRequest(format!(
            "Offset {} past end of object ({size} bytes)",
            range.offset
        )));
    }

    let path = state.objects.body_path(&id);
    let vault = Arc::clone(&state.vault);
    let plaintext = tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&path)
            .map_err(|e| ServerError::ObjectStorage(format!("Failed to open object: {e}")))?;

        let mut cryptor = new_cryptor(metadata.algorithm, vault)?;
        cryptor.load_metadata(&metadata)?;
        cryptor.set_source(Source::seekable(file), Some(size), 0)?;

        if range.offset > 0 {
            cryptor
                .seek(SeekFrom::Start(range.offset))
                .map_err(CryptoError::from)?;
        }

        let mut plaintext = Vec::new();
        match range.len {
            Some(len) => cryptor.take(len).read_to_end(&mut plaintext),
            None => cryptor.read_to_end(&mut plaintext),
        }
        .map_err(CryptoError::from)?;
        Ok::<_, ServerError>(plaintext)
    })
    .await
    .map_err(|e| ServerError::Internal(format!("Decryption task failed: {e}")))??;

    Ok(plaintext)
}

async fn object_delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let _user = authenticate(&state, &headers).await?;

    state.objects.delete_object(id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
