use crate::metrics::{ApiMetrics, count_hits};
use crate::store::{ConfigStore, StoreError};
use crate::types::Configuration;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::de::DeserializeOwned;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

const SWAGGER_YAML: &str = include_str!("../swagger.yaml");

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Idempotency-Key header missing")]
    MissingIdempotencyKey,

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) | ApiError::MissingIdempotencyKey => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::InvalidKey { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::Serialization(_) | StoreError::Kv(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        (status, self.to_string()).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    store: ConfigStore,
    metrics: ApiMetrics,
}

impl AppState {
    pub fn new(store: ConfigStore, metrics: ApiMetrics) -> Self {
        Self { store, metrics }
    }

    /// Records `token` as processed. Returns `false` if the request is a
    /// replay and must not be executed again.
    async fn claim(&self, token: &str, endpoint: &str) -> Result<bool, ApiError> {
        // The read avoids a write for the common replay case; the conditional
        // save settles concurrent first uses.
        let fresh = !self.store.check_idempotency_key(token).await?
            && self.store.save_idempotency_key(token).await?;

        if !fresh {
            tracing::info!(token, endpoint, "idempotency key already processed");
            self.metrics.replay(endpoint);
        }
        Ok(fresh)
    }

    /// Frees `token` again if the write it guarded failed, so that a retry
    /// is executed instead of being answered as a replay.
    async fn settle<T>(&self, token: &str, result: Result<T, StoreError>) -> Result<T, ApiError> {
        if let Err(err) = &result {
            tracing::warn!(token, error = %err, "write failed, releasing idempotency key");
            if let Err(release_err) = self.store.release_idempotency_key(token).await {
                tracing::error!(token, error = %release_err, "failed to release idempotency key");
            }
        }
        Ok(result?)
    }
}

pub fn router(state: AppState) -> Router {
    let metrics = state.metrics.clone();

    Router::new()
        .route("/configurations", post(add_configuration))
        .route(
            "/configurations/{id}/{version}",
            get(get_configuration).delete(delete_configuration),
        )
        .route("/group", post(add_configuration_group))
        .route(
            "/group/{id}/{version}",
            get(get_configuration_group).delete(delete_configuration_group),
        )
        .route(
            "/group/{id}/{version}/extend",
            post(extend_configuration_group),
        )
        .route(
            "/group/{id}/{version}/{labels}",
            get(get_configuration_group_by_labels),
        )
        .route("/swagger.yaml", get(swagger))
        .route_layer(middleware::from_fn_with_state(metrics, count_hits))
        // Scrapes are not API hits
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn idempotency_token(headers: &HeaderMap) -> Result<Option<&str>, ApiError> {
    match headers.get(IDEMPOTENCY_HEADER) {
        None => Ok(None),
        Some(value) => {
            let token = value.to_str().map_err(|_| {
                ApiError::BadRequest(format!("{IDEMPOTENCY_HEADER} header is not valid ASCII"))
            })?;
            Ok(Some(token).filter(|t| !t.is_empty()))
        }
    }
}

fn required_idempotency_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    idempotency_token(headers)?.ok_or(ApiError::MissingIdempotencyKey)
}

async fn add_configuration(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let mut config: Configuration = decode(&body)?;
    let token = required_idempotency_token(&headers)?;

    if !state.claim(token, "/configurations").await? {
        return Ok(StatusCode::CREATED.into_response());
    }

    config.ensure_id();
    config.idempotency_key = token.to_string();

    let result = state.store.add_configuration(&config).await;
    state.settle(token, result).await?;

    Ok(Json(config).into_response())
}

async fn get_configuration(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, String)>,
) -> Result<Json<Configuration>, ApiError> {
    Ok(Json(state.store.get_configuration(&id, &version).await?))
}

async fn delete_configuration(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .delete_configuration(&id, &version)
        .await
        .map_err(|e| ApiError::NotFound(e.to_string()))?;

    Ok(StatusCode::NO_CONTENT)
}

async fn add_configuration_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let mut configs: Vec<Configuration> = decode(&body)?;
    let token = required_idempotency_token(&headers)?;

    if configs.iter().any(|c| c.group_id.is_empty()) {
        return Err(ApiError::BadRequest(
            "group_id is required for every configuration".into(),
        ));
    }

    if !state.claim(token, "/group").await? {
        return Ok(StatusCode::CREATED.into_response());
    }

    for config in configs.iter_mut() {
        config.ensure_id();
        config.idempotency_key = token.to_string();

        let result = state.store.add_configuration_group(config).await;
        state.settle(token, result).await?;
    }

    Ok(Json(configs).into_response())
}

async fn get_configuration_group(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, String)>,
) -> Result<Json<Vec<Configuration>>, ApiError> {
    Ok(Json(state.store.get_configuration_group(&id, &version).await?))
}

async fn delete_configuration_group(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_configuration_group(&id, &version).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The idempotency header is optional here; when present it is honored like
/// on the other write endpoints.
async fn extend_configuration_group(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let mut new_configs: Vec<Configuration> = decode(&body)?;

    let Some(token) = idempotency_token(&headers)? else {
        let group = state
            .store
            .extend_configuration_group(&id, &version, new_configs)
            .await?;
        return Ok(Json(group).into_response());
    };

    if !state.claim(token, "/group/{id}/{version}/extend").await? {
        return Ok(StatusCode::CREATED.into_response());
    }

    for config in new_configs.iter_mut() {
        config.idempotency_key = token.to_string();
    }

    let result = state
        .store
        .extend_configuration_group(&id, &version, new_configs)
        .await;
    let group = state.settle(token, result).await?;

    Ok(Json(group).into_response())
}

async fn get_configuration_group_by_labels(
    State(state): State<AppState>,
    Path((id, version, labels)): Path<(String, String, String)>,
) -> Result<Json<Vec<Configuration>>, ApiError> {
    Ok(Json(
        state
            .store
            .get_configuration_group_by_labels(&id, &version, &labels)
            .await?,
    ))
}

async fn swagger() -> impl IntoResponse {
    ([(CONTENT_TYPE, "application/yaml")], SWAGGER_YAML)
}

async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
