//! HTTP request handlers for the admin console JSON API.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{error, info, warn};

use super::analytics::{self, Analytics};
use super::session::{AdminSession, SESSION_COOKIE};
use crate::config::MAX_AUDIO_FILE_SIZE;
use crate::dialogue::validate_free_text;
use crate::errors::OrderError;
use crate::models::{
    Category, Message, NewCategory, NewService, Order, OrderStatus, Review, ReviewKind, Service,
};
use crate::notifier::dispatch;
use crate::review::ReviewOutcome;
use crate::server::AppState;
use crate::store::DeleteOutcome;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Errors returned by admin routes
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Admin request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            OrderError::Invalid(msg) => ApiError::BadRequest(msg),
            OrderError::Store(e) => ApiError::Internal(format!("{e:#}")),
            conflict => ApiError::Conflict(conflict.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{err:#}"))
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn delete_response(outcome: DeleteOutcome, what: &str) -> ApiResult<StatusCode> {
    match outcome {
        DeleteOutcome::Deleted => Ok(StatusCode::NO_CONTENT),
        DeleteOutcome::NotFound => Err(ApiError::NotFound(format!("{what} not found"))),
        DeleteOutcome::InUse => Err(ApiError::Conflict(format!("{what} is still in use"))),
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: u64,
}

/// POST /admin/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> ApiResult<(CookieJar, Json<LoginResponse>)> {
    let credentials = &state.config.admin;
    if body.username != credentials.username || body.password != credentials.password {
        warn!(username = %body.username, "Admin login rejected");
        return Err(ApiError::Unauthorized);
    }

    let token = state.sessions.create();
    info!(username = %body.username, "Admin logged in");

    let cookie = Cookie::build((SESSION_COOKIE, token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);
    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            token,
            expires_in: state.sessions.ttl().as_secs(),
        }),
    ))
}

/// POST /admin/logout
pub async fn logout(
    State(state): State<AppState>,
    session: AdminSession,
    jar: CookieJar,
) -> (CookieJar, StatusCode) {
    state.sessions.revoke(&session.token);
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        StatusCode::NO_CONTENT,
    )
}

/// GET /admin/categories
pub async fn list_categories(
    State(state): State<AppState>,
    _session: AdminSession,
) -> ApiResult<Json<Vec<Category>>> {
    Ok(Json(state.store.list_categories().await?))
}

/// POST /admin/categories
pub async fn create_category(
    State(state): State<AppState>,
    _session: AdminSession,
    Json(body): Json<NewCategory>,
) -> ApiResult<(StatusCode, Json<Category>)> {
    let name = validate_free_text(&body.name)
        .map_err(|reason| ApiError::BadRequest(format!("category name is {reason}")))?;
    let icon = body
        .icon
        .map(|icon| icon.trim().to_string())
        .filter(|icon| !icon.is_empty());

    let category = state
        .store
        .create_category(&NewCategory { name, icon })
        .await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// DELETE /admin/categories/{id}
pub async fn delete_category(
    State(state): State<AppState>,
    _session: AdminSession,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    delete_response(state.store.delete_category(id).await?, &format!("category {id}"))
}

#[derive(Debug, Deserialize)]
pub struct ServiceFilter {
    pub category_id: Option<i64>,
}

/// GET /admin/services
pub async fn list_services(
    State(state): State<AppState>,
    _session: AdminSession,
    Query(filter): Query<ServiceFilter>,
) -> ApiResult<Json<Vec<Service>>> {
    Ok(Json(state.store.list_services(filter.category_id).await?))
}

/// POST /admin/services
pub async fn create_service(
    State(state): State<AppState>,
    _session: AdminSession,
    Json(body): Json<NewService>,
) -> ApiResult<(StatusCode, Json<Service>)> {
    let name = validate_free_text(&body.name)
        .map_err(|reason| ApiError::BadRequest(format!("service name is {reason}")))?;
    if let Some(price) = body.price {
        if !price.is_finite() || price < 0.0 {
            return Err(ApiError::BadRequest("price must be a non-negative number".to_string()));
        }
    }
    if state.store.get_category(body.category_id).await?.is_none() {
        return Err(ApiError::BadRequest(format!(
            "category {} does not exist",
            body.category_id
        )));
    }

    let service = state
        .store
        .create_service(&NewService {
            name,
            description: body
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            ..body
        })
        .await?;
    Ok((StatusCode::CREATED, Json(service)))
}

/// DELETE /admin/services/{id}
pub async fn delete_service(
    State(state): State<AppState>,
    _session: AdminSession,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    delete_response(state.store.delete_service(id).await?, &format!("service {id}"))
}

#[derive(Debug, Deserialize)]
pub struct OrderFilter {
    pub status: Option<String>,
}

/// GET /admin/orders
pub async fn list_orders(
    State(state): State<AppState>,
    _session: AdminSession,
    Query(filter): Query<OrderFilter>,
) -> ApiResult<Json<Vec<Order>>> {
    let status = match filter.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<OrderStatus>().map_err(ApiError::BadRequest)?),
    };
    Ok(Json(state.store.list_orders(status).await?))
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub messages: Vec<Message>,
    pub reviews: Vec<Review>,
}

/// GET /admin/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    _session: AdminSession,
    Path(id): Path<i64>,
) -> ApiResult<Json<OrderDetail>> {
    let order = state
        .store
        .get_order(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("order {id} not found")))?;
    Ok(Json(OrderDetail {
        order,
        messages: state.store.list_messages(id).await?,
        reviews: state.store.list_reviews(id).await?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub text: String,
}

/// POST /admin/orders/{id}/messages
pub async fn post_message(
    State(state): State<AppState>,
    _session: AdminSession,
    Path(id): Path<i64>,
    Json(body): Json<PostMessageRequest>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let (message, notifications) = state.lifecycle.admin_post_message(id, &body.text).await?;
    dispatch(state.notifier.as_ref(), notifications).await;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct SetStatusResponse {
    pub order: Order,
    pub previous: OrderStatus,
}

/// POST /admin/orders/{id}/status
pub async fn set_status(
    State(state): State<AppState>,
    _session: AdminSession,
    Path(id): Path<i64>,
    Json(body): Json<SetStatusRequest>,
) -> ApiResult<Json<SetStatusResponse>> {
    let status: OrderStatus = body.status.parse().map_err(ApiError::BadRequest)?;
    let change = state.lifecycle.admin_set_status(id, status).await?;
    dispatch(state.notifier.as_ref(), change.notifications).await;
    Ok(Json(SetStatusResponse {
        order: change.order,
        previous: change.previous,
    }))
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UploadResponse {
    Created { review: Review },
    Skipped { reason: String },
}

/// POST /admin/orders/{id}/audio/{kind}
///
/// Stores the `audio` field under the upload directory, then analyses it.
pub async fn upload_audio(
    State(state): State<AppState>,
    _session: AdminSession,
    Path((id, kind)): Path<(i64, String)>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let kind: ReviewKind = kind.parse().map_err(ApiError::BadRequest)?;
    if state.store.get_order(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("order {id} not found")));
    }

    let mut audio = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("audio") {
            continue;
        }
        let extension = field
            .file_name()
            .and_then(|name| std::path::Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("ogg")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("cannot read audio field: {e}")))?;
        audio = Some((bytes, extension));
        break;
    }

    let Some((bytes, extension)) = audio else {
        return Err(ApiError::BadRequest("missing 'audio' field".to_string()));
    };
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("audio file is empty".to_string()));
    }

    let path = save_upload(&state.config.upload_dir, id, kind, &extension, &bytes).await?;
    info!(order_id = id, kind = kind.as_str(), path = %path.display(), "Audio uploaded");

    match state.recorder.record(id, kind, &path).await? {
        ReviewOutcome::Created(review) => {
            Ok((StatusCode::CREATED, Json(UploadResponse::Created { review })))
        }
        ReviewOutcome::Skipped(reason) => Ok((
            StatusCode::OK,
            Json(UploadResponse::Skipped {
                reason: reason.to_string(),
            }),
        )),
    }
}

async fn save_upload(
    dir: &std::path::Path,
    order_id: i64,
    kind: ReviewKind,
    extension: &str,
    bytes: &[u8],
) -> anyhow::Result<PathBuf> {
    use anyhow::Context;

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create upload directory {}", dir.display()))?;
    let file_name = format!(
        "order{order_id}_{}_{}.{extension}",
        kind.as_str(),
        chrono::Utc::now().format("%Y%m%d%H%M%S%3f")
    );
    let path = dir.join(file_name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Body limit for the audio upload route
pub fn upload_limit() -> DefaultBodyLimit {
    DefaultBodyLimit::max(MAX_AUDIO_FILE_SIZE)
}

/// GET /admin/analytics
pub async fn get_analytics(
    State(state): State<AppState>,
    _session: AdminSession,
) -> ApiResult<Json<Analytics>> {
    Ok(Json(
        analytics::compute(state.store.as_ref(), state.config.master_share_percent).await?,
    ))
}
