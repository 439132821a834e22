mod acl;
mod admin;
pub mod auth;
mod children;
mod company;
mod config;
mod content;
mod learning;
pub mod metrics;
mod reports;

use crate::server::auth::AuthCtx;
use crate::storage::StorageError;
use crate::storage::models::{Activity, Lesson, Module};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    http::{Method, StatusCode, header},
    routing::{get, post, put},
};
pub use config::{AppConfig, ConfigError, ReportConfig};
use kidbiz_shared::api::{self, SystemMetricsDto};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: crate::storage::Store,
    // Last system metrics snapshot, replaced by the background refresher
    metrics: Arc<RwLock<SystemMetricsDto>>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: crate::storage::Store) -> Self {
        Self {
            config,
            store,
            metrics: Default::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn metrics_snapshot(&self) -> SystemMetricsDto {
        self.metrics.read().await.clone()
    }

    async fn replace_metrics(&self, snapshot: SystemMetricsDto) {
        *self.metrics.write().await = snapshot;
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route(
            "/modules",
            get(content::api_list_modules).post(content::api_create_module),
        )
        .route(
            "/modules/{id}",
            get(content::api_get_module)
                .put(content::api_update_module)
                .delete(content::api_delete_module),
        )
        .route("/modules/{id}/publish", post(content::api_publish_module))
        .route(
            "/modules/{id}/lessons",
            get(content::api_list_lessons).post(content::api_create_lesson),
        )
        .route(
            "/modules/{id}/lessons/order",
            put(content::api_reorder_lessons),
        )
        .route(
            "/lessons/{id}",
            get(content::api_get_lesson)
                .put(content::api_update_lesson)
                .delete(content::api_delete_lesson),
        )
        .route(
            "/lessons/{id}/questions",
            get(content::api_list_questions).post(content::api_create_question),
        )
        .route(
            "/questions/{id}",
            put(content::api_update_question).delete(content::api_delete_question),
        )
        .route(
            "/users",
            get(admin::api_list_users).post(admin::api_create_parent),
        )
        .route("/users/{id}", axum::routing::delete(admin::api_deactivate_user))
        .route(
            "/users/{id}/subscription",
            put(admin::api_update_subscription),
        )
        .route("/metrics", get(admin::api_metrics))
        .route("/analytics.csv", get(reports::api_analytics_csv))
        .route("/submissions", get(learning::api_list_submissions))
        .route(
            "/submissions/{id}/review",
            post(learning::api_review_submission),
        );

    let parent = Router::new()
        .route("/dashboard", get(children::api_parent_dashboard))
        .route(
            "/children",
            get(children::api_list_children).post(children::api_create_child),
        )
        .route("/children/deleted", get(children::api_list_deleted_children))
        .route(
            "/children/{id}",
            put(children::api_rename_child).delete(children::api_delete_child),
        )
        .route("/children/{id}/restore", post(children::api_restore_child))
        .route("/children/{id}/report.csv", get(reports::api_child_report_csv))
        .route(
            "/children/{id}/report.html",
            get(reports::api_child_report_html),
        )
        .route("/modules", get(learning::api_published_modules))
        .route("/submissions", get(learning::api_list_submissions))
        .route(
            "/submissions/{id}/review",
            post(learning::api_review_submission),
        );

    let child = Router::new()
        .route("/profile", get(learning::api_child_profile))
        .route("/modules", get(learning::api_child_modules))
        .route("/modules/{id}/lessons", get(learning::api_child_module_lessons))
        .route("/lessons/{id}", get(learning::api_child_lesson))
        .route("/lessons/{id}/answer", post(learning::api_answer_question))
        .route("/lessons/{id}/complete", post(learning::api_complete_lesson))
        .route("/achievements", get(learning::api_child_achievements))
        .route("/activities", get(learning::api_child_activities))
        .route(
            "/company",
            get(company::api_get_company).post(company::api_create_company),
        )
        .route(
            "/company/transactions",
            get(company::api_list_transactions).post(company::api_add_transaction),
        )
        .route(
            "/submissions",
            get(learning::api_child_submissions).post(learning::api_submit_track),
        );

    let private = Router::new()
        .route("/api/v1/auth/logout", post(auth::api_auth_logout))
        .route(
            "/api/v1/child-session/validate",
            get(auth::api_child_session_validate),
        )
        .nest("/api/v1/admin", admin)
        .nest("/api/v1/parent", parent)
        .nest("/api/v1/child", child)
        .with_state(state.clone())
        .layer(middleware::from_fn(acl::enforce_acl))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ))
        .layer(middleware::from_fn(set_auth_span_fields));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            subject = tracing::field::Empty,
            role = tracing::field::Empty,
            child_id = tracing::field::Empty
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/v1/version", get(api_version))
        .route("/api/v1/auth/login", post(auth::api_auth_login))
        .route("/api/v1/auth/child", post(auth::api_auth_child))
        .merge(private)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured

    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn api_version() -> Json<api::VersionInfoDto> {
    Json(api::VersionInfoDto {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let path = req.uri().path().to_string();
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("SAMEORIGIN"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-opener-policy"),
        HeaderValue::from_static("same-origin"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("same-origin"),
    );
    // HSTS is only honored on HTTPS; harmless otherwise
    headers.insert(
        HeaderName::from_static("strict-transport-security"),
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );

    // Reports and API payloads carry children's data; never cache them
    if path == "/healthz" || path.starts_with("/api/") || path == "/api" {
        headers.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
        headers.insert(
            HeaderName::from_static("pragma"),
            HeaderValue::from_static("no-cache"),
        );
        headers.insert(
            HeaderName::from_static("expires"),
            HeaderValue::from_static("0"),
        );
    }

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        let span = Span::current();
        span.record("subject", tracing::field::display(&auth.claims.sub));
        span.record("role", tracing::field::debug(&auth.claims.role));
        if let Some(cid) = &auth.claims.child_id {
            span.record("child_id", tracing::field::display(cid));
        }
    }
    Ok(next.run(req).await)
}

pub(crate) fn rfc3339(dt: chrono::NaiveDateTime) -> String {
    chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(dt, chrono::Utc).to_rfc3339()
}

pub(crate) fn module_dto(m: Module) -> api::ModuleDto {
    api::ModuleDto {
        id: m.id,
        slug: m.slug,
        title: m.title,
        description: m.description,
        order_index: m.order_index,
        is_published: m.is_published,
        published_at: m.published_at.map(rfc3339),
    }
}

pub(crate) fn lesson_dto(l: Lesson) -> api::LessonDto {
    api::LessonDto {
        id: l.id,
        module_id: l.module_id,
        title: l.title,
        content: l.content,
        xp_reward: l.xp_reward,
        order_index: l.order_index,
    }
}

pub(crate) fn activity_dto(a: Activity) -> api::ActivityDto {
    api::ActivityDto {
        time: rfc3339(a.created_at),
        kind: a.kind,
        description: a.description,
        xp_delta: a.xp_delta,
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    Conflict {
        message: String,
        hint: Option<String>,
    },
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn unauthorized() -> Self {
        Self::Unauthorized
    }
    fn forbidden() -> Self {
        Self::Forbidden
    }
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidInput(m) => AppError::BadRequest(m),
            StorageError::NotFound(m) => AppError::NotFound(format!("{m} not found")),
            StorageError::Conflict(m) => AppError::Conflict {
                message: m,
                hint: None,
            },
            StorageError::ForeignKey { table, hint } => AppError::Conflict {
                message: format!("rows still reference this {table} entry"),
                hint: Some(hint),
            },
            other => AppError::internal(other),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail, hint) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None, None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".into(),
                "unauthorized",
                None,
                None,
            ),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                "forbidden".into(),
                "forbidden",
                None,
                None,
            ),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None, None),
            AppError::Conflict { message, hint } => {
                (StatusCode::CONFLICT, message, "conflict", None, hint)
            }
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
                None,
            ),
        };
        if failure_level(status) == tracing::Level::ERROR {
            match detail {
                Some(detail) => tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed"),
                None => tracing::error!(status = %status, kind = kind, message = %msg, "request failed"),
            }
        } else {
            tracing::warn!(status = %status, kind = kind, message = %msg, "request rejected");
        }
        let body = axum::Json(ErrorBody { error: msg, hint });
        (status, body).into_response()
    }
}

/// Client mistakes and auth denials are warnings; only server faults are errors.
fn failure_level(status: StatusCode) -> tracing::Level {
    if status.is_server_error() {
        tracing::Level::ERROR
    } else {
        tracing::Level::WARN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_key_errors_keep_their_hint() {
        let err = AppError::from(StorageError::ForeignKey {
            table: "modules".into(),
            hint: "delete lessons first".into(),
        });
        match err {
            AppError::Conflict { hint, .. } => assert_eq!(hint.as_deref(), Some("delete lessons first")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            AppError::from(StorageError::NotFound("module 3".into())),
            AppError::NotFound(_)
        ));
    }

    #[test]
    fn client_errors_log_as_warnings() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
            StatusCode::CONFLICT,
        ] {
            assert_eq!(failure_level(status), tracing::Level::WARN, "{status}");
        }
        assert_eq!(
            failure_level(StatusCode::INTERNAL_SERVER_ERROR),
            tracing::Level::ERROR
        );
    }

    #[test]
    fn timestamps_render_as_utc() {
        let dt = chrono::NaiveDate::from_ymd_opt(2026, 10, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(rfc3339(dt), "2026-10-01T08:30:00+00:00");
    }
}
