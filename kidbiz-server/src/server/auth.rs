use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use axum::{
    Json,
    extract::{Extension, State},
    http::StatusCode,
};
use bcrypt::verify;
use chrono::{Duration, Utc};
use kidbiz_shared::api;
use kidbiz_shared::auth::Role;
use kidbiz_shared::domain::ChildSession;
use kidbiz_shared::jwt::{self, JwtClaims};
use tracing::{error, info, warn};

use super::{AppError, AppState};

/// How many days of inactivity before a user session is considered expired.
const USER_SESSION_IDLE_DAYS: i64 = 14;
/// How many days before mandatory re-login for users.
const USER_TOKEN_TTL_DAYS: i64 = 30;
/// Child devices are shared; their sessions lapse after a day of inactivity.
const CHILD_SESSION_IDLE_DAYS: i64 = 1;
const CHILD_TOKEN_TTL_DAYS: i64 = 7;

#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub claims: JwtClaims,
}

impl AuthCtx {
    /// Child id of a child token. The ACL guarantees it on `/child/*` routes.
    pub fn child_id(&self) -> Result<&str, AppError> {
        self.claims
            .child_id
            .as_deref()
            .ok_or_else(AppError::forbidden)
    }
}

pub async fn require_bearer(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let unauthorized = || Err(AppError::unauthorized());
    let header_val = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => return unauthorized(),
    };
    let header_str = header_val.to_str().map_err(|_| AppError::unauthorized())?;
    let prefix = "Bearer ";
    if !header_str.starts_with(prefix) {
        return unauthorized();
    }
    let token = &header_str[prefix.len()..];

    let claims = match jwt::decode_and_verify(token, state.config.jwt_secret.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            warn!(error=%e, "auth: jwt decode failed");
            return unauthorized();
        }
    };

    validate_claims(&state, &claims).await.map_err(|e| {
        warn!(error=?e, subject=%claims.sub, "auth: validate_claims failed");
        AppError::unauthorized()
    })?;

    let jti = claims.jti.clone();
    let idle_days = if claims.role == Role::Child {
        CHILD_SESSION_IDLE_DAYS
    } else {
        USER_SESSION_IDLE_DAYS
    };
    let cutoff = Utc::now() - Duration::days(idle_days);
    match state
        .store
        .touch_session_with_cutoff(&jti, cutoff.naive_utc())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            warn!(
                jti = %jti,
                subject = %claims.sub,
                cutoff = %cutoff,
                idle_days = idle_days,
                "auth: session missing or expired (last_used_at < cutoff)"
            );
            return unauthorized();
        }
        Err(e) => {
            error!(jti = %jti, error=%e, "auth: touch_session_with_cutoff failed");
            return Err(AppError::internal(e));
        }
    }
    let auth = AuthCtx { claims };
    req.extensions_mut().insert(auth);
    Ok(next.run(req).await)
}

pub async fn issue_jwt(
    state: &AppState,
    subject: &str,
    role: Role,
    child_id: Option<String>,
) -> Result<String, AppError> {
    let jti = uuid::Uuid::new_v4().to_string();
    let ttl_days = if role == Role::Child {
        CHILD_TOKEN_TTL_DAYS
    } else {
        USER_TOKEN_TTL_DAYS
    };
    let exp = (Utc::now() + Duration::days(ttl_days)).timestamp();
    let claims = JwtClaims {
        sub: subject.to_string(),
        jti: jti.clone(),
        exp,
        role,
        child_id,
    };

    validate_claims(state, &claims).await?;

    state
        .store
        .create_session(&jti, subject)
        .await
        .map_err(|e| {
            error!(subject, error=%e, "login: create_session failed");
            AppError::internal(e)
        })?;
    let token = jwt::encode(&claims, state.config.jwt_secret.as_bytes()).map_err(|e| {
        error!(subject, error=%e, "login: jwt encode failed");
        AppError::internal(e)
    })?;
    Ok(token)
}

/// Checks that the token still describes a live account with the role it
/// claims. Child tokens also need a subscription that grants access.
async fn validate_claims(state: &AppState, claims: &JwtClaims) -> Result<(), AppError> {
    match claims.role {
        Role::Admin | Role::Parent => {
            if claims.child_id.is_some() {
                warn!(subject = %claims.sub, "auth: user token must not include a child");
                return Err(AppError::forbidden());
            }
            let user = state
                .store
                .get_user(&claims.sub)
                .await
                .map_err(AppError::internal)?
                .ok_or_else(|| {
                    warn!(subject = %claims.sub, "auth: unknown user");
                    AppError::forbidden()
                })?;
            if user.deleted_at.is_some() {
                warn!(subject = %claims.sub, "auth: user deactivated");
                return Err(AppError::forbidden());
            }
            if Role::parse(&user.role) != Some(claims.role) {
                warn!(
                    subject = %claims.sub,
                    requested_role = ?claims.role,
                    actual_role = %user.role,
                    "auth: role mismatch"
                );
                return Err(AppError::forbidden());
            }
        }
        Role::Child => {
            let child_id = claims.child_id.as_deref().ok_or_else(|| {
                warn!(subject = %claims.sub, "auth: child token missing child_id");
                AppError::forbidden()
            })?;
            if child_id != claims.sub {
                warn!(subject = %claims.sub, child_id, "auth: child mismatch");
                return Err(AppError::forbidden());
            }
            if !child_has_access(state, child_id).await? {
                return Err(AppError::forbidden());
            }
        }
    }
    Ok(())
}

/// A child has access while it is not deleted and its parent's
/// subscription grants access.
async fn child_has_access(state: &AppState, child_id: &str) -> Result<bool, AppError> {
    let Some(child) = state
        .store
        .get_child(child_id)
        .await
        .map_err(AppError::internal)?
    else {
        warn!(child_id, "auth: child missing or deleted");
        return Ok(false);
    };
    let grants = state
        .store
        .check_parent_subscription_by_access_code(&child.access_code)
        .await
        .map_err(AppError::internal)?
        .is_some_and(|(_, grants)| grants);
    Ok(grants)
}

pub async fn api_auth_login(
    State(state): State<AppState>,
    Json(body): Json<api::AuthReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let user = state
        .store
        .find_user_by_email(&body.email)
        .await
        .map_err(AppError::internal)?
        .filter(|u| u.deleted_at.is_none())
        .ok_or_else(|| {
            warn!(email=%body.email, "login: unknown or deactivated account");
            AppError::unauthorized()
        })?;
    if !verify(&body.password, &user.password_hash).map_err(|e| {
        error!(email=%body.email, error=%e, "login: bcrypt verify failed");
        AppError::internal(e)
    })? {
        warn!(email=%body.email, "login: invalid password");
        return Err(AppError::unauthorized());
    }
    let role = Role::parse(&user.role)
        .filter(|r| *r != Role::Child)
        .ok_or_else(|| {
            error!(user_id=%user.id, role=%user.role, "login: stored role not allowed");
            AppError::internal("invalid stored role")
        })?;
    let token = issue_jwt(&state, &user.id, role, None).await?;
    info!(user_id=%user.id, role=?role, "login: ok");
    Ok(Json(api::AuthResp {
        token,
        role,
        user_id: user.id,
    }))
}

pub async fn api_auth_child(
    State(state): State<AppState>,
    Json(body): Json<api::ChildAuthReq>,
) -> Result<Json<api::ChildAuthResp>, AppError> {
    let (child, grants) = state
        .store
        .check_parent_subscription_by_access_code(&body.access_code)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| {
            warn!("child login: unknown access code");
            AppError::unauthorized()
        })?;
    if !grants {
        return Err(AppError::Forbidden);
    }
    let token = issue_jwt(&state, &child.id, Role::Child, Some(child.id.clone())).await?;
    info!(child_id=%child.id, "child login: ok");
    Ok(Json(api::ChildAuthResp {
        token,
        session: ChildSession {
            child_id: child.id,
            child_name: child.name,
            access_code: child.access_code,
        },
    }))
}

/// Re-validation target for child devices. Reaching the handler already
/// means the bearer passed the session gate.
pub async fn api_child_session_validate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::ChildSessionStatusDto>, AppError> {
    let child_id = auth.child_id()?;
    let child = state
        .store
        .get_child(child_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(AppError::unauthorized)?;
    Ok(Json(api::ChildSessionStatusDto {
        valid: true,
        session: ChildSession {
            child_id: child.id,
            child_name: child.name,
            access_code: child.access_code,
        },
    }))
}

pub async fn api_auth_logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<StatusCode, AppError> {
    state
        .store
        .delete_session(&auth.claims.jti)
        .await
        .map_err(AppError::internal)?;
    info!(subject=%auth.claims.sub, "logout");
    Ok(StatusCode::NO_CONTENT)
}
