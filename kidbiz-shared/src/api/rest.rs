//! Minimal REST client helpers for consumers (frontends, scripts, tests).

use super::endpoints as ep;
use super::*;
use once_cell::sync::Lazy;
use std::time::Duration;

pub use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("http: {0}")]
    Http(String),
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("serde: {0}")]
    Serde(String),
}

impl RestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(90))
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

fn mk_client() -> reqwest::Client {
    HTTP_CLIENT.clone()
}

async fn handle_json<T: for<'de> serde::Deserialize<'de>>(
    res: reqwest::Response,
) -> Result<T, RestError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(RestError::Status {
            status: status.as_u16(),
            body,
        });
    }
    res.json::<T>()
        .await
        .map_err(|e| RestError::Serde(e.to_string()))
}

async fn handle_empty(res: reqwest::Response) -> Result<(), RestError> {
    if res.status().is_success() {
        Ok(())
    } else {
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        Err(RestError::Status { status, body })
    }
}

async fn handle_text(res: reqwest::Response) -> Result<String, RestError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(RestError::Status {
            status: status.as_u16(),
            body,
        });
    }
    res.text().await.map_err(|e| RestError::Http(e.to_string()))
}

async fn get_json<T: for<'de> serde::Deserialize<'de>>(
    url: String,
    bearer: &str,
) -> Result<T, RestError> {
    let res = mk_client()
        .get(url)
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

async fn send_json<B: serde::Serialize, T: for<'de> serde::Deserialize<'de>>(
    method: reqwest::Method,
    url: String,
    bearer: Option<&str>,
    body: &B,
) -> Result<T, RestError> {
    let mut req = mk_client().request(method, url).json(body);
    if let Some(b) = bearer {
        req = req.bearer_auth(b);
    }
    let res = req
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn login(base: &str, req: &AuthReq) -> Result<AuthResp, RestError> {
    send_json(reqwest::Method::POST, ep::auth_login(base), None, req).await
}

pub async fn child_login(base: &str, access_code: &str) -> Result<ChildAuthResp, RestError> {
    let body = ChildAuthReq {
        access_code: access_code.to_string(),
    };
    send_json(reqwest::Method::POST, ep::auth_child(base), None, &body).await
}

pub async fn logout(base: &str, bearer: &str) -> Result<(), RestError> {
    let res = mk_client()
        .post(ep::auth_logout(base))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_empty(res).await
}

/// Target of the periodic child-session check.
pub async fn validate_child_session(
    base: &str,
    bearer: &str,
) -> Result<ChildSessionStatusDto, RestError> {
    get_json(ep::child_session_validate(base), bearer).await
}

pub async fn server_version(base: &str) -> Result<VersionInfoDto, RestError> {
    let res = mk_client()
        .get(ep::version(base))
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

// Parent
pub async fn list_children(base: &str, bearer: &str) -> Result<Vec<ChildDto>, RestError> {
    get_json(ep::parent_children(base), bearer).await
}

pub async fn create_child(base: &str, bearer: &str, name: &str) -> Result<ChildDto, RestError> {
    let body = CreateChildReq {
        name: name.to_string(),
    };
    send_json(
        reqwest::Method::POST,
        ep::parent_children(base),
        Some(bearer),
        &body,
    )
    .await
}

pub async fn delete_child(base: &str, bearer: &str, child_id: &str) -> Result<(), RestError> {
    let res = mk_client()
        .delete(ep::parent_child(base, child_id))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_empty(res).await
}

pub async fn list_deleted_children(
    base: &str,
    bearer: &str,
) -> Result<Vec<DeletedChildDto>, RestError> {
    get_json(ep::parent_deleted_children(base), bearer).await
}

pub async fn parent_dashboard(base: &str, bearer: &str) -> Result<ParentDashboardDto, RestError> {
    get_json(ep::parent_dashboard(base), bearer).await
}

pub async fn child_report_csv(
    base: &str,
    bearer: &str,
    child_id: &str,
) -> Result<String, RestError> {
    let res = mk_client()
        .get(ep::parent_child_report_csv(base, child_id))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_text(res).await
}

// Child
pub async fn child_profile(base: &str, bearer: &str) -> Result<ChildProfileDto, RestError> {
    get_json(ep::child_profile(base), bearer).await
}

pub async fn child_modules(base: &str, bearer: &str) -> Result<Vec<ModuleProgressDto>, RestError> {
    get_json(ep::child_modules(base), bearer).await
}

pub async fn child_lesson(
    base: &str,
    bearer: &str,
    lesson_id: i32,
) -> Result<LessonViewDto, RestError> {
    get_json(ep::child_lesson(base, lesson_id), bearer).await
}

pub async fn answer_question(
    base: &str,
    bearer: &str,
    lesson_id: i32,
    req: &AnswerReq,
) -> Result<AnswerResp, RestError> {
    send_json(
        reqwest::Method::POST,
        ep::child_lesson_answer(base, lesson_id),
        Some(bearer),
        req,
    )
    .await
}

pub async fn complete_lesson(
    base: &str,
    bearer: &str,
    lesson_id: i32,
    req: &CompleteLessonReq,
) -> Result<CompleteLessonResp, RestError> {
    send_json(
        reqwest::Method::POST,
        ep::child_lesson_complete(base, lesson_id),
        Some(bearer),
        req,
    )
    .await
}

pub async fn create_company(base: &str, bearer: &str, name: &str) -> Result<CompanyDto, RestError> {
    let body = CreateCompanyReq {
        name: name.to_string(),
    };
    send_json(
        reqwest::Method::POST,
        ep::child_company(base),
        Some(bearer),
        &body,
    )
    .await
}

pub async fn add_transaction(
    base: &str,
    bearer: &str,
    req: &TransactionReq,
) -> Result<CompanyDto, RestError> {
    send_json(
        reqwest::Method::POST,
        ep::child_company_transactions(base),
        Some(bearer),
        req,
    )
    .await
}

pub async fn list_transactions(
    base: &str,
    bearer: &str,
) -> Result<Vec<TransactionDto>, RestError> {
    get_json(ep::child_company_transactions(base), bearer).await
}

// Admin
pub async fn admin_metrics(base: &str, bearer: &str) -> Result<SystemMetricsDto, RestError> {
    get_json(ep::admin_metrics(base), bearer).await
}

pub async fn admin_create_module(
    base: &str,
    bearer: &str,
    req: &ModuleReq,
) -> Result<ModuleDto, RestError> {
    send_json(
        reqwest::Method::POST,
        ep::admin_modules(base),
        Some(bearer),
        req,
    )
    .await
}

pub async fn admin_publish_module(
    base: &str,
    bearer: &str,
    module_id: i32,
    published: bool,
) -> Result<ModuleDto, RestError> {
    send_json(
        reqwest::Method::POST,
        ep::admin_module_publish(base, module_id),
        Some(bearer),
        &PublishReq { published },
    )
    .await
}

pub async fn admin_create_lesson(
    base: &str,
    bearer: &str,
    module_id: i32,
    req: &LessonReq,
) -> Result<LessonDto, RestError> {
    send_json(
        reqwest::Method::POST,
        ep::admin_module_lessons(base, module_id),
        Some(bearer),
        req,
    )
    .await
}

pub async fn admin_create_question(
    base: &str,
    bearer: &str,
    lesson_id: i32,
    req: &QuizQuestionReq,
) -> Result<QuizQuestionDto, RestError> {
    send_json(
        reqwest::Method::POST,
        ep::admin_lesson_questions(base, lesson_id),
        Some(bearer),
        req,
    )
    .await
}
