//! CSV exports and the printable HTML child report.

use axum::{
    extract::{Extension, Path, State},
    http::header,
    response::IntoResponse,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kidbiz_shared::api::SystemMetricsDto;
use kidbiz_shared::domain::completion_percent;
use serde::Serialize;
use tinytemplate::TinyTemplate;
use tracing::warn;

use super::auth::AuthCtx;
use super::children::owned_child;
use super::{AppError, AppState, rfc3339};
use crate::storage::models::Child;

const CHILD_REPORT_TEMPLATE: &str = include_str!("../../templates/child_report.html");

/// Quotes a CSV field when it contains a separator, quote or line break.
fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_row(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

/// `1234` -> `12.34`, `-5` -> `-0.05`.
fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

fn analytics_csv(m: &SystemMetricsDto) -> String {
    let rows: [(&str, String); 12] = [
        ("Total Users", m.total_users.to_string()),
        ("Total Parents", m.total_parents.to_string()),
        ("Total Children", m.total_children.to_string()),
        ("Active Subscriptions", m.active_subscriptions.to_string()),
        ("Total Modules", m.total_modules.to_string()),
        ("Published Modules", m.published_modules.to_string()),
        ("Total Lessons", m.total_lessons.to_string()),
        ("Lessons Completed", m.lessons_completed.to_string()),
        ("Modules Completed", m.modules_completed.to_string()),
        ("Total Companies", m.total_companies.to_string()),
        ("Total Revenue", format_cents(m.total_revenue_cents)),
        ("Total Expenses", format_cents(m.total_expenses_cents)),
    ];
    let mut out = csv_row(&["Metric".into(), "Value".into()]);
    for (label, value) in rows {
        out.push_str(&csv_row(&[label.to_string(), value]));
    }
    out
}

fn attachment(filename: &str, content_type: &'static str, body: String) -> impl IntoResponse + use<> {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
}

/// Exports current system metrics. Computed fresh rather than from the cache.
pub async fn api_analytics_csv(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let metrics = state.store.system_metrics().await?;
    Ok(attachment(
        "analytics.csv",
        "text/csv; charset=utf-8",
        analytics_csv(&metrics),
    ))
}

#[derive(Serialize)]
struct ModuleRow {
    title: String,
    completed_lessons: i64,
    lesson_count: i64,
    completion_percent: i32,
}

async fn module_rows(state: &AppState, child: &Child) -> Result<Vec<ModuleRow>, AppError> {
    let done = state.store.completed_lessons_by_module(&child.id).await?;
    Ok(state
        .store
        .list_modules(true)
        .await?
        .into_iter()
        .map(|m| {
            let completed_lessons = done.get(&m.module.id).copied().unwrap_or(0);
            ModuleRow {
                title: m.module.title,
                completed_lessons,
                lesson_count: m.lesson_count,
                completion_percent: completion_percent(completed_lessons, m.lesson_count),
            }
        })
        .collect())
}

fn report_filename(child: &Child, ext: &str) -> String {
    let base = slug::slugify(&child.name);
    if base.is_empty() {
        format!("report.{ext}")
    } else {
        format!("{base}-report.{ext}")
    }
}

pub async fn api_child_report_csv(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let child = owned_child(&state, &auth, &id).await?;
    let rows = module_rows(&state, &child).await?;
    let mut out = csv_row(&[
        "Module".into(),
        "Lessons Completed".into(),
        "Total Lessons".into(),
        "Completion %".into(),
    ]);
    for r in rows {
        out.push_str(&csv_row(&[
            r.title,
            r.completed_lessons.to_string(),
            r.lesson_count.to_string(),
            r.completion_percent.to_string(),
        ]));
    }
    Ok(attachment(
        &report_filename(&child, "csv"),
        "text/csv; charset=utf-8",
        out,
    ))
}

#[derive(Serialize)]
struct CompanyCtx {
    name: String,
    balance: String,
}

#[derive(Serialize)]
struct AchievementCtx {
    name: String,
    description: String,
}

#[derive(Serialize)]
struct ReportCtx {
    title: String,
    child_name: String,
    generated_at: String,
    logo_data_uri: String,
    level: i32,
    total_xp: i64,
    streak_days: i32,
    lessons_completed: i64,
    modules_completed: i64,
    company: Option<CompanyCtx>,
    modules: Vec<ModuleRow>,
    achievements: Vec<AchievementCtx>,
}

fn logo_mime(path: &str) -> &'static str {
    let ext = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("svg") => "image/svg+xml",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

/// Reads the configured logo into a `data:` URI. A missing file only costs
/// the report its logo.
async fn logo_data_uri(path: Option<&str>) -> String {
    let Some(path) = path else {
        return String::new();
    };
    match tokio::fs::read(path).await {
        Ok(bytes) => format!("data:{};base64,{}", logo_mime(path), STANDARD.encode(bytes)),
        Err(e) => {
            warn!(path, error=%e, "report: logo not readable");
            String::new()
        }
    }
}

fn render_report(ctx: &ReportCtx) -> Result<String, AppError> {
    let mut tt = TinyTemplate::new();
    tt.add_template("child_report", CHILD_REPORT_TEMPLATE)
        .map_err(|e| AppError::internal(format!("template error: {e}")))?;
    tt.render("child_report", ctx)
        .map_err(|e| AppError::internal(format!("render error: {e}")))
}

/// Self-contained HTML document meant for printing to PDF from the browser.
pub async fn api_child_report_html(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let child = owned_child(&state, &auth, &id).await?;
    let stats = state.store.child_stats(&child.id).await?;
    let modules = module_rows(&state, &child).await?;
    let company = state
        .store
        .company_for_child(&child.id)
        .await?
        .map(|c| CompanyCtx {
            name: c.name,
            balance: format_cents(c.balance_cents),
        });
    let achievements = state
        .store
        .child_achievements(&child.id)
        .await?
        .into_iter()
        .map(|(a, _)| AchievementCtx {
            name: a.name,
            description: a.description,
        })
        .collect();
    let ctx = ReportCtx {
        title: state.config.report.title.clone(),
        child_name: child.name.clone(),
        generated_at: rfc3339(chrono::Utc::now().naive_utc()),
        logo_data_uri: logo_data_uri(state.config.report.logo_path.as_deref()).await,
        level: child.level,
        total_xp: child.total_xp,
        streak_days: child.streak_days,
        lessons_completed: stats.lessons_completed,
        modules_completed: stats.modules_completed,
        company,
        modules,
        achievements,
    };
    let html = render_report(&ctx)?;
    Ok(([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_fields_are_quoted_when_needed() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn cents_render_as_currency() {
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(1234), "12.34");
        assert_eq!(format_cents(-5), "-0.05");
    }

    #[test]
    fn analytics_rows_follow_fixed_order() {
        let m = SystemMetricsDto {
            total_users: 3,
            total_revenue_cents: 1050,
            ..Default::default()
        };
        let csv = analytics_csv(&m);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 13);
        assert_eq!(lines[0], "Metric,Value");
        assert_eq!(lines[1], "Total Users,3");
        assert_eq!(lines[11], "Total Revenue,10.50");
        assert_eq!(lines[12], "Total Expenses,0.00");
    }

    #[test]
    fn report_escapes_names_and_inlines_logo() {
        let ctx = ReportCtx {
            title: "Report".into(),
            child_name: "<Ann>".into(),
            generated_at: "2026-10-01T00:00:00+00:00".into(),
            logo_data_uri: "data:image/png;base64,AAAA".into(),
            level: 2,
            total_xp: 150,
            streak_days: 3,
            lessons_completed: 4,
            modules_completed: 1,
            company: None,
            modules: vec![ModuleRow {
                title: "Money basics".into(),
                completed_lessons: 1,
                lesson_count: 2,
                completion_percent: 50,
            }],
            achievements: vec![],
        };
        let html = render_report(&ctx).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("&lt;Ann&gt;"));
        assert!(html.contains("src=\"data:image/png;base64,AAAA\""));
        assert!(html.contains("Money basics"));
        assert!(html.contains("width: 50%"));
        assert!(!html.contains("<h2>Achievements</h2>"));
    }
}
