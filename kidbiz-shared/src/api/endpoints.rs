use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use super::{API_V1_PREFIX, role_scope};
use crate::auth::Role;

fn base_join(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

fn enc(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

fn scoped(base: &str, role: Role, rest: &str) -> String {
    base_join(base, &format!("{}/{}", role_scope(role), rest))
}

pub fn auth_login(base: &str) -> String {
    base_join(base, &format!("{}/auth/login", API_V1_PREFIX))
}
pub fn auth_child(base: &str) -> String {
    base_join(base, &format!("{}/auth/child", API_V1_PREFIX))
}
pub fn auth_logout(base: &str) -> String {
    base_join(base, &format!("{}/auth/logout", API_V1_PREFIX))
}
pub fn child_session_validate(base: &str) -> String {
    base_join(base, &format!("{}/child-session/validate", API_V1_PREFIX))
}
pub fn version(base: &str) -> String {
    base_join(base, &format!("{}/version", API_V1_PREFIX))
}

// Admin
pub fn admin_modules(base: &str) -> String {
    scoped(base, Role::Admin, "modules")
}
pub fn admin_module(base: &str, module_id: i32) -> String {
    scoped(base, Role::Admin, &format!("modules/{}", module_id))
}
pub fn admin_module_publish(base: &str, module_id: i32) -> String {
    scoped(base, Role::Admin, &format!("modules/{}/publish", module_id))
}
pub fn admin_module_lessons(base: &str, module_id: i32) -> String {
    scoped(base, Role::Admin, &format!("modules/{}/lessons", module_id))
}
pub fn admin_module_lessons_order(base: &str, module_id: i32) -> String {
    scoped(
        base,
        Role::Admin,
        &format!("modules/{}/lessons/order", module_id),
    )
}
pub fn admin_lesson(base: &str, lesson_id: i32) -> String {
    scoped(base, Role::Admin, &format!("lessons/{}", lesson_id))
}
pub fn admin_lesson_questions(base: &str, lesson_id: i32) -> String {
    scoped(base, Role::Admin, &format!("lessons/{}/questions", lesson_id))
}
pub fn admin_question(base: &str, question_id: i32) -> String {
    scoped(base, Role::Admin, &format!("questions/{}", question_id))
}
pub fn admin_users(base: &str) -> String {
    scoped(base, Role::Admin, "users")
}
pub fn admin_user(base: &str, user_id: &str) -> String {
    scoped(base, Role::Admin, &format!("users/{}", enc(user_id)))
}
pub fn admin_user_subscription(base: &str, user_id: &str) -> String {
    scoped(
        base,
        Role::Admin,
        &format!("users/{}/subscription", enc(user_id)),
    )
}
pub fn admin_metrics(base: &str) -> String {
    scoped(base, Role::Admin, "metrics")
}
pub fn admin_analytics_csv(base: &str) -> String {
    scoped(base, Role::Admin, "analytics.csv")
}

// Parent
pub fn parent_dashboard(base: &str) -> String {
    scoped(base, Role::Parent, "dashboard")
}
pub fn parent_children(base: &str) -> String {
    scoped(base, Role::Parent, "children")
}
pub fn parent_deleted_children(base: &str) -> String {
    scoped(base, Role::Parent, "children/deleted")
}
pub fn parent_child(base: &str, child_id: &str) -> String {
    scoped(base, Role::Parent, &format!("children/{}", enc(child_id)))
}
pub fn parent_child_restore(base: &str, child_id: &str) -> String {
    scoped(
        base,
        Role::Parent,
        &format!("children/{}/restore", enc(child_id)),
    )
}
pub fn parent_child_report_csv(base: &str, child_id: &str) -> String {
    scoped(
        base,
        Role::Parent,
        &format!("children/{}/report.csv", enc(child_id)),
    )
}
pub fn parent_child_report_html(base: &str, child_id: &str) -> String {
    scoped(
        base,
        Role::Parent,
        &format!("children/{}/report.html", enc(child_id)),
    )
}

/// Submissions listing for a reviewer role (admin or parent).
pub fn submissions(base: &str, role: Role) -> String {
    scoped(base, role, "submissions")
}
pub fn submission_review(base: &str, role: Role, submission_id: i32) -> String {
    scoped(base, role, &format!("submissions/{}/review", submission_id))
}

// Child
pub fn child_profile(base: &str) -> String {
    scoped(base, Role::Child, "profile")
}
pub fn child_modules(base: &str) -> String {
    scoped(base, Role::Child, "modules")
}
pub fn child_module_lessons(base: &str, module_id: i32) -> String {
    scoped(base, Role::Child, &format!("modules/{}/lessons", module_id))
}
pub fn child_lesson(base: &str, lesson_id: i32) -> String {
    scoped(base, Role::Child, &format!("lessons/{}", lesson_id))
}
pub fn child_lesson_answer(base: &str, lesson_id: i32) -> String {
    scoped(base, Role::Child, &format!("lessons/{}/answer", lesson_id))
}
pub fn child_lesson_complete(base: &str, lesson_id: i32) -> String {
    scoped(base, Role::Child, &format!("lessons/{}/complete", lesson_id))
}
pub fn child_achievements(base: &str) -> String {
    scoped(base, Role::Child, "achievements")
}
pub fn child_activities(base: &str) -> String {
    scoped(base, Role::Child, "activities")
}
pub fn child_company(base: &str) -> String {
    scoped(base, Role::Child, "company")
}
pub fn child_company_transactions(base: &str) -> String {
    scoped(base, Role::Child, "company/transactions")
}
pub fn child_submissions(base: &str) -> String {
    scoped(base, Role::Child, "submissions")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_without_double_slashes() {
        assert_eq!(
            admin_module("http://h:1/", 7),
            "http://h:1/api/v1/admin/modules/7"
        );
        assert_eq!(
            parent_child_restore("http://h", "a b"),
            "http://h/api/v1/parent/children/a%20b/restore"
        );
        assert_eq!(auth_child("http://h"), "http://h/api/v1/auth/child");
    }
}
