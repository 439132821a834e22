use axum::http::StatusCode;
use kidbiz_server::{server, storage};
use kidbiz_shared::api::{self, endpoints as ep, rest};
use kidbiz_shared::auth::Role;
use kidbiz_shared::domain::{AchievementKind, AchievementRule, SubscriptionStatus, TransactionKind};
use reqwest::Client;
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;

const ADMIN_EMAIL: &str = "admin@example.com";
const PARENT_EMAIL: &str = "parent@example.com";
const LAPSED_EMAIL: &str = "lapsed@example.com";
const PASSWORD: &str = "secret123";

struct TestServer {
    base: String,
    client: Client,
    handle: tokio::task::JoinHandle<()>,
    _tempdir: tempfile::TempDir,
}

impl TestServer {
    async fn spawn() -> Option<Self> {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let (addr, handle) = match start_server(&db_path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                eprintln!("Skipping test due to sandbox restrictions: {e}");
                return None;
            }
            Err(e) => panic!("failed to start server: {e}"),
        };
        Some(Self {
            base: format!("http://{}", addr),
            client: Client::new(),
            handle,
            _tempdir: dir,
        })
    }

    async fn login(&self, email: &str) -> String {
        let resp = rest::login(
            &self.base,
            &api::AuthReq {
                email: email.into(),
                password: PASSWORD.into(),
            },
        )
        .await
        .expect("login");
        resp.token
    }

    async fn child_login(&self, access_code: &str) -> String {
        rest::child_login(&self.base, access_code)
            .await
            .expect("child login")
            .token
    }

    async fn request(
        &self,
        method: &str,
        url: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, text) = self.request_text(method, url, token, body).await;
        let val = if text.is_empty() {
            json!(null)
        } else {
            serde_json::from_str(&text).unwrap_or(json!({"raw": text}))
        };
        (status, val)
    }

    async fn request_text(
        &self,
        method: &str,
        url: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, String) {
        let url = if url.starts_with("http") {
            url.to_string()
        } else {
            format!("{}{}", self.base, url)
        };
        let mut req = match method {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            other => panic!("unsupported method {other}"),
        };
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }
        let resp = req.send().await.unwrap();
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        let text = resp.text().await.unwrap();
        (status, text)
    }

    async fn request_expect(
        &self,
        method: &str,
        url: &str,
        token: Option<&str>,
        body: Option<Value>,
        expected: StatusCode,
    ) -> Value {
        let (status, value) = self.request(method, url, token, body).await;
        assert_eq!(
            status, expected,
            "{method} {url} returned {status:?} with body {value:?}",
        );
        value
    }

    /// Published module with one lesson of two questions (answers 1 and 0).
    async fn published_module(&self, admin: &str, title: &str) -> (i32, i32) {
        let module = rest::admin_create_module(
            &self.base,
            admin,
            &api::ModuleReq {
                title: title.into(),
                description: Some("Basics".into()),
                order_index: None,
            },
        )
        .await
        .expect("create module");
        let lesson = rest::admin_create_lesson(
            &self.base,
            admin,
            module.id,
            &api::LessonReq {
                title: "What is money?".into(),
                content: Some("Money is a medium of exchange.".into()),
                xp_reward: Some(60),
            },
        )
        .await
        .expect("create lesson");
        for (prompt, correct_index) in [("Coins are money?", 1), ("Barter uses money?", 0)] {
            rest::admin_create_question(
                &self.base,
                admin,
                lesson.id,
                &api::QuizQuestionReq {
                    prompt: prompt.into(),
                    options: vec!["no".into(), "yes".into()],
                    correct_index,
                    explanation: None,
                },
            )
            .await
            .expect("create question");
        }
        rest::admin_publish_module(&self.base, admin, module.id, true)
            .await
            .expect("publish");
        (module.id, lesson.id)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn seed(email: &str, role: Role, status: Option<SubscriptionStatus>) -> storage::UserSeed {
    storage::UserSeed {
        email: email.into(),
        display_name: email.split('@').next().unwrap_or(email).into(),
        password_hash: bcrypt::hash(PASSWORD, 4).unwrap(),
        role,
        subscription: status.map(|status| storage::SubscriptionSeed {
            tier: "family".into(),
            status,
            trial_ends_at: None,
        }),
    }
}

async fn start_server(
    tmp_db: &Path,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
    let config = server::AppConfig {
        jwt_secret: "integration-test-secret".into(),
        users: vec![
            seed(ADMIN_EMAIL, Role::Admin, None),
            seed(PARENT_EMAIL, Role::Parent, Some(SubscriptionStatus::Active)),
            seed(LAPSED_EMAIL, Role::Parent, Some(SubscriptionStatus::Canceled)),
        ],
        achievements: vec![AchievementRule {
            id: "first-lesson".into(),
            name: "First steps".into(),
            description: "Complete a lesson".into(),
            kind: AchievementKind::LessonsCompleted,
            threshold: 1,
        }],
        xp_per_level: 100,
        retention_days: 30,
        trial_days: 14,
        metrics_refresh_secs: 60,
        report: server::ReportConfig::default(),
        dev_cors_origin: None,
        listen_port: None,
    };
    config.validate().expect("config");

    let store = storage::Store::connect_sqlite(tmp_db.to_str().unwrap())
        .await
        .expect("db");
    store.seed_users(&config.users).await.expect("seed users");
    store
        .seed_achievements(&config.achievements)
        .await
        .expect("seed achievements");

    let state = server::AppState::new(config, store);
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Ok((addr, handle))
}

#[tokio::test]
async fn public_endpoints_work() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let (status, text) = server.request_text("GET", "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "ok");
    let version = rest::server_version(&server.base).await.expect("version");
    assert_eq!(version.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn auth_rejects_bad_credentials_and_wrong_roles() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let err = rest::login(
        &server.base,
        &api::AuthReq {
            email: PARENT_EMAIL.into(),
            password: "wrong".into(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), Some(401));

    let children = ep::parent_children(&server.base);
    server
        .request_expect("GET", &children, None, None, StatusCode::UNAUTHORIZED)
        .await;
    server
        .request_expect("GET", &children, Some("garbage"), None, StatusCode::UNAUTHORIZED)
        .await;

    let parent = server.login(PARENT_EMAIL).await;
    server
        .request_expect(
            "GET",
            &ep::admin_users(&server.base),
            Some(&parent),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;

    // Email match is case-insensitive
    let resp = rest::login(
        &server.base,
        &api::AuthReq {
            email: PARENT_EMAIL.to_uppercase(),
            password: PASSWORD.into(),
        },
    )
    .await
    .expect("login");
    assert_eq!(resp.role, Role::Parent);

    rest::logout(&server.base, &parent).await.expect("logout");
    server
        .request_expect("GET", &children, Some(&parent), None, StatusCode::UNAUTHORIZED)
        .await;

    let err = rest::child_login(&server.base, "ZZZZ-ZZZZ").await.unwrap_err();
    assert_eq!(err.status(), Some(401));
}

#[tokio::test]
async fn child_soft_delete_and_restore() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let parent = server.login(PARENT_EMAIL).await;
    let child = rest::create_child(&server.base, &parent, "Ann")
        .await
        .expect("create child");
    assert_eq!(child.level, 1);
    assert_eq!(child.total_xp, 0);

    let child_token = server.child_login(&child.access_code).await;
    let status = rest::validate_child_session(&server.base, &child_token)
        .await
        .expect("validate");
    assert!(status.valid);
    assert_eq!(status.session.child_name, "Ann");

    // Child tokens cannot reach parent routes
    server
        .request_expect(
            "GET",
            &ep::parent_children(&server.base),
            Some(&child_token),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;

    server
        .request_expect(
            "PUT",
            &ep::parent_child(&server.base, &child.id),
            Some(&parent),
            Some(json!({"name": "Annie"})),
            StatusCode::OK,
        )
        .await;

    rest::delete_child(&server.base, &parent, &child.id)
        .await
        .expect("delete child");
    let listed = rest::list_children(&server.base, &parent)
        .await
        .expect("list");
    assert!(listed.is_empty());

    let err = rest::validate_child_session(&server.base, &child_token)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(401));
    let err = rest::child_login(&server.base, &child.access_code)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(401));

    let deleted = rest::list_deleted_children(&server.base, &parent)
        .await
        .expect("deleted");
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].name, "Annie");
    assert_eq!(deleted[0].days_until_permanent_deletion, 30);

    let restored = server
        .request_expect(
            "POST",
            &ep::parent_child_restore(&server.base, &child.id),
            Some(&parent),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(restored["access_code"], child.access_code);
    server
        .request_expect(
            "POST",
            &ep::parent_child_restore(&server.base, &child.id),
            Some(&parent),
            None,
            StatusCode::CONFLICT,
        )
        .await;
    server.child_login(&child.access_code).await;

    // Another parent sees a 404 for someone else's child
    let other = server.login(LAPSED_EMAIL).await;
    server
        .request_expect(
            "DELETE",
            &ep::parent_child(&server.base, &child.id),
            Some(&other),
            None,
            StatusCode::NOT_FOUND,
        )
        .await;
}

#[tokio::test]
async fn lapsed_subscription_blocks_child_login() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let parent = server.login(LAPSED_EMAIL).await;
    let child = rest::create_child(&server.base, &parent, "Ben")
        .await
        .expect("create child");
    let err = rest::child_login(&server.base, &child.access_code)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(403));

    let admin = server.login(ADMIN_EMAIL).await;
    let users = server
        .request_expect(
            "GET",
            &ep::admin_users(&server.base),
            Some(&admin),
            None,
            StatusCode::OK,
        )
        .await;
    let lapsed_id = users
        .as_array()
        .unwrap()
        .iter()
        .find(|u| u["email"] == LAPSED_EMAIL)
        .and_then(|u| u["id"].as_str())
        .unwrap()
        .to_string();
    let sub = server
        .request_expect(
            "PUT",
            &ep::admin_user_subscription(&server.base, &lapsed_id),
            Some(&admin),
            Some(json!({"status": "active"})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(sub["grants_access"], true);
    server.child_login(&child.access_code).await;
}

#[tokio::test]
async fn lesson_completion_awards_xp_once() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.login(ADMIN_EMAIL).await;
    let parent = server.login(PARENT_EMAIL).await;
    let child = rest::create_child(&server.base, &parent, "Cleo")
        .await
        .expect("create child");
    let kid = server.child_login(&child.access_code).await;

    // Drafts stay hidden from children
    let draft = rest::admin_create_module(
        &server.base,
        &admin,
        &api::ModuleReq {
            title: "Draft".into(),
            description: None,
            order_index: None,
        },
    )
    .await
    .expect("draft");
    assert!(!draft.is_published);
    assert_eq!(draft.slug, "draft");

    let (module_id, lesson_id) = server.published_module(&admin, "Money Basics").await;
    let second = rest::admin_create_lesson(
        &server.base,
        &admin,
        module_id,
        &api::LessonReq {
            title: "Saving".into(),
            content: None,
            xp_reward: None,
        },
    )
    .await
    .expect("second lesson");
    assert_eq!(second.order_index, 1);
    assert_eq!(second.xp_reward, 10);

    let modules = rest::child_modules(&server.base, &kid).await.expect("modules");
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0].module.slug, "money-basics");
    assert_eq!(modules[0].lesson_count, 2);
    assert_eq!(modules[0].completion_percent, 0);

    let view = rest::child_lesson(&server.base, &kid, lesson_id)
        .await
        .expect("lesson");
    assert_eq!(view.questions.len(), 2);

    let answer = rest::answer_question(
        &server.base,
        &kid,
        lesson_id,
        &api::AnswerReq {
            question_id: view.questions[0].id,
            selected_index: 1,
        },
    )
    .await
    .expect("answer");
    assert!(answer.correct);

    let wrong_count = server
        .request(
            "POST",
            &ep::child_lesson_complete(&server.base, lesson_id),
            Some(&kid),
            Some(json!({"answers": [1]})),
        )
        .await;
    assert_eq!(wrong_count.0, StatusCode::BAD_REQUEST);

    let first = rest::complete_lesson(
        &server.base,
        &kid,
        lesson_id,
        &api::CompleteLessonReq {
            answers: vec![1, 1],
        },
    )
    .await
    .expect("complete");
    assert_eq!(first.score_percent, 50);
    assert!(!first.already_completed);
    assert_eq!(first.xp_awarded, 60);
    assert_eq!(first.total_xp, 60);
    assert_eq!(first.level, 1);
    assert_eq!(first.level_progress_percent, 60);
    assert_eq!(first.streak_days, 1);
    assert_eq!(first.module_completion_percent, 50);
    assert_eq!(first.new_achievements.len(), 1);
    assert_eq!(first.new_achievements[0].id, "first-lesson");

    let repeat = rest::complete_lesson(
        &server.base,
        &kid,
        lesson_id,
        &api::CompleteLessonReq {
            answers: vec![1, 0],
        },
    )
    .await
    .expect("repeat");
    assert!(repeat.already_completed);
    assert_eq!(repeat.xp_awarded, 0);
    assert_eq!(repeat.total_xp, 60);
    assert!(repeat.new_achievements.is_empty());

    let lessons = server
        .request_expect(
            "GET",
            &ep::child_module_lessons(&server.base, module_id),
            Some(&kid),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(lessons[0]["completed"], true);
    assert_eq!(lessons[0]["score_percent"], 100);
    assert_eq!(lessons[1]["completed"], false);

    let profile = rest::child_profile(&server.base, &kid).await.expect("profile");
    assert_eq!(profile.total_xp, 60);
    assert_eq!(profile.achievements.len(), 1);

    let dashboard = rest::parent_dashboard(&server.base, &parent)
        .await
        .expect("dashboard");
    assert!(dashboard.subscription.grants_access);
    assert_eq!(dashboard.children.len(), 1);
    assert_eq!(dashboard.children[0].lessons_completed, 1);
    assert!(!dashboard.children[0].recent_activities.is_empty());
}

#[tokio::test]
async fn company_ledger_tracks_totals() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let parent = server.login(PARENT_EMAIL).await;
    let child = rest::create_child(&server.base, &parent, "Dev")
        .await
        .expect("create child");
    let kid = server.child_login(&child.access_code).await;

    server
        .request_expect(
            "GET",
            &ep::child_company(&server.base),
            Some(&kid),
            None,
            StatusCode::NOT_FOUND,
        )
        .await;
    let company = rest::create_company(&server.base, &kid, "Lemonade Stand")
        .await
        .expect("company");
    assert_eq!(company.balance_cents, 0);
    let err = rest::create_company(&server.base, &kid, "Second")
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(409));

    let after_revenue = rest::add_transaction(
        &server.base,
        &kid,
        &api::TransactionReq {
            kind: TransactionKind::Revenue,
            amount_cents: 1000,
            description: Some("Saturday sales".into()),
        },
    )
    .await
    .expect("revenue");
    assert_eq!(after_revenue.balance_cents, 1000);

    let after_expense = rest::add_transaction(
        &server.base,
        &kid,
        &api::TransactionReq {
            kind: TransactionKind::Expense,
            amount_cents: 2500,
            description: None,
        },
    )
    .await
    .expect("expense");
    assert_eq!(after_expense.balance_cents, -1500);
    assert_eq!(after_expense.total_revenue_cents, 1000);
    assert_eq!(after_expense.total_expenses_cents, 2500);

    let err = rest::add_transaction(
        &server.base,
        &kid,
        &api::TransactionReq {
            kind: TransactionKind::Revenue,
            amount_cents: 0,
            description: None,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), Some(400));

    let txs = rest::list_transactions(&server.base, &kid)
        .await
        .expect("transactions");
    assert_eq!(txs.len(), 2);
    assert_eq!(txs[0].kind, TransactionKind::Expense);
}

#[tokio::test]
async fn module_delete_modes() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.login(ADMIN_EMAIL).await;
    let (module_id, _) = server.published_module(&admin, "Marketing").await;
    let module_url = ep::admin_module(&server.base, module_id);

    let (status, body) = server
        .request(
            "DELETE",
            &format!("{module_url}?mode=simple"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(
        body["hint"].as_str().is_some_and(|h| h.contains("mode=safe")),
        "missing hint in {body:?}"
    );

    let deleted = server
        .request_expect("DELETE", &module_url, Some(&admin), None, StatusCode::OK)
        .await;
    assert_eq!(deleted["lessons_deleted"], 1);
    assert_eq!(deleted["questions_deleted"], 2);
    server
        .request_expect("GET", &module_url, Some(&admin), None, StatusCode::NOT_FOUND)
        .await;

    // Duplicate titles collide on the slug
    server.published_module(&admin, "Pricing").await;
    server
        .request_expect(
            "POST",
            &ep::admin_modules(&server.base),
            Some(&admin),
            Some(json!({"title": "Pricing"})),
            StatusCode::CONFLICT,
        )
        .await;
}

#[tokio::test]
async fn reports_and_metrics() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.login(ADMIN_EMAIL).await;
    let parent = server.login(PARENT_EMAIL).await;
    let child = rest::create_child(&server.base, &parent, "Eve, Jr.")
        .await
        .expect("create child");
    let kid = server.child_login(&child.access_code).await;
    let (_, lesson_id) = server.published_module(&admin, "Money Basics").await;
    rest::complete_lesson(
        &server.base,
        &kid,
        lesson_id,
        &api::CompleteLessonReq {
            answers: vec![1, 0],
        },
    )
    .await
    .expect("complete");

    let csv = rest::child_report_csv(&server.base, &parent, &child.id)
        .await
        .expect("csv");
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "Module,Lessons Completed,Total Lessons,Completion %");
    assert_eq!(lines[1], "Money Basics,1,1,100");

    let (status, html) = server
        .request_text(
            "GET",
            &ep::parent_child_report_html(&server.base, &child.id),
            Some(&parent),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("Eve, Jr."));
    assert!(html.contains("First steps"));

    let (status, analytics) = server
        .request_text(
            "GET",
            &ep::admin_analytics_csv(&server.base),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let rows: Vec<&str> = analytics.lines().collect();
    assert_eq!(rows[0], "Metric,Value");
    assert!(rows.contains(&"Total Children,1"));
    assert!(rows.contains(&"Lessons Completed,1"));

    let metrics = rest::admin_metrics(&server.base, &admin)
        .await
        .expect("metrics");
    assert_eq!(metrics.total_users, 3);
    assert_eq!(metrics.total_parents, 2);
    assert_eq!(metrics.active_subscriptions, 1);
    assert_eq!(metrics.published_modules, 1);
    assert!(metrics.refreshed_at.is_some());
}

#[tokio::test]
async fn admin_manages_parent_accounts() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.login(ADMIN_EMAIL).await;
    let created = server
        .request_expect(
            "POST",
            &ep::admin_users(&server.base),
            Some(&admin),
            Some(json!({
                "email": "new@example.com",
                "display_name": "New Parent",
                "password": PASSWORD,
                "tier": "family",
            })),
            StatusCode::CREATED,
        )
        .await;
    assert_eq!(created["subscription"]["status"], "trialing");
    assert!(
        created["subscription"]["trial_ends_at"].is_string(),
        "trial end not stamped: {created:?}"
    );
    assert_eq!(created["subscription"]["grants_access"], true);
    let user_id = created["id"].as_str().unwrap().to_string();

    server
        .request_expect(
            "POST",
            &ep::admin_users(&server.base),
            Some(&admin),
            Some(json!({
                "email": "NEW@example.com",
                "display_name": "Dup",
                "password": PASSWORD,
            })),
            StatusCode::CONFLICT,
        )
        .await;

    let token = server.login("new@example.com").await;
    server
        .request_expect(
            "DELETE",
            &ep::admin_user(&server.base, &user_id),
            Some(&admin),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    server
        .request_expect(
            "GET",
            &ep::parent_dashboard(&server.base),
            Some(&token),
            None,
            StatusCode::UNAUTHORIZED,
        )
        .await;
    let err = rest::login(
        &server.base,
        &api::AuthReq {
            email: "new@example.com".into(),
            password: PASSWORD.into(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), Some(401));
}

#[tokio::test]
async fn unpublish_and_reorder_lessons() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.login(ADMIN_EMAIL).await;
    let parent = server.login(PARENT_EMAIL).await;
    let child = rest::create_child(&server.base, &parent, "Finn")
        .await
        .expect("create child");
    let kid = server.child_login(&child.access_code).await;
    let (module_id, first) = server.published_module(&admin, "Budgeting").await;
    let mut ids = vec![first];
    for title in ["Needs vs wants", "Saving goals"] {
        let lesson = rest::admin_create_lesson(
            &server.base,
            &admin,
            module_id,
            &api::LessonReq {
                title: title.into(),
                content: None,
                xp_reward: None,
            },
        )
        .await
        .expect("create lesson");
        ids.push(lesson.id);
    }

    let order_url = ep::admin_module_lessons_order(&server.base, module_id);
    let reordered = server
        .request_expect(
            "PUT",
            &order_url,
            Some(&admin),
            Some(json!({"lesson_ids": [ids[2], ids[0], ids[1]]})),
            StatusCode::OK,
        )
        .await;
    let got: Vec<(i64, i64)> = reordered
        .as_array()
        .unwrap()
        .iter()
        .map(|l| (l["id"].as_i64().unwrap(), l["order_index"].as_i64().unwrap()))
        .collect();
    assert_eq!(
        got,
        vec![
            (i64::from(ids[2]), 0),
            (i64::from(ids[0]), 1),
            (i64::from(ids[1]), 2)
        ]
    );

    // The list must name every lesson exactly once
    for bad in [json!([ids[0], ids[1]]), json!([ids[0], ids[1], ids[1]])] {
        server
            .request_expect(
                "PUT",
                &order_url,
                Some(&admin),
                Some(json!({"lesson_ids": bad})),
                StatusCode::BAD_REQUEST,
            )
            .await;
    }

    assert_eq!(
        rest::child_modules(&server.base, &kid)
            .await
            .expect("modules")
            .len(),
        1
    );
    let hidden = rest::admin_publish_module(&server.base, &admin, module_id, false)
        .await
        .expect("unpublish");
    assert!(!hidden.is_published);
    assert!(hidden.published_at.is_none());
    assert!(
        rest::child_modules(&server.base, &kid)
            .await
            .expect("modules")
            .is_empty()
    );
}

#[tokio::test]
async fn track_submissions_are_reviewed_once() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.login(ADMIN_EMAIL).await;
    let parent = server.login(PARENT_EMAIL).await;
    let other = server.login(LAPSED_EMAIL).await;
    let child = rest::create_child(&server.base, &parent, "Gus")
        .await
        .expect("create child");
    let kid = server.child_login(&child.access_code).await;
    let (module_id, _) = server.published_module(&admin, "Selling").await;

    server
        .request_expect(
            "POST",
            &ep::child_submissions(&server.base),
            Some(&kid),
            Some(json!({"module_id": module_id, "content": "   "})),
            StatusCode::BAD_REQUEST,
        )
        .await;
    let submitted = server
        .request_expect(
            "POST",
            &ep::child_submissions(&server.base),
            Some(&kid),
            Some(json!({"module_id": module_id, "content": "I sold 12 cookies"})),
            StatusCode::CREATED,
        )
        .await;
    assert_eq!(submitted["status"], "pending");
    let submission_id = submitted["id"].as_i64().unwrap() as i32;

    for (role, token, expected) in [
        (Role::Admin, &admin, 1),
        (Role::Parent, &parent, 1),
        (Role::Parent, &other, 0),
    ] {
        let listed = server
            .request_expect(
                "GET",
                &ep::submissions(&server.base, role),
                Some(token),
                None,
                StatusCode::OK,
            )
            .await;
        assert_eq!(listed.as_array().unwrap().len(), expected, "{role:?}");
    }

    // Someone else's parent cannot see or review it
    server
        .request_expect(
            "POST",
            &ep::submission_review(&server.base, Role::Parent, submission_id),
            Some(&other),
            Some(json!({"approve": true})),
            StatusCode::NOT_FOUND,
        )
        .await;
    let reviewed = server
        .request_expect(
            "POST",
            &ep::submission_review(&server.base, Role::Parent, submission_id),
            Some(&parent),
            Some(json!({"approve": true})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(reviewed["status"], "approved");
    assert!(reviewed["reviewed_by"].is_string());
    server
        .request_expect(
            "POST",
            &ep::submission_review(&server.base, Role::Admin, submission_id),
            Some(&admin),
            Some(json!({"approve": false})),
            StatusCode::CONFLICT,
        )
        .await;

    let pending = server
        .request_expect(
            "GET",
            &format!("{}?pending=true", ep::submissions(&server.base, Role::Admin)),
            Some(&admin),
            None,
            StatusCode::OK,
        )
        .await;
    assert!(pending.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn module_progress_follows_lesson_changes() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.login(ADMIN_EMAIL).await;
    let parent = server.login(PARENT_EMAIL).await;
    let child = rest::create_child(&server.base, &parent, "Hal")
        .await
        .expect("create child");
    let kid = server.child_login(&child.access_code).await;
    let (module_id, lesson_id) = server.published_module(&admin, "Profit").await;
    rest::complete_lesson(
        &server.base,
        &kid,
        lesson_id,
        &api::CompleteLessonReq {
            answers: vec![1, 0],
        },
    )
    .await
    .expect("complete");

    assert_eq!(modules_completed(&server, &parent).await, 1);

    let extra = rest::admin_create_lesson(
        &server.base,
        &admin,
        module_id,
        &api::LessonReq {
            title: "Margins".into(),
            content: None,
            xp_reward: None,
        },
    )
    .await
    .expect("create lesson");
    assert_eq!(modules_completed(&server, &parent).await, 0);
    let (status, analytics) = server
        .request_text(
            "GET",
            &ep::admin_analytics_csv(&server.base),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(analytics.lines().any(|l| l == "Modules Completed,0"));

    server
        .request_expect(
            "DELETE",
            &ep::admin_lesson(&server.base, extra.id),
            Some(&admin),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    assert_eq!(modules_completed(&server, &parent).await, 1);
}

async fn modules_completed(server: &TestServer, parent: &str) -> i64 {
    let dashboard = rest::parent_dashboard(&server.base, parent)
        .await
        .expect("dashboard");
    dashboard.children[0].modules_completed
}

async fn seeded_store(db: &Path) -> (storage::Store, String) {
    let store = storage::Store::connect_sqlite(db.to_str().unwrap())
        .await
        .expect("db");
    store
        .seed_users(&[seed(
            PARENT_EMAIL,
            Role::Parent,
            Some(SubscriptionStatus::Active),
        )])
        .await
        .expect("seed users");
    let parent = store
        .find_user_by_email(PARENT_EMAIL)
        .await
        .expect("lookup")
        .expect("seeded parent");
    (store, parent.id)
}

#[tokio::test]
async fn ledger_rejects_totals_past_i64() {
    let dir = tempfile::tempdir().unwrap();
    let (store, parent) = seeded_store(&dir.path().join("ledger.db")).await;
    let child = store.create_child(&parent, "Ivy").await.expect("child");
    store
        .create_company(&child.id, "Big Corp")
        .await
        .expect("company");
    store
        .add_transaction(&child.id, TransactionKind::Revenue, i64::MAX, "", 100)
        .await
        .expect("first revenue");
    let err = store
        .add_transaction(&child.id, TransactionKind::Revenue, 1, "", 100)
        .await
        .unwrap_err();
    assert!(matches!(err, storage::StorageError::InvalidInput(_)), "{err:?}");

    let company = store
        .company_for_child(&child.id)
        .await
        .expect("company lookup")
        .expect("company");
    assert_eq!(company.balance_cents, i64::MAX);
    assert_eq!(company.total_revenue_cents, i64::MAX);
    let txs = store
        .list_transactions(&child.id, 10, 0)
        .await
        .expect("transactions");
    assert_eq!(txs.len(), 1);
}

#[tokio::test]
async fn retention_limits_restore_and_purge() {
    let dir = tempfile::tempdir().unwrap();
    let (store, parent) = seeded_store(&dir.path().join("retention.db")).await;
    let gone = store.create_child(&parent, "Jo").await.expect("child");
    let kept = store.create_child(&parent, "Kim").await.expect("child");
    store
        .create_company(&gone.id, "Stand")
        .await
        .expect("company");
    store
        .soft_delete_child(&parent, &gone.id)
        .await
        .expect("soft delete");

    // A closed window refuses the restore
    let err = store
        .restore_child(&parent, &gone.id, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, storage::StorageError::Conflict(_)), "{err:?}");

    assert_eq!(store.purge_deleted_children(30).await.expect("purge"), 0);
    assert_eq!(
        store
            .list_deleted_children(&parent)
            .await
            .expect("deleted")
            .len(),
        1
    );

    assert_eq!(store.purge_deleted_children(0).await.expect("purge"), 1);
    assert!(
        store
            .list_deleted_children(&parent)
            .await
            .expect("deleted")
            .is_empty()
    );
    assert!(
        store
            .company_for_child(&gone.id)
            .await
            .expect("company lookup")
            .is_none()
    );
    let err = store
        .restore_child(&parent, &gone.id, 30)
        .await
        .unwrap_err();
    assert!(matches!(err, storage::StorageError::NotFound(_)), "{err:?}");
    assert!(store.get_child(&kept.id).await.expect("get").is_some());
}
