//! Integration tests for the HTTP surface

use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use beacon::analytics::GeoResolver;
use beacon::api::{create_api_router, AppState};
use beacon::auth::AuthService;
use beacon::config::{AnalyticsConfig, AuthConfig};
use beacon::models::Project;
use beacon::storage::{SqliteStorage, Storage};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    auth: Arc<AuthService>,
    project: Project,
}

/// Helper to create the router over a fresh in-memory database with one project
async fn create_test_app() -> TestApp {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    let storage: Arc<dyn Storage> = Arc::new(storage);

    let project = Project::new("tenant-1", "Docs", "docs.example.com");
    storage.insert_project(&project).await.unwrap();

    let auth = Arc::new(AuthService::new(&AuthConfig {
        jwt_secret: "test-secret".to_string(),
        jwt_expiration_hours: 1,
    }));
    let state = Arc::new(AppState::new(
        storage,
        GeoResolver::default(),
        AnalyticsConfig::default(),
        None,
    ));
    let router = create_api_router(state, Arc::clone(&auth), &["*".to_string()])
        .layer(MockConnectInfo(SocketAddr::from(([198, 51, 100, 7], 40000))));

    TestApp {
        router,
        auth,
        project,
    }
}

impl TestApp {
    fn token(&self, tenant_id: &str) -> String {
        self.auth.issue_token(tenant_id, "owner@example.com").unwrap()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, String) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn track(&self, body: Value, dnt: bool) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri("/api/track")
            .header(header::CONTENT_TYPE, "application/json");
        if dnt {
            request = request.header("DNT", "1");
        }
        let (status, _, body) = self
            .send(request.body(Body::from(body.to_string())).unwrap())
            .await;
        (status, serde_json::from_str(&body).unwrap())
    }

    fn pageview(&self, session: &str, url: &str) -> Value {
        json!({
            "project_id": self.project.id,
            "tracking_code": self.project.tracking_code,
            "session_id": session,
            "event_type": "pageview",
            "page_url": url,
            "consent_given": true,
        })
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, axum::http::HeaderMap, String) {
        let mut request = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(request.body(Body::empty()).unwrap()).await
    }
}

#[tokio::test]
async fn test_health() {
    let app = create_test_app().await;
    let (status, _, body) = app.get("/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_track_outcomes() {
    let app = create_test_app().await;

    let (status, body) = app.track(app.pageview("s1", "/a"), false).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "tracked");
    assert!(body["event_id"].is_string());

    let mut no_consent = app.pageview("s1", "/a");
    no_consent["consent_given"] = json!(false);
    let (status, body) = app.track(no_consent, false).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "consent_required");

    let (status, body) = app.track(app.pageview("s1", "/a"), true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "do_not_track");

    let mut wrong_code = app.pageview("s1", "/a");
    wrong_code["tracking_code"] = json!("not-the-code");
    let (status, body) = app.track(wrong_code, false).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Invalid project or tracking code");
}

#[tokio::test]
async fn test_overview_requires_owner_token() {
    let app = create_test_app().await;
    for (session, url) in [("s1", "/a"), ("s1", "/a"), ("s2", "/a"), ("s3", "/b")] {
        app.track(app.pageview(session, url), false).await;
    }
    let uri = format!("/api/analytics/{}/overview?days=7", app.project.id);

    let (status, _, _) = app.get(&uri, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = app.get(&uri, Some(&app.token("tenant-2"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) = app.get(&uri, Some(&app.token("tenant-1"))).await;
    assert_eq!(status, StatusCode::OK);
    let rollup: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(rollup["total_pageviews"], 4);
    assert_eq!(rollup["unique_sessions"], 3);
    assert_eq!(rollup["top_pages"][0]["url"], "/a");
    assert_eq!(rollup["top_pages"][0]["views"], 3);
    assert_eq!(rollup["devices"]["Desktop"], 0);
}

#[tokio::test]
async fn test_tracked_events_use_connection_address() {
    let app = create_test_app().await;
    app.track(app.pageview("s1", "/a"), false).await;

    let uri = format!("/api/analytics/{}/overview", app.project.id);
    let (_, _, body) = app.get(&uri, Some(&app.token("tenant-1"))).await;
    let rollup: Value = serde_json::from_str(&body).unwrap();

    // 198.x falls in the BR octet range of the heuristic tier
    assert_eq!(rollup["countries"][0]["name"], "BR");
}

#[tokio::test]
async fn test_export_is_csv_attachment() {
    let app = create_test_app().await;
    app.track(app.pageview("s1", "/a"), false).await;

    let uri = format!("/api/analytics/{}/export?days=30", app.project.id);
    let (status, headers, body) = app.get(&uri, Some(&app.token("tenant-1"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/csv; charset=utf-8");
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\"analytics_report_"));
    assert!(body.starts_with("Analytics Report\nField,Value\nProject,Docs\n"));
    assert!(body.contains("Period,Last 30 days\n"));
}

#[tokio::test]
async fn test_question_endpoint() {
    let app = create_test_app().await;
    for (session, url) in [("s1", "/a"), ("s1", "/a"), ("s2", "/a"), ("s3", "/b")] {
        app.track(app.pageview(session, url), false).await;
    }

    let request = |token: String, project_id: &str| {
        Request::builder()
            .method("POST")
            .uri("/api/nlq")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(
                json!({
                    "project_id": project_id,
                    "question": "Which pages are most popular?",
                    "date_range": "30d",
                })
                .to_string(),
            ))
            .unwrap()
    };

    let (status, _, body) = app
        .send(request(app.token("tenant-1"), &app.project.id))
        .await;
    assert_eq!(status, StatusCode::OK);
    let answer: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(answer["question"], "Which pages are most popular?");
    assert!(answer["answer"].as_str().unwrap().contains("/a"));
    assert_eq!(answer["insights"][0], "Average 1.3 pageviews per session");

    let (status, _, _) = app
        .send(request(app.token("tenant-2"), &app.project.id))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_blank_body_user_agent_falls_back_to_header() {
    let app = create_test_app().await;
    let mut body = app.pageview("s1", "/a");
    body["user_agent"] = json!("  ");

    let request = Request::builder()
        .method("POST")
        .uri("/api/track")
        .header(header::CONTENT_TYPE, "application/json")
        .header(
            header::USER_AGENT,
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0) AppleWebKit/605.1.15 Version/17.0 Mobile/15E148 Safari/604.1",
        )
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, _, _) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);

    let uri = format!("/api/analytics/{}/overview", app.project.id);
    let (_, _, body) = app.get(&uri, Some(&app.token("tenant-1"))).await;
    let rollup: Value = serde_json::from_str(&body).unwrap();

    assert_eq!(rollup["devices"]["Mobile"], 1);
    assert_eq!(rollup["devices"]["Desktop"], 0);
    assert_eq!(rollup["browsers"][0]["name"], "Safari");
}
