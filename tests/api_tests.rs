use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{Duration, TimeZone, Utc};
use pdf_library::{
    AppConfig, AppState, ConsoleCodeSender, FixedClock, InMemoryRepository, MockStorageService,
    create_router,
    clock::{Clock, ClockState},
    models::{
        AdminDashboardStats, BookResponse, LoginResponse, PurgeResponse, QuotaStatus, UserProfile,
    },
    notify::CodeSenderState,
    repository::{Repository, RepositoryState},
    storage::StorageState,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::util::ServiceExt;

const PDF_BYTES: &[u8] = b"%PDF-1.4 probability lecture notes";

// --- Harness ---

struct TestApp {
    router: Router,
    repo: Arc<InMemoryRepository>,
    storage: Arc<MockStorageService>,
    clock: FixedClock,
}

fn spawn_app(config: AppConfig) -> TestApp {
    let repo = Arc::new(InMemoryRepository::new());
    let storage = Arc::new(MockStorageService::new());
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap());
    let state = AppState {
        repo: repo.clone() as RepositoryState,
        storage: storage.clone() as StorageState,
        clock: Arc::new(clock.clone()) as ClockState,
        sender: Arc::new(ConsoleCodeSender::new()) as CodeSenderState,
        config,
    };
    TestApp {
        router: create_router(state),
        repo,
        storage,
        clock,
    }
}

fn admin_auth() -> String {
    format!("Basic {}", STANDARD.encode("admin:admin-secret-local"))
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn get(&self, uri: &str, auth: Option<&str>, from: Option<&str>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        if let Some(from) = from {
            builder = builder.header("x-forwarded-for", from);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn send_json(
        &self,
        method: &str,
        uri: &str,
        auth: Option<&str>,
        body: Value,
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn upload(&self, title: &str, bytes: &[u8]) -> BookResponse {
        let (status, body) = self
            .send_json(
                "POST",
                "/admin/books",
                Some(&admin_auth()),
                json!({
                    "title": title,
                    "author": "Ross",
                    "language": "en",
                    "course": "MATH201",
                    "keywords": ["probability", "statistics"],
                    "file_name": "probability.pdf",
                    "content_base64": STANDARD.encode(bytes),
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_slice(&body).unwrap()
    }

    async fn register_and_login(&self, identifier: &str, password: &str) -> String {
        let creds = json!({ "identifier": identifier, "password": password });
        let (status, _) = self.send_json("POST", "/register", None, creds.clone()).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = self.send_json("POST", "/login", None, creds).await;
        assert_eq!(status, StatusCode::OK);
        let login: LoginResponse = serde_json::from_slice(&body).unwrap();
        login.token
    }
}

fn app() -> TestApp {
    spawn_app(AppConfig::default())
}

// --- Public Routes ---

#[tokio::test]
async fn test_health_check() {
    let app = app();
    let (status, body) = app.get("/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn test_guest_second_download_is_refused_with_login_hint() {
    let app = app();
    let book = app.upload("Probability Theory", PDF_BYTES).await;
    let uri = format!("/books/{}/download", book.id);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(&uri)
                .header("x-forwarded-for", "10.0.0.5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/pdf"
    );
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], PDF_BYTES);

    let (status, body) = app.get(&uri, None, Some("10.0.0.5")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert!(error["reason"].as_str().unwrap().contains("log in"));

    // Browsing is never limited.
    let (status, _) = app.get("/books?title=probability", None, Some("10.0.0.5")).await;
    assert_eq!(status, StatusCode::OK);

    // Another address has its own allowance.
    let (status, _) = app.get(&uri, None, Some("10.0.0.6")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_guest_allowance_returns_next_day() {
    let app = app();
    let book = app.upload("Linear Algebra", PDF_BYTES).await;
    let uri = format!("/books/{}/download", book.id);

    assert_eq!(app.get(&uri, None, Some("10.0.0.5")).await.0, StatusCode::OK);
    assert_eq!(
        app.get(&uri, None, Some("10.0.0.5")).await.0,
        StatusCode::TOO_MANY_REQUESTS
    );

    app.clock.advance(Duration::days(1));
    assert_eq!(app.get(&uri, None, Some("10.0.0.5")).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_missing_book_does_not_spend_guest_allowance() {
    let app = app();
    let book = app.upload("Real Analysis", PDF_BYTES).await;

    let missing = format!("/books/{}/download", uuid::Uuid::new_v4());
    let (status, _) = app.get(&missing, None, Some("10.0.0.5")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let uri = format!("/books/{}/download", book.id);
    assert_eq!(app.get(&uri, None, Some("10.0.0.5")).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_logged_in_user_downloads_without_limit() {
    let app = app();
    let book = app.upload("Probability Theory", PDF_BYTES).await;
    let token = app.register_and_login("alice", "pw1").await;
    let uri = format!("/books/{}/download", book.id);

    for _ in 0..3 {
        let (status, _) = app.get(&uri, Some(&bearer(&token)), Some("10.0.0.5")).await;
        assert_eq!(status, StatusCode::OK);
    }

    // The user's downloads do not touch the guest counter for the same address.
    assert_eq!(app.get(&uri, None, Some("10.0.0.5")).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_credentials_are_rejected_not_downgraded() {
    let app = app();
    let book = app.upload("Probability Theory", PDF_BYTES).await;
    let uri = format!("/books/{}/download", book.id);

    let (status, _) = app.get(&uri, Some("Bearer forged"), Some("10.0.0.5")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = format!("Basic {}", STANDARD.encode("alice:nope"));
    let (status, _) = app.get("/quota", Some(&wrong), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let app = app();
    let creds = json!({ "identifier": "Alice", "password": "pw1" });
    let (status, body) = app.send_json("POST", "/register", None, creds).await;
    assert_eq!(status, StatusCode::CREATED);
    let profile: UserProfile = serde_json::from_slice(&body).unwrap();
    assert_eq!(profile.identifier, "alice");

    let again = json!({ "identifier": "alice", "password": "pw2" });
    let (status, _) = app.send_json("POST", "/register", None, again).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_quota_endpoint_for_guest_and_user() {
    let app = app();
    let (status, body) = app.get("/quota", None, Some("10.0.0.5")).await;
    assert_eq!(status, StatusCode::OK);
    let guest: QuotaStatus = serde_json::from_slice(&body).unwrap();
    assert_eq!(guest.role, "guest");
    assert_eq!(guest.limit, Some(1));
    assert!(guest.can_download);

    let token = app.register_and_login("alice", "pw1").await;
    let (_, body) = app.get("/quota", Some(&bearer(&token)), None).await;
    let user: QuotaStatus = serde_json::from_slice(&body).unwrap();
    assert_eq!(user.role, "user");
    assert_eq!(user.limit, None);
}

#[tokio::test]
async fn test_password_reset_request_is_accepted_for_unknown_identifier() {
    let app = app();
    let (status, _) = app
        .send_json(
            "POST",
            "/password/reset/request",
            None,
            json!({ "identifier": "nobody" }),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

// --- Authenticated Routes ---

#[tokio::test]
async fn test_me_requires_login() {
    let app = app();
    let (status, _) = app.get("/me", None, Some("10.0.0.5")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = app.register_and_login("alice", "pw1").await;
    let (status, body) = app.get("/me", Some(&bearer(&token)), None).await;
    assert_eq!(status, StatusCode::OK);
    let me: UserProfile = serde_json::from_slice(&body).unwrap();
    assert_eq!(me.identifier, "alice");
    assert_eq!(me.role, "user");
}

#[tokio::test]
async fn test_bookmark_toggle_and_listing() {
    let app = app();
    let book = app.upload("Probability Theory", PDF_BYTES).await;
    let token = app.register_and_login("alice", "pw1").await;
    let auth = bearer(&token);
    let uri = format!("/books/{}/bookmark", book.id);

    let (status, body) = app.send_json("POST", &uri, Some(&auth), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap()["bookmarked"], true);

    let (_, body) = app.get("/me/bookmarks", Some(&auth), None).await;
    let books: Vec<BookResponse> = serde_json::from_slice(&body).unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].id, book.id);

    let (_, body) = app.send_json("POST", &uri, Some(&auth), json!({})).await;
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap()["bookmarked"], false);

    let (status, _) = app.send_json("POST", &uri, None, json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_download_history_lists_own_downloads() {
    let app = app();
    let book = app.upload("Probability Theory", PDF_BYTES).await;
    let token = app.register_and_login("alice", "pw1").await;
    let auth = bearer(&token);

    let uri = format!("/books/{}/download", book.id);
    app.get(&uri, Some(&auth), None).await;
    app.get(&uri, Some(&auth), None).await;

    let (status, body) = app.get("/me/downloads", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK);
    let events: Vec<Value> = serde_json::from_slice(&body).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["actor"], "alice");
}

// --- Admin Routes ---

#[tokio::test]
async fn test_admin_routes_reject_guests_and_users() {
    let app = app();
    let (status, _) = app.get("/admin/stats", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = app.register_and_login("alice", "pw1").await;
    let (status, _) = app.get("/admin/stats", Some(&bearer(&token)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.get("/admin/stats", Some(&admin_auth()), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_upload_stores_small_files_inline_and_large_ones_as_blobs() {
    let app = spawn_app(AppConfig {
        inline_max_bytes: 16,
        ..AppConfig::default()
    });

    let small = app.upload("Pamphlet", b"%PDF-1.4").await;
    assert_eq!(small.storage, "inline");
    assert_eq!(app.storage.object_count(), 0);

    let large = app.upload("Probability Theory", PDF_BYTES).await;
    assert_eq!(large.storage, "blob");
    assert_eq!(app.storage.object_count(), 1);

    let (status, body) = app
        .get(&format!("/books/{}/download", large.id), Some(&admin_auth()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, PDF_BYTES);

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/admin/books/{}", large.id))
        .header(header::AUTHORIZATION, admin_auth())
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(app.storage.object_count(), 0);

    let (status, _) = app.get(&format!("/books/{}", large.id), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_accepts_files_beyond_the_framework_default_limit() {
    let app = app();
    let mut pdf = b"%PDF-1.4\n".to_vec();
    pdf.resize(3 * 1024 * 1024, b'x');

    let book = app.upload("Collected Lecture Notes", &pdf).await;
    assert_eq!(book.storage, "blob");
    assert_eq!(app.storage.object_count(), 1);

    let (status, body) = app
        .get(&format!("/books/{}/download", book.id), Some(&admin_auth()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.len(), pdf.len());
}

#[tokio::test]
async fn test_upload_over_configured_limit_is_rejected() {
    let app = spawn_app(AppConfig {
        max_upload_bytes: 1024,
        ..AppConfig::default()
    });

    let (status, _) = app
        .send_json(
            "POST",
            "/admin/books",
            Some(&admin_auth()),
            json!({
                "title": "Too Big",
                "file_name": "big.pdf",
                "content_base64": STANDARD.encode(vec![b'x'; 4096]),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.storage.object_count(), 0);
}

#[tokio::test]
async fn test_upload_rejects_invalid_payload() {
    let app = app();
    let (status, _) = app
        .send_json(
            "POST",
            "/admin/books",
            Some(&admin_auth()),
            json!({ "title": "Broken", "file_name": "b.pdf", "content_base64": "***" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stats_and_purge_do_not_refund_guest_quota() {
    let app = app();
    let book = app.upload("Probability Theory", PDF_BYTES).await;
    let uri = format!("/books/{}/download", book.id);
    app.get(&uri, None, Some("10.0.0.5")).await;
    app.get(&uri, None, Some("10.0.0.6")).await;

    let (_, body) = app.get("/admin/stats", Some(&admin_auth()), None).await;
    let stats: AdminDashboardStats = serde_json::from_slice(&body).unwrap();
    assert_eq!(stats.total_books, 1);
    assert_eq!(stats.total_downloads, 2);
    assert_eq!(stats.guest_downloads_today, 2);

    let (_, body) = app.get("/admin/books/popular", Some(&admin_auth()), None).await;
    let popular: Vec<Value> = serde_json::from_slice(&body).unwrap();
    assert_eq!(popular[0]["count"], 2);

    let request = Request::builder()
        .method("DELETE")
        .uri("/admin/downloads")
        .header(header::AUTHORIZATION, admin_auth())
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    let purge: PurgeResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(purge.deleted, 2);

    // The audit trail is gone but today's allowance is still spent.
    let (status, _) = app.get(&uri, None, Some("10.0.0.5")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_admin_password_override() {
    let app = app();
    app.register_and_login("alice", "pw1").await;

    let (status, _) = app
        .send_json(
            "PUT",
            "/admin/users/Alice/password",
            Some(&admin_auth()),
            json!({ "new_password": "pw2" }),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let old = json!({ "identifier": "alice", "password": "pw1" });
    assert_eq!(
        app.send_json("POST", "/login", None, old).await.0,
        StatusCode::UNAUTHORIZED
    );
    let new = json!({ "identifier": "alice", "password": "pw2" });
    assert_eq!(app.send_json("POST", "/login", None, new).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_purge_drops_counters_from_past_days() {
    let app = app();
    let book = app.upload("Probability Theory", PDF_BYTES).await;
    let uri = format!("/books/{}/download", book.id);
    let yesterday = app.clock.today();

    let (status, _) = app.get(&uri, None, Some("10.0.0.5")).await;
    assert_eq!(status, StatusCode::OK);

    app.clock.advance(Duration::days(1));
    let (status, _) = app.get(&uri, None, Some("10.0.0.5")).await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder()
        .method("DELETE")
        .uri("/admin/downloads")
        .header(header::AUTHORIZATION, admin_auth())
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        app.repo.guest_downloads_on("10.0.0.5", yesterday).await.unwrap(),
        0
    );
    assert_eq!(
        app.repo
            .guest_downloads_on("10.0.0.5", app.clock.today())
            .await
            .unwrap(),
        1
    );
}
