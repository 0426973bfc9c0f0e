use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Access control: credentials, sessions and identity resolution.
pub mod auth;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod notify;
pub mod quota;

// Library services and persistence.
pub mod handlers;
pub mod library;
pub mod models;
pub mod repository;
pub mod storage;

// Routing split by access level (Public, Authenticated, Admin).
pub mod routes;
use auth::{AdminUser, AuthUser, CredentialStore};
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use clock::{ClockState, FixedClock, SystemClock};
pub use config::AppConfig;
pub use error::{AccessError, AccessResult};
pub use library::Library;
pub use notify::{CodeSenderState, ConsoleCodeSender};
pub use quota::DownloadQuota;
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};
pub use storage::{MockStorageService, S3StorageClient, StorageState};

/// ApiDoc
///
/// OpenAPI document for every route, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::register_user, handlers::login, handlers::request_reset_code,
        handlers::confirm_reset, handlers::search_books, handlers::get_book_details,
        handlers::download_book, handlers::get_quota, handlers::get_me,
        handlers::get_my_bookmarks, handlers::get_my_downloads, handlers::toggle_bookmark,
        handlers::get_admin_stats, handlers::get_admin_users, handlers::admin_reset_password,
        handlers::upload_book, handlers::delete_book, handlers::get_popular_books,
        handlers::get_most_bookmarked, handlers::get_downloads, handlers::purge_downloads
    ),
    components(
        schemas(
            models::CredentialsRequest, models::ResetCodeRequest, models::ResetConfirmRequest,
            models::AdminResetPasswordRequest, models::UploadBookRequest, models::LoginResponse,
            models::BookResponse, models::UserSummary, models::UserProfile, models::QuotaStatus,
            models::BookmarkToggleResponse, models::BookCount, models::AdminDashboardStats,
            models::DownloadEvent, models::PurgeResponse,
        )
    ),
    tags(
        (name = "pdf-library", description = "PDF Book Library API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Shared, cloneable container for every service the handlers need. Collaborators are trait
/// objects so tests can swap in the in-memory repository, mock storage and a fixed clock.
#[derive(Clone)]
pub struct AppState {
    pub repo: RepositoryState,
    pub storage: StorageState,
    /// Source of "now" and "today" for sessions, reset codes and the guest quota window.
    pub clock: ClockState,
    /// Delivery channel for password reset codes.
    pub sender: CodeSenderState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for StorageState {
    fn from_ref(app_state: &AppState) -> StorageState {
        app_state.storage.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

impl FromRef<AppState> for CredentialStore {
    fn from_ref(app_state: &AppState) -> CredentialStore {
        CredentialStore::new(
            app_state.repo.clone(),
            app_state.clock.clone(),
            app_state.sender.clone(),
            app_state.config.clone(),
        )
    }
}

impl FromRef<AppState> for DownloadQuota {
    fn from_ref(app_state: &AppState) -> DownloadQuota {
        DownloadQuota::new(
            app_state.repo.clone(),
            app_state.clock.clone(),
            app_state.config.clone(),
        )
    }
}

impl FromRef<AppState> for Library {
    fn from_ref(app_state: &AppState) -> Library {
        Library::new(
            app_state.repo.clone(),
            app_state.storage.clone(),
            app_state.clock.clone(),
            DownloadQuota::from_ref(app_state),
            app_state.config.clone(),
        )
    }
}

/// auth_middleware
///
/// Rejects guests before the handler runs. `AuthUser` does the work; a failed extraction
/// short-circuits with its `AccessError` response. The resolved `Identity` stays in the request
/// extensions, so the handler's extractor reuses it.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// admin_middleware
///
/// Same as `auth_middleware` but only the admin identity passes.
async fn admin_middleware(_admin: AdminUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the routing tree, scoped access layers and the observability stack.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Guests allowed. Downloads are quota-checked inside the handler.
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        .nest(
            "/admin",
            admin::admin_routes()
                .route_layer(middleware::from_fn_with_state(
                    state.clone(),
                    admin_middleware,
                ))
                // Uploads arrive as base64 inside JSON and outgrow axum's 2 MB default.
                .layer(DefaultBodyLimit::max(state.config.max_upload_bytes)),
        )
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span per request carrying the `x-request-id` so every log line of a request correlates.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
