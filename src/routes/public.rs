use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints available without logging in. Anonymous callers resolve to a guest identity;
/// searching and browsing are never limited, only downloads count toward the guest quota.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness check for monitoring and load balancers.
        .route("/health", get(|| async { "ok" }))
        // POST /register
        // Creates a verified account with a bcrypt-hashed password.
        .route("/register", post(handlers::register_user))
        // POST /login
        // Exchanges identifier + password for a session token.
        .route("/login", post(handlers::login))
        // POST /password/reset/request, POST /password/reset/confirm
        // Self-service password reset with a one-time code.
        .route(
            "/password/reset/request",
            post(handlers::request_reset_code),
        )
        .route("/password/reset/confirm", post(handlers::confirm_reset))
        // GET /books?title=...&author=...&language=...&course=...&keyword=...
        // Catalogue search (case-insensitive substring matching).
        .route("/books", get(handlers::search_books))
        // GET /books/{id}
        .route("/books/{id}", get(handlers::get_book_details))
        // GET /books/{id}/download
        // Returns the PDF. Guests are capped per UTC day; over the cap the response is 429.
        .route("/books/{id}/download", get(handlers::download_book))
        // GET /quota
        // The caller's remaining download allowance for today.
        .route("/quota", get(handlers::get_quota))
}
