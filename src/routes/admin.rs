use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, post, put},
};

/// Admin Router Module
///
/// Upload, moderation and analytics. Nested under `/admin` and wrapped in a layer that only
/// lets the admin identity through (401 for guests, 403 for users). Handlers also take the
/// `AdminUser` extractor so they stay safe if mounted elsewhere.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/stats
        // Dashboard counters: users, books, downloads, guest downloads today, bookmarks.
        .route("/stats", get(handlers::get_admin_stats))
        // GET /admin/users
        .route("/users", get(handlers::get_admin_users))
        // PUT /admin/users/{identifier}/password
        // Administrative password override.
        .route(
            "/users/{identifier}/password",
            put(handlers::admin_reset_password),
        )
        // POST /admin/books
        // Upload a PDF (base64 in JSON). Stored inline or in the blob store by size.
        .route("/books", post(handlers::upload_book))
        // DELETE /admin/books/{id}
        .route("/books/{id}", delete(handlers::delete_book))
        // GET /admin/books/popular, GET /admin/books/bookmarked
        // Ranked listings for the analytics dashboard.
        .route("/books/popular", get(handlers::get_popular_books))
        .route("/books/bookmarked", get(handlers::get_most_bookmarked))
        // GET /admin/downloads, DELETE /admin/downloads
        // Audit listing and bulk purge of download events.
        .route(
            "/downloads",
            get(handlers::get_downloads).delete(handlers::purge_downloads),
        )
}
