use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Routes for logged-in readers. The router is wrapped in a layer that rejects guests with 401
/// before any handler runs; handlers still receive the resolved `AuthUser`.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /me
        .route("/me", get(handlers::get_me))
        // GET /me/bookmarks
        // Books the caller has bookmarked, most recent first.
        .route("/me/bookmarks", get(handlers::get_my_bookmarks))
        // GET /me/downloads
        // The caller's download history.
        .route("/me/downloads", get(handlers::get_my_downloads))
        // POST /books/{id}/bookmark
        // Toggles the bookmark on a book.
        .route("/books/{id}/bookmark", post(handlers::toggle_bookmark))
}
