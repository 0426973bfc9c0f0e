use crate::{
    auth::{AdminUser, AuthUser, CredentialStore, Identity, Origin, normalize_identifier},
    error::AccessError,
    library::{Library, PDF_CONTENT_TYPE},
    models::{
        AdminDashboardStats, AdminResetPasswordRequest, BookCount, BookFilter, BookResponse,
        BookmarkToggleResponse, CredentialsRequest, DownloadEvent, LoginResponse, PurgeResponse,
        QuotaStatus, ResetCodeRequest, ResetConfirmRequest, UploadBookRequest, UserProfile,
        UserSummary,
    },
    quota::DownloadQuota,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

/// LimitParams
///
/// Optional result cap for ranked and audit listings.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct LimitParams {
    pub limit: Option<i64>,
}

impl LimitParams {
    fn or(&self, default: i64) -> i64 {
        self.limit.unwrap_or(default).clamp(1, 1000)
    }
}

// --- Public ---

/// register_user
///
/// [Public Route] Creates a verified account. Identifiers are case-insensitive.
#[utoipa::path(
    post,
    path = "/register",
    request_body = CredentialsRequest,
    responses(
        (status = 201, description = "Registered", body = UserProfile),
        (status = 409, description = "Identifier taken")
    )
)]
pub async fn register_user(
    State(store): State<CredentialStore>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, AccessError> {
    store.register(&payload.identifier, &payload.password).await?;
    let profile = UserProfile {
        identifier: normalize_identifier(&payload.identifier),
        role: "user".to_string(),
    };
    Ok((StatusCode::CREATED, Json(profile)))
}

/// login
///
/// [Public Route] Exchanges credentials for a session token.
#[utoipa::path(
    post,
    path = "/login",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 401, description = "Invalid or unverified credentials")
    )
)]
pub async fn login(
    State(store): State<CredentialStore>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<Json<LoginResponse>, AccessError> {
    Ok(Json(store.login(&payload.identifier, &payload.password).await?))
}

/// request_reset_code
///
/// [Public Route] Sends a one-time reset code. Always 202, whether or not the account exists.
#[utoipa::path(
    post,
    path = "/password/reset/request",
    request_body = ResetCodeRequest,
    responses((status = 202, description = "Code issued if the account exists"))
)]
pub async fn request_reset_code(
    State(store): State<CredentialStore>,
    Json(payload): Json<ResetCodeRequest>,
) -> Result<StatusCode, AccessError> {
    store.request_reset_code(&payload.identifier).await?;
    Ok(StatusCode::ACCEPTED)
}

/// confirm_reset
///
/// [Public Route] Redeems a reset code and sets the new password.
#[utoipa::path(
    post,
    path = "/password/reset/confirm",
    request_body = ResetConfirmRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "Invalid or expired reset code")
    )
)]
pub async fn confirm_reset(
    State(store): State<CredentialStore>,
    Json(payload): Json<ResetConfirmRequest>,
) -> Result<StatusCode, AccessError> {
    store
        .redeem_reset_code(&payload.identifier, &payload.code, &payload.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// search_books
///
/// [Public Route] Catalogue search. Never limited by the guest quota.
#[utoipa::path(
    get,
    path = "/books",
    params(BookFilter),
    responses((status = 200, description = "Matching books", body = [BookResponse]))
)]
pub async fn search_books(
    State(library): State<Library>,
    Query(filter): Query<BookFilter>,
) -> Result<Json<Vec<BookResponse>>, AccessError> {
    let books = library.search_books(filter).await?;
    Ok(Json(books.iter().map(BookResponse::from).collect()))
}

/// get_book_details
#[utoipa::path(
    get,
    path = "/books/{id}",
    params(("id" = Uuid, Path, description = "Book ID")),
    responses(
        (status = 200, description = "Found", body = BookResponse),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_book_details(
    State(library): State<Library>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookResponse>, AccessError> {
    let book = library.get_book(id).await?;
    Ok(Json(BookResponse::from(&book)))
}

/// download_book
///
/// [Public Route] Streams the PDF. Guests are limited per day; 429 tells them to log in.
#[utoipa::path(
    get,
    path = "/books/{id}/download",
    params(("id" = Uuid, Path, description = "Book ID")),
    responses(
        (status = 200, description = "PDF content"),
        (status = 404, description = "Not Found"),
        (status = 429, description = "Guest daily download limit reached")
    )
)]
pub async fn download_book(
    identity: Identity,
    Origin(origin): Origin,
    State(library): State<Library>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AccessError> {
    let (book, content) = library.download_book(&identity, origin, id).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        book.file_name.replace(['"', '\\', '\r', '\n'], "_")
    );
    Ok((
        [
            (header::CONTENT_TYPE, PDF_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        content,
    ))
}

/// get_quota
///
/// [Public Route] The caller's download allowance for today.
#[utoipa::path(
    get,
    path = "/quota",
    responses((status = 200, description = "Quota status", body = QuotaStatus))
)]
pub async fn get_quota(
    identity: Identity,
    State(quota): State<DownloadQuota>,
) -> Result<Json<QuotaStatus>, AccessError> {
    Ok(Json(quota.status(&identity).await?))
}

// --- Authenticated ---

/// get_me
#[utoipa::path(
    get,
    path = "/me",
    responses((status = 200, description = "Profile", body = UserProfile))
)]
pub async fn get_me(
    AuthUser(identity): AuthUser,
    State(store): State<CredentialStore>,
) -> Json<UserProfile> {
    let identifier = match &identity {
        Identity::User(id) => id.clone(),
        _ => store.admin_identifier().to_string(),
    };
    Json(UserProfile {
        identifier,
        role: identity.role().to_string(),
    })
}

/// get_my_bookmarks
#[utoipa::path(
    get,
    path = "/me/bookmarks",
    responses((status = 200, description = "Bookmarked books", body = [BookResponse]))
)]
pub async fn get_my_bookmarks(
    AuthUser(identity): AuthUser,
    State(library): State<Library>,
) -> Result<Json<Vec<BookResponse>>, AccessError> {
    Ok(Json(library.bookmarked_books(&identity).await?))
}

/// get_my_downloads
#[utoipa::path(
    get,
    path = "/me/downloads",
    responses((status = 200, description = "Download history", body = [DownloadEvent]))
)]
pub async fn get_my_downloads(
    AuthUser(identity): AuthUser,
    State(library): State<Library>,
) -> Result<Json<Vec<DownloadEvent>>, AccessError> {
    Ok(Json(library.download_history(&identity).await?))
}

/// toggle_bookmark
///
/// [Authenticated Route] Bookmarks the book, or removes the bookmark if present.
#[utoipa::path(
    post,
    path = "/books/{id}/bookmark",
    params(("id" = Uuid, Path, description = "Book ID")),
    responses(
        (status = 200, description = "Toggled", body = BookmarkToggleResponse),
        (status = 404, description = "Not Found")
    )
)]
pub async fn toggle_bookmark(
    AuthUser(identity): AuthUser,
    State(library): State<Library>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookmarkToggleResponse>, AccessError> {
    let bookmarked = library.toggle_bookmark(&identity, id).await?;
    Ok(Json(BookmarkToggleResponse { bookmarked }))
}

// --- Admin ---

/// get_admin_stats
#[utoipa::path(
    get,
    path = "/admin/stats",
    responses((status = 200, description = "Stats", body = AdminDashboardStats))
)]
pub async fn get_admin_stats(
    _admin: AdminUser,
    State(library): State<Library>,
) -> Result<Json<AdminDashboardStats>, AccessError> {
    Ok(Json(library.stats().await?))
}

/// get_admin_users
#[utoipa::path(
    get,
    path = "/admin/users",
    responses((status = 200, description = "Registered users", body = [UserSummary]))
)]
pub async fn get_admin_users(
    _admin: AdminUser,
    State(library): State<Library>,
) -> Result<Json<Vec<UserSummary>>, AccessError> {
    Ok(Json(library.list_users().await?))
}

/// admin_reset_password
///
/// [Admin Route] Overrides a user's password.
#[utoipa::path(
    put,
    path = "/admin/users/{identifier}/password",
    params(("identifier" = String, Path, description = "User identifier")),
    request_body = AdminResetPasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn admin_reset_password(
    _admin: AdminUser,
    State(store): State<CredentialStore>,
    Path(identifier): Path<String>,
    Json(payload): Json<AdminResetPasswordRequest>,
) -> Result<StatusCode, AccessError> {
    store.reset_password(&identifier, &payload.new_password).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// upload_book
///
/// [Admin Route] Adds a book. The PDF is sent base64-encoded.
#[utoipa::path(
    post,
    path = "/admin/books",
    request_body = UploadBookRequest,
    responses(
        (status = 201, description = "Uploaded", body = BookResponse),
        (status = 400, description = "Empty or malformed file")
    )
)]
pub async fn upload_book(
    _admin: AdminUser,
    State(library): State<Library>,
    Json(payload): Json<UploadBookRequest>,
) -> Result<impl IntoResponse, AccessError> {
    let book = library.upload_book(payload).await?;
    Ok((StatusCode::CREATED, Json(BookResponse::from(&book))))
}

/// delete_book
#[utoipa::path(
    delete,
    path = "/admin/books/{id}",
    params(("id" = Uuid, Path, description = "Book ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_book(
    _admin: AdminUser,
    State(library): State<Library>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AccessError> {
    library.delete_book(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// get_popular_books
///
/// [Admin Route] Books ranked by download count (default top 10).
#[utoipa::path(
    get,
    path = "/admin/books/popular",
    params(LimitParams),
    responses((status = 200, description = "Most downloaded", body = [BookCount]))
)]
pub async fn get_popular_books(
    _admin: AdminUser,
    State(library): State<Library>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<BookCount>>, AccessError> {
    Ok(Json(library.popular_books(params.or(10)).await?))
}

/// get_most_bookmarked
#[utoipa::path(
    get,
    path = "/admin/books/bookmarked",
    params(LimitParams),
    responses((status = 200, description = "Most bookmarked", body = [BookCount]))
)]
pub async fn get_most_bookmarked(
    _admin: AdminUser,
    State(library): State<Library>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<BookCount>>, AccessError> {
    Ok(Json(library.most_bookmarked(params.or(10)).await?))
}

/// get_downloads
///
/// [Admin Route] Audit listing, newest first (default 100).
#[utoipa::path(
    get,
    path = "/admin/downloads",
    params(LimitParams),
    responses((status = 200, description = "Download events", body = [DownloadEvent]))
)]
pub async fn get_downloads(
    _admin: AdminUser,
    State(library): State<Library>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<DownloadEvent>>, AccessError> {
    Ok(Json(library.list_downloads(params.or(100)).await?))
}

/// purge_downloads
#[utoipa::path(
    delete,
    path = "/admin/downloads",
    responses((status = 200, description = "Purged", body = PurgeResponse))
)]
pub async fn purge_downloads(
    _admin: AdminUser,
    State(library): State<Library>,
) -> Result<Json<PurgeResponse>, AccessError> {
    let deleted = library.purge_downloads().await?;
    Ok(Json(PurgeResponse { deleted }))
}
