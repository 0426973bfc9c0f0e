use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AccessError;

// --- Core Records (Mapped to Database) ---

/// User
///
/// A registered reader from the `users` table. The identifier is stored normalized
/// (trimmed, lower-cased) and is the primary key. The admin identity never appears here.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub identifier: String,
    // bcrypt digest; the plaintext password is never stored.
    pub password_hash: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

/// BookStorage
///
/// Where a book's PDF bytes live. Decided once at upload time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookStorage {
    /// Small files kept directly in the book record.
    Inline(Vec<u8>),
    /// Object key in the blob store.
    BlobRef(String),
}

impl BookStorage {
    pub fn kind(&self) -> &'static str {
        match self {
            BookStorage::Inline(_) => "inline",
            BookStorage::BlobRef(_) => "blob",
        }
    }
}

/// Book
///
/// Catalogue entry plus its storage reference.
#[derive(Debug, Clone)]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub language: String,
    pub course: Option<String>,
    pub keywords: Vec<String>,
    pub isbn: Option<String>,
    pub published_year: Option<i32>,
    pub file_name: String,
    pub storage: BookStorage,
    pub uploaded_at: DateTime<Utc>,
}

/// BookRow
///
/// Raw `books` row. Exactly one of `inline_content` / `blob_key` is set (enforced by a CHECK
/// constraint); conversion into `Book` folds them into `BookStorage`.
#[derive(Debug, Clone, FromRow)]
pub struct BookRow {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub language: String,
    pub course: Option<String>,
    pub keywords: Vec<String>,
    pub isbn: Option<String>,
    pub published_year: Option<i32>,
    pub file_name: String,
    pub inline_content: Option<Vec<u8>>,
    pub blob_key: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl TryFrom<BookRow> for Book {
    type Error = AccessError;

    fn try_from(row: BookRow) -> Result<Self, Self::Error> {
        let storage = match (row.inline_content, row.blob_key) {
            (Some(bytes), None) => BookStorage::Inline(bytes),
            (None, Some(key)) => BookStorage::BlobRef(key),
            _ => {
                return Err(AccessError::StorageUnavailable(format!(
                    "book {} has an inconsistent storage reference",
                    row.id
                )));
            }
        };

        Ok(Book {
            id: row.id,
            title: row.title,
            author: row.author,
            language: row.language,
            course: row.course,
            keywords: row.keywords,
            isbn: row.isbn,
            published_year: row.published_year,
            file_name: row.file_name,
            storage,
            uploaded_at: row.uploaded_at,
        })
    }
}

/// DownloadEvent
///
/// Immutable audit record appended on every successful download.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct DownloadEvent {
    pub id: Uuid,
    // User identifier, the admin identifier, or the "guest" marker.
    pub actor: String,
    // Guest quota key / network address, when known.
    pub origin: Option<String>,
    pub book_id: Uuid,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Bookmark
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Bookmark {
    pub identifier: String,
    pub book_id: Uuid,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// ResetCode
///
/// Pending self-service password reset. One live code per identifier.
#[derive(Debug, Clone, FromRow)]
pub struct ResetCode {
    pub identifier: String,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
}

// --- Request Payloads ---

/// RegisterRequest / LoginRequest body.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CredentialsRequest {
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ResetCodeRequest {
    pub identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ResetConfirmRequest {
    pub identifier: String,
    pub code: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AdminResetPasswordRequest {
    pub new_password: String,
}

/// UploadBookRequest
///
/// Admin upload payload. The PDF travels base64-encoded in `content_base64`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UploadBookRequest {
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default)]
    pub published_year: Option<i32>,
    #[schema(example = "probability.pdf")]
    pub file_name: String,
    pub content_base64: String,
}

/// BookFilter
///
/// Search parameters for GET /books. Text fields are case-insensitive substring matches;
/// `isbn` and `published_year` are exact.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::IntoParams)]
pub struct BookFilter {
    pub title: Option<String>,
    pub author: Option<String>,
    pub language: Option<String>,
    pub course: Option<String>,
    pub keyword: Option<String>,
    pub isbn: Option<String>,
    pub published_year: Option<i32>,
}

// --- Responses ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub token: String,
    pub identifier: String,
    // "admin" or "user".
    pub role: String,
}

/// BookResponse
///
/// Catalogue view of a book; never carries the file bytes.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct BookResponse {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub language: String,
    pub course: Option<String>,
    pub keywords: Vec<String>,
    pub isbn: Option<String>,
    pub published_year: Option<i32>,
    pub file_name: String,
    // "inline" or "blob".
    pub storage: String,
    #[ts(type = "string")]
    pub uploaded_at: DateTime<Utc>,
}

impl From<&Book> for BookResponse {
    fn from(book: &Book) -> Self {
        BookResponse {
            id: book.id,
            title: book.title.clone(),
            author: book.author.clone(),
            language: book.language.clone(),
            course: book.course.clone(),
            keywords: book.keywords.clone(),
            isbn: book.isbn.clone(),
            published_year: book.published_year,
            file_name: book.file_name.clone(),
            storage: book.storage.kind().to_string(),
            uploaded_at: book.uploaded_at,
        }
    }
}

/// UserSummary
///
/// Admin listing row; no password material.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserSummary {
    pub identifier: String,
    pub verified: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        UserSummary {
            identifier: user.identifier,
            verified: user.verified,
            created_at: user.created_at,
        }
    }
}

/// UserProfile
///
/// Output of GET /me.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserProfile {
    pub identifier: String,
    pub role: String,
}

/// QuotaStatus
///
/// The caller's download allowance for today. `limit` is absent for unlimited identities.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct QuotaStatus {
    // "admin", "user" or "guest".
    pub role: String,
    pub limit: Option<u32>,
    pub used: u32,
    pub can_download: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct BookmarkToggleResponse {
    pub bookmarked: bool,
}

/// BookCount
///
/// A book ranked by some counter (downloads, bookmarks).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, PartialEq)]
#[ts(export)]
pub struct BookCount {
    pub book_id: Uuid,
    pub title: String,
    pub count: i64,
}

/// AdminDashboardStats
///
/// Output schema for GET /admin/stats.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct AdminDashboardStats {
    pub total_users: i64,
    pub total_books: i64,
    pub total_downloads: i64,
    pub guest_downloads_today: i64,
    pub total_bookmarks: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PurgeResponse {
    pub deleted: u64,
}
