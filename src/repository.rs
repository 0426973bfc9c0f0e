use crate::error::{AccessError, AccessResult};
use crate::models::{
    AdminDashboardStats, Book, BookCount, BookFilter, BookRow, BookStorage, Bookmark,
    DownloadEvent, ResetCode, User,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, query_builder::QueryBuilder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Actor recorded on download events made by anonymous visitors.
pub const GUEST_ACTOR: &str = "guest";

/// Repository Trait
///
/// The storage collaborator for the whole service. Every call reports collaborator failures as
/// `AccessError::StorageUnavailable` instead of swallowing them.
///
/// Two operations carry the concurrency contract:
/// - `create_user` relies on the store's uniqueness constraint, not a prior lookup.
/// - `record_guest_download` is one atomic increment-with-ceiling plus the event append.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    /// Inserts the user. Returns false (and writes nothing) if the identifier is taken.
    async fn create_user(&self, user: User) -> AccessResult<bool>;
    async fn get_user(&self, identifier: &str) -> AccessResult<Option<User>>;
    /// Returns false if no such user.
    async fn update_password(&self, identifier: &str, password_hash: &str) -> AccessResult<bool>;
    async fn list_users(&self) -> AccessResult<Vec<User>>;

    // --- Password reset codes ---
    /// Stores the code, replacing any previous one for the identifier.
    async fn put_reset_code(&self, code: ResetCode) -> AccessResult<()>;
    /// Removes and returns the pending code (single use).
    async fn take_reset_code(&self, identifier: &str) -> AccessResult<Option<ResetCode>>;

    // --- Guest quota ---
    /// Downloads already counted for (key, day).
    async fn guest_downloads_on(&self, guest_key: &str, day: NaiveDate) -> AccessResult<u32>;
    /// Atomically increments the (key, day) counter if it is below `limit` and appends `event`
    /// in the same unit of work. Returns the new count, or None (and writes nothing) when the
    /// ceiling was already reached. If either write fails, neither is kept.
    async fn record_guest_download(
        &self,
        guest_key: &str,
        day: NaiveDate,
        limit: u32,
        event: DownloadEvent,
    ) -> AccessResult<Option<u32>>;
    /// Drops counters for days before `before`. Returns the number of counters removed.
    async fn prune_guest_quota(&self, before: NaiveDate) -> AccessResult<u64>;

    // --- Download events ---
    async fn insert_download(&self, event: DownloadEvent) -> AccessResult<()>;
    /// Newest first.
    async fn list_downloads(&self, limit: i64) -> AccessResult<Vec<DownloadEvent>>;
    /// Newest first.
    async fn downloads_for_actor(&self, actor: &str) -> AccessResult<Vec<DownloadEvent>>;
    /// Bulk administrative purge. Returns the number of events removed.
    async fn purge_downloads(&self) -> AccessResult<u64>;
    async fn popular_books(&self, limit: i64) -> AccessResult<Vec<BookCount>>;

    // --- Books ---
    async fn insert_book(&self, book: Book) -> AccessResult<()>;
    async fn get_book(&self, id: Uuid) -> AccessResult<Option<Book>>;
    /// Newest first.
    async fn search_books(&self, filter: BookFilter) -> AccessResult<Vec<Book>>;
    /// Returns the removed book so its blob can be cleaned up.
    async fn delete_book(&self, id: Uuid) -> AccessResult<Option<Book>>;

    // --- Bookmarks ---
    /// Adds the bookmark if absent, removes it if present. Returns true when now bookmarked.
    async fn toggle_bookmark(
        &self,
        identifier: &str,
        book_id: Uuid,
        at: DateTime<Utc>,
    ) -> AccessResult<bool>;
    async fn list_bookmarks(&self, identifier: &str) -> AccessResult<Vec<Bookmark>>;
    async fn most_bookmarked(&self, limit: i64) -> AccessResult<Vec<BookCount>>;

    /// Dashboard counters; guest downloads are counted from `day_start` on.
    async fn get_stats(&self, day_start: DateTime<Utc>) -> AccessResult<AdminDashboardStats>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// Escapes LIKE metacharacters and wraps the term for a substring match.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

const INSERT_DOWNLOAD: &str = "INSERT INTO download_events (id, actor, origin, book_id, created_at) \
     VALUES ($1, $2, $3, $4, $5)";

const BOOK_COLUMNS: &str = "id, title, author, language, course, keywords, isbn, published_year, \
     file_name, inline_content, blob_key, uploaded_at";

/// PostgresRepository
///
/// `Repository` backed by PostgreSQL. Schema lives in `migrations/`.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    /// create_user
    ///
    /// `ON CONFLICT DO NOTHING` on the identifier primary key makes the duplicate check and the
    /// insert one statement; two racing registrations cannot both succeed.
    async fn create_user(&self, user: User) -> AccessResult<bool> {
        let res = sqlx::query(
            "INSERT INTO users (identifier, password_hash, verified, created_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (identifier) DO NOTHING",
        )
        .bind(&user.identifier)
        .bind(&user.password_hash)
        .bind(user.verified)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn get_user(&self, identifier: &str) -> AccessResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT identifier, password_hash, verified, created_at FROM users WHERE identifier = $1",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn update_password(&self, identifier: &str, password_hash: &str) -> AccessResult<bool> {
        let res = sqlx::query("UPDATE users SET password_hash = $2 WHERE identifier = $1")
            .bind(identifier)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_users(&self) -> AccessResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT identifier, password_hash, verified, created_at FROM users ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn put_reset_code(&self, code: ResetCode) -> AccessResult<()> {
        sqlx::query(
            "INSERT INTO reset_codes (identifier, code_hash, expires_at) VALUES ($1, $2, $3) \
             ON CONFLICT (identifier) DO UPDATE SET code_hash = EXCLUDED.code_hash, \
             expires_at = EXCLUDED.expires_at",
        )
        .bind(&code.identifier)
        .bind(&code.code_hash)
        .bind(code.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn take_reset_code(&self, identifier: &str) -> AccessResult<Option<ResetCode>> {
        let code = sqlx::query_as::<_, ResetCode>(
            "DELETE FROM reset_codes WHERE identifier = $1 \
             RETURNING identifier, code_hash, expires_at",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(code)
    }

    async fn guest_downloads_on(&self, guest_key: &str, day: NaiveDate) -> AccessResult<u32> {
        let count: Option<i32> =
            sqlx::query_scalar("SELECT count FROM guest_quota WHERE guest_key = $1 AND day = $2")
                .bind(guest_key)
                .bind(day)
                .fetch_optional(&self.pool)
                .await?;
        Ok(count.unwrap_or(0).max(0) as u32)
    }

    /// record_guest_download
    ///
    /// Conditional upsert and event insert in one transaction. The `WHERE` on the conflict branch
    /// makes the update a no-op (and `RETURNING` yield no row) once the counter has reached the
    /// ceiling. Dropping the transaction without commit rolls the counter back.
    async fn record_guest_download(
        &self,
        guest_key: &str,
        day: NaiveDate,
        limit: u32,
        event: DownloadEvent,
    ) -> AccessResult<Option<u32>> {
        if limit == 0 {
            return Ok(None);
        }
        let mut tx = self.pool.begin().await?;

        let count: Option<i32> = sqlx::query_scalar(
            r#"
            INSERT INTO guest_quota (guest_key, day, count) VALUES ($1, $2, 1)
            ON CONFLICT (guest_key, day)
            DO UPDATE SET count = guest_quota.count + 1
            WHERE guest_quota.count < $3
            RETURNING count
            "#,
        )
        .bind(guest_key)
        .bind(day)
        .bind(limit as i32)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(count) = count else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(INSERT_DOWNLOAD)
            .bind(event.id)
            .bind(&event.actor)
            .bind(&event.origin)
            .bind(event.book_id)
            .bind(event.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(count.max(0) as u32))
    }

    async fn prune_guest_quota(&self, before: NaiveDate) -> AccessResult<u64> {
        let res = sqlx::query("DELETE FROM guest_quota WHERE day < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn insert_download(&self, event: DownloadEvent) -> AccessResult<()> {
        sqlx::query(INSERT_DOWNLOAD)
            .bind(event.id)
            .bind(&event.actor)
            .bind(&event.origin)
            .bind(event.book_id)
            .bind(event.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_downloads(&self, limit: i64) -> AccessResult<Vec<DownloadEvent>> {
        let events = sqlx::query_as::<_, DownloadEvent>(
            "SELECT id, actor, origin, book_id, created_at FROM download_events \
             ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn downloads_for_actor(&self, actor: &str) -> AccessResult<Vec<DownloadEvent>> {
        let events = sqlx::query_as::<_, DownloadEvent>(
            "SELECT id, actor, origin, book_id, created_at FROM download_events \
             WHERE actor = $1 ORDER BY created_at DESC",
        )
        .bind(actor)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn purge_downloads(&self) -> AccessResult<u64> {
        let res = sqlx::query("DELETE FROM download_events")
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn popular_books(&self, limit: i64) -> AccessResult<Vec<BookCount>> {
        let rows = sqlx::query_as::<_, BookCount>(
            r#"
            SELECT b.id AS book_id, b.title, COUNT(d.id) AS count
            FROM books b
            JOIN download_events d ON d.book_id = b.id
            GROUP BY b.id, b.title
            ORDER BY count DESC, b.title ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_book(&self, book: Book) -> AccessResult<()> {
        let (inline_content, blob_key) = match book.storage {
            BookStorage::Inline(bytes) => (Some(bytes), None),
            BookStorage::BlobRef(key) => (None, Some(key)),
        };
        sqlx::query(
            r#"
            INSERT INTO books (id, title, author, language, course, keywords, isbn,
                               published_year, file_name, inline_content, blob_key, uploaded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(book.id)
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.language)
        .bind(&book.course)
        .bind(&book.keywords)
        .bind(&book.isbn)
        .bind(book.published_year)
        .bind(&book.file_name)
        .bind(inline_content)
        .bind(blob_key)
        .bind(book.uploaded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_book(&self, id: Uuid) -> AccessResult<Option<Book>> {
        let row = sqlx::query_as::<_, BookRow>(&format!(
            "SELECT {} FROM books WHERE id = $1",
            BOOK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Book::try_from).transpose()
    }

    /// search_books
    ///
    /// QueryBuilder keeps every user-supplied term a bound parameter.
    async fn search_books(&self, filter: BookFilter) -> AccessResult<Vec<Book>> {
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM books WHERE 1 = 1", BOOK_COLUMNS));

        let text_filters = [
            ("title", filter.title),
            ("author", filter.author),
            ("language", filter.language),
            ("course", filter.course),
        ];
        for (column, term) in text_filters {
            if let Some(term) = term.filter(|t| !t.trim().is_empty()) {
                builder.push(format!(" AND {} ILIKE ", column));
                builder.push_bind(like_pattern(term.trim()));
            }
        }

        if let Some(keyword) = filter.keyword.filter(|k| !k.trim().is_empty()) {
            builder.push(" AND EXISTS (SELECT 1 FROM unnest(keywords) AS k WHERE k ILIKE ");
            builder.push_bind(like_pattern(keyword.trim()));
            builder.push(")");
        }
        if let Some(isbn) = filter.isbn.filter(|i| !i.trim().is_empty()) {
            builder.push(" AND isbn = ");
            builder.push_bind(isbn.trim().to_string());
        }
        if let Some(year) = filter.published_year {
            builder.push(" AND published_year = ");
            builder.push_bind(year);
        }

        builder.push(" ORDER BY uploaded_at DESC");

        let rows = builder
            .build_query_as::<BookRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Book::try_from).collect()
    }

    async fn delete_book(&self, id: Uuid) -> AccessResult<Option<Book>> {
        let row = sqlx::query_as::<_, BookRow>(&format!(
            "DELETE FROM books WHERE id = $1 RETURNING {}",
            BOOK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Book::try_from).transpose()
    }

    async fn toggle_bookmark(
        &self,
        identifier: &str,
        book_id: Uuid,
        at: DateTime<Utc>,
    ) -> AccessResult<bool> {
        let removed = sqlx::query("DELETE FROM bookmarks WHERE identifier = $1 AND book_id = $2")
            .bind(identifier)
            .bind(book_id)
            .execute(&self.pool)
            .await?;
        if removed.rows_affected() > 0 {
            return Ok(false);
        }
        sqlx::query(
            "INSERT INTO bookmarks (identifier, book_id, created_at) VALUES ($1, $2, $3) \
             ON CONFLICT DO NOTHING",
        )
        .bind(identifier)
        .bind(book_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    async fn list_bookmarks(&self, identifier: &str) -> AccessResult<Vec<Bookmark>> {
        let rows = sqlx::query_as::<_, Bookmark>(
            "SELECT identifier, book_id, created_at FROM bookmarks \
             WHERE identifier = $1 ORDER BY created_at DESC",
        )
        .bind(identifier)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn most_bookmarked(&self, limit: i64) -> AccessResult<Vec<BookCount>> {
        let rows = sqlx::query_as::<_, BookCount>(
            r#"
            SELECT b.id AS book_id, b.title, COUNT(*) AS count
            FROM bookmarks f
            JOIN books b ON b.id = f.book_id
            GROUP BY b.id, b.title
            ORDER BY count DESC, b.title ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_stats(&self, day_start: DateTime<Utc>) -> AccessResult<AdminDashboardStats> {
        let total_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        let total_books: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books")
            .fetch_one(&self.pool)
            .await?;
        let total_downloads: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM download_events")
            .fetch_one(&self.pool)
            .await?;
        let guest_downloads_today: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM download_events WHERE actor = $1 AND created_at >= $2",
        )
        .bind(GUEST_ACTOR)
        .bind(day_start)
        .fetch_one(&self.pool)
        .await?;
        let total_bookmarks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookmarks")
            .fetch_one(&self.pool)
            .await?;

        Ok(AdminDashboardStats {
            total_users,
            total_books,
            total_downloads,
            guest_downloads_today,
            total_bookmarks,
        })
    }
}

// --- In-memory implementation ---

#[derive(Default)]
struct MemoryTables {
    users: HashMap<String, User>,
    reset_codes: HashMap<String, ResetCode>,
    guest_quota: HashMap<(String, NaiveDate), u32>,
    downloads: Vec<DownloadEvent>,
    books: HashMap<Uuid, Book>,
    bookmarks: Vec<Bookmark>,
}

/// InMemoryRepository
///
/// `Repository` kept in process memory, used by tests and for running the service without a
/// database. Every operation runs under one lock, so check-then-write sequences are atomic.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: Mutex<MemoryTables>,
    /// When true, every call fails with `StorageUnavailable`.
    should_fail: bool,
    /// When true, only download event writes fail.
    reject_events: bool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    /// Reads and every other write succeed; appending a download event fails.
    pub fn new_rejecting_events() -> Self {
        Self {
            reject_events: true,
            ..Self::default()
        }
    }

    fn check_event_writes(&self) -> AccessResult<()> {
        if self.reject_events {
            return Err(AccessError::StorageUnavailable(
                "download event write rejected".to_string(),
            ));
        }
        Ok(())
    }

    fn tables(&self) -> AccessResult<MutexGuard<'_, MemoryTables>> {
        if self.should_fail {
            return Err(AccessError::StorageUnavailable(
                "in-memory store offline".to_string(),
            ));
        }
        self.tables
            .lock()
            .map_err(|_| AccessError::StorageUnavailable("in-memory store poisoned".to_string()))
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn book_matches(book: &Book, filter: &BookFilter) -> bool {
    let text = |term: &Option<String>, value: &str| match term.as_deref().map(str::trim) {
        Some(t) if !t.is_empty() => contains_ci(value, t),
        _ => true,
    };

    text(&filter.title, &book.title)
        && text(&filter.author, &book.author)
        && text(&filter.language, &book.language)
        && text(&filter.course, book.course.as_deref().unwrap_or(""))
        && match filter.keyword.as_deref().map(str::trim) {
            Some(k) if !k.is_empty() => book.keywords.iter().any(|kw| contains_ci(kw, k)),
            _ => true,
        }
        && match filter.isbn.as_deref().map(str::trim) {
            Some(i) if !i.is_empty() => book.isbn.as_deref() == Some(i),
            _ => true,
        }
        && filter
            .published_year
            .is_none_or(|y| book.published_year == Some(y))
}

fn ranked(counts: HashMap<Uuid, i64>, books: &HashMap<Uuid, Book>, limit: i64) -> Vec<BookCount> {
    let mut rows: Vec<BookCount> = counts
        .into_iter()
        .filter_map(|(book_id, count)| {
            books.get(&book_id).map(|b| BookCount {
                book_id,
                title: b.title.clone(),
                count,
            })
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.title.cmp(&b.title)));
    rows.truncate(limit.max(0) as usize);
    rows
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_user(&self, user: User) -> AccessResult<bool> {
        let mut t = self.tables()?;
        if t.users.contains_key(&user.identifier) {
            return Ok(false);
        }
        t.users.insert(user.identifier.clone(), user);
        Ok(true)
    }

    async fn get_user(&self, identifier: &str) -> AccessResult<Option<User>> {
        Ok(self.tables()?.users.get(identifier).cloned())
    }

    async fn update_password(&self, identifier: &str, password_hash: &str) -> AccessResult<bool> {
        let mut t = self.tables()?;
        match t.users.get_mut(identifier) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_users(&self) -> AccessResult<Vec<User>> {
        let mut users: Vec<User> = self.tables()?.users.values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn put_reset_code(&self, code: ResetCode) -> AccessResult<()> {
        self.tables()?
            .reset_codes
            .insert(code.identifier.clone(), code);
        Ok(())
    }

    async fn take_reset_code(&self, identifier: &str) -> AccessResult<Option<ResetCode>> {
        Ok(self.tables()?.reset_codes.remove(identifier))
    }

    async fn guest_downloads_on(&self, guest_key: &str, day: NaiveDate) -> AccessResult<u32> {
        let t = self.tables()?;
        Ok(t.guest_quota
            .get(&(guest_key.to_string(), day))
            .copied()
            .unwrap_or(0))
    }

    async fn record_guest_download(
        &self,
        guest_key: &str,
        day: NaiveDate,
        limit: u32,
        event: DownloadEvent,
    ) -> AccessResult<Option<u32>> {
        let mut t = self.tables()?;
        let key = (guest_key.to_string(), day);
        let used = t.guest_quota.get(&key).copied().unwrap_or(0);
        if used >= limit {
            return Ok(None);
        }
        self.check_event_writes()?;
        t.guest_quota.insert(key, used + 1);
        t.downloads.push(event);
        Ok(Some(used + 1))
    }

    async fn prune_guest_quota(&self, before: NaiveDate) -> AccessResult<u64> {
        let mut t = self.tables()?;
        let total = t.guest_quota.len();
        t.guest_quota.retain(|(_, day), _| *day >= before);
        Ok((total - t.guest_quota.len()) as u64)
    }

    async fn insert_download(&self, event: DownloadEvent) -> AccessResult<()> {
        let mut t = self.tables()?;
        self.check_event_writes()?;
        t.downloads.push(event);
        Ok(())
    }

    async fn list_downloads(&self, limit: i64) -> AccessResult<Vec<DownloadEvent>> {
        let t = self.tables()?;
        let mut events = t.downloads.clone();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }

    async fn downloads_for_actor(&self, actor: &str) -> AccessResult<Vec<DownloadEvent>> {
        let t = self.tables()?;
        let mut events: Vec<DownloadEvent> = t
            .downloads
            .iter()
            .filter(|e| e.actor == actor)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(events)
    }

    async fn purge_downloads(&self) -> AccessResult<u64> {
        let mut t = self.tables()?;
        let removed = t.downloads.len() as u64;
        t.downloads.clear();
        Ok(removed)
    }

    async fn popular_books(&self, limit: i64) -> AccessResult<Vec<BookCount>> {
        let t = self.tables()?;
        let mut counts: HashMap<Uuid, i64> = HashMap::new();
        for event in &t.downloads {
            *counts.entry(event.book_id).or_insert(0) += 1;
        }
        Ok(ranked(counts, &t.books, limit))
    }

    async fn insert_book(&self, book: Book) -> AccessResult<()> {
        self.tables()?.books.insert(book.id, book);
        Ok(())
    }

    async fn get_book(&self, id: Uuid) -> AccessResult<Option<Book>> {
        Ok(self.tables()?.books.get(&id).cloned())
    }

    async fn search_books(&self, filter: BookFilter) -> AccessResult<Vec<Book>> {
        let t = self.tables()?;
        let mut books: Vec<Book> = t
            .books
            .values()
            .filter(|b| book_matches(b, &filter))
            .cloned()
            .collect();
        books.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(books)
    }

    async fn delete_book(&self, id: Uuid) -> AccessResult<Option<Book>> {
        let mut t = self.tables()?;
        let removed = t.books.remove(&id);
        if removed.is_some() {
            t.bookmarks.retain(|b| b.book_id != id);
        }
        Ok(removed)
    }

    async fn toggle_bookmark(
        &self,
        identifier: &str,
        book_id: Uuid,
        at: DateTime<Utc>,
    ) -> AccessResult<bool> {
        let mut t = self.tables()?;
        let before = t.bookmarks.len();
        t.bookmarks
            .retain(|b| !(b.identifier == identifier && b.book_id == book_id));
        if t.bookmarks.len() < before {
            return Ok(false);
        }
        t.bookmarks.push(Bookmark {
            identifier: identifier.to_string(),
            book_id,
            created_at: at,
        });
        Ok(true)
    }

    async fn list_bookmarks(&self, identifier: &str) -> AccessResult<Vec<Bookmark>> {
        let t = self.tables()?;
        let mut rows: Vec<Bookmark> = t
            .bookmarks
            .iter()
            .filter(|b| b.identifier == identifier)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn most_bookmarked(&self, limit: i64) -> AccessResult<Vec<BookCount>> {
        let t = self.tables()?;
        let mut counts: HashMap<Uuid, i64> = HashMap::new();
        for bookmark in &t.bookmarks {
            *counts.entry(bookmark.book_id).or_insert(0) += 1;
        }
        Ok(ranked(counts, &t.books, limit))
    }

    async fn get_stats(&self, day_start: DateTime<Utc>) -> AccessResult<AdminDashboardStats> {
        let t = self.tables()?;
        Ok(AdminDashboardStats {
            total_users: t.users.len() as i64,
            total_books: t.books.len() as i64,
            total_downloads: t.downloads.len() as i64,
            guest_downloads_today: t
                .downloads
                .iter()
                .filter(|e| e.actor == GUEST_ACTOR && e.created_at >= day_start)
                .count() as i64,
            total_bookmarks: t.bookmarks.len() as i64,
        })
    }
}
