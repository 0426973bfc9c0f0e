use base64::{Engine, engine::general_purpose::STANDARD};
use std::net::IpAddr;
use uuid::Uuid;

use crate::{
    auth::Identity,
    clock::{ClockState, start_of_day},
    config::AppConfig,
    error::{AccessError, AccessResult},
    models::{
        AdminDashboardStats, Book, BookCount, BookFilter, BookResponse, BookStorage,
        DownloadEvent, UploadBookRequest, UserSummary,
    },
    quota::DownloadQuota,
    repository::RepositoryState,
    storage::StorageState,
};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Library
///
/// Catalogue, downloads, bookmarks and admin analytics. Calls into `DownloadQuota` for every
/// download decision; everything else is pass-through to the repository and blob store.
#[derive(Clone)]
pub struct Library {
    repo: RepositoryState,
    storage: StorageState,
    clock: ClockState,
    quota: DownloadQuota,
    config: AppConfig,
}

/// Bookmarks and history belong to regular users only.
fn reader(identity: &Identity) -> AccessResult<&str> {
    match identity {
        Identity::User(identifier) => Ok(identifier),
        Identity::Admin => Err(AccessError::Forbidden),
        Identity::Guest(_) => Err(AccessError::NotAuthenticated),
    }
}

fn non_empty(value: &str, field: &str) -> AccessResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AccessError::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

impl Library {
    pub fn new(
        repo: RepositoryState,
        storage: StorageState,
        clock: ClockState,
        quota: DownloadQuota,
        config: AppConfig,
    ) -> Self {
        Self {
            repo,
            storage,
            clock,
            quota,
            config,
        }
    }

    /// upload_book
    ///
    /// Small files are kept inline; larger ones go to the blob store first and the row only
    /// references them. If the row cannot be written the blob is removed again.
    pub async fn upload_book(&self, req: UploadBookRequest) -> AccessResult<Book> {
        let title = non_empty(&req.title, "Title")?;
        let file_name = non_empty(&req.file_name, "File name")?;
        let content = STANDARD
            .decode(req.content_base64.trim())
            .map_err(|_| AccessError::Validation("File content is not valid base64".to_string()))?;
        if content.is_empty() {
            return Err(AccessError::Validation("File is empty".to_string()));
        }

        let id = Uuid::new_v4();
        let size = content.len();
        let storage = if size <= self.config.inline_max_bytes {
            BookStorage::Inline(content)
        } else {
            let key = format!("books/{}.pdf", id);
            self.storage
                .put_object(&key, content, PDF_CONTENT_TYPE)
                .await?;
            BookStorage::BlobRef(key)
        };

        let book = Book {
            id,
            title,
            author: req.author.trim().to_string(),
            language: req.language.trim().to_string(),
            course: req.course.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            keywords: req
                .keywords
                .iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            isbn: req.isbn.map(|i| i.trim().to_string()).filter(|i| !i.is_empty()),
            published_year: req.published_year,
            file_name,
            storage,
            uploaded_at: self.clock.now(),
        };

        if let Err(e) = self.repo.insert_book(book.clone()).await {
            if let BookStorage::BlobRef(key) = &book.storage {
                if let Err(cleanup) = self.storage.delete_object(key).await {
                    tracing::warn!(key = %key, "orphaned blob after failed insert: {}", cleanup);
                }
            }
            return Err(e);
        }

        tracing::info!(book_id = %book.id, size, storage = book.storage.kind(), "book uploaded");
        Ok(book)
    }

    pub async fn search_books(&self, filter: BookFilter) -> AccessResult<Vec<Book>> {
        self.repo.search_books(filter).await
    }

    pub async fn get_book(&self, id: Uuid) -> AccessResult<Book> {
        self.repo.get_book(id).await?.ok_or(AccessError::NotFound)
    }

    async fn read_content(&self, book: &Book) -> AccessResult<Vec<u8>> {
        match &book.storage {
            BookStorage::Inline(bytes) => Ok(bytes.clone()),
            BookStorage::BlobRef(key) => self.storage.get_object(key).await,
        }
    }

    /// download_book
    ///
    /// Cheap quota pre-check, fetch the bytes, then the atomic `record_download`. A guest only
    /// spends an allowance on a download that actually has content to return.
    pub async fn download_book(
        &self,
        identity: &Identity,
        origin: Option<IpAddr>,
        id: Uuid,
    ) -> AccessResult<(Book, Vec<u8>)> {
        let book = self.get_book(id).await?;

        if !self.quota.can_download(identity).await? {
            return Err(AccessError::QuotaExceeded);
        }

        let content = self.read_content(&book).await?;
        self.quota.record_download(identity, origin, book.id).await?;
        Ok((book, content))
    }

    /// Adds or removes a bookmark. Returns true when the book is now bookmarked.
    pub async fn toggle_bookmark(&self, identity: &Identity, book_id: Uuid) -> AccessResult<bool> {
        let identifier = reader(identity)?;
        self.get_book(book_id).await?;
        self.repo
            .toggle_bookmark(identifier, book_id, self.clock.now())
            .await
    }

    /// The caller's bookmarked books, most recently bookmarked first.
    pub async fn bookmarked_books(&self, identity: &Identity) -> AccessResult<Vec<BookResponse>> {
        let identifier = reader(identity)?;
        let mut books = Vec::new();
        for bookmark in self.repo.list_bookmarks(identifier).await? {
            if let Some(book) = self.repo.get_book(bookmark.book_id).await? {
                books.push(BookResponse::from(&book));
            }
        }
        Ok(books)
    }

    pub async fn download_history(&self, identity: &Identity) -> AccessResult<Vec<DownloadEvent>> {
        let identifier = reader(identity)?;
        self.repo.downloads_for_actor(identifier).await
    }

    // --- Admin ---

    pub async fn stats(&self) -> AccessResult<AdminDashboardStats> {
        self.repo.get_stats(start_of_day(self.clock.today())).await
    }

    pub async fn popular_books(&self, limit: i64) -> AccessResult<Vec<BookCount>> {
        self.repo.popular_books(limit).await
    }

    pub async fn most_bookmarked(&self, limit: i64) -> AccessResult<Vec<BookCount>> {
        self.repo.most_bookmarked(limit).await
    }

    pub async fn list_downloads(&self, limit: i64) -> AccessResult<Vec<DownloadEvent>> {
        self.repo.list_downloads(limit).await
    }

    /// Bulk audit purge. Counters for past days are dropped with it; today's are kept, so a
    /// purge never refunds quota.
    pub async fn purge_downloads(&self) -> AccessResult<u64> {
        let deleted = self.repo.purge_downloads().await?;
        let expired_counters = self.repo.prune_guest_quota(self.clock.today()).await?;
        tracing::warn!(deleted, expired_counters, "download events purged");
        Ok(deleted)
    }

    pub async fn list_users(&self) -> AccessResult<Vec<UserSummary>> {
        Ok(self
            .repo
            .list_users()
            .await?
            .into_iter()
            .map(UserSummary::from)
            .collect())
    }

    pub async fn delete_book(&self, id: Uuid) -> AccessResult<()> {
        let book = self.repo.delete_book(id).await?.ok_or(AccessError::NotFound)?;
        if let BookStorage::BlobRef(key) = &book.storage {
            self.storage.delete_object(key).await?;
        }
        tracing::info!(book_id = %id, "book deleted");
        Ok(())
    }
}
