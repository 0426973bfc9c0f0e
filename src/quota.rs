use std::net::IpAddr;
use uuid::Uuid;

use crate::{
    auth::Identity,
    clock::ClockState,
    config::AppConfig,
    error::{AccessError, AccessResult},
    models::{DownloadEvent, QuotaStatus},
    repository::{GUEST_ACTOR, RepositoryState},
};

/// DownloadQuota
///
/// Daily download allowance for guests. Authenticated identities are unlimited. The window is
/// the current UTC day from the injected clock, so yesterday's counter simply stops being read;
/// there is no reset job.
#[derive(Clone)]
pub struct DownloadQuota {
    repo: RepositoryState,
    clock: ClockState,
    config: AppConfig,
}

impl DownloadQuota {
    pub fn new(repo: RepositoryState, clock: ClockState, config: AppConfig) -> Self {
        Self {
            repo,
            clock,
            config,
        }
    }

    pub fn daily_limit(&self) -> u32 {
        self.config.guest_daily_limit
    }

    /// Guest downloads already counted today for this identity (0 for non-guests).
    pub async fn used_today(&self, identity: &Identity) -> AccessResult<u32> {
        match identity {
            Identity::Guest(key) => {
                self.repo
                    .guest_downloads_on(key.as_str(), self.clock.today())
                    .await
            }
            _ => Ok(0),
        }
    }

    /// can_download
    ///
    /// Admin and users: always. Guests: while today's count for their key is below the limit.
    pub async fn can_download(&self, identity: &Identity) -> AccessResult<bool> {
        match identity {
            Identity::Guest(_) => Ok(self.used_today(identity).await? < self.daily_limit()),
            Identity::Admin | Identity::User(_) => Ok(true),
        }
    }

    pub async fn status(&self, identity: &Identity) -> AccessResult<QuotaStatus> {
        let used = self.used_today(identity).await?;
        let limit = identity.is_guest().then(|| self.daily_limit());
        Ok(QuotaStatus {
            role: identity.role().to_string(),
            limit,
            used,
            can_download: limit.is_none_or(|l| used < l),
        })
    }

    /// record_download
    ///
    /// For guests, the counter increment-with-ceiling and the audit event are one atomic repository
    /// call: if the ceiling was already reached nothing is written and `QuotaExceeded` is returned,
    /// and if the event cannot be stored the allowance is not spent.
    pub async fn record_download(
        &self,
        identity: &Identity,
        origin: Option<IpAddr>,
        book_id: Uuid,
    ) -> AccessResult<DownloadEvent> {
        let actor = match identity {
            Identity::Admin => self.config.admin_identifier.clone(),
            Identity::User(identifier) => identifier.clone(),
            Identity::Guest(_) => GUEST_ACTOR.to_string(),
        };

        let origin = match (identity, origin) {
            (_, Some(addr)) => Some(addr.to_string()),
            (Identity::Guest(key), None) => Some(key.as_str().to_string()),
            _ => None,
        };

        let event = DownloadEvent {
            id: Uuid::new_v4(),
            actor,
            origin,
            book_id,
            created_at: self.clock.now(),
        };

        match identity {
            Identity::Guest(key) => {
                let consumed = self
                    .repo
                    .record_guest_download(
                        key.as_str(),
                        self.clock.today(),
                        self.daily_limit(),
                        event.clone(),
                    )
                    .await?;
                if consumed.is_none() {
                    tracing::info!(guest_key = %key.as_str(), "guest download refused: quota exceeded");
                    return Err(AccessError::QuotaExceeded);
                }
            }
            Identity::Admin | Identity::User(_) => {
                self.repo.insert_download(event.clone()).await?;
            }
        }

        tracing::debug!(actor = %event.actor, book_id = %book_id, "download recorded");
        Ok(event)
    }
}
