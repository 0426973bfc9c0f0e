use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Duration;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

use crate::{
    clock::ClockState,
    config::{AppConfig, GuestKeyPolicy},
    crypto,
    error::{AccessError, AccessResult},
    models::{LoginResponse, ResetCode, User},
    notify::CodeSenderState,
    repository::{GUEST_ACTOR, RepositoryState},
};

const ROLE_ADMIN: &str = "admin";
const ROLE_USER: &str = "user";
const ROLE_GUEST: &str = "guest";

/// Trims and lower-cases an identifier. Identifiers are case-insensitive everywhere.
pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// GuestKey
///
/// The anonymous key a guest's downloads are counted under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuestKey(String);

impl GuestKey {
    /// Derives the key for an anonymous request under the configured policy.
    pub fn for_origin(policy: GuestKeyPolicy, origin: Option<IpAddr>) -> Self {
        match (policy, origin) {
            (GuestKeyPolicy::PerAddress, Some(addr)) => GuestKey(addr.to_string()),
            _ => GuestKey(GUEST_ACTOR.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identity
///
/// The acting identity of one request. Transient: resolved per request, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Admin,
    User(String),
    Guest(GuestKey),
}

impl Identity {
    pub fn role(&self) -> &'static str {
        match self {
            Identity::Admin => ROLE_ADMIN,
            Identity::User(_) => ROLE_USER,
            Identity::Guest(_) => ROLE_GUEST,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest(_))
    }
}

/// Credentials
///
/// What a request may present to prove who it is.
#[derive(Debug, Clone)]
pub enum Credentials {
    Password { identifier: String, password: String },
    /// Session token issued by `login`.
    Token(String),
}

/// Claims
///
/// Session token payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Normalized identifier (or the admin identifier).
    pub sub: String,
    /// "admin" or "user".
    pub role: String,
    pub exp: usize,
    pub iat: usize,
}

/// CredentialStore
///
/// Registration, authentication, password resets and identity resolution. Holds only injected
/// handles; cloning is cheap.
#[derive(Clone)]
pub struct CredentialStore {
    repo: RepositoryState,
    clock: ClockState,
    sender: CodeSenderState,
    config: AppConfig,
}

impl CredentialStore {
    pub fn new(
        repo: RepositoryState,
        clock: ClockState,
        sender: CodeSenderState,
        config: AppConfig,
    ) -> Self {
        Self {
            repo,
            clock,
            sender,
            config,
        }
    }

    pub fn admin_identifier(&self) -> &str {
        &self.config.admin_identifier
    }

    fn is_admin_identifier(&self, identifier: &str) -> bool {
        identifier == self.config.admin_identifier
    }

    /// register
    ///
    /// Stores a bcrypt digest of the password and marks the account verified. The admin
    /// identifier and the `"guest"` actor marker are reserved. Duplicates are rejected by the storage layer's uniqueness
    /// constraint, so nothing is written on failure.
    pub async fn register(&self, identifier: &str, password: &str) -> AccessResult<()> {
        let identifier = normalize_identifier(identifier);
        if identifier.is_empty() {
            return Err(AccessError::Validation("Identifier must not be empty".to_string()));
        }
        if password.is_empty() {
            return Err(AccessError::Validation("Password must not be empty".to_string()));
        }
        // The admin identity and the anonymous actor marker can never be owned by an account.
        if self.is_admin_identifier(&identifier) || identifier == GUEST_ACTOR {
            return Err(AccessError::AlreadyExists);
        }

        let user = User {
            identifier: identifier.clone(),
            password_hash: crypto::hash_password(password, self.config.bcrypt_cost)?,
            verified: true,
            created_at: self.clock.now(),
        };

        if !self.repo.create_user(user).await? {
            tracing::info!(identifier = %identifier, "registration rejected: identifier taken");
            return Err(AccessError::AlreadyExists);
        }

        tracing::info!(identifier = %identifier, "user registered");
        Ok(())
    }

    /// authenticate
    ///
    /// The admin identity is checked against the configured secret; everyone else against the
    /// stored digest. Absent, unverified and mismatched all collapse into `InvalidCredentials`
    /// and all pay one bcrypt verification.
    pub async fn authenticate(&self, identifier: &str, password: &str) -> AccessResult<Identity> {
        let identifier = normalize_identifier(identifier);

        if self.is_admin_identifier(&identifier) {
            if crypto::secrets_match(password, &self.config.admin_secret) {
                return Ok(Identity::Admin);
            }
            tracing::warn!("failed admin login");
            return Err(AccessError::InvalidCredentials);
        }

        let verified = match self.repo.get_user(&identifier).await? {
            Some(user) => {
                crypto::verify_password(password, &user.password_hash) && user.verified
            }
            None => {
                // Same bcrypt work as a real account, so a miss is not observable by timing.
                crypto::verify_dummy(password, self.config.bcrypt_cost);
                false
            }
        };

        if verified {
            return Ok(Identity::User(identifier));
        }
        tracing::info!(identifier = %identifier, "failed login");
        Err(AccessError::InvalidCredentials)
    }

    /// reset_password
    ///
    /// Overwrites the stored digest. Used directly by the admin and by `redeem_reset_code`.
    pub async fn reset_password(&self, identifier: &str, new_password: &str) -> AccessResult<()> {
        if new_password.is_empty() {
            return Err(AccessError::Validation("Password must not be empty".to_string()));
        }
        let identifier = normalize_identifier(identifier);
        let hash = crypto::hash_password(new_password, self.config.bcrypt_cost)?;

        if !self.repo.update_password(&identifier, &hash).await? {
            return Err(AccessError::NotFound);
        }
        tracing::info!(identifier = %identifier, "password reset");
        Ok(())
    }

    /// request_reset_code
    ///
    /// Issues a one-time code for self-service reset. Unknown identifiers succeed silently so
    /// the endpoint cannot be used to enumerate accounts.
    pub async fn request_reset_code(&self, identifier: &str) -> AccessResult<()> {
        let identifier = normalize_identifier(identifier);
        if self.repo.get_user(&identifier).await?.is_none() {
            tracing::debug!(identifier = %identifier, "reset code requested for unknown identifier");
            return Ok(());
        }

        let code = crypto::generate_reset_code();
        let ttl = Duration::minutes(self.config.reset_code_ttl_minutes);
        self.repo
            .put_reset_code(ResetCode {
                identifier: identifier.clone(),
                code_hash: crypto::hash_password(&code, self.config.bcrypt_cost)?,
                expires_at: self.clock.now() + ttl,
            })
            .await?;

        self.sender
            .send_reset_code(&identifier, &code)
            .map_err(AccessError::StorageUnavailable)
    }

    /// redeem_reset_code
    ///
    /// Consumes the pending code (a wrong guess burns it) and sets the new password.
    pub async fn redeem_reset_code(
        &self,
        identifier: &str,
        code: &str,
        new_password: &str,
    ) -> AccessResult<()> {
        if new_password.is_empty() {
            return Err(AccessError::Validation("Password must not be empty".to_string()));
        }
        let identifier = normalize_identifier(identifier);

        let pending = self
            .repo
            .take_reset_code(&identifier)
            .await?
            .ok_or(AccessError::InvalidResetCode)?;

        if pending.expires_at <= self.clock.now() || !crypto::verify_password(code.trim(), &pending.code_hash)
        {
            tracing::info!(identifier = %identifier, "reset code rejected");
            return Err(AccessError::InvalidResetCode);
        }

        self.reset_password(&identifier, new_password).await
    }

    /// login
    ///
    /// `authenticate` plus a signed session token.
    pub async fn login(&self, identifier: &str, password: &str) -> AccessResult<LoginResponse> {
        let identity = self.authenticate(identifier, password).await?;
        let subject = match &identity {
            Identity::Admin => self.config.admin_identifier.clone(),
            Identity::User(id) => id.clone(),
            Identity::Guest(_) => return Err(AccessError::InvalidCredentials),
        };
        let token = self.issue_token(&subject, identity.role())?;

        Ok(LoginResponse {
            token,
            identifier: subject,
            role: identity.role().to_string(),
        })
    }

    fn issue_token(&self, subject: &str, role: &str) -> AccessResult<String> {
        let now = self.clock.now();
        let claims = Claims {
            sub: subject.to_string(),
            role: role.to_string(),
            iat: now.timestamp().max(0) as usize,
            exp: (now + Duration::hours(self.config.session_ttl_hours))
                .timestamp()
                .max(0) as usize,
        };
        let key = EncodingKey::from_secret(self.config.jwt_secret.as_bytes());
        encode(&Header::default(), &claims, &key).map_err(|e| {
            tracing::error!("token encode failed: {:?}", e);
            AccessError::StorageUnavailable("token signing failed".to_string())
        })
    }

    /// Validates signature and expiry (against the injected clock) and maps claims to an identity.
    async fn identity_from_token(&self, token: &str) -> AccessResult<Identity> {
        let key = DecodingKey::from_secret(self.config.jwt_secret.as_bytes());
        let mut validation = Validation::default();
        // Expiry is checked below against the injected clock.
        validation.validate_exp = false;

        let claims = decode::<Claims>(token, &key, &validation)
            .map_err(|_| AccessError::InvalidCredentials)?
            .claims;

        if (claims.exp as i64) <= self.clock.now().timestamp() {
            return Err(AccessError::InvalidCredentials);
        }

        match claims.role.as_str() {
            ROLE_ADMIN if self.is_admin_identifier(&claims.sub) => Ok(Identity::Admin),
            ROLE_USER => match self.repo.get_user(&claims.sub).await? {
                // The account must still exist and be verified.
                Some(user) if user.verified => Ok(Identity::User(user.identifier)),
                _ => Err(AccessError::InvalidCredentials),
            },
            _ => Err(AccessError::InvalidCredentials),
        }
    }

    /// resolve_identity
    ///
    /// No credentials: a guest keyed by origin under the configured policy. Supplied
    /// credentials must be valid; they are never downgraded to a guest. Read-only.
    pub async fn resolve_identity(
        &self,
        credentials: Option<Credentials>,
        origin: Option<IpAddr>,
    ) -> AccessResult<Identity> {
        match credentials {
            None => Ok(Identity::Guest(GuestKey::for_origin(
                self.config.guest_key_policy,
                origin,
            ))),
            Some(Credentials::Password {
                identifier,
                password,
            }) => self.authenticate(&identifier, &password).await,
            Some(Credentials::Token(token)) => self.identity_from_token(&token).await,
        }
    }
}

/// Reads `Authorization: Bearer <token>` or `Authorization: Basic <base64(id:pw)>`.
/// An absent header means no credentials; an unreadable one is `InvalidCredentials`.
pub fn credentials_from_headers(headers: &HeaderMap) -> AccessResult<Option<Credentials>> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| AccessError::InvalidCredentials)?;

    if let Some(token) = value.strip_prefix("Bearer ") {
        return Ok(Some(Credentials::Token(token.trim().to_string())));
    }

    if let Some(encoded) = value.strip_prefix("Basic ") {
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| AccessError::InvalidCredentials)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AccessError::InvalidCredentials)?;
        let (identifier, password) = decoded
            .split_once(':')
            .ok_or(AccessError::InvalidCredentials)?;
        return Ok(Some(Credentials::Password {
            identifier: identifier.to_string(),
            password: password.to_string(),
        }));
    }

    Err(AccessError::InvalidCredentials)
}

/// Best-effort network origin: first `X-Forwarded-For` hop when trusted, else the socket peer.
pub fn origin_from_parts(parts: &Parts, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Origin
///
/// Extractor for the request's network origin.
#[derive(Debug, Clone, Copy)]
pub struct Origin(pub Option<IpAddr>);

impl<S> FromRequestParts<S> for Origin
where
    S: Send + Sync,
    AppConfig: FromRef<S>,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = AppConfig::from_ref(state);
        Ok(Origin(origin_from_parts(parts, config.trust_forwarded_for)))
    }
}

/// Identity Extractor
///
/// Resolves the caller for every request: guests get through, bad credentials are rejected
/// with 401. The result is stored in the request extensions, so the access layer and the
/// handler's extractor share one resolution (and one bcrypt check for Basic credentials).
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
    CredentialStore: FromRef<S>,
{
    type Rejection = AccessError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>() {
            return Ok(identity.clone());
        }

        let store = CredentialStore::from_ref(state);
        let credentials = credentials_from_headers(&parts.headers)?;
        let origin = origin_from_parts(parts, store.config.trust_forwarded_for);
        let identity = store.resolve_identity(credentials, origin).await?;
        parts.extensions.insert(identity.clone());
        Ok(identity)
    }
}

/// AuthUser
///
/// A logged-in identity (admin or user). Guests are rejected with 401.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    CredentialStore: FromRef<S>,
{
    type Rejection = AccessError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Identity::from_request_parts(parts, state).await? {
            Identity::Guest(_) => Err(AccessError::NotAuthenticated),
            identity => Ok(AuthUser(identity)),
        }
    }
}

/// AdminUser
///
/// Admin-only gate: guests get 401, regular users 403.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser;

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    CredentialStore: FromRef<S>,
{
    type Rejection = AccessError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Identity::from_request_parts(parts, state).await? {
            Identity::Admin => Ok(AdminUser),
            Identity::User(_) => Err(AccessError::Forbidden),
            Identity::Guest(_) => Err(AccessError::NotAuthenticated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn offline_store() -> CredentialStore {
        CredentialStore::new(
            std::sync::Arc::new(crate::repository::InMemoryRepository::new_failing()),
            std::sync::Arc::new(crate::clock::SystemClock),
            std::sync::Arc::new(crate::notify::ConsoleCodeSender::new()),
            AppConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_identity_is_resolved_once_per_request() {
        let store = offline_store();
        let (mut parts, _) = axum::http::Request::builder()
            .header(header::AUTHORIZATION, "Basic YWxpY2U6cHcx")
            .body(())
            .unwrap()
            .into_parts();
        parts
            .extensions
            .insert(Identity::User("alice".to_string()));

        // The store is offline, so only the cached identity can satisfy this.
        let identity = Identity::from_request_parts(&mut parts, &store).await;
        assert_eq!(identity, Ok(Identity::User("alice".to_string())));
        let auth = AuthUser::from_request_parts(&mut parts, &store).await;
        assert!(matches!(auth, Ok(AuthUser(Identity::User(_)))));
    }

    #[tokio::test]
    async fn test_resolved_identity_is_cached_on_the_request() {
        let store = offline_store();
        let (mut parts, _) = axum::http::Request::builder()
            .header("x-forwarded-for", "10.0.0.5")
            .body(())
            .unwrap()
            .into_parts();

        let identity = Identity::from_request_parts(&mut parts, &store).await.unwrap();
        assert!(identity.is_guest());
        assert_eq!(parts.extensions.get::<Identity>(), Some(&identity));
    }

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(normalize_identifier("  Alice "), "alice");
    }

    #[test]
    fn test_guest_key_policies() {
        let addr: IpAddr = "10.0.0.5".parse().unwrap();
        assert_eq!(
            GuestKey::for_origin(GuestKeyPolicy::PerAddress, Some(addr)).as_str(),
            "10.0.0.5"
        );
        assert_eq!(
            GuestKey::for_origin(GuestKeyPolicy::PerAddress, None).as_str(),
            GUEST_ACTOR
        );
        assert_eq!(
            GuestKey::for_origin(GuestKeyPolicy::Shared, Some(addr)).as_str(),
            GUEST_ACTOR
        );
    }

    #[test]
    fn test_credentials_from_headers() {
        let mut headers = HeaderMap::new();
        assert!(credentials_from_headers(&headers).unwrap().is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert!(matches!(
            credentials_from_headers(&headers).unwrap(),
            Some(Credentials::Token(t)) if t == "abc"
        ));

        let basic = format!("Basic {}", STANDARD.encode("alice:pw:with:colons"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&basic).unwrap());
        assert!(matches!(
            credentials_from_headers(&headers).unwrap(),
            Some(Credentials::Password { identifier, password })
                if identifier == "alice" && password == "pw:with:colons"
        ));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Digest xyz"));
        assert_eq!(
            credentials_from_headers(&headers).unwrap_err(),
            AccessError::InvalidCredentials
        );
    }
}
