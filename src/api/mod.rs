//! Nextcloud News REST client.
//!
//! [`Api`] is the versioned facade the rest of the crate talks to. Each
//! [`ApiLevel`] binds a base path below the server root; [`connect`] builds
//! the implementation for a level and [`detect_api_level`] probes a server
//! for the newest level it answers on.

mod error;
mod http;
pub mod json;
mod v2;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use secrecy::SecretString;
use url::Url;

use crate::config::Config;
use crate::preferences::{Preference, PreferenceError, PreferenceStore};
use crate::storage::{Database, Feed, SyncSummary, User};
use crate::sync::SyncRequest;
use crate::util::normalize_server_url;

pub use error::{ApiError, TransportKind};
pub use json::Status;
pub use v2::ApiV2;

use http::HttpClient;

/// Path of the News app's API below the Nextcloud root.
const API_ROOT: &str = "index.php/apps/news/api/";

// ============================================================================
// API Level
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiLevel {
    V2,
}

impl ApiLevel {
    /// Known levels, newest first.
    pub const ALL: [ApiLevel; 1] = [ApiLevel::V2];

    /// Form stored in the `detected_api_level` preference.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiLevel::V2 => "v2",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.as_str() == value)
    }

    /// API base URL for this level below `root`.
    pub fn base_url(&self, root: &Url) -> Result<Url, ApiError> {
        root.join(&format!("{}{}/", API_ROOT, self.as_str()))
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))
    }
}

impl std::fmt::Display for ApiLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Connection Settings
// ============================================================================

/// Server root and basic auth credentials. The Debug impl masks the password.
#[derive(Clone)]
pub struct Credentials {
    /// Nextcloud root URL, always ending in `/`
    pub root_url: Url,
    pub username: String,
    pub password: SecretString,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("root_url", &self.root_url.as_str())
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    pub fn new(
        server_url: &str,
        username: &str,
        password: SecretString,
    ) -> Result<Self, ApiError> {
        let root_url =
            normalize_server_url(server_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            root_url,
            username: username.to_string(),
            password,
        })
    }

    /// Build credentials from the stored `url` and `username` preferences
    /// and the resolved password.
    pub fn from_preferences(prefs: &PreferenceStore) -> Result<Self, ApiError> {
        let (Some(url), Some(username), Some(password)) = (
            prefs.string(Preference::Url),
            prefs.string(Preference::Username),
            prefs.password(),
        ) else {
            return Err(ApiError::MissingCredentials);
        };
        Self::new(&url, &username, password)
    }
}

/// Transport settings shared by every request.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl HttpConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            user_agent: config.user_agent.clone(),
        }
    }
}

impl From<PreferenceError> for ApiError {
    fn from(err: PreferenceError) -> Self {
        ApiError::Database(err.to_string())
    }
}

// ============================================================================
// Api Trait
// ============================================================================

/// Operations every API level provides.
///
/// All methods that change server state also apply the server's answer to
/// the local store, and only after the request succeeded.
#[async_trait]
pub trait Api: Send + Sync {
    fn level(&self) -> ApiLevel;

    /// Server metadata (`GET ./`).
    async fn metadata(&self) -> Result<Status, ApiError>;

    /// Fetch metadata and store the user it describes.
    async fn user(&self) -> Result<User, ApiError>;

    /// Synchronize folders, feeds and items according to `request`.
    async fn sync(&self, request: SyncRequest) -> Result<SyncSummary, ApiError>;

    /// Subscribe to `url` inside `folder_id` and store the new feed.
    async fn create_feed(&self, url: &str, folder_id: i64) -> Result<Feed, ApiError>;

    /// Move `feed` into `folder_id` and store the updated feed.
    async fn move_feed(&self, feed: &Feed, folder_id: i64) -> Result<Feed, ApiError>;

    /// Unsubscribe from `feed`; the local copy goes once the server agreed.
    async fn delete_feed(&self, feed: &Feed) -> Result<(), ApiError>;
}

/// Build the client for `level`.
pub fn connect(
    level: ApiLevel,
    credentials: Credentials,
    http: &HttpConfig,
    db: Database,
    prefs: Arc<PreferenceStore>,
) -> Result<Box<dyn Api>, ApiError> {
    match level {
        ApiLevel::V2 => Ok(Box::new(ApiV2::new(credentials, http, db, prefs)?)),
    }
}

/// Build the client for the level stored in the `detected_api_level`
/// preference.
pub fn connect_stored(
    http: &HttpConfig,
    db: Database,
    prefs: Arc<PreferenceStore>,
) -> Result<Box<dyn Api>, ApiError> {
    let raw = prefs
        .string(Preference::DetectedApiLevel)
        .ok_or(ApiError::MissingCredentials)?;
    let level = ApiLevel::parse(&raw).ok_or(ApiError::UnsupportedApiLevel(raw))?;
    let credentials = Credentials::from_preferences(&prefs)?;
    connect(level, credentials, http, db, prefs)
}

/// Find the newest API level the server answers on.
///
/// Each level's metadata endpoint is probed in turn. A 404 or 405 moves on
/// to the next level; any other failure is returned as is, so a wrong
/// password is reported instead of masked.
pub async fn detect_api_level(
    credentials: &Credentials,
    http: &HttpConfig,
) -> Result<(ApiLevel, Status), ApiError> {
    let mut last_error = None;

    for level in ApiLevel::ALL {
        let base = level.base_url(&credentials.root_url)?;
        let client = HttpClient::new(base, credentials.clone(), http)?;

        let result = match client.execute(client.request(Method::GET, "./")?).await {
            Ok(response) => client.read_json::<Status>(response).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(status) => {
                tracing::info!(
                    level = %level,
                    version = status.version.as_deref().unwrap_or("unknown"),
                    "Detected News API"
                );
                return Ok((level, status));
            }
            Err(ApiError::HttpStatus { status, message }) if status == 404 || status == 405 => {
                tracing::debug!(level = %level, status, "API level not available");
                last_error = Some(ApiError::HttpStatus { status, message });
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or(ApiError::UnsupportedApiLevel("none".to_string())))
}
