//! Preference store that merges config.toml defaults with DB overrides.
//!
//! Every key the client understands is a [`Preference`] variant with a typed
//! default. Reads are served from an in-memory map; writes go to the
//! `user_preferences` table first and then update the map.
use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use secrecy::SecretString;
use thiserror::Error;

use crate::config::Config;
use crate::storage::{Database, SortField, SortOrder, ALL_UNREAD_ID};

/// Environment variable that overrides any configured or stored password.
pub const PASSWORD_ENV: &str = "OCSYNC_PASSWORD";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("Failed to persist preference {key}: {message}")]
    Storage { key: &'static str, message: String },
}

impl PreferenceError {
    fn storage(pref: Preference, err: anyhow::Error) -> Self {
        Self::Storage {
            key: pref.key(),
            message: format!("{:#}", err),
        }
    }
}

// ============================================================================
// Preference Keys
// ============================================================================

/// Every persisted setting and sync-state flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Preference {
    ShowOnlyUnread,
    Username,
    Password,
    Url,
    Order,
    SortField,
    DarkTheme,
    NeedsUpdateAfterSync,
    SyncRunning,
    StartDrawerItemId,
    EndDrawerItemId,
    IsFeed,
    DetectedApiLevel,
    Etag,
}

/// Typed default of a [`Preference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceDefault {
    Bool(bool),
    Long(i64),
    Str(&'static str),
    Unset,
}

impl Preference {
    pub const ALL: [Preference; 14] = [
        Preference::ShowOnlyUnread,
        Preference::Username,
        Preference::Password,
        Preference::Url,
        Preference::Order,
        Preference::SortField,
        Preference::DarkTheme,
        Preference::NeedsUpdateAfterSync,
        Preference::SyncRunning,
        Preference::StartDrawerItemId,
        Preference::EndDrawerItemId,
        Preference::IsFeed,
        Preference::DetectedApiLevel,
        Preference::Etag,
    ];

    /// Key used in the `user_preferences` table.
    pub fn key(self) -> &'static str {
        match self {
            Preference::ShowOnlyUnread => "show_only_unread",
            Preference::Username => "username",
            Preference::Password => "password",
            Preference::Url => "url",
            Preference::Order => "order",
            Preference::SortField => "sort_field",
            Preference::DarkTheme => "dark_theme",
            Preference::NeedsUpdateAfterSync => "needs_update_after_sync",
            Preference::SyncRunning => "is_sync_running",
            Preference::StartDrawerItemId => "startdrawer_itemid",
            Preference::EndDrawerItemId => "enddrawer_itemid",
            Preference::IsFeed => "isfeed",
            Preference::DetectedApiLevel => "detected_api_level",
            Preference::Etag => "apiv2_etag",
        }
    }

    pub fn default_value(self) -> PreferenceDefault {
        match self {
            Preference::ShowOnlyUnread
            | Preference::DarkTheme
            | Preference::NeedsUpdateAfterSync
            | Preference::SyncRunning
            | Preference::IsFeed => PreferenceDefault::Bool(false),
            Preference::Order => PreferenceDefault::Str(SortOrder::Ascending.as_str()),
            Preference::SortField => PreferenceDefault::Str(SortField::PubDate.as_str()),
            Preference::StartDrawerItemId => PreferenceDefault::Long(ALL_UNREAD_ID),
            Preference::Username
            | Preference::Password
            | Preference::Url
            | Preference::EndDrawerItemId
            | Preference::DetectedApiLevel
            | Preference::Etag => PreferenceDefault::Unset,
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.key() == key)
    }
}

// ============================================================================
// PreferenceStore
// ============================================================================

/// Merged preference store: config.toml defaults + DB overrides.
///
/// Shared between the sync service and the API client, so the map sits
/// behind a lock and all methods take `&self`.
pub struct PreferenceStore {
    db: Database,
    values: RwLock<HashMap<String, String>>,
    config_password: Option<SecretString>,
}

impl PreferenceStore {
    /// Load preferences by merging config defaults with DB overrides.
    ///
    /// 1. Flatten `Config` fields into preference keys
    /// 2. Query all rows from `user_preferences` table
    /// 3. DB values overwrite config values for matching keys
    pub async fn load(config: &Config, db: &Database) -> Result<Self> {
        let mut values = Self::flatten_config(config);

        for (key, value) in db.get_preferences_by_prefix("").await? {
            if Preference::from_key(&key).is_none() {
                tracing::debug!(key = %key, "Ignoring unknown stored preference");
            }
            values.insert(key, value);
        }

        Ok(Self {
            db: db.clone(),
            values: RwLock::new(values),
            config_password: config.password.clone().map(SecretString::from),
        })
    }

    /// Create from config only, ignoring stored values.
    pub fn from_config(config: &Config, db: &Database) -> Self {
        Self {
            db: db.clone(),
            values: RwLock::new(Self::flatten_config(config)),
            config_password: config.password.clone().map(SecretString::from),
        }
    }

    /// Raw value, falling back to the string form of the default.
    pub fn string(&self, pref: Preference) -> Option<String> {
        let stored = self
            .values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(pref.key())
            .cloned();

        stored.or_else(|| match pref.default_value() {
            PreferenceDefault::Bool(b) => Some(b.to_string()),
            PreferenceDefault::Long(n) => Some(n.to_string()),
            PreferenceDefault::Str(s) => Some(s.to_string()),
            PreferenceDefault::Unset => None,
        })
    }

    pub fn bool(&self, pref: Preference) -> bool {
        let default = match pref.default_value() {
            PreferenceDefault::Bool(b) => b,
            _ => false,
        };
        self.string(pref)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn long(&self, pref: Preference) -> Option<i64> {
        let default = match pref.default_value() {
            PreferenceDefault::Long(n) => Some(n),
            _ => None,
        };
        self.string(pref)
            .and_then(|v| v.parse().ok())
            .or(default)
    }

    /// Item sort direction. A stored value that is not a known direction is
    /// removed and the default returned.
    pub async fn sort_order(&self) -> SortOrder {
        let Some(raw) = self.string(Preference::Order) else {
            return SortOrder::default();
        };
        match SortOrder::parse(&raw) {
            Some(order) => order,
            None => {
                tracing::warn!(value = %raw, "Removing invalid sort order preference");
                if let Err(e) = self.remove(Preference::Order).await {
                    tracing::warn!(error = %e, "Failed to remove invalid sort order");
                }
                SortOrder::default()
            }
        }
    }

    pub fn sort_field(&self) -> SortField {
        self.string(Preference::SortField)
            .and_then(|v| SortField::parse(&v))
            .unwrap_or_default()
    }

    /// An account is usable once a username is stored and an API level has
    /// been detected for it.
    pub fn has_credentials(&self) -> bool {
        self.string(Preference::Username).is_some()
            && self.string(Preference::DetectedApiLevel).is_some()
    }

    pub fn dark_theme(&self) -> bool {
        self.bool(Preference::DarkTheme)
    }

    /// Password from `OCSYNC_PASSWORD`, then config.toml, then the stored
    /// preference.
    pub fn password(&self) -> Option<SecretString> {
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            if !password.is_empty() {
                return Some(SecretString::from(password));
            }
        }
        if let Some(password) = &self.config_password {
            return Some(password.clone());
        }
        self.string(Preference::Password).map(SecretString::from)
    }

    // ========================================================================
    // Writers
    // ========================================================================

    pub async fn set_string(&self, pref: Preference, value: &str) -> Result<(), PreferenceError> {
        self.db
            .set_preference(pref.key(), value)
            .await
            .map_err(|e| PreferenceError::storage(pref, e))?;
        self.cache_value(pref, Some(value));
        Ok(())
    }

    pub async fn set_bool(&self, pref: Preference, value: bool) -> Result<(), PreferenceError> {
        self.set_string(pref, if value { "true" } else { "false" })
            .await
    }

    pub async fn set_long(&self, pref: Preference, value: i64) -> Result<(), PreferenceError> {
        self.set_string(pref, &value.to_string()).await
    }

    /// Delete the stored value so reads fall back to the default.
    pub async fn remove(&self, pref: Preference) -> Result<(), PreferenceError> {
        self.db
            .delete_preference(pref.key())
            .await
            .map_err(|e| PreferenceError::storage(pref, e))?;
        self.cache_value(pref, None);
        Ok(())
    }

    /// Update the in-memory value after a write that already committed
    /// elsewhere (e.g. the ETag inside a sync transaction).
    pub(crate) fn cache_value(&self, pref: Preference, value: Option<&str>) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        match value {
            Some(value) => {
                values.insert(pref.key().to_string(), value.to_string());
            }
            None => {
                values.remove(pref.key());
            }
        }
    }

    // ========================================================================
    // Internal Helpers
    // ========================================================================

    /// Flatten Config fields into preference keys.
    ///
    /// The password is deliberately left out: it never enters the in-memory
    /// map from the config file and is read through [`Self::password`].
    fn flatten_config(config: &Config) -> HashMap<String, String> {
        let mut map = HashMap::new();

        if let Some(url) = &config.server_url {
            map.insert(Preference::Url.key().to_string(), url.clone());
        }
        if let Some(username) = &config.username {
            map.insert(Preference::Username.key().to_string(), username.clone());
        }
        map.insert(
            Preference::ShowOnlyUnread.key().to_string(),
            config.show_only_unread.to_string(),
        );
        map.insert(
            Preference::DarkTheme.key().to_string(),
            config.dark_theme.to_string(),
        );
        map.insert(Preference::Order.key().to_string(), config.order.clone());

        map
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[test]
    fn test_keys_are_unique_and_round_trip() {
        let mut keys: Vec<&str> = Preference::ALL.iter().map(|p| p.key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), Preference::ALL.len());

        for pref in Preference::ALL {
            assert_eq!(Preference::from_key(pref.key()), Some(pref));
        }
        assert_eq!(Preference::from_key("theme"), None);
    }

    #[tokio::test]
    async fn test_defaults() {
        let db = test_db().await;
        let prefs = PreferenceStore::load(&Config::default(), &db).await.unwrap();

        assert!(!prefs.bool(Preference::ShowOnlyUnread));
        assert!(!prefs.dark_theme());
        assert!(!prefs.bool(Preference::SyncRunning));
        assert_eq!(prefs.long(Preference::StartDrawerItemId), Some(ALL_UNREAD_ID));
        assert_eq!(prefs.long(Preference::EndDrawerItemId), None);
        assert_eq!(prefs.string(Preference::Etag), None);
        assert_eq!(prefs.sort_order().await, SortOrder::Ascending);
        assert_eq!(prefs.sort_field(), SortField::PubDate);
        assert!(!prefs.has_credentials());
    }

    #[tokio::test]
    async fn test_db_overrides_config() {
        let db = test_db().await;
        let config = Config {
            username: Some("config-user".to_string()),
            dark_theme: false,
            ..Config::default()
        };

        db.set_preference("username", "stored-user").await.unwrap();
        db.set_preference("dark_theme", "true").await.unwrap();

        let prefs = PreferenceStore::load(&config, &db).await.unwrap();
        assert_eq!(
            prefs.string(Preference::Username).as_deref(),
            Some("stored-user")
        );
        assert!(prefs.dark_theme());
    }

    #[tokio::test]
    async fn test_from_config_ignores_db() {
        let db = test_db().await;
        db.set_preference("order", "DESCENDING").await.unwrap();

        let prefs = PreferenceStore::from_config(&Config::default(), &db);
        assert_eq!(prefs.sort_order().await, SortOrder::Ascending);
    }

    #[tokio::test]
    async fn test_set_persists_and_updates_memory() {
        let db = test_db().await;
        let prefs = PreferenceStore::load(&Config::default(), &db).await.unwrap();

        prefs.set_bool(Preference::DarkTheme, true).await.unwrap();
        prefs.set_long(Preference::StartDrawerItemId, 7).await.unwrap();
        prefs.set_string(Preference::Etag, "\"abc\"").await.unwrap();

        assert!(prefs.dark_theme());
        assert_eq!(prefs.long(Preference::StartDrawerItemId), Some(7));
        assert_eq!(db.get_preference("dark_theme").await.unwrap().as_deref(), Some("true"));
        assert_eq!(db.get_preference("apiv2_etag").await.unwrap().as_deref(), Some("\"abc\""));
    }

    #[tokio::test]
    async fn test_remove_falls_back_to_default() {
        let db = test_db().await;
        let prefs = PreferenceStore::load(&Config::default(), &db).await.unwrap();

        prefs.set_long(Preference::StartDrawerItemId, 3).await.unwrap();
        prefs.remove(Preference::StartDrawerItemId).await.unwrap();

        assert_eq!(prefs.long(Preference::StartDrawerItemId), Some(ALL_UNREAD_ID));
        assert_eq!(db.get_preference("startdrawer_itemid").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_sort_order_is_removed() {
        let db = test_db().await;
        db.set_preference("order", "SIDEWAYS").await.unwrap();
        let prefs = PreferenceStore::load(&Config::default(), &db).await.unwrap();

        assert_eq!(prefs.sort_order().await, SortOrder::Ascending);
        assert_eq!(db.get_preference("order").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_descending_order() {
        let db = test_db().await;
        let config = Config {
            order: "DESCENDING".to_string(),
            ..Config::default()
        };
        let prefs = PreferenceStore::load(&config, &db).await.unwrap();
        assert_eq!(prefs.sort_order().await, SortOrder::Descending);
    }

    #[tokio::test]
    async fn test_unparseable_values_use_defaults() {
        let db = test_db().await;
        db.set_preference("dark_theme", "maybe").await.unwrap();
        db.set_preference("startdrawer_itemid", "many").await.unwrap();
        db.set_preference("sort_field", "color").await.unwrap();
        let prefs = PreferenceStore::load(&Config::default(), &db).await.unwrap();

        assert!(!prefs.dark_theme());
        assert_eq!(prefs.long(Preference::StartDrawerItemId), Some(ALL_UNREAD_ID));
        assert_eq!(prefs.sort_field(), SortField::PubDate);
    }

    #[tokio::test]
    async fn test_has_credentials_needs_username_and_api_level() {
        let db = test_db().await;
        let prefs = PreferenceStore::load(&Config::default(), &db).await.unwrap();

        prefs.set_string(Preference::Username, "alice").await.unwrap();
        assert!(!prefs.has_credentials());

        prefs.set_string(Preference::DetectedApiLevel, "v2").await.unwrap();
        assert!(prefs.has_credentials());
    }

    #[tokio::test]
    async fn test_config_password_not_flattened() {
        let db = test_db().await;
        let config = Config {
            password: Some("from-config".to_string()),
            ..Config::default()
        };
        let prefs = PreferenceStore::load(&config, &db).await.unwrap();

        assert_eq!(prefs.string(Preference::Password), None);
        if std::env::var(PASSWORD_ENV).is_err() {
            let password = prefs.password().unwrap();
            assert_eq!(password.expose_secret(), "from-config");
        }
    }

    #[tokio::test]
    async fn test_stored_password_used_last() {
        let db = test_db().await;
        db.set_preference("password", "stored").await.unwrap();
        let prefs = PreferenceStore::load(&Config::default(), &db).await.unwrap();

        if std::env::var(PASSWORD_ENV).is_err() {
            assert_eq!(prefs.password().unwrap().expose_secret(), "stored");
        }
    }
}
