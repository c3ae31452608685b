//! Nextcloud News v2 wire types and their conversion into storage rows.
//!
//! Deserialization is lenient: optional fields default, timestamps accept
//! either Unix seconds or RFC 3339 strings, and a `null` folder id means the
//! root folder.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::storage::{Feed, Folder, Item, User, ROOT_FOLDER_ID};

/// Body of `GET sync` / `POST sync`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SyncResponse {
    pub folders: Vec<JsonFolder>,
    pub feeds: Vec<JsonFeed>,
    pub items: Vec<JsonItem>,
}

#[derive(Debug, Deserialize)]
pub struct JsonFolder {
    pub id: i64,
    pub name: String,
}

/// Per-feed update failure as reported by the server.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FeedError {
    pub code: i64,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonFeed {
    pub id: i64,
    pub url: String,
    #[serde(default, alias = "title")]
    pub name: Option<String>,
    #[serde(default)]
    pub favicon_link: Option<String>,
    #[serde(default)]
    pub folder_id: Option<i64>,
    #[serde(default)]
    pub ordering: i64,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub unread_count: i64,
    #[serde(default)]
    pub update_error_count: Option<i64>,
    #[serde(default)]
    pub last_update_error: Option<String>,
    #[serde(default)]
    pub error: Option<FeedError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Enclosure {
    pub mime_type: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonItem {
    pub id: i64,
    pub feed_id: i64,
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default, alias = "pubDate")]
    pub published_at: Option<Timestamp>,
    #[serde(default, alias = "lastModified")]
    pub updated_at: Option<Timestamp>,
    #[serde(default)]
    pub enclosure: Option<Enclosure>,
    #[serde(default)]
    pub enclosure_mime: Option<String>,
    #[serde(default)]
    pub enclosure_link: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub is_unread: bool,
    #[serde(default)]
    pub is_starred: bool,
}

/// A point in time as the server sends it.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Seconds(i64),
    Text(String),
}

impl Timestamp {
    /// Unix seconds, or `None` for an unparseable string.
    pub fn to_unix(&self) -> Option<i64> {
        match self {
            Timestamp::Seconds(secs) => Some(*secs),
            Timestamp::Text(text) => match text.parse::<i64>() {
                Ok(secs) => Some(secs),
                Err(_) => DateTime::parse_from_rfc3339(text)
                    .map(|dt| dt.timestamp())
                    .ok(),
            },
        }
    }
}

/// Body of `GET ./` (API metadata).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Status {
    pub version: Option<String>,
    #[serde(alias = "warnings")]
    pub issues: Issues,
    pub user: Option<JsonUser>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Issues {
    pub improperly_configured_cron: bool,
    pub incorrect_db_charset: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonUser {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, alias = "lastLoginTimestamp")]
    pub last_login: Option<Timestamp>,
    #[serde(default)]
    pub avatar: Option<Avatar>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Avatar {
    pub data: Option<String>,
    pub mime: Option<String>,
}

/// Body of `POST feeds`. Servers answer either `{"feeds": [...]}` or
/// `{"feed": {...}}`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateFeedResponse {
    pub feeds: Vec<JsonFeed>,
    pub feed: Option<JsonFeed>,
}

impl CreateFeedResponse {
    pub fn into_first(self) -> Option<JsonFeed> {
        self.feeds.into_iter().next().or(self.feed)
    }
}

/// Body of `PATCH feeds/{id}`.
#[derive(Debug, Deserialize)]
pub struct FeedEnvelope {
    pub feed: JsonFeed,
}

/// Request body of `POST feeds` and `PATCH feeds/{id}`.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeFeed<'a> {
    pub url: &'a str,
    pub folder_id: i64,
}

/// Request body of `POST sync`: local state of every dirty item.
#[derive(Debug, Serialize)]
pub struct ItemsUpload {
    pub items: Vec<ItemState>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ItemState {
    pub id: i64,
    pub is_unread: bool,
    pub is_starred: bool,
    pub content_hash: Option<String>,
}

impl From<&Item> for ItemState {
    fn from(item: &Item) -> Self {
        ItemState {
            id: item.id,
            is_unread: item.unread,
            is_starred: item.starred,
            content_hash: item.content_hash.clone(),
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<JsonFolder> for Folder {
    fn from(folder: JsonFolder) -> Self {
        Folder {
            id: folder.id,
            name: folder.name,
        }
    }
}

impl From<JsonFeed> for Feed {
    fn from(feed: JsonFeed) -> Self {
        let error_count = feed
            .update_error_count
            .unwrap_or_else(|| i64::from(feed.error.as_ref().is_some_and(|e| e.code != 0)));
        let last_error = feed
            .last_update_error
            .filter(|e| !e.is_empty())
            .or_else(|| feed.error.and_then(|e| e.message));
        let name = feed
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| feed.url.clone());

        Feed {
            id: feed.id,
            url: feed.url,
            name,
            favicon_link: feed.favicon_link.filter(|l| !l.is_empty()),
            folder_id: feed.folder_id.unwrap_or(ROOT_FOLDER_ID),
            ordering: feed.ordering,
            is_pinned: feed.is_pinned,
            unread_count: feed.unread_count,
            error_count,
            last_error,
        }
    }
}

impl From<JsonItem> for Item {
    fn from(item: JsonItem) -> Self {
        let enclosure = item.enclosure.unwrap_or_default();

        Item {
            id: item.id,
            feed_id: item.feed_id,
            guid: item.guid,
            url: item.url,
            title: item.title,
            author: item.author,
            body: item.body,
            published_at: item.published_at.as_ref().and_then(Timestamp::to_unix),
            updated_at: item.updated_at.as_ref().and_then(Timestamp::to_unix),
            enclosure_mime: enclosure.mime_type.or(item.enclosure_mime),
            enclosure_url: enclosure.url.or(item.enclosure_link),
            fingerprint: item.fingerprint,
            content_hash: item.content_hash,
            unread: item.is_unread,
            starred: item.is_starred,
            unread_changed: false,
            starred_changed: false,
        }
    }
}

impl From<JsonUser> for User {
    fn from(user: JsonUser) -> Self {
        let avatar = user.avatar.unwrap_or_default();
        User {
            user_id: user.user_id,
            display_name: user.display_name,
            last_login: user.last_login.as_ref().and_then(Timestamp::to_unix),
            avatar: avatar.data,
            avatar_mime: avatar.mime,
        }
    }
}
