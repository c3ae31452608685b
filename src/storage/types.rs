use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another instance of the application has locked the database
    #[error("Another instance of ocsync appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as
/// one of these messages.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Sentinel Ids
// ============================================================================

/// Folder id used by feeds that live outside any folder.
pub const ROOT_FOLDER_ID: i64 = 0;

/// Virtual drawer entry listing every unread item.
pub const ALL_UNREAD_ID: i64 = -10;

/// Virtual drawer entry listing every starred item.
pub const STARRED_ID: i64 = -11;

// ============================================================================
// Data Structures
// ============================================================================

/// A grouping of feeds. Replaced wholesale on every sync.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Folder {
    pub id: i64,
    pub name: String,
}

/// A subscribed source.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub name: String,
    pub favicon_link: Option<String>,
    /// [`ROOT_FOLDER_ID`] when the feed is not in a folder
    pub folder_id: i64,
    pub ordering: i64,
    pub is_pinned: bool,
    pub unread_count: i64,
    /// Number of consecutive update failures reported by the server
    pub error_count: i64,
    pub last_error: Option<String>,
}

/// An article.
///
/// `unread_changed` and `starred_changed` are dirty bits: they are set when the
/// local state diverges from what the server last reported and cleared when
/// the server state is written back by a sync.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Item {
    pub id: i64,
    pub feed_id: i64,
    pub guid: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub body: Option<String>,
    /// Unix timestamp (seconds)
    pub published_at: Option<i64>,
    /// Unix timestamp (seconds)
    pub updated_at: Option<i64>,
    pub enclosure_mime: Option<String>,
    pub enclosure_url: Option<String>,
    pub fingerprint: Option<String>,
    pub content_hash: Option<String>,
    pub unread: bool,
    pub starred: bool,
    pub unread_changed: bool,
    pub starred_changed: bool,
}

/// Server-side identity of the logged in account. At most one row exists.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub user_id: String,
    pub display_name: Option<String>,
    /// Unix timestamp (seconds)
    pub last_login: Option<i64>,
    /// Base64 encoded avatar image
    pub avatar: Option<String>,
    pub avatar_mime: Option<String>,
}

/// Which items a listing should contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemFilter {
    AllUnread,
    Starred,
    Folder(i64),
    Feed(i64),
}

impl ItemFilter {
    /// Resolve a drawer selection (`startdrawer_itemid` + `isfeed`) to a filter.
    pub fn from_drawer(id: i64, is_feed: bool) -> Self {
        match (id, is_feed) {
            (ALL_UNREAD_ID, false) => ItemFilter::AllUnread,
            (STARRED_ID, false) => ItemFilter::Starred,
            (id, true) => ItemFilter::Feed(id),
            (id, false) => ItemFilter::Folder(id),
        }
    }

    /// The drawer selection this filter corresponds to.
    pub fn to_drawer(self) -> (i64, bool) {
        match self {
            ItemFilter::AllUnread => (ALL_UNREAD_ID, false),
            ItemFilter::Starred => (STARRED_ID, false),
            ItemFilter::Folder(id) => (id, false),
            ItemFilter::Feed(id) => (id, true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASCENDING",
            SortOrder::Descending => "DESCENDING",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ASCENDING" => Some(SortOrder::Ascending),
            "DESCENDING" => Some(SortOrder::Descending),
            _ => None,
        }
    }

    pub(crate) fn sql(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    PubDate,
    UpdatedAt,
    Id,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::PubDate => "pubDate",
            SortField::UpdatedAt => "updatedAt",
            SortField::Id => "id",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pubDate" => Some(SortField::PubDate),
            "updatedAt" => Some(SortField::UpdatedAt),
            "id" => Some(SortField::Id),
            _ => None,
        }
    }

    pub(crate) fn column(&self) -> &'static str {
        match self {
            SortField::PubDate => "published_at",
            SortField::UpdatedAt => "updated_at",
            SortField::Id => "id",
        }
    }
}

/// Outcome of applying one sync response to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncSummary {
    pub folders: usize,
    pub feeds: usize,
    /// Items inserted or updated
    pub items: usize,
    /// Incoming items dropped because their feed is unknown
    pub skipped_items: usize,
    /// Local items removed because their feed disappeared
    pub pruned_items: usize,
}

/// Read and starred state of an item as it was sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadedState {
    pub id: i64,
    pub unread: bool,
    pub starred: bool,
}

impl From<&Item> for UploadedState {
    fn from(item: &Item) -> Self {
        UploadedState {
            id: item.id,
            unread: item.unread,
            starred: item.starred,
        }
    }
}

/// Everything a successful sync writes in one transaction.
#[derive(Debug, Clone, Default)]
pub struct SyncSnapshot {
    /// New ETag, or `None` to clear the cached one
    pub etag: Option<String>,
    pub folders: Vec<Folder>,
    pub feeds: Vec<Feed>,
    pub items: Vec<Item>,
    /// Local changes sent with the request. `None` for a plain fetch, where
    /// the server copy wins for every item.
    pub uploaded: Option<Vec<UploadedState>>,
}
