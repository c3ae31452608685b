//! Local store for synchronized Nextcloud News data.
//!
//! One SQLite database holds folders, feeds, items, the user row and the
//! preference key/value table. Sync writes go through
//! [`Database::apply_sync`] so that a failed sync never leaves partial state.

mod feeds;
mod folders;
mod items;
mod preferences;
mod schema;
mod snapshot;
mod types;
mod users;

pub use items::ItemQuery;
pub use schema::Database;
pub use types::{
    DatabaseError, Feed, Folder, Item, ItemFilter, SortField, SortOrder, SyncSnapshot,
    SyncSummary, UploadedState, User, ALL_UNREAD_ID, ROOT_FOLDER_ID, STARRED_ID,
};
