use anyhow::Result;

use super::feeds::{refresh_unread_counts, replace_feeds};
use super::folders::replace_folders;
use super::items::{prune_orphan_items, upsert_items};
use super::preferences::write_preference;
use super::schema::Database;
use super::types::{SyncSnapshot, SyncSummary};

impl Database {
    /// Apply a sync response in a single transaction.
    ///
    /// Order matters: the ETag is written first, then folders and feeds are
    /// replaced wholesale, items of vanished feeds are pruned, and finally
    /// the incoming items are upserted. Either every change commits or none
    /// does.
    ///
    /// # Arguments
    ///
    /// * `etag_key` - Preference key the ETag is cached under
    /// * `snapshot` - Everything the server returned
    pub async fn apply_sync(&self, etag_key: &str, snapshot: &SyncSnapshot) -> Result<SyncSummary> {
        let mut tx = self.pool.begin().await?;

        write_preference(&mut *tx, etag_key, snapshot.etag.as_deref()).await?;
        let folders = replace_folders(&mut *tx, &snapshot.folders).await?;
        let feeds = replace_feeds(&mut *tx, &snapshot.feeds).await?;
        let pruned_items = prune_orphan_items(&mut *tx).await?;
        let (items, skipped_items) =
            upsert_items(&mut *tx, &snapshot.items, snapshot.uploaded.as_deref()).await?;
        refresh_unread_counts(&mut *tx).await?;

        tx.commit().await?;

        Ok(SyncSummary {
            folders,
            feeds,
            items,
            skipped_items,
            pruned_items: usize::try_from(pruned_items).unwrap_or(usize::MAX),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Feed, Folder, Item, ItemFilter, ItemQuery, SortField, SortOrder};
    use pretty_assertions::assert_eq;

    const ETAG_KEY: &str = "apiv2_etag";

    fn folder(id: i64) -> Folder {
        Folder {
            id,
            name: format!("Folder {}", id),
        }
    }

    fn feed(id: i64, folder_id: i64) -> Feed {
        Feed {
            id,
            url: format!("https://feed{}.example.com/rss", id),
            name: format!("Feed {}", id),
            favicon_link: None,
            folder_id,
            ordering: 0,
            is_pinned: false,
            unread_count: 42,
            error_count: 0,
            last_error: None,
        }
    }

    fn item(id: i64, feed_id: i64) -> Item {
        Item {
            id,
            feed_id,
            guid: None,
            url: None,
            title: Some(format!("Item {}", id)),
            author: None,
            body: None,
            published_at: Some(id),
            updated_at: None,
            enclosure_mime: None,
            enclosure_url: None,
            fingerprint: None,
            content_hash: None,
            unread: true,
            starred: false,
            unread_changed: false,
            starred_changed: false,
        }
    }

    fn snapshot(etag: Option<&str>, folders: Vec<Folder>, feeds: Vec<Feed>, items: Vec<Item>) -> SyncSnapshot {
        SyncSnapshot {
            etag: etag.map(String::from),
            folders,
            feeds,
            items,
            uploaded: None,
        }
    }

    async fn all_items(db: &Database) -> Vec<Item> {
        db.get_items(&ItemQuery {
            filter: ItemFilter::AllUnread,
            only_unread: false,
            sort_field: SortField::Id,
            order: SortOrder::Ascending,
            limit: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_apply_sync_full_snapshot() {
        let db = Database::open(":memory:").await.unwrap();
        let summary = db
            .apply_sync(
                ETAG_KEY,
                &snapshot(
                    Some("etag-1"),
                    vec![folder(1), folder(2)],
                    vec![feed(10, 1), feed(11, 0)],
                    vec![item(100, 10), item(101, 11), item(102, 11)],
                ),
            )
            .await
            .unwrap();

        assert_eq!(
            summary,
            SyncSummary {
                folders: 2,
                feeds: 2,
                items: 3,
                skipped_items: 0,
                pruned_items: 0,
            }
        );
        assert_eq!(
            db.get_preference(ETAG_KEY).await.unwrap().as_deref(),
            Some("etag-1")
        );

        // Unread counts come from stored items, not the payload
        let feed = db.get_feed(11).await.unwrap().unwrap();
        assert_eq!(feed.unread_count, 2);
    }

    #[tokio::test]
    async fn test_apply_sync_prunes_items_of_removed_feeds() {
        let db = Database::open(":memory:").await.unwrap();
        db.apply_sync(
            ETAG_KEY,
            &snapshot(
                Some("etag-1"),
                vec![folder(1)],
                vec![feed(10, 1), feed(11, 1)],
                vec![item(100, 10), item(101, 11)],
            ),
        )
        .await
        .unwrap();

        // Second sync only lists feed 10 and brings no items: feed 11 and its
        // item go away, item 100 stays because items are merged
        let summary = db
            .apply_sync(
                ETAG_KEY,
                &snapshot(Some("etag-2"), vec![folder(1)], vec![feed(10, 1)], vec![]),
            )
            .await
            .unwrap();

        assert_eq!(summary.pruned_items, 1);
        let ids: Vec<i64> = all_items(&db).await.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![100]);
        assert!(db.get_feed(11).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_sync_without_etag_clears_cached_value() {
        let db = Database::open(":memory:").await.unwrap();
        db.set_preference(ETAG_KEY, "stale").await.unwrap();

        db.apply_sync(ETAG_KEY, &snapshot(None, vec![], vec![], vec![]))
            .await
            .unwrap();

        assert_eq!(db.get_preference(ETAG_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_apply_sync_skips_orphan_items() {
        let db = Database::open(":memory:").await.unwrap();
        let summary = db
            .apply_sync(
                ETAG_KEY,
                &snapshot(
                    Some("e"),
                    vec![],
                    vec![feed(10, 0)],
                    vec![item(100, 10), item(101, 77)],
                ),
            )
            .await
            .unwrap();

        assert_eq!(summary.items, 1);
        assert_eq!(summary.skipped_items, 1);
    }
}
