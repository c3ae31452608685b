use anyhow::Result;
use sqlx::{QueryBuilder, SqliteConnection};
use std::collections::HashSet;

use super::schema::Database;
use super::types::{Feed, ROOT_FOLDER_ID};

const FEED_COLUMNS: &str = "id, url, name, favicon_link, folder_id, ordering, is_pinned, \
                            unread_count, error_count, last_error";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Get all feeds, pinned first, then by server ordering and name
    pub async fn get_feeds(&self) -> Result<Vec<Feed>> {
        let sql = format!(
            "SELECT {FEED_COLUMNS} FROM feeds ORDER BY is_pinned DESC, ordering, name COLLATE NOCASE"
        );
        let feeds = sqlx::query_as::<_, Feed>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    /// Get the feeds of one folder (`ROOT_FOLDER_ID` for feeds without a folder)
    pub async fn get_feeds_in_folder(&self, folder_id: i64) -> Result<Vec<Feed>> {
        let sql = format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE folder_id = ? \
             ORDER BY is_pinned DESC, ordering, name COLLATE NOCASE"
        );
        let feeds = sqlx::query_as::<_, Feed>(&sql)
            .bind(folder_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?");
        let feed = sqlx::query_as::<_, Feed>(&sql)
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    /// Insert a feed, or overwrite the stored row with the same id
    pub async fn insert_feed(&self, feed: &Feed) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_feeds(&mut conn, std::slice::from_ref(feed)).await?;
        Ok(())
    }

    /// Delete a feed together with its items.
    ///
    /// Returns `true` if the feed existed.
    pub async fn delete_feed(&self, feed_id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM items WHERE feed_id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Insert or overwrite feeds by id.
pub(crate) async fn upsert_feeds(conn: &mut SqliteConnection, feeds: &[Feed]) -> Result<()> {
    const BATCH_SIZE: usize = 50;

    for chunk in feeds.chunks(BATCH_SIZE) {
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new(format!("INSERT INTO feeds ({FEED_COLUMNS}) "));

        builder.push_values(chunk, |mut b, feed| {
            b.push_bind(feed.id)
                .push_bind(&feed.url)
                .push_bind(&feed.name)
                .push_bind(&feed.favicon_link)
                .push_bind(feed.folder_id)
                .push_bind(feed.ordering)
                .push_bind(feed.is_pinned)
                .push_bind(feed.unread_count)
                .push_bind(feed.error_count)
                .push_bind(&feed.last_error);
        });

        builder.push(
            " ON CONFLICT(id) DO UPDATE SET \
             url = excluded.url, name = excluded.name, favicon_link = excluded.favicon_link, \
             folder_id = excluded.folder_id, ordering = excluded.ordering, \
             is_pinned = excluded.is_pinned, unread_count = excluded.unread_count, \
             error_count = excluded.error_count, last_error = excluded.last_error",
        );

        builder.build().execute(&mut *conn).await?;
    }

    Ok(())
}

/// Delete every feed and insert `feeds` in its place.
///
/// Must run after the folders of the same sync have been written: a feed
/// whose folder is neither `ROOT_FOLDER_ID` nor a stored folder is moved to
/// the root folder.
pub(crate) async fn replace_feeds(conn: &mut SqliteConnection, feeds: &[Feed]) -> Result<usize> {
    let folder_ids: HashSet<i64> = sqlx::query_as::<_, (i64,)>("SELECT id FROM folders")
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|(id,)| id)
        .collect();

    let feeds: Vec<Feed> = feeds
        .iter()
        .cloned()
        .map(|mut feed| {
            if feed.folder_id != ROOT_FOLDER_ID && !folder_ids.contains(&feed.folder_id) {
                tracing::warn!(
                    feed_id = feed.id,
                    folder_id = feed.folder_id,
                    "Feed references unknown folder, moving it to the root folder"
                );
                feed.folder_id = ROOT_FOLDER_ID;
            }
            feed
        })
        .collect();

    sqlx::query("DELETE FROM feeds").execute(&mut *conn).await?;
    upsert_feeds(conn, &feeds).await?;

    Ok(feeds.len())
}

/// Recompute every feed's unread count from its stored items.
pub(crate) async fn refresh_unread_counts(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE feeds SET unread_count = (
            SELECT COUNT(*) FROM items WHERE items.feed_id = feeds.id AND items.unread = 1
        )
    "#,
    )
    .execute(&mut *conn)
    .await?;
    Ok(())
}
