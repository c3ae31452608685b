use anyhow::Result;
use sqlx::{QueryBuilder, SqliteConnection};
use std::collections::{HashMap, HashSet};

use super::schema::Database;
use super::types::{Item, ItemFilter, SortField, SortOrder, UploadedState};

const ITEM_COLUMNS: &str = "items.id, items.feed_id, items.guid, items.url, items.title, \
    items.author, items.body, items.published_at, items.updated_at, items.enclosure_mime, \
    items.enclosure_url, items.fingerprint, items.content_hash, items.unread, items.starred, \
    items.unread_changed, items.starred_changed";

/// Listing parameters for [`Database::get_items`].
#[derive(Debug, Clone, Copy)]
pub struct ItemQuery {
    pub filter: ItemFilter,
    pub only_unread: bool,
    pub sort_field: SortField,
    pub order: SortOrder,
    pub limit: Option<i64>,
}

impl Database {
    // ========================================================================
    // Item Operations
    // ========================================================================

    /// List items matching a drawer selection.
    ///
    /// `ItemFilter::AllUnread` always restricts to unread items; `only_unread`
    /// applies on top of the other filters.
    pub async fn get_items(&self, query: &ItemQuery) -> Result<Vec<Item>> {
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new(format!("SELECT {ITEM_COLUMNS} FROM items "));

        match query.filter {
            ItemFilter::AllUnread => {
                builder.push("WHERE items.unread = 1");
            }
            ItemFilter::Starred => {
                builder.push("WHERE items.starred = 1");
            }
            ItemFilter::Feed(feed_id) => {
                builder.push("WHERE items.feed_id = ");
                builder.push_bind(feed_id);
            }
            ItemFilter::Folder(folder_id) => {
                builder.push("JOIN feeds ON feeds.id = items.feed_id WHERE feeds.folder_id = ");
                builder.push_bind(folder_id);
            }
        }

        if query.only_unread && query.filter != ItemFilter::AllUnread {
            builder.push(" AND items.unread = 1");
        }

        // Column and direction come from closed enums, never from input
        builder.push(format!(
            " ORDER BY items.{} {}, items.id {}",
            query.sort_field.column(),
            query.order.sql(),
            query.order.sql()
        ));

        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit);
        }

        let items = builder.build_query_as::<Item>().fetch_all(&self.pool).await?;
        Ok(items)
    }

    pub async fn get_item(&self, item_id: i64) -> Result<Option<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE items.id = ?");
        let item = sqlx::query_as::<_, Item>(&sql)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    /// Items whose read or starred state changed locally since the last sync
    pub async fn get_changed_items(&self) -> Result<Vec<Item>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items \
             WHERE items.unread_changed = 1 OR items.starred_changed = 1 ORDER BY items.id"
        );
        let items = sqlx::query_as::<_, Item>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    /// Set an item's unread flag.
    ///
    /// A real change flips `unread_changed`, so setting a value back to what
    /// the server last reported leaves nothing to upload. Returns `true` if
    /// the stored value changed.
    pub async fn set_item_unread(&self, item_id: i64, unread: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE items SET unread = ?, unread_changed = NOT unread_changed \
             WHERE id = ? AND unread != ?",
        )
        .bind(unread)
        .bind(item_id)
        .bind(unread)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set an item's starred flag. Dirty-bit semantics match [`Self::set_item_unread`].
    pub async fn set_item_starred(&self, item_id: i64, starred: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE items SET starred = ?, starred_changed = NOT starred_changed \
             WHERE id = ? AND starred != ?",
        )
        .bind(starred)
        .bind(item_id)
        .bind(starred)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark every unread item of a feed as read, returning how many changed
    pub async fn mark_feed_read(&self, feed_id: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE items SET unread = 0, unread_changed = NOT unread_changed \
             WHERE feed_id = ? AND unread = 1",
        )
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Insert or update items with the state the server reported.
///
/// The server copy replaces the local one and clears both dirty bits, except
/// for a field that was changed locally after `uploaded` was taken: when a
/// row is dirty and its local value no longer matches what was sent (or it
/// was not sent at all), the local value and its dirty bit survive so the
/// edit goes out with the next sync. With `uploaded == None` the server copy
/// always wins. Items whose feed is not stored are skipped. Returns
/// `(upserted, skipped)`.
pub(crate) async fn upsert_items(
    conn: &mut SqliteConnection,
    items: &[Item],
    uploaded: Option<&[UploadedState]>,
) -> Result<(usize, usize)> {
    let feed_ids: HashSet<i64> = sqlx::query_as::<_, (i64,)>("SELECT id FROM feeds")
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|(id,)| id)
        .collect();

    let (known, orphans): (Vec<&Item>, Vec<&Item>) =
        items.iter().partition(|item| feed_ids.contains(&item.feed_id));

    if !orphans.is_empty() {
        tracing::warn!(
            skipped = orphans.len(),
            "Items reference unknown feeds, skipping them"
        );
    }

    let merged = match uploaded {
        Some(uploaded) => keep_pending_edits(conn, known, uploaded).await?,
        None => known
            .into_iter()
            .map(|item| Item {
                unread_changed: false,
                starred_changed: false,
                ..item.clone()
            })
            .collect(),
    };

    const BATCH_SIZE: usize = 50;
    for chunk in merged.chunks(BATCH_SIZE) {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "INSERT INTO items (id, feed_id, guid, url, title, author, body, published_at, \
             updated_at, enclosure_mime, enclosure_url, fingerprint, content_hash, unread, \
             starred, unread_changed, starred_changed) ",
        );

        builder.push_values(chunk, |mut b, item| {
            b.push_bind(item.id)
                .push_bind(item.feed_id)
                .push_bind(&item.guid)
                .push_bind(&item.url)
                .push_bind(&item.title)
                .push_bind(&item.author)
                .push_bind(&item.body)
                .push_bind(item.published_at)
                .push_bind(item.updated_at)
                .push_bind(&item.enclosure_mime)
                .push_bind(&item.enclosure_url)
                .push_bind(&item.fingerprint)
                .push_bind(&item.content_hash)
                .push_bind(item.unread)
                .push_bind(item.starred)
                .push_bind(item.unread_changed)
                .push_bind(item.starred_changed);
        });

        builder.push(
            " ON CONFLICT(id) DO UPDATE SET \
             feed_id = excluded.feed_id, guid = excluded.guid, url = excluded.url, \
             title = excluded.title, author = excluded.author, body = excluded.body, \
             published_at = excluded.published_at, updated_at = excluded.updated_at, \
             enclosure_mime = excluded.enclosure_mime, enclosure_url = excluded.enclosure_url, \
             fingerprint = excluded.fingerprint, content_hash = excluded.content_hash, \
             unread = excluded.unread, starred = excluded.starred, \
             unread_changed = excluded.unread_changed, \
             starred_changed = excluded.starred_changed",
        );

        builder.build().execute(&mut *conn).await?;
    }

    Ok((merged.len(), orphans.len()))
}

/// Server copies of `items` with clean dirty bits, except where a local edit
/// happened after the upload and must be kept.
async fn keep_pending_edits(
    conn: &mut SqliteConnection,
    items: Vec<&Item>,
    uploaded: &[UploadedState],
) -> Result<Vec<Item>> {
    let sent: HashMap<i64, UploadedState> = uploaded.iter().map(|u| (u.id, *u)).collect();
    // id -> (unread, starred, unread_changed, starred_changed)
    let dirty: HashMap<i64, (bool, bool, bool, bool)> =
        sqlx::query_as::<_, (i64, bool, bool, bool, bool)>(
            "SELECT id, unread, starred, unread_changed, starred_changed FROM items \
             WHERE unread_changed = 1 OR starred_changed = 1",
        )
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|(id, unread, starred, unread_changed, starred_changed)| {
            (id, (unread, starred, unread_changed, starred_changed))
        })
        .collect();

    let mut kept = 0usize;
    let merged = items
        .into_iter()
        .map(|item| {
            let mut item = item.clone();
            item.unread_changed = false;
            item.starred_changed = false;

            if let Some(&(unread, starred, unread_changed, starred_changed)) = dirty.get(&item.id) {
                let sent = sent.get(&item.id);
                if unread_changed && sent.map(|s| s.unread) != Some(unread) {
                    item.unread = unread;
                    item.unread_changed = true;
                }
                if starred_changed && sent.map(|s| s.starred) != Some(starred) {
                    item.starred = starred;
                    item.starred_changed = true;
                }
                if item.unread_changed || item.starred_changed {
                    kept += 1;
                }
            }
            item
        })
        .collect();

    if kept > 0 {
        tracing::debug!(kept, "Keeping local edits made during the sync");
    }

    Ok(merged)
}

/// Delete items whose feed no longer exists.
pub(crate) async fn prune_orphan_items(conn: &mut SqliteConnection) -> Result<u64> {
    let result = sqlx::query("DELETE FROM items WHERE feed_id NOT IN (SELECT id FROM feeds)")
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
