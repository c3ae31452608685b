use anyhow::Result;
use sqlx::{QueryBuilder, SqliteConnection};

use super::schema::Database;
use super::types::Folder;

impl Database {
    // ========================================================================
    // Folder Operations
    // ========================================================================

    /// Get all folders ordered by name
    pub async fn get_folders(&self) -> Result<Vec<Folder>> {
        let folders = sqlx::query_as::<_, Folder>(
            "SELECT id, name FROM folders ORDER BY name COLLATE NOCASE",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(folders)
    }

    pub async fn get_folder(&self, folder_id: i64) -> Result<Option<Folder>> {
        let folder = sqlx::query_as::<_, Folder>("SELECT id, name FROM folders WHERE id = ?")
            .bind(folder_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(folder)
    }
}

/// Delete every folder and insert `folders` in its place.
///
/// Folders are never merged: anything missing from `folders` is gone afterwards.
pub(crate) async fn replace_folders(conn: &mut SqliteConnection, folders: &[Folder]) -> Result<usize> {
    sqlx::query("DELETE FROM folders").execute(&mut *conn).await?;

    const BATCH_SIZE: usize = 100;
    for chunk in folders.chunks(BATCH_SIZE) {
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("INSERT OR REPLACE INTO folders (id, name) ");
        builder.push_values(chunk, |mut b, folder| {
            b.push_bind(folder.id).push_bind(&folder.name);
        });
        builder.build().execute(&mut *conn).await?;
    }

    Ok(folders.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn folder(id: i64, name: &str) -> Folder {
        Folder {
            id,
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_replace_folders_discards_missing() {
        let db = test_db().await;
        let mut conn = db.pool.acquire().await.unwrap();

        replace_folders(&mut conn, &[folder(1, "Tech"), folder(2, "News")])
            .await
            .unwrap();
        replace_folders(&mut conn, &[folder(2, "World News"), folder(3, "Comics")])
            .await
            .unwrap();
        drop(conn);

        let folders = db.get_folders().await.unwrap();
        assert_eq!(folders, vec![folder(3, "Comics"), folder(2, "World News")]);
        assert!(db.get_folder(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_folders_empty_clears_all() {
        let db = test_db().await;
        let mut conn = db.pool.acquire().await.unwrap();

        replace_folders(&mut conn, &[folder(1, "Tech")]).await.unwrap();
        let count = replace_folders(&mut conn, &[]).await.unwrap();
        drop(conn);

        assert_eq!(count, 0);
        assert!(db.get_folders().await.unwrap().is_empty());
    }
}
