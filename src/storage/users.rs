use anyhow::Result;

use super::schema::Database;
use super::types::User;

impl Database {
    // ========================================================================
    // User Operations
    // ========================================================================

    /// Store the account's user info, replacing any previous row.
    ///
    /// Only one user is kept: switching accounts must not leave a stale row
    /// behind.
    pub async fn upsert_user(&self, user: &User) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM users WHERE user_id != ?")
            .bind(&user.user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO users (user_id, display_name, last_login, avatar, avatar_mime)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                display_name = excluded.display_name,
                last_login = excluded.last_login,
                avatar = excluded.avatar,
                avatar_mime = excluded.avatar_mime
        "#,
        )
        .bind(&user.user_id)
        .bind(&user.display_name)
        .bind(user.last_login)
        .bind(&user.avatar)
        .bind(&user.avatar_mime)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_user(&self) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT user_id, display_name, last_login, avatar, avatar_mime FROM users LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Remove all synchronized data: user, folders, feeds and items.
    ///
    /// Preferences are left alone; callers decide which keys to clear.
    pub async fn clear_account_data(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["items", "feeds", "folders", "users"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
