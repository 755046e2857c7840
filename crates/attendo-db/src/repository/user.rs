//! # User Repository
//!
//! Database operations for locally stored users.
//!
//! ## Upsert by External Id
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │              upsert_by_user_id (one transaction)                        │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │    SELECT ... FROM users WHERE user_id = ?                             │
//! │       │                                                                 │
//! │       ├── found  → UPDATE name, privilege, password, group_id,         │
//! │       │            device_id, updated_at                               │
//! │       │                                                                 │
//! │       └── absent → INSERT                                              │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  UNIQUE(user_id) backs this up: two writers can never produce two      │
//! │  rows for one external id.                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::error::{DbError, DbResult};
use attendo_core::{LocalUser, LocalUserView, NewLocalUser};

const USER_COLUMNS: &str =
    "id, name, privilege, password, user_id, group_id, device_id, created_at, updated_at";

/// What `upsert_by_user_id` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(LocalUser),
    Updated(LocalUser),
}

impl UpsertOutcome {
    pub fn user(&self) -> &LocalUser {
        match self {
            UpsertOutcome::Inserted(user) | UpsertOutcome::Updated(user) => user,
        }
    }

    pub fn was_inserted(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }
}

/// Repository for local user operations.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Creates a new UserRepository.
    pub fn new(pool: SqlitePool) -> Self {
        UserRepository { pool }
    }

    /// Lists all users in creation order.
    pub async fn list(&self) -> DbResult<Vec<LocalUser>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
        let users = sqlx::query_as::<_, LocalUser>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    /// Lists all users together with the name of their owning device.
    pub async fn list_with_device_names(&self) -> DbResult<Vec<LocalUserView>> {
        let users = sqlx::query_as::<_, LocalUserView>(
            r#"
            SELECT
                u.id, u.name, u.privilege, u.password, u.user_id, u.group_id,
                u.device_id, u.created_at, u.updated_at,
                d.name AS device_name
            FROM users u
            LEFT JOIN devices d ON d.id = u.device_id
            ORDER BY u.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        debug!(count = users.len(), "Listed users with device names");
        Ok(users)
    }

    /// Gets a user by row id.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<LocalUser>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        let user = sqlx::query_as::<_, LocalUser>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// Gets a user by external user_id.
    pub async fn get_by_user_id(&self, user_id: i64) -> DbResult<Option<LocalUser>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_user_id(&mut conn, user_id).await
    }

    /// Creates a user.
    ///
    /// ## Errors
    /// * `DbError::UniqueViolation` - user_id already taken
    /// * `DbError::ForeignKeyViolation` - device_id doesn't exist
    pub async fn insert(&self, user: &NewLocalUser) -> DbResult<LocalUser> {
        debug!(user_id = user.user_id, "Inserting user");
        let mut conn = self.pool.acquire().await?;
        insert_user(&mut conn, user).await
    }

    /// Overwrites every editable field of user `id`.
    pub async fn update(&self, id: i64, user: &NewLocalUser) -> DbResult<LocalUser> {
        debug!(id, user_id = user.user_id, "Updating user");

        let sql = format!(
            r#"
            UPDATE users
            SET name = ?1, privilege = ?2, password = ?3, user_id = ?4,
                group_id = ?5, device_id = ?6, updated_at = ?7
            WHERE id = ?8
            RETURNING {USER_COLUMNS}
            "#
        );

        sqlx::query_as::<_, LocalUser>(&sql)
            .bind(&user.name)
            .bind(user.privilege)
            .bind(&user.password)
            .bind(user.user_id)
            .bind(user.group_id)
            .bind(user.device_id)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| user_id_conflict(e, user.user_id))?
            .ok_or_else(|| DbError::not_found("User", id))
    }

    /// Deletes user `id`.
    pub async fn delete(&self, id: i64) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("User", id));
        }

        debug!(id, "Deleted user");
        Ok(())
    }

    /// Counts local users.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Inserts the user, or overwrites the existing row with the same
    /// external user_id, in a single transaction.
    ///
    /// On update every field except `user_id`, `id` and `created_at` is
    /// replaced.
    pub async fn upsert_by_user_id(&self, user: &NewLocalUser) -> DbResult<UpsertOutcome> {
        let mut tx: Transaction<'_, Sqlite> =
            self.pool.begin().await.map_err(DbError::transaction)?;

        let outcome = match fetch_by_user_id(&mut tx, user.user_id).await? {
            Some(existing) => {
                let sql = format!(
                    r#"
                    UPDATE users
                    SET name = ?1, privilege = ?2, password = ?3, group_id = ?4,
                        device_id = ?5, updated_at = ?6
                    WHERE id = ?7
                    RETURNING {USER_COLUMNS}
                    "#
                );
                let updated = sqlx::query_as::<_, LocalUser>(&sql)
                    .bind(&user.name)
                    .bind(user.privilege)
                    .bind(&user.password)
                    .bind(user.group_id)
                    .bind(user.device_id)
                    .bind(Utc::now())
                    .bind(existing.id)
                    .fetch_one(&mut *tx)
                    .await?;
                UpsertOutcome::Updated(updated)
            }
            None => UpsertOutcome::Inserted(insert_user(&mut tx, user).await?),
        };

        tx.commit().await.map_err(DbError::transaction)?;

        debug!(
            user_id = user.user_id,
            inserted = outcome.was_inserted(),
            "Upserted user"
        );
        Ok(outcome)
    }
}

async fn fetch_by_user_id(
    conn: &mut sqlx::SqliteConnection,
    user_id: i64,
) -> DbResult<Option<LocalUser>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1");
    let user = sqlx::query_as::<_, LocalUser>(&sql)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(user)
}

async fn insert_user(conn: &mut sqlx::SqliteConnection, user: &NewLocalUser) -> DbResult<LocalUser> {
    let sql = format!(
        r#"
        INSERT INTO users (name, privilege, password, user_id, group_id, device_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        RETURNING {USER_COLUMNS}
        "#
    );

    sqlx::query_as::<_, LocalUser>(&sql)
        .bind(&user.name)
        .bind(user.privilege)
        .bind(&user.password)
        .bind(user.user_id)
        .bind(user.group_id)
        .bind(user.device_id)
        .bind(Utc::now())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| user_id_conflict(e, user.user_id))
}

fn user_id_conflict(err: sqlx::Error, user_id: i64) -> DbError {
    match DbError::from(err) {
        DbError::UniqueViolation { .. } => DbError::duplicate("user_id", user_id),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use attendo_core::{NewDevice, Privilege};

    fn alice(device_id: Option<i64>) -> NewLocalUser {
        NewLocalUser {
            name: "Alice".to_string(),
            privilege: Privilege::User,
            password: "1234".to_string(),
            user_id: 100,
            group_id: 0,
            device_id,
        }
    }

    async fn device(db: &Database) -> i64 {
        db.devices()
            .insert(&NewDevice {
                name: "Front door".to_string(),
                device_model: "K40".to_string(),
                serial_number: "SN001".to_string(),
                ip: "10.0.0.5".to_string(),
                port: 4370,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.users();

        let user = repo.insert(&alice(None)).await.unwrap();
        assert_eq!(user.user_id, 100);
        assert_eq!(user.privilege, Privilege::User);

        let found = repo.get_by_user_id(100).await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(repo.get_by_id(user.id).await.unwrap().unwrap(), found);
        assert!(repo.get_by_user_id(101).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_user_id_rejected() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.users();

        repo.insert(&alice(None)).await.unwrap();
        let err = repo.insert(&alice(None)).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { ref field, .. } if field == "user_id"));
    }

    #[tokio::test]
    async fn test_unknown_device_rejected() {
        let db = Database::in_memory().await.unwrap();
        let err = db.users().insert(&alice(Some(999))).await.unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_overwrites() {
        let db = Database::in_memory().await.unwrap();
        let device_id = device(&db).await;
        let repo = db.users();

        let first = repo.upsert_by_user_id(&alice(None)).await.unwrap();
        assert!(first.was_inserted());

        let mut changed = alice(Some(device_id));
        changed.name = "Alice B".to_string();
        changed.privilege = Privilege::Admin;
        let second = repo.upsert_by_user_id(&changed).await.unwrap();
        assert!(!second.was_inserted());
        assert_eq!(second.user().id, first.user().id);
        assert_eq!(second.user().name, "Alice B");
        assert_eq!(second.user().privilege, Privilege::Admin);
        assert_eq!(second.user().device_id, Some(device_id));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_with_device_names() {
        let db = Database::in_memory().await.unwrap();
        let device_id = device(&db).await;
        let repo = db.users();

        repo.insert(&alice(Some(device_id))).await.unwrap();
        let mut bob = alice(None);
        bob.user_id = 101;
        bob.name = "Bob".to_string();
        repo.insert(&bob).await.unwrap();

        let views = repo.list_with_device_names().await.unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].device_name.as_deref(), Some("Front door"));
        assert_eq!(views[1].device_name, None);
    }

    #[tokio::test]
    async fn test_deleting_device_detaches_users() {
        let db = Database::in_memory().await.unwrap();
        let device_id = device(&db).await;
        let user = db.users().insert(&alice(Some(device_id))).await.unwrap();

        db.devices().delete(device_id).await.unwrap();

        let user = db.users().get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(user.device_id, None);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.users();
        let user = repo.insert(&alice(None)).await.unwrap();

        let mut edited = alice(None);
        edited.group_id = 4;
        let updated = repo.update(user.id, &edited).await.unwrap();
        assert_eq!(updated.group_id, 4);

        repo.delete(user.id).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 0);
        assert!(matches!(repo.delete(user.id).await, Err(DbError::NotFound { .. })));
    }
}
