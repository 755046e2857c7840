//! # Attendance Repository
//!
//! Database operations for attendance punches.
//!
//! ## Deduplication
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Terminals return their whole log on every pull, so the same punch     │
//! │  arrives again and again:                                              │
//! │                                                                         │
//! │  pull #1: (100, 08:00:00 in) (100, 17:00:00 out)  → 2 inserted         │
//! │  pull #2: (100, 08:00:00 in) (100, 17:00:00 out)  → 0 inserted         │
//! │           (101, 08:05:12 in)                      → 1 inserted         │
//! │                                                                         │
//! │  insert_if_absent: BEGIN → exists(user_id, timestamp)? → INSERT → COMMIT│
//! │  UNIQUE(user_id, timestamp) makes a racing duplicate impossible.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use attendo_core::{LocalAttendanceRecord, NewAttendanceRecord};

const ATTENDANCE_COLUMNS: &str =
    "id, user_id, timestamp, status, status_code, device_ip, synced, created_at, updated_at";

/// Repository for attendance operations.
#[derive(Debug, Clone)]
pub struct AttendanceRepository {
    pool: SqlitePool,
}

impl AttendanceRepository {
    /// Creates a new AttendanceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AttendanceRepository { pool }
    }

    /// Lists all punches, oldest first.
    pub async fn list(&self) -> DbResult<Vec<LocalAttendanceRecord>> {
        let sql = format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance ORDER BY timestamp, id");
        let records = sqlx::query_as::<_, LocalAttendanceRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    /// Lists the punches of one external user id, oldest first.
    pub async fn list_for_user(&self, user_id: i64) -> DbResult<Vec<LocalAttendanceRecord>> {
        let sql = format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE user_id = ?1 ORDER BY timestamp, id"
        );
        let records = sqlx::query_as::<_, LocalAttendanceRecord>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    /// Checks whether a punch with this exact (user_id, timestamp) exists.
    pub async fn exists(&self, user_id: i64, timestamp: NaiveDateTime) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        punch_exists(&mut conn, user_id, timestamp).await
    }

    /// Inserts a punch.
    ///
    /// ## Errors
    /// * `DbError::UniqueViolation` - same (user_id, timestamp) already stored
    pub async fn insert(&self, record: &NewAttendanceRecord) -> DbResult<LocalAttendanceRecord> {
        let mut conn = self.pool.acquire().await?;
        insert_punch(&mut conn, record).await
    }

    /// Inserts the punch unless one with the same (user_id, timestamp)
    /// exists. Lookup and insert run in one transaction.
    ///
    /// ## Returns
    /// * `Ok(Some(record))` - newly inserted
    /// * `Ok(None)` - duplicate, nothing written
    pub async fn insert_if_absent(
        &self,
        record: &NewAttendanceRecord,
    ) -> DbResult<Option<LocalAttendanceRecord>> {
        let mut tx = self.pool.begin().await.map_err(DbError::transaction)?;

        if punch_exists(&mut tx, record.user_id, record.timestamp).await? {
            tx.rollback().await.map_err(DbError::transaction)?;
            debug!(
                user_id = record.user_id,
                timestamp = %record.timestamp,
                "Punch already stored"
            );
            return Ok(None);
        }

        let inserted = insert_punch(&mut tx, record).await?;
        tx.commit().await.map_err(DbError::transaction)?;

        Ok(Some(inserted))
    }

    /// Overwrites every editable field of punch `id`.
    pub async fn update(
        &self,
        id: i64,
        record: &NewAttendanceRecord,
    ) -> DbResult<LocalAttendanceRecord> {
        let sql = format!(
            r#"
            UPDATE attendance
            SET user_id = ?1, timestamp = ?2, status = ?3, status_code = ?4,
                device_ip = ?5, synced = ?6, updated_at = ?7
            WHERE id = ?8
            RETURNING {ATTENDANCE_COLUMNS}
            "#
        );

        sqlx::query_as::<_, LocalAttendanceRecord>(&sql)
            .bind(record.user_id)
            .bind(record.timestamp)
            .bind(record.status)
            .bind(record.status_code)
            .bind(&record.device_ip)
            .bind(record.synced)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| punch_conflict(e, record))?
            .ok_or_else(|| DbError::not_found("Attendance", id))
    }

    /// Deletes punch `id`. Never called by the sync core.
    pub async fn delete(&self, id: i64) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM attendance WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Attendance", id));
        }
        Ok(())
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attendance")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Counts punches not yet forwarded downstream.
    pub async fn count_unsynced(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attendance WHERE synced = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

async fn punch_exists(
    conn: &mut sqlx::SqliteConnection,
    user_id: i64,
    timestamp: NaiveDateTime,
) -> DbResult<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT id FROM attendance WHERE user_id = ?1 AND timestamp = ?2")
            .bind(user_id)
            .bind(timestamp)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(found.is_some())
}

async fn insert_punch(
    conn: &mut sqlx::SqliteConnection,
    record: &NewAttendanceRecord,
) -> DbResult<LocalAttendanceRecord> {
    let sql = format!(
        r#"
        INSERT INTO attendance (user_id, timestamp, status, status_code, device_ip, synced, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        RETURNING {ATTENDANCE_COLUMNS}
        "#
    );

    sqlx::query_as::<_, LocalAttendanceRecord>(&sql)
        .bind(record.user_id)
        .bind(record.timestamp)
        .bind(record.status)
        .bind(record.status_code)
        .bind(&record.device_ip)
        .bind(record.synced)
        .bind(Utc::now())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| punch_conflict(e, record))
}

fn punch_conflict(err: sqlx::Error, record: &NewAttendanceRecord) -> DbError {
    match DbError::from(err) {
        DbError::UniqueViolation { .. } => DbError::duplicate(
            "(user_id, timestamp)",
            format!("({}, {})", record.user_id, record.timestamp),
        ),
        other => other,
    }
}
