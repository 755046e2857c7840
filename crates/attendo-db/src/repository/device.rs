//! # Device Repository
//!
//! Database operations for registered terminals.
//!
//! The sync core only ever reads this table: the orchestrator enumerates
//! devices fresh at the start of each pass, and the attendance pull resolves
//! a terminal by IP. Writes come from the console.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use attendo_core::{Device, NewDevice};

const DEVICE_COLUMNS: &str =
    "id, name, device_model, serial_number, ip, port, created_at, updated_at";

/// Repository for device database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.devices();
///
/// let device = repo.insert(&new_device).await?;
/// let same = repo.find_by_ip("10.0.0.5").await?;
/// ```
#[derive(Debug, Clone)]
pub struct DeviceRepository {
    pool: SqlitePool,
}

impl DeviceRepository {
    /// Creates a new DeviceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DeviceRepository { pool }
    }

    /// Lists all devices in registration order.
    pub async fn list(&self) -> DbResult<Vec<Device>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices ORDER BY id");
        let devices = sqlx::query_as::<_, Device>(&sql)
            .fetch_all(&self.pool)
            .await?;

        debug!(count = devices.len(), "Listed devices");
        Ok(devices)
    }

    /// Gets a device by its row id.
    ///
    /// ## Returns
    /// * `Ok(Some(Device))` - Device found
    /// * `Ok(None)` - Device not found
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Device>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1");
        let device = sqlx::query_as::<_, Device>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(device)
    }

    /// Finds the device registered at `ip`.
    ///
    /// IPs are not unique in the schema; when several rows share one, the
    /// earliest registered wins.
    pub async fn find_by_ip(&self, ip: &str) -> DbResult<Option<Device>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE ip = ?1 ORDER BY id LIMIT 1");
        let device = sqlx::query_as::<_, Device>(&sql)
            .bind(ip)
            .fetch_optional(&self.pool)
            .await?;

        Ok(device)
    }

    /// Registers a new device.
    ///
    /// ## Errors
    /// * `DbError::UniqueViolation` - serial number already registered
    pub async fn insert(&self, device: &NewDevice) -> DbResult<Device> {
        let now = Utc::now();

        debug!(serial = %device.serial_number, ip = %device.ip, "Inserting device");

        let sql = format!(
            r#"
            INSERT INTO devices (name, device_model, serial_number, ip, port, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            RETURNING {DEVICE_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Device>(&sql)
            .bind(&device.name)
            .bind(&device.device_model)
            .bind(&device.serial_number)
            .bind(&device.ip)
            .bind(device.port)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| serial_conflict(e, &device.serial_number))
    }

    /// Overwrites every editable field of device `id`.
    ///
    /// ## Errors
    /// * `DbError::NotFound` - no such device
    /// * `DbError::UniqueViolation` - new serial number belongs to another device
    pub async fn update(&self, id: i64, device: &NewDevice) -> DbResult<Device> {
        debug!(id, serial = %device.serial_number, "Updating device");

        let sql = format!(
            r#"
            UPDATE devices
            SET name = ?1, device_model = ?2, serial_number = ?3, ip = ?4, port = ?5, updated_at = ?6
            WHERE id = ?7
            RETURNING {DEVICE_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Device>(&sql)
            .bind(&device.name)
            .bind(&device.device_model)
            .bind(&device.serial_number)
            .bind(&device.ip)
            .bind(device.port)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| serial_conflict(e, &device.serial_number))?
            .ok_or_else(|| DbError::not_found("Device", id))
    }

    /// Deletes device `id`. Users it owned are detached, not deleted.
    pub async fn delete(&self, id: i64) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM devices WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Device", id));
        }

        debug!(id, "Deleted device");
        Ok(())
    }

    /// Counts registered devices.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM devices")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn serial_conflict(err: sqlx::Error, serial: &str) -> DbError {
    match DbError::from(err) {
        DbError::UniqueViolation { .. } => DbError::duplicate("serial_number", serial),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn sample(serial: &str, ip: &str) -> NewDevice {
        NewDevice {
            name: "Front door".to_string(),
            device_model: "K40".to_string(),
            serial_number: serial.to_string(),
            ip: ip.to_string(),
            port: 4370,
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.devices();

        let device = repo.insert(&sample("SN001", "10.0.0.5")).await.unwrap();
        assert_eq!(device.serial_number, "SN001");
        assert_eq!(device.port, 4370);

        let by_id = repo.get_by_id(device.id).await.unwrap().unwrap();
        assert_eq!(by_id, device);

        let by_ip = repo.find_by_ip("10.0.0.5").await.unwrap().unwrap();
        assert_eq!(by_ip.id, device.id);
        assert!(repo.find_by_ip("10.0.0.6").await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_serial_rejected() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.devices();

        repo.insert(&sample("SN001", "10.0.0.5")).await.unwrap();
        let err = repo.insert(&sample("SN001", "10.0.0.6")).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { ref field, .. } if field == "serial_number"));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.devices();

        let device = repo.insert(&sample("SN001", "10.0.0.5")).await.unwrap();
        let mut edited = sample("SN001", "10.0.0.9");
        edited.port = 4371;
        let updated = repo.update(device.id, &edited).await.unwrap();
        assert_eq!(updated.ip, "10.0.0.9");
        assert_eq!(updated.port, 4371);
        assert!(updated.updated_at >= device.updated_at);

        repo.delete(device.id).await.unwrap();
        assert!(repo.get_by_id(device.id).await.unwrap().is_none());
        assert!(matches!(
            repo.delete(device.id).await,
            Err(DbError::NotFound { .. })
        ));
        assert!(matches!(
            repo.update(device.id, &edited).await,
            Err(DbError::NotFound { .. })
        ));
    }
}
