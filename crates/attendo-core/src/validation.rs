//! # Validation Module
//!
//! Operator form validation and coercion of terminal-reported fields.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Console forms                                                │
//! │  ├── THIS MODULE: required fields, numeric ids, port range, IP syntax  │
//! │  └── Errors shown to the operator, nothing written                     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Reconciliation                                               │
//! │  ├── THIS MODULE: user_id / group_id coercion of terminal records      │
//! │  └── A bad record is skipped, the pull continues                       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── UNIQUE(serial_number), UNIQUE(user_id),                           │
//! │  │   UNIQUE(user_id, timestamp)                                        │
//! │  └── Foreign key users.device_id → devices.id                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use attendo_core::validation::{validate_device_form, DeviceForm};
//!
//! let form = DeviceForm {
//!     name: "Front door".into(),
//!     device_model: "K40".into(),
//!     serial_number: "SN001".into(),
//!     ip: "10.0.0.5".into(),
//!     port: "4370".into(),
//! };
//! let device = validate_device_form(&form).unwrap();
//! assert_eq!(device.port, 4370);
//! ```

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{NewDevice, NewLocalUser, Privilege};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Forms
// =============================================================================

/// Raw device form input, as typed by the operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceForm {
    pub name: String,
    pub device_model: String,
    pub serial_number: String,
    pub ip: String,
    pub port: String,
}

/// Raw user form input, as typed by the operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserForm {
    pub name: String,
    pub privilege: String,
    pub password: String,
    pub user_id: String,
    pub group_id: String,
    /// Optional owning device id; empty means none.
    pub device_id: String,
}

// =============================================================================
// Form Validators
// =============================================================================

/// Validates a device form.
///
/// ## Rules
/// - name, model, serial number and IP are required
/// - IP must parse as an IPv4 or IPv6 address
/// - port must be an integer in 0..=65535
///
/// ## Returns
/// The trimmed fields, ready for insert or update.
pub fn validate_device_form(form: &DeviceForm) -> ValidationResult<NewDevice> {
    let name = required("name", &form.name)?;
    let device_model = required("device_model", &form.device_model)?;
    let serial_number = required("serial_number", &form.serial_number)?;
    let ip = validate_ip(&form.ip)?;
    let port = validate_port(&form.port)?;

    Ok(NewDevice {
        name,
        device_model,
        serial_number,
        ip,
        port,
    })
}

/// Validates a user form.
///
/// ## Rules
/// - every field except the owning device is required
/// - user_id and group_id must be integers
/// - device_id, when present, must be an integer
/// - privilege must be `User` or `Admin`
pub fn validate_user_form(form: &UserForm) -> ValidationResult<NewLocalUser> {
    let name = required("name", &form.name)?;
    let privilege: Privilege = required("privilege", &form.privilege)?.parse()?;
    let password = required("password", &form.password)?;
    let user_id = parse_integer("user_id", &required("user_id", &form.user_id)?)?;
    let group_id = parse_integer("group_id", &required("group_id", &form.group_id)?)?;

    let device_id = match form.device_id.trim() {
        "" => None,
        raw => Some(parse_integer("device_id", raw)?),
    };

    Ok(NewLocalUser {
        name,
        privilege,
        password,
        user_id,
        group_id,
        device_id,
    })
}

// =============================================================================
// Field Validators
// =============================================================================

/// Validates a TCP port given as text.
///
/// ## Example
/// ```rust
/// use attendo_core::validation::validate_port;
///
/// assert_eq!(validate_port("4370").unwrap(), 4370);
/// assert!(validate_port("70000").is_err());
/// assert!(validate_port("http").is_err());
/// ```
pub fn validate_port(raw: &str) -> ValidationResult<u16> {
    let out_of_range = || ValidationError::OutOfRange {
        field: "port".to_string(),
        min: 0,
        max: i64::from(u16::MAX),
    };

    let value: i64 = required("port", raw)?.parse().map_err(|_| out_of_range())?;
    u16::try_from(value).map_err(|_| out_of_range())
}

/// Validates an IP address given as text.
pub fn validate_ip(raw: &str) -> ValidationResult<String> {
    let ip = required("ip", raw)?;
    ip.parse::<IpAddr>()
        .map_err(|_| ValidationError::InvalidFormat {
            field: "ip".to_string(),
            reason: "must be an IPv4 or IPv6 address".to_string(),
        })?;
    Ok(ip)
}

// =============================================================================
// Terminal Field Coercion
// =============================================================================

/// Coerces a terminal-reported user id into the local integer key.
pub fn parse_user_id(raw: &str) -> ValidationResult<i64> {
    parse_integer("user_id", &required("user_id", raw)?)
}

/// Coerces a terminal-reported group id. Terminals commonly leave it blank,
/// which maps to group 0.
pub fn parse_group_id(raw: &str) -> ValidationResult<i64> {
    match raw.trim() {
        "" => Ok(0),
        trimmed => parse_integer("group_id", trimmed),
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn required(field: &str, raw: &str) -> ValidationResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn parse_integer(field: &str, raw: &str) -> ValidationResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must be an integer".to_string(),
        })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn device_form() -> DeviceForm {
        DeviceForm {
            name: "Front door".to_string(),
            device_model: "K40".to_string(),
            serial_number: "SN001".to_string(),
            ip: "10.0.0.5".to_string(),
            port: "4370".to_string(),
        }
    }

    fn user_form() -> UserForm {
        UserForm {
            name: "Alice".to_string(),
            privilege: "User".to_string(),
            password: "1234".to_string(),
            user_id: "100".to_string(),
            group_id: "1".to_string(),
            device_id: String::new(),
        }
    }

    #[test]
    fn test_valid_device_form() {
        let device = validate_device_form(&device_form()).unwrap();
        assert_eq!(device.serial_number, "SN001");
        assert_eq!(device.port, 4370);
    }

    #[test]
    fn test_device_form_requires_fields() {
        let mut form = device_form();
        form.serial_number = "  ".to_string();
        assert_eq!(
            validate_device_form(&form).unwrap_err(),
            ValidationError::Required {
                field: "serial_number".to_string()
            }
        );
    }

    #[test]
    fn test_validate_port() {
        assert_eq!(validate_port("0").unwrap(), 0);
        assert_eq!(validate_port("65535").unwrap(), 65535);
        assert!(validate_port("65536").is_err());
        assert!(validate_port("-1").is_err());
        assert!(validate_port("43a").is_err());
        assert!(validate_port("").is_err());
    }

    #[test]
    fn test_validate_ip() {
        assert!(validate_ip("192.168.1.201").is_ok());
        assert!(validate_ip("::1").is_ok());
        assert!(validate_ip("terminal.local").is_err());
    }

    #[test]
    fn test_valid_user_form() {
        let mut form = user_form();
        form.device_id = "3".to_string();
        let user = validate_user_form(&form).unwrap();
        assert_eq!(user.user_id, 100);
        assert_eq!(user.group_id, 1);
        assert_eq!(user.device_id, Some(3));
        assert_eq!(user.privilege, Privilege::User);
    }

    #[test]
    fn test_user_form_rejects_bad_input() {
        let mut form = user_form();
        form.user_id = "abc".to_string();
        assert!(validate_user_form(&form).is_err());

        let mut form = user_form();
        form.group_id = String::new();
        assert!(validate_user_form(&form).is_err());

        let mut form = user_form();
        form.privilege = "Owner".to_string();
        assert!(matches!(
            validate_user_form(&form),
            Err(ValidationError::NotAllowed { .. })
        ));

        let mut form = user_form();
        form.device_id = "x".to_string();
        assert!(validate_user_form(&form).is_err());
    }

    #[test]
    fn test_terminal_coercion() {
        assert_eq!(parse_user_id(" 42 ").unwrap(), 42);
        assert!(parse_user_id("").is_err());
        assert!(parse_user_id("A12").is_err());
        assert_eq!(parse_group_id("").unwrap(), 0);
        assert_eq!(parse_group_id("3").unwrap(), 3);
        assert!(parse_group_id("x").is_err());
    }
}
