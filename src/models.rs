// =============================================================================
// MODELS MODULE
// =============================================================================
// Data structures used throughout the service:
// - database rows (FromRow)
// - wire representations (Serialize)
// - request bodies and query strings (Deserialize)
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

// =============================================================================
// DEVICE ROW
// =============================================================================
// One row of `devices` joined with its department. The department side is
// optional on read because the join is a LEFT JOIN.
#[derive(Debug, Clone, FromRow)]
pub struct DeviceRow {
    pub id: Uuid,
    pub name: String,
    pub device_type: String,
    pub fabrique_number: String,
    pub passport_number: String,
    pub manufactured_date: DateTime<Utc>,
    pub zri_count: i32,
    pub is_active: bool,
    pub department_id: Uuid,
    pub department_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
}

// =============================================================================
// WIRE REPRESENTATION
// =============================================================================

/// Device as returned by every device endpoint
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeviceResponse {
    /// Device identifier
    pub pk: Uuid,
    pub name: String,
    pub device_type: String,
    pub fabrique_number: String,
    pub passport_number: String,
    pub manufactured_date: DateTime<Utc>,
    pub zri_count: i32,
    /// Owning department, or null if it could not be joined
    pub department: Option<DepartmentSummary>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DepartmentSummary {
    pub pk: Uuid,
    pub name: String,
}

impl From<DeviceRow> for DeviceResponse {
    fn from(row: DeviceRow) -> Self {
        let department = row.department_name.map(|name| DepartmentSummary {
            pk: row.department_id,
            name,
        });
        Self {
            pk: row.id,
            name: row.name,
            device_type: row.device_type,
            fabrique_number: row.fabrique_number,
            passport_number: row.passport_number,
            manufactured_date: row.manufactured_date,
            zri_count: row.zri_count,
            department,
            is_active: row.is_active,
        }
    }
}

/// Response for `GET /devices`.
///
/// Pagination metadata is present only when the caller asked for a page.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceListResponse {
    pub content: Vec<DeviceResponse>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_items: Option<i64>,
}

// =============================================================================
// API REQUEST STRUCTURES
// =============================================================================

// Text fields are trimmed while deserializing, so the length rules below
// apply to the trimmed value. `validator` counts characters, not bytes.

/// Request body for `POST /devices`
///
/// # Example JSON
/// ```json
/// {
///   "name": "Container A",
///   "device_type": "KT-1",
///   "fabrique_number": "SN-0001",
///   "passport_number": "P-17",
///   "manufactured_date": "2023-04-01T00:00:00Z",
///   "zri_count": 12,
///   "department": "6f1d1c5e-0c1e-4a51-9d8b-1f0a4c1b2e33"
/// }
/// ```
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateDeviceRequest {
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 1, max = 64, message = "The name must be no more than 64 characters"))]
    pub name: String,

    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 1, max = 64, message = "The type must be no more than 64 characters"))]
    pub device_type: String,

    #[serde(deserialize_with = "trimmed")]
    #[validate(length(
        min = 1,
        max = 64,
        message = "The fabrique number must be no more than 64 characters"
    ))]
    pub fabrique_number: String,

    #[serde(deserialize_with = "trimmed")]
    #[validate(length(
        min = 1,
        max = 64,
        message = "The passport number must be no more than 64 characters"
    ))]
    pub passport_number: String,

    /// ISO-8601 date-time
    #[validate(custom = "crate::validation::validate_iso8601")]
    pub manufactured_date: String,

    #[validate(range(
        min = 1,
        max = 99,
        message = "The number of ZRI in the device must be greater than zero and less than 100"
    ))]
    pub zri_count: i64,

    /// Department identifier
    pub department: String,
}

/// Request body for `PUT /devices/:id`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateDeviceRequest {
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 1, max = 64, message = "The name must be no more than 64 characters"))]
    pub name: String,

    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 1, max = 64, message = "The type must be no more than 64 characters"))]
    pub device_type: String,

    #[serde(deserialize_with = "trimmed")]
    #[validate(length(
        min = 1,
        max = 64,
        message = "The fabrique number must be no more than 64 characters"
    ))]
    pub fabrique_number: String,

    #[serde(deserialize_with = "trimmed")]
    #[validate(length(
        min = 1,
        max = 64,
        message = "The passport number must be no more than 64 characters"
    ))]
    pub passport_number: String,

    #[validate(custom = "crate::validation::validate_iso8601")]
    pub manufactured_date: String,

    #[validate(range(
        min = 1,
        max = 99,
        message = "The number of ZRI in the device must be greater than zero and less than 100"
    ))]
    pub zri_count: i64,

    /// `false` soft-deletes the device and skips every other check
    #[serde(default)]
    pub is_active: Option<bool>,
}

fn trimmed<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.trim().to_string())
}

/// Raw query string of `GET /devices`.
///
/// Values stay strings here and are interpreted by [`crate::db::DeviceFilter`]
/// so that malformed input becomes a 400 with a readable message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub ordering: Option<String>,
    pub show_inactive: Option<String>,
    pub search: Option<String>,
    pub offset: Option<String>,
    pub limit: Option<String>,
}

// =============================================================================
// HEALTH CHECK RESPONSES
// =============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub database: bool,
}

// =============================================================================
// ERROR RESPONSES
// =============================================================================

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type/code
    pub error: String,

    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
