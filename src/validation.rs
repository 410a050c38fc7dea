// =============================================================================
// VALIDATION MODULE
// =============================================================================
// Field rules and lifecycle checks for installation devices.
//
// Per-field rules are declared on the request structs with `validator`
// attributes; this module runs them in a fixed field order, adds the
// calendar check that needs "today", and hands back typed values. Nothing
// here touches the database.
// =============================================================================

use std::borrow::Cow;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::AppError;
use crate::models::{CreateDeviceRequest, UpdateDeviceRequest};

/// Order in which field failures are reported; only the first one is.
const FIELD_ORDER: [&str; 6] = [
    "name",
    "device_type",
    "fabrique_number",
    "passport_number",
    "manufactured_date",
    "zri_count",
];

const UNPARSEABLE_DATE: &str = "The manufactured date must be an ISO-8601 date-time";
const FUTURE_DATE: &str = "Date cannot be in the future";

// -----------------------------------------------------------------------------
// FIELD ERROR
// -----------------------------------------------------------------------------
/// A rejected field together with the client-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl From<FieldError> for AppError {
    fn from(err: FieldError) -> Self {
        crate::metrics::record_validation_failure(err.field);
        AppError::Validation(err.message)
    }
}

// -----------------------------------------------------------------------------
// INPUT / OUTPUT
// -----------------------------------------------------------------------------
/// Borrowed view of the fields shared by create and update bodies.
#[derive(Debug, Clone, Copy)]
pub struct RawDeviceFields<'a> {
    pub name: &'a str,
    pub device_type: &'a str,
    pub fabrique_number: &'a str,
    pub passport_number: &'a str,
    pub manufactured_date: &'a str,
    pub zri_count: i64,
}

impl<'a> From<&'a CreateDeviceRequest> for RawDeviceFields<'a> {
    fn from(req: &'a CreateDeviceRequest) -> Self {
        Self {
            name: &req.name,
            device_type: &req.device_type,
            fabrique_number: &req.fabrique_number,
            passport_number: &req.passport_number,
            manufactured_date: &req.manufactured_date,
            zri_count: req.zri_count,
        }
    }
}

impl<'a> From<&'a UpdateDeviceRequest> for RawDeviceFields<'a> {
    fn from(req: &'a UpdateDeviceRequest) -> Self {
        Self {
            name: &req.name,
            device_type: &req.device_type,
            fabrique_number: &req.fabrique_number,
            passport_number: &req.passport_number,
            manufactured_date: &req.manufactured_date,
            zri_count: req.zri_count,
        }
    }
}

/// Trimmed, range-checked device attributes ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceFields {
    pub name: String,
    pub device_type: String,
    pub fabrique_number: String,
    pub passport_number: String,
    pub manufactured_date: DateTime<Utc>,
    pub zri_count: i32,
}

// =============================================================================
// FIELD VALIDATION
// =============================================================================
/// Validate every shared field of a request body, reporting the first failure.
///
/// `today` is the current UTC date; a manufactured date whose calendar day is
/// after it is rejected no matter the time of day.
pub fn validate_fields<'a, R>(request: &'a R, today: NaiveDate) -> Result<DeviceFields, FieldError>
where
    R: Validate,
    RawDeviceFields<'a>: From<&'a R>,
{
    let raw = RawDeviceFields::from(request);
    let errors = request.validate().err();
    let field_errors = errors
        .as_ref()
        .map(ValidationErrors::field_errors)
        .unwrap_or_default();

    let mut manufactured = None;
    for field in FIELD_ORDER {
        if let Some(error) = field_errors.get(field).and_then(|errors| errors.first()) {
            return Err(FieldError::new(field, message_of(error)));
        }
        if field == "manufactured_date" {
            let (instant, written_day) = parse_manufactured_date(raw.manufactured_date)
                .ok_or_else(|| FieldError::new(field, UNPARSEABLE_DATE))?;
            if written_day > today {
                return Err(FieldError::new(field, FUTURE_DATE));
            }
            manufactured = Some(instant);
        }
    }

    let manufactured_date =
        manufactured.ok_or_else(|| FieldError::new("manufactured_date", UNPARSEABLE_DATE))?;

    Ok(DeviceFields {
        name: raw.name.to_string(),
        device_type: raw.device_type.to_string(),
        fabrique_number: raw.fabrique_number.to_string(),
        passport_number: raw.passport_number.to_string(),
        manufactured_date,
        // Range rule on the request keeps this lossless
        zri_count: raw.zri_count as i32,
    })
}

fn message_of(error: &ValidationError) -> String {
    error
        .message
        .as_deref()
        .unwrap_or(&*error.code)
        .to_string()
}

/// `validator` hook for `manufactured_date`: the value must parse.
pub fn validate_iso8601(value: &str) -> Result<(), ValidationError> {
    if parse_manufactured_date(value).is_none() {
        let mut error = ValidationError::new("iso8601");
        error.message = Some(Cow::Borrowed(UNPARSEABLE_DATE));
        return Err(error);
    }
    Ok(())
}

/// Parse an ISO-8601 manufactured date.
///
/// Returns the instant to store and the calendar day as written by the
/// client. Accepted shapes:
/// - RFC 3339 with offset (`2023-04-01T10:00:00+03:00`, `...Z`)
/// - offset without colon (`2023-04-01T10:00:00+0300`)
/// - naive date-time, taken as UTC (`2023-04-01T10:00:00`, `2023-04-01T10:00`)
/// - bare date, taken as midnight UTC (`2023-04-01`)
pub fn parse_manufactured_date(value: &str) -> Option<(DateTime<Utc>, NaiveDate)> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some((dt.with_timezone(&Utc), dt.date_naive()));
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some((dt.with_timezone(&Utc), dt.date_naive()));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some((naive.and_utc(), naive.date()));
        }
    }
    if let Ok(day) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let naive = day.and_hms_opt(0, 0, 0)?;
        return Some((naive.and_utc(), day));
    }
    None
}

// =============================================================================
// LIFECYCLE CHECKS
// =============================================================================
/// A device's capacity may not drop below what its loaded records already use.
pub fn check_zri_usage(requested: i32, in_use: i64) -> Result<(), FieldError> {
    if i64::from(requested) < in_use {
        return Err(FieldError::new(
            "zri_count",
            format!(
                "An unacceptable value \"Number of ZRI in the device, pcs.\" is specified. \
                 At the moment, the device contains: {in_use}"
            ),
        ));
    }
    Ok(())
}

/// Current UTC calendar date.
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}
