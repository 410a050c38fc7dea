// =============================================================================
// HANDLERS MODULE
// =============================================================================
// HTTP request handlers (controller layer).
//
// Device handlers follow one shape: interpret the request, open a transaction,
// run the operation against `&mut PgConnection`, then let `finish` commit or
// roll back depending on the outcome.
// =============================================================================

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use sqlx::{PgConnection, Postgres, Transaction};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::db::{self, DeviceFilter};
use crate::error::{AppError, AppResult, ValidatedJson, DEPARTMENT_NOT_FOUND, DEVICE_NOT_FOUND};
use crate::metrics;
use crate::models::*;
use crate::validation::{check_zri_usage, today_utc, validate_fields, DeviceFields};
use crate::AppState;

// =============================================================================
// HEALTH CHECK ENDPOINTS
// =============================================================================

/// Liveness probe
///
/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness probe: 503 until PostgreSQL answers.
///
/// GET /ready
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadinessResponse>, StatusCode> {
    let db_healthy = state.db.health_check().await;

    if db_healthy {
        Ok(Json(ReadinessResponse {
            status: "ready".to_string(),
            checks: ReadinessChecks { database: true },
        }))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

/// Prometheus metrics endpoint
///
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

// =============================================================================
// DEVICE API ENDPOINTS
// =============================================================================

// -----------------------------------------------------------------------------
// LIST DEVICES
// -----------------------------------------------------------------------------
/// List, search and paginate devices
///
/// GET /devices?ordering=-name&show_inactive=true&search=alpha%20beta&offset=1&limit=20
///
/// # Query Parameters
/// - `ordering`: `name` or `-name`
/// - `show_inactive`: include soft-deleted devices
/// - `search`: whitespace-separated words, any of which may match the name
/// - `offset`, `limit`: 1-based page number and page size, both required
///
/// # Response
/// ```json
/// { "content": [...], "total_pages": 3, "total_items": 5 }
/// ```
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<DeviceListResponse>> {
    let start = Instant::now();
    let result = list(&state, &params).await;
    observe("GET", "/devices", start, &result, StatusCode::OK);
    result.map(Json)
}

async fn list(state: &AppState, params: &ListParams) -> AppResult<DeviceListResponse> {
    let filter = DeviceFilter::from_params(params)?;

    let mut tx = state.db.begin().await?;
    let result = db::list_devices(&mut tx, &filter).await.map_err(AppError::from);
    let (rows, total) = finish(tx, result).await?;

    let (total_pages, total_items) = match (filter.page, total) {
        (Some(page), Some(total)) => (Some(page.total_pages(total)), Some(total)),
        _ => (None, None),
    };

    Ok(DeviceListResponse {
        content: rows.into_iter().map(DeviceResponse::from).collect(),
        total_pages,
        total_items,
    })
}

// -----------------------------------------------------------------------------
// CREATE DEVICE
// -----------------------------------------------------------------------------
/// Create a device
///
/// POST /devices
///
/// # Response
/// - 201 Created: the new device
/// - 400 Bad Request: validation failure, unknown department, duplicate serial
pub async fn create_device(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<CreateDeviceRequest>,
) -> AppResult<(StatusCode, Json<DeviceResponse>)> {
    let start = Instant::now();
    let result = create(&state, &request).await;
    observe("POST", "/devices", start, &result, StatusCode::CREATED);

    let device = result?;
    metrics::record_lifecycle_event("created");
    tracing::info!(
        device_id = %device.pk,
        fabrique_number = %device.fabrique_number,
        "Device created"
    );
    Ok((StatusCode::CREATED, Json(device)))
}

async fn create(state: &AppState, request: &CreateDeviceRequest) -> AppResult<DeviceResponse> {
    let fields = validate_fields(request, today_utc())?;

    let mut tx = state.db.begin().await?;
    let result = insert(&mut tx, &request.department, &fields).await;
    finish(tx, result).await.map(DeviceResponse::from)
}

async fn insert(
    conn: &mut PgConnection,
    department: &str,
    fields: &DeviceFields,
) -> AppResult<DeviceRow> {
    let department = match Uuid::parse_str(department.trim()) {
        Ok(id) => db::find_department(conn, id).await?,
        Err(_) => None,
    }
    .ok_or_else(|| AppError::NotFound(DEPARTMENT_NOT_FOUND.to_string()))?;

    db::insert_device(conn, Uuid::new_v4(), department.id, fields)
        .await
        .map_err(AppError::from_write)
}

// -----------------------------------------------------------------------------
// GET DEVICE
// -----------------------------------------------------------------------------
/// Get one device
///
/// GET /devices/:id
///
/// Unknown ids answer 400, like every other directory failure.
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<DeviceResponse>> {
    let start = Instant::now();
    let result = get(&state, &id).await;
    observe("GET", "/devices/:id", start, &result, StatusCode::OK);
    result.map(Json)
}

async fn get(state: &AppState, id: &str) -> AppResult<DeviceResponse> {
    let id = parse_device_id(id)?;

    let mut tx = state.db.begin().await?;
    let result = match db::fetch_device(&mut tx, id, false).await {
        Ok(Some(row)) => Ok(row),
        Ok(None) => Err(AppError::NotFound(DEVICE_NOT_FOUND.to_string())),
        Err(err) => Err(err.into()),
    };

    finish(tx, result).await.map(DeviceResponse::from)
}

// -----------------------------------------------------------------------------
// UPDATE DEVICE
// -----------------------------------------------------------------------------
/// Update or soft-delete a device
///
/// PUT /devices/:id
///
/// `"is_active": false` deactivates the device and ignores the other fields.
pub async fn update_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ValidatedJson(request): ValidatedJson<UpdateDeviceRequest>,
) -> AppResult<Json<DeviceResponse>> {
    let start = Instant::now();
    let result = update(&state, &id, &request).await;
    observe("PUT", "/devices/:id", start, &result, StatusCode::OK);

    let (device, event) = result?;
    metrics::record_lifecycle_event(event);
    tracing::info!(device_id = %device.pk, event, "Device updated");
    Ok(Json(device))
}

async fn update(
    state: &AppState,
    id: &str,
    request: &UpdateDeviceRequest,
) -> AppResult<(DeviceResponse, &'static str)> {
    let id = parse_device_id(id)?;

    let mut tx = state.db.begin().await?;
    let result = apply_update(&mut tx, id, request).await;
    finish(tx, result)
        .await
        .map(|(row, event)| (DeviceResponse::from(row), event))
}

async fn apply_update(
    conn: &mut PgConnection,
    id: Uuid,
    request: &UpdateDeviceRequest,
) -> AppResult<(DeviceRow, &'static str)> {
    // Row lock: concurrent updates of one device queue behind each other
    if db::fetch_device(conn, id, true).await?.is_none() {
        return Err(AppError::NotFound(DEVICE_NOT_FOUND.to_string()));
    }

    if request.is_active == Some(false) {
        let row = db::deactivate_device(conn, id)
            .await
            .map_err(AppError::from_write)?;
        return Ok((row, "deactivated"));
    }

    let fields = validate_fields(request, today_utc())?;

    let in_use = db::loaded_amount(conn, id).await?;
    check_zri_usage(fields.zri_count, in_use)?;

    let row = db::update_device(conn, id, &fields, request.is_active == Some(true))
        .await
        .map_err(AppError::from_write)?;
    Ok((row, "updated"))
}

// =============================================================================
// HELPERS
// =============================================================================

fn parse_device_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::NotFound(DEVICE_NOT_FOUND.to_string()))
}

/// Commit on success, roll back on failure.
///
/// A failing commit is reclassified like any other write failure.
async fn finish<T>(tx: Transaction<'static, Postgres>, result: AppResult<T>) -> AppResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await.map_err(AppError::from_write)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

fn observe<T>(
    method: &str,
    endpoint: &str,
    start: Instant,
    result: &AppResult<T>,
    success: StatusCode,
) {
    let status = match result {
        Ok(_) => success,
        Err(err) => err.status_and_code().0,
    };
    metrics::record_http_request(
        method,
        endpoint,
        status.as_u16(),
        start.elapsed().as_secs_f64(),
    );
}
