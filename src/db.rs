// =============================================================================
// DATABASE MODULE
// =============================================================================
// PostgreSQL access for the device directory.
//
// The pool lives in `Database`; every device operation runs inside an explicit
// transaction that the handler opens with `Database::begin`, passes into the
// functions below as `&mut PgConnection`, and then commits or rolls back.
// =============================================================================

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool, Postgres, QueryBuilder, Transaction};
use std::time::Instant;
use uuid::Uuid;

use crate::error::AppError;
use crate::metrics;
use crate::models::{Department, DeviceRow, ListParams};
use crate::validation::DeviceFields;

// Columns of `DeviceRow`, read from a devices relation aliased `d` joined to
// its department.
const DEVICE_COLUMNS: &str = r#"
    d.id, d.name, d.device_type, d.fabrique_number, d.passport_number,
    d.manufactured_date, d.zri_count, d.is_active, d.department_id,
    dep.name AS department_name, d.created_at, d.updated_at
"#;

// -----------------------------------------------------------------------------
// DATABASE WRAPPER
// -----------------------------------------------------------------------------
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    // -------------------------------------------------------------------------
    // CONNECTION
    // -------------------------------------------------------------------------
    /// Create a new database connection pool
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .idle_timeout(std::time::Duration::from_secs(300))
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests build lazily-connected pools)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Open the transaction one request works in.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    // -------------------------------------------------------------------------
    // MIGRATIONS
    // -------------------------------------------------------------------------
    /// Create the directory tables if they don't exist.
    ///
    /// `departments` and `device_records` are owned by neighbouring services;
    /// they are created here only so the foreign keys and the usage sum have
    /// something to point at in a fresh database.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS departments (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                name VARCHAR(255) NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create departments table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS devices (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                name VARCHAR(64) NOT NULL,
                device_type VARCHAR(64) NOT NULL,
                -- Serial number: unique across active and inactive devices
                fabrique_number VARCHAR(64) NOT NULL UNIQUE,
                passport_number VARCHAR(64) NOT NULL,
                manufactured_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                zri_count INTEGER NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                department_id UUID NOT NULL REFERENCES departments(id),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                CONSTRAINT zri_count_range CHECK (zri_count BETWEEN 1 AND 99)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create devices table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS device_records (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                device_id UUID NOT NULL REFERENCES devices(id),
                amount INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create device_records table")?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_devices_active ON devices(is_active)",
            "CREATE INDEX IF NOT EXISTS idx_devices_department ON devices(department_id)",
            "CREATE INDEX IF NOT EXISTS idx_device_records_device ON device_records(device_id)",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to run: {statement}"))?;
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // HEALTH CHECK
    // -------------------------------------------------------------------------
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

// =============================================================================
// LIST FILTER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameOrdering {
    Asc,
    Desc,
}

/// One requested page: 1-based page number and page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: i64,
    pub size: i64,
}

impl Page {
    pub fn offset(&self) -> i64 {
        (self.number - 1).saturating_mul(self.size)
    }

    pub fn total_pages(&self, total_items: i64) -> i64 {
        if total_items <= 0 {
            return 0;
        }
        total_items / self.size + i64::from(total_items % self.size != 0)
    }
}

/// Interpreted `GET /devices` query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    pub include_inactive: bool,
    pub ordering: Option<NameOrdering>,
    /// Lower-cased search words; a device matches if its name contains any
    pub search_terms: Vec<String>,
    pub page: Option<Page>,
}

impl DeviceFilter {
    pub fn from_params(params: &ListParams) -> Result<Self, AppError> {
        let include_inactive = match params.show_inactive.as_deref().map(str::trim) {
            None | Some("") => false,
            Some(raw) => parse_flag(raw).ok_or_else(|| {
                AppError::Validation(format!("show_inactive: '{raw}' is not a valid boolean"))
            })?,
        };

        // Unknown orderings are ignored rather than rejected
        let ordering = match params.ordering.as_deref() {
            Some("name") => Some(NameOrdering::Asc),
            Some("-name") => Some(NameOrdering::Desc),
            _ => None,
        };

        let search_terms = params
            .search
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_lowercase).collect())
            .unwrap_or_default();

        let page = match (non_empty(&params.offset), non_empty(&params.limit)) {
            (Some(offset), Some(limit)) => Some(Page {
                number: positive("offset", offset)?,
                size: positive("limit", limit)?,
            }),
            _ => None,
        };

        Ok(Self {
            include_inactive,
            ordering,
            search_terms,
            page,
        })
    }

    fn push_conditions(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" WHERE TRUE");
        if !self.include_inactive {
            qb.push(" AND d.is_active");
        }
        if !self.search_terms.is_empty() {
            qb.push(" AND (");
            for (i, term) in self.search_terms.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push("LOWER(d.name) LIKE ")
                    .push_bind(contains_pattern(term))
                    .push(r" ESCAPE '\'");
            }
            qb.push(")");
        }
    }

    fn push_ordering(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(match self.ordering {
            Some(NameOrdering::Asc) => " ORDER BY d.name ASC, d.id",
            Some(NameOrdering::Desc) => " ORDER BY d.name DESC, d.id",
            None => " ORDER BY d.created_at, d.id",
        });
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn positive(name: &str, raw: &str) -> Result<i64, AppError> {
    match raw.parse::<i64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(AppError::Validation(format!(
            "{name} must be a positive integer"
        ))),
    }
}

// Earlier versions of the directory passed search words to LIKE unescaped,
// so `%` and `_` acted as wildcards there; here they match themselves.
/// `%term%` with LIKE wildcards in the term escaped, so the term matches
/// only as a literal substring.
pub fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

// =============================================================================
// READ OPERATIONS
// =============================================================================

/// List devices matching `filter`.
///
/// Returns the rows and, when a page was requested, the total number of
/// matching devices.
pub async fn list_devices(
    conn: &mut PgConnection,
    filter: &DeviceFilter,
) -> Result<(Vec<DeviceRow>, Option<i64>), sqlx::Error> {
    let start = Instant::now();

    let total = match filter.page {
        Some(_) => {
            let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM devices d");
            filter.push_conditions(&mut count);
            Some(count.build_query_scalar::<i64>().fetch_one(&mut *conn).await?)
        }
        None => None,
    };

    let mut qb = QueryBuilder::<Postgres>::new(format!(
        "SELECT {DEVICE_COLUMNS} FROM devices d \
         LEFT JOIN departments dep ON dep.id = d.department_id"
    ));
    filter.push_conditions(&mut qb);
    filter.push_ordering(&mut qb);
    if let Some(page) = filter.page {
        qb.push(" LIMIT ")
            .push_bind(page.size)
            .push(" OFFSET ")
            .push_bind(page.offset());
    }

    let rows = qb.build_query_as::<DeviceRow>().fetch_all(&mut *conn).await?;

    metrics::record_db_query("select", start.elapsed().as_secs_f64());
    Ok((rows, total))
}

/// Fetch one device; `lock` takes a row lock for the rest of the transaction.
pub async fn fetch_device(
    conn: &mut PgConnection,
    id: Uuid,
    lock: bool,
) -> Result<Option<DeviceRow>, sqlx::Error> {
    let start = Instant::now();

    let lock_clause = if lock { " FOR UPDATE OF d" } else { "" };
    let sql = format!(
        "SELECT {DEVICE_COLUMNS} FROM devices d \
         LEFT JOIN departments dep ON dep.id = d.department_id \
         WHERE d.id = $1{lock_clause}"
    );
    let row = sqlx::query_as::<_, DeviceRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    metrics::record_db_query("select", start.elapsed().as_secs_f64());
    Ok(row)
}

pub async fn find_department(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<Department>, sqlx::Error> {
    sqlx::query_as::<_, Department>("SELECT id, name FROM departments WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
}

/// Sum of `amount` over the loaded records attached to a device.
pub async fn loaded_amount(conn: &mut PgConnection, device_id: Uuid) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM device_records WHERE device_id = $1",
    )
    .bind(device_id)
    .fetch_one(&mut *conn)
    .await
}

// =============================================================================
// WRITE OPERATIONS
// =============================================================================
// Writes return raw sqlx errors; callers reclassify them with
// `AppError::from_write` after rolling back.

pub async fn insert_device(
    conn: &mut PgConnection,
    id: Uuid,
    department_id: Uuid,
    fields: &DeviceFields,
) -> Result<DeviceRow, sqlx::Error> {
    let start = Instant::now();

    let sql = format!(
        r#"
        WITH d AS (
            INSERT INTO devices (id, name, device_type, fabrique_number, passport_number,
                                 manufactured_date, zri_count, department_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
        )
        SELECT {DEVICE_COLUMNS} FROM d
        LEFT JOIN departments dep ON dep.id = d.department_id
        "#
    );
    let row = sqlx::query_as::<_, DeviceRow>(&sql)
        .bind(id)
        .bind(&fields.name)
        .bind(&fields.device_type)
        .bind(&fields.fabrique_number)
        .bind(&fields.passport_number)
        .bind(fields.manufactured_date)
        .bind(fields.zri_count)
        .bind(department_id)
        .fetch_one(&mut *conn)
        .await?;

    metrics::record_db_query("insert", start.elapsed().as_secs_f64());
    Ok(row)
}

/// Overwrite a device's attributes; `activate` re-enables the device.
pub async fn update_device(
    conn: &mut PgConnection,
    id: Uuid,
    fields: &DeviceFields,
    activate: bool,
) -> Result<DeviceRow, sqlx::Error> {
    let start = Instant::now();

    let sql = format!(
        r#"
        WITH d AS (
            UPDATE devices
            SET name = $2, device_type = $3, fabrique_number = $4, passport_number = $5,
                manufactured_date = $6, zri_count = $7,
                is_active = is_active OR $8,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
        )
        SELECT {DEVICE_COLUMNS} FROM d
        LEFT JOIN departments dep ON dep.id = d.department_id
        "#
    );
    let row = sqlx::query_as::<_, DeviceRow>(&sql)
        .bind(id)
        .bind(&fields.name)
        .bind(&fields.device_type)
        .bind(&fields.fabrique_number)
        .bind(&fields.passport_number)
        .bind(fields.manufactured_date)
        .bind(fields.zri_count)
        .bind(activate)
        .fetch_one(&mut *conn)
        .await?;

    metrics::record_db_query("update", start.elapsed().as_secs_f64());
    Ok(row)
}

/// Soft-delete: mark the device inactive and leave everything else alone.
pub async fn deactivate_device(conn: &mut PgConnection, id: Uuid) -> Result<DeviceRow, sqlx::Error> {
    let start = Instant::now();

    let sql = format!(
        r#"
        WITH d AS (
            UPDATE devices SET is_active = FALSE, updated_at = NOW()
            WHERE id = $1
            RETURNING *
        )
        SELECT {DEVICE_COLUMNS} FROM d
        LEFT JOIN departments dep ON dep.id = d.department_id
        "#
    );
    let row = sqlx::query_as::<_, DeviceRow>(&sql)
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;

    metrics::record_db_query("update", start.elapsed().as_secs_f64());
    Ok(row)
}
