#![cfg(feature = "integration-tests")]

// End-to-end tests of the device endpoints against a real PostgreSQL.
// Each test starts its own container: `cargo test --features integration-tests`

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tower::ServiceExt;
use uuid::Uuid;

use device_directory::auth::{issue_token, AuthSettings};
use device_directory::db::Database;
use device_directory::{build_router, metrics, AppState};

const SECRET: &str = "integration-secret";

struct TestApp {
    router: Router,
    db: Database,
    token: String,
    // Dropping the handle stops the container
    _container: ContainerAsync<Postgres>,
}

async fn setup() -> TestApp {
    // gen_random_uuid() is built in from PostgreSQL 13 on
    let postgres = Postgres::default().with_tag("16-alpine").start().await.unwrap();
    let host = postgres.get_host().await.unwrap();
    let port = postgres.get_host_port_ipv4(5432).await.unwrap();
    let dsn = format!("postgres://postgres:postgres@{host}:{port}/postgres");

    let db = Database::connect(&dsn, 5).await.expect("connect");
    db.run_migrations().await.expect("migrations");

    let state = Arc::new(AppState {
        db: db.clone(),
        metrics_handle: metrics::detached_handle(),
        auth: AuthSettings {
            jwt_secret: SECRET.to_string(),
            permission: "directory_manage".to_string(),
        },
    });

    TestApp {
        router: build_router(state),
        db,
        token: issue_token("integration", &["directory_manage"], 600, SECRET).unwrap(),
        _container: postgres,
    }
}

fn tag() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

impl TestApp {
    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", format!("Bearer {}", self.token));
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn department(&self) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO departments (id, name) VALUES ($1, $2)")
            .bind(id)
            .bind(format!("Department {}", tag()))
            .execute(self.db.pool())
            .await
            .unwrap();
        id
    }

    async fn load(&self, device: &str, amount: i32) {
        sqlx::query("INSERT INTO device_records (device_id, amount) VALUES ($1, $2)")
            .bind(Uuid::parse_str(device).unwrap())
            .bind(amount)
            .execute(self.db.pool())
            .await
            .unwrap();
    }

    async fn create(&self, name: &str, department: Uuid) -> Value {
        let (status, body) = self
            .send("POST", "/devices", Some(device_body(name, &serial(), department)))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }
}

fn serial() -> String {
    format!("SN-{}", Uuid::new_v4())
}

fn device_body(name: &str, fabrique_number: &str, department: Uuid) -> Value {
    json!({
        "name": name,
        "device_type": "KT-1",
        "fabrique_number": fabrique_number,
        "passport_number": "P-17",
        "manufactured_date": "2023-04-01T00:00:00Z",
        "zri_count": 10,
        "department": department.to_string()
    })
}

fn update_body(name: &str, fabrique_number: &str, zri_count: i64) -> Value {
    json!({
        "name": name,
        "device_type": "KT-1",
        "fabrique_number": fabrique_number,
        "passport_number": "P-17",
        "manufactured_date": "2023-04-01T00:00:00Z",
        "zri_count": zri_count
    })
}

#[tokio::test]
async fn create_then_get() {
    let app = setup().await;
    let department = app.department().await;

    let created = app.create("  Container A  ", department).await;
    assert_eq!(created["name"], "Container A");
    assert_eq!(created["is_active"], true);
    assert_eq!(created["department"]["pk"], department.to_string());

    let pk = created["pk"].as_str().unwrap();
    let (status, fetched) = app.send("GET", &format!("/devices/{pk}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn duplicate_serial_after_trim_is_rejected() {
    let app = setup().await;
    let department = app.department().await;
    let number = serial();

    let (first, _) = app
        .send("POST", "/devices", Some(device_body("One", &number, department)))
        .await;
    let (second, body) = app
        .send(
            "POST",
            "/devices",
            Some(device_body("Two", &format!("  {number} "), department)),
        )
        .await;

    assert_eq!(first, StatusCode::CREATED);
    assert_eq!(second, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "An installation device with the same serial number already exists"
    );
}

#[tokio::test]
async fn concurrent_creates_with_one_serial_admit_exactly_one() {
    let app = setup().await;
    let department = app.department().await;
    let number = serial();

    let (first, second) = tokio::join!(
        app.send("POST", "/devices", Some(device_body("Left", &number, department))),
        app.send("POST", "/devices", Some(device_body("Right", &number, department))),
    );

    let mut statuses = [first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::CREATED, StatusCode::BAD_REQUEST]);

    let rejected = if first.0 == StatusCode::BAD_REQUEST { first.1 } else { second.1 };
    assert_eq!(
        rejected["message"],
        "An installation device with the same serial number already exists"
    );

    let (_, listed) = app.send("GET", "/devices?show_inactive=true", None).await;
    let stored: Vec<_> = listed["content"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|device| device["fabrique_number"] == number.as_str())
        .collect();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn unknown_department_is_rejected() {
    let app = setup().await;

    let (status, body) = app
        .send("POST", "/devices", Some(device_body("X", &serial(), Uuid::new_v4())))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Department not found");
}

#[tokio::test]
async fn zri_count_cannot_drop_below_loaded_amount() {
    let app = setup().await;
    let department = app.department().await;
    let created = app.create("Loaded", department).await;
    let pk = created["pk"].as_str().unwrap();
    let number = created["fabrique_number"].as_str().unwrap();

    app.load(pk, 3).await;
    app.load(pk, 4).await;

    let (status, body) = app
        .send("PUT", &format!("/devices/{pk}"), Some(update_body("Loaded", number, 6)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().ends_with("the device contains: 7"));

    let (status, body) = app
        .send("PUT", &format!("/devices/{pk}"), Some(update_body("Loaded", number, 7)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["zri_count"], 7);
}

#[tokio::test]
async fn soft_delete_skips_validation_and_hides_device() {
    let app = setup().await;
    let department = app.department().await;
    let t = tag();
    let name = format!("{t} doomed");
    app.create(&format!("{t} survivor"), department).await;
    let created = app.create(&name, department).await;
    let pk = created["pk"].as_str().unwrap();

    let mut body = update_body("", "", 0);
    body["is_active"] = json!(false);
    let (status, deleted) = app.send("PUT", &format!("/devices/{pk}"), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["is_active"], false);
    assert_eq!(deleted["name"], name);

    let (_, listed) = app.send("GET", &format!("/devices?search={t}"), None).await;
    let content = listed["content"].as_array().unwrap();
    assert_eq!(content.len(), 1);
    assert_eq!(content[0]["name"], format!("{t} survivor"));

    let (_, listed) = app
        .send("GET", &format!("/devices?search={t}&show_inactive=true"), None)
        .await;
    assert_eq!(listed["content"].as_array().unwrap().len(), 2);
    assert!(listed.get("total_items").is_none());
}

#[tokio::test]
async fn is_active_true_reactivates() {
    let app = setup().await;
    let department = app.department().await;
    let created = app.create("Phoenix", department).await;
    let pk = created["pk"].as_str().unwrap();
    let number = created["fabrique_number"].as_str().unwrap();

    let mut body = update_body("Phoenix", number, 10);
    body["is_active"] = json!(false);
    app.send("PUT", &format!("/devices/{pk}"), Some(body.clone())).await;

    body["is_active"] = json!(true);
    let (status, revived) = app.send("PUT", &format!("/devices/{pk}"), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(revived["is_active"], true);
}

#[tokio::test]
async fn search_matches_any_word_case_insensitively() {
    let app = setup().await;
    let department = app.department().await;
    let t = tag();
    app.create(&format!("{t}alpha {t}beta"), department).await;
    app.create(&format!("{t}gamma"), department).await;

    let uri = format!("/devices?search={t}BETA%20{t}zzz");
    let (status, listed) = app.send("GET", &uri, None).await;

    assert_eq!(status, StatusCode::OK);
    let content = listed["content"].as_array().unwrap();
    assert_eq!(content.len(), 1);
    assert_eq!(content[0]["name"], format!("{t}alpha {t}beta"));
}

#[tokio::test]
async fn pagination_reports_totals() {
    let app = setup().await;
    let department = app.department().await;
    let t = tag();
    for i in 0..5 {
        app.create(&format!("{t} device {i}"), department).await;
    }

    let (status, page) = app
        .send("GET", &format!("/devices?search={t}&ordering=name&offset=1&limit=2"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["content"].as_array().unwrap().len(), 2);
    assert_eq!(page["total_items"], 5);
    assert_eq!(page["total_pages"], 3);
    assert_eq!(page["content"][0]["name"], format!("{t} device 0"));

    let (_, last) = app
        .send("GET", &format!("/devices?search={t}&ordering=-name&offset=3&limit=2"), None)
        .await;
    let content = last["content"].as_array().unwrap();
    assert_eq!(content.len(), 1);
    assert_eq!(content[0]["name"], format!("{t} device 0"));
}

#[tokio::test]
async fn page_past_the_end_is_empty_with_totals() {
    let app = setup().await;
    let department = app.department().await;
    let t = tag();
    for i in 0..5 {
        app.create(&format!("{t} device {i}"), department).await;
    }

    let (status, page) = app
        .send("GET", &format!("/devices?search={t}&offset=4&limit=2"), None)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["content"], json!([]));
    assert_eq!(page["total_items"], 5);
    assert_eq!(page["total_pages"], 3);
}

#[tokio::test]
async fn updating_missing_device_is_not_found() {
    let app = setup().await;
    let uri = format!("/devices/{}", Uuid::new_v4());

    let (status, body) = app.send("PUT", &uri, Some(update_body("X", &serial(), 5))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Installation device not found");
}
