use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::services::realtime::ChangeKind;
use appointment_cell::{appointment_routes, AppointmentState, ChangeFeed};
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

const DAY: &str = "2024-05-01";

struct TestApp {
    app: Router,
    mock_server: MockServer,
    changes: ChangeFeed,
    token: String,
    doctor_id: String,
}

enum Caller {
    Nurse,
    Doctor,
}

async fn setup(caller: Caller) -> TestApp {
    let mock_server = MockServer::start().await;
    let mut config = TestConfig::with_supabase(&mock_server.uri());
    config.reschedule_webhook_url = format!("{}/hooks/reschedule", mock_server.uri());

    let user = TestUser::new("staff@clinic.test");
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, Some(1));
    let doctor_id = Uuid::new_v4().to_string();

    let profile = match caller {
        Caller::Nurse => MockSupabaseResponses::nurse_profile(&user.id),
        Caller::Doctor => MockSupabaseResponses::doctor_profile(&user.id, &doctor_id),
    };
    Mock::given(method("GET"))
        .and(path("/rest/v1/user_profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([profile])))
        .mount(&mock_server)
        .await;

    let changes = ChangeFeed::default();
    let state = AppointmentState::new(config.to_arc(), changes.clone());

    TestApp {
        app: appointment_routes(state),
        mock_server,
        changes,
        token,
        doctor_id,
    }
}

fn json_request(method: &str, uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn mount_patient_and_doctor(test: &TestApp, patient_id: &str) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::patient_response(patient_id, "Aziz", "Karimov")
        ])))
        .mount(&test.mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::doctor_response(&test.doctor_id, "Dr. Aliyev", Some("Neurology"))
        ])))
        .mount(&test.mock_server)
        .await;
}

/// Active appointments the conflict checker sees for the test doctor.
async fn mount_active_day(test: &TestApp, rows: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", test.doctor_id)))
        .and(query_param("appointment_date", format!("eq.{}", DAY)))
        .and(query_param("status", "in.(scheduled,in_consultation)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(rows)))
        .mount(&test.mock_server)
        .await;
}

async fn mount_row(test: &TestApp, row: Value) {
    let id = row["id"].as_str().unwrap().to_string();
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .mount(&test.mock_server)
        .await;
}

fn appointment_row(test: &TestApp, time: &str, status: &str) -> Value {
    MockSupabaseResponses::appointment_response(
        &Uuid::new_v4().to_string(),
        &Uuid::new_v4().to_string(),
        &test.doctor_id,
        DAY,
        time,
        status,
    )
}

fn booking_body(doctor_id: &str, patient_id: &str, time: &str) -> Value {
    json!({
        "patient_id": patient_id,
        "doctor_id": doctor_id,
        "appointment_date": DAY,
        "appointment_time": time,
        "complaint": "Persistent headache"
    })
}

// ==============================================================================
// BOOKING
// ==============================================================================

#[tokio::test]
async fn test_booking_within_thirty_minutes_is_rejected() {
    let test = setup(Caller::Nurse).await;
    let patient_id = Uuid::new_v4().to_string();
    mount_patient_and_doctor(&test, &patient_id).await;
    mount_active_day(&test, vec![
        appointment_row(&test, "09:00:00", "scheduled"),
        appointment_row(&test, "09:20:00", "scheduled"),
    ]).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&test.mock_server)
        .await;

    let response = test.app
        .oneshot(json_request("POST", "/", &test.token, booking_body(&test.doctor_id, &patient_id, "09:15")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("09:00"));
}

#[tokio::test]
async fn test_booking_clear_slot_is_created_and_published() {
    let test = setup(Caller::Nurse).await;
    let patient_id = Uuid::new_v4().to_string();
    let appointment_id = Uuid::new_v4().to_string();
    mount_patient_and_doctor(&test, &patient_id).await;
    mount_active_day(&test, vec![
        appointment_row(&test, "09:00:00", "scheduled"),
        appointment_row(&test, "09:20:00", "scheduled"),
    ]).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({
            "appointment_time": "09:50",
            "status": "scheduled",
            "complaint": "Persistent headache"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &appointment_id, &patient_id, &test.doctor_id, DAY, "09:50:00", "scheduled",
            )
        ])))
        .expect(1)
        .mount(&test.mock_server)
        .await;

    let mut receiver = test.changes.subscribe();

    let response = test.app
        .oneshot(json_request("POST", "/", &test.token, booking_body(&test.doctor_id, &patient_id, "09:50")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["appointment"]["appointment_time"], "09:50");

    let change = receiver.try_recv().unwrap();
    assert_eq!(change.kind, ChangeKind::Insert);
    assert_eq!(change.appointment_id.to_string(), appointment_id);
}

#[tokio::test]
async fn test_booking_unknown_patient_is_not_found() {
    let test = setup(Caller::Nurse).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&test.mock_server)
        .await;

    let response = test.app
        .oneshot(json_request("POST", "/", &test.token,
                              booking_body(&test.doctor_id, &Uuid::new_v4().to_string(), "10:00")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_doctor_cannot_book() {
    let test = setup(Caller::Doctor).await;

    let response = test.app
        .oneshot(json_request("POST", "/", &test.token,
                              booking_body(&test.doctor_id, &Uuid::new_v4().to_string(), "10:00")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_editing_never_conflicts_with_itself() {
    let test = setup(Caller::Nurse).await;
    let row = appointment_row(&test, "09:00:00", "scheduled");
    let appointment_id = row["id"].as_str().unwrap().to_string();
    mount_row(&test, row.clone()).await;

    // The store excludes the edited row; only the 09:40 booking comes back.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("neq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_row(&test, "09:40:00", "scheduled")
        ])))
        .expect(1)
        .mount(&test.mock_server)
        .await;

    let mut moved = row.clone();
    moved["appointment_time"] = json!("09:10:00");
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(body_partial_json(json!({ "appointment_time": "09:10" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([moved])))
        .expect(1)
        .mount(&test.mock_server)
        .await;

    let response = test.app
        .oneshot(json_request("PUT", &format!("/{}", appointment_id), &test.token,
                              json!({ "appointment_time": "09:10" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_editing_cancelled_appointment_is_rejected() {
    let test = setup(Caller::Nurse).await;
    let row = appointment_row(&test, "09:00:00", "cancelled");
    let appointment_id = row["id"].as_str().unwrap().to_string();
    mount_row(&test, row).await;

    let response = test.app
        .oneshot(json_request("PUT", &format!("/{}", appointment_id), &test.token,
                              json!({ "complaint": "Migraine" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_editing_into_taken_slot_is_rejected() {
    let test = setup(Caller::Nurse).await;
    let row = appointment_row(&test, "09:00:00", "scheduled");
    let appointment_id = row["id"].as_str().unwrap().to_string();
    mount_row(&test, row).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("neq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_row(&test, "10:00:00", "scheduled")
        ])))
        .expect(1)
        .mount(&test.mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&test.mock_server)
        .await;

    let response = test.app
        .oneshot(json_request("PUT", &format!("/{}", appointment_id), &test.token,
                              json!({ "appointment_time": "10:20" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("10:00"));
}

// ==============================================================================
// STATUS TRANSITIONS
// ==============================================================================

#[tokio::test]
async fn test_doctor_must_start_earliest_patient() {
    let test = setup(Caller::Doctor).await;
    let first = appointment_row(&test, "09:00:00", "scheduled");
    let second = appointment_row(&test, "09:30:00", "scheduled");
    mount_row(&test, second.clone()).await;
    mount_active_day(&test, vec![first, second.clone()]).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&test.mock_server)
        .await;

    let uri = format!("/{}/status", second["id"].as_str().unwrap());
    let response = test.app
        .oneshot(json_request("PATCH", &uri, &test.token, json!({ "status": "in_consultation" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_doctor_starts_next_patient() {
    let test = setup(Caller::Doctor).await;
    let first = appointment_row(&test, "09:00:00", "scheduled");
    let second = appointment_row(&test, "09:30:00", "scheduled");
    let first_id = first["id"].as_str().unwrap().to_string();
    mount_row(&test, first.clone()).await;
    mount_active_day(&test, vec![first.clone(), second]).await;

    let mut started = first.clone();
    started["status"] = json!("in_consultation");
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", first_id)))
        .and(body_partial_json(json!({ "status": "in_consultation" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([started])))
        .expect(1)
        .mount(&test.mock_server)
        .await;

    let mut receiver = test.changes.subscribe();

    let response = test.app
        .oneshot(json_request("PATCH", &format!("/{}/status", first_id), &test.token,
                              json!({ "status": "in_consultation" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["appointment"]["status"], "in_consultation");
    assert_eq!(receiver.try_recv().unwrap().kind, ChangeKind::Update);
}

#[tokio::test]
async fn test_start_disabled_while_consultation_in_progress() {
    let test = setup(Caller::Doctor).await;
    let current = appointment_row(&test, "09:00:00", "in_consultation");
    let next = appointment_row(&test, "09:30:00", "scheduled");
    mount_row(&test, next.clone()).await;
    mount_active_day(&test, vec![current, next.clone()]).await;

    let uri = format!("/{}/status", next["id"].as_str().unwrap());
    let response = test.app
        .oneshot(json_request("PATCH", &uri, &test.token, json!({ "status": "in_consultation" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_doctor_cannot_touch_other_doctors_appointment() {
    let test = setup(Caller::Doctor).await;
    let foreign = MockSupabaseResponses::appointment_response(
        &Uuid::new_v4().to_string(),
        &Uuid::new_v4().to_string(),
        &Uuid::new_v4().to_string(),
        DAY,
        "09:00:00",
        "in_consultation",
    );
    mount_row(&test, foreign.clone()).await;

    let uri = format!("/{}/status", foreign["id"].as_str().unwrap());
    let response = test.app
        .oneshot(json_request("PATCH", &uri, &test.token, json!({ "status": "completed" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_cancelled_appointment_cannot_be_reopened() {
    let test = setup(Caller::Nurse).await;
    let row = appointment_row(&test, "09:00:00", "cancelled");
    mount_row(&test, row.clone()).await;

    let uri = format!("/{}/status", row["id"].as_str().unwrap());
    let response = test.app
        .oneshot(json_request("PATCH", &uri, &test.token, json!({ "status": "scheduled" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

// ==============================================================================
// CONFLICT CHECK
// ==============================================================================

#[tokio::test]
async fn test_conflict_check_reports_suggestions() {
    let test = setup(Caller::Nurse).await;
    mount_active_day(&test, vec![
        appointment_row(&test, "09:00:00", "scheduled"),
        appointment_row(&test, "09:20:00", "in_consultation"),
    ]).await;

    let uri = format!("/conflicts/check?doctor_id={}&date={}&time=09:35", test.doctor_id, DAY);
    let response = test.app
        .oneshot(json_request("GET", &uri, &test.token, json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["has_conflict"], true);
    assert_eq!(body["conflicting_appointments"].as_array().unwrap().len(), 1);
    assert_eq!(body["conflicting_appointments"][0]["appointment_time"], "09:20");
    assert!(!body["suggested_times"].as_array().unwrap().is_empty());
}

// ==============================================================================
// RESCHEDULE WEBHOOK
// ==============================================================================

async fn mount_details(test: &TestApp, appointment_id: &str) {
    let patient = MockSupabaseResponses::patient_response(&Uuid::new_v4().to_string(), "Aziz", "Karimov");
    let doctor = MockSupabaseResponses::doctor_response(&test.doctor_id, "Dr. Aliyev", None);
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(query_param("select", "*,patient:patients(*),doctor:doctors(*)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_details_response(
                appointment_id, patient, doctor, DAY, "14:30:00", "scheduled",
            )
        ])))
        .mount(&test.mock_server)
        .await;
}

#[tokio::test]
async fn test_reschedule_request_posts_webhook() {
    let test = setup(Caller::Nurse).await;
    let appointment_id = Uuid::new_v4().to_string();
    mount_details(&test, &appointment_id).await;

    Mock::given(method("POST"))
        .and(path("/hooks/reschedule"))
        .and(body_partial_json(json!({
            "doctor_name": "Dr. Aliyev",
            "patient_first_name": "Aziz",
            "patient_last_name": "Karimov",
            "appointment_date": DAY,
            "appointment_time": "14:30"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&test.mock_server)
        .await;

    let response = test.app
        .oneshot(json_request("POST", &format!("/{}/reschedule-request", appointment_id),
                              &test.token, json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_reschedule_webhook_failure_is_bad_gateway() {
    let test = setup(Caller::Nurse).await;
    let appointment_id = Uuid::new_v4().to_string();
    mount_details(&test, &appointment_id).await;

    Mock::given(method("POST"))
        .and(path("/hooks/reschedule"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&test.mock_server)
        .await;

    let response = test.app
        .oneshot(json_request("POST", &format!("/{}/reschedule-request", appointment_id),
                              &test.token, json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

// ==============================================================================
// CHANGE INGESTION
// ==============================================================================

fn webhook_request(secret: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/changes")
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header("x-webhook-secret", secret);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn test_ingested_change_is_published() {
    let test = setup(Caller::Nurse).await;
    let mut receiver = test.changes.subscribe();
    let row = appointment_row(&test, "09:00:00", "cancelled");

    let response = test.app
        .oneshot(webhook_request(Some("test-webhook-secret"), json!({
            "type": "UPDATE",
            "table": "appointments",
            "schema": "public",
            "record": row,
            "old_record": row
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["published"], true);

    let change = receiver.try_recv().unwrap();
    assert_eq!(change.kind, ChangeKind::Update);
    assert_eq!(change.doctor_id.map(|id| id.to_string()), Some(test.doctor_id.clone()));
}

#[tokio::test]
async fn test_ingest_rejects_bad_secret() {
    let test = setup(Caller::Nurse).await;
    let mut receiver = test.changes.subscribe();

    let response = test.app
        .oneshot(webhook_request(Some("wrong"), json!({
            "type": "INSERT",
            "table": "appointments",
            "record": { "id": Uuid::new_v4() }
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn test_ingest_checks_secret_before_reading_body() {
    let test = setup(Caller::Nurse).await;

    let response = test.app
        .oneshot(webhook_request(None, json!({ "unexpected": true })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_ingest_rejects_malformed_payload() {
    let test = setup(Caller::Nurse).await;

    let response = test.app
        .oneshot(webhook_request(Some("test-webhook-secret"), json!({ "unexpected": true })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let test = setup(Caller::Nurse).await;

    let response = test.app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
