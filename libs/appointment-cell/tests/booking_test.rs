// Integration tests for the appointment lifecycle against a mocked Supabase
// backend.

use assert_matches::assert_matches;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::{
    AppointmentError, BookAppointmentRequest, RescheduleAppointmentRequest,
};
use appointment_cell::services::booking::BookingService;
use shared_utils::test_utils::TestConfig;

const AUTH_TOKEN: &str = "test_token";

fn at(h: u32, m: u32) -> DateTime<Utc> {
    chrono::NaiveDate::from_ymd_opt(2025, 6, 2)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
        .and_utc()
}

fn stored_row(
    id: Uuid,
    practitioner_id: Uuid,
    start: DateTime<Utc>,
    duration_minutes: i64,
    status: &str,
) -> serde_json::Value {
    json!({
        "id": id,
        "patient_id": Uuid::new_v4(),
        "practitioner_id": practitioner_id,
        "title": "Consultation",
        "start_time": start.to_rfc3339(),
        "end_time": (start + Duration::minutes(duration_minutes)).to_rfc3339(),
        "duration_minutes": duration_minutes,
        "status": status,
        "appointment_type": "consultation",
        "notes": null,
        "created_at": "2025-05-01T00:00:00Z",
        "updated_at": "2025-05-01T00:00:00Z"
    })
}

async fn mock_practitioner(server: &MockServer, practitioner_id: Uuid) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/practitioners"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(vec![json!({"id": practitioner_id})]),
        )
        .mount(server)
        .await;
}

fn book_request(practitioner_id: Uuid) -> BookAppointmentRequest {
    BookAppointmentRequest {
        patient_id: Uuid::new_v4(),
        practitioner_id: Some(practitioner_id),
        title: Some("Consultation".to_string()),
        start_time: at(10, 0),
        duration_minutes: 30,
        appointment_type: Some("consultation".to_string()),
        notes: None,
    }
}

#[tokio::test]
async fn booking_succeeds_when_the_time_is_free() {
    let mock_server = MockServer::start().await;
    let practitioner_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mock_practitioner(&mock_server, practitioner_id).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(vec![stored_row(
            appointment_id,
            practitioner_id,
            at(10, 0),
            30,
            "scheduled",
        )]))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = BookingService::new(&config);

    let appointment = service
        .book_appointment(book_request(practitioner_id), AUTH_TOKEN)
        .await
        .expect("booking should succeed");

    assert_eq!(appointment.id, appointment_id);
    assert_eq!(appointment.start_time, at(10, 0));
    // end_time is derived from start + duration, never taken from the caller.
    assert_eq!(appointment.end_time, at(10, 30));
}

#[tokio::test]
async fn preflight_conflict_blocks_the_insert() {
    let mock_server = MockServer::start().await;
    let practitioner_id = Uuid::new_v4();

    mock_practitioner(&mock_server, practitioner_id).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![stored_row(
            Uuid::new_v4(),
            practitioner_id,
            at(10, 15),
            30,
            "confirmed",
        )]))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = BookingService::new(&config);

    let result = service
        .book_appointment(book_request(practitioner_id), AUTH_TOKEN)
        .await;

    assert_matches!(result.unwrap_err(), AppointmentError::ConflictDetected);
}

#[tokio::test]
async fn exclusion_constraint_violation_maps_to_conflict() {
    // Two requests raced past the pre-flight check; the storage constraint
    // rejects the loser with 409.
    let mock_server = MockServer::start().await;
    let practitioner_id = Uuid::new_v4();

    mock_practitioner(&mock_server, practitioner_id).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "message": "conflicting key value violates exclusion constraint \"appointments_no_overlap\""
        })))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = BookingService::new(&config);

    let result = service
        .book_appointment(book_request(practitioner_id), AUTH_TOKEN)
        .await;

    assert_matches!(result.unwrap_err(), AppointmentError::ConflictDetected);
}

#[tokio::test]
async fn non_positive_duration_is_rejected_before_any_io() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = BookingService::new(&config);

    let mut request = book_request(Uuid::new_v4());
    request.duration_minutes = 0;

    let result = service.book_appointment(request, AUTH_TOKEN).await;
    assert_matches!(result.unwrap_err(), AppointmentError::ValidationError(_));
}

#[tokio::test]
async fn reschedule_keeps_duration_and_excludes_itself() {
    let mock_server = MockServer::start().await;
    let practitioner_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mock_practitioner(&mock_server, practitioner_id).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![stored_row(
            appointment_id,
            practitioner_id,
            at(10, 0),
            30,
            "scheduled",
        )]))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("neq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![stored_row(
            appointment_id,
            practitioner_id,
            at(14, 0),
            30,
            "scheduled",
        )]))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = BookingService::new(&config);

    let request = RescheduleAppointmentRequest {
        start_time: at(14, 0),
        duration_minutes: None,
    };

    let appointment = service
        .reschedule_appointment(appointment_id, request, AUTH_TOKEN)
        .await
        .expect("reschedule should succeed");

    assert_eq!(appointment.start_time, at(14, 0));
    assert_eq!(appointment.duration_minutes, 30);
}

#[tokio::test]
async fn cancelled_appointment_cannot_be_rescheduled() {
    let mock_server = MockServer::start().await;
    let practitioner_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![stored_row(
            appointment_id,
            practitioner_id,
            at(10, 0),
            30,
            "cancelled",
        )]))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = BookingService::new(&config);

    let request = RescheduleAppointmentRequest {
        start_time: at(14, 0),
        duration_minutes: None,
    };

    let result = service
        .reschedule_appointment(appointment_id, request, AUTH_TOKEN)
        .await;

    assert_matches!(result.unwrap_err(), AppointmentError::ValidationError(_));
}

#[tokio::test]
async fn cancelling_a_missing_appointment_is_not_found() {
    let mock_server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = BookingService::new(&config);

    let result = service.cancel_appointment(appointment_id, AUTH_TOKEN).await;
    assert_matches!(result.unwrap_err(), AppointmentError::NotFound);
}
