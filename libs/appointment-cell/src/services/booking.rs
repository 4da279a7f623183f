use chrono::{Duration, NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, BookAppointmentRequest,
    RescheduleAppointmentRequest,
};
use crate::services::conflict::ConflictDetectionService;

/// Appointment lifecycle: create, reschedule, cancel, day views.
///
/// The in-process conflict check is a fast pre-flight so the UI can prompt
/// for another time. The authoritative guard against two concurrent bookings
/// is the storage-level exclusion constraint (see db/schema.sql); a violated
/// constraint surfaces as HTTP 409 and is mapped to `ConflictDetected`.
pub struct BookingService {
    supabase: Arc<SupabaseClient>,
    conflict_service: ConflictDetectionService,
}

impl BookingService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            conflict_service: ConflictDetectionService::with_client(Arc::clone(&supabase)),
            supabase,
        }
    }

    pub fn conflict_service(&self) -> &ConflictDetectionService {
        &self.conflict_service
    }

    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        if request.duration_minutes <= 0 {
            return Err(AppointmentError::ValidationError(
                "Duration must be a positive number of minutes".to_string(),
            ));
        }

        // end_time is always derived so duration_minutes and the wall-clock
        // span cannot drift apart.
        let start_time = request.start_time;
        let end_time = start_time + Duration::minutes(request.duration_minutes);

        info!(
            "Booking appointment for patient {} at {}",
            request.patient_id, start_time
        );

        if let Some(practitioner_id) = request.practitioner_id {
            let check = self
                .conflict_service
                .check_conflicts(practitioner_id, start_time, end_time, None, auth_token)
                .await?;
            if check.conflict {
                return Err(AppointmentError::ConflictDetected);
            }
        }

        let appointment_data = json!({
            "patient_id": request.patient_id,
            "practitioner_id": request.practitioner_id,
            "title": request.title,
            "start_time": start_time.to_rfc3339(),
            "end_time": end_time.to_rfc3339(),
            "duration_minutes": request.duration_minutes,
            "status": AppointmentStatus::Scheduled,
            "appointment_type": request.appointment_type,
            "notes": request.notes,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let result: Vec<Value> = self
            .supabase
            .insert_returning("/rest/v1/appointments", Some(auth_token), appointment_data)
            .await?;

        let row = result.into_iter().next().ok_or_else(|| {
            AppointmentError::DatabaseError("Failed to create appointment".to_string())
        })?;

        let appointment: Appointment = serde_json::from_value(row).map_err(|e| {
            AppointmentError::DatabaseError(format!("Failed to parse appointment: {}", e))
        })?;

        debug!("Appointment created with ID: {}", appointment.id);
        Ok(appointment)
    }

    /// Move an appointment to a new start, keeping its duration unless a new
    /// one is supplied. Conflict check excludes the appointment itself.
    pub async fn reschedule_appointment(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let existing = self.get_appointment(appointment_id, auth_token).await?;

        if existing.status == AppointmentStatus::Cancelled {
            return Err(AppointmentError::ValidationError(
                "Cancelled appointments cannot be rescheduled".to_string(),
            ));
        }

        let duration = request.duration_minutes.unwrap_or(existing.duration_minutes);
        if duration <= 0 {
            return Err(AppointmentError::ValidationError(
                "Duration must be a positive number of minutes".to_string(),
            ));
        }

        let new_start = request.start_time;
        let new_end = new_start + Duration::minutes(duration);

        if let Some(practitioner_id) = existing.practitioner_id {
            let check = self
                .conflict_service
                .check_conflicts(
                    practitioner_id,
                    new_start,
                    new_end,
                    Some(appointment_id),
                    auth_token,
                )
                .await?;
            if check.conflict {
                return Err(AppointmentError::ConflictDetected);
            }
        }

        let update_data = json!({
            "start_time": new_start.to_rfc3339(),
            "end_time": new_end.to_rfc3339(),
            "duration_minutes": duration,
            "updated_at": Utc::now().to_rfc3339()
        });

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .update_returning(&path, Some(auth_token), update_data)
            .await?;

        let row = result
            .into_iter()
            .next()
            .ok_or(AppointmentError::NotFound)?;

        serde_json::from_value(row).map_err(|e| {
            AppointmentError::DatabaseError(format!("Failed to parse appointment: {}", e))
        })
    }

    /// Cancel is a status transition, not a delete; the row stops occupying
    /// practitioner time but stays for history.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        info!("Cancelling appointment {}", appointment_id);

        let update_data = json!({
            "status": AppointmentStatus::Cancelled,
            "updated_at": Utc::now().to_rfc3339()
        });

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .update_returning(&path, Some(auth_token), update_data)
            .await?;

        if result.is_empty() {
            return Err(AppointmentError::NotFound);
        }

        Ok(())
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        let row = result
            .into_iter()
            .next()
            .ok_or(AppointmentError::NotFound)?;

        serde_json::from_value(row).map_err(|e| {
            AppointmentError::DatabaseError(format!("Failed to parse appointment: {}", e))
        })
    }

    /// A practitioner's non-cancelled appointments on one date, ascending.
    pub async fn appointments_for_date(
        &self,
        practitioner_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let start_of_day = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppointmentError::ValidationError("Invalid date".to_string()))?
            .and_utc();
        let end_of_day = date
            .and_hms_opt(23, 59, 59)
            .ok_or_else(|| AppointmentError::ValidationError("Invalid date".to_string()))?
            .and_utc();

        let path = format!(
            "/rest/v1/appointments?practitioner_id=eq.{}&status=neq.cancelled&start_time=gte.{}&start_time=lte.{}&order=start_time.asc",
            practitioner_id,
            start_of_day.to_rfc3339(),
            end_of_day.to_rfc3339()
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value(row) {
                Ok(apt) => Some(apt),
                Err(e) => {
                    warn!("Skipping malformed appointment row: {}", e);
                    None
                }
            })
            .collect())
    }
}
