use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{Appointment, AppointmentError, ConflictCheckResponse};

/// Pure appointment-to-appointment overlap detection.
///
/// Deliberately independent of availability patterns and exceptions:
/// conflict-free does NOT imply the time is inside the practitioner's
/// declared availability. Callers wanting that guarantee must also consult
/// the slot computation.
pub struct ConflictDetectionService {
    supabase: Arc<SupabaseClient>,
}

impl ConflictDetectionService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_client(Arc::new(SupabaseClient::new(config)))
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Check a proposed `[start, end)` against the practitioner's other
    /// non-cancelled appointments, optionally excluding the appointment
    /// being moved or edited.
    pub async fn check_conflicts(
        &self,
        practitioner_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<ConflictCheckResponse, AppointmentError> {
        if start_time >= end_time {
            return Err(AppointmentError::InvalidTime(
                "Start time must be before end time".to_string(),
            ));
        }

        // An unknown practitioner is a caller error, not a conflict-free
        // result.
        self.ensure_practitioner_exists(practitioner_id, auth_token)
            .await?;

        debug!(
            "Checking conflicts for practitioner {} from {} to {}",
            practitioner_id, start_time, end_time
        );

        let existing = self
            .practitioner_appointments_in_range(
                practitioner_id,
                start_time,
                end_time,
                exclude_appointment_id,
                auth_token,
            )
            .await?;

        let colliding_appointments: Vec<Appointment> = existing
            .into_iter()
            .filter(|apt| {
                apt.status.occupies_time()
                    && appointments_overlap(start_time, end_time, apt.start_time, apt.end_time)
            })
            .collect();

        let conflict = !colliding_appointments.is_empty();
        if conflict {
            warn!(
                "Conflict detected for practitioner {}: {} colliding appointment(s)",
                practitioner_id,
                colliding_appointments.len()
            );
        }

        Ok(ConflictCheckResponse {
            conflict,
            colliding_appointments,
        })
    }

    async fn ensure_practitioner_exists(
        &self,
        practitioner_id: Uuid,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        let path = format!(
            "/rest/v1/practitioners?id=eq.{}&select=id",
            practitioner_id
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        if rows.is_empty() {
            return Err(AppointmentError::PractitionerNotFound);
        }
        Ok(())
    }

    async fn practitioner_appointments_in_range(
        &self,
        practitioner_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut query_parts = vec![
            format!("practitioner_id=eq.{}", practitioner_id),
            "status=neq.cancelled".to_string(),
            format!("start_time=lt.{}", end_time.to_rfc3339()),
            format!("end_time=gt.{}", start_time.to_rfc3339()),
        ];

        if let Some(exclude_id) = exclude_appointment_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!(
            "/rest/v1/appointments?{}&order=start_time.asc",
            query_parts.join("&")
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

/// Two half-open intervals `[s1, e1)` and `[s2, e2)` collide iff each starts
/// before the other ends. Symmetric by construction, and equivalent to the
/// three-case breakdown (starts inside / ends inside / fully contains).
pub fn appointments_overlap(
    start1: DateTime<Utc>,
    end1: DateTime<Utc>,
    start2: DateTime<Utc>,
    end2: DateTime<Utc>,
) -> bool {
    start1 < end2 && start2 < end1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        chrono::NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn start_inside_existing_collides() {
        // Proposed 10:15-10:45 against existing 10:00-10:30.
        assert!(appointments_overlap(at(10, 15), at(10, 45), at(10, 0), at(10, 30)));
    }

    #[test]
    fn end_inside_existing_collides() {
        assert!(appointments_overlap(at(9, 45), at(10, 15), at(10, 0), at(10, 30)));
    }

    #[test]
    fn containment_collides_both_ways() {
        assert!(appointments_overlap(at(9, 0), at(11, 0), at(10, 0), at(10, 30)));
        assert!(appointments_overlap(at(10, 0), at(10, 30), at(9, 0), at(11, 0)));
    }

    #[test]
    fn collision_is_symmetric() {
        let cases = [
            ((at(10, 15), at(10, 45)), (at(10, 0), at(10, 30))),
            ((at(9, 0), at(17, 0)), (at(12, 0), at(12, 30))),
            ((at(9, 0), at(10, 0)), (at(10, 0), at(11, 0))),
            ((at(8, 0), at(8, 30)), (at(9, 0), at(9, 30))),
        ];

        for ((s1, e1), (s2, e2)) in cases {
            assert_eq!(
                appointments_overlap(s1, e1, s2, e2),
                appointments_overlap(s2, e2, s1, e1),
            );
        }
    }

    #[test]
    fn back_to_back_does_not_collide() {
        // Half-open intervals: 09:00-10:00 then 10:00-11:00 is fine.
        assert!(!appointments_overlap(at(9, 0), at(10, 0), at(10, 0), at(11, 0)));
        assert!(!appointments_overlap(at(10, 0), at(11, 0), at(9, 0), at(10, 0)));
    }
}
