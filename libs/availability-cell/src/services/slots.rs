use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use futures::future::join_all;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{
    AvailabilityError, BookedInterval, BookedRow, DayAvailability, PatternWindow,
    DEFAULT_GRID_MINUTES,
};
use crate::services::exceptions::ExceptionService;
use crate::services::patterns::PatternService;

/// Converts expanded patterns, resolved exceptions and existing bookings into
/// the bookable start times for a requested duration.
pub struct SlotService {
    supabase: Arc<SupabaseClient>,
    patterns: PatternService,
    exceptions: ExceptionService,
    grid_minutes: i64,
}

impl SlotService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_grid_minutes(config, DEFAULT_GRID_MINUTES)
    }

    pub fn with_grid_minutes(config: &AppConfig, grid_minutes: i64) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            patterns: PatternService::with_client(Arc::clone(&supabase)),
            exceptions: ExceptionService::with_client(Arc::clone(&supabase)),
            supabase,
            grid_minutes,
        }
    }

    /// Compute the bookable slot starts for one practitioner and date.
    ///
    /// Booked intervals are returned even when the day is fully blocked so
    /// the calendar can still render existing appointments.
    pub async fn compute_slots(
        &self,
        practitioner_id: Uuid,
        date: NaiveDate,
        duration_minutes: i64,
        auth_token: &str,
    ) -> Result<DayAvailability, AvailabilityError> {
        if duration_minutes <= 0 {
            return Err(AvailabilityError::ValidationError(
                "Duration must be a positive number of minutes".to_string(),
            ));
        }

        // An unknown practitioner is a caller error, not an empty day.
        self.ensure_practitioner_exists(practitioner_id, auth_token)
            .await?;

        debug!(
            "Computing slots for practitioner {} on {} (duration {} min)",
            practitioner_id, date, duration_minutes
        );

        let booked = self
            .booked_rows_for_date(practitioner_id, date, auth_token)
            .await?;
        let booked_slots: Vec<BookedInterval> = booked
            .iter()
            .map(|row| BookedInterval {
                start_time: row.start_time.naive_utc().time(),
                end_time: row.end_time.naive_utc().time(),
                title: row.title.clone().unwrap_or_else(|| "Appointment".to_string()),
            })
            .collect();

        let resolved = self
            .exceptions
            .resolve_exceptions(practitioner_id, date, auth_token)
            .await?;

        let expanded = self
            .patterns
            .applicable_patterns(practitioner_id, date, auth_token)
            .await?;

        if resolved.full_day_blocked {
            return Ok(DayAvailability {
                practitioner_id,
                date,
                duration_minutes,
                available_slots: Vec::new(),
                booked_slots,
                full_day_blocked: true,
                has_patterns: expanded.pattern_count > 0,
            });
        }

        let raw_points = raw_open_grid_points(
            &expanded.windows,
            &resolved.partial_blocks,
            date,
            self.grid_minutes,
        );

        let booked_spans: Vec<(NaiveDateTime, NaiveDateTime)> = booked
            .iter()
            .map(|row| (row.start_time.naive_utc(), row.end_time.naive_utc()))
            .collect();

        let available_slots = filter_continuous(
            date,
            &raw_points,
            &booked_spans,
            duration_minutes,
            self.grid_minutes,
        );

        debug!(
            "Practitioner {} on {}: {} raw grid points, {} bookable slots",
            practitioner_id,
            date,
            raw_points.len(),
            available_slots.len()
        );

        Ok(DayAvailability {
            practitioner_id,
            date,
            duration_minutes,
            available_slots,
            booked_slots,
            full_day_blocked: false,
            has_patterns: expanded.pattern_count > 0,
        })
    }

    /// Availability for every (practitioner, date) combination. Each
    /// computation is independent and side-effect-free, so they run
    /// concurrently.
    pub async fn batch_availability(
        &self,
        practitioner_ids: &[Uuid],
        dates: &[NaiveDate],
        duration_minutes: i64,
        auth_token: &str,
    ) -> Result<Vec<DayAvailability>, AvailabilityError> {
        let futures = practitioner_ids.iter().flat_map(|&practitioner_id| {
            dates.iter().map(move |&date| {
                self.compute_slots(practitioner_id, date, duration_minutes, auth_token)
            })
        });

        join_all(futures).await.into_iter().collect()
    }

    async fn ensure_practitioner_exists(
        &self,
        practitioner_id: Uuid,
        auth_token: &str,
    ) -> Result<(), AvailabilityError> {
        let path = format!(
            "/rest/v1/practitioners?id=eq.{}&select=id",
            practitioner_id
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        if rows.is_empty() {
            return Err(AvailabilityError::NotFound(format!(
                "Practitioner {} not found",
                practitioner_id
            )));
        }
        Ok(())
    }

    async fn booked_rows_for_date(
        &self,
        practitioner_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<BookedRow>, AvailabilityError> {
        let start_of_day = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AvailabilityError::ValidationError("Invalid date".to_string()))?
            .and_utc();
        let end_of_day = date
            .and_hms_opt(23, 59, 59)
            .ok_or_else(|| AvailabilityError::ValidationError("Invalid date".to_string()))?
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
                Ok(booked) => Some(booked),
                Err(e) => {
                    warn!("Skipping malformed appointment row: {}", e);
                    None
                }
            })
            .collect())
    }
}

/// Walk each pattern window on the slot grid and keep the points not carved
/// out by a partial exception (`block_start <= point < block_end`). Points
/// from overlapping windows collapse into the set.
pub fn raw_open_grid_points(
    windows: &[PatternWindow],
    partial_blocks: &[(NaiveTime, NaiveTime)],
    date: NaiveDate,
    grid_minutes: i64,
) -> BTreeSet<NaiveTime> {
    let mut points = BTreeSet::new();
    let step = Duration::minutes(grid_minutes);

    for window in windows {
        // Datetime arithmetic so a window ending at midnight cannot wrap.
        let mut current = date.and_time(window.start_time);
        let end = date.and_time(window.end_time);

        while current < end {
            let time = current.time();
            let blocked = partial_blocks
                .iter()
                .any(|&(block_start, block_end)| block_start <= time && time < block_end);
            if !blocked {
                points.insert(time);
            }
            current += step;
        }
    }

    points
}

/// Keep only the grid points with `duration_minutes` of contiguous room:
/// every grid sub-step must itself be raw-open and outside every booked
/// `[start, end)` span. A slot that runs past the open window or into a
/// booking anywhere in its span is rejected outright.
pub fn filter_continuous(
    date: NaiveDate,
    raw_points: &BTreeSet<NaiveTime>,
    booked_spans: &[(NaiveDateTime, NaiveDateTime)],
    duration_minutes: i64,
    grid_minutes: i64,
) -> Vec<NaiveTime> {
    let step = Duration::minutes(grid_minutes);
    let duration = Duration::minutes(duration_minutes);

    raw_points
        .iter()
        .copied()
        .filter(|&slot| {
            let slot_start = date.and_time(slot);
            let slot_end = slot_start + duration;

            let mut check = slot_start;
            while check < slot_end {
                // Crossing midnight means the slot ran off the day's grid.
                if check.date() != date || !raw_points.contains(&check.time()) {
                    return false;
                }
                let booked = booked_spans
                    .iter()
                    .any(|&(start, end)| start <= check && check < end);
                if booked {
                    return false;
                }
                check += step;
            }
            true
        })
        .collect()
}
