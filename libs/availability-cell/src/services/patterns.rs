use chrono::{NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{
    AvailabilityError, AvailabilityPattern, CreatePatternRequest, ExpandedPatterns, Frequency,
    PatternWindow, UpdatePatternRequest, WeekdaySet,
};

/// Recurring availability pattern management and expansion.
pub struct PatternService {
    supabase: Arc<SupabaseClient>,
}

impl PatternService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Create a recurring pattern for a practitioner. Weekdays are normalized
    /// to a canonical comma-separated form at write time.
    pub async fn create_pattern(
        &self,
        practitioner_id: Uuid,
        request: CreatePatternRequest,
        auth_token: &str,
    ) -> Result<AvailabilityPattern, AvailabilityError> {
        debug!("Creating availability pattern for practitioner {}", practitioner_id);

        if request.start_time >= request.end_time {
            return Err(AvailabilityError::ValidationError(
                "Start time must be before end time".to_string(),
            ));
        }
        if let (Some(from), Some(until)) = (request.valid_from, request.valid_until) {
            if from > until {
                return Err(AvailabilityError::ValidationError(
                    "valid_from must not be after valid_until".to_string(),
                ));
            }
        }

        let weekdays = normalize_weekdays(request.frequency, request.weekdays.as_ref())?;

        let pattern_data = json!({
            "practitioner_id": practitioner_id,
            "is_company_wide": false,
            "title": request.title,
            "frequency": request.frequency,
            "weekdays": weekdays,
            "start_time": request.start_time.format("%H:%M:%S").to_string(),
            "end_time": request.end_time.format("%H:%M:%S").to_string(),
            "valid_from": request.valid_from,
            "valid_until": request.valid_until,
            "is_active": request.is_active.unwrap_or(true),
            "color": request.color,
            "notes": request.notes,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let result: Vec<Value> = self
            .supabase
            .insert_returning("/rest/v1/availability_patterns", Some(auth_token), pattern_data)
            .await?;

        let row = result.into_iter().next().ok_or_else(|| {
            AvailabilityError::DatabaseError("Failed to create availability pattern".to_string())
        })?;

        serde_json::from_value(row)
            .map_err(|e| AvailabilityError::DatabaseError(format!("Failed to parse pattern: {}", e)))
    }

    /// Partial update. Time ordering is re-validated against the stored row.
    pub async fn update_pattern(
        &self,
        pattern_id: Uuid,
        request: UpdatePatternRequest,
        auth_token: &str,
    ) -> Result<AvailabilityPattern, AvailabilityError> {
        debug!("Updating availability pattern {}", pattern_id);

        let existing = self.get_pattern_by_id(pattern_id, auth_token).await?;

        let start_time = request.start_time.unwrap_or(existing.start_time);
        let end_time = request.end_time.unwrap_or(existing.end_time);
        if start_time >= end_time {
            return Err(AvailabilityError::ValidationError(
                "Start time must be before end time".to_string(),
            ));
        }

        let frequency = request.frequency.unwrap_or(existing.frequency);

        let mut update_data = serde_json::Map::new();
        if let Some(title) = request.title {
            update_data.insert("title".to_string(), json!(title));
        }
        if request.frequency.is_some() {
            update_data.insert("frequency".to_string(), json!(frequency));
        }
        if let Some(ref weekdays_input) = request.weekdays {
            let weekdays = normalize_weekdays(frequency, Some(weekdays_input))?;
            update_data.insert("weekdays".to_string(), json!(weekdays));
        } else if matches!(frequency, Frequency::Weekly | Frequency::Custom)
            && existing.weekday_set().is_empty()
        {
            // Switching to a weekday-driven frequency with no stored weekdays
            // would persist a pattern that never applies.
            return Err(AvailabilityError::ValidationError(
                "Weekly and custom patterns require at least one weekday".to_string(),
            ));
        }
        if let Some(start) = request.start_time {
            update_data.insert(
                "start_time".to_string(),
                json!(start.format("%H:%M:%S").to_string()),
            );
        }
        if let Some(end) = request.end_time {
            update_data.insert(
                "end_time".to_string(),
                json!(end.format("%H:%M:%S").to_string()),
            );
        }
        if let Some(from) = request.valid_from {
            update_data.insert("valid_from".to_string(), json!(from));
        }
        if let Some(until) = request.valid_until {
            update_data.insert("valid_until".to_string(), json!(until));
        }
        if let Some(active) = request.is_active {
            update_data.insert("is_active".to_string(), json!(active));
        }
        if let Some(color) = request.color {
            update_data.insert("color".to_string(), json!(color));
        }
        if let Some(notes) = request.notes {
            update_data.insert("notes".to_string(), json!(notes));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/availability_patterns?id=eq.{}", pattern_id);
        let result: Vec<Value> = self
            .supabase
            .update_returning(&path, Some(auth_token), Value::Object(update_data))
            .await?;

        let row = result.into_iter().next().ok_or_else(|| {
            AvailabilityError::NotFound("Availability pattern not found".to_string())
        })?;

        serde_json::from_value(row)
            .map_err(|e| AvailabilityError::DatabaseError(format!("Failed to parse pattern: {}", e)))
    }

    /// A practitioner's own patterns plus the active company-wide ones.
    pub async fn list_patterns(
        &self,
        practitioner_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<AvailabilityPattern>, AvailabilityError> {
        let own_path = format!(
            "/rest/v1/availability_patterns?practitioner_id=eq.{}&is_company_wide=eq.false&order=start_time.asc",
            practitioner_id
        );
        let company_path =
            "/rest/v1/availability_patterns?is_company_wide=eq.true&is_active=eq.true";

        let own: Vec<Value> = self
            .supabase
            .request(Method::GET, &own_path, Some(auth_token), None)
            .await?;
        let company: Vec<Value> = self
            .supabase
            .request(Method::GET, company_path, Some(auth_token), None)
            .await?;

        let mut patterns = parse_pattern_rows(own);
        for mut pattern in parse_pattern_rows(company) {
            pattern.title = format!("{} (Office Hours)", pattern.title);
            patterns.push(pattern);
        }

        Ok(patterns)
    }

    /// Hard delete; no history is retained.
    pub async fn delete_pattern(
        &self,
        pattern_id: Uuid,
        auth_token: &str,
    ) -> Result<(), AvailabilityError> {
        debug!("Deleting availability pattern {}", pattern_id);

        let path = format!("/rest/v1/availability_patterns?id=eq.{}", pattern_id);
        self.supabase.delete(&path, Some(auth_token)).await?;

        Ok(())
    }

    /// Expand the practitioner's active patterns into the open windows that
    /// apply on `date`. Overlapping windows are legal and simply widen
    /// availability; no ordering is guaranteed.
    pub async fn applicable_patterns(
        &self,
        practitioner_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<ExpandedPatterns, AvailabilityError> {
        let path = format!(
            "/rest/v1/availability_patterns?practitioner_id=eq.{}&is_active=eq.true",
            practitioner_id
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        let patterns = parse_pattern_rows(rows);
        let pattern_count = patterns.len();

        if pattern_count == 0 {
            warn!("No availability patterns found for practitioner {}", practitioner_id);
        }

        let windows = patterns
            .iter()
            .filter(|p| p.applies_on(date))
            .map(|p| PatternWindow {
                start_time: p.start_time,
                end_time: p.end_time,
                color: p.color.clone(),
            })
            .collect();

        Ok(ExpandedPatterns {
            windows,
            pattern_count,
        })
    }

    async fn get_pattern_by_id(
        &self,
        pattern_id: Uuid,
        auth_token: &str,
    ) -> Result<AvailabilityPattern, AvailabilityError> {
        let path = format!("/rest/v1/availability_patterns?id=eq.{}", pattern_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        let row = result.into_iter().next().ok_or_else(|| {
            AvailabilityError::NotFound("Availability pattern not found".to_string())
        })?;

        serde_json::from_value(row)
            .map_err(|e| AvailabilityError::DatabaseError(format!("Failed to parse pattern: {}", e)))
    }
}

/// Validate and canonicalize the weekday field for a given frequency.
/// Weekly/custom patterns require a non-empty set; daily/weekdays ignore it.
fn normalize_weekdays(
    frequency: Frequency,
    input: Option<&crate::models::WeekdaysInput>,
) -> Result<Option<String>, AvailabilityError> {
    let set = match input {
        Some(input) => input.normalize().map_err(AvailabilityError::ValidationError)?,
        None => WeekdaySet::default(),
    };

    match frequency {
        Frequency::Weekly | Frequency::Custom => {
            if set.is_empty() {
                return Err(AvailabilityError::ValidationError(
                    "Weekly and custom patterns require at least one weekday".to_string(),
                ));
            }
            Ok(Some(set.to_csv()))
        }
        Frequency::Daily | Frequency::Weekdays => {
            Ok(if set.is_empty() { None } else { Some(set.to_csv()) })
        }
    }
}

/// One malformed stored row must not take down the whole read; skip it.
fn parse_pattern_rows(rows: Vec<Value>) -> Vec<AvailabilityPattern> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!("Skipping malformed availability pattern row: {}", e);
                None
            }
        })
        .collect()
}
