use chrono::{Days, NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{
    AvailabilityError, AvailabilityException, CreateExceptionRequest, CreatedExceptions,
    ExceptionType, FullDayBlockPolicy, ResolvedExceptions,
};

/// One-off date overrides: full-day closures and partial-time carve-outs,
/// per practitioner or company-wide.
pub struct ExceptionService {
    supabase: Arc<SupabaseClient>,
    block_policy: FullDayBlockPolicy,
}

impl ExceptionService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_client(Arc::new(SupabaseClient::new(config)))
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self {
            supabase,
            block_policy: FullDayBlockPolicy::default(),
        }
    }

    pub fn with_block_policy(mut self, policy: FullDayBlockPolicy) -> Self {
        self.block_policy = policy;
        self
    }

    /// Collect the exceptions affecting `date` from both scopes and reduce
    /// them to a verdict: is the whole day closed, and which sub-intervals
    /// are carved out otherwise.
    ///
    /// A company-wide full-day closure overrides practitioner patterns
    /// unconditionally; callers must short-circuit on `full_day_blocked`.
    pub async fn resolve_exceptions(
        &self,
        practitioner_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<ResolvedExceptions, AvailabilityError> {
        let company = self.company_wide_for_date(date, auth_token).await?;
        let individual = self
            .individual_for_date(practitioner_id, date, auth_token)
            .await?;

        let full_day_blocked = company
            .iter()
            .chain(individual.iter())
            .any(|ex| self.block_policy.blocks_entire_day(ex));

        if full_day_blocked {
            debug!(
                "Practitioner {} fully blocked on {} by exception",
                practitioner_id, date
            );
            return Ok(ResolvedExceptions {
                full_day_blocked: true,
                partial_blocks: Vec::new(),
            });
        }

        let partial_blocks = company
            .iter()
            .chain(individual.iter())
            .filter_map(AvailabilityException::partial_window)
            .collect();

        Ok(ResolvedExceptions {
            full_day_blocked: false,
            partial_blocks,
        })
    }

    /// Create one exception, or expand an inclusive date range into one row
    /// per date. Dates that already carry an exception for this practitioner
    /// are skipped, so re-submitting a range is harmless.
    pub async fn create_exceptions(
        &self,
        practitioner_id: Uuid,
        request: CreateExceptionRequest,
        auth_token: &str,
    ) -> Result<CreatedExceptions, AvailabilityError> {
        let dates = expand_request_dates(&request)?;
        let exception_type = request.exception_type.unwrap_or(ExceptionType::Blocked);
        let is_all_day = request.is_all_day.unwrap_or(true);

        if !is_all_day {
            match (request.start_time, request.end_time) {
                (Some(start), Some(end)) if start < end => {}
                _ => {
                    return Err(AvailabilityError::ValidationError(
                        "Partial-day exceptions require start_time before end_time".to_string(),
                    ));
                }
            }
        }

        let mut ids = Vec::new();
        for date in dates {
            if self
                .exception_exists(practitioner_id, date, auth_token)
                .await?
            {
                debug!(
                    "Exception already exists for practitioner {} on {}, skipping",
                    practitioner_id, date
                );
                continue;
            }

            let exception_data = json!({
                "practitioner_id": practitioner_id,
                "is_company_wide": false,
                "exception_date": date,
                "exception_type": exception_type,
                "is_all_day": is_all_day,
                "start_time": request.start_time.map(|t| t.format("%H:%M:%S").to_string()),
                "end_time": request.end_time.map(|t| t.format("%H:%M:%S").to_string()),
                "reason": request.reason,
                "created_at": Utc::now().to_rfc3339()
            });

            let result: Vec<Value> = self
                .supabase
                .insert_returning(
                    "/rest/v1/availability_exceptions",
                    Some(auth_token),
                    exception_data,
                )
                .await?;

            let created: AvailabilityException = result
                .into_iter()
                .next()
                .ok_or_else(|| {
                    AvailabilityError::DatabaseError("Failed to create exception".to_string())
                })
                .and_then(|row| {
                    serde_json::from_value(row).map_err(|e| {
                        AvailabilityError::DatabaseError(format!(
                            "Failed to parse exception: {}",
                            e
                        ))
                    })
                })?;

            ids.push(created.id);
        }

        Ok(CreatedExceptions {
            count: ids.len(),
            ids,
        })
    }

    /// A practitioner's own exceptions plus all company-wide closures.
    pub async fn list_exceptions(
        &self,
        practitioner_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<AvailabilityException>, AvailabilityError> {
        let own_path = format!(
            "/rest/v1/availability_exceptions?practitioner_id=eq.{}&is_company_wide=eq.false&order=exception_date.asc",
            practitioner_id
        );
        let company_path = "/rest/v1/availability_exceptions?is_company_wide=eq.true";

        let own: Vec<Value> = self
            .supabase
            .request(Method::GET, &own_path, Some(auth_token), None)
            .await?;
        let company: Vec<Value> = self
            .supabase
            .request(Method::GET, company_path, Some(auth_token), None)
            .await?;

        let mut exceptions = parse_exception_rows(own);
        exceptions.extend(parse_exception_rows(company));
        Ok(exceptions)
    }

    pub async fn delete_exception(
        &self,
        exception_id: Uuid,
        auth_token: &str,
    ) -> Result<(), AvailabilityError> {
        debug!("Deleting availability exception {}", exception_id);

        let path = format!("/rest/v1/availability_exceptions?id=eq.{}", exception_id);
        self.supabase.delete(&path, Some(auth_token)).await?;

        Ok(())
    }

    async fn company_wide_for_date(
        &self,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<AvailabilityException>, AvailabilityError> {
        let path = format!(
            "/rest/v1/availability_exceptions?is_company_wide=eq.true&exception_date=eq.{}",
            date
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;
        Ok(parse_exception_rows(rows))
    }

    async fn individual_for_date(
        &self,
        practitioner_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<AvailabilityException>, AvailabilityError> {
        let path = format!(
            "/rest/v1/availability_exceptions?practitioner_id=eq.{}&is_company_wide=eq.false&exception_date=eq.{}",
            practitioner_id, date
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;
        Ok(parse_exception_rows(rows))
    }

    async fn exception_exists(
        &self,
        practitioner_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<bool, AvailabilityError> {
        let path = format!(
            "/rest/v1/availability_exceptions?practitioner_id=eq.{}&exception_date=eq.{}&select=id",
            practitioner_id, date
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;
        Ok(!rows.is_empty())
    }
}

/// Either a single `exception_date` or an inclusive `[from_date, to_date]`
/// range expanded to each date it covers.
fn expand_request_dates(
    request: &CreateExceptionRequest,
) -> Result<Vec<NaiveDate>, AvailabilityError> {
    if let (Some(from), Some(to)) = (request.from_date, request.to_date) {
        if from > to {
            return Err(AvailabilityError::ValidationError(
                "from_date must not be after to_date".to_string(),
            ));
        }
        let mut dates = Vec::new();
        let mut current = from;
        while current <= to {
            dates.push(current);
            current = current
                .checked_add_days(Days::new(1))
                .ok_or_else(|| AvailabilityError::ValidationError("Date out of range".to_string()))?;
        }
        return Ok(dates);
    }

    request
        .exception_date
        .map(|d| vec![d])
        .ok_or_else(|| {
            AvailabilityError::ValidationError(
                "Either exception_date or from_date/to_date is required".to_string(),
            )
        })
}

fn parse_exception_rows(rows: Vec<Value>) -> Vec<AvailabilityException> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(exception) => Some(exception),
            Err(e) => {
                warn!("Skipping malformed availability exception row: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dates: (Option<&str>, Option<&str>, Option<&str>)) -> CreateExceptionRequest {
        let parse = |s: Option<&str>| s.map(|s| s.parse::<NaiveDate>().unwrap());
        CreateExceptionRequest {
            exception_date: parse(dates.0),
            from_date: parse(dates.1),
            to_date: parse(dates.2),
            exception_type: None,
            is_all_day: None,
            start_time: None,
            end_time: None,
            reason: None,
        }
    }

    #[test]
    fn range_expands_to_one_date_per_day() {
        let dates =
            expand_request_dates(&request((None, Some("2025-06-01"), Some("2025-06-03")))).unwrap();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
                NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(),
            ]
        );
    }

    #[test]
    fn single_date_expands_to_itself() {
        let dates = expand_request_dates(&request((Some("2025-06-02"), None, None))).unwrap();
        assert_eq!(dates, vec![NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()]);
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(
            expand_request_dates(&request((None, Some("2025-06-03"), Some("2025-06-01")))).is_err()
        );
    }

    #[test]
    fn missing_dates_are_rejected() {
        assert!(expand_request_dates(&request((None, None, None))).is_err());
    }
}
