use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::SupabaseError;
use shared_models::error::AppError;

/// The atomic unit of the whole slot grid. Every generated slot start and
/// every continuous-availability sub-step is aligned to this many minutes.
pub const DEFAULT_GRID_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekdays,
    Weekly,
    Custom,
}

/// Set of weekdays a pattern applies to, Monday = 0 through Sunday = 6.
///
/// Stored in the database as a comma-separated string ("0,2,4"). Parsing is
/// lenient: junk tokens and out-of-range indices are dropped, so a pattern
/// with an unparseable weekday field ends up with an empty set and simply
/// never applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub fn from_days(days: &[u8]) -> Result<Self, String> {
        let mut set = WeekdaySet::default();
        for &day in days {
            if day > 6 {
                return Err(format!("Weekday index {} out of range (0=Mon..6=Sun)", day));
            }
            set.0 |= 1 << day;
        }
        Ok(set)
    }

    pub fn parse_lenient(csv: &str) -> Self {
        let mut set = WeekdaySet::default();
        for token in csv.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match token.parse::<u8>() {
                Ok(day) if day <= 6 => set.0 |= 1 << day,
                _ => {
                    tracing::warn!("Ignoring unparseable weekday token '{}'", token);
                }
            }
        }
        set
    }

    pub fn contains(&self, day_from_monday: u32) -> bool {
        day_from_monday <= 6 && self.0 & (1 << day_from_monday) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn to_csv(&self) -> String {
        (0u8..7)
            .filter(|d| self.0 & (1 << d) != 0)
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityPattern {
    pub id: Uuid,
    /// None for company-wide office-hours patterns.
    pub practitioner_id: Option<Uuid>,
    #[serde(default)]
    pub is_company_wide: bool,
    pub title: String,
    pub frequency: Frequency,
    /// Comma-separated weekday indices; meaningful for weekly/custom only.
    pub weekdays: Option<String>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub is_active: bool,
    pub color: Option<String>,
    pub notes: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AvailabilityPattern {
    pub fn weekday_set(&self) -> WeekdaySet {
        self.weekdays
            .as_deref()
            .map(WeekdaySet::parse_lenient)
            .unwrap_or_default()
    }

    /// Whether this pattern grants availability on the given date.
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        if !self.is_active {
            return false;
        }
        if let Some(from) = self.valid_from {
            if date < from {
                return false;
            }
        }
        if let Some(until) = self.valid_until {
            if date > until {
                return false;
            }
        }

        let day = date.weekday().num_days_from_monday();
        match self.frequency {
            Frequency::Daily => true,
            Frequency::Weekdays => day < 5,
            Frequency::Weekly | Frequency::Custom => self.weekday_set().contains(day),
        }
    }
}

/// One open interval contributed by an applicable pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternWindow {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub color: Option<String>,
}

/// Output of the pattern expansion step. `pattern_count` is the number of
/// active patterns configured (before date filtering), used to distinguish
/// "closed today" from "no availability configured at all".
#[derive(Debug, Clone, Default)]
pub struct ExpandedPatterns {
    pub windows: Vec<PatternWindow>,
    pub pattern_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionType {
    Blocked,
    Holiday,
    Vacation,
    CustomHours,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityException {
    pub id: Uuid,
    /// None for company-wide closures.
    pub practitioner_id: Option<Uuid>,
    #[serde(default)]
    pub is_company_wide: bool,
    pub exception_date: NaiveDate,
    pub exception_type: ExceptionType,
    pub is_all_day: bool,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl AvailabilityException {
    /// The sub-interval a partial exception carves out, if well-formed.
    pub fn partial_window(&self) -> Option<(NaiveTime, NaiveTime)> {
        if self.is_all_day {
            return None;
        }
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if start < end => Some((start, end)),
            _ => {
                tracing::warn!(
                    "Partial exception {} on {} has missing or inverted times, skipping",
                    self.id,
                    self.exception_date
                );
                None
            }
        }
    }
}

/// Which exception types close an entire day when flagged all-day.
///
/// The default set is {blocked, holiday, vacation}: an all-day `custom_hours`
/// exception does NOT block the day. That asymmetry mirrors long-standing
/// calendar behavior; making it a policy keeps it visible and overridable
/// instead of buried in a type-list comparison.
#[derive(Debug, Clone)]
pub struct FullDayBlockPolicy {
    pub blocking_types: Vec<ExceptionType>,
}

impl Default for FullDayBlockPolicy {
    fn default() -> Self {
        Self {
            blocking_types: vec![
                ExceptionType::Blocked,
                ExceptionType::Holiday,
                ExceptionType::Vacation,
            ],
        }
    }
}

impl FullDayBlockPolicy {
    pub fn blocks_entire_day(&self, exception: &AvailabilityException) -> bool {
        exception.is_all_day && self.blocking_types.contains(&exception.exception_type)
    }
}

/// Output of the exception resolution step. When `full_day_blocked` is true
/// callers must short-circuit to zero availability without consulting
/// patterns at all.
#[derive(Debug, Clone, Default)]
pub struct ResolvedExceptions {
    pub full_day_blocked: bool,
    pub partial_blocks: Vec<(NaiveTime, NaiveTime)>,
}

/// An existing booking shown alongside available slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookedInterval {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub title: String,
}

/// Resolved slot set for one (practitioner, date, duration) query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayAvailability {
    pub practitioner_id: Uuid,
    pub date: NaiveDate,
    pub duration_minutes: i64,
    /// Ascending grid-aligned start times with enough contiguous room.
    pub available_slots: Vec<NaiveTime>,
    pub booked_slots: Vec<BookedInterval>,
    /// Structurally closed (all-day exception), as opposed to open but full.
    #[serde(rename = "is_blocked")]
    pub full_day_blocked: bool,
    pub has_patterns: bool,
}

/// Appointment row as read by the slot computation. The appointment cell
/// owns the full model; this is the projection the calendar needs. The
/// query already excludes cancelled rows.
#[derive(Debug, Clone, Deserialize)]
pub struct BookedRow {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub title: Option<String>,
}

// ==============================================================================
// REQUEST / RESPONSE TYPES
// ==============================================================================

/// Weekdays arrive from the UI either as "0,1,2" or as [0, 1, 2].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeekdaysInput {
    Csv(String),
    List(Vec<u8>),
}

impl WeekdaysInput {
    pub fn normalize(&self) -> Result<WeekdaySet, String> {
        match self {
            WeekdaysInput::Csv(csv) => Ok(WeekdaySet::parse_lenient(csv)),
            WeekdaysInput::List(days) => WeekdaySet::from_days(days),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePatternRequest {
    pub title: String,
    pub frequency: Frequency,
    pub weekdays: Option<WeekdaysInput>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub is_active: Option<bool>,
    pub color: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePatternRequest {
    pub title: Option<String>,
    pub frequency: Option<Frequency>,
    pub weekdays: Option<WeekdaysInput>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub is_active: Option<bool>,
    pub color: Option<String>,
    pub notes: Option<String>,
}

/// Single-date or inclusive date-range exception. A range expands to one row
/// per date; dates that already carry an exception for the practitioner are
/// skipped rather than duplicated.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateExceptionRequest {
    pub exception_date: Option<NaiveDate>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub exception_type: Option<ExceptionType>,
    pub is_all_day: Option<bool>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedExceptions {
    pub count: usize,
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchAvailabilityRequest {
    pub practitioner_ids: Vec<Uuid>,
    pub dates: Vec<NaiveDate>,
    pub duration_minutes: Option<i64>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum AvailabilityError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<SupabaseError> for AvailabilityError {
    fn from(err: SupabaseError) -> Self {
        match err {
            SupabaseError::NotFound(msg) => AvailabilityError::NotFound(msg),
            SupabaseError::Conflict(msg) => AvailabilityError::Conflict(msg),
            other => AvailabilityError::DatabaseError(other.to_string()),
        }
    }
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::ValidationError(msg) => AppError::ValidationError(msg),
            AvailabilityError::NotFound(msg) => AppError::NotFound(msg),
            AvailabilityError::Conflict(msg) => AppError::Conflict(msg),
            AvailabilityError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(frequency: Frequency, weekdays: Option<&str>) -> AvailabilityPattern {
        AvailabilityPattern {
            id: Uuid::new_v4(),
            practitioner_id: Some(Uuid::new_v4()),
            is_company_wide: false,
            title: "Morning Shift".to_string(),
            frequency,
            weekdays: weekdays.map(str::to_string),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            valid_from: None,
            valid_until: None,
            is_active: true,
            color: None,
            notes: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn weekday_set_parses_csv() {
        let set = WeekdaySet::parse_lenient("0,2,4");
        assert!(set.contains(0));
        assert!(!set.contains(1));
        assert!(set.contains(2));
        assert!(set.contains(4));
        assert!(!set.contains(6));
        assert_eq!(set.to_csv(), "0,2,4");
    }

    #[test]
    fn weekday_set_drops_junk_tokens() {
        let set = WeekdaySet::parse_lenient("1, banana, 9, ,3");
        assert!(set.contains(1));
        assert!(set.contains(3));
        assert_eq!(set.to_csv(), "1,3");

        assert!(WeekdaySet::parse_lenient("not-a-list").is_empty());
        assert!(WeekdaySet::parse_lenient("").is_empty());
    }

    #[test]
    fn weekday_set_from_days_validates_range() {
        assert!(WeekdaySet::from_days(&[0, 6]).is_ok());
        assert!(WeekdaySet::from_days(&[7]).is_err());
    }

    #[test]
    fn weekly_pattern_matches_listed_days_only() {
        // Mon/Wed/Fri pattern against the first week of June 2025.
        let p = pattern(Frequency::Weekly, Some("0,2,4"));

        let monday = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2025, 6, 3).unwrap();
        let wednesday = NaiveDate::from_ymd_opt(2025, 6, 4).unwrap();
        let thursday = NaiveDate::from_ymd_opt(2025, 6, 5).unwrap();
        let friday = NaiveDate::from_ymd_opt(2025, 6, 6).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2025, 6, 7).unwrap();
        let sunday = NaiveDate::from_ymd_opt(2025, 6, 8).unwrap();

        assert!(p.applies_on(monday));
        assert!(!p.applies_on(tuesday));
        assert!(p.applies_on(wednesday));
        assert!(!p.applies_on(thursday));
        assert!(p.applies_on(friday));
        assert!(!p.applies_on(saturday));
        assert!(!p.applies_on(sunday));
    }

    #[test]
    fn weekdays_frequency_covers_monday_to_friday() {
        let p = pattern(Frequency::Weekdays, None);

        assert!(p.applies_on(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap())); // Mon
        assert!(p.applies_on(NaiveDate::from_ymd_opt(2025, 6, 6).unwrap())); // Fri
        assert!(!p.applies_on(NaiveDate::from_ymd_opt(2025, 6, 7).unwrap())); // Sat
    }

    #[test]
    fn daily_pattern_respects_validity_window() {
        let mut p = pattern(Frequency::Daily, None);
        p.valid_from = Some(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
        p.valid_until = Some(NaiveDate::from_ymd_opt(2025, 6, 4).unwrap());

        assert!(!p.applies_on(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()));
        assert!(p.applies_on(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()));
        assert!(p.applies_on(NaiveDate::from_ymd_opt(2025, 6, 4).unwrap()));
        assert!(!p.applies_on(NaiveDate::from_ymd_opt(2025, 6, 5).unwrap()));
    }

    #[test]
    fn inactive_pattern_never_applies() {
        let mut p = pattern(Frequency::Daily, None);
        p.is_active = false;
        assert!(!p.applies_on(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()));
    }

    #[test]
    fn malformed_weekdays_never_grant_availability() {
        let p = pattern(Frequency::Weekly, Some("nonsense"));
        let empty = pattern(Frequency::Custom, None);

        for offset in 0..7 {
            let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap() + chrono::Days::new(offset);
            assert!(!p.applies_on(date));
            assert!(!empty.applies_on(date));
        }
    }

    #[test]
    fn all_day_custom_hours_does_not_block_by_default() {
        let policy = FullDayBlockPolicy::default();
        let mut ex = AvailabilityException {
            id: Uuid::new_v4(),
            practitioner_id: None,
            is_company_wide: true,
            exception_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            exception_type: ExceptionType::CustomHours,
            is_all_day: true,
            start_time: None,
            end_time: None,
            reason: None,
            created_at: None,
        };

        assert!(!policy.blocks_entire_day(&ex));

        ex.exception_type = ExceptionType::Holiday;
        assert!(policy.blocks_entire_day(&ex));

        ex.exception_type = ExceptionType::Blocked;
        ex.is_all_day = false;
        assert!(!policy.blocks_entire_day(&ex));
    }

    #[test]
    fn partial_window_requires_both_times_in_order() {
        let mut ex = AvailabilityException {
            id: Uuid::new_v4(),
            practitioner_id: Some(Uuid::new_v4()),
            is_company_wide: false,
            exception_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            exception_type: ExceptionType::Blocked,
            is_all_day: false,
            start_time: NaiveTime::from_hms_opt(12, 0, 0),
            end_time: NaiveTime::from_hms_opt(13, 0, 0),
            reason: None,
            created_at: None,
        };

        assert_eq!(
            ex.partial_window(),
            Some((
                NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(13, 0, 0).unwrap()
            ))
        );

        ex.end_time = None;
        assert_eq!(ex.partial_window(), None);

        ex.start_time = NaiveTime::from_hms_opt(14, 0, 0);
        ex.end_time = NaiveTime::from_hms_opt(13, 0, 0);
        assert_eq!(ex.partial_window(), None);
    }
}
