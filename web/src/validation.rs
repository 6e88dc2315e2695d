//! Date-range validation for the daily-series endpoints.

use crate::error::ApiError;
use chrono::NaiveDate;
use serde::Deserialize;

/// Longest allowed series, inclusive of both endpoints' days.
pub const MAX_RANGE_DAYS: i64 = 365;

/// Raw query parameters as they arrive.
///
/// Both parameters are required; they are optional here only so their
/// absence produces a specific validation message instead of a framework
/// rejection.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DateRangeParams {
    /// Inclusive series start, ISO `YYYY-MM-DD`.
    pub from_date: Option<String>,
    /// Inclusive series end, ISO `YYYY-MM-DD`.
    pub to_date: Option<String>,
}

/// A validated, inclusive date range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    /// Inclusive start.
    pub from: NaiveDate,
    /// Inclusive end.
    pub to: NaiveDate,
}

impl DateRangeParams {
    /// Validate into a [`DateRange`].
    ///
    /// # Errors
    ///
    /// Returns 422 [`ApiError::validation`] naming the specific rule broken:
    /// a missing/unparseable parameter, an inverted range
    /// (`"end_date must be after start_date"`), or a span over 365 days
    /// (`"Date range cannot exceed 365 days"`).
    pub fn validate(&self) -> Result<DateRange, ApiError> {
        let from = parse_date("from_date", self.from_date.as_deref())?;
        let to = parse_date("to_date", self.to_date.as_deref())?;

        if from > to {
            return Err(ApiError::validation("end_date must be after start_date"));
        }
        if (to - from).num_days() > MAX_RANGE_DAYS {
            return Err(ApiError::validation("Date range cannot exceed 365 days"));
        }

        Ok(DateRange { from, to })
    }
}

fn parse_date(name: &str, value: Option<&str>) -> Result<NaiveDate, ApiError> {
    let value = value.ok_or_else(|| ApiError::validation(format!("{name} is required")))?;
    value.parse().map_err(|_| {
        ApiError::validation(format!("{name} must be a valid ISO date (YYYY-MM-DD)"))
    })
}
