//! Lab-hour and duration checks for reservation windows.
//!
//! Both endpoints are mapped into the lab's fixed UTC offset before any
//! calendar or clock comparison.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Timelike, Utc};

use crate::lab::ValidationError;
use crate::limits::*;
use crate::model::{Ms, Span};

const MINUTE_MS: Ms = 60_000;

/// Operating-hours policy of the lab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabHours {
    offset: FixedOffset,
    open_hour: u32,
    close_hour: u32,
    min_minutes: i64,
    max_minutes: i64,
}

impl Default for LabHours {
    fn default() -> Self {
        Self::with_offset_minutes(DEFAULT_UTC_OFFSET_MINUTES).unwrap_or_else(Self::utc)
    }
}

impl LabHours {
    /// Standard 07:00-20:00 policy at the given offset from UTC.
    /// Returns `None` when the offset is outside ±24h.
    pub fn with_offset_minutes(offset_minutes: i32) -> Option<Self> {
        let offset = FixedOffset::east_opt(offset_minutes.checked_mul(60)?)?;
        Some(Self::standard(offset))
    }

    pub fn utc() -> Self {
        Self::standard(Utc.fix())
    }

    fn standard(offset: FixedOffset) -> Self {
        Self {
            offset,
            open_hour: LAB_OPEN_HOUR,
            close_hour: LAB_CLOSE_HOUR,
            min_minutes: MIN_RESERVATION_MINUTES,
            max_minutes: MAX_RESERVATION_MINUTES,
        }
    }

    fn local(&self, ms: Ms) -> Result<DateTime<FixedOffset>, ValidationError> {
        if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&ms) {
            return Err(ValidationError::TimestampOutOfRange(ms));
        }
        DateTime::<Utc>::from_timestamp_millis(ms)
            .map(|utc| utc.with_timezone(&self.offset))
            .ok_or(ValidationError::TimestampOutOfRange(ms))
    }

    /// Every precondition on a requested window, in order. Pure: no store access.
    pub fn validate(&self, start_at: Ms, end_at: Ms) -> Result<Span, ValidationError> {
        if start_at >= end_at {
            return Err(ValidationError::EmptyInterval);
        }
        let start = self.local(start_at)?;
        let end = self.local(end_at)?;

        if start.date_naive() != end.date_naive() {
            return Err(ValidationError::SpansMultipleDays);
        }
        let open_secs = self.open_hour * 3600;
        let close_secs = self.close_hour * 3600;
        if start.num_seconds_from_midnight() < open_secs
            || end.num_seconds_from_midnight() > close_secs
        {
            return Err(ValidationError::OutsideLabHours {
                open_hour: self.open_hour,
                close_hour: self.close_hour,
            });
        }

        // Whole minutes, truncated.
        let minutes = (end_at - start_at) / MINUTE_MS;
        if minutes < self.min_minutes || minutes > self.max_minutes {
            return Err(ValidationError::Duration {
                minutes,
                min: self.min_minutes,
                max: self.max_minutes,
            });
        }
        Ok(Span::new(start_at, end_at))
    }

    /// Opening window of one lab day, in UTC milliseconds.
    pub fn day_window(&self, day: NaiveDate) -> Result<Span, ValidationError> {
        let at = |hour: u32| -> Result<Ms, ValidationError> {
            let time = NaiveTime::from_hms_opt(hour, 0, 0).ok_or(ValidationError::InvalidDay)?;
            self.offset
                .from_local_datetime(&day.and_time(time))
                .single()
                .map(|dt| dt.timestamp_millis())
                .ok_or(ValidationError::InvalidDay)
        };
        Ok(Span::new(at(self.open_hour)?, at(self.close_hour)?))
    }
}
