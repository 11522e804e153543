//! Timing policies for the scheduler.

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tsunagi_core::WorkflowError;

/// A wall-clock moment matched by day, hour and minute.
///
/// Unset fields match any value, so `at_minute(30)` fires at half past
/// every hour and `at_hour(9, 0)` at nine every day.
///
/// # Examples
///
/// ```
/// use chrono::{Local, TimeZone};
/// use tsunagi::ClockMark;
///
/// let mark = ClockMark::at_hour(9, 30)?;
/// let morning = Local.with_ymd_and_hms(2024, 5, 1, 9, 30, 12).single();
/// assert!(morning.map(|t| mark.matches(&t)).unwrap_or(false));
///
/// assert!(ClockMark::at_hour(24, 0).is_err());
/// # Ok::<(), tsunagi::WorkflowError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockMark {
    #[serde(default)]
    day: Option<u32>,
    #[serde(default)]
    hour: Option<u32>,
    minute: u32,
    #[serde(default)]
    repeat: bool,
}

impl ClockMark {
    /// Fires at `minute` past every hour.
    pub fn at_minute(minute: u32) -> Result<Self, WorkflowError> {
        let mark = Self {
            day: None,
            hour: None,
            minute,
            repeat: false,
        };
        mark.validate()?;
        Ok(mark)
    }

    /// Fires at `hour:minute` every day.
    pub fn at_hour(hour: u32, minute: u32) -> Result<Self, WorkflowError> {
        let mark = Self {
            hour: Some(hour),
            ..Self::at_minute(minute)?
        };
        mark.validate()?;
        Ok(mark)
    }

    /// Fires at `hour:minute` on day `day` of every month.
    pub fn at_day(day: u32, hour: u32, minute: u32) -> Result<Self, WorkflowError> {
        let mark = Self {
            day: Some(day),
            ..Self::at_hour(hour, minute)?
        };
        mark.validate()?;
        Ok(mark)
    }

    /// Keeps firing on every later match instead of only the first one.
    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// Returns `true` if the mark fires more than once.
    pub fn is_repeating(&self) -> bool {
        self.repeat
    }

    /// Checks every set field against its range.
    ///
    /// Marks built through the constructors are always valid; this is for
    /// marks read from configuration.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if let Some(day) = self.day {
            check_field("day", day, 1, 31)?;
        }
        if let Some(hour) = self.hour {
            check_field("hour", hour, 0, 23)?;
        }
        check_field("minute", self.minute, 0, 59)
    }

    /// Returns `true` if `now` falls within the marked minute.
    pub fn matches<D>(&self, now: &D) -> bool
    where
        D: Datelike + Timelike,
    {
        self.day.map_or(true, |day| day == now.day())
            && self.hour.map_or(true, |hour| hour == now.hour())
            && self.minute == now.minute()
    }
}

fn check_field(field: &'static str, value: u32, min: u32, max: u32) -> Result<(), WorkflowError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(WorkflowError::InvalidClockField {
            field,
            value,
            min,
            max,
        })
    }
}

/// When a scheduler runs its workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerTiming {
    /// Every `interval`, measured from the start of the previous run.
    Frequency(Duration),
    /// Whenever the wall clock matches the mark.
    AtClock(ClockMark),
}

impl SchedulerTiming {
    /// Checks the timing is usable.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        match self {
            SchedulerTiming::Frequency(interval) if interval.is_zero() => Err(
                WorkflowError::Configuration("frequency must be greater than zero".to_string()),
            ),
            SchedulerTiming::Frequency(_) => Ok(()),
            SchedulerTiming::AtClock(mark) => mark.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32, minute: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .and_then(|date| date.and_hms_opt(hour, minute, 0))
            .expect("valid date")
    }

    #[test]
    fn test_field_ranges() {
        assert!(ClockMark::at_minute(59).is_ok());
        assert!(ClockMark::at_minute(60).is_err());
        assert!(ClockMark::at_hour(23, 0).is_ok());
        assert!(matches!(
            ClockMark::at_hour(24, 0),
            Err(WorkflowError::InvalidClockField { field: "hour", value: 24, .. })
        ));
        assert!(ClockMark::at_day(0, 0, 0).is_err());
        assert!(ClockMark::at_day(31, 12, 0).is_ok());
        assert!(ClockMark::at_day(32, 12, 0).is_err());
    }

    #[test]
    fn test_unset_fields_are_wildcards() {
        let minute = ClockMark::at_minute(15).expect("valid mark");
        assert!(minute.matches(&at(1, 0, 15)));
        assert!(minute.matches(&at(20, 13, 15)));
        assert!(!minute.matches(&at(20, 13, 16)));

        let daily = ClockMark::at_hour(13, 15).expect("valid mark");
        assert!(daily.matches(&at(20, 13, 15)));
        assert!(!daily.matches(&at(20, 14, 15)));

        let monthly = ClockMark::at_day(20, 13, 15).expect("valid mark");
        assert!(monthly.matches(&at(20, 13, 15)));
        assert!(!monthly.matches(&at(21, 13, 15)));
    }

    #[test]
    fn test_timing_from_config() {
        let json = r#"{ "at_clock": { "hour": 25, "minute": 0 } }"#;
        let timing: Option<SchedulerTiming> = serde_json::from_str(json).ok();
        assert!(timing.is_some());
        assert!(timing.map(|t| t.validate().is_err()).unwrap_or(false));

        let json = r#"{ "frequency": { "secs": 5, "nanos": 0 } }"#;
        let timing: Option<SchedulerTiming> = serde_json::from_str(json).ok();
        assert_eq!(
            timing,
            Some(SchedulerTiming::Frequency(Duration::from_secs(5)))
        );
    }

    #[test]
    fn test_zero_frequency_rejected() {
        assert!(SchedulerTiming::Frequency(Duration::ZERO).validate().is_err());
    }
}
