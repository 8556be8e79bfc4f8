use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};

use crate::config::{ConfigError, ScheduleConfig};

/// A fixed weekly slot in UTC, e.g. Sunday 00:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySchedule {
    weekday: Weekday,
    time: NaiveTime,
}

impl WeeklySchedule {
    pub fn new(weekday: Weekday, hour: u32, minute: u32) -> Result<Self, ConfigError> {
        let time = NaiveTime::from_hms_opt(hour, minute, 0).ok_or(ConfigError::Invalid {
            field: "schedule",
            reason: format!("{hour:02}:{minute:02} is not a time of day"),
        })?;
        Ok(Self { weekday, time })
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self, ConfigError> {
        Self::new(config.parsed_weekday()?, config.hour, config.minute)
    }

    /// First slot strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let days_ahead = (self.weekday.num_days_from_monday() as i64
            - today.weekday().num_days_from_monday() as i64)
            .rem_euclid(7);
        let candidate = Utc.from_utc_datetime(&(today + Duration::days(days_ahead)).and_time(self.time));
        if candidate > now {
            candidate
        } else {
            candidate + Duration::weeks(1)
        }
    }
}

impl std::fmt::Display for WeeklySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "every {} at {} UTC", self.weekday, self.time.format("%H:%M"))
    }
}
