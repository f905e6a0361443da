use thiserror::Error;

/// Rejected user input. Every variant is raised before any record is
/// touched, so an error always means "nothing happened".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid date '{0}' (expected YYYY-MM-DD)")]
    InvalidDate(String),

    #[error("invalid time '{0}' (expected HH:MM)")]
    InvalidTime(String),

    #[error("interval must be at least 1 day, got {0}")]
    InvalidInterval(u32),

    #[error("weekly watering must be between 1 and 7, got {0}")]
    InvalidWeeklyWatering(u8),

    #[error("invalid calendar month {year}-{month}")]
    InvalidMonth { year: i32, month: u8 },

    #[error("automatic irrigation is not configured for plant '{0}'")]
    IrrigationNotConfigured(String),
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
