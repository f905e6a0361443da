//! Plant-scoped records persisted in the key-value store, plus the small
//! value types (date, time-of-day, plant id) they are built from.
//!
//! Field names on the wire are camelCase so records written by older clients
//! load unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::macros::{format_description, time};
use time::{Date, Duration, OffsetDateTime, Time};

use crate::error::ScheduleError;

/// Time used when an automatic irrigation config carries none, and the
/// default time suggested for new recurrences.
pub const DEFAULT_WATERING_TIME: TimeOfDay = TimeOfDay(time!(8:00));

// ---------------------------------------------------------------------------
// CalendarDate
// ---------------------------------------------------------------------------

/// A plain calendar day (`YYYY-MM-DD`), no time zone attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalendarDate(Date);

impl CalendarDate {
    pub fn from_ymd(year: i32, month: u8, day: u8) -> Result<Self, ScheduleError> {
        let invalid = || ScheduleError::InvalidDate(format!("{year:04}-{month:02}-{day:02}"));
        let month = time::Month::try_from(month).map_err(|_| invalid())?;
        Date::from_calendar_date(year, month, day)
            .map(Self)
            .map_err(|_| invalid())
    }

    pub fn year(self) -> i32 {
        self.0.year()
    }

    pub fn month(self) -> u8 {
        self.0.month() as u8
    }

    pub fn day(self) -> u8 {
        self.0.day()
    }

    /// Whole days from `earlier` to `self` (negative when `self` is before).
    pub fn days_since(self, earlier: CalendarDate) -> i64 {
        (self.0 - earlier.0).whole_days()
    }

    pub fn add_days(self, days: i64) -> Self {
        Self(self.0.saturating_add(Duration::days(days)))
    }

    /// Day of week with 0 = Sunday .. 6 = Saturday.
    pub fn weekday_from_sunday(self) -> u8 {
        self.0.weekday().number_days_from_sunday()
    }

    pub fn as_date(self) -> Date {
        self.0
    }
}

impl From<Date> for CalendarDate {
    fn from(d: Date) -> Self {
        Self(d)
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}",
            self.0.year(),
            self.0.month() as u8,
            self.0.day()
        )
    }
}

impl FromStr for CalendarDate {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Date::parse(s.trim(), format_description!("[year]-[month]-[day]"))
            .map(Self)
            .map_err(|_| ScheduleError::InvalidDate(s.to_string()))
    }
}

impl Serialize for CalendarDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CalendarDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// TimeOfDay
// ---------------------------------------------------------------------------

/// Wall-clock time with minute precision (`HH:MM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(Time);

impl TimeOfDay {
    pub fn from_hm(hour: u8, minute: u8) -> Result<Self, ScheduleError> {
        Time::from_hms(hour, minute, 0)
            .map(Self)
            .map_err(|_| ScheduleError::InvalidTime(format!("{hour:02}:{minute:02}")))
    }

    pub fn hour(self) -> u8 {
        self.0.hour()
    }

    pub fn minute(self) -> u8 {
        self.0.minute()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0.hour(), self.0.minute())
    }
}

impl FromStr for TimeOfDay {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Time::parse(s.trim(), format_description!("[hour]:[minute]"))
            .map(Self)
            .map_err(|_| ScheduleError::InvalidTime(s.to_string()))
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// PlantId
// ---------------------------------------------------------------------------

/// Identifier of a plant in the collaborator plant list. Stored plant records
/// carry it either as a JSON string or a JSON number; both compare equal to
/// the same textual id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlantId(String);

impl PlantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Serialize for PlantId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PlantId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => Self(s),
            RawId::Number(n) => Self(n.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Entry in the plant list owned by the rest of the application. Only `id`
/// and `name` matter here; every other field is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plant {
    pub id: PlantId,
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Plant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: PlantId::new(id),
            name: name.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Origin tag of a concrete watering entry. Manual entries carry no tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    /// A confirmed watering on an automatic irrigation day.
    Irrigation,
    /// A user-edited automatic irrigation day.
    IrrigationOverride,
    /// A recurrence occurrence that was materialized when confirmed.
    Recurrence,
    /// Any tag this version does not know about.
    #[serde(other)]
    Other,
}

/// One concrete watering entry. At most one per plant and date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WateringOccurrence {
    pub date: CalendarDate,
    pub time: TimeOfDay,
    #[serde(default)]
    pub completed: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<EntrySource>,
}

impl WateringOccurrence {
    pub fn new(date: CalendarDate, time: TimeOfDay) -> Self {
        Self {
            date,
            time,
            completed: false,
            completed_at: None,
            source: None,
        }
    }

    /// Untagged entries are the ones a user placed by hand.
    pub fn is_manual(&self) -> bool {
        self.source.is_none()
    }

    pub fn is_irrigation_override(&self) -> bool {
        self.source == Some(EntrySource::IrrigationOverride)
    }
}

/// Generator of virtual occurrences every `interval_days` from `start_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    pub id: String,
    pub start_date: CalendarDate,
    pub interval_days: u32,
    pub time: TimeOfDay,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub excluded_dates: Vec<CalendarDate>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    #[default]
    Ok,
    Warning,
    Error,
    #[serde(other)]
    Unknown,
}

/// Automatic irrigation settings, one per plant. `weekly_watering == 0`
/// means the system was never configured or was removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IrrigationConfig {
    pub weekly_watering: u8,
    pub watering_time: TimeOfDay,
    pub enabled: bool,
    pub sensor_status: SensorStatus,
    #[serde(skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub last_updated: Option<OffsetDateTime>,
}

impl Default for IrrigationConfig {
    fn default() -> Self {
        Self {
            weekly_watering: 0,
            watering_time: DEFAULT_WATERING_TIME,
            enabled: false,
            sensor_status: SensorStatus::Ok,
            last_updated: None,
        }
    }
}

impl IrrigationConfig {
    pub fn is_configured(&self) -> bool {
        self.weekly_watering > 0
    }

    /// Enabled with a frequency set: the only state that generates days.
    pub fn is_active(&self) -> bool {
        self.enabled && self.is_configured()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
