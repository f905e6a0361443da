//! Month grid for the calendar screen. A pure function of resolved day
//! states; rendering is somebody else's problem.

use serde::Serialize;

use crate::error::{Result, ScheduleError};
use crate::model::{CalendarDate, EntrySource, PlantId, TimeOfDay};
use crate::resolver::DayState;
use crate::store::KeyValueStore;
use crate::Planner;

/// Where a marked day comes from, as shown by its badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    Manual,
    Recurrence,
    Automatic,
    AutomaticEdited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mark", rename_all = "snake_case")]
pub enum DayMark {
    Empty,
    Marked { time: TimeOfDay, badge: Badge },
    Completed { time: TimeOfDay },
}

impl From<&DayState> for DayMark {
    fn from(state: &DayState) -> Self {
        match state {
            DayState::Empty => DayMark::Empty,
            DayState::Concrete(w) if w.completed => DayMark::Completed { time: w.time },
            DayState::Concrete(w) => DayMark::Marked {
                time: w.time,
                badge: match w.source {
                    Some(EntrySource::Irrigation) => Badge::Automatic,
                    Some(EntrySource::IrrigationOverride) => Badge::AutomaticEdited,
                    Some(EntrySource::Recurrence) => Badge::Recurrence,
                    Some(EntrySource::Other) | None => Badge::Manual,
                },
            },
            DayState::Recurring { time, .. } => DayMark::Marked {
                time: *time,
                badge: Badge::Recurrence,
            },
            DayState::Automatic { time, .. } => DayMark::Marked {
                time: *time,
                badge: Badge::Automatic,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub date: CalendarDate,
    pub day: u8,
    pub is_today: bool,
    #[serde(flatten)]
    pub mark: DayMark,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthView {
    pub year: i32,
    pub month: u8,
    /// Empty cells before the 1st in a Sunday-first grid.
    pub leading_blanks: u8,
    pub days: Vec<CalendarDay>,
}

impl<S: KeyValueStore> Planner<S> {
    pub fn month_view(&self, plant: &PlantId, year: i32, month: u8) -> Result<MonthView> {
        let first = CalendarDate::from_ymd(year, month, 1)
            .map_err(|_| ScheduleError::InvalidMonth { year, month })?;
        let today = self.today();

        let days = (0..31)
            .map(|i| first.add_days(i))
            .take_while(|d| d.month() == month && d.year() == year)
            .map(|date| CalendarDay {
                date,
                day: date.day(),
                is_today: date == today,
                mark: DayMark::from(&self.resolve_calendar_day(plant, date)),
            })
            .collect();

        Ok(MonthView {
            year,
            month,
            leading_blanks: first.weekday_from_sunday(),
            days,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
