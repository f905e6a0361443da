//! "What happens on this day" for one plant.
//!
//! Precedence, highest first:
//!
//! ```text
//! concrete entry ─▶ first active matching rule (store order) ─▶ [automatic day] ─▶ empty
//! ```
//!
//! The automatic tier is only consulted by [`Planner::resolve_calendar_day`].

use serde::Serialize;

use crate::model::{CalendarDate, PlantId, TimeOfDay, WateringOccurrence};
use crate::store::KeyValueStore;
use crate::Planner;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DayState {
    /// Nothing scheduled.
    Empty,
    /// A stored entry, returned verbatim.
    Concrete(WateringOccurrence),
    /// Generated by a recurrence rule; never completed (completing it
    /// materializes a concrete entry).
    #[serde(rename_all = "camelCase")]
    Recurring {
        date: CalendarDate,
        time: TimeOfDay,
        recurrence_id: String,
        interval_days: u32,
    },
    /// Generated by the automatic irrigation weekly pattern.
    #[serde(rename_all = "camelCase")]
    Automatic {
        date: CalendarDate,
        time: TimeOfDay,
        weekly_watering: u8,
    },
}

impl DayState {
    pub fn is_empty(&self) -> bool {
        matches!(self, DayState::Empty)
    }

    pub fn time(&self) -> Option<TimeOfDay> {
        match self {
            DayState::Empty => None,
            DayState::Concrete(w) => Some(w.time),
            DayState::Recurring { time, .. } | DayState::Automatic { time, .. } => Some(*time),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, DayState::Concrete(w) if w.completed)
    }
}

impl<S: KeyValueStore> Planner<S> {
    /// Merge the concrete entry and recurrence matches for `date`. Pure read;
    /// unknown plants and unreadable records simply resolve to `Empty`.
    pub fn resolve_day(&self, plant: &PlantId, date: CalendarDate) -> DayState {
        if let Some(entry) = self.occurrence(plant, date) {
            return DayState::Concrete(entry);
        }

        self.active_rules(plant)
            .into_iter()
            .find(|r| r.occurs_on(date))
            .map(|r| DayState::Recurring {
                date,
                time: r.time,
                recurrence_id: r.id,
                interval_days: r.interval_days,
            })
            .unwrap_or(DayState::Empty)
    }

    /// [`Planner::resolve_day`] plus the automatic irrigation tier, as drawn
    /// on the calendar.
    pub fn resolve_calendar_day(&self, plant: &PlantId, date: CalendarDate) -> DayState {
        let state = self.resolve_day(plant, date);
        if !state.is_empty() || !self.is_irrigation_day(plant, date) {
            return state;
        }
        let config = self.irrigation_config(plant);
        DayState::Automatic {
            date,
            time: config.watering_time,
            weekly_watering: config.weekly_watering,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
