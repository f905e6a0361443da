//! Concrete watering entries (`watering_<plantId>`): quick-add, removal,
//! time edits and the "I watered this" confirmation.

use tracing::{debug, info};

use crate::model::{CalendarDate, EntrySource, PlantId, TimeOfDay, WateringOccurrence};
use crate::resolver::DayState;
use crate::store::{self, KeyValueStore};
use crate::Planner;

/// How many entries the upcoming list shows by default.
pub const UPCOMING_LIMIT: usize = 5;

impl<S: KeyValueStore> Planner<S> {
    /// All concrete entries for a plant, in store order.
    pub fn occurrences(&self, plant: &PlantId) -> Vec<WateringOccurrence> {
        store::load_list(&self.store, &store::watering_key(plant))
    }

    /// The concrete entry for `date`, if any.
    pub fn occurrence(&self, plant: &PlantId, date: CalendarDate) -> Option<WateringOccurrence> {
        self.occurrences(plant).into_iter().find(|w| w.date == date)
    }

    pub(crate) fn save_occurrences(&mut self, plant: &PlantId, list: &[WateringOccurrence]) {
        store::save(&mut self.store, &store::watering_key(plant), list);
    }

    /// Insert `{date, time, completed: false}`. First write wins: returns
    /// `false` and leaves the existing entry alone when the date is taken.
    pub fn add_occurrence(&mut self, plant: &PlantId, date: CalendarDate, time: TimeOfDay) -> bool {
        let mut list = self.occurrences(plant);
        if list.iter().any(|w| w.date == date) {
            debug!(plant = %plant, date = %date, "add_occurrence: date already scheduled");
            return false;
        }
        list.push(WateringOccurrence::new(date, time));
        self.save_occurrences(plant, &list);
        info!(plant = %plant, date = %date, time = %time, "watering scheduled");
        true
    }

    /// Delete the concrete entry for `date`. Recurrence rules are untouched,
    /// so a rule matching the date shows through again on the next read.
    pub fn remove_occurrence(&mut self, plant: &PlantId, date: CalendarDate) -> bool {
        let mut list = self.occurrences(plant);
        let before = list.len();
        list.retain(|w| w.date != date);
        if list.len() == before {
            debug!(plant = %plant, date = %date, "remove_occurrence: nothing to remove");
            return false;
        }
        self.save_occurrences(plant, &list);
        info!(plant = %plant, date = %date, "watering removed");
        true
    }

    /// Change the time of an existing entry; no-op without one.
    pub fn update_occurrence_time(
        &mut self,
        plant: &PlantId,
        date: CalendarDate,
        time: TimeOfDay,
    ) -> bool {
        let mut list = self.occurrences(plant);
        let Some(entry) = list.iter_mut().find(|w| w.date == date) else {
            debug!(plant = %plant, date = %date, "update_occurrence_time: no entry");
            return false;
        };
        entry.time = time;
        self.save_occurrences(plant, &list);
        info!(plant = %plant, date = %date, time = %time, "watering time updated");
        true
    }

    /// Record that the plant was watered on `date`.
    ///
    /// Upserts: when the day only has a virtual occurrence (recurrence or
    /// automatic irrigation) or nothing at all, a concrete entry is created
    /// first, tagged after what the calendar showed, so the confirmation is
    /// never lost.
    pub fn mark_completed(
        &mut self,
        plant: &PlantId,
        date: CalendarDate,
        time: TimeOfDay,
    ) -> WateringOccurrence {
        let now = self.now();
        let mut list = self.occurrences(plant);

        if let Some(entry) = list.iter_mut().find(|w| w.date == date) {
            entry.completed = true;
            entry.completed_at = Some(now);
            let done = entry.clone();
            self.save_occurrences(plant, &list);
            info!(plant = %plant, date = %date, "watering confirmed");
            return done;
        }

        let source = match self.resolve_calendar_day(plant, date) {
            DayState::Recurring { .. } => Some(EntrySource::Recurrence),
            DayState::Automatic { .. } => Some(EntrySource::Irrigation),
            DayState::Concrete(_) | DayState::Empty => None,
        };
        let done = WateringOccurrence {
            date,
            time,
            completed: true,
            completed_at: Some(now),
            source,
        };
        list.push(done.clone());
        self.save_occurrences(plant, &list);
        info!(plant = %plant, date = %date, ?source, "watering confirmed (materialized)");
        done
    }

    /// Uncompleted entries dated `from` or later, soonest first.
    pub fn upcoming_occurrences(
        &self,
        plant: &PlantId,
        from: CalendarDate,
        limit: usize,
    ) -> Vec<WateringOccurrence> {
        let mut upcoming: Vec<_> = self
            .occurrences(plant)
            .into_iter()
            .filter(|w| !w.completed && w.date >= from)
            .collect();
        upcoming.sort_by_key(|w| (w.date, w.time));
        upcoming.truncate(limit);
        upcoming
    }

    /// Drop hand-placed entries that are still ahead of `today` and not yet
    /// done. Completed, past and tagged entries stay. Returns how many went.
    pub fn remove_future_manual_occurrences(&mut self, plant: &PlantId, today: CalendarDate) -> usize {
        let mut list = self.occurrences(plant);
        let before = list.len();
        list.retain(|w| w.completed || w.date < today || !w.is_manual());
        let removed = before - list.len();
        if removed > 0 {
            self.save_occurrences(plant, &list);
            info!(plant = %plant, removed, "future manual waterings removed");
        }
        removed
    }
}

// ===========================================================================
// Tests
// ===========================================================================
