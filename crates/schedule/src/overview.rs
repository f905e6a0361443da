//! Cross-plant "today" overview for the home screen.

use serde::Serialize;
use tracing::debug;

use crate::model::{CalendarDate, PlantId};
use crate::resolver::DayState;
use crate::store::KeyValueStore;
use crate::Planner;

/// With nothing scheduled anywhere, a plant counts as due once its last
/// completed watering is this many days old.
pub const DUE_AFTER_DAYS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TodayStatus {
    /// A completed entry exists for the day.
    Watered,
    /// Something is scheduled for the day and not done yet.
    Scheduled,
    /// Nothing scheduled, but the last watering is too old (or missing).
    Overdue,
    Fine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantToday {
    pub id: PlantId,
    pub name: String,
    pub status: TodayStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_watered: Option<CalendarDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_since_watering: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyOverview {
    pub date: CalendarDate,
    pub total_plants: usize,
    pub watered_today: usize,
    pub needs_watering: usize,
    /// `false` when `needs_watering` came from the days-since heuristic.
    pub from_schedule: bool,
    pub plants: Vec<PlantToday>,
}

impl<S: KeyValueStore> Planner<S> {
    /// Most recent completed watering on or before `date`.
    pub fn last_watered(&self, plant: &PlantId, date: CalendarDate) -> Option<CalendarDate> {
        self.occurrences(plant)
            .into_iter()
            .filter(|w| w.completed && w.date <= date)
            .map(|w| w.date)
            .max()
    }

    /// Status of every plant in the directory on `date`.
    ///
    /// A plant needs watering when its calendar day (manual entry, recurrence
    /// or automatic irrigation) has something not yet completed. Only when no
    /// plant has anything scheduled does the days-since heuristic kick in.
    pub fn daily_overview(&self, date: CalendarDate) -> DailyOverview {
        let mut plants: Vec<PlantToday> = self
            .plants()
            .into_iter()
            .map(|plant| {
                let last_watered = self.last_watered(&plant.id, date);
                let status = match self.resolve_calendar_day(&plant.id, date) {
                    DayState::Concrete(w) if w.completed => TodayStatus::Watered,
                    DayState::Empty => TodayStatus::Fine,
                    _ => TodayStatus::Scheduled,
                };
                PlantToday {
                    id: plant.id,
                    name: plant.name,
                    status,
                    last_watered,
                    days_since_watering: last_watered.map(|d| date.days_since(d)),
                }
            })
            .collect();

        let count = |plants: &[PlantToday], s: TodayStatus| plants.iter().filter(|p| p.status == s).count();

        let mut needs_watering = count(&plants[..], TodayStatus::Scheduled);
        let from_schedule = needs_watering > 0;
        if !from_schedule {
            for p in plants.iter_mut().filter(|p| p.status == TodayStatus::Fine) {
                if p.days_since_watering.map_or(true, |d| d >= DUE_AFTER_DAYS) {
                    p.status = TodayStatus::Overdue;
                }
            }
            needs_watering = count(&plants[..], TodayStatus::Overdue);
        }

        let watered_today = count(&plants[..], TodayStatus::Watered);
        debug!(date = %date, watered_today, needs_watering, from_schedule, "daily overview");

        DailyOverview {
            date,
            total_plants: plants.len(),
            watered_today,
            needs_watering,
            from_schedule,
            plants,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{at, date, planner};
    use crate::{IrrigationConfig, MemoryStore, Plant};

    fn with_plants(ids: &[&str]) -> Planner<MemoryStore> {
        let mut p = planner();
        for id in ids {
            p.upsert_plant(Plant::new(*id, format!("plant {id}")));
        }
        p
    }

    fn status_of(o: &DailyOverview, id: &str) -> TodayStatus {
        o.plants.iter().find(|p| p.id.as_str() == id).unwrap().status
    }

    // -- scheduled ------------------------------------------------------------

    #[test]
    fn scheduled_sources_all_count() {
        let mut p = with_plants(&["a", "b", "c", "d"]);
        let today = date("2024-01-10");

        p.add_occurrence(&"a".into(), today, at("08:00"));
        p.create_rule(&"b".into(), date("2024-01-08"), 2, at("08:00")).unwrap();
        p.store_irrigation_config(
            &"c".into(),
            &IrrigationConfig {
                weekly_watering: 7,
                enabled: true,
                ..IrrigationConfig::default()
            },
        );

        let o = p.daily_overview(today);
        assert!(o.from_schedule);
        assert_eq!(o.total_plants, 4);
        assert_eq!(o.needs_watering, 3);
        assert_eq!(o.watered_today, 0);
        assert_eq!(status_of(&o, "d"), TodayStatus::Fine);
    }

    #[test]
    fn watered_plant_is_not_due() {
        let mut p = with_plants(&["a", "b"]);
        let today = date("2024-01-10");
        p.add_occurrence(&"a".into(), today, at("08:00"));
        p.add_occurrence(&"b".into(), today, at("08:00"));
        p.mark_completed(&"a".into(), today, at("08:05"));

        let o = p.daily_overview(today);
        assert_eq!(o.watered_today, 1);
        assert_eq!(o.needs_watering, 1);
        assert_eq!(status_of(&o, "a"), TodayStatus::Watered);
        assert_eq!(o.plants[0].days_since_watering, Some(0));
    }

    #[test]
    fn skipped_irrigation_day_is_not_due() {
        let mut p = with_plants(&["a"]);
        let today = date("2024-01-10");
        p.store_irrigation_config(
            &"a".into(),
            &IrrigationConfig {
                weekly_watering: 7,
                enabled: true,
                ..IrrigationConfig::default()
            },
        );
        p.skip_irrigation_day(&"a".into(), today);

        let o = p.daily_overview(today);
        assert_ne!(status_of(&o, "a"), TodayStatus::Scheduled);
    }

    // -- days-since fallback --------------------------------------------------

    #[test]
    fn fallback_flags_old_and_never_watered() {
        let mut p = with_plants(&["recent", "old", "never"]);
        p.add_occurrence(&"recent".into(), date("2024-01-08"), at("08:00"));
        p.mark_completed(&"recent".into(), date("2024-01-08"), at("08:00"));
        p.add_occurrence(&"old".into(), date("2024-01-07"), at("08:00"));
        p.mark_completed(&"old".into(), date("2024-01-07"), at("08:00"));

        let o = p.daily_overview(date("2024-01-10"));
        assert!(!o.from_schedule);
        assert_eq!(o.needs_watering, 2);
        assert_eq!(status_of(&o, "recent"), TodayStatus::Fine);
        assert_eq!(status_of(&o, "old"), TodayStatus::Overdue);
        assert_eq!(status_of(&o, "never"), TodayStatus::Overdue);
    }

    #[test]
    fn fallback_skipped_when_anything_is_scheduled() {
        let mut p = with_plants(&["a", "never"]);
        p.add_occurrence(&"a".into(), date("2024-01-10"), at("08:00"));

        let o = p.daily_overview(date("2024-01-10"));
        assert_eq!(o.needs_watering, 1);
        assert_eq!(status_of(&o, "never"), TodayStatus::Fine);
    }

    #[test]
    fn last_watered_ignores_later_and_uncompleted() {
        let mut p = with_plants(&["a"]);
        p.add_occurrence(&"a".into(), date("2024-01-05"), at("08:00"));
        p.mark_completed(&"a".into(), date("2024-01-05"), at("08:00"));
        p.mark_completed(&"a".into(), date("2024-01-12"), at("08:00"));
        p.add_occurrence(&"a".into(), date("2024-01-09"), at("08:00"));

        assert_eq!(p.last_watered(&"a".into(), date("2024-01-10")), Some(date("2024-01-05")));
        assert!(p.daily_overview(date("2024-01-03")).plants[0].last_watered.is_none());
    }

    #[test]
    fn empty_directory() {
        let o = planner().daily_overview(date("2024-01-10"));
        assert_eq!(o.total_plants, 0);
        assert_eq!(o.needs_watering, 0);
        assert!(!o.from_schedule);
    }
}
