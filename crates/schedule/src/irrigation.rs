//! Automatic irrigation: the weekly-frequency config, the weekdays it
//! waters on, per-day skips (`irrigation_exceptions_<plantId>`) and per-day
//! time overrides (entries tagged `irrigation_override`).
//!
//! Automatic days are never materialized; they are derived from the config
//! whenever asked.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, ScheduleError};
use crate::model::{CalendarDate, EntrySource, IrrigationConfig, PlantId, TimeOfDay, WateringOccurrence};
use crate::store::{self, KeyValueStore};
use crate::Planner;

/// How far ahead the next-waterings projection looks.
pub const PROJECTION_DAYS: i64 = 14;

/// How many projected waterings are reported at most.
pub const PROJECTION_LIMIT: usize = 5;

/// Weekdays (0 = Sunday) watered for a given weekly frequency: spread with a
/// stride of `7 / weekly` days starting on Sunday.
pub fn irrigation_weekdays(weekly_watering: u8) -> Vec<u8> {
    if weekly_watering == 0 {
        return Vec::new();
    }
    let weekly = weekly_watering.min(7);
    let stride = 7 / weekly;
    (0..weekly).map(|i| (i * stride) % 7).collect()
}

impl IrrigationConfig {
    /// Whether the weekly pattern waters on `date`. Skipped days are not
    /// considered here; see [`Planner::is_irrigation_day`].
    pub fn waters_on(&self, date: CalendarDate) -> bool {
        self.is_active() && irrigation_weekdays(self.weekly_watering).contains(&date.weekday_from_sunday())
    }
}

/// One projected automatic watering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedWatering {
    pub date: CalendarDate,
    /// 0 = Sunday.
    pub weekday: u8,
    pub time: TimeOfDay,
    pub is_override: bool,
}

/// Manual adjustments layered on top of the automatic system. All of them are
/// wiped when the system is reconfigured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Customizations {
    /// Skipped automatic days.
    pub exceptions: usize,
    /// Automatic days with an edited time.
    pub overrides: usize,
    /// Skipped recurrence occurrences.
    pub rule_exclusions: usize,
}

impl Customizations {
    pub fn total(&self) -> usize {
        self.exceptions + self.overrides + self.rule_exclusions
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl<S: KeyValueStore> Planner<S> {
    pub fn irrigation_config(&self, plant: &PlantId) -> IrrigationConfig {
        store::load_or_default(&self.store, &store::irrigation_config_key(plant))
    }

    pub(crate) fn store_irrigation_config(&mut self, plant: &PlantId, config: &IrrigationConfig) {
        store::save(&mut self.store, &store::irrigation_config_key(plant), config);
    }

    pub fn irrigation_exceptions(&self, plant: &PlantId) -> Vec<CalendarDate> {
        store::load_list(&self.store, &store::irrigation_exceptions_key(plant))
    }

    /// Automatic watering happens on `date`: config active, weekday selected,
    /// and the day was not skipped.
    pub fn is_irrigation_day(&self, plant: &PlantId, date: CalendarDate) -> bool {
        self.irrigation_config(plant).waters_on(date) && !self.irrigation_exceptions(plant).contains(&date)
    }

    /// Skip one automatic day. Idempotent.
    pub fn skip_irrigation_day(&mut self, plant: &PlantId, date: CalendarDate) -> bool {
        let mut exceptions = self.irrigation_exceptions(plant);
        if exceptions.contains(&date) {
            return false;
        }
        exceptions.push(date);
        store::save(&mut self.store, &store::irrigation_exceptions_key(plant), &exceptions);
        info!(plant = %plant, date = %date, "automatic irrigation day skipped");
        true
    }

    /// Water at a different time on one automatic day. Any entry already on
    /// that date is retimed and retagged.
    pub fn override_irrigation_time(&mut self, plant: &PlantId, date: CalendarDate, time: TimeOfDay) {
        let mut list = self.occurrences(plant);
        match list.iter_mut().find(|w| w.date == date) {
            Some(entry) => {
                entry.time = time;
                entry.source = Some(EntrySource::IrrigationOverride);
            }
            None => list.push(WateringOccurrence {
                source: Some(EntrySource::IrrigationOverride),
                ..WateringOccurrence::new(date, time)
            }),
        }
        self.save_occurrences(plant, &list);
        info!(plant = %plant, date = %date, time = %time, "automatic irrigation time overridden");
    }

    /// Drop a time override so the configured time applies again.
    pub fn restore_irrigation_time(&mut self, plant: &PlantId, date: CalendarDate) -> bool {
        let mut list = self.occurrences(plant);
        let before = list.len();
        list.retain(|w| !(w.date == date && w.is_irrigation_override()));
        if list.len() == before {
            debug!(plant = %plant, date = %date, "restore_irrigation_time: no override");
            return false;
        }
        self.save_occurrences(plant, &list);
        info!(plant = %plant, date = %date, "automatic irrigation time restored");
        true
    }

    /// The next automatic waterings starting at `from` (inclusive).
    pub fn next_irrigation_dates(&self, plant: &PlantId, from: CalendarDate) -> Vec<ProjectedWatering> {
        let config = self.irrigation_config(plant);
        if !config.is_active() {
            return Vec::new();
        }
        let exceptions = self.irrigation_exceptions(plant);
        let entries = self.occurrences(plant);

        (0..PROJECTION_DAYS)
            .map(|i| from.add_days(i))
            .filter(|d| config.waters_on(*d) && !exceptions.contains(d))
            .take(PROJECTION_LIMIT)
            .map(|date| {
                let edited = entries
                    .iter()
                    .find(|w| w.date == date && w.is_irrigation_override());
                ProjectedWatering {
                    date,
                    weekday: date.weekday_from_sunday(),
                    time: edited.map_or(config.watering_time, |w| w.time),
                    is_override: edited.is_some(),
                }
            })
            .collect()
    }

    /// Turn the automatic system on or off without touching its settings.
    pub fn set_irrigation_enabled(&mut self, plant: &PlantId, enabled: bool) -> Result<IrrigationConfig> {
        let mut config = self.irrigation_config(plant);
        if !config.is_configured() {
            return Err(ScheduleError::IrrigationNotConfigured(plant.to_string()));
        }
        config.enabled = enabled;
        self.store_irrigation_config(plant, &config);
        info!(plant = %plant, enabled, "automatic irrigation toggled");
        Ok(config)
    }

    /// Switch the automatic system off and forget its frequency.
    pub fn remove_irrigation_system(&mut self, plant: &PlantId) {
        let mut config = self.irrigation_config(plant);
        config.enabled = false;
        config.weekly_watering = 0;
        self.store_irrigation_config(plant, &config);
        info!(plant = %plant, "automatic irrigation removed");
    }

    pub fn irrigation_customizations(&self, plant: &PlantId) -> Customizations {
        Customizations {
            exceptions: self.irrigation_exceptions(plant).len(),
            overrides: self
                .occurrences(plant)
                .iter()
                .filter(|w| w.is_irrigation_override())
                .count(),
            rule_exclusions: self.rules(plant).iter().map(|r| r.excluded_dates.len()).sum(),
        }
    }

    /// Wipe every customization: skipped automatic days, edited automatic
    /// times, and recurrence exclusions. Returns what was removed.
    pub fn clear_irrigation_customizations(&mut self, plant: &PlantId) -> Customizations {
        let cleared = self.irrigation_customizations(plant);

        self.store.remove(&store::irrigation_exceptions_key(plant));

        if cleared.overrides > 0 {
            let mut list = self.occurrences(plant);
            list.retain(|w| !w.is_irrigation_override());
            self.save_occurrences(plant, &list);
        }

        self.clear_rule_exclusions(plant);

        if !cleared.is_empty() {
            info!(
                plant = %plant,
                exceptions = cleared.exceptions,
                overrides = cleared.overrides,
                rule_exclusions = cleared.rule_exclusions,
                "customizations cleared"
            );
        }
        cleared
    }
}

// ===========================================================================
// Tests
// ===========================================================================
