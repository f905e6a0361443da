//! Reconciliation between the manual (recurrence) and automatic (weekly
//! irrigation) modes of a plant.
//!
//! Every destructive step is split in two: a read-only call that reports what
//! would be lost, and a confirm call that applies it. Dropping the report is
//! the cancel path; nothing is written speculatively.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, ScheduleError};
use crate::irrigation::{irrigation_weekdays, Customizations, ProjectedWatering};
use crate::model::{
    CalendarDate, IrrigationConfig, PlantId, TimeOfDay, WateringOccurrence, DEFAULT_WATERING_TIME,
};
use crate::occurrence::UPCOMING_LIMIT;
use crate::store::{self, KeyValueStore};
use crate::Planner;

/// Prospective recurrences are checked this many occurrences ahead.
pub const RECURRENCE_CONFLICT_OCCURRENCES: i64 = 10;

/// Prospective automatic systems are checked this many days ahead.
pub const IRRIGATION_CONFLICT_DAYS: i64 = 30;

// ---------------------------------------------------------------------------
// Diagnosis
// ---------------------------------------------------------------------------

/// What the plant diagnosis suggests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Recommendation {
    pub interval_days: u32,
    pub weekly_watering: u8,
    pub watering_time: TimeOfDay,
}

impl Default for Recommendation {
    fn default() -> Self {
        Self {
            interval_days: 2,
            weekly_watering: 4,
            watering_time: DEFAULT_WATERING_TIME,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    Manual,
    Automatic,
}

/// A rule the manual calendar is pre-filled with. Not stored until the user
/// creates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedRule {
    pub start_date: CalendarDate,
    pub interval_days: u32,
    pub time: TimeOfDay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DiagnosisOutcome {
    /// Go to the manual calendar.
    ManualCalendar { suggested: SuggestedRule },
    /// Manual was chosen while the automatic system runs; ask what to do.
    #[serde(rename_all = "camelCase")]
    AutomaticConflict { weekly_watering: u8 },
    /// Go to the irrigation setup screen, pre-seeded.
    #[serde(rename_all = "camelCase")]
    IrrigationSetup {
        weekly_watering: u8,
        watering_time: TimeOfDay,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "choice", rename_all = "snake_case")]
pub enum ConflictChoice {
    DisableAutomatic,
    KeepAutomatic {
        #[serde(default)]
        normalize: bool,
    },
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConflictResolution {
    ManualCalendar { suggested: SuggestedRule },
    AutomaticKept { config: IrrigationConfig },
    Cancelled,
}

// ---------------------------------------------------------------------------
// Saving the irrigation config
// ---------------------------------------------------------------------------

/// The user's input on the irrigation setup screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrrigationDraft {
    pub weekly_watering: u8,
    pub watering_time: TimeOfDay,
}

impl IrrigationDraft {
    pub fn validate(&self) -> Result<()> {
        if !(1..=7).contains(&self.weekly_watering) {
            return Err(ScheduleError::InvalidWeeklyWatering(self.weekly_watering));
        }
        Ok(())
    }
}

/// Manual scheduling that competes with the automatic system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Personalized {
    /// Future, uncompleted, hand-placed entries.
    pub manual_waterings: usize,
    pub active_rules: usize,
}

impl Personalized {
    pub fn is_empty(&self) -> bool {
        self.manual_waterings == 0 && self.active_rules == 0
    }
}

/// A save that needs the user's go-ahead because it would wipe data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSave {
    pub draft: IrrigationDraft,
    #[serde(default)]
    pub customizations: Customizations,
    #[serde(default)]
    pub personalized: Personalized,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum SaveOutcome {
    Saved(IrrigationConfig),
    NeedsConfirmation(PendingSave),
}

/// What to do with personalized schedules on a confirmed save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonalizedWaterings {
    #[default]
    Keep,
    Remove,
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Automatic,
    Recurrence,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub date: CalendarDate,
    pub kind: ScheduleKind,
    pub time: TimeOfDay,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSummary {
    pub irrigation: IrrigationConfig,
    pub next_irrigation: Vec<ProjectedWatering>,
    pub active_rules: usize,
    pub upcoming: Vec<WateringOccurrence>,
    pub customizations: Customizations,
}

impl<S: KeyValueStore> Planner<S> {
    fn suggested_rule(&self, rec: &Recommendation) -> SuggestedRule {
        SuggestedRule {
            start_date: self.today(),
            interval_days: rec.interval_days.max(1),
            time: rec.watering_time,
        }
    }

    /// Entry point after a diagnosis. Read only.
    pub fn schedule_from_diagnosis(
        &self,
        plant: &PlantId,
        mode: ScheduleMode,
        rec: &Recommendation,
    ) -> DiagnosisOutcome {
        match mode {
            ScheduleMode::Manual => {
                let config = self.irrigation_config(plant);
                if config.is_active() {
                    debug!(plant = %plant, "manual scheduling requested while automatic is on");
                    DiagnosisOutcome::AutomaticConflict {
                        weekly_watering: config.weekly_watering,
                    }
                } else {
                    DiagnosisOutcome::ManualCalendar {
                        suggested: self.suggested_rule(rec),
                    }
                }
            }
            ScheduleMode::Automatic => DiagnosisOutcome::IrrigationSetup {
                weekly_watering: rec.weekly_watering,
                watering_time: rec.watering_time,
            },
        }
    }

    /// Apply the user's answer to [`DiagnosisOutcome::AutomaticConflict`].
    pub fn resolve_automatic_conflict(
        &mut self,
        plant: &PlantId,
        choice: ConflictChoice,
        rec: &Recommendation,
    ) -> ConflictResolution {
        match choice {
            ConflictChoice::DisableAutomatic => {
                let mut config = self.irrigation_config(plant);
                config.enabled = false;
                self.store_irrigation_config(plant, &config);
                info!(plant = %plant, "automatic irrigation disabled for manual scheduling");
                ConflictResolution::ManualCalendar {
                    suggested: self.suggested_rule(rec),
                }
            }
            ConflictChoice::KeepAutomatic { normalize } => {
                let mut config = self.irrigation_config(plant);
                if normalize && config.weekly_watering != rec.weekly_watering {
                    config.weekly_watering = rec.weekly_watering;
                    self.store_irrigation_config(plant, &config);
                    info!(
                        plant = %plant,
                        weekly = rec.weekly_watering,
                        "automatic frequency normalized to recommendation"
                    );
                }
                ConflictResolution::AutomaticKept { config }
            }
            ConflictChoice::Cancel => ConflictResolution::Cancelled,
        }
    }

    pub fn personalized_waterings(&self, plant: &PlantId, today: CalendarDate) -> Personalized {
        Personalized {
            manual_waterings: self
                .occurrences(plant)
                .iter()
                .filter(|w| w.is_manual() && !w.completed && w.date >= today)
                .count(),
            active_rules: self.active_rules(plant).len(),
        }
    }

    /// Save the irrigation setup, or report what a save would wipe.
    ///
    /// A draft that changes the running schedule (no active config yet, or a
    /// different frequency or time) while customizations or personalized
    /// schedules exist is returned as [`SaveOutcome::NeedsConfirmation`] and
    /// nothing is written.
    pub fn save_irrigation_config(&mut self, plant: &PlantId, draft: IrrigationDraft) -> Result<SaveOutcome> {
        draft.validate()?;

        let current = self.irrigation_config(plant);
        let changes = !current.is_active()
            || current.weekly_watering != draft.weekly_watering
            || current.watering_time != draft.watering_time;

        if changes {
            let customizations = self.irrigation_customizations(plant);
            let personalized = self.personalized_waterings(plant, self.today());
            if !customizations.is_empty() || !personalized.is_empty() {
                debug!(
                    plant = %plant,
                    customizations = customizations.total(),
                    manual = personalized.manual_waterings,
                    rules = personalized.active_rules,
                    "irrigation save needs confirmation"
                );
                return Ok(SaveOutcome::NeedsConfirmation(PendingSave {
                    draft,
                    customizations,
                    personalized,
                }));
            }
        }

        Ok(SaveOutcome::Saved(self.write_irrigation_config(plant, current, draft)))
    }

    /// Apply a save the user confirmed: customizations are always wiped;
    /// personalized schedules only with [`PersonalizedWaterings::Remove`].
    pub fn confirm_irrigation_save(
        &mut self,
        plant: &PlantId,
        pending: PendingSave,
        personalized: PersonalizedWaterings,
    ) -> Result<IrrigationConfig> {
        pending.draft.validate()?;

        self.clear_irrigation_customizations(plant);

        if personalized == PersonalizedWaterings::Remove {
            let today = self.today();
            self.remove_future_manual_occurrences(plant, today);
            self.store.remove(&store::recurrences_key(plant));
            info!(plant = %plant, "personalized schedules removed");
        }

        let current = self.irrigation_config(plant);
        Ok(self.write_irrigation_config(plant, current, pending.draft))
    }

    fn write_irrigation_config(
        &mut self,
        plant: &PlantId,
        mut config: IrrigationConfig,
        draft: IrrigationDraft,
    ) -> IrrigationConfig {
        config.weekly_watering = draft.weekly_watering;
        config.watering_time = draft.watering_time;
        config.enabled = true;
        config.last_updated = Some(self.now());
        self.store_irrigation_config(plant, &config);
        info!(
            plant = %plant,
            weekly = config.weekly_watering,
            time = %config.watering_time,
            "irrigation config saved"
        );
        config
    }

    // -- conflicts ----------------------------------------------------------

    /// The first schedule occupying `date`, checked in the order automatic,
    /// recurrence, manual. `exclude` skips one kind (the one being created).
    pub fn conflict_on(
        &self,
        plant: &PlantId,
        date: CalendarDate,
        exclude: Option<ScheduleKind>,
    ) -> Option<Conflict> {
        if exclude != Some(ScheduleKind::Automatic) && self.is_irrigation_day(plant, date) {
            return Some(Conflict {
                date,
                kind: ScheduleKind::Automatic,
                time: self.irrigation_config(plant).watering_time,
                rule_id: None,
            });
        }

        if exclude != Some(ScheduleKind::Recurrence) {
            if let Some(rule) = self.active_rules(plant).into_iter().find(|r| r.occurs_on(date)) {
                return Some(Conflict {
                    date,
                    kind: ScheduleKind::Recurrence,
                    time: rule.time,
                    rule_id: Some(rule.id),
                });
            }
        }

        if exclude != Some(ScheduleKind::Manual) {
            if let Some(w) = self.occurrence(plant, date).filter(WateringOccurrence::is_manual) {
                return Some(Conflict {
                    date,
                    kind: ScheduleKind::Manual,
                    time: w.time,
                    rule_id: None,
                });
            }
        }

        None
    }

    /// Conflicts a new rule would have over its next occurrences.
    pub fn recurrence_conflicts(
        &self,
        plant: &PlantId,
        start: CalendarDate,
        interval_days: u32,
    ) -> Result<Vec<Conflict>> {
        if interval_days < 1 {
            return Err(ScheduleError::InvalidInterval(interval_days));
        }
        let step = i64::from(interval_days);
        Ok((0..RECURRENCE_CONFLICT_OCCURRENCES)
            .filter_map(|i| self.conflict_on(plant, start.add_days(i * step), Some(ScheduleKind::Recurrence)))
            .collect())
    }

    /// Conflicts an automatic system at `weekly_watering` would have over the
    /// coming days.
    pub fn irrigation_conflicts(
        &self,
        plant: &PlantId,
        weekly_watering: u8,
        from: CalendarDate,
    ) -> Result<Vec<Conflict>> {
        if !(1..=7).contains(&weekly_watering) {
            return Err(ScheduleError::InvalidWeeklyWatering(weekly_watering));
        }
        let weekdays = irrigation_weekdays(weekly_watering);
        Ok((0..IRRIGATION_CONFLICT_DAYS)
            .map(|i| from.add_days(i))
            .filter(|d| weekdays.contains(&d.weekday_from_sunday()))
            .filter_map(|d| self.conflict_on(plant, d, Some(ScheduleKind::Automatic)))
            .collect())
    }

    /// Make room for a new schedule: automatic conflicts disable the system,
    /// recurrence conflicts stop their rule, manual conflicts drop the entry.
    pub fn resolve_conflicts(&mut self, plant: &PlantId, conflicts: &[Conflict]) {
        for c in conflicts {
            match c.kind {
                ScheduleKind::Automatic => {
                    let mut config = self.irrigation_config(plant);
                    if config.enabled {
                        config.enabled = false;
                        self.store_irrigation_config(plant, &config);
                        info!(plant = %plant, "automatic irrigation disabled to resolve conflict");
                    }
                }
                ScheduleKind::Recurrence => {
                    if let Some(id) = &c.rule_id {
                        self.deactivate_rule(plant, id);
                    }
                }
                ScheduleKind::Manual => {
                    let mut list = self.occurrences(plant);
                    let before = list.len();
                    list.retain(|w| w.date != c.date || !w.is_manual());
                    if list.len() != before {
                        self.save_occurrences(plant, &list);
                        info!(plant = %plant, date = %c.date, "manual watering removed to resolve conflict");
                    }
                }
            }
        }
    }

    /// Wipe every schedule of the plant. The automatic config stays behind,
    /// disabled with no frequency.
    pub fn clear_all_schedules(&mut self, plant: &PlantId) {
        self.remove_irrigation_system(plant);
        self.store.remove(&store::watering_key(plant));
        self.store.remove(&store::recurrences_key(plant));
        self.store.remove(&store::irrigation_exceptions_key(plant));
        info!(plant = %plant, "all schedules cleared");
    }

    pub fn schedule_summary(&self, plant: &PlantId, today: CalendarDate) -> ScheduleSummary {
        ScheduleSummary {
            irrigation: self.irrigation_config(plant),
            next_irrigation: self.next_irrigation_dates(plant, today),
            active_rules: self.active_rules(plant).len(),
            upcoming: self.upcoming_occurrences(plant, today, UPCOMING_LIMIT),
            customizations: self.irrigation_customizations(plant),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
