//! Recurrence rules (`watering_recurrences_<plantId>`).

use tracing::{debug, info};

use crate::error::{Result, ScheduleError};
use crate::model::{CalendarDate, PlantId, RecurrenceRule, TimeOfDay};
use crate::store::{self, KeyValueStore};
use crate::Planner;

impl RecurrenceRule {
    /// True when the rule generates an occurrence on `date`: on or after the
    /// start, a whole number of intervals away, and not skipped. The active
    /// flag is the caller's concern. A stored interval of 0 never matches.
    pub fn occurs_on(&self, date: CalendarDate) -> bool {
        if self.interval_days == 0 || date < self.start_date {
            return false;
        }
        if self.excluded_dates.contains(&date) {
            return false;
        }
        date.days_since(self.start_date) % i64::from(self.interval_days) == 0
    }

    /// The first `count` dates the rule would generate, ignoring exclusions.
    pub fn upcoming_dates(&self, count: usize) -> Vec<CalendarDate> {
        let step = i64::from(self.interval_days.max(1));
        (0..count as i64)
            .map(|i| self.start_date.add_days(i * step))
            .collect()
    }
}

impl<S: KeyValueStore> Planner<S> {
    /// Every rule of the plant, in store order (which is also resolver
    /// priority order).
    pub fn rules(&self, plant: &PlantId) -> Vec<RecurrenceRule> {
        store::load_list(&self.store, &store::recurrences_key(plant))
    }

    pub fn active_rules(&self, plant: &PlantId) -> Vec<RecurrenceRule> {
        self.rules(plant).into_iter().filter(|r| r.active).collect()
    }

    pub(crate) fn save_rules(&mut self, plant: &PlantId, rules: &[RecurrenceRule]) {
        store::save(&mut self.store, &store::recurrences_key(plant), rules);
    }

    /// Append a new active rule and return its id.
    pub fn create_rule(
        &mut self,
        plant: &PlantId,
        start_date: CalendarDate,
        interval_days: u32,
        time: TimeOfDay,
    ) -> Result<String> {
        if interval_days < 1 {
            return Err(ScheduleError::InvalidInterval(interval_days));
        }

        let mut rules = self.rules(plant);

        // Millisecond stamp; bumped past any id already used by this plant.
        let mut stamp = (self.now().unix_timestamp_nanos() / 1_000_000) as i64;
        while rules.iter().any(|r| r.id == stamp.to_string()) {
            stamp += 1;
        }
        let id = stamp.to_string();

        rules.push(RecurrenceRule {
            id: id.clone(),
            start_date,
            interval_days,
            time,
            active: true,
            excluded_dates: Vec::new(),
        });
        self.save_rules(plant, &rules);

        info!(
            plant = %plant,
            rule = %id,
            start = %start_date,
            interval_days,
            time = %time,
            "recurrence created"
        );
        Ok(id)
    }

    /// Stop a rule from generating further occurrences. There is no way back.
    pub fn deactivate_rule(&mut self, plant: &PlantId, rule_id: &str) -> bool {
        let mut rules = self.rules(plant);
        let Some(rule) = rules.iter_mut().find(|r| r.id == rule_id) else {
            debug!(plant = %plant, rule = %rule_id, "deactivate_rule: unknown rule");
            return false;
        };
        rule.active = false;
        self.save_rules(plant, &rules);
        info!(plant = %plant, rule = %rule_id, "recurrence stopped");
        true
    }

    /// Skip a single occurrence of a rule. Idempotent.
    pub fn exclude_occurrence(&mut self, plant: &PlantId, rule_id: &str, date: CalendarDate) -> bool {
        let mut rules = self.rules(plant);
        let Some(rule) = rules.iter_mut().find(|r| r.id == rule_id) else {
            debug!(plant = %plant, rule = %rule_id, "exclude_occurrence: unknown rule");
            return false;
        };
        if rule.excluded_dates.contains(&date) {
            return false;
        }
        rule.excluded_dates.push(date);
        self.save_rules(plant, &rules);
        info!(plant = %plant, rule = %rule_id, date = %date, "recurrence occurrence skipped");
        true
    }

    /// Remove a rule entirely, history included.
    pub fn delete_rule(&mut self, plant: &PlantId, rule_id: &str) -> bool {
        let mut rules = self.rules(plant);
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        if rules.len() == before {
            return false;
        }
        self.save_rules(plant, &rules);
        info!(plant = %plant, rule = %rule_id, "recurrence deleted");
        true
    }

    /// Empty every rule's exclusion list. Returns how many dates were dropped.
    pub(crate) fn clear_rule_exclusions(&mut self, plant: &PlantId) -> usize {
        let mut rules = self.rules(plant);
        let cleared: usize = rules.iter().map(|r| r.excluded_dates.len()).sum();
        if cleared > 0 {
            rules.iter_mut().for_each(|r| r.excluded_dates.clear());
            self.save_rules(plant, &rules);
        }
        cleared
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use crate::testutil::{at, date, planner, plant};
    use crate::{RecurrenceRule, ScheduleError};

    fn rule(start: &str, interval: u32) -> RecurrenceRule {
        RecurrenceRule {
            id: "r".into(),
            start_date: date(start),
            interval_days: interval,
            time: at("08:00"),
            active: true,
            excluded_dates: vec![],
        }
    }

    // -- occurs_on --------------------------------------------------------------

    #[test]
    fn occurs_every_interval_from_start() {
        let r = rule("2024-01-01", 3);
        assert!(r.occurs_on(date("2024-01-01")));
        assert!(r.occurs_on(date("2024-01-04")));
        assert!(!r.occurs_on(date("2024-01-05")));
        assert!(r.occurs_on(date("2024-01-31")));
    }

    #[test]
    fn never_occurs_before_start() {
        let r = rule("2024-01-10", 1);
        assert!(!r.occurs_on(date("2024-01-09")));
        assert!(!r.occurs_on(date("2023-12-31")));
    }

    #[test]
    fn excluded_date_does_not_occur() {
        let mut r = rule("2024-01-01", 2);
        r.excluded_dates.push(date("2024-01-03"));
        assert!(!r.occurs_on(date("2024-01-03")));
        assert!(r.occurs_on(date("2024-01-05")));
    }

    #[test]
    fn zero_interval_never_occurs() {
        let r = rule("2024-01-01", 0);
        assert!(!r.occurs_on(date("2024-01-01")));
    }

    #[test]
    fn upcoming_dates_step_by_interval() {
        let r = rule("2024-01-30", 2);
        let got: Vec<String> = r.upcoming_dates(3).iter().map(|d| d.to_string()).collect();
        assert_eq!(got, vec!["2024-01-30", "2024-02-01", "2024-02-03"]);
    }

    // -- create ---------------------------------------------------------------

    #[test]
    fn create_appends_active_rule() {
        let mut p = planner();
        let id = p.create_rule(&plant(), date("2024-01-01"), 3, at("08:00")).unwrap();

        let rules = p.rules(&plant());
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, id);
        assert!(rules[0].active);
        assert!(rules[0].excluded_dates.is_empty());
    }

    #[test]
    fn create_rejects_zero_interval() {
        let mut p = planner();
        let err = p.create_rule(&plant(), date("2024-01-01"), 0, at("08:00")).unwrap_err();
        assert_eq!(err, ScheduleError::InvalidInterval(0));
        assert!(p.rules(&plant()).is_empty());
    }

    #[test]
    fn ids_stay_unique_under_a_frozen_clock() {
        let mut p = planner();
        let a = p.create_rule(&plant(), date("2024-01-01"), 3, at("08:00")).unwrap();
        let b = p.create_rule(&plant(), date("2024-01-02"), 5, at("09:00")).unwrap();
        assert_ne!(a, b);
    }

    // -- deactivate / exclude / delete ----------------------------------------

    #[test]
    fn deactivate_keeps_rule_but_hides_it_from_active() {
        let mut p = planner();
        let id = p.create_rule(&plant(), date("2024-01-01"), 3, at("08:00")).unwrap();

        assert!(p.deactivate_rule(&plant(), &id));
        assert_eq!(p.rules(&plant()).len(), 1);
        assert!(p.active_rules(&plant()).is_empty());
        assert!(!p.deactivate_rule(&plant(), "missing"));
    }

    #[test]
    fn exclude_is_idempotent() {
        let mut p = planner();
        let id = p.create_rule(&plant(), date("2024-01-01"), 3, at("08:00")).unwrap();

        assert!(p.exclude_occurrence(&plant(), &id, date("2024-01-04")));
        assert!(!p.exclude_occurrence(&plant(), &id, date("2024-01-04")));
        assert_eq!(p.rules(&plant())[0].excluded_dates, vec![date("2024-01-04")]);
    }

    #[test]
    fn delete_drops_rule() {
        let mut p = planner();
        let id = p.create_rule(&plant(), date("2024-01-01"), 3, at("08:00")).unwrap();
        assert!(p.delete_rule(&plant(), &id));
        assert!(p.rules(&plant()).is_empty());
        assert!(!p.delete_rule(&plant(), &id));
    }

    #[test]
    fn clear_exclusions_counts_dropped_dates() {
        let mut p = planner();
        let a = p.create_rule(&plant(), date("2024-01-01"), 3, at("08:00")).unwrap();
        let b = p.create_rule(&plant(), date("2024-01-01"), 2, at("08:00")).unwrap();
        p.exclude_occurrence(&plant(), &a, date("2024-01-04"));
        p.exclude_occurrence(&plant(), &b, date("2024-01-03"));
        p.exclude_occurrence(&plant(), &b, date("2024-01-05"));

        assert_eq!(p.clear_rule_exclusions(&plant()), 3);
        assert!(p.rules(&plant()).iter().all(|r| r.excluded_dates.is_empty()));
    }
}
