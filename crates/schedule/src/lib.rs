//! Watering schedule core for the plant-care app.
//!
//! Per plant, three record kinds live in an injected [`KeyValueStore`]:
//! concrete watering entries, recurrence rules, and the automatic irrigation
//! config (with its skipped days). The [`Planner`] owns the store and answers
//! "what happens on this day" queries, applies mutations, and runs the
//! reconciliation flows between manual and automatic scheduling.
//!
//! ```text
//!   watering_<id>              ──┐
//!   watering_recurrences_<id>  ──┼──▶ resolver ──▶ DayState ──▶ calendar view
//!   irrigation_config_<id>     ──┤
//!   irrigation_exceptions_<id> ──┘
//! ```

pub mod calendar;
pub mod clock;
pub mod error;
pub mod irrigation;
pub mod model;
pub mod occurrence;
pub mod overview;
pub mod plants;
pub mod recurrence;
pub mod reconcile;
pub mod resolver;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{Result, ScheduleError};
pub use model::{
    CalendarDate, EntrySource, IrrigationConfig, Plant, PlantId, RecurrenceRule, SensorStatus,
    TimeOfDay, WateringOccurrence, DEFAULT_WATERING_TIME,
};
pub use resolver::DayState;
pub use store::{KeyValueStore, MemoryStore};

use time::OffsetDateTime;

/// Scheduling core bound to one store. All operations are synchronous
/// read-modify-write cycles over whole per-plant records; the last writer
/// wins.
pub struct Planner<S> {
    store: S,
    clock: Box<dyn Clock>,
}

impl<S: KeyValueStore> Planner<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }

    pub fn with_clock(store: S, clock: impl Clock + 'static) -> Self {
        Self {
            store,
            clock: Box::new(clock),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    pub fn today(&self) -> CalendarDate {
        self.clock.today()
    }
}
