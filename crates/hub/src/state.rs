use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use watering_schedule::reconcile::Recommendation;
use watering_schedule::{MemoryStore, PlantId, Planner};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<HubState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct HubState {
    pub started_at: Instant,
    pub planner: Planner<MemoryStore>,
    /// Session-scoped records (the selected plant). Never persisted.
    pub session: MemoryStore,
    pub recommendation: Recommendation,
    pub events: VecDeque<ActivityEvent>,
}

#[derive(Clone, Serialize)]
pub struct ActivityEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plant: Option<String>,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Watering,
    Recurrence,
    Irrigation,
    Plant,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub plants: usize,
    pub records: usize,
    pub events: Vec<ActivityEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl HubState {
    pub fn new(planner: Planner<MemoryStore>, recommendation: Recommendation) -> Self {
        Self {
            started_at: Instant::now(),
            planner,
            session: MemoryStore::new(),
            recommendation,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    /// Record a schedule change for one plant.
    pub fn record(&mut self, kind: EventKind, plant: &PlantId, detail: String) {
        self.push_event(kind, Some(plant.to_string()), detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, None, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            plants: self.planner.plants().len(),
            records: self.planner.store().len(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, plant: Option<String>, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(ActivityEvent {
            ts: self.planner.now(),
            kind,
            plant,
            detail,
        });
    }
}
