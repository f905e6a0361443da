use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post, put};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use watering_schedule::calendar::MonthView;
use watering_schedule::irrigation::ProjectedWatering;
use watering_schedule::overview::DailyOverview;
use watering_schedule::plants::{select_plant, selected_plant};
use watering_schedule::reconcile::{
    Conflict, ConflictChoice, ConflictResolution, DiagnosisOutcome, IrrigationDraft, PendingSave,
    PersonalizedWaterings, SaveOutcome, ScheduleKind, ScheduleMode, ScheduleSummary,
};
use watering_schedule::{
    CalendarDate, DayState, IrrigationConfig, Plant, PlantId, RecurrenceRule, ScheduleError,
    TimeOfDay, WateringOccurrence, DEFAULT_WATERING_TIME,
};

use crate::db::Db;
use crate::state::{EventKind, HubState, SharedState, StatusResponse};

#[derive(Clone)]
pub struct AppState {
    pub hub: SharedState,
    pub db: Db,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<ScheduleError> for ApiError {
    fn from(e: ScheduleError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(e) => {
                tracing::error!("request failed: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn require_plant(hub: &HubState, id: &str) -> Result<PlantId, ApiError> {
    let id = PlantId::new(id);
    if hub.planner.plant(&id).is_none() {
        return Err(ApiError::NotFound(format!("unknown plant '{id}'")));
    }
    Ok(id)
}

fn parse_date(raw: &str) -> Result<CalendarDate, ApiError> {
    Ok(raw.parse::<CalendarDate>()?)
}

/// Write the records the last mutation touched back to SQLite.
async fn flush(db: &Db, hub: &mut HubState) -> Result<(), ApiError> {
    db.persist_dirty(hub.planner.store_mut())
        .await
        .map_err(ApiError::Internal)
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddOccurrenceBody {
    date: CalendarDate,
    time: Option<TimeOfDay>,
}

#[derive(Deserialize)]
struct TimeBody {
    time: TimeOfDay,
}

#[derive(Deserialize)]
struct CompleteBody {
    time: Option<TimeOfDay>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRuleBody {
    start_date: CalendarDate,
    interval_days: u32,
    time: Option<TimeOfDay>,
}

#[derive(Deserialize)]
struct DateBody {
    date: CalendarDate,
}

#[derive(Deserialize)]
struct EnabledBody {
    enabled: bool,
}

#[derive(Deserialize)]
struct ConfirmBody {
    pending: PendingSave,
    #[serde(default)]
    personalized: PersonalizedWaterings,
}

#[derive(Deserialize)]
struct DiagnosisBody {
    mode: ScheduleMode,
}

#[derive(Deserialize)]
struct SelectBody {
    id: PlantId,
}

/// What the client is about to create, to be checked against existing
/// schedules.
#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
enum ConflictCheck {
    Recurrence {
        start_date: CalendarDate,
        interval_days: u32,
    },
    Automatic {
        weekly_watering: u8,
        from: Option<CalendarDate>,
    },
    Manual {
        date: CalendarDate,
    },
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/session/plant", get(get_selected).put(put_selected))
        .route("/api/overview", get(overview_today))
        .route("/api/overview/{date}", get(overview_on))
        .route("/api/plants", get(list_plants).post(upsert_plant))
        .route("/api/plants/{id}", delete(remove_plant))
        .route("/api/plants/{id}/days/{date}", get(resolve_day))
        .route("/api/plants/{id}/calendar/{year}/{month}", get(month_view))
        .route("/api/plants/{id}/summary", get(summary))
        .route("/api/plants/{id}/schedules", delete(clear_schedules))
        .route(
            "/api/plants/{id}/occurrences",
            get(list_occurrences).post(add_occurrence),
        )
        .route("/api/plants/{id}/occurrences/{date}", delete(remove_occurrence))
        .route("/api/plants/{id}/occurrences/{date}/time", put(update_time))
        .route("/api/plants/{id}/occurrences/{date}/complete", post(complete))
        .route("/api/plants/{id}/rules", get(list_rules).post(create_rule))
        .route("/api/plants/{id}/rules/{rule}", delete(delete_rule))
        .route("/api/plants/{id}/rules/{rule}/deactivate", post(deactivate_rule))
        .route("/api/plants/{id}/rules/{rule}/exclusions", post(exclude_occurrence))
        .route(
            "/api/plants/{id}/irrigation",
            get(get_irrigation)
                .put(save_irrigation)
                .delete(remove_irrigation),
        )
        .route("/api/plants/{id}/irrigation/confirm", post(confirm_irrigation))
        .route("/api/plants/{id}/irrigation/enabled", put(set_irrigation_enabled))
        .route("/api/plants/{id}/irrigation/next", get(next_irrigation))
        .route("/api/plants/{id}/irrigation/exceptions", post(skip_irrigation_day))
        .route(
            "/api/plants/{id}/irrigation/overrides/{date}",
            put(override_irrigation_time).delete(restore_irrigation_time),
        )
        .route("/api/plants/{id}/conflicts", post(check_conflicts))
        .route("/api/plants/{id}/conflicts/resolve", post(resolve_conflicts))
        .route("/api/plants/{id}/diagnosis", post(diagnosis))
        .route("/api/plants/{id}/diagnosis/conflict", post(diagnosis_conflict))
        .with_state(state)
}

// -- status / session / directory -------------------------------------------

async fn api_status(State(app): State<AppState>) -> Json<StatusResponse> {
    let hub = app.hub.read().await;
    Json(hub.to_status())
}

async fn get_selected(State(app): State<AppState>) -> Json<Value> {
    let hub = app.hub.read().await;
    Json(json!({ "id": selected_plant(&hub.session) }))
}

async fn put_selected(State(app): State<AppState>, Json(body): Json<SelectBody>) -> ApiResult<Value> {
    let mut hub = app.hub.write().await;
    let id = require_plant(&hub, body.id.as_str())?;
    select_plant(&mut hub.session, &id);
    Ok(Json(json!({ "id": id })))
}

async fn overview_today(State(app): State<AppState>) -> Json<DailyOverview> {
    let hub = app.hub.read().await;
    let today = hub.planner.today();
    Json(hub.planner.daily_overview(today))
}

async fn overview_on(State(app): State<AppState>, Path(date): Path<String>) -> ApiResult<DailyOverview> {
    let hub = app.hub.read().await;
    let date = parse_date(&date)?;
    Ok(Json(hub.planner.daily_overview(date)))
}

async fn list_plants(State(app): State<AppState>) -> Json<Vec<Plant>> {
    let hub = app.hub.read().await;
    Json(hub.planner.plants())
}

async fn upsert_plant(State(app): State<AppState>, Json(plant): Json<Plant>) -> ApiResult<Value> {
    if plant.id.as_str().trim().is_empty() || plant.name.trim().is_empty() {
        return Err(ApiError::BadRequest("plant id and name are required".into()));
    }
    let mut hub = app.hub.write().await;
    let id = plant.id.clone();
    let created = hub.planner.upsert_plant(plant);
    hub.record(
        EventKind::Plant,
        &id,
        if created { "plant added" } else { "plant updated" }.to_string(),
    );
    flush(&app.db, &mut hub).await?;
    Ok(Json(json!({ "id": id, "created": created })))
}

async fn remove_plant(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    hub.planner.remove_plant(&plant);
    hub.record(EventKind::Plant, &plant, "plant removed".into());
    flush(&app.db, &mut hub).await?;
    Ok(Json(json!({ "removed": true })))
}

// -- reads --------------------------------------------------------------------

async fn resolve_day(
    State(app): State<AppState>,
    Path((id, date)): Path<(String, String)>,
) -> ApiResult<DayState> {
    // Reads never fail on a plant missing from the directory; it simply has
    // nothing scheduled.
    let hub = app.hub.read().await;
    let date = parse_date(&date)?;
    Ok(Json(hub.planner.resolve_day(&PlantId::new(id), date)))
}

async fn month_view(
    State(app): State<AppState>,
    Path((id, year, month)): Path<(String, String, String)>,
) -> ApiResult<MonthView> {
    let hub = app.hub.read().await;
    let plant = require_plant(&hub, &id)?;
    let (Ok(year), Ok(month)) = (year.parse::<i32>(), month.parse::<u8>()) else {
        return Err(ApiError::BadRequest(format!("invalid calendar month {year}-{month}")));
    };
    Ok(Json(hub.planner.month_view(&plant, year, month)?))
}

async fn summary(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<ScheduleSummary> {
    let hub = app.hub.read().await;
    let plant = require_plant(&hub, &id)?;
    Ok(Json(hub.planner.schedule_summary(&plant, hub.planner.today())))
}

async fn list_occurrences(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<WateringOccurrence>> {
    let hub = app.hub.read().await;
    let plant = require_plant(&hub, &id)?;
    Ok(Json(hub.planner.occurrences(&plant)))
}

async fn list_rules(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<Vec<RecurrenceRule>> {
    let hub = app.hub.read().await;
    let plant = require_plant(&hub, &id)?;
    Ok(Json(hub.planner.rules(&plant)))
}

async fn get_irrigation(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<IrrigationConfig> {
    let hub = app.hub.read().await;
    let plant = require_plant(&hub, &id)?;
    Ok(Json(hub.planner.irrigation_config(&plant)))
}

async fn next_irrigation(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<ProjectedWatering>> {
    let hub = app.hub.read().await;
    let plant = require_plant(&hub, &id)?;
    Ok(Json(hub.planner.next_irrigation_dates(&plant, hub.planner.today())))
}

// -- occurrences ----------------------------------------------------------------

async fn add_occurrence(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AddOccurrenceBody>,
) -> ApiResult<Value> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    let time = body.time.unwrap_or(DEFAULT_WATERING_TIME);
    let added = hub.planner.add_occurrence(&plant, body.date, time);
    if added {
        hub.record(EventKind::Watering, &plant, format!("scheduled {} at {time}", body.date));
    }
    flush(&app.db, &mut hub).await?;
    Ok(Json(json!({ "added": added })))
}

async fn remove_occurrence(
    State(app): State<AppState>,
    Path((id, date)): Path<(String, String)>,
) -> ApiResult<Value> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    let date = parse_date(&date)?;
    let removed = hub.planner.remove_occurrence(&plant, date);
    if removed {
        hub.record(EventKind::Watering, &plant, format!("removed {date}"));
    }
    flush(&app.db, &mut hub).await?;
    Ok(Json(json!({ "removed": removed })))
}

async fn update_time(
    State(app): State<AppState>,
    Path((id, date)): Path<(String, String)>,
    Json(body): Json<TimeBody>,
) -> ApiResult<Value> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    let date = parse_date(&date)?;
    let updated = hub.planner.update_occurrence_time(&plant, date, body.time);
    if updated {
        hub.record(EventKind::Watering, &plant, format!("{date} moved to {}", body.time));
    }
    flush(&app.db, &mut hub).await?;
    Ok(Json(json!({ "updated": updated })))
}

async fn complete(
    State(app): State<AppState>,
    Path((id, date)): Path<(String, String)>,
    Json(body): Json<CompleteBody>,
) -> ApiResult<WateringOccurrence> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    let date = parse_date(&date)?;
    let time = body.time.unwrap_or_else(|| {
        hub.planner
            .resolve_calendar_day(&plant, date)
            .time()
            .unwrap_or(DEFAULT_WATERING_TIME)
    });
    let done = hub.planner.mark_completed(&plant, date, time);
    hub.record(EventKind::Watering, &plant, format!("watered on {date}"));
    flush(&app.db, &mut hub).await?;
    Ok(Json(done))
}

async fn clear_schedules(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    hub.planner.clear_all_schedules(&plant);
    hub.record(EventKind::Watering, &plant, "all schedules cleared".into());
    flush(&app.db, &mut hub).await?;
    Ok(Json(json!({ "cleared": true })))
}

// -- recurrence rules -----------------------------------------------------------

async fn create_rule(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CreateRuleBody>,
) -> ApiResult<Value> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    let time = body.time.unwrap_or(DEFAULT_WATERING_TIME);
    let rule_id = hub
        .planner
        .create_rule(&plant, body.start_date, body.interval_days, time)?;
    hub.record(
        EventKind::Recurrence,
        &plant,
        format!("every {} day(s) from {} at {time}", body.interval_days, body.start_date),
    );
    flush(&app.db, &mut hub).await?;
    Ok(Json(json!({ "id": rule_id })))
}

async fn deactivate_rule(
    State(app): State<AppState>,
    Path((id, rule)): Path<(String, String)>,
) -> ApiResult<Value> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    if !hub.planner.deactivate_rule(&plant, &rule) {
        return Err(ApiError::NotFound(format!("unknown rule '{rule}'")));
    }
    hub.record(EventKind::Recurrence, &plant, format!("rule {rule} stopped"));
    flush(&app.db, &mut hub).await?;
    Ok(Json(json!({ "active": false })))
}

async fn delete_rule(
    State(app): State<AppState>,
    Path((id, rule)): Path<(String, String)>,
) -> ApiResult<Value> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    if !hub.planner.delete_rule(&plant, &rule) {
        return Err(ApiError::NotFound(format!("unknown rule '{rule}'")));
    }
    hub.record(EventKind::Recurrence, &plant, format!("rule {rule} deleted"));
    flush(&app.db, &mut hub).await?;
    Ok(Json(json!({ "deleted": true })))
}

async fn exclude_occurrence(
    State(app): State<AppState>,
    Path((id, rule)): Path<(String, String)>,
    Json(body): Json<DateBody>,
) -> ApiResult<Value> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    if !hub.planner.rules(&plant).iter().any(|r| r.id == rule) {
        return Err(ApiError::NotFound(format!("unknown rule '{rule}'")));
    }
    let excluded = hub.planner.exclude_occurrence(&plant, &rule, body.date);
    if excluded {
        hub.record(EventKind::Recurrence, &plant, format!("rule {rule} skips {}", body.date));
    }
    flush(&app.db, &mut hub).await?;
    Ok(Json(json!({ "excluded": excluded })))
}

// -- automatic irrigation -------------------------------------------------------

async fn save_irrigation(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(draft): Json<IrrigationDraft>,
) -> ApiResult<SaveOutcome> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    let outcome = hub.planner.save_irrigation_config(&plant, draft)?;
    if let SaveOutcome::Saved(c) = &outcome {
        let detail = format!("{}x per week at {}", c.weekly_watering, c.watering_time);
        hub.record(EventKind::Irrigation, &plant, detail);
    }
    flush(&app.db, &mut hub).await?;
    Ok(Json(outcome))
}

async fn confirm_irrigation(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ConfirmBody>,
) -> ApiResult<IrrigationConfig> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    let config = hub
        .planner
        .confirm_irrigation_save(&plant, body.pending, body.personalized)?;
    let detail = format!(
        "{}x per week at {} (customizations cleared)",
        config.weekly_watering, config.watering_time
    );
    hub.record(EventKind::Irrigation, &plant, detail);
    flush(&app.db, &mut hub).await?;
    Ok(Json(config))
}

async fn set_irrigation_enabled(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<EnabledBody>,
) -> ApiResult<IrrigationConfig> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    let config = hub.planner.set_irrigation_enabled(&plant, body.enabled)?;
    let detail = if body.enabled { "enabled" } else { "disabled" };
    hub.record(EventKind::Irrigation, &plant, detail.to_string());
    flush(&app.db, &mut hub).await?;
    Ok(Json(config))
}

async fn remove_irrigation(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<IrrigationConfig> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    hub.planner.remove_irrigation_system(&plant);
    hub.record(EventKind::Irrigation, &plant, "removed".into());
    flush(&app.db, &mut hub).await?;
    Ok(Json(hub.planner.irrigation_config(&plant)))
}

async fn skip_irrigation_day(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DateBody>,
) -> ApiResult<Value> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    let skipped = hub.planner.skip_irrigation_day(&plant, body.date);
    if skipped {
        hub.record(EventKind::Irrigation, &plant, format!("skips {}", body.date));
    }
    flush(&app.db, &mut hub).await?;
    Ok(Json(json!({ "skipped": skipped })))
}

async fn override_irrigation_time(
    State(app): State<AppState>,
    Path((id, date)): Path<(String, String)>,
    Json(body): Json<TimeBody>,
) -> ApiResult<Value> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    let date = parse_date(&date)?;
    hub.planner.override_irrigation_time(&plant, date, body.time);
    hub.record(EventKind::Irrigation, &plant, format!("{date} at {}", body.time));
    flush(&app.db, &mut hub).await?;
    Ok(Json(json!({ "date": date, "time": body.time })))
}

async fn restore_irrigation_time(
    State(app): State<AppState>,
    Path((id, date)): Path<(String, String)>,
) -> ApiResult<Value> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    let date = parse_date(&date)?;
    let restored = hub.planner.restore_irrigation_time(&plant, date);
    if restored {
        hub.record(EventKind::Irrigation, &plant, format!("{date} back to configured time"));
    }
    flush(&app.db, &mut hub).await?;
    Ok(Json(json!({ "restored": restored })))
}

// -- conflicts & diagnosis ------------------------------------------------------

async fn check_conflicts(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(check): Json<ConflictCheck>,
) -> ApiResult<Vec<Conflict>> {
    let hub = app.hub.read().await;
    let plant = require_plant(&hub, &id)?;
    let conflicts = match check {
        ConflictCheck::Recurrence {
            start_date,
            interval_days,
        } => hub
            .planner
            .recurrence_conflicts(&plant, start_date, interval_days)?,
        ConflictCheck::Automatic {
            weekly_watering,
            from,
        } => {
            let from = from.unwrap_or_else(|| hub.planner.today());
            hub.planner.irrigation_conflicts(&plant, weekly_watering, from)?
        }
        ConflictCheck::Manual { date } => hub
            .planner
            .conflict_on(&plant, date, Some(ScheduleKind::Manual))
            .into_iter()
            .collect(),
    };
    Ok(Json(conflicts))
}

async fn resolve_conflicts(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(conflicts): Json<Vec<Conflict>>,
) -> ApiResult<Value> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    hub.planner.resolve_conflicts(&plant, &conflicts);
    hub.record(
        EventKind::Watering,
        &plant,
        format!("{} conflict(s) resolved", conflicts.len()),
    );
    flush(&app.db, &mut hub).await?;
    Ok(Json(json!({ "resolved": conflicts.len() })))
}

async fn diagnosis(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DiagnosisBody>,
) -> ApiResult<DiagnosisOutcome> {
    let hub = app.hub.read().await;
    let plant = require_plant(&hub, &id)?;
    Ok(Json(hub.planner.schedule_from_diagnosis(
        &plant,
        body.mode,
        &hub.recommendation,
    )))
}

async fn diagnosis_conflict(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(choice): Json<ConflictChoice>,
) -> ApiResult<ConflictResolution> {
    let mut hub = app.hub.write().await;
    let plant = require_plant(&hub, &id)?;
    let rec = hub.recommendation;
    let resolution = hub.planner.resolve_automatic_conflict(&plant, choice, &rec);
    match &resolution {
        ConflictResolution::ManualCalendar { .. } => {
            hub.record(EventKind::Irrigation, &plant, "disabled for manual scheduling".into());
        }
        ConflictResolution::AutomaticKept { config } => {
            let detail = format!("kept at {}x per week", config.weekly_watering);
            hub.record(EventKind::Irrigation, &plant, detail);
        }
        ConflictResolution::Cancelled => {}
    }
    flush(&app.db, &mut hub).await?;
    Ok(Json(resolution))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    tracing::info!(%addr, "web api listening");

    axum::serve(listener, router(state))
        .await
        .context("web server error")?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use time::macros::datetime;
    use tower::ServiceExt;
    use watering_schedule::reconcile::Recommendation;
    use watering_schedule::{FixedClock, MemoryStore, Planner};

    async fn test_app() -> (Router, AppState) {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();

        // Wednesday.
        let mut planner = Planner::with_clock(
            MemoryStore::new(),
            FixedClock(datetime!(2024-01-10 10:00 UTC)),
        );
        planner.upsert_plant(Plant::new("p1", "Fern"));
        db.persist_dirty(planner.store_mut()).await.unwrap();

        let state = AppState {
            hub: HubState::new(planner, Recommendation::default()).shared(),
            db,
        };
        (router(state.clone()), state)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    // -- status & directory ---------------------------------------------------

    #[tokio::test]
    async fn status_reports_plants_and_activity() {
        let (app, _) = test_app().await;
        send(&app, "POST", "/api/plants/p1/occurrences", Some(json!({ "date": "2024-01-12" }))).await;

        let (status, v) = send(&app, "GET", "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["plants"], 1);
        assert_eq!(v["events"][0]["kind"], "watering");
        assert_eq!(v["events"][0]["plant"], "p1");
    }

    #[tokio::test]
    async fn unknown_plant_is_404_for_mutations() {
        let (app, _) = test_app().await;
        let body = json!({ "date": "2024-01-12" });
        let (status, v) = send(&app, "POST", "/api/plants/nope/occurrences", Some(body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(v["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn unknown_plant_day_resolves_empty() {
        let (app, _) = test_app().await;
        let (status, v) = send(&app, "GET", "/api/plants/nope/days/2024-01-04", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["state"], "empty");
    }

    #[tokio::test]
    async fn overview_counts_todays_waterings() {
        let (app, _) = test_app().await;
        let (_, v) = send(&app, "GET", "/api/overview", None).await;
        assert_eq!(v["date"], "2024-01-10");
        assert_eq!(v["fromSchedule"], false);
        assert_eq!(v["needsWatering"], 1);
        assert_eq!(v["plants"][0]["status"], "overdue");

        send(&app, "POST", "/api/plants/p1/occurrences", Some(json!({ "date": "2024-01-10" }))).await;
        let (_, v) = send(&app, "GET", "/api/overview", None).await;
        assert_eq!(v["fromSchedule"], true);
        assert_eq!(v["plants"][0]["status"], "scheduled");

        send(&app, "POST", "/api/plants/p1/occurrences/2024-01-10/complete", Some(json!({}))).await;
        let (_, v) = send(&app, "GET", "/api/overview/2024-01-10", None).await;
        assert_eq!(v["wateredToday"], 1);
        assert_eq!(v["plants"][0]["daysSinceWatering"], 0);

        let (status, _) = send(&app, "GET", "/api/overview/not-a-date", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn session_selection() {
        let (app, _) = test_app().await;
        let (_, v) = send(&app, "GET", "/api/session/plant", None).await;
        assert!(v["id"].is_null());

        let (status, _) = send(&app, "PUT", "/api/session/plant", Some(json!({ "id": "p1" }))).await;
        assert_eq!(status, StatusCode::OK);
        let (_, v) = send(&app, "GET", "/api/session/plant", None).await;
        assert_eq!(v["id"], "p1");

        let (status, _) = send(&app, "PUT", "/api/session/plant", Some(json!({ "id": "zz" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upsert_plant_persists() {
        let (app, state) = test_app().await;
        let (status, v) = send(&app, "POST", "/api/plants", Some(json!({ "id": 7, "name": "Cactus" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["created"], true);

        let (_, v) = send(&app, "GET", "/api/plants", None).await;
        assert_eq!(v.as_array().unwrap().len(), 2);
        let raw = state.db.get("myPlants").await.unwrap().unwrap();
        assert!(raw.contains("Cactus"));
    }

    // -- occurrences ----------------------------------------------------------

    #[tokio::test]
    async fn add_then_resolve_then_persisted() {
        let (app, state) = test_app().await;
        let (status, v) = send(
            &app,
            "POST",
            "/api/plants/p1/occurrences",
            Some(json!({ "date": "2024-01-12", "time": "07:30" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["added"], true);

        let (_, v) = send(&app, "GET", "/api/plants/p1/days/2024-01-12", None).await;
        assert_eq!(v["state"], "concrete");
        assert_eq!(v["time"], "07:30");

        let raw = state.db.get("watering_p1").await.unwrap().unwrap();
        assert!(raw.contains("2024-01-12"));
    }

    #[tokio::test]
    async fn bad_path_date_is_400() {
        let (app, _) = test_app().await;
        let (status, v) = send(&app, "GET", "/api/plants/p1/days/2024-13-40", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(v["error"].as_str().unwrap().contains("invalid date"));
    }

    #[tokio::test]
    async fn complete_materializes_recurrence_day() {
        let (app, state) = test_app().await;
        let (status, _) = send(
            &app,
            "POST",
            "/api/plants/p1/rules",
            Some(json!({ "startDate": "2024-01-01", "intervalDays": 3, "time": "08:00" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, v) = send(&app, "POST", "/api/plants/p1/occurrences/2024-01-04/complete", Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["completed"], true);
        assert_eq!(v["source"], "recurrence");
        assert_eq!(v["time"], "08:00");

        let hub = state.hub.read().await;
        assert!(hub.planner.occurrence(&"p1".into(), "2024-01-04".parse().unwrap()).is_some());
    }

    // -- rules ----------------------------------------------------------------

    #[tokio::test]
    async fn zero_interval_rule_is_400() {
        let (app, _) = test_app().await;
        let (status, v) = send(
            &app,
            "POST",
            "/api/plants/p1/rules",
            Some(json!({ "startDate": "2024-01-01", "intervalDays": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(v["error"].as_str().unwrap().contains("at least 1"));
    }

    #[tokio::test]
    async fn unknown_rule_is_404() {
        let (app, _) = test_app().await;
        let (status, _) = send(&app, "POST", "/api/plants/p1/rules/123/deactivate", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // -- irrigation save / confirm --------------------------------------------

    #[tokio::test]
    async fn irrigation_save_with_exceptions_needs_confirmation() {
        let (app, state) = test_app().await;

        let (_, v) = send(
            &app,
            "PUT",
            "/api/plants/p1/irrigation",
            Some(json!({ "weeklyWatering": 7, "wateringTime": "07:00" })),
        )
        .await;
        assert_eq!(v["outcome"], "saved");
        assert_eq!(v["detail"]["enabled"], true);

        send(&app, "POST", "/api/plants/p1/irrigation/exceptions", Some(json!({ "date": "2024-01-12" }))).await;
        send(&app, "PUT", "/api/plants/p1/irrigation/overrides/2024-01-13", Some(json!({ "time": "21:00" }))).await;
        send(&app, "POST", "/api/plants/p1/occurrences/2024-01-08/complete", Some(json!({ "time": "08:00" }))).await;

        let (_, v) = send(
            &app,
            "PUT",
            "/api/plants/p1/irrigation",
            Some(json!({ "weeklyWatering": 3, "wateringTime": "07:00" })),
        )
        .await;
        assert_eq!(v["outcome"], "needs_confirmation");
        assert_eq!(v["detail"]["customizations"]["exceptions"], 1);
        assert!(state.db.get("irrigation_exceptions_p1").await.unwrap().is_some());

        let pending = v["detail"].clone();
        let (status, v) = send(
            &app,
            "POST",
            "/api/plants/p1/irrigation/confirm",
            Some(json!({ "pending": pending, "personalized": "keep" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["weeklyWatering"], 3);

        assert!(state.db.get("irrigation_exceptions_p1").await.unwrap().is_none());
        let raw = state.db.get("watering_p1").await.unwrap().unwrap();
        assert!(raw.contains("2024-01-08"));
        assert!(!raw.contains("irrigation_override"));
    }

    #[tokio::test]
    async fn invalid_frequency_is_400() {
        let (app, _) = test_app().await;
        let (status, _) = send(
            &app,
            "PUT",
            "/api/plants/p1/irrigation",
            Some(json!({ "weeklyWatering": 9, "wateringTime": "07:00" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn toggle_unconfigured_irrigation_is_400() {
        let (app, _) = test_app().await;
        let (status, _) = send(&app, "PUT", "/api/plants/p1/irrigation/enabled", Some(json!({ "enabled": true }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // -- calendar, diagnosis, conflicts ---------------------------------------

    #[tokio::test]
    async fn calendar_month() {
        let (app, _) = test_app().await;
        let (status, v) = send(&app, "GET", "/api/plants/p1/calendar/2024/2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["leadingBlanks"], 4);
        assert_eq!(v["days"].as_array().unwrap().len(), 29);

        let (status, _) = send(&app, "GET", "/api/plants/p1/calendar/2024/13", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn diagnosis_flow_with_automatic_running() {
        let (app, _) = test_app().await;
        send(
            &app,
            "PUT",
            "/api/plants/p1/irrigation",
            Some(json!({ "weeklyWatering": 3, "wateringTime": "07:00" })),
        )
        .await;

        let (_, v) = send(&app, "POST", "/api/plants/p1/diagnosis", Some(json!({ "mode": "manual" }))).await;
        assert_eq!(v["outcome"], "automatic_conflict");
        assert_eq!(v["weeklyWatering"], 3);

        let (_, v) = send(
            &app,
            "POST",
            "/api/plants/p1/diagnosis/conflict",
            Some(json!({ "choice": "disable_automatic" })),
        )
        .await;
        assert_eq!(v["outcome"], "manual_calendar");
        assert_eq!(v["suggested"]["intervalDays"], 2);

        let (_, v) = send(&app, "GET", "/api/plants/p1/irrigation", None).await;
        assert_eq!(v["enabled"], false);
    }

    #[tokio::test]
    async fn conflicts_check_and_resolve() {
        let (app, _) = test_app().await;
        send(&app, "POST", "/api/plants/p1/occurrences", Some(json!({ "date": "2024-01-12" }))).await;

        let (_, conflicts) = send(
            &app,
            "POST",
            "/api/plants/p1/conflicts",
            Some(json!({ "kind": "recurrence", "startDate": "2024-01-10", "intervalDays": 2 })),
        )
        .await;
        assert_eq!(conflicts.as_array().unwrap().len(), 1);
        assert_eq!(conflicts[0]["kind"], "manual");

        let (_, v) = send(&app, "POST", "/api/plants/p1/conflicts/resolve", Some(conflicts)).await;
        assert_eq!(v["resolved"], 1);

        let (_, v) = send(&app, "GET", "/api/plants/p1/days/2024-01-12", None).await;
        assert_eq!(v["state"], "empty");
    }
}
