mod config;
mod db;
mod state;
mod web;

use anyhow::Result;
use std::env;
use tracing_subscriber::EnvFilter;

use watering_schedule::Planner;

use db::Db;
use state::HubState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let db_url = env::var("DB_URL").unwrap_or_else(|_| "sqlite:plant-care.db?mode=rwc".to_string());
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // The database is the source of truth; the planner works on a copy.
    let store = db.load_store().await?;
    tracing::info!(records = store.len(), "records loaded");
    let mut planner = Planner::new(store);

    // ── Config file (seed plants + diagnosis) ───────────────────────
    let cfg = config::load(&config_path)?;
    config::apply(&cfg, &mut planner, &db).await?;

    if planner.plants().is_empty() {
        tracing::warn!("no plants in the directory; add some to {config_path}");
    }

    // ── Shared state + web server ───────────────────────────────────
    let mut hub = HubState::new(planner, cfg.recommendation());
    hub.record_system("hub started".to_string());

    let state = web::AppState {
        hub: hub.shared(),
        db,
    };
    web::serve(state, web_port).await
}
