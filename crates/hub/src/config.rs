//! TOML config file loading, validation, and seeding of the plant directory
//! and the diagnosis recommendation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;

use watering_schedule::reconcile::Recommendation;
use watering_schedule::{MemoryStore, Plant, PlantId, Planner, TimeOfDay};

use crate::db::Db;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub plants: Vec<PlantEntry>,
    pub diagnosis: Option<DiagnosisEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PlantEntry {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct DiagnosisEntry {
    #[serde(default = "default_interval_days")]
    pub interval_days: u32,
    #[serde(default = "default_weekly_watering")]
    pub weekly_watering: u8,
    #[serde(default = "default_watering_time")]
    pub watering_time: String,
}

fn default_interval_days() -> u32 {
    Recommendation::default().interval_days
}

fn default_weekly_watering() -> u8 {
    Recommendation::default().weekly_watering
}

fn default_watering_time() -> String {
    Recommendation::default().watering_time.to_string()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_plants(&mut errors);
        self.validate_diagnosis(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_plants(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<&str> = HashSet::new();

        for (i, p) in self.plants.iter().enumerate() {
            let ctx = || {
                if p.id.is_empty() {
                    format!("plants[{i}]")
                } else {
                    format!("plant '{}'", p.id)
                }
            };

            if p.id.trim().is_empty() {
                errors.push(format!("{}: id is empty", ctx()));
            } else if !seen_ids.insert(&p.id) {
                errors.push(format!("{}: duplicate id", ctx()));
            }

            if p.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            }
        }
    }

    fn validate_diagnosis(&self, errors: &mut Vec<String>) {
        let Some(d) = &self.diagnosis else {
            return;
        };

        if d.interval_days < 1 {
            errors.push(format!(
                "diagnosis: interval_days must be at least 1, got {}",
                d.interval_days
            ));
        }
        if !(1..=7).contains(&d.weekly_watering) {
            errors.push(format!(
                "diagnosis: weekly_watering {} out of range [1, 7]",
                d.weekly_watering
            ));
        }
        if d.watering_time.parse::<TimeOfDay>().is_err() {
            errors.push(format!(
                "diagnosis: watering_time '{}' is not HH:MM",
                d.watering_time
            ));
        }
    }

    /// The recommendation handed to the diagnosis flow. Assumes the config
    /// was validated; unparsable pieces fall back to the defaults.
    pub fn recommendation(&self) -> Recommendation {
        let defaults = Recommendation::default();
        match &self.diagnosis {
            None => defaults,
            Some(d) => Recommendation {
                interval_days: d.interval_days,
                weekly_watering: d.weekly_watering,
                watering_time: d.watering_time.parse().unwrap_or(defaults.watering_time),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Upsert every configured plant into the directory and persist the result.
/// Fields the app added to a known plant are kept; only the name is synced.
pub async fn apply(config: &Config, planner: &mut Planner<MemoryStore>, db: &Db) -> Result<()> {
    for entry in &config.plants {
        let id = PlantId::new(entry.id.as_str());
        let plant = match planner.plant(&id) {
            Some(mut known) => {
                known.name = entry.name.clone();
                known
            }
            None => Plant::new(entry.id.as_str(), entry.name.as_str()),
        };
        planner.upsert_plant(plant);
    }

    db.persist_dirty(planner.store_mut())
        .await
        .context("failed to persist seeded plants")?;

    tracing::info!(
        plants = config.plants.len(),
        diagnosis = config.diagnosis.is_some(),
        "config applied"
    );

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
