//! Plant directory (`myPlants`) and the session-scoped selection pointer.

use tracing::{debug, info};

use crate::model::{Plant, PlantId};
use crate::store::{self, KeyValueStore, PLANTS_KEY, SELECTED_PLANT_KEY};
use crate::Planner;

impl<S: KeyValueStore> Planner<S> {
    pub fn plants(&self) -> Vec<Plant> {
        store::load_list(&self.store, PLANTS_KEY)
    }

    pub fn plant(&self, id: &PlantId) -> Option<Plant> {
        self.plants().into_iter().find(|p| &p.id == id)
    }

    /// Insert or replace by id. Returns `true` when the plant is new.
    pub fn upsert_plant(&mut self, plant: Plant) -> bool {
        let mut plants = self.plants();
        let id = plant.id.clone();
        let created = match plants.iter_mut().find(|p| p.id == plant.id) {
            Some(existing) => {
                *existing = plant;
                false
            }
            None => {
                plants.push(plant);
                true
            }
        };
        store::save(&mut self.store, PLANTS_KEY, &plants);
        info!(plant = %id, created, "plant saved");
        created
    }

    /// Drop a plant from the directory. Its schedules stay in the store.
    pub fn remove_plant(&mut self, id: &PlantId) -> bool {
        let mut plants = self.plants();
        let before = plants.len();
        plants.retain(|p| &p.id != id);
        if plants.len() == before {
            debug!(plant = %id, "remove_plant: unknown plant");
            return false;
        }
        store::save(&mut self.store, PLANTS_KEY, &plants);
        info!(plant = %id, "plant removed");
        true
    }
}

/// The plant carried across screens, stored as a bare id in the session.
pub fn selected_plant(session: &impl KeyValueStore) -> Option<PlantId> {
    session
        .get(SELECTED_PLANT_KEY)
        .map(|raw| raw.trim().to_owned())
        .filter(|raw| !raw.is_empty())
        .map(PlantId::new)
}

pub fn select_plant(session: &mut impl KeyValueStore, id: &PlantId) {
    session.set(SELECTED_PLANT_KEY, id.as_str().to_owned());
}
