//! Demo catalog loaded into an empty lab on first start.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use ulid::Ulid;

use crate::lab::{Lab, LabError, NewItem, NewResource};
use crate::model::Actor;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("reading seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing seed file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("applying seed: {0}")]
    Lab(#[from] LabError),
}

#[derive(Debug, Default, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub items: Vec<NewItem>,
    #[serde(default)]
    pub resources: Vec<NewResource>,
}

impl Catalog {
    pub fn from_json(text: &str) -> Result<Self, SeedError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, SeedError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

/// What [`apply`] created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Seeded {
    pub items: usize,
    pub resources: usize,
}

/// Create the catalog's entries, unless the lab already has any items or
/// resources.
pub async fn apply(lab: &Lab, catalog: Catalog) -> Result<Seeded, SeedError> {
    if !lab.items().await?.is_empty() || !lab.resources().await?.is_empty() {
        info!("catalog not empty, skipping seed");
        return Ok(Seeded::default());
    }
    let admin = Actor::teacher(Ulid::nil());
    let mut seeded = Seeded::default();
    for item in catalog.items {
        lab.create_item(item, &admin).await?;
        seeded.items += 1;
    }
    for resource in catalog.resources {
        lab.create_resource(resource, &admin).await?;
        seeded.resources += 1;
    }
    info!(items = seeded.items, resources = seeded.resources, "seeded demo catalog");
    Ok(seeded)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::notify::NotifyHub;
    use crate::store::DurableStore;
    use crate::window::LabHours;

    const DEMO: &str = include_str!("../demos/catalog.json");

    fn lab(name: &str) -> Lab {
        let dir = std::env::temp_dir().join("labdesk_test_seed");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        let store = Arc::new(DurableStore::open(&path).unwrap());
        Lab::new(store, Arc::new(NotifyHub::new()), LabHours::default())
    }

    #[test]
    fn demo_catalog_parses() {
        let catalog = Catalog::from_json(DEMO).unwrap();
        assert_eq!(catalog.items.len(), 5);
        assert_eq!(catalog.resources.len(), 3);
    }

    #[tokio::test]
    async fn seeds_only_an_empty_lab() {
        let lab = lab("seed_once.wal");
        let seeded = apply(&lab, Catalog::from_json(DEMO).unwrap()).await.unwrap();
        assert_eq!(seeded, Seeded { items: 5, resources: 3 });

        let again = apply(&lab, Catalog::from_json(DEMO).unwrap()).await.unwrap();
        assert_eq!(again, Seeded::default());
        assert_eq!(lab.items().await.unwrap().len(), 5);

        let printer = lab
            .resources()
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.details.name == "3D printer")
            .unwrap();
        assert!(printer.details.requires_approval);
    }

    #[test]
    fn bad_json_reported() {
        assert!(matches!(Catalog::from_json("{\"items\": 3}"), Err(SeedError::Json(_))));
    }
}
