use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{AnnotError, AnnotResult, BoundingBox, DateWindow, Observation, ThematicRaster};

/// Retrieval side of the geospatial data service.
///
/// Implementations may be remote; failures surface as
/// `AnnotError::RemoteService` and are contained to the layer or series
/// that requested them.
pub trait ImageArchive: Send + Sync {
    /// Observations of `collection` with a timestamp in `window` whose
    /// footprint intersects `region`, in archive order
    fn query(
        &self,
        collection: &str,
        window: &DateWindow,
        region: &BoundingBox,
    ) -> AnnotResult<Vec<Arc<Observation>>>;

    /// A stored single-band raster such as a crop map
    fn thematic(&self, asset_id: &str) -> AnnotResult<Arc<ThematicRaster>>;
}

/// Archive held entirely in memory
#[derive(Debug, Default, Clone)]
pub struct InMemoryArchive {
    collections: HashMap<String, Vec<Arc<Observation>>>,
    thematic: HashMap<String, Arc<ThematicRaster>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observation; insertion order is archive order
    pub fn add_observation(&mut self, collection: &str, observation: Observation) {
        log::debug!(
            "Archiving observation {} ({}) in {}",
            observation.id,
            observation.timestamp,
            collection
        );
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(Arc::new(observation));
    }

    pub fn add_thematic(&mut self, raster: ThematicRaster) {
        self.thematic.insert(raster.id.clone(), Arc::new(raster));
    }

    pub fn observation_count(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, Vec::len)
    }
}

impl ImageArchive for InMemoryArchive {
    fn query(
        &self,
        collection: &str,
        window: &DateWindow,
        region: &BoundingBox,
    ) -> AnnotResult<Vec<Arc<Observation>>> {
        let observations = self.collections.get(collection).ok_or_else(|| {
            AnnotError::RemoteService(format!("Unknown collection: {}", collection))
        })?;

        let selected: Vec<Arc<Observation>> = observations
            .iter()
            .filter(|obs| window.contains(&obs.timestamp) && obs.footprint().intersects(region))
            .cloned()
            .collect();

        log::debug!(
            "Query {} {}: {} of {} observations",
            collection,
            window.label(),
            selected.len(),
            observations.len()
        );
        Ok(selected)
    }

    fn thematic(&self, asset_id: &str) -> AnnotResult<Arc<ThematicRaster>> {
        self.thematic
            .get(asset_id)
            .cloned()
            .ok_or_else(|| AnnotError::RemoteService(format!("Unknown asset: {}", asset_id)))
    }
}
