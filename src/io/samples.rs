use std::collections::BTreeMap;

use crate::types::{AnnotError, AnnotResult, GeoPoint};

/// Read-only, index-addressable annotation targets keyed by `shuffled_i`
pub trait SampleSource {
    /// Geometry of the sample with the given index
    fn lookup(&self, index: i64) -> AnnotResult<GeoPoint>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sample collection held in memory
#[derive(Debug, Default, Clone)]
pub struct InMemorySamples {
    points: BTreeMap<i64, GeoPoint>,
}

impl InMemorySamples {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dense collection indexed `0..points.len()`
    pub fn from_points(points: impl IntoIterator<Item = GeoPoint>) -> Self {
        Self {
            points: points
                .into_iter()
                .enumerate()
                .map(|(i, p)| (i as i64, p))
                .collect(),
        }
    }

    pub fn insert(&mut self, index: i64, point: GeoPoint) {
        self.points.insert(index, point);
    }
}

impl SampleSource for InMemorySamples {
    fn lookup(&self, index: i64) -> AnnotResult<GeoPoint> {
        self.points
            .get(&index)
            .copied()
            .ok_or(AnnotError::NoSuchPoint(index))
    }

    fn len(&self) -> usize {
        self.points.len()
    }
}
