use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::config::{AnnotationConfig, IndexParams, QaTest};
use crate::io::ImageArchive;
use crate::raster::{
    all_clear_mask, bit_clear_mask, combine_masks, footprint_values, median, normalized_difference,
};
use crate::types::{
    AnnotResult, Band, BoundingBox, DateWindow, GeoPoint, IndexSample, IndexSeries, Mask,
    Observation, Raster,
};

/// Per-date vegetation index at a point.
///
/// Each observation is cloud-masked with its QA60 flags, turned into a
/// normalized difference of the NIR and red bands, and reduced with a median
/// over a small footprint around the point. Observations sharing a timestamp
/// are pooled into one value.
pub struct IndexExtractor {
    params: IndexParams,
    collection: String,
    region: BoundingBox,
}

impl IndexExtractor {
    pub fn new(collection: impl Into<String>, region: BoundingBox, params: IndexParams) -> Self {
        Self {
            params,
            collection: collection.into(),
            region,
        }
    }

    pub fn from_config(config: &AnnotationConfig) -> Self {
        Self::new(config.collection.clone(), config.aoi, config.index.clone())
    }

    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    /// Series over the configured plot range
    pub fn extract_default(&self, archive: &dyn ImageArchive, point: &GeoPoint) -> AnnotResult<IndexSeries> {
        self.extract(archive, point, &self.params.date_range)
    }

    /// Series at `point` for every observation timestamp in `range`.
    ///
    /// Recomputed from the archive on every call.
    pub fn extract(
        &self,
        archive: &dyn ImageArchive,
        point: &GeoPoint,
        range: &DateWindow,
    ) -> AnnotResult<IndexSeries> {
        log::info!(
            "Extracting {} at ({:.4}, {:.4}) for {}",
            self.params.band_name,
            point.lon,
            point.lat,
            range.label()
        );

        let observations = archive.query(&self.collection, range, &self.region)?;

        let mut pooled: BTreeMap<DateTime<Utc>, Vec<f32>> = BTreeMap::new();
        for obs in &observations {
            let values = pooled.entry(obs.timestamp).or_default();
            if !obs.footprint().contains(point) {
                continue;
            }
            let (index, valid) = self.index_band(obs)?;
            values.extend(footprint_values(
                &index,
                &valid,
                &obs.transform,
                point,
                self.params.scale_m,
            ));
        }

        let samples: Vec<IndexSample> = pooled
            .into_iter()
            .map(|(timestamp, mut values)| IndexSample {
                timestamp,
                value: median(&mut values),
            })
            .collect();

        log::debug!(
            "{} series: {} dates, {} with data",
            self.params.band_name,
            samples.len(),
            samples.iter().filter(|s| s.value.is_some()).count()
        );

        Ok(IndexSeries {
            band_name: self.params.band_name.clone(),
            samples,
        })
    }

    /// Cloud-masked normalized difference of one observation
    pub fn index_band(&self, observation: &Observation) -> AnnotResult<(Raster, Mask)> {
        let flags = observation.band(Band::QA60)?;
        let clear = match self.params.qa_test {
            QaTest::BitClear(bit) => bit_clear_mask(flags, bit),
            QaTest::AllClear => all_clear_mask(flags),
        };
        let valid = combine_masks(&observation.mask, &clear)?;

        let nir = observation.band(self.params.nir_band)?;
        let red = observation.band(self.params.red_band)?;
        normalized_difference(nir, red, &valid)
    }
}

/// `("lon: x.xx", "lat: y.yy")` labels for a point
pub fn coordinate_labels(point: &GeoPoint) -> (String, String) {
    // Halves round away from zero
    let round2 = |v: f64| (v * 100.0).round() / 100.0;
    (
        format!("lon: {:.2}", round2(point.lon)),
        format!("lat: {:.2}", round2(point.lat)),
    )
}

/// Index series with the presentation the chart panel expects
#[derive(Debug, Clone, PartialEq)]
pub struct IndexChart {
    pub series: IndexSeries,
    pub title: String,
    pub v_axis_title: String,
    pub v_axis_max: f32,
    pub h_axis_title: String,
    /// Date format of the horizontal axis ticks
    pub h_axis_format: String,
}

impl IndexChart {
    /// Chart titled after the sample currently under annotation
    pub fn new(series: IndexSeries, point_number: i64) -> Self {
        Self {
            title: format!("S2 {} --> {}", series.band_name, point_number),
            v_axis_title: series.band_name.clone(),
            v_axis_max: 1.0,
            h_axis_title: "date".to_string(),
            h_axis_format: "MM-yy".to_string(),
            series,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::InMemoryArchive;
    use crate::types::GeoTransform;
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use std::collections::HashMap;

    const COLLECTION: &str = "S2";

    fn observation(day: u32, nir: f32, red: f32, qa: f32) -> Observation {
        let dim = (10, 10);
        let bands: HashMap<Band, Raster> = [
            (Band::B8, Raster::from_elem(dim, nir)),
            (Band::B4, Raster::from_elem(dim, red)),
            (Band::QA60, Raster::from_elem(dim, qa)),
        ]
        .into_iter()
        .collect();
        Observation::new(
            format!("obs-{}", day),
            Utc.with_ymd_and_hms(2024, 10, day, 9, 0, 0).unwrap(),
            GeoTransform::new(30.0, 50.0, 0.0001, -0.0001),
            bands,
        )
        .unwrap()
    }

    fn extractor() -> IndexExtractor {
        IndexExtractor::new(
            COLLECTION,
            BoundingBox::new(29.0, 49.0, 31.0, 51.0),
            IndexParams::default(),
        )
    }

    fn point() -> GeoPoint {
        GeoPoint::new(30.00045, 49.99955)
    }

    #[test]
    fn test_equal_bands_give_zero_series() {
        let mut archive = InMemoryArchive::new();
        for day in [2, 7, 12, 17] {
            archive.add_observation(COLLECTION, observation(day, 1500.0, 1500.0, 0.0));
        }

        let series = extractor().extract_default(&archive, &point()).unwrap();
        assert_eq!(series.band_name, "NDVI");
        assert_eq!(series.len(), 4);
        for sample in series.iter() {
            assert_relative_eq!(sample.value.unwrap(), 0.0);
        }
    }

    #[test]
    fn test_cloud_flag_masks_observation() {
        let mut archive = InMemoryArchive::new();
        archive.add_observation(COLLECTION, observation(2, 3000.0, 1000.0, 0.0));
        archive.add_observation(COLLECTION, observation(7, 3000.0, 1000.0, 1.0));
        // Bit 10 (opaque clouds) is not inspected by the bit-0 test
        archive.add_observation(COLLECTION, observation(12, 3000.0, 1000.0, 1024.0));

        let series = extractor().extract_default(&archive, &point()).unwrap();
        let values: Vec<Option<f32>> = series.iter().map(|s| s.value).collect();
        assert_eq!(values.len(), 3);
        assert_relative_eq!(values[0].unwrap(), 0.5);
        assert_eq!(values[1], None);
        assert_relative_eq!(values[2].unwrap(), 0.5);

        let strict = IndexExtractor::new(
            COLLECTION,
            BoundingBox::new(29.0, 49.0, 31.0, 51.0),
            IndexParams {
                qa_test: QaTest::AllClear,
                ..IndexParams::default()
            },
        );
        let series = strict.extract_default(&archive, &point()).unwrap();
        assert_eq!(series.values().len(), 1);
    }

    #[test]
    fn test_series_is_chronological_and_range_bounded() {
        let mut archive = InMemoryArchive::new();
        archive.add_observation(COLLECTION, observation(20, 2000.0, 1000.0, 0.0));
        archive.add_observation(COLLECTION, observation(3, 2000.0, 1000.0, 0.0));

        let range = DateWindow::parse("2024-10-01", "2024-10-10").unwrap();
        let series = extractor().extract(&archive, &point(), &range).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(
            series.samples[0].timestamp,
            Utc.with_ymd_and_hms(2024, 10, 3, 9, 0, 0).unwrap()
        );

        let full = extractor().extract_default(&archive, &point()).unwrap();
        assert!(full.samples[0].timestamp < full.samples[1].timestamp);
    }

    #[test]
    fn test_median_over_footprint() {
        let mut obs = observation(2, 2000.0, 1000.0, 0.0);
        // Pixel under the point differs from its neighbours
        let nir = obs.bands.get_mut(&Band::B8).unwrap();
        nir[[4, 4]] = 1000.0;

        let mut archive = InMemoryArchive::new();
        archive.add_observation(COLLECTION, obs);

        // 30 m footprint reaches the neighbours of pixel (4, 4)
        let extractor = IndexExtractor::new(
            COLLECTION,
            BoundingBox::new(29.0, 49.0, 31.0, 51.0),
            IndexParams {
                scale_m: 30.0,
                ..IndexParams::default()
            },
        );
        let series = extractor.extract_default(&archive, &point()).unwrap();
        let value = series.samples[0].value.unwrap();
        assert_relative_eq!(value, 1.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_same_timestamp_observations_are_pooled() {
        let mut archive = InMemoryArchive::new();
        archive.add_observation(COLLECTION, observation(2, 3000.0, 1000.0, 0.0));
        archive.add_observation(COLLECTION, observation(2, 2000.0, 2000.0, 0.0));
        archive.add_observation(COLLECTION, observation(7, 3000.0, 1000.0, 0.0));

        let extractor = extractor();
        assert_eq!(extractor.params().scale_m, 10.0);
        let series = extractor.extract_default(&archive, &point()).unwrap();

        assert_eq!(series.len(), 2);
        // Median of 0.5 and 0.0 from the two captures at the same time
        assert_relative_eq!(series.samples[0].value.unwrap(), 0.25);
        assert_relative_eq!(series.samples[1].value.unwrap(), 0.5);
    }

    #[test]
    fn test_point_outside_footprint_is_missing() {
        let mut archive = InMemoryArchive::new();
        archive.add_observation(COLLECTION, observation(2, 2000.0, 1000.0, 0.0));

        let far = GeoPoint::new(30.5, 49.5);
        let series = extractor().extract_default(&archive, &far).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.samples[0].value, None);
    }

    #[test]
    fn test_repeated_extraction_is_identical() {
        let mut archive = InMemoryArchive::new();
        archive.add_observation(COLLECTION, observation(2, 2500.0, 500.0, 0.0));
        let a = extractor().extract_default(&archive, &point()).unwrap();
        let b = extractor().extract_default(&archive, &point()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_labels_and_chart() {
        let (lon, lat) = coordinate_labels(&GeoPoint::new(31.2468, 48.0051));
        assert_eq!(lon, "lon: 31.25");
        assert_eq!(lat, "lat: 48.01");

        let (lon, lat) = coordinate_labels(&GeoPoint::new(30.125, -48.375));
        assert_eq!(lon, "lon: 30.13");
        assert_eq!(lat, "lat: -48.38");

        let chart = IndexChart::new(
            IndexSeries {
                band_name: "NDVI".to_string(),
                samples: vec![],
            },
            12,
        );
        assert_eq!(chart.title, "S2 NDVI --> 12");
        assert_eq!(chart.v_axis_title, "NDVI");
        assert_eq!(chart.h_axis_format, "MM-yy");
    }
}
