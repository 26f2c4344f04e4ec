use std::sync::Arc;

use crate::config::{CloudMaskParams, CompositeParams};
use crate::core::cloud_mask::CloudMaskFilter;
use crate::io::ImageArchive;
use crate::raster::{quality_mosaic, resample_nearest, MosaicLayer};
use crate::types::{
    AnnotError, AnnotResult, BoundingBox, Composite, DateWindow, GeoTransform, Observation, COMPOSITE_BANDS,
};

/// Quality-mosaic composite builder.
///
/// For every output pixel the band values come from the single observation
/// with the highest quality proxy `quality_offset - quality_band` at that
/// pixel. Low coastal-aerosol reflectance favours clear, haze-free pixels
/// without an explicit cloud classification.
pub struct CompositeBuilder {
    params: CompositeParams,
    cloud_mask: CloudMaskFilter,
    collection: String,
}

impl CompositeBuilder {
    pub fn new(collection: impl Into<String>, params: CompositeParams, mask_params: CloudMaskParams) -> Self {
        Self {
            params,
            cloud_mask: CloudMaskFilter::with_params(mask_params),
            collection: collection.into(),
        }
    }

    /// Builder with default parameters over `collection`
    pub fn standard(collection: impl Into<String>) -> Self {
        Self::new(collection, CompositeParams::default(), CloudMaskParams::default())
    }

    pub fn params(&self) -> &CompositeParams {
        &self.params
    }

    /// Build the composite of `window` over `region`.
    ///
    /// A window without intersecting observations yields an empty, fully
    /// masked composite.
    pub fn build(
        &self,
        archive: &dyn ImageArchive,
        window: &DateWindow,
        region: &BoundingBox,
    ) -> AnnotResult<Composite> {
        self.output_grid(region)?;
        let observations = archive.query(&self.collection, window, region)?;
        self.build_from(&observations, window, region)
    }

    /// Output grid over `region`, refused when it exceeds `max_pixels`
    pub fn output_grid(&self, region: &BoundingBox) -> AnnotResult<(GeoTransform, (usize, usize))> {
        let (transform, dim) = GeoTransform::covering(region, self.params.pixel_size_deg);
        match dim.0.checked_mul(dim.1) {
            Some(pixels) if pixels <= self.params.max_pixels => Ok((transform, dim)),
            _ => Err(AnnotError::InvalidRaster(format!(
                "Composite grid {}x{} exceeds {} pixels",
                dim.0, dim.1, self.params.max_pixels
            ))),
        }
    }

    /// Build from already retrieved observations
    pub fn build_from(
        &self,
        observations: &[Arc<Observation>],
        window: &DateWindow,
        region: &BoundingBox,
    ) -> AnnotResult<Composite> {
        let id = window.label();
        let (transform, dim) = self.output_grid(region)?;

        log::info!(
            "Building composite {} from {} observations ({}x{} grid)",
            id,
            observations.len(),
            dim.0,
            dim.1
        );

        if observations.is_empty() {
            log::debug!("No observations for {}, composite is empty", id);
            return Ok(Composite::empty(id, transform, dim));
        }

        let layers = observations
            .iter()
            .map(|obs| self.prepare_layer(obs, &transform, dim))
            .collect::<AnnotResult<Vec<MosaicLayer>>>()?;

        let (bands, mask, _winners) = quality_mosaic(&layers, &COMPOSITE_BANDS, dim);

        let composite = Composite {
            id,
            transform,
            bands,
            mask,
            source_count: observations.len(),
        };
        log::debug!(
            "Composite {} has {} valid pixels",
            composite.id,
            composite.valid_pixels()
        );
        Ok(composite)
    }

    fn prepare_layer(
        &self,
        observation: &Observation,
        transform: &GeoTransform,
        dim: (usize, usize),
    ) -> AnnotResult<MosaicLayer> {
        let valid = if self.params.apply_classification_mask {
            self.cloud_mask.mask(observation)?
        } else {
            observation.mask.clone()
        };

        let offset = self.params.quality_offset;
        let quality = observation
            .band(self.params.quality_band)?
            .mapv(|v| offset - v);

        resample_nearest(observation, &valid, &COMPOSITE_BANDS, &quality, transform, dim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::InMemoryArchive;
    use crate::types::{Band, Raster};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    const COLLECTION: &str = "S2";

    fn region() -> BoundingBox {
        BoundingBox::new(30.0, 49.9997, 30.0003, 50.0)
    }

    fn params() -> CompositeParams {
        CompositeParams {
            pixel_size_deg: 0.0001,
            ..CompositeParams::default()
        }
    }

    /// 3x3 observation on the region grid with uniform reflectance `value`
    fn observation(id: &str, day: u32, b1: Raster, value: f32) -> Observation {
        let mut bands: HashMap<Band, Raster> = COMPOSITE_BANDS
            .iter()
            .map(|&b| (b, Raster::from_elem((3, 3), value)))
            .collect();
        bands.insert(Band::B1, b1);
        bands.insert(Band::SCL, Raster::from_elem((3, 3), 4.0));
        Observation::new(
            id,
            Utc.with_ymd_and_hms(2024, 9, day, 9, 0, 0).unwrap(),
            GeoTransform::new(30.0, 50.0, 0.0001, -0.0001),
            bands,
        )
        .unwrap()
    }

    fn window() -> DateWindow {
        DateWindow::parse("2024-09-01", "2024-09-15").unwrap()
    }

    #[test]
    fn test_argmax_is_exact_per_pixel() {
        // B has the highest B1 (lowest quality) everywhere but one pixel
        let mut b1_a = Raster::from_elem((3, 3), 500.0);
        let b1_b = Raster::from_elem((3, 3), 900.0);
        let mut b1_c = Raster::from_elem((3, 3), 300.0);
        b1_a[[0, 0]] = 100.0;
        b1_c[[2, 2]] = 950.0;

        let obs = vec![
            Arc::new(observation("A", 2, b1_a, 1000.0)),
            Arc::new(observation("B", 5, b1_b, 2000.0)),
            Arc::new(observation("C", 9, b1_c, 3000.0)),
        ];

        let builder = CompositeBuilder::new(COLLECTION, params(), CloudMaskParams::default());
        let composite = builder.build_from(&obs, &window(), &region()).unwrap();

        assert_eq!(composite.id, "2024-09-01_2024-09-15");
        assert_eq!(composite.dim(), (3, 3));
        assert_eq!(composite.source_count, 3);

        let b4 = composite.band(Band::B4).unwrap();
        assert_eq!(b4[[0, 0]], 1000.0, "A wins where its B1 is lowest");
        assert_eq!(b4[[2, 2]], 1000.0, "A beats C where C is hazy");
        assert_eq!(b4[[1, 1]], 3000.0, "C wins elsewhere");
        assert!(b4.iter().all(|&v| v != 2000.0), "B never wins");
        assert!(b4.iter().all(|&v| v == 1000.0 || v == 3000.0), "no averaging");
    }

    #[test]
    fn test_only_display_bands_are_kept() {
        let obs = vec![Arc::new(observation("A", 2, Raster::zeros((3, 3)), 10.0))];
        let builder = CompositeBuilder::new(COLLECTION, params(), CloudMaskParams::default());
        let composite = builder.build_from(&obs, &window(), &region()).unwrap();

        let mut bands: Vec<Band> = composite.bands.keys().copied().collect();
        bands.sort();
        assert_eq!(bands, COMPOSITE_BANDS.to_vec());
    }

    #[test]
    fn test_empty_window_is_not_an_error() {
        let mut archive = InMemoryArchive::new();
        archive.add_observation(COLLECTION, observation("late", 20, Raster::zeros((3, 3)), 1.0));

        let builder = CompositeBuilder::new(COLLECTION, params(), CloudMaskParams::default());
        let composite = builder.build(&archive, &window(), &region()).unwrap();

        assert!(composite.is_empty());
        assert_eq!(composite.valid_pixels(), 0);
        assert_eq!(composite.id, "2024-09-01_2024-09-15");
    }

    #[test]
    fn test_masked_pixels_do_not_compete() {
        let mut b1_best = Raster::zeros((3, 3));
        b1_best[[0, 0]] = 0.0;
        let mut mask = crate::types::Mask::from_elem((3, 3), true);
        mask[[0, 0]] = false;
        let best = observation("best", 2, b1_best, 100.0).with_mask(mask).unwrap();
        let other = observation("other", 3, Raster::from_elem((3, 3), 800.0), 200.0);

        let builder = CompositeBuilder::new(COLLECTION, params(), CloudMaskParams::default());
        let composite = builder
            .build_from(&[Arc::new(best), Arc::new(other)], &window(), &region())
            .unwrap();

        let b2 = composite.band(Band::B2).unwrap();
        assert_eq!(b2[[0, 0]], 200.0);
        assert_eq!(b2[[1, 1]], 100.0);
    }

    #[test]
    fn test_oversized_grid_is_refused() {
        let builder = CompositeBuilder::new(
            COLLECTION,
            CompositeParams {
                max_pixels: 8,
                ..params()
            },
            CloudMaskParams::default(),
        );
        assert_eq!(builder.params().max_pixels, 8);

        let obs = vec![Arc::new(observation("A", 2, Raster::zeros((3, 3)), 10.0))];
        let result = builder.build_from(&obs, &window(), &region());
        assert!(matches!(result, Err(AnnotError::InvalidRaster(_))));

        let mut archive = InMemoryArchive::new();
        archive.add_observation(COLLECTION, observation("A", 2, Raster::zeros((3, 3)), 10.0));
        assert_eq!(archive.observation_count(COLLECTION), 1);
        assert!(builder.build(&archive, &window(), &region()).is_err());
    }

    #[test]
    fn test_classification_mask_policy() {
        // The clearest observation is cloudy by classification
        let mut cloudy = observation("cloudy", 2, Raster::zeros((3, 3)), 100.0);
        cloudy.bands.insert(Band::SCL, Raster::from_elem((3, 3), 9.0));
        let clear = observation("clear", 3, Raster::from_elem((3, 3), 500.0), 200.0);
        let obs = vec![Arc::new(cloudy), Arc::new(clear)];

        let inert = CompositeBuilder::new(COLLECTION, params(), CloudMaskParams::default());
        let composite = inert.build_from(&obs, &window(), &region()).unwrap();
        assert!(composite.band(Band::B8).unwrap().iter().all(|&v| v == 100.0));

        let enabled = CompositeBuilder::new(
            COLLECTION,
            CompositeParams {
                apply_classification_mask: true,
                ..params()
            },
            CloudMaskParams::default(),
        );
        let composite = enabled.build_from(&obs, &window(), &region()).unwrap();
        assert!(composite.band(Band::B8).unwrap().iter().all(|&v| v == 200.0));
    }
}
