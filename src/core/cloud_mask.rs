use ndarray::Array2;

use crate::config::CloudMaskParams;
use crate::raster::focal_mode;
use crate::types::{AnnotResult, Band, Mask, Observation};

/// Scene-classification cloud mask.
///
/// Keeps vegetation, bare soil and water classes (`3 < SCL < 7` by
/// default), then smooths the binary result with a circular focal mode to
/// drop isolated misclassified pixels.
#[derive(Debug, Clone)]
pub struct CloudMaskFilter {
    params: CloudMaskParams,
}

impl CloudMaskFilter {
    /// Create a filter with default parameters
    pub fn new() -> Self {
        Self {
            params: CloudMaskParams::default(),
        }
    }

    /// Create a filter with custom parameters
    pub fn with_params(params: CloudMaskParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &CloudMaskParams {
        &self.params
    }

    /// Validity mask of `observation`, combined with its existing mask
    pub fn mask(&self, observation: &Observation) -> AnnotResult<Mask> {
        log::debug!("Applying classification mask to {}", observation.id);
        let scl = observation.band(Band::SCL)?;

        let lo = self.params.min_class_exclusive;
        let hi = self.params.max_class_exclusive;
        let qa: Array2<u8> = scl.mapv(|class| u8::from(class > lo && class < hi));

        let smoothed = focal_mode(&qa, self.params.kernel_radius, self.params.iterations);

        let mut valid = smoothed.mapv(|v| v == 1);
        valid.zip_mut_with(&observation.mask, |v, &m| *v = *v && m);

        let kept = valid.iter().filter(|&&v| v).count();
        log::debug!(
            "Classification mask kept {}/{} pixels of {}",
            kept,
            valid.len(),
            observation.id
        );
        Ok(valid)
    }
}

impl Default for CloudMaskFilter {
    fn default() -> Self {
        Self::new()
    }
}
