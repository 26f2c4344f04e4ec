//! Configuration for the annotation core.
//!
//! Every component takes its own parameter struct with a `Default` impl
//! matching the Sentinel-2 annotation project. `AnnotationConfig` bundles
//! them and can be read from a TOML file; absent sections fall back to the
//! defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{AnnotError, AnnotResult, Band, BoundingBox, DateWindow};

/// Scene-classification cloud mask parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudMaskParams {
    /// Classes strictly above this value are valid
    pub min_class_exclusive: f32,
    /// Classes strictly below this value are valid
    pub max_class_exclusive: f32,
    /// Radius of the circular focal-mode kernel (pixels)
    pub kernel_radius: usize,
    pub iterations: usize,
}

impl Default for CloudMaskParams {
    fn default() -> Self {
        Self {
            min_class_exclusive: 3.0, // above cloud shadows
            max_class_exclusive: 7.0, // below unclassified/cloud/snow
            kernel_radius: 1,
            iterations: 1,
        }
    }
}

/// Quality mosaic parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeParams {
    /// Run the scene-classification mask before mosaicking
    pub apply_classification_mask: bool,
    /// Band whose inverted value ranks observations
    pub quality_band: Band,
    /// Quality proxy is `quality_offset - quality_band`
    pub quality_offset: f32,
    /// Output grid resolution in degrees
    pub pixel_size_deg: f64,
    /// Largest output grid a single composite may allocate
    pub max_pixels: usize,
}

impl Default for CompositeParams {
    fn default() -> Self {
        Self {
            apply_classification_mask: false,
            quality_band: Band::B1,
            quality_offset: 10000.0,
            pixel_size_deg: 0.0001, // ~10 m
            max_pixels: 4_000_000,
        }
    }
}

/// Per-observation cloud test on the QA60 bit-flag band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaTest {
    /// Valid where the given bit is clear
    BitClear(u32),
    /// Valid only where the band is zero
    AllClear,
}

/// Vegetation index extraction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// First band of the normalized difference (NIR)
    pub nir_band: Band,
    /// Second band of the normalized difference (red)
    pub red_band: Band,
    /// Name given to the derived band
    pub band_name: String,
    /// Cloud test applied before the index is computed
    pub qa_test: QaTest,
    /// Sampling footprint edge (meters)
    pub scale_m: f64,
    /// Plot range
    pub date_range: DateWindow,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            nir_band: Band::B8,
            red_band: Band::B4,
            band_name: "NDVI".to_string(),
            qa_test: QaTest::BitClear(0),
            scale_m: 10.0,
            date_range: DateWindow::new(
                chrono::NaiveDate::from_ymd_opt(2024, 8, 15).unwrap_or_default(),
                chrono::NaiveDate::from_ymd_opt(2025, 5, 15).unwrap_or_default(),
            ),
        }
    }
}

/// Navigator and map presentation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigatorParams {
    /// Point number shown at start-up
    pub initial_index: i64,
    /// `true` starts with the false-color-first layout
    pub initial_mode: bool,
    pub zoom_level: u8,
    pub marker_color: String,
    /// Half-size in degrees of the map view composited around a sample
    pub view_half_extent_deg: f64,
}

impl Default for NavigatorParams {
    fn default() -> Self {
        Self {
            initial_index: 0,
            initial_mode: true,
            zoom_level: 14,
            marker_color: "skyblue".to_string(),
            view_half_extent_deg: 0.02,
        }
    }
}

/// Auxiliary classification layer drawn above the composites
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThematicParams {
    /// Archive identifier of the classification raster
    pub asset_id: String,
    pub label: String,
    pub palette: Vec<String>,
    pub min: f32,
    pub max: f32,
}

impl Default for ThematicParams {
    fn default() -> Self {
        Self {
            asset_id: "winter_crops_25".to_string(),
            label: "winter crops 25".to_string(),
            palette: vec!["ff00ff".to_string()],
            min: 0.0,
            max: 1.0,
        }
    }
}

/// Complete annotation core configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Archive collection queried for observations
    pub collection: String,
    /// Area of interest for composites and index filtering
    pub aoi: BoundingBox,
    pub cloud_mask: CloudMaskParams,
    pub composite: CompositeParams,
    pub index: IndexParams,
    pub navigator: NavigatorParams,
    pub thematic: ThematicParams,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            collection: "COPERNICUS/S2_SR_HARMONIZED".to_string(),
            // Ukraine
            aoi: BoundingBox::new(22.1, 44.3, 40.3, 52.4),
            cloud_mask: CloudMaskParams::default(),
            composite: CompositeParams::default(),
            index: IndexParams::default(),
            navigator: NavigatorParams::default(),
            thematic: ThematicParams::default(),
        }
    }
}

impl AnnotationConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> AnnotResult<Self> {
        let config: AnnotationConfig = toml::from_str(content)
            .map_err(|e| AnnotError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AnnotResult<Self> {
        log::info!("Reading configuration: {}", path.as_ref().display());
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// `<user config dir>/s2annot/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("s2annot").join("config.toml"))
    }

    /// Load from the default location, or defaults when no file exists
    pub fn load_or_default() -> AnnotResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(path),
            _ => {
                log::debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> AnnotResult<()> {
        if self.aoi.width() <= 0.0 || self.aoi.height() <= 0.0 {
            return Err(AnnotError::Config(format!("Empty area of interest: {:?}", self.aoi)));
        }
        if self.composite.pixel_size_deg <= 0.0 {
            return Err(AnnotError::Config("pixel_size_deg must be positive".to_string()));
        }
        if self.composite.max_pixels == 0 {
            return Err(AnnotError::Config("max_pixels must be positive".to_string()));
        }
        if self.navigator.view_half_extent_deg <= 0.0 {
            return Err(AnnotError::Config("view_half_extent_deg must be positive".to_string()));
        }
        if self.index.scale_m <= 0.0 {
            return Err(AnnotError::Config("scale_m must be positive".to_string()));
        }
        if let QaTest::BitClear(bit) = self.index.qa_test {
            if bit > 15 {
                return Err(AnnotError::Config(format!(
                    "QA bit {} is outside the 16-bit QA band",
                    bit
                )));
            }
        }
        if self.index.date_range.start >= self.index.date_range.end {
            return Err(AnnotError::Config(format!(
                "Index date range {} is empty",
                self.index.date_range.label()
            )));
        }
        Ok(())
    }
}
