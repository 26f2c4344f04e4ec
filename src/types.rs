use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Real-valued raster band (rows x cols)
pub type Raster = Array2<f32>;

/// Per-pixel validity mask, `true` = valid
pub type Mask = Array2<bool>;

/// Sentinel-2 surface reflectance bands used by the annotation core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Band {
    /// Coastal aerosol, used as the quality proxy source
    B1,
    B2,
    B3,
    B4,
    /// Near infrared
    B8,
    /// Scene classification (categorical)
    SCL,
    /// Cloud bit flags
    QA60,
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Band::B1 => write!(f, "B1"),
            Band::B2 => write!(f, "B2"),
            Band::B3 => write!(f, "B3"),
            Band::B4 => write!(f, "B4"),
            Band::B8 => write!(f, "B8"),
            Band::SCL => write!(f, "SCL"),
            Band::QA60 => write!(f, "QA60"),
        }
    }
}

/// Bands carried by every composite, in output order
pub const COMPOSITE_BANDS: [Band; 4] = [Band::B2, Band::B3, Band::B4, Band::B8];

/// Geographic point (WGS84 degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, max_lon, min_lat, max_lat }
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Square box of half-size `half_extent` degrees centred on `point`
    pub fn around(point: &GeoPoint, half_extent: f64) -> Self {
        Self::new(
            point.lon - half_extent,
            point.lat - half_extent,
            point.lon + half_extent,
            point.lat + half_extent,
        )
    }

    /// Overlap of the two boxes, `None` when they are disjoint or only touch
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let clipped = BoundingBox::new(
            self.min_lon.max(other.min_lon),
            self.min_lat.max(other.min_lat),
            self.max_lon.min(other.max_lon),
            self.max_lat.min(other.max_lat),
        );
        (clipped.width() > 0.0 && clipped.height() > 0.0).then_some(clipped)
    }

    /// True when the two boxes share any area or edge
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lon >= self.min_lon
            && point.lon <= self.max_lon
            && point.lat >= self.min_lat
            && point.lat <= self.max_lat
    }
}

/// North-up affine grid description
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub top_left_y: f64,
    /// Negative for north-up rasters
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self { top_left_x, pixel_width, top_left_y, pixel_height }
    }

    /// Grid covering `region` with square pixels of `pixel_size` degrees
    pub fn covering(region: &BoundingBox, pixel_size: f64) -> (Self, (usize, usize)) {
        // Tolerate rounding in the degree arithmetic before taking the ceiling
        let cols = (region.width() / pixel_size - 1e-6).ceil().max(1.0) as usize;
        let rows = (region.height() / pixel_size - 1e-6).ceil().max(1.0) as usize;
        (
            Self::new(region.min_lon, region.max_lat, pixel_size, -pixel_size),
            (rows, cols),
        )
    }

    /// Center of pixel `(row, col)`
    pub fn pixel_center(&self, row: usize, col: usize) -> GeoPoint {
        GeoPoint {
            lon: self.top_left_x + (col as f64 + 0.5) * self.pixel_width,
            lat: self.top_left_y + (row as f64 + 0.5) * self.pixel_height,
        }
    }

    /// Pixel containing `point`, which may fall outside the raster
    pub fn pixel_of(&self, point: &GeoPoint) -> (isize, isize) {
        let col = ((point.lon - self.top_left_x) / self.pixel_width).floor() as isize;
        let row = ((point.lat - self.top_left_y) / self.pixel_height).floor() as isize;
        (row, col)
    }

    /// Pixel containing `point` if it lies inside a raster of `dim`
    pub fn pixel_within(&self, point: &GeoPoint, dim: (usize, usize)) -> Option<(usize, usize)> {
        let (row, col) = self.pixel_of(point);
        if row >= 0 && col >= 0 && (row as usize) < dim.0 && (col as usize) < dim.1 {
            Some((row as usize, col as usize))
        } else {
            None
        }
    }

    /// Footprint of a raster of `dim` on this grid
    pub fn footprint(&self, dim: (usize, usize)) -> BoundingBox {
        let x0 = self.top_left_x;
        let x1 = self.top_left_x + dim.1 as f64 * self.pixel_width;
        let y0 = self.top_left_y;
        let y1 = self.top_left_y + dim.0 as f64 * self.pixel_height;
        BoundingBox {
            min_lon: x0.min(x1),
            max_lon: x0.max(x1),
            min_lat: y0.min(y1),
            max_lat: y0.max(y1),
        }
    }
}

/// One timestamped raster capture from the archive
#[derive(Debug, Clone)]
pub struct Observation {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub transform: GeoTransform,
    pub bands: HashMap<Band, Raster>,
    /// Implicit validity mask shared by all bands
    pub mask: Mask,
}

impl Observation {
    /// Build an observation, checking every band shares one shape
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        transform: GeoTransform,
        bands: HashMap<Band, Raster>,
    ) -> AnnotResult<Self> {
        let id = id.into();
        let dim = bands
            .values()
            .next()
            .map(|b| b.dim())
            .ok_or_else(|| AnnotError::InvalidRaster(format!("Observation {} has no bands", id)))?;

        if let Some((band, raster)) = bands.iter().find(|(_, r)| r.dim() != dim) {
            return Err(AnnotError::InvalidRaster(format!(
                "Observation {}: band {} is {:?}, expected {:?}",
                id,
                band,
                raster.dim(),
                dim
            )));
        }

        Ok(Self {
            id,
            timestamp,
            transform,
            bands,
            mask: Mask::from_elem(dim, true),
        })
    }

    /// Replace the implicit validity mask
    pub fn with_mask(mut self, mask: Mask) -> AnnotResult<Self> {
        if mask.dim() != self.dim() {
            return Err(AnnotError::InvalidRaster(format!(
                "Mask {:?} does not match observation {} ({:?})",
                mask.dim(),
                self.id,
                self.dim()
            )));
        }
        self.mask = mask;
        Ok(self)
    }

    pub fn dim(&self) -> (usize, usize) {
        self.mask.dim()
    }

    pub fn footprint(&self) -> BoundingBox {
        self.transform.footprint(self.dim())
    }

    pub fn band(&self, band: Band) -> AnnotResult<&Raster> {
        self.bands.get(&band).ok_or_else(|| {
            AnnotError::InvalidRaster(format!("Observation {} lacks band {}", self.id, band))
        })
    }
}

/// Half-open calendar interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Parse two ISO dates (`YYYY-MM-DD`)
    pub fn parse(start: &str, end: &str) -> AnnotResult<Self> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| AnnotError::Config(format!("Invalid date '{}': {}", s, e)))
        };
        Ok(Self::new(parse(start)?, parse(end)?))
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.start.and_time(NaiveTime::MIN))
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.end.and_time(NaiveTime::MIN))
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        *timestamp >= self.start_time() && *timestamp < self.end_time()
    }

    /// Layer label and composite id, `start_end`
    pub fn label(&self) -> String {
        format!("{}_{}", self.start.format("%Y-%m-%d"), self.end.format("%Y-%m-%d"))
    }
}

/// Display stretch parameters for a three-band layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisParams {
    pub min: f32,
    pub max: f32,
    pub bands: [Band; 3],
}

/// Band-to-color assignment of one composite layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerStyle {
    /// B4, B3, B2
    TrueColor,
    /// B8, B4, B3
    FalseColor,
}

impl LayerStyle {
    pub fn flipped(self) -> Self {
        match self {
            LayerStyle::TrueColor => LayerStyle::FalseColor,
            LayerStyle::FalseColor => LayerStyle::TrueColor,
        }
    }

    pub fn vis_params(self) -> VisParams {
        let bands = match self {
            LayerStyle::TrueColor => [Band::B4, Band::B3, Band::B2],
            LayerStyle::FalseColor => [Band::B8, Band::B4, Band::B3],
        };
        VisParams { min: 0.0, max: 3000.0, bands }
    }
}

impl std::fmt::Display for LayerStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerStyle::TrueColor => write!(f, "true color"),
            LayerStyle::FalseColor => write!(f, "false color"),
        }
    }
}

/// Per-pixel quality mosaic over one date window
#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    /// `start_end` of the source window
    pub id: String,
    pub transform: GeoTransform,
    pub bands: HashMap<Band, Raster>,
    pub mask: Mask,
    /// Observations that intersected the window and region
    pub source_count: usize,
}

impl Composite {
    /// Fully masked composite on the given grid
    pub fn empty(id: impl Into<String>, transform: GeoTransform, dim: (usize, usize)) -> Self {
        let bands = COMPOSITE_BANDS
            .iter()
            .map(|&b| (b, Raster::zeros(dim)))
            .collect();
        Self {
            id: id.into(),
            transform,
            bands,
            mask: Mask::from_elem(dim, false),
            source_count: 0,
        }
    }

    /// True when no pixel carries data
    pub fn is_empty(&self) -> bool {
        self.source_count == 0 || !self.mask.iter().any(|&v| v)
    }

    pub fn dim(&self) -> (usize, usize) {
        self.mask.dim()
    }

    pub fn band(&self, band: Band) -> Option<&Raster> {
        self.bands.get(&band)
    }

    pub fn valid_pixels(&self) -> usize {
        self.mask.iter().filter(|&&v| v).count()
    }
}

/// Categorical raster used for the auxiliary thematic layer
#[derive(Debug, Clone, PartialEq)]
pub struct ThematicRaster {
    pub id: String,
    pub transform: GeoTransform,
    pub values: Raster,
}

impl ThematicRaster {
    /// Copy with every pixel at or below zero masked out
    pub fn masked_positive(&self) -> (Raster, Mask) {
        (self.values.clone(), self.values.mapv(|v| v > 0.0))
    }
}

/// One point of an index series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexSample {
    pub timestamp: DateTime<Utc>,
    /// `None` when every footprint pixel was masked
    pub value: Option<f32>,
}

/// Time-ordered vegetation index values at one point
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IndexSeries {
    /// Canonical index band name, e.g. `NDVI`
    pub band_name: String,
    pub samples: Vec<IndexSample>,
}

impl IndexSeries {
    pub fn iter(&self) -> impl Iterator<Item = &IndexSample> + '_ {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Non-missing values in time order
    pub fn values(&self) -> Vec<f32> {
        self.samples.iter().filter_map(|s| s.value).collect()
    }
}

/// Error types for annotation processing
#[derive(Debug, thiserror::Error)]
pub enum AnnotError {
    #[error("Invalid point number: '{0}'")]
    InvalidIndexInput(String),

    #[error("No such point: {0}")]
    NoSuchPoint(i64),

    #[error("Geospatial data service error: {0}")]
    RemoteService(String),

    #[error("Invalid raster: {0}")]
    InvalidRaster(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for annotation operations
pub type AnnotResult<T> = Result<T, AnnotError>;
