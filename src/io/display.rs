use crate::core::index_series::IndexChart;
use crate::core::scheduler::MapLayer;
use crate::types::{AnnotError, GeoPoint};

/// Chart panel content: the series (or why it failed) and the two
/// coordinate labels of the charted point
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPanel {
    pub generation: u64,
    pub chart: Result<IndexChart, String>,
    pub lon_label: String,
    pub lat_label: String,
}

/// Everything one re-render puts on screen
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Strictly increasing per render; older frames must be dropped
    pub generation: u64,
    pub layers: Vec<MapLayer>,
    pub center: GeoPoint,
    pub zoom: u8,
    /// Highlighted sample point
    pub marker: GeoPoint,
    pub marker_color: String,
    pub series: SeriesPanel,
}

/// Display toolkit collaborator.
///
/// Output carries a generation number; an implementation receiving output
/// older than what it already shows discards it instead of drawing it.
pub trait Display {
    /// Replace everything on the map and in the chart panel
    fn present(&mut self, frame: Frame);

    /// Replace only the chart panel
    fn present_series(&mut self, panel: SeriesPanel);

    fn set_point_number(&mut self, text: String);

    fn set_all_layers_visible(&mut self, visible: bool);

    fn report_fault(&mut self, fault: &AnnotError);
}

/// Display that keeps the latest output in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryDisplay {
    pub frame: Option<Frame>,
    pub series: Option<SeriesPanel>,
    pub point_number: String,
    pub faults: Vec<String>,
    latest: u64,
}

impl MemoryDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layers(&self) -> &[MapLayer] {
        self.frame.as_ref().map(|f| f.layers.as_slice()).unwrap_or(&[])
    }

    pub fn marker(&self) -> Option<GeoPoint> {
        self.frame.as_ref().map(|f| f.marker)
    }

    fn accept(&mut self, generation: u64) -> bool {
        if generation < self.latest {
            log::debug!("Discarding stale output {} (showing {})", generation, self.latest);
            return false;
        }
        self.latest = generation;
        true
    }
}

impl Display for MemoryDisplay {
    fn present(&mut self, frame: Frame) {
        if self.accept(frame.generation) {
            self.series = Some(frame.series.clone());
            self.frame = Some(frame);
        }
    }

    fn present_series(&mut self, panel: SeriesPanel) {
        if self.accept(panel.generation) {
            self.series = Some(panel);
        }
    }

    fn set_point_number(&mut self, text: String) {
        self.point_number = text;
    }

    fn set_all_layers_visible(&mut self, visible: bool) {
        if let Some(frame) = self.frame.as_mut() {
            for layer in frame.layers.iter_mut() {
                layer.visible = visible;
            }
        }
    }

    fn report_fault(&mut self, fault: &AnnotError) {
        self.faults.push(fault.to_string());
    }
}
