use chrono::NaiveDate;

use crate::config::{AnnotationConfig, ThematicParams};
use crate::core::composite::CompositeBuilder;
use crate::io::ImageArchive;
use crate::types::{
    AnnotResult, BoundingBox, Composite, DateWindow, GeoTransform, LayerStyle, Mask, Raster,
    VisParams,
};
use crate::types::LayerStyle::{FalseColor as FC, TrueColor as TC};

/// One compositing period with its mode-`true` style and default visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEntry {
    pub window: DateWindow,
    pub base_style: LayerStyle,
    pub visible: bool,
}

/// 2024-09-01 .. 2025-05-07 compositing periods
const WINDOWS: [((i32, u32, u32), (i32, u32, u32), LayerStyle, bool); 17] = [
    ((2024, 9, 1), (2024, 9, 15), FC, false),
    ((2024, 9, 15), (2024, 9, 30), FC, true),
    ((2024, 9, 30), (2024, 10, 15), FC, false),
    ((2024, 10, 15), (2024, 10, 31), FC, false),
    ((2024, 10, 31), (2024, 11, 15), FC, false),
    ((2024, 11, 15), (2024, 11, 30), FC, false),
    ((2024, 11, 30), (2024, 12, 15), FC, false),
    ((2024, 12, 15), (2024, 12, 31), FC, false),
    ((2024, 12, 31), (2025, 1, 15), FC, false),
    ((2025, 1, 15), (2025, 1, 31), FC, true),
    ((2025, 1, 31), (2025, 2, 14), FC, false),
    ((2025, 2, 14), (2025, 2, 28), FC, true),
    ((2025, 2, 28), (2025, 3, 15), FC, false),
    ((2025, 3, 15), (2025, 3, 31), FC, true),
    ((2025, 3, 31), (2025, 4, 15), TC, true),
    ((2025, 4, 15), (2025, 4, 30), TC, true),
    ((2025, 4, 30), (2025, 5, 7), TC, true),
];

/// The canonical window table in chronological order
pub fn window_table() -> Vec<WindowEntry> {
    let date = |(y, m, d): (i32, u32, u32)| NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default();
    WINDOWS
        .iter()
        .map(|&(start, end, base_style, visible)| WindowEntry {
            window: DateWindow::new(date(start), date(end)),
            base_style,
            visible,
        })
        .collect()
}

/// Style of a window under `mode`; `false` swaps true and false color
pub fn style_for(base: LayerStyle, mode: bool) -> LayerStyle {
    if mode {
        base
    } else {
        base.flipped()
    }
}

/// `(label, style, visible)` for every window under `mode`
pub fn style_table(windows: &[WindowEntry], mode: bool) -> Vec<(String, LayerStyle, bool)> {
    windows
        .iter()
        .map(|e| (e.window.label(), style_for(e.base_style, mode), e.visible))
        .collect()
}

/// What a map layer draws
#[derive(Debug, Clone, PartialEq)]
pub enum LayerContent {
    Composite {
        composite: Composite,
        style: LayerStyle,
        vis: VisParams,
    },
    Thematic {
        transform: GeoTransform,
        values: Raster,
        mask: Mask,
        palette: Vec<String>,
        min: f32,
        max: f32,
    },
    /// The data service could not produce this layer
    Failed { error: String },
}

/// One toggleable map layer
#[derive(Debug, Clone, PartialEq)]
pub struct MapLayer {
    pub label: String,
    pub content: LayerContent,
    pub visible: bool,
}

impl MapLayer {
    pub fn is_failed(&self) -> bool {
        matches!(self.content, LayerContent::Failed { .. })
    }

    /// Composite carried by this layer, if any
    pub fn composite(&self) -> Option<&Composite> {
        match &self.content {
            LayerContent::Composite { composite, .. } => Some(composite),
            _ => None,
        }
    }

    pub fn style(&self) -> Option<LayerStyle> {
        match &self.content {
            LayerContent::Composite { style, .. } => Some(*style),
            _ => None,
        }
    }
}

/// Builds one styled composite layer per date window plus the thematic layer
pub struct CompositeScheduler {
    builder: CompositeBuilder,
    windows: Vec<WindowEntry>,
    region: BoundingBox,
    thematic: ThematicParams,
}

impl CompositeScheduler {
    pub fn new(builder: CompositeBuilder, region: BoundingBox, thematic: ThematicParams) -> Self {
        Self {
            builder,
            windows: window_table(),
            region,
            thematic,
        }
    }

    pub fn from_config(config: &AnnotationConfig) -> Self {
        let builder = CompositeBuilder::new(
            config.collection.clone(),
            config.composite.clone(),
            config.cloud_mask.clone(),
        );
        Self::new(builder, config.aoi, config.thematic.clone())
    }

    pub fn windows(&self) -> &[WindowEntry] {
        &self.windows
    }

    /// Layers for the canonical window table over the whole region
    pub fn schedule(&self, archive: &dyn ImageArchive, mode: bool) -> Vec<MapLayer> {
        self.schedule_windows(archive, mode, &self.windows, &self.region)
    }

    /// Layers for the canonical window table over `view` clipped to the
    /// region. A view outside the region is composited as is.
    pub fn schedule_view(&self, archive: &dyn ImageArchive, mode: bool, view: &BoundingBox) -> Vec<MapLayer> {
        let region = self.region.intersection(view).unwrap_or_else(|| {
            log::warn!("View {:?} lies outside the area of interest", view);
            *view
        });
        self.schedule_windows(archive, mode, &self.windows, &region)
    }

    /// Layers for `windows` in chronological order followed by the thematic
    /// layer. A failing window only fails its own layer.
    pub fn schedule_windows(
        &self,
        archive: &dyn ImageArchive,
        mode: bool,
        windows: &[WindowEntry],
        region: &BoundingBox,
    ) -> Vec<MapLayer> {
        log::info!(
            "Scheduling {} composites ({} mode)",
            windows.len(),
            if mode { "false color first" } else { "true color first" }
        );

        let mut ordered: Vec<&WindowEntry> = windows.iter().collect();
        ordered.sort_by_key(|e| (e.window.start, e.window.end));

        let build = |entry: &WindowEntry| -> MapLayer {
            let style = style_for(entry.base_style, mode);
            let content = match self.builder.build(archive, &entry.window, region) {
                Ok(composite) => LayerContent::Composite {
                    composite,
                    style,
                    vis: style.vis_params(),
                },
                Err(e) => {
                    log::warn!("Composite {} failed: {}", entry.window.label(), e);
                    LayerContent::Failed { error: e.to_string() }
                }
            };
            MapLayer {
                label: entry.window.label(),
                content,
                visible: entry.visible,
            }
        };

        #[cfg(feature = "parallel")]
        let mut layers: Vec<MapLayer> = {
            use rayon::prelude::*;
            ordered.par_iter().map(|e| build(e)).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let mut layers: Vec<MapLayer> = ordered.iter().map(|e| build(e)).collect();

        layers.push(self.thematic_layer(archive));
        layers
    }

    fn thematic_layer(&self, archive: &dyn ImageArchive) -> MapLayer {
        let content = match self.load_thematic(archive) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("Thematic layer {} failed: {}", self.thematic.label, e);
                LayerContent::Failed { error: e.to_string() }
            }
        };
        MapLayer {
            label: self.thematic.label.clone(),
            content,
            visible: true,
        }
    }

    fn load_thematic(&self, archive: &dyn ImageArchive) -> AnnotResult<LayerContent> {
        let raster = archive.thematic(&self.thematic.asset_id)?;
        let (values, mask) = raster.masked_positive();
        Ok(LayerContent::Thematic {
            transform: raster.transform,
            values,
            mask,
            palette: self.thematic.palette.clone(),
            min: self.thematic.min,
            max: self.thematic.max,
        })
    }
}
