//! Annotation core: compositing, index extraction and navigation

pub mod cloud_mask;
pub mod composite;
pub mod scheduler;
pub mod index_series;
pub mod navigator;

// Re-export main types
pub use cloud_mask::CloudMaskFilter;
pub use composite::CompositeBuilder;
pub use scheduler::{window_table, style_for, style_table, CompositeScheduler, LayerContent, MapLayer, WindowEntry};
pub use index_series::{coordinate_labels, IndexChart, IndexExtractor};
pub use navigator::{parse_index, transition, AnnotationNavigator, Effect, NavEvent, NavigatorState};
