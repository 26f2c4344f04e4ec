//! s2annot: Sentinel-2 point annotation core
//!
//! Steps an annotator through a shuffled set of sample points. For each point
//! it builds a season of half-month quality-mosaic composites and a per-date
//! NDVI series, and hands both to a display toolkit.

pub mod types;
pub mod config;
pub mod raster;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    AnnotError, AnnotResult, Band, BoundingBox, Composite, DateWindow, GeoPoint, GeoTransform,
    IndexSample, IndexSeries, LayerStyle, Observation, ThematicRaster, VisParams,
};

pub use config::AnnotationConfig;
pub use io::{ImageArchive, InMemoryArchive, InMemorySamples, MemoryDisplay, SampleSource};
pub use crate::core::{
    AnnotationNavigator, CompositeBuilder, CompositeScheduler, IndexExtractor, NavEvent,
    NavigatorState,
};

#[cfg(feature = "python")]
mod python {
    use pyo3::prelude::*;

    use crate::config::AnnotationConfig;
    use crate::core::AnnotationNavigator;
    use crate::io::{InMemoryArchive, InMemorySamples, MemoryDisplay, SampleSource};
    use crate::types::{AnnotError, GeoPoint};

    type MemoryNavigator = AnnotationNavigator<InMemoryArchive, InMemorySamples, MemoryDisplay>;

    fn to_py_err(e: AnnotError) -> PyErr {
        match e {
            AnnotError::InvalidIndexInput(_) | AnnotError::NoSuchPoint(_) | AnnotError::Config(_) => {
                PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
            }
            _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e)),
        }
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_class::<PyNavigator>()?;
        Ok(())
    }

    /// Python wrapper for the annotation navigator over in-memory collaborators
    #[pyclass(name = "Navigator")]
    struct PyNavigator {
        inner: MemoryNavigator,
    }

    #[pymethods]
    impl PyNavigator {
        #[new]
        #[pyo3(signature = (points, config_path=None))]
        fn new(points: Vec<(f64, f64)>, config_path: Option<String>) -> PyResult<Self> {
            let config = match config_path {
                Some(path) => AnnotationConfig::from_file(path),
                None => AnnotationConfig::load_or_default(),
            }
            .map_err(to_py_err)?;

            let samples = InMemorySamples::from_points(
                points.into_iter().map(|(lon, lat)| GeoPoint::new(lon, lat)),
            );
            let inner = AnnotationNavigator::new(
                &config,
                InMemoryArchive::new(),
                samples,
                MemoryDisplay::new(),
            );
            Ok(PyNavigator { inner })
        }

        fn start(&mut self) -> PyResult<()> {
            self.inner.start().map_err(to_py_err)
        }

        fn go_to(&mut self, text: &str) -> PyResult<()> {
            self.inner.go_to(text).map_err(to_py_err)
        }

        fn next(&mut self) -> PyResult<()> {
            self.inner.next().map_err(to_py_err)
        }

        fn previous(&mut self) -> PyResult<()> {
            self.inner.previous().map_err(to_py_err)
        }

        fn toggle_mode(&mut self) -> PyResult<()> {
            self.inner.toggle_mode().map_err(to_py_err)
        }

        fn inspect(&mut self, lon: f64, lat: f64) -> PyResult<()> {
            self.inner.inspect(GeoPoint::new(lon, lat)).map_err(to_py_err)
        }

        #[getter]
        fn current_index(&self) -> i64 {
            self.inner.state().current_index
        }

        #[getter]
        fn mode(&self) -> bool {
            self.inner.state().mode
        }

        #[getter]
        fn point_number(&self) -> String {
            self.inner.display().point_number.clone()
        }

        #[getter]
        fn layers(&self) -> Vec<(String, bool)> {
            self.inner
                .display()
                .layers()
                .iter()
                .map(|l| (l.label.clone(), l.visible))
                .collect()
        }

        /// `(rfc3339 date, value)` pairs of the series on screen
        #[getter]
        fn series(&self) -> Vec<(String, Option<f32>)> {
            match self.inner.display().series.as_ref().map(|p| &p.chart) {
                Some(Ok(chart)) => chart
                    .series
                    .iter()
                    .map(|s| (s.timestamp.to_rfc3339(), s.value))
                    .collect(),
                _ => Vec::new(),
            }
        }

        #[getter]
        fn faults(&self) -> Vec<String> {
            self.inner.display().faults.clone()
        }

        fn __repr__(&self) -> String {
            let state = self.inner.state();
            format!(
                "Navigator(current_index={}, mode={}, samples={})",
                state.current_index,
                state.mode,
                self.inner.samples().len()
            )
        }
    }
}
