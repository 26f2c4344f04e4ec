//! Annotation navigator: the state machine stepping through sample points.
//!
//! Transitions are computed by the pure [`transition`] function; the
//! [`AnnotationNavigator`] then runs the resulting [`Effect`]s against its
//! archive, sample source and display.

use regex::Regex;

use crate::config::{AnnotationConfig, NavigatorParams};
use crate::core::index_series::{coordinate_labels, IndexChart, IndexExtractor};
use crate::core::scheduler::CompositeScheduler;
use crate::io::{Display, Frame, ImageArchive, SampleSource, SeriesPanel};
use crate::types::{AnnotError, AnnotResult, BoundingBox, GeoPoint};

/// The only mutable state of the annotation core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigatorState {
    /// `shuffled_i` of the sample on screen
    pub current_index: i64,
    /// `true`: false color first, `false`: true color first
    pub mode: bool,
}

impl Default for NavigatorState {
    fn default() -> Self {
        Self {
            current_index: 0,
            mode: true,
        }
    }
}

/// Inbound user events
#[derive(Debug, Clone, PartialEq)]
pub enum NavEvent {
    /// Text typed into the point-number box
    GoTo(String),
    Next,
    Previous,
    ToggleMode,
    /// User pointed at a map location
    Inspect(GeoPoint),
    ShowAllLayers,
    HideAllLayers,
}

/// Work requested by a transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effect {
    /// Rebuild every layer and the series for the current sample
    Render,
    /// Recompute only the series, for an arbitrary point
    Inspect(GeoPoint),
    SetLayersVisible(bool),
}

/// Leading whitespace, optional sign, then digits
const LEADING_INTEGER: &str = r"^\s*([+-]?\d+)";

/// Leading-integer parse of a point-number entry (`" 12abc"` → 12)
pub fn parse_index(text: &str) -> AnnotResult<i64> {
    let re = Regex::new(LEADING_INTEGER)
        .map_err(|e| AnnotError::Config(format!("Regex error: {}", e)))?;

    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .ok_or_else(|| AnnotError::InvalidIndexInput(text.to_string()))
}

/// Next state and effects for `event`
pub fn transition(state: NavigatorState, event: &NavEvent) -> AnnotResult<(NavigatorState, Vec<Effect>)> {
    let next = match event {
        NavEvent::GoTo(text) => NavigatorState {
            current_index: parse_index(text)?,
            ..state
        },
        NavEvent::Next => NavigatorState {
            current_index: state.current_index.saturating_add(1),
            ..state
        },
        NavEvent::Previous if state.current_index > 0 => NavigatorState {
            current_index: state.current_index - 1,
            ..state
        },
        NavEvent::Previous => return Ok((state, Vec::new())),
        NavEvent::ToggleMode => NavigatorState {
            mode: !state.mode,
            ..state
        },
        NavEvent::Inspect(point) => return Ok((state, vec![Effect::Inspect(*point)])),
        NavEvent::ShowAllLayers => return Ok((state, vec![Effect::SetLayersVisible(true)])),
        NavEvent::HideAllLayers => return Ok((state, vec![Effect::SetLayersVisible(false)])),
    };
    Ok((next, vec![Effect::Render]))
}

/// Drives compositing and index extraction for the sample under annotation
pub struct AnnotationNavigator<A: ImageArchive, S: SampleSource, D: Display> {
    state: NavigatorState,
    params: NavigatorParams,
    scheduler: CompositeScheduler,
    extractor: IndexExtractor,
    archive: A,
    samples: S,
    display: D,
    generation: u64,
}

impl<A: ImageArchive, S: SampleSource, D: Display> AnnotationNavigator<A, S, D> {
    pub fn new(
        config: &AnnotationConfig,
        archive: A,
        samples: S,
        display: D,
    ) -> Self {
        Self {
            state: NavigatorState {
                current_index: config.navigator.initial_index,
                mode: config.navigator.initial_mode,
            },
            params: config.navigator.clone(),
            scheduler: CompositeScheduler::from_config(config),
            extractor: IndexExtractor::from_config(config),
            archive,
            samples,
            display,
            generation: 0,
        }
    }

    pub fn state(&self) -> NavigatorState {
        self.state
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn archive(&self) -> &A {
        &self.archive
    }

    pub fn archive_mut(&mut self) -> &mut A {
        &mut self.archive
    }

    pub fn samples(&self) -> &S {
        &self.samples
    }

    /// Initial render of the configured start point
    pub fn start(&mut self) -> AnnotResult<()> {
        log::info!(
            "Starting annotation at point {} ({} samples)",
            self.state.current_index,
            self.samples.len()
        );
        self.run_effects(self.state, vec![Effect::Render])
    }

    pub fn go_to(&mut self, text: &str) -> AnnotResult<()> {
        self.handle(NavEvent::GoTo(text.to_string()))
    }

    pub fn next(&mut self) -> AnnotResult<()> {
        self.handle(NavEvent::Next)
    }

    pub fn previous(&mut self) -> AnnotResult<()> {
        self.handle(NavEvent::Previous)
    }

    pub fn toggle_mode(&mut self) -> AnnotResult<()> {
        self.handle(NavEvent::ToggleMode)
    }

    pub fn inspect(&mut self, point: GeoPoint) -> AnnotResult<()> {
        self.handle(NavEvent::Inspect(point))
    }

    pub fn show_all_layers(&mut self) -> AnnotResult<()> {
        self.handle(NavEvent::ShowAllLayers)
    }

    pub fn hide_all_layers(&mut self) -> AnnotResult<()> {
        self.handle(NavEvent::HideAllLayers)
    }

    /// Apply one event. On failure the state is left as it was before the
    /// event and the fault is reported to the display.
    pub fn handle(&mut self, event: NavEvent) -> AnnotResult<()> {
        log::debug!("Event {:?} in state {:?}", event, self.state);
        let prior = self.state;

        let (next, effects) = match transition(prior, &event) {
            Ok(step) => step,
            Err(e) => {
                log::warn!("Ignoring {:?}: {}", event, e);
                self.display.report_fault(&e);
                return Err(e);
            }
        };

        self.state = next;
        self.run_effects(prior, effects)
    }

    fn run_effects(&mut self, prior: NavigatorState, effects: Vec<Effect>) -> AnnotResult<()> {
        for effect in effects {
            match effect {
                Effect::Render => {
                    if let Err(e) = self.render() {
                        log::warn!(
                            "Render of point {} failed, staying on {}: {}",
                            self.state.current_index,
                            prior.current_index,
                            e
                        );
                        self.state = prior;
                        self.display.report_fault(&e);
                        return Err(e);
                    }
                }
                Effect::Inspect(point) => {
                    let generation = self.next_generation();
                    let panel = self.series_panel(&point, generation);
                    self.display.present_series(panel);
                }
                Effect::SetLayersVisible(visible) => self.display.set_all_layers_visible(visible),
            }
        }
        Ok(())
    }

    /// Rebuild the whole view for the current state. The sample is resolved
    /// before anything on screen changes.
    fn render(&mut self) -> AnnotResult<()> {
        let index = self.state.current_index;
        let point = self.samples.lookup(index)?;
        let generation = self.next_generation();

        log::info!(
            "Rendering point {} at ({:.4}, {:.4}), generation {}",
            index,
            point.lon,
            point.lat,
            generation
        );

        let view = BoundingBox::around(&point, self.params.view_half_extent_deg);
        let layers = self.scheduler.schedule_view(&self.archive, self.state.mode, &view);
        let series = self.series_panel(&point, generation);

        self.display.present(Frame {
            generation,
            layers,
            center: point,
            zoom: self.params.zoom_level,
            marker: point,
            marker_color: self.params.marker_color.clone(),
            series,
        });
        self.display.set_point_number(format!("Current Point Number: {}", index));
        Ok(())
    }

    fn series_panel(&self, point: &GeoPoint, generation: u64) -> SeriesPanel {
        let (lon_label, lat_label) = coordinate_labels(point);
        let chart = match self.extractor.extract_default(&self.archive, point) {
            Ok(series) => Ok(IndexChart::new(series, self.state.current_index)),
            Err(e) => {
                log::warn!("Index series failed: {}", e);
                Err(e.to_string())
            }
        };
        SeriesPanel {
            generation,
            chart,
            lon_label,
            lat_label,
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}
