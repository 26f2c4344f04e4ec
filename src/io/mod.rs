//! Collaborator boundaries: the image archive, the sample source and the
//! display toolkit

pub mod archive;
pub mod display;
pub mod samples;

pub use archive::{ImageArchive, InMemoryArchive};
pub use display::{Display, Frame, MemoryDisplay, SeriesPanel};
pub use samples::{InMemorySamples, SampleSource};
