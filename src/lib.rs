//! Land-cover sample expansion: segmentation proposals around labelled
//! reference points, cleaned by time-series similarity to the reference.

pub mod color;
pub mod config;
pub mod data;
pub mod datacube;
pub mod error;
pub mod geo;
pub mod patch;
pub mod pipeline;
pub mod segment;
pub mod similarity;
pub mod state;

pub use config::SamplerConfig;
pub use error::{Result, SamplerError};
pub use pipeline::{PointOutcome, PointStatus, SampleOrchestrator};
