//! Storefront Lens
//!
//! Labels storefront photos: several text recognition passes produce
//! candidates, a brightness/position-aware scorer picks the best one, and a
//! nearby-place search (or reverse geocoding) supplies the name, address,
//! phone number and category saved with the photo.

pub mod capture;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod places;
pub mod storage;
pub mod vision;

pub use error::{PipelineError, PipelineResult};
pub use pipeline::{CaptureOutcome, CapturePipeline, CaptureReport, Collaborators};
