//! Testing utilities for chord pipelines.
//!
//! This module provides:
//! - A recording flow that captures terminal outcomes in order
//! - A probe that records what a stage's transform was called with

mod mocks;

pub use mocks::{Recorded, RecordingFlow, TransformProbe};
