//! Audio metering and display
//!
//! This module provides:
//! - Loudness extraction from raw float32 capture fragments
//! - Rendering of a loudness value as a one-shot reading, a numeric
//!   stream or a bar graph

mod display;
mod level;

pub use display::{Display, DisplayMode, Flow};
pub use level::first_sample_magnitude;
