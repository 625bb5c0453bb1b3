//! Typed views of the `frame` and `stats` payloads.
//!
//! The relay itself never needs these; it forwards payloads as opaque JSON.
//! They exist for producers built on this crate, such as the mock generator.

use serde::{Deserialize, Serialize};

/// Metadata for one processed video frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePayload {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub processing_mode: u8,
    /// Milliseconds spent processing the frame.
    pub processing_time: f64,
}

/// Rolling performance summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsPayload {
    #[serde(rename = "averageFPS")]
    pub average_fps: f64,
    #[serde(rename = "maxFPS")]
    pub max_fps: f64,
    #[serde(rename = "minFPS")]
    pub min_fps: f64,
    #[serde(rename = "averageProcessingTime")]
    pub average_processing_time: f64,
    #[serde(rename = "totalFrames")]
    pub total_frames: u64,
    /// Milliseconds since the producer started.
    pub uptime: u64,
}
