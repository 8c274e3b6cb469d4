//! Coverage accounting: spatial, temporal and audio.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spatial coverage of the tiling pass.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SpatialCoverage {
    pub tile_size: u32,
    pub stride: u32,
    pub sr_used: bool,
    /// Fraction of pixels covered by the union of tile placements
    pub pixels_covered_pct: f64,
    pub min_detectable_px: u32,
}

/// Temporal coverage of the frame extraction.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TemporalCoverage {
    pub frame_stride: u32,
    pub frames_analyzed_pct: f64,
}

/// Audio trace coverage.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AudioCoverage {
    /// Fraction of audio duration with a valid loudness sample
    pub lufs_trace_pct: f64,
    /// Fraction of speech-classified audio with a clarity score.
    /// 100 by convention when no speech was detected.
    pub stoi_pct: f64,
}

/// Coverage metrics for a whole job. Monotonic within the job: derived only
/// from detector outputs that actually executed.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CoverageReport {
    pub spatial: SpatialCoverage,
    pub temporal: TemporalCoverage,
    pub audio: AudioCoverage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_report_serde_shape() {
        let report = CoverageReport {
            spatial: SpatialCoverage {
                tile_size: 512,
                stride: 256,
                sr_used: false,
                pixels_covered_pct: 100.0,
                min_detectable_px: 8,
            },
            temporal: TemporalCoverage {
                frame_stride: 1,
                frames_analyzed_pct: 100.0,
            },
            audio: AudioCoverage {
                lufs_trace_pct: 100.0,
                stoi_pct: 100.0,
            },
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["spatial"]["pixels_covered_pct"], 100.0);
        assert_eq!(json["temporal"]["frame_stride"], 1);
        assert_eq!(json["audio"]["stoi_pct"], 100.0);
    }
}
