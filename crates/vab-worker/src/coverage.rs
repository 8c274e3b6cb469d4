//! Coverage computation and the quality gate.

use vab_media::detect::audio::AudioReport;
use vab_media::detect::tiling;
use vab_media::prep::VideoSourceMeta;
use vab_models::{
    AnalysisConfig, AudioCoverage, BundleState, CoverageReport, ShotAnalysis, SpatialCoverage,
    TemporalCoverage,
};

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Compute the coverage report from what actually executed. Values derive
/// only from real detector output; a skipped detector lowers its metric.
pub fn compute_coverage(
    meta: &VideoSourceMeta,
    shots: &[ShotAnalysis],
    audio: &AudioReport,
    cfg: &AnalysisConfig,
) -> CoverageReport {
    let analyzed = meta.decoded_frames * meta.frame_stride as u64;
    let frames_pct = if meta.total_frames == 0 {
        0.0
    } else {
        round2(100.0 * (analyzed.min(meta.total_frames)) as f64 / meta.total_frames as f64)
    };

    // Union of tile placements over the source resolution. The grid always
    // pushes edge tiles inward, so any tiled run covers the full frame; a
    // tiling-ablated run still covers it with the coarse full-frame pass.
    let pixels_covered_pct = if cfg.detect.two_pass {
        let tiles = tiling::tile_grid(
            meta.width,
            meta.height,
            cfg.detect.tile.size,
            cfg.detect.tile.stride,
        );
        round2(tiling::coverage_pct(&tiles, meta.width, meta.height))
    } else {
        100.0
    };

    CoverageReport {
        spatial: SpatialCoverage {
            tile_size: cfg.detect.tile.size,
            stride: cfg.detect.tile.stride,
            sr_used: shots.iter().any(|s| s.detectors.sr_used),
            pixels_covered_pct,
            min_detectable_px: cfg.detect.small_object_min_px,
        },
        temporal: TemporalCoverage {
            frame_stride: cfg.runtime.frame_stride,
            frames_analyzed_pct: frames_pct,
        },
        audio: AudioCoverage {
            lufs_trace_pct: round2(audio.lufs_trace_pct),
            stoi_pct: round2(audio.stoi_pct),
        },
    }
}

/// Evaluate the quality gate. Returns the state contribution and the reasons
/// for every threshold missed.
pub fn enforce_gates(coverage: &CoverageReport, cfg: &AnalysisConfig) -> (BundleState, Vec<String>) {
    let th = &cfg.coverage;
    let mut state = BundleState::Ok;
    let mut reasons = Vec::new();

    if coverage.temporal.frames_analyzed_pct < th.frames_analyzed_pct {
        state = BundleState::Degraded;
        reasons.push("low_temporal_coverage".to_string());
    }

    if coverage.spatial.min_detectable_px > th.min_detectable_px {
        state = BundleState::Degraded;
        reasons.push("min_detectable_px_too_large".to_string());
    }

    if coverage.audio.lufs_trace_pct < th.lufs_trace_pct {
        state = BundleState::Degraded;
        reasons.push("lufs_trace_missing".to_string());
    }

    if coverage.audio.stoi_pct < th.stoi_pct {
        state = BundleState::Degraded;
        reasons.push("low_stoi_coverage".to_string());
    }

    (state, reasons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use vab_models::VideoId;

    fn meta(total: u64, decoded: u64, stride: u32) -> VideoSourceMeta {
        VideoSourceMeta {
            video_id: VideoId::new("t1"),
            path: PathBuf::from("video.mp4"),
            sha256: String::new(),
            fps: 30.0,
            width: 640,
            height: 360,
            total_frames: total,
            duration_s: total as f64 / 30.0,
            audio_path: PathBuf::from("audio.wav"),
            frame_stride: stride,
            decoded_frames: decoded,
        }
    }

    fn full_audio() -> AudioReport {
        AudioReport {
            lufs_trace_pct: 100.0,
            stoi_pct: 100.0,
        }
    }

    #[test]
    fn full_decode_is_full_temporal_coverage() {
        let cfg = AnalysisConfig::default();
        let cov = compute_coverage(&meta(300, 300, 1), &[], &full_audio(), &cfg);
        assert_eq!(cov.temporal.frames_analyzed_pct, 100.0);
        assert_eq!(cov.spatial.pixels_covered_pct, 100.0);
        let (state, reasons) = enforce_gates(&cov, &cfg);
        assert_eq!(state, BundleState::Ok);
        assert!(reasons.is_empty());
    }

    #[test]
    fn partial_decode_degrades() {
        let cfg = AnalysisConfig::default();
        let cov = compute_coverage(&meta(300, 200, 1), &[], &full_audio(), &cfg);
        assert!(cov.temporal.frames_analyzed_pct < 99.0);
        let (state, reasons) = enforce_gates(&cov, &cfg);
        assert_eq!(state, BundleState::Degraded);
        assert!(reasons.contains(&"low_temporal_coverage".to_string()));
    }

    #[test]
    fn missing_audio_trace_degrades() {
        let cfg = AnalysisConfig::default();
        let audio = AudioReport {
            lufs_trace_pct: 0.0,
            stoi_pct: 0.0,
        };
        let cov = compute_coverage(&meta(300, 300, 1), &[], &audio, &cfg);
        let (state, reasons) = enforce_gates(&cov, &cfg);
        assert_eq!(state, BundleState::Degraded);
        assert!(reasons.contains(&"lufs_trace_missing".to_string()));
        assert!(reasons.contains(&"low_stoi_coverage".to_string()));
    }

    #[test]
    fn tiny_video_still_covers_all_pixels() {
        let cfg = AnalysisConfig::default();
        let mut m = meta(60, 60, 1);
        m.width = 320;
        m.height = 240;
        let cov = compute_coverage(&m, &[], &full_audio(), &cfg);
        assert_eq!(cov.spatial.pixels_covered_pct, 100.0);
    }
}
