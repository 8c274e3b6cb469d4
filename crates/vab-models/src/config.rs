//! Analysis configuration surface.
//!
//! Defaults mirror the documented recognized options; every field can be
//! overridden from the environment in the style of the worker config.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

/// Tiling pass geometry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct TileConfig {
    pub size: u32,
    pub stride: u32,
    /// Restrict the tiled pass to the native scale. Normally false; the
    /// fallback ladder flips it under resource pressure.
    pub single_scale: bool,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            size: 512,
            stride: 256,
            single_scale: false,
        }
    }
}

/// Super-resolution trigger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct SuperResConfig {
    pub enabled: bool,
    /// Frames shorter than this are upscaled 4x
    pub trigger_min_h: u32,
}

impl Default for SuperResConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_min_h: 1440,
        }
    }
}

/// Detection options.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DetectConfig {
    pub tile: TileConfig,
    pub superres: SuperResConfig,
    /// Smallest object edge the pipeline guarantees to see
    pub small_object_min_px: u32,
    /// Whether the tiled two-pass runs at all
    pub two_pass: bool,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            tile: TileConfig::default(),
            superres: SuperResConfig::default(),
            small_object_min_px: 8,
            two_pass: true,
        }
    }
}

/// Audio analysis options.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AudioConfig {
    pub target_lufs: f64,
    pub stoi_enabled: bool,
    pub stoi_min_ok: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            target_lufs: -14.0,
            stoi_enabled: true,
            stoi_min_ok: 0.8,
        }
    }
}

/// Runtime / scheduling options.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RuntimeConfig {
    /// Extract every Nth frame (1 = all frames)
    pub frame_stride: u32,
    /// GPU pool capacity `G`
    pub gpu_semaphore: usize,
    /// Frames handed to the VL reasoner per shot
    pub vl_context_max_frames: usize,
    /// Per-shot deadline for GPU-heavy detectors, seconds
    pub gpu_deadline_s: u64,
    /// Per-shot deadline for CPU detectors, seconds
    pub cpu_deadline_s: u64,
    /// Per-shot deadline for the VL call, seconds
    pub vl_deadline_s: u64,
    /// Fraction of shots with internal errors tolerated before degrading
    pub internal_error_budget_pct: f64,
    /// Fallback ladder step names, in firing order
    #[serde(default = "default_oom_fallback_order")]
    pub oom_fallback_order: Vec<String>,
}

/// Default ladder order: each step disables one capability.
pub fn default_oom_fallback_order() -> Vec<String> {
    vec![
        "mask_refine_off".to_string(),
        "sr_off".to_string(),
        "vl_ctx_shrink".to_string(),
        "tile_single_scale".to_string(),
    ]
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            frame_stride: 1,
            gpu_semaphore: 2,
            vl_context_max_frames: 12,
            gpu_deadline_s: 120,
            cpu_deadline_s: 30,
            vl_deadline_s: 60,
            internal_error_budget_pct: 20.0,
            oom_fallback_order: default_oom_fallback_order(),
        }
    }
}

/// Scene merge options.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MergeConfig {
    /// Minimum boundary SSIM for two shots to share a scene
    pub scene_ssim_min: f64,
    /// Maximum time gap between shots in one scene, seconds
    pub max_scene_gap_s: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            scene_ssim_min: 0.45,
            max_scene_gap_s: 2.0,
        }
    }
}

/// Quality-gate thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CoverageThresholds {
    pub frames_analyzed_pct: f64,
    pub lufs_trace_pct: f64,
    pub stoi_pct: f64,
    pub min_detectable_px: u32,
}

impl Default for CoverageThresholds {
    fn default() -> Self {
        Self {
            frames_analyzed_pct: 99.0,
            lufs_trace_pct: 100.0,
            stoi_pct: 90.0,
            min_detectable_px: 8,
        }
    }
}

/// Per-request ablation flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AblationFlags {
    #[serde(default)]
    pub no_sr: bool,
    #[serde(default)]
    pub no_tiling: bool,
    #[serde(default)]
    pub light_audio: bool,
}

/// The full analysis configuration handed to the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisConfig {
    pub detect: DetectConfig,
    pub audio: AudioConfig,
    pub runtime: RuntimeConfig,
    pub merge: MergeConfig,
    pub coverage: CoverageThresholds,
    pub ablation: AblationFlags,
}

impl AnalysisConfig {
    /// Load defaults with environment overrides.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.detect.tile.size = env_parse("TILE_SIZE", cfg.detect.tile.size);
        cfg.detect.tile.stride = env_parse("TILE_STRIDE", cfg.detect.tile.stride);
        cfg.detect.superres.enabled = env_bool("SUPERRES_ENABLED", cfg.detect.superres.enabled);
        cfg.detect.superres.trigger_min_h =
            env_parse("SUPERRES_TRIGGER_MIN_H", cfg.detect.superres.trigger_min_h);
        cfg.detect.small_object_min_px =
            env_parse("SMALL_OBJECT_MIN_PX", cfg.detect.small_object_min_px);
        cfg.audio.target_lufs = env_parse("LOUDNESS_TARGET_LUFS", cfg.audio.target_lufs);
        cfg.audio.stoi_enabled = env_bool("STOI_ENABLED", cfg.audio.stoi_enabled);
        cfg.audio.stoi_min_ok = env_parse("STOI_MIN_OK", cfg.audio.stoi_min_ok);
        cfg.runtime.frame_stride = env_parse("FRAME_STRIDE", cfg.runtime.frame_stride);
        cfg.runtime.gpu_semaphore = env_parse("GPU_SEMAPHORE", cfg.runtime.gpu_semaphore);
        cfg.runtime.vl_context_max_frames =
            env_parse("QWEN_CONTEXT_MAX_FRAMES", cfg.runtime.vl_context_max_frames);
        if let Ok(order) = std::env::var("OOM_FALLBACK_ORDER") {
            let parsed: Vec<String> = order
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                cfg.runtime.oom_fallback_order = parsed;
            }
        }
        cfg.coverage.frames_analyzed_pct =
            env_parse("COVERAGE_FRAMES_ANALYZED_PCT", cfg.coverage.frames_analyzed_pct);
        cfg.coverage.lufs_trace_pct =
            env_parse("COVERAGE_LUFS_TRACE_PCT", cfg.coverage.lufs_trace_pct);
        cfg.coverage.stoi_pct = env_parse("COVERAGE_STOI_PCT", cfg.coverage.stoi_pct);
        cfg
    }

    /// Fold ablation flags into the feature switches. Returns the status
    /// reasons the ablations contribute.
    pub fn apply_ablations(&mut self, flags: AblationFlags) -> Vec<String> {
        self.ablation = flags;
        let mut reasons = Vec::new();
        if flags.no_sr {
            self.detect.superres.enabled = false;
            reasons.push("sr_disabled_by_ablation".to_string());
        }
        if flags.no_tiling {
            self.detect.two_pass = false;
            reasons.push("tiling_disabled_by_ablation".to_string());
        }
        if flags.light_audio {
            self.audio.stoi_enabled = false;
            reasons.push("stoi_disabled_by_ablation".to_string());
        }
        reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AnalysisConfig::default();
        assert_eq!(cfg.detect.tile.size, 512);
        assert_eq!(cfg.detect.tile.stride, 256);
        assert_eq!(cfg.detect.small_object_min_px, 8);
        assert_eq!(cfg.runtime.frame_stride, 1);
        assert_eq!(cfg.runtime.vl_context_max_frames, 12);
        assert_eq!(cfg.coverage.frames_analyzed_pct, 99.0);
        assert_eq!(cfg.coverage.stoi_pct, 90.0);
    }

    #[test]
    fn ablations_disable_features() {
        let mut cfg = AnalysisConfig::default();
        let reasons = cfg.apply_ablations(AblationFlags {
            no_sr: true,
            no_tiling: true,
            light_audio: false,
        });
        assert!(!cfg.detect.superres.enabled);
        assert!(!cfg.detect.two_pass);
        assert!(cfg.audio.stoi_enabled);
        assert!(reasons.contains(&"sr_disabled_by_ablation".to_string()));
        assert!(reasons.contains(&"tiling_disabled_by_ablation".to_string()));
        assert_eq!(reasons.len(), 2);
    }

    #[test]
    fn light_audio_disables_stoi_only() {
        let mut cfg = AnalysisConfig::default();
        cfg.apply_ablations(AblationFlags {
            light_audio: true,
            ..Default::default()
        });
        assert!(!cfg.audio.stoi_enabled);
        assert!(cfg.detect.superres.enabled);
        assert!(cfg.detect.two_pass);
    }
}
