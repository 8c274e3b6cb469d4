//! OOM fallback ladder.
//!
//! Maps transient-resource errors to an ordered sequence of degradation
//! steps. Ladder state is job-scoped and monotonic: once a step has fired it
//! stays in effect for every subsequent shot of the job.

use std::sync::Mutex;

use tracing::warn;

use vab_models::{AnalysisConfig, DetectorKind};

/// One capability-reducing step, in firing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LadderStep {
    /// 1. Disable mask refinement
    DisableMaskRefine,
    /// 2. Disable super-resolution (and the dependent fine pass)
    DisableSuperRes,
    /// 3. Halve the VL reasoning context (floor 4 frames)
    ShrinkVlContext,
    /// 4. Reduce the tile pass to a single scale
    SingleScaleTiling,
}

impl LadderStep {
    /// Default ladder order.
    pub const ORDER: [LadderStep; 4] = [
        LadderStep::DisableMaskRefine,
        LadderStep::DisableSuperRes,
        LadderStep::ShrinkVlContext,
        LadderStep::SingleScaleTiling,
    ];

    /// Parse a configured step name (`oom_fallback_order` entries).
    pub fn parse(name: &str) -> Option<LadderStep> {
        match name {
            "mask_refine_off" | "sam2_off" => Some(LadderStep::DisableMaskRefine),
            "sr_off" => Some(LadderStep::DisableSuperRes),
            "vl_ctx_shrink" | "qwen_ctx_shrink" => Some(LadderStep::ShrinkVlContext),
            "tile_single_scale" => Some(LadderStep::SingleScaleTiling),
            _ => None,
        }
    }

    /// 1-based level of the step.
    pub fn level(&self) -> u8 {
        match self {
            LadderStep::DisableMaskRefine => 1,
            LadderStep::DisableSuperRes => 2,
            LadderStep::ShrinkVlContext => 3,
            LadderStep::SingleScaleTiling => 4,
        }
    }

    /// Status reason recorded when the step fires.
    pub fn reason(&self) -> &'static str {
        match self {
            LadderStep::DisableMaskRefine => "mask_refinement_disabled",
            LadderStep::DisableSuperRes => "sr_disabled",
            LadderStep::ShrinkVlContext => "vl_context_shrunk",
            LadderStep::SingleScaleTiling => "tiling_single_scale",
        }
    }
}

/// A fired step, with the shot where it first fired.
#[derive(Debug, Clone)]
pub struct FiredStep {
    pub step: LadderStep,
    pub shot_id: String,
}

#[derive(Debug, Default)]
struct LadderState {
    fired: Vec<FiredStep>,
    vl_frames_override: Option<usize>,
}

impl LadderState {
    fn has_fired(&self, step: LadderStep) -> bool {
        self.fired.iter().any(|f| f.step == step)
    }

    fn level(&self) -> u8 {
        self.fired.iter().map(|f| f.step.level()).max().unwrap_or(0)
    }
}

/// Job-scoped fallback controller.
#[derive(Debug)]
pub struct FallbackController {
    base: AnalysisConfig,
    order: Vec<LadderStep>,
    state: Mutex<LadderState>,
}

impl FallbackController {
    /// Create a controller around the job's (ablation-applied) config. The
    /// step order comes from `oom_fallback_order`; unknown names are
    /// ignored, and an empty result falls back to the default order.
    pub fn new(base: AnalysisConfig) -> Self {
        let mut order: Vec<LadderStep> = base
            .runtime
            .oom_fallback_order
            .iter()
            .filter_map(|name| LadderStep::parse(name))
            .collect();
        order.dedup();
        if order.is_empty() {
            order = LadderStep::ORDER.to_vec();
        }
        Self {
            base,
            order,
            state: Mutex::new(LadderState::default()),
        }
    }

    /// Advance the ladder in response to a transient failure of `kind` in
    /// `shot_id`. Fires the lowest step not yet fired and returns it; `None`
    /// when the ladder is exhausted (the caller then skips the detector).
    pub fn advance(&self, kind: DetectorKind, shot_id: &str) -> Option<LadderStep> {
        let mut state = self.state.lock().expect("ladder lock poisoned");
        for step in self.order.iter().copied() {
            if state.has_fired(step) {
                continue;
            }
            if step == LadderStep::ShrinkVlContext {
                let halved = (self.base.runtime.vl_context_max_frames / 2).max(4);
                state.vl_frames_override = Some(halved);
            }
            state.fired.push(FiredStep {
                step,
                shot_id: shot_id.to_string(),
            });
            warn!(
                step = step.reason(),
                trigger = %kind,
                shot = shot_id,
                "fallback ladder advanced"
            );
            return Some(step);
        }
        None
    }

    /// The config with every fired step applied. Snapshotted per detector
    /// invocation, so a step fired by one shot shapes all later invocations.
    pub fn effective_config(&self) -> AnalysisConfig {
        let state = self.state.lock().expect("ladder lock poisoned");
        let mut cfg = self.base.clone();
        if state.has_fired(LadderStep::DisableSuperRes) {
            cfg.detect.superres.enabled = false;
        }
        if state.has_fired(LadderStep::SingleScaleTiling) {
            cfg.detect.tile.single_scale = true;
        }
        if let Some(frames) = state.vl_frames_override {
            cfg.runtime.vl_context_max_frames = frames;
        }
        cfg
    }

    /// Whether mask refinement is still allowed.
    pub fn mask_refine_enabled(&self) -> bool {
        !self
            .state
            .lock()
            .expect("ladder lock poisoned")
            .has_fired(LadderStep::DisableMaskRefine)
    }

    /// Highest fired level (0 when the ladder never fired).
    pub fn level(&self) -> u8 {
        self.state.lock().expect("ladder lock poisoned").level()
    }

    /// Every fired step, in firing order.
    pub fn fired_steps(&self) -> Vec<FiredStep> {
        self.state.lock().expect("ladder lock poisoned").fired.clone()
    }

    /// Status reasons for every fired step, in firing order.
    pub fn reasons(&self) -> Vec<String> {
        self.fired_steps()
            .iter()
            .map(|f| f.step.reason().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> FallbackController {
        FallbackController::new(AnalysisConfig::default())
    }

    #[test]
    fn steps_fire_in_order() {
        let c = controller();
        assert_eq!(
            c.advance(DetectorKind::MaskRefine, "sh_000"),
            Some(LadderStep::DisableMaskRefine)
        );
        assert_eq!(
            c.advance(DetectorKind::ObjectsTiled, "sh_001"),
            Some(LadderStep::DisableSuperRes)
        );
        assert_eq!(
            c.advance(DetectorKind::ObjectsCoarse, "sh_001"),
            Some(LadderStep::ShrinkVlContext)
        );
        assert_eq!(
            c.advance(DetectorKind::ObjectsCoarse, "sh_002"),
            Some(LadderStep::SingleScaleTiling)
        );
        // Exhausted: the caller skips the detector instead.
        assert_eq!(c.advance(DetectorKind::ObjectsCoarse, "sh_003"), None);
    }

    #[test]
    fn ladder_is_monotonic() {
        let c = controller();
        c.advance(DetectorKind::MaskRefine, "sh_000");
        assert_eq!(c.level(), 1);
        assert!(!c.mask_refine_enabled());

        c.advance(DetectorKind::SuperRes, "sh_003");
        assert_eq!(c.level(), 2);
        // Step 1 stays in effect.
        assert!(!c.mask_refine_enabled());
    }

    #[test]
    fn effective_config_reflects_fired_steps() {
        let c = controller();
        assert!(c.effective_config().detect.superres.enabled);

        c.advance(DetectorKind::MaskRefine, "sh_000");
        c.advance(DetectorKind::SuperRes, "sh_000");
        let cfg = c.effective_config();
        assert!(!cfg.detect.superres.enabled);
        assert!(!cfg.detect.tile.single_scale);

        c.advance(DetectorKind::Reasoning, "sh_001");
        let cfg = c.effective_config();
        // 12 halved, floor 4.
        assert_eq!(cfg.runtime.vl_context_max_frames, 6);

        c.advance(DetectorKind::ObjectsTiled, "sh_001");
        assert!(c.effective_config().detect.tile.single_scale);
    }

    #[test]
    fn vl_shrink_floors_at_four() {
        let mut base = AnalysisConfig::default();
        base.runtime.vl_context_max_frames = 6;
        let c = FallbackController::new(base);
        c.advance(DetectorKind::Reasoning, "sh_000");
        c.advance(DetectorKind::Reasoning, "sh_000");
        c.advance(DetectorKind::Reasoning, "sh_000");
        assert_eq!(c.effective_config().runtime.vl_context_max_frames, 4);
    }

    #[test]
    fn reasons_track_firing_order() {
        let c = controller();
        c.advance(DetectorKind::MaskRefine, "sh_000");
        c.advance(DetectorKind::MaskRefine, "sh_001");
        assert_eq!(c.reasons(), vec!["mask_refinement_disabled", "sr_disabled"]);
        let fired = c.fired_steps();
        assert_eq!(fired[0].shot_id, "sh_000");
        assert_eq!(fired[1].shot_id, "sh_001");
    }

    #[test]
    fn configured_order_is_honored() {
        let mut base = AnalysisConfig::default();
        base.runtime.oom_fallback_order =
            vec!["sr_off".to_string(), "mask_refine_off".to_string()];
        let c = FallbackController::new(base);
        assert_eq!(
            c.advance(DetectorKind::ObjectsCoarse, "sh_000"),
            Some(LadderStep::DisableSuperRes)
        );
        assert_eq!(
            c.advance(DetectorKind::ObjectsCoarse, "sh_000"),
            Some(LadderStep::DisableMaskRefine)
        );
        // Configured ladder exhausted.
        assert_eq!(c.advance(DetectorKind::ObjectsCoarse, "sh_001"), None);
    }

    #[test]
    fn unknown_step_names_fall_back_to_default_order() {
        let mut base = AnalysisConfig::default();
        base.runtime.oom_fallback_order = vec!["bogus".to_string()];
        let c = FallbackController::new(base);
        assert_eq!(
            c.advance(DetectorKind::ObjectsCoarse, "sh_000"),
            Some(LadderStep::DisableMaskRefine)
        );
    }
}
