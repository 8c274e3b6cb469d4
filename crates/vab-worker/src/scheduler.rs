//! Per-job DAG scheduler.
//!
//! For each shot: Phase A runs the sequential GPU chain under one pool
//! permit, Phase B fans the remaining detectors out concurrently (each
//! observing pool admission by class), Phase C calls the VL reasoner outside
//! the pool. Shots themselves run concurrently up to the pool capacity.
//! Transient-resource failures go through the fallback ladder and retry once;
//! everything else degrades the slot, never the job.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use vab_media::detect::nms::{filter_small, nms};
use vab_media::detect::superres::sr_frame_path;
use vab_media::detect::{audio, ChainState, DetectError, DetectorRegistry, ShotContext};
use vab_media::prep::{self, PrepOutput, VideoSourceMeta};
use vab_models::{
    AnalysisConfig, BundleState, DetectorKind, DetectorPayload, DetectorRecord, JobState,
    ObjectBox, Provenance, ResourceClass, RunMetrics, Shot, ShotAnalysis, ShotDetectors,
    SkipReason, SkippedDetector, Status,
};
use vab_queue::{AnalyzeJob, JobTable};
use vab_store::VideoStore;

use crate::config::WorkerConfig;
use crate::coverage::{compute_coverage, enforce_gates};
use crate::error::{WorkerError, WorkerResult};
use crate::fallback::FallbackController;
use crate::gpu;
use crate::gpu_pool::GpuPool;
use crate::logging::JobLogger;
use crate::merge::{assemble_vab, build_scenes, dedup_provenance};
use crate::risk::synthesize_risks;
use crate::vl::VlClient;

/// Cross-pass NMS IoU for folding chain stages together.
const NMS_CROSS_PASS_IOU: f64 = 0.5;

/// Shared state for one job run.
struct ShotEnv {
    registry: Arc<DetectorRegistry>,
    vl: Arc<VlClient>,
    pool: GpuPool,
    controller: Arc<FallbackController>,
    /// Ablation-applied base config (before ladder effects)
    base_cfg: AnalysisConfig,
    meta: VideoSourceMeta,
    shots: Arc<Vec<Shot>>,
    metrics: Arc<Mutex<RunMetrics>>,
    /// Deadline violations per detector kind; the first one is transient,
    /// repeats are internal.
    deadline_strikes: Mutex<HashMap<DetectorKind, u32>>,
}

impl ShotEnv {
    fn effective(&self) -> AnalysisConfig {
        self.controller.effective_config()
    }

    fn deadline_for(&self, class: ResourceClass) -> Duration {
        let secs = match class {
            ResourceClass::GpuHeavy | ResourceClass::GpuLight => self.base_cfg.runtime.gpu_deadline_s,
            ResourceClass::Cpu => self.base_cfg.runtime.cpu_deadline_s,
            ResourceClass::Io => self.base_cfg.runtime.vl_deadline_s,
        };
        Duration::from_secs(secs.max(1))
    }

    fn bump_oom(&self) {
        self.metrics.lock().expect("metrics lock").oom_trips += 1;
    }

    fn bump_retries(&self) {
        self.metrics.lock().expect("metrics lock").retries += 1;
    }
}

/// Outcome of one detector invocation.
enum Outcome {
    Done(DetectorPayload, Provenance),
    Skipped(SkipReason),
}

/// Result of analyzing one shot.
struct ShotOutcome {
    index: usize,
    analysis: ShotAnalysis,
    records: Vec<DetectorRecord>,
    internal_error: bool,
}

/// Runs one analysis job end to end.
pub struct JobRunner {
    store: VideoStore,
    table: Arc<JobTable>,
    registry: Arc<DetectorRegistry>,
    vl: Arc<VlClient>,
    pool: GpuPool,
    worker_cfg: WorkerConfig,
}

impl JobRunner {
    pub fn new(
        store: VideoStore,
        table: Arc<JobTable>,
        registry: DetectorRegistry,
        vl: VlClient,
        pool: GpuPool,
        worker_cfg: WorkerConfig,
    ) -> Self {
        Self {
            store,
            table,
            registry: Arc::new(registry),
            vl: Arc::new(vl),
            pool,
            worker_cfg,
        }
    }

    /// Run the full pipeline for one job. A prep failure marks the job
    /// `failed`; later failures degrade the bundle instead. Returns
    /// `Err(Aborted)` only when the shutdown signal fired mid-run.
    pub async fn run(&self, job: &AnalyzeJob, shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        let logger = JobLogger::new(&job.job_id, "analysis");
        logger.log_start(&format!("video {}", job.video_id));
        let run_started = Instant::now();

        let mut cfg = AnalysisConfig::from_env();
        let ablation_reasons = cfg.apply_ablations(job.ablations);

        self.table
            .update_progress(&job.video_id, JobState::Running, 5, "preparing video")
            .await?;

        let metrics = Arc::new(Mutex::new(RunMetrics::default()));

        // Prep: decode, segment, slice audio. Fatal on failure.
        let prep_started = Instant::now();
        let prep_out = match prep::prepare(
            &self.store,
            &job.video_id,
            job.media_url.as_deref(),
            &cfg,
        )
        .await
        {
            Ok(out) => out,
            Err(e) => {
                logger.log_error(&format!("prep failed: {}", e));
                self.table
                    .update_progress(
                        &job.video_id,
                        JobState::Failed,
                        100,
                        format!("prep failed: {}", e),
                    )
                    .await?;
                return Ok(());
            }
        };
        record_latency(&metrics, "prep", prep_started);

        let PrepOutput { meta, shots } = prep_out;
        logger.log_progress(&format!("prep done: {} shots", shots.len()));
        self.table
            .update_progress(
                &job.video_id,
                JobState::Running,
                20,
                format!("analyzing {} shots", shots.len()),
            )
            .await?;

        let ingest_provenance = Provenance::new(
            "ingest",
            env!("CARGO_PKG_VERSION"),
            None,
            &serde_json::json!({ "sha256": meta.sha256 }),
        );

        let controller = Arc::new(FallbackController::new(cfg.clone()));
        let env = Arc::new(ShotEnv {
            registry: Arc::clone(&self.registry),
            vl: Arc::clone(&self.vl),
            pool: self.pool.clone(),
            controller: Arc::clone(&controller),
            base_cfg: cfg.clone(),
            meta: meta.clone(),
            shots: Arc::new(shots),
            metrics: Arc::clone(&metrics),
            deadline_strikes: Mutex::new(HashMap::new()),
        });

        // Analyze shots concurrently, bounded by pool capacity.
        let shots_started = Instant::now();
        let shot_sem = Arc::new(Semaphore::new(self.pool.capacity()));
        let mut set: JoinSet<ShotOutcome> = JoinSet::new();
        for index in 0..env.shots.len() {
            if *shutdown.borrow() {
                return self.abort(job).await;
            }
            let env = Arc::clone(&env);
            let sem = Arc::clone(&shot_sem);
            set.spawn(async move {
                let _slot = sem.acquire_owned().await.expect("shot semaphore closed");
                run_shot(env, index).await
            });
        }

        let mut outcomes: Vec<ShotOutcome> = Vec::with_capacity(env.shots.len());
        let mut shutdown_watch = shutdown.clone();
        loop {
            tokio::select! {
                joined = set.join_next() => {
                    match joined {
                        Some(Ok(outcome)) => outcomes.push(outcome),
                        Some(Err(e)) => {
                            // A panicking shot task degrades the bundle, never
                            // the whole job.
                            warn!("shot task panicked: {}", e);
                        }
                        None => break,
                    }
                }
                _ = shutdown_watch.changed() => {
                    if *shutdown_watch.borrow() {
                        set.abort_all();
                        return self.abort(job).await;
                    }
                }
            }
        }
        outcomes.sort_by_key(|o| o.index);
        record_latency(&metrics, "shots", shots_started);

        self.table
            .update_progress(&job.video_id, JobState::Running, 80, "assembling bundle")
            .await?;

        // Merge: scenes, narratives, coverage, risks, bundle.
        let merge_started = Instant::now();
        let internal_errors = outcomes.iter().filter(|o| o.internal_error).count();
        let mut shot_analyses: Vec<ShotAnalysis> =
            outcomes.iter().map(|o| o.analysis.clone()).collect();
        let all_records: Vec<DetectorRecord> = outcomes
            .iter()
            .flat_map(|o| o.records.iter().cloned())
            .collect();

        let mut scenes = build_scenes(&shot_analyses, &cfg);
        for scene in scenes.iter_mut() {
            let members: Vec<&ShotAnalysis> = shot_analyses
                .iter()
                .filter(|s| scene.shots.contains(&s.shot_id))
                .collect();
            match self.vl.analyze_scene(scene, &members).await {
                Ok(narrative) => scene.narrative = Some(narrative),
                Err(e) => {
                    warn!(scene = %scene.scene_id, "scene narrative skipped: {}", e);
                }
            }
        }
        record_latency(&metrics, "merge", merge_started);

        let audio_report = audio::global_report(&meta.audio_path, cfg.audio.stoi_enabled);
        let coverage = compute_coverage(&meta, &shot_analyses, &audio_report, &cfg);
        let (gate_state, gate_reasons) = enforce_gates(&coverage, &cfg);

        // Status reasons: ablations, gates, ladder steps, then every
        // degrading skip.
        let mut reasons = ablation_reasons;
        reasons.extend(gate_reasons);
        reasons.extend(controller.reasons());

        let mut state = gate_state;
        if controller.level() > 0 {
            state = state.worst(BundleState::Degraded);
        }
        for outcome in &outcomes {
            for record in &outcome.records {
                if let Some(reason) = record.skipped {
                    if is_degrading(reason) {
                        state = state.worst(BundleState::Degraded);
                    }
                    reasons.push(format!(
                        "detector_skipped:{}:{}:{}",
                        outcome.analysis.shot_id,
                        record.kind,
                        reason.as_str()
                    ));
                }
            }
        }

        let budget_pct = cfg.runtime.internal_error_budget_pct;
        if !outcomes.is_empty()
            && 100.0 * internal_errors as f64 / outcomes.len() as f64 > budget_pct
        {
            state = state.worst(BundleState::Degraded);
            reasons.push("internal_error_budget_exceeded".to_string());
        }

        let risks = synthesize_risks(&shot_analyses, &controller, &cfg);
        let provenance = dedup_provenance(&all_records, vec![ingest_provenance]);

        // Finalize metrics.
        {
            let gpu_mem_mb_peak = gpu::gpu_mem_used_mb().await;
            let mut m = metrics.lock().expect("metrics lock");
            m.gpu_mem_mb_peak = gpu_mem_mb_peak;
            m.latency_ms.insert(
                "total".to_string(),
                run_started.elapsed().as_secs_f64() * 1000.0,
            );
        }
        let final_metrics = metrics.lock().expect("metrics lock").clone();

        // Strip working data the bundle does not carry.
        for analysis in shot_analyses.iter_mut() {
            analysis.detectors.skipped.sort_by_key(|s| s.kind);
        }

        let status = Status {
            state,
            reasons,
            coverage,
        };
        let mut vab = assemble_vab(
            &meta,
            scenes,
            shot_analyses,
            status,
            risks,
            provenance,
            final_metrics,
        );

        // Validate against the schema invariants before persisting.
        let violations = vab.validate();
        if !violations.is_empty() {
            warn!(video_id = %job.video_id, ?violations, "bundle failed validation");
            vab.status.state = vab.status.state.worst(BundleState::Degraded);
            for v in violations {
                vab.status.reasons.push(format!("schema_violation:{}", v));
            }
        }

        self.store.write_bundle(&job.video_id, &vab).await?;

        if self.worker_cfg.cleanup_frames {
            self.store.cleanup_frames(&job.video_id).await.ok();
        }

        self.table
            .update_progress(
                &job.video_id,
                JobState::Completed,
                100,
                format!("analysis complete: {:?}", vab.status.state),
            )
            .await?;

        logger.log_completion(&format!(
            "state {:?}, {} shots, {} scenes",
            vab.status.state,
            vab.shots.len(),
            vab.scenes.len()
        ));
        Ok(())
    }

    async fn abort(&self, job: &AnalyzeJob) -> WorkerResult<()> {
        info!(video_id = %job.video_id, "job aborted by shutdown");
        self.table
            .update_progress(&job.video_id, JobState::Failed, 100, "aborted")
            .await
            .ok();
        Err(WorkerError::Aborted)
    }
}

fn record_latency(metrics: &Arc<Mutex<RunMetrics>>, stage: &str, started: Instant) {
    metrics
        .lock()
        .expect("metrics lock")
        .latency_ms
        .insert(stage.to_string(), started.elapsed().as_secs_f64() * 1000.0);
}

/// Which skip reasons lower the bundle state. Ablation skips and the
/// structural no-adjacent-shot case do not.
fn is_degrading(reason: SkipReason) -> bool {
    !matches!(
        reason,
        SkipReason::DisabledByAblation | SkipReason::NoAdjacentShot
    )
}

/// Analyze one shot through all three phases.
async fn run_shot(env: Arc<ShotEnv>, index: usize) -> ShotOutcome {
    let shot = &env.shots[index];
    let mut detectors = ShotDetectors::default();
    let mut records: Vec<DetectorRecord> = Vec::new();
    let mut internal_error = false;

    // ---- Phase A: sequential GPU chain under one pool permit ----
    let mut chain = ChainState::default();
    {
        let _permit = env.pool.acquire().await;

        run_chain_stage(&env, index, DetectorKind::ObjectsCoarse, &mut chain, &mut records).await;

        let eff = env.effective();
        if eff.detect.two_pass {
            run_chain_stage(&env, index, DetectorKind::ObjectsTiled, &mut chain, &mut records)
                .await;
        } else {
            records.push(DetectorRecord::skipped(
                DetectorKind::ObjectsTiled,
                SkipReason::DisabledByAblation,
            ));
        }

        let eff = env.effective();
        if eff.detect.superres.enabled {
            match run_detector(&env, index, DetectorKind::SuperRes, &chain).await {
                Outcome::Done(DetectorPayload::SrUsed(used), provenance) => {
                    chain.sr_used = used;
                    if used {
                        chain.sr_frame = shot.mid_frame().map(|p| sr_frame_path(p));
                    }
                    records.push(DetectorRecord::new(
                        DetectorKind::SuperRes,
                        DetectorPayload::SrUsed(used),
                        provenance,
                    ));
                }
                Outcome::Done(payload, provenance) => {
                    records.push(DetectorRecord::new(DetectorKind::SuperRes, payload, provenance));
                }
                Outcome::Skipped(reason) => {
                    if reason == SkipReason::InternalError {
                        internal_error = true;
                    }
                    records.push(DetectorRecord::skipped(DetectorKind::SuperRes, reason));
                }
            }

            if chain.sr_used {
                run_chain_stage(&env, index, DetectorKind::ObjectsFine, &mut chain, &mut records)
                    .await;
            }
        } else {
            // SR off: by ablation from the start, or by the ladder mid-job.
            let reason = if env.base_cfg.detect.superres.enabled {
                SkipReason::ResourceExhausted
            } else {
                SkipReason::DisabledByAblation
            };
            records.push(DetectorRecord::skipped(DetectorKind::SuperRes, reason));
            records.push(DetectorRecord::skipped(DetectorKind::ObjectsFine, reason));
        }

        if env.controller.mask_refine_enabled() {
            run_chain_stage(&env, index, DetectorKind::MaskRefine, &mut chain, &mut records).await;
        } else {
            records.push(DetectorRecord::skipped(
                DetectorKind::MaskRefine,
                SkipReason::ResourceExhausted,
            ));
        }
    }

    detectors.objects = chain.objects.clone();
    detectors.sr_used = chain.sr_used;

    // Mirror chain-stage skips into the shot's detectors map so every
    // enabled kind is accounted for.
    for record in &records {
        if let Some(reason) = record.skipped {
            detectors.skipped.push(SkippedDetector {
                kind: record.kind,
                reason,
            });
        }
    }

    // ---- Phase B: parallel fan-out ----
    let fan_out = [
        DetectorKind::Faces,
        DetectorKind::Text,
        DetectorKind::Color,
        DetectorKind::Motion,
        DetectorKind::Audio,
        DetectorKind::Transition,
    ];
    let mut set: JoinSet<(DetectorKind, Outcome)> = JoinSet::new();
    for kind in fan_out {
        // Transition classification needs a prepped predecessor.
        if kind == DetectorKind::Transition && index == 0 {
            records.push(DetectorRecord::skipped(kind, SkipReason::NoAdjacentShot));
            continue;
        }
        let env = Arc::clone(&env);
        set.spawn(async move {
            let outcome = if kind.resource_class().needs_gpu_permit() {
                let _permit = env.pool.acquire().await;
                run_detector(&env, index, kind, &ChainState::default()).await
            } else {
                run_detector(&env, index, kind, &ChainState::default()).await
            };
            (kind, outcome)
        });
    }

    while let Some(joined) = set.join_next().await {
        let (kind, outcome) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                warn!(shot = %shot.shot_id, "fan-out task panicked: {}", e);
                internal_error = true;
                continue;
            }
        };
        match outcome {
            Outcome::Done(payload, provenance) => {
                apply_payload(&mut detectors, &payload);
                records.push(DetectorRecord::new(kind, payload, provenance));
            }
            Outcome::Skipped(reason) => {
                if reason == SkipReason::InternalError {
                    internal_error = true;
                }
                detectors.skipped.push(SkippedDetector { kind, reason });
                records.push(DetectorRecord::skipped(kind, reason));
            }
        }
    }

    // ---- Phase C: VL reasoning (io-class, outside the pool) ----
    let mut analysis = ShotAnalysis {
        shot_id: shot.shot_id.clone(),
        start_frame: shot.start_frame,
        end_frame: shot.end_frame,
        frame_count: shot.frame_count,
        duration_s: shot.duration_s,
        detectors,
        summary: String::new(),
        mood: String::new(),
        intent: String::new(),
        composition_notes: Vec::new(),
        transition_guess: String::new(),
    };

    match run_reasoning(&env, shot, &analysis).await {
        Outcome::Done(DetectorPayload::Reasoning(reasoning), provenance) => {
            analysis.apply_reasoning(&reasoning);
            records.push(DetectorRecord::new(
                DetectorKind::Reasoning,
                DetectorPayload::Reasoning(reasoning),
                provenance,
            ));
        }
        Outcome::Done(payload, provenance) => {
            records.push(DetectorRecord::new(DetectorKind::Reasoning, payload, provenance));
        }
        Outcome::Skipped(reason) => {
            analysis
                .detectors
                .skipped
                .push(SkippedDetector {
                    kind: DetectorKind::Reasoning,
                    reason,
                });
            records.push(DetectorRecord::skipped(DetectorKind::Reasoning, reason));
        }
    }

    ShotOutcome {
        index,
        analysis,
        records,
        internal_error,
    }
}

/// Run one stage of the object chain and fold its boxes into the chain
/// state with cross-pass NMS and the small-object filter.
async fn run_chain_stage(
    env: &Arc<ShotEnv>,
    index: usize,
    kind: DetectorKind,
    chain: &mut ChainState,
    records: &mut Vec<DetectorRecord>,
) {
    match run_detector(env, index, kind, chain).await {
        Outcome::Done(DetectorPayload::Objects(new_boxes), provenance) => {
            chain.objects = fold_objects(env, kind, &chain.objects, new_boxes.clone());
            records.push(DetectorRecord::new(
                kind,
                DetectorPayload::Objects(new_boxes),
                provenance,
            ));
        }
        Outcome::Done(payload, provenance) => {
            records.push(DetectorRecord::new(kind, payload, provenance));
        }
        Outcome::Skipped(reason) => {
            records.push(DetectorRecord::skipped(kind, reason));
        }
    }
}

/// Cross-pass fold: mask refinement replaces the set, other passes union
/// into it.
fn fold_objects(
    env: &Arc<ShotEnv>,
    kind: DetectorKind,
    existing: &[ObjectBox],
    new_boxes: Vec<ObjectBox>,
) -> Vec<ObjectBox> {
    let min_px = env.base_cfg.detect.small_object_min_px;
    if kind == DetectorKind::MaskRefine {
        return new_boxes;
    }
    let mut merged = existing.to_vec();
    merged.extend(new_boxes);
    filter_small(nms(merged, NMS_CROSS_PASS_IOU), min_px)
}

/// Invoke one detector with deadline, error mapping and the fallback ladder.
///
/// Transient-resource errors advance the ladder and retry exactly once; a
/// second transient failure (or an exhausted ladder) skips the slot with
/// `resource_exhausted`. The first deadline violation per kind counts as
/// transient, repeats as internal.
async fn run_detector(
    env: &Arc<ShotEnv>,
    index: usize,
    kind: DetectorKind,
    chain: &ChainState,
) -> Outcome {
    let Some(detector) = env.registry.get(kind) else {
        warn!(kind = %kind, "no adapter registered");
        return Outcome::Skipped(SkipReason::InternalError);
    };
    let detector = Arc::clone(detector);
    let shot = &env.shots[index];
    let prev_shot = if index > 0 {
        Some(&env.shots[index - 1])
    } else {
        None
    };
    let deadline = env.deadline_for(detector.resource_class());

    let mut attempt = 0u32;
    loop {
        let eff = env.effective();
        let ctx = ShotContext {
            shot,
            prev_shot,
            cfg: &eff,
            audio_path: &env.meta.audio_path,
            fps: env.meta.fps,
            chain,
        };

        let result = tokio::time::timeout(deadline, detector.detect(&ctx)).await;
        let error = match result {
            Ok(Ok(detection)) => {
                return Outcome::Done(detection.payload, detection.provenance);
            }
            Ok(Err(e)) => e,
            Err(_) => {
                // Deadline expiry: transient on the first strike so the
                // ladder can demote, internal on repeat.
                let mut strikes = env.deadline_strikes.lock().expect("strikes lock");
                let count = strikes.entry(kind).or_insert(0);
                *count += 1;
                if *count == 1 {
                    DetectError::transient(format!("deadline of {:?} exceeded", deadline))
                } else {
                    DetectError::internal(format!("repeated deadline violation ({})", count))
                }
            }
        };

        match error {
            DetectError::TransientResource(msg) => {
                env.bump_oom();
                if attempt == 0 && env.controller.advance(kind, &shot.shot_id).is_some() {
                    // When the fired step disabled this very capability, the
                    // slot is done: record it as skipped instead of retrying.
                    if !capability_enabled(env, kind) {
                        return Outcome::Skipped(SkipReason::ResourceExhausted);
                    }
                    env.bump_retries();
                    attempt += 1;
                    continue;
                }
                warn!(shot = %shot.shot_id, kind = %kind, "transient failure not recoverable: {}", msg);
                return Outcome::Skipped(SkipReason::ResourceExhausted);
            }
            DetectError::InputDefect(msg) => {
                warn!(shot = %shot.shot_id, kind = %kind, "input defect: {}", msg);
                return Outcome::Skipped(SkipReason::InputDefect);
            }
            DetectError::Internal(msg) | DetectError::External(msg) => {
                warn!(shot = %shot.shot_id, kind = %kind, "detector error: {}", msg);
                return Outcome::Skipped(SkipReason::InternalError);
            }
        }
    }
}

/// Whether `kind`'s capability is still enabled under the current ladder
/// state.
fn capability_enabled(env: &Arc<ShotEnv>, kind: DetectorKind) -> bool {
    match kind {
        DetectorKind::MaskRefine => env.controller.mask_refine_enabled(),
        DetectorKind::SuperRes | DetectorKind::ObjectsFine => {
            env.effective().detect.superres.enabled
        }
        _ => true,
    }
}

/// Phase C: sample frames, call the VL endpoint, validate the reply shape.
async fn run_reasoning(env: &Arc<ShotEnv>, shot: &Shot, analysis: &ShotAnalysis) -> Outcome {
    let eff = env.effective();
    let frames = shot.sample_frames(eff.runtime.vl_context_max_frames);
    let deadline = env.deadline_for(ResourceClass::Io);

    let provenance = Provenance::new(
        "vl_reasoner",
        env!("CARGO_PKG_VERSION"),
        Some(env.vl.model().to_string()),
        &serde_json::json!({
            "model": env.vl.model(),
            "max_frames": eff.runtime.vl_context_max_frames,
        }),
    );

    match tokio::time::timeout(deadline, env.vl.analyze_shot(analysis, &frames)).await {
        Ok(Ok(reasoning)) => Outcome::Done(DetectorPayload::Reasoning(reasoning), provenance),
        Ok(Err(WorkerError::VlParse(msg))) => {
            warn!(shot = %shot.shot_id, "reasoning parse failed: {}", msg);
            Outcome::Skipped(SkipReason::ParseFailed)
        }
        Ok(Err(e)) => {
            warn!(shot = %shot.shot_id, "VL unreachable: {}", e);
            Outcome::Skipped(SkipReason::VlUnreachable)
        }
        Err(_) => {
            warn!(shot = %shot.shot_id, "VL call exceeded {:?}", deadline);
            Outcome::Skipped(SkipReason::VlUnreachable)
        }
    }
}

/// Fold a fan-out payload into the shot's detectors map.
fn apply_payload(detectors: &mut ShotDetectors, payload: &DetectorPayload) {
    match payload {
        DetectorPayload::Faces(faces) => detectors.faces = faces.clone(),
        DetectorPayload::Text(text) => detectors.text = text.clone(),
        DetectorPayload::Color(color) => detectors.color = Some(color.clone()),
        DetectorPayload::Motion { motion, saliency } => {
            detectors.motion = Some(motion.clone());
            detectors.saliency = Some(saliency.clone());
        }
        DetectorPayload::Audio(audio) => detectors.audio = Some(audio.clone()),
        DetectorPayload::Transition(transition) => {
            detectors.transition = Some(transition.clone())
        }
        DetectorPayload::Objects(_)
        | DetectorPayload::SrUsed(_)
        | DetectorPayload::Reasoning(_)
        | DetectorPayload::Empty => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use image::{GrayImage, Luma};

    use vab_media::detect::{DetectResult, Detection, Detector};
    use vab_models::{AudioWindow, VideoId};

    use crate::vl::{VlClient, VlConfig};

    /// Mask-refinement stand-in that reports an OOM on every call.
    struct OomMaskRefine {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Detector for OomMaskRefine {
        fn kind(&self) -> DetectorKind {
            DetectorKind::MaskRefine
        }

        async fn detect(&self, _ctx: &ShotContext<'_>) -> DetectResult<Detection> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DetectError::transient("CUDA out of memory"))
        }
    }

    fn write_frames(dir: &Path, count: u64) {
        for i in 0..count {
            let img = GrayImage::from_fn(64, 48, |x, y| {
                Luma([((x * 3 + y * 5 + i as u32 * 11) % 200) as u8])
            });
            img.save(dir.join(format!("frame_{:08}.jpg", i))).unwrap();
        }
    }

    fn write_silence(path: &Path, secs: f64) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..(secs * 16_000.0) as usize * 2 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn make_env(dir: &Path, n_shots: usize, registry: DetectorRegistry) -> Arc<ShotEnv> {
        make_env_with(dir, n_shots, registry, |_| {})
    }

    fn make_env_with(
        dir: &Path,
        n_shots: usize,
        registry: DetectorRegistry,
        tweak: impl FnOnce(&mut AnalysisConfig),
    ) -> Arc<ShotEnv> {
        const FRAMES_PER_SHOT: u64 = 4;
        let frames_dir = dir.join("frames");
        std::fs::create_dir_all(&frames_dir).unwrap();
        let total = n_shots as u64 * FRAMES_PER_SHOT;
        write_frames(&frames_dir, total);

        let audio_path = dir.join("audio.wav");
        write_silence(&audio_path, total as f64 / 30.0);

        let shots: Vec<Shot> = (0..n_shots)
            .map(|i| {
                let start = i as u64 * FRAMES_PER_SHOT;
                let end = start + FRAMES_PER_SHOT;
                Shot {
                    shot_id: vab_models::ids::shot_id(i),
                    start_frame: start,
                    end_frame: end,
                    frame_count: FRAMES_PER_SHOT,
                    duration_s: FRAMES_PER_SHOT as f64 / 30.0,
                    frame_paths: (start..end)
                        .map(|f| frames_dir.join(format!("frame_{:08}.jpg", f)))
                        .collect(),
                    audio_window: AudioWindow {
                        start_s: start as f64 / 30.0,
                        end_s: end as f64 / 30.0,
                    },
                }
            })
            .collect();

        let mut cfg = AnalysisConfig::default();
        // Keep the unreachable-VL path fast in tests.
        cfg.runtime.vl_deadline_s = 1;
        cfg.runtime.cpu_deadline_s = 30;
        tweak(&mut cfg);

        let vl = VlClient::new(VlConfig {
            api_base: "http://127.0.0.1:9/v1".to_string(),
            api_key: "EMPTY".to_string(),
            model: "test-model".to_string(),
            timeout: Duration::from_millis(200),
        });

        Arc::new(ShotEnv {
            registry: Arc::new(registry),
            vl: Arc::new(vl),
            pool: GpuPool::new(2),
            controller: Arc::new(FallbackController::new(cfg.clone())),
            base_cfg: cfg,
            meta: VideoSourceMeta {
                video_id: VideoId::new("t1"),
                path: dir.join("video.mp4"),
                sha256: "0".repeat(64),
                fps: 30.0,
                width: 64,
                height: 48,
                total_frames: total,
                duration_s: total as f64 / 30.0,
                audio_path,
                frame_stride: 1,
                decoded_frames: total,
            },
            shots: Arc::new(shots),
            metrics: Arc::new(Mutex::new(RunMetrics::default())),
            deadline_strikes: Mutex::new(HashMap::new()),
        })
    }

    fn skipped_reason(records: &[DetectorRecord], kind: DetectorKind) -> Option<SkipReason> {
        records
            .iter()
            .find(|r| r.kind == kind)
            .and_then(|r| r.skipped)
    }

    #[tokio::test]
    async fn oom_on_mask_refine_fires_ladder_once_and_sticks() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = DetectorRegistry::standard();
        let faulty = Arc::new(OomMaskRefine {
            calls: AtomicU32::new(0),
        });
        registry.insert(Arc::clone(&faulty) as Arc<dyn Detector>);

        let env = make_env(dir.path(), 2, registry);

        let first = run_shot(Arc::clone(&env), 0).await;
        assert_eq!(
            skipped_reason(&first.records, DetectorKind::MaskRefine),
            Some(SkipReason::ResourceExhausted)
        );
        assert_eq!(env.controller.level(), 1);
        assert_eq!(env.controller.reasons(), vec!["mask_refinement_disabled"]);
        assert_eq!(faulty.calls.load(Ordering::SeqCst), 1);
        assert!(env.metrics.lock().unwrap().oom_trips >= 1);

        // The ladder step is job-scoped: the next shot never invokes the
        // detector again.
        let second = run_shot(Arc::clone(&env), 1).await;
        assert_eq!(
            skipped_reason(&second.records, DetectorKind::MaskRefine),
            Some(SkipReason::ResourceExhausted)
        );
        assert_eq!(faulty.calls.load(Ordering::SeqCst), 1);
        assert_eq!(env.controller.level(), 1);
    }

    #[tokio::test]
    async fn first_shot_skips_transition_with_no_adjacent_shot() {
        let dir = tempfile::tempdir().unwrap();
        let env = make_env(dir.path(), 1, DetectorRegistry::standard());

        let outcome = run_shot(Arc::clone(&env), 0).await;
        assert!(outcome
            .analysis
            .detectors
            .skipped
            .iter()
            .any(|s| s.kind == DetectorKind::Transition
                && s.reason == SkipReason::NoAdjacentShot));

        // Unreachable VL endpoint: reasoning skipped, nothing else affected.
        assert!(outcome
            .analysis
            .detectors
            .skipped
            .iter()
            .any(|s| s.kind == DetectorKind::Reasoning
                && s.reason == SkipReason::VlUnreachable));
        assert!(outcome.analysis.detectors.color.is_some());
        assert!(outcome.analysis.detectors.audio.is_some());
        assert!(outcome.analysis.summary.is_empty());
    }

    #[tokio::test]
    async fn second_shot_gets_a_transition_classification() {
        let dir = tempfile::tempdir().unwrap();
        let env = make_env(dir.path(), 2, DetectorRegistry::standard());

        let outcome = run_shot(Arc::clone(&env), 1).await;
        assert!(outcome.analysis.detectors.transition.is_some());
        let t = outcome.analysis.detectors.transition.unwrap();
        assert!((0.0..=1.0).contains(&t.similarity) || t.similarity >= -1.0);
    }

    #[tokio::test]
    async fn sr_ablation_skips_sr_without_ladder_advance() {
        let dir = tempfile::tempdir().unwrap();
        let env = make_env_with(dir.path(), 1, DetectorRegistry::standard(), |cfg| {
            cfg.apply_ablations(vab_models::AblationFlags {
                no_sr: true,
                ..Default::default()
            });
        });

        let outcome = run_shot(Arc::clone(&env), 0).await;
        assert!(!outcome.analysis.detectors.sr_used);
        assert_eq!(
            skipped_reason(&outcome.records, DetectorKind::SuperRes),
            Some(SkipReason::DisabledByAblation)
        );
        assert_eq!(
            skipped_reason(&outcome.records, DetectorKind::ObjectsFine),
            Some(SkipReason::DisabledByAblation)
        );
        // Ablation never consumes a ladder step.
        assert_eq!(env.controller.level(), 0);
        assert_eq!(env.metrics.lock().unwrap().oom_trips, 0);
    }

    #[tokio::test]
    async fn pool_is_back_to_capacity_after_shots() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = DetectorRegistry::standard();
        registry.insert(Arc::new(OomMaskRefine {
            calls: AtomicU32::new(0),
        }) as Arc<dyn Detector>);
        let env = make_env(dir.path(), 2, registry);

        let _ = run_shot(Arc::clone(&env), 0).await;
        let _ = run_shot(Arc::clone(&env), 1).await;
        assert_eq!(env.pool.available(), env.pool.capacity());
    }
}
