//! Merge and assembly: shot -> scene grouping, global statistics, provenance
//! dedup and final bundle construction.

use std::collections::BTreeMap;

use vab_models::{
    ids, AnalysisConfig, Calibration, DetectionTotals, DetectorRecord, GlobalStats, Provenance,
    Resolution, RunMetrics, SceneAudioFeatures, SceneEntry, SceneFeatures, ShotAnalysis, Status,
    TransitionKind, Vab, VideoMeta,
};

use vab_media::prep::VideoSourceMeta;

/// Group consecutive shots into scenes.
///
/// Two adjacent shots share a scene when the boundary similarity (the SSIM
/// the transition detector measured between them) is at least
/// `scene_ssim_min` and the time gap does not exceed `max_scene_gap_s`. A
/// transition classified as a cut breaks the scene unconditionally.
pub fn build_scenes(shots: &[ShotAnalysis], cfg: &AnalysisConfig) -> Vec<SceneEntry> {
    if shots.is_empty() {
        return Vec::new();
    }

    let mut scenes: Vec<SceneEntry> = Vec::new();
    let mut current: Vec<&ShotAnalysis> = vec![&shots[0]];

    for window in shots.windows(2) {
        let prev = &window[0];
        let curr = &window[1];

        let transition_breaks = match curr.detectors.transition.as_ref() {
            Some(t) if t.kind == TransitionKind::Cut => true,
            Some(t) => t.similarity < cfg.merge.scene_ssim_min,
            // No transition measurement: fall back to temporal adjacency.
            None => false,
        };
        let breaks = transition_breaks || time_gap_s(prev, curr) > cfg.merge.max_scene_gap_s;

        if breaks {
            scenes.push(finish_scene(scenes.len(), &current));
            current = vec![curr];
        } else {
            current.push(curr);
        }
    }
    scenes.push(finish_scene(scenes.len(), &current));

    scenes
}

fn time_gap_s(prev: &ShotAnalysis, curr: &ShotAnalysis) -> f64 {
    // Shots partition the frame range, so the gap is normally zero; kept for
    // robustness against sparse shot lists.
    let fps_guess = if prev.duration_s > 0.0 {
        prev.frame_count as f64 / prev.duration_s
    } else {
        30.0
    };
    (curr.start_frame as f64 - prev.end_frame as f64).max(0.0) / fps_guess
}

fn finish_scene(index: usize, shots: &[&ShotAnalysis]) -> SceneEntry {
    SceneEntry {
        scene_id: ids::scene_id(index),
        shots: shots.iter().map(|s| s.shot_id.clone()).collect(),
        start_frame: shots.first().map(|s| s.start_frame).unwrap_or(0),
        end_frame: shots.last().map(|s| s.end_frame).unwrap_or(0),
        features: scene_features(shots),
        narrative: None,
    }
}

/// Aggregate features for a scene from its shots.
fn scene_features(shots: &[&ShotAnalysis]) -> SceneFeatures {
    if shots.is_empty() {
        return SceneFeatures::default();
    }

    let brightness: Vec<f64> = shots
        .iter()
        .filter_map(|s| s.detectors.color.as_ref().map(|c| c.brightness))
        .collect();
    let avg_brightness = if brightness.is_empty() {
        0.5
    } else {
        brightness.iter().sum::<f64>() / brightness.len() as f64
    };

    let mut mood_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for s in shots {
        if !s.mood.is_empty() {
            *mood_counts.entry(s.mood.as_str()).or_default() += 1;
        }
    }
    let dominant_mood = mood_counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(mood, _)| mood.to_string())
        .unwrap_or_else(|| "neutral".to_string());

    let loudness: Vec<f64> = shots
        .iter()
        .filter_map(|s| s.detectors.audio.as_ref().map(|a| a.lufs))
        .collect();

    SceneFeatures {
        avg_brightness: (avg_brightness * 1000.0).round() / 1000.0,
        dominant_mood,
        has_camera_motion: shots
            .iter()
            .any(|s| s.detectors.motion.as_ref().is_some_and(|m| m.camera_motion)),
        shot_count: shots.len(),
        total_duration_s: shots.iter().map(|s| s.duration_s).sum(),
        audio: SceneAudioFeatures {
            avg_loudness: if loudness.is_empty() {
                -14.0
            } else {
                (loudness.iter().sum::<f64>() / loudness.len() as f64 * 100.0).round() / 100.0
            },
            has_speech: shots
                .iter()
                .any(|s| s.detectors.audio.as_ref().is_some_and(|a| a.speech.has_speech)),
            has_music: shots
                .iter()
                .any(|s| s.detectors.audio.as_ref().is_some_and(|a| a.music.has_music)),
        },
    }
}

/// Detection rollup across all shots.
pub fn merge_detections(shots: &[ShotAnalysis]) -> DetectionTotals {
    let mut totals = DetectionTotals::default();
    for shot in shots {
        let d = &shot.detectors;
        totals.total_objects += d.objects.len();
        totals.total_faces += d.faces.len();
        totals.total_text_regions += d.text.len();
        for obj in &d.objects {
            *totals.object_counts.entry(obj.label.clone()).or_default() += 1;
        }
    }
    totals.unique_object_classes = totals.object_counts.len();
    totals
}

/// Dedup provenance entries by `(tool, version, params_hash)`, keeping
/// insertion order of first appearance.
pub fn dedup_provenance(records: &[DetectorRecord], head: Vec<Provenance>) -> Vec<Provenance> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for p in head {
        if seen.insert(p.dedup_key()) {
            out.push(p);
        }
    }
    for record in records {
        let p = &record.provenance;
        if seen.insert(p.dedup_key()) {
            out.push(p.clone());
        }
    }
    out
}

/// Assemble the bundle from its parts.
#[allow(clippy::too_many_arguments)]
pub fn assemble_vab(
    meta: &VideoSourceMeta,
    scenes: Vec<SceneEntry>,
    shots: Vec<ShotAnalysis>,
    status: Status,
    risks: Vec<vab_models::Risk>,
    provenance: Vec<Provenance>,
    metrics: RunMetrics,
) -> Vab {
    Vab {
        schema_version: vab_models::SCHEMA_VERSION.to_string(),
        status,
        video: VideoMeta {
            video_id: meta.video_id.clone(),
            path: meta.path.to_string_lossy().to_string(),
            sha256: meta.sha256.clone(),
            metrics,
        },
        global: GlobalStats {
            total_frames: meta.total_frames,
            duration_s: meta.duration_s,
            fps: meta.fps,
            resolution: Resolution {
                w: meta.width,
                h: meta.height,
            },
            detections: merge_detections(&shots),
        },
        scenes,
        shots,
        tracks: Vec::new(),
        risks,
        provenance,
        calibration: Calibration::defaults(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vab_models::{
        DetectionPass, DetectorKind, DetectorPayload, ObjectBox, ShotDetectors, TransitionInfo,
    };

    fn shot_with_transition(
        id: usize,
        start: u64,
        end: u64,
        transition: Option<(TransitionKind, f64)>,
    ) -> ShotAnalysis {
        let mut detectors = ShotDetectors::default();
        detectors.transition = transition.map(|(kind, similarity)| TransitionInfo {
            kind,
            similarity,
            sharpness: "soft".to_string(),
        });
        ShotAnalysis {
            shot_id: ids::shot_id(id),
            start_frame: start,
            end_frame: end,
            frame_count: end - start,
            duration_s: (end - start) as f64 / 30.0,
            detectors,
            summary: String::new(),
            mood: String::new(),
            intent: String::new(),
            composition_notes: Vec::new(),
            transition_guess: String::new(),
        }
    }

    #[test]
    fn similar_shots_share_a_scene() {
        let shots = vec![
            shot_with_transition(0, 0, 30, None),
            shot_with_transition(1, 30, 60, Some((TransitionKind::Dissolve, 0.8))),
            shot_with_transition(2, 60, 90, Some((TransitionKind::None, 0.95))),
        ];
        let scenes = build_scenes(&shots, &AnalysisConfig::default());
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].shots.len(), 3);
        assert_eq!(scenes[0].start_frame, 0);
        assert_eq!(scenes[0].end_frame, 90);
    }

    #[test]
    fn cut_breaks_scene_even_when_similar() {
        let shots = vec![
            shot_with_transition(0, 0, 30, None),
            // High similarity but classified cut: still a break.
            shot_with_transition(1, 30, 60, Some((TransitionKind::Cut, 0.8))),
        ];
        let scenes = build_scenes(&shots, &AnalysisConfig::default());
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[0].scene_id, "sc_000");
        assert_eq!(scenes[1].scene_id, "sc_001");
    }

    #[test]
    fn low_similarity_breaks_scene() {
        let shots = vec![
            shot_with_transition(0, 0, 30, None),
            shot_with_transition(1, 30, 60, Some((TransitionKind::Dissolve, 0.2))),
        ];
        let scenes = build_scenes(&shots, &AnalysisConfig::default());
        assert_eq!(scenes.len(), 2);
    }

    #[test]
    fn scene_partition_law_holds() {
        let shots: Vec<ShotAnalysis> = (0..7)
            .map(|i| {
                let sim = if i % 3 == 0 { 0.1 } else { 0.9 };
                shot_with_transition(
                    i,
                    i as u64 * 30,
                    (i as u64 + 1) * 30,
                    if i == 0 {
                        None
                    } else {
                        Some((TransitionKind::Dissolve, sim))
                    },
                )
            })
            .collect();
        let scenes = build_scenes(&shots, &AnalysisConfig::default());

        let mut scene_shot_ids: Vec<String> =
            scenes.iter().flat_map(|s| s.shots.clone()).collect();
        let mut shot_ids: Vec<String> = shots.iter().map(|s| s.shot_id.clone()).collect();
        scene_shot_ids.sort();
        shot_ids.sort();
        assert_eq!(scene_shot_ids, shot_ids);
    }

    #[test]
    fn single_shot_yields_single_scene() {
        let shots = vec![shot_with_transition(0, 0, 60, None)];
        let scenes = build_scenes(&shots, &AnalysisConfig::default());
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].shots, vec!["sh_000"]);
        assert_eq!(scenes[0].features.shot_count, 1);
    }

    #[test]
    fn detection_rollup_counts_labels() {
        let mut s0 = shot_with_transition(0, 0, 30, None);
        for label in ["person", "person", "object"] {
            s0.detectors.objects.push(ObjectBox {
                label: label.to_string(),
                conf: 0.8,
                bbox: [0.0, 0.0, 10.0, 10.0],
                area: 100.0,
                class_id: 0,
                pass: DetectionPass::Coarse,
                has_refined_mask: false,
            });
        }
        let totals = merge_detections(&[s0]);
        assert_eq!(totals.total_objects, 3);
        assert_eq!(totals.object_counts["person"], 2);
        assert_eq!(totals.unique_object_classes, 2);
    }

    #[test]
    fn provenance_dedup_keeps_first_appearance_order() {
        let p1 = Provenance::new("yolo", "8.3", None, &serde_json::json!({"a": 1}));
        let p2 = Provenance::new("audio_eng", "1.0", None, &serde_json::json!({"b": 2}));
        let records = vec![
            DetectorRecord::new(
                DetectorKind::ObjectsCoarse,
                DetectorPayload::Empty,
                p1.clone(),
            ),
            DetectorRecord::new(DetectorKind::Audio, DetectorPayload::Empty, p2.clone()),
            DetectorRecord::new(DetectorKind::ObjectsCoarse, DetectorPayload::Empty, p1.clone()),
        ];
        let head = vec![Provenance::new(
            "ingest",
            "0.2.1",
            None,
            &serde_json::json!({"sha": "x"}),
        )];
        let deduped = dedup_provenance(&records, head);
        assert_eq!(deduped.len(), 3);
        assert_eq!(deduped[0].tool, "ingest");
        assert_eq!(deduped[1].tool, "yolo");
        assert_eq!(deduped[2].tool, "audio_eng");
    }
}
