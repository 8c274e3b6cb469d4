//! Risk synthesis from detector metrics.

use serde_json::json;

use vab_models::{iou, AnalysisConfig, Risk, RiskKind, Severity, ShotAnalysis};

use crate::fallback::FallbackController;

const TRUE_PEAK_CLIP_DBTP: f64 = -1.0;

/// Derive the risk list for a bundle.
pub fn synthesize_risks(
    shots: &[ShotAnalysis],
    controller: &FallbackController,
    cfg: &AnalysisConfig,
) -> Vec<Risk> {
    let mut risks = Vec::new();

    for shot in shots {
        let d = &shot.detectors;

        if let Some(audio) = &d.audio {
            if let Some(dialogue) = &audio.dialogue {
                if dialogue.stoi < cfg.audio.stoi_min_ok {
                    risks.push(Risk {
                        shot_id: shot.shot_id.clone(),
                        kind: RiskKind::LowDialogueIntelligibility,
                        severity: Severity::High,
                        metric: json!({ "stoi": dialogue.stoi }),
                    });
                }
            }
            if audio.true_peak_dbtp > TRUE_PEAK_CLIP_DBTP {
                risks.push(Risk {
                    shot_id: shot.shot_id.clone(),
                    kind: RiskKind::AudioClipping,
                    severity: Severity::Med,
                    metric: json!({ "true_peak_dbtp": audio.true_peak_dbtp }),
                });
            }
        }

        // Caption bounding box overlapping a face bounding box.
        'overlap: for text in &d.text {
            for face in &d.faces {
                if iou(&text.bbox, &face.bbox) > 0.0 {
                    risks.push(Risk {
                        shot_id: shot.shot_id.clone(),
                        kind: RiskKind::CaptionFaceOverlap,
                        severity: Severity::Med,
                        metric: json!({ "text_bbox": text.bbox, "face_bbox": face.bbox }),
                    });
                    break 'overlap;
                }
            }
        }
    }

    // Ladder steps above level 2 flag degraded detection at the shot where
    // they fired.
    for fired in controller.fired_steps() {
        if fired.step.level() > 2 {
            risks.push(Risk {
                shot_id: fired.shot_id.clone(),
                kind: RiskKind::DegradedDetection,
                severity: Severity::Med,
                metric: json!({ "ladder_step": fired.step.reason() }),
            });
        }
    }

    risks
}

#[cfg(test)]
mod tests {
    use super::*;
    use vab_models::{
        AudioStats, DetectorKind, DialogueStats, FaceBox, FontInfo, MusicStats, ShotDetectors,
        SpeechStats, TextRegion,
    };

    fn shot(id: &str, detectors: ShotDetectors) -> ShotAnalysis {
        ShotAnalysis {
            shot_id: id.to_string(),
            start_frame: 0,
            end_frame: 30,
            frame_count: 30,
            duration_s: 1.0,
            detectors,
            summary: String::new(),
            mood: String::new(),
            intent: String::new(),
            composition_notes: Vec::new(),
            transition_guess: String::new(),
        }
    }

    fn audio(stoi: Option<f64>, true_peak: f64) -> AudioStats {
        AudioStats {
            lufs: -14.0,
            true_peak_dbtp: true_peak,
            dynamic_range_db: 10.0,
            speech: SpeechStats {
                has_speech: stoi.is_some(),
                speech_ratio: 0.4,
            },
            music: MusicStats {
                has_music: false,
                estimated_tempo: 0.0,
            },
            dialogue: stoi.map(|s| DialogueStats {
                stoi: s,
                intelligibility: "poor".to_string(),
            }),
            stereo: None,
        }
    }

    #[test]
    fn low_stoi_is_high_severity() {
        let mut d = ShotDetectors::default();
        d.audio = Some(audio(Some(0.5), -6.0));
        let risks = synthesize_risks(
            &[shot("sh_000", d)],
            &FallbackController::new(AnalysisConfig::default()),
            &AnalysisConfig::default(),
        );
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].kind, RiskKind::LowDialogueIntelligibility);
        assert_eq!(risks[0].severity, Severity::High);
    }

    #[test]
    fn hot_true_peak_flags_clipping() {
        let mut d = ShotDetectors::default();
        d.audio = Some(audio(None, -0.2));
        let risks = synthesize_risks(
            &[shot("sh_000", d)],
            &FallbackController::new(AnalysisConfig::default()),
            &AnalysisConfig::default(),
        );
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].kind, RiskKind::AudioClipping);
    }

    #[test]
    fn caption_over_face_is_flagged_once() {
        let mut d = ShotDetectors::default();
        d.faces.push(FaceBox {
            face_id: "face_0".to_string(),
            conf: 0.9,
            bbox: [100.0, 100.0, 200.0, 200.0],
        });
        d.text.push(TextRegion {
            text: "caption".to_string(),
            conf: 0.8,
            bbox: [90.0, 180.0, 260.0, 210.0],
            font: FontInfo {
                family: "sans-serif".to_string(),
                size_est: 20,
                is_bold: false,
                is_italic: false,
            },
        });
        d.text.push(TextRegion {
            text: "caption2".to_string(),
            conf: 0.8,
            bbox: [90.0, 190.0, 260.0, 220.0],
            font: FontInfo {
                family: "sans-serif".to_string(),
                size_est: 20,
                is_bold: false,
                is_italic: false,
            },
        });
        let risks = synthesize_risks(
            &[shot("sh_000", d)],
            &FallbackController::new(AnalysisConfig::default()),
            &AnalysisConfig::default(),
        );
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].kind, RiskKind::CaptionFaceOverlap);
    }

    #[test]
    fn deep_ladder_advance_flags_degraded_detection() {
        let controller = FallbackController::new(AnalysisConfig::default());
        controller.advance(DetectorKind::MaskRefine, "sh_000"); // level 1
        controller.advance(DetectorKind::SuperRes, "sh_001"); // level 2
        let risks = synthesize_risks(&[], &controller, &AnalysisConfig::default());
        assert!(risks.is_empty());

        controller.advance(DetectorKind::Reasoning, "sh_002"); // level 3
        let risks = synthesize_risks(&[], &controller, &AnalysisConfig::default());
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].kind, RiskKind::DegradedDetection);
        assert_eq!(risks[0].shot_id, "sh_002");
    }
}
