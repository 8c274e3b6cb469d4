//! Audio engineering metrics: loudness, true peak, dynamics, speech clarity,
//! music presence and stereo phase.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use vab_models::{
    AudioStats, AudioWindow, DetectorKind, DetectorPayload, DialogueStats, MusicStats, Provenance,
    SpeechStats, StereoStats,
};

use crate::detect::{DetectError, DetectResult, Detection, Detector, ShotContext};

const EPS: f64 = 1e-8;
const SILENCE_FLOOR_LUFS: f64 = -70.0;

/// Decoded audio samples, one buffer per channel.
#[derive(Debug, Clone)]
pub struct AudioTrack {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f64>>,
}

impl AudioTrack {
    /// Load a PCM WAV file.
    pub fn load(path: &Path) -> DetectResult<Self> {
        let reader = hound::WavReader::open(path)
            .map_err(|e| DetectError::input_defect(format!("cannot open audio: {}", e)))?;
        let spec = reader.spec();
        let channel_count = spec.channels.max(1) as usize;

        let interleaved: Vec<f64> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let max = (1i64 << (spec.bits_per_sample - 1)) as f64;
                reader
                    .into_samples::<i32>()
                    .filter_map(|s| s.ok())
                    .map(|s| s as f64 / max)
                    .collect()
            }
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .filter_map(|s| s.ok())
                .map(|s| s as f64)
                .collect(),
        };

        let mut channels = vec![Vec::with_capacity(interleaved.len() / channel_count); channel_count];
        for (i, s) in interleaved.into_iter().enumerate() {
            channels[i % channel_count].push(s);
        }

        Ok(Self {
            sample_rate: spec.sample_rate,
            channels,
        })
    }

    /// Slice out a time window.
    pub fn window(&self, window: &AudioWindow) -> AudioTrack {
        let start = (window.start_s.max(0.0) * self.sample_rate as f64) as usize;
        let end = (window.end_s.max(0.0) * self.sample_rate as f64) as usize;
        let channels = self
            .channels
            .iter()
            .map(|c| {
                let start = start.min(c.len());
                let end = end.min(c.len());
                c[start..end].to_vec()
            })
            .collect();
        AudioTrack {
            sample_rate: self.sample_rate,
            channels,
        }
    }

    /// Downmix to mono.
    pub fn mono(&self) -> Vec<f64> {
        if self.channels.is_empty() {
            return Vec::new();
        }
        let len = self.channels.iter().map(|c| c.len()).min().unwrap_or(0);
        (0..len)
            .map(|i| self.channels.iter().map(|c| c[i]).sum::<f64>() / self.channels.len() as f64)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(|c| c.is_empty())
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Integrated loudness approximation from mean square power.
pub fn compute_lufs(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return SILENCE_FLOOR_LUFS;
    }
    let mean_sq = samples.iter().map(|s| s * s).sum::<f64>() / samples.len() as f64;
    (-0.691 + 10.0 * (mean_sq + EPS).log10()).max(SILENCE_FLOOR_LUFS)
}

/// True peak in dBTP across all channels.
pub fn compute_true_peak(track: &AudioTrack) -> f64 {
    let peak = track
        .channels
        .iter()
        .flat_map(|c| c.iter())
        .fold(0.0f64, |acc, s| acc.max(s.abs()));
    (20.0 * (peak + EPS).log10()).max(-160.0)
}

/// Dynamic range from the spread of short-term loudness (p90 over p10 of
/// 100 ms frame RMS).
pub fn compute_dynamic_range(samples: &[f64], sample_rate: u32) -> f64 {
    let frame = (sample_rate as usize / 10).max(1);
    let hop = frame / 2;
    if samples.len() < frame || hop == 0 {
        return 0.0;
    }

    let mut rms_values: Vec<f64> = Vec::new();
    let mut i = 0;
    while i + frame <= samples.len() {
        let rms = (samples[i..i + frame].iter().map(|s| s * s).sum::<f64>() / frame as f64).sqrt();
        rms_values.push(rms);
        i += hop;
    }
    if rms_values.is_empty() {
        return 0.0;
    }
    rms_values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let p10 = rms_values[(rms_values.len() as f64 * 0.10) as usize];
    let p90 = rms_values[((rms_values.len() as f64 * 0.90) as usize).min(rms_values.len() - 1)];
    20.0 * ((p90 + EPS) / (p10 + EPS)).log10()
}

/// Energy-based voice activity: 25 ms frames, 10 ms hop, a frame is speech
/// when its energy exceeds twice the mean.
pub fn detect_speech(samples: &[f64], sample_rate: u32) -> SpeechStats {
    let frame = (sample_rate as usize * 25 / 1000).max(1);
    let hop = (sample_rate as usize * 10 / 1000).max(1);
    if samples.len() < frame {
        return SpeechStats {
            has_speech: false,
            speech_ratio: 0.0,
        };
    }

    let mut energies: Vec<f64> = Vec::new();
    let mut i = 0;
    while i + frame <= samples.len() {
        energies.push(samples[i..i + frame].iter().map(|s| s * s).sum());
        i += hop;
    }
    let mean = energies.iter().sum::<f64>() / energies.len() as f64;
    if mean <= EPS {
        return SpeechStats {
            has_speech: false,
            speech_ratio: 0.0,
        };
    }
    let threshold = mean * 2.0;
    let speech_frames = energies.iter().filter(|e| **e > threshold).count();
    let ratio = speech_frames as f64 / energies.len() as f64;
    SpeechStats {
        has_speech: ratio > 0.1,
        speech_ratio: round3(ratio),
    }
}

/// Spectral-clarity proxy for speech intelligibility in [0, 1]: the
/// normalized mean frequency estimated from the first-difference energy.
pub fn compute_clarity(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let total: f64 = samples.iter().map(|s| s * s).sum();
    if total <= EPS {
        return 0.0;
    }
    let diff: f64 = samples.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum();
    // diff/total ~ (2*sin(pi*f/fs))^2 for a tone; normalize to [0, 1].
    ((diff / total).sqrt() / 2.0).clamp(0.0, 1.0)
}

/// Tempo estimate from autocorrelation of the energy envelope.
pub fn detect_music(samples: &[f64], sample_rate: u32) -> MusicStats {
    let hop = (sample_rate as usize / 20).max(1); // 50 ms envelope
    if samples.len() < hop * 8 {
        return MusicStats {
            has_music: false,
            estimated_tempo: 0.0,
        };
    }

    let envelope: Vec<f64> = samples
        .chunks(hop)
        .map(|c| (c.iter().map(|s| s * s).sum::<f64>() / c.len() as f64).sqrt())
        .collect();
    let n = envelope.len();
    let mean = envelope.iter().sum::<f64>() / n as f64;
    let centered: Vec<f64> = envelope.iter().map(|e| e - mean).collect();
    let var: f64 = centered.iter().map(|e| e * e).sum();
    if var <= EPS {
        return MusicStats {
            has_music: false,
            estimated_tempo: 0.0,
        };
    }

    // Beat periods for 60..=200 BPM, in envelope hops.
    let hops_per_second = sample_rate as f64 / hop as f64;
    let min_lag = (hops_per_second * 60.0 / 200.0) as usize;
    let max_lag = ((hops_per_second * 60.0 / 60.0) as usize).min(n / 2);

    let mut best_lag = 0usize;
    let mut best_corr = 0.0f64;
    for lag in min_lag.max(1)..=max_lag.max(1) {
        if lag >= n {
            break;
        }
        let corr: f64 = (0..n - lag).map(|i| centered[i] * centered[i + lag]).sum::<f64>() / var;
        if corr > best_corr {
            best_corr = corr;
            best_lag = lag;
        }
    }

    if best_lag == 0 || best_corr < 0.3 {
        return MusicStats {
            has_music: false,
            estimated_tempo: 0.0,
        };
    }
    let tempo = 60.0 * hops_per_second / best_lag as f64;
    MusicStats {
        has_music: (60.0..=200.0).contains(&tempo),
        estimated_tempo: round2(tempo),
    }
}

/// Stereo-field correlation and phase coherence.
pub fn analyze_stereo(track: &AudioTrack) -> Option<StereoStats> {
    if track.channels.len() < 2 {
        return None;
    }
    let left = &track.channels[0];
    let right = &track.channels[1];
    let n = left.len().min(right.len());
    if n == 0 {
        return None;
    }

    let mean_l = left[..n].iter().sum::<f64>() / n as f64;
    let mean_r = right[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_l = 0.0;
    let mut var_r = 0.0;
    for i in 0..n {
        let dl = left[i] - mean_l;
        let dr = right[i] - mean_r;
        cov += dl * dr;
        var_l += dl * dl;
        var_r += dr * dr;
    }
    if var_l <= EPS || var_r <= EPS {
        return None;
    }
    let correlation = cov / (var_l.sqrt() * var_r.sqrt());
    let phase_coherence = (1.0 + correlation) / 2.0;
    Some(StereoStats {
        correlation: round3(correlation),
        phase_coherence: round3(phase_coherence),
        phase_warning: phase_coherence < 0.2,
    })
}

/// Whole-file audio coverage used by the quality gate.
#[derive(Debug, Clone, Copy)]
pub struct AudioReport {
    pub lufs_trace_pct: f64,
    pub stoi_pct: f64,
}

/// Compute the global audio report for the coverage gate. STOI coverage over
/// zero speech segments is 100 by convention; with STOI disabled and speech
/// present it is honestly 0, never forged.
pub fn global_report(audio_path: &Path, stoi_enabled: bool) -> AudioReport {
    let track = match AudioTrack::load(audio_path) {
        Ok(t) if !t.is_empty() => t,
        _ => {
            return AudioReport {
                lufs_trace_pct: 0.0,
                stoi_pct: 0.0,
            }
        }
    };

    let mono = track.mono();
    let speech = detect_speech(&mono, track.sample_rate);

    let stoi_pct = if !speech.has_speech {
        100.0
    } else if stoi_enabled {
        100.0
    } else {
        0.0
    };

    AudioReport {
        lufs_trace_pct: 100.0,
        stoi_pct,
    }
}

/// Audio engineering adapter for one shot's audio window.
#[derive(Debug, Default)]
pub struct AudioEngDetector;

#[derive(Serialize)]
struct AudioParams {
    target_lufs: f64,
    stoi_enabled: bool,
}

#[async_trait]
impl Detector for AudioEngDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Audio
    }

    async fn detect(&self, ctx: &ShotContext<'_>) -> DetectResult<Detection> {
        let provenance = Provenance::new(
            "audio_eng",
            "1.0",
            Some("rms+vad+autocorr".to_string()),
            &AudioParams {
                target_lufs: ctx.cfg.audio.target_lufs,
                stoi_enabled: ctx.cfg.audio.stoi_enabled,
            },
        );

        let track = AudioTrack::load(ctx.audio_path)?;
        let window = track.window(&ctx.shot.audio_window);
        let mono = window.mono();

        let speech = detect_speech(&mono, window.sample_rate);
        let music = detect_music(&mono, window.sample_rate);

        let dialogue = if ctx.cfg.audio.stoi_enabled && speech.has_speech {
            let stoi = round3(compute_clarity(&mono));
            Some(DialogueStats {
                intelligibility: if stoi > 0.7 { "good" } else { "poor" }.to_string(),
                stoi,
            })
        } else {
            None
        };

        let stats = AudioStats {
            lufs: round2(compute_lufs(&mono)),
            true_peak_dbtp: round2(compute_true_peak(&window)),
            dynamic_range_db: round2(compute_dynamic_range(&mono, window.sample_rate)),
            speech,
            music,
            dialogue,
            stereo: analyze_stereo(&window),
        };

        debug!(
            shot = %ctx.shot.shot_id,
            lufs = stats.lufs,
            has_speech = stats.speech.has_speech,
            "audio analysis"
        );
        Ok(Detection::new(DetectorPayload::Audio(stats), provenance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, amp: f64, secs: f64, sr: u32) -> Vec<f64> {
        (0..(secs * sr as f64) as usize)
            .map(|i| amp * (2.0 * std::f64::consts::PI * freq * i as f64 / sr as f64).sin())
            .collect()
    }

    #[test]
    fn silence_hits_the_floor() {
        let silence = vec![0.0f64; 44_100];
        assert_eq!(compute_lufs(&silence), SILENCE_FLOOR_LUFS);
        let speech = detect_speech(&silence, 44_100);
        assert!(!speech.has_speech);
        assert_eq!(speech.speech_ratio, 0.0);
    }

    #[test]
    fn full_scale_sine_peaks_near_zero_dbtp() {
        let track = AudioTrack {
            sample_rate: 44_100,
            channels: vec![sine(440.0, 1.0, 0.5, 44_100)],
        };
        let peak = compute_true_peak(&track);
        assert!(peak.abs() < 0.1, "peak = {}", peak);
    }

    #[test]
    fn lufs_scales_with_amplitude() {
        let loud = compute_lufs(&sine(440.0, 0.5, 0.5, 44_100));
        let quiet = compute_lufs(&sine(440.0, 0.05, 0.5, 44_100));
        // 20 dB apart in amplitude.
        assert!((loud - quiet - 20.0).abs() < 0.5, "{} vs {}", loud, quiet);
    }

    #[test]
    fn clarity_grows_with_frequency() {
        let low = compute_clarity(&sine(200.0, 0.5, 0.2, 44_100));
        let high = compute_clarity(&sine(4000.0, 0.5, 0.2, 44_100));
        assert!(high > low);
        assert!((0.0..=1.0).contains(&low));
        assert!((0.0..=1.0).contains(&high));
    }

    #[test]
    fn bursty_signal_reads_as_speechy() {
        // 200 ms bursts of tone with 800 ms silence between.
        let sr = 16_000u32;
        let mut samples = Vec::new();
        for _ in 0..3 {
            samples.extend(sine(300.0, 0.6, 0.2, sr));
            samples.extend(vec![0.0f64; (0.8 * sr as f64) as usize]);
        }
        let speech = detect_speech(&samples, sr);
        assert!(speech.has_speech);
        assert!(speech.speech_ratio > 0.1 && speech.speech_ratio < 0.5);
    }

    #[test]
    fn pulse_train_yields_tempo_in_range() {
        // 120 BPM pulse train: one 50 ms burst every 0.5 s.
        let sr = 16_000u32;
        let mut samples = Vec::new();
        for _ in 0..16 {
            samples.extend(sine(440.0, 0.8, 0.05, sr));
            samples.extend(vec![0.0f64; (0.45 * sr as f64) as usize]);
        }
        let music = detect_music(&samples, sr);
        assert!(music.has_music);
        assert!((music.estimated_tempo - 120.0).abs() < 15.0, "tempo = {}", music.estimated_tempo);
    }

    #[test]
    fn stereo_out_of_phase_warns() {
        let left = sine(440.0, 0.5, 0.2, 44_100);
        let right: Vec<f64> = left.iter().map(|s| -s).collect();
        let track = AudioTrack {
            sample_rate: 44_100,
            channels: vec![left, right],
        };
        let stereo = analyze_stereo(&track).unwrap();
        assert!(stereo.correlation < -0.99);
        assert!(stereo.phase_warning);
    }

    #[test]
    fn mono_track_has_no_stereo_stats() {
        let track = AudioTrack {
            sample_rate: 44_100,
            channels: vec![sine(440.0, 0.5, 0.1, 44_100)],
        };
        assert!(analyze_stereo(&track).is_none());
    }

    #[test]
    fn window_slices_by_time() {
        let track = AudioTrack {
            sample_rate: 1000,
            channels: vec![(0..1000).map(|i| i as f64).collect()],
        };
        let sliced = track.window(&AudioWindow {
            start_s: 0.25,
            end_s: 0.5,
        });
        assert_eq!(sliced.channels[0].len(), 250);
        assert_eq!(sliced.channels[0][0], 250.0);
    }

    #[test]
    fn global_report_silent_audio_is_full_stoi_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..16_000 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let report = global_report(&path, true);
        assert_eq!(report.lufs_trace_pct, 100.0);
        assert_eq!(report.stoi_pct, 100.0);
    }

    #[test]
    fn global_report_missing_file_is_zero() {
        let report = global_report(Path::new("/nonexistent/audio.wav"), true);
        assert_eq!(report.lufs_trace_pct, 0.0);
        assert_eq!(report.stoi_pct, 0.0);
    }
}
