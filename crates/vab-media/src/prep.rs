//! Prep stage: normalize the source, decode keyframes, slice audio and
//! segment the video into shots.
//!
//! Prep runs once per job, before any detector. Its output is immutable: a
//! shot list that partitions `[0, total_frames)` plus the decoded frame and
//! audio files under the video's store directory.

use std::path::PathBuf;

use tracing::{info, warn};

use vab_models::provenance::sha256_hex;
use vab_models::{ids, AnalysisConfig, AudioWindow, Shot, VideoId};
use vab_store::VideoStore;

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::frames;
use crate::probe::{probe_video, VideoInfo};

/// Shot-boundary threshold on histogram intersection: below this two
/// consecutive decoded frames belong to different shots.
const BOUNDARY_SIMILARITY: f64 = 0.55;
/// Debounce: minimum decoded frames between boundaries.
const MIN_SHOT_FRAMES: u64 = 5;

/// Everything prep learned about the source video.
#[derive(Debug, Clone)]
pub struct VideoSourceMeta {
    pub video_id: VideoId,
    pub path: PathBuf,
    pub sha256: String,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub total_frames: u64,
    pub duration_s: f64,
    pub audio_path: PathBuf,
    pub frame_stride: u32,
    pub decoded_frames: u64,
}

/// Prep output: source metadata plus the shot partition.
#[derive(Debug, Clone)]
pub struct PrepOutput {
    pub meta: VideoSourceMeta,
    pub shots: Vec<Shot>,
}

/// Run the full prep stage for a video.
pub async fn prepare(
    store: &VideoStore,
    video_id: &VideoId,
    media_url: Option<&str>,
    cfg: &AnalysisConfig,
) -> MediaResult<PrepOutput> {
    store.ensure_dirs(video_id).await?;
    let video_path = store.video_path(video_id);

    // Fetch and normalize remote sources; uploaded videos are already there.
    if let Some(url) = media_url {
        if !store.has_video(video_id).await {
            info!(video_id = %video_id, url, "downloading source video");
            FfmpegCommand::new(url, &video_path)
                .output_args(["-c:v", "libx264", "-preset", "medium", "-crf", "23"])
                .output_args(["-c:a", "aac", "-b:a", "192k"])
                .run()
                .await?;
        }
    }
    if !store.has_video(video_id).await {
        return Err(MediaError::FileNotFound(video_path));
    }

    let info = probe_video(&video_path).await?;
    if info.total_frames == 0 {
        return Err(MediaError::invalid_video("video has no frames"));
    }

    let sha256 = hash_file(&video_path).await?;

    let stride = cfg.runtime.frame_stride.max(1);
    let decoded_frames = extract_frames(store, video_id, &video_path, stride).await?;
    if decoded_frames == 0 {
        return Err(MediaError::invalid_video("no frames decoded"));
    }

    let audio_path = extract_audio(store, video_id, &video_path, &info).await?;

    let shots = detect_shots(store, video_id, &info, stride, decoded_frames)?;
    if shots.is_empty() {
        return Err(MediaError::NoShots);
    }

    info!(
        video_id = %video_id,
        shots = shots.len(),
        frames = decoded_frames,
        fps = info.fps,
        "prep complete"
    );

    Ok(PrepOutput {
        meta: VideoSourceMeta {
            video_id: video_id.clone(),
            path: video_path,
            sha256,
            fps: info.fps,
            width: info.width,
            height: info.height,
            total_frames: info.total_frames,
            duration_s: info.duration,
            audio_path,
            frame_stride: stride,
            decoded_frames,
        },
        shots,
    })
}

/// SHA-256 of the source file.
async fn hash_file(path: &std::path::Path) -> MediaResult<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(sha256_hex(&bytes))
}

/// Decode keyframes to `frames/frame_XXXXXXXX.jpg`. Frame numbering is in
/// decoded order; decoded index `d` corresponds to source frame `d * stride`.
/// Returns the decoded frame count.
async fn extract_frames(
    store: &VideoStore,
    video_id: &VideoId,
    video_path: &std::path::Path,
    stride: u32,
) -> MediaResult<u64> {
    let pattern = store.frames_dir(video_id).join("frame_%08d.jpg");

    let mut cmd = FfmpegCommand::new(video_path.to_string_lossy(), &pattern)
        .output_args(["-qscale:v", "2", "-start_number", "0"]);
    if stride > 1 {
        cmd = cmd.output_args([
            "-vf".to_string(),
            format!("select=not(mod(n\\,{}))", stride),
            "-vsync".to_string(),
            "vfr".to_string(),
        ]);
    }
    cmd.run().await?;

    // Count what actually landed on disk.
    let mut count = 0u64;
    let mut entries = tokio::fs::read_dir(store.frames_dir(video_id)).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("frame_") && name.ends_with(".jpg") && !name.contains("_sr") {
            count += 1;
        }
    }
    Ok(count)
}

/// Extract the audio track as 44.1 kHz stereo PCM. Videos without an audio
/// stream get a silent track of matching duration so the audio detectors
/// still produce valid empty-speech results.
async fn extract_audio(
    store: &VideoStore,
    video_id: &VideoId,
    video_path: &std::path::Path,
    info: &VideoInfo,
) -> MediaResult<PathBuf> {
    let audio_path = store.audio_path(video_id);

    if info.has_audio {
        FfmpegCommand::new(video_path.to_string_lossy(), &audio_path)
            .output_args(["-vn", "-acodec", "pcm_s16le", "-ar", "44100", "-ac", "2"])
            .run()
            .await?;
    } else {
        warn!(video_id = %video_id, "no audio stream, writing silent track");
        write_silent_wav(&audio_path, info.duration)?;
    }

    Ok(audio_path)
}

/// Write a silent 44.1 kHz stereo WAV of the given duration.
fn write_silent_wav(path: &std::path::Path, duration_s: f64) -> MediaResult<()> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| MediaError::invalid_video(format!("cannot write wav: {}", e)))?;
    let samples = (duration_s.max(0.0) * 44_100.0) as usize * 2;
    for _ in 0..samples {
        writer
            .write_sample(0i16)
            .map_err(|e| MediaError::invalid_video(format!("cannot write wav: {}", e)))?;
    }
    writer
        .finalize()
        .map_err(|e| MediaError::invalid_video(format!("cannot write wav: {}", e)))?;
    Ok(())
}

/// Segment decoded frames into shots by comparing luma histograms of
/// consecutive frames.
fn detect_shots(
    store: &VideoStore,
    video_id: &VideoId,
    info: &VideoInfo,
    stride: u32,
    decoded_frames: u64,
) -> MediaResult<Vec<Shot>> {
    let mut similarities = Vec::with_capacity(decoded_frames.saturating_sub(1) as usize);
    let mut prev_hist: Option<[f64; 64]> = None;

    for d in 0..decoded_frames {
        let path = store.frame_path(video_id, d);
        let luma = frames::load_luma(&path)?;
        let small = frames::downscale(&luma, 128);
        let hist = frames::luma_histogram(&small);
        if let Some(prev) = prev_hist {
            similarities.push(frames::histogram_intersection(&prev, &hist));
        }
        prev_hist = Some(hist);
    }

    let boundaries = find_boundaries(&similarities, MIN_SHOT_FRAMES);
    Ok(build_shots(
        store,
        video_id,
        &boundaries,
        decoded_frames,
        stride,
        info.total_frames,
        info.fps,
    ))
}

/// Boundary positions (decoded index of the first frame of a new shot) from
/// the similarity series. `similarities[i]` compares decoded frames `i` and
/// `i + 1`.
fn find_boundaries(similarities: &[f64], min_gap: u64) -> Vec<u64> {
    let mut boundaries = Vec::new();
    let mut last_boundary = 0u64;
    for (i, sim) in similarities.iter().enumerate() {
        let pos = i as u64 + 1;
        if *sim < BOUNDARY_SIMILARITY && pos - last_boundary >= min_gap {
            boundaries.push(pos);
            last_boundary = pos;
        }
    }
    boundaries
}

/// Build the shot partition from boundary positions. Shot extents are in
/// source-frame units and always cover `[0, total_frames)` exactly.
fn build_shots(
    store: &VideoStore,
    video_id: &VideoId,
    boundaries: &[u64],
    decoded_frames: u64,
    stride: u32,
    total_frames: u64,
    fps: f64,
) -> Vec<Shot> {
    let fps = if fps > 0.0 { fps } else { 30.0 };
    let stride = stride as u64;

    // Decoded-index ranges per shot.
    let mut starts = vec![0u64];
    starts.extend_from_slice(boundaries);
    let mut shots = Vec::with_capacity(starts.len());

    for (idx, &d_start) in starts.iter().enumerate() {
        let d_end = starts.get(idx + 1).copied().unwrap_or(decoded_frames);

        // Source-frame extent; the final shot absorbs the tail.
        let start_frame = d_start * stride;
        let end_frame = if idx + 1 == starts.len() {
            total_frames
        } else {
            d_end * stride
        };

        let frame_paths = (d_start..d_end)
            .map(|d| store.frame_path(video_id, d))
            .collect::<Vec<_>>();

        let frame_count = end_frame - start_frame;
        shots.push(Shot {
            shot_id: ids::shot_id(idx),
            start_frame,
            end_frame,
            frame_count,
            duration_s: frame_count as f64 / fps,
            frame_paths,
            audio_window: AudioWindow {
                start_s: start_frame as f64 / fps,
                end_s: end_frame as f64 / fps,
            },
        });
    }

    shots
}
