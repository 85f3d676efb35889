use crate::error::IngestError;
use crate::models::{AudioChunk, Frame, FrameSampling, IngestionOptions};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Read the playable duration of a video asset with ffprobe.
///
/// A missing path is `AssetNotFound`; an unreadable or corrupt asset is
/// `Decode` carrying ffprobe's diagnostic output.
pub async fn probe_duration(video_path: &Path) -> Result<f64, IngestError> {
    if !video_path.exists() {
        return Err(IngestError::AssetNotFound(video_path.to_path_buf()));
    }

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(video_path)
        .output()
        .await?;

    if !output.status.success() {
        return Err(IngestError::Decode(format!(
            "ffprobe failed for {}: {}",
            video_path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_probe_duration(&String::from_utf8_lossy(&output.stdout), video_path)
}

fn parse_probe_duration(stdout: &str, video_path: &Path) -> Result<f64, IngestError> {
    let duration: f64 = stdout.trim().parse().map_err(|_| {
        IngestError::Decode(format!(
            "ffprobe returned no parseable duration for {}: {stdout:?}",
            video_path.display()
        ))
    })?;

    if !duration.is_finite() || duration <= 0.0 {
        return Err(IngestError::Decode(format!(
            "ffprobe reported non-positive duration {duration} for {}",
            video_path.display()
        )));
    }

    Ok(duration)
}

/// Plan audio chunk windows over `[0, duration]`.
///
/// Starts advance by `chunk_duration - overlap`; a new chunk starts only
/// while a full `chunk_duration` still fits, and the final chunk absorbs the
/// tail so its end lands exactly on the asset duration. An asset shorter than
/// `chunk_duration` yields a single full-span chunk, even when it is also
/// shorter than `min_chunk_duration`.
pub fn plan_chunks(
    duration: f64,
    chunk_duration: f64,
    overlap: f64,
    min_chunk_duration: f64,
) -> Result<Vec<(f64, f64)>, IngestError> {
    if chunk_duration <= 0.0 {
        return Err(IngestError::InvalidSegmentation(format!(
            "chunk_duration must be positive, got {chunk_duration}"
        )));
    }
    if overlap < 0.0 || overlap >= chunk_duration {
        return Err(IngestError::InvalidSegmentation(format!(
            "overlap {overlap} must be in [0, chunk_duration {chunk_duration})"
        )));
    }
    if min_chunk_duration <= 0.0 || min_chunk_duration > chunk_duration {
        return Err(IngestError::InvalidSegmentation(format!(
            "min_chunk_duration {min_chunk_duration} must be in (0, chunk_duration {chunk_duration}]"
        )));
    }
    if !duration.is_finite() || duration <= 0.0 {
        return Err(IngestError::InvalidSegmentation(format!(
            "asset duration must be positive, got {duration}"
        )));
    }

    if duration <= chunk_duration {
        return Ok(vec![(0.0, duration)]);
    }

    let step = chunk_duration - overlap;
    let mut starts = vec![0.0f64];
    loop {
        let next = starts.last().copied().unwrap_or(0.0) + step;
        if duration - next < chunk_duration {
            break;
        }
        starts.push(next);
    }

    let last = starts.len() - 1;
    let windows = starts
        .iter()
        .enumerate()
        .map(|(index, &start)| {
            if index == last {
                (start, duration)
            } else {
                (start, start + chunk_duration)
            }
        })
        .collect();

    Ok(windows)
}

/// Plan frame timestamps (milliseconds), strictly increasing.
pub fn plan_frame_timestamps(
    duration: f64,
    sampling: FrameSampling,
) -> Result<Vec<f64>, IngestError> {
    match sampling {
        FrameSampling::Count(count) => {
            if count == 0 {
                return Err(IngestError::InvalidSegmentation(
                    "frame count must be at least 1".to_string(),
                ));
            }
            let spacing = duration / count as f64;
            Ok((0..count).map(|i| i as f64 * spacing * 1_000.0).collect())
        }
        FrameSampling::EveryNSeconds(rate) => {
            if rate <= 0.0 {
                return Err(IngestError::InvalidSegmentation(format!(
                    "frame rate must be positive seconds, got {rate}"
                )));
            }
            let mut timestamps = Vec::new();
            let mut t = 0.0f64;
            while t < duration {
                timestamps.push(t * 1_000.0);
                t += rate;
            }
            Ok(timestamps)
        }
    }
}

/// Cut the planned audio chunks out of the source as mp3 files.
///
/// Any per-chunk ffmpeg failure aborts with `Decode` rather than silently
/// dropping the tail of the asset.
pub async fn segment(
    video_id: &str,
    video_path: &Path,
    duration: f64,
    options: &IngestionOptions,
    out_dir: &Path,
) -> Result<Vec<AudioChunk>, IngestError> {
    let windows = plan_chunks(
        duration,
        options.chunk_duration_sec,
        options.overlap_sec,
        options.min_chunk_duration_sec,
    )?;

    tokio::fs::create_dir_all(out_dir).await?;

    let mut chunks = Vec::with_capacity(windows.len());
    for (position, (start, end)) in windows.into_iter().enumerate() {
        let audio_path = out_dir.join(format!("chunk_{position:04}.mp3"));
        let output = Command::new("ffmpeg")
            .args(["-ss", &start.to_string(), "-to", &end.to_string(), "-i"])
            .arg(video_path)
            .args(["-vn", "-acodec", "libmp3lame", "-y"])
            .arg(&audio_path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(IngestError::Decode(format!(
                "ffmpeg audio chunk {position} [{start:.2}, {end:.2}] failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        debug!(video_id, position, start, end, "extracted audio chunk");

        chunks.push(AudioChunk {
            video_id: video_id.to_string(),
            position: position as u64,
            start_time_sec: start,
            end_time_sec: end,
            audio_path: audio_path.to_string_lossy().to_string(),
            transcript: None,
        });
    }

    Ok(chunks)
}

/// Sample frames from the source as scaled jpeg files.
pub async fn sample_frames(
    video_id: &str,
    video_path: &Path,
    duration: f64,
    options: &IngestionOptions,
    out_dir: &Path,
) -> Result<Vec<Frame>, IngestError> {
    let timestamps = plan_frame_timestamps(duration, options.frame_sampling)?;

    tokio::fs::create_dir_all(out_dir).await?;

    let scale = format!("scale={}:{}", options.frame_width, options.frame_height);
    let mut frames = Vec::with_capacity(timestamps.len());
    for (position, timestamp_msec) in timestamps.into_iter().enumerate() {
        let image_path = out_dir.join(format!("frame_{position:04}.jpg"));
        let seek = timestamp_msec / 1_000.0;
        let output = Command::new("ffmpeg")
            .args(["-ss", &seek.to_string(), "-i"])
            .arg(video_path)
            .args(["-frames:v", "1", "-vf", &scale, "-y"])
            .arg(&image_path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(IngestError::Decode(format!(
                "ffmpeg frame {position} at {seek:.2}s failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        frames.push(Frame {
            video_id: video_id.to_string(),
            position: position as u64,
            timestamp_msec,
            image_path: image_path.to_string_lossy().to_string(),
            caption: None,
        });
    }

    Ok(frames)
}
