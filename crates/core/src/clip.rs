use crate::error::ExtractError;
use crate::models::Clip;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Cut `[start_time, end_time]` out of the source into a standalone file.
///
/// The video stream is re-encoded (libx264, medium, crf 23) so the cut lands
/// on exact timestamps regardless of source keyframe placement; audio is
/// stream-copied. An existing output file is overwritten. On subprocess
/// failure the partial output is removed and the ffmpeg diagnostics travel
/// in the error.
pub async fn extract_clip(
    video_path: &Path,
    start_time: f64,
    end_time: f64,
    output_path: &Path,
) -> Result<Clip, ExtractError> {
    if start_time >= end_time {
        return Err(ExtractError::InvalidRange {
            start: start_time,
            end: end_time,
        });
    }

    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let output = Command::new("ffmpeg")
        .args([
            "-ss",
            &start_time.to_string(),
            "-to",
            &end_time.to_string(),
            "-i",
        ])
        .arg(video_path)
        .args([
            "-c:v", "libx264", "-preset", "medium", "-crf", "23", "-c:a", "copy", "-y",
        ])
        .arg(output_path)
        .output()
        .await?;

    if !output.status.success() {
        // Never leave a half-written clip behind.
        let _ = tokio::fs::remove_file(output_path).await;
        return Err(ExtractError::Extraction(format!(
            "ffmpeg exited with {} for [{start_time:.2}, {end_time:.2}]: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    debug!(
        output = %output_path.display(),
        start_time,
        end_time,
        "extracted clip"
    );

    Ok(Clip {
        start_time,
        end_time,
        output_path: output_path.to_path_buf(),
    })
}
