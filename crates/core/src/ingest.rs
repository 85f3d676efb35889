use crate::annotators::{caption_frames, transcribe_chunks, Captioner, Transcriber};
use crate::embeddings::{ImageEmbedder, TextEmbedder};
use crate::error::IngestError;
use crate::index::{build_caption_index, build_image_index, build_speech_index};
use crate::models::{
    AudioChunk, Frame, IngestionOptions, Modality, RegistryEntry, RetryPolicy, VideoAsset,
};
use crate::segmenter;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// The identity of a video is its file stem; re-ingesting the same stem is
/// the idempotent no-op path.
pub fn derive_video_id(video_path: &Path) -> Result<String, IngestError> {
    video_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_string())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| {
            IngestError::InvalidArgument(format!(
                "path has no usable file name: {}",
                video_path.display()
            ))
        })
}

fn digest_file(path: &Path) -> Result<String, IngestError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn fresh_cache_namespace() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("cache_{}", &suffix[..8])
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), IngestError> {
    let body = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, body).await?;
    Ok(())
}

/// Run the full ingestion pipeline for one video and persist every derived
/// artifact under a fresh cache namespace.
///
/// Stages: probe → segment/sample → annotate (bounded concurrency) →
/// embed/index → persist tables and indices. Registration is deliberately
/// not part of this function; the caller registers only after everything
/// below has succeeded, so an aborted ingestion leaves the registry
/// untouched.
#[allow(clippy::too_many_arguments)]
pub async fn ingest_video(
    video_path: &Path,
    cache_root: &Path,
    options: &IngestionOptions,
    retry: RetryPolicy,
    transcriber: Arc<dyn Transcriber>,
    captioner: Arc<dyn Captioner>,
    text_embedder: &dyn TextEmbedder,
    image_embedder: &dyn ImageEmbedder,
) -> Result<RegistryEntry, IngestError> {
    let video_id = derive_video_id(video_path)?;
    let duration = segmenter::probe_duration(video_path).await?;

    let asset = VideoAsset {
        video_id: video_id.clone(),
        source_path: video_path.to_string_lossy().to_string(),
        duration_sec: duration,
        checksum: digest_file(video_path)?,
        ingested_at: Utc::now(),
    };

    let namespace = fresh_cache_namespace();
    let cache_dir = cache_root.join(&namespace);
    tokio::fs::create_dir_all(&cache_dir).await?;

    info!(video_id, namespace, duration, "ingesting video");

    let chunks = segmenter::segment(
        &video_id,
        video_path,
        duration,
        options,
        &cache_dir.join("audio"),
    )
    .await?;
    let frames = segmenter::sample_frames(
        &video_id,
        video_path,
        duration,
        options,
        &cache_dir.join("frames"),
    )
    .await?;

    info!(
        video_id,
        chunks = chunks.len(),
        frames = frames.len(),
        "segmentation complete; annotating"
    );

    let (chunks, frames) = tokio::join!(
        transcribe_chunks(transcriber, chunks, retry, options.annotation_concurrency),
        caption_frames(
            captioner,
            frames,
            options.caption_prompt.clone(),
            retry,
            options.annotation_concurrency,
        ),
    );
    let chunks: Vec<AudioChunk> = chunks?;
    let frames: Vec<Frame> = frames?;

    let speech_index = build_speech_index(&chunks, text_embedder)
        .await
        .map_err(|error| IngestError::Embedding(error.to_string()))?;
    let caption_index = build_caption_index(&frames, text_embedder)
        .await
        .map_err(|error| IngestError::Embedding(error.to_string()))?;
    let image_index = build_image_index(&frames, image_embedder)
        .await
        .map_err(|error| IngestError::Embedding(error.to_string()))?;

    for index in [&speech_index, &caption_index, &image_index] {
        index
            .save(&cache_dir.join(index.modality.index_file_name()))
            .await
            .map_err(|error| IngestError::SnapshotWrite(error.to_string()))?;
    }

    let video_table = cache_dir.join("video.json");
    let audio_chunks_view = cache_dir.join("audio_chunks.json");
    let frames_view = cache_dir.join("frames.json");

    write_json(&video_table, &asset).await?;
    write_json(&audio_chunks_view, &chunks).await?;
    write_json(&frames_view, &frames).await?;

    info!(
        video_id,
        speech = speech_index.len(),
        captions = caption_index.len(),
        images = image_index.len(),
        "indices built"
    );

    Ok(RegistryEntry {
        video_name: video_id,
        video_cache: cache_dir.to_string_lossy().to_string(),
        video_table: video_table.to_string_lossy().to_string(),
        frames_view: frames_view.to_string_lossy().to_string(),
        audio_chunks_view: audio_chunks_view.to_string_lossy().to_string(),
    })
}

/// Index file path for one modality under a registered cache namespace.
pub fn index_path(entry: &RegistryEntry, modality: Modality) -> std::path::PathBuf {
    Path::new(&entry.video_cache).join(modality.index_file_name())
}
