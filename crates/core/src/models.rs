use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoAsset {
    pub video_id: String,
    pub source_path: String,
    pub duration_sec: f64,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioChunk {
    pub video_id: String,
    pub position: u64,
    pub start_time_sec: f64,
    pub end_time_sec: f64,
    pub audio_path: String,
    pub transcript: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub video_id: String,
    pub position: u64,
    pub timestamp_msec: f64,
    pub image_path: String,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Speech,
    Image,
    Caption,
}

impl Modality {
    pub fn index_file_name(&self) -> &'static str {
        match self {
            Modality::Speech => "speech.index.json",
            Modality::Image => "image.index.json",
            Modality::Caption => "caption.index.json",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Modality::Speech => write!(f, "speech"),
            Modality::Image => write!(f, "image"),
            Modality::Caption => write!(f, "caption"),
        }
    }
}

/// A ranked time window on the video timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub start_time: f64,
    pub end_time: f64,
    pub similarity: f64,
}

/// Annotated text paired with its similarity score, for the Q&A paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextHit {
    pub text: String,
    pub similarity: f64,
}

/// Registry value schema; field names are the persisted snapshot contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryEntry {
    pub video_name: String,
    pub video_cache: String,
    pub video_table: String,
    pub frames_view: String,
    pub audio_chunks_view: String,
}

/// A materialized clip. Ephemeral: never recorded in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clip {
    pub start_time: f64,
    pub end_time: f64,
    pub output_path: PathBuf,
}

/// Frame sampling strategy. Rate and count are mutually exclusive by
/// construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum FrameSampling {
    /// Exactly this many frames, evenly spaced over the asset duration.
    Count(usize),
    /// One frame every N seconds, starting at zero.
    EveryNSeconds(f64),
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_duration_sec: f64,
    pub overlap_sec: f64,
    pub min_chunk_duration_sec: f64,
    pub frame_sampling: FrameSampling,
    pub frame_width: u32,
    pub frame_height: u32,
    pub caption_prompt: String,
    pub annotation_concurrency: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_duration_sec: 10.0,
            overlap_sec: 1.0,
            min_chunk_duration_sec: 1.0,
            frame_sampling: FrameSampling::Count(45),
            frame_width: 1024,
            frame_height: 768,
            caption_prompt: "Describe what is happening in the image".to_string(),
            annotation_concurrency: 4,
        }
    }
}

/// Policy for picking one window when speech and caption searches disagree.
/// The priority list breaks exact score ties toward its earlier entry.
#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    pub delta_seconds: f64,
    pub priority: Vec<Modality>,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            delta_seconds: 5.0,
            priority: vec![Modality::Speech, Modality::Caption],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: std::time::Duration,
    pub max_delay: std::time::Duration,
    pub per_call_timeout: std::time::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: std::time::Duration::from_secs(1),
            max_delay: std::time::Duration::from_secs(60),
            per_call_timeout: std::time::Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    AlreadyExists,
    Processed,
}
