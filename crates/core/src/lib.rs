pub mod annotators;
pub mod clip;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod search;
pub mod segmenter;

pub use annotators::{
    caption_frames, retry_with_backoff, transcribe_chunks, Captioner, HttpCaptioner,
    HttpTranscriber, Transcriber,
};
pub use clip::extract_clip;
pub use embeddings::{
    ByteTrigramImageEmbedder, HttpImageEmbedder, HttpTextEmbedder, ImageEmbedder,
    NgramTextEmbedder, TextEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{ExtractError, IngestError, SearchError};
pub use index::{
    build_caption_index, build_image_index, build_speech_index, IndexEntry, ModalityIndex,
    ScoredEntry, WindowRef,
};
pub use ingest::{derive_video_id, index_path, ingest_video};
pub use models::{
    AudioChunk, Clip, Frame, FrameSampling, IngestStatus, IngestionOptions, Modality,
    RegistryEntry, RetryPolicy, SearchHit, SelectionPolicy, TextHit, VideoAsset,
};
pub use orchestrator::{ServiceConfig, VideoSearchService};
pub use registry::{RegisterOutcome, Registry, SnapshotRegistry};
pub use search::SearchEngine;
pub use segmenter::{plan_chunks, plan_frame_timestamps, probe_duration, sample_frames, segment};
