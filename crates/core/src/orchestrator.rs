use crate::annotators::{Captioner, Transcriber};
use crate::clip::extract_clip;
use crate::embeddings::{ImageEmbedder, TextEmbedder};
use crate::error::{IngestError, SearchError};
use crate::ingest::{derive_video_id, ingest_video};
use crate::models::{
    Clip, IngestStatus, IngestionOptions, RegistryEntry, RetryPolicy, SelectionPolicy, VideoAsset,
};
use crate::registry::{RegisterOutcome, Registry};
use crate::search::SearchEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub cache_root: PathBuf,
    pub clips_dir: PathBuf,
    pub options: IngestionOptions,
    pub retry: RetryPolicy,
    pub policy: SelectionPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("video_cache"),
            clips_dir: PathBuf::from("shared_media"),
            options: IngestionOptions::default(),
            retry: RetryPolicy::default(),
            policy: SelectionPolicy::default(),
        }
    }
}

/// Entry points over the whole system: ingest a video once, then answer
/// text, image, and question queries against its indices.
pub struct VideoSearchService<R>
where
    R: Registry,
{
    registry: R,
    transcriber: Arc<dyn Transcriber>,
    captioner: Arc<dyn Captioner>,
    text_embedder: Arc<dyn TextEmbedder>,
    image_embedder: Arc<dyn ImageEmbedder>,
    config: ServiceConfig,
}

impl<R> VideoSearchService<R>
where
    R: Registry,
{
    pub fn new(
        registry: R,
        transcriber: Arc<dyn Transcriber>,
        captioner: Arc<dyn Captioner>,
        text_embedder: Arc<dyn TextEmbedder>,
        image_embedder: Arc<dyn ImageEmbedder>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            registry,
            transcriber,
            captioner,
            text_embedder,
            image_embedder,
            config,
        }
    }

    /// Ingest a video. A video id that is already registered is the
    /// idempotent outcome, recognized before any stage runs and rebuilding
    /// nothing.
    pub async fn add_video(&self, video_path: &Path) -> Result<IngestStatus, IngestError> {
        let video_id = derive_video_id(video_path)?;

        if self
            .registry
            .exists(&video_id)
            .map_err(|error| IngestError::Registry(error.to_string()))?
        {
            info!(video_id, "video already indexed; skipping ingestion");
            return Ok(IngestStatus::AlreadyExists);
        }

        let entry = ingest_video(
            video_path,
            &self.config.cache_root,
            &self.config.options,
            self.config.retry,
            Arc::clone(&self.transcriber),
            Arc::clone(&self.captioner),
            self.text_embedder.as_ref(),
            self.image_embedder.as_ref(),
        )
        .await?;

        match self
            .registry
            .register(entry)
            .map_err(|error| IngestError::Registry(error.to_string()))?
        {
            RegisterOutcome::Created => Ok(IngestStatus::Processed),
            // A concurrent ingestion won the race; same idempotent outcome.
            RegisterOutcome::AlreadyExists => Ok(IngestStatus::AlreadyExists),
        }
    }

    async fn engine(&self, video_id: &str) -> Result<SearchEngine, SearchError> {
        SearchEngine::open(
            &self.registry,
            video_id,
            self.config.policy.clone(),
            Arc::clone(&self.text_embedder),
            Arc::clone(&self.image_embedder),
        )
        .await
    }

    async fn load_asset(&self, entry: &RegistryEntry) -> Result<VideoAsset, SearchError> {
        let body = tokio::fs::read(&entry.video_table).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn clip_output_path(&self) -> PathBuf {
        self.config.clips_dir.join(format!("{}.mp4", Uuid::new_v4()))
    }

    async fn materialize(
        &self,
        source_path: &str,
        hits: &[crate::models::SearchHit],
    ) -> Result<Vec<Clip>, SearchError> {
        let mut clips = Vec::with_capacity(hits.len());
        for hit in hits {
            let clip = extract_clip(
                Path::new(source_path),
                hit.start_time,
                hit.end_time,
                &self.clip_output_path(),
            )
            .await?;
            clips.push(clip);
        }
        Ok(clips)
    }

    /// Find the best windows for a text query across speech and caption
    /// similarity, and cut each into a standalone clip.
    pub async fn query_by_text(
        &self,
        video_id: &str,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<Clip>, SearchError> {
        let engine = self.engine(video_id).await?;
        let (modality, hits) = engine.best_windows(text, top_k).await?;
        info!(video_id, %modality, hits = hits.len(), "text query selected modality");

        let entry = self.registry.resolve(video_id)?;
        let asset = self.load_asset(&entry).await?;
        self.materialize(&asset.source_path, &hits).await
    }

    /// Find the frames most similar to a query image and cut their windows
    /// into clips. Never mixed into text-similarity ranking.
    pub async fn query_by_image(
        &self,
        video_id: &str,
        image: &[u8],
        top_k: usize,
    ) -> Result<Vec<Clip>, SearchError> {
        let engine = self.engine(video_id).await?;
        let hits = engine.search_by_image(image, top_k).await?;

        let entry = self.registry.resolve(video_id)?;
        let asset = self.load_asset(&entry).await?;
        self.materialize(&asset.source_path, &hits).await
    }

    /// Answer a question from the video's captions alone; returns text,
    /// never a clip.
    pub async fn ask(
        &self,
        video_id: &str,
        question: &str,
        top_k: usize,
    ) -> Result<String, SearchError> {
        let engine = self.engine(video_id).await?;
        let captions = engine.caption_info(question, top_k).await?;

        Ok(captions
            .into_iter()
            .map(|hit| hit.text)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    pub fn list(&self) -> Result<Vec<String>, SearchError> {
        self.registry.list()
    }
}
