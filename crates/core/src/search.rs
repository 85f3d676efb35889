use crate::embeddings::{ImageEmbedder, TextEmbedder};
use crate::error::SearchError;
use crate::index::{ModalityIndex, ScoredEntry, WindowRef};
use crate::ingest::index_path;
use crate::models::{Modality, SearchHit, SelectionPolicy, TextHit};
use crate::registry::Registry;
use std::sync::Arc;

/// Per-video similarity search across the three modality indices.
///
/// Speech hits return the matched chunk's own span; image and caption hits
/// widen the frame instant by the policy delta. Image similarity is never
/// ranked against text similarity: the embedding spaces are not comparable.
pub struct SearchEngine {
    video_id: String,
    speech: ModalityIndex,
    image: ModalityIndex,
    caption: ModalityIndex,
    policy: SelectionPolicy,
    text_embedder: Arc<dyn TextEmbedder>,
    image_embedder: Arc<dyn ImageEmbedder>,
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("video_id", &self.video_id)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SearchEngine {
    /// Load the indices registered for `video_id`. An unknown id is
    /// `RegistryNotFound`, never an empty engine.
    pub async fn open(
        registry: &dyn Registry,
        video_id: &str,
        policy: SelectionPolicy,
        text_embedder: Arc<dyn TextEmbedder>,
        image_embedder: Arc<dyn ImageEmbedder>,
    ) -> Result<Self, SearchError> {
        let entry = registry.resolve(video_id)?;

        let speech = ModalityIndex::load(&index_path(&entry, Modality::Speech)).await?;
        let image = ModalityIndex::load(&index_path(&entry, Modality::Image)).await?;
        let caption = ModalityIndex::load(&index_path(&entry, Modality::Caption)).await?;

        Ok(Self {
            video_id: video_id.to_string(),
            speech,
            image,
            caption,
            policy,
            text_embedder,
            image_embedder,
        })
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    fn to_hit(&self, entry: &ScoredEntry) -> SearchHit {
        match entry.window {
            WindowRef::Span { start_sec, end_sec } => SearchHit {
                start_time: start_sec,
                end_time: end_sec,
                similarity: entry.similarity,
            },
            WindowRef::Instant { timestamp_sec } => SearchHit {
                start_time: (timestamp_sec - self.policy.delta_seconds).max(0.0),
                end_time: timestamp_sec + self.policy.delta_seconds,
                similarity: entry.similarity,
            },
        }
    }

    pub async fn search_by_speech(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let vector = self.text_embedder.embed_text(query).await?;
        let entries = self.speech.search(&vector, top_k)?;
        Ok(entries.iter().map(|entry| self.to_hit(entry)).collect())
    }

    pub async fn search_by_caption(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let vector = self.text_embedder.embed_text(query).await?;
        let entries = self.caption.search(&vector, top_k)?;
        Ok(entries.iter().map(|entry| self.to_hit(entry)).collect())
    }

    pub async fn search_by_image(
        &self,
        image: &[u8],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let vector = self.image_embedder.embed_image(image).await?;
        let entries = self.image.search(&vector, top_k)?;
        Ok(entries.iter().map(|entry| self.to_hit(entry)).collect())
    }

    pub async fn speech_info(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<TextHit>, SearchError> {
        let vector = self.text_embedder.embed_text(query).await?;
        Ok(self
            .speech
            .search(&vector, top_k)?
            .into_iter()
            .map(|entry| TextHit {
                text: entry.text,
                similarity: entry.similarity,
            })
            .collect())
    }

    pub async fn caption_info(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<TextHit>, SearchError> {
        let vector = self.text_embedder.embed_text(query).await?;
        Ok(self
            .caption
            .search(&vector, top_k)?
            .into_iter()
            .map(|entry| TextHit {
                text: entry.text,
                similarity: entry.similarity,
            })
            .collect())
    }

    /// Run the text-comparable modalities independently and keep the one
    /// whose top hit scored higher. An exact tie goes to the modality listed
    /// earlier in the policy priority.
    pub async fn best_windows(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<(Modality, Vec<SearchHit>), SearchError> {
        let vector = self.text_embedder.embed_text(query).await?;

        let mut winner: Option<(Modality, Vec<SearchHit>)> = None;
        for &modality in &self.policy.priority {
            let index = match modality {
                Modality::Speech => &self.speech,
                Modality::Caption => &self.caption,
                Modality::Image => {
                    return Err(SearchError::Request(
                        "image modality cannot participate in text selection".to_string(),
                    ))
                }
            };

            if index.is_empty() {
                continue;
            }

            let hits: Vec<SearchHit> = index
                .search(&vector, top_k)?
                .iter()
                .map(|entry| self.to_hit(entry))
                .collect();

            let top = hits[0].similarity;
            // Strictly-greater keeps ties with the earlier-priority modality.
            let replace = match &winner {
                None => true,
                Some((_, best)) => top > best[0].similarity,
            };
            if replace {
                winner = Some((modality, hits));
            }
        }

        winner.ok_or_else(|| {
            SearchError::Request(format!(
                "video '{}' has no indexed speech or caption content",
                self.video_id
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{ByteTrigramImageEmbedder, NgramTextEmbedder};
    use crate::index::IndexEntry;
    use crate::models::RegistryEntry;
    use crate::registry::{Registry, SnapshotRegistry};
    use tempfile::TempDir;

    const DIMS: usize = 32;

    fn text_entry(unit_id: &str, text: &str, window: WindowRef) -> IndexEntry {
        IndexEntry {
            unit_id: unit_id.to_string(),
            vector: NgramTextEmbedder { dimensions: DIMS }.embed(text),
            window,
            text: text.to_string(),
        }
    }

    async fn seeded_registry(
        speech: Vec<IndexEntry>,
        caption: Vec<IndexEntry>,
        image: Vec<IndexEntry>,
    ) -> (TempDir, SnapshotRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache_test");
        std::fs::create_dir_all(&cache_dir).unwrap();

        for (modality, entries) in [
            (Modality::Speech, speech),
            (Modality::Caption, caption),
            (Modality::Image, image),
        ] {
            let mut index = ModalityIndex::new(modality, DIMS);
            for entry in entries {
                index.push(entry).unwrap();
            }
            index
                .save(&cache_dir.join(modality.index_file_name()))
                .await
                .unwrap();
        }

        let registry = SnapshotRegistry::new(dir.path().join("registry"));
        registry
            .register(RegistryEntry {
                video_name: "match".to_string(),
                video_cache: cache_dir.to_string_lossy().to_string(),
                video_table: cache_dir.join("video.json").to_string_lossy().to_string(),
                frames_view: cache_dir.join("frames.json").to_string_lossy().to_string(),
                audio_chunks_view: cache_dir
                    .join("audio_chunks.json")
                    .to_string_lossy()
                    .to_string(),
            })
            .unwrap();

        (dir, registry)
    }

    async fn open(registry: &SnapshotRegistry, video_id: &str) -> Result<SearchEngine, SearchError> {
        SearchEngine::open(
            registry,
            video_id,
            SelectionPolicy::default(),
            Arc::new(NgramTextEmbedder { dimensions: DIMS }),
            Arc::new(ByteTrigramImageEmbedder { dimensions: DIMS }),
        )
        .await
    }

    fn span(start: f64) -> WindowRef {
        WindowRef::Span {
            start_sec: start,
            end_sec: start + 10.0,
        }
    }

    #[tokio::test]
    async fn unknown_video_id_is_registry_not_found_not_empty() {
        let (_dir, registry) = seeded_registry(vec![], vec![], vec![]).await;
        let error = open(&registry, "ghost").await.unwrap_err();
        assert!(matches!(error, SearchError::RegistryNotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn speech_hits_use_the_chunk_span() {
        let (_dir, registry) = seeded_registry(
            vec![
                text_entry("c0", "players warming up on the pitch", span(0.0)),
                text_entry("c1", "the referee blows the final whistle", span(279.0)),
            ],
            vec![],
            vec![],
        )
        .await;

        let engine = open(&registry, "match").await.unwrap();
        let hits = engine
            .search_by_speech("final whistle", 2)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].start_time, 279.0);
        assert_eq!(hits[0].end_time, 289.0);
        assert!(hits[0].similarity >= hits[1].similarity);
    }

    #[tokio::test]
    async fn caption_hits_widen_the_frame_instant_and_clamp_at_zero() {
        let (_dir, registry) = seeded_registry(
            vec![],
            vec![
                text_entry(
                    "f0",
                    "a crowd cheering in the stands",
                    WindowRef::Instant { timestamp_sec: 2.0 },
                ),
                text_entry(
                    "f1",
                    "a goalkeeper diving for the ball",
                    WindowRef::Instant {
                        timestamp_sec: 120.0,
                    },
                ),
            ],
            vec![],
        )
        .await;

        let engine = open(&registry, "match").await.unwrap();
        let hits = engine
            .search_by_caption("goalkeeper diving", 1)
            .await
            .unwrap();
        assert_eq!(hits[0].start_time, 115.0);
        assert_eq!(hits[0].end_time, 125.0);

        let hits = engine.search_by_caption("crowd cheering", 1).await.unwrap();
        assert_eq!(hits[0].start_time, 0.0);
        assert_eq!(hits[0].end_time, 7.0);
    }

    #[tokio::test]
    async fn selection_prefers_the_higher_scoring_modality() {
        let (_dir, registry) = seeded_registry(
            vec![text_entry("c0", "discussion about tactics", span(30.0))],
            vec![text_entry(
                "f0",
                "a player scoring a goal with a header",
                WindowRef::Instant {
                    timestamp_sec: 200.0,
                },
            )],
            vec![],
        )
        .await;

        let engine = open(&registry, "match").await.unwrap();
        let (modality, hits) = engine
            .best_windows("player scoring a goal", 1)
            .await
            .unwrap();

        assert_eq!(modality, Modality::Caption);
        assert_eq!(hits[0].start_time, 195.0);
    }

    #[tokio::test]
    async fn exact_tie_selects_speech() {
        // Identical text in both indices produces identical similarity.
        let (_dir, registry) = seeded_registry(
            vec![text_entry("c0", "the final whistle blows", span(280.0))],
            vec![text_entry(
                "f0",
                "the final whistle blows",
                WindowRef::Instant {
                    timestamp_sec: 150.0,
                },
            )],
            vec![],
        )
        .await;

        let engine = open(&registry, "match").await.unwrap();
        let (modality, hits) = engine
            .best_windows("the final whistle blows", 1)
            .await
            .unwrap();

        assert_eq!(modality, Modality::Speech);
        assert_eq!(hits[0].start_time, 280.0);
        assert_eq!(hits[0].end_time, 290.0);
    }

    #[tokio::test]
    async fn selection_falls_through_to_caption_when_speech_is_empty() {
        let (_dir, registry) = seeded_registry(
            vec![],
            vec![text_entry(
                "f0",
                "sunset over the stadium",
                WindowRef::Instant {
                    timestamp_sec: 60.0,
                },
            )],
            vec![],
        )
        .await;

        let engine = open(&registry, "match").await.unwrap();
        let (modality, _) = engine.best_windows("sunset", 1).await.unwrap();
        assert_eq!(modality, Modality::Caption);

        let (_dir, registry) = seeded_registry(vec![], vec![], vec![]).await;
        let engine = open(&registry, "match").await.unwrap();
        assert!(engine.best_windows("anything", 1).await.is_err());
    }

    #[tokio::test]
    async fn image_search_ranks_frames_by_pixel_similarity() {
        let image_embedder = ByteTrigramImageEmbedder { dimensions: DIMS };
        let target: Vec<u8> = (0u8..64).collect();
        let other: Vec<u8> = vec![255u8; 64];

        let (_dir, registry) = seeded_registry(
            vec![],
            vec![],
            vec![
                IndexEntry {
                    unit_id: "f0".to_string(),
                    vector: image_embedder.embed(&target),
                    window: WindowRef::Instant { timestamp_sec: 42.0 },
                    text: String::new(),
                },
                IndexEntry {
                    unit_id: "f1".to_string(),
                    vector: image_embedder.embed(&other),
                    window: WindowRef::Instant { timestamp_sec: 90.0 },
                    text: String::new(),
                },
            ],
        )
        .await;

        let engine = open(&registry, "match").await.unwrap();
        let hits = engine.search_by_image(&target, 2).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].start_time, 37.0);
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[tokio::test]
    async fn info_paths_return_annotated_text() {
        let (_dir, registry) = seeded_registry(
            vec![text_entry("c0", "halftime analysis begins", span(0.0))],
            vec![text_entry(
                "f0",
                "analysts at the studio desk",
                WindowRef::Instant { timestamp_sec: 5.0 },
            )],
            vec![],
        )
        .await;

        let engine = open(&registry, "match").await.unwrap();
        let speech = engine.speech_info("halftime analysis", 1).await.unwrap();
        assert_eq!(speech[0].text, "halftime analysis begins");

        let captions = engine.caption_info("studio desk", 1).await.unwrap();
        assert_eq!(captions[0].text, "analysts at the studio desk");
    }
}
