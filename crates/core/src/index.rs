use crate::embeddings::{ImageEmbedder, TextEmbedder};
use crate::error::SearchError;
use crate::models::{AudioChunk, Frame, Modality};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Where an index entry sits on the video timeline.
///
/// Speech entries know their chunk span; frame-derived entries carry the
/// frame instant, widened into a window by the search policy's delta.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum WindowRef {
    Span { start_sec: f64, end_sec: f64 },
    Instant { timestamp_sec: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub unit_id: String,
    pub vector: Vec<f32>,
    pub window: WindowRef,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub unit_id: String,
    pub window: WindowRef,
    pub text: String,
    pub similarity: f64,
}

/// Append-only per-(video, modality) vector index with exact cosine search.
///
/// Per-video corpora are small (tens to hundreds of units), so exhaustive
/// scoring keeps the ranking exact and the top-k prefix stable as k grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModalityIndex {
    pub modality: Modality,
    pub dimensions: usize,
    entries: Vec<IndexEntry>,
}

impl ModalityIndex {
    pub fn new(modality: Modality, dimensions: usize) -> Self {
        Self {
            modality,
            dimensions,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: IndexEntry) -> Result<(), SearchError> {
        if entry.vector.len() != self.dimensions {
            return Err(SearchError::Request(format!(
                "entry dimension {} does not match index dimension {}",
                entry.vector.len(),
                self.dimensions
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Top-k entries by cosine similarity, descending. Ties keep insertion
    /// order so a larger k extends a smaller one without reshuffling.
    pub fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<ScoredEntry>, SearchError> {
        if top_k == 0 {
            return Err(SearchError::Request("top_k must be at least 1".to_string()));
        }
        if query_vector.len() != self.dimensions {
            return Err(SearchError::Request(format!(
                "query vector dimension {} does not match index dimension {}",
                query_vector.len(),
                self.dimensions
            )));
        }

        let mut scored: Vec<(usize, f64)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, cosine_similarity(query_vector, &entry.vector)))
            .collect();

        scored.sort_by(|left, right| {
            right
                .1
                .total_cmp(&left.1)
                .then_with(|| left.0.cmp(&right.0))
        });

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(position, similarity)| {
                let entry = &self.entries[position];
                ScoredEntry {
                    unit_id: entry.unit_id.clone(),
                    window: entry.window,
                    text: entry.text.clone(),
                    similarity,
                }
            })
            .collect())
    }

    pub async fn save(&self, path: &Path) -> Result<(), SearchError> {
        let body = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, body).await?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, SearchError> {
        let body = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Embed chunk transcripts into a speech index. Chunks whose annotation
/// degraded to empty text are skipped, not embedded as zero vectors.
pub async fn build_speech_index(
    chunks: &[AudioChunk],
    embedder: &dyn TextEmbedder,
) -> Result<ModalityIndex, SearchError> {
    let mut index = ModalityIndex::new(Modality::Speech, embedder.dimensions());

    for chunk in chunks {
        let Some(transcript) = chunk.transcript.as_deref().filter(|t| !t.trim().is_empty())
        else {
            debug!(position = chunk.position, "skipping chunk with empty transcript");
            continue;
        };

        let vector = embedder.embed_text(transcript).await?;
        index.push(IndexEntry {
            unit_id: format!("{}:chunk:{}", chunk.video_id, chunk.position),
            vector,
            window: WindowRef::Span {
                start_sec: chunk.start_time_sec,
                end_sec: chunk.end_time_sec,
            },
            text: transcript.to_string(),
        })?;
    }

    Ok(index)
}

/// Embed frame captions into a caption index; empty captions are skipped.
pub async fn build_caption_index(
    frames: &[Frame],
    embedder: &dyn TextEmbedder,
) -> Result<ModalityIndex, SearchError> {
    let mut index = ModalityIndex::new(Modality::Caption, embedder.dimensions());

    for frame in frames {
        let Some(caption) = frame.caption.as_deref().filter(|c| !c.trim().is_empty()) else {
            debug!(position = frame.position, "skipping frame with empty caption");
            continue;
        };

        let vector = embedder.embed_text(caption).await?;
        index.push(IndexEntry {
            unit_id: format!("{}:frame:{}", frame.video_id, frame.position),
            vector,
            window: WindowRef::Instant {
                timestamp_sec: frame.timestamp_msec / 1_000.0,
            },
            text: caption.to_string(),
        })?;
    }

    Ok(index)
}

/// Embed frame pixels into an image index.
pub async fn build_image_index(
    frames: &[Frame],
    embedder: &dyn ImageEmbedder,
) -> Result<ModalityIndex, SearchError> {
    let mut index = ModalityIndex::new(Modality::Image, embedder.dimensions());

    for frame in frames {
        let image = tokio::fs::read(&frame.image_path).await?;
        let vector = embedder.embed_image(&image).await?;
        index.push(IndexEntry {
            unit_id: format!("{}:frame:{}", frame.video_id, frame.position),
            vector,
            window: WindowRef::Instant {
                timestamp_sec: frame.timestamp_msec / 1_000.0,
            },
            text: String::new(),
        })?;
    }

    Ok(index)
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut left_norm = 0.0f64;
    let mut right_norm = 0.0f64;

    for (a, b) in left.iter().zip(right.iter()) {
        dot += (*a as f64) * (*b as f64);
        left_norm += (*a as f64) * (*a as f64);
        right_norm += (*b as f64) * (*b as f64);
    }

    let denominator = left_norm.sqrt() * right_norm.sqrt();
    if denominator == 0.0 {
        0.0
    } else {
        dot / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(unit_id: &str, vector: Vec<f32>, start: f64) -> IndexEntry {
        IndexEntry {
            unit_id: unit_id.to_string(),
            vector,
            window: WindowRef::Span {
                start_sec: start,
                end_sec: start + 10.0,
            },
            text: format!("unit {unit_id}"),
        }
    }

    fn sample_index() -> ModalityIndex {
        let mut index = ModalityIndex::new(Modality::Speech, 3);
        index.push(entry("a", vec![1.0, 0.0, 0.0], 0.0)).unwrap();
        index.push(entry("b", vec![0.9, 0.1, 0.0], 9.0)).unwrap();
        index.push(entry("c", vec![0.0, 1.0, 0.0], 18.0)).unwrap();
        index.push(entry("d", vec![0.0, 0.0, 1.0], 27.0)).unwrap();
        index
    }

    #[test]
    fn search_orders_by_similarity_descending() {
        let index = sample_index();
        let hits = index.search(&[1.0, 0.0, 0.0], 4).unwrap();

        assert_eq!(hits.len(), 4);
        assert_eq!(hits[0].unit_id, "a");
        assert_eq!(hits[1].unit_id, "b");
        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[test]
    fn larger_top_k_extends_the_smaller_prefix() {
        let index = sample_index();
        let smaller = index.search(&[0.7, 0.7, 0.0], 2).unwrap();
        let larger = index.search(&[0.7, 0.7, 0.0], 3).unwrap();

        for (a, b) in smaller.iter().zip(larger.iter()) {
            assert_eq!(a.unit_id, b.unit_id);
        }
    }

    #[test]
    fn zero_top_k_and_dimension_mismatch_are_rejected() {
        let index = sample_index();
        assert!(index.search(&[1.0, 0.0, 0.0], 0).is_err());
        assert!(index.search(&[1.0, 0.0], 2).is_err());

        let mut index = ModalityIndex::new(Modality::Caption, 3);
        assert!(index.push(entry("x", vec![1.0], 0.0)).is_err());
    }

    #[tokio::test]
    async fn speech_builder_skips_units_with_empty_transcripts() {
        use crate::embeddings::NgramTextEmbedder;
        use crate::models::AudioChunk;

        let chunks = vec![
            AudioChunk {
                video_id: "match".to_string(),
                position: 0,
                start_time_sec: 0.0,
                end_time_sec: 10.0,
                audio_path: "/tmp/chunk_0.mp3".to_string(),
                transcript: Some("kickoff in the rain".to_string()),
            },
            AudioChunk {
                video_id: "match".to_string(),
                position: 1,
                start_time_sec: 9.0,
                end_time_sec: 19.0,
                audio_path: "/tmp/chunk_1.mp3".to_string(),
                transcript: Some("".to_string()),
            },
        ];

        let embedder = NgramTextEmbedder { dimensions: 16 };
        let index = build_speech_index(&chunks, &embedder).await.unwrap();

        assert_eq!(index.len(), 1);
        let hits = index
            .search(&embedder.embed("kickoff in the rain"), 1)
            .unwrap();
        assert_eq!(
            hits[0].window,
            WindowRef::Span {
                start_sec: 0.0,
                end_sec: 10.0
            }
        );
    }

    #[tokio::test]
    async fn index_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("speech.index.json");

        let index = sample_index();
        index.save(&path).await.unwrap();

        let loaded = ModalityIndex::load(&path).await.unwrap();
        assert_eq!(loaded.modality, Modality::Speech);
        assert_eq!(loaded.len(), index.len());

        let before = index.search(&[0.5, 0.5, 0.0], 3).unwrap();
        let after = loaded.search(&[0.5, 0.5, 0.0], 3).unwrap();
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.unit_id, b.unit_id);
            assert!((a.similarity - b.similarity).abs() < 1e-12);
        }
    }
}
