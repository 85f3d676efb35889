use crate::error::SearchError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Text embedding collaborator. Any provider with this signature substitutes.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, SearchError>;
}

/// Image embedding collaborator over raw encoded image bytes.
#[async_trait]
pub trait ImageEmbedder: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>, SearchError>;
}

/// Deterministic character-trigram hashing embedder.
///
/// Offline default and test fixture: no provider round-trip, stable output
/// for a given input.
#[derive(Debug, Clone, Copy)]
pub struct NgramTextEmbedder {
    pub dimensions: usize,
}

impl Default for NgramTextEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

fn fnv_bucket(token: &[u8], buckets: usize) -> usize {
    let mut hash = 1469598103934665603u64;
    for byte in token {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash % buckets as u64) as usize
}

fn normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector {
            *value /= magnitude;
        }
    }
}

impl NgramTextEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let bucket = fnv_bucket(token.as_bytes(), vector.len());
            vector[bucket] += 1.0;
        }

        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl TextEmbedder for NgramTextEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        Ok(self.embed(text))
    }
}

/// Byte-trigram analog of [`NgramTextEmbedder`] for image payloads.
#[derive(Debug, Clone, Copy)]
pub struct ByteTrigramImageEmbedder {
    pub dimensions: usize,
}

impl Default for ByteTrigramImageEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl ByteTrigramImageEmbedder {
    pub fn embed(&self, image: &[u8]) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        if image.is_empty() {
            return vector;
        }

        for window in image.windows(3) {
            let bucket = fnv_bucket(window, vector.len());
            vector[bucket] += 1.0;
        }

        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl ImageEmbedder for ByteTrigramImageEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>, SearchError> {
        Ok(self.embed(image))
    }
}

/// OpenAI-style `/embeddings` text provider.
pub struct HttpTextEmbedder {
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
    client: Client,
}

impl HttpTextEmbedder {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        dimensions: usize,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            model: model.into(),
            api_key,
            dimensions,
            client: Client::new(),
        })
    }
}

fn parse_embedding_response(parsed: &Value, backend: &str, dimensions: usize) -> Result<Vec<f32>, SearchError> {
    let vector = parsed
        .pointer("/data/0/embedding")
        .and_then(Value::as_array)
        .ok_or_else(|| SearchError::BackendResponse {
            backend: backend.to_string(),
            details: "response has no data[0].embedding".to_string(),
        })?
        .iter()
        .map(|value| value.as_f64().unwrap_or(0.0) as f32)
        .collect::<Vec<_>>();

    if vector.len() != dimensions {
        return Err(SearchError::BackendResponse {
            backend: backend.to_string(),
            details: format!(
                "embedding dimension {} does not match configured {dimensions}",
                vector.len()
            ),
        });
    }

    Ok(vector)
}

#[async_trait]
impl TextEmbedder for HttpTextEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({ "model": self.model, "input": text }));

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "text-embedder".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        parse_embedding_response(&parsed, "text-embedder", self.dimensions)
    }
}

/// CLIP-style image embedding provider; the image travels base64-encoded.
pub struct HttpImageEmbedder {
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
    client: Client,
}

impl HttpImageEmbedder {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        dimensions: usize,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            model: model.into(),
            api_key,
            dimensions,
            client: Client::new(),
        })
    }
}

#[async_trait]
impl ImageEmbedder for HttpImageEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>, SearchError> {
        let mut request = self.client.post(self.endpoint.clone()).json(&json!({
            "model": self.model,
            "input": STANDARD.encode(image),
        }));

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "image-embedder".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        parse_embedding_response(&parsed, "image-embedder", self.dimensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_embedder_is_deterministic() {
        let embedder = NgramTextEmbedder::default();
        let first = embedder.embed("the referee blows the final whistle");
        let second = embedder.embed("the referee blows the final whistle");
        assert_eq!(first, second);
    }

    #[test]
    fn text_embedder_outputs_unit_vectors_of_expected_length() {
        let embedder = NgramTextEmbedder { dimensions: 32 };
        let vector = embedder.embed("abcdef");
        assert_eq!(vector.len(), 32);

        let magnitude = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let embedder = NgramTextEmbedder { dimensions: 16 };
        assert!(embedder.embed("").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn image_embedder_separates_different_payloads() {
        let embedder = ByteTrigramImageEmbedder::default();
        let first = embedder.embed(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let second = embedder.embed(&[9, 9, 9, 9, 9, 9, 9, 9]);
        assert_ne!(first, second);
    }

    #[test]
    fn embedding_response_parsing_checks_dimensions() {
        let good = serde_json::json!({ "data": [ { "embedding": [0.1, 0.2] } ] });
        assert_eq!(
            parse_embedding_response(&good, "test", 2).unwrap().len(),
            2
        );
        assert!(parse_embedding_response(&good, "test", 3).is_err());

        let missing = serde_json::json!({ "data": [] });
        assert!(parse_embedding_response(&missing, "test", 2).is_err());
    }
}
