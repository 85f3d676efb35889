use crate::error::IngestError;
use crate::models::{AudioChunk, Frame, RetryPolicy};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;

/// Speech-to-text collaborator, invoked once per audio chunk.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, chunk: &AudioChunk) -> Result<String, IngestError>;
}

/// Vision captioning collaborator, invoked once per frame.
#[async_trait]
pub trait Captioner: Send + Sync {
    async fn caption(&self, frame: &Frame, prompt: &str) -> Result<String, IngestError>;
}

fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = policy
        .base_delay
        .saturating_mul(1u32 << attempt.min(16))
        .min(policy.max_delay);
    // Full jitter; uuid v4 doubles as the process's randomness source.
    let fraction = (uuid::Uuid::new_v4().as_u128() % 1_000) as f64 / 1_000.0;
    exp.mul_f64(fraction)
}

/// Run `operation` up to `policy.max_attempts` times with exponential
/// backoff and full jitter. A per-attempt timeout counts as a retryable
/// failure, not a fatal one.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, IngestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, IngestError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(policy, attempt - 1)).await;
        }

        match tokio::time::timeout(policy.per_call_timeout, operation()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => {
                debug!(attempt, %error, "annotation attempt failed");
                last_error = Some(error);
            }
            Err(_) => {
                debug!(attempt, "annotation attempt timed out");
                last_error = Some(IngestError::InvalidArgument(format!(
                    "call exceeded {:?} timeout",
                    policy.per_call_timeout
                )));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        IngestError::InvalidArgument("retry loop ran zero attempts".to_string())
    }))
}

/// Transcribe every chunk with bounded concurrency.
///
/// Exhausted retries degrade the chunk to an empty transcript with a warning;
/// a single failed unit never aborts the whole ingestion.
pub async fn transcribe_chunks(
    transcriber: Arc<dyn Transcriber>,
    chunks: Vec<AudioChunk>,
    policy: RetryPolicy,
    concurrency: usize,
) -> Result<Vec<AudioChunk>, IngestError> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (position, chunk) in chunks.into_iter().enumerate() {
        let transcriber = Arc::clone(&transcriber);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let transcript = retry_with_backoff(&policy, || transcriber.transcribe(&chunk)).await;

            let transcript = match transcript {
                Ok(text) => text,
                Err(error) => {
                    warn!(
                        video_id = %chunk.video_id,
                        position = chunk.position,
                        %error,
                        "transcription exhausted retries; using empty text"
                    );
                    String::new()
                }
            };

            (
                position,
                AudioChunk {
                    transcript: Some(transcript),
                    ..chunk
                },
            )
        });
    }

    collect_in_order(tasks).await
}

/// Caption every frame with bounded concurrency; same degradation policy as
/// [`transcribe_chunks`].
pub async fn caption_frames(
    captioner: Arc<dyn Captioner>,
    frames: Vec<Frame>,
    prompt: String,
    policy: RetryPolicy,
    concurrency: usize,
) -> Result<Vec<Frame>, IngestError> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (position, frame) in frames.into_iter().enumerate() {
        let captioner = Arc::clone(&captioner);
        let semaphore = Arc::clone(&semaphore);
        let prompt = prompt.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let caption = retry_with_backoff(&policy, || captioner.caption(&frame, &prompt)).await;

            let caption = match caption {
                Ok(text) => text,
                Err(error) => {
                    warn!(
                        video_id = %frame.video_id,
                        position = frame.position,
                        %error,
                        "captioning exhausted retries; using empty text"
                    );
                    String::new()
                }
            };

            (
                position,
                Frame {
                    caption: Some(caption),
                    ..frame
                },
            )
        });
    }

    collect_in_order(tasks).await
}

async fn collect_in_order<T: 'static>(mut tasks: JoinSet<(usize, T)>) -> Result<Vec<T>, IngestError> {
    let mut indexed = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        let (position, value) =
            joined.map_err(|error| IngestError::InvalidArgument(error.to_string()))?;
        indexed.push((position, value));
    }
    indexed.sort_by_key(|(position, _)| *position);
    Ok(indexed.into_iter().map(|(_, value)| value).collect())
}

/// Whisper-style transcription endpoint; audio travels base64-encoded JSON.
pub struct HttpTranscriber {
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpTranscriber {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, IngestError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|error| IngestError::InvalidArgument(format!("bad endpoint: {error}")))?;
        Ok(Self {
            endpoint,
            model: model.into(),
            api_key,
            client: Client::new(),
        })
    }
}

fn text_field(parsed: &Value, provider: &str) -> Result<String, IngestError> {
    parsed
        .pointer("/text")
        .and_then(Value::as_str)
        .map(|text| text.trim().to_string())
        .ok_or_else(|| {
            IngestError::InvalidArgument(format!("{provider} response has no text field"))
        })
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, chunk: &AudioChunk) -> Result<String, IngestError> {
        let audio = tokio::fs::read(&chunk.audio_path).await?;

        let mut request = self.client.post(self.endpoint.clone()).json(&json!({
            "model": self.model,
            "audio": STANDARD.encode(audio),
        }));

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(IngestError::InvalidArgument(format!(
                "transcription endpoint returned {}",
                response.status()
            )));
        }

        let parsed: Value = response.json().await?;
        text_field(&parsed, "transcriber")
    }
}

/// Vision-language captioning endpoint; one image and a prompt per call.
pub struct HttpCaptioner {
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpCaptioner {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, IngestError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|error| IngestError::InvalidArgument(format!("bad endpoint: {error}")))?;
        Ok(Self {
            endpoint,
            model: model.into(),
            api_key,
            client: Client::new(),
        })
    }
}

#[async_trait]
impl Captioner for HttpCaptioner {
    async fn caption(&self, frame: &Frame, prompt: &str) -> Result<String, IngestError> {
        let image = tokio::fs::read(&frame.image_path).await?;

        let mut request = self.client.post(self.endpoint.clone()).json(&json!({
            "model": self.model,
            "prompt": prompt,
            "image": STANDARD.encode(image),
        }));

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(IngestError::InvalidArgument(format!(
                "caption endpoint returned {}",
                response.status()
            )));
        }

        let parsed: Value = response.json().await?;
        text_field(&parsed, "captioner")
    }
}
