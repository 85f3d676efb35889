use chrono::Utc;
use clap::{Parser, Subcommand};
use clip_search_core::{
    ByteTrigramImageEmbedder, Captioner, HttpCaptioner, HttpImageEmbedder, HttpTextEmbedder,
    HttpTranscriber, ImageEmbedder, IngestStatus, NgramTextEmbedder, ServiceConfig, SnapshotRegistry,
    TextEmbedder, Transcriber, VideoSearchService, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "clip-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding registry snapshot files
    #[arg(long, default_value = "registry")]
    registry_dir: PathBuf,

    /// Root directory for per-video cache namespaces
    #[arg(long, default_value = "video_cache")]
    cache_root: PathBuf,

    /// Directory where extracted clips are written
    #[arg(long, default_value = "shared_media")]
    clips_dir: PathBuf,

    /// Speech-to-text endpoint
    #[arg(long, default_value = "http://localhost:8801/v1/transcriptions")]
    transcribe_endpoint: String,

    /// Transcription model name
    #[arg(long, default_value = "whisper-1")]
    transcribe_model: String,

    /// Vision captioning endpoint
    #[arg(long, default_value = "http://localhost:8802/v1/captions")]
    caption_endpoint: String,

    /// Captioning model name
    #[arg(long, default_value = "gpt-4o-mini")]
    caption_model: String,

    /// Text embedding endpoint; deterministic local embeddings when omitted
    #[arg(long)]
    text_embed_endpoint: Option<String>,

    /// Text embedding model name
    #[arg(long, default_value = "text-embedding-3-small")]
    text_embed_model: String,

    /// Image embedding endpoint; deterministic local embeddings when omitted
    #[arg(long)]
    image_embed_endpoint: Option<String>,

    /// Image embedding model name
    #[arg(long, default_value = "clip-vit-base-patch32")]
    image_embed_model: String,

    /// Embedding dimensions (must match the provider's output)
    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embed_dimensions: usize,

    /// Bearer token for provider endpoints
    #[arg(long, env = "CLIP_SEARCH_API_KEY")]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Segment, annotate, and index a video so it becomes searchable.
    Ingest {
        /// Path to the video file.
        #[arg(long)]
        video: PathBuf,
    },
    /// Retrieve the best-matching clips for a text query.
    Query {
        /// Registered video id (file stem).
        #[arg(long)]
        video_id: String,
        /// Search query.
        #[arg(long)]
        query: String,
        /// Number of clips to extract.
        #[arg(long, default_value = "1")]
        top_k: usize,
    },
    /// Retrieve clips whose frames match a query image.
    QueryImage {
        /// Registered video id (file stem).
        #[arg(long)]
        video_id: String,
        /// Path to the query image.
        #[arg(long)]
        image: PathBuf,
        /// Number of clips to extract.
        #[arg(long, default_value = "1")]
        top_k: usize,
    },
    /// Answer a question from the video's captions; text only, no clip.
    Ask {
        /// Registered video id (file stem).
        #[arg(long)]
        video_id: String,
        /// The question to answer.
        #[arg(long)]
        question: String,
        /// Number of captions to draw from.
        #[arg(long, default_value = "3")]
        top_k: usize,
    },
    /// List every registered video id.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let transcriber: Arc<dyn Transcriber> = Arc::new(HttpTranscriber::new(
        &cli.transcribe_endpoint,
        &cli.transcribe_model,
        cli.api_key.clone(),
    )?);
    let captioner: Arc<dyn Captioner> = Arc::new(HttpCaptioner::new(
        &cli.caption_endpoint,
        &cli.caption_model,
        cli.api_key.clone(),
    )?);

    let text_embedder: Arc<dyn TextEmbedder> = match &cli.text_embed_endpoint {
        Some(endpoint) => Arc::new(HttpTextEmbedder::new(
            endpoint,
            &cli.text_embed_model,
            cli.api_key.clone(),
            cli.embed_dimensions,
        )?),
        None => Arc::new(NgramTextEmbedder {
            dimensions: cli.embed_dimensions,
        }),
    };
    let image_embedder: Arc<dyn ImageEmbedder> = match &cli.image_embed_endpoint {
        Some(endpoint) => Arc::new(HttpImageEmbedder::new(
            endpoint,
            &cli.image_embed_model,
            cli.api_key.clone(),
            cli.embed_dimensions,
        )?),
        None => Arc::new(ByteTrigramImageEmbedder {
            dimensions: cli.embed_dimensions,
        }),
    };

    let registry = SnapshotRegistry::new(&cli.registry_dir);
    let service = VideoSearchService::new(
        registry,
        transcriber,
        captioner,
        text_embedder,
        image_embedder,
        ServiceConfig {
            cache_root: cli.cache_root.clone(),
            clips_dir: cli.clips_dir.clone(),
            ..ServiceConfig::default()
        },
    );

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "clip-search boot"
    );

    match cli.command {
        Command::Ingest { video } => {
            match service.add_video(&video).await? {
                IngestStatus::AlreadyExists => {
                    println!("already exists: {}", video.display());
                }
                IngestStatus::Processed => {
                    println!("processed: {}", video.display());
                }
            }
        }
        Command::Query {
            video_id,
            query,
            top_k,
        } => {
            let clips = service.query_by_text(&video_id, &query, top_k).await?;
            for clip in clips {
                println!(
                    "[{:.2}s - {:.2}s] {}",
                    clip.start_time,
                    clip.end_time,
                    clip.output_path.display()
                );
            }
        }
        Command::QueryImage {
            video_id,
            image,
            top_k,
        } => {
            let image_bytes = tokio::fs::read(&image).await?;
            let clips = service
                .query_by_image(&video_id, &image_bytes, top_k)
                .await?;
            for clip in clips {
                println!(
                    "[{:.2}s - {:.2}s] {}",
                    clip.start_time,
                    clip.end_time,
                    clip.output_path.display()
                );
            }
        }
        Command::Ask {
            video_id,
            question,
            top_k,
        } => {
            let answer = service.ask(&video_id, &question, top_k).await?;
            println!("{answer}");
        }
        Command::List => {
            for video_id in service.list()? {
                println!("{video_id}");
            }
        }
    }

    Ok(())
}
