use anyhow::{Context, Result};
use clap::Parser;
use genai_relay::ai::mime::{detect_media_mime, mime_from_path};
use genai_relay::{
    Config, GenerationClient, GenerationConfig, MediaReference, RequestOptions, RetryConfig,
};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "genai-relay")]
#[command(about = "Send a prompt through the resilient generation client")]
struct CliArgs {
    /// Model to try first; the configured chain follows it.
    #[arg(long)]
    model: Option<String>,

    /// Media file to attach.
    #[arg(long, value_name = "PATH")]
    media: Option<PathBuf>,

    /// MIME type of the media; sniffed from the file when omitted.
    #[arg(long, value_name = "TYPE", requires = "media")]
    mime: Option<String>,

    /// Ask for a JSON response and pretty-print it.
    #[arg(long)]
    json: bool,

    /// Prefer the direct transport over the proxy.
    #[arg(long)]
    prefer_direct: bool,

    /// Retries per model after the first attempt.
    #[arg(long, value_name = "N")]
    max_retries: Option<u32>,

    prompt: String,
}

async fn media_reference(path: &Path, mime: Option<String>) -> Result<MediaReference> {
    let mime_type = match mime.or_else(|| mime_from_path(path).map(str::to_string)) {
        Some(mime_type) => mime_type,
        None => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            detect_media_mime(&bytes).to_string()
        }
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media".to_string());

    Ok(MediaReference::LocalFile {
        path: path.to_path_buf(),
        mime_type,
        file_name,
    })
}

fn generation_config(json: bool) -> GenerationConfig {
    if json {
        GenerationConfig {
            response_mime_type: Some("application/json".to_string()),
            ..GenerationConfig::default()
        }
    } else {
        GenerationConfig::default()
    }
}

async fn run(args: CliArgs) -> Result<()> {
    let config = Config::from_env()?;
    let client = GenerationClient::from_config(&config)?;

    let mut options = RequestOptions::default();
    if let Some(model) = args.model {
        options = options.with_model(model);
    }
    if let Some(path) = &args.media {
        options = options.with_media(media_reference(path, args.mime).await?);
    }
    if args.prefer_direct {
        options = options.prefer_direct();
    }

    let mut retry = RetryConfig::default();
    if let Some(max_retries) = args.max_retries {
        retry = retry.with_max_retries(max_retries);
    }

    if args.json {
        let value: serde_json::Value = client
            .generate_json(args.prompt, generation_config(true), options, &retry)
            .await?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let output = client
            .generate(args.prompt, generation_config(false), options, &retry)
            .await?;
        info!(
            "Answered by {} after {} attempt(s), media: {:?}",
            output.model, output.attempts, output.media
        );
        println!("{}", output.text);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genai_relay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();

    if let Err(e) = run(args).await {
        error!("Generation failed: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
