//! CosyVoice CLI - speak text through a streaming synthesis server

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cosyvoice_core::{PlaybackStatus, SpeechPipeline, StreamConfig, SynthesisRequest, SyntheticOutput};

#[derive(Debug, Parser)]
#[command(name = "cosyvoice")]
#[command(version, about = "Speak text through a streaming CosyVoice server")]
struct Cli {
    #[command(flatten)]
    options: GlobalOptions,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalOptions {
    /// TOML configuration file (defaults to the per-user config)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Synthesis endpoint URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Speaker key sent with each utterance
    #[arg(short, long, global = true)]
    speaker: Option<String>,

    /// Discard audio instead of opening the output device
    #[arg(long, global = true)]
    null_output: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Speak one utterance
    Say {
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Speak each line read from stdin
    Listen,
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cosyvoice=info,cosyvoice_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.options)?;

    if let Command::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let pipeline = build_pipeline(config, cli.options.null_output)?;
    spawn_status_watcher(&pipeline);

    let speaker = &pipeline;
    let run = async move {
        match cli.command {
            Command::Say { text } => say(speaker, &text.join(" ")).await,
            Command::Listen => listen(speaker).await,
            Command::Config => Ok(()),
        }
    };

    // Dropping the run future abandons the request; shutdown silences the device
    let result = tokio::select! {
        result = run => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping playback");
            Ok(())
        }
    };

    pipeline.shutdown();
    result
}

fn load_config(options: &GlobalOptions) -> anyhow::Result<StreamConfig> {
    let mut config = StreamConfig::load(options.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(endpoint) = &options.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(speaker) = &options.speaker {
        config.speaker = speaker.clone();
    }
    config.validate()?;
    Ok(config)
}

fn build_pipeline(config: StreamConfig, null_output: bool) -> anyhow::Result<SpeechPipeline> {
    if null_output {
        info!("Audio output disabled, frames are discarded");
        return Ok(SpeechPipeline::new(config, SyntheticOutput::new())?);
    }

    #[cfg(feature = "audio-io")]
    {
        Ok(SpeechPipeline::with_default_device(config)?)
    }
    #[cfg(not(feature = "audio-io"))]
    {
        anyhow::bail!("built without audio output; rerun with --null-output")
    }
}

async fn say(pipeline: &SpeechPipeline, text: &str) -> anyhow::Result<()> {
    let request = SynthesisRequest::from_config(text, pipeline.config())?;
    match pipeline.speak_request(request).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!("{}", e.user_message());
            Err(e.into())
        }
    }
}

async fn listen(pipeline: &SpeechPipeline) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Reading utterances from stdin, one per line");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match pipeline.speak(line).await {
            Ok(()) => {}
            // Keep going; the next line gets a fresh request
            Err(e) => warn!("{}", e.user_message()),
        }
    }
    Ok(())
}

fn spawn_status_watcher(pipeline: &SpeechPipeline) {
    let mut rx = pipeline.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let status = rx.borrow_and_update().clone();
            match status {
                PlaybackStatus::Error(ref e) => debug!("Status: error ({})", e),
                _ => debug!("Status: {}", status),
            }
            eprintln!("[{}]", status);
        }
    });
}
