//! CLI interface for voice-relay

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::info_span;

use crate::adapter::{Adapter, AdapterContext};
use crate::config::Config;
use crate::fallback::FallbackAdapter;
use crate::stream::{event_channel, from_chunks, input_channel, AdapterEvent, InputSender};

#[derive(Parser)]
#[command(name = "voice-relay")]
#[command(about = "Stream speech through a fallback chain of TTS/STT providers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read text from stdin and write synthesized raw audio
    Speak {
        /// Provider configuration file
        #[arg(short, long, env = "VOICE_RELAY_CONFIG")]
        config: PathBuf,
        /// Write audio here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Stream a raw PCM file and print transcripts
    Transcribe {
        /// Provider configuration file
        #[arg(short, long, env = "VOICE_RELAY_CONFIG")]
        config: PathBuf,
        /// Raw 16-bit PCM audio
        #[arg(short, long)]
        input: PathBuf,
        /// Bytes per streamed chunk
        #[arg(long, default_value = "3200")]
        chunk_bytes: usize,
    },
    /// List the configured provider chains
    Providers {
        /// Provider configuration file
        #[arg(short, long, env = "VOICE_RELAY_CONFIG")]
        config: PathBuf,
    },
}

/// Run the CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Speak { config, output } => speak(&config, output.as_deref()).await,
        Commands::Transcribe {
            config,
            input,
            chunk_bytes,
        } => transcribe(&config, &input, chunk_bytes).await,
        Commands::Providers { config } => providers(&config),
    }
}

async fn speak(config_path: &Path, output: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let factories = config.tts_factories()?;

    let (sink, mut events) = event_channel();
    let mut relay = FallbackAdapter::new(
        factories,
        config.tts.fallback_options(),
        AdapterContext::new(sink, info_span!("tts")),
    )
    .context("No TTS providers configured")?;

    let (sender, input) = input_channel();
    relay.start(input);
    tokio::spawn(forward_stdin(sender));

    let mut writer: Box<dyn AsyncWrite + Unpin + Send> = match output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let mut written = 0usize;
    while let Some(event) = events.recv().await {
        match event {
            AdapterEvent::Output(audio) => {
                writer.write_all(&audio).await.context("Failed to write audio")?;
                written += audio.len();
            }
            AdapterEvent::Finished => break,
            AdapterEvent::Failed(unconsumed) => {
                relay.destroy();
                bail!(
                    "Every TTS provider failed ({} unsent chunks)",
                    unconsumed.chunks.len()
                );
            }
        }
    }

    writer.flush().await.context("Failed to flush audio")?;
    relay.destroy();
    eprintln!("Wrote {} bytes of audio", written);
    Ok(())
}

/// Push stdin lines into the input stream until EOF
async fn forward_stdin(sender: InputSender<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !sender.push(line + "\n") {
                    return;
                }
            }
            Ok(None) => {
                sender.end();
                return;
            }
            Err(e) => {
                sender.fail(e.into());
                return;
            }
        }
    }
}

async fn transcribe(config_path: &Path, input: &Path, chunk_bytes: usize) -> Result<()> {
    if chunk_bytes == 0 {
        bail!("--chunk-bytes must be positive");
    }
    let config = Config::load(config_path)?;
    let factories = config.stt_factories()?;

    let audio = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let chunks: Vec<Vec<u8>> = audio.chunks(chunk_bytes).map(<[u8]>::to_vec).collect();

    let (sink, mut events) = event_channel();
    let mut relay = FallbackAdapter::new(
        factories,
        config.stt.fallback_options(),
        AdapterContext::new(sink, info_span!("stt")),
    )
    .context("No STT providers configured")?;
    relay.start(from_chunks(chunks));

    while let Some(event) = events.recv().await {
        match event {
            AdapterEvent::Output(transcript) => println!("{}", transcript),
            AdapterEvent::Finished => break,
            AdapterEvent::Failed(unconsumed) => {
                relay.destroy();
                bail!(
                    "Every STT provider failed ({} unacknowledged chunks)",
                    unconsumed.chunks.len()
                );
            }
        }
    }

    relay.destroy();
    Ok(())
}

fn providers(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;

    println!("TTS chain:");
    print_chain(
        config.tts.max_rounds,
        config.tts.providers.iter().map(|p| p.name()),
    );
    println!("STT chain:");
    print_chain(
        config.stt.max_rounds,
        config.stt.providers.iter().map(|p| p.name()),
    );
    Ok(())
}

fn print_chain<'a>(max_rounds: Option<u32>, names: impl Iterator<Item = &'a str>) {
    let mut empty = true;
    for (i, name) in names.enumerate() {
        println!("  {}. {}", i + 1, name);
        empty = false;
    }
    if empty {
        println!("  (none)");
    }
    match max_rounds {
        Some(rounds) => println!("  gives up after {} round(s)", rounds),
        None => println!("  cycles until cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_transcribe() {
        let cli = Cli::try_parse_from([
            "voice-relay",
            "transcribe",
            "--config",
            "relay.toml",
            "--input",
            "audio.pcm",
        ])
        .unwrap();
        match cli.command {
            Commands::Transcribe {
                chunk_bytes, input, ..
            } => {
                assert_eq!(chunk_bytes, 3200);
                assert_eq!(input, PathBuf::from("audio.pcm"));
            }
            _ => panic!("expected transcribe"),
        }
    }

    #[test]
    fn test_parse_speak_with_output() {
        let cli =
            Cli::try_parse_from(["voice-relay", "speak", "-c", "relay.toml", "-o", "out.pcm"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Speak { output: Some(path), .. } if path == PathBuf::from("out.pcm")
        ));
    }
}
