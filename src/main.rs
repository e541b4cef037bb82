//! voice-relay - resilient streaming bridge to TTS/STT providers
//!
//! Runs single-threaded; every adapter is a task on the current-thread runtime.

use voice_relay::cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Install Rustls crypto provider for wss:// endpoints
    // This is required for Rustls 0.23+
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install Rustls crypto provider"))?;

    // Initialize logging (WARN level by default, use RUST_LOG=info for details).
    // Logs go to stderr; stdout may carry audio.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Run CLI
    cli::run().await
}
