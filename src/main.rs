//! ConsoleMusicBot
//!
//! A Discord music bot driven from the local console (or a companion
//! program over TCP) that streams audio through ffmpeg.

mod audio;
mod bot;
mod cli;
mod companion;
mod config;
mod console;
mod player;
mod playlist;

use audio::Transcoder;
use clap::Parser;
use cli::Cli;
use config::Config;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,console_music_bot=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("ConsoleMusicBot starting...");

    // Load configuration
    let loaded = match &cli.env_file {
        Some(path) => Config::from_env_file(path),
        None => Config::from_env(),
    };
    let config = match loaded.and_then(|mut c| c.apply_cli(&cli).map(|_| c)) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("Please ensure DISCORD_BOT_TOKEN is set in the environment or .env file");
            std::process::exit(1);
        }
    };

    info!("Configuration loaded successfully");
    if config.companion {
        info!("Companion socket enabled on {}", config.companion_addr());
    }

    // ffmpeg must be runnable before anything can play
    if let Err(e) = Transcoder::new(&config.ffmpeg_path).check() {
        error!("{}", e);
        std::process::exit(1);
    }

    // Run the bot
    if let Err(e) = bot::run(config).await {
        error!("Bot error: {}", e);
        std::process::exit(1);
    }

    // The stdin reader may still be parked in a blocking read
    std::process::exit(0);
}
