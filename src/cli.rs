//! Command-line flags

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(name = "console_music_bot", version)]
#[command(about = "Discord music bot controlled from the console", long_about = None)]
pub struct Cli {
    /// Env file to load instead of ./.env
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Path to the ffmpeg executable (overrides FFMPEG_PATH)
    #[arg(long)]
    pub ffmpeg: Option<PathBuf>,

    /// Hostname for the companion socket (overrides COMPANION_HOST)
    #[arg(long)]
    pub companion_host: Option<String>,

    /// Port for the companion socket (overrides COMPANION_PORT)
    #[arg(long)]
    pub companion_port: Option<u16>,

    /// Do not open the companion socket
    #[arg(long)]
    pub no_companion: bool,

    /// Starting volume in percent, 0-200 (overrides DEFAULT_VOLUME)
    #[arg(long)]
    pub volume: Option<u16>,
}
