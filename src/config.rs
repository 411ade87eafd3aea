//! Configuration management for the music bot
//!
//! Loads settings from environment variables (.env file), then lets
//! command-line flags override them

use crate::cli::Cli;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
    #[error("Failed to load env file {0}: {1}")]
    EnvFile(PathBuf, dotenvy::Error),
}

pub const DEFAULT_COMPANION_PORT: u16 = 7000;
pub const DEFAULT_VOLUME: u8 = 50;
pub const MAX_VOLUME: u8 = 200;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Discord bot token
    pub discord_token: String,
    /// ffmpeg executable, looked up on PATH unless absolute
    pub ffmpeg_path: PathBuf,
    /// Whether the companion socket is opened
    pub companion: bool,
    /// Companion socket hostname
    pub companion_host: String,
    /// Companion socket port
    pub companion_port: u16,
    /// Volume for new players, in percent
    pub default_volume: u8,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load an explicit env file first, then read the environment
    pub fn from_env_file(path: &Path) -> Result<Self, ConfigError> {
        dotenvy::from_path(path).map_err(|e| ConfigError::EnvFile(path.to_path_buf(), e))?;

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        let discord_token = var("DISCORD_BOT_TOKEN")
            .ok_or_else(|| ConfigError::MissingEnvVar("DISCORD_BOT_TOKEN".to_string()))?;

        let ffmpeg_path = var("FFMPEG_PATH")
            .unwrap_or_else(|| "ffmpeg".to_string())
            .into();

        let companion = var("COMPANION_ENABLED")
            .map(|s| parse_bool("COMPANION_ENABLED", &s))
            .transpose()?
            .unwrap_or(true);

        let companion_host = var("COMPANION_HOST").unwrap_or_else(|| "127.0.0.1".to_string());

        let companion_port = var("COMPANION_PORT")
            .map(|s| {
                s.trim()
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidValue("COMPANION_PORT".to_string(), s))
            })
            .transpose()?
            .unwrap_or(DEFAULT_COMPANION_PORT);

        let default_volume = var("DEFAULT_VOLUME")
            .map(|s| parse_volume("DEFAULT_VOLUME", &s))
            .transpose()?
            .unwrap_or(DEFAULT_VOLUME);

        Ok(Self {
            discord_token,
            ffmpeg_path,
            companion,
            companion_host,
            companion_port,
            default_volume,
        })
    }

    /// Override values with flags given on the command line
    pub fn apply_cli(&mut self, cli: &Cli) -> Result<(), ConfigError> {
        if let Some(path) = &cli.ffmpeg {
            self.ffmpeg_path = path.clone();
        }
        if let Some(host) = &cli.companion_host {
            self.companion_host = host.clone();
        }
        if let Some(port) = cli.companion_port {
            self.companion_port = port;
        }
        if cli.no_companion {
            self.companion = false;
        }
        if let Some(volume) = cli.volume {
            self.default_volume = parse_volume("--volume", &volume.to_string())?;
        }
        Ok(())
    }

    /// Address the companion server binds to
    pub fn companion_addr(&self) -> String {
        format!("{}:{}", self.companion_host, self.companion_port)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(key.to_string(), value.to_string())),
    }
}

fn parse_volume(key: &str, value: &str) -> Result<u8, ConfigError> {
    value
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|v| *v <= MAX_VOLUME)
        .ok_or_else(|| ConfigError::InvalidValue(key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("DISCORD_BOT_TOKEN", "abc")])).unwrap();
        assert_eq!(config.discord_token, "abc");
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert!(config.companion);
        assert_eq!(config.companion_addr(), "127.0.0.1:7000");
        assert_eq!(config.default_volume, 50);
    }

    #[test]
    fn test_missing_token() {
        let err = Config::from_lookup(lookup(&[("DISCORD_BOT_TOKEN", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "DISCORD_BOT_TOKEN"));
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_lookup(lookup(&[
            ("DISCORD_BOT_TOKEN", "abc"),
            ("COMPANION_PORT", "http"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref k, _) if k == "COMPANION_PORT"));

        let err = Config::from_lookup(lookup(&[
            ("DISCORD_BOT_TOKEN", "abc"),
            ("DEFAULT_VOLUME", "250"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref k, _) if k == "DEFAULT_VOLUME"));

        let err = Config::from_lookup(lookup(&[
            ("DISCORD_BOT_TOKEN", "abc"),
            ("COMPANION_ENABLED", "maybe"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref k, _) if k == "COMPANION_ENABLED"));
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config = Config::from_lookup(lookup(&[
            ("DISCORD_BOT_TOKEN", "abc"),
            ("COMPANION_PORT", "9000"),
            ("COMPANION_ENABLED", "yes"),
        ]))
        .unwrap();
        let cli = Cli::parse_from([
            "console_music_bot",
            "--companion-port",
            "9100",
            "--no-companion",
            "--ffmpeg",
            "/opt/ffmpeg/bin/ffmpeg",
            "--volume",
            "80",
        ]);
        config.apply_cli(&cli).unwrap();

        assert_eq!(config.companion_port, 9100);
        assert!(!config.companion);
        assert_eq!(config.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.default_volume, 80);
    }

    #[test]
    fn test_missing_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.env");
        let err = Config::from_env_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::EnvFile(ref p, _) if p == &path));
    }

    #[test]
    fn test_cli_volume_out_of_range() {
        let mut config = Config::from_lookup(lookup(&[("DISCORD_BOT_TOKEN", "abc")])).unwrap();
        let cli = Cli::parse_from(["console_music_bot", "--volume", "201"]);
        assert!(config.apply_cli(&cli).is_err());
    }
}
