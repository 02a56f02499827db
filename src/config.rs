use std::env;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const API_BASE_ENV: &str = "YT_ORGANIZER_API_URL";
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
pub const YOUTUBE_SCOPE: &str = "https://www.googleapis.com/auth/youtube.force-ssl";
const APP_DIR: &str = "yt-playlist-organizer";
const CONFIG_FILE: &str = "config.json";
const TOKEN_FILE: &str = "token.json";
const DEFAULT_CLIENT_SECRETS: &str = "client_secret.json";
/// Largest `maxResults` the Data API accepts on list calls.
pub const MAX_PAGE_SIZE: u32 = 50;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    NoConfigDir,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "Filesystem error: {err}"),
            ConfigError::Parse(err) => write!(f, "{err}"),
            ConfigError::NoConfigDir => {
                write!(f, "Could not locate a configuration directory for this user")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

/// On-disk settings. Every field is optional.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct OrganizerConfig {
    /// Google OAuth client secrets downloaded from Cloud Console.
    #[serde(default)]
    pub client_secrets_file: Option<PathBuf>,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// Data API base URL. Falls back to YT_ORGANIZER_API_URL, then the public endpoint.
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

/// Fully resolved settings used by the rest of the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub client_secrets_file: PathBuf,
    pub token_file: PathBuf,
    pub api_url: String,
    pub page_size: u32,
}

impl OrganizerConfig {
    /// Reads the config file; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(ConfigError::from(err)),
        };

        serde_json::from_str(&contents).map_err(|err| {
            ConfigError::Parse(format!(
                "Failed to parse config {}: {err}",
                path.display()
            ))
        })
    }

    /// Applies the config file → environment → default order.
    pub fn resolve(self, app_dir: &Path, env_api_url: Option<String>) -> Settings {
        let api_url = self
            .api_url
            .filter(|url| !url.trim().is_empty())
            .or(env_api_url.filter(|url| !url.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Settings {
            client_secrets_file: self
                .client_secrets_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIENT_SECRETS)),
            token_file: self
                .token_file
                .unwrap_or_else(|| app_dir.join(TOKEN_FILE)),
            api_url: api_url.trim_end_matches('/').to_string(),
            page_size: self
                .page_size
                .unwrap_or(MAX_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }
}

pub fn app_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or(ConfigError::NoConfigDir)
}

/// Loads `<config dir>/yt-playlist-organizer/config.json` and resolves it.
pub fn load_settings() -> Result<Settings, ConfigError> {
    let dir = app_dir()?;
    let config = OrganizerConfig::load_from(&dir.join(CONFIG_FILE))?;
    Ok(config.resolve(&dir, env::var(API_BASE_ENV).ok()))
}
