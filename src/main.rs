mod catalog;
mod cli;
mod config;
mod logging;
mod oauth;
mod reconciler;
mod youtube;

use std::fmt;
use std::io;
use std::process::ExitCode;

use log::{error, info};

use crate::cli::Session;
use crate::config::{ConfigError, Settings, YOUTUBE_SCOPE};
use crate::oauth::{ClientSecrets, OAuthClient, OAuthError, TokenSource};
use crate::youtube::{ApiError, YouTubeClient};

#[derive(Debug)]
enum AppError {
    Config(ConfigError),
    Auth(OAuthError),
    Api(ApiError),
    Io(io::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "Configuration error: {err}"),
            AppError::Auth(err) => write!(f, "Could not connect to YouTube API: {err}"),
            AppError::Api(err) => write!(f, "YouTube API error: {err}"),
            AppError::Io(err) => write!(f, "Terminal error: {err}"),
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        AppError::Config(value)
    }
}

impl From<OAuthError> for AppError {
    fn from(value: OAuthError) -> Self {
        AppError::Auth(value)
    }
}

impl From<ApiError> for AppError {
    fn from(value: ApiError) -> Self {
        AppError::Api(value)
    }
}

impl From<io::Error> for AppError {
    fn from(value: io::Error) -> Self {
        AppError::Io(value)
    }
}

fn main() -> ExitCode {
    logging::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), AppError> {
    let settings = config::load_settings()?;
    let client = connect(&settings)?;
    info!("Connected to YouTube API at {}", client.base_url());

    let stdout = io::stdout();
    let mut session = Session::new(&client, stdout.lock());
    session.refresh()?;
    session.run(io::stdin().lock())?;
    Ok(())
}

fn connect(settings: &Settings) -> Result<YouTubeClient, AppError> {
    let secrets = ClientSecrets::load(&settings.client_secrets_file)?;
    let oauth = OAuthClient::new(secrets)?;
    let tokens = TokenSource::authorize(oauth, settings.token_file.clone(), &[YOUTUBE_SCOPE])?;
    Ok(YouTubeClient::new(
        settings.api_url.clone(),
        settings.page_size,
        tokens,
    )?)
}
