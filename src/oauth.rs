//! Google OAuth 2.0 for installed applications: PKCE authorization through a
//! loopback redirect, token refresh, and token persistence.

use std::cell::RefCell;
use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use rand::Rng;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Tokens this close to expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;
const REDIRECT_REPLY: &str = "<html><body><h3>Authorization complete.</h3>\
    <p>You can close this window and return to the terminal.</p></body></html>";

#[derive(Debug)]
pub enum OAuthError {
    Http(reqwest::Error),
    Api(String),
    Io(std::io::Error),
    Config(String),
    StateMismatch,
    Denied(String),
    NoRefreshToken,
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OAuthError::Http(err) => write!(f, "HTTP error: {err}"),
            OAuthError::Api(body) => write!(f, "OAuth token endpoint error: {body}"),
            OAuthError::Io(err) => write!(f, "Filesystem error: {err}"),
            OAuthError::Config(msg) => write!(f, "{msg}"),
            OAuthError::StateMismatch => {
                write!(f, "OAuth redirect carried an unexpected state parameter")
            }
            OAuthError::Denied(reason) => write!(f, "Authorization was denied: {reason}"),
            OAuthError::NoRefreshToken => {
                write!(f, "Access token expired and no refresh token is stored")
            }
        }
    }
}

impl std::error::Error for OAuthError {}

impl From<reqwest::Error> for OAuthError {
    fn from(e: reqwest::Error) -> Self {
        OAuthError::Http(e)
    }
}

impl From<std::io::Error> for OAuthError {
    fn from(e: std::io::Error) -> Self {
        OAuthError::Io(e)
    }
}

/// The `installed` (or `web`) block of a Cloud Console client secrets file.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn load(path: &Path) -> Result<Self, OAuthError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(OAuthError::Config(format!(
                    "{} file not found. Please download it from Google Cloud Console.",
                    path.display()
                )));
            }
            Err(err) => return Err(OAuthError::from(err)),
        };
        Self::parse(&contents).map_err(|msg| {
            OAuthError::Config(format!("Invalid client secrets {}: {msg}", path.display()))
        })
    }

    fn parse(contents: &str) -> Result<Self, String> {
        let file: ClientSecretsFile = serde_json::from_str(contents).map_err(|e| e.to_string())?;
        file.installed
            .or(file.web)
            .ok_or_else(|| "expected an `installed` or `web` client block".to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

/// Token as persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl StoredToken {
    /// Builds a token from an endpoint response. Refresh responses usually
    /// omit the refresh token, so `previous_refresh` is kept in that case.
    pub fn from_response(
        response: TokenResponse,
        previous_refresh: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        // Google access tokens last an hour when the field is missing.
        let lifetime = response.expires_in.unwrap_or(3600);
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            expires_at: now + TimeDelta::seconds(lifetime),
            scope: response.scope,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now + TimeDelta::seconds(EXPIRY_SKEW_SECS) < self.expires_at
    }

    /// Returns `None` when no token has been stored yet or the file is unreadable as JSON.
    pub fn load(path: &Path) -> Result<Option<Self>, OAuthError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(OAuthError::from(err)),
        };
        match serde_json::from_str(&contents) {
            Ok(token) => Ok(Some(token)),
            Err(err) => {
                warn!("ignoring unreadable token file {}: {err}", path.display());
                Ok(None)
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), OAuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(self).map_err(|err| {
            OAuthError::Config(format!(
                "Failed to serialize token for {}: {err}",
                path.display()
            ))
        })?;
        fs::write(path, payload)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct AuthorizeRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: String,
}

/// What the browser handed back on the loopback redirect.
#[derive(Debug, PartialEq, Eq)]
enum Redirect {
    Code { code: String, state: String },
    Error(String),
    /// Anything else the browser asks for, e.g. `/favicon.ico`.
    Unrelated,
}

#[derive(Clone)]
pub struct OAuthClient {
    secrets: ClientSecrets,
    http: Client,
}

impl OAuthClient {
    pub fn new(secrets: ClientSecrets) -> Result<Self, OAuthError> {
        let http = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self { secrets, http })
    }

    /// Generate PKCE code verifier and challenge
    fn generate_pkce() -> (String, String) {
        let verifier_bytes: [u8; 32] = rand::rng().random();
        let code_verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(verifier_bytes);
        let code_challenge = pkce_challenge(&code_verifier);
        (code_verifier, code_challenge)
    }

    fn generate_state() -> String {
        let bytes: [u8; 16] = rand::rng().random();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }

    fn basic_auth_header(&self) -> String {
        let credentials = format!("{}:{}", self.secrets.client_id, self.secrets.client_secret);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        )
    }

    /// Builds the consent URL. `access_type=offline` asks for a refresh token.
    pub fn authorize_url(&self, redirect_uri: &str, scopes: &[&str]) -> AuthorizeRequest {
        let state = Self::generate_state();
        let (code_verifier, code_challenge) = Self::generate_pkce();

        let url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256&access_type=offline",
            self.secrets.auth_uri,
            percent_encode(&self.secrets.client_id),
            percent_encode(redirect_uri),
            percent_encode(&scopes.join(" ")),
            percent_encode(&state),
            percent_encode(&code_challenge)
        );

        AuthorizeRequest {
            url,
            state,
            code_verifier,
        }
    }

    pub fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, OAuthError> {
        let params = [
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
        ];
        self.token_request(&params)
    }

    pub fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, OAuthError> {
        let params = [
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        self.token_request(&params)
    }

    fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, OAuthError> {
        let resp = self
            .http
            .post(&self.secrets.token_uri)
            .header("Authorization", self.basic_auth_header())
            .form(params)
            .send()?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().unwrap_or_default();
            return Err(OAuthError::Api(format!("Status {status}: {text}")));
        }

        Ok(resp.json()?)
    }

    /// Runs the consent flow: listens on a free loopback port, waits for the
    /// browser redirect, and trades the code for a token.
    pub fn run_local_flow(&self, scopes: &[&str]) -> Result<StoredToken, OAuthError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{port}/");
        let request = self.authorize_url(&redirect_uri, scopes);

        println!("Open this URL in your browser to authorize access to YouTube:\n\n{}\n", request.url);
        info!("waiting for OAuth redirect on port {port}");

        let code = loop {
            let (stream, _) = listener.accept()?;
            match answer_redirect(stream)? {
                Redirect::Code { code, state } => {
                    if state != request.state {
                        return Err(OAuthError::StateMismatch);
                    }
                    break code;
                }
                Redirect::Error(reason) => return Err(OAuthError::Denied(reason)),
                Redirect::Unrelated => continue,
            }
        };

        let response = self.exchange_code(&code, &request.code_verifier, &redirect_uri)?;
        info!("authorization complete");
        Ok(StoredToken::from_response(response, None, Utc::now()))
    }
}

/// Holds the session's token and refreshes it when it runs out.
pub struct TokenSource {
    client: OAuthClient,
    path: PathBuf,
    token: RefCell<StoredToken>,
}

impl TokenSource {
    /// Reuses the stored token, refreshes it, or falls back to the browser flow.
    pub fn authorize(
        client: OAuthClient,
        path: PathBuf,
        scopes: &[&str],
    ) -> Result<Self, OAuthError> {
        let token = match StoredToken::load(&path)? {
            Some(token) if token.is_valid_at(Utc::now()) => {
                debug!("using stored token from {}", path.display());
                token
            }
            Some(token) => match refresh(&client, &token) {
                Ok(refreshed) => refreshed,
                Err(err) => {
                    warn!("token refresh failed, starting a new authorization: {err}");
                    client.run_local_flow(scopes)?
                }
            },
            None => client.run_local_flow(scopes)?,
        };
        token.save(&path)?;

        Ok(Self {
            client,
            path,
            token: RefCell::new(token),
        })
    }

    /// Wraps a token that is already in hand. Nothing is written to disk
    /// unless the token has to be refreshed.
    #[cfg(test)]
    pub fn with_token(token: StoredToken) -> Self {
        let secrets = ClientSecrets {
            client_id: "test.apps.googleusercontent.com".into(),
            client_secret: "test".into(),
            auth_uri: default_auth_uri(),
            token_uri: default_token_uri(),
        };
        Self {
            client: OAuthClient::new(secrets).expect("build OAuth client"),
            path: PathBuf::new(),
            token: RefCell::new(token),
        }
    }

    /// Returns a usable access token, refreshing first when needed.
    pub fn access_token(&self) -> Result<String, OAuthError> {
        if self.token.borrow().is_valid_at(Utc::now()) {
            return Ok(self.token.borrow().access_token.clone());
        }

        let refreshed = refresh(&self.client, &self.token.borrow())?;
        refreshed.save(&self.path)?;
        let access = refreshed.access_token.clone();
        self.token.replace(refreshed);
        Ok(access)
    }
}

fn refresh(client: &OAuthClient, token: &StoredToken) -> Result<StoredToken, OAuthError> {
    let refresh_token = token
        .refresh_token
        .clone()
        .ok_or(OAuthError::NoRefreshToken)?;
    info!("refreshing access token");
    let response = client.refresh_token(&refresh_token)?;
    Ok(StoredToken::from_response(
        response,
        Some(refresh_token),
        Utc::now(),
    ))
}

fn answer_redirect(mut stream: TcpStream) -> Result<Redirect, OAuthError> {
    let mut request_line = String::new();
    BufReader::new(&stream).read_line(&mut request_line)?;
    let redirect = parse_redirect(&request_line);

    let (status, body) = match redirect {
        Redirect::Unrelated => ("404 Not Found", ""),
        _ => ("200 OK", REDIRECT_REPLY),
    };
    write!(
        stream,
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )?;
    stream.flush()?;
    Ok(redirect)
}

/// Parses a request line such as `GET /?code=abc&state=xyz HTTP/1.1`.
fn parse_redirect(request_line: &str) -> Redirect {
    let Some(target) = request_line.split_whitespace().nth(1) else {
        return Redirect::Unrelated;
    };
    let Ok(url) = Url::parse(&format!("http://127.0.0.1{target}")) else {
        return Redirect::Unrelated;
    };

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Redirect::Error(value.into_owned()),
            _ => {}
        }
    }

    match (code, state) {
        (Some(code), Some(state)) => Redirect::Code { code, state },
        (Some(code), None) => Redirect::Code {
            code,
            state: String::new(),
        },
        _ => Redirect::Unrelated,
    }
}

fn pkce_challenge(code_verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn percent_encode(s: &str) -> String {
    percent_encoding::utf8_percent_encode(s, percent_encoding::NON_ALPHANUMERIC).to_string()
}
