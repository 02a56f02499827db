use std::fmt;
use std::time::Duration;

use anyhow::Result as AnyResult;
use log::{info, warn};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::json;

use crate::catalog::{CatalogProvider, Page, Playlist, RepeatedPageToken, Video, collect_pages};
use crate::oauth::{OAuthError, TokenSource};

/// Errors that can occur while talking to the YouTube Data API.
#[derive(Debug)]
pub enum ApiError {
    Http(reqwest::Error),
    UnexpectedStatus { status: StatusCode, body: String },
    Auth(OAuthError),
    Pagination(RepeatedPageToken),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Http(err) => write!(f, "http error: {err}"),
            ApiError::UnexpectedStatus { status, body } => {
                write!(f, "unexpected status {status}: {body}")
            }
            ApiError::Auth(err) => write!(f, "authorization error: {err}"),
            ApiError::Pagination(err) => write!(f, "pagination error: {err}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(value: reqwest::Error) -> Self {
        ApiError::Http(value)
    }
}

impl From<OAuthError> for ApiError {
    fn from(value: OAuthError) -> Self {
        ApiError::Auth(value)
    }
}

impl From<RepeatedPageToken> for ApiError {
    fn from(value: RepeatedPageToken) -> Self {
        ApiError::Pagination(value)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistResource {
    id: String,
    snippet: PlaylistSnippet,
}

#[derive(Debug, Deserialize)]
struct PlaylistSnippet {
    title: String,
}

#[derive(Debug, Deserialize)]
struct VideoResource {
    id: String,
    snippet: VideoSnippet,
}

#[derive(Debug, Deserialize)]
struct VideoSnippet {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
    medium: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

impl From<PlaylistResource> for Playlist {
    fn from(value: PlaylistResource) -> Self {
        Playlist::new(value.id, value.snippet.title)
    }
}

impl From<VideoResource> for Video {
    fn from(value: VideoResource) -> Self {
        let VideoSnippet {
            title,
            description,
            thumbnails,
        } = value.snippet;
        let thumbnail_url = thumbnails.medium.or(thumbnails.default).map(|t| t.url);
        Video {
            thumbnail_url,
            description,
            ..Video::new(value.id, title)
        }
    }
}

impl<T> ListResponse<T> {
    fn into_page<U: From<T>>(self) -> Page<U> {
        Page {
            items: self.items.into_iter().map(U::from).collect(),
            next_page_token: self.next_page_token.filter(|token| !token.is_empty()),
        }
    }
}

/// Blocking YouTube Data API v3 client acting for the signed-in user.
pub struct YouTubeClient {
    base_url: String,
    page_size: u32,
    http: Client,
    tokens: TokenSource,
}

impl YouTubeClient {
    pub fn new(
        base_url: impl Into<String>,
        page_size: u32,
        tokens: TokenSource,
    ) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(Duration::from_secs(60)).build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size,
            http,
            tokens,
        })
    }

    /// Fetches the first page of the user's playlists.
    pub fn fetch_playlists(&self) -> Result<Vec<Playlist>, ApiError> {
        let url = format!("{}/playlists", self.base_url);
        let page_size = self.page_size.to_string();
        let request = self.http.get(url).query(&[
            ("part", "snippet"),
            ("mine", "true"),
            ("maxResults", page_size.as_str()),
        ]);
        let response: ListResponse<PlaylistResource> = Self::parse(self.authorized(request)?.send()?)?;

        let page: Page<Playlist> = response.into_page();
        if page.next_page_token.is_some() {
            warn!(
                "more than {} playlists exist; only the first page is shown",
                self.page_size
            );
        }
        Ok(page.items)
    }

    /// Fetches every liked video, page by page, reporting the running total.
    pub fn fetch_liked_videos_with_progress<F>(&self, on_progress: F) -> Result<Vec<Video>, ApiError>
    where
        F: FnMut(usize),
    {
        collect_pages(|token| self.fetch_liked_page(token), on_progress)
    }

    fn fetch_liked_page(&self, page_token: Option<&str>) -> Result<Page<Video>, ApiError> {
        let url = format!("{}/videos", self.base_url);
        let page_size = self.page_size.to_string();
        let mut request = self.http.get(url).query(&[
            ("part", "snippet,contentDetails"),
            ("myRating", "like"),
            ("maxResults", page_size.as_str()),
        ]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response: ListResponse<VideoResource> = Self::parse(self.authorized(request)?.send()?)?;
        Ok(response.into_page())
    }

    pub fn insert_playlist_item(&self, video_id: &str, playlist_id: &str) -> Result<(), ApiError> {
        let url = format!("{}/playlistItems", self.base_url);
        let body = json!({
            "snippet": {
                "playlistId": playlist_id,
                "resourceId": {
                    "kind": "youtube#video",
                    "videoId": video_id,
                }
            }
        });
        let request = self.http.post(url).query(&[("part", "snippet")]).json(&body);
        Self::handle_response(self.authorized(request)?.send()?)
    }

    /// Sets the user's rating on a video; `"none"` clears a like.
    pub fn rate_video(&self, video_id: &str, rating: &str) -> Result<(), ApiError> {
        let url = format!("{}/videos/rate", self.base_url);
        let request = self
            .http
            .post(url)
            .query(&[("id", video_id), ("rating", rating)])
            .header(reqwest::header::CONTENT_LENGTH, "0");
        Self::handle_response(self.authorized(request)?.send()?)
    }

    /// Returns the base URL configured for this client.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn parse<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, ApiError> {
        if response.status().is_success() {
            response.json().map_err(ApiError::from)
        } else {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            Err(ApiError::UnexpectedStatus { status, body })
        }
    }

    fn handle_response(response: Response) -> Result<(), ApiError> {
        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let body = response.text().unwrap_or_default();
        Err(ApiError::UnexpectedStatus { status, body })
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let token = self.tokens.access_token()?;
        Ok(request.header(AUTHORIZATION, format!("Bearer {token}")))
    }
}

impl CatalogProvider for YouTubeClient {
    fn list_playlists(&self) -> AnyResult<Vec<Playlist>> {
        Ok(self.fetch_playlists()?)
    }

    fn list_liked_videos(&self) -> AnyResult<Vec<Video>> {
        info!("Loading liked videos (this may take a moment)...");
        let videos = self.fetch_liked_videos_with_progress(|loaded| {
            info!("Loading liked videos... ({loaded} loaded so far)");
        })?;
        Ok(videos)
    }

    fn add_video_to_playlist(&self, video_id: &str, playlist_id: &str) -> AnyResult<()> {
        Ok(self.insert_playlist_item(video_id, playlist_id)?)
    }

    fn remove_like(&self, video_id: &str) -> AnyResult<()> {
        Ok(self.rate_video(video_id, "none")?)
    }
}
