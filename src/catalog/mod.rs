use std::collections::HashSet;
use std::fmt;

use anyhow::Result;
use log::warn;

#[cfg(test)]
pub mod scripted;

const WATCH_URL_BASE: &str = "https://www.youtube.com/watch?v=";

pub type VideoId = String;
pub type PlaylistId = String;

/// A liked video as it was reported at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Video {
    pub id: VideoId,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub description: String,
}

impl Video {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            thumbnail_url: None,
            description: String::new(),
        }
    }

    pub fn watch_url(&self) -> String {
        format!("{WATCH_URL_BASE}{}", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    pub id: PlaylistId,
    pub title: String,
}

impl Playlist {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// Remote source of playlists and liked videos, and the two mutations a move needs.
///
/// Every call blocks until the remote side answers.
pub trait CatalogProvider {
    /// Returns the user's playlists. Only the first page is fetched.
    fn list_playlists(&self) -> Result<Vec<Playlist>>;

    /// Returns every liked video, following continuation tokens until exhausted.
    fn list_liked_videos(&self) -> Result<Vec<Video>>;

    fn add_video_to_playlist(&self, video_id: &str, playlist_id: &str) -> Result<()>;

    /// Clears the user's rating on the video.
    fn remove_like(&self, video_id: &str) -> Result<()>;
}

/// One page of a list endpoint.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

/// A listing handed back a continuation token it had already produced, so
/// following it would never finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatedPageToken(pub String);

impl fmt::Display for RepeatedPageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listing repeated page token {:?}", self.0)
    }
}

impl std::error::Error for RepeatedPageToken {}

/// Drains a paginated listing into one vector.
///
/// `fetch` receives the continuation token of the previous page (`None` for the
/// first). Any page error aborts the whole listing; nothing fetched so far is
/// returned. A token that comes back a second time is an error too.
/// `on_page` is told the running total after each page.
pub fn collect_pages<T, E, F, P>(mut fetch: F, mut on_page: P) -> Result<Vec<T>, E>
where
    E: From<RepeatedPageToken>,
    F: FnMut(Option<&str>) -> Result<Page<T>, E>,
    P: FnMut(usize),
{
    let mut collected = Vec::new();
    let mut token: Option<String> = None;
    let mut seen = HashSet::new();

    loop {
        let page = fetch(token.as_deref())?;
        collected.extend(page.items);
        on_page(collected.len());

        let Some(next) = page.next_page_token.filter(|next| !next.is_empty()) else {
            break;
        };
        if !seen.insert(next.clone()) {
            warn!(
                "page token {next:?} came back again after {} items; dropping the partial listing",
                collected.len()
            );
            return Err(RepeatedPageToken(next).into());
        }
        token = Some(next);
    }

    Ok(collected)
}
