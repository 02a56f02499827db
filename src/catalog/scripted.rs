use std::cell::RefCell;
use std::collections::HashSet;

use anyhow::{Result, anyhow};

use super::{CatalogProvider, Page, Playlist, Video, collect_pages};

/// Remote call recorded by [`ScriptedProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListPlaylists,
    ListLikedPage(usize),
    AddToPlaylist { video_id: String, playlist_id: String },
    RemoveLike { video_id: String },
}

/// In-memory provider whose answers are scripted up front.
///
/// Liked videos are served as pages so loading goes through the same
/// pagination path as the real client. A page scripted as `Err` fails that
/// request.
#[derive(Default)]
pub struct ScriptedProvider {
    playlists: Vec<Playlist>,
    playlists_error: Option<String>,
    liked_pages: Vec<Result<Vec<Video>, String>>,
    failing_adds: HashSet<String>,
    failing_unlikes: HashSet<String>,
    calls: RefCell<Vec<Call>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_playlists(mut self, playlists: Vec<Playlist>) -> Self {
        self.playlists = playlists;
        self
    }

    pub fn with_liked(self, videos: Vec<Video>) -> Self {
        self.with_liked_page(Ok(videos))
    }

    pub fn with_liked_page(mut self, page: Result<Vec<Video>, &str>) -> Self {
        self.liked_pages.push(page.map_err(str::to_string));
        self
    }

    pub fn failing_playlists(mut self, reason: &str) -> Self {
        self.playlists_error = Some(reason.to_string());
        self
    }

    pub fn failing_add(mut self, video_id: &str) -> Self {
        self.failing_adds.insert(video_id.to_string());
        self
    }

    pub fn failing_unlike(mut self, video_id: &str) -> Self {
        self.failing_unlikes.insert(video_id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn reset_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    /// Number of add/un-like requests made so far.
    pub fn mutation_count(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| matches!(call, Call::AddToPlaylist { .. } | Call::RemoveLike { .. }))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn liked_page(&self, index: usize) -> Result<Page<Video>> {
        self.record(Call::ListLikedPage(index));
        let Some(scripted) = self.liked_pages.get(index) else {
            return Ok(Page {
                items: Vec::new(),
                next_page_token: None,
            });
        };

        let items = scripted.clone().map_err(|reason| anyhow!(reason))?;
        let next_page_token = (index + 1 < self.liked_pages.len()).then(|| (index + 1).to_string());
        Ok(Page {
            items,
            next_page_token,
        })
    }
}

impl CatalogProvider for ScriptedProvider {
    fn list_playlists(&self) -> Result<Vec<Playlist>> {
        self.record(Call::ListPlaylists);
        match &self.playlists_error {
            Some(reason) => Err(anyhow!(reason.clone())),
            None => Ok(self.playlists.clone()),
        }
    }

    fn list_liked_videos(&self) -> Result<Vec<Video>> {
        collect_pages(
            |token| {
                let index = token.and_then(|t| t.parse().ok()).unwrap_or(0);
                self.liked_page(index)
            },
            |_| {},
        )
    }

    fn add_video_to_playlist(&self, video_id: &str, playlist_id: &str) -> Result<()> {
        self.record(Call::AddToPlaylist {
            video_id: video_id.to_string(),
            playlist_id: playlist_id.to_string(),
        });
        if self.failing_adds.contains(video_id) {
            return Err(anyhow!("playlistItems.insert rejected {video_id}"));
        }
        Ok(())
    }

    fn remove_like(&self, video_id: &str) -> Result<()> {
        self.record(Call::RemoveLike {
            video_id: video_id.to_string(),
        });
        if self.failing_unlikes.contains(video_id) {
            return Err(anyhow!("videos.rate rejected {video_id}"));
        }
        Ok(())
    }
}

/// Shorthand for a catalog entry in tests.
pub fn video(id: &str) -> Video {
    Video::new(id, format!("Video {id}"))
}
