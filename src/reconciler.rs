//! Local mirror of the user's liked videos and playlists, plus the selection
//! and destination the user has picked, kept consistent across batch moves.

use std::collections::HashSet;
use std::fmt;

use log::{debug, info, warn};

use crate::catalog::{CatalogProvider, Playlist, PlaylistId, Video, VideoId};

/// A move that was refused before any remote call was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveError {
    NoPlaylistChosen,
    NoVideosChosen,
}

impl fmt::Display for MoveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveError::NoPlaylistChosen => write!(f, "Please select a playlist"),
            MoveError::NoVideosChosen => write!(f, "Please select at least one video"),
        }
    }
}

impl std::error::Error for MoveError {}

/// Loading is all-or-nothing; the previous snapshot survives a failed load.
#[derive(Debug)]
pub enum LoadError {
    Playlists(anyhow::Error),
    LikedVideos(anyhow::Error),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Playlists(err) => write!(f, "Failed to load playlists: {err:#}"),
            LoadError::LikedVideos(err) => write!(f, "Failed to load liked videos: {err:#}"),
        }
    }
}

impl std::error::Error for LoadError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub playlists: usize,
    pub liked_videos: usize,
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Loaded {} playlists and {} liked videos",
            self.playlists, self.liked_videos
        )
    }
}

/// Aggregate result of one batch move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub playlist: Playlist,
    pub moved: usize,
    pub failed: usize,
}

impl fmt::Display for MoveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Moved {} videos to playlist '{}'",
            self.moved, self.playlist.title
        )?;
        if self.failed > 0 {
            write!(f, " ({} errors)", self.failed)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Reconciler {
    playlists: Vec<Playlist>,
    liked: Vec<Video>,
    selection: HashSet<VideoId>,
    preview: Option<VideoId>,
    destination: Option<PlaylistId>,
    last_outcome: Option<MoveOutcome>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces both snapshots with fresh data from `provider`.
    ///
    /// Playlists are fetched first, then every page of liked videos. If either
    /// fails nothing is replaced. On success the selection is reset to the
    /// first liked video (which also becomes the preview target), and the
    /// destination is kept only when its playlist is still present.
    pub fn load(&mut self, provider: &dyn CatalogProvider) -> Result<LoadSummary, LoadError> {
        let playlists = provider.list_playlists().map_err(LoadError::Playlists)?;
        let liked = provider
            .list_liked_videos()
            .map_err(LoadError::LikedVideos)?;

        let liked = dedup_by_id(liked);

        if let Some(destination) = &self.destination {
            if !playlists.iter().any(|p| &p.id == destination) {
                debug!("destination playlist {destination} vanished on refresh");
                self.destination = None;
            }
        }

        self.playlists = playlists;
        self.liked = liked;
        self.selection.clear();
        self.preview = None;

        if let Some(first) = self.liked.first() {
            self.selection.insert(first.id.clone());
            self.preview = Some(first.id.clone());
        }

        let summary = LoadSummary {
            playlists: self.playlists.len(),
            liked_videos: self.liked.len(),
        };
        info!("{summary}");
        Ok(summary)
    }

    /// Replaces the selection. Ids not in the catalog are dropped.
    ///
    /// `last_touched` becomes the preview target when it names a catalog
    /// video. An empty selection clears the preview target.
    pub fn record_selection<I>(&mut self, ids: I, last_touched: Option<VideoId>)
    where
        I: IntoIterator<Item = VideoId>,
    {
        let known: HashSet<&str> = self.liked.iter().map(|v| v.id.as_str()).collect();
        let mut selection = HashSet::new();
        for id in ids {
            if known.contains(id.as_str()) {
                selection.insert(id);
            } else {
                warn!("ignoring selection of unknown video {id}");
            }
        }

        if selection.is_empty() {
            self.preview = None;
        } else if let Some(id) = last_touched {
            if known.contains(id.as_str()) {
                self.preview = Some(id);
            }
        }

        self.selection = selection;
    }

    /// Chooses the playlist that moved videos go to. Unknown ids are ignored.
    pub fn record_destination(&mut self, playlist_id: &str) {
        if self.playlists.iter().any(|p| p.id == playlist_id) {
            self.destination = Some(playlist_id.to_string());
        } else {
            warn!("ignoring unknown destination playlist {playlist_id}");
        }
    }

    /// Adds every selected video to the destination playlist and removes its like.
    ///
    /// A video leaves the local catalog only when both requests succeeded. The
    /// selection is always empty afterwards. The destination is not checked
    /// against the live account; a playlist deleted elsewhere shows up as
    /// per-video failures.
    pub fn move_selected(
        &mut self,
        provider: &dyn CatalogProvider,
    ) -> Result<MoveOutcome, MoveError> {
        let playlist = self.destination().cloned().ok_or(MoveError::NoPlaylistChosen)?;
        if self.selection.is_empty() {
            return Err(MoveError::NoVideosChosen);
        }

        // Indices are captured before anything is removed.
        let targets: Vec<(usize, &Video)> = self
            .liked
            .iter()
            .enumerate()
            .filter(|(_, video)| self.selection.contains(&video.id))
            .collect();
        debug!(
            "moving {} videos to playlist {}",
            targets.len(),
            playlist.id
        );

        let mut succeeded = Vec::with_capacity(targets.len());
        let mut failed = 0;
        for (index, video) in targets {
            match move_one(provider, video, &playlist.id) {
                Ok(()) => succeeded.push(index),
                Err(reason) => {
                    failed += 1;
                    warn!("Error processing video {}: {reason}", video.title);
                }
            }
        }

        succeeded.sort_unstable_by(|a, b| b.cmp(a));
        for &index in &succeeded {
            let removed = self.liked.remove(index);
            if self.preview.as_deref() == Some(removed.id.as_str()) {
                self.preview = None;
            }
        }
        self.selection.clear();

        let outcome = MoveOutcome {
            playlist,
            moved: succeeded.len(),
            failed,
        };
        info!("{outcome}");
        self.last_outcome = Some(outcome.clone());
        Ok(outcome)
    }

    pub fn playlists(&self) -> &[Playlist] {
        &self.playlists
    }

    pub fn liked_videos(&self) -> &[Video] {
        &self.liked
    }

    pub fn is_selected(&self, video_id: &str) -> bool {
        self.selection.contains(video_id)
    }

    pub fn selection_len(&self) -> usize {
        self.selection.len()
    }

    /// Selected videos in catalog order.
    pub fn selected_videos(&self) -> Vec<&Video> {
        self.liked
            .iter()
            .filter(|video| self.selection.contains(&video.id))
            .collect()
    }

    pub fn preview(&self) -> Option<&Video> {
        let id = self.preview.as_deref()?;
        self.liked.iter().find(|video| video.id == id)
    }

    pub fn destination(&self) -> Option<&Playlist> {
        let id = self.destination.as_deref()?;
        self.playlists.iter().find(|playlist| playlist.id == id)
    }

    pub fn last_outcome(&self) -> Option<&MoveOutcome> {
        self.last_outcome.as_ref()
    }
}

/// Both requests are always attempted; either failing fails the video.
fn move_one(
    provider: &dyn CatalogProvider,
    video: &Video,
    playlist_id: &str,
) -> Result<(), String> {
    let added = provider.add_video_to_playlist(&video.id, playlist_id);
    let unliked = provider.remove_like(&video.id);

    match (added, unliked) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(add), Ok(())) => Err(format!("add to playlist failed: {add:#}")),
        (Ok(()), Err(unlike)) => Err(format!("remove like failed: {unlike:#}")),
        (Err(add), Err(unlike)) => Err(format!(
            "add to playlist failed: {add:#}; remove like failed: {unlike:#}"
        )),
    }
}

fn dedup_by_id(videos: Vec<Video>) -> Vec<Video> {
    let mut seen = HashSet::with_capacity(videos.len());
    let before = videos.len();
    let unique: Vec<Video> = videos
        .into_iter()
        .filter(|video| seen.insert(video.id.clone()))
        .collect();
    if unique.len() != before {
        warn!("dropped {} duplicate liked videos", before - unique.len());
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::scripted::{Call, ScriptedProvider, video};

    fn ids(reconciler: &Reconciler) -> Vec<&str> {
        reconciler
            .liked_videos()
            .iter()
            .map(|v| v.id.as_str())
            .collect()
    }

    fn loaded(provider: &ScriptedProvider) -> Reconciler {
        let mut reconciler = Reconciler::new();
        reconciler.load(provider).expect("scripted load");
        provider.reset_calls();
        reconciler
    }

    fn abcd() -> ScriptedProvider {
        ScriptedProvider::new()
            .with_playlists(vec![Playlist::new("P", "Keepers"), Playlist::new("Q", "Later")])
            .with_liked(vec![video("1"), video("2"), video("3"), video("4")])
    }

    fn select(reconciler: &mut Reconciler, chosen: &[&str]) {
        let last = chosen.last().map(|id| id.to_string());
        reconciler.record_selection(chosen.iter().map(|id| id.to_string()), last);
    }

    #[test]
    fn load_selects_first_video_for_preview() {
        let provider = abcd();
        let reconciler = loaded(&provider);

        assert_eq!(ids(&reconciler), vec!["1", "2", "3", "4"]);
        assert_eq!(reconciler.playlists().len(), 2);
        assert!(reconciler.is_selected("1"));
        assert_eq!(reconciler.selection_len(), 1);
        assert_eq!(reconciler.preview().map(|v| v.id.as_str()), Some("1"));
    }

    #[test]
    fn partial_failure_retains_video_whose_unlike_failed() {
        let provider = abcd().failing_unlike("4");
        let mut reconciler = loaded(&provider);
        reconciler.record_destination("P");
        select(&mut reconciler, &["2", "4"]);

        let outcome = reconciler.move_selected(&provider).unwrap();

        assert_eq!(outcome.moved, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(ids(&reconciler), vec!["1", "3", "4"]);
        assert_eq!(reconciler.selection_len(), 0);
        assert_eq!(outcome.to_string(), "Moved 1 videos to playlist 'Keepers' (1 errors)");
    }

    #[test]
    fn failed_add_still_attempts_unlike_and_retains_video() {
        let provider = abcd().failing_add("3");
        let mut reconciler = loaded(&provider);
        reconciler.record_destination("P");
        select(&mut reconciler, &["3"]);

        let outcome = reconciler.move_selected(&provider).unwrap();

        assert_eq!((outcome.moved, outcome.failed), (0, 1));
        assert_eq!(ids(&reconciler), vec!["1", "2", "3", "4"]);
        assert_eq!(
            provider.calls(),
            vec![
                Call::AddToPlaylist {
                    video_id: "3".into(),
                    playlist_id: "P".into()
                },
                Call::RemoveLike {
                    video_id: "3".into()
                },
            ]
        );
    }

    #[test]
    fn removes_exactly_the_succeeded_videos_in_any_order() {
        let provider = ScriptedProvider::new()
            .with_playlists(vec![Playlist::new("P", "Keepers")])
            .with_liked((1..=8).map(|n| video(&n.to_string())).collect())
            .failing_add("5")
            .failing_unlike("2");
        let mut reconciler = loaded(&provider);
        reconciler.record_destination("P");
        select(&mut reconciler, &["8", "1", "5", "2", "6", "3"]);

        let outcome = reconciler.move_selected(&provider).unwrap();

        assert_eq!((outcome.moved, outcome.failed), (4, 2));
        assert_eq!(ids(&reconciler), vec!["2", "4", "5", "7"]);
    }

    #[test]
    fn moving_everything_empties_the_catalog() {
        let provider = abcd();
        let mut reconciler = loaded(&provider);
        reconciler.record_destination("Q");
        select(&mut reconciler, &["1", "2", "3", "4"]);

        let outcome = reconciler.move_selected(&provider).unwrap();

        assert_eq!(outcome.moved, 4);
        assert!(reconciler.liked_videos().is_empty());
        assert!(reconciler.preview().is_none());
        assert_eq!(provider.mutation_count(), 8);
    }

    #[test]
    fn empty_selection_is_rejected_without_remote_calls() {
        let provider = abcd();
        let mut reconciler = loaded(&provider);
        reconciler.record_destination("P");
        reconciler.record_selection(Vec::new(), None);

        let result = reconciler.move_selected(&provider);

        assert_eq!(result, Err(MoveError::NoVideosChosen));
        assert_eq!(result.unwrap_err().to_string(), "Please select at least one video");
        assert_eq!(provider.mutation_count(), 0);
        assert_eq!(ids(&reconciler), vec!["1", "2", "3", "4"]);
        assert_eq!(reconciler.destination().map(|p| p.id.as_str()), Some("P"));
        assert!(reconciler.last_outcome().is_none());
    }

    #[test]
    fn missing_destination_is_rejected_without_touching_state() {
        let provider = abcd();
        let mut reconciler = loaded(&provider);
        select(&mut reconciler, &["2", "3"]);

        let result = reconciler.move_selected(&provider);

        assert_eq!(result, Err(MoveError::NoPlaylistChosen));
        assert!(provider.calls().is_empty());
        assert_eq!(reconciler.selection_len(), 2);
        assert_eq!(ids(&reconciler), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn destination_is_checked_before_selection() {
        let provider = abcd();
        let mut reconciler = loaded(&provider);
        reconciler.record_selection(Vec::new(), None);

        assert_eq!(
            reconciler.move_selected(&provider),
            Err(MoveError::NoPlaylistChosen)
        );
    }

    #[test]
    fn total_failure_still_clears_selection() {
        let provider = abcd().failing_add("1").failing_add("2");
        let mut reconciler = loaded(&provider);
        reconciler.record_destination("P");
        select(&mut reconciler, &["1", "2"]);

        let outcome = reconciler.move_selected(&provider).unwrap();

        assert_eq!((outcome.moved, outcome.failed), (0, 2));
        assert_eq!(reconciler.selection_len(), 0);
        assert_eq!(reconciler.preview().map(|v| v.id.as_str()), Some("2"));
        assert_eq!(reconciler.last_outcome(), Some(&outcome));
    }

    #[test]
    fn preview_survives_when_it_points_at_a_retained_video() {
        let provider = abcd();
        let mut reconciler = loaded(&provider);
        reconciler.record_destination("P");
        reconciler.record_selection(vec!["2".to_string()], Some("3".to_string()));

        reconciler.move_selected(&provider).unwrap();

        assert_eq!(reconciler.preview().map(|v| v.id.as_str()), Some("3"));
    }

    #[test]
    fn preview_is_cleared_when_its_video_moves() {
        let provider = abcd();
        let mut reconciler = loaded(&provider);
        reconciler.record_destination("P");
        select(&mut reconciler, &["3"]);

        reconciler.move_selected(&provider).unwrap();

        assert!(reconciler.preview().is_none());
    }

    #[test]
    fn selection_ignores_unknown_ids_and_empty_clears_preview() {
        let provider = abcd();
        let mut reconciler = loaded(&provider);

        reconciler.record_selection(
            vec!["2".to_string(), "nope".to_string()],
            Some("2".to_string()),
        );
        assert_eq!(reconciler.selection_len(), 1);
        assert_eq!(reconciler.preview().map(|v| v.id.as_str()), Some("2"));

        reconciler.record_selection(Vec::new(), Some("2".to_string()));
        assert_eq!(reconciler.selection_len(), 0);
        assert!(reconciler.preview().is_none());
    }

    #[test]
    fn selection_without_last_touched_keeps_preview() {
        let provider = abcd();
        let mut reconciler = loaded(&provider);

        reconciler.record_selection(vec!["3".to_string(), "4".to_string()], None);

        assert_eq!(reconciler.preview().map(|v| v.id.as_str()), Some("1"));
        let selected: Vec<&str> = reconciler
            .selected_videos()
            .iter()
            .map(|v| v.id.as_str())
            .collect();
        assert_eq!(selected, vec!["3", "4"]);
    }

    #[test]
    fn unknown_destination_is_ignored() {
        let provider = abcd();
        let mut reconciler = loaded(&provider);
        reconciler.record_destination("P");

        reconciler.record_destination("gone");

        assert_eq!(reconciler.destination().map(|p| p.id.as_str()), Some("P"));
    }

    #[test]
    fn failed_second_page_keeps_previous_snapshot() {
        let good = abcd();
        let mut reconciler = loaded(&good);
        reconciler.record_destination("P");

        let flaky = ScriptedProvider::new()
            .with_playlists(vec![Playlist::new("R", "Other")])
            .with_liked(vec![video("9")])
            .with_liked_page(Err("connection reset"));

        let err = reconciler.load(&flaky).unwrap_err();

        assert!(matches!(err, LoadError::LikedVideos(_)));
        assert_eq!(
            flaky.calls(),
            vec![Call::ListPlaylists, Call::ListLikedPage(0), Call::ListLikedPage(1)]
        );
        assert_eq!(ids(&reconciler), vec!["1", "2", "3", "4"]);
        assert_eq!(reconciler.playlists().len(), 2);
        assert_eq!(reconciler.destination().map(|p| p.id.as_str()), Some("P"));
    }

    #[test]
    fn failed_playlist_load_skips_liked_videos() {
        let provider = ScriptedProvider::new()
            .failing_playlists("401 Unauthorized")
            .with_liked(vec![video("1")]);
        let mut reconciler = Reconciler::new();

        let err = reconciler.load(&provider).unwrap_err();

        assert!(err.to_string().contains("401 Unauthorized"));
        assert_eq!(provider.calls(), vec![Call::ListPlaylists]);
        assert!(reconciler.liked_videos().is_empty());
    }

    #[test]
    fn load_accumulates_every_page_and_drops_duplicates() {
        let provider = ScriptedProvider::new()
            .with_liked(vec![video("1"), video("2")])
            .with_liked(vec![video("2"), video("3")])
            .with_liked(vec![video("4")]);
        let mut reconciler = Reconciler::new();

        let summary = reconciler.load(&provider).unwrap();

        assert_eq!(ids(&reconciler), vec!["1", "2", "3", "4"]);
        assert_eq!(
            summary,
            LoadSummary {
                playlists: 0,
                liked_videos: 4
            }
        );
    }

    #[test]
    fn refresh_keeps_destination_only_if_still_listed() {
        let provider = abcd();
        let mut reconciler = loaded(&provider);
        reconciler.record_destination("Q");

        let renamed = ScriptedProvider::new()
            .with_playlists(vec![Playlist::new("Q", "Later (renamed)")])
            .with_liked(vec![video("1")]);
        reconciler.load(&renamed).unwrap();
        assert_eq!(
            reconciler.destination().map(|p| p.title.as_str()),
            Some("Later (renamed)")
        );

        let without_q = ScriptedProvider::new().with_playlists(vec![Playlist::new("P", "Keepers")]);
        reconciler.load(&without_q).unwrap();
        assert!(reconciler.destination().is_none());
        assert!(reconciler.preview().is_none());
        assert_eq!(reconciler.selection_len(), 0);
    }
}
