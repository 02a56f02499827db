//! Line-oriented terminal front end over the [`Reconciler`].

use std::fmt;
use std::io::{self, BufRead, Write};
use std::process;

use log::warn;

use crate::catalog::{CatalogProvider, Video};
use crate::reconciler::Reconciler;

const HELP: &str = "\
Commands (row numbers as listed):
  playlists | p          list your playlists
  videos | v             list your liked videos (* = selected)
  select | s <n>...      select these videos; the last one is previewed
  toggle | t <n>         add or remove one video from the selection
  clear                  deselect every video
  dest | d <n>           choose the destination playlist
  preview                show the previewed video
  watch | w              open the previewed video in a browser
  move | m               move selected videos to the destination playlist
  refresh | r            reload playlists and liked videos
  status                 show the current choices
  help | h               show this help
  quit | q               exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Playlists,
    Videos,
    Select(Vec<usize>),
    Toggle(usize),
    Clear,
    Destination(usize),
    Preview,
    Watch,
    Move,
    Refresh,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    Unknown(String),
    MissingRow(&'static str),
    BadRow(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "Type a command, or `help` for the list"),
            ParseError::Unknown(word) => write!(f, "Unknown command `{word}`; try `help`"),
            ParseError::MissingRow(command) => write!(f, "`{command}` needs a row number"),
            ParseError::BadRow(raw) => write!(f, "`{raw}` is not a row number"),
        }
    }
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Err(ParseError::Empty);
        };
        let rest: Vec<&str> = words.collect();

        let command = match head.to_ascii_lowercase().as_str() {
            "playlists" | "p" => Command::Playlists,
            "videos" | "v" => Command::Videos,
            "select" | "s" => {
                let rows = parse_rows(&rest)?;
                if rows.is_empty() {
                    return Err(ParseError::MissingRow("select"));
                }
                Command::Select(rows)
            }
            "toggle" | "t" => Command::Toggle(single_row(&rest, "toggle")?),
            "clear" => Command::Clear,
            "dest" | "d" => Command::Destination(single_row(&rest, "dest")?),
            "preview" => Command::Preview,
            "watch" | "w" => Command::Watch,
            "move" | "m" => Command::Move,
            "refresh" | "r" => Command::Refresh,
            "status" => Command::Status,
            "help" | "h" | "?" => Command::Help,
            "quit" | "q" | "exit" => Command::Quit,
            _ => return Err(ParseError::Unknown(head.to_string())),
        };
        Ok(command)
    }
}

fn parse_rows(words: &[&str]) -> Result<Vec<usize>, ParseError> {
    words
        .iter()
        .flat_map(|word| word.split(','))
        .filter(|part| !part.is_empty())
        .map(|part| match part.parse::<usize>() {
            Ok(row) if row > 0 => Ok(row),
            _ => Err(ParseError::BadRow(part.to_string())),
        })
        .collect()
}

fn single_row(words: &[&str], command: &'static str) -> Result<usize, ParseError> {
    parse_rows(words)?
        .first()
        .copied()
        .ok_or(ParseError::MissingRow(command))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Opens a URL in the user's browser.
pub type Opener = fn(&str) -> io::Result<()>;

pub struct Session<'a, W: Write> {
    reconciler: Reconciler,
    provider: &'a dyn CatalogProvider,
    out: W,
    opener: Opener,
}

impl<'a, W: Write> Session<'a, W> {
    pub fn new(provider: &'a dyn CatalogProvider, out: W) -> Self {
        Self {
            reconciler: Reconciler::new(),
            provider,
            out,
            opener: open_in_browser,
        }
    }

    #[cfg(test)]
    pub fn with_opener(mut self, opener: Opener) -> Self {
        self.opener = opener;
        self
    }

    #[cfg(test)]
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Reads commands until `quit` or end of input.
    pub fn run<R: BufRead>(&mut self, input: R) -> io::Result<()> {
        writeln!(self.out, "Type `help` for the list of commands.")?;
        self.prompt()?;
        for line in input.lines() {
            let line = line?;
            let flow = match Command::parse(&line) {
                Ok(command) => self.execute(command)?,
                Err(ParseError::Empty) => Flow::Continue,
                Err(err) => {
                    writeln!(self.out, "{err}")?;
                    Flow::Continue
                }
            };
            if flow == Flow::Quit {
                return Ok(());
            }
            self.prompt()?;
        }
        Ok(())
    }

    pub fn execute(&mut self, command: Command) -> io::Result<Flow> {
        match command {
            Command::Playlists => self.show_playlists()?,
            Command::Videos => self.show_videos()?,
            Command::Select(rows) => self.select(&rows)?,
            Command::Toggle(row) => self.toggle(row)?,
            Command::Clear => {
                self.reconciler.record_selection(Vec::new(), None);
                self.show_status()?;
            }
            Command::Destination(row) => self.choose_destination(row)?,
            Command::Preview => self.show_preview()?,
            Command::Watch => self.watch()?,
            Command::Move => self.move_selected()?,
            Command::Refresh => self.refresh()?,
            Command::Status => self.show_status()?,
            Command::Help => writeln!(self.out, "{HELP}")?,
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    pub fn refresh(&mut self) -> io::Result<()> {
        writeln!(self.out, "Loading data from YouTube...")?;
        self.out.flush()?;
        match self.reconciler.load(self.provider) {
            Ok(summary) => {
                writeln!(self.out, "{summary}")?;
                self.show_preview()
            }
            Err(err) => {
                writeln!(self.out, "{err}")?;
                writeln!(self.out, "Error loading data")
            }
        }
    }

    fn show_playlists(&mut self) -> io::Result<()> {
        let playlists = self.reconciler.playlists();
        if playlists.is_empty() {
            return writeln!(self.out, "No playlists loaded.");
        }
        let chosen = self.reconciler.destination().map(|p| p.id.as_str());
        for (index, playlist) in playlists.iter().enumerate() {
            let marker = if chosen == Some(playlist.id.as_str()) { '*' } else { ' ' };
            writeln!(self.out, "{marker} {:>3}. {}", index + 1, playlist.title)?;
        }
        Ok(())
    }

    fn show_videos(&mut self) -> io::Result<()> {
        let videos = self.reconciler.liked_videos();
        if videos.is_empty() {
            return writeln!(self.out, "No liked videos loaded.");
        }
        for (index, video) in videos.iter().enumerate() {
            let marker = if self.reconciler.is_selected(&video.id) { '*' } else { ' ' };
            writeln!(self.out, "{marker} {:>4}. {}", index + 1, video.title)?;
        }
        Ok(())
    }

    fn select(&mut self, rows: &[usize]) -> io::Result<()> {
        let mut ids = Vec::with_capacity(rows.len());
        for &row in rows {
            let Some(video) = self.video_at(row) else {
                return self.no_such_row(row);
            };
            ids.push(video.id.clone());
        }
        let last_touched = ids.last().cloned();
        self.reconciler.record_selection(ids, last_touched);
        self.show_status()?;
        self.show_preview()
    }

    fn toggle(&mut self, row: usize) -> io::Result<()> {
        let Some(id) = self.video_at(row).map(|video| video.id.clone()) else {
            return self.no_such_row(row);
        };

        let mut ids: Vec<String> = self
            .reconciler
            .selected_videos()
            .iter()
            .map(|video| video.id.clone())
            .collect();
        // Deselecting hands the preview to the last row still selected.
        let last_touched = if let Some(pos) = ids.iter().position(|selected| *selected == id) {
            ids.remove(pos);
            ids.last().cloned()
        } else {
            ids.push(id.clone());
            Some(id)
        };

        let has_preview = last_touched.is_some();
        self.reconciler.record_selection(ids, last_touched);
        self.show_status()?;
        if has_preview {
            self.show_preview()?;
        }
        Ok(())
    }

    fn choose_destination(&mut self, row: usize) -> io::Result<()> {
        let Some(id) = row
            .checked_sub(1)
            .and_then(|index| self.reconciler.playlists().get(index))
            .map(|playlist| playlist.id.clone())
        else {
            return self.no_such_row(row);
        };
        self.reconciler.record_destination(&id);
        self.show_status()
    }

    fn show_preview(&mut self) -> io::Result<()> {
        let Some(video) = self.reconciler.preview() else {
            return writeln!(self.out, "No video to preview.");
        };
        write!(self.out, "{}", PreviewCard(video))
    }

    fn watch(&mut self) -> io::Result<()> {
        let Some(url) = self.reconciler.preview().map(Video::watch_url) else {
            return writeln!(self.out, "No video to watch.");
        };
        if let Err(err) = (self.opener)(&url) {
            warn!("could not open browser: {err}");
            writeln!(self.out, "Open this URL to watch: {url}")?;
        }
        Ok(())
    }

    fn move_selected(&mut self) -> io::Result<()> {
        match self.reconciler.move_selected(self.provider) {
            Ok(outcome) => writeln!(self.out, "{outcome}"),
            Err(err) => writeln!(self.out, "{err}"),
        }
    }

    fn show_status(&mut self) -> io::Result<()> {
        let playlist = self
            .reconciler
            .destination()
            .map(|p| p.title.as_str())
            .unwrap_or("None");
        writeln!(
            self.out,
            "Selected Playlist: {playlist}    Selected Videos: {} selected",
            self.reconciler.selection_len()
        )?;
        if let Some(outcome) = self.reconciler.last_outcome() {
            writeln!(self.out, "Last move: {outcome}")?;
        }
        Ok(())
    }

    fn video_at(&self, row: usize) -> Option<&Video> {
        row.checked_sub(1)
            .and_then(|index| self.reconciler.liked_videos().get(index))
    }

    fn no_such_row(&mut self, row: usize) -> io::Result<()> {
        writeln!(self.out, "There is no row {row}.")
    }

    fn prompt(&mut self) -> io::Result<()> {
        write!(self.out, "> ")?;
        self.out.flush()
    }
}

struct PreviewCard<'a>(&'a Video);

impl fmt::Display for PreviewCard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let video = self.0;
        writeln!(f, "{}", video.title)?;
        if let Some(thumbnail) = &video.thumbnail_url {
            writeln!(f, "Thumbnail: {thumbnail}")?;
        }
        writeln!(f, "Watch on YouTube: {}", video.watch_url())?;
        if !video.description.is_empty() {
            writeln!(f)?;
            writeln!(f, "{}", video.description)?;
        }
        Ok(())
    }
}

/// Hands the URL to the platform's default opener.
pub fn open_in_browser(url: &str) -> io::Result<()> {
    let mut command = if cfg!(target_os = "macos") {
        process::Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut command = process::Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else {
        process::Command::new("xdg-open")
    };

    let status = command.arg(url).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("browser opener exited with {status}")))
    }
}
