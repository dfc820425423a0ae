use std::path::{Path, PathBuf};

/// Media state of the song currently owned by the player.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MediaState {
    #[default]
    Empty,
    Play,
    Pause,
    Stop,
    Finished,
}

/// Mutable slice of a [`Song`] that changes while it plays.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CurrentInfo {
    /// Playback position in seconds, always within `[0, duration]`.
    pub position_secs: f64,
    pub state: MediaState,
}

/// Metadata filled by the decoder when a file is opened.
///
/// A `Song` created with [`Song::from_path`] carries only the file path; the
/// decoder fills the remaining fields on open and the player keeps the
/// [`CurrentInfo`] up to date while the song plays.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Song {
    pub path: PathBuf,
    pub artist: Option<String>,
    pub title: Option<String>,
    /// Channel count of the input stream (1 or 2), not of the output.
    pub num_channels: u16,
    /// Sample rate of the input stream in Hz.
    pub sample_rate: u32,
    /// Estimated bit rate in bits per second.
    pub bit_rate: Option<u32>,
    pub bit_depth: Option<u32>,
    pub duration_secs: f64,
    pub current: CurrentInfo,
}

impl Song {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Title when tagged, otherwise the file stem.
    pub fn display_title(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        self.path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("unknown")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{MediaState, Song};

    #[test]
    fn from_path_starts_empty() {
        let song = Song::from_path("/music/song.flac");
        assert_eq!(song.current.state, MediaState::Empty);
        assert_eq!(song.current.position_secs, 0.0);
        assert_eq!(song.num_channels, 0);
    }

    #[test]
    fn display_title_falls_back_to_file_stem() {
        let mut song = Song::from_path("/music/live_at_pompeii.mp3");
        assert_eq!(song.display_title(), "live_at_pompeii");

        song.title = Some("Echoes".to_string());
        assert_eq!(song.display_title(), "Echoes");
    }
}
