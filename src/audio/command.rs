use std::mem;

use crate::model::{EqualizerPreset, Song, Volume};

/// Commands handled by the audio-loop thread.
///
/// Equality compares the identifier only, never the payload, so a queue can
/// be inspected for "is a Stop pending" without caring which song or volume
/// a command carries.
#[derive(Clone, Debug, Default)]
pub enum Command {
    #[default]
    None,
    Play(Song),
    PauseOrResume,
    Stop,
    /// Seek forward by the given number of seconds.
    SeekForward(u32),
    /// Seek backward by the given number of seconds.
    SeekBackward(u32),
    SetVolume(Volume),
    UpdateFilters(EqualizerPreset),
    /// Rebuild the analyzer for a new number of bars per channel.
    ResizeAnalysis(usize),
    Exit,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::None => "None",
            Command::Play(_) => "Play",
            Command::PauseOrResume => "PauseOrResume",
            Command::Stop => "Stop",
            Command::SeekForward(_) => "SeekForward",
            Command::SeekBackward(_) => "SeekBackward",
            Command::SetVolume(_) => "SetVolume",
            Command::UpdateFilters(_) => "UpdateFilters",
            Command::ResizeAnalysis(_) => "ResizeAnalysis",
            Command::Exit => "Exit",
        }
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

impl Eq for Command {}
