//! Audio engine for a terminal music player.
//!
//! The crate owns the full playback path: a command-driven player state
//! machine on a dedicated audio-loop thread, a symphonia decode pipeline
//! resampled to a fixed 44.1 kHz stereo S16 output, a ten-band biquad
//! equalizer applied inline, a three-band FFT analyzer feeding a spectrum
//! visualizer, and a cache-first synced-lyrics lookup.
//!
//! The UI talks to the engine through two narrow surfaces: it drives it with
//! a [`PlayerHandle`] (enqueue-only, never blocks beyond queue admission) and
//! observes it through an [`EventListener`] implementation.
//!
//! ```no_run
//! use std::sync::Arc;
//! use resonance::{EventListener, Player};
//! # use resonance::{error::Error, model::{CurrentInfo, Song}};
//! # struct Ui;
//! # impl EventListener for Ui {
//! #     fn on_song_info(&self, _: Song) {}
//! #     fn on_song_state(&self, _: CurrentInfo) {}
//! #     fn on_audio_raw(&self, _: &[f64]) {}
//! #     fn on_clear_song_info(&self) {}
//! #     fn on_error(&self, _: Error) {}
//! # }
//! # fn main() -> Result<(), resonance::error::Error> {
//! let ui: Arc<dyn EventListener> = Arc::new(Ui);
//! let player = Player::spawn(Arc::downgrade(&ui))?;
//! let handle = player.handle();
//! handle.play_file("/music/track.flac");
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod error;
pub mod lyrics;
pub mod model;
pub mod util;

pub use audio::{Command, EventListener, Player, PlayerHandle, SpectrumAnalyzer};
pub use error::Error;
pub use lyrics::{LyricsFinder, LyricsLine};
pub use model::{AudioFilter, CurrentInfo, EqualizerPreset, MediaState, Song, Volume};
