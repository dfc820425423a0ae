use std::path::Path;
use std::sync::{mpsc, Arc, Weak};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use super::analyzer::{SpectrumAnalyzer, DEFAULT_BARS};
use super::channel::CommandQueue;
use super::command::Command;
use super::decoder::SymphoniaDecoder;
use super::sink::{CpalSink, Playback};
use crate::error::{Error, Result};
use crate::model::{CurrentInfo, EqualizerPreset, MediaState, Song, Volume};

/// Notifications fired by the audio loop toward the UI.
///
/// All calls are fire-and-forget and must not block for longer than a sink
/// period: implementations are expected to post to their own event queue and
/// must never call back into the player from inside a notification.
pub trait EventListener: Send + Sync {
    /// A song was opened successfully; fired before its first chunk plays.
    fn on_song_info(&self, song: Song);
    /// Position update or media-state transition.
    fn on_song_state(&self, info: CurrentInfo);
    /// One analyzer bar vector per decoded chunk.
    fn on_audio_raw(&self, bars: &[f64]);
    /// The current song was released; fired before returning to idle.
    fn on_clear_song_info(&self);
    fn on_error(&self, error: Error);
}

/// Enqueue-only handle used by the UI/controller threads.
///
/// Every method maps one-to-one onto a command; none of them blocks beyond
/// queue admission and none of them can fail.
#[derive(Clone)]
pub struct PlayerHandle {
    queue: Arc<CommandQueue>,
}

impl PlayerHandle {
    pub fn play_file(&self, path: impl AsRef<Path>) {
        self.queue.enqueue(Command::Play(Song::from_path(path)));
    }

    /// Stop playback and drop the current song. The listener receives the
    /// song-cleared notification before the loop goes idle.
    pub fn clear_current_song(&self) {
        self.queue.enqueue(Command::Stop);
    }

    pub fn pause_or_resume(&self) {
        self.queue.enqueue(Command::PauseOrResume);
    }

    pub fn stop(&self) {
        self.queue.enqueue(Command::Stop);
    }

    pub fn set_volume(&self, volume: Volume) {
        self.queue.enqueue(Command::SetVolume(volume));
    }

    pub fn resize_analysis_output(&self, bars: usize) {
        self.queue.enqueue(Command::ResizeAnalysis(bars));
    }

    pub fn seek_forward(&self, seconds: u32) {
        self.queue.enqueue(Command::SeekForward(seconds));
    }

    pub fn seek_backward(&self, seconds: u32) {
        self.queue.enqueue(Command::SeekBackward(seconds));
    }

    pub fn apply_filters(&self, preset: EqualizerPreset) {
        self.queue.enqueue(Command::UpdateFilters(preset));
    }

    pub fn is_playing(&self) -> bool {
        self.queue.is_playing()
    }

    /// Irreversibly shuts the audio loop down.
    pub fn exit(&self) {
        self.queue.notify_exit();
    }
}

/// Owner of the audio-loop thread and everything running on it.
///
/// The sink, the per-song decoder and the analyzer are touched exclusively by
/// the loop thread; producers reach it only through the [`PlayerHandle`]
/// command queue. Dropping the player signals exit and joins the thread.
pub struct Player {
    queue: Arc<CommandQueue>,
    thread: Option<JoinHandle<()>>,
}

impl Player {
    /// Spawns the audio loop on the real output device. Fails with
    /// [`Error::SetupAudioParams`] when the device cannot be configured.
    pub fn spawn(listener: Weak<dyn EventListener>) -> Result<Self> {
        Self::spawn_with(CpalSink::configure, listener)
    }

    /// Spawns the audio loop over any [`Playback`] realization. The factory
    /// runs on the loop thread itself, so the sink never has to cross
    /// threads; its result is reported back before this function returns.
    pub fn spawn_with<S, F>(make_sink: F, listener: Weak<dyn EventListener>) -> Result<Self>
    where
        S: Playback,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let queue = Arc::new(CommandQueue::new());
        let loop_queue = Arc::clone(&queue);
        let (init_tx, init_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("audio-loop".into())
            .spawn(move || {
                let sink = match make_sink() {
                    Ok(sink) => {
                        let _ = init_tx.send(Ok(()));
                        sink
                    }
                    Err(err) => {
                        loop_queue.notify_exit();
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                };
                AudioLoop {
                    queue: loop_queue,
                    listener,
                    sink,
                    analyzer: SpectrumAnalyzer::new(DEFAULT_BARS),
                    volume: Volume::default(),
                    preset: EqualizerPreset::custom(),
                }
                .run();
            })
            .map_err(|_| Error::Unknown)?;

        match init_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                queue,
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => Err(Error::Unknown),
        }
    }

    pub fn handle(&self) -> PlayerHandle {
        PlayerHandle {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.queue.notify_exit();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// How a song left the inner decode loop.
enum SongOutcome {
    /// Back to idle, wait for the next command.
    Idle,
    /// A new Play arrived; start it without going through the queue again.
    Replace(Song),
    Exit,
}

enum LoopControl {
    Continue,
    Break(SongOutcome),
}

struct AudioLoop<S: Playback> {
    queue: Arc<CommandQueue>,
    listener: Weak<dyn EventListener>,
    sink: S,
    analyzer: SpectrumAnalyzer,
    /// Volume and preset survive across songs and idle periods.
    volume: Volume,
    preset: EqualizerPreset,
}

impl<S: Playback> AudioLoop<S> {
    fn run(mut self) {
        info!("Audio loop started");
        let mut pending: Option<Song> = None;

        loop {
            let command = match pending.take() {
                Some(song) => Command::Play(song),
                None => match self.queue.dequeue() {
                    Some(command) => command,
                    None => break,
                },
            };
            debug!("Idle loop received command {}", command.name());

            match command {
                Command::Play(song) => match self.play_song(song) {
                    SongOutcome::Idle => {}
                    SongOutcome::Replace(next) => pending = Some(next),
                    SongOutcome::Exit => break,
                },
                Command::SetVolume(volume) => self.volume = volume,
                Command::UpdateFilters(preset) => self.preset = preset,
                Command::ResizeAnalysis(bars) => self.analyzer = SpectrumAnalyzer::new(bars),
                Command::Exit => break,
                // Without a song these have nothing to act on.
                Command::PauseOrResume
                | Command::Stop
                | Command::SeekForward(_)
                | Command::SeekBackward(_)
                | Command::None => {}
            }
        }

        self.sink.stop();
        self.queue.set_playing(false);
        self.queue.notify_exit();
        info!("Audio loop exiting");
    }

    fn play_song(&mut self, song: Song) -> SongOutcome {
        let (mut decoder, mut song) = match SymphoniaDecoder::open(&song.path) {
            Ok(opened) => opened,
            Err(err) => {
                warn!("Could not open {}: {err}", song.path.display());
                self.notify(|l| l.on_error(err));
                return SongOutcome::Idle;
            }
        };
        decoder.set_volume(self.volume);
        decoder.update_filters(&self.preset);

        info!(
            "Playing {} ({} ch, {} Hz, {:.1} s)",
            song.display_title(),
            song.num_channels,
            song.sample_rate,
            song.duration_secs
        );

        song.current = CurrentInfo {
            position_secs: 0.0,
            state: MediaState::Play,
        };
        self.notify(|l| l.on_song_info(song.clone()));
        self.notify(|l| l.on_song_state(song.current));

        self.sink.resume();
        self.queue.set_playing(true);
        let period = self.sink.period_size();
        let mut bars = vec![0.0; self.analyzer.output_size()];

        let outcome = 'decode: loop {
            while let Some(command) = self.queue.try_dequeue() {
                match self.apply_during_play(command, &mut decoder, &mut song) {
                    LoopControl::Continue => {}
                    LoopControl::Break(outcome) => break 'decode outcome,
                }
            }
            if self.queue.is_exiting() {
                break SongOutcome::Exit;
            }

            match decoder.next_chunk(period) {
                Ok(Some(chunk)) => {
                    if let Err(err) = self.sink.write(&chunk.samples) {
                        warn!("Playback sink failed; shutting the player down");
                        self.notify(|l| l.on_error(err));
                        self.queue.notify_exit();
                        break SongOutcome::Exit;
                    }

                    if bars.len() != self.analyzer.output_size() {
                        bars = vec![0.0; self.analyzer.output_size()];
                    }
                    let doubles: Vec<f64> =
                        chunk.samples.iter().map(|&s| f64::from(s)).collect();
                    self.analyzer.execute(&doubles, &mut bars);
                    self.notify(|l| l.on_audio_raw(&bars));

                    let mut position = song.current.position_secs + chunk.position_delta;
                    if song.duration_secs > 0.0 {
                        position = position.min(song.duration_secs);
                    }
                    song.current.position_secs = position;
                    self.notify(|l| l.on_song_state(song.current));
                }
                Ok(None) => {
                    song.current.state = MediaState::Finished;
                    self.notify(|l| l.on_song_state(song.current));
                    break SongOutcome::Idle;
                }
                Err(err) => {
                    warn!("Decoder failed mid-stream: {err}");
                    self.notify(|l| l.on_error(err));
                    break SongOutcome::Idle;
                }
            }
        };

        self.queue.set_playing(false);
        if !matches!(outcome, SongOutcome::Exit) {
            // Leave the device silent between songs without tearing it down.
            self.sink.pause();
        }
        self.notify(|l| l.on_clear_song_info());
        outcome
    }

    fn apply_during_play(
        &mut self,
        command: Command,
        decoder: &mut SymphoniaDecoder,
        song: &mut Song,
    ) -> LoopControl {
        debug!("Decode loop received command {}", command.name());
        match command {
            Command::PauseOrResume => self.pause_until_resumed(decoder, song),
            Command::Stop => {
                song.current.state = MediaState::Stop;
                self.notify(|l| l.on_song_state(song.current));
                LoopControl::Break(SongOutcome::Idle)
            }
            Command::Play(next) => LoopControl::Break(SongOutcome::Replace(next)),
            Command::Exit => LoopControl::Break(SongOutcome::Exit),
            Command::SetVolume(volume) => {
                self.volume = volume;
                decoder.set_volume(volume);
                LoopControl::Continue
            }
            Command::UpdateFilters(preset) => {
                decoder.update_filters(&preset);
                self.preset = preset;
                LoopControl::Continue
            }
            Command::ResizeAnalysis(bars) => {
                self.analyzer = SpectrumAnalyzer::new(bars);
                LoopControl::Continue
            }
            Command::SeekForward(seconds) => self.seek(decoder, song, f64::from(seconds)),
            Command::SeekBackward(seconds) => self.seek(decoder, song, -f64::from(seconds)),
            Command::None => LoopControl::Continue,
        }
    }

    /// Blocks on the command queue until playback resumes or the song is
    /// torn down; every command observed meanwhile is still applied.
    fn pause_until_resumed(
        &mut self,
        decoder: &mut SymphoniaDecoder,
        song: &mut Song,
    ) -> LoopControl {
        self.sink.pause();
        song.current.state = MediaState::Pause;
        self.notify(|l| l.on_song_state(song.current));

        loop {
            let Some(command) = self.queue.dequeue() else {
                return LoopControl::Break(SongOutcome::Exit);
            };
            debug!("Paused loop received command {}", command.name());
            match command {
                Command::PauseOrResume => {
                    self.sink.resume();
                    song.current.state = MediaState::Play;
                    self.notify(|l| l.on_song_state(song.current));
                    return LoopControl::Continue;
                }
                Command::Stop => {
                    song.current.state = MediaState::Stop;
                    self.notify(|l| l.on_song_state(song.current));
                    return LoopControl::Break(SongOutcome::Idle);
                }
                Command::Play(next) => {
                    return LoopControl::Break(SongOutcome::Replace(next));
                }
                Command::Exit => return LoopControl::Break(SongOutcome::Exit),
                Command::SetVolume(volume) => {
                    self.volume = volume;
                    decoder.set_volume(volume);
                }
                Command::UpdateFilters(preset) => {
                    decoder.update_filters(&preset);
                    self.preset = preset;
                }
                Command::ResizeAnalysis(bars) => {
                    self.analyzer = SpectrumAnalyzer::new(bars);
                }
                Command::SeekForward(seconds) => {
                    if let LoopControl::Break(outcome) =
                        self.seek(decoder, song, f64::from(seconds))
                    {
                        return LoopControl::Break(outcome);
                    }
                }
                Command::SeekBackward(seconds) => {
                    if let LoopControl::Break(outcome) =
                        self.seek(decoder, song, -f64::from(seconds))
                    {
                        return LoopControl::Break(outcome);
                    }
                }
                Command::None => {}
            }
        }
    }

    /// Re-positions the decoder at `position + offset`, clamped to the song
    /// bounds. Seeking past the end finishes the song.
    fn seek(
        &mut self,
        decoder: &mut SymphoniaDecoder,
        song: &mut Song,
        offset: f64,
    ) -> LoopControl {
        let target = song.current.position_secs + offset;
        if song.duration_secs > 0.0 && target >= song.duration_secs {
            song.current.state = MediaState::Finished;
            self.notify(|l| l.on_song_state(song.current));
            return LoopControl::Break(SongOutcome::Idle);
        }

        match decoder.seek(target.max(0.0)) {
            Ok(actual) => {
                song.current.position_secs = actual;
                self.notify(|l| l.on_song_state(song.current));
                LoopControl::Continue
            }
            Err(err) => {
                warn!("Seek failed: {err}");
                self.notify(|l| l.on_error(err));
                LoopControl::Break(SongOutcome::Idle)
            }
        }
    }

    fn notify(&self, f: impl FnOnce(&dyn EventListener)) {
        if let Some(listener) = self.listener.upgrade() {
            f(listener.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex, Weak};

    use super::{EventListener, Player};
    use crate::error::{Error, Result};
    use crate::audio::sink::Playback;
    use crate::model::{CurrentInfo, Song};

    struct NullSink;

    impl Playback for NullSink {
        fn pause(&mut self) {}
        fn resume(&mut self) {}
        fn stop(&mut self) {}
        fn write(&mut self, _samples: &[i16]) -> Result<()> {
            Ok(())
        }
        fn period_size(&self) -> usize {
            1_024
        }
        fn set_volume(&mut self, _volume: f32) {}
        fn volume(&self) -> f32 {
            1.0
        }
    }

    #[derive(Default)]
    struct ErrorSpy {
        errors: Mutex<Vec<Error>>,
    }

    impl EventListener for ErrorSpy {
        fn on_song_info(&self, _song: Song) {}
        fn on_song_state(&self, _info: CurrentInfo) {}
        fn on_audio_raw(&self, _bars: &[f64]) {}
        fn on_clear_song_info(&self) {}
        fn on_error(&self, error: Error) {
            self.errors.lock().unwrap().push(error);
        }
    }

    fn no_listener() -> Weak<dyn EventListener> {
        Weak::<ErrorSpy>::new()
    }

    #[test]
    fn sink_setup_failure_aborts_spawn() {
        let result = Player::spawn_with(
            || -> Result<NullSink> { Err(Error::SetupAudioParams) },
            no_listener(),
        );
        assert!(matches!(result, Err(Error::SetupAudioParams)));
    }

    #[test]
    fn drop_joins_the_loop_thread() {
        let player = Player::spawn_with(|| Ok(NullSink), no_listener()).unwrap();
        let handle = player.handle();
        assert!(!handle.is_playing());
        drop(player);
        // After drop the queue is poisoned for good; producers must not hang.
        handle.stop();
        handle.exit();
    }

    #[test]
    fn open_error_reaches_the_listener_and_loop_stays_alive() {
        let spy = Arc::new(ErrorSpy::default());
        let weak: Weak<ErrorSpy> = Arc::downgrade(&spy);
        let player = Player::spawn_with(|| Ok(NullSink), weak).unwrap();
        let handle = player.handle();

        handle.play_file("/definitely/not/a/file.mp3");

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            if spy
                .errors
                .lock()
                .unwrap()
                .contains(&Error::InvalidFile)
            {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "listener never saw the open error"
            );
            std::thread::yield_now();
        }

        // The loop is still accepting commands afterwards.
        handle.set_volume(crate::model::Volume::new(0.5));
        drop(player);
    }
}
