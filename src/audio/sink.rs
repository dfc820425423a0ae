use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig, SupportedBufferSize};
use log::{info, warn};
use ringbuf::{
    traits::{Consumer as _, Producer as _, Split},
    HeapProd, HeapRb,
};

use crate::error::{Error, Result};

pub const SAMPLE_RATE: u32 = 44_100;
pub const NUM_CHANNELS: usize = 2;

/// Device-side buffering of roughly a quarter second, matching the fixed
/// output rate.
const RING_FRAMES: usize = (SAMPLE_RATE / 4) as usize;

const DEFAULT_PERIOD_FRAMES: usize = 1_024;

/// Capability over the OS audio output.
///
/// The concrete realization is picked at construction: [`CpalSink`] for the
/// real device, or an alternative realization capturing frames in tests.
/// `write` is blocking: it returns only once every frame has been accepted.
/// The sink-side volume is stored but never applied; the decoder owns the
/// gain applied to samples.
pub trait Playback {
    fn pause(&mut self);
    fn resume(&mut self);
    /// Discards buffered frames and leaves the stream silent.
    fn stop(&mut self);
    /// Blocking write of interleaved stereo S16 samples.
    fn write(&mut self, samples: &[i16]) -> Result<()>;
    /// Preferred frame granularity for writes; the decoder should emit at
    /// most this many frames per chunk.
    fn period_size(&self) -> usize;
    fn set_volume(&mut self, volume: f32);
    fn volume(&self) -> f32;
}

struct SinkShared {
    playing: AtomicBool,
    flush: AtomicBool,
    failed: AtomicBool,
}

/// Playback through the default cpal output device.
///
/// A heap ring buffer sits between the blocking writer (the audio loop) and
/// the device callback. When the ring runs dry the callback injects silence
/// (the single xrun recovery the sink performs) and the writer keeps going,
/// so a starved period is audible but never fatal.
pub struct CpalSink {
    _stream: Stream,
    producer: HeapProd<i16>,
    shared: Arc<SinkShared>,
    period_frames: usize,
    volume: f32,
}

impl CpalSink {
    /// Opens the default output device at the fixed format
    /// (2 ch × 44.1 kHz, device-native sample type).
    pub fn configure() -> Result<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            warn!("No default output device available");
            Error::SetupAudioParams
        })?;

        let default_config = device
            .default_output_config()
            .map_err(|_| Error::SetupAudioParams)?;
        let sample_format = default_config.sample_format();
        let period_frames = match default_config.buffer_size() {
            SupportedBufferSize::Range { min, max } => {
                (DEFAULT_PERIOD_FRAMES as u32).clamp(*min, (*max).max(*min)) as usize
            }
            SupportedBufferSize::Unknown => DEFAULT_PERIOD_FRAMES,
        };

        let config = StreamConfig {
            channels: NUM_CHANNELS as u16,
            sample_rate: SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring = HeapRb::<i16>::new(RING_FRAMES * NUM_CHANNELS);
        let (producer, mut consumer) = ring.split();

        let shared = Arc::new(SinkShared {
            playing: AtomicBool::new(true),
            flush: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        });

        let err_shared = Arc::clone(&shared);
        let err_fn = move |err| {
            warn!("Audio stream error: {err}");
            err_shared.failed.store(true, Ordering::Release);
        };

        let cb_shared = Arc::clone(&shared);
        let stream = match sample_format {
            SampleFormat::F32 => device
                .build_output_stream(
                    &config,
                    move |output: &mut [f32], _| {
                        if !drain_control(&cb_shared, &mut consumer) {
                            output.fill(0.0);
                            return;
                        }
                        for slot in output.iter_mut() {
                            let sample = consumer.try_pop().unwrap_or(0);
                            *slot = sample as f32 / i16::MAX as f32;
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|_| Error::SetupAudioParams)?,
            SampleFormat::I16 => device
                .build_output_stream(
                    &config,
                    move |output: &mut [i16], _| {
                        if !drain_control(&cb_shared, &mut consumer) {
                            output.fill(0);
                            return;
                        }
                        for slot in output.iter_mut() {
                            *slot = consumer.try_pop().unwrap_or(0);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|_| Error::SetupAudioParams)?,
            SampleFormat::U16 => device
                .build_output_stream(
                    &config,
                    move |output: &mut [u16], _| {
                        if !drain_control(&cb_shared, &mut consumer) {
                            output.fill(u16::MAX / 2);
                            return;
                        }
                        for slot in output.iter_mut() {
                            let sample = consumer.try_pop().unwrap_or(0);
                            *slot = (sample as i32 - i16::MIN as i32) as u16;
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|_| Error::SetupAudioParams)?,
            other => {
                warn!("Unsupported output sample format {other:?}; expected f32/i16/u16");
                return Err(Error::SetupAudioParams);
            }
        };

        stream.play().map_err(|_| Error::SetupAudioParams)?;
        info!(
            "Output stream configured: {NUM_CHANNELS} ch, {SAMPLE_RATE} Hz, \
             period {period_frames} frames, format {sample_format:?}"
        );

        Ok(Self {
            _stream: stream,
            producer,
            shared,
            period_frames,
            volume: 1.0,
        })
    }
}

/// Returns false when the callback should emit silence instead of popping
/// samples. A pending flush drains the ring in place.
fn drain_control(shared: &SinkShared, consumer: &mut impl ringbuf::traits::Consumer<Item = i16>) -> bool {
    if shared.flush.swap(false, Ordering::AcqRel) {
        while consumer.try_pop().is_some() {}
    }
    shared.playing.load(Ordering::Acquire)
}

impl Playback for CpalSink {
    fn pause(&mut self) {
        self.shared.playing.store(false, Ordering::Release);
    }

    fn resume(&mut self) {
        self.shared.playing.store(true, Ordering::Release);
    }

    fn stop(&mut self) {
        self.shared.playing.store(false, Ordering::Release);
        self.shared.flush.store(true, Ordering::Release);
    }

    fn write(&mut self, samples: &[i16]) -> Result<()> {
        let mut remaining = samples;
        while !remaining.is_empty() {
            if self.shared.failed.load(Ordering::Acquire) {
                return Err(Error::Unknown);
            }
            let pushed = self.producer.push_slice(remaining);
            remaining = &remaining[pushed..];
            if !remaining.is_empty() {
                // Ring full: the device drains one period in a few ms.
                thread::sleep(Duration::from_millis(2));
            }
        }
        Ok(())
    }

    fn period_size(&self) -> usize {
        self.period_frames
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn volume(&self) -> f32 {
        self.volume
    }
}

#[cfg(test)]
mod tests {
    use super::{NUM_CHANNELS, RING_FRAMES, SAMPLE_RATE};

    #[test]
    fn ring_holds_a_quarter_second() {
        assert_eq!(RING_FRAMES, SAMPLE_RATE as usize / 4);
        assert_eq!(RING_FRAMES * NUM_CHANNELS, 22_050);
    }
}
