use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use log::warn;
use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder as CodecDecoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use super::dsp::FilterChain;
use super::sink::SAMPLE_RATE;
use crate::error::{Error, Result};
use crate::model::{EqualizerPreset, Song, Volume};

/// Input frames handed to the resampler per process call.
const RESAMPLE_CHUNK_FRAMES: usize = 1_024;

/// One buffer of output PCM: interleaved stereo S16 at the fixed output rate,
/// with volume and the filter chain already applied.
pub struct PcmChunk {
    pub samples: Vec<i16>,
    pub frames: usize,
    /// Seconds of playback this chunk advances the position by.
    pub position_delta: f64,
}

/// Streaming decoder for one song.
///
/// Constructed per song on a Play command and dropped when the song ends or
/// is aborted; all codec resources are released on drop. Decoded audio of any
/// input rate and layout comes out as 44.1 kHz stereo through
/// [`SymphoniaDecoder::next_chunk`], a finite sequence the caller stops by
/// simply not pulling the next chunk.
pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn CodecDecoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    input_channels: usize,

    sample_buf: Option<SampleBuffer<f32>>,
    resampler: Option<FftFixedIn<f32>>,
    /// Planar stereo input waiting for the resampler.
    pending: [Vec<f32>; 2],
    /// Resampled stereo frames not yet emitted. Volume and filters are
    /// applied at emission, so updates always land on a chunk boundary.
    ready: VecDeque<(f32, f32)>,
    finished: bool,

    volume: Volume,
    chain: FilterChain,
}

impl SymphoniaDecoder {
    /// Opens the file, selects the first audio track and fills a [`Song`]
    /// with the stream metadata.
    pub fn open(path: &Path) -> Result<(Self, Song)> {
        let file = File::open(path).map_err(|_| Error::InvalidFile)?;
        let file_len = file.metadata().map(|m| m.len()).unwrap_or(0);
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(ext);
        }

        let format_options = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let mut probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_options, &Default::default())
            .map_err(|_| Error::FileNotSupported)?;

        let mut song = Song::from_path(path);
        if let Some(mut metadata) = probed.metadata.get() {
            if let Some(revision) = metadata.skip_to_latest() {
                apply_tags(revision, &mut song);
            }
        }

        let mut format = probed.format;
        if let Some(revision) = format.metadata().current() {
            apply_tags(revision, &mut song);
        }

        let track = format
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(Error::FileNotSupported)?;
        let params = track.codec_params.clone();
        let track_id = track.id;

        // Mono and stereo are the only layouts with a defined mapping onto
        // the stereo output.
        let input_channels = match params.channels.map(|channels| channels.count()) {
            Some(count @ (1 | 2)) => count,
            _ => return Err(Error::UnknownNumOfChannels),
        };

        let sample_rate = params.sample_rate.ok_or(Error::InconsistentHeaderInfo)?;
        if sample_rate == 0 {
            return Err(Error::InconsistentHeaderInfo);
        }

        let duration_secs = match (params.n_frames, params.time_base) {
            (Some(frames), Some(time_base)) => time_to_secs(time_base.calc_time(frames)),
            (Some(frames), None) => frames as f64 / sample_rate as f64,
            _ => 0.0,
        };

        song.num_channels = input_channels as u16;
        song.sample_rate = sample_rate;
        song.bit_depth = params.bits_per_sample;
        song.duration_secs = duration_secs;
        if duration_secs > 0.0 && file_len > 0 {
            song.bit_rate = Some((file_len as f64 * 8.0 / duration_secs) as u32);
        }

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|_| Error::FileNotSupported)?;

        let resampler = if sample_rate != SAMPLE_RATE {
            Some(
                FftFixedIn::new(
                    sample_rate as usize,
                    SAMPLE_RATE as usize,
                    RESAMPLE_CHUNK_FRAMES,
                    1,
                    2,
                )
                .map_err(|_| Error::Unknown)?,
            )
        } else {
            None
        };

        Ok((
            Self {
                format,
                decoder,
                track_id,
                time_base: params.time_base,
                input_channels,
                sample_buf: None,
                resampler,
                pending: [Vec::new(), Vec::new()],
                ready: VecDeque::new(),
                finished: false,
                volume: Volume::default(),
                chain: FilterChain::new(SAMPLE_RATE, EqualizerPreset::custom()),
            },
            song,
        ))
    }

    /// Pulls the next chunk of at most `max_frames` output frames. `None`
    /// marks the end of the stream.
    pub fn next_chunk(&mut self, max_frames: usize) -> Result<Option<PcmChunk>> {
        while self.ready.len() < max_frames && !self.finished {
            self.decode_next_packet()?;
        }

        if self.ready.is_empty() {
            return Ok(None);
        }

        let frames = max_frames.min(self.ready.len());
        let gain = self.volume.gain();
        let mut samples = Vec::with_capacity(frames * 2);
        for _ in 0..frames {
            let (left, right) = self.ready.pop_front().unwrap_or((0.0, 0.0));
            let (left, right) = self.chain.process_frame(left * gain, right * gain);
            samples.push(quantize(left));
            samples.push(quantize(right));
        }

        Ok(Some(PcmChunk {
            samples,
            frames,
            position_delta: frames as f64 / SAMPLE_RATE as f64,
        }))
    }

    /// Coarse-seeks to the given position and returns the actual position.
    /// Filter history is cleared so no stale state bleeds across the jump.
    pub fn seek(&mut self, seconds: f64) -> Result<f64> {
        let target = seconds.max(0.0);
        let time = Time::from(Duration::from_secs_f64(target));
        let seeked = self
            .format
            .seek(
                SeekMode::Coarse,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|_| Error::Unknown)?;

        self.decoder.reset();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
        self.pending[0].clear();
        self.pending[1].clear();
        self.ready.clear();
        self.chain.reset_state();
        self.finished = false;

        Ok(self
            .time_base
            .map(|tb| time_to_secs(tb.calc_time(seeked.actual_ts)))
            .unwrap_or(target))
    }

    pub fn set_volume(&mut self, volume: Volume) {
        self.volume = volume;
    }

    pub fn volume(&self) -> Volume {
        self.volume
    }

    /// Swaps the biquad chain; takes effect on the next chunk. State is
    /// reset only when the preset actually changes.
    pub fn update_filters(&mut self, preset: &EqualizerPreset) {
        self.chain.apply(SAMPLE_RATE, preset);
    }

    fn decode_next_packet(&mut self) -> Result<()> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(_)) => {
                    self.finished = true;
                    self.flush_resampler();
                    return Ok(());
                }
                Err(SymphoniaError::ResetRequired) => return Err(Error::CorruptedData),
                Err(err) => {
                    warn!("Error reading packet: {err}");
                    return Err(Error::CorruptedData);
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(err)) => {
                    // A malformed packet is skippable; the stream may recover.
                    warn!("Skipping undecodable packet: {err}");
                    continue;
                }
                Err(_) => return Err(Error::CorruptedData),
            };

            let spec = *decoded.spec();
            let needed = decoded.capacity() * spec.channels.count();
            if self
                .sample_buf
                .as_ref()
                .map_or(false, |buf| buf.capacity() < needed)
            {
                // A later packet outgrew the reusable buffer.
                self.sample_buf = None;
            }
            let buf = self
                .sample_buf
                .get_or_insert_with(|| SampleBuffer::new(decoded.capacity() as u64, spec));
            buf.copy_interleaved_ref(decoded);

            match self.input_channels {
                1 => {
                    for &sample in buf.samples() {
                        self.pending[0].push(sample);
                        self.pending[1].push(sample);
                    }
                }
                _ => {
                    for frame in buf.samples().chunks_exact(2) {
                        self.pending[0].push(frame[0]);
                        self.pending[1].push(frame[1]);
                    }
                }
            }

            self.drain_pending();
            return Ok(());
        }
    }

    /// Moves as many pending frames as possible into the ready queue,
    /// resampling when the input rate differs from the output rate.
    fn drain_pending(&mut self) {
        let Some(resampler) = self.resampler.as_mut() else {
            let [left_pending, right_pending] = &mut self.pending;
            for (left, right) in left_pending.drain(..).zip(right_pending.drain(..)) {
                self.ready.push_back((left, right));
            }
            return;
        };

        loop {
            let needed = resampler.input_frames_next();
            if self.pending[0].len() < needed {
                return;
            }
            // The resampler wants exactly `needed` frames per call.
            let chunk = [&self.pending[0][..needed], &self.pending[1][..needed]];
            match resampler.process(&chunk, None) {
                Ok(output) => {
                    for (left, right) in output[0].iter().zip(output[1].iter()) {
                        self.ready.push_back((*left, *right));
                    }
                }
                Err(err) => {
                    warn!("Resampler failed mid-stream: {err}");
                    self.finished = true;
                    return;
                }
            }
            self.pending[0].drain(..needed);
            self.pending[1].drain(..needed);
        }
    }

    /// Pads the tail with silence so the resampler emits the final frames.
    fn flush_resampler(&mut self) {
        if self.resampler.is_none() {
            self.drain_pending();
            return;
        }
        if self.pending[0].is_empty() {
            return;
        }
        let needed = self
            .resampler
            .as_mut()
            .map(|r| r.input_frames_next())
            .unwrap_or(0);
        let missing = needed.saturating_sub(self.pending[0].len());
        self.pending[0].extend(std::iter::repeat(0.0).take(missing));
        self.pending[1].extend(std::iter::repeat(0.0).take(missing));
        self.drain_pending();
    }
}

fn apply_tags(revision: &MetadataRevision, song: &mut Song) {
    for tag in revision.tags() {
        if song.artist.is_none()
            && matches!(
                tag.std_key,
                Some(
                    StandardTagKey::Artist
                        | StandardTagKey::AlbumArtist
                        | StandardTagKey::Performer
                )
            )
        {
            song.artist = Some(tag.value.to_string());
        }

        if song.title.is_none() && matches!(tag.std_key, Some(StandardTagKey::TrackTitle)) {
            song.title = Some(tag.value.to_string());
        }
    }
}

fn time_to_secs(time: Time) -> f64 {
    time.seconds as f64 + time.frac
}

fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::SymphoniaDecoder;
    use crate::error::Error;
    use crate::model::Volume;

    fn temp_path(name: &str, ext: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should move forward")
            .as_nanos();
        std::env::temp_dir().join(format!("resonance-{name}-{nanos}.{ext}"))
    }

    fn write_sine_wav(path: &PathBuf, sample_rate: u32, channels: u16, secs: f64, freq: f64) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).expect("wav fixture");
        let frames = (secs * sample_rate as f64) as usize;
        for i in 0..frames {
            let t = i as f64 / sample_rate as f64;
            let sample = ((2.0 * std::f64::consts::PI * freq * t).sin() * 12_000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn open_fills_song_metadata() {
        let path = temp_path("meta", "wav");
        write_sine_wav(&path, 44_100, 2, 0.5, 440.0);

        let (_decoder, song) = SymphoniaDecoder::open(&path).expect("wav should open");
        assert_eq!(song.num_channels, 2);
        assert_eq!(song.sample_rate, 44_100);
        assert_eq!(song.bit_depth, Some(16));
        assert!((song.duration_secs - 0.5).abs() < 0.05);
        assert!(song.bit_rate.unwrap_or(0) > 0);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_file_is_invalid() {
        let path = temp_path("missing", "wav");
        assert_eq!(
            SymphoniaDecoder::open(&path).err(),
            Some(Error::InvalidFile)
        );
    }

    #[test]
    fn garbage_file_is_not_supported() {
        let path = temp_path("garbage", "mp3");
        std::fs::write(&path, b"this is definitely not audio data").unwrap();
        assert_eq!(
            SymphoniaDecoder::open(&path).err(),
            Some(Error::FileNotSupported)
        );
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn decode_emits_expected_frame_total() {
        let path = temp_path("total", "wav");
        write_sine_wav(&path, 44_100, 2, 0.5, 440.0);

        let (mut decoder, _song) = SymphoniaDecoder::open(&path).unwrap();
        let mut total_frames = 0usize;
        let mut total_delta = 0f64;
        while let Some(chunk) = decoder.next_chunk(1_024).unwrap() {
            assert!(chunk.frames <= 1_024);
            assert_eq!(chunk.samples.len(), chunk.frames * 2);
            total_frames += chunk.frames;
            total_delta += chunk.position_delta;
        }

        let expected = (0.5 * 44_100.0) as usize;
        assert!(
            total_frames.abs_diff(expected) <= 1_024,
            "expected ≈{expected} frames, got {total_frames}"
        );
        assert!((total_delta - 0.5).abs() < 0.05);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn mono_input_is_duplicated_to_both_channels() {
        let path = temp_path("mono", "wav");
        write_sine_wav(&path, 44_100, 1, 0.1, 440.0);

        let (mut decoder, song) = SymphoniaDecoder::open(&path).unwrap();
        assert_eq!(song.num_channels, 1);
        let chunk = decoder.next_chunk(256).unwrap().expect("first chunk");
        for frame in chunk.samples.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn resampler_stretches_low_rate_input() {
        let path = temp_path("resample", "wav");
        write_sine_wav(&path, 22_050, 2, 0.5, 440.0);

        let (mut decoder, _song) = SymphoniaDecoder::open(&path).unwrap();
        let mut total_frames = 0usize;
        while let Some(chunk) = decoder.next_chunk(1_024).unwrap() {
            total_frames += chunk.frames;
        }

        // 0.5 s of audio is ≈22050 output frames at the fixed rate, modulo
        // resampler latency.
        let expected = (0.5 * 44_100.0) as usize;
        assert!(
            total_frames.abs_diff(expected) < 4_096,
            "expected ≈{expected} frames, got {total_frames}"
        );

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn volume_scales_output_samples() {
        let path = temp_path("volume", "wav");
        write_sine_wav(&path, 44_100, 2, 0.1, 440.0);

        let peak = |volume: f32| -> i16 {
            let (mut decoder, _) = SymphoniaDecoder::open(&path).unwrap();
            decoder.set_volume(Volume::new(volume));
            let mut max = 0i16;
            while let Some(chunk) = decoder.next_chunk(1_024).unwrap() {
                for &sample in &chunk.samples {
                    max = max.max(sample.saturating_abs());
                }
            }
            max
        };

        let loud = peak(1.0);
        let quiet = peak(0.5);
        assert!(loud > 10_000);
        let ratio = quiet as f64 / loud as f64;
        assert!((ratio - 0.5).abs() < 0.05, "ratio was {ratio}");

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn boosted_filter_band_raises_output_level() {
        let path = temp_path("boost", "wav");
        // Tone centered on the 250 Hz equalizer band.
        write_sine_wav(&path, 44_100, 2, 0.2, 250.0);

        let peak = |preset: crate::model::EqualizerPreset| -> i16 {
            let (mut decoder, _) = SymphoniaDecoder::open(&path).unwrap();
            decoder.update_filters(&preset);
            let mut max = 0i16;
            while let Some(chunk) = decoder.next_chunk(1_024).unwrap() {
                for &sample in &chunk.samples {
                    max = max.max(sample.saturating_abs());
                }
            }
            max
        };

        let flat = peak(crate::model::EqualizerPreset::flat());
        let mut boosted_preset = crate::model::EqualizerPreset::custom();
        assert!(boosted_preset.set_band_gain(3, 12.0));
        let boosted = peak(boosted_preset);

        assert!(
            boosted as f64 > flat as f64 * 1.5,
            "boost did not raise level: flat {flat}, boosted {boosted}"
        );

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn volume_round_trips_clamped() {
        let path = temp_path("volrt", "wav");
        write_sine_wav(&path, 44_100, 2, 0.05, 440.0);

        let (mut decoder, _) = SymphoniaDecoder::open(&path).unwrap();
        decoder.set_volume(Volume::new(1.5));
        assert_eq!(decoder.volume(), Volume::new(1.0));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn seek_lands_near_target_and_keeps_decoding() {
        let path = temp_path("seek", "wav");
        write_sine_wav(&path, 44_100, 2, 1.0, 440.0);

        let (mut decoder, _) = SymphoniaDecoder::open(&path).unwrap();
        decoder.next_chunk(1_024).unwrap();

        let actual = decoder.seek(0.5).expect("seek should succeed");
        assert!((actual - 0.5).abs() < 0.1, "seeked to {actual}");

        let mut remaining = 0usize;
        while let Some(chunk) = decoder.next_chunk(1_024).unwrap() {
            remaining += chunk.frames;
        }
        let expected = (0.5 * 44_100.0) as usize;
        assert!(
            remaining.abs_diff(expected) <= 4_096,
            "expected ≈{expected} frames after seek, got {remaining}"
        );

        let _ = std::fs::remove_file(path);
    }
}
