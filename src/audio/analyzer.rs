use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::sink::{NUM_CHANNELS, SAMPLE_RATE};

/// Default number of bars per channel.
pub const DEFAULT_BARS: usize = 10;

/// Base FFT size; treble uses it directly, mid 4x, bass 8x.
const BASE_BUFFER_SIZE: usize = 1_024;

const LOW_CUT_OFF_HZ: f64 = 50.0;
const HIGH_CUT_OFF_HZ: f64 = 10_000.0;

/// Weight of the previous output kept by the integral smoothing filter.
const NOISE_REDUCTION: f64 = 0.77;

/// Frequencies below this belong to the bass FFT, above it (up to
/// `TREBLE_CUT_OFF_HZ`) to the mid FFT.
const BASS_CUT_OFF_HZ: f64 = 100.0;
const TREBLE_CUT_OFF_HZ: f64 = 500.0;

/// One frequency band: its own FFT size gives it its own resolution.
/// Bass gets the finest bins, treble the coarsest.
struct FreqAnalysis {
    buffer_size: usize,
    window: Vec<f64>,
    raw_left: Vec<f64>,
    raw_right: Vec<f64>,
    buf_left: Vec<Complex<f64>>,
    buf_right: Vec<Complex<f64>>,
    fft: Arc<dyn Fft<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl FreqAnalysis {
    fn new(planner: &mut FftPlanner<f64>, buffer_size: usize) -> Self {
        let fft = planner.plan_fft_forward(buffer_size);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        let window = (0..buffer_size)
            .map(|i| {
                0.5 * (1.0
                    - (2.0 * std::f64::consts::PI * i as f64 / (buffer_size - 1) as f64).cos())
            })
            .collect();
        Self {
            buffer_size,
            window,
            raw_left: vec![0.0; buffer_size],
            raw_right: vec![0.0; buffer_size],
            buf_left: vec![Complex::default(); buffer_size],
            buf_right: vec![Complex::default(); buffer_size],
            fft,
            scratch,
        }
    }

    /// Deinterleaves the newest part of the shared ring, windows it and runs
    /// both channel FFTs.
    fn fill_and_run(&mut self, input: &[f64]) {
        for i in 0..self.buffer_size {
            self.raw_right[i] = input[i * 2];
            self.raw_left[i] = input[i * 2 + 1];
        }
        for j in 0..self.buffer_size {
            self.buf_left[j] = Complex::new(self.window[j] * self.raw_left[j], 0.0);
            self.buf_right[j] = Complex::new(self.window[j] * self.raw_right[j], 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.buf_left, &mut self.scratch);
        self.fft
            .process_with_scratch(&mut self.buf_right, &mut self.scratch);
    }
}

/// Real-time spectrum analyzer producing one normalized bar vector per call.
///
/// Three windowed FFTs per channel (bass/mid/treble) are mapped onto
/// `bars` logarithmically distributed frequency ranges between 50 Hz and
/// 10 kHz. The raw magnitudes go through auto-sensitivity, gravity falloff
/// and an integral smoothing filter so the visualizer gets stable, bounded
/// values in `[0, 1]`.
pub struct SpectrumAnalyzer {
    bars: usize,
    bass: FreqAnalysis,
    mid: FreqAnalysis,
    treble: FreqAnalysis,

    /// Shared interleaved input ring, newest samples first.
    input: Vec<f64>,

    prev_out: Vec<f64>,
    mem: Vec<f64>,
    peak: Vec<f64>,
    fall: Vec<u32>,

    cutoff_freq: Vec<f32>,
    eq: Vec<f64>,
    lower_cutoff: Vec<usize>,
    upper_cutoff: Vec<usize>,
    bass_cutoff_bar: isize,
    treble_cutoff_bar: isize,

    framerate: f64,
    frame_skip: u32,
    sens: f64,
    sens_init: bool,
}

impl SpectrumAnalyzer {
    pub fn new(bars: usize) -> Self {
        let bars = bars.max(1);
        let mut planner = FftPlanner::new();
        let bass = FreqAnalysis::new(&mut planner, BASE_BUFFER_SIZE * 8);
        let mid = FreqAnalysis::new(&mut planner, BASE_BUFFER_SIZE * 4);
        let treble = FreqAnalysis::new(&mut planner, BASE_BUFFER_SIZE);

        let smoothing_len = bars * NUM_CHANNELS;
        let mut analyzer = Self {
            bars,
            input: vec![0.0; bass.buffer_size * NUM_CHANNELS],
            bass,
            mid,
            treble,
            prev_out: vec![0.0; smoothing_len],
            mem: vec![0.0; smoothing_len],
            peak: vec![0.0; smoothing_len],
            fall: vec![0; smoothing_len],
            cutoff_freq: vec![0.0; bars + 1],
            eq: vec![0.0; bars + 1],
            lower_cutoff: vec![0; bars + 1],
            upper_cutoff: vec![0; bars + 1],
            bass_cutoff_bar: -1,
            treble_cutoff_bar: -1,
            // Non-zero start so gravity_mod is finite on the very first call.
            framerate: (SAMPLE_RATE as usize * NUM_CHANNELS) as f64 / BASE_BUFFER_SIZE as f64,
            frame_skip: 1,
            sens: 1.0,
            sens_init: true,
        };
        analyzer.compute_cutoffs();
        analyzer
    }

    /// Maximum accepted `input` length per call, in interleaved samples.
    pub fn input_size(&self) -> usize {
        self.input.len()
    }

    /// Length of the bar vector: bars for the left channel followed by bars
    /// for the right channel.
    pub fn output_size(&self) -> usize {
        self.bars * NUM_CHANNELS
    }

    pub fn bars(&self) -> usize {
        self.bars
    }

    /// Lower edge frequency of each bar (the last entry closes the top bar);
    /// used by the UI to label the visualizer columns.
    pub fn bar_frequencies(&self) -> &[f32] {
        &self.cutoff_freq
    }

    /// Distributes bars logarithmically between the low and high cutoff and
    /// assigns every bar a contiguous, strictly increasing FFT bin range in
    /// its band. When the exponential distribution clumps in the bass the
    /// bins are pushed up one by one and the cutoff frequencies recomputed so
    /// each bar keeps at least one bin.
    fn compute_cutoffs(&mut self) {
        let bars = self.bars as f64;
        let frequency_constant =
            (LOW_CUT_OFF_HZ / HIGH_CUT_OFF_HZ).log10() / (1.0 / (bars + 1.0) - 1.0);

        let mut relative_cutoff = vec![0.0f32; self.bars + 2];
        let mut bar_band = vec![0u8; self.bars + 1];
        self.bass_cutoff_bar = -1;
        self.treble_cutoff_bar = -1;
        let mut first_bar = true;
        let mut first_treble_bar = 0usize;

        for n in 0..=self.bars {
            let mut distribution_coefficient = -frequency_constant;
            distribution_coefficient +=
                (n as f64 + 1.0) / (bars + 1.0) * frequency_constant;
            self.cutoff_freq[n] =
                (HIGH_CUT_OFF_HZ * 10f64.powf(distribution_coefficient)) as f32;

            if n > 1
                && self.cutoff_freq[n - 1] >= self.cutoff_freq[n]
                && f64::from(self.cutoff_freq[n - 1]) > BASS_CUT_OFF_HZ
            {
                self.cutoff_freq[n] = self.cutoff_freq[n - 1]
                    + (self.cutoff_freq[n - 1] - self.cutoff_freq[n - 2]);
            }

            relative_cutoff[n] = self.cutoff_freq[n] / (SAMPLE_RATE as f32 / 2.0);

            // FFT magnitudes are huge; the per-bar weight folds the
            // normalization into the band mapping.
            self.eq[n] = f64::from(self.cutoff_freq[n]);
            self.eq[n] /= 2f64.powi(18);
            self.eq[n] /= (self.bass.buffer_size as f64).log2();

            let cutoff = f64::from(self.cutoff_freq[n]);
            if cutoff < BASS_CUT_OFF_HZ {
                bar_band[n] = 1;
                self.lower_cutoff[n] =
                    (relative_cutoff[n] * (self.bass.buffer_size as f32 / 2.0)) as usize;
                self.bass_cutoff_bar += 1;
                self.treble_cutoff_bar += 1;
                first_bar = self.bass_cutoff_bar <= 0;
                self.lower_cutoff[n] = self.lower_cutoff[n].min(self.bass.buffer_size / 2);
            } else if cutoff < TREBLE_CUT_OFF_HZ {
                bar_band[n] = 2;
                self.lower_cutoff[n] =
                    (relative_cutoff[n] * (self.mid.buffer_size as f32 / 2.0)) as usize;
                self.treble_cutoff_bar += 1;
                if self.treble_cutoff_bar - self.bass_cutoff_bar == 1 {
                    first_bar = true;
                    if n > 0 {
                        self.upper_cutoff[n - 1] = (relative_cutoff[n]
                            * (self.bass.buffer_size as f32 / 2.0))
                            as usize;
                    }
                } else {
                    first_bar = false;
                }
                self.lower_cutoff[n] = self.lower_cutoff[n].min(self.mid.buffer_size / 2);
            } else {
                bar_band[n] = 3;
                self.lower_cutoff[n] =
                    (relative_cutoff[n] * (self.treble.buffer_size as f32 / 2.0)) as usize;
                first_treble_bar += 1;
                if first_treble_bar == 1 {
                    first_bar = true;
                    if n > 0 {
                        self.upper_cutoff[n - 1] = (relative_cutoff[n]
                            * (self.mid.buffer_size as f32 / 2.0))
                            as usize;
                    }
                } else {
                    first_bar = false;
                }
                self.lower_cutoff[n] = self.lower_cutoff[n].min(self.treble.buffer_size / 2);
            }

            if n > 0 {
                if !first_bar {
                    self.upper_cutoff[n - 1] = self.lower_cutoff[n].saturating_sub(1);

                    if self.lower_cutoff[n] <= self.lower_cutoff[n - 1] {
                        let half = match bar_band[n] {
                            1 => self.bass.buffer_size / 2,
                            2 => self.mid.buffer_size / 2,
                            _ => self.treble.buffer_size / 2,
                        };
                        // Push the spectrum up and recompute the frequency
                        // this bar actually starts at.
                        if self.lower_cutoff[n - 1] + 1 < half + 1 {
                            self.lower_cutoff[n] = self.lower_cutoff[n - 1] + 1;
                            self.upper_cutoff[n - 1] = self.lower_cutoff[n] - 1;
                            relative_cutoff[n] =
                                self.lower_cutoff[n] as f32 / (half as f32);
                            self.cutoff_freq[n] =
                                relative_cutoff[n] * (SAMPLE_RATE as f32 / 2.0);
                        }
                    }
                } else if self.upper_cutoff[n - 1] <= self.lower_cutoff[n - 1] {
                    self.upper_cutoff[n - 1] = self.lower_cutoff[n - 1] + 1;
                }
            }
        }
    }

    /// Consumes one chunk of interleaved stereo samples and writes
    /// [`Self::output_size`] normalized bar magnitudes: left channel bars
    /// first, then right. An empty `input` still produces output from the
    /// ring content and counts as silence.
    pub fn execute(&mut self, input: &[f64], out: &mut [f64]) {
        debug_assert_eq!(out.len(), self.output_size());

        let size = input.len().min(self.input.len());
        let mut silence = true;

        if size > 0 {
            // Exponential moving average of the effective chunk rate; the
            // integer division mirrors how the rate is quantized per call.
            self.framerate -= self.framerate / 64.0;
            self.framerate += ((SAMPLE_RATE as u64
                * NUM_CHANNELS as u64
                * u64::from(self.frame_skip))
                / size as u64) as f64
                / 64.0;
            self.frame_skip = 1;

            // Shift the ring and copy the new chunk in, newest first.
            for n in (size..self.input.len()).rev() {
                self.input[n] = self.input[n - size];
            }
            for (n, &sample) in input.iter().enumerate().take(size) {
                self.input[size - n - 1] = sample;
                if sample != 0.0 {
                    silence = false;
                }
            }
        } else {
            self.frame_skip += 1;
        }

        self.bass.fill_and_run(&self.input);
        self.mid.fill_and_run(&self.input);
        self.treble.fill_and_run(&self.input);

        // Sum FFT magnitudes into bars, averaged over the bin range and
        // weighted by the bar's eq entry.
        for n in 0..self.bars {
            let band = if n as isize <= self.bass_cutoff_bar {
                &self.bass
            } else if n as isize <= self.treble_cutoff_bar {
                &self.mid
            } else {
                &self.treble
            };

            let mut left = 0.0;
            let mut right = 0.0;
            for i in self.lower_cutoff[n]..=self.upper_cutoff[n] {
                left += band.buf_left[i].re.hypot(band.buf_left[i].im);
                right += band.buf_right[i].re.hypot(band.buf_right[i].im);
            }

            let bins = (self.upper_cutoff[n] - self.lower_cutoff[n] + 1) as f64;
            out[n] = left / bins * self.eq[n];
            out[n + self.bars] = right / bins * self.eq[n];
        }

        for value in out.iter_mut() {
            *value *= self.sens;
        }

        let mut overshoot = false;
        let gravity_mod =
            ((60.0 / self.framerate).powf(2.5) * 1.54 / NOISE_REDUCTION).max(1.0);

        for n in 0..self.bars * NUM_CHANNELS {
            // Falloff: a dropping bar decays along a gravity curve instead of
            // collapsing instantly.
            if out[n] < self.prev_out[n] {
                out[n] = self.peak[n]
                    * (1_000.0 - (f64::from(self.fall[n]) * f64::from(self.fall[n]) * gravity_mod))
                    / 1_000.0;
                if out[n] < 0.0 {
                    out[n] = 0.0;
                }
                self.fall[n] += 1;
            } else {
                self.peak[n] = out[n];
                self.fall[n] = 0;
            }
            self.prev_out[n] = out[n];

            // Integral smoothing with a damping term that shortens the
            // memory of tall bars.
            out[n] = self.mem[n] * NOISE_REDUCTION + out[n];
            self.mem[n] = out[n];

            let diff = (1_000.0 - out[n]).max(0.0);
            let div = 1.0 / (diff + 1.0);
            self.mem[n] *= 1.0 - div / 20.0;

            if out[n] > 1_000.0 {
                overshoot = true;
                out[n] = 1_000.0;
            }
            out[n] /= 1_000.0;
        }

        if overshoot {
            self.sens *= 0.98;
            self.sens_init = false;
        } else if !silence {
            self.sens *= 1.001;
            if self.sens_init {
                self.sens *= 1.1;
            }
        }
    }
}
