use crate::model::EqualizerPreset;

#[derive(Clone, Copy)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coefficients {
    /// Peaking EQ coefficients (RBJ audio cookbook), normalized by a0.
    fn peaking(sample_rate: f64, frequency: f64, q: f64, gain_db: f64) -> Self {
        let nyquist = sample_rate * 0.5 - 1.0;
        let frequency = frequency.clamp(10.0, nyquist.max(10.0));
        let q = q.clamp(0.1, 18.0);

        let w0 = 2.0 * std::f64::consts::PI * frequency / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let a = 10.0_f64.powf(gain_db / 40.0);
        let cos_w0 = w0.cos();

        let b0 = 1.0 + alpha * a;
        let b1 = -2.0 * cos_w0;
        let b2 = 1.0 - alpha * a;
        let a0 = 1.0 + alpha / a;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha / a;

        let inv_a0 = 1.0 / a0;
        Self {
            b0: (b0 * inv_a0) as f32,
            b1: (b1 * inv_a0) as f32,
            b2: (b2 * inv_a0) as f32,
            a1: (a1 * inv_a0) as f32,
            a2: (a2 * inv_a0) as f32,
        }
    }
}

/// Single biquad section in transposed direct form II.
struct Biquad {
    coeffs: Coefficients,
    z1: f32,
    z2: f32,
}

impl Biquad {
    fn new(coeffs: Coefficients) -> Self {
        Self {
            coeffs,
            z1: 0.0,
            z2: 0.0,
        }
    }

    fn process_sample(&mut self, sample: f32) -> f32 {
        let y = self.coeffs.b0 * sample + self.z1;
        self.z1 = self.coeffs.b1 * sample - self.coeffs.a1 * y + self.z2;
        self.z2 = self.coeffs.b2 * sample - self.coeffs.a2 * y;
        y
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// Stereo chain of peaking biquads built from an equalizer preset.
///
/// The z⁻¹ state of every section persists across chunks; it is cleared only
/// when a different preset is applied or on [`FilterChain::reset_state`]
/// (used after a seek to drop stale history).
pub struct FilterChain {
    preset: EqualizerPreset,
    left: Vec<Biquad>,
    right: Vec<Biquad>,
}

impl FilterChain {
    pub fn new(sample_rate: u32, preset: EqualizerPreset) -> Self {
        let build = || {
            preset
                .filters()
                .iter()
                .map(|f| {
                    Biquad::new(Coefficients::peaking(
                        sample_rate as f64,
                        f.frequency,
                        f.q,
                        f.gain_db(),
                    ))
                })
                .collect::<Vec<_>>()
        };
        let left = build();
        let right = build();
        Self {
            preset,
            left,
            right,
        }
    }

    /// Swaps in a new preset. Re-applying the currently active preset is a
    /// no-op so the filter history is kept and the output does not glitch.
    /// Returns whether the chain actually changed.
    pub fn apply(&mut self, sample_rate: u32, preset: &EqualizerPreset) -> bool {
        if *preset == self.preset {
            return false;
        }
        *self = Self::new(sample_rate, preset.clone());
        true
    }

    pub fn preset(&self) -> &EqualizerPreset {
        &self.preset
    }

    pub fn reset_state(&mut self) {
        for section in self.left.iter_mut().chain(self.right.iter_mut()) {
            section.reset();
        }
    }

    pub fn process_frame(&mut self, left: f32, right: f32) -> (f32, f32) {
        let mut l = left;
        let mut r = right;
        for section in &mut self.left {
            l = section.process_sample(l);
        }
        for section in &mut self.right {
            r = section.process_sample(r);
        }
        (l, r)
    }
}

#[cfg(test)]
mod tests {
    use super::{Biquad, Coefficients, FilterChain};
    use crate::model::EqualizerPreset;

    const SAMPLE_RATE: u32 = 44_100;

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    fn sine(frequency: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| {
                (2.0 * std::f32::consts::PI * frequency * i as f32 / SAMPLE_RATE as f32).sin()
            })
            .collect()
    }

    #[test]
    fn biquad_stays_finite_after_configuration() {
        let mut section = Biquad::new(Coefficients::peaking(44_100.0, 1_000.0, 1.41, 6.0));
        let processed = section.process_sample(0.5);
        assert!(processed.is_finite());
    }

    #[test]
    fn flat_chain_passes_signal_through() {
        let mut chain = FilterChain::new(SAMPLE_RATE, EqualizerPreset::flat());
        let input = sine(440.0, 4_096);
        let output: Vec<f32> = input
            .iter()
            .map(|&s| chain.process_frame(s, s).0)
            .collect();
        let delta = (rms(&input) - rms(&output)).abs();
        assert!(delta < 0.01, "flat preset altered RMS by {delta}");
    }

    #[test]
    fn boosted_band_raises_in_band_level() {
        let mut preset = EqualizerPreset::custom();
        // Band 5 is centered at 1 kHz.
        assert!(preset.set_band_gain(5, 12.0));
        let mut chain = FilterChain::new(SAMPLE_RATE, preset);

        let input = sine(1_000.0, 8_192);
        let output: Vec<f32> = input
            .iter()
            .map(|&s| chain.process_frame(s, s).0)
            .collect();
        // Skip the transient while the filter history settles.
        assert!(rms(&output[2_048..]) > rms(&input[2_048..]) * 1.5);
    }

    #[test]
    fn reapplying_same_preset_keeps_state() {
        let mut preset = EqualizerPreset::custom();
        preset.set_band_gain(0, 6.0);
        let mut chain = FilterChain::new(SAMPLE_RATE, preset.clone());
        for i in 0..64 {
            chain.process_frame((i as f32 * 0.01).sin(), 0.0);
        }
        let z_before = chain.left[0].z1;
        assert!(!chain.apply(SAMPLE_RATE, &preset));
        assert_eq!(chain.left[0].z1, z_before);
    }

    #[test]
    fn applying_different_preset_resets_state() {
        let mut chain = FilterChain::new(SAMPLE_RATE, EqualizerPreset::custom());
        for i in 0..64 {
            chain.process_frame((i as f32 * 0.01).sin(), 0.0);
        }
        let mut boosted = EqualizerPreset::custom();
        boosted.set_band_gain(2, 3.0);
        assert!(chain.apply(SAMPLE_RATE, &boosted));
        assert_eq!(chain.left[0].z1, 0.0);
        assert_eq!(chain.right[0].z2, 0.0);
    }
}
