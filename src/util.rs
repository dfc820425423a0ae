//! Formatting helpers for presenting stream properties in the UI.

/// Metric prefixes by power of ten.
const PREFIXES: [(i32, &str); 4] = [(9, "G"), (6, "M"), (3, "k"), (0, "")];

/// Formats a value with the largest fitting metric prefix, e.g.
/// `44100` with unit `"Hz"` becomes `"44.1 kHz"`.
pub fn format_with_prefix(value: f64, unit: &str) -> String {
    if value == 0.0 {
        return format!("0 {unit}");
    }

    let base = value.abs().log10();
    let (power, prefix) = PREFIXES
        .iter()
        .find(|(power, _)| base >= f64::from(*power))
        .copied()
        .unwrap_or((0, ""));

    let scaled = value / 10f64.powi(power);
    // Up to one decimal, trimming a trailing ".0".
    let rounded = (scaled * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{} {prefix}{unit}", rounded as i64)
    } else {
        format!("{rounded:.1} {prefix}{unit}")
    }
}

/// Formats a position or duration in seconds as `m:ss` (or `h:mm:ss` from
/// one hour up).
pub fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    let hours = total / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::{format_duration, format_with_prefix};

    #[test]
    fn prefixes_scale_by_magnitude() {
        assert_eq!(format_with_prefix(0.0, "bps"), "0 bps");
        assert_eq!(format_with_prefix(44_100.0, "Hz"), "44.1 kHz");
        assert_eq!(format_with_prefix(320_000.0, "bps"), "320 kbps");
        assert_eq!(format_with_prefix(1_411_200.0, "bps"), "1.4 Mbps");
        assert_eq!(format_with_prefix(16.0, "bit"), "16 bit");
    }

    #[test]
    fn durations_render_as_clock_time() {
        assert_eq!(format_duration(0.0), "0:00");
        assert_eq!(format_duration(59.9), "0:59");
        assert_eq!(format_duration(61.0), "1:01");
        assert_eq!(format_duration(600.0), "10:00");
        assert_eq!(format_duration(3_725.0), "1:02:05");
        assert_eq!(format_duration(-3.0), "0:00");
    }
}
