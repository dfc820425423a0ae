//! Synced-lyrics lookup for the song currently playing.
//!
//! Lives entirely outside the audio loop: the UI asks for lyrics on its own
//! schedule. Fetched LRC text is cached on disk keyed by a hash of the track
//! path, so every track hits the network at most once.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};

const LRCLIB_GET_URL: &str = "https://lrclib.net/api/get";

/// One timestamped lyrics line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LyricsLine {
    pub timestamp_ms: u32,
    pub text: String,
}

/// Capability over the remote lyrics provider, so the UI can swap sources
/// and tests can avoid the network entirely. Returns raw LRC text.
pub trait LyricsSource {
    fn fetch(&self, artist: &str, title: &str, duration_secs: u32) -> Option<String>;
}

/// The lrclib.net JSON API over a blocking HTTP client.
pub struct LrclibSource {
    base_url: String,
}

#[derive(Deserialize)]
struct LrclibResponse {
    #[serde(rename = "syncedLyrics")]
    synced_lyrics: Option<String>,
}

impl LrclibSource {
    pub fn new() -> Self {
        Self {
            base_url: LRCLIB_GET_URL.to_string(),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Default for LrclibSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LyricsSource for LrclibSource {
    fn fetch(&self, artist: &str, title: &str, duration_secs: u32) -> Option<String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent("resonance/0.1")
            .build()
            .ok()?;
        let response = client
            .get(&self.base_url)
            .query(&[
                ("artist_name", artist.to_string()),
                ("track_name", title.to_string()),
                ("duration", duration_secs.to_string()),
            ])
            .send()
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let payload: LrclibResponse = response.json().ok()?;
        payload
            .synced_lyrics
            .filter(|lyrics| !lyrics.trim().is_empty())
    }
}

/// Cache-first lyrics lookup over a pluggable [`LyricsSource`].
pub struct LyricsFinder {
    cache_dir: PathBuf,
    source: Box<dyn LyricsSource>,
}

impl LyricsFinder {
    pub fn new(cache_dir: impl Into<PathBuf>, source: Box<dyn LyricsSource>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            source,
        }
    }

    /// Where the raw LRC for this track is (or would be) cached.
    pub fn cached_path(&self, track_path: &Path) -> PathBuf {
        let mut hash = Sha256::new();
        hash.update(track_path.to_string_lossy().as_bytes());
        self.cache_dir.join(format!("{:x}.lrc", hash.finalize()))
    }

    /// Looks lyrics up for a track: a sibling `.lrc` file wins, then the
    /// cache, then the remote source. Returns an empty vector when nothing
    /// is found, never an error; missing lyrics are not a failure.
    pub fn search(
        &self,
        track_path: &Path,
        artist: &str,
        title: &str,
        duration_secs: f64,
    ) -> Vec<LyricsLine> {
        if let Some(sibling) = sibling_lrc(track_path) {
            if let Ok(content) = fs::read_to_string(sibling) {
                return parse_lrc(&content);
            }
        }

        let cached = self.cached_path(track_path);
        if let Ok(content) = fs::read_to_string(&cached) {
            return parse_lrc(&content);
        }

        if artist.trim().is_empty() || title.trim().is_empty() {
            return Vec::new();
        }
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return Vec::new();
        }

        let Some(raw) = self
            .source
            .fetch(artist, title, duration_secs.round() as u32)
        else {
            debug!("No lyrics found for {artist} - {title}");
            return Vec::new();
        };

        if let Some(parent) = cached.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let _ = fs::write(&cached, &raw);
        parse_lrc(&raw)
    }
}

fn sibling_lrc(track_path: &Path) -> Option<PathBuf> {
    let stem = track_path.file_stem()?;
    let candidate = track_path.parent()?.join(stem).with_extension("lrc");
    candidate.is_file().then_some(candidate)
}

/// Parses LRC text into sorted, timestamped lines. Lines with multiple
/// `[mm:ss.xx]` stamps expand into one entry per stamp; malformed stamps are
/// skipped.
pub fn parse_lrc(content: &str) -> Vec<LyricsLine> {
    let mut lines = Vec::new();
    for raw in content.lines() {
        let (stamps, text) = split_stamps(raw);
        lines.extend(stamps.into_iter().map(|timestamp_ms| LyricsLine {
            timestamp_ms,
            text: text.to_string(),
        }));
    }
    lines.sort_by_key(|line| line.timestamp_ms);
    lines
}

/// Peels every leading `[..]` stamp off a line and returns the parsed stamps
/// together with the remaining lyric text. A malformed stamp ends the scan,
/// so garbage brackets never produce a line.
fn split_stamps(line: &str) -> (Vec<u32>, &str) {
    let mut stamps = Vec::new();
    let mut text = line.trim_start();
    while text.starts_with('[') {
        let Some(end) = text.find(']') else {
            break;
        };
        let Some(millis) = stamp_to_millis(&text[1..end]) else {
            break;
        };
        stamps.push(millis);
        text = text[end + 1..].trim_start();
    }
    if stamps.is_empty() {
        return (stamps, "");
    }
    (stamps, text.trim_end())
}

/// Converts one `mm:ss` or `mm:ss.fff` stamp body into milliseconds. The
/// fraction may carry one to three digits and is weighted positionally, so
/// `.5` reads as 500 ms.
fn stamp_to_millis(stamp: &str) -> Option<u32> {
    let (minutes_part, seconds_and_fraction) = stamp.split_once(':')?;
    let minutes: u32 = minutes_part.trim().parse().ok()?;

    let (seconds_part, fraction_part) = seconds_and_fraction
        .split_once('.')
        .unwrap_or((seconds_and_fraction, ""));
    let seconds: u32 = seconds_part.trim().parse().ok()?;

    if minutes > 6_000 || seconds >= 60 {
        return None;
    }

    let fraction_part = fraction_part.trim();
    if !fraction_part.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    let mut millis = 0;
    let mut weight = 100;
    for digit in fraction_part.chars().take(3) {
        millis += digit.to_digit(10)? * weight;
        weight /= 10;
    }

    Some((minutes * 60 + seconds) * 1_000 + millis)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{parse_lrc, LyricsFinder, LyricsLine, LyricsSource};

    struct StaticSource(Option<&'static str>);

    impl LyricsSource for StaticSource {
        fn fetch(&self, _artist: &str, _title: &str, _duration_secs: u32) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    fn temp_cache_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should move forward")
            .as_nanos();
        std::env::temp_dir().join(format!("resonance-lyrics-{name}-{nanos}"))
    }

    #[test]
    fn parses_single_timestamp_line() {
        let parsed = parse_lrc("[01:02.34] Hello world");
        assert_eq!(
            parsed,
            vec![LyricsLine {
                timestamp_ms: 62_340,
                text: "Hello world".to_string()
            }]
        );
    }

    #[test]
    fn parses_multiple_timestamps_in_one_line() {
        let parsed = parse_lrc("[00:10.00][00:12.50] Chorus");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].timestamp_ms, 10_000);
        assert_eq!(parsed[1].timestamp_ms, 12_500);
        assert_eq!(parsed[0].text, "Chorus");
    }

    #[test]
    fn ignores_invalid_lines_and_sorts() {
        let parsed = parse_lrc("[00:20.xx]bad\n[00:15.00]A\n[00:10.00]B");
        assert_eq!(
            parsed
                .iter()
                .map(|line| (line.timestamp_ms, line.text.as_str()))
                .collect::<Vec<_>>(),
            vec![(10_000, "B"), (15_000, "A")]
        );
    }

    #[test]
    fn rejects_out_of_range_seconds() {
        assert!(parse_lrc("[00:75.00] impossible").is_empty());
    }

    #[test]
    fn fraction_digits_are_weighted_positionally() {
        assert_eq!(parse_lrc("[00:01.5] a")[0].timestamp_ms, 1_500);
        assert_eq!(parse_lrc("[00:01.50] a")[0].timestamp_ms, 1_500);
        assert_eq!(parse_lrc("[00:01.500] a")[0].timestamp_ms, 1_500);
        assert_eq!(parse_lrc("[00:01] a")[0].timestamp_ms, 1_000);
    }

    #[test]
    fn search_caches_the_fetched_lyrics() {
        let cache_dir = temp_cache_dir("cache");
        let finder = LyricsFinder::new(
            &cache_dir,
            Box::new(StaticSource(Some("[00:01.00] first line"))),
        );
        let track = PathBuf::from("/music/album/song.flac");

        let lines = finder.search(&track, "Artist", "Song", 180.0);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].timestamp_ms, 1_000);

        // Second lookup must hit the cache, not the source.
        let finder = LyricsFinder::new(&cache_dir, Box::new(StaticSource(None)));
        let lines = finder.search(&track, "Artist", "Song", 180.0);
        assert_eq!(lines.len(), 1);

        let _ = std::fs::remove_dir_all(cache_dir);
    }

    #[test]
    fn search_without_tags_skips_the_source() {
        let cache_dir = temp_cache_dir("untagged");
        let finder = LyricsFinder::new(
            &cache_dir,
            Box::new(StaticSource(Some("[00:01.00] should not appear"))),
        );
        let track = PathBuf::from("/music/untitled.mp3");

        assert!(finder.search(&track, "", "Song", 180.0).is_empty());
        assert!(finder.search(&track, "Artist", "", 180.0).is_empty());
        assert!(finder.search(&track, "Artist", "Song", 0.0).is_empty());

        let _ = std::fs::remove_dir_all(cache_dir);
    }

    #[test]
    fn cached_path_is_stable_per_track() {
        let finder = LyricsFinder::new("/tmp/cache", Box::new(StaticSource(None)));
        let a = finder.cached_path(std::path::Path::new("/music/a.mp3"));
        let b = finder.cached_path(std::path::Path::new("/music/b.mp3"));
        assert_ne!(a, b);
        assert_eq!(
            a,
            finder.cached_path(std::path::Path::new("/music/a.mp3"))
        );
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("lrc"));
    }
}
