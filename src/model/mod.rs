pub mod filter;
pub mod song;
pub mod volume;

pub use filter::{AudioFilter, EqualizerPreset};
pub use song::{CurrentInfo, MediaState, Song};
pub use volume::Volume;
