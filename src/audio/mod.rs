pub mod analyzer;
pub mod channel;
pub mod command;
pub mod decoder;
pub mod dsp;
pub mod player;
pub mod sink;

pub use analyzer::SpectrumAnalyzer;
pub use channel::CommandQueue;
pub use command::Command;
pub use decoder::{PcmChunk, SymphoniaDecoder};
pub use player::{EventListener, Player, PlayerHandle};
pub use sink::{CpalSink, Playback};
