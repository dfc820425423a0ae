use thiserror::Error;

/// Application-level errors observable through the listener interface.
///
/// Each variant carries a stable integer identifier (see [`Error::code`])
/// grouped by tens: song/file errors live in 30-35, driver errors in 50,
/// and 99 is the catch-all.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid file")]
    InvalidFile,

    #[error("File not supported")]
    FileNotSupported,

    #[error("Decoding compressed file is not supported")]
    FileCompressionNotSupported,

    #[error("File does not seem to be neither mono nor stereo (perhaps multi-track or corrupted)")]
    UnknownNumOfChannels,

    #[error("Header data is inconsistent")]
    InconsistentHeaderInfo,

    #[error("File is corrupted")]
    CorruptedData,

    #[error("Could not set audio parameters")]
    SetupAudioParams,

    #[error("Unknown error")]
    Unknown,
}

impl Error {
    /// Stable integer identifier for this error kind.
    pub fn code(&self) -> u8 {
        match self {
            Error::InvalidFile => 30,
            Error::FileNotSupported => 31,
            Error::FileCompressionNotSupported => 32,
            Error::UnknownNumOfChannels => 33,
            Error::InconsistentHeaderInfo => 34,
            Error::CorruptedData => 35,
            Error::SetupAudioParams => 50,
            Error::Unknown => 99,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
