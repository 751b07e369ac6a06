#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("Media: {0}")]
    Media(#[from] MediaError),
    #[error("FS: {0}")]
    Fs(#[from] FsError),
}

/// Failures while parsing the cover medium or addressing its sample stream.
#[derive(thiserror::Error, Debug)]
pub enum MediaError {
    #[error("Unknown cover format")]
    UnknownFormat,
    #[error("Truncated header")]
    Truncated,
    #[error("Bad magic")]
    BadMagic,
    #[error("Unsupported codec ({0})")]
    UnsupportedCodec(u16),
    #[error("Unsupported sample width ({0})")]
    SampleWidth(u32),
    #[error("Sample data exceeds file size")]
    Bounds,
    #[error("Offset out of range")]
    Range,
}

/// Failures of filesystem operations.
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("Invalid argument")]
    Invalid,
    #[error("No such entry")]
    NotFound,
    #[error("Entry exists")]
    Exists,
    #[error("Not a directory")]
    NotADirectory,
    #[error("Is a directory")]
    IsADirectory,
    #[error("Directory not empty")]
    NotEmpty,
    #[error("Name too long")]
    NameTooLong,
    #[error("No space left on volume")]
    NoSpace,
    #[error("File too large")]
    TooLarge,
    #[error("Wrong medium")]
    WrongMedium,
    #[error("Cluster out of range")]
    Range,
    #[error("Corrupted cluster chain")]
    Corrupt,
}

impl Error {
    /// Stable negative errno, for VFS adapters that speak numeric codes.
    pub fn errno(&self) -> i32 {
        match self {
            Error::Io(_) => -5,
            Error::Media(error) => match error {
                MediaError::Range => -22,
                _ => -5,
            },
            Error::Fs(error) => match error {
                FsError::Invalid => -22,
                FsError::NotFound => -2,
                FsError::Exists => -17,
                FsError::NotADirectory => -20,
                FsError::IsADirectory => -21,
                FsError::NotEmpty => -39,
                FsError::NameTooLong => -36,
                FsError::NoSpace => -28,
                FsError::TooLarge => -27,
                FsError::WrongMedium => -124,
                FsError::Range => -34,
                FsError::Corrupt => -5,
            },
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
