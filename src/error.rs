use thiserror::Error;

#[derive(Debug, Error)]
pub enum CwError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Audio sink is held by another keying source")]
    Busy,

    #[error("Tone queue is full")]
    QueueFull,

    #[error("No such character or representation")]
    NotFound,

    #[error("Receive buffer is full")]
    BufferFull,

    #[error("Operation not valid in the current state")]
    StateError,

    #[error("Not enough data yet, retry later")]
    RetryLater,

    #[error("Wait would never complete")]
    Deadlock,

    #[error("Tone too short, ignored as noise")]
    TooShort,

    #[error("Tone length not recognized as dot or dash")]
    NotRecognized,

    #[error("System error: {0}")]
    System(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),
}

impl CwError {
    pub(crate) fn invalid(what: impl Into<String>) -> Self {
        CwError::InvalidArgument(what.into())
    }

    /// `RetryLater` is the normal "keep polling" result of the receive path.
    pub fn is_retry_later(&self) -> bool {
        matches!(self, CwError::RetryLater)
    }
}

pub type Result<T> = std::result::Result<T, CwError>;
