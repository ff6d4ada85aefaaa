use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Render error: {0}")]
    Render(String),

    #[error("Body write attempted before head commit")]
    BodyBeforeHead,

    #[error("Flight output is already piped to a destination; multiple destinations are unsupported")]
    MultiplePipeDestinations,

    #[error("No streaming renderer is available in this runtime")]
    StreamingUnsupported,

    #[error("Output sink closed by the transport")]
    SinkClosed,

    #[error("Invalid hydration state: {0}")]
    InvalidState(#[from] serde_json::Error),

    #[error("Template error: {0}")]
    Template(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Programmer errors that indicate a protocol violation rather than a
    /// runtime condition. These are surfaced immediately and never retried.
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::BodyBeforeHead | Self::MultiplePipeDestinations)
    }

    /// Render failure with a displayable cause.
    pub fn render(cause: impl std::fmt::Display) -> Self {
        Self::Render(cause.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
