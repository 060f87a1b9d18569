use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedErrorCode {
    Network,
    Decode,
    NotFound,
    PreconditionFailed,
    InvalidArgument,
}

impl FeedErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedErrorCode::Network => "feed/network",
            FeedErrorCode::Decode => "feed/decode",
            FeedErrorCode::NotFound => "feed/not-found",
            FeedErrorCode::PreconditionFailed => "feed/precondition-failed",
            FeedErrorCode::InvalidArgument => "feed/invalid-argument",
        }
    }
}

#[derive(Clone, Debug)]
pub struct FeedError {
    pub code: FeedErrorCode,
    message: String,
}

impl FeedError {
    pub fn new(code: FeedErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl Display for FeedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for FeedError {}

pub type FeedResult<T> = Result<T, FeedError>;

/// Transient transport failure; the operation is fully retryable.
pub fn network_error(message: impl Into<String>) -> FeedError {
    FeedError::new(FeedErrorCode::Network, message)
}

/// A stored document could not be decoded into the expected shape.
pub fn decode_error(message: impl Into<String>) -> FeedError {
    FeedError::new(FeedErrorCode::Decode, message)
}

/// The targeted document no longer exists.
pub fn not_found(message: impl Into<String>) -> FeedError {
    FeedError::new(FeedErrorCode::NotFound, message)
}

/// An async result arrived for a state that has since been superseded.
pub fn precondition_failed(message: impl Into<String>) -> FeedError {
    FeedError::new(FeedErrorCode::PreconditionFailed, message)
}

pub fn invalid_argument(message: impl Into<String>) -> FeedError {
    FeedError::new(FeedErrorCode::InvalidArgument, message)
}
