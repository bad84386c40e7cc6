use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A binary or JSON payload had the wrong shape.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    /// The peer sent something outside of the worker protocol contract.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("`{url}` answered {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("scheme `{0}` is not supported")]
    UnsupportedScheme(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("gave up waiting after {0:?}")]
    Timeout(Duration),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// A user supplied map, reduce, sort or output function failed.
    #[error("{stage} function failed: {cause:#}")]
    Callback {
        stage: &'static str,
        cause: anyhow::Error,
    },
}

impl Error {
    pub fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn callback(stage: &'static str, cause: impl Into<anyhow::Error>) -> Self {
        Error::Callback {
            stage,
            cause: cause.into(),
        }
    }
}
