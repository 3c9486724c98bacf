//! Error types for network mutation operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalnetError {
    #[error("command failed: {command} (exit {code:?}): {message}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        message: String,
    },

    #[error("could not launch {command}: {message}")]
    CommandUnavailable { command: String, message: String },

    #[error("required tool `{0}` was not found on $PATH")]
    ToolMissing(&'static str),

    #[error("`{0}` did not report a usable version")]
    VersionProbe(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unsupported subnet prefix /{0}: only /8, /16 and /24 are supported")]
    UnsupportedPrefix(u8),

    #[error("permission denied - run as root (sudo)")]
    PermissionDenied,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LocalnetError>;
