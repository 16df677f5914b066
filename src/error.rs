use std::fmt;

use crate::types::HvacMode;

#[derive(Debug)]
pub enum Error {
    /// Token acquisition was refused. `code` is `"http"` when the token
    /// endpoint answered with a non-2xx status.
    Auth { code: String, msg: String },
    Transport(reqwest::Error),
    Timeout,
    Http { status: u16 },
    /// 2xx response carrying `success: false`.
    Application { code: String, msg: String },
    Decode(serde_json::Error),
    InvalidSetpoint { value: f64, min: f64, max: f64 },
    UnsupportedMode(HvacMode),
    NotWritable(String),
    Disposed,
    Io(std::io::Error),
    InvalidConfig(String),
}

impl Error {
    /// Vendor error code carried by auth and application failures.
    pub fn upstream_code(&self) -> Option<&str> {
        match self {
            Error::Auth { code, .. } | Error::Application { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Auth { code, msg } => write!(f, "token acquisition failed: {code} {msg}"),
            Error::Transport(e) => write!(f, "transport error: {e}"),
            Error::Timeout => write!(f, "request timed out"),
            Error::Http { status } => write!(f, "HTTP {status}"),
            Error::Application { code, msg } => write!(f, "cloud error {code}: {msg}"),
            Error::Decode(e) => write!(f, "malformed response: {e}"),
            Error::InvalidSetpoint { value, min, max } => {
                write!(f, "setpoint {value} outside {min}..{max}")
            }
            Error::UnsupportedMode(mode) => write!(f, "unsupported hvac mode: {mode:?}"),
            Error::NotWritable(code) => write!(f, "data point {code} is read-only"),
            Error::Disposed => write!(f, "coordinator disposed"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => Some(e),
            Error::Decode(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else {
            Error::Transport(e)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
