use std::fmt;

use crate::auth::Challenge;
use crate::socks::SocksError;
use crate::url::UrlError;

/// Typed outcome of `Agent::open` / the protocol engine.
///
/// `Redirected`, `Unauthorized` and `Retry` are not "errors" in the usual
/// sense — they are classification results the Agent may recover from. They
/// still flow through `Result::Err` so callers who don't want to follow
/// redirects or retry can just propagate with `?`.
#[derive(Debug)]
pub enum AgentError {
    Redirected {
        status: u16,
        location: String,
    },
    Unauthorized {
        challenges: Vec<Challenge>,
    },
    Retry {
        status: u16,
        retry_after: u64,
    },
    Timeout {
        elapsed_ms: u64,
    },
    MD5Mismatch {
        calculated: String,
        expected: String,
    },
    InsecureAuthentication,
    TooManyConnections {
        key: String,
    },
    IncompleteResponse,
    WebError {
        status: u16,
        message: String,
    },
    Socks(SocksError),
    Url(UrlError),
    Io(std::io::Error),
    Tls(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Redirected { status, location } => {
                write!(f, "redirected: {} -> {}", status, location)
            }
            AgentError::Unauthorized { challenges } => {
                write!(f, "unauthorized: {} challenge(s)", challenges.len())
            }
            AgentError::Retry {
                status,
                retry_after,
            } => write!(f, "retry: status {} after {}s", status, retry_after),
            AgentError::Timeout { elapsed_ms } => write!(f, "timed out after {}ms", elapsed_ms),
            AgentError::MD5Mismatch {
                calculated,
                expected,
            } => write!(
                f,
                "content-md5 mismatch: calculated={} expected={}",
                calculated, expected
            ),
            AgentError::InsecureAuthentication => {
                write!(f, "refusing to send authorization over a plaintext connection")
            }
            AgentError::TooManyConnections { key } => {
                write!(f, "too many connections for {}", key)
            }
            AgentError::IncompleteResponse => write!(f, "incomplete response"),
            AgentError::WebError { status, message } => write!(f, "http error {}: {}", status, message),
            AgentError::Socks(e) => write!(f, "socks error: {}", e),
            AgentError::Url(e) => write!(f, "url error: {}", e),
            AgentError::Io(e) => write!(f, "io error: {}", e),
            AgentError::Tls(msg) => write!(f, "tls error: {}", msg),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Io(e)
    }
}

impl From<UrlError> for AgentError {
    fn from(e: UrlError) -> Self {
        AgentError::Url(e)
    }
}

impl From<SocksError> for AgentError {
    fn from(e: SocksError) -> Self {
        AgentError::Socks(e)
    }
}

/// Errors from the incremental decoder pipeline (chunked/deflate/gzip).
#[derive(Debug)]
pub enum DecodeError {
    Framing(String),
    Io(std::io::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Framing(msg) => write!(f, "framing error: {}", msg),
            DecodeError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<std::io::Error> for DecodeError {
    fn from(e: std::io::Error) -> Self {
        DecodeError::Io(e)
    }
}
