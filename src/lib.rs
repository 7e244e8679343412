//! An asynchronous HTTP/1.1 client engine: connection pooling with
//! pipelining, redirect/auth/retry control flow, chunked and gzip/deflate
//! decoding, Content-MD5 verification, and SOCKSv4/SOCKSv4a proxying.

pub mod agent;
pub mod auth;
pub mod config;
pub mod cookie;
pub mod decode;
pub mod error;
pub mod message;
pub mod multiplexer;
pub mod protocol;
pub mod requester;
pub mod resolver;
pub mod socks;
pub mod url;

pub use agent::Agent;
pub use config::AgentConfig;
pub use error::{AgentError, DecodeError};
pub use message::{Headers, Request, Response, Sink};
pub use url::Url;
