use base64::Engine;
use md5::{Digest, Md5};

use crate::decode::{load_decoders, Decoder};
use crate::error::AgentError;
use crate::message::headers::Headers;
use crate::message::request::Request;
use crate::message::sink::Sink;

/// An inbound HTTP response, assembled incrementally as the protocol engine
/// hands it header lines and body chunks.
///
/// Decoding (`Content-Encoding`) happens here rather than in the protocol
/// engine: the engine's job is framing (how many bytes make up the body),
/// this struct's job is content (what those bytes actually mean). The
/// running `Content-MD5` digest is computed over *decoded* bytes, matching
/// what a server would have hashed before encoding on its end.
pub struct Response {
    pub version: String,
    pub status: u16,
    pub message: String,
    pub headers: Headers,
    pub request: Request,
    pub close_connection: bool,

    decoders: Vec<Decoder>,
    data_length: u64,
    md5: Md5,
    sink: Sink,
}

impl Response {
    pub fn new(request: Request) -> Self {
        Self {
            version: String::new(),
            status: 0,
            message: String::new(),
            headers: Headers::new(),
            request,
            close_connection: false,
            decoders: Vec::new(),
            data_length: 0,
            md5: Md5::new(),
            sink: Sink::buffer(),
        }
    }

    pub fn with_sink(mut self, sink: Sink) -> Self {
        self.sink = sink;
        self
    }

    pub fn has_status(&self) -> bool {
        !self.version.is_empty() && self.status > 0 && self.status < 1000
    }

    pub fn got_status(&mut self, version: String, status: u16, message: String) {
        self.version = version;
        self.status = status;
        self.message = message;
    }

    /// Records a header line, reacting to the handful of headers that
    /// change how the body must be interpreted (`Connection: close`,
    /// `Content-Encoding`).
    pub fn got_header(&mut self, name: &str, value: &str) {
        self.headers.append(name.to_string(), value.to_string());

        if name.eq_ignore_ascii_case("connection") && value.eq_ignore_ascii_case("close") {
            self.close_connection = true;
        } else if name.eq_ignore_ascii_case("content-encoding") {
            for encoding in value.split(',') {
                self.decoders.extend(load_decoders(encoding.trim()));
            }
        }
    }

    /// Feeds raw (still content-encoded) body bytes through the decoder
    /// chain, then into the MD5 digest and the sink. `is_final` should be
    /// `true` exactly once, on the call that completes the body.
    pub fn data_received(&mut self, mut data: bytes::Bytes, is_final: bool) -> Result<(), AgentError> {
        for decoder in &mut self.decoders {
            data = decoder
                .feed(&data, is_final)
                .map_err(|e| AgentError::WebError {
                    status: self.status,
                    message: e.to_string(),
                })?;
        }

        self.data_length += data.len() as u64;
        self.md5.update(&data);
        self.sink
            .write(&data)
            .map_err(AgentError::from)?;

        Ok(())
    }

    pub fn done(&mut self) -> Result<(), AgentError> {
        self.data_received(bytes::Bytes::new(), true)
    }

    pub fn data_length(&self) -> u64 {
        self.data_length
    }

    /// Compares the running MD5 against a `Content-MD5` header, if present.
    /// No header means nothing to verify — this is opt-in integrity
    /// checking, not a requirement of the protocol.
    pub fn verify_digest(&self) -> Result<(), AgentError> {
        let Some(expected) = self.headers.get("content-md5") else {
            return Ok(());
        };
        let calculated = base64::engine::general_purpose::STANDARD.encode(self.md5.clone().finalize());
        if calculated != expected {
            return Err(AgentError::MD5Mismatch {
                calculated,
                expected: expected.to_string(),
            });
        }
        Ok(())
    }

    pub fn into_body(self) -> bytes::Bytes {
        self.sink.into_buffer()
    }
}
