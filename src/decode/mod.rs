mod chunked;
mod deflate;
mod gzip;

pub use chunked::ChunkedDecoder;
pub use deflate::DeflateDecoder;
pub use gzip::GzipDecoder;

use bytes::Bytes;

use crate::error::DecodeError;

/// A closed set of incremental decoders, dispatched through an enum rather
/// than a trait object (see `upstream/loadbalance.rs::LoadBalancer` in the
/// teacher — small fixed variant sets get an enum, open-ended collaborator
/// seams get a trait).
pub enum Decoder {
    Chunked(ChunkedDecoder),
    Deflate(DeflateDecoder),
    Gzip(GzipDecoder),
}

impl Decoder {
    /// Maps a `Transfer-Encoding`/`Content-Encoding` token to a constructed
    /// decoder. Unknown tokens return `None` — callers treat that as
    /// pass-through.
    pub fn for_token(token: &str) -> Option<Decoder> {
        match token.trim().to_lowercase().as_str() {
            "chunked" => Some(Decoder::Chunked(ChunkedDecoder::new())),
            "deflate" => Some(Decoder::Deflate(DeflateDecoder::new())),
            "gzip" | "x-gzip" => Some(Decoder::Gzip(GzipDecoder::new())),
            other => {
                tracing::debug!("decode: unknown encoding token {:?}, passing through", other);
                None
            }
        }
    }

    pub fn feed(&mut self, input: &[u8], is_final: bool) -> Result<Bytes, DecodeError> {
        match self {
            Decoder::Chunked(d) => d.feed(input),
            Decoder::Deflate(d) => d.feed(input, is_final),
            Decoder::Gzip(d) => d.feed(input, is_final),
        }
    }

    pub fn finished(&self) -> bool {
        match self {
            Decoder::Chunked(d) => d.finished(),
            Decoder::Deflate(d) => d.finished(),
            Decoder::Gzip(d) => d.finished(),
        }
    }

    /// Only meaningful for the chunked decoder: bytes read past the
    /// terminating `0\r\n\r\n` that belong to a pipelined response.
    pub fn take_trailing(&mut self) -> Bytes {
        match self {
            Decoder::Chunked(d) => d.take_trailing(),
            _ => Bytes::new(),
        }
    }
}

/// Parses a comma-separated `Transfer-Encoding`/`Content-Encoding` header
/// value into a list of decoders, in the order the tokens appear (which is
/// also the order they must be *un*-applied — innermost encoding last).
pub fn load_decoders(header_value: &str) -> Vec<Decoder> {
    header_value
        .split(',')
        .filter_map(Decoder::for_token)
        .collect()
}
