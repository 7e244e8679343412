use bytes::{Bytes, BytesMut};

use crate::error::DecodeError;
use crate::url::CRLF;

/// Incrementally decodes `Transfer-Encoding: chunked` framing.
///
/// Consumes `hexlen CRLF payload CRLF` repetitions terminated by a
/// zero-length chunk. Buffers partial input across `feed()` calls so the
/// caller can hand it whatever arrives off the socket, one read at a time.
pub struct ChunkedDecoder {
    buffer: BytesMut,
    trailing: BytesMut,
    finished: bool,
}

enum ChunkHeader {
    Incomplete,
    Length(usize),
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            trailing: BytesMut::new(),
            finished: false,
        }
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn take_trailing(&mut self) -> Bytes {
        self.trailing.split().freeze()
    }

    pub fn feed(&mut self, input: &[u8]) -> Result<Bytes, DecodeError> {
        if self.finished {
            // Already terminated; anything fed after that is pipelined data
            // the caller shouldn't have routed here, but be defensive.
            self.trailing.extend_from_slice(input);
            return Ok(Bytes::new());
        }

        self.buffer.extend_from_slice(input);

        let mut content = BytesMut::new();
        loop {
            match Self::parse_chunk_length(&self.buffer)? {
                ChunkHeader::Incomplete => break,
                ChunkHeader::Length(0) => {
                    // Zero-length chunk: the common case has no trailers,
                    // just the blank line (`\r\n`) right after the length.
                    // Only scan for a double-CRLF when there's a trailer
                    // section to skip past.
                    let header_len = Self::chunk_header_len(&self.buffer)?;
                    let after_header = &self.buffer[header_len..];
                    if after_header.starts_with(CRLF.as_bytes()) {
                        let consumed = header_len + CRLF.len();
                        let rest = self.buffer.split_off(consumed);
                        self.buffer = rest;
                        self.finished = true;
                        break;
                    } else if let Some(term_idx) = find_double_crlf(after_header) {
                        let consumed = header_len + term_idx + 4;
                        let rest = self.buffer.split_off(consumed);
                        self.buffer = rest;
                        self.finished = true;
                        break;
                    } else {
                        break;
                    }
                }
                ChunkHeader::Length(len) => {
                    let header_len = Self::chunk_header_len(&self.buffer)?;
                    let needed = header_len + len + CRLF.len();
                    if self.buffer.len() < needed {
                        break;
                    }
                    content.extend_from_slice(&self.buffer[header_len..header_len + len]);
                    let rest = self.buffer.split_off(needed);
                    self.buffer = rest;
                }
            }
        }

        if self.finished {
            self.trailing = self.buffer.split();
        }

        Ok(content.freeze())
    }

    fn chunk_header_len(buf: &[u8]) -> Result<usize, DecodeError> {
        match find_crlf(buf) {
            Some(idx) => Ok(idx + CRLF.len()),
            None => Err(DecodeError::Framing("incomplete chunk header".into())),
        }
    }

    fn parse_chunk_length(buf: &[u8]) -> Result<ChunkHeader, DecodeError> {
        let idx = match find_crlf(buf) {
            Some(idx) => idx,
            None => return Ok(ChunkHeader::Incomplete),
        };
        // Chunk extensions (`;name=value`) are permitted after the length;
        // ignore everything from the first `;` onward.
        let len_field = &buf[..idx];
        let len_str = match len_field.iter().position(|&b| b == b';') {
            Some(semi) => &len_field[..semi],
            None => len_field,
        };
        if len_str.is_empty() {
            return Err(DecodeError::Framing("empty chunk length".into()));
        }
        let text = std::str::from_utf8(len_str)
            .map_err(|_| DecodeError::Framing("non-utf8 chunk length".into()))?;
        let len = usize::from_str_radix(text.trim(), 16)
            .map_err(|_| DecodeError::Framing(format!("invalid chunk length: {:?}", text)))?;
        Ok(ChunkHeader::Length(len))
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_chunk() {
        let mut d = ChunkedDecoder::new();
        let out = d.feed(b"5\r\nhello\r\n0\r\n\r\n").unwrap();
        assert_eq!(&out[..], b"hello");
        assert!(d.finished());
    }

    #[test]
    fn decodes_multiple_chunks() {
        let mut d = ChunkedDecoder::new();
        let out = d.feed(b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n").unwrap();
        assert_eq!(&out[..], b"Wikipedia");
        assert!(d.finished());
    }

    #[test]
    fn handles_split_feeds() {
        let mut d = ChunkedDecoder::new();
        let mut out = BytesMut::new();
        out.extend_from_slice(&d.feed(b"5\r\nhel").unwrap());
        out.extend_from_slice(&d.feed(b"lo\r\n0\r").unwrap());
        out.extend_from_slice(&d.feed(b"\n\r\n").unwrap());
        assert_eq!(&out[..], b"hello");
        assert!(d.finished());
    }

    #[test]
    fn rejects_invalid_length() {
        let mut d = ChunkedDecoder::new();
        assert!(d.feed(b"zz\r\nhello\r\n").is_err());
    }

    #[test]
    fn exposes_trailing_pipelined_bytes() {
        let mut d = ChunkedDecoder::new();
        let body = b"5\r\nhello\r\n0\r\n\r\nHTTP/1.1 200 OK\r\n";
        let out = d.feed(body).unwrap();
        assert_eq!(&out[..], b"hello");
        assert!(d.finished());
        let trailing = d.take_trailing();
        assert_eq!(&trailing[..], b"HTTP/1.1 200 OK\r\n");
    }
}
