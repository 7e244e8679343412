use bytes::{Buf, BytesMut};

use crate::decode::Decoder;
use crate::error::DecodeError;
use crate::message::{Request, Response};
use crate::url::CRLF;

/// Status codes that never carry a body regardless of framing headers
/// (1xx, 204, 304) — mirrors `twisted.web.http.NO_BODY_CODES`.
fn has_no_body(status: u16) -> bool {
    matches!(status, 100..=199 | 204 | 304)
}

pub const OKAY_CODES: std::ops::Range<u16> = 200..300;
pub const REDIRECT_CODES: [u16; 4] = [301, 303, 302, 307];
pub const RETRY_CODES: [u16; 1] = [503];
pub const UNAUTHORIZED_CODES: [u16; 1] = [401];

/// Where a connection's read loop is within a single response.
enum ParseState {
    StatusLine,
    Headers,
    Body,
}

/// What happened after handing a chunk of socket bytes to the engine.
pub enum Outcome {
    /// Need more bytes before anything can happen.
    NeedMore,
    /// A response finished; `trailing` is whatever came after it in the same
    /// read (only non-empty with pipelining).
    Complete { trailing: BytesMut },
}

/// Parses one HTTP/1.1 response off the wire into a `Response`, handling
/// status-line/header framing and then body framing (chunked,
/// Content-Length, or read-until-close).
///
/// One `ConnectionParser` exists per in-flight response; `Requester` drives
/// it with bytes as they arrive and recycles it for the next response on the
/// same connection.
pub struct ConnectionParser {
    state: ParseState,
    buffer: BytesMut,
    response: Response,
    content_length: Option<u64>,
    content_size: u64,
    chunk_decoder: Option<Decoder>,
    content_decoders: Vec<Decoder>,
}

impl ConnectionParser {
    pub fn new(request: Request) -> Self {
        Self {
            state: ParseState::StatusLine,
            buffer: BytesMut::new(),
            response: Response::new(request),
            content_length: None,
            content_size: 0,
            chunk_decoder: None,
            content_decoders: Vec::new(),
        }
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn into_response(self) -> Response {
        self.response
    }

    /// Feeds freshly-read socket bytes in. Call repeatedly until it returns
    /// `Outcome::Complete`.
    pub fn feed(&mut self, input: &[u8]) -> Result<Outcome, DecodeError> {
        self.buffer.extend_from_slice(input);

        loop {
            match self.state {
                ParseState::StatusLine => match take_line(&mut self.buffer) {
                    Some(line) => self.parse_status_line(&line)?,
                    None => return Ok(Outcome::NeedMore),
                },
                ParseState::Headers => match take_line(&mut self.buffer) {
                    Some(line) if line.is_empty() => {
                        self.end_headers();
                        if self.has_content() {
                            self.state = ParseState::Body;
                        } else {
                            self.response.done().map_err(to_decode_err)?;
                            let trailing = std::mem::take(&mut self.buffer);
                            return Ok(Outcome::Complete { trailing });
                        }
                    }
                    Some(line) => self.parse_header_line(&line)?,
                    None => return Ok(Outcome::NeedMore),
                },
                ParseState::Body => match self.process_body()? {
                    Some(trailing) => return Ok(Outcome::Complete { trailing }),
                    None => return Ok(Outcome::NeedMore),
                },
            }
        }
    }

    fn parse_status_line(&mut self, line: &str) -> Result<(), DecodeError> {
        let mut parts = line.splitn(3, ' ');
        let version = parts
            .next()
            .ok_or_else(|| DecodeError::Framing("missing http version".into()))?;
        let status = parts
            .next()
            .ok_or_else(|| DecodeError::Framing("missing status code".into()))?;
        let message = parts.next().unwrap_or("");

        let status: u16 = status
            .parse()
            .map_err(|_| DecodeError::Framing(format!("invalid status code: {:?}", status)))?;
        if status == 0 || status >= 1000 {
            return Err(DecodeError::Framing(format!("invalid status code: {}", status)));
        }

        self.response
            .got_status(version.to_string(), status, message.to_string());
        self.state = ParseState::Headers;
        Ok(())
    }

    fn parse_header_line(&mut self, line: &str) -> Result<(), DecodeError> {
        let (key, value) = line
            .split_once(": ")
            .ok_or_else(|| DecodeError::Framing(format!("malformed header line: {:?}", line)))?;
        self.response.got_header(key, value);
        Ok(())
    }

    fn end_headers(&mut self) {
        if let Some(len) = self.response.headers.get("content-length") {
            if let Ok(len) = len.parse() {
                self.content_length = Some(len);
            }
        }
        self.load_body_decoders();
    }

    fn load_body_decoders(&mut self) {
        if let Some(encodings) = self.response.headers.get("transfer-encoding") {
            for token in encodings.to_string().split(',') {
                let token = token.trim();
                if token.eq_ignore_ascii_case("chunked") {
                    self.chunk_decoder = Decoder::for_token(token);
                } else if let Some(d) = Decoder::for_token(token) {
                    self.content_decoders.push(d);
                }
            }
        }
    }

    fn has_content(&self) -> bool {
        let status = self.response.status;
        let is_head = self.response.request.method.eq_ignore_ascii_case("HEAD");
        !(has_no_body(status) || is_head || self.content_length == Some(0))
    }

    /// Consumes as much of `self.buffer` as is available for the current
    /// framing mode, feeding decoded content into the response. Returns
    /// `Some(trailing_bytes)` once the body is fully read.
    fn process_body(&mut self) -> Result<Option<BytesMut>, DecodeError> {
        if let Some(decoder) = &mut self.chunk_decoder {
            let chunk_input = self.buffer.split();
            let decoded = decoder.feed(&chunk_input, false)?;
            let finished = decoder.finished();
            let trailing = if finished { decoder.take_trailing() } else { bytes::Bytes::new() };

            let content = decode_content(&mut self.content_decoders, decoded, finished)?;
            self.content_size += content.len() as u64;
            self.response
                .data_received(content, finished)
                .map_err(to_decode_err)?;

            if finished {
                self.chunk_decoder = None;
                let mut rest = BytesMut::new();
                rest.extend_from_slice(&trailing);
                return Ok(Some(rest));
            }
            return Ok(None);
        }

        let available = self.buffer.len() as u64;
        let (data_len, final_chunk) = match self.content_length {
            Some(total) => {
                let remaining = total - self.content_size;
                if available >= remaining {
                    (remaining, true)
                } else {
                    (available, false)
                }
            }
            None => (available, false),
        };

        let data = self.buffer.split_to(data_len as usize).freeze();
        self.content_size += data.len() as u64;
        let content = decode_content(&mut self.content_decoders, data, final_chunk)?;
        self.response
            .data_received(content, final_chunk)
            .map_err(to_decode_err)?;

        if final_chunk {
            let trailing = std::mem::take(&mut self.buffer);
            return Ok(Some(trailing));
        }
        Ok(None)
    }
}

fn decode_content(
    decoders: &mut [Decoder],
    mut data: bytes::Bytes,
    is_final: bool,
) -> Result<bytes::Bytes, DecodeError> {
    for decoder in decoders {
        data = decoder.feed(&data, is_final)?;
    }
    Ok(data)
}

fn to_decode_err(e: crate::error::AgentError) -> DecodeError {
    DecodeError::Framing(e.to_string())
}

/// Pulls a single CRLF-terminated line out of `buf`, if a complete one is
/// buffered. Leaves partial lines (and everything after) untouched.
fn take_line(buf: &mut BytesMut) -> Option<String> {
    let idx = buf.windows(2).position(|w| w == b"\r\n")?;
    let line = buf.split_to(idx);
    buf.advance(CRLF.len());
    String::from_utf8(line.to_vec()).ok()
}

/// Classifies a completed response the way the Agent's control loop needs:
/// success, redirect, retryable, unauthorized, or a bare web error.
pub enum Classification {
    Okay,
    Redirect,
    Retry,
    Unauthorized,
    Error,
}

pub fn classify(status: u16) -> Classification {
    if REDIRECT_CODES.contains(&status) {
        Classification::Redirect
    } else if RETRY_CODES.contains(&status) {
        Classification::Retry
    } else if UNAUTHORIZED_CODES.contains(&status) {
        Classification::Unauthorized
    } else if OKAY_CODES.contains(&status) {
        Classification::Okay
    } else {
        Classification::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::Url;

    fn request() -> Request {
        Request::get(Url::parse("http://example.com/").unwrap())
    }

    #[test]
    fn parses_content_length_body() {
        let mut parser = ConnectionParser::new(request());
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        match parser.feed(wire).unwrap() {
            Outcome::Complete { trailing } => assert!(trailing.is_empty()),
            Outcome::NeedMore => panic!("expected complete response"),
        }
        assert_eq!(parser.response().status, 200);
        assert_eq!(parser.response().data_length(), 5);
    }

    #[test]
    fn parses_chunked_body_with_pipelined_trailing() {
        let mut parser = ConnectionParser::new(request());
        let wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\nHTTP/1.1 200 OK\r\n";
        match parser.feed(wire).unwrap() {
            Outcome::Complete { trailing } => {
                assert_eq!(&trailing[..], b"HTTP/1.1 200 OK\r\n");
            }
            Outcome::NeedMore => panic!("expected complete response"),
        }
        assert_eq!(parser.response().data_length(), 5);
    }

    #[test]
    fn no_body_for_head_request() {
        let mut req = request();
        req.method = "HEAD".to_string();
        let mut parser = ConnectionParser::new(req);
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 128\r\n\r\n";
        match parser.feed(wire).unwrap() {
            Outcome::Complete { .. } => {}
            Outcome::NeedMore => panic!("HEAD response should complete at end of headers"),
        }
        assert_eq!(parser.response().data_length(), 0);
    }

    #[test]
    fn no_body_for_204() {
        let mut parser = ConnectionParser::new(request());
        let wire = b"HTTP/1.1 204 No Content\r\n\r\n";
        match parser.feed(wire).unwrap() {
            Outcome::Complete { .. } => {}
            Outcome::NeedMore => panic!("204 response should complete at end of headers"),
        }
    }

    #[test]
    fn handles_split_feeds_across_status_and_headers() {
        let mut parser = ConnectionParser::new(request());
        assert!(matches!(
            parser.feed(b"HTTP/1.1 200").unwrap(),
            Outcome::NeedMore
        ));
        assert!(matches!(
            parser.feed(b" OK\r\nContent-Length: 2\r\n").unwrap(),
            Outcome::NeedMore
        ));
        match parser.feed(b"\r\nhi").unwrap() {
            Outcome::Complete { trailing } => assert!(trailing.is_empty()),
            Outcome::NeedMore => panic!("expected complete response"),
        }
    }
}
