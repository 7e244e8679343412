use bytes::{Bytes, BytesMut};
use flate2::{Decompress, FlushDecompress, Status};

use crate::error::DecodeError;

const CHUNK: usize = 8 * 1024;

/// Decodes `Content-Encoding: deflate` / `Transfer-Encoding: deflate`.
///
/// HTTP's "deflate" is notoriously ambiguous: RFC 2616 specifies the zlib
/// format (RFC 1950), but plenty of servers (notably older IIS/Microsoft
/// stacks) emit raw RFC 1951 deflate with no zlib wrapper. We hedge by
/// running both inflaters against the first chunk of input and adopting
/// whichever one doesn't error.
pub struct DeflateDecoder {
    state: State,
    finished: bool,
}

enum State {
    Undetermined {
        zlib: Box<Decompress>,
        raw: Box<Decompress>,
    },
    Adopted(Box<Decompress>),
}

impl DeflateDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Undetermined {
                zlib: Box::new(Decompress::new(true)),
                raw: Box::new(Decompress::new(false)),
            },
            finished: false,
        }
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn feed(&mut self, input: &[u8], is_final: bool) -> Result<Bytes, DecodeError> {
        let (out, done) = match &mut self.state {
            State::Undetermined { zlib, raw } => {
                if let Ok(result) = run(zlib, input, is_final) {
                    let adopted = std::mem::replace(zlib, Box::new(Decompress::new(true)));
                    self.state = State::Adopted(adopted);
                    result
                } else {
                    match run(raw, input, is_final) {
                        Ok(result) => {
                            let adopted = std::mem::replace(raw, Box::new(Decompress::new(false)));
                            self.state = State::Adopted(adopted);
                            result
                        }
                        Err(_) => {
                            return Err(DecodeError::Framing(
                                "deflate stream is neither valid zlib nor raw deflate".into(),
                            ))
                        }
                    }
                }
            }
            State::Adopted(d) => run(d, input, is_final)?,
        };
        self.finished = done;
        Ok(out)
    }
}

fn run(d: &mut Decompress, input: &[u8], is_final: bool) -> Result<(Bytes, bool), DecodeError> {
    let flush = if is_final {
        FlushDecompress::Finish
    } else {
        FlushDecompress::None
    };

    let mut out = BytesMut::new();
    let mut scratch = vec![0u8; CHUNK];
    let consumed_before = d.total_in();
    let mut done = false;

    loop {
        let consumed_so_far = (d.total_in() - consumed_before) as usize;
        let before_out = d.total_out();
        let status = d
            .decompress(&input[consumed_so_far..], &mut scratch, flush)
            .map_err(|e| DecodeError::Framing(format!("deflate error: {}", e)))?;
        let produced = (d.total_out() - before_out) as usize;
        out.extend_from_slice(&scratch[..produced]);

        match status {
            Status::Ok | Status::BufError if produced > 0 => continue,
            Status::StreamEnd => {
                done = true;
                break;
            }
            _ => break,
        }
    }

    Ok((out.freeze(), done))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zlib_compress(data: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn raw_compress(data: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn decodes_zlib_wrapped_stream() {
        let payload = b"hello deflate world";
        let compressed = zlib_compress(payload);
        let mut d = DeflateDecoder::new();
        let out = d.feed(&compressed, true).unwrap();
        assert_eq!(&out[..], payload);
    }

    #[test]
    fn decodes_raw_deflate_stream() {
        let payload = b"hello raw deflate world";
        let compressed = raw_compress(payload);
        let mut d = DeflateDecoder::new();
        let out = d.feed(&compressed, true).unwrap();
        assert_eq!(&out[..], payload);
    }

    #[test]
    fn rejects_garbage() {
        let mut d = DeflateDecoder::new();
        assert!(d.feed(b"not a deflate stream at all", true).is_err());
    }
}
