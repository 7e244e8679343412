use bytes::{Bytes, BytesMut};
use crc32fast::Hasher;
use flate2::{Decompress, FlushDecompress, Status};

use crate::error::DecodeError;

const CHUNK: usize = 8 * 1024;

const FTEXT: u8 = 0x01;
const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;

/// Decodes `Content-Encoding: gzip` (RFC 1952): a fixed-ish header, a raw
/// deflate body, and an 8-byte trailer (CRC32 then ISIZE, both
/// little-endian). We buffer until the whole header (including any
/// optional FEXTRA/FNAME/FCOMMENT/FHCRC subfields) has arrived, then hand
/// everything after it straight to a raw deflate inflater, tracking the
/// running CRC and size ourselves so the trailer can be checked.
pub struct GzipDecoder {
    phase: Phase,
    header_buf: BytesMut,
    body: Decompress,
    crc: Hasher,
    size: u32,
    trailer_buf: BytesMut,
}

enum Phase {
    Header,
    Body,
    Trailer,
    Done,
}

impl GzipDecoder {
    pub fn new() -> Self {
        Self {
            phase: Phase::Header,
            header_buf: BytesMut::new(),
            body: Decompress::new(false),
            crc: Hasher::new(),
            size: 0,
            trailer_buf: BytesMut::new(),
        }
    }

    pub fn finished(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    pub fn feed(&mut self, input: &[u8], is_final: bool) -> Result<Bytes, DecodeError> {
        let mut out = BytesMut::new();

        if matches!(self.phase, Phase::Header) {
            self.header_buf.extend_from_slice(input);
            match parse_header(&self.header_buf)? {
                Some(header_len) => {
                    let rest = self.header_buf.split_off(header_len);
                    self.header_buf.clear();
                    self.phase = Phase::Body;
                    out.extend_from_slice(&self.feed_body(&rest, is_final)?);
                }
                None => return Ok(Bytes::new()),
            }
        } else if matches!(self.phase, Phase::Body) {
            out.extend_from_slice(&self.feed_body(input, is_final)?);
        } else if matches!(self.phase, Phase::Trailer) {
            self.trailer_buf.extend_from_slice(input);
        }

        if is_final && matches!(self.phase, Phase::Trailer) {
            self.verify_trailer()?;
            self.phase = Phase::Done;
        }

        Ok(out.freeze())
    }

    fn feed_body(&mut self, input: &[u8], is_final: bool) -> Result<Bytes, DecodeError> {
        let mut out = BytesMut::new();
        let mut scratch = vec![0u8; CHUNK];
        let consumed_before = self.body.total_in();

        loop {
            let consumed_so_far = (self.body.total_in() - consumed_before) as usize;
            let before_out = self.body.total_out();
            let status = self
                .body
                .decompress(&input[consumed_so_far..], &mut scratch, FlushDecompress::None)
                .map_err(|e| DecodeError::Framing(format!("gzip deflate error: {}", e)))?;
            let produced = (self.body.total_out() - before_out) as usize;
            out.extend_from_slice(&scratch[..produced]);
            self.crc.update(&scratch[..produced]);
            self.size = self.size.wrapping_add(produced as u32);

            match status {
                Status::StreamEnd => {
                    self.phase = Phase::Trailer;
                    break;
                }
                Status::Ok | Status::BufError if produced > 0 => continue,
                _ => break,
            }
        }

        if matches!(self.phase, Phase::Trailer) {
            let consumed_total = (self.body.total_in() - consumed_before) as usize;
            self.trailer_buf.extend_from_slice(&input[consumed_total..]);
            if is_final {
                self.verify_trailer()?;
                self.phase = Phase::Done;
            }
        }

        Ok(out.freeze())
    }

    fn verify_trailer(&mut self) -> Result<(), DecodeError> {
        if self.trailer_buf.len() < 8 {
            return Err(DecodeError::Framing("truncated gzip trailer".into()));
        }
        let crc_expected = u32::from_le_bytes(self.trailer_buf[0..4].try_into().unwrap());
        let size_expected = u32::from_le_bytes(self.trailer_buf[4..8].try_into().unwrap());

        let crc_actual = std::mem::replace(&mut self.crc, Hasher::new()).finalize();
        if crc_actual != crc_expected {
            return Err(DecodeError::Framing(format!(
                "gzip crc32 mismatch: calculated={:08x} expected={:08x}",
                crc_actual, crc_expected
            )));
        }
        if self.size != size_expected {
            return Err(DecodeError::Framing(format!(
                "gzip isize mismatch: calculated={} expected={}",
                self.size, size_expected
            )));
        }
        Ok(())
    }
}

/// Parses the fixed 10-byte gzip header plus any optional subfields.
/// Returns `Ok(Some(len))` once the full header has arrived, `Ok(None)` if
/// more bytes are needed, `Err` on a malformed header.
fn parse_header(buf: &[u8]) -> Result<Option<usize>, DecodeError> {
    if buf.len() < 10 {
        return Ok(None);
    }
    if buf[0] != 0x1f || buf[1] != 0x8b {
        return Err(DecodeError::Framing("bad gzip magic".into()));
    }
    if buf[2] != 0x08 {
        return Err(DecodeError::Framing(format!(
            "unsupported gzip compression method: {}",
            buf[2]
        )));
    }
    let flags = buf[3];
    let mut pos = 10usize;

    if flags & FEXTRA != 0 {
        if buf.len() < pos + 2 {
            return Ok(None);
        }
        let xlen = u16::from_le_bytes([buf[pos], buf[pos + 1]]) as usize;
        pos += 2;
        if buf.len() < pos + xlen {
            return Ok(None);
        }
        pos += xlen;
    }
    if flags & FNAME != 0 {
        match buf[pos..].iter().position(|&b| b == 0) {
            Some(idx) => pos += idx + 1,
            None => return Ok(None),
        }
    }
    if flags & FCOMMENT != 0 {
        match buf[pos..].iter().position(|&b| b == 0) {
            Some(idx) => pos += idx + 1,
            None => return Ok(None),
        }
    }
    if flags & FHCRC != 0 {
        if buf.len() < pos + 2 {
            return Ok(None);
        }
        pos += 2;
    }
    let _ = FTEXT;

    Ok(Some(pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn gzip_compress(data: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn decodes_small_payload() {
        let payload = b"hello gzip world, hello gzip world";
        let compressed = gzip_compress(payload);
        let mut d = GzipDecoder::new();
        let out = d.feed(&compressed, true).unwrap();
        assert_eq!(&out[..], &payload[..]);
    }

    #[test]
    fn handles_split_feeds() {
        let payload = b"split across reads to make sure buffering works";
        let compressed = gzip_compress(payload);
        let mut d = GzipDecoder::new();
        let mid = compressed.len() / 2;
        let mut out = BytesMut::new();
        out.extend_from_slice(&d.feed(&compressed[..mid], false).unwrap());
        out.extend_from_slice(&d.feed(&compressed[mid..], true).unwrap());
        assert_eq!(&out[..], &payload[..]);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut d = GzipDecoder::new();
        let bogus = vec![0u8; 20];
        assert!(d.feed(&bogus, true).is_err());
    }

    #[test]
    fn rejects_truncated_trailer() {
        let payload = b"truncate my trailer please";
        let compressed = gzip_compress(payload);
        let mut d = GzipDecoder::new();
        let short = &compressed[..compressed.len() - 4];
        assert!(d.feed(short, true).is_err());
    }
}
