use std::fs::File;
use std::io::{self, Write};

use bytes::{Bytes, BytesMut};

/// Where decoded response bytes end up.
///
/// Mirrors the original's `BufferedResponse`/`FileResponse`/`StreamResponse`
/// split: most callers just want the body buffered, some want it streamed
/// straight to disk, and a caller driving its own event loop wants a
/// callback per chunk instead of either.
pub enum Sink {
    Buffer(BytesMut),
    File(File),
    Callback(Box<dyn FnMut(&[u8]) + Send>),
    Discard,
}

impl Sink {
    pub fn buffer() -> Self {
        Sink::Buffer(BytesMut::new())
    }

    pub fn file(path: &str) -> io::Result<Self> {
        Ok(Sink::File(File::create(path)?))
    }

    pub fn callback(f: impl FnMut(&[u8]) + Send + 'static) -> Self {
        Sink::Callback(Box::new(f))
    }

    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Sink::Buffer(buf) => {
                buf.extend_from_slice(data);
                Ok(())
            }
            Sink::File(file) => file.write_all(data),
            Sink::Callback(f) => {
                f(data);
                Ok(())
            }
            Sink::Discard => Ok(()),
        }
    }

    /// Only meaningful for `Sink::Buffer`; panics otherwise. Callers that
    /// built a `BufferedResponse`-equivalent know which sink they used.
    pub fn into_buffer(self) -> Bytes {
        match self {
            Sink::Buffer(buf) => buf.freeze(),
            _ => panic!("into_buffer called on a non-buffering sink"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sink_accumulates() {
        let mut sink = Sink::buffer();
        sink.write(b"hello ").unwrap();
        sink.write(b"world").unwrap();
        assert_eq!(&sink.into_buffer()[..], b"hello world");
    }

    #[test]
    fn callback_sink_forwards_chunks() {
        use std::sync::{Arc, Mutex};
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let mut sink = Sink::callback(move |chunk| seen2.lock().unwrap().extend_from_slice(chunk));
        sink.write(b"a").unwrap();
        sink.write(b"b").unwrap();
        assert_eq!(&seen.lock().unwrap()[..], b"ab");
    }
}
