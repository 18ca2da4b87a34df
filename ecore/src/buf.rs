use std::io::{ErrorKind, Read};

/// State of a stream after a `fill_buf` call.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Tail {
    /// Buffer was filled, more may follow
    Open,
    /// Clean end of stream
    Eof,
    /// The stream broke off, whatever was read before the error is still valid
    Truncated(ErrorKind),
}

impl Tail {
    pub fn is_end(&self) -> bool {
        !matches!(self, Tail::Open)
    }
}

// Remote servers routinely cut chunked responses short, so an error mid-read is reported as
// a kind of end instead of being propagated, and the bytes read so far are kept.
pub fn fill_buf<R: Read>(data: &mut R, buf: &mut [u8]) -> (Tail, usize) {
    let mut buf_read = 0;

    while buf_read < buf.len() {
        match data.read(&mut buf[buf_read..]) {
            Ok(0) => return (Tail::Eof, buf_read),
            Ok(x) => buf_read += x,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return (Tail::Truncated(e.kind()), buf_read),
        };
    }
    (Tail::Open, buf_read)
}
