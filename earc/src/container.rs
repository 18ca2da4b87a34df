use byteorder::{ByteOrder, LittleEndian};
use flate2::{Decompress, FlushDecompress, Status};
use log::debug;
use thiserror::Error;

// Raw header fragments carry 40 bytes of framing before the zlib stream, content fragments 32
pub const HEADER_PREFIX: usize = 40;
pub const CONTENT_PREFIX: usize = 32;

// Closes the container, this is the end tag the converter looks for
pub const TRAILER: [u8; 4] = [64, 0, 0, 0];

// Little endian u32 file length inside the container header
const LENGTH_FIELD: usize = 4;

const INFLATE_STEP: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ArcError {
    #[error("fragment is {len} bytes, shorter than its {prefix} byte prefix")]
    Short { len: usize, prefix: usize },
    #[error("corrupt deflate stream: {0}")]
    Inflate(#[from] flate2::DecompressError),
    #[error("deflate stream ends early after {0} bytes of input")]
    Truncated(u64),
    #[error("header is {0} bytes, no room for the length field")]
    HeaderTooSmall(usize),
}

/// Inflate a zlib stream, the stream must be complete. Anything after its end is ignored.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>, ArcError> {
    let mut inflater = Decompress::new(true);
    let mut out = Vec::with_capacity(data.len() * 2);

    loop {
        out.reserve(INFLATE_STEP);

        let before_in = inflater.total_in();
        let before_out = inflater.total_out();
        let status = inflater.decompress_vec(
            &data[before_in as usize..],
            &mut out,
            FlushDecompress::None,
        )?;

        match status {
            Status::StreamEnd => return Ok(out),
            Status::Ok | Status::BufError => {
                // No progress with room to spare means the input ran dry
                if inflater.total_in() == before_in && inflater.total_out() == before_out {
                    return Err(ArcError::Truncated(inflater.total_in()));
                }
            }
        }
    }
}

fn skip(bytes: &[u8], prefix: usize) -> Result<&[u8], ArcError> {
    bytes.get(prefix..).ok_or(ArcError::Short {
        len: bytes.len(),
        prefix,
    })
}

fn patch_length(buf: &mut [u8]) -> Result<(), ArcError> {
    if buf.len() < LENGTH_FIELD + 4 {
        return Err(ArcError::HeaderTooSmall(buf.len()));
    }
    let len = buf.len() as u32;
    LittleEndian::write_u32(&mut buf[LENGTH_FIELD..LENGTH_FIELD + 4], len);
    Ok(())
}

/// Inflate a level header fragment and fix up its length field.
pub fn decompress_header(bytes: &[u8]) -> Result<Vec<u8>, ArcError> {
    let mut header = inflate(skip(bytes, HEADER_PREFIX)?)?;
    patch_length(&mut header)?;
    Ok(header)
}

pub fn decompress_content(bytes: &[u8]) -> Result<Vec<u8>, ArcError> {
    inflate(skip(bytes, CONTENT_PREFIX)?)
}

/// Header + content + trailer, with the container length field set to the final size.
pub fn merge(header: &[u8], content: &[u8]) -> Result<Vec<u8>, ArcError> {
    if header.len() < LENGTH_FIELD + 4 {
        return Err(ArcError::HeaderTooSmall(header.len()));
    }

    let mut buf = Vec::with_capacity(header.len() + content.len() + TRAILER.len());
    buf.extend_from_slice(header);
    buf.extend_from_slice(content);
    buf.extend_from_slice(&TRAILER);
    patch_length(&mut buf)?;

    debug!(
        "container: {} header + {} content = {} bytes",
        header.len(),
        content.len(),
        buf.len()
    );
    Ok(buf)
}

/// Both raw fragments in, one container out.
pub fn reassemble(header_fragment: &[u8], content_fragment: &[u8]) -> Result<Vec<u8>, ArcError> {
    let header = decompress_header(header_fragment)?;
    let content = decompress_content(content_fragment)?;
    merge(&header, &content)
}
