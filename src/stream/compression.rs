//! Raw DEFLATE over `miniz_oxide`'s streaming API.
//!
//! Both directions run through a fixed-size scratch window so their memory
//! use follows the configured buffer sizes rather than the payload size.

use bytes::{Bytes, BytesMut};
use miniz_oxide::{
    DataFormat,
    MZFlush,
    MZStatus,
    deflate::{core::CompressorOxide, stream::deflate},
    inflate::stream::{InflateState, inflate},
};

use super::StreamError;

/// Deflate `data` at `level`, using a `window`-byte output buffer.
pub(crate) fn compress(data: &[u8], level: u8, window: usize) -> Result<Bytes, StreamError> {
    let mut compressor = Box::<CompressorOxide>::default();
    compressor.set_format_and_level(DataFormat::Raw, level);
    let mut scratch = vec![0_u8; window.max(1)];
    let mut out = BytesMut::with_capacity(window.min(data.len()).max(16));
    let mut input = data;

    loop {
        let result = deflate(&mut compressor, input, &mut scratch, MZFlush::Finish);
        input = &input[result.bytes_consumed..];
        out.extend_from_slice(&scratch[..result.bytes_written]);
        match result.status {
            Ok(MZStatus::StreamEnd) => return Ok(out.freeze()),
            Ok(_) if result.bytes_consumed == 0 && result.bytes_written == 0 => {
                return Err(StreamError::Compression("deflate made no progress".into()));
            }
            Ok(_) => {}
            Err(err) => return Err(StreamError::Compression(format!("{err:?}"))),
        }
    }
}

/// Inflate `data`, failing once the output would exceed `max` bytes.
pub(crate) fn decompress(data: &[u8], window: usize, max: usize) -> Result<Bytes, StreamError> {
    let mut state = InflateState::new_boxed(DataFormat::Raw);
    let mut scratch = vec![0_u8; window.max(1)];
    let mut out = BytesMut::with_capacity(window.min(max));
    let mut input = data;

    loop {
        let result = inflate(&mut state, input, &mut scratch, MZFlush::None);
        input = &input[result.bytes_consumed..];
        if out.len() + result.bytes_written > max {
            return Err(StreamError::DecompressedTooLarge { max });
        }
        out.extend_from_slice(&scratch[..result.bytes_written]);
        match result.status {
            Ok(MZStatus::StreamEnd) if input.is_empty() => return Ok(out.freeze()),
            Ok(MZStatus::StreamEnd) => {
                return Err(StreamError::Decompression(format!(
                    "{} bytes after end of deflate stream",
                    input.len()
                )));
            }
            Ok(_) if result.bytes_consumed == 0 && result.bytes_written == 0 => {
                return Err(StreamError::Decompression("truncated deflate stream".into()));
            }
            Ok(_) => {}
            Err(err) => return Err(StreamError::Decompression(format!("{err:?}"))),
        }
    }
}
