//! Streaming base64 decoder.
//!
//! Decodes the BIND payload straight into the bundle file through a
//! fixed-size buffer, so peak memory does not grow with the bundle.
//!
//! Decoding is permissive: padding, line breaks and any byte outside the
//! standard alphabet are skipped rather than rejected.

use bytes::BytesMut;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Decoded bytes held before each write to the destination.
pub const FLUSH_THRESHOLD: usize = 8192;

const INVALID: u8 = 0xFF;

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

const DECODE_TABLE: [u8; 256] = build_decode_table();

const fn build_decode_table() -> [u8; 256] {
    let mut table = [INVALID; 256];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
}

/// Incremental decoder writing to any [`Write`] destination.
pub struct StreamDecoder<W: Write> {
    writer: W,
    buffer: BytesMut,
    accumulator: u32,
    bits: u32,
    written: u64,
}

impl<W: Write> StreamDecoder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffer: BytesMut::with_capacity(FLUSH_THRESHOLD),
            accumulator: 0,
            bits: 0,
            written: 0,
        }
    }

    /// Decode another chunk of input. May be called any number of times.
    pub fn feed(&mut self, input: &[u8]) -> io::Result<()> {
        for &c in input {
            if matches!(c, b'=' | b'\n' | b'\r') {
                continue;
            }
            let value = DECODE_TABLE[c as usize];
            if value == INVALID {
                continue;
            }

            self.accumulator = (self.accumulator << 6) | u32::from(value);
            self.bits += 6;
            if self.bits >= 8 {
                self.bits -= 8;
                self.buffer.extend_from_slice(&[(self.accumulator >> self.bits) as u8]);
                self.accumulator &= (1 << self.bits) - 1;
            }

            if self.buffer.len() >= FLUSH_THRESHOLD {
                self.flush_buffer()?;
            }
        }
        Ok(())
    }

    /// Write out the remainder and return the destination with the byte count.
    ///
    /// Leftover bits that do not form a whole byte are dropped.
    pub fn finish(mut self) -> io::Result<(W, u64)> {
        self.flush_buffer()?;
        self.writer.flush()?;
        Ok((self.writer, self.written))
    }

    fn flush_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.writer.write_all(&self.buffer)?;
        self.written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }
}

/// Decode `input` into the file at `path`, truncating any previous content.
///
/// Returns the number of decoded bytes written.
pub fn decode_to_file(input: &str, path: &Path) -> Result<u64, DecodeError> {
    let file = File::create(path).map_err(|e| DecodeError::Open(path.to_path_buf(), e))?;

    let mut decoder = StreamDecoder::new(file);
    decoder
        .feed(input.as_bytes())
        .map_err(|e| DecodeError::Write(path.to_path_buf(), e))?;
    let (_, written) = decoder
        .finish()
        .map_err(|e| DecodeError::Write(path.to_path_buf(), e))?;

    Ok(written)
}

/// Bundle decode errors
#[derive(Debug)]
pub enum DecodeError {
    Open(PathBuf, io::Error),
    Write(PathBuf, io::Error),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Open(path, e) => {
                write!(f, "Failed to open output file '{}': {}", path.display(), e)
            }
            DecodeError::Write(path, e) => {
                write!(f, "Failed to write output file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for DecodeError {}
