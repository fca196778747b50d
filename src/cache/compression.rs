//! Gzip framing for cached payloads.
//!
//! Values larger than [`COMPRESS_THRESHOLD`] are wrapped in a single RFC 1952
//! member. The three magic bytes make every stored value self-describing, so
//! readers never need to know how a value was written.

use flate2::{
  Compress, CompressError, Compression, Crc, Decompress, DecompressError, FlushCompress,
  FlushDecompress, Status,
};
use std::sync::Arc;
use thiserror::Error;

use super::pool::Pool;

/// Payloads strictly larger than this are compressed.
pub const COMPRESS_THRESHOLD: usize = 4096;

/// ID1, ID2 and CM (deflate).
pub const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0, 0, 0, 0, 0, 0, 0xff];
const TRAILER_LEN: usize = 8;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;
const FRESERVED: u8 = 0xe0;

const DEFAULT_LEVEL: u32 = 6;
const DEFAULT_MAX_IDLE: usize = 64;

#[derive(Debug, Error)]
pub enum CompressionError {
  #[error("deflate: {0}")]
  Deflate(#[from] CompressError),
  #[error("inflate: {0}")]
  Inflate(#[from] DecompressError),
  #[error("invalid gzip header: {0}")]
  InvalidHeader(&'static str),
  #[error("gzip stream truncated")]
  Truncated,
  #[error("gzip checksum mismatch")]
  ChecksumMismatch,
  #[error("gzip length mismatch: expected {expected}, got {actual}")]
  LengthMismatch { expected: u32, actual: u32 },
}

pub fn is_gzipped(data: &[u8]) -> bool {
  data.starts_with(&GZIP_MAGIC)
}

pub fn should_compress(data: &[u8]) -> bool {
  data.len() > COMPRESS_THRESHOLD && !is_gzipped(data)
}

/// Pools of raw deflate and inflate states.
pub struct CoderPools {
  deflate: Pool<Compress>,
  inflate: Pool<Decompress>,
}

impl CoderPools {
  pub fn new(level: u32, max_idle: usize) -> Self {
    let level = Compression::new(level.min(9));
    Self {
      deflate: Pool::new(max_idle, move || Compress::new(level, false)),
      inflate: Pool::new(max_idle, || Decompress::new(false)),
    }
  }

  pub fn deflate(&self) -> &Pool<Compress> {
    &self.deflate
  }

  pub fn inflate(&self) -> &Pool<Decompress> {
    &self.inflate
  }
}

impl Default for CoderPools {
  fn default() -> Self {
    Self::new(DEFAULT_LEVEL, DEFAULT_MAX_IDLE)
  }
}

/// Decides when to compress and performs gzip wrap/unwrap with pooled coders.
#[derive(Clone)]
pub struct CompressionPolicy {
  pools: Arc<CoderPools>,
}

impl CompressionPolicy {
  pub fn new(pools: Arc<CoderPools>) -> Self {
    Self { pools }
  }

  pub fn pools(&self) -> &CoderPools {
    &self.pools
  }

  pub fn maybe_compress(&self, data: Vec<u8>) -> Result<Vec<u8>, CompressionError> {
    if should_compress(&data) {
      self.compress(&data)
    } else {
      Ok(data)
    }
  }

  pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut out = Vec::with_capacity(GZIP_HEADER.len() + input.len() / 2 + 64);
    out.extend_from_slice(&GZIP_HEADER);

    let mut deflate = self.pools.deflate.acquire();
    let base_in = deflate.total_in();
    loop {
      let consumed = (deflate.total_in() - base_in) as usize;
      if out.capacity() - out.len() < 64 {
        out.reserve(out.len().max(4096));
      }
      match deflate.compress_vec(&input[consumed..], &mut out, FlushCompress::Finish)? {
        Status::StreamEnd => break,
        Status::Ok | Status::BufError => {}
      }
    }
    drop(deflate);

    let mut crc = Crc::new();
    crc.update(input);
    out.extend_from_slice(&crc.sum().to_le_bytes());
    out.extend_from_slice(&crc.amount().to_le_bytes());
    Ok(out)
  }

  /// Unwrap a gzip member. Anything without the magic prefix is returned as is.
  pub fn decompress(&self, data: Vec<u8>) -> Result<Vec<u8>, CompressionError> {
    if !is_gzipped(&data) {
      return Ok(data);
    }

    let body = &data[parse_header(&data)?..];
    let mut out = Vec::with_capacity(body.len().saturating_mul(3));

    let mut inflate = self.pools.inflate.acquire();
    let base_in = inflate.total_in();
    loop {
      let consumed = (inflate.total_in() - base_in) as usize;
      if out.len() == out.capacity() {
        out.reserve(out.len().max(4096));
      }
      let produced = out.len();
      match inflate.decompress_vec(&body[consumed..], &mut out, FlushDecompress::None)? {
        Status::StreamEnd => break,
        Status::Ok | Status::BufError => {
          let progressed = (inflate.total_in() - base_in) as usize != consumed || out.len() != produced;
          if !progressed {
            return Err(CompressionError::Truncated);
          }
        }
      }
    }
    let consumed = (inflate.total_in() - base_in) as usize;
    drop(inflate);

    let trailer = body
      .get(consumed..consumed + TRAILER_LEN)
      .ok_or(CompressionError::Truncated)?;
    let expected_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let expected_len = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);

    let mut crc = Crc::new();
    crc.update(&out);
    if crc.sum() != expected_crc {
      return Err(CompressionError::ChecksumMismatch);
    }
    if crc.amount() != expected_len {
      return Err(CompressionError::LengthMismatch {
        expected: expected_len,
        actual: crc.amount(),
      });
    }
    Ok(out)
  }
}

impl Default for CompressionPolicy {
  fn default() -> Self {
    Self::new(Arc::new(CoderPools::default()))
  }
}

/// Returns the offset of the deflate body.
fn parse_header(data: &[u8]) -> Result<usize, CompressionError> {
  if data.len() < GZIP_HEADER.len() {
    return Err(CompressionError::Truncated);
  }
  let flags = data[3];
  if flags & FRESERVED != 0 {
    return Err(CompressionError::InvalidHeader("reserved flag bits set"));
  }

  let mut pos = GZIP_HEADER.len();
  if flags & FEXTRA != 0 {
    let xlen = data.get(pos..pos + 2).ok_or(CompressionError::Truncated)?;
    pos += 2 + u16::from_le_bytes([xlen[0], xlen[1]]) as usize;
  }
  if flags & FNAME != 0 {
    pos = skip_zero_terminated(data, pos)?;
  }
  if flags & FCOMMENT != 0 {
    pos = skip_zero_terminated(data, pos)?;
  }
  if flags & FHCRC != 0 {
    pos += 2;
  }

  if pos > data.len() {
    return Err(CompressionError::Truncated);
  }
  Ok(pos)
}

fn skip_zero_terminated(data: &[u8], pos: usize) -> Result<usize, CompressionError> {
  let rest = data.get(pos..).ok_or(CompressionError::Truncated)?;
  let nul = rest
    .iter()
    .position(|&b| b == 0)
    .ok_or(CompressionError::Truncated)?;
  Ok(pos + nul + 1)
}
