//! MessagePack envelope for cached values.
//!
//! Structs are written as maps keyed by field name so that adding optional
//! fields does not invalidate entries already in the cache. The encoding is
//! not canonical across codec upgrades.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
  #[error("encode: {0}")]
  Encode(#[from] rmp_serde::encode::Error),
  #[error("decode: {0}")]
  Decode(#[from] rmp_serde::decode::Error),
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
  Ok(rmp_serde::to_vec_named(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
  Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{DateTime, TimeZone, Utc};
  use serde::Deserialize;

  #[derive(Debug, PartialEq, Serialize, Deserialize)]
  struct Exposure {
    frame: i64,
    target: String,
    taken_at: DateTime<Utc>,
    seeing: f64,
    histogram: Vec<i32>,
    raw: Vec<u8>,
    meta: Meta,
  }

  #[derive(Debug, PartialEq, Serialize, Deserialize)]
  struct Meta {
    filter: Option<String>,
    gain: u16,
  }

  fn exposure() -> Exposure {
    Exposure {
      frame: -42,
      target: "M31 仙女座".into(),
      taken_at: Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap(),
      seeing: 1.25,
      histogram: vec![1, -2, 3, i32::MAX],
      raw: vec![0, 255, 17],
      meta: Meta {
        filter: Some("Ha".into()),
        gain: 139,
      },
    }
  }

  #[test]
  fn test_nested_struct_with_time() {
    let value = exposure();
    let bytes = encode(&value).unwrap();
    let back: Exposure = decode(&bytes).unwrap();
    assert_eq!(back, value);
    assert_eq!(back.taken_at.timestamp_subsec_nanos(), 123_456_789);
  }

  #[test]
  fn test_shape_mismatch() {
    let bytes = encode(&vec!["a", "b"]).unwrap();
    let err = decode::<Exposure>(&bytes).unwrap_err();
    assert!(matches!(err, CodecError::Decode(_)));
  }

  #[test]
  fn test_truncated_input() {
    let bytes = encode(&exposure()).unwrap();
    let err = decode::<Exposure>(&bytes[..bytes.len() / 2]).unwrap_err();
    assert!(matches!(err, CodecError::Decode(_)));
  }

  #[test]
  fn test_unsized_string() {
    let bytes = encode("hello world!").unwrap();
    assert_eq!(decode::<String>(&bytes).unwrap(), "hello world!");
  }
}
