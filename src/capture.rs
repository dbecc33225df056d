//! Captured exchange records emitted by the interception engine

use bytes::Bytes;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::HashMap;
use time::OffsetDateTime;

/// One intercepted GraphQL exchange.
///
/// Created by the engine after the upstream response has been received,
/// immutable thereafter. Persisted exactly once and broadcast exactly once;
/// the broadcast payload is the JSON encoding of this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedExchange {
  /// Opaque unique id (`trf_` + 128-bit random hex)
  pub id: String,
  /// Capture time (UTC)
  #[serde(with = "time::serde::rfc3339")]
  pub timestamp: OffsetDateTime,
  /// Request method
  pub method: String,
  /// Absolute request URL
  pub url: String,
  /// Host authority the request was addressed to
  pub host: String,
  /// Request headers, first value per name
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub headers: HashMap<String, String>,
  /// Operation name, derived from the query when the request carried none
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub operation_name: String,
  /// The GraphQL query document; non-empty for every capture
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub query: String,
  /// Operation variables, passed through verbatim as raw JSON
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub variables: Option<Box<RawValue>>,
  /// Upstream response status
  #[serde(default, skip_serializing_if = "is_zero")]
  pub response_code: u16,
  /// Buffered upstream response body
  #[serde(default, skip_serializing_if = "Bytes::is_empty", with = "raw_body")]
  pub response_body: Bytes,
  /// Structural fingerprint of the query
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub fingerprint: String,
  /// Project tag read at capture time; absent when untagged
  #[serde(default, skip_serializing_if = "Option::is_none", rename = "projectId")]
  pub project_tag: Option<String>,
}

fn is_zero(code: &u16) -> bool {
  *code == 0
}

/// Generates a fresh capture id: `trf_` plus 128 random bits, hex-encoded.
pub fn new_traffic_id() -> String {
  let mut b = [0u8; 16];
  rand::thread_rng().fill_bytes(&mut b);
  format!("trf_{}", hex::encode(b))
}

/// Serde shim for response bodies: bodies that are valid JSON are embedded
/// verbatim, anything else is encoded as a string.
mod raw_body {
  use bytes::Bytes;
  use serde::de::Error as _;
  use serde::{Deserialize, Deserializer, Serialize, Serializer};
  use serde_json::value::RawValue;

  pub fn serialize<S: Serializer>(v: &Bytes, s: S) -> Result<S::Ok, S::Error> {
    if let Ok(text) = std::str::from_utf8(v) {
      if let Ok(raw) = serde_json::from_str::<&RawValue>(text) {
        return raw.serialize(s);
      }
      return s.serialize_str(text);
    }
    s.serialize_str(&String::from_utf8_lossy(v))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
    let raw: Box<RawValue> = Deserialize::deserialize(d)?;
    let text = raw.get();
    if text.starts_with('"') {
      let s: String = serde_json::from_str(text).map_err(D::Error::custom)?;
      return Ok(Bytes::from(s.into_bytes()));
    }
    Ok(Bytes::copy_from_slice(text.as_bytes()))
  }
}
