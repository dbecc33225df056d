//! Error types for the interception proxy

use std::io;
use thiserror::Error;

/// Result type for proxy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for proxy operations
#[derive(Error, Debug)]
pub enum Error {
  /// IO error
  #[error("IO error: {0}")]
  Io(io::Error),

  /// Certificate error
  #[error("Certificate error: {0}")]
  Certificate(String),

  /// TLS error
  #[error("TLS error: {0}")]
  Tls(String),

  /// HTTP construction error
  #[error("HTTP error: {0}")]
  Http(http::Error),

  /// Upstream request error
  #[error("Upstream error: {0}")]
  Upstream(reqwest::Error),

  /// Invalid request read off the wire
  #[error("Invalid request: {0}")]
  InvalidRequest(String),

  /// The engine is already listening
  #[error("Proxy already running")]
  AlreadyRunning,

  /// Store error
  #[error("Store error: {0}")]
  Store(String),

  /// Parse error for schema or introspection payloads
  #[error("Parse error: {0}")]
  Parse(String),

  /// Other errors
  #[error("{0}")]
  Other(String),
}

impl Error {
  /// Create a certificate error and log it
  pub fn certificate_error(msg: impl Into<String>) -> Self {
    let error = Error::Certificate(msg.into());
    tracing::error!("Certificate error: {}", error);
    error
  }

  /// Create a TLS error and log it
  pub fn tls_error(msg: impl Into<String>) -> Self {
    let error = Error::Tls(msg.into());
    tracing::error!("TLS error: {}", error);
    error
  }

  /// Create an invalid request error and log it
  pub fn invalid_request(msg: impl Into<String>) -> Self {
    let error = Error::InvalidRequest(msg.into());
    tracing::error!("Invalid request: {}", error);
    error
  }

  /// Create a store error and log it
  pub fn store_error(msg: impl Into<String>) -> Self {
    let error = Error::Store(msg.into());
    tracing::error!("Store error: {}", error);
    error
  }

  /// Create an other error and log it
  pub fn other(msg: impl Into<String>) -> Self {
    let error = Error::Other(msg.into());
    tracing::error!("Error: {}", error);
    error
  }
}

impl From<io::Error> for Error {
  fn from(value: io::Error) -> Self {
    Error::Io(value)
  }
}

impl From<http::Error> for Error {
  fn from(value: http::Error) -> Self {
    Error::Http(value)
  }
}

impl From<reqwest::Error> for Error {
  fn from(value: reqwest::Error) -> Self {
    Error::Upstream(value)
  }
}

impl From<url::ParseError> for Error {
  fn from(value: url::ParseError) -> Self {
    Error::InvalidRequest(value.to_string())
  }
}

impl From<serde_json::Error> for Error {
  fn from(value: serde_json::Error) -> Self {
    Error::Parse(value.to_string())
  }
}
