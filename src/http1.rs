//! Minimal HTTP/1.1 codec for raw and decrypted proxy streams

use crate::error::{Error, Result};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reply sent after a CONNECT request has been accepted.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

const MAX_LINE_BYTES: usize = 8 * 1024;
const MAX_HEADER_BYTES: usize = 64 * 1024;
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// One request read off the wire, with its body fully buffered.
#[derive(Debug)]
pub struct RawRequest {
  /// Request method
  pub method: Method,
  /// The request target exactly as it appeared on the request line
  pub target: String,
  /// Protocol version
  pub version: Version,
  /// Request headers
  pub headers: HeaderMap,
  /// Buffered request body
  pub body: Bytes,
}

impl RawRequest {
  /// First value of the given header, lossily decoded.
  pub fn header(&self, name: &str) -> Option<String> {
    self
      .headers
      .get(name)
      .map(|v| String::from_utf8_lossy(v.as_bytes()).to_string())
  }
}

/// Reads one HTTP/1.1 request from the stream, buffering the body.
///
/// Returns `Ok(None)` on a clean close before the first byte of a request.
/// `Content-Length` and chunked bodies are supported; anything else is
/// treated as an empty body.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<RawRequest>>
where
  R: AsyncBufRead + Unpin,
{
  let Some(line) = read_line_bounded(reader, MAX_LINE_BYTES).await? else {
    return Ok(None);
  };
  let line = String::from_utf8_lossy(&line);
  let mut parts = line.split_whitespace();
  let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
  else {
    return Err(Error::invalid_request("malformed request line"));
  };
  let method = Method::from_bytes(method.as_bytes())
    .map_err(|_| Error::invalid_request(format!("invalid method: {}", method)))?;
  let version = match version {
    "HTTP/1.0" => Version::HTTP_10,
    "HTTP/1.1" => Version::HTTP_11,
    other => return Err(Error::invalid_request(format!("unsupported version: {}", other))),
  };
  let target = target.to_string();

  let mut headers = HeaderMap::new();
  let mut header_bytes = 0usize;
  loop {
    let Some(line) = read_line_bounded(reader, MAX_LINE_BYTES).await? else {
      return Err(Error::invalid_request("unexpected end of headers"));
    };
    if line == b"\r\n" || line == b"\n" {
      break;
    }
    header_bytes += line.len();
    if header_bytes > MAX_HEADER_BYTES {
      return Err(Error::invalid_request("headers exceed maximum allowed size"));
    }
    let text = String::from_utf8_lossy(&line);
    let Some((name, value)) = text.split_once(':') else {
      return Err(Error::invalid_request("malformed header line"));
    };
    let name = HeaderName::from_bytes(name.trim().as_bytes())
      .map_err(|_| Error::invalid_request("invalid header name"))?;
    let value = HeaderValue::from_str(value.trim())
      .map_err(|_| Error::invalid_request("invalid header value"))?;
    headers.append(name, value);
  }

  let body = read_body(reader, &headers).await?;

  Ok(Some(RawRequest {
    method,
    target,
    version,
    headers,
    body,
  }))
}

async fn read_body<R>(reader: &mut R, headers: &HeaderMap) -> Result<Bytes>
where
  R: AsyncBufRead + Unpin,
{
  if let Some(te) = headers.get(http::header::TRANSFER_ENCODING) {
    let te = String::from_utf8_lossy(te.as_bytes()).to_ascii_lowercase();
    if te.contains("chunked") {
      return read_chunked(reader).await;
    }
  }
  let Some(len) = headers.get(http::header::CONTENT_LENGTH) else {
    return Ok(Bytes::new());
  };
  let len: usize = String::from_utf8_lossy(len.as_bytes())
    .trim()
    .parse()
    .map_err(|_| Error::invalid_request("invalid Content-Length"))?;
  if len > MAX_BODY_BYTES {
    return Err(Error::invalid_request("body exceeds maximum allowed size"));
  }
  let mut body = vec![0u8; len];
  reader.read_exact(&mut body).await?;
  Ok(Bytes::from(body))
}

async fn read_chunked<R>(reader: &mut R) -> Result<Bytes>
where
  R: AsyncBufRead + Unpin,
{
  let mut body = Vec::new();
  loop {
    let Some(line) = read_line_bounded(reader, 1024).await? else {
      return Err(Error::invalid_request("unexpected end of chunked body"));
    };
    let text = String::from_utf8_lossy(&line);
    let size_token = text.trim().split(';').next().unwrap_or_default();
    let size = usize::from_str_radix(size_token, 16)
      .map_err(|_| Error::invalid_request("invalid chunk size"))?;
    if body.len() + size > MAX_BODY_BYTES {
      return Err(Error::invalid_request("body exceeds maximum allowed size"));
    }
    if size == 0 {
      // Trailers, up to the final blank line.
      loop {
        let Some(trailer) = read_line_bounded(reader, MAX_LINE_BYTES).await? else {
          return Err(Error::invalid_request("unexpected end of chunked trailers"));
        };
        if trailer == b"\r\n" || trailer == b"\n" {
          return Ok(Bytes::from(body));
        }
      }
    }
    let start = body.len();
    body.resize(start + size, 0);
    reader.read_exact(&mut body[start..]).await?;
    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).await?;
  }
}

/// Reads one line including its trailing `\n`, bounded by `max` bytes.
/// Returns `Ok(None)` on EOF before any byte was read.
async fn read_line_bounded<R>(reader: &mut R, max: usize) -> Result<Option<Vec<u8>>>
where
  R: AsyncBufRead + Unpin,
{
  let mut line = Vec::new();
  loop {
    let buf = reader.fill_buf().await?;
    if buf.is_empty() {
      if line.is_empty() {
        return Ok(None);
      }
      return Ok(Some(line));
    }
    if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
      line.extend_from_slice(&buf[..=pos]);
      reader.consume(pos + 1);
      return Ok(Some(line));
    }
    let n = buf.len();
    line.extend_from_slice(buf);
    reader.consume(n);
    if line.len() > max {
      return Err(Error::invalid_request("line exceeds maximum allowed size"));
    }
  }
}

/// Writes a buffered response as a well-formed HTTP/1.1 message, replacing
/// any `Content-Length` with the buffered length.
pub async fn write_response<W>(
  writer: &mut W,
  status: StatusCode,
  headers: &HeaderMap,
  body: &[u8],
) -> Result<()>
where
  W: AsyncWrite + Unpin,
{
  let mut buf = Vec::with_capacity(256 + body.len());
  buf.extend_from_slice(
    format!(
      "HTTP/1.1 {} {}\r\n",
      status.as_u16(),
      status.canonical_reason().unwrap_or("Unknown")
    )
    .as_bytes(),
  );
  for (name, value) in headers {
    if name == http::header::CONTENT_LENGTH || name == http::header::TRANSFER_ENCODING {
      continue;
    }
    buf.extend_from_slice(name.as_str().as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value.as_bytes());
    buf.extend_from_slice(b"\r\n");
  }
  buf.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
  buf.extend_from_slice(body);
  writer.write_all(&buf).await?;
  writer.flush().await?;
  Ok(())
}

/// Writes the fixed 502 reply used when the upstream request fails.
pub async fn write_bad_gateway<W>(writer: &mut W) -> Result<()>
where
  W: AsyncWrite + Unpin,
{
  writer
    .write_all(b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\n\r\n")
    .await?;
  writer.flush().await?;
  Ok(())
}

/// Splits `host[:port]` into host and optional port; IPv6 literals keep
/// their brackets stripped.
pub(crate) fn split_authority(authority: &str) -> (&str, Option<u16>) {
  if let Some(rest) = authority.strip_prefix('[') {
    if let Some((host, tail)) = rest.split_once(']') {
      let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
      return (host, port);
    }
  }
  if let Some((host, port)) = authority.rsplit_once(':') {
    if !host.contains(':') {
      if let Ok(port) = port.parse() {
        return (host, Some(port));
      }
    }
  }
  (authority, None)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::BufReader;

  #[tokio::test]
  async fn reads_request_with_content_length_body() {
    let raw = b"POST /graphql HTTP/1.1\r\nHost: x\r\nContent-Length: 11\r\n\r\nhello world";
    let mut reader = BufReader::new(&raw[..]);
    let req = read_request(&mut reader).await.unwrap().unwrap();
    assert_eq!(req.method, Method::POST);
    assert_eq!(req.target, "/graphql");
    assert_eq!(req.version, Version::HTTP_11);
    assert_eq!(req.header("host").as_deref(), Some("x"));
    assert_eq!(&req.body[..], b"hello world");
  }

  #[tokio::test]
  async fn reads_chunked_body() {
    let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
    let mut reader = BufReader::new(&raw[..]);
    let req = read_request(&mut reader).await.unwrap().unwrap();
    assert_eq!(&req.body[..], b"hello world");
  }

  #[tokio::test]
  async fn clean_close_yields_none() {
    let mut reader = BufReader::new(&b""[..]);
    assert!(read_request(&mut reader).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn malformed_request_line_errors() {
    let mut reader = BufReader::new(&b"nonsense\r\n\r\n"[..]);
    assert!(read_request(&mut reader).await.is_err());
  }

  #[tokio::test]
  async fn successive_requests_on_one_stream() {
    let raw = b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n";
    let mut reader = BufReader::new(&raw[..]);
    let a = read_request(&mut reader).await.unwrap().unwrap();
    let b = read_request(&mut reader).await.unwrap().unwrap();
    assert_eq!(a.target, "/a");
    assert_eq!(b.target, "/b");
    assert!(read_request(&mut reader).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn write_response_replaces_content_length() {
    let mut headers = HeaderMap::new();
    headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("9999"));
    headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let mut out = Vec::new();
    write_response(&mut out, StatusCode::OK, &headers, b"{\"a\":1}")
      .await
      .unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("content-type: application/json\r\n"));
    assert!(text.contains("Content-Length: 7\r\n"));
    assert!(!text.contains("9999"));
    assert!(text.ends_with("\r\n\r\n{\"a\":1}"));
  }

  #[test]
  fn split_authority_variants() {
    assert_eq!(split_authority("api.example.com:443"), ("api.example.com", Some(443)));
    assert_eq!(split_authority("api.example.com"), ("api.example.com", None));
    assert_eq!(split_authority("127.0.0.1:8443"), ("127.0.0.1", Some(8443)));
    assert_eq!(split_authority("[::1]:443"), ("::1", Some(443)));
    assert_eq!(split_authority("[::1]"), ("::1", None));
  }
}
