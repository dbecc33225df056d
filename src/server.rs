//! Accept loop and per-connection interception

use crate::capture::{new_traffic_id, CapturedExchange};
use crate::error::{Error, Result};
use crate::fingerprint;
use crate::http1::{self, RawRequest};
use crate::proxy::ProxyShared;
use crate::recognize::{self, GraphQLPayload, ProxiedRequest};
use bytes::Bytes;
use http::Method;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use url::Url;

/// Runs the accept loop until the shutdown signal fires. Each accepted
/// connection gets its own task; those tasks are not cancelled on
/// shutdown.
pub(crate) async fn serve(
  listener: TcpListener,
  mut shutdown: oneshot::Receiver<()>,
  shared: Arc<ProxyShared>,
) {
  loop {
    tokio::select! {
      _ = &mut shutdown => {
        tracing::debug!("accept loop shutting down");
        return;
      }
      accepted = listener.accept() => match accepted {
        Ok((stream, peer_addr)) => {
          let shared = shared.clone();
          tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, shared).await {
              tracing::debug!(peer = %peer_addr, "connection ended: {}", e);
            }
          });
        }
        Err(e) => {
          tracing::error!("accept error: {}", e);
        }
      }
    }
  }
}

async fn handle_connection(
  stream: TcpStream,
  _peer_addr: SocketAddr,
  shared: Arc<ProxyShared>,
) -> Result<()> {
  let mut reader = BufReader::new(stream);

  let request = match timeout(shared.config.request_timeout, http1::read_request(&mut reader)).await
  {
    Ok(Ok(Some(request))) => request,
    Ok(Ok(None)) | Err(_) => return Ok(()),
    Ok(Err(e)) => return Err(e),
  };

  if request.method == Method::CONNECT {
    handle_connect(reader.into_inner(), request, shared).await
  } else {
    handle_plain(reader, request, shared).await
  }
}

/// CONNECT tunnel with TLS interception: reply 200, handshake with a
/// minted certificate, then read successive decrypted requests until the
/// client goes away.
async fn handle_connect(
  mut stream: TcpStream,
  request: RawRequest,
  shared: Arc<ProxyShared>,
) -> Result<()> {
  stream.write_all(http1::CONNECTION_ESTABLISHED).await?;
  stream.flush().await?;

  let authority = request.target;

  let (chain, key) = match shared.ca.get_certificate(&authority).await {
    Ok(chain) => chain,
    Err(e) => {
      tracing::warn!(host = %authority, "certificate mint failed: {}", e);
      return Ok(());
    }
  };

  let tls_config = ServerConfig::builder()
    .with_no_client_auth()
    .with_single_cert(chain, key)
    .map_err(|e| Error::tls_error(format!("Failed to create TLS config: {}", e)))?;
  let acceptor = TlsAcceptor::from(Arc::new(tls_config));

  let tls_stream = match timeout(shared.config.request_timeout, acceptor.accept(stream)).await {
    Ok(Ok(tls_stream)) => tls_stream,
    Ok(Err(e)) => {
      tracing::warn!(host = %authority, "TLS handshake failed: {}", e);
      return Ok(());
    }
    Err(_) => {
      tracing::warn!(host = %authority, "TLS handshake timed out");
      return Ok(());
    }
  };

  let mut tls = BufReader::new(tls_stream);
  loop {
    // Per-request read deadline; an idle tunnel releases its task.
    let inner = match timeout(shared.config.request_timeout, http1::read_request(&mut tls)).await {
      Ok(Ok(Some(inner))) => inner,
      _ => return Ok(()),
    };

    // Inner requests carry origin-form targets; rewrite against the
    // CONNECT authority.
    let url = match tunnel_url(&authority, &inner.target) {
      Ok(url) => url,
      Err(e) => {
        tracing::debug!(host = %authority, target = %inner.target, "bad tunnel target: {}", e);
        return Ok(());
      }
    };

    forward_and_capture(&mut tls, inner, url, &shared).await?;
  }
}

/// Plain-HTTP proxying: absolute-form targets pass through, origin-form
/// ones are resolved against the Host header.
async fn handle_plain(
  mut reader: BufReader<TcpStream>,
  request: RawRequest,
  shared: Arc<ProxyShared>,
) -> Result<()> {
  let url = if request.target.starts_with("http://") || request.target.starts_with("https://") {
    Url::parse(&request.target)?
  } else {
    let host = request
      .header("host")
      .ok_or_else(|| Error::invalid_request("missing Host header"))?;
    Url::parse(&format!("http://{}{}", host, request.target))?
  };

  forward_and_capture(&mut reader, request, url, &shared).await
}

fn tunnel_url(authority: &str, target: &str) -> Result<Url> {
  if target.starts_with("http://") || target.starts_with("https://") {
    return Ok(Url::parse(target)?);
  }
  Ok(Url::parse(&format!("https://{}{}", authority, target))?)
}

/// Forwards one request upstream, writes the buffered response back, and
/// emits a capture when the exchange carried a GraphQL operation.
async fn forward_and_capture<W>(
  writer: &mut W,
  raw: RawRequest,
  url: Url,
  shared: &Arc<ProxyShared>,
) -> Result<()>
where
  W: AsyncWrite + Unpin,
{
  let request = ProxiedRequest {
    method: raw.method,
    url,
    headers: raw.headers,
    body: raw.body,
  };

  let is_graphql = recognize::is_graphql_request(&request);
  let payload = if is_graphql {
    recognize::extract_payload(&request)
  } else {
    None
  };

  let mut forward_headers = http::HeaderMap::new();
  for (name, value) in &request.headers {
    if is_hop_by_hop(name.as_str()) {
      continue;
    }
    forward_headers.append(name.clone(), value.clone());
  }

  let upstream = shared
    .client
    .request(request.method.clone(), request.url.clone())
    .headers(forward_headers)
    .body(request.body.clone());

  let response = match upstream.send().await {
    Ok(response) => response,
    Err(e) => {
      tracing::info!(url = %request.url, "upstream request failed: {}", e);
      return http1::write_bad_gateway(writer).await;
    }
  };

  let status = response.status();
  let headers = response.headers().clone();
  let body = match response.bytes().await {
    Ok(body) => body,
    Err(e) => {
      tracing::warn!(url = %request.url, "failed to read upstream body: {}", e);
      Bytes::new()
    }
  };

  http1::write_response(writer, status, &headers, &body).await?;

  if let Some(payload) = payload {
    if !payload.query.is_empty() {
      capture(&request, payload, status.as_u16(), body, shared).await;
    }
  }
  Ok(())
}

/// Builds the capture record, persists it, and broadcasts it. Persistence
/// failures are logged; the client response has already been delivered.
async fn capture(
  request: &ProxiedRequest,
  payload: GraphQLPayload,
  response_code: u16,
  response_body: Bytes,
  shared: &Arc<ProxyShared>,
) {
  let operation_name = if payload.operation_name.is_empty() {
    recognize::extract_operation_name(&payload.query)
  } else {
    payload.operation_name
  };

  let mut headers = HashMap::new();
  for (name, value) in &request.headers {
    headers
      .entry(name.to_string())
      .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).to_string());
  }

  let project_tag = {
    let tag = shared.project_tag.lock().expect("project tag lock poisoned");
    if tag.is_empty() {
      None
    } else {
      Some(tag.clone())
    }
  };

  let host = request
    .headers
    .get(http::header::HOST)
    .map(|v| String::from_utf8_lossy(v.as_bytes()).to_string())
    .unwrap_or_else(|| url_authority(&request.url));

  let exchange = CapturedExchange {
    id: new_traffic_id(),
    timestamp: OffsetDateTime::now_utc(),
    method: request.method.to_string(),
    url: request.url.to_string(),
    host,
    headers,
    operation_name,
    fingerprint: fingerprint::fingerprint(&payload.query),
    query: payload.query,
    variables: payload.variables,
    response_code,
    response_body,
    project_tag,
  };

  if let Err(e) = shared.store.save(&exchange).await {
    tracing::warn!(id = %exchange.id, "failed to persist capture: {}", e);
  }

  shared.bus.broadcast(&exchange).await;
}

fn url_authority(url: &Url) -> String {
  let host = url.host_str().unwrap_or_default();
  match url.port() {
    Some(port) => format!("{}:{}", host, port),
    None => host.to_string(),
  }
}

/// Headers that describe the client connection rather than the request;
/// the upstream client supplies its own.
fn is_hop_by_hop(name: &str) -> bool {
  matches!(
    name,
    "connection"
      | "proxy-connection"
      | "keep-alive"
      | "te"
      | "trailer"
      | "transfer-encoding"
      | "upgrade"
      | "content-length"
      | "host"
  )
}
