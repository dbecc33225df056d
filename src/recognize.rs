//! GraphQL recognition and payload extraction for intercepted requests

use bytes::Bytes;
use http::{HeaderMap, Method};
use serde::Deserialize;
use serde_json::value::RawValue;
use url::Url;

/// An intercepted request after its target has been resolved to an
/// absolute URL and its body buffered.
#[derive(Debug)]
pub struct ProxiedRequest {
  /// Request method
  pub method: Method,
  /// Absolute request URL
  pub url: Url,
  /// Request headers
  pub headers: HeaderMap,
  /// Buffered request body
  pub body: Bytes,
}

/// A decoded GraphQL request payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GraphQLPayload {
  /// The query document
  pub query: String,
  /// The declared operation name, when present
  pub operation_name: String,
  /// Operation variables, passed through verbatim
  pub variables: Option<Box<RawValue>>,
}

/// Determines whether an intercepted request carries a GraphQL operation.
///
/// A request is GraphQL if its path contains `graphql` or `gql`
/// (case-insensitive), or it is a GET with a `query` parameter, or a POST
/// with a JSON content type.
pub fn is_graphql_request(request: &ProxiedRequest) -> bool {
  let path = request.url.path().to_ascii_lowercase();
  if path.contains("graphql") || path.contains("gql") {
    return true;
  }

  if request.method == Method::GET
    && request
      .url
      .query_pairs()
      .any(|(name, value)| name == "query" && !value.is_empty())
  {
    return true;
  }

  if request.method == Method::POST {
    if let Some(ct) = request.headers.get(http::header::CONTENT_TYPE) {
      if String::from_utf8_lossy(ct.as_bytes()).contains("application/json") {
        return true;
      }
    }
  }

  false
}

/// Extracts the GraphQL payload from a request. Returns `None` when the
/// request is GraphQL-shaped but carries no extractable operation; all
/// parse failures are non-fatal.
///
/// The body has already been buffered by the HTTP reader, so the request
/// can still be forwarded untouched.
pub fn extract_payload(request: &ProxiedRequest) -> Option<GraphQLPayload> {
  if request.method == Method::GET {
    let mut payload = GraphQLPayload::default();
    for (name, value) in request.url.query_pairs() {
      match name.as_ref() {
        "query" => payload.query = value.to_string(),
        "operationName" => payload.operation_name = value.to_string(),
        "variables" => payload.variables = RawValue::from_string(value.to_string()).ok(),
        _ => {}
      }
    }
    return Some(payload);
  }

  // Try a single operation first.
  if let Ok(payload) = serde_json::from_slice::<GraphQLPayload>(&request.body) {
    if !payload.query.is_empty() {
      return Some(payload);
    }
  }

  // Batched GraphQL: take the first element.
  if let Ok(batch) = serde_json::from_slice::<Vec<GraphQLPayload>>(&request.body) {
    return batch.into_iter().next();
  }

  None
}

/// Derives the operation name from a query document: the identifier
/// following `query `, `mutation `, or `subscription `, read up to the
/// first `(`, `{`, or whitespace. Anonymous operations yield an empty
/// string.
pub fn extract_operation_name(query: &str) -> String {
  let query = query.trim();
  for prefix in ["query ", "mutation ", "subscription "] {
    let Some(idx) = query.find(prefix) else {
      continue;
    };
    let rest = &query[idx + prefix.len()..];
    let name: String = rest
      .chars()
      .take_while(|&c| c != '(' && c != '{' && !c.is_whitespace())
      .collect();
    if !name.is_empty() {
      return name;
    }
  }
  String::new()
}

/// Checks whether a response body looks like a GraphQL response, i.e. a
/// JSON object with a top-level `data` or `errors` key.
pub fn looks_like_graphql_response(body: &[u8]) -> bool {
  let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
    return false;
  };
  let Some(object) = value.as_object() else {
    return false;
  };
  object.contains_key("data") || object.contains_key("errors")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn request(method: Method, url: &str, content_type: Option<&str>, body: &[u8]) -> ProxiedRequest {
    let mut headers = HeaderMap::new();
    if let Some(ct) = content_type {
      headers.insert(http::header::CONTENT_TYPE, ct.parse().unwrap());
    }
    ProxiedRequest {
      method,
      url: Url::parse(url).unwrap(),
      headers,
      body: Bytes::copy_from_slice(body),
    }
  }

  #[test]
  fn classifies_by_path_substring() {
    let req = request(Method::PUT, "https://x/api/graphql", None, b"");
    assert!(is_graphql_request(&req));
    let req = request(Method::GET, "https://x/api/GQL/v2", None, b"");
    assert!(is_graphql_request(&req));
    let req = request(Method::GET, "https://x/api/rest", None, b"");
    assert!(!is_graphql_request(&req));
  }

  #[test]
  fn classifies_get_with_query_parameter() {
    let req = request(Method::GET, "https://x/api?query=%7Bu%7Bid%7D%7D", None, b"");
    assert!(is_graphql_request(&req));
    let req = request(Method::GET, "https://x/api?other=1", None, b"");
    assert!(!is_graphql_request(&req));
  }

  #[test]
  fn classifies_post_with_json_content_type() {
    let req = request(Method::POST, "https://x/v1/rest", Some("application/json"), b"{}");
    assert!(is_graphql_request(&req));
    let req = request(
      Method::POST,
      "https://x/v1/rest",
      Some("application/json; charset=utf-8"),
      b"{}",
    );
    assert!(is_graphql_request(&req));
    let req = request(Method::POST, "https://x/v1/rest", Some("text/plain"), b"{}");
    assert!(!is_graphql_request(&req));
  }

  #[test]
  fn extracts_from_get_query_string() {
    let req = request(
      Method::GET,
      "https://x/api/gql?query=%7Bu%7Bid%7D%7D&operationName=U&variables=%7B%22a%22%3A1%7D",
      None,
      b"",
    );
    let payload = extract_payload(&req).unwrap();
    assert_eq!(payload.query, "{u{id}}");
    assert_eq!(payload.operation_name, "U");
    assert_eq!(payload.variables.unwrap().get(), r#"{"a":1}"#);
  }

  #[test]
  fn extracts_from_post_body() {
    let req = request(
      Method::POST,
      "https://x/graphql",
      Some("application/json"),
      br#"{"query":"{ me { id name } }","variables":{"limit":5}}"#,
    );
    let payload = extract_payload(&req).unwrap();
    assert_eq!(payload.query, "{ me { id name } }");
    assert!(payload.operation_name.is_empty());
    assert_eq!(payload.variables.unwrap().get(), r#"{"limit":5}"#);
  }

  #[test]
  fn extracts_first_of_batched_operations() {
    let req = request(
      Method::POST,
      "https://x/graphql",
      Some("application/json"),
      br#"[{"query":"query A { a }"},{"query":"query B { b }"}]"#,
    );
    let payload = extract_payload(&req).unwrap();
    assert_eq!(payload.query, "query A { a }");
  }

  #[test]
  fn graphql_shaped_json_without_query_extracts_nothing() {
    let req = request(Method::POST, "https://x/v1/rest", Some("application/json"), br#"{"foo":1}"#);
    assert!(is_graphql_request(&req));
    assert!(extract_payload(&req).is_none());
  }

  #[test]
  fn derives_operation_names() {
    assert_eq!(extract_operation_name("query GetUser { user { id } }"), "GetUser");
    assert_eq!(extract_operation_name("mutation CreatePost($t: String) { x }"), "CreatePost");
    assert_eq!(extract_operation_name("subscription OnEvent{ x }"), "OnEvent");
    assert_eq!(extract_operation_name("{ me { id } }"), "");
  }

  #[test]
  fn detects_graphql_responses() {
    assert!(looks_like_graphql_response(br#"{"data":{"a":1}}"#));
    assert!(looks_like_graphql_response(br#"{"errors":[{"message":"x"}]}"#));
    assert!(!looks_like_graphql_response(br#"{"foo":1}"#));
    assert!(!looks_like_graphql_response(b"nope"));
  }
}
