//! Schema reconstruction from captured GraphQL traffic

use crate::capture::CapturedExchange;
use crate::introspection::parse_introspection;
use crate::schema::{Field, Schema, SchemaSource, Type, TypeRef};
use rand::RngCore;
use serde_json::Value;
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Synthesises a [`Schema`] from captured proxy traffic.
///
/// Strategy (best-data-first):
/// 1. If any response body is a GraphQL introspection response, parse it
///    directly, which gives a complete, accurate schema.
/// 2. Otherwise walk every response body's `data` object to infer object
///    types from the actual JSON shape, producing real graph edges.
/// 3. Fall back to operation-name-only entries for requests with no
///    parseable response.
///
/// The builder never errors: malformed bodies and empty inputs degrade to a
/// smaller or placeholder-only schema.
pub fn build_from_traffic(exchanges: &[CapturedExchange], project_name: &str) -> Schema {
  // Phase 1: introspection auto-detection.
  for exchange in exchanges {
    if let Some(schema) = try_parse_introspection(&exchange.response_body, project_name) {
      return schema;
    }
  }

  // Phase 2: response-body type inference.
  let mut type_map: BTreeMap<String, Type> = BTreeMap::new();
  let mut query_fields: Vec<Field> = Vec::new();
  let mut mutation_fields: Vec<Field> = Vec::new();
  let mut subscription_fields: Vec<Field> = Vec::new();

  for exchange in exchanges {
    if exchange.query.is_empty() {
      continue;
    }
    let bucket = match parse_op_kind(&exchange.query) {
      OpKind::Mutation => &mut mutation_fields,
      OpKind::Subscription => &mut subscription_fields,
      OpKind::Query => &mut query_fields,
    };

    let root_fields = infer_from_response(&exchange.response_body, &mut type_map);
    let found_any = !root_fields.is_empty();
    for field in root_fields {
      push_unique(bucket, field);
    }

    // Fallback: if the response yielded nothing, at least record the
    // operation name so it appears in the schema.
    if !found_any && !exchange.operation_name.is_empty() {
      push_unique(bucket, Field::new(exchange.operation_name.clone(), unknown_ref()));
    }
  }

  let mut types: Vec<Type> = type_map.into_values().collect();

  let mut query_type = Type::object("Query");
  query_type.fields = query_fields;
  if query_type.fields.is_empty() {
    let mut placeholder = Field::new("_placeholder", unknown_ref());
    placeholder.description = "No query operations captured yet".to_string();
    query_type.fields.push(placeholder);
  }
  types.push(query_type);

  let mut schema = Schema {
    id: new_schema_id(),
    name: format!("{} (inferred)", project_name),
    source: SchemaSource::Reconstruction,
    query_type: "Query".to_string(),
    mutation_type: None,
    subscription_type: None,
    types,
    directives: Vec::new(),
    created_at: OffsetDateTime::now_utc(),
  };

  if !mutation_fields.is_empty() {
    let mut mutation_type = Type::object("Mutation");
    mutation_type.fields = mutation_fields;
    schema.types.push(mutation_type);
    schema.mutation_type = Some("Mutation".to_string());
  }

  if !subscription_fields.is_empty() {
    let mut subscription_type = Type::object("Subscription");
    subscription_type.fields = subscription_fields;
    schema.types.push(subscription_type);
    schema.subscription_type = Some("Subscription".to_string());
  }

  schema
}

/// Attempts to parse a response body as an introspection response. Returns
/// `None` unless the body carries the `__schema` marker and parses into a
/// schema with at least one type.
fn try_parse_introspection(body: &[u8], project_name: &str) -> Option<Schema> {
  if body.is_empty() || !contains_subsequence(body, b"__schema") {
    return None;
  }
  let name = format!("{} (inferred)", project_name);
  match parse_introspection(body, new_schema_id(), name) {
    Ok(schema) if !schema.types.is_empty() => Some(schema),
    _ => None,
  }
}

fn contains_subsequence(haystack: &[u8], needle: &[u8]) -> bool {
  haystack.windows(needle.len()).any(|w| w == needle)
}

/// Parses a GraphQL response `{"data":{…}}` and returns the top-level
/// fields for the root type, recording discovered object types in
/// `type_map` along the way.
fn infer_from_response(body: &[u8], type_map: &mut BTreeMap<String, Type>) -> Vec<Field> {
  let mut root_fields = Vec::new();
  if body.is_empty() {
    return root_fields;
  }
  let Ok(value) = serde_json::from_slice::<Value>(body) else {
    return root_fields;
  };
  let Some(data) = value.get("data").and_then(Value::as_object) else {
    return root_fields;
  };
  for (field_name, field_value) in data {
    let type_ref = infer_type_ref(field_name, field_value, type_map);
    root_fields.push(Field::new(field_name.clone(), type_ref));
  }
  root_fields
}

/// Recursively inspects a JSON value and returns the matching [`TypeRef`],
/// creating new object-type entries in `type_map` as it goes.
fn infer_type_ref(field_name: &str, value: &Value, type_map: &mut BTreeMap<String, Type>) -> TypeRef {
  match value {
    Value::Null => unknown_ref(),
    Value::String(_) => {
      if is_id_field(field_name) {
        TypeRef::Scalar("ID".to_string())
      } else {
        TypeRef::Scalar("String".to_string())
      }
    }
    Value::Bool(_) => TypeRef::Scalar("Boolean".to_string()),
    Value::Number(n) => {
      if n.is_i64() || n.is_u64() {
        TypeRef::Scalar("Int".to_string())
      } else {
        TypeRef::Scalar("Float".to_string())
      }
    }
    Value::Array(items) => {
      // Use the first non-null element to determine the element type.
      for item in items {
        if !item.is_null() {
          let element = infer_type_ref(&singularize(field_name), item, type_map);
          return TypeRef::List(Box::new(element));
        }
      }
      TypeRef::List(Box::new(unknown_ref()))
    }
    Value::Object(entries) => {
      let type_name = pascal_case(field_name);
      let mut discovered = Type::object(type_name.clone());
      for (sub_field, sub_value) in entries {
        let sub_ref = infer_type_ref(sub_field, sub_value, type_map);
        discovered.fields.push(Field::new(sub_field.clone(), sub_ref));
      }
      match type_map.remove(&type_name) {
        Some(existing) => {
          type_map.insert(type_name.clone(), merge_type(existing, discovered));
        }
        None => {
          type_map.insert(type_name.clone(), discovered);
        }
      }
      TypeRef::Object(type_name)
    }
  }
}

/// Combines fields from two definitions of the same type, keeping all
/// unique field names seen across both. The first TypeRef seen for a field
/// name wins.
fn merge_type(mut existing: Type, discovered: Type) -> Type {
  for field in discovered.fields {
    push_unique(&mut existing.fields, field);
  }
  existing
}

fn push_unique(fields: &mut Vec<Field>, field: Field) {
  if !fields.iter().any(|f| f.name == field.name) {
    fields.push(field);
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
  Query,
  Mutation,
  Subscription,
}

/// Determines the operation kind from the first line of the query document
/// that opens with an operation keyword. Anonymous operations default to
/// query.
fn parse_op_kind(query: &str) -> OpKind {
  for line in query.lines() {
    let trimmed = line.trim_start();
    for (keyword, kind) in [
      ("query", OpKind::Query),
      ("mutation", OpKind::Mutation),
      ("subscription", OpKind::Subscription),
    ] {
      if starts_with_keyword(trimmed, keyword) {
        return kind;
      }
    }
  }
  OpKind::Query
}

fn starts_with_keyword(s: &str, keyword: &str) -> bool {
  let bytes = s.as_bytes();
  if bytes.len() < keyword.len() || !bytes[..keyword.len()].eq_ignore_ascii_case(keyword.as_bytes()) {
    return false;
  }
  match bytes.get(keyword.len()) {
    None => true,
    Some(c) => !c.is_ascii_alphanumeric() && *c != b'_',
  }
}

fn is_id_field(name: &str) -> bool {
  let lower = name.to_ascii_lowercase();
  lower == "id" || lower.ends_with("id") || lower.ends_with("_id")
}

/// Capitalises the first letter: `userProfile` → `UserProfile`.
fn pascal_case(s: &str) -> String {
  let mut chars = s.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
    None => "Unknown".to_string(),
  }
}

/// Strips a trailing plural marker for list-element type names:
/// `users` → `user`, `categories` → `category`.
fn singularize(s: &str) -> String {
  if s.ends_with("ies") && s.len() > 4 {
    return format!("{}y", &s[..s.len() - 3]);
  }
  if s.ends_with("ses") && s.len() > 4 {
    return s[..s.len() - 1].to_string();
  }
  if s.ends_with('s') && s.len() > 3 {
    return s[..s.len() - 1].to_string();
  }
  s.to_string()
}

fn unknown_ref() -> TypeRef {
  TypeRef::Scalar("String".to_string())
}

fn new_schema_id() -> String {
  let mut b = [0u8; 8];
  rand::thread_rng().fill_bytes(&mut b);
  format!("inf_{}", hex::encode(b))
}

#[cfg(test)]
mod tests {
  use super::*;
  use bytes::Bytes;
  use std::collections::HashMap;

  fn exchange(query: &str, body: &str) -> CapturedExchange {
    CapturedExchange {
      id: crate::capture::new_traffic_id(),
      timestamp: OffsetDateTime::UNIX_EPOCH,
      method: "POST".to_string(),
      url: "https://api.example.com/graphql".to_string(),
      host: "api.example.com".to_string(),
      headers: HashMap::new(),
      operation_name: String::new(),
      query: query.to_string(),
      variables: None,
      response_code: 200,
      response_body: Bytes::copy_from_slice(body.as_bytes()),
      fingerprint: String::new(),
      project_tag: None,
    }
  }

  fn field<'a>(schema: &'a Schema, type_name: &str, field_name: &str) -> &'a Field {
    schema
      .get_type(type_name)
      .unwrap_or_else(|| panic!("missing type {}", type_name))
      .fields
      .iter()
      .find(|f| f.name == field_name)
      .unwrap_or_else(|| panic!("missing field {}.{}", type_name, field_name))
  }

  #[test]
  fn infers_types_from_json_shapes() {
    let exchanges = vec![
      exchange(
        r#"query { user(id:"1") { id name posts { id title } } }"#,
        r#"{"data":{"user":{"id":"u1","name":"Alice","posts":[{"id":"p1","title":"Hi"}]}}}"#,
      ),
      exchange(
        r#"query { user(id:"2") { id name email } }"#,
        r#"{"data":{"user":{"id":"u2","name":"Bob","email":"b@x"}}}"#,
      ),
    ];
    let schema = build_from_traffic(&exchanges, "demo");

    assert_eq!(field(&schema, "Query", "user").type_ref, TypeRef::Object("User".to_string()));
    assert_eq!(field(&schema, "User", "id").type_ref, TypeRef::Scalar("ID".to_string()));
    assert_eq!(field(&schema, "User", "name").type_ref, TypeRef::Scalar("String".to_string()));
    assert_eq!(field(&schema, "User", "email").type_ref, TypeRef::Scalar("String".to_string()));
    assert_eq!(
      field(&schema, "User", "posts").type_ref,
      TypeRef::List(Box::new(TypeRef::Object("Post".to_string())))
    );
    assert_eq!(field(&schema, "Post", "id").type_ref, TypeRef::Scalar("ID".to_string()));
    assert_eq!(field(&schema, "Post", "title").type_ref, TypeRef::Scalar("String".to_string()));
  }

  #[test]
  fn introspection_takes_precedence_over_shape_inference() {
    let introspection = r#"{"data":{"__schema":{
      "queryType":{"name":"Query"},
      "types":[{"kind":"OBJECT","name":"Query","fields":[{"name":"viewer","type":{"kind":"OBJECT","name":"Viewer"}}]}]
    }}}"#;
    let exchanges = vec![
      exchange("query { other { id } }", r#"{"data":{"other":{"id":"1"}}}"#),
      exchange("query Introspection { __schema { types { name } } }", introspection),
    ];
    let schema = build_from_traffic(&exchanges, "demo");
    assert_eq!(schema.source, SchemaSource::Introspection);
    assert_eq!(schema.types.len(), 1);
    assert!(schema.get_type("Other").is_none(), "phase-2 merging must not run");
  }

  #[test]
  fn empty_input_yields_placeholder_schema() {
    let schema = build_from_traffic(&[], "empty");
    assert_eq!(schema.source, SchemaSource::Reconstruction);
    let query = schema.get_type("Query").unwrap();
    assert_eq!(query.fields.len(), 1);
    assert_eq!(query.fields[0].name, "_placeholder");
    assert_eq!(query.fields[0].type_ref, TypeRef::Scalar("String".to_string()));
  }

  #[test]
  fn null_data_contributes_nothing() {
    let exchanges = vec![exchange("query { me { id } }", r#"{"data":null}"#)];
    let schema = build_from_traffic(&exchanges, "demo");
    let query = schema.get_type("Query").unwrap();
    assert_eq!(query.fields[0].name, "_placeholder");
  }

  #[test]
  fn empty_list_falls_back_to_string_placeholder() {
    let exchanges = vec![exchange("query { items { id } }", r#"{"data":{"items":[]}}"#)];
    let schema = build_from_traffic(&exchanges, "demo");
    assert_eq!(
      field(&schema, "Query", "items").type_ref,
      TypeRef::List(Box::new(TypeRef::Scalar("String".to_string())))
    );
  }

  #[test]
  fn id_suffix_heuristic_applies() {
    let exchanges = vec![exchange(
      "query { node { userId ownerID parent_id label } }",
      r#"{"data":{"node":{"userId":"u1","ownerID":"o1","parent_id":"p1","label":"x"}}}"#,
    )];
    let schema = build_from_traffic(&exchanges, "demo");
    assert_eq!(field(&schema, "Node", "userId").type_ref, TypeRef::Scalar("ID".to_string()));
    assert_eq!(field(&schema, "Node", "ownerID").type_ref, TypeRef::Scalar("ID".to_string()));
    assert_eq!(field(&schema, "Node", "parent_id").type_ref, TypeRef::Scalar("ID".to_string()));
    assert_eq!(field(&schema, "Node", "label").type_ref, TypeRef::Scalar("String".to_string()));
  }

  #[test]
  fn scalar_kinds_follow_json_values() {
    let exchanges = vec![exchange(
      "query { stats { count ratio active note } }",
      r#"{"data":{"stats":{"count":42,"ratio":0.5,"active":true,"note":null}}}"#,
    )];
    let schema = build_from_traffic(&exchanges, "demo");
    assert_eq!(field(&schema, "Stats", "count").type_ref, TypeRef::Scalar("Int".to_string()));
    assert_eq!(field(&schema, "Stats", "ratio").type_ref, TypeRef::Scalar("Float".to_string()));
    assert_eq!(field(&schema, "Stats", "active").type_ref, TypeRef::Scalar("Boolean".to_string()));
    assert_eq!(field(&schema, "Stats", "note").type_ref, TypeRef::Scalar("String".to_string()));
  }

  #[test]
  fn mutations_and_subscriptions_get_their_own_roots() {
    let exchanges = vec![
      exchange(
        "mutation CreatePost { createPost { id } }",
        r#"{"data":{"createPost":{"id":"p1"}}}"#,
      ),
      exchange(
        "subscription OnPost { postAdded { id } }",
        r#"{"data":{"postAdded":{"id":"p2"}}}"#,
      ),
    ];
    let schema = build_from_traffic(&exchanges, "demo");
    assert_eq!(schema.mutation_type.as_deref(), Some("Mutation"));
    assert_eq!(schema.subscription_type.as_deref(), Some("Subscription"));
    assert_eq!(field(&schema, "Mutation", "createPost").type_ref, TypeRef::Object("CreatePost".to_string()));
    assert_eq!(field(&schema, "Subscription", "postAdded").type_ref, TypeRef::Object("PostAdded".to_string()));
  }

  #[test]
  fn fallback_records_operation_name_for_unparseable_responses() {
    let mut ex = exchange("query GetThing { thing }", "not json");
    ex.operation_name = "GetThing".to_string();
    let schema = build_from_traffic(&[ex], "demo");
    assert_eq!(field(&schema, "Query", "GetThing").type_ref, TypeRef::Scalar("String".to_string()));
  }

  #[test]
  fn inference_is_idempotent() {
    let exchanges = vec![
      exchange(
        "query { user { id name } }",
        r#"{"data":{"user":{"id":"u1","name":"Alice"}}}"#,
      ),
      exchange(
        "query { posts { id title } }",
        r#"{"data":{"posts":[{"id":"p1","title":"Hi"}]}}"#,
      ),
    ];
    let a = build_from_traffic(&exchanges, "demo");
    let b = build_from_traffic(&exchanges, "demo");

    let names = |s: &Schema| {
      let mut n: Vec<String> = s.types.iter().map(|t| t.name.clone()).collect();
      n.sort();
      n
    };
    assert_eq!(names(&a), names(&b));
    for t in &a.types {
      let other = b.get_type(&t.name).unwrap();
      let mut fa: Vec<&str> = t.fields.iter().map(|f| f.name.as_str()).collect();
      let mut fb: Vec<&str> = other.fields.iter().map(|f| f.name.as_str()).collect();
      fa.sort();
      fb.sort();
      assert_eq!(fa, fb, "field sets differ for {}", t.name);
    }
  }

  #[test]
  fn first_type_ref_seen_wins_on_merge() {
    let exchanges = vec![
      exchange("query { user { code } }", r#"{"data":{"user":{"code":"abc"}}}"#),
      exchange("query { user { code } }", r#"{"data":{"user":{"code":7}}}"#),
    ];
    let schema = build_from_traffic(&exchanges, "demo");
    assert_eq!(field(&schema, "User", "code").type_ref, TypeRef::Scalar("String".to_string()));
  }

  #[test]
  fn singularize_rules() {
    assert_eq!(singularize("categories"), "category");
    assert_eq!(singularize("analyses"), "analyse");
    assert_eq!(singularize("posts"), "post");
    assert_eq!(singularize("users"), "user");
    assert_eq!(singularize("news"), "new");
    assert_eq!(singularize("ids"), "ids");
  }

  #[test]
  fn op_kind_detection() {
    assert_eq!(parse_op_kind("query Foo { a }"), OpKind::Query);
    assert_eq!(parse_op_kind("  MUTATION Bar { a }"), OpKind::Mutation);
    assert_eq!(parse_op_kind("subscription { a }"), OpKind::Subscription);
    assert_eq!(parse_op_kind("{ a b c }"), OpKind::Query);
    assert_eq!(parse_op_kind("queryX { a }"), OpKind::Query);
    assert_eq!(parse_op_kind("# comment\nmutation { a }"), OpKind::Mutation);
  }
}
