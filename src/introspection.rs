//! Parser for GraphQL introspection responses

use crate::error::{Error, Result};
use crate::schema::{
  Argument, Directive, EnumValue, Field, Schema, SchemaSource, Type, TypeKind, TypeRef,
};
use serde::Deserialize;
use time::OffsetDateTime;

// Raw mirrors of the introspection wire format. Conversion into the schema
// model happens after the lenient parse so partially-populated responses
// still yield a usable schema.

#[derive(Deserialize)]
struct StandardResponse {
  data: StandardData,
}

#[derive(Deserialize)]
struct StandardData {
  #[serde(rename = "__schema")]
  schema: RawSchema,
}

#[derive(Deserialize)]
struct AltResponse {
  #[serde(rename = "__schema")]
  schema: RawSchema,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawSchema {
  #[serde(rename = "queryType")]
  query_type: Option<RawNameRef>,
  #[serde(rename = "mutationType")]
  mutation_type: Option<RawNameRef>,
  #[serde(rename = "subscriptionType")]
  subscription_type: Option<RawNameRef>,
  types: Vec<RawType>,
  directives: Vec<RawDirective>,
}

#[derive(Deserialize)]
struct RawNameRef {
  name: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawType {
  kind: String,
  name: String,
  description: Option<String>,
  fields: Option<Vec<RawField>>,
  #[serde(rename = "inputFields")]
  input_fields: Option<Vec<RawField>>,
  interfaces: Option<Vec<RawNamedRef>>,
  #[serde(rename = "enumValues")]
  enum_values: Option<Vec<RawEnumValue>>,
  #[serde(rename = "possibleTypes")]
  possible_types: Option<Vec<RawNamedRef>>,
}

#[derive(Deserialize)]
struct RawNamedRef {
  name: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawField {
  name: String,
  description: Option<String>,
  args: Option<Vec<RawArg>>,
  #[serde(rename = "type")]
  type_ref: Option<TypeRef>,
  #[serde(rename = "isDeprecated")]
  is_deprecated: bool,
  #[serde(rename = "deprecationReason")]
  deprecation_reason: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawArg {
  name: String,
  description: Option<String>,
  #[serde(rename = "type")]
  type_ref: Option<TypeRef>,
  #[serde(rename = "defaultValue")]
  default_value: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawEnumValue {
  name: String,
  description: Option<String>,
  #[serde(rename = "isDeprecated")]
  is_deprecated: bool,
  #[serde(rename = "deprecationReason")]
  deprecation_reason: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawDirective {
  name: String,
  description: Option<String>,
  locations: Vec<String>,
  args: Option<Vec<RawArg>>,
}

/// Parses a raw introspection JSON response into a [`Schema`].
///
/// Three shapes are accepted, in order: `{"data":{"__schema":{…}}}`,
/// `{"__schema":{…}}`, and a bare `{"queryType":…,"types":[…]}` object.
pub fn parse_introspection(
  body: &[u8],
  id: impl Into<String>,
  name: impl Into<String>,
) -> Result<Schema> {
  let raw = extract_raw_schema(body)?;

  let mut schema = Schema {
    id: id.into(),
    name: name.into(),
    source: SchemaSource::Introspection,
    query_type: raw.query_type.map(|r| r.name).unwrap_or_default(),
    mutation_type: raw.mutation_type.map(|r| r.name),
    subscription_type: raw.subscription_type.map(|r| r.name),
    types: raw.types.into_iter().map(convert_type).collect(),
    directives: raw.directives.into_iter().map(convert_directive).collect(),
    created_at: OffsetDateTime::now_utc(),
  };
  if schema.query_type.is_empty() {
    schema.query_type = "Query".to_string();
  }
  Ok(schema)
}

fn extract_raw_schema(body: &[u8]) -> Result<RawSchema> {
  if let Ok(std) = serde_json::from_slice::<StandardResponse>(body) {
    if !std.data.schema.types.is_empty() {
      return Ok(std.data.schema);
    }
  }
  if let Ok(alt) = serde_json::from_slice::<AltResponse>(body) {
    if !alt.schema.types.is_empty() {
      return Ok(alt.schema);
    }
  }
  if let Ok(raw) = serde_json::from_slice::<RawSchema>(body) {
    if !raw.types.is_empty() {
      return Ok(raw);
    }
  }
  Err(Error::Parse(
    "unrecognized introspection format: no __schema found with types".to_string(),
  ))
}

fn convert_type(raw: RawType) -> Type {
  Type {
    name: raw.name,
    kind: parse_kind(&raw.kind),
    description: raw.description.unwrap_or_default(),
    fields: raw.fields.unwrap_or_default().into_iter().map(convert_field).collect(),
    input_fields: raw
      .input_fields
      .unwrap_or_default()
      .into_iter()
      .map(convert_field)
      .collect(),
    enum_values: raw
      .enum_values
      .unwrap_or_default()
      .into_iter()
      .map(convert_enum_value)
      .collect(),
    interfaces: named_refs(raw.interfaces),
    possible_types: named_refs(raw.possible_types),
  }
}

fn named_refs(refs: Option<Vec<RawNamedRef>>) -> Vec<String> {
  refs
    .unwrap_or_default()
    .into_iter()
    .filter_map(|r| r.name)
    .collect()
}

fn parse_kind(kind: &str) -> TypeKind {
  match kind {
    "OBJECT" => TypeKind::Object,
    "INTERFACE" => TypeKind::Interface,
    "UNION" => TypeKind::Union,
    "ENUM" => TypeKind::Enum,
    "INPUT_OBJECT" => TypeKind::InputObject,
    "LIST" => TypeKind::List,
    "NON_NULL" => TypeKind::NonNull,
    _ => TypeKind::Scalar,
  }
}

fn convert_field(raw: RawField) -> Field {
  Field {
    name: raw.name,
    description: raw.description.unwrap_or_default(),
    type_ref: raw.type_ref.unwrap_or_else(|| TypeRef::Scalar("String".to_string())),
    args: raw.args.unwrap_or_default().into_iter().map(convert_arg).collect(),
    is_deprecated: raw.is_deprecated,
    deprecation_reason: raw.deprecation_reason.unwrap_or_default(),
  }
}

fn convert_arg(raw: RawArg) -> Argument {
  Argument {
    name: raw.name,
    description: raw.description.unwrap_or_default(),
    type_ref: raw.type_ref.unwrap_or_else(|| TypeRef::Scalar("String".to_string())),
    default_value: raw.default_value,
  }
}

fn convert_enum_value(raw: RawEnumValue) -> EnumValue {
  EnumValue {
    name: raw.name,
    description: raw.description.unwrap_or_default(),
    is_deprecated: raw.is_deprecated,
    deprecation_reason: raw.deprecation_reason.unwrap_or_default(),
  }
}

fn convert_directive(raw: RawDirective) -> Directive {
  Directive {
    name: raw.name,
    description: raw.description.unwrap_or_default(),
    locations: raw.locations,
    args: raw.args.unwrap_or_default().into_iter().map(convert_arg).collect(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SCHEMA_JSON: &str = r#"{
    "queryType": {"name": "Query"},
    "mutationType": {"name": "Mutation"},
    "types": [
      {
        "kind": "OBJECT",
        "name": "Query",
        "fields": [
          {
            "name": "user",
            "args": [
              {"name": "id", "type": {"kind": "NON_NULL", "ofType": {"kind": "SCALAR", "name": "ID"}}}
            ],
            "type": {"kind": "OBJECT", "name": "User"}
          }
        ]
      },
      {
        "kind": "OBJECT",
        "name": "User",
        "fields": [
          {"name": "id", "type": {"kind": "NON_NULL", "ofType": {"kind": "SCALAR", "name": "ID"}}},
          {"name": "role", "type": {"kind": "ENUM", "name": "Role"}}
        ]
      },
      {
        "kind": "ENUM",
        "name": "Role",
        "enumValues": [{"name": "ADMIN"}, {"name": "MEMBER"}]
      }
    ]
  }"#;

  #[test]
  fn parses_standard_shape() {
    let body = format!(r#"{{"data":{{"__schema":{}}}}}"#, SCHEMA_JSON);
    let schema = parse_introspection(body.as_bytes(), "s_1", "target").unwrap();
    assert_eq!(schema.query_type, "Query");
    assert_eq!(schema.mutation_type.as_deref(), Some("Mutation"));
    assert_eq!(schema.types.len(), 3);
    let user = schema.get_type("User").unwrap();
    assert_eq!(user.kind, TypeKind::Object);
    assert_eq!(user.fields[0].type_ref.signature(), "ID!");
  }

  #[test]
  fn parses_alt_shape() {
    let body = format!(r#"{{"__schema":{}}}"#, SCHEMA_JSON);
    let schema = parse_introspection(body.as_bytes(), "s_2", "target").unwrap();
    assert_eq!(schema.types.len(), 3);
  }

  #[test]
  fn parses_bare_shape() {
    let schema = parse_introspection(SCHEMA_JSON.as_bytes(), "s_3", "target").unwrap();
    assert_eq!(schema.types.len(), 3);
    let role = schema.get_type("Role").unwrap();
    assert_eq!(role.enum_values.len(), 2);
    let query = schema.get_type("Query").unwrap();
    assert!(query.fields[0].args[0].is_required());
  }

  #[test]
  fn rejects_non_introspection_bodies() {
    assert!(parse_introspection(br#"{"data":{"me":{"id":"1"}}}"#, "s", "n").is_err());
    assert!(parse_introspection(b"not json at all", "s", "n").is_err());
    assert!(parse_introspection(br#"{"data":{"__schema":{"types":[]}}}"#, "s", "n").is_err());
  }
}
