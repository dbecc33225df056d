//! GraphQL schema model shared by the introspection parser and the inference engine

use serde::de::Deserializer;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

/// The kind of a GraphQL named type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeKind {
  /// Scalar leaf type
  Scalar,
  /// Object type with fields
  Object,
  /// Interface type
  Interface,
  /// Union type
  Union,
  /// Enum type
  Enum,
  /// Input object type
  InputObject,
  /// List wrapper
  List,
  /// Non-null wrapper
  NonNull,
}

/// How a schema was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaSource {
  /// Parsed from a live introspection response
  Introspection,
  /// Reconstructed from observed traffic
  Reconstruction,
  /// Imported from an SDL or JSON file
  Import,
}

/// A reference to a type, possibly wrapped in list / non-null markers.
///
/// Named variants carry the referenced type's name; types reference each
/// other by name rather than by pointer, so cyclic schemas need no special
/// handling. Resolve names through [`Schema::type_index`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
  /// Scalar reference (`String`, `Int`, custom scalars)
  Scalar(String),
  /// Object type reference
  Object(String),
  /// Enum type reference
  Enum(String),
  /// Interface type reference
  Interface(String),
  /// Union type reference
  Union(String),
  /// Input object reference
  InputObject(String),
  /// List of the inner reference
  List(Box<TypeRef>),
  /// Non-null wrapper around the inner reference
  NonNull(Box<TypeRef>),
}

impl TypeRef {
  /// The kind tag of this reference.
  pub fn kind(&self) -> TypeKind {
    match self {
      TypeRef::Scalar(_) => TypeKind::Scalar,
      TypeRef::Object(_) => TypeKind::Object,
      TypeRef::Enum(_) => TypeKind::Enum,
      TypeRef::Interface(_) => TypeKind::Interface,
      TypeRef::Union(_) => TypeKind::Union,
      TypeRef::InputObject(_) => TypeKind::InputObject,
      TypeRef::List(_) => TypeKind::List,
      TypeRef::NonNull(_) => TypeKind::NonNull,
    }
  }

  /// Unwraps list and non-null wrappers to the underlying type name.
  pub fn base_name(&self) -> &str {
    match self {
      TypeRef::Scalar(n)
      | TypeRef::Object(n)
      | TypeRef::Enum(n)
      | TypeRef::Interface(n)
      | TypeRef::Union(n)
      | TypeRef::InputObject(n) => n,
      TypeRef::List(of) | TypeRef::NonNull(of) => of.base_name(),
    }
  }

  /// True if this reference is wrapped in non-null.
  pub fn is_non_null(&self) -> bool {
    matches!(self, TypeRef::NonNull(_))
  }

  /// True if this reference is a list, possibly inside a non-null wrapper.
  pub fn is_list(&self) -> bool {
    match self {
      TypeRef::List(_) => true,
      TypeRef::NonNull(of) => of.is_list(),
      _ => false,
    }
  }

  /// True if the base type is a scalar.
  pub fn is_scalar(&self) -> bool {
    match self {
      TypeRef::Scalar(_) => true,
      TypeRef::List(of) | TypeRef::NonNull(of) => of.is_scalar(),
      _ => false,
    }
  }

  /// Human-readable signature like `[String!]!` or `Int`.
  pub fn signature(&self) -> String {
    match self {
      TypeRef::NonNull(of) => format!("{}!", of.signature()),
      TypeRef::List(of) => format!("[{}]", of.signature()),
      other => other.base_name().to_string(),
    }
  }
}

// The wire shape is the introspection one: {"kind","name","ofType"}.
impl Serialize for TypeRef {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut st = serializer.serialize_struct("TypeRef", 2)?;
    st.serialize_field("kind", &self.kind())?;
    match self {
      TypeRef::List(of) | TypeRef::NonNull(of) => {
        st.serialize_field("ofType", of.as_ref())?;
      }
      named => {
        st.serialize_field("name", named.base_name())?;
      }
    }
    st.end()
  }
}

#[derive(Deserialize)]
struct RawTypeRef {
  kind: Option<String>,
  name: Option<String>,
  #[serde(rename = "ofType")]
  of_type: Option<Box<RawTypeRef>>,
}

impl From<RawTypeRef> for TypeRef {
  fn from(raw: RawTypeRef) -> Self {
    let name = || raw.name.clone().unwrap_or_else(|| "String".to_string());
    let inner = |of: Option<Box<RawTypeRef>>| {
      Box::new(of.map(|r| TypeRef::from(*r)).unwrap_or_else(|| TypeRef::Scalar("String".to_string())))
    };
    match raw.kind.as_deref() {
      Some("NON_NULL") => TypeRef::NonNull(inner(raw.of_type)),
      Some("LIST") => TypeRef::List(inner(raw.of_type)),
      Some("OBJECT") => TypeRef::Object(name()),
      Some("ENUM") => TypeRef::Enum(name()),
      Some("INTERFACE") => TypeRef::Interface(name()),
      Some("UNION") => TypeRef::Union(name()),
      Some("INPUT_OBJECT") => TypeRef::InputObject(name()),
      _ => TypeRef::Scalar(name()),
    }
  }
}

impl<'de> Deserialize<'de> for TypeRef {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    RawTypeRef::deserialize(deserializer).map(TypeRef::from)
  }
}

/// A field on an object, interface, or input type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
  /// Field name as it appears in queries
  pub name: String,
  /// Optional description
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub description: String,
  /// The field's type reference
  #[serde(rename = "type")]
  pub type_ref: TypeRef,
  /// Field arguments
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub args: Vec<Argument>,
  /// Deprecation marker
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub is_deprecated: bool,
  /// Deprecation reason, when deprecated
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub deprecation_reason: String,
}

impl Field {
  /// Shorthand for a plain field with no args or description.
  pub fn new(name: impl Into<String>, type_ref: TypeRef) -> Self {
    Field {
      name: name.into(),
      description: String::new(),
      type_ref,
      args: Vec::new(),
      is_deprecated: false,
      deprecation_reason: String::new(),
    }
  }
}

/// A field or directive argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Argument {
  /// Argument name
  pub name: String,
  /// Optional description
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub description: String,
  /// The argument's type reference
  #[serde(rename = "type")]
  pub type_ref: TypeRef,
  /// Default value literal, when declared
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default_value: Option<String>,
}

impl Argument {
  /// True if the argument is non-null with no default value.
  pub fn is_required(&self) -> bool {
    self.type_ref.is_non_null() && self.default_value.is_none()
  }
}

/// A value in an enum type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumValue {
  /// Enum value name
  pub name: String,
  /// Optional description
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub description: String,
  /// Deprecation marker
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub is_deprecated: bool,
  /// Deprecation reason, when deprecated
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub deprecation_reason: String,
}

/// A directive declared by the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directive {
  /// Directive name without the leading `@`
  pub name: String,
  /// Optional description
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub description: String,
  /// Valid locations
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub locations: Vec<String>,
  /// Directive arguments
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub args: Vec<Argument>,
}

/// A named GraphQL type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Type {
  /// Type name, unique within a schema
  pub name: String,
  /// The kind of type
  pub kind: TypeKind,
  /// Optional description
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub description: String,
  /// Output fields (objects and interfaces)
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub fields: Vec<Field>,
  /// Input fields (input objects)
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub input_fields: Vec<Field>,
  /// Enum values (enums)
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub enum_values: Vec<EnumValue>,
  /// Implemented interface names
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub interfaces: Vec<String>,
  /// Possible concrete type names (interfaces and unions)
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub possible_types: Vec<String>,
}

impl Type {
  /// Shorthand for an object type with no fields yet.
  pub fn object(name: impl Into<String>) -> Self {
    Type {
      name: name.into(),
      kind: TypeKind::Object,
      description: String::new(),
      fields: Vec::new(),
      input_fields: Vec::new(),
      enum_values: Vec::new(),
      interfaces: Vec::new(),
      possible_types: Vec::new(),
    }
  }
}

/// The top-level container for a parsed or inferred schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
  /// Opaque unique id
  pub id: String,
  /// Display name
  pub name: String,
  /// How the schema was obtained
  pub source: SchemaSource,
  /// Name of the query root type
  pub query_type: String,
  /// Name of the mutation root type, when present
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mutation_type: Option<String>,
  /// Name of the subscription root type, when present
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub subscription_type: Option<String>,
  /// All named types
  pub types: Vec<Type>,
  /// Declared directives
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub directives: Vec<Directive>,
  /// Creation timestamp (UTC)
  #[serde(with = "time::serde::rfc3339")]
  pub created_at: OffsetDateTime,
}

impl Schema {
  /// Builds a name→type index for resolving references.
  pub fn type_index(&self) -> HashMap<&str, &Type> {
    self.types.iter().map(|t| (t.name.as_str(), t)).collect()
  }

  /// Looks up a type by name.
  pub fn get_type(&self, name: &str) -> Option<&Type> {
    self.types.iter().find(|t| t.name == name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn type_ref_signature() {
    let r = TypeRef::NonNull(Box::new(TypeRef::List(Box::new(TypeRef::NonNull(Box::new(
      TypeRef::Scalar("String".to_string()),
    ))))));
    assert_eq!(r.signature(), "[String!]!");
    assert_eq!(r.base_name(), "String");
    assert!(r.is_non_null());
    assert!(r.is_list());
    assert!(r.is_scalar());
  }

  #[test]
  fn type_ref_wire_round_trip() {
    let r = TypeRef::List(Box::new(TypeRef::Object("User".to_string())));
    let json = serde_json::to_string(&r).unwrap();
    assert_eq!(json, r#"{"kind":"LIST","ofType":{"kind":"OBJECT","name":"User"}}"#);
    let back: TypeRef = serde_json::from_str(&json).unwrap();
    assert_eq!(back, r);
  }

  #[test]
  fn type_ref_deserialize_non_null_chain() {
    let json = r#"{"kind":"NON_NULL","ofType":{"kind":"LIST","ofType":{"kind":"SCALAR","name":"ID"}}}"#;
    let r: TypeRef = serde_json::from_str(json).unwrap();
    assert_eq!(r.signature(), "[ID]!");
  }

  #[test]
  fn schema_type_index_resolves_cycles() {
    let mut user = Type::object("User");
    user.fields.push(Field::new("posts", TypeRef::List(Box::new(TypeRef::Object("Post".to_string())))));
    let mut post = Type::object("Post");
    post.fields.push(Field::new("author", TypeRef::Object("User".to_string())));
    let schema = Schema {
      id: "s_1".to_string(),
      name: "cyclic".to_string(),
      source: SchemaSource::Reconstruction,
      query_type: "Query".to_string(),
      mutation_type: None,
      subscription_type: None,
      types: vec![user, post],
      directives: Vec::new(),
      created_at: OffsetDateTime::UNIX_EPOCH,
    };
    let index = schema.type_index();
    let user = index["User"];
    assert_eq!(index[user.fields[0].type_ref.base_name()].name, "Post");
    let post = index["Post"];
    assert_eq!(index[post.fields[0].type_ref.base_name()].name, "User");
  }
}
