//! Structural fingerprinting of GraphQL queries
//!
//! Two queries that differ only in literal values, aliases, or field order
//! fingerprint identically, which lets downstream consumers cluster
//! equivalent operations.

use sha2::{Digest, Sha256};

/// Generates a structural hash of a GraphQL query string.
///
/// The query is normalized by removing literals and aliases and sorting
/// flat selection sets before hashing; the result is a 32-char hex string.
pub fn fingerprint(query: &str) -> String {
  let normalized = normalize_query(query);
  let digest = Sha256::digest(normalized.as_bytes());
  hex::encode(&digest[..16])
}

fn normalize_query(query: &str) -> String {
  // Drop comment lines.
  let without_comments: Vec<&str> = query
    .lines()
    .map(str::trim)
    .filter(|line| !line.starts_with('#'))
    .collect();
  let mut normalized = without_comments.join(" ");

  normalized = remove_string_literals(&normalized);
  normalized = remove_numeric_literals(&normalized);
  normalized = remove_aliases(&normalized);
  normalized = normalize_whitespace(&normalized);
  sort_selections(&normalized)
}

/// Blanks out string literals, keeping an empty `""` marker.
fn remove_string_literals(s: &str) -> String {
  let mut result = String::with_capacity(s.len());
  let mut in_string = false;
  let mut escaped = false;

  for c in s.chars() {
    if escaped {
      escaped = false;
      continue;
    }
    if c == '\\' && in_string {
      escaped = true;
      continue;
    }
    if c == '"' {
      in_string = !in_string;
      if !in_string {
        result.push_str("\"\"");
      }
      continue;
    }
    if !in_string {
      result.push(c);
    }
  }
  result
}

/// Collapses every numeric literal to `0`.
fn remove_numeric_literals(s: &str) -> String {
  let mut result = String::with_capacity(s.len());
  let mut chars = s.chars().peekable();
  while let Some(&c) = chars.peek() {
    if c.is_ascii_digit() {
      while let Some(&d) = chars.peek() {
        if d.is_ascii_digit() || d == '.' {
          chars.next();
        } else {
          break;
        }
      }
      result.push('0');
    } else {
      result.push(c);
      chars.next();
    }
  }
  result
}

/// Drops `alias: field` prefixes, keeping the field name.
fn remove_aliases(s: &str) -> String {
  let tokens = tokenize(s);
  let mut result = String::with_capacity(s.len());
  let mut i = 0;
  while i < tokens.len() {
    if i + 2 < tokens.len()
      && tokens[i + 1] == ":"
      && is_identifier(&tokens[i])
      && is_identifier(&tokens[i + 2])
    {
      // Skip the alias and its colon; the next iteration picks up the field.
      i += 2;
      continue;
    }
    result.push_str(&tokens[i]);
    if i < tokens.len() - 1 {
      result.push(' ');
    }
    i += 1;
  }
  result
}

fn normalize_whitespace(s: &str) -> String {
  s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sorts field names within curly-brace blocks so field order does not
/// affect the hash. Handles flat field lists.
fn sort_selections(s: &str) -> String {
  let mut result = String::with_capacity(s.len());
  let mut depth = 0usize;
  let mut pending_fields: Vec<String> = Vec::new();
  let mut current = String::new();

  for c in s.chars() {
    match c {
      '{' => {
        if !current.is_empty() {
          result.push_str(&current);
          current.clear();
        }
        result.push('{');
        depth += 1;
      }
      '}' => {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
          pending_fields.push(trimmed.to_string());
        }
        current.clear();
        if !pending_fields.is_empty() {
          pending_fields.sort();
          result.push_str(&pending_fields.join(" "));
          pending_fields.clear();
        }
        result.push('}');
        depth = depth.saturating_sub(1);
      }
      ' ' if depth > 0 && !current.is_empty() => {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
          pending_fields.push(trimmed.to_string());
        }
        current.clear();
      }
      _ => current.push(c),
    }
  }

  if !current.is_empty() {
    result.push_str(&current);
  }
  result
}

fn tokenize(s: &str) -> Vec<String> {
  let mut tokens = Vec::new();
  let mut current = String::new();
  for c in s.chars() {
    match c {
      '{' | '}' | '(' | ')' | ':' | ',' => {
        if !current.is_empty() {
          tokens.push(std::mem::take(&mut current));
        }
        tokens.push(c.to_string());
      }
      c if c.is_whitespace() => {
        if !current.is_empty() {
          tokens.push(std::mem::take(&mut current));
        }
      }
      _ => current.push(c),
    }
  }
  if !current.is_empty() {
    tokens.push(current);
  }
  tokens
}

fn is_identifier(s: &str) -> bool {
  let mut chars = s.chars();
  match chars.next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
    _ => return false,
  }
  chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
