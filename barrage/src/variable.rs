//! Variables: values extracted from one response and substituted into the next
//! request of a chain.
//!
//! A target declares the variables it produces as `token → {type, path}`. After
//! each response the declared entries are looked up in the parsed body; the
//! ones that resolve are merged into the running [`VariableMap`] and replace
//! their `token` in the URL, body and header values of later targets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Placeholder token → variable.
pub type VariableMap = BTreeMap<String, VariableEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    Number,
    Array,
    Object,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableEntry {
    #[serde(rename = "type")]
    pub kind: VariableType,
    pub path: String,
    #[serde(skip)]
    pub value: String,
}

impl VariableEntry {
    pub fn new(kind: VariableType, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            value: String::new(),
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }
}

/// Format of the response bodies variables are extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    #[default]
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VariableError {
    #[error("body is not a valid {format:?} document: {reason}")]
    InvalidDocument { format: ContentFormat, reason: String },
    #[error("key {0} does not exist")]
    Missing(String),
    #[error("key {path} is not {expected:?}")]
    TypeMismatch { path: String, expected: VariableType },
}

/// Typed path lookups over a parsed document. Arrays and objects come back as
/// their compact serialized text so they can be substituted like any value.
pub trait VariableParser {
    fn parse_string(&self, path: &str) -> Result<String, VariableError>;
    fn parse_number(&self, path: &str) -> Result<String, VariableError>;
    fn parse_array(&self, path: &str) -> Result<String, VariableError>;
    fn parse_object(&self, path: &str) -> Result<String, VariableError>;

    fn parse(&self, kind: VariableType, path: &str) -> Result<String, VariableError> {
        match kind {
            VariableType::String => self.parse_string(path),
            VariableType::Number => self.parse_number(path),
            VariableType::Array => self.parse_array(path),
            VariableType::Object => self.parse_object(path),
        }
    }
}

/// Dotted-path lookups (`data.users.0.name`) over a JSON document.
#[derive(Debug, Clone)]
pub struct JsonParser {
    document: Value,
}

impl JsonParser {
    pub fn new(content: &[u8]) -> Result<Self, VariableError> {
        serde_json::from_slice(content)
            .map(|document| Self { document })
            .map_err(|e| VariableError::InvalidDocument {
                format: ContentFormat::Json,
                reason: e.to_string(),
            })
    }

    fn lookup(&self, path: &str) -> Result<&Value, VariableError> {
        path.split('.')
            .try_fold(&self.document, |node, segment| match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
            .ok_or_else(|| VariableError::Missing(path.to_string()))
    }

    fn mismatch(path: &str, expected: VariableType) -> VariableError {
        VariableError::TypeMismatch {
            path: path.to_string(),
            expected,
        }
    }
}

impl VariableParser for JsonParser {
    fn parse_string(&self, path: &str) -> Result<String, VariableError> {
        match self.lookup(path)? {
            Value::String(s) => Ok(s.clone()),
            _ => Err(Self::mismatch(path, VariableType::String)),
        }
    }

    fn parse_number(&self, path: &str) -> Result<String, VariableError> {
        match self.lookup(path)? {
            Value::Number(n) => Ok(n.to_string()),
            Value::String(s) if is_numeric(s) => Ok(s.clone()),
            _ => Err(Self::mismatch(path, VariableType::Number)),
        }
    }

    fn parse_array(&self, path: &str) -> Result<String, VariableError> {
        match self.lookup(path)? {
            value @ Value::Array(_) => Ok(value.to_string()),
            _ => Err(Self::mismatch(path, VariableType::Array)),
        }
    }

    fn parse_object(&self, path: &str) -> Result<String, VariableError> {
        match self.lookup(path)? {
            value @ Value::Object(_) => Ok(value.to_string()),
            _ => Err(Self::mismatch(path, VariableType::Object)),
        }
    }
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.parse::<f64>().is_ok_and(f64::is_finite)
}

/// Extract every declared variable from `body`.
///
/// Entries whose path is missing or holds the wrong type are skipped, as is
/// everything when the body does not parse. The result only holds entries
/// that resolved, each carrying its extracted value.
pub fn extract(declared: &VariableMap, body: &[u8], format: ContentFormat) -> VariableMap {
    if declared.is_empty() {
        return VariableMap::new();
    }

    let parser = match format {
        ContentFormat::Json => JsonParser::new(body),
    };
    let parser = match parser {
        Ok(parser) => parser,
        Err(e) => {
            tracing::debug!(error = %e, "variable extraction skipped");
            return VariableMap::new();
        }
    };

    declared
        .iter()
        .filter_map(|(token, entry)| match parser.parse(entry.kind, &entry.path) {
            Ok(value) => Some((token.clone(), entry.clone().with_value(value))),
            Err(e) => {
                tracing::debug!(token = %token, error = %e, "variable extraction failed");
                None
            }
        })
        .collect()
}

/// Replace every variable token found in `template` with its value.
///
/// Longer tokens go first so that `$token` is never clobbered by `$tok`.
pub fn substitute(variables: &VariableMap, template: &str) -> String {
    if variables.is_empty() || template.is_empty() {
        return template.to_string();
    }

    let mut tokens: Vec<(&String, &VariableEntry)> = variables.iter().collect();
    tokens.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    tokens
        .into_iter()
        .filter(|(token, _)| !token.is_empty())
        .fold(template.to_string(), |acc, (token, entry)| {
            if acc.contains(token.as_str()) {
                acc.replace(token.as_str(), &entry.value)
            } else {
                acc
            }
        })
}

/// A new map holding `base` overwritten and extended by `overlay`.
pub fn merge(base: &VariableMap, overlay: &VariableMap) -> VariableMap {
    let mut merged = base.clone();
    merged.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
