//! Path queries: the dot/bracket addressing grammar
//!
//! Paths address values inside a JSON document: `$` is the document root,
//! `$$` the context object, followed by dot fields (`$.order.id`), bracket
//! selectors (`$.items[0]`, `$['odd key']`) and the `[*]` wildcard.
//! Reference paths are the stricter form used as write targets
//! (`ResultPath`, catcher injection): no wildcards.
//!
//! A path that parses but selects nothing is NOT an error here; callers
//! decide whether an empty selection is a runtime failure.

use crate::errors::{DslError, DslResult};
use serde_json::{Map, Value};

/// What the leading token of a path addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathRoot {
    /// `$` — the current data document.
    Data,
    /// `$$` — the context object.
    Context,
    /// `$name` — a variable bound by an earlier Assign.
    Variable(String),
}

/// One navigation step of a parsed path.
#[derive(Clone, Debug, PartialEq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
    Wildcard,
}

/// A parsed path query.
#[derive(Clone, Debug, PartialEq)]
pub struct Path {
    pub root: PathRoot,
    pub segments: Vec<PathSegment>,
    text: String,
}

impl Path {
    /// Parse a path query. Wildcards are permitted.
    pub fn parse(text: &str) -> DslResult<Self> {
        Self::parse_inner(text, true)
    }

    /// Parse a reference path: a path naming exactly one location, so
    /// wildcards are rejected.
    pub fn parse_reference(text: &str) -> DslResult<Self> {
        Self::parse_inner(text, false)
    }

    fn parse_inner(text: &str, allow_wildcard: bool) -> DslResult<Self> {
        let invalid = |message: &str| DslError::InvalidPath {
            path: text.to_string(),
            message: message.to_string(),
        };

        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() || chars[0] != '$' {
            return Err(invalid("must start with '$'"));
        }

        let mut pos = 1;
        let root = if chars.get(1) == Some(&'$') {
            pos = 2;
            PathRoot::Context
        } else if matches!(chars.get(1), Some(c) if c.is_ascii_alphanumeric() || *c == '_') {
            let start = pos;
            while matches!(chars.get(pos), Some(c) if c.is_ascii_alphanumeric() || *c == '_') {
                pos += 1;
            }
            PathRoot::Variable(chars[start..pos].iter().collect())
        } else {
            PathRoot::Data
        };

        let mut segments = Vec::new();
        while pos < chars.len() {
            match chars[pos] {
                '.' => {
                    pos += 1;
                    let start = pos;
                    while pos < chars.len() && chars[pos] != '.' && chars[pos] != '[' {
                        pos += 1;
                    }
                    if pos == start {
                        return Err(invalid("empty field name after '.'"));
                    }
                    segments.push(PathSegment::Field(chars[start..pos].iter().collect()));
                }
                '[' => {
                    pos += 1;
                    match chars.get(pos) {
                        Some('*') => {
                            if !allow_wildcard {
                                return Err(invalid("wildcard not allowed in a reference path"));
                            }
                            pos += 1;
                            segments.push(PathSegment::Wildcard);
                        }
                        Some(&quote @ ('\'' | '"')) => {
                            pos += 1;
                            let start = pos;
                            while pos < chars.len() && chars[pos] != quote {
                                pos += 1;
                            }
                            if pos >= chars.len() {
                                return Err(invalid("unterminated bracket selector"));
                            }
                            segments.push(PathSegment::Field(chars[start..pos].iter().collect()));
                            pos += 1;
                        }
                        Some(c) if c.is_ascii_digit() => {
                            let start = pos;
                            while pos < chars.len() && chars[pos].is_ascii_digit() {
                                pos += 1;
                            }
                            let digits: String = chars[start..pos].iter().collect();
                            let index = digits
                                .parse::<usize>()
                                .map_err(|_| invalid("index out of range"))?;
                            segments.push(PathSegment::Index(index));
                        }
                        _ => return Err(invalid("expected index, quoted field or '*' after '['")),
                    }
                    if chars.get(pos) != Some(&']') {
                        return Err(invalid("expected ']'"));
                    }
                    pos += 1;
                }
                _ => return Err(invalid("expected '.' or '[' selector")),
            }
        }

        Ok(Self {
            root,
            segments,
            text: text.to_string(),
        })
    }

    /// Whether this path addresses the context object (`$$`).
    pub fn is_context(&self) -> bool {
        self.root == PathRoot::Context
    }

    /// The variable name, for `$name` rooted paths.
    pub fn variable_name(&self) -> Option<&str> {
        match &self.root {
            PathRoot::Variable(name) => Some(name),
            _ => None,
        }
    }

    /// Resolve this path against a document. Returns `None` when the path
    /// selects nothing. A wildcard step yields an array of every match.
    ///
    /// The caller is responsible for passing the right base document for
    /// the path's [`PathRoot`]: the context object for `$$`, the bound
    /// value for `$name`.
    pub fn query(&self, doc: &Value) -> Option<Value> {
        Self::resolve(&self.segments, doc)
    }

    fn resolve(segments: &[PathSegment], current: &Value) -> Option<Value> {
        let Some((head, rest)) = segments.split_first() else {
            return Some(current.clone());
        };
        match head {
            PathSegment::Field(name) => Self::resolve(rest, current.as_object()?.get(name)?),
            PathSegment::Index(i) => Self::resolve(rest, current.as_array()?.get(*i)?),
            PathSegment::Wildcard => {
                let children: Vec<&Value> = match current {
                    Value::Array(items) => items.iter().collect(),
                    Value::Object(map) => map.values().collect(),
                    _ => return None,
                };
                let matched: Vec<Value> = children
                    .into_iter()
                    .filter_map(|child| Self::resolve(rest, child))
                    .collect();
                Some(Value::Array(matched))
            }
        }
    }

    /// Write `value` at this reference path inside `doc`, creating missing
    /// intermediate objects. `$` alone replaces the whole document.
    pub fn inject(&self, doc: &mut Value, value: Value) -> Result<(), PathError> {
        if self.segments.is_empty() {
            *doc = value;
            return Ok(());
        }

        let mut current = doc;
        for (i, segment) in self.segments.iter().enumerate() {
            let last = i == self.segments.len() - 1;
            match segment {
                PathSegment::Field(name) => {
                    if current.is_null() {
                        *current = Value::Object(Map::new());
                    }
                    let map = current.as_object_mut().ok_or_else(|| {
                        PathError::NoMatch(format!(
                            "'{}' does not address an object field in the document",
                            self.text
                        ))
                    })?;
                    if last {
                        map.insert(name.clone(), value);
                        return Ok(());
                    }
                    current = map.entry(name.clone()).or_insert(Value::Null);
                }
                PathSegment::Index(idx) => {
                    let items = current.as_array_mut().ok_or_else(|| {
                        PathError::NoMatch(format!(
                            "'{}' indexes a value that is not an array",
                            self.text
                        ))
                    })?;
                    let slot = items.get_mut(*idx).ok_or_else(|| {
                        PathError::NoMatch(format!("'{}' indexes past the end", self.text))
                    })?;
                    if last {
                        *slot = value;
                        return Ok(());
                    }
                    current = slot;
                }
                PathSegment::Wildcard => {
                    // parse_reference rejects wildcards
                    return Err(PathError::NoMatch(format!(
                        "'{}' is not a reference path",
                        self.text
                    )));
                }
            }
        }
        unreachable!("loop returns on the last segment")
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Failure applying a parsed path to a concrete document.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("{0}")]
    NoMatch(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_dot_and_bracket() {
        let path = Path::parse("$.order.items[1]['unit price']").unwrap();
        assert_eq!(path.root, PathRoot::Data);
        assert_eq!(
            path.segments,
            vec![
                PathSegment::Field("order".into()),
                PathSegment::Field("items".into()),
                PathSegment::Index(1),
                PathSegment::Field("unit price".into()),
            ]
        );
    }

    #[test]
    fn test_parse_context_root() {
        let path = Path::parse("$$.Map.Item.Index").unwrap();
        assert!(path.is_context());
    }

    #[test]
    fn test_parse_variable_root() {
        let path = Path::parse("$orderTotal.amount").unwrap();
        assert_eq!(path.variable_name(), Some("orderTotal"));
        assert_eq!(path.segments, vec![PathSegment::Field("amount".into())]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Path::parse("order.id").is_err());
        assert!(Path::parse("$.").is_err());
        assert!(Path::parse("$.items[").is_err());
        assert!(Path::parse("$.items[-1]").is_err());
    }

    #[test]
    fn test_reference_path_rejects_wildcard() {
        assert!(Path::parse("$.items[*].id").is_ok());
        assert!(Path::parse_reference("$.items[*].id").is_err());
    }

    #[test]
    fn test_query_nested() {
        let doc = json!({"order": {"items": [{"id": 1}, {"id": 2}]}});
        let got = Path::parse("$.order.items[1].id").unwrap().query(&doc);
        assert_eq!(got, Some(json!(2)));
    }

    #[test]
    fn test_query_missing_is_none() {
        let doc = json!({"a": 1});
        assert_eq!(Path::parse("$.b.c").unwrap().query(&doc), None);
    }

    #[test]
    fn test_query_wildcard_collects() {
        let doc = json!({"items": [{"id": 1}, {"id": 2}, {"other": 3}]});
        let got = Path::parse("$.items[*].id").unwrap().query(&doc);
        assert_eq!(got, Some(json!([1, 2])));
    }

    #[test]
    fn test_inject_creates_intermediates() {
        let mut doc = json!({"kept": true});
        Path::parse_reference("$.result.value")
            .unwrap()
            .inject(&mut doc, json!(42))
            .unwrap();
        assert_eq!(doc, json!({"kept": true, "result": {"value": 42}}));
    }

    #[test]
    fn test_inject_root_replaces() {
        let mut doc = json!({"old": 1});
        Path::parse_reference("$")
            .unwrap()
            .inject(&mut doc, json!([1, 2]))
            .unwrap();
        assert_eq!(doc, json!([1, 2]));
    }

    #[test]
    fn test_inject_through_scalar_fails() {
        let mut doc = json!({"a": 5});
        let err = Path::parse_reference("$.a.b")
            .unwrap()
            .inject(&mut doc, json!(1));
        assert!(err.is_err());
    }
}
