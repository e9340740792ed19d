//! Boolean query DSL understood by the document store.
//!
//! [`Query::to_json`] renders the search-index request body;
//! [`Query::matches`] evaluates the same query against an in-memory
//! document so that both store backends agree on semantics.

use serde_json::{json, Map, Value};
use std::cmp::Ordering;

use crate::types::de::scalar_to_string;

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Case-insensitive equality of a scalar (or any element of an array).
    Match { field: String, value: Value },
    Exists { field: String },
    Bool(BoolQuery),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    pub must: Vec<Query>,
    pub should: Vec<Query>,
    pub must_not: Vec<Query>,
    pub minimum_should_match: Option<usize>,
}

impl BoolQuery {
    pub fn must(mut self, query: Query) -> Self {
        self.must.push(query);
        self
    }

    pub fn should(mut self, query: Query) -> Self {
        self.should.push(query);
        self
    }

    pub fn must_not(mut self, query: Query) -> Self {
        self.must_not.push(query);
        self
    }

    pub fn minimum_should_match(mut self, n: usize) -> Self {
        self.minimum_should_match = Some(n);
        self
    }

    pub fn build(self) -> Query {
        Query::Bool(self)
    }
}

impl From<BoolQuery> for Query {
    fn from(value: BoolQuery) -> Self {
        Query::Bool(value)
    }
}

impl Query {
    pub fn bool() -> BoolQuery {
        BoolQuery::default()
    }

    pub fn match_value(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Match {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists {
            field: field.into(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Query::Match { field, value } => json!({ "match": { field: value } }),
            Query::Exists { field } => json!({ "exists": { "field": field } }),
            Query::Bool(b) => {
                let mut body = Map::new();
                for (name, clauses) in [("must", &b.must), ("should", &b.should), ("must_not", &b.must_not)] {
                    if !clauses.is_empty() {
                        body.insert(name.into(), clauses.iter().map(Query::to_json).collect());
                    }
                }
                if let Some(n) = b.minimum_should_match {
                    body.insert("minimum_should_match".into(), n.into());
                }
                json!({ "bool": body })
            }
        }
    }

    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Query::Match { field, value } => {
                any_scalar(lookup(document, field), |candidate| loose_eq(candidate, value))
            }
            Query::Exists { field } => match lookup(document, field) {
                None | Some(Value::Null) => false,
                Some(Value::Array(items)) => items.iter().any(|i| !i.is_null()),
                Some(_) => true,
            },
            Query::Bool(b) => {
                if !b.must.iter().all(|q| q.matches(document)) {
                    return false;
                }
                if b.must_not.iter().any(|q| q.matches(document)) {
                    return false;
                }
                let required = b.minimum_should_match.unwrap_or(
                    if b.must.is_empty() && !b.should.is_empty() { 1 } else { 0 },
                );
                b.should.iter().filter(|q| q.matches(document)).count() >= required
            }
        }
    }
}

/// Resolves a dotted path such as `ibc_send.packet_sequence`.
pub fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

fn any_scalar(value: Option<&Value>, predicate: impl Fn(&Value) -> bool) -> bool {
    match value {
        Some(Value::Array(items)) => items.iter().any(&predicate),
        Some(Value::Null) | None => false,
        Some(v) => predicate(v),
    }
}

fn loose_eq(candidate: &Value, expected: &Value) -> bool {
    match (scalar_to_string(candidate), scalar_to_string(expected)) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(&b),
        _ => false,
    }
}

/// Orders two scalars numerically when both parse as numbers, otherwise
/// lexicographically by their string form.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    let as_f64 = |v: &Value| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    };
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => Some(scalar_to_string(a)?.cmp(&scalar_to_string(b)?)),
    }
}
