//! Query tree model.
//!
//! A [`Query`] is a tree: comparison/string/set predicates at the
//! leaves, `And`/`Or`/`Not` at the internal nodes. Trees serialize
//! deterministically (serde/JSON), which is what the plan and result
//! caches key on. [`Matcher`] evaluates a tree against a record body,
//! with regexes compiled once per query.

#[cfg(test)]
mod tests;

use common::{DbError, DbResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use types::{Fields, Value};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Query {
    Equals { field: String, value: Value },
    NotEquals { field: String, value: Value },
    GreaterThan { field: String, value: Value },
    LessThan { field: String, value: Value },
    Between {
        field: String,
        lo: Value,
        hi: Value,
        inclusive_lo: bool,
        inclusive_hi: bool,
    },
    In { field: String, values: Vec<Value> },
    /// Substring match on text, element match on lists.
    Contains { field: String, value: Value },
    StartsWith { field: String, prefix: String },
    EndsWith { field: String, suffix: String },
    Regex { field: String, pattern: String },
    Exists { field: String },
    IsNull { field: String },
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
    /// All whitespace-separated terms must appear as tokens of the
    /// field's text.
    FullText { field: String, terms: String },
}

impl Query {
    // Builder shorthands; `find(Query::eq("price", 10.into()))` reads
    // better than spelling the variants out.

    pub fn eq(field: impl Into<String>, value: Value) -> Query {
        Query::Equals { field: field.into(), value }
    }

    pub fn ne(field: impl Into<String>, value: Value) -> Query {
        Query::NotEquals { field: field.into(), value }
    }

    pub fn gt(field: impl Into<String>, value: Value) -> Query {
        Query::GreaterThan { field: field.into(), value }
    }

    pub fn lt(field: impl Into<String>, value: Value) -> Query {
        Query::LessThan { field: field.into(), value }
    }

    pub fn between(
        field: impl Into<String>,
        lo: Value,
        hi: Value,
        inclusive_lo: bool,
        inclusive_hi: bool,
    ) -> Query {
        Query::Between {
            field: field.into(),
            lo,
            hi,
            inclusive_lo,
            inclusive_hi,
        }
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Query {
        Query::In { field: field.into(), values }
    }

    pub fn and(queries: Vec<Query>) -> Query {
        Query::And(queries)
    }

    pub fn or(queries: Vec<Query>) -> Query {
        Query::Or(queries)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(query: Query) -> Query {
        Query::Not(Box::new(query))
    }

    /// Deterministic serialized form; the cache key for plans and
    /// results.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).expect("query trees always serialize")
    }

    /// Rebuild a query from its serialized form.
    pub fn from_cache_key(key: &str) -> DbResult<Query> {
        serde_json::from_str(key)
            .map_err(|e| DbError::QueryInvalid(format!("cannot parse query: {e}")))
    }

    /// The field a leaf constrains; `None` for internal nodes.
    pub fn leaf_field(&self) -> Option<&str> {
        match self {
            Query::Equals { field, .. }
            | Query::NotEquals { field, .. }
            | Query::GreaterThan { field, .. }
            | Query::LessThan { field, .. }
            | Query::Between { field, .. }
            | Query::In { field, .. }
            | Query::Contains { field, .. }
            | Query::StartsWith { field, .. }
            | Query::EndsWith { field, .. }
            | Query::Regex { field, .. }
            | Query::Exists { field }
            | Query::IsNull { field }
            | Query::FullText { field, .. } => Some(field),
            Query::And(_) | Query::Or(_) | Query::Not(_) => None,
        }
    }
}

/// Compiled evaluator for one query tree.
#[derive(Debug)]
pub struct Matcher {
    query: Query,
    regexes: HashMap<String, Regex>,
}

impl Matcher {
    /// Compile every `Regex` leaf up front; a bad pattern fails here,
    /// not per record.
    pub fn new(query: Query) -> DbResult<Matcher> {
        let mut regexes = HashMap::new();
        collect_regexes(&query, &mut regexes)?;
        Ok(Matcher { query, regexes })
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn matches(&self, body: &Fields) -> bool {
        self.eval(&self.query, body)
    }

    fn eval(&self, node: &Query, body: &Fields) -> bool {
        match node {
            Query::Equals { field, value } => cmp_is(body, field, value, |o| o == std::cmp::Ordering::Equal),
            Query::NotEquals { field, value } => {
                cmp_is(body, field, value, |o| o != std::cmp::Ordering::Equal)
            }
            Query::GreaterThan { field, value } => {
                cmp_is(body, field, value, |o| o == std::cmp::Ordering::Greater)
            }
            Query::LessThan { field, value } => {
                cmp_is(body, field, value, |o| o == std::cmp::Ordering::Less)
            }
            Query::Between {
                field,
                lo,
                hi,
                inclusive_lo,
                inclusive_hi,
            } => {
                let above = if *inclusive_lo {
                    cmp_is(body, field, lo, |o| o != std::cmp::Ordering::Less)
                } else {
                    cmp_is(body, field, lo, |o| o == std::cmp::Ordering::Greater)
                };
                let below = if *inclusive_hi {
                    cmp_is(body, field, hi, |o| o != std::cmp::Ordering::Greater)
                } else {
                    cmp_is(body, field, hi, |o| o == std::cmp::Ordering::Less)
                };
                above && below
            }
            Query::In { field, values } => match body.get_path(field) {
                Some(actual) => values
                    .iter()
                    .any(|v| actual.eq_same_type(v) == Some(true)),
                None => false,
            },
            Query::Contains { field, value } => match body.get_path(field) {
                Some(Value::Text(text)) => value
                    .as_str()
                    .map(|needle| text.contains(needle))
                    .unwrap_or(false),
                Some(Value::List(items)) => {
                    items.iter().any(|item| item.eq_same_type(value) == Some(true))
                }
                _ => false,
            },
            Query::StartsWith { field, prefix } => text_of(body, field)
                .map(|text| text.starts_with(prefix.as_str()))
                .unwrap_or(false),
            Query::EndsWith { field, suffix } => text_of(body, field)
                .map(|text| text.ends_with(suffix.as_str()))
                .unwrap_or(false),
            Query::Regex { field, pattern } => match text_of(body, field) {
                Some(text) => self
                    .regexes
                    .get(pattern)
                    .map(|re| re.is_match(text))
                    .unwrap_or(false),
                None => false,
            },
            Query::Exists { field } => body.get_path(field).is_some(),
            Query::IsNull { field } => body
                .get_path(field)
                .map(Value::is_null)
                .unwrap_or(false),
            Query::And(children) => children.iter().all(|c| self.eval(c, body)),
            Query::Or(children) => children.iter().any(|c| self.eval(c, body)),
            Query::Not(child) => !self.eval(child, body),
            Query::FullText { field, terms } => match text_of(body, field) {
                Some(text) => {
                    let tokens: Vec<String> = tokenize(text);
                    terms
                        .split_whitespace()
                        .all(|term| tokens.iter().any(|t| t == &term.to_lowercase()))
                }
                None => false,
            },
        }
    }
}

fn cmp_is(
    body: &Fields,
    field: &str,
    value: &Value,
    pred: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    body.get_path(field)
        .and_then(|actual| actual.cmp_same_type(value))
        .map(pred)
        .unwrap_or(false)
}

fn text_of<'a>(body: &'a Fields, field: &str) -> Option<&'a str> {
    body.get_path(field).and_then(Value::as_str)
}

/// Lower-cased alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn collect_regexes(node: &Query, out: &mut HashMap<String, Regex>) -> DbResult<()> {
    match node {
        Query::Regex { pattern, .. } => {
            if !out.contains_key(pattern) {
                let compiled = Regex::new(pattern)
                    .map_err(|e| DbError::QueryInvalid(format!("bad regex: {e}")))?;
                out.insert(pattern.clone(), compiled);
            }
        }
        Query::And(children) | Query::Or(children) => {
            for child in children {
                collect_regexes(child, out)?;
            }
        }
        Query::Not(child) => collect_regexes(child, out)?,
        _ => {}
    }
    Ok(())
}
