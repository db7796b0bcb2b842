//! Query planner and executor pipeline.
//!
//! Planning walks the query tree collecting an index candidate for
//! every leaf that constrains an indexed field: equality leaves use any
//! index kind, range leaves need an ordered index. Candidates combine
//! under `And` by intersection (smallest estimated cardinality first),
//! under `Or` by union (any uncovered branch forces a full scan), and a
//! `Not` branch under `And` subtracts from its siblings' result set.
//! Whatever the access path cannot guarantee exactly is re-checked by a
//! residual filter, so plans are always exact.
//!
//! Execution is a two-operator open/next/close pipeline: an access
//! operator yielding records in access-path order, and a filter
//! operator on top. The cancellation token is checked between tuple
//! emissions.

mod engine;
mod exec;
#[cfg(test)]
mod tests;

pub use engine::QueryEngine;
pub use exec::{ExecContext, Executor, Tuple};

use common::IndexKind;
use index::IndexManager;
use query::Query;
use std::fmt;
use types::Value;

/// How the executor reaches candidate records.
#[derive(Clone, Debug, PartialEq)]
pub enum AccessPath {
    /// Every record, in id order.
    FullScan,
    IndexEq {
        field: String,
        value: Value,
    },
    /// Ordered-index range; results stream in field-value order.
    IndexRange {
        field: String,
        lo: Option<(Value, bool)>,
        hi: Option<(Value, bool)>,
    },
    /// Union of equality probes for `In`.
    IndexIn {
        field: String,
        values: Vec<Value>,
    },
    /// AND of candidates: intersect, keeping the first (smallest) one's
    /// order.
    Intersect(Vec<AccessPath>),
    /// OR of candidates: union, first occurrence wins.
    Union(Vec<AccessPath>),
    /// Base minus the excluded candidate's ids.
    Difference {
        base: Box<AccessPath>,
        exclude: Box<AccessPath>,
    },
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessPath::FullScan => write!(f, "FullScan"),
            AccessPath::IndexEq { field, value } => {
                write!(f, "IndexEq({field} = {value:?})")
            }
            AccessPath::IndexRange { field, lo, hi } => {
                let lo = lo
                    .as_ref()
                    .map(|(v, inc)| format!("{} {v:?}", if *inc { ">=" } else { ">" }))
                    .unwrap_or_default();
                let hi = hi
                    .as_ref()
                    .map(|(v, inc)| format!("{} {v:?}", if *inc { "<=" } else { "<" }))
                    .unwrap_or_default();
                write!(f, "IndexRange({field} {lo} {hi})")
            }
            AccessPath::IndexIn { field, values } => {
                write!(f, "IndexIn({field} in {} values)", values.len())
            }
            AccessPath::Intersect(parts) => {
                write!(f, "Intersect[")?;
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, "]")
            }
            AccessPath::Union(parts) => {
                write!(f, "Union[")?;
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, "]")
            }
            AccessPath::Difference { base, exclude } => {
                write!(f, "Difference[{base} - {exclude}]")
            }
        }
    }
}

/// A compiled plan: the access path plus the residual filter that makes
/// it exact.
#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    pub access: AccessPath,
    pub filter: Query,
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Access: {}", self.access)?;
        write!(f, "Filter: {}", self.filter.cache_key())
    }
}

/// Build a plan for `query` against the currently declared indexes.
pub fn plan_query(indexes: &IndexManager, query: &Query) -> Plan {
    let access = plan_node(indexes, query).unwrap_or(AccessPath::FullScan);
    Plan {
        access,
        filter: query.clone(),
    }
}

/// Candidate access path for one node, or `None` when the node cannot
/// be served by an index.
fn plan_node(indexes: &IndexManager, node: &Query) -> Option<AccessPath> {
    match node {
        Query::Equals { field, value } => {
            indexes.index_for(field)?;
            Some(AccessPath::IndexEq {
                field: field.clone(),
                value: value.clone(),
            })
        }
        Query::In { field, values } => {
            indexes.index_for(field)?;
            Some(AccessPath::IndexIn {
                field: field.clone(),
                values: values.clone(),
            })
        }
        Query::GreaterThan { field, value } => {
            ordered_index(indexes, field)?;
            Some(AccessPath::IndexRange {
                field: field.clone(),
                lo: Some((value.clone(), false)),
                hi: None,
            })
        }
        Query::LessThan { field, value } => {
            ordered_index(indexes, field)?;
            Some(AccessPath::IndexRange {
                field: field.clone(),
                lo: None,
                hi: Some((value.clone(), false)),
            })
        }
        Query::Between {
            field,
            lo,
            hi,
            inclusive_lo,
            inclusive_hi,
        } => {
            ordered_index(indexes, field)?;
            Some(AccessPath::IndexRange {
                field: field.clone(),
                lo: Some((lo.clone(), *inclusive_lo)),
                hi: Some((hi.clone(), *inclusive_hi)),
            })
        }
        Query::And(children) => plan_and(indexes, children),
        Query::Or(children) => {
            // Every branch must be index-covered, or the union is not
            // a superset of the answer.
            let mut parts = Vec::with_capacity(children.len());
            for child in children {
                parts.push(plan_node(indexes, child)?);
            }
            Some(AccessPath::Union(parts))
        }
        // A bare NOT has no index form; under AND it becomes a
        // Difference (handled in plan_and).
        Query::Not(_) => None,
        // Text/affix/existence leaves are filter-only.
        _ => None,
    }
}

fn plan_and(indexes: &IndexManager, children: &[Query]) -> Option<AccessPath> {
    let mut positives: Vec<(u64, u8, AccessPath)> = Vec::new();
    let mut negatives: Vec<AccessPath> = Vec::new();

    for child in children {
        if let Query::Not(inner) = child {
            if let Some(path) = plan_node(indexes, inner) {
                negatives.push(path);
            }
            continue;
        }
        if let Some(path) = plan_node(indexes, child) {
            let (est, kind_rank) = estimate(indexes, child, &path);
            positives.push((est, kind_rank, path));
        }
    }

    if positives.is_empty() {
        return None;
    }

    // Smallest estimated cardinality first; hash beats ordered on an
    // equality tie.
    positives.sort_by_key(|(est, kind_rank, _)| (*est, *kind_rank));
    let paths: Vec<AccessPath> = positives.into_iter().map(|(_, _, p)| p).collect();
    let base = if paths.len() == 1 {
        paths.into_iter().next().unwrap()
    } else {
        AccessPath::Intersect(paths)
    };

    Some(negatives.into_iter().fold(base, |acc, exclude| {
        AccessPath::Difference {
            base: Box::new(acc),
            exclude: Box::new(exclude),
        }
    }))
}

/// Selectivity proxy: the per-index entry counter maintained by the
/// index manager. The kind rank breaks equality ties toward hash.
fn estimate(indexes: &IndexManager, node: &Query, path: &AccessPath) -> (u64, u8) {
    let field = match path {
        AccessPath::IndexEq { field, .. }
        | AccessPath::IndexRange { field, .. }
        | AccessPath::IndexIn { field, .. } => field,
        _ => return (u64::MAX, 1),
    };
    let Some(handle) = indexes.index_for(field) else {
        return (u64::MAX, 1);
    };
    let kind_rank = match (node, handle.kind) {
        (Query::Equals { .. }, IndexKind::Hash) => 0,
        _ => 1,
    };
    (handle.cardinality(), kind_rank)
}

fn ordered_index(indexes: &IndexManager, field: &str) -> Option<()> {
    match indexes.index_for(field) {
        Some(handle) if handle.kind == IndexKind::Ordered => Some(()),
        _ => None,
    }
}
