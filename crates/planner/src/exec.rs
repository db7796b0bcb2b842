//! Open/next/close executors over an access path.

use crate::{AccessPath, Plan};
use codec::TypeRegistry;
use common::{CancelToken, DbError, DbResult};
use index::IndexManager;
use query::Matcher;
use store::RecordStore;
use types::Fields;

/// One record as the executor pipeline sees it.
#[derive(Clone, Debug, PartialEq)]
pub struct Tuple {
    pub id: String,
    pub version: u64,
    pub body: Fields,
}

/// Everything an executor needs to touch storage.
pub struct ExecContext<'a> {
    pub store: &'a RecordStore,
    pub indexes: &'a IndexManager,
    pub registry: &'a TypeRegistry,
    pub cancel: CancelToken,
}

impl<'a> ExecContext<'a> {
    pub fn new(
        store: &'a RecordStore,
        indexes: &'a IndexManager,
        registry: &'a TypeRegistry,
        cancel: CancelToken,
    ) -> Self {
        ExecContext {
            store,
            indexes,
            registry,
            cancel,
        }
    }

    fn fetch(&self, id: &str) -> DbResult<Option<Tuple>> {
        match self.store.get(id)? {
            Some(bytes) => {
                let record = codec::decode_record(&bytes, self.registry)?;
                Ok(Some(Tuple {
                    id: record.id,
                    version: record.version,
                    body: record.body,
                }))
            }
            None => Ok(None),
        }
    }
}

/// Volcano-style operator interface.
pub trait Executor {
    fn open(&mut self, ctx: &mut ExecContext) -> DbResult<()>;
    fn next(&mut self, ctx: &mut ExecContext) -> DbResult<Option<Tuple>>;
    fn close(&mut self, ctx: &mut ExecContext) -> DbResult<()>;
}

/// Resolves the access path to an ordered id list at open, then fetches
/// and decodes one record per `next`.
pub struct AccessExec {
    access: AccessPath,
    ids: Vec<String>,
    cursor: usize,
}

impl AccessExec {
    pub fn new(access: AccessPath) -> Self {
        AccessExec {
            access,
            ids: Vec::new(),
            cursor: 0,
        }
    }

    fn resolve(access: &AccessPath, ctx: &ExecContext) -> DbResult<Vec<String>> {
        match access {
            AccessPath::FullScan => Ok(ctx.store.ids()),
            AccessPath::IndexEq { field, value } => {
                let handle = ctx
                    .indexes
                    .index_for(field)
                    .ok_or_else(|| DbError::IndexNotFound(field.clone()))?;
                handle.lookup_eq(value)
            }
            AccessPath::IndexRange { field, lo, hi } => {
                let handle = ctx
                    .indexes
                    .index_for(field)
                    .ok_or_else(|| DbError::IndexNotFound(field.clone()))?;
                handle.lookup_range(
                    lo.as_ref().map(|(v, inc)| (v, *inc)),
                    hi.as_ref().map(|(v, inc)| (v, *inc)),
                )
            }
            AccessPath::IndexIn { field, values } => {
                let handle = ctx
                    .indexes
                    .index_for(field)
                    .ok_or_else(|| DbError::IndexNotFound(field.clone()))?;
                let mut out = Vec::new();
                for value in values {
                    for id in handle.lookup_eq(value)? {
                        if !out.contains(&id) {
                            out.push(id);
                        }
                    }
                }
                Ok(out)
            }
            AccessPath::Intersect(parts) => {
                let mut iter = parts.iter();
                let first = match iter.next() {
                    Some(part) => Self::resolve(part, ctx)?,
                    None => return Ok(Vec::new()),
                };
                let mut keep = first;
                for part in iter {
                    let other: std::collections::HashSet<String> =
                        Self::resolve(part, ctx)?.into_iter().collect();
                    keep.retain(|id| other.contains(id));
                }
                Ok(keep)
            }
            AccessPath::Union(parts) => {
                let mut out = Vec::new();
                let mut seen = std::collections::HashSet::new();
                for part in parts {
                    for id in Self::resolve(part, ctx)? {
                        if seen.insert(id.clone()) {
                            out.push(id);
                        }
                    }
                }
                Ok(out)
            }
            AccessPath::Difference { base, exclude } => {
                let mut keep = Self::resolve(base, ctx)?;
                let drop: std::collections::HashSet<String> =
                    Self::resolve(exclude, ctx)?.into_iter().collect();
                keep.retain(|id| !drop.contains(id));
                Ok(keep)
            }
        }
    }
}

impl Executor for AccessExec {
    fn open(&mut self, ctx: &mut ExecContext) -> DbResult<()> {
        self.cursor = 0;
        self.ids = Self::resolve(&self.access, ctx)?;
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecContext) -> DbResult<Option<Tuple>> {
        loop {
            ctx.cancel.check()?;
            let Some(id) = self.ids.get(self.cursor) else {
                return Ok(None);
            };
            self.cursor += 1;
            // A record deleted between resolve and fetch just drops out.
            if let Some(tuple) = ctx.fetch(id)? {
                return Ok(Some(tuple));
            }
        }
    }

    fn close(&mut self, _ctx: &mut ExecContext) -> DbResult<()> {
        self.ids.clear();
        self.cursor = 0;
        Ok(())
    }
}

/// Residual predicate on top of the access operator.
pub struct FilterExec {
    input: AccessExec,
    matcher: Matcher,
}

impl FilterExec {
    pub fn new(plan: &Plan) -> DbResult<Self> {
        Ok(FilterExec {
            input: AccessExec::new(plan.access.clone()),
            matcher: Matcher::new(plan.filter.clone())?,
        })
    }
}

impl Executor for FilterExec {
    fn open(&mut self, ctx: &mut ExecContext) -> DbResult<()> {
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecContext) -> DbResult<Option<Tuple>> {
        while let Some(tuple) = self.input.next(ctx)? {
            if self.matcher.matches(&tuple.body) {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn close(&mut self, ctx: &mut ExecContext) -> DbResult<()> {
        self.input.close(ctx)
    }
}

/// Run a plan to completion through the pipeline.
pub fn execute(plan: &Plan, ctx: &mut ExecContext) -> DbResult<Vec<Tuple>> {
    let mut root = FilterExec::new(plan)?;
    root.open(ctx)?;
    let mut out = Vec::new();
    let result = loop {
        match root.next(ctx) {
            Ok(Some(tuple)) => out.push(tuple),
            Ok(None) => break Ok(out),
            Err(err) => break Err(err),
        }
    };
    // Close releases pins even when the scan was cancelled mid-flight.
    root.close(ctx)?;
    result
}
