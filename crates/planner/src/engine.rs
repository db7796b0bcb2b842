//! Plan and result caches around the planner.

use crate::exec::{execute, ExecContext, Tuple};
use crate::{plan_query, Plan};
use common::DbResult;
use index::IndexManager;
use lru::LruCache;
use parking_lot::Mutex;
use query::Query;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Caching query front-end for one collection.
///
/// Plans are cached by the query's serialized form and invalidated on
/// schema changes (index create/drop). Results are optionally cached
/// under the same key and invalidated on any record mutation.
pub struct QueryEngine {
    plans: Mutex<LruCache<String, Arc<Plan>>>,
    results: Option<Mutex<LruCache<String, Arc<Vec<Tuple>>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryEngine {
    pub fn new(plan_cache_size: usize, result_cache: bool) -> Self {
        let capacity = NonZeroUsize::new(plan_cache_size.max(1)).unwrap();
        QueryEngine {
            plans: Mutex::new(LruCache::new(capacity)),
            results: result_cache.then(|| Mutex::new(LruCache::new(capacity))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Plan (or reuse a cached plan for) `query`.
    pub fn plan(&self, indexes: &IndexManager, query: &Query) -> Arc<Plan> {
        let key = query.cache_key();
        let mut plans = self.plans.lock();
        if let Some(plan) = plans.get(&key) {
            return Arc::clone(plan);
        }
        let plan = Arc::new(plan_query(indexes, query));
        trace!(%key, access = %plan.access, "planned query");
        plans.push(key, Arc::clone(&plan));
        plan
    }

    /// Plan, execute, and (optionally) cache the result set.
    pub fn find(&self, ctx: &mut ExecContext, query: &Query) -> DbResult<Arc<Vec<Tuple>>> {
        let key = query.cache_key();
        if let Some(results) = &self.results {
            if let Some(cached) = results.lock().get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(cached));
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let plan = self.plan(ctx.indexes, query);
        let tuples = Arc::new(execute(&plan, ctx)?);
        if let Some(results) = &self.results {
            results.lock().push(key, Arc::clone(&tuples));
        }
        Ok(tuples)
    }

    /// Drop cached results. Called on every record mutation: the
    /// contract is simply "no stale results".
    pub fn invalidate_results(&self) {
        if let Some(results) = &self.results {
            results.lock().clear();
        }
    }

    /// Drop everything. Called when an index is created or dropped,
    /// since cached plans may reference it.
    pub fn invalidate_all(&self) {
        self.plans.lock().clear();
        self.invalidate_results();
    }

    /// Result-cache hit ratio since open.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }
}
