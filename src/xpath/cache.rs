//! The process-wide compiled-expression cache.
//!
//! Keyed on the exact expression source, bounded LRU at 1024 entries,
//! guarded by its own mutex. Purely a performance layer: evaluation results
//! never depend on whether a lookup hit.

use std::sync::{Arc, Mutex, PoisonError};

use ahash::AHashMap;
use once_cell::sync::Lazy;

use crate::xpath::CompiledExpression;

pub(crate) const CACHE_CAPACITY: usize = 1024;

struct Entry {
    compiled: Arc<CompiledExpression>,
    last_used: u64,
}

#[derive(Default)]
struct ExpressionCache {
    entries: AHashMap<String, Entry>,
    clock: u64,
}

static CACHE: Lazy<Mutex<ExpressionCache>> =
    Lazy::new(|| Mutex::new(ExpressionCache::default()));

pub(crate) fn lookup(source: &str) -> Option<Arc<CompiledExpression>> {
    let mut cache = CACHE.lock().unwrap_or_else(PoisonError::into_inner);
    cache.clock += 1;
    let clock = cache.clock;
    let entry = cache.entries.get_mut(source)?;
    entry.last_used = clock;
    Some(entry.compiled.clone())
}

pub(crate) fn store(source: &str, compiled: Arc<CompiledExpression>) {
    let mut cache = CACHE.lock().unwrap_or_else(PoisonError::into_inner);
    cache.clock += 1;
    let clock = cache.clock;

    if cache.entries.len() >= CACHE_CAPACITY && !cache.entries.contains_key(source) {
        if let Some(oldest) = cache
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())
        {
            cache.entries.remove(&oldest);
        }
    }

    cache.entries.insert(
        source.to_string(),
        Entry {
            compiled,
            last_used: clock,
        },
    );
}
