use enrich_core::Enrichment;
use enrich_core::config::EnrichmentConf;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// An immutable snapshot of the active enrichment set (§3 "Registry").
///
/// The *value* is immutable; only the cell referencing it
/// ([`EnrichmentRegistry`]) is mutated, and only by a single writer.
pub struct Registry {
    pub enrichments: Vec<Arc<dyn Enrichment>>,
    pub configs: Vec<EnrichmentConf>,
}

impl Registry {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            enrichments: Vec::new(),
            configs: Vec::new(),
        })
    }

    /// Construct a registry from configs and their already-built
    /// enrichment instances, in declared order. Building each enrichment
    /// (resolving its assets, opening any DB pools) is the caller's job —
    /// see [`crate::build_enrichments`] — so that a single failed builder
    /// fails the whole build without this type needing to know how to
    /// build any particular enrichment kind.
    pub fn new(configs: Vec<EnrichmentConf>, enrichments: Vec<Arc<dyn Enrichment>>) -> Self {
        Self {
            enrichments,
            configs,
        }
    }
}

/// Single-writer, many-reader cell holding the currently active
/// [`Registry`]. Replacement is atomic from a reader's perspective: readers
/// that have captured a snapshot via [`EnrichmentRegistry::snapshot`] keep
/// it alive (via `Arc` refcounting) until they drop it, even after a swap
/// (§4.3, §9 "mutable cell of Registry" redesign note).
///
/// Backed by a `RwLock` rather than a lock-free atomic pointer: the
/// critical section is a single `Arc` clone, so contention is negligible,
/// and it avoids requiring `arc-swap` as a new dependency for a single
/// call site.
pub struct EnrichmentRegistry {
    inner: RwLock<Arc<Registry>>,
    in_flight: Arc<AtomicUsize>,
}

/// A registry snapshot held for the duration of exactly one event's
/// enrichment (invariant 4). Dropping it releases the in-flight count the
/// [`crate::AssetManager`]'s drain barrier waits on.
pub struct RegistrySnapshot {
    registry: Arc<Registry>,
    in_flight: Arc<AtomicUsize>,
}

impl Deref for RegistrySnapshot {
    type Target = Registry;
    fn deref(&self) -> &Registry {
        &self.registry
    }
}

impl Drop for RegistrySnapshot {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl EnrichmentRegistry {
    pub fn new(initial: Arc<Registry>) -> Self {
        Self {
            inner: RwLock::new(initial),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns an immutable view; cheap (one `Arc` clone under a read lock).
    /// Does not participate in the drain barrier — use [`Self::enter`] from
    /// the pipeline's per-event entry point instead.
    pub fn snapshot(&self) -> Arc<Registry> {
        self.inner.read().expect("registry lock poisoned").clone()
    }

    /// Capture a snapshot for one event's worth of enrichment work,
    /// registering it as in-flight so [`crate::AssetManager`]'s drain
    /// barrier can observe it (§4.4 step 3b, §5 suspension point b).
    pub fn enter(&self) -> RegistrySnapshot {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        RegistrySnapshot {
            registry: self.snapshot(),
            in_flight: self.in_flight.clone(),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Atomic pointer publication with release semantics: once this
    /// returns, every subsequent `snapshot()`/`enter()` observes the new
    /// registry. The old registry's resources are released once its last
    /// reader drops its `Arc`.
    pub fn swap(&self, new_registry: Arc<Registry>) {
        let mut guard = self.inner.write().expect("registry lock poisoned");
        *guard = new_registry;
    }
}

impl Default for EnrichmentRegistry {
    fn default() -> Self {
        Self::new(Registry::empty())
    }
}
