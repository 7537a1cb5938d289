/// Counters kept by a loader across every batch it executes.
///
/// Only compiled with the `stats` feature. A snapshot is available from
/// [`KeyedLoader::stats`](crate::KeyedLoader::stats) and [`Loader::stats`](crate::Loader::stats),
/// and the final counts are reported as a `debug` event when the loader is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderStats {
    /// Human readable name used to identify these stats when they are reported.
    pub tag: &'static str,
    /// Number of `load` calls received.
    pub requests: u64,
    /// Number of `load` calls that joined a slot already pending in the open batch.
    pub deduplicated: u64,
    /// Number of non-empty batches fetched.
    pub batches: u64,
    /// Total number of distinct keys handed to the fetch function.
    pub keys_fetched: u64,
    /// Number of keys the fetch function did not return a value for.
    pub missing_keys: u64,
    /// Number of batches whose fetch failed or was cancelled.
    pub failed_batches: u64,
    /// The most keys fetched in a single batch.
    pub max_batch_size: usize,
    /// The fewest keys fetched in a single batch, `usize::MAX` until a batch runs.
    pub min_batch_size: usize,
}

impl LoaderStats {
    pub(crate) fn new(tag: &'static str) -> Self {
        Self {
            tag,
            requests: 0,
            deduplicated: 0,
            batches: 0,
            keys_fetched: 0,
            missing_keys: 0,
            failed_batches: 0,
            max_batch_size: 0,
            min_batch_size: usize::MAX,
        }
    }

    pub(crate) fn record_request(&mut self, deduplicated: bool) {
        self.requests += 1;
        if deduplicated {
            self.deduplicated += 1;
        }
    }

    pub(crate) fn record_batch(&mut self, batch_size: usize) {
        self.batches += 1;
        self.keys_fetched += batch_size as u64;
        self.max_batch_size = self.max_batch_size.max(batch_size);
        self.min_batch_size = self.min_batch_size.min(batch_size);
    }

    pub(crate) fn record_missing(&mut self, missing: usize) {
        self.missing_keys += missing as u64;
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed_batches += 1;
    }
}
