//! Request registry - which in-flight requests each endpoint still owns
//!
//! Aborting a request task is best-effort: the task may already be past its
//! last await point. Response handlers therefore check `is_registered` before
//! touching any run state, and cancellation removes bookkeeping before it
//! aborts anything.

use shareget_types::Endpoint;
use std::collections::HashMap;
use tokio::task::AbortHandle;
use tracing::debug;

/// Identifier of a registered request, unique for the controller's lifetime
pub type RequestId = u64;

/// Which endpoints a cancellation targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    All,
    Endpoint(Endpoint),
}

impl Selector {
    fn matches(&self, endpoint: &Endpoint) -> bool {
        match self {
            Selector::All => true,
            Selector::Endpoint(e) => e == endpoint,
        }
    }
}

#[derive(Debug)]
struct Registered {
    id: RequestId,
    abort: AbortHandle,
}

/// In-flight requests grouped by owning endpoint
#[derive(Debug, Default)]
pub struct RequestRegistry {
    buckets: HashMap<Endpoint, Vec<Registered>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, endpoint: &Endpoint, id: RequestId, abort: AbortHandle) {
        self.buckets
            .entry(endpoint.clone())
            .or_default()
            .push(Registered { id, abort });
    }

    pub fn is_registered(&self, endpoint: &Endpoint, id: RequestId) -> bool {
        self.buckets
            .get(endpoint)
            .is_some_and(|bucket| bucket.iter().any(|r| r.id == id))
    }

    /// Drop a finished request without aborting it.
    /// Returns `false` if it was no longer registered.
    pub fn release(&mut self, endpoint: &Endpoint, id: RequestId) -> bool {
        let Some(bucket) = self.buckets.get_mut(endpoint) else {
            return false;
        };
        let Some(pos) = bucket.iter().position(|r| r.id == id) else {
            return false;
        };
        bucket.swap_remove(pos);
        if bucket.is_empty() {
            self.buckets.remove(endpoint);
        }
        true
    }

    /// Cancel every request whose endpoint matches `selector`, or every
    /// request whose endpoint does not match it when `invert` is set.
    /// Returns how many requests were cancelled.
    pub fn cancel(&mut self, selector: &Selector, invert: bool) -> usize {
        let doomed_keys: Vec<Endpoint> = self
            .buckets
            .keys()
            .filter(|endpoint| selector.matches(endpoint) != invert)
            .cloned()
            .collect();

        // Deregister everything first so racing handlers see "not registered"
        let doomed: Vec<(Endpoint, Vec<Registered>)> = doomed_keys
            .into_iter()
            .filter_map(|key| self.buckets.remove_entry(&key))
            .collect();

        let mut cancelled = 0;
        for (endpoint, requests) in doomed {
            debug!("Cancelling {} request(s) for {}", requests.len(), endpoint);
            for request in requests {
                request.abort.abort();
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn in_flight(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn in_flight_for(&self, endpoint: &Endpoint) -> usize {
        self.buckets.get(endpoint).map_or(0, Vec::len)
    }
}
