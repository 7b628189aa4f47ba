//! Framework state that would otherwise live in process-wide globals.
//!
//! A [`Session`] owns the unique layer-name counters, the seed stream used by weight
//! initialisers, the cache of compiled training steps, and the traceback-filtering flag.
//! Test cases own one session each and reset it during set-up, so independent tests can run
//! in parallel without observing each other's state.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

struct SessionState {
    name_counters: HashMap<String, usize>,
    compiled_steps: HashSet<String>,
    seed_stream: StdRng,
}

impl SessionState {
    fn new(seed: u64) -> Self {
        Self {
            name_counters: HashMap::new(),
            compiled_steps: HashSet::new(),
            seed_stream: StdRng::seed_from_u64(seed),
        }
    }
}

pub struct Session {
    base_seed: u64,
    state: Mutex<SessionState>,
    traceback_filtering: AtomicBool,
}

impl Session {
    /// Creates a session seeded from `LAYERKIT_SEED`.
    pub fn new() -> Self {
        Self::with_seed(crate::env::base_seed())
    }

    pub fn with_seed(base_seed: u64) -> Self {
        Self {
            base_seed,
            state: Mutex::new(SessionState::new(base_seed)),
            traceback_filtering: AtomicBool::new(crate::env::traceback_filtering_enabled()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Clears name counters and compiled steps, and rewinds the seed stream.
    pub fn reset(&self) {
        *self.lock() = SessionState::new(self.base_seed);
        tracing::trace!(seed = self.base_seed, "session reset");
    }

    /// Returns `prefix` the first time, then `prefix_1`, `prefix_2`, ...
    pub fn unique_name(&self, prefix: &str) -> String {
        let mut state = self.lock();
        let counter = state.name_counters.entry(prefix.to_string()).or_insert(0);
        let name = if *counter == 0 {
            prefix.to_string()
        } else {
            format!("{prefix}_{counter}")
        };
        *counter += 1;
        name
    }

    /// Draws the next seed for a weight initialiser.
    pub fn next_seed(&self) -> u64 {
        self.lock().seed_stream.gen()
    }

    /// Records a traced step signature; returns `true` when it was not cached yet.
    pub fn register_compiled_step(&self, signature: &str) -> bool {
        self.lock().compiled_steps.insert(signature.to_string())
    }

    pub fn compiled_step_count(&self) -> usize {
        self.lock().compiled_steps.len()
    }

    pub fn traceback_filtering_enabled(&self) -> bool {
        self.traceback_filtering.load(Ordering::Relaxed)
    }

    pub fn set_traceback_filtering(&self, enabled: bool) {
        self.traceback_filtering.store(enabled, Ordering::Relaxed);
    }

    /// Renders an error for reports: only the outermost message while filtering is on,
    /// the whole cause chain otherwise.
    pub fn format_error(&self, err: &anyhow::Error) -> String {
        if self.traceback_filtering_enabled() {
            err.to_string()
        } else {
            format!("{err:#}")
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Session;
    use anyhow::anyhow;

    #[test]
    fn unique_names_count_per_prefix() {
        let session = Session::with_seed(0);
        assert_eq!(session.unique_name("dense"), "dense");
        assert_eq!(session.unique_name("dense"), "dense_1");
        assert_eq!(session.unique_name("dropout"), "dropout");
        session.reset();
        assert_eq!(session.unique_name("dense"), "dense");
    }

    #[test]
    fn reset_rewinds_seed_stream_and_cache() {
        let session = Session::with_seed(5);
        let first = session.next_seed();
        assert!(session.register_compiled_step("step"));
        assert!(!session.register_compiled_step("step"));
        session.reset();
        assert_eq!(session.next_seed(), first);
        assert_eq!(session.compiled_step_count(), 0);
    }

    #[test]
    fn format_error_respects_filtering() {
        let session = Session::with_seed(0);
        let err = anyhow!("root cause").context("outer");
        session.set_traceback_filtering(true);
        assert_eq!(session.format_error(&err), "outer");
        session.set_traceback_filtering(false);
        assert_eq!(session.format_error(&err), "outer: root cause");
    }
}
