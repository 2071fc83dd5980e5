//! Eviction victim selection (spec §4.1 `find_runner_to_unload`, §9 open
//! question on eviction fairness).
//!
//! The source sorts by `(session_duration, model_path)` ascending, which
//! can starve a large model behind a cluster of small, frequently-used
//! ones. Per DESIGN.md this is kept as the default (`LongestSession`,
//! matching spec §8's worked eviction scenario) with `LeastRecentlyUsed`
//! available as an explicit, documented alternative.

use std::time::Duration;

use crate::types::RunnerRef;

pub trait EvictionPolicy: Send + Sync {
    /// Choose a victim among `candidates`. Prefers an idle runner
    /// (`ref_count == 0`); if none are idle, still returns the
    /// highest-priority one so the caller can wait for its refcount to
    /// drain (spec §4.1).
    fn select<'a>(&self, candidates: &'a [RunnerRef], durations: &[Duration]) -> Option<&'a RunnerRef>;
}

/// Sort ascending by `(session_duration, model_path)`; the source's default.
pub struct LongestSession;

impl EvictionPolicy for LongestSession {
    fn select<'a>(&self, candidates: &'a [RunnerRef], durations: &[Duration]) -> Option<&'a RunnerRef> {
        if candidates.is_empty() {
            return None;
        }
        let mut indices: Vec<usize> = (0..candidates.len()).collect();
        indices.sort_by(|&a, &b| {
            durations[a]
                .cmp(&durations[b])
                .then_with(|| candidates[a].model_path().cmp(candidates[b].model_path()))
        });

        indices
            .iter()
            .find(|&&i| candidates[i].ref_count() == 0)
            .or(indices.first())
            .map(|&i| &candidates[i])
    }
}

/// Alternative policy: evict whichever runner has been idle the longest
/// (lowest `ref_count == 0` wall-clock age), falling back to the globally
/// oldest by `session_duration` if nothing is idle.
pub struct LeastRecentlyUsed;

impl EvictionPolicy for LeastRecentlyUsed {
    fn select<'a>(&self, candidates: &'a [RunnerRef], durations: &[Duration]) -> Option<&'a RunnerRef> {
        if candidates.is_empty() {
            return None;
        }
        let idle: Vec<usize> = (0..candidates.len())
            .filter(|&i| candidates[i].ref_count() == 0)
            .collect();

        let pool = if idle.is_empty() {
            (0..candidates.len()).collect::<Vec<_>>()
        } else {
            idle
        };

        pool.into_iter()
            .max_by_key(|&i| durations[i])
            .map(|i| &candidates[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_runner::{MockRunner, RunnerOptions};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn make_ref(path: &str, pid: u32) -> RunnerRef {
        let mock = Arc::new(MockRunner::new(pid, 1, 2, vec![]));
        RunnerRef::new(
            PathBuf::from(path),
            path.into(),
            RunnerOptions::default(),
            mock,
            pid,
            vec![],
            true,
            1,
            2,
            1,
        )
    }

    #[test]
    fn longest_session_prefers_idle_first() {
        let a = make_ref("/a", 1);
        let b = make_ref("/b", 2);
        a.increment_ref();
        let durations = vec![Duration::from_secs(100), Duration::from_secs(1)];
        let refs = [a.clone(), b.clone()];
        let victim = LongestSession.select(&refs, &durations).unwrap();
        assert_eq!(victim.model_path(), b.model_path());
    }

    #[test]
    fn longest_session_falls_back_to_non_idle_when_none_free() {
        let a = make_ref("/a", 1);
        let b = make_ref("/b", 2);
        a.increment_ref();
        b.increment_ref();
        let durations = vec![Duration::from_secs(5), Duration::from_secs(10)];
        let refs = [a.clone(), b.clone()];
        let victim = LongestSession.select(&refs, &durations).unwrap();
        assert_eq!(victim.model_path(), a.model_path());
    }

    #[test]
    fn longest_session_tie_breaks_by_model_path() {
        let a = make_ref("/b", 1);
        let b = make_ref("/a", 2);
        let durations = vec![Duration::from_secs(5), Duration::from_secs(5)];
        let refs = [a.clone(), b.clone()];
        let victim = LongestSession.select(&refs, &durations).unwrap();
        assert_eq!(victim.model_path(), b.model_path());
    }

    #[test]
    fn lru_prefers_longest_idle() {
        let a = make_ref("/a", 1);
        let b = make_ref("/b", 2);
        let durations = vec![Duration::from_secs(3), Duration::from_secs(9)];
        let refs = [a.clone(), b.clone()];
        let victim = LeastRecentlyUsed.select(&refs, &durations).unwrap();
        assert_eq!(victim.model_path(), b.model_path());
    }
}
