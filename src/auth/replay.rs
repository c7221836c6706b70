//! Replay protection for signed reads.
//!
//! Every accepted signature is remembered until its request timestamp falls
//! out of the freshness window. After that the timestamp check alone rejects
//! it, so the entry can be dropped.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use super::AuthError;
use crate::domain::Signature64;

struct ReplayState {
    /// signature -> expiry
    seen: HashMap<Signature64, DateTime<Utc>>,
    /// (expiry, signature), ordered for eviction
    by_expiry: BTreeSet<(DateTime<Utc>, Signature64)>,
}

impl ReplayState {
    fn evict_expired(&mut self, now: DateTime<Utc>) {
        while let Some(&(expiry, sig)) = self.by_expiry.first() {
            if expiry >= now {
                break;
            }
            self.by_expiry.pop_first();
            self.seen.remove(&sig);
        }
    }
}

/// Bounded, time-evicting record of seen signatures.
///
/// When full of live entries it refuses new ones with
/// [`AuthError::RateLimited`] rather than forgetting a live signature.
pub struct ReplayGuard {
    window: Duration,
    capacity: usize,
    state: Mutex<ReplayState>,
}

impl ReplayGuard {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity,
            state: Mutex::new(ReplayState {
                seen: HashMap::new(),
                by_expiry: BTreeSet::new(),
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Atomically check that `signature` is unseen and record it.
    ///
    /// The entry lives until `request_time + window`, plus one second because
    /// request timestamps are whole seconds.
    pub fn check_and_record(
        &self,
        signature: &Signature64,
        request_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.evict_expired(now);

        if let Some(expiry) = state.seen.get(signature) {
            if *expiry >= now {
                return Err(AuthError::Replay);
            }
        }

        if state.seen.len() >= self.capacity {
            return Err(AuthError::RateLimited);
        }

        let expiry = request_time + self.window + Duration::seconds(1);
        state.seen.insert(*signature, expiry);
        state.by_expiry.insert((expiry, *signature));
        Ok(())
    }

    /// Whether `signature` is remembered and still live at `now`.
    pub fn contains(&self, signature: &Signature64, now: DateTime<Utc>) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.seen.get(signature).is_some_and(|expiry| *expiry >= now)
    }

    /// Number of remembered signatures.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries that expired before `now`.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let before = state.seen.len();
        state.evict_expired(now);
        before - state.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sig(n: u8) -> Signature64 {
        [n; 64]
    }

    #[test]
    fn test_second_use_is_replay() {
        let guard = ReplayGuard::new(Duration::seconds(300), 100);
        let now = Utc::now();

        assert!(guard.check_and_record(&sig(1), now, now).is_ok());
        assert_eq!(guard.check_and_record(&sig(1), now, now), Err(AuthError::Replay));
        assert!(guard.check_and_record(&sig(2), now, now).is_ok());
    }

    #[test]
    fn test_entries_expire_after_window() {
        let guard = ReplayGuard::new(Duration::seconds(10), 100);
        let t0 = Utc::now();

        guard.check_and_record(&sig(1), t0, t0).unwrap();
        assert_eq!(guard.purge_expired(t0 + Duration::seconds(11)), 0);
        assert_eq!(guard.purge_expired(t0 + Duration::seconds(12)), 1);
        assert!(guard.is_empty());
    }

    #[test]
    fn test_full_guard_fails_closed() {
        let guard = ReplayGuard::new(Duration::seconds(300), 2);
        let now = Utc::now();

        guard.check_and_record(&sig(1), now, now).unwrap();
        guard.check_and_record(&sig(2), now, now).unwrap();
        assert_eq!(
            guard.check_and_record(&sig(3), now, now),
            Err(AuthError::RateLimited)
        );
        // A live duplicate is still reported as a replay
        assert_eq!(guard.check_and_record(&sig(1), now, now), Err(AuthError::Replay));
    }

    #[test]
    fn test_full_guard_recovers_after_eviction() {
        let guard = ReplayGuard::new(Duration::seconds(5), 1);
        let t0 = Utc::now();

        guard.check_and_record(&sig(1), t0, t0).unwrap();
        let later = t0 + Duration::seconds(7);
        assert!(guard.check_and_record(&sig(2), later, later).is_ok());
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_concurrent_duplicates_admit_exactly_one() {
        let guard = Arc::new(ReplayGuard::new(Duration::seconds(300), 1000));
        let now = Utc::now();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = Arc::clone(&guard);
                std::thread::spawn(move || guard.check_and_record(&sig(7), now, now).is_ok())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }
}
