//! Session store
//!
//! Owns every in-flight reassembly session behind a single mutex. The lock is
//! held only for the state transition itself; dispatch of a completed artifact
//! happens elsewhere, after the lock is released. The periodic sweep task is
//! the only other contender for the lock.

use crate::models::{AssembledArtifact, PartOutcome, Session};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of a metadata message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { session_id: u64 },
    /// An incomplete session is already collecting fragments for this device
    AlreadyActive { received: usize, expected: u32 },
}

/// Result of a fragment message
#[derive(Debug)]
pub enum AddPartOutcome {
    NoSession,
    AlreadyCompleted,
    OutOfRange { expected: u32 },
    Duplicate,
    Stored { received: usize, expected: u32 },
    Completed(AssembledArtifact),
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    next_session_id: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        // The map stays consistent even if a holder panicked mid-way:
        // every transition is a single insert/remove/field update
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a session for `device_id`
    ///
    /// Refuses to replace an incomplete session, so a duplicated metadata
    /// message cannot restart a reconstruction in progress. A completed
    /// session (still awaiting removal after dispatch) is replaced.
    pub fn start_session(&self, device_id: &str, expected_parts: u32) -> StartOutcome {
        let mut sessions = self.lock();

        if let Some(existing) = sessions.get(device_id) {
            if !existing.is_completed() {
                warn!(
                    device_id = %device_id,
                    received = existing.received_parts(),
                    expected = existing.expected_parts(),
                    "Session already active, ignoring metadata"
                );
                return StartOutcome::AlreadyActive {
                    received: existing.received_parts(),
                    expected: existing.expected_parts(),
                };
            }
        }

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed) + 1;
        sessions.insert(
            device_id.to_string(),
            Session::new(session_id, device_id, expected_parts),
        );
        info!(device_id = %device_id, expected_parts, session_id, "Session started");

        StartOutcome::Started { session_id }
    }

    /// Store one fragment; on completion the assembled artifact is returned
    pub fn add_part(&self, device_id: &str, index: u32, data: Vec<u8>) -> AddPartOutcome {
        let mut sessions = self.lock();

        let Some(session) = sessions.get_mut(device_id) else {
            debug!(device_id = %device_id, index, "Fragment without session, dropped");
            return AddPartOutcome::NoSession;
        };

        match session.add_part(index, data) {
            PartOutcome::AlreadyCompleted => {
                debug!(device_id = %device_id, index, "Fragment after completion, dropped");
                AddPartOutcome::AlreadyCompleted
            }
            PartOutcome::OutOfRange => {
                warn!(
                    device_id = %device_id,
                    index,
                    expected = session.expected_parts(),
                    "Fragment index out of range, dropped"
                );
                AddPartOutcome::OutOfRange {
                    expected: session.expected_parts(),
                }
            }
            PartOutcome::Duplicate => {
                debug!(device_id = %device_id, index, "Duplicate fragment ignored");
                AddPartOutcome::Duplicate
            }
            PartOutcome::Stored { received, expected } => {
                debug!(device_id = %device_id, index, received, expected, "Fragment stored");
                AddPartOutcome::Stored { received, expected }
            }
            PartOutcome::Completed => match session.take_artifact() {
                Some(artifact) => {
                    info!(
                        device_id = %device_id,
                        parts = artifact.parts,
                        bytes = artifact.data.len(),
                        "Coredump reassembled"
                    );
                    AddPartOutcome::Completed(artifact)
                }
                // Completed implies a complete index set
                None => AddPartOutcome::AlreadyCompleted,
            },
        }
    }

    /// Remove a completed session once its dispatch is done
    ///
    /// Only the session that produced the artifact is removed; a newer session
    /// for the same device is left alone.
    pub fn finish(&self, device_id: &str, session_id: u64) -> bool {
        let mut sessions = self.lock();
        match sessions.get(device_id) {
            Some(session) if session.session_id() == session_id && session.is_completed() => {
                sessions.remove(device_id);
                true
            }
            _ => false,
        }
    }

    /// Evict incomplete sessions older than `timeout`; returns evicted device ids
    pub fn cleanup(&self, timeout: Duration) -> Vec<String> {
        self.cleanup_at(Instant::now(), timeout)
    }

    pub fn cleanup_at(&self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut sessions = self.lock();
        let mut evicted = Vec::new();

        sessions.retain(|device_id, session| {
            if session.is_stale(now, timeout) {
                warn!(
                    device_id = %device_id,
                    received = session.received_parts(),
                    expected = session.expected_parts(),
                    "Evicting incomplete session after timeout"
                );
                evicted.push(device_id.clone());
                false
            } else {
                true
            }
        });

        evicted
    }

    /// Sessions still collecting fragments
    pub fn active_sessions(&self) -> usize {
        self.lock().values().filter(|s| !s.is_completed()).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Run `cleanup` every `interval` until cancelled
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Session sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = store.cleanup(timeout);
                        if !evicted.is_empty() {
                            info!(count = evicted.len(), "Stale sessions evicted");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(outcome: AddPartOutcome) -> AssembledArtifact {
        match outcome {
            AddPartOutcome::Completed(artifact) => artifact,
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_metadata_does_not_restart() {
        let store = SessionStore::new();
        assert!(matches!(store.start_session("dev", 3), StartOutcome::Started { .. }));
        store.add_part("dev", 0, b"a".to_vec());

        assert_eq!(
            store.start_session("dev", 5),
            StartOutcome::AlreadyActive { received: 1, expected: 3 }
        );

        store.add_part("dev", 1, b"b".to_vec());
        let artifact = completed(store.add_part("dev", 2, b"c".to_vec()));
        assert_eq!(artifact.data, b"abc".to_vec());
    }

    #[test]
    fn test_fragment_without_session_is_noop() {
        let store = SessionStore::new();
        assert!(matches!(store.add_part("ghost", 0, b"x".to_vec()), AddPartOutcome::NoSession));
        assert!(store.is_empty());
    }

    #[test]
    fn test_duplicate_fragments_are_idempotent() {
        let once = SessionStore::new();
        once.start_session("dev", 3);
        once.add_part("dev", 0, b"aa".to_vec());
        once.add_part("dev", 1, b"bb".to_vec());
        let single = completed(once.add_part("dev", 2, b"cc".to_vec()));

        let twice = SessionStore::new();
        twice.start_session("dev", 3);
        twice.add_part("dev", 0, b"aa".to_vec());
        assert!(matches!(twice.add_part("dev", 0, b"aa".to_vec()), AddPartOutcome::Duplicate));
        twice.add_part("dev", 1, b"bb".to_vec());
        assert!(matches!(twice.add_part("dev", 1, b"bb".to_vec()), AddPartOutcome::Duplicate));
        let doubled = completed(twice.add_part("dev", 2, b"cc".to_vec()));

        assert_eq!(single.data, doubled.data);
        // A redelivery after completion never produces a second artifact
        assert!(matches!(
            twice.add_part("dev", 2, b"cc".to_vec()),
            AddPartOutcome::AlreadyCompleted
        ));
    }

    #[test]
    fn test_order_invariance_both_conventions() {
        let chunks: Vec<Vec<u8>> = (0..5u8).map(|i| vec![i; (i as usize) + 1]).collect();
        let expected: Vec<u8> = chunks.concat();
        let orders: [[usize; 5]; 4] = [
            [0, 1, 2, 3, 4],
            [4, 3, 2, 1, 0],
            [2, 0, 4, 1, 3],
            [3, 4, 0, 2, 1],
        ];

        for base in [0u32, 1u32] {
            for order in &orders {
                let store = SessionStore::new();
                store.start_session("dev", 5);

                let mut artifact = None;
                for &pos in order {
                    let index = pos as u32 + base;
                    if let AddPartOutcome::Completed(a) =
                        store.add_part("dev", index, chunks[pos].clone())
                    {
                        artifact = Some(a);
                    }
                }

                let artifact = artifact.expect("session should complete");
                assert_eq!(artifact.data, expected, "base {} order {:?}", base, order);
            }
        }
    }

    #[test]
    fn test_cleanup_evicts_only_stale_incomplete() {
        let store = SessionStore::new();
        store.start_session("open", 2);
        store.add_part("open", 0, b"x".to_vec());
        store.start_session("done", 1);
        completed(store.add_part("done", 0, b"x".to_vec()));

        let timeout = Duration::from_secs(600);
        assert!(store.cleanup_at(Instant::now(), timeout).is_empty());

        let evicted = store.cleanup_at(Instant::now() + Duration::from_secs(601), timeout);
        assert_eq!(evicted, vec!["open".to_string()]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.active_sessions(), 0);
    }

    #[test]
    fn test_finish_removes_only_matching_session() {
        let store = SessionStore::new();
        store.start_session("dev", 1);
        let first = completed(store.add_part("dev", 0, b"x".to_vec()));

        // A new crash announced before the first dispatch finished
        let StartOutcome::Started { session_id: second } = store.start_session("dev", 2) else {
            panic!("completed session should be replaceable");
        };
        assert_ne!(first.session_id, second);

        assert!(!store.finish("dev", first.session_id));
        assert_eq!(store.active_sessions(), 1);

        store.add_part("dev", 0, b"a".to_vec());
        let artifact = completed(store.add_part("dev", 1, b"b".to_vec()));
        assert!(store.finish("dev", artifact.session_id));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let store = Arc::new(SessionStore::new());
        let cancel = CancellationToken::new();
        let handle = store.spawn_sweeper(
            Duration::from_millis(10),
            Duration::from_secs(600),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
