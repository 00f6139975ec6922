//! Fragment reassembly session
//!
//! A session collects the fragments of one coredump announced by a metadata
//! message. Devices number fragments either from 0 (`0..N-1`) or from 1
//! (`1..N`); both are accepted, but a session mixing the two never completes.
//!
//! Once a session completes it is frozen: further fragments (late duplicates,
//! redeliveries) are refused so the artifact is dispatched exactly once.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Numbering convention detected on a complete session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBase {
    Zero,
    One,
}

/// Result of offering one fragment to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartOutcome {
    /// Stored, session still waiting for more
    Stored { received: usize, expected: u32 },
    /// Index already present; first write wins
    Duplicate,
    /// Index outside `[0, expected]`
    OutOfRange,
    /// Session already completed; fragment dropped
    AlreadyCompleted,
    /// This fragment completed the session
    Completed,
}

/// Per-device reassembly state
#[derive(Debug)]
pub struct Session {
    session_id: u64,
    device_id: String,
    expected_parts: u32,
    parts: BTreeMap<u32, Vec<u8>>,
    started_at: Instant,
    completed: bool,
}

impl Session {
    pub fn new(session_id: u64, device_id: impl Into<String>, expected_parts: u32) -> Self {
        Self::started_at(session_id, device_id, expected_parts, Instant::now())
    }

    pub fn started_at(
        session_id: u64,
        device_id: impl Into<String>,
        expected_parts: u32,
        started_at: Instant,
    ) -> Self {
        Self {
            session_id,
            device_id: device_id.into(),
            expected_parts,
            parts: BTreeMap::new(),
            started_at,
            completed: false,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn expected_parts(&self) -> u32 {
        self.expected_parts
    }

    pub fn received_parts(&self) -> usize {
        self.parts.len()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Incomplete and older than `timeout` as of `now`
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        !self.completed && now.saturating_duration_since(self.started_at) > timeout
    }

    /// Offer a fragment
    ///
    /// Marks the session completed before returning [`PartOutcome::Completed`],
    /// so any later fragment sees [`PartOutcome::AlreadyCompleted`].
    pub fn add_part(&mut self, index: u32, data: Vec<u8>) -> PartOutcome {
        if self.completed {
            return PartOutcome::AlreadyCompleted;
        }
        if index > self.expected_parts {
            return PartOutcome::OutOfRange;
        }
        if self.parts.contains_key(&index) {
            return PartOutcome::Duplicate;
        }

        self.parts.insert(index, data);

        if self.index_base().is_some() {
            self.completed = true;
            PartOutcome::Completed
        } else {
            PartOutcome::Stored {
                received: self.parts.len(),
                expected: self.expected_parts,
            }
        }
    }

    /// Convention of a complete index set, `None` while incomplete
    ///
    /// Complete means exactly `expected_parts` distinct indices forming a
    /// contiguous run starting at 0 or at 1.
    pub fn index_base(&self) -> Option<IndexBase> {
        let n = self.expected_parts;
        if n == 0 || self.parts.len() != n as usize {
            return None;
        }

        // BTreeMap keys are sorted and distinct: contiguity reduces to the endpoints
        let first = *self.parts.keys().next()?;
        let last = *self.parts.keys().next_back()?;
        match (first, last) {
            (0, l) if l == n - 1 => Some(IndexBase::Zero),
            (1, l) if l == n => Some(IndexBase::One),
            _ => None,
        }
    }

    /// Concatenate the parts of a complete session in index order
    ///
    /// Drains the stored fragments; the session keeps its completed marker.
    pub fn take_artifact(&mut self) -> Option<AssembledArtifact> {
        let base = self.index_base()?;
        let parts = std::mem::take(&mut self.parts);

        // Keys are sorted and already verified contiguous from the base
        let total: usize = parts.values().map(Vec::len).sum();
        let mut data = Vec::with_capacity(total);
        for part in parts.into_values() {
            data.extend_from_slice(&part);
        }

        Some(AssembledArtifact {
            session_id: self.session_id,
            device_id: self.device_id.clone(),
            parts: self.expected_parts,
            base,
            data,
            completed_at: Utc::now(),
        })
    }
}

/// Reassembled coredump ready for dispatch
#[derive(Debug, Clone)]
pub struct AssembledArtifact {
    pub session_id: u64,
    pub device_id: String,
    pub parts: u32,
    pub base: IndexBase,
    pub data: Vec<u8>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(session: &mut Session, order: &[u32]) -> PartOutcome {
        let mut last = PartOutcome::Duplicate;
        for &i in order {
            last = session.add_part(i, format!("<{}>", i).into_bytes());
        }
        last
    }

    #[test]
    fn test_zero_based_completion() {
        let mut session = Session::new(1, "dev", 3);
        assert_eq!(
            session.add_part(0, b"a".to_vec()),
            PartOutcome::Stored { received: 1, expected: 3 }
        );
        assert_eq!(fill(&mut session, &[1, 2]), PartOutcome::Completed);
        assert_eq!(session.index_base(), Some(IndexBase::Zero));

        let artifact = session.take_artifact().unwrap();
        assert_eq!(artifact.data, b"a<1><2>".to_vec());
        assert!(session.is_completed());
    }

    #[test]
    fn test_one_based_completion() {
        let mut session = Session::new(1, "dev", 3);
        assert_eq!(fill(&mut session, &[3, 1, 2]), PartOutcome::Completed);
        assert_eq!(session.index_base(), Some(IndexBase::One));
        assert_eq!(session.take_artifact().unwrap().data, b"<1><2><3>".to_vec());
    }

    #[test]
    fn test_mixed_conventions_never_complete() {
        let mut session = Session::new(1, "dev", 3);
        // 0, 1, 3: three distinct in-range indices, but neither 0..2 nor 1..3
        assert!(matches!(fill(&mut session, &[0, 1, 3]), PartOutcome::Stored { .. }));
        assert_eq!(session.index_base(), None);
        assert!(!session.is_completed());
        // The only slot left that would fix it is taken by the wrong convention
        assert_eq!(session.add_part(3, b"x".to_vec()), PartOutcome::Duplicate);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut session = Session::new(1, "dev", 2);
        assert_eq!(session.add_part(3, b"x".to_vec()), PartOutcome::OutOfRange);
        // expected_parts itself is in range (one-based last index)
        assert!(matches!(session.add_part(2, b"x".to_vec()), PartOutcome::Stored { .. }));
    }

    #[test]
    fn test_duplicate_first_write_wins() {
        let mut session = Session::new(1, "dev", 2);
        session.add_part(0, b"first".to_vec());
        assert_eq!(session.add_part(0, b"second".to_vec()), PartOutcome::Duplicate);
        session.add_part(1, b"!".to_vec());

        assert_eq!(session.take_artifact().unwrap().data, b"first!".to_vec());
    }

    #[test]
    fn test_completed_session_refuses_parts() {
        let mut session = Session::new(1, "dev", 1);
        assert_eq!(session.add_part(0, b"x".to_vec()), PartOutcome::Completed);
        assert_eq!(session.add_part(1, b"y".to_vec()), PartOutcome::AlreadyCompleted);
        assert_eq!(session.add_part(0, b"x".to_vec()), PartOutcome::AlreadyCompleted);
    }

    #[test]
    fn test_staleness_ignores_completed() {
        let start = Instant::now();
        let timeout = Duration::from_secs(600);
        let later = start + Duration::from_secs(601);

        let mut open = Session::started_at(1, "a", 2, start);
        open.add_part(0, b"x".to_vec());
        assert!(!open.is_stale(start + Duration::from_secs(600), timeout));
        assert!(open.is_stale(later, timeout));

        let mut done = Session::started_at(2, "b", 1, start);
        done.add_part(0, b"x".to_vec());
        assert!(!done.is_stale(later, timeout));
    }

    #[test]
    fn test_incomplete_session_has_no_artifact() {
        let mut session = Session::new(1, "dev", 2);
        session.add_part(0, b"x".to_vec());
        assert!(session.take_artifact().is_none());
        assert_eq!(session.received_parts(), 1);
    }
}
