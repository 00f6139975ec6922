//! Message routing from the coredump topic tree into the session store

use crate::error::ProtocolError;
use crate::services::dispatch_queue::DispatchQueue;
use crate::services::payload::PayloadNormalizer;
use crate::services::session_store::{AddPartOutcome, SessionStore, StartOutcome};
use crate::services::topic::{parse_metadata, parse_topic, TopicKind};
use std::sync::Arc;
use tracing::{debug, warn};

/// What a single message did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    SessionStarted,
    SessionAlreadyActive,
    FragmentStored,
    /// No session, duplicate, out of range or after completion
    FragmentIgnored,
    /// Fragment completed its session; the artifact is queued for dispatch
    Completed,
}

pub struct CoredumpReceiver {
    base_topic: String,
    sessions: Arc<SessionStore>,
    normalizer: PayloadNormalizer,
    queue: DispatchQueue,
}

impl CoredumpReceiver {
    pub fn new(
        base_topic: impl Into<String>,
        sessions: Arc<SessionStore>,
        normalizer: PayloadNormalizer,
        queue: DispatchQueue,
    ) -> Self {
        Self {
            base_topic: base_topic.into(),
            sessions,
            normalizer,
            queue,
        }
    }

    pub fn base_topic(&self) -> &str {
        &self.base_topic
    }

    /// Route one message; protocol errors are logged and returned
    ///
    /// Never blocks: session transitions are short critical sections and a
    /// completed artifact is only enqueued here.
    pub fn handle_message(&self, topic: &str, payload: Vec<u8>) -> Result<Handled, ProtocolError> {
        let result = self.route(topic, payload);
        if let Err(e) = &result {
            warn!(topic = %topic, error = %e, "Dropped message");
        }
        result
    }

    fn route(&self, topic: &str, payload: Vec<u8>) -> Result<Handled, ProtocolError> {
        match parse_topic(&self.base_topic, topic)? {
            TopicKind::Metadata { device_id } => {
                let parts = parse_metadata(&payload)?;
                Ok(match self.sessions.start_session(device_id, parts) {
                    StartOutcome::Started { .. } => Handled::SessionStarted,
                    StartOutcome::AlreadyActive { .. } => Handled::SessionAlreadyActive,
                })
            }
            TopicKind::Fragment { device_id, index } => {
                let normalized = self.normalizer.normalize(payload);
                if normalized.decoded {
                    debug!(device_id = %device_id, index, "Fragment payload was base64, decoded");
                }

                Ok(match self.sessions.add_part(device_id, index, normalized.data) {
                    AddPartOutcome::Stored { .. } => Handled::FragmentStored,
                    AddPartOutcome::Completed(artifact) => {
                        self.queue.enqueue(artifact);
                        Handled::Completed
                    }
                    AddPartOutcome::NoSession
                    | AddPartOutcome::AlreadyCompleted
                    | AddPartOutcome::OutOfRange { .. }
                    | AddPartOutcome::Duplicate => Handled::FragmentIgnored,
                })
            }
        }
    }
}
