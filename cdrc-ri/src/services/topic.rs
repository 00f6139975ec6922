//! Topic routing for the coredump topic tree
//!
//! `<base>/<device>` carries `{"parts": N}` and opens a session.
//! `<base>/<device>/<index>` carries one fragment.

use crate::error::ProtocolError;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind<'a> {
    Metadata { device_id: &'a str },
    Fragment { device_id: &'a str, index: u32 },
}

/// Classify `topic` relative to `base`
pub fn parse_topic<'a>(base: &str, topic: &'a str) -> Result<TopicKind<'a>, ProtocolError> {
    let rest = topic
        .strip_prefix(base)
        .and_then(|r| r.strip_prefix('/'))
        .ok_or_else(|| ProtocolError::ForeignTopic(topic.to_string()))?;

    let segments: Vec<&str> = rest.split('/').collect();
    match segments.as_slice() {
        [device_id] if !device_id.is_empty() => Ok(TopicKind::Metadata { device_id }),
        [device_id, index] if !device_id.is_empty() => {
            let index = index
                .trim()
                .parse::<u32>()
                .map_err(|_| ProtocolError::InvalidIndex(index.to_string()))?;
            Ok(TopicKind::Fragment { device_id, index })
        }
        _ => Err(ProtocolError::UnexpectedTopic(topic.to_string())),
    }
}

/// Part count announced by a metadata message
pub fn parse_metadata(payload: &[u8]) -> Result<u32, ProtocolError> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| ProtocolError::MalformedMetadata(e.to_string()))?;

    let parts = value
        .as_object()
        .ok_or_else(|| ProtocolError::MalformedMetadata("expected a JSON object".to_string()))?
        .get("parts")
        .ok_or_else(|| ProtocolError::MalformedMetadata("missing 'parts'".to_string()))?;

    match parts.as_u64() {
        Some(n) if n > 0 => {
            u32::try_from(n).map_err(|_| ProtocolError::InvalidPartCount(n.to_string()))
        }
        _ => Err(ProtocolError::InvalidPartCount(parts.to_string())),
    }
}
