//! Mailbox data types for relayed negotiation payloads.
//!
//! A `SignalingMessage` only lives in the mailbox between publish and
//! consume. The payload itself is opaque to this crate: it is whatever the
//! negotiation object emits (SDP offer/answer, ICE candidate) and is stored
//! as a JSON string.

use std::time::{SystemTime, UNIX_EPOCH};

use meshvoice_common::{ParticipantId, SignalingError};
use serde::{Deserialize, Serialize};

/// Mailbox-assigned identifier of a stored entry.
pub type EntryId = String;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Opaque negotiation payload produced or consumed by a negotiation object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalPayload(serde_json::Value);

impl SignalPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    /// Serialize to the string form stored in the mailbox.
    pub fn encode(&self) -> String {
        self.0.to_string()
    }

    pub fn decode(raw: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(raw)
            .map(Self)
            .map_err(|e| SignalingError::InvalidPayload(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Mailbox records
// ---------------------------------------------------------------------------

/// A payload addressed from one participant to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    pub from: ParticipantId,
    pub to: ParticipantId,
    /// The encoded `SignalPayload`.
    pub signal: String,
    /// Creation time in epoch milliseconds.
    pub created_at: u64,
}

impl SignalingMessage {
    pub fn new(from: ParticipantId, to: ParticipantId, payload: &SignalPayload) -> Self {
        Self {
            from,
            to,
            signal: payload.encode(),
            created_at: now_millis(),
        }
    }

    pub fn payload(&self) -> Result<SignalPayload, SignalingError> {
        SignalPayload::decode(&self.signal)
    }

    pub fn involves(&self, participant: &str) -> bool {
        self.from.as_str() == participant || self.to.as_str() == participant
    }
}

/// A stored message together with its mailbox id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxEntry {
    pub id: EntryId,
    pub message: SignalingMessage,
}

/// Field a mailbox query or live watch filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailboxField {
    From,
    To,
}

impl MailboxField {
    pub fn matches(self, message: &SignalingMessage, value: &str) -> bool {
        match self {
            Self::From => message.from.as_str() == value,
            Self::To => message.to.as_str() == value,
        }
    }
}

/// Kind of change reported by a live watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One item of a live watch stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxChange {
    pub kind: ChangeKind,
    pub entry: MailboxEntry,
}

/// Current time in epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
