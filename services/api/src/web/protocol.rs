//! services/api/src/web/protocol.rs
//!
//! Defines the JSON wire protocol for the signaling WebSocket. Client and
//! server envelopes are tagged by a `type` field whose values are the
//! event names the frontend listens on (`call:offer`, `user:online`, ...).
//!
//! The payloads are opaque to the server except for the lightweight
//! validation in `SessionDescription`: signaling relays WebRTC material
//! between peers, it does not interpret it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

//=========================================================================================
// Shared Payload Types
//=========================================================================================

/// An SDP blob attached to an offer or answer. The server checks only that
/// the shape is plausible before relaying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// "offer" or "answer".
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

impl SessionDescription {
    /// Validates the description against the envelope it arrived in.
    pub fn validate(&self, expected_kind: &str) -> Result<(), String> {
        if self.kind != expected_kind {
            return Err(format!(
                "session description type must be '{}', got '{}'",
                expected_kind, self.kind
            ));
        }
        if self.sdp.trim().is_empty() {
            return Err("session description has an empty sdp".to_string());
        }
        Ok(())
    }
}

//=========================================================================================
// Client -> Server Messages
//=========================================================================================

/// Messages a connected client may send over the signaling socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Relay an SDP offer to the peer identified by `to`.
    #[serde(rename = "call:offer")]
    Offer {
        call_id: Uuid,
        to: Uuid,
        offer: SessionDescription,
    },

    /// Relay an SDP answer back to the offering peer.
    #[serde(rename = "call:answer")]
    Answer {
        call_id: Uuid,
        to: Uuid,
        answer: SessionDescription,
    },

    /// Relay one ICE candidate. The candidate body is opaque JSON.
    #[serde(rename = "call:ice-candidate")]
    IceCandidate {
        call_id: Uuid,
        to: Uuid,
        candidate: Value,
    },

    /// The recipient declined the call.
    #[serde(rename = "call:reject")]
    Reject {
        call_id: Uuid,
        to: Uuid,
        #[serde(default)]
        reason: Option<String>,
    },

    /// The sender hung up; tells the peer to tear down its session.
    #[serde(rename = "call:end")]
    End { call_id: Uuid, to: Uuid },
}

//=========================================================================================
// Server -> Client Messages
//=========================================================================================

/// Messages the server pushes to connected clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "call:offer")]
    Offer {
        call_id: Uuid,
        from: Uuid,
        offer: SessionDescription,
    },

    #[serde(rename = "call:answer")]
    Answer {
        call_id: Uuid,
        from: Uuid,
        answer: SessionDescription,
    },

    #[serde(rename = "call:ice-candidate")]
    IceCandidate {
        call_id: Uuid,
        from: Uuid,
        candidate: Value,
    },

    #[serde(rename = "call:reject")]
    Reject {
        call_id: Uuid,
        from: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "call:end")]
    End { call_id: Uuid, from: Uuid },

    /// Broadcast when a user's first/replacement connection registers.
    #[serde(rename = "user:online")]
    UserOnline { user_id: Uuid },

    /// Broadcast when a user's connection is fully gone.
    #[serde(rename = "user:offline")]
    UserOffline { user_id: Uuid },

    /// Sent back to the sender when an offer/answer could not be delivered
    /// because the recipient has no live connection.
    #[serde(rename = "call:offline")]
    RecipientOffline { call_id: Uuid, to: Uuid },

    /// Sent back to the sender when their message was malformed or failed
    /// validation. The connection stays open.
    #[serde(rename = "call:error")]
    Error { message: String },
}
