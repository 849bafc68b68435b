//! services/api/src/web/signaling.rs
//!
//! Routes signaling events between connected peers. The router validates the
//! little it can (SDP envelope shape, no self-addressing) and otherwise
//! relays payloads verbatim, stamping each forwarded message with the
//! authenticated sender so a client can never spoof `from`.
//!
//! Delivery rules: an undeliverable offer or answer bounces back to the
//! sender as `call:offline`, because the caller needs to know the ring went
//! nowhere. Undeliverable ICE candidates, rejects, and ends are dropped
//! silently; they only matter to a peer that is still there.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::web::presence::PresenceRegistry;
use crate::web::protocol::{ClientMessage, ServerMessage};

pub struct SignalingRouter {
    presence: Arc<PresenceRegistry>,
}

impl SignalingRouter {
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self { presence }
    }

    /// Handles one parsed client message from `from`. Any reply owed to the
    /// sender (offline bounce, validation error) goes through their own
    /// presence channel.
    pub async fn route(&self, from: Uuid, message: ClientMessage) {
        match message {
            ClientMessage::Offer { call_id, to, offer } => {
                if let Err(reason) = self.check_addressing(from, to).and(offer.validate("offer")) {
                    self.report_error(from, reason).await;
                    return;
                }
                let delivered = self
                    .presence
                    .send_to(to, ServerMessage::Offer { call_id, from, offer })
                    .await;
                if !delivered {
                    debug!(%call_id, %to, "offer recipient offline");
                    self.presence
                        .send_to(from, ServerMessage::RecipientOffline { call_id, to })
                        .await;
                }
            }

            ClientMessage::Answer { call_id, to, answer } => {
                if let Err(reason) = self.check_addressing(from, to).and(answer.validate("answer"))
                {
                    self.report_error(from, reason).await;
                    return;
                }
                let delivered = self
                    .presence
                    .send_to(to, ServerMessage::Answer { call_id, from, answer })
                    .await;
                if !delivered {
                    debug!(%call_id, %to, "answer recipient offline");
                    self.presence
                        .send_to(from, ServerMessage::RecipientOffline { call_id, to })
                        .await;
                }
            }

            ClientMessage::IceCandidate { call_id, to, candidate } => {
                if let Err(reason) = self.check_addressing(from, to) {
                    self.report_error(from, reason).await;
                    return;
                }
                // Candidates trickle; a miss here is not worth a bounce.
                let _ = self
                    .presence
                    .send_to(to, ServerMessage::IceCandidate { call_id, from, candidate })
                    .await;
            }

            ClientMessage::Reject { call_id, to, reason } => {
                if let Err(why) = self.check_addressing(from, to) {
                    self.report_error(from, why).await;
                    return;
                }
                let _ = self
                    .presence
                    .send_to(to, ServerMessage::Reject { call_id, from, reason })
                    .await;
            }

            ClientMessage::End { call_id, to } => {
                if let Err(why) = self.check_addressing(from, to) {
                    self.report_error(from, why).await;
                    return;
                }
                let _ = self
                    .presence
                    .send_to(to, ServerMessage::End { call_id, from })
                    .await;
            }
        }
    }

    /// Tells the sender their raw frame could not be parsed.
    pub async fn report_parse_failure(&self, from: Uuid, error: &str) {
        warn!(%from, error, "unparseable signaling message");
        self.report_error(from, format!("invalid message: {error}"))
            .await;
    }

    fn check_addressing(&self, from: Uuid, to: Uuid) -> Result<(), String> {
        if from == to {
            return Err("cannot signal yourself".to_string());
        }
        Ok(())
    }

    async fn report_error(&self, from: Uuid, message: String) {
        self.presence
            .send_to(from, ServerMessage::Error { message })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::protocol::SessionDescription;

    fn offer_sdp() -> SessionDescription {
        SessionDescription {
            kind: "offer".into(),
            sdp: "v=0".into(),
        }
    }

    #[tokio::test]
    async fn offer_reaches_online_recipient_with_stamped_sender() {
        let presence = PresenceRegistry::new();
        let router = SignalingRouter::new(presence.clone());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (_a, _alice_rx) = presence.register(alice).await;
        let (_b, mut bob_rx) = presence.register(bob).await;
        let call_id = Uuid::new_v4();

        router
            .route(
                alice,
                ClientMessage::Offer {
                    call_id,
                    to: bob,
                    offer: offer_sdp(),
                },
            )
            .await;

        match bob_rx.recv().await.unwrap() {
            ServerMessage::Offer { from, call_id: got, .. } => {
                assert_eq!(from, alice);
                assert_eq!(got, call_id);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn offer_to_offline_recipient_bounces_back() {
        let presence = PresenceRegistry::new();
        let router = SignalingRouter::new(presence.clone());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (_a, mut alice_rx) = presence.register(alice).await;
        let call_id = Uuid::new_v4();

        router
            .route(
                alice,
                ClientMessage::Offer {
                    call_id,
                    to: bob,
                    offer: offer_sdp(),
                },
            )
            .await;

        match alice_rx.recv().await.unwrap() {
            ServerMessage::RecipientOffline { call_id: got, to } => {
                assert_eq!(got, call_id);
                assert_eq!(to, bob);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn ice_candidate_to_offline_recipient_is_dropped() {
        let presence = PresenceRegistry::new();
        let router = SignalingRouter::new(presence.clone());
        let alice = Uuid::new_v4();
        let (_a, mut alice_rx) = presence.register(alice).await;

        router
            .route(
                alice,
                ClientMessage::IceCandidate {
                    call_id: Uuid::new_v4(),
                    to: Uuid::new_v4(),
                    candidate: serde_json::json!({ "candidate": "..." }),
                },
            )
            .await;

        // No bounce and no error.
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn mismatched_sdp_kind_reports_an_error() {
        let presence = PresenceRegistry::new();
        let router = SignalingRouter::new(presence.clone());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (_a, mut alice_rx) = presence.register(alice).await;
        let (_b, mut bob_rx) = presence.register(bob).await;

        router
            .route(
                alice,
                ClientMessage::Answer {
                    call_id: Uuid::new_v4(),
                    to: bob,
                    answer: offer_sdp(), // kind "offer" inside an answer envelope
                },
            )
            .await;

        assert!(matches!(
            alice_rx.recv().await.unwrap(),
            ServerMessage::Error { .. }
        ));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn self_addressed_messages_are_rejected() {
        let presence = PresenceRegistry::new();
        let router = SignalingRouter::new(presence.clone());
        let alice = Uuid::new_v4();
        let (_a, mut alice_rx) = presence.register(alice).await;

        router
            .route(
                alice,
                ClientMessage::End {
                    call_id: Uuid::new_v4(),
                    to: alice,
                },
            )
            .await;

        assert!(matches!(
            alice_rx.recv().await.unwrap(),
            ServerMessage::Error { .. }
        ));
    }
}
