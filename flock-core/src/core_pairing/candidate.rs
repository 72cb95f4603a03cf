//! Candidate side of the admission handshake

use crate::core_flock::types::GroupKeys;
use crate::core_net::{NetSession, WireMessage};
use crate::core_pairing::invite::InviteToken;
use crate::core_pairing::session::{open_grant, proof_message, PairingRequest};
use crate::core_pairing::PairingError;
use ed25519_dalek::{Signer, SigningKey};
use std::time::Duration;
use tracing::debug;
use x25519_dalek::{PublicKey, StaticSecret};

/// Everything a successful handshake yields.
///
/// Ownership of the network session transfers here from the candidate
/// session, and from here into the group being opened; the candidate
/// session keeps no reference to either.
pub struct PairingGrant {
    pub keys: GroupKeys,
    pub session: NetSession,
    pub identity: SigningKey,
}

/// Transient candidate role: exists for one handshake only.
///
/// The session exclusively owns its network handle until admission
/// succeeds; any failure drops the whole session, which releases the
/// handle and leaves no half-admitted state behind.
pub struct CandidateSession {
    session: NetSession,
    token: InviteToken,
    identity: SigningKey,
}

impl CandidateSession {
    pub(crate) fn new(session: NetSession, token: InviteToken, identity: SigningKey) -> Self {
        Self {
            session,
            token,
            identity,
        }
    }

    /// Drive the handshake until a grant arrives, the channel closes, or
    /// the timeout elapses.
    ///
    /// The request is re-broadcast on an interval: members that join the
    /// topic late, or lossy transports, get another chance to observe it.
    pub(crate) async fn run(
        mut self,
        timeout: Duration,
        retry: Duration,
    ) -> Result<PairingGrant, PairingError> {
        let invite_key = SigningKey::from_bytes(&self.token.seed);
        let dh_secret = StaticSecret::from(rand::random::<[u8; 32]>());
        let dh_public = PublicKey::from(&dh_secret).to_bytes();
        let writer = self.identity.verifying_key().to_bytes();
        let proof = invite_key
            .sign(&proof_message(&self.token.id, &writer, &dh_public))
            .to_bytes()
            .to_vec();
        let request = PairingRequest {
            invite_id: self.token.id,
            writer,
            dh_public,
            proof,
        };

        let handle = self.session.handle();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut resend = tokio::time::interval(retry);

        let keys = loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(PairingError::Timeout);
                }
                _ = resend.tick() => {
                    handle.broadcast(WireMessage::PairingRequest(request.clone()));
                }
                received = self.session.recv() => {
                    match received {
                        None => return Err(PairingError::Closed),
                        Some(envelope) => {
                            if let WireMessage::PairingResponse(response) = envelope.msg {
                                if response.invite_id == self.token.id {
                                    break open_grant(&dh_secret, &response)?;
                                }
                                debug!("ignoring pairing response for another invite");
                            }
                        }
                    }
                }
            }
        };

        Ok(PairingGrant {
            keys,
            session: self.session,
            identity: self.identity,
        })
    }
}
