//! Member side of the admission handshake
//!
//! Any active member that holds the invite record can admit a candidate.
//! Requests that do not match the stored invite are ignored without a
//! reply, so the handshake leaks nothing to unauthenticated probing.

use crate::core_causal::{Operation, WriterId};
use crate::core_flock::flock::FlockInner;
use crate::core_net::{PeerId, WireMessage};
use crate::core_pairing::session::{proof_message, seal_grant, PairingRequest};
use crate::core_view::INVITE_KEY;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::{debug, info, warn};

pub(crate) fn handle_request(flock: &FlockInner, from: PeerId, request: &PairingRequest) {
    let Some(record) = flock.invite_record() else {
        debug!("no invite on file; ignoring pairing request");
        return;
    };
    if record.id != request.invite_id {
        debug!("pairing request names an unknown invite; ignoring");
        return;
    }
    if record.is_expired(chrono::Utc::now().timestamp_millis()) {
        debug!("pairing request uses an expired invite; ignoring");
        return;
    }

    let Ok(invite_key) = VerifyingKey::from_bytes(&record.public_key) else {
        debug!("stored invite public key is malformed; ignoring");
        return;
    };
    let Ok(signature) = Signature::from_slice(&request.proof) else {
        debug!("pairing proof is malformed; ignoring");
        return;
    };
    let message = proof_message(&request.invite_id, &request.writer, &request.dh_public);
    if invite_key.verify(&message, &signature).is_err() {
        debug!("pairing proof failed verification; ignoring");
        return;
    }
    let Ok(candidate) = VerifyingKey::from_bytes(&request.writer) else {
        debug!("candidate writer key is malformed; ignoring");
        return;
    };

    // Admission: the candidate's key enters quorum through this member's
    // log. On failure nothing was appended, so no partial writer remains.
    let writer = WriterId::from_verifying_key(&candidate);
    if let Err(error) = flock.append(Operation::AddWriter { writer }) {
        warn!(%error, "failed to admit candidate");
        return;
    }

    // Single use: consume the invite record
    if let Err(error) = flock.append(Operation::Del {
        key: INVITE_KEY.to_string(),
    }) {
        warn!(%error, "failed to consume invite after admission");
    }

    match seal_grant(flock.keys(), request.invite_id, &request.dh_public) {
        Ok(response) => flock.send_to(from, WireMessage::PairingResponse(response)),
        Err(error) => {
            warn!(%error, "failed to seal pairing grant");
            return;
        }
    }

    metrics::counter!("flock_pairing_admissions_total").increment(1);
    info!(writer = %writer, "admitted new writer");
}
