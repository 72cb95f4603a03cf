//! Blind-invite pairing
//!
//! Admission of a new writer without pre-shared secrets: the founder
//! issues a single-use invite token, the candidate proves possession of
//! it over the group's discovery topic, and an existing member admits the
//! candidate's writer key and hands back the group credentials sealed to
//! the candidate.

pub mod candidate;
pub mod invite;
pub mod member;
pub mod session;

pub use candidate::{CandidateSession, PairingGrant};
pub use invite::{decode_invite, Invite, InviteDecode, InviteRecord};
pub use session::{PairingRequest, PairingResponse};

/// Pairing failures
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("invite token is not decodable")]
    InvalidToken,

    #[error("pairing channel closed before confirmation")]
    Closed,

    #[error("pairing timed out")]
    Timeout,

    #[error("pairing payload could not be encoded: {0}")]
    Encode(String),

    #[error("sealed grant failed to open")]
    Sealed,
}
