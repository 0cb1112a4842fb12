//! Signed jobspec envelopes.
//!
//! A submitted jobspec travels as `HEADER.PAYLOAD.SIGNATURE`. The header
//! names the signing mechanism and the userid the signer claims. A
//! [`SignatureVerifier`] unwraps the payload and reports both, so the
//! ingest service can check them against the authenticated requester.
//!
//! Two verifiers share the same contract:
//! - [`NoneVerifier`] understands only the `none` mechanism.
//! - [`Ed25519Verifier`] also verifies `ed25519` signatures against a set
//!   of trusted signer keys.

mod ed25519;
mod envelope;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use thiserror::Error;

pub use self::ed25519::{load_trusted_keys, Ed25519Verifier};
pub use self::envelope::{wrap_ed25519, wrap_none, Envelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    None,
    Ed25519,
}

impl Mechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mechanism::None => "none",
            Mechanism::Ed25519 => "ed25519",
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mechanism {
    type Err = SignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Mechanism::None),
            "ed25519" => Ok(Mechanism::Ed25519),
            other => Err(SignError::UnknownMechanism(other.to_string())),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unknown signing mechanism '{0}'")]
    UnknownMechanism(String),

    #[error("signing mechanism '{0}' is not supported by this instance")]
    UnsupportedMechanism(Mechanism),

    #[error("no trusted key for signer userid {0}")]
    UnknownSigner(u32),

    #[error("signature verification failed")]
    BadSignature,

    #[error("trusted key file: {0}")]
    KeyFile(String),
}

/// Result of a successful unwrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unwrapped {
    pub payload: Bytes,
    pub userid: u32,
    pub mechanism: Mechanism,
}

pub trait SignatureVerifier: Send + Sync {
    fn unwrap(&self, signed: &str) -> Result<Unwrapped, SignError>;
}

/// Unwraps `none` envelopes only. Nothing is verified: the envelope's userid
/// is simply reported, and callers restrict the mechanism to the owner.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneVerifier;

impl SignatureVerifier for NoneVerifier {
    fn unwrap(&self, signed: &str) -> Result<Unwrapped, SignError> {
        let envelope = Envelope::decode(signed)?;
        match envelope.mechanism() {
            Mechanism::None => envelope.unwrap_none(),
            other => Err(SignError::UnsupportedMechanism(other)),
        }
    }
}
