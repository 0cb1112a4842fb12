use std::collections::HashMap;
use std::path::Path;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH};

use super::{Envelope, Mechanism, SignError, SignatureVerifier, Unwrapped};

/// Verifies ed25519 envelopes against trusted signer keys. `none` envelopes
/// are still unwrapped so the instance owner can submit unsigned.
#[derive(Debug, Clone, Default)]
pub struct Ed25519Verifier {
    keys: HashMap<u32, VerifyingKey>,
}

impl Ed25519Verifier {
    pub fn new(keys: HashMap<u32, VerifyingKey>) -> Self {
        Self { keys }
    }

    pub fn from_key_file(path: &Path) -> Result<Self, SignError> {
        Ok(Self::new(load_trusted_keys(path)?))
    }

    pub fn trust(&mut self, userid: u32, key: VerifyingKey) {
        self.keys.insert(userid, key);
    }

    /// Number of trusted signers.
    pub fn signer_count(&self) -> usize {
        self.keys.len()
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn unwrap(&self, signed: &str) -> Result<Unwrapped, SignError> {
        let envelope = Envelope::decode(signed)?;
        match envelope.mechanism() {
            Mechanism::None => envelope.unwrap_none(),
            Mechanism::Ed25519 => {
                let key = self
                    .keys
                    .get(&envelope.userid())
                    .ok_or(SignError::UnknownSigner(envelope.userid()))?;
                let raw = URL_SAFE_NO_PAD
                    .decode(envelope.signature())
                    .map_err(|e| SignError::Malformed(format!("signature: {e}")))?;
                let signature = Signature::from_slice(&raw)
                    .map_err(|_| SignError::Malformed("signature length".to_string()))?;
                key.verify(envelope.signing_input(), &signature)
                    .map_err(|_| SignError::BadSignature)?;
                Ok(envelope.into_unwrapped())
            }
        }
    }
}

/// Load a JSON object mapping decimal userids to base64 public keys.
pub fn load_trusted_keys(path: &Path) -> Result<HashMap<u32, VerifyingKey>, SignError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SignError::KeyFile(format!("{}: {e}", path.display())))?;
    parse_trusted_keys(&raw)
}

fn parse_trusted_keys(raw: &str) -> Result<HashMap<u32, VerifyingKey>, SignError> {
    let entries: HashMap<String, String> =
        serde_json::from_str(raw).map_err(|e| SignError::KeyFile(e.to_string()))?;

    let mut keys = HashMap::with_capacity(entries.len());
    for (userid, encoded) in entries {
        let userid: u32 = userid
            .parse()
            .map_err(|_| SignError::KeyFile(format!("invalid userid '{userid}'")))?;
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| SignError::KeyFile(format!("userid {userid}: {e}")))?;
        let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|_| {
            SignError::KeyFile(format!("userid {userid}: key must be 32 bytes"))
        })?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| SignError::KeyFile(format!("userid {userid}: {e}")))?;
        keys.insert(userid, key);
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::{wrap_ed25519, wrap_none};
    use ed25519_dalek::SigningKey;
    use std::io::Write;

    fn signer(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn verifier_for(userid: u32, key: &SigningKey) -> Ed25519Verifier {
        let mut v = Ed25519Verifier::default();
        v.trust(userid, key.verifying_key());
        v
    }

    #[test]
    fn verifies_trusted_signature() {
        let key = signer(1);
        let v = verifier_for(1001, &key);
        let unwrapped = v.unwrap(&wrap_ed25519(b"{\"a\":1}", 1001, &key)).unwrap();
        assert_eq!(unwrapped.userid, 1001);
        assert_eq!(unwrapped.mechanism, Mechanism::Ed25519);
        assert_eq!(&unwrapped.payload[..], b"{\"a\":1}");
    }

    #[test]
    fn unknown_signer() {
        let key = signer(1);
        let v = verifier_for(1001, &key);
        assert_eq!(
            v.unwrap(&wrap_ed25519(b"{}", 1002, &key)),
            Err(SignError::UnknownSigner(1002))
        );
    }

    #[test]
    fn wrong_key_fails_verification() {
        let v = verifier_for(1001, &signer(1));
        assert_eq!(
            v.unwrap(&wrap_ed25519(b"{}", 1001, &signer(2))),
            Err(SignError::BadSignature)
        );
    }

    #[test]
    fn none_still_unwraps() {
        let v = Ed25519Verifier::default();
        assert_eq!(v.unwrap(&wrap_none(b"{}", 0)).unwrap().mechanism, Mechanism::None);
    }

    #[test]
    fn key_file_round_trip() {
        let key = signer(3);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{{\"1001\": \"{}\"}}",
            STANDARD.encode(key.verifying_key().to_bytes())
        )
        .unwrap();

        let v = Ed25519Verifier::from_key_file(file.path()).unwrap();
        assert_eq!(v.signer_count(), 1);
        assert!(v.unwrap(&wrap_ed25519(b"{}", 1001, &key)).is_ok());
    }

    #[test]
    fn key_file_rejects_bad_entries() {
        assert!(matches!(
            parse_trusted_keys(r#"{"alice": "AAAA"}"#),
            Err(SignError::KeyFile(_))
        ));
        assert!(matches!(
            parse_trusted_keys(r#"{"7": "AAAA"}"#),
            Err(SignError::KeyFile(_))
        ));
    }
}
