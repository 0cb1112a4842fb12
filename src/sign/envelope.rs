use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};

use super::{Mechanism, SignError, Unwrapped};

const ENVELOPE_VERSION: u32 = 1;
const NONE_SIGNATURE: &str = "none";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    version: u32,
    mechanism: String,
    userid: u32,
}

/// A decoded but not yet verified envelope.
#[derive(Debug, Clone)]
pub struct Envelope {
    signing_input: String,
    payload: Vec<u8>,
    signature: String,
    mechanism: Mechanism,
    userid: u32,
}

impl Envelope {
    pub fn decode(signed: &str) -> Result<Self, SignError> {
        let mut parts = signed.trim().split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SignError::Malformed(
                "expected HEADER.PAYLOAD.SIGNATURE".to_string(),
            ));
        };

        let header_json = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|e| SignError::Malformed(format!("header: {e}")))?;
        let header: Header = serde_json::from_slice(&header_json)
            .map_err(|e| SignError::Malformed(format!("header: {e}")))?;
        if header.version != ENVELOPE_VERSION {
            return Err(SignError::Malformed(format!(
                "unsupported version {}",
                header.version
            )));
        }
        let mechanism = header.mechanism.parse()?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| SignError::Malformed(format!("payload: {e}")))?;

        Ok(Self {
            signing_input: format!("{header_b64}.{payload_b64}"),
            payload,
            signature: signature.to_string(),
            mechanism,
            userid: header.userid,
        })
    }

    pub fn mechanism(&self) -> Mechanism {
        self.mechanism
    }

    pub fn userid(&self) -> u32 {
        self.userid
    }

    pub(crate) fn signing_input(&self) -> &[u8] {
        self.signing_input.as_bytes()
    }

    pub(crate) fn signature(&self) -> &str {
        &self.signature
    }

    pub(crate) fn into_unwrapped(self) -> Unwrapped {
        Unwrapped {
            payload: Bytes::from(self.payload),
            userid: self.userid,
            mechanism: self.mechanism,
        }
    }

    pub(crate) fn unwrap_none(self) -> Result<Unwrapped, SignError> {
        if self.signature != NONE_SIGNATURE {
            return Err(SignError::Malformed(
                "mechanism none requires signature 'none'".to_string(),
            ));
        }
        Ok(self.into_unwrapped())
    }
}

fn encode_parts(payload: &[u8], userid: u32, mechanism: Mechanism) -> String {
    let header = Header {
        version: ENVELOPE_VERSION,
        mechanism: mechanism.as_str().to_string(),
        userid,
    };
    // a struct of plain integers and strings always serializes
    let header_json = serde_json::to_vec(&header).unwrap_or_default();
    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(payload)
    )
}

/// Wrap `payload` with the unsigned `none` mechanism.
pub fn wrap_none(payload: &[u8], userid: u32) -> String {
    format!(
        "{}.{}",
        encode_parts(payload, userid, Mechanism::None),
        NONE_SIGNATURE
    )
}

/// Wrap and sign `payload` as `userid` with an ed25519 key.
pub fn wrap_ed25519(payload: &[u8], userid: u32, key: &SigningKey) -> String {
    let signing_input = encode_parts(payload, userid, Mechanism::Ed25519);
    let signature = key.sign(signing_input.as_bytes());
    format!(
        "{signing_input}.{}",
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_reports_header_fields() {
        let env = Envelope::decode(&wrap_none(b"spec", 42)).unwrap();
        assert_eq!(env.mechanism(), Mechanism::None);
        assert_eq!(env.userid(), 42);
    }

    #[test]
    fn none_with_a_signature_is_rejected() {
        let signed = wrap_none(b"spec", 42);
        let forged = signed.replace(".none", ".c2ln");
        let env = Envelope::decode(&forged).unwrap();
        assert!(matches!(env.unwrap_none(), Err(SignError::Malformed(_))));
    }

    #[test]
    fn wrong_part_count() {
        assert!(matches!(
            Envelope::decode("a.b"),
            Err(SignError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::decode("a.b.c.d"),
            Err(SignError::Malformed(_))
        ));
    }

    #[test]
    fn unknown_mechanism_in_header() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"version":1,"mechanism":"curve","userid":1}"#);
        let signed = format!("{header}.{}.x", URL_SAFE_NO_PAD.encode(b"{}"));
        assert_eq!(
            Envelope::decode(&signed).unwrap_err(),
            SignError::UnknownMechanism("curve".into())
        );
    }
}
