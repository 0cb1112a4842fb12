use bytes::Bytes;

use crate::error::IngestError;
use crate::job::{
    Credentials, JobFlags, RoleMask, SubmitRequest, PRIORITY_DEFAULT, PRIORITY_MAX, PRIORITY_MIN,
};
use crate::sign::{Mechanism, SignatureVerifier};

/// A request that passed every synchronous check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub priority: i32,
    pub flags: JobFlags,
    pub jobspec: Bytes,
}

/// Decode, authorize and unwrap a submit request.
///
/// Checks run in a fixed order, so the first failing rule determines the
/// error the user sees.
pub fn admit(
    request: &SubmitRequest,
    credentials: &Credentials,
    verifier: &dyn SignatureVerifier,
) -> Result<Admission, IngestError> {
    if request.signed_spec.is_empty() {
        return Err(IngestError::Protocol("empty jobspec".to_string()));
    }
    let flags = JobFlags::from_bits(request.flags).ok_or_else(|| {
        IngestError::Protocol(format!("invalid submit flags 0x{:x}", request.flags))
    })?;
    if !credentials
        .rolemask
        .intersects(RoleMask::OWNER | RoleMask::USER)
    {
        return Err(IngestError::Permission(
            "guest users may not submit jobs".to_string(),
        ));
    }

    let owner = credentials.is_owner();
    let priority = request.priority.unwrap_or(PRIORITY_DEFAULT);
    if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
        return Err(IngestError::InvalidArgument(format!(
            "priority range is [{PRIORITY_MIN}:{PRIORITY_MAX}]"
        )));
    }
    if !owner && priority > PRIORITY_DEFAULT {
        return Err(IngestError::Permission(format!(
            "only the instance owner can submit with priority >{PRIORITY_DEFAULT}"
        )));
    }
    if !owner && flags.contains(JobFlags::WAITABLE) {
        return Err(IngestError::Permission(
            "only the instance owner can submit with FLUX_JOB_WAITABLE".to_string(),
        ));
    }

    let unwrapped = verifier
        .unwrap(&request.signed_spec)
        .map_err(|e| IngestError::Validation(e.to_string()))?;
    if unwrapped.userid != credentials.userid {
        return Err(IngestError::Permission(format!(
            "signer={} != requestor={}",
            unwrapped.userid, credentials.userid
        )));
    }
    if !owner && unwrapped.mechanism == Mechanism::None {
        return Err(IngestError::Permission(
            "only instance owner can use sign-type=none".to_string(),
        ));
    }

    Ok(Admission {
        priority,
        flags,
        jobspec: unwrapped.payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sign::{wrap_ed25519, wrap_none, Ed25519Verifier, NoneVerifier};
    use ed25519_dalek::SigningKey;

    const SPEC: &[u8] = br#"{"version":1}"#;

    fn owner_request() -> SubmitRequest {
        SubmitRequest::new(wrap_none(SPEC, 0))
    }

    fn kind(result: Result<Admission, IngestError>) -> ErrorKind {
        result.unwrap_err().kind()
    }

    #[test]
    fn owner_defaults() {
        let admission = admit(&owner_request(), &Credentials::owner(0), &NoneVerifier).unwrap();
        assert_eq!(admission.priority, PRIORITY_DEFAULT);
        assert_eq!(admission.flags, JobFlags::empty());
        assert_eq!(&admission.jobspec[..], SPEC);
    }

    #[test]
    fn empty_spec_is_protocol_error() {
        let request = SubmitRequest::new("");
        assert_eq!(
            kind(admit(&request, &Credentials::owner(0), &NoneVerifier)),
            ErrorKind::Protocol
        );
    }

    #[test]
    fn unknown_flags_are_protocol_error() {
        let mut request = owner_request();
        request.flags = 0x100;
        assert_eq!(
            kind(admit(&request, &Credentials::owner(0), &NoneVerifier)),
            ErrorKind::Protocol
        );
    }

    #[test]
    fn guest_is_refused() {
        let creds = Credentials::new(0, RoleMask::empty());
        assert_eq!(
            kind(admit(&owner_request(), &creds, &NoneVerifier)),
            ErrorKind::Permission
        );
    }

    #[test]
    fn priority_out_of_range() {
        for priority in [-1, 32] {
            let request = owner_request().with_priority(priority);
            let err = admit(&request, &Credentials::owner(0), &NoneVerifier).unwrap_err();
            assert_eq!(err, IngestError::InvalidArgument("priority range is [0:31]".into()));
        }
    }

    #[test]
    fn owner_may_raise_priority_and_wait() {
        let request = owner_request()
            .with_priority(31)
            .with_flags(JobFlags::WAITABLE | JobFlags::DEBUG);
        let admission = admit(&request, &Credentials::owner(0), &NoneVerifier).unwrap();
        assert_eq!(admission.priority, 31);
        assert!(admission.flags.contains(JobFlags::WAITABLE));
    }

    #[test]
    fn user_limits() {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let mut verifier = Ed25519Verifier::default();
        verifier.trust(1000, key.verifying_key());
        let signed = wrap_ed25519(SPEC, 1000, &key);
        let user = Credentials::user(1000);

        let high = SubmitRequest::new(signed.clone()).with_priority(17);
        assert_eq!(
            admit(&high, &user, &verifier).unwrap_err(),
            IngestError::Permission("only the instance owner can submit with priority >16".into())
        );

        let waitable = SubmitRequest::new(signed.clone()).with_flags(JobFlags::WAITABLE);
        assert_eq!(kind(admit(&waitable, &user, &verifier)), ErrorKind::Permission);

        let ok = SubmitRequest::new(signed).with_priority(16);
        assert_eq!(admit(&ok, &user, &verifier).unwrap().priority, 16);
    }

    #[test]
    fn signer_must_match_requestor() {
        let request = SubmitRequest::new(wrap_none(SPEC, 5));
        assert_eq!(
            admit(&request, &Credentials::owner(0), &NoneVerifier).unwrap_err(),
            IngestError::Permission("signer=5 != requestor=0".into())
        );
    }

    #[test]
    fn only_owner_can_use_none() {
        let request = SubmitRequest::new(wrap_none(SPEC, 1000));
        assert_eq!(
            admit(&request, &Credentials::user(1000), &NoneVerifier).unwrap_err(),
            IngestError::Permission("only instance owner can use sign-type=none".into())
        );
    }

    #[test]
    fn unwrap_failure_is_validation_error() {
        let request = SubmitRequest::new("garbage");
        assert_eq!(
            kind(admit(&request, &Credentials::owner(0), &NoneVerifier)),
            ErrorKind::Validation
        );
    }
}
