use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::{Request, Status};

use crate::job::{Credentials, RoleMask};

pub const USERID_KEY: &str = "x-ingest-userid";
pub const ROLEMASK_KEY: &str = "x-ingest-rolemask";

fn parse_u32(metadata: &MetadataMap, key: &str) -> Result<u32, Status> {
    let value = metadata
        .get(key)
        .ok_or_else(|| Status::unauthenticated(format!("missing {key}")))?;
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| Status::unauthenticated(format!("invalid {key}")))
}

/// Read the requester's credentials stamped by the connector.
pub fn from_metadata(metadata: &MetadataMap) -> Result<Credentials, Status> {
    let userid = parse_u32(metadata, USERID_KEY)?;
    let rolemask = RoleMask::from_bits_truncate(parse_u32(metadata, ROLEMASK_KEY)?);
    Ok(Credentials::new(userid, rolemask))
}

pub fn attach<T>(request: &mut Request<T>, credentials: Credentials) {
    let metadata = request.metadata_mut();
    metadata.insert(USERID_KEY, MetadataValue::from(credentials.userid));
    metadata.insert(ROLEMASK_KEY, MetadataValue::from(credentials.rolemask.bits()));
}

pub fn with_credentials<T>(message: T, credentials: Credentials) -> Request<T> {
    let mut request = Request::new(message);
    attach(&mut request, credentials);
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_through_metadata() {
        let request = with_credentials((), Credentials::new(1000, RoleMask::USER));
        let creds = from_metadata(request.metadata()).unwrap();
        assert_eq!(creds.userid, 1000);
        assert_eq!(creds.rolemask, RoleMask::USER);
        assert!(!creds.is_owner());
    }

    #[test]
    fn missing_credentials_are_unauthenticated() {
        let request = Request::new(());
        let status = from_metadata(request.metadata()).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
    }

    #[test]
    fn garbage_userid() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(USERID_KEY, MetadataValue::from_static("alice"));
        request
            .metadata_mut()
            .insert(ROLEMASK_KEY, MetadataValue::from_static("2"));
        assert!(from_metadata(request.metadata()).is_err());
    }
}
