use bitflags::bitflags;
use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::IngestError;
use crate::ids::JobId;

pub const PRIORITY_MIN: i32 = 0;
pub const PRIORITY_MAX: i32 = 31;
pub const PRIORITY_DEFAULT: i32 = 16;

bitflags! {
    /// Submit flags a client may request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct JobFlags: u32 {
        const DEBUG = 0x2;
        /// Privileged: only the instance owner may submit waitable jobs.
        const WAITABLE = 0x4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RoleMask: u32 {
        const OWNER = 0x1;
        const USER = 0x2;
    }
}

/// Authenticated identity of the requester, as stamped by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub userid: u32,
    pub rolemask: RoleMask,
}

impl Credentials {
    pub fn new(userid: u32, rolemask: RoleMask) -> Self {
        Self { userid, rolemask }
    }

    pub fn user(userid: u32) -> Self {
        Self::new(userid, RoleMask::USER)
    }

    pub fn owner(userid: u32) -> Self {
        Self::new(userid, RoleMask::OWNER)
    }

    pub fn is_owner(&self) -> bool {
        self.rolemask.contains(RoleMask::OWNER)
    }
}

/// Submit request payload as received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub signed_spec: String,
    /// `None` selects [`PRIORITY_DEFAULT`].
    pub priority: Option<i32>,
    pub flags: u32,
}

impl SubmitRequest {
    pub fn new(signed_spec: impl Into<String>) -> Self {
        Self {
            signed_spec: signed_spec.into(),
            priority: None,
            flags: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_flags(mut self, flags: JobFlags) -> Self {
        self.flags = flags.bits();
        self
    }
}

pub type SubmitReply = oneshot::Sender<Result<JobId, IngestError>>;

/// One submission in flight. Owns the reply channel, so a response can only
/// be sent once: [`Job::respond`] consumes the job.
#[derive(Debug)]
pub struct Job {
    pub signed_spec: String,
    pub credentials: Credentials,
    pub priority: i32,
    pub flags: JobFlags,
    /// Unwrapped jobspec; released once the job's records join a batch.
    pub jobspec: Option<Bytes>,
    reply: SubmitReply,
}

impl Job {
    pub fn new(
        signed_spec: String,
        credentials: Credentials,
        priority: i32,
        flags: JobFlags,
        jobspec: Bytes,
        reply: SubmitReply,
    ) -> Self {
        Self {
            signed_spec,
            credentials,
            priority,
            flags,
            jobspec: Some(jobspec),
            reply,
        }
    }

    pub fn respond(self, result: Result<JobId, IngestError>) {
        if self.reply.send(result).is_err() {
            tracing::debug!(userid = self.credentials.userid, "Submitter went away before response");
        }
    }

    pub(crate) fn into_reply(self) -> SubmitReply {
        self.reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_role() {
        assert!(Credentials::owner(0).is_owner());
        assert!(!Credentials::user(1000).is_owner());
        let both = Credentials::new(5, RoleMask::OWNER | RoleMask::USER);
        assert!(both.is_owner());
    }

    #[test]
    fn unknown_flag_bits_are_not_representable() {
        assert!(JobFlags::from_bits(0x2 | 0x4).is_some());
        assert!(JobFlags::from_bits(0x1).is_none());
        assert!(JobFlags::from_bits(0x10).is_none());
    }

    #[test]
    fn submit_request_builders() {
        let req = SubmitRequest::new("J")
            .with_priority(3)
            .with_flags(JobFlags::DEBUG);
        assert_eq!(req.priority, Some(3));
        assert_eq!(req.flags, 0x2);
    }

    #[tokio::test]
    async fn respond_delivers_once() {
        let (tx, rx) = oneshot::channel();
        let job = Job::new(
            "J".into(),
            Credentials::user(1),
            PRIORITY_DEFAULT,
            JobFlags::empty(),
            Bytes::from_static(b"{}"),
            tx,
        );
        job.respond(Ok(JobId::new(99)));
        assert_eq!(rx.await.unwrap(), Ok(JobId::new(99)));
    }
}
