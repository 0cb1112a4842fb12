use serde::Serialize;

use crate::error::IngestError;
use crate::ids::JobId;
use crate::job::{Job, SubmitReply};
use crate::job_manager::JobAnnouncement;
use crate::store::Transaction;

pub const KEY_SIGNED_SPEC: &str = "J";
pub const KEY_JOBSPEC: &str = "jobspec";
pub const KEY_EVENTLOG: &str = "eventlog";

#[derive(Serialize)]
struct EventlogEntry {
    timestamp: f64,
    name: &'static str,
    context: SubmitContext,
}

#[derive(Serialize)]
struct SubmitContext {
    userid: u32,
    priority: i32,
    flags: u32,
}

/// Wall-clock seconds with microsecond resolution.
fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// A job whose records are in the batch, waiting for the flush verdict.
#[derive(Debug)]
pub struct BatchedJob {
    pub id: JobId,
    pub reply: SubmitReply,
}

impl BatchedJob {
    pub fn respond(self, result: Result<JobId, IngestError>) {
        if self.reply.send(result).is_err() {
            tracing::debug!(job_id = %self.id, "Submitter went away before response");
        }
    }
}

/// Jobs collected during one coalescing window: one write-set and one
/// announcement list, both in arrival order.
#[derive(Debug, Default)]
pub struct Batch {
    jobs: Vec<BatchedJob>,
    txn: Transaction,
    announcements: Vec<JobAnnouncement>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the records for `job` under `id`. The job's records are built
    /// separately and only merged once complete, so a failure leaves the
    /// batch untouched and hands the job back.
    pub fn add_job(&mut self, id: JobId, mut job: Job) -> Result<(), (Job, IngestError)> {
        let Some(jobspec) = job.jobspec.take() else {
            return Err((job, IngestError::Protocol("job has no jobspec".to_string())));
        };

        let t_submit = now_seconds();
        let entry = EventlogEntry {
            timestamp: t_submit,
            name: "submit",
            context: SubmitContext {
                userid: job.credentials.userid,
                priority: job.priority,
                flags: job.flags.bits(),
            },
        };
        let mut eventlog = match serde_json::to_vec(&entry) {
            Ok(line) => line,
            Err(e) => {
                job.jobspec = Some(jobspec);
                return Err((job, IngestError::Commit(format!("eventlog encode: {e}"))));
            }
        };
        eventlog.push(b'\n');

        let mut txn = Transaction::new();
        txn.put(id.kvs_key(KEY_SIGNED_SPEC), job.signed_spec.clone().into_bytes());
        txn.put(id.kvs_key(KEY_JOBSPEC), jobspec);
        txn.append(id.kvs_key(KEY_EVENTLOG), eventlog);

        self.txn.extend(txn);
        self.announcements.push(JobAnnouncement {
            id,
            userid: job.credentials.userid,
            priority: job.priority,
            t_submit,
            flags: job.flags.bits(),
        });
        self.jobs.push(BatchedJob {
            id,
            reply: job.into_reply(),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|j| j.id).collect()
    }

    pub fn transaction(&self) -> &Transaction {
        &self.txn
    }

    pub fn announcements(&self) -> &[JobAnnouncement] {
        &self.announcements
    }

    pub fn into_parts(self) -> (Vec<BatchedJob>, Transaction, Vec<JobAnnouncement>) {
        (self.jobs, self.txn, self.announcements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Credentials, JobFlags};
    use crate::store::TxnOp;
    use bytes::Bytes;
    use tokio::sync::oneshot;

    fn job(userid: u32, priority: i32) -> (Job, oneshot::Receiver<Result<JobId, IngestError>>) {
        let (tx, rx) = oneshot::channel();
        let job = Job::new(
            "HEADER.PAYLOAD.none".into(),
            Credentials::user(userid),
            priority,
            JobFlags::DEBUG,
            Bytes::from_static(b"{\"tasks\":[]}"),
            tx,
        );
        (job, rx)
    }

    #[test]
    fn add_job_writes_complete_record() {
        let mut batch = Batch::new();
        let id = JobId::from_parts(1, 0, 0);
        let (j, _rx) = job(1000, 16);
        batch.add_job(id, j).unwrap();

        let dir = id.kvs_dir();
        let ops = batch.transaction().ops();
        assert_eq!(ops.len(), 3);
        assert!(matches!(&ops[0], TxnOp::Put { key, .. } if *key == format!("{dir}.J")));
        assert!(matches!(&ops[1], TxnOp::Put { key, value } if *key == format!("{dir}.jobspec") && &value[..] == b"{\"tasks\":[]}"));
        let TxnOp::Append { key, value } = &ops[2] else {
            panic!("expected eventlog append");
        };
        assert_eq!(*key, format!("{dir}.eventlog"));
        assert_eq!(value.last(), Some(&b'\n'));

        let entry: serde_json::Value = serde_json::from_slice(value).unwrap();
        assert_eq!(entry["name"], "submit");
        assert_eq!(entry["context"]["userid"], 1000);
        assert_eq!(entry["context"]["priority"], 16);
        assert_eq!(entry["context"]["flags"], 2);

        let announced = &batch.announcements()[0];
        assert_eq!(announced.id, id);
        assert_eq!(announced.flags, 2);
        assert!((entry["timestamp"].as_f64().unwrap() - announced.t_submit).abs() < 1e-6);
    }

    #[test]
    fn jobs_keep_arrival_order() {
        let mut batch = Batch::new();
        let ids: Vec<JobId> = (0..3).map(|s| JobId::from_parts(5, 0, s)).collect();
        for (i, id) in ids.iter().enumerate() {
            let (j, _rx) = job(1000 + i as u32, 10);
            batch.add_job(*id, j).unwrap();
        }
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.job_ids(), ids);
        let users: Vec<u32> = batch.announcements().iter().map(|a| a.userid).collect();
        assert_eq!(users, vec![1000, 1001, 1002]);
        assert_eq!(batch.transaction().len(), 9);
    }

    #[test]
    fn job_without_jobspec_is_handed_back() {
        let mut batch = Batch::new();
        let (mut j, _rx) = job(1, 16);
        j.jobspec = None;
        let (returned, err) = batch.add_job(JobId::from_parts(1, 0, 0), j).unwrap_err();
        assert_eq!(returned.credentials.userid, 1);
        assert!(matches!(err, IngestError::Protocol(_)));
        assert!(batch.is_empty());
        assert!(batch.transaction().is_empty());
    }
}
