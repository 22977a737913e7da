//! In-memory, multi-version sender.
//!
//! Reads are served at the transaction's read timestamp, overlaid with the
//! transaction's own buffered writes. Writes are buffered per transaction and
//! made visible at commit. Commit fails with a retry error when a written key
//! (or, for serializable transactions, a read key or span) was committed by
//! someone else after the read timestamp.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::api::{
    BatchRequest,
    BatchResponse,
    IsolationLevel,
    KeyValue,
    Request,
    Response,
    TransactionStatus,
    TxnMeta,
};
use crate::errors::{KvError, Result, RetryReason};
use crate::hlc::{Clock, Timestamp};
use crate::sender::Sender;

#[derive(Debug, Clone)]
struct Version {
    ts: Timestamp,
    /// None for deletions.
    value: Option<Bytes>,
}

#[derive(Debug, Default)]
struct TxnRecord {
    epoch: u32,
    /// Buffered writes, None for deletions.
    writes: BTreeMap<Bytes, Option<Bytes>>,
    reads: BTreeSet<Bytes>,
    scans: Vec<(Bytes, Bytes)>,
}

#[derive(Debug, Default)]
struct LocalState {
    /// Committed versions per key, ordered oldest to newest.
    data: BTreeMap<Bytes, Vec<Version>>,
    /// Records for transactions that haven't been finalized.
    txns: HashMap<Uuid, TxnRecord>,
}

impl LocalState {
    fn read_at(&self, key: &Bytes, ts: Timestamp) -> Option<Bytes> {
        let versions = self.data.get(key)?;
        versions
            .iter()
            .rev()
            .find(|v| v.ts <= ts)
            .and_then(|v| v.value.clone())
    }

    fn scan_at(&self, start: &Bytes, end: &Bytes, ts: Timestamp) -> BTreeMap<Bytes, Bytes> {
        let mut rows = BTreeMap::new();
        if start >= end {
            return rows;
        }
        let range = self
            .data
            .range::<Bytes, _>((Bound::Included(start), Bound::Excluded(end)));
        for (key, versions) in range {
            let visible = versions.iter().rev().find(|v| v.ts <= ts);
            if let Some(Version {
                value: Some(value), ..
            }) = visible
            {
                rows.insert(key.clone(), value.clone());
            }
        }
        rows
    }

    fn latest_commit(&self, key: &Bytes) -> Option<Timestamp> {
        self.data.get(key).and_then(|v| v.last()).map(|v| v.ts)
    }

    fn span_modified_after(&self, start: &Bytes, end: &Bytes, ts: Timestamp) -> bool {
        if start >= end {
            return false;
        }
        self.data
            .range::<Bytes, _>((Bound::Included(start), Bound::Excluded(end)))
            .any(|(_, versions)| versions.last().map(|v| v.ts > ts).unwrap_or(false))
    }

    fn apply_write(&mut self, key: Bytes, value: Option<Bytes>, ts: Timestamp) {
        self.data.entry(key).or_default().push(Version { ts, value });
    }
}

/// A sender evaluating requests against an in-memory store.
#[derive(Debug)]
pub struct LocalSender {
    clock: Arc<Clock>,
    state: Mutex<LocalState>,
}

impl LocalSender {
    /// Create a new sender. The clock should be the same clock used to assign
    /// read timestamps to transactions.
    pub fn new(clock: Arc<Clock>) -> Self {
        LocalSender {
            clock,
            state: Mutex::new(LocalState::default()),
        }
    }

    /// Number of transactions that have sent requests but haven't been
    /// finalized.
    pub fn num_open_txns(&self) -> usize {
        self.state.lock().txns.len()
    }

    fn send_non_txn(&self, requests: Vec<Request>) -> Result<BatchResponse> {
        let mut state = self.state.lock();
        let mut responses = Vec::with_capacity(requests.len());
        for req in requests {
            let resp = match req {
                Request::Get { key } => Response::Get {
                    value: state.read_at(&key, self.clock.now()),
                },
                Request::Scan { start, end } => {
                    let rows = state.scan_at(&start, &end, self.clock.now());
                    Response::Scan {
                        rows: into_key_values(rows),
                    }
                }
                Request::Put { key, value } => {
                    state.apply_write(key, Some(value), self.clock.now());
                    Response::Put
                }
                Request::Delete { key } => {
                    state.apply_write(key, None, self.clock.now());
                    Response::Delete
                }
                Request::EndTxn { .. } => {
                    return Err(KvError::InvalidTxnOperation(
                        "EndTxn sent without a transaction".to_string(),
                    ));
                }
            };
            responses.push(resp);
        }
        Ok(BatchResponse { responses })
    }

    fn send_txn(&self, meta: TxnMeta, requests: Vec<Request>) -> Result<BatchResponse> {
        let mut state = self.state.lock();

        let record = state.txns.entry(meta.id).or_default();
        if record.epoch > meta.epoch {
            return Err(KvError::InvalidTxnOperation(format!(
                "request for txn {} at stale epoch {} (current {})",
                meta.id, meta.epoch, record.epoch
            )));
        }
        if record.epoch < meta.epoch {
            trace!(txn_id = %meta.id, epoch = meta.epoch, "discarding writes from previous epoch");
            *record = TxnRecord {
                epoch: meta.epoch,
                ..Default::default()
            };
        }

        let mut responses = Vec::with_capacity(requests.len());
        for req in requests {
            let resp = match req {
                Request::Get { key } => {
                    let own = {
                        let record = state.txns.entry(meta.id).or_default();
                        record.reads.insert(key.clone());
                        record.writes.get(&key).cloned()
                    };
                    let value = match own {
                        Some(own) => own,
                        None => state.read_at(&key, meta.read_timestamp),
                    };
                    Response::Get { value }
                }
                Request::Scan { start, end } => {
                    let mut rows = state.scan_at(&start, &end, meta.read_timestamp);
                    let record = state.txns.entry(meta.id).or_default();
                    record.scans.push((start.clone(), end.clone()));
                    if start < end {
                        let own = record
                            .writes
                            .range::<Bytes, _>((Bound::Included(&start), Bound::Excluded(&end)));
                        for (key, value) in own {
                            match value {
                                Some(value) => rows.insert(key.clone(), value.clone()),
                                None => rows.remove(key),
                            };
                        }
                    }
                    Response::Scan {
                        rows: into_key_values(rows),
                    }
                }
                Request::Put { key, value } => {
                    let record = state.txns.entry(meta.id).or_default();
                    record.writes.insert(key, Some(value));
                    Response::Put
                }
                Request::Delete { key } => {
                    let record = state.txns.entry(meta.id).or_default();
                    record.writes.insert(key, None);
                    Response::Delete
                }
                Request::EndTxn { commit: false, .. } => {
                    state.txns.remove(&meta.id);
                    debug!(txn_id = %meta.id, "aborted txn");
                    Response::EndTxn {
                        status: TransactionStatus::Aborted,
                        commit_timestamp: None,
                    }
                }
                Request::EndTxn {
                    commit: true,
                    deadline,
                } => {
                    let commit_ts = self.clock.now();
                    Self::validate_commit(&state, &meta, deadline, commit_ts)?;

                    let record = state.txns.remove(&meta.id).unwrap_or_default();
                    let num_writes = record.writes.len();
                    for (key, value) in record.writes {
                        state.apply_write(key, value, commit_ts);
                    }
                    debug!(txn_id = %meta.id, %commit_ts, num_writes, "committed txn");

                    Response::EndTxn {
                        status: TransactionStatus::Committed,
                        commit_timestamp: Some(commit_ts),
                    }
                }
            };
            responses.push(resp);
        }

        Ok(BatchResponse { responses })
    }

    fn validate_commit(
        state: &LocalState,
        meta: &TxnMeta,
        deadline: Option<Timestamp>,
        commit_ts: Timestamp,
    ) -> Result<()> {
        if let Some(deadline) = deadline {
            if commit_ts >= deadline {
                return Err(KvError::TxnDeadlineExceeded {
                    deadline,
                    commit_ts,
                });
            }
        }

        let record = match state.txns.get(&meta.id) {
            Some(record) => record,
            None => return Ok(()),
        };

        for key in record.writes.keys() {
            if let Some(ts) = state.latest_commit(key) {
                if ts > meta.read_timestamp {
                    return Err(KvError::TransactionRetry {
                        reason: RetryReason::WriteTooOld,
                        msg: format!(
                            "key {key:?} written at {ts}, after read timestamp {}",
                            meta.read_timestamp
                        ),
                    });
                }
            }
        }

        if meta.isolation == IsolationLevel::Serializable {
            for key in &record.reads {
                if let Some(ts) = state.latest_commit(key) {
                    if ts > meta.read_timestamp {
                        return Err(KvError::TransactionRetry {
                            reason: RetryReason::SerializableReadConflict,
                            msg: format!("read key {key:?} modified at {ts}"),
                        });
                    }
                }
            }
            for (start, end) in &record.scans {
                if state.span_modified_after(start, end, meta.read_timestamp) {
                    return Err(KvError::TransactionRetry {
                        reason: RetryReason::SerializableReadConflict,
                        msg: format!("scanned span [{start:?}, {end:?}) modified"),
                    });
                }
            }
        }

        Ok(())
    }
}

fn into_key_values(rows: BTreeMap<Bytes, Bytes>) -> Vec<KeyValue> {
    rows.into_iter()
        .map(|(key, value)| KeyValue { key, value })
        .collect()
}

#[async_trait]
impl Sender for LocalSender {
    async fn send(&self, ba: BatchRequest) -> Result<BatchResponse> {
        trace!(batch = %ba, "local send");
        match ba.header.txn {
            Some(meta) => self.send_txn(meta, ba.requests),
            None => self.send_non_txn(ba.requests),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::UserPriority;
    use crate::txn::Txn;

    fn setup() -> (Arc<LocalSender>, Arc<Clock>) {
        let clock = Arc::new(Clock::new());
        (Arc::new(LocalSender::new(clock.clone())), clock)
    }

    fn txn(sender: &Arc<LocalSender>, clock: &Arc<Clock>, isolation: IsolationLevel) -> Txn {
        Txn::new_root(
            sender.clone(),
            clock.clone(),
            UserPriority::Normal,
            isolation,
        )
    }

    async fn non_txn_put(sender: &LocalSender, key: &'static str, value: &'static str) {
        sender
            .send(BatchRequest {
                header: Default::default(),
                requests: vec![Request::Put {
                    key: key.into(),
                    value: value.into(),
                }],
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn snapshot_reads() {
        let (sender, clock) = setup();
        non_txn_put(&sender, "a", "1").await;

        let t1 = txn(&sender, &clock, IsolationLevel::Snapshot);
        non_txn_put(&sender, "a", "2").await;

        // Reads at the txn's read timestamp.
        assert_eq!(Some(Bytes::from("1")), t1.get("a").await.unwrap());

        let t2 = txn(&sender, &clock, IsolationLevel::Snapshot);
        assert_eq!(Some(Bytes::from("2")), t2.get("a").await.unwrap());
    }

    #[tokio::test]
    async fn own_writes_overlay_scan() {
        let (sender, clock) = setup();
        non_txn_put(&sender, "/t/a", "1").await;
        non_txn_put(&sender, "/t/b", "2").await;
        non_txn_put(&sender, "/u/a", "3").await;

        let t = txn(&sender, &clock, IsolationLevel::Serializable);
        t.del("/t/a").await.unwrap();
        t.put("/t/c", "4").await.unwrap();

        let rows = t.scan("/t/", "/t0").await.unwrap();
        let keys: Vec<_> = rows.iter().map(|kv| kv.key.clone()).collect();
        assert_eq!(vec![Bytes::from("/t/b"), Bytes::from("/t/c")], keys);

        t.commit().await.unwrap();
        assert_eq!(0, sender.num_open_txns());
    }

    #[tokio::test]
    async fn write_too_old() {
        let (sender, clock) = setup();
        let t = txn(&sender, &clock, IsolationLevel::Snapshot);
        t.put("a", "txn").await.unwrap();
        non_txn_put(&sender, "a", "other").await;

        let err = t.commit().await.unwrap_err();
        assert!(
            matches!(
                err,
                KvError::TransactionRetry {
                    reason: RetryReason::WriteTooOld,
                    ..
                }
            ),
            "{err}"
        );
    }

    #[tokio::test]
    async fn serializable_read_conflict() {
        let (sender, clock) = setup();
        let t = txn(&sender, &clock, IsolationLevel::Serializable);
        t.get("a").await.unwrap();
        t.put("b", "1").await.unwrap();
        non_txn_put(&sender, "a", "other").await;

        let err = t.commit().await.unwrap_err();
        assert!(
            matches!(
                err,
                KvError::TransactionRetry {
                    reason: RetryReason::SerializableReadConflict,
                    ..
                }
            ),
            "{err}"
        );
    }

    #[tokio::test]
    async fn snapshot_skips_read_validation() {
        let (sender, clock) = setup();
        let t = txn(&sender, &clock, IsolationLevel::Snapshot);
        t.scan("a", "z").await.unwrap();
        t.put("b", "1").await.unwrap();
        non_txn_put(&sender, "c", "other").await;

        t.commit().await.unwrap();
    }

    #[tokio::test]
    async fn serializable_scan_conflict() {
        let (sender, clock) = setup();
        let t = txn(&sender, &clock, IsolationLevel::Serializable);
        t.scan("a", "z").await.unwrap();
        t.put("zz", "1").await.unwrap();
        non_txn_put(&sender, "c", "other").await;

        t.commit().await.unwrap_err();
    }

    #[tokio::test]
    async fn end_txn_requires_txn() {
        let (sender, _) = setup();
        let err = sender
            .send(BatchRequest {
                header: Default::default(),
                requests: vec![Request::EndTxn {
                    commit: true,
                    deadline: None,
                }],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, KvError::InvalidTxnOperation(_)), "{err}");
    }
}
