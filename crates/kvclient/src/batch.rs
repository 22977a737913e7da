use bytes::Bytes;

use crate::api::{KeyValue, Request, Response};
use crate::errors::{Result, internal};

/// A set of requests to run together.
///
/// Results are available after the batch is run through either
/// [`Txn::run`](crate::Txn::run) or [`DB::run`](crate::DB::run).
#[derive(Debug, Default)]
pub struct Batch {
    requests: Vec<Request>,
    results: Vec<Response>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, key: impl Into<Bytes>) -> &mut Self {
        self.requests.push(Request::Get { key: key.into() });
        self
    }

    pub fn put(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> &mut Self {
        self.requests.push(Request::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn del(&mut self, key: impl Into<Bytes>) -> &mut Self {
        self.requests.push(Request::Delete { key: key.into() });
        self
    }

    pub fn scan(&mut self, start: impl Into<Bytes>, end: impl Into<Bytes>) -> &mut Self {
        self.requests.push(Request::Scan {
            start: start.into(),
            end: end.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn results(&self) -> &[Response] {
        &self.results
    }

    /// Value read by the get at `idx`.
    pub fn get_result(&self, idx: usize) -> Result<Option<&Bytes>> {
        match self.results.get(idx) {
            Some(Response::Get { value }) => Ok(value.as_ref()),
            other => Err(internal!("expected get response at {idx}, got {other:?}")),
        }
    }

    /// Rows read by the scan at `idx`.
    pub fn scan_result(&self, idx: usize) -> Result<&[KeyValue]> {
        match self.results.get(idx) {
            Some(Response::Scan { rows }) => Ok(rows),
            other => Err(internal!("expected scan response at {idx}, got {other:?}")),
        }
    }

    pub(crate) fn take_requests(&mut self) -> Vec<Request> {
        self.results.clear();
        std::mem::take(&mut self.requests)
    }

    pub(crate) fn fill_results(&mut self, responses: Vec<Response>) {
        self.results = responses;
    }
}
