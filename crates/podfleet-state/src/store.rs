//! RequestStore — in-memory registry of workflow requests.
//!
//! Every request lives here from enqueue until process exit, so callers can
//! observe its status by id. Queues and pods only hold request ids. Writes
//! that would change a request that already reached a terminal status are
//! ignored.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::types::*;

/// Thread-safe request registry.
#[derive(Clone, Default)]
pub struct RequestStore {
    requests: Arc<RwLock<HashMap<RequestId, WorkflowRequest>>>,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a request.
    pub fn put(&self, request: WorkflowRequest) {
        let id = request.id;
        self.requests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, request);
        debug!(%id, "request stored");
    }

    /// Get a copy of a request by id.
    pub fn get(&self, id: &RequestId) -> Option<WorkflowRequest> {
        self.requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Apply `f` to a non-terminal request and return the updated copy.
    ///
    /// Returns `None` if the request does not exist or is already terminal.
    pub fn update<F>(&self, id: &RequestId, f: F) -> Option<WorkflowRequest>
    where
        F: FnOnce(&mut WorkflowRequest),
    {
        let mut requests = self
            .requests
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let request = requests.get_mut(id)?;
        if request.status.is_terminal() {
            debug!(%id, status = ?request.status, "ignoring update to terminal request");
            return None;
        }
        f(request);
        Some(request.clone())
    }

    /// Pending and processing requests, oldest first.
    pub fn unfinished(&self) -> Vec<WorkflowRequest> {
        let mut unfinished: Vec<WorkflowRequest> = self
            .requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect();
        unfinished.sort_by_key(|r| r.enqueued_at);
        unfinished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_and_get() {
        let store = RequestStore::new();
        let req = WorkflowRequest::new("w1", json!({"steps": 20}), 1000);
        let id = req.id;
        store.put(req.clone());

        assert_eq!(store.get(&id), Some(req));
    }

    #[test]
    fn get_missing_returns_none() {
        let store = RequestStore::new();
        assert!(store.get(&uuid::Uuid::new_v4()).is_none());
    }

    #[test]
    fn update_returns_modified_copy() {
        let store = RequestStore::new();
        let req = WorkflowRequest::new("w1", json!({}), 1000);
        let id = req.id;
        store.put(req);

        let updated = store.update(&id, |r| r.mark_processing("pod-1")).unwrap();
        assert_eq!(updated.status, RequestStatus::Processing);
        assert_eq!(store.get(&id).unwrap().status, RequestStatus::Processing);
    }

    #[test]
    fn terminal_requests_are_not_updated() {
        let store = RequestStore::new();
        let mut req = WorkflowRequest::new("w1", json!({}), 1000);
        req.mark_completed(json!({"assets": []}), 1010);
        let id = req.id;
        store.put(req);

        let result = store.update(&id, |r| r.mark_failed(FailureKind::Timeout, "late", 1020));
        assert!(result.is_none());
        assert_eq!(store.get(&id).unwrap().status, RequestStatus::Completed);
    }

    #[test]
    fn reads_do_not_mutate() {
        let store = RequestStore::new();
        let req = WorkflowRequest::new("w1", json!({}), 1000);
        let id = req.id;
        store.put(req.clone());

        let _ = store.get(&id);
        assert_eq!(store.get(&id), Some(req));
    }

    #[test]
    fn unfinished_skips_terminal_and_orders_by_age() {
        let store = RequestStore::new();
        let newer = WorkflowRequest::new("w1", json!({}), 2000);
        let mut older = WorkflowRequest::new("w1", json!({}), 1000);
        older.mark_processing("pod-1");
        let mut done = WorkflowRequest::new("w1", json!({}), 500);
        done.mark_completed(json!({}), 600);
        store.put(newer.clone());
        store.put(older.clone());
        store.put(done);

        let ids: Vec<RequestId> = store.unfinished().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![older.id, newer.id]);
    }
}
