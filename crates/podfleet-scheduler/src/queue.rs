//! Request queue — per-workflow FIFO of pending request ids.
//!
//! Requests themselves live in the [`RequestStore`]; the queue only orders
//! ids. Names are normalized with [`workflow_key`] so `"Flux"` and `"flux"`
//! share one queue.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use podfleet_state::{RequestId, RequestStore, WorkflowRequest, workflow_key};

pub struct RequestQueue {
    store: RequestStore,
    queues: RwLock<HashMap<String, VecDeque<RequestId>>>,
}

impl RequestQueue {
    pub fn new(store: RequestStore) -> Self {
        Self {
            store,
            queues: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new pending request and append it to its workflow's queue.
    pub async fn enqueue(&self, workflow_name: &str, parameters: Value, now: u64) -> RequestId {
        let request = WorkflowRequest::new(workflow_name, parameters, now);
        let id = request.id;
        let key = request.workflow_name.clone();
        self.store.put(request);

        let mut queues = self.queues.write().await;
        let queue = queues.entry(key.clone()).or_default();
        queue.push_back(id);
        debug!(%id, workflow = %key, depth = queue.len(), "request enqueued");
        id
    }

    /// Pop up to `n` ids from the head of a workflow's queue.
    pub async fn take(&self, workflow_name: &str, n: usize) -> Vec<RequestId> {
        let key = workflow_key(workflow_name);
        let mut queues = self.queues.write().await;
        let Some(queue) = queues.get_mut(&key) else {
            return Vec::new();
        };
        let count = n.min(queue.len());
        let taken: Vec<RequestId> = queue.drain(..count).collect();
        if queue.is_empty() {
            queues.remove(&key);
        }
        taken
    }

    /// Put ids back at the head of the queue, keeping their relative order.
    /// Ids that are already queued stay where they are.
    pub async fn requeue_front(&self, workflow_name: &str, ids: &[RequestId]) {
        if ids.is_empty() {
            return;
        }
        let key = workflow_key(workflow_name);
        let mut queues = self.queues.write().await;
        let queue = queues.entry(key.clone()).or_default();
        let mut returned = 0;
        for id in ids.iter().rev() {
            if !queue.contains(id) {
                queue.push_front(*id);
                returned += 1;
            }
        }
        if queue.is_empty() {
            queues.remove(&key);
        }
        debug!(workflow = %key, count = returned, "requests returned to queue head");
    }

    /// Queued ids for a workflow, head first.
    pub async fn pending_ids(&self, workflow_name: &str) -> Vec<RequestId> {
        let queues = self.queues.read().await;
        queues
            .get(&workflow_key(workflow_name))
            .map(|q| q.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Workflows that currently have pending requests, in name order.
    pub async fn workflows_with_pending(&self) -> Vec<String> {
        let queues = self.queues.read().await;
        let mut names: Vec<String> = queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub async fn pending_by_workflow(&self) -> BTreeMap<String, usize> {
        let queues = self.queues.read().await;
        queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(name, q)| (name.clone(), q.len()))
            .collect()
    }
}
