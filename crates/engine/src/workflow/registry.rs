use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock as StdRwLock};

use tokio::sync::{Mutex, RwLock};

use super::instance::{InstanceSnapshot, WorkflowId, WorkflowInstance};

/// Registry slot for one instance.
///
/// `instance` is the per-instance exclusive section: whoever drives the
/// instance holds this lock for the whole run. `summary` is refreshed at the
/// start and end of every run so status reads never wait on a busy instance.
/// `rechecks` holds recipients whose events arrived while the instance was
/// busy; the holder of the lock drains it before letting go.
pub struct InstanceHandle {
    pub instance: Arc<Mutex<WorkflowInstance>>,
    summary: StdRwLock<InstanceSnapshot>,
    rechecks: StdMutex<HashSet<String>>,
}

impl InstanceHandle {
    fn new(instance: WorkflowInstance) -> Self {
        let summary = StdRwLock::new(instance.snapshot());
        Self {
            instance: Arc::new(Mutex::new(instance)),
            summary,
            rechecks: StdMutex::new(HashSet::new()),
        }
    }

    pub fn publish(&self, instance: &WorkflowInstance) {
        *self.summary.write().unwrap_or_else(PoisonError::into_inner) = instance.snapshot();
    }

    pub fn summary(&self) -> InstanceSnapshot {
        self.summary
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Queue a recipient for the next lock holder to look at. Returns true
    /// when the queue was empty, i.e. nobody is going to drain it yet.
    pub fn defer_recheck(&self, recipient: String) -> bool {
        let mut rechecks = self.rechecks.lock().unwrap_or_else(PoisonError::into_inner);
        let was_empty = rechecks.is_empty();
        rechecks.insert(recipient);
        was_empty
    }

    pub fn take_rechecks(&self) -> HashSet<String> {
        std::mem::take(&mut *self.rechecks.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn pending_rechecks(&self) -> usize {
        self.rechecks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// In-memory map of every instance created by this process.
#[derive(Default)]
pub struct Registry {
    instances: RwLock<HashMap<WorkflowId, Arc<InstanceHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, instance: WorkflowInstance) -> Arc<InstanceHandle> {
        let id = instance.id;
        let handle = Arc::new(InstanceHandle::new(instance));
        self.instances.write().await.insert(id, handle.clone());
        handle
    }

    pub async fn get(&self, id: WorkflowId) -> Option<Arc<InstanceHandle>> {
        self.instances.read().await.get(&id).cloned()
    }

    /// All handles in creation order.
    pub async fn handles(&self) -> Vec<(WorkflowId, Arc<InstanceHandle>)> {
        let mut handles: Vec<_> = self
            .instances
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();
        handles.sort_by_key(|(id, _)| *id);
        handles
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
