use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::{
    metrics::{EVENTS_RECEIVED_TOTAL, WORKFLOWS_SUBMITTED_TOTAL, WORKFLOW_FAILURES_TOTAL},
    workflow::{
        condition::Condition,
        events::{EventKind, EventState},
        executor::{StepExecutor, StepOutcome},
        instance::{
            Attachment, InstanceSnapshot, SenderIdentity, WaitingOn, WorkflowId, WorkflowInstance,
        },
        registry::{InstanceHandle, Registry},
        state::ExecutionState,
        step::Step,
    },
    Error, Result,
};

/// Why a suspended instance is being woken.
#[derive(Debug)]
enum WakeReason {
    TimerElapsed,
    /// Every path of a split finished; `Ok(true)` when one of them stopped.
    SplitJoined(Result<bool>),
}

/// Continuation for a suspended instance.
#[derive(Debug)]
struct Wakeup {
    id: WorkflowId,
    /// Cursor of the step that suspended the instance.
    cursor: usize,
    /// `WorkflowInstance::suspensions` at the time it suspended.
    seq: u64,
    reason: WakeReason,
}

/// Result of reporting an engagement event.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReport {
    /// False when the flag was already set; duplicates resume nothing.
    pub newly_recorded: bool,
    pub resumed: Vec<WorkflowId>,
}

/// Drives workflow instances from submission to suspension or termination.
pub struct Engine {
    registry: Registry,
    executor: Arc<StepExecutor>,
    next_id: AtomicU64,
    wake_tx: mpsc::UnboundedSender<Wakeup>,
    wake_rx: Arc<RwLock<mpsc::UnboundedReceiver<Wakeup>>>,
}

impl Engine {
    pub fn new(executor: Arc<StepExecutor>) -> Self {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();

        Self {
            registry: Registry::new(),
            executor,
            next_id: AtomicU64::new(1),
            wake_tx,
            wake_rx: Arc::new(RwLock::new(wake_rx)),
        }
    }

    pub fn events(&self) -> &Arc<EventState> {
        self.executor.events()
    }

    pub async fn start(self: Arc<Self>) {
        info!("Starting workflow engine");

        // Start the wakeup loop for timers and split fan-in
        let engine = self.clone();
        tokio::spawn(async move {
            engine.wakeup_loop().await;
        });
    }

    async fn wakeup_loop(self: Arc<Self>) {
        let mut rx = self.wake_rx.write().await;

        while let Some(wakeup) = rx.recv().await {
            let engine = self.clone();
            tokio::spawn(async move {
                engine.handle_wakeup(wakeup).await;
            });
        }
    }

    async fn handle_wakeup(&self, wakeup: Wakeup) {
        let Some(handle) = self.registry.get(wakeup.id).await else {
            warn!("Wakeup for unknown workflow {}", wakeup.id);
            return;
        };
        let mut instance = handle.instance.lock().await;

        if instance.state != ExecutionState::Suspended
            || instance.cursor != wakeup.cursor
            || instance.suspensions != wakeup.seq
        {
            debug!("Ignoring stale wakeup for workflow {}", wakeup.id);
            return;
        }

        match wakeup.reason {
            WakeReason::TimerElapsed => {
                debug!("Time break over, resuming workflow {}", wakeup.id);
                instance.cursor += 1;
            }
            WakeReason::SplitJoined(Ok(true)) => {
                info!("A split path stopped workflow {}", wakeup.id);
                instance.stopped = true;
            }
            WakeReason::SplitJoined(Ok(false)) => {
                debug!("All split paths of workflow {} finished", wakeup.id);
                instance.cursor += 1;
            }
            WakeReason::SplitJoined(Err(e)) => {
                self.fail(&mut instance, e);
                handle.publish(&instance);
                return;
            }
        }

        if let Err(e) = self.run_locked(&handle, &mut instance).await {
            error!("Workflow {} failed after resuming: {}", wakeup.id, e);
        }
    }

    /// Create an Idle instance without running it.
    pub async fn register(
        &self,
        sender: SenderIdentity,
        steps: Vec<Step>,
        attachments: Vec<Attachment>,
    ) -> WorkflowId {
        let id = WorkflowId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let instance = WorkflowInstance::new(id, sender, steps, attachments);
        self.registry.insert(instance).await;

        WORKFLOWS_SUBMITTED_TOTAL.inc();
        info!("Registered workflow {}", id);
        id
    }

    /// Register and immediately run a workflow. The id is returned even
    /// when the first run fails, so the caller can report or retry it.
    pub async fn submit(
        &self,
        sender: SenderIdentity,
        steps: Vec<Step>,
        attachments: Vec<Attachment>,
    ) -> (WorkflowId, Result<ExecutionState>) {
        let id = self.register(sender, steps, attachments).await;
        let result = self.run_to_suspension(id).await;
        (id, result)
    }

    /// Run an instance until it suspends, parks or terminates.
    ///
    /// Only Idle, Failed and Parked instances are driven. A suspended
    /// instance belongs to its timer or split and terminal ones never run
    /// again, so for those this just reports the current state.
    pub async fn run_to_suspension(&self, id: WorkflowId) -> Result<ExecutionState> {
        let handle = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("workflow {}", id)))?;
        let mut instance = handle.instance.lock().await;

        match instance.state {
            ExecutionState::Idle | ExecutionState::Failed | ExecutionState::Parked => {
                self.run_locked(&handle, &mut instance).await
            }
            state => {
                debug!("Workflow {} is {}, not running it", id, state);
                Ok(state)
            }
        }
    }

    /// Record an engagement event and resume every instance parked on it.
    pub async fn report_event(self: &Arc<Self>, recipient: &str, kind: EventKind) -> EventReport {
        EVENTS_RECEIVED_TOTAL
            .with_label_values(&[kind.to_string().as_str()])
            .inc();

        if !self.events().record(recipient, kind) {
            debug!("Duplicate {} event for {}", kind, recipient);
            return EventReport::default();
        }
        info!("Recorded {} event for {}", kind, recipient);

        let recipient = EventState::normalize(recipient);
        let mut ready = Vec::new();
        for (id, handle) in self.registry.handles().await {
            match handle.instance.clone().try_lock_owned() {
                Ok(instance) => {
                    if waits_for(&instance, &recipient) {
                        ready.push((id, handle, instance));
                    }
                }
                Err(_) => {
                    // Busy instances may park on this event after we looked;
                    // check again once the current run lets go.
                    if handle.defer_recheck(recipient.clone()) {
                        self.spawn_recheck(id, handle);
                    }
                }
            }
        }

        let resumed = join_all(ready.into_iter().map(|(id, handle, mut instance)| async move {
            info!("Resuming workflow {} on {} event", id, kind);
            if let Err(e) = self.run_locked(&handle, &mut instance).await {
                error!("Workflow {} failed after resuming: {}", id, e);
            }
            id
        }))
        .await;

        EventReport {
            newly_recorded: true,
            resumed,
        }
    }

    /// Wait for the lock once on behalf of every recipient deferred so far.
    fn spawn_recheck(self: &Arc<Self>, id: WorkflowId, handle: Arc<InstanceHandle>) {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut instance = handle.instance.clone().lock_owned().await;
            let rechecks = handle.take_rechecks();
            if rechecks.iter().any(|r| waits_for(&instance, r)) {
                info!("Resuming workflow {} on deferred event", id);
                if let Err(e) = engine.run_locked(&handle, &mut instance).await {
                    error!("Workflow {} failed after resuming: {}", id, e);
                }
            }
        });
    }

    pub async fn snapshot(&self, id: WorkflowId) -> Option<InstanceSnapshot> {
        self.registry.get(id).await.map(|handle| handle.summary())
    }

    pub async fn workflow_count(&self) -> usize {
        self.registry.len().await
    }

    /// The scheduler loop. Caller holds the instance lock.
    async fn run_locked(
        &self,
        handle: &InstanceHandle,
        instance: &mut WorkflowInstance,
    ) -> Result<ExecutionState> {
        instance.waiting_on = None;
        instance.last_error = None;
        instance.state = ExecutionState::Running;
        handle.publish(instance);

        let result = self.drive(instance).await;
        handle.publish(instance);
        result
    }

    async fn drive(&self, instance: &mut WorkflowInstance) -> Result<ExecutionState> {
        let budget = self.executor.options().max_steps_per_run;
        let mut executed = 0usize;

        loop {
            debug_assert!(
                instance.cursor <= instance.steps.len(),
                "cursor {} out of bounds for {} steps",
                instance.cursor,
                instance.steps.len()
            );

            if instance.stopped {
                info!("Workflow {} stopped", instance.id);
                instance.state = ExecutionState::Stopped;
                return Ok(instance.state);
            }
            if instance.is_exhausted() {
                info!("Workflow {} completed all steps", instance.id);
                instance.state = ExecutionState::Exhausted;
                return Ok(instance.state);
            }
            if executed >= budget {
                let err = Error::StepLimit(format!(
                    "workflow {} ran {} steps without suspending",
                    instance.id, executed
                ));
                return Err(self.fail(instance, err));
            }
            executed += 1;

            let outcome = match self.executor.execute(instance).await {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.fail(instance, e)),
            };

            match outcome {
                StepOutcome::Advance => instance.cursor += 1,
                StepOutcome::AdvanceToIndex(next) => instance.cursor = next,
                StepOutcome::Suspend(ms) => {
                    info!("Workflow {} sleeping for {}ms", instance.id, ms);
                    instance.state = ExecutionState::Suspended;
                    instance.suspensions += 1;
                    self.arm_timer(instance, ms);
                    return Ok(instance.state);
                }
                StepOutcome::Fork(paths) => {
                    let children: Vec<_> = paths.into_iter().map(|p| instance.fork(p)).collect();
                    info!(
                        "Workflow {} waiting on {} split path(s)",
                        instance.id,
                        children.len()
                    );
                    instance.state = ExecutionState::Suspended;
                    instance.suspensions += 1;
                    self.join_split(instance, children);
                    return Ok(instance.state);
                }
                StepOutcome::ParkOn { recipient, kind } => {
                    info!(
                        "Workflow {} waiting for {} event from {}",
                        instance.id, kind, recipient
                    );
                    instance.waiting_on = Some(WaitingOn { recipient, kind });
                    instance.state = ExecutionState::Parked;
                    return Ok(instance.state);
                }
                StepOutcome::Stopped => {}
            }
        }
    }

    fn fail(&self, instance: &mut WorkflowInstance, err: Error) -> Error {
        WORKFLOW_FAILURES_TOTAL.inc();
        error!(
            "Workflow {} failed at step {}: {}",
            instance.id, instance.cursor, err
        );

        // A condition that cannot be evaluated will never succeed on retry.
        if matches!(err, Error::ConditionEval(_)) {
            instance.stopped = true;
            instance.state = ExecutionState::Stopped;
        } else {
            instance.state = ExecutionState::Failed;
        }
        instance.last_error = Some(err.to_string());
        err
    }

    fn arm_timer(&self, instance: &WorkflowInstance, ms: u64) {
        let (id, cursor, seq) = (instance.id, instance.cursor, instance.suspensions);
        let tx = self.wake_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            let wakeup = Wakeup {
                id,
                cursor,
                seq,
                reason: WakeReason::TimerElapsed,
            };
            if tx.send(wakeup).is_err() {
                debug!("Engine gone, dropping timer for workflow {}", id);
            }
        });
    }

    /// Run split paths outside the instance lock and report back through the
    /// wakeup loop.
    fn join_split(&self, instance: &WorkflowInstance, children: Vec<WorkflowInstance>) {
        let (id, cursor, seq) = (instance.id, instance.cursor, instance.suspensions);
        let executor = self.executor.clone();
        let tx = self.wake_tx.clone();
        tokio::spawn(async move {
            let result = executor.join_paths(children).await;
            let wakeup = Wakeup {
                id,
                cursor,
                seq,
                reason: WakeReason::SplitJoined(result),
            };
            if tx.send(wakeup).is_err() {
                debug!("Engine gone, dropping split result for workflow {}", id);
            }
        });
    }
}

/// Whether a parked instance could be decided by an event for `recipient`.
fn waits_for(instance: &WorkflowInstance, recipient: &str) -> bool {
    if instance.state != ExecutionState::Parked {
        return false;
    }
    if instance
        .waiting_on
        .as_ref()
        .is_some_and(|w| EventState::normalize(&w.recipient) == recipient)
    {
        return true;
    }
    match instance.current_step() {
        Some(Step::Conditional { condition_expr, .. }) => Condition::parse(condition_expr)
            .map(|c| c.recipients().iter().any(|r| r == recipient))
            .unwrap_or(false),
        _ => false,
    }
}
