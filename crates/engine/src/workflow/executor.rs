use std::sync::Arc;
use std::time::Duration;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use tracing::{debug, info};

use crate::{
    config::{ExecutionConfig, GotoMode, SplitMode},
    metrics::{EMAILS_SENT_TOTAL, STEPS_EXECUTED_TOTAL},
    store::ContactStore,
    template::TemplateLoader,
    transport::{Messenger, OutboundEmail, Transport},
    workflow::{
        condition::{self, Decision},
        events::{EventKind, EventState},
        instance::{WaitingOn, WorkflowInstance},
        step::Step,
    },
    Error, Result,
};

/// What the scheduler should do after a step ran.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Advance,
    AdvanceToIndex(usize),
    Suspend(u64),
    Stopped,
    ParkOn { recipient: String, kind: EventKind },
    /// Run these sub-paths, then continue once all of them are done.
    Fork(Vec<Vec<Step>>),
}

/// External services steps delegate to.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub messenger: Arc<dyn Messenger>,
    pub contacts: Arc<dyn ContactStore>,
    pub templates: Arc<dyn TemplateLoader>,
}

pub struct StepExecutor {
    collaborators: Collaborators,
    events: Arc<EventState>,
    options: ExecutionConfig,
}

impl StepExecutor {
    pub fn new(collaborators: Collaborators, events: Arc<EventState>, options: ExecutionConfig) -> Self {
        Self {
            collaborators,
            events,
            options,
        }
    }

    pub fn events(&self) -> &Arc<EventState> {
        &self.events
    }

    pub fn options(&self) -> &ExecutionConfig {
        &self.options
    }

    /// Execute the step at `instance.cursor`.
    ///
    /// The cursor is never moved here; `steps` and `stopped` are only touched
    /// once every delegate call of the step has succeeded.
    pub async fn execute(&self, instance: &mut WorkflowInstance) -> Result<StepOutcome> {
        let step = instance.current_step().cloned().ok_or_else(|| {
            Error::Internal(format!(
                "cursor {} is past the last step of workflow {}",
                instance.cursor, instance.id
            ))
        })?;

        STEPS_EXECUTED_TOTAL
            .with_label_values(&[step.type_name()])
            .inc();
        debug!(
            "Workflow {} executing step {} ({})",
            instance.id,
            instance.cursor,
            step.type_name()
        );

        match step {
            Step::Email {
                to,
                subject,
                body,
                template_ref,
            } => {
                self.execute_email(instance, to, subject, body, template_ref)
                    .await
            }
            Step::TimeBreak { duration_ms } => Ok(StepOutcome::Suspend(duration_ms)),
            Step::Conditional {
                condition_expr,
                true_path,
                false_path,
            } => match condition::evaluate(&condition_expr, &self.events)? {
                Decision::Decided(taken) => {
                    let path = if taken { true_path } else { false_path };
                    debug!(
                        "Workflow {} condition '{}' is {}, inserting {} step(s)",
                        instance.id,
                        condition_expr,
                        taken,
                        path.len()
                    );
                    instance.splice_after_cursor(path);
                    Ok(StepOutcome::Advance)
                }
                Decision::Pending { recipient, kind } => {
                    Ok(StepOutcome::ParkOn { recipient, kind })
                }
            },
            Step::Split { paths } => {
                info!(
                    "Workflow {} splitting into {} path(s) ({:?})",
                    instance.id,
                    paths.len(),
                    self.options.split_mode
                );
                Ok(StepOutcome::Fork(paths))
            }
            Step::Goto { target_index } => self.execute_goto(instance, target_index),
            Step::Stop {} => {
                info!("Stop step reached, halting workflow {}", instance.id);
                instance.stopped = true;
                Ok(StepOutcome::Stopped)
            }
            Step::Messenger { message } => {
                let reports = self.collaborators.messenger.broadcast(&message).await?;
                let failed = reports.iter().filter(|r| !r.is_delivered()).count();
                info!(
                    "Workflow {} broadcast reached {} of {} messenger user(s)",
                    instance.id,
                    reports.len() - failed,
                    reports.len()
                );
                Ok(StepOutcome::Advance)
            }
            Step::CreateContact { fields } => {
                let contact = self
                    .collaborators
                    .contacts
                    .upsert(fields, Some(instance.id.to_string()))
                    .await?;
                info!("Workflow {} saved contact {}", instance.id, contact.email);
                Ok(StepOutcome::Advance)
            }
            Step::DeleteContact {} => {
                let removed = self
                    .collaborators
                    .contacts
                    .delete_by_workflow(&instance.id.to_string())
                    .await?;
                info!("Workflow {} deleted {} contact(s)", instance.id, removed);
                instance.stopped = true;
                Ok(StepOutcome::Stopped)
            }
            Step::FindContact { criteria } => {
                match self.collaborators.contacts.find(&criteria).await? {
                    Some(contact) => {
                        debug!("Workflow {} found contact {}", instance.id, contact.email);
                        Ok(StepOutcome::Advance)
                    }
                    None => {
                        info!("No contact matched, halting workflow {}", instance.id);
                        instance.stopped = true;
                        Ok(StepOutcome::Stopped)
                    }
                }
            }
            Step::UpdateContact {
                find_criteria,
                update_data,
            } => {
                match self
                    .collaborators
                    .contacts
                    .update(&find_criteria, &update_data)
                    .await?
                {
                    Some(contact) => {
                        info!("Workflow {} updated contact {}", instance.id, contact.email);
                        Ok(StepOutcome::Advance)
                    }
                    None => {
                        info!("No contact to update, halting workflow {}", instance.id);
                        instance.stopped = true;
                        Ok(StepOutcome::Stopped)
                    }
                }
            }
        }
    }

    async fn execute_email(
        &self,
        instance: &WorkflowInstance,
        to: String,
        subject: String,
        body: Option<String>,
        template_ref: Option<String>,
    ) -> Result<StepOutcome> {
        let html_body = match template_ref.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(name) => self.collaborators.templates.load(name).await?,
            None => body.unwrap_or_default(),
        };
        if html_body.trim().is_empty() {
            return Err(Error::InvalidStep(format!(
                "email to {} has neither a template nor a body",
                to
            )));
        }

        let message = OutboundEmail {
            from: instance.sender.mailbox(),
            to: to.clone(),
            subject,
            html_body,
            tracking_enabled: true,
            attachments: instance.attachments.clone(),
        };
        self.collaborators.transport.send_email(message).await?;

        EMAILS_SENT_TOTAL.inc();
        info!("Workflow {} sent email to {}", instance.id, to);
        Ok(StepOutcome::Advance)
    }

    fn execute_goto(&self, instance: &WorkflowInstance, target_index: usize) -> Result<StepOutcome> {
        let next = match self.options.goto_mode {
            GotoMode::Absolute => target_index,
            GotoMode::PostIncrement => target_index + 1,
        };
        if next > instance.steps.len() {
            return Err(Error::InvalidTarget(format!(
                "goto {} is beyond the {} step(s) of workflow {}",
                target_index,
                instance.steps.len(),
                instance.id
            )));
        }
        debug!("Workflow {} jumping to step {}", instance.id, next);
        Ok(StepOutcome::AdvanceToIndex(next))
    }

    /// Run forked sub-paths to completion and report whether any of them
    /// stopped. The first failing path fails the whole split.
    pub async fn join_paths(&self, children: Vec<WorkflowInstance>) -> Result<bool> {
        let finished = match self.options.split_mode {
            SplitMode::Concurrent => {
                try_join_all(children.into_iter().map(|child| self.run_path(child))).await?
            }
            SplitMode::Sequential => {
                let mut finished = Vec::with_capacity(children.len());
                for child in children {
                    let child = self.run_path(child).await?;
                    let stopped = child.stopped;
                    finished.push(child);
                    if stopped {
                        break;
                    }
                }
                finished
            }
        };

        Ok(finished.iter().any(|child| child.stopped))
    }

    /// Drive one split sub-path to completion, waiting in place on time
    /// breaks and undecided conditions. Never called with an instance lock
    /// held.
    fn run_path(&self, mut child: WorkflowInstance) -> BoxFuture<'_, Result<WorkflowInstance>> {
        async move {
            let mut changes = self.events.subscribe();
            let mut executed = 0usize;

            loop {
                if child.stopped || child.is_exhausted() {
                    return Ok(child);
                }
                if executed >= self.options.max_steps_per_run {
                    return Err(Error::StepLimit(format!(
                        "split path of workflow {} ran {} steps without finishing",
                        child.id, executed
                    )));
                }

                match self.execute(&mut child).await? {
                    StepOutcome::Advance => child.cursor += 1,
                    StepOutcome::AdvanceToIndex(next) => child.cursor = next,
                    StepOutcome::Suspend(ms) => {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        child.cursor += 1;
                    }
                    StepOutcome::ParkOn { recipient, kind } => {
                        debug!(
                            "Split path of workflow {} waiting for {} {}",
                            child.id, recipient, kind
                        );
                        child.waiting_on = Some(WaitingOn { recipient, kind });
                        changes
                            .changed()
                            .await
                            .map_err(|_| Error::Internal("event state was dropped".to_string()))?;
                        child.waiting_on = None;
                        continue;
                    }
                    StepOutcome::Fork(paths) => {
                        let nested = paths.into_iter().map(|p| child.fork(p)).collect();
                        if self.join_paths(nested).await? {
                            child.stopped = true;
                        } else {
                            child.cursor += 1;
                        }
                    }
                    StepOutcome::Stopped => {}
                }
                executed += 1;
            }
        }
        .boxed()
    }
}
