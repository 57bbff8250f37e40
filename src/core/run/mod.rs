mod poll;

use std::sync::Arc;
use std::time::Duration;

use crate::core::error::{ChatError, ChatResult, Operation, ServiceError, ServiceResultExt};
use crate::core::model::{Message, Role, Run, RunStatus};
use crate::core::ports::service::AssistantServicePort;

pub use poll::PollPolicy;
pub(crate) use poll::{poll_until_terminal, PollOutcome};

/// Terminal result of one run, as observed by this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed {
        run_id: String,
        message: Message,
    },
    Failed {
        run_id: String,
        code: Option<String>,
        detail: String,
    },
    Cancelled {
        run_id: String,
    },
    Expired {
        run_id: String,
    },
    /// The run asked for tool outputs. No function tools are ever configured,
    /// so reaching this state means the assistant is misconfigured.
    RequiresAction {
        run_id: String,
    },
    /// The local deadline passed; the run was left running remotely.
    TimedOut {
        run_id: String,
        last_status: RunStatus,
        polls: u32,
        timeout: Duration,
    },
}

impl RunOutcome {
    pub fn run_id(&self) -> &str {
        match self {
            RunOutcome::Completed { run_id, .. }
            | RunOutcome::Failed { run_id, .. }
            | RunOutcome::Cancelled { run_id }
            | RunOutcome::Expired { run_id }
            | RunOutcome::RequiresAction { run_id }
            | RunOutcome::TimedOut { run_id, .. } => run_id,
        }
    }

    /// Reply text for a completed run, or the matching typed failure.
    pub fn into_reply(self) -> ChatResult<String> {
        match self {
            RunOutcome::Completed { message, .. } => Ok(message.text()),
            RunOutcome::Failed {
                run_id,
                code,
                detail,
            } => Err(ChatError::RemoteJobFailed {
                op: Operation::PollRun,
                job_id: run_id,
                status: RunStatus::Failed.as_str().to_string(),
                code,
                detail,
            }),
            RunOutcome::Cancelled { run_id } => Err(ChatError::RemoteJobFailed {
                op: Operation::PollRun,
                job_id: run_id,
                status: RunStatus::Cancelled.as_str().to_string(),
                code: None,
                detail: "run was cancelled".to_string(),
            }),
            RunOutcome::Expired { run_id } => Err(ChatError::RemoteJobFailed {
                op: Operation::PollRun,
                job_id: run_id,
                status: RunStatus::Expired.as_str().to_string(),
                code: None,
                detail: "run expired before completing".to_string(),
            }),
            RunOutcome::RequiresAction { run_id } => Err(ChatError::Configuration(format!(
                "run {run_id} requires action, but this assistant has no tool outputs to supply; \
                 check its tool configuration"
            ))),
            RunOutcome::TimedOut {
                run_id, timeout, ..
            } => Err(ChatError::RunTimedOut { run_id, timeout }),
        }
    }
}

/// Drives one request/response exchange: submit a run, poll it to a terminal
/// state, and pick up the assistant's reply.
///
/// At most one run may be in flight per conversation. That is the caller's
/// responsibility; the service itself rejects overlapping runs.
pub struct RunLifecycleClient {
    service: Arc<dyn AssistantServicePort>,
}

impl RunLifecycleClient {
    pub fn new(service: Arc<dyn AssistantServicePort>) -> Self {
        Self { service }
    }

    pub async fn submit(&self, conversation_id: &str, assistant_id: &str) -> ChatResult<Run> {
        let run = self
            .service
            .create_run(conversation_id, assistant_id)
            .await
            .during(Operation::SubmitRun)?;
        log::info!(
            "Submitted run {} on conversation {} (status {})",
            run.id,
            conversation_id,
            run.status.as_str()
        );
        Ok(run)
    }

    /// Polls `run` until it reaches a terminal state or `policy.timeout` elapses.
    ///
    /// Terminal run states are reported through [`RunOutcome`]; only failures to
    /// talk to the service come back as `Err`.
    pub async fn await_completion(&self, run: Run, policy: &PollPolicy) -> ChatResult<RunOutcome> {
        let service = self.service.as_ref();
        let conversation_id = run.conversation_id.clone();
        let run_id = run.id.clone();
        let (conversation_id, run_id) = (conversation_id.as_str(), run_id.as_str());

        let polled = poll_until_terminal(
            run,
            policy,
            |run: &Run| run.status.is_terminal(),
            move || async move {
                let run = service.get_run(conversation_id, run_id).await?;
                log::debug!("Run {} status: {}", run_id, run.status.as_str());
                if run.status == RunStatus::Unknown {
                    log::warn!("Run {run_id} reported an unrecognised status; still polling");
                }
                Ok::<Run, ServiceError>(run)
            },
        )
        .await
        .during(Operation::PollRun)?;

        let run = match polled {
            PollOutcome::Terminal { value, polls } => {
                log::info!(
                    "Run {} finished with status {} after {} polls",
                    value.id,
                    value.status.as_str(),
                    polls
                );
                value
            }
            PollOutcome::TimedOut { last, polls } => {
                log::warn!(
                    "Run {} still {} after {:?} ({} polls); leaving it running remotely",
                    last.id,
                    last.status.as_str(),
                    policy.timeout,
                    polls
                );
                return Ok(RunOutcome::TimedOut {
                    run_id: last.id,
                    last_status: last.status,
                    polls,
                    timeout: policy.timeout,
                });
            }
        };

        if run.status == RunStatus::Completed {
            let message = self.fetch_reply(&run).await?;
            return Ok(RunOutcome::Completed {
                run_id: run.id,
                message,
            });
        }
        outcome_without_reply(run)
    }

    /// Explicit, caller-invoked cancel. Never issued automatically on timeout.
    pub async fn cancel(&self, conversation_id: &str, run_id: &str) -> ChatResult<Run> {
        let run = self
            .service
            .cancel_run(conversation_id, run_id)
            .await
            .during(Operation::CancelRun)?;
        log::info!("Requested cancel of run {run_id} (status {})", run.status.as_str());
        Ok(run)
    }

    async fn fetch_reply(&self, run: &Run) -> ChatResult<Message> {
        let messages = self
            .service
            .list_messages(&run.conversation_id)
            .await
            .during(Operation::ListMessages)?;
        select_reply(messages, &run.id).ok_or_else(|| ChatError::RemoteJobFailed {
            op: Operation::PollRun,
            job_id: run.id.clone(),
            status: RunStatus::Completed.as_str().to_string(),
            code: None,
            detail: "run completed without an assistant message".to_string(),
        })
    }
}

/// Outcome of a settled run that carries no reply. A run that is still active,
/// or one that completed, has no such outcome.
fn outcome_without_reply(run: Run) -> ChatResult<RunOutcome> {
    let outcome = match run.status {
        RunStatus::Failed => {
            let (code, detail) = match run.last_error {
                Some(err) => (err.code, err.message),
                None => (None, "run failed without error detail".to_string()),
            };
            RunOutcome::Failed {
                run_id: run.id,
                code,
                detail,
            }
        }
        RunStatus::Incomplete => {
            let detail = run
                .last_error
                .map(|err| err.message)
                .unwrap_or_else(|| "run ended incomplete".to_string());
            RunOutcome::Failed {
                run_id: run.id,
                code: Some(RunStatus::Incomplete.as_str().to_string()),
                detail,
            }
        }
        RunStatus::Cancelled => RunOutcome::Cancelled { run_id: run.id },
        RunStatus::Expired => RunOutcome::Expired { run_id: run.id },
        RunStatus::RequiresAction => {
            log::error!(
                "Run {} requires action but no tool handler is configured",
                run.id
            );
            RunOutcome::RequiresAction { run_id: run.id }
        }
        RunStatus::Completed
        | RunStatus::Queued
        | RunStatus::InProgress
        | RunStatus::Cancelling
        | RunStatus::Unknown => {
            return Err(ChatError::Configuration(format!(
                "run {} has no settled outcome in status {}",
                run.id,
                run.status.as_str()
            )))
        }
    };
    Ok(outcome)
}

/// The newest assistant message produced by `run_id`, falling back to the
/// newest assistant message when the service does not tag messages with runs.
fn select_reply(messages: Vec<Message>, run_id: &str) -> Option<Message> {
    let mut newest_assistant = None;
    let mut newest_for_run = None;
    for message in messages.into_iter().filter(|m| m.role == Role::Assistant) {
        if message.run_id.as_deref() == Some(run_id) {
            newest_for_run = Some(message.clone());
        }
        newest_assistant = Some(message);
    }
    newest_for_run.or(newest_assistant)
}
