//! Operator session state.
//!
//! All mutable session data sits behind one `tokio::sync::Mutex`. The lock
//! is only held for in-memory updates: callers snapshot what they need,
//! release it, talk to the cloud or the chat, and re-acquire to commit.
//!
//! Wizard runs, pending launches and tasks share a monotonically increasing
//! generation. Every button carries the generation it was rendered for, so
//! a button from a superseded run is recognised as stale.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::classify::{Classification, ClassificationCache};
use crate::error::{Error, SessionError, ValidationError};
use crate::provider::Resource;
use crate::wizard::{
    LaunchRequest, WizardInput, WizardOutcome, WizardSession, WizardStep, WizardStepKind,
};

/// A confirmed wizard run waiting on the reconciliation decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLaunch {
    pub generation: u64,
    pub chat_id: i64,
    pub request: LaunchRequest,
    /// Resources found by the pre-flight listing.
    pub existing: Vec<Resource>,
}

/// How [`SessionState::finish_task`] found the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRelease {
    /// The task was still active; it is now cleared.
    Completed,
    /// The task had been stopped by the operator; it is now cleared.
    Stopped,
    /// The slot belongs to another generation or is empty.
    NotOwner,
}

/// The controller's view of its own task.
#[derive(Debug, Clone)]
pub struct TaskTicket {
    pub generation: u64,
    pub token: CancellationToken,
    attempts: Arc<AtomicU32>,
}

impl TaskTicket {
    /// Count one more attempt and return the new total.
    pub fn record_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// Snapshot of the running task, for status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub generation: u64,
    pub chat_id: i64,
    pub request: LaunchRequest,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
}

struct TaskHandle {
    generation: u64,
    chat_id: i64,
    request: LaunchRequest,
    token: CancellationToken,
    attempts: Arc<AtomicU32>,
    started_at: DateTime<Utc>,
    /// Cancelled, but the controller has not exited yet.
    stopping: bool,
}

impl TaskHandle {
    fn busy(&self) -> SessionError {
        let account = self.request.account.clone();
        if self.stopping {
            SessionError::TaskStopping { account }
        } else {
            SessionError::TaskAlreadyRunning { account }
        }
    }

    fn status(&self) -> TaskStatus {
        TaskStatus {
            generation: self.generation,
            chat_id: self.chat_id,
            request: self.request.clone(),
            attempts: self.attempts.load(Ordering::SeqCst),
            started_at: self.started_at,
        }
    }
}

struct SessionInner {
    current_account: String,
    wizard: Option<WizardSession>,
    pending: Option<PendingLaunch>,
    task: Option<TaskHandle>,
    cache: ClassificationCache,
    next_generation: u64,
}

/// The single operator's session.
pub struct SessionState {
    inner: Mutex<SessionInner>,
}

impl SessionState {
    pub fn new(current_account: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                current_account: current_account.into(),
                wizard: None,
                pending: None,
                task: None,
                cache: ClassificationCache::new(),
                next_generation: 1,
            }),
        }
    }

    pub async fn current_account(&self) -> String {
        self.inner.lock().await.current_account.clone()
    }

    /// Switch the account used by manual commands. The caller validates
    /// the name.
    pub async fn set_current_account(&self, name: &str) {
        self.inner.lock().await.current_account = name.to_string();
    }

    /// Start a fresh wizard run, superseding any earlier wizard or pending
    /// launch. Refused while a task is running or still stopping.
    pub async fn begin_wizard(&self, chat_id: i64) -> Result<u64, SessionError> {
        let mut inner = self.inner.lock().await;
        if let Some(task) = &inner.task {
            return Err(task.busy());
        }
        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner.wizard = Some(WizardSession::new(generation, chat_id));
        inner.pending = None;
        tracing::debug!(generation, "Wizard started");
        Ok(generation)
    }

    /// Generation and step of the active wizard, if any.
    pub async fn wizard_step(&self) -> Option<(u64, WizardStepKind)> {
        let inner = self.inner.lock().await;
        inner
            .wizard
            .as_ref()
            .map(|w| (w.generation(), w.step().kind()))
    }

    /// The collected request once the wizard waits for confirmation.
    pub async fn wizard_confirmation(&self) -> Option<(u64, LaunchRequest)> {
        let inner = self.inner.lock().await;
        let wizard = inner.wizard.as_ref()?;
        match wizard.step() {
            WizardStep::Confirm { request } => Some((wizard.generation(), request.clone())),
            _ => None,
        }
    }

    /// Feed one input to the active wizard.
    ///
    /// `generation` comes from button data; free text passes `None`. On
    /// confirmation the wizard is replaced by a [`PendingLaunch`] with the
    /// same generation.
    pub async fn apply_wizard_input(
        &self,
        generation: Option<u64>,
        input: WizardInput,
        is_known_account: impl Fn(&str) -> bool,
    ) -> Result<WizardOutcome, ValidationError> {
        let mut inner = self.inner.lock().await;
        let Some(wizard) = inner.wizard.as_mut() else {
            return Err(match generation {
                Some(_) => ValidationError::StaleCallback,
                None => ValidationError::NoActiveWizard,
            });
        };
        if generation.is_some_and(|g| g != wizard.generation()) {
            return Err(ValidationError::StaleCallback);
        }

        let outcome = wizard.apply(input, is_known_account)?;
        if let WizardOutcome::Confirmed(request) = &outcome {
            let pending = PendingLaunch {
                generation: wizard.generation(),
                chat_id: wizard.chat_id(),
                request: request.clone(),
                existing: Vec::new(),
            };
            inner.wizard = None;
            inner.pending = Some(pending);
        }
        Ok(outcome)
    }

    /// Drop the wizard or pending launch for `generation`.
    pub async fn cancel_setup(&self, generation: u64) -> Result<(), ValidationError> {
        let mut inner = self.inner.lock().await;
        if inner.wizard.as_ref().map(|w| w.generation()) == Some(generation) {
            inner.wizard = None;
            return Ok(());
        }
        if inner.pending.as_ref().map(|p| p.generation) == Some(generation) {
            inner.pending = None;
            return Ok(());
        }
        Err(ValidationError::StaleCallback)
    }

    /// Clone of the pending launch for `generation`.
    pub async fn pending(&self, generation: u64) -> Result<PendingLaunch, ValidationError> {
        let inner = self.inner.lock().await;
        inner
            .pending
            .as_ref()
            .filter(|p| p.generation == generation)
            .cloned()
            .ok_or(ValidationError::StaleCallback)
    }

    /// Record the pre-flight listing on the pending launch.
    pub async fn set_pending_existing(
        &self,
        generation: u64,
        existing: Vec<Resource>,
    ) -> Result<(), ValidationError> {
        let mut inner = self.inner.lock().await;
        match inner.pending.as_mut() {
            Some(p) if p.generation == generation => {
                p.existing = existing;
                Ok(())
            }
            _ => Err(ValidationError::StaleCallback),
        }
    }

    /// Turn the pending launch into the running task.
    ///
    /// Single-flight: while another task runs, or a stopped one has not
    /// exited yet, this fails and leaves both the task and the pending
    /// launch as they were.
    pub async fn launch_pending(
        &self,
        generation: u64,
    ) -> Result<(PendingLaunch, TaskTicket), Error> {
        let mut inner = self.inner.lock().await;
        match inner.pending.as_ref() {
            Some(p) if p.generation == generation => {}
            Some(_) => return Err(ValidationError::StaleCallback.into()),
            None => return Err(SessionError::NoPendingLaunch.into()),
        }
        if let Some(task) = &inner.task {
            return Err(task.busy().into());
        }
        let Some(pending) = inner.pending.take() else {
            return Err(SessionError::NoPendingLaunch.into());
        };

        let token = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        inner.task = Some(TaskHandle {
            generation,
            chat_id: pending.chat_id,
            request: pending.request.clone(),
            token: token.clone(),
            attempts: Arc::clone(&attempts),
            started_at: Utc::now(),
            stopping: false,
        });
        tracing::info!(generation, account = %pending.request.account, "Automation task registered");

        Ok((
            pending,
            TaskTicket {
                generation,
                token,
                attempts,
            },
        ))
    }

    /// Cancel the running task. The slot stays occupied until the
    /// controller exits and calls [`finish_task`](Self::finish_task).
    pub async fn stop_task(&self) -> Result<TaskStatus, SessionError> {
        let mut inner = self.inner.lock().await;
        let task = inner.task.as_mut().ok_or(SessionError::NoRunningTask)?;
        if task.stopping {
            return Err(task.busy());
        }
        task.stopping = true;
        task.token.cancel();
        tracing::info!(generation = task.generation, "Automation task cancelled");
        Ok(task.status())
    }

    /// Clear the task slot if it still belongs to `generation`.
    pub async fn finish_task(&self, generation: u64) -> TaskRelease {
        let mut inner = self.inner.lock().await;
        match inner.task.as_ref() {
            Some(t) if t.generation == generation => {
                let stopped = t.stopping;
                inner.task = None;
                if stopped {
                    TaskRelease::Stopped
                } else {
                    TaskRelease::Completed
                }
            }
            _ => TaskRelease::NotOwner,
        }
    }

    /// The active task; a stopped task that is still winding down is not
    /// reported.
    pub async fn task_status(&self) -> Option<TaskStatus> {
        let inner = self.inner.lock().await;
        inner
            .task
            .as_ref()
            .filter(|t| !t.stopping)
            .map(TaskHandle::status)
    }

    /// Cancel whatever is running; used on shutdown.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.task.take() {
            task.token.cancel();
        }
        inner.wizard = None;
        inner.pending = None;
    }

    pub async fn cache_classification(&self, classification: Classification) {
        self.inner.lock().await.cache.insert(classification);
    }

    pub async fn cached(&self, address: &str) -> Option<Classification> {
        self.inner.lock().await.cache.get(address).cloned()
    }

    /// Cached classifications for the given addresses.
    pub async fn cached_many<'a>(
        &self,
        addresses: impl IntoIterator<Item = &'a str>,
    ) -> HashMap<String, Classification> {
        let inner = self.inner.lock().await;
        addresses
            .into_iter()
            .filter_map(|a| inner.cache.get(a).map(|c| (a.to_string(), c.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{MatchMode, OriginRequirement, ScoreThreshold};

    fn known(name: &str) -> bool {
        name == "tokyo"
    }

    async fn confirm_wizard(session: &SessionState) -> u64 {
        let generation = session.begin_wizard(100).await.unwrap();
        let g = Some(generation);
        session
            .apply_wizard_input(g, WizardInput::Account("tokyo".into()), known)
            .await
            .unwrap();
        session
            .apply_wizard_input(g, WizardInput::Threshold(ScoreThreshold::AtMost(20)), known)
            .await
            .unwrap();
        session
            .apply_wizard_input(g, WizardInput::Origin(OriginRequirement::Any), known)
            .await
            .unwrap();
        session
            .apply_wizard_input(g, WizardInput::Mode(MatchMode::All), known)
            .await
            .unwrap();
        session
            .apply_wizard_input(None, WizardInput::IntervalText("60".into()), known)
            .await
            .unwrap();
        let outcome = session
            .apply_wizard_input(g, WizardInput::Confirm, known)
            .await
            .unwrap();
        assert!(matches!(outcome, WizardOutcome::Confirmed(_)));
        generation
    }

    #[tokio::test]
    async fn stale_generation_is_rejected_without_change() {
        let session = SessionState::new("tokyo");
        let old = session.begin_wizard(100).await.unwrap();
        let new = session.begin_wizard(100).await.unwrap();
        assert!(new > old);

        let err = session
            .apply_wizard_input(Some(old), WizardInput::Account("tokyo".into()), known)
            .await
            .unwrap_err();
        assert_eq!(err, ValidationError::StaleCallback);
        assert_eq!(
            session.wizard_step().await,
            Some((new, WizardStepKind::Account))
        );

        assert_eq!(
            session.cancel_setup(old).await,
            Err(ValidationError::StaleCallback)
        );
        assert!(session.wizard_step().await.is_some());
    }

    #[tokio::test]
    async fn callbacks_without_wizard_are_stale_and_text_is_unexpected() {
        let session = SessionState::new("tokyo");
        assert_eq!(
            session
                .apply_wizard_input(Some(1), WizardInput::Confirm, known)
                .await,
            Err(ValidationError::StaleCallback)
        );
        assert_eq!(
            session
                .apply_wizard_input(None, WizardInput::IntervalText("60".into()), known)
                .await,
            Err(ValidationError::NoActiveWizard)
        );
    }

    #[tokio::test]
    async fn confirm_moves_wizard_to_pending() {
        let session = SessionState::new("tokyo");
        let generation = confirm_wizard(&session).await;
        assert!(session.wizard_step().await.is_none());
        let pending = session.pending(generation).await.unwrap();
        assert_eq!(pending.request.account, "tokyo");
        assert!(pending.existing.is_empty());
        assert_eq!(
            session.pending(generation + 1).await,
            Err(ValidationError::StaleCallback)
        );
    }

    #[tokio::test]
    async fn second_launch_is_rejected_while_task_runs() {
        let session = SessionState::new("tokyo");
        let first = confirm_wizard(&session).await;
        let (_, ticket) = session.launch_pending(first).await.unwrap();

        // A wizard cannot even start while the task runs.
        assert!(matches!(
            session.begin_wizard(100).await,
            Err(SessionError::TaskAlreadyRunning { .. })
        ));

        // Launching the same pending twice is refused too.
        let err = session.launch_pending(first).await.unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::NoPendingLaunch)));

        let status = session.task_status().await.unwrap();
        assert_eq!(status.generation, first);
        assert!(!ticket.token.is_cancelled());
    }

    #[tokio::test]
    async fn stop_cancels_and_finish_is_compare_and_clear() {
        let session = SessionState::new("tokyo");
        let generation = confirm_wizard(&session).await;
        let (_, ticket) = session.launch_pending(generation).await.unwrap();
        ticket.record_attempt();
        ticket.record_attempt();
        assert_eq!(session.task_status().await.unwrap().attempts, 2);

        assert_eq!(
            session.finish_task(generation + 10).await,
            TaskRelease::NotOwner
        );
        assert!(session.task_status().await.is_some());

        let stopped = session.stop_task().await.unwrap();
        assert_eq!(stopped.attempts, 2);
        assert!(ticket.token.is_cancelled());
        assert!(session.task_status().await.is_none());

        assert_eq!(session.finish_task(generation).await, TaskRelease::Stopped);
        assert_eq!(
            session.stop_task().await.unwrap_err(),
            SessionError::NoRunningTask
        );
    }

    #[tokio::test]
    async fn stopped_task_blocks_new_runs_until_it_exits() {
        let session = SessionState::new("tokyo");
        let first = confirm_wizard(&session).await;
        session.launch_pending(first).await.unwrap();
        session.stop_task().await.unwrap();

        let stopping = SessionError::TaskStopping {
            account: "tokyo".to_string(),
        };
        assert_eq!(session.begin_wizard(100).await.unwrap_err(), stopping);
        assert_eq!(session.stop_task().await.unwrap_err(), stopping);

        // The controller exits; only now can a new run start.
        assert_eq!(session.finish_task(first).await, TaskRelease::Stopped);
        let second = confirm_wizard(&session).await;
        assert!(second > first);
        session.launch_pending(second).await.unwrap();
        assert_eq!(session.task_status().await.unwrap().generation, second);
    }

    #[tokio::test]
    async fn cache_lookups() {
        let session = SessionState::new("tokyo");
        session
            .cache_classification(Classification {
                address: "203.0.113.1".into(),
                score: Some(3),
                level: "clean".into(),
                category: "datacenter".into(),
                origin: "native".into(),
            })
            .await;
        assert!(session.cached("203.0.113.1").await.is_some());
        let many = session.cached_many(["203.0.113.1", "203.0.113.2"]).await;
        assert_eq!(many.len(), 1);
    }
}
