//! Automated acquisition loop.
//!
//! One run per confirmed launch: optionally purge what the account already
//! holds, then create, wait, classify and either keep the address (match)
//! or delete it and back off. The loop ends on a match or on cancellation;
//! collaborator failures are logged and retried, never fatal.
//!
//! The task slot in the session is released by the controller itself when
//! it exits, so a stopped task blocks new runs until its in-flight call
//! returns.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::channels::{Notifier, OutgoingMessage, notify};
use crate::classify::{Classification, Classifier};
use crate::config::AutomationConfig;
use crate::error::ClassifierError;
use crate::provider::{Provisioner, Resource, bounded, display_name};
use crate::reconcile::{ReconcileChoice, purge};
use crate::render;
use crate::session::{PendingLaunch, SessionState, TaskRelease, TaskTicket};

/// Display-name prefix for addresses created by the loop.
const NAME_PREFIX: &str = "auto";

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Matched {
        attempts: u32,
        resource: Resource,
        classification: Classification,
    },
    Cancelled {
        attempts: u32,
    },
}

enum Attempt {
    Matched(Resource, Classification),
    Retry,
}

/// Drives one automation task against a single account.
pub struct Controller {
    provisioner: Arc<dyn Provisioner>,
    classifier: Arc<dyn Classifier>,
    notifier: Arc<dyn Notifier>,
    session: Arc<SessionState>,
    config: AutomationConfig,
}

impl Controller {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        classifier: Arc<dyn Classifier>,
        notifier: Arc<dyn Notifier>,
        session: Arc<SessionState>,
        config: AutomationConfig,
    ) -> Self {
        Self {
            provisioner,
            classifier,
            notifier,
            session,
            config,
        }
    }

    /// Run detached on the runtime.
    pub fn spawn(
        self,
        launch: PendingLaunch,
        choice: ReconcileChoice,
        ticket: TaskTicket,
    ) -> JoinHandle<TaskOutcome> {
        tokio::spawn(async move { self.run(launch, choice, ticket).await })
    }

    pub async fn run(
        &self,
        launch: PendingLaunch,
        choice: ReconcileChoice,
        ticket: TaskTicket,
    ) -> TaskOutcome {
        let span = tracing::info_span!(
            "automation",
            account = %launch.request.account,
            generation = ticket.generation
        );
        self.run_inner(launch, choice, ticket).instrument(span).await
    }

    async fn run_inner(
        &self,
        launch: PendingLaunch,
        choice: ReconcileChoice,
        ticket: TaskTicket,
    ) -> TaskOutcome {
        let request = &launch.request;
        tracing::info!(
            policy = ?request.policy,
            interval = %request.interval,
            "Automation running"
        );

        if choice == ReconcileChoice::PurgeThenStart && !launch.existing.is_empty() {
            let report = purge(
                self.provisioner.as_ref(),
                self.notifier.as_ref(),
                launch.chat_id,
                &launch.existing,
                &request.interval,
                self.config.delete_timeout,
                &ticket.token,
            )
            .await;
            tracing::info!(
                deleted = report.deleted,
                failed = report.failed,
                "Purge finished"
            );
            if report.cancelled {
                return self.cancelled(&ticket).await;
            }
        }

        let mut failures = ClassifierFailures::default();
        loop {
            if ticket.token.is_cancelled() {
                return self.cancelled(&ticket).await;
            }

            let attempt = ticket.record_attempt();
            tracing::info!(attempt, "Starting attempt");

            if let Attempt::Matched(resource, classification) =
                self.attempt(&launch, &ticket, &mut failures).await
            {
                return self.matched(&launch, &ticket, resource, classification).await;
            }

            if !request.interval.wait(&ticket.token).await {
                return self.cancelled(&ticket).await;
            }
        }
    }

    async fn attempt(
        &self,
        launch: &PendingLaunch,
        ticket: &TaskTicket,
        failures: &mut ClassifierFailures,
    ) -> Attempt {
        let token = &ticket.token;
        let p = self.provisioner.as_ref();

        let created = match bounded(
            "create",
            self.config.create_timeout,
            p.create(&display_name(NAME_PREFIX)),
        )
        .await
        {
            Ok(resource) => resource,
            Err(e) => {
                tracing::warn!("Create failed: {}", e);
                return Attempt::Retry;
            }
        };
        if token.is_cancelled() {
            tracing::warn!(id = %created.id, "Cancelled after create; resource left in place");
            return Attempt::Retry;
        }

        // A resource that never became ready is not deleted.
        let ready = match bounded(
            "wait_ready",
            self.config.ready_timeout,
            p.wait_ready(&created.id, self.config.ready_timeout, self.config.ready_poll),
        )
        .await
        {
            Ok(resource) => resource,
            Err(e) => {
                tracing::warn!(id = %created.id, "Wait for ready failed: {}", e);
                return Attempt::Retry;
            }
        };
        if token.is_cancelled() {
            tracing::warn!(address = %ready.address, "Cancelled while waiting; resource left in place");
            return Attempt::Retry;
        }

        tracing::info!(address = %ready.address, "Address ready, classifying");
        let classified = match tokio::time::timeout(
            self.config.classify_timeout,
            self.classifier.classify(&ready.address),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout(self.config.classify_timeout)),
        };
        let classification = match classified {
            Ok(c) => {
                failures.reset();
                c
            }
            Err(e) => {
                let streak = failures.record();
                let limited = streak >= self.config.classifier_failure_limit;
                if self.config.retain_on_classifier_error && !limited {
                    tracing::warn!(address = %ready.address, streak, "Classification failed, keeping address: {}", e);
                } else {
                    tracing::warn!(address = %ready.address, streak, "Classification failed, deleting address: {}", e);
                    if self.config.retain_on_classifier_error && failures.take_warning() {
                        notify(
                            self.notifier.as_ref(),
                            render::classifier_unavailable(launch.chat_id, streak),
                        )
                        .await;
                    }
                    self.discard(&ready).await;
                }
                return Attempt::Retry;
            }
        };
        if token.is_cancelled() {
            tracing::warn!(address = %ready.address, "Cancelled while classifying; resource left in place");
            return Attempt::Retry;
        }

        if launch.request.policy.matches(&classification) {
            return Attempt::Matched(ready, classification);
        }

        tracing::info!(
            address = %ready.address,
            score = %classification.score_label(),
            origin = %classification.origin,
            "No match, deleting"
        );
        self.discard(&ready).await;
        Attempt::Retry
    }

    async fn discard(&self, resource: &Resource) {
        if let Err(e) = bounded(
            "delete",
            self.config.delete_timeout,
            self.provisioner.delete(&resource.id),
        )
        .await
        {
            tracing::warn!(address = %resource.address, "Delete failed: {}", e);
        }
    }

    async fn matched(
        &self,
        launch: &PendingLaunch,
        ticket: &TaskTicket,
        resource: Resource,
        classification: Classification,
    ) -> TaskOutcome {
        let attempts = ticket.attempts();
        self.session.cache_classification(classification.clone()).await;
        if self.session.finish_task(ticket.generation).await != TaskRelease::Completed {
            // Stopped between the last check and now.
            tracing::warn!(address = %resource.address, "Match found after the task was stopped");
            return TaskOutcome::Cancelled { attempts };
        }
        tracing::info!(address = %resource.address, attempts, "Found matching address");

        notify(
            self.notifier.as_ref(),
            render::match_found(launch.chat_id, &classification, attempts),
        )
        .await;
        self.show_list(launch.chat_id, &resource.address).await;

        TaskOutcome::Matched {
            attempts,
            resource,
            classification,
        }
    }

    async fn show_list(&self, chat_id: i64, highlight: &str) {
        let p = self.provisioner.as_ref();
        let message = match bounded("list", self.config.list_timeout, p.list()).await {
            Ok(resources) => {
                let cached = self
                    .session
                    .cached_many(resources.iter().map(|r| r.address.as_str()))
                    .await;
                render::address_list(
                    chat_id,
                    p.account_name(),
                    p.region(),
                    &resources,
                    &cached,
                    Some(highlight),
                )
            }
            Err(e) => OutgoingMessage::plain(chat_id, format!("❌ {e}")),
        };
        notify(self.notifier.as_ref(), message).await;
    }

    async fn cancelled(&self, ticket: &TaskTicket) -> TaskOutcome {
        let attempts = ticket.attempts();
        self.session.finish_task(ticket.generation).await;
        tracing::info!(attempts, "Automation cancelled");
        TaskOutcome::Cancelled { attempts }
    }
}

/// Consecutive classifier failures within one run.
#[derive(Debug, Default)]
struct ClassifierFailures {
    streak: u32,
    warned: bool,
}

impl ClassifierFailures {
    fn record(&mut self) -> u32 {
        self.streak += 1;
        self.streak
    }

    fn reset(&mut self) {
        if self.streak > 0 {
            tracing::info!(after = self.streak, "Classifier recovered");
        }
        self.streak = 0;
        self.warned = false;
    }

    /// True the first time it is called in a failure streak.
    fn take_warning(&mut self) -> bool {
        !std::mem::replace(&mut self.warned, true)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{ChannelError, ProviderError, SessionError};
    use crate::policy::{MatchMode, OriginRequirement, ScoreThreshold};
    use crate::provider::ResourceState;
    use crate::wizard::WizardInput;

    /// Hands out `id-N` / `192.0.2.N`, numbering successful creates only.
    #[derive(Default)]
    struct Account {
        next: AtomicU32,
        create_calls: AtomicU32,
        /// The first this-many creates fail.
        failing_creates: u32,
        /// Each create takes this long.
        create_delay: Option<Duration>,
        /// Ids that never leave Provisioning.
        stuck: Vec<&'static str>,
        deleted: Mutex<Vec<String>>,
    }

    impl Account {
        fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provisioner for Account {
        fn account_name(&self) -> &str {
            "tokyo"
        }

        fn region(&self) -> &str {
            "ap-tokyo-1"
        }

        async fn create(&self, display_name: &str) -> Result<Resource, ProviderError> {
            assert!(display_name.starts_with("auto-"));
            if let Some(delay) = self.create_delay {
                tokio::time::sleep(delay).await;
            }
            let call = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failing_creates {
                return Err(ProviderError::Status {
                    account: "tokyo".to_string(),
                    operation: "create",
                    status: 500,
                    message: "InternalError".to_string(),
                });
            }
            let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Resource {
                id: format!("id-{n}"),
                address: String::new(),
                display_name: display_name.to_string(),
                state: ResourceState::Provisioning,
            })
        }

        async fn get(&self, id: &str) -> Result<Resource, ProviderError> {
            let n = id.trim_start_matches("id-");
            let state = if self.stuck.contains(&id) {
                ResourceState::Provisioning
            } else {
                ResourceState::Available
            };
            Ok(Resource {
                id: id.to_string(),
                address: format!("192.0.2.{n}"),
                display_name: "auto".to_string(),
                state,
            })
        }

        async fn list(&self) -> Result<Vec<Resource>, ProviderError> {
            Ok(Vec::new())
        }

        async fn delete(&self, id: &str) -> Result<(), ProviderError> {
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum Verdict {
        Score(u32),
        Fail,
        Hang,
    }

    /// Plays its verdicts in order; the last one repeats.
    struct Scripted {
        verdicts: Mutex<VecDeque<Verdict>>,
        last: Mutex<Verdict>,
    }

    impl Scripted {
        fn new(verdicts: &[Verdict]) -> Self {
            Self {
                verdicts: Mutex::new(verdicts.iter().copied().collect()),
                last: Mutex::new(Verdict::Fail),
            }
        }
    }

    #[async_trait]
    impl Classifier for Scripted {
        async fn classify(&self, address: &str) -> Result<Classification, ClassifierError> {
            let verdict = {
                let mut last = self.last.lock().unwrap();
                if let Some(next) = self.verdicts.lock().unwrap().pop_front() {
                    *last = next;
                }
                *last
            };
            match verdict {
                Verdict::Score(score) => Ok(Classification {
                    address: address.to_string(),
                    score: Some(score),
                    level: "test".to_string(),
                    category: "datacenter".to_string(),
                    origin: "native".to_string(),
                }),
                Verdict::Fail => Err(ClassifierError::Status { status: 503 }),
                Verdict::Hang => std::future::pending().await,
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn count(&self, needle: &str) -> usize {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.contains(needle))
                .count()
        }
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn send(&self, message: OutgoingMessage) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(message.text);
            Ok(())
        }
    }

    const UNAVAILABLE: &str = "Purity check failed";

    async fn launch(session: &SessionState) -> (PendingLaunch, TaskTicket) {
        let generation = session.begin_wizard(1).await.unwrap();
        for input in [
            WizardInput::Account("tokyo".to_string()),
            WizardInput::Threshold(ScoreThreshold::AtMost(10)),
            WizardInput::Origin(OriginRequirement::Any),
            WizardInput::Mode(MatchMode::All),
            WizardInput::IntervalText("10".to_string()),
            WizardInput::Confirm,
        ] {
            session
                .apply_wizard_input(Some(generation), input, |_| true)
                .await
                .unwrap();
        }
        session.launch_pending(generation).await.unwrap()
    }

    struct Run {
        account: Arc<Account>,
        notes: Arc<Recorder>,
        session: Arc<SessionState>,
        handle: JoinHandle<TaskOutcome>,
    }

    async fn start(account: Account, verdicts: &[Verdict], config: AutomationConfig) -> Run {
        let account = Arc::new(account);
        let notes = Arc::new(Recorder::default());
        let session = Arc::new(SessionState::new("tokyo"));
        let (pending, ticket) = launch(&session).await;

        let handle = Controller::new(
            account.clone(),
            Arc::new(Scripted::new(verdicts)),
            notes.clone(),
            Arc::clone(&session),
            config,
        )
        .spawn(pending, ReconcileChoice::KeepAndStart, ticket);

        Run {
            account,
            notes,
            session,
            handle,
        }
    }

    impl Run {
        async fn stop_after(self, secs: u64) -> (Arc<Account>, Arc<Recorder>, TaskOutcome) {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            self.session.stop_task().await.unwrap();
            let outcome = self.handle.await.unwrap();
            assert!(self.session.begin_wizard(1).await.is_ok());
            (self.account, self.notes, outcome)
        }
    }

    fn config(retain: bool, limit: u32) -> AutomationConfig {
        AutomationConfig {
            retain_on_classifier_error: retain,
            classifier_failure_limit: limit,
            ..AutomationConfig::default()
        }
    }

    // Attempts start at t=0, 10 and 20 seconds.

    #[tokio::test(start_paused = true)]
    async fn classifier_errors_keep_the_address_by_default() {
        let run = start(Account::default(), &[Verdict::Fail], config(true, 10)).await;
        let (account, notes, outcome) = run.stop_after(25).await;
        assert_eq!(outcome, TaskOutcome::Cancelled { attempts: 3 });
        assert!(account.deleted().is_empty());
        assert_eq!(notes.count(UNAVAILABLE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn classifier_errors_can_discard_the_address() {
        let run = start(Account::default(), &[Verdict::Fail], config(false, 1)).await;
        let (account, notes, outcome) = run.stop_after(25).await;
        assert_eq!(outcome, TaskOutcome::Cancelled { attempts: 3 });
        assert_eq!(account.deleted(), vec!["id-1", "id-2", "id-3"]);
        assert_eq!(notes.count(UNAVAILABLE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_classifier_errors_stop_retaining() {
        let run = start(Account::default(), &[Verdict::Fail], config(true, 2)).await;
        let (account, notes, outcome) = run.stop_after(25).await;
        assert_eq!(outcome, TaskOutcome::Cancelled { attempts: 3 });
        assert_eq!(account.deleted(), vec!["id-2", "id-3"]);
        assert_eq!(notes.count(UNAVAILABLE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_streak_resets_after_a_successful_check() {
        let verdicts = [
            Verdict::Fail,
            Verdict::Score(90),
            Verdict::Fail,
            Verdict::Fail,
        ];
        let run = start(Account::default(), &verdicts, config(true, 2)).await;
        let (account, notes, outcome) = run.stop_after(35).await;
        assert_eq!(outcome, TaskOutcome::Cancelled { attempts: 4 });
        // id-1 kept (first failure), id-2 no match, id-3 kept (streak restarted).
        assert_eq!(account.deleted(), vec!["id-2", "id-4"]);
        assert_eq!(notes.count(UNAVAILABLE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn create_failure_and_stuck_resource_are_retried_without_delete() {
        let account = Account {
            failing_creates: 1,
            stuck: vec!["id-1"],
            ..Account::default()
        };
        let run = start(account, &[Verdict::Score(5)], config(true, 3)).await;

        let outcome = run.handle.await.unwrap();
        match outcome {
            TaskOutcome::Matched {
                attempts, resource, ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(resource.id, "id-2");
                assert_eq!(resource.address, "192.0.2.2");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(run.account.create_calls.load(Ordering::SeqCst), 3);
        assert!(run.account.deleted().is_empty());
        assert!(run.session.task_status().await.is_none());
        assert_eq!(run.notes.count("Found a matching IP"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn classify_timeout_counts_as_a_failure() {
        let config = AutomationConfig {
            classify_timeout: Duration::from_secs(5),
            ..config(false, 1)
        };
        let run = start(Account::default(), &[Verdict::Hang], config).await;
        // Attempts at t=0 and t=15; each check gives up after 5 seconds.
        let (account, _, outcome) = run.stop_after(25).await;
        assert_eq!(outcome, TaskOutcome::Cancelled { attempts: 2 });
        assert_eq!(account.deleted(), vec!["id-1", "id-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_task_holds_the_slot_until_its_call_returns() {
        let account = Account {
            create_delay: Some(Duration::from_secs(100)),
            ..Account::default()
        };
        let run = start(account, &[Verdict::Score(90)], config(true, 3)).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        run.session.stop_task().await.unwrap();
        assert!(matches!(
            run.session.begin_wizard(1).await,
            Err(SessionError::TaskStopping { .. })
        ));

        let outcome = run.handle.await.unwrap();
        assert_eq!(outcome, TaskOutcome::Cancelled { attempts: 1 });
        // The address created after the stop is left in place.
        assert_eq!(run.account.next.load(Ordering::SeqCst), 1);
        assert!(run.account.deleted().is_empty());
        assert!(run.session.begin_wizard(1).await.is_ok());
    }
}
