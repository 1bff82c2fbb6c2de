//! `/autoip` flow: wizard buttons, interval text, reconciliation and launch.

use std::sync::Arc;

use crate::agent::Agent;
use crate::agent::router::{AutomationAction, AutomationKind};
use crate::controller::Controller;
use crate::error::ValidationError;
use crate::reconcile::{Preflight, ReconcileChoice, preflight};
use crate::render;
use crate::wizard::{WizardInput, WizardOutcome, WizardStepKind};

impl Agent {
    pub(super) async fn start_wizard(&self, chat_id: i64) {
        match self.session.begin_wizard(chat_id).await {
            Ok(generation) => {
                self.send(render::wizard_accounts(
                    chat_id,
                    generation,
                    &self.account_choices(),
                ))
                .await;
            }
            Err(e) => self.reply(chat_id, format!("⚠️ {e}")).await,
        }
    }

    /// Free text: only meaningful while the wizard waits for the interval.
    pub(super) async fn handle_text(&self, chat_id: i64, text: &str) {
        match self.session.wizard_step().await {
            Some((_, WizardStepKind::Interval)) => {
                self.advance_wizard(chat_id, None, WizardInput::IntervalText(text.to_string()))
                    .await;
            }
            _ => self.reply(chat_id, "Use /help").await,
        }
    }

    pub(super) async fn handle_automation(&self, chat_id: i64, action: AutomationAction) {
        let generation = action.generation;
        match action.kind {
            AutomationKind::Account(name) => {
                self.advance_wizard(chat_id, Some(generation), WizardInput::Account(name))
                    .await
            }
            AutomationKind::Threshold(t) => {
                self.advance_wizard(chat_id, Some(generation), WizardInput::Threshold(t))
                    .await
            }
            AutomationKind::Origin(o) => {
                self.advance_wizard(chat_id, Some(generation), WizardInput::Origin(o))
                    .await
            }
            AutomationKind::Mode(m) => {
                self.advance_wizard(chat_id, Some(generation), WizardInput::Mode(m))
                    .await
            }
            AutomationKind::Confirm => {
                self.advance_wizard(chat_id, Some(generation), WizardInput::Confirm)
                    .await
            }
            AutomationKind::Cancel => match self.session.cancel_setup(generation).await {
                Ok(()) => {
                    tracing::info!(generation, "Automation setup cancelled");
                    self.reply(chat_id, "❌ Automatic acquisition setup cancelled")
                        .await
                }
                Err(e) => self.reply(chat_id, format!("⚠️ {e}")).await,
            },
            AutomationKind::Purge => {
                self.launch(chat_id, generation, ReconcileChoice::PurgeThenStart)
                    .await
            }
            AutomationKind::Keep => {
                self.launch(chat_id, generation, ReconcileChoice::KeepAndStart)
                    .await
            }
        }
    }

    async fn advance_wizard(&self, chat_id: i64, generation: Option<u64>, input: WizardInput) {
        let providers = &self.providers;
        let outcome = self
            .session
            .apply_wizard_input(generation, input, |name| providers.contains(name))
            .await;

        match outcome {
            Ok(WizardOutcome::Advanced(WizardStepKind::Confirm)) => {
                if let Some((generation, request)) = self.session.wizard_confirmation().await {
                    self.send(render::wizard_confirm(chat_id, generation, &request))
                        .await;
                }
            }
            Ok(WizardOutcome::Advanced(kind)) => {
                let Some((generation, _)) = self.session.wizard_step().await else {
                    return;
                };
                self.send(render::wizard_prompt(chat_id, generation, kind))
                    .await;
            }
            Ok(WizardOutcome::Confirmed(request)) => {
                // The pending launch inherits the wizard's generation, which
                // only a button carries.
                let Some(generation) = generation else {
                    self.reply(chat_id, format!("⚠️ {}", ValidationError::StaleCallback))
                        .await;
                    return;
                };
                tracing::info!(generation, account = %request.account, "Automation confirmed");
                self.reconcile(chat_id, generation, &request.account).await;
            }
            Err(e @ (ValidationError::InvalidInterval { .. }
            | ValidationError::IntervalBelowFloor { .. })) => {
                self.reply(chat_id, format!("❌ {e}")).await
            }
            Err(e) => self.reply(chat_id, format!("⚠️ {e}")).await,
        }
    }

    /// Pre-flight: prompt when the account already holds addresses.
    async fn reconcile(&self, chat_id: i64, generation: u64, account: &str) {
        let Some(provider) = self.providers.get(account) else {
            if let Err(e) = self.session.cancel_setup(generation).await {
                tracing::debug!(generation, "No setup left to cancel: {}", e);
            }
            let err = ValidationError::UnknownAccount(account.to_string());
            self.reply(chat_id, format!("❌ {err}")).await;
            return;
        };

        match preflight(provider.as_ref(), self.automation.list_timeout).await {
            Preflight::Clear => {
                self.launch(chat_id, generation, ReconcileChoice::KeepAndStart)
                    .await
            }
            Preflight::Existing(resources) => {
                let prompt = render::existing_resources(chat_id, generation, account, &resources);
                if self
                    .session
                    .set_pending_existing(generation, resources)
                    .await
                    .is_ok()
                {
                    self.send(prompt).await;
                }
            }
            Preflight::Unavailable(e) => {
                self.reply(chat_id, format!("⚠️ Could not list existing IPs: {e}"))
                    .await;
                self.launch(chat_id, generation, ReconcileChoice::KeepAndStart)
                    .await;
            }
        }
    }

    async fn launch(&self, chat_id: i64, generation: u64, choice: ReconcileChoice) {
        let (launch, ticket) = match self.session.launch_pending(generation).await {
            Ok(started) => started,
            Err(e) => {
                self.reply(chat_id, format!("⚠️ {e}")).await;
                return;
            }
        };

        let account = launch.request.account.clone();
        let Some(provider) = self.providers.get(&account) else {
            self.session.finish_task(generation).await;
            let err = ValidationError::UnknownAccount(account);
            self.reply(chat_id, format!("❌ {err}")).await;
            return;
        };

        tracing::info!(generation, %account, ?choice, "Launching automation");
        self.send(render::task_started(launch.chat_id, &account))
            .await;

        let controller = Controller::new(
            provider,
            Arc::clone(&self.classifier),
            self.notifier(),
            Arc::clone(&self.session),
            self.automation.clone(),
        );
        drop(controller.spawn(launch, choice, ticket));
    }

    pub(super) async fn stop_automation(&self, chat_id: i64) {
        match self.session.stop_task().await {
            Ok(status) => self.send(render::task_stopped(chat_id, &status)).await,
            Err(e) => self.reply(chat_id, format!("⚠️ {e}")).await,
        }
    }
}
