//! `/autoip` configuration wizard.
//!
//! Six steps, strictly forward:
//!
//! ```text
//! Account → PurityThreshold → OriginRequirement → MatchMode → Interval → Confirm
//! ```
//!
//! Each step accepts exactly one kind of input. The step enum carries the
//! fields collected so far, so a later step can never observe a missing
//! earlier choice. Cancellation is handled by the owner of the session,
//! which simply drops it.

use crate::error::ValidationError;
use crate::interval::BackoffInterval;
use crate::policy::{MatchMode, OriginRequirement, Policy, ScoreThreshold};

/// Everything the controller needs to start, produced by the Confirm step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub account: String,
    pub policy: Policy,
    pub interval: BackoffInterval,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardStep {
    Account,
    PurityThreshold {
        account: String,
    },
    OriginRequirement {
        account: String,
        threshold: ScoreThreshold,
    },
    MatchMode {
        account: String,
        threshold: ScoreThreshold,
        origin: OriginRequirement,
    },
    Interval {
        account: String,
        threshold: ScoreThreshold,
        origin: OriginRequirement,
        mode: MatchMode,
    },
    Confirm {
        request: LaunchRequest,
    },
}

/// Field-less mirror of [`WizardStep`] for display and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardStepKind {
    Account,
    PurityThreshold,
    OriginRequirement,
    MatchMode,
    Interval,
    Confirm,
}

impl WizardStepKind {
    /// 1-based position in the wizard.
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Account => 1,
            Self::PurityThreshold => 2,
            Self::OriginRequirement => 3,
            Self::MatchMode => 4,
            Self::Interval => 5,
            Self::Confirm => 6,
        }
    }

    fn expected(self) -> &'static str {
        match self {
            Self::Account => "an account selection",
            Self::PurityThreshold => "a purity threshold",
            Self::OriginRequirement => "an origin requirement",
            Self::MatchMode => "a match mode",
            Self::Interval => "an interval in seconds",
            Self::Confirm => "confirmation",
        }
    }
}

impl WizardStep {
    pub fn kind(&self) -> WizardStepKind {
        match self {
            Self::Account => WizardStepKind::Account,
            Self::PurityThreshold { .. } => WizardStepKind::PurityThreshold,
            Self::OriginRequirement { .. } => WizardStepKind::OriginRequirement,
            Self::MatchMode { .. } => WizardStepKind::MatchMode,
            Self::Interval { .. } => WizardStepKind::Interval,
            Self::Confirm { .. } => WizardStepKind::Confirm,
        }
    }
}

/// One operator input to the wizard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardInput {
    Account(String),
    Threshold(ScoreThreshold),
    Origin(OriginRequirement),
    Mode(MatchMode),
    /// Free text typed while the Interval step is active.
    IntervalText(String),
    Confirm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardOutcome {
    /// Moved to the given step.
    Advanced(WizardStepKind),
    /// The operator confirmed; the session should be discarded.
    Confirmed(LaunchRequest),
}

/// An in-progress wizard owned by the session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WizardSession {
    generation: u64,
    chat_id: i64,
    step: WizardStep,
}

impl WizardSession {
    pub fn new(generation: u64, chat_id: i64) -> Self {
        Self {
            generation,
            chat_id,
            step: WizardStep::Account,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    pub fn step(&self) -> &WizardStep {
        &self.step
    }

    /// Apply one input. On error the session is left untouched.
    pub fn apply(
        &mut self,
        input: WizardInput,
        is_known_account: impl Fn(&str) -> bool,
    ) -> Result<WizardOutcome, ValidationError> {
        let next = match (&self.step, input) {
            (WizardStep::Account, WizardInput::Account(account)) => {
                if !is_known_account(&account) {
                    return Err(ValidationError::UnknownAccount(account));
                }
                WizardStep::PurityThreshold { account }
            }
            (WizardStep::PurityThreshold { account }, WizardInput::Threshold(threshold)) => {
                WizardStep::OriginRequirement {
                    account: account.clone(),
                    threshold,
                }
            }
            (
                WizardStep::OriginRequirement { account, threshold },
                WizardInput::Origin(origin),
            ) => WizardStep::MatchMode {
                account: account.clone(),
                threshold: *threshold,
                origin,
            },
            (
                WizardStep::MatchMode {
                    account,
                    threshold,
                    origin,
                },
                WizardInput::Mode(mode),
            ) => WizardStep::Interval {
                account: account.clone(),
                threshold: *threshold,
                origin: origin.clone(),
                mode,
            },
            (
                WizardStep::Interval {
                    account,
                    threshold,
                    origin,
                    mode,
                },
                WizardInput::IntervalText(text),
            ) => WizardStep::Confirm {
                request: LaunchRequest {
                    account: account.clone(),
                    policy: Policy::new(*threshold, origin.clone(), *mode),
                    interval: BackoffInterval::parse(&text)?,
                },
            },
            (WizardStep::Confirm { request }, WizardInput::Confirm) => {
                return Ok(WizardOutcome::Confirmed(request.clone()));
            }
            (step, _) => {
                let kind = step.kind();
                return Err(ValidationError::UnexpectedInput {
                    step: kind.ordinal(),
                    expected: kind.expected(),
                });
            }
        };

        self.step = next;
        Ok(WizardOutcome::Advanced(self.step.kind()))
    }
}
