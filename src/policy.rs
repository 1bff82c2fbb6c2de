//! Acceptance rule for automatically acquired addresses.
//!
//! A [`Policy`] is built once by the `/autoip` wizard and never changes
//! afterwards. Matching is a pure function of the policy and a
//! [`Classification`].

use std::fmt;

use crate::classify::Classification;

/// Upper bound on the purity score. Lower scores are cleaner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreThreshold {
    AtMost(u32),
    /// Accept any score, including a missing one.
    Unlimited,
}

impl ScoreThreshold {
    /// Whether a score satisfies this bound. A missing score is the worst
    /// possible score and only passes [`ScoreThreshold::Unlimited`].
    pub fn admits(self, score: Option<u32>) -> bool {
        match (self, score) {
            (Self::Unlimited, _) => true,
            (Self::AtMost(limit), Some(score)) => score <= limit,
            (Self::AtMost(_), None) => false,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unlimited" | "any" => Some(Self::Unlimited),
            other => other.parse().ok().map(Self::AtMost),
        }
    }

    /// Token used in button data.
    pub fn token(self) -> String {
        match self {
            Self::AtMost(limit) => limit.to_string(),
            Self::Unlimited => "unlimited".to_string(),
        }
    }
}

impl fmt::Display for ScoreThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AtMost(limit) => write!(f, "<= {limit}%"),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// Required origin label of the address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginRequirement {
    Required(String),
    Any,
}

impl OriginRequirement {
    pub fn admits(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Required(label) => origin == label,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if value.eq_ignore_ascii_case("any") {
            Some(Self::Any)
        } else {
            Some(Self::Required(value.to_string()))
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Self::Any => "any",
            Self::Required(label) => label,
        }
    }
}

impl fmt::Display for OriginRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Required(label) => f.write_str(crate::classify::origin_display(label)),
        }
    }
}

/// How the purity and origin conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    All,
    Any,
}

impl MatchMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "any" => Some(Self::Any),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all conditions"),
            Self::Any => f.write_str("any condition"),
        }
    }
}

/// Immutable acceptance rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub threshold: ScoreThreshold,
    pub origin: OriginRequirement,
    pub mode: MatchMode,
}

impl Policy {
    pub fn new(threshold: ScoreThreshold, origin: OriginRequirement, mode: MatchMode) -> Self {
        Self {
            threshold,
            origin,
            mode,
        }
    }

    pub fn matches(&self, classification: &Classification) -> bool {
        let purity_ok = self.threshold.admits(classification.score);
        let origin_ok = self.origin.admits(&classification.origin);
        match self.mode {
            MatchMode::All => purity_ok && origin_ok,
            MatchMode::Any => purity_ok || origin_ok,
        }
    }
}
