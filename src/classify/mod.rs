//! Address classification: the external purity oracle and its display cache.

mod ippure;

use std::collections::HashMap;
use std::fmt::Write as _;

use async_trait::async_trait;

use crate::error::ClassifierError;

pub use self::ippure::{IppureClassifier, parse_report};

/// Canonical origin labels produced by the classifiers.
pub const ORIGIN_NATIVE: &str = "native";
pub const ORIGIN_NON_NATIVE: &str = "non_native";
pub const ORIGIN_BROADCAST: &str = "broadcast";
pub const UNKNOWN: &str = "unknown";

/// The oracle's verdict on one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub address: String,
    /// Purity score in percent. `None` when the report had no numeric score.
    pub score: Option<u32>,
    /// Qualitative purity level as reported.
    pub level: String,
    /// Address category, e.g. datacenter or residential.
    pub category: String,
    /// Canonical origin label (see `ORIGIN_*`).
    pub origin: String,
}

impl Classification {
    pub fn score_label(&self) -> String {
        match self.score {
            Some(score) => format!("{score}%"),
            None => UNKNOWN.to_string(),
        }
    }

    /// `score/category/origin`, used in address lists.
    pub fn short_label(&self) -> String {
        format!(
            "{}/{}/{}",
            self.score_label(),
            self.category,
            origin_display(&self.origin)
        )
    }

    /// Multi-line Markdown summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "📊 *Purity:* {} ({})", self.score_label(), self.level);
        let _ = writeln!(out, "🏢 *Type:* {}", self.category);
        let _ = write!(out, "🌐 *Origin:* {}", origin_display(&self.origin));
        out
    }
}

/// Human-readable form of a canonical origin label.
pub fn origin_display(label: &str) -> &str {
    match label {
        ORIGIN_NATIVE => "native IP",
        ORIGIN_NON_NATIVE => "non-native IP",
        ORIGIN_BROADCAST => "broadcast IP",
        other => other,
    }
}

/// Classification collaborator. Slow and unreliable; callers bound every call
/// with a timeout and own the retry policy.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, address: &str) -> Result<Classification, ClassifierError>;
}

/// Last-known classification per address. Write/overwrite only; display aid.
#[derive(Debug, Default)]
pub struct ClassificationCache {
    entries: HashMap<String, Classification>,
}

impl ClassificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, classification: Classification) {
        self.entries
            .insert(classification.address.clone(), classification);
    }

    pub fn get(&self, address: &str) -> Option<&Classification> {
        self.entries.get(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(address: &str, score: Option<u32>) -> Classification {
        Classification {
            address: address.to_string(),
            score,
            level: "clean".to_string(),
            category: "datacenter".to_string(),
            origin: ORIGIN_NATIVE.to_string(),
        }
    }

    #[test]
    fn cache_overwrites_by_address() {
        let mut cache = ClassificationCache::new();
        cache.insert(sample("198.51.100.1", Some(40)));
        cache.insert(sample("198.51.100.1", Some(12)));
        cache.insert(sample("198.51.100.2", None));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("198.51.100.1").and_then(|c| c.score), Some(12));
        assert!(cache.get("198.51.100.3").is_none());
    }

    #[test]
    fn labels_render_unknown_scores() {
        let c = sample("198.51.100.2", None);
        assert_eq!(c.short_label(), "unknown/datacenter/native IP");
        assert!(c.summary().contains("*Purity:* unknown (clean)"));
    }
}
