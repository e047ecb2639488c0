//! Failure classification for job retries.
//!
//! A [`FailureClassifier`] maps an error description (an exception string,
//! an error's `Display` output) to a [`FailureKind`] and decides whether the
//! job is worth retrying.
//!
//! Rules are regular expressions matched case-insensitively. Retryable rules
//! are evaluated before permanent ones and the first match wins. Input that
//! matches nothing is [`FailureKind::Unknown`], which is never retried: an
//! error nobody anticipated should not be replayed blindly.
//!
//! ```rust
//! use job_safety_classifier::FailureClassifier;
//! use job_safety_core::FailureKind;
//!
//! let classifier = FailureClassifier::new();
//!
//! let verdict = classifier.should_retry("ConnectionError: timeout");
//! assert_eq!(verdict.kind, FailureKind::NetworkError);
//! assert!(verdict.retryable);
//!
//! assert!(!classifier.should_retry("ValidationError: bad field").retryable);
//! assert_eq!(classifier.classify("the moon is made of cheese"), FailureKind::Unknown);
//! ```
//!
//! The rule table can be extended at runtime:
//!
//! ```rust
//! use job_safety_classifier::FailureClassifier;
//! use job_safety_core::FailureKind;
//!
//! let classifier = FailureClassifier::new();
//! classifier
//!     .add_pattern(r"exchange maintenance", FailureKind::TransientUpstream, true)
//!     .unwrap();
//! assert!(classifier.should_retry("Exchange maintenance in progress").retryable);
//! ```

mod error;
mod rules;

pub use error::ClassifierError;
pub use job_safety_core::FailureKind;

use regex::{Regex, RegexBuilder};
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// The outcome of classifying one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// The failure category.
    pub kind: FailureKind,
    /// Whether the job should be retried.
    pub retryable: bool,
}

impl From<FailureKind> for Classification {
    fn from(kind: FailureKind) -> Self {
        Self {
            kind,
            retryable: kind.is_retryable(),
        }
    }
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: Regex,
    kind: FailureKind,
}

impl Rule {
    fn compile(pattern: &str, kind: FailureKind) -> Result<Self, ClassifierError> {
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| ClassifierError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        Ok(Self { pattern, kind })
    }
}

#[derive(Debug, Clone, Default)]
struct RuleTables {
    retryable: Vec<Rule>,
    permanent: Vec<Rule>,
}

impl RuleTables {
    fn find(&self, description: &str) -> Option<&Rule> {
        self.retryable
            .iter()
            .chain(self.permanent.iter())
            .find(|rule| rule.pattern.is_match(description))
    }
}

/// Classifies failures against an ordered rule table.
///
/// Cheap to share behind an `Arc`; [`add_pattern`](Self::add_pattern) takes
/// `&self` so rules can be added while other tasks classify.
pub struct FailureClassifier {
    rules: RwLock<RuleTables>,
}

impl FailureClassifier {
    /// Creates a classifier with the built-in rules.
    pub fn new() -> Self {
        let compile = |table: &[(&str, FailureKind)]| -> Vec<Rule> {
            table
                .iter()
                .filter_map(|(pattern, kind)| match Rule::compile(pattern, *kind) {
                    Ok(rule) => Some(rule),
                    Err(e) => {
                        tracing::error!(error = %e, "skipping built-in failure rule");
                        None
                    }
                })
                .collect()
        };
        Self {
            rules: RwLock::new(RuleTables {
                retryable: compile(rules::RETRYABLE),
                permanent: compile(rules::PERMANENT),
            }),
        }
    }

    /// Creates a classifier with no rules; everything is [`FailureKind::Unknown`]
    /// until patterns are added.
    pub fn empty() -> Self {
        Self {
            rules: RwLock::new(RuleTables::default()),
        }
    }

    /// Classifies an error description.
    ///
    /// Never fails. Empty or unmatched input yields [`FailureKind::Unknown`].
    pub fn classify(&self, description: &str) -> FailureKind {
        if description.is_empty() {
            return FailureKind::Unknown;
        }

        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        match rules.find(description) {
            Some(rule) => {
                tracing::debug!(
                    kind = rule.kind.as_str(),
                    pattern = rule.pattern.as_str(),
                    "classified failure"
                );
                rule.kind
            }
            None => {
                tracing::warn!(
                    description = truncate(description, 200),
                    "could not classify failure"
                );
                FailureKind::Unknown
            }
        }
    }

    /// Classifies a Rust error, including its chain of sources.
    pub fn classify_error(&self, error: &(dyn std::error::Error + 'static)) -> FailureKind {
        let mut description = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            description.push_str(": ");
            description.push_str(&cause.to_string());
            source = cause.source();
        }
        self.classify(&description)
    }

    /// Returns `true` if failures of this kind may be retried.
    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        kind.is_retryable()
    }

    /// Classifies and decides in one step.
    pub fn should_retry(&self, description: &str) -> Classification {
        let classification = Classification::from(self.classify(description));
        if classification.retryable {
            tracing::debug!(kind = classification.kind.as_str(), "failure is retryable");
        } else {
            tracing::warn!(kind = classification.kind.as_str(), "failure is not retryable");
        }
        classification
    }

    /// A human-readable description of a kind.
    pub fn description(&self, kind: FailureKind) -> &'static str {
        kind.description()
    }

    /// Appends a rule to the retryable or permanent table.
    ///
    /// The new rule is evaluated after the existing rules of its table.
    /// `retryable` must agree with [`FailureKind::is_retryable`] for `kind`.
    pub fn add_pattern(
        &self,
        pattern: &str,
        kind: FailureKind,
        retryable: bool,
    ) -> Result<(), ClassifierError> {
        if kind.is_retryable() != retryable {
            return Err(ClassifierError::KindMismatch {
                kind,
                expected: kind.is_retryable(),
            });
        }
        let rule = Rule::compile(pattern, kind)?;

        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        if retryable {
            rules.retryable.push(rule);
        } else {
            rules.permanent.push(rule);
        }
        tracing::info!(pattern, kind = kind.as_str(), retryable, "added failure pattern");
        Ok(())
    }

    /// Number of rules in each table, as `(retryable, permanent)`.
    pub fn rule_counts(&self) -> (usize, usize) {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        (rules.retryable.len(), rules.permanent.len())
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FailureClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (retryable, permanent) = self.rule_counts();
        f.debug_struct("FailureClassifier")
            .field("retryable_rules", &retryable)
            .field("permanent_rules", &permanent)
            .finish()
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
