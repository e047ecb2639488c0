//! Property tests for the failure classifier.
//!
//! Invariants tested:
//! - Descriptions matching no rule are unknown and never retried
//! - The retry verdict always agrees with the kind
//! - A known error token is found wherever it sits in the description

use job_safety_classifier::FailureClassifier;
use job_safety_core::FailureKind;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    /// Property: unmatched failures fail closed
    #[test]
    fn unmatched_descriptions_are_not_retried(description in "[q-z ]{0,40}") {
        let classifier = FailureClassifier::new();
        let verdict = classifier.should_retry(&description);
        prop_assert_eq!(verdict.kind, FailureKind::Unknown);
        prop_assert!(!verdict.retryable);
    }

    /// Property: classification is deterministic and consistent with the kind
    #[test]
    fn verdict_matches_kind(description in ".{0,80}") {
        let classifier = FailureClassifier::new();
        let kind = classifier.classify(&description);
        prop_assert_eq!(classifier.classify(&description), kind);
        prop_assert_eq!(classifier.should_retry(&description).retryable, kind.is_retryable());
    }

    /// Property: surrounding noise does not hide a known error
    #[test]
    fn known_tokens_are_found_in_noise(
        prefix in "[q-z ]{0,20}",
        suffix in "[q-z ]{0,20}",
        token in prop::sample::select(vec![
            ("ConnectionError", FailureKind::NetworkError),
            ("deadline exceeded", FailureKind::Timeout),
            ("Too Many Requests", FailureKind::RateLimit),
            ("database is locked", FailureKind::ResourceLock),
            ("insufficient funds", FailureKind::InsufficientBalance),
            ("ValidationError", FailureKind::ValidationError),
        ]),
    ) {
        let (error, expected) = token;
        let classifier = FailureClassifier::new();
        let description = format!("{prefix} {error} {suffix}");
        prop_assert_eq!(classifier.classify(&description), expected);
    }
}
