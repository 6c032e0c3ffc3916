//! Failure classification
//!
//! Decides which failed executions count toward a circuit. The default counts
//! every failure; a deployment can exclude error codes that say nothing about
//! the health of the backing dependency (bad input, for instance).

use std::collections::HashSet;

/// Context provided to failure classifiers
#[derive(Debug, Clone, Copy)]
pub struct FailureContext<'a> {
    pub job_type: &'a str,
    pub error_code: &'a str,
    pub message: &'a str,
    /// Retry hops the job had already taken
    pub attempt_count: u32,
}

/// Trait for classifying failures - determines if a failure should be counted
///
/// # Examples
///
/// ```rust
/// use job_gate::{FailureClassifier, FailureContext};
///
/// #[derive(Debug)]
/// struct UpstreamOnly;
///
/// impl FailureClassifier for UpstreamOnly {
///     fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
///         ctx.error_code.starts_with("UPSTREAM_")
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    /// Returns `true` if the failure should increment its failure counter
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Counts every failure
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn should_trip(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Counts every failure except the listed error codes
#[derive(Debug, Clone, Default)]
pub struct IgnoreErrorCodes {
    codes: HashSet<String>,
}

impl IgnoreErrorCodes {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }
}

impl FailureClassifier for IgnoreErrorCodes {
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        !self.codes.contains(ctx.error_code)
    }
}

/// Predicate-based classifier using a closure
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(job_type: &'a str, error_code: &'a str) -> FailureContext<'a> {
        FailureContext {
            job_type,
            error_code,
            message: "failed",
            attempt_count: 0,
        }
    }

    #[test]
    fn test_default_classifier_counts_everything() {
        assert!(DefaultClassifier.should_trip(&ctx("email", "API_TIMEOUT")));
        assert!(DefaultClassifier.should_trip(&ctx("email", "VALIDATION_ERROR")));
    }

    #[test]
    fn test_ignore_error_codes() {
        let classifier = IgnoreErrorCodes::new(["VALIDATION_ERROR"]);

        assert!(classifier.should_trip(&ctx("email", "API_TIMEOUT")));
        assert!(!classifier.should_trip(&ctx("email", "VALIDATION_ERROR")));
    }

    #[test]
    fn test_predicate_classifier_per_job_type() {
        let classifier = PredicateClassifier::new(|ctx| ctx.job_type != "report");

        assert!(classifier.should_trip(&ctx("email", "API_TIMEOUT")));
        assert!(!classifier.should_trip(&ctx("report", "API_TIMEOUT")));
    }
}
