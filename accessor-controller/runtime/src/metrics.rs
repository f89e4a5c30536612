use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug)]
pub struct AdmissionMetrics {
    reviews: Family<ReviewLabels, Counter>,
    errors: Family<ErrorLabels, Counter>,
    lint_findings: Counter,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct ReviewLabels {
    kind: &'static str,
    decision: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct ErrorLabels {
    reason: &'static str,
}

/// Why a review could not be decided.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ReviewError {
    Request,
    ContentType,
    Decode,
    Unsupported,
    Encode,
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reviews = Family::<ReviewLabels, Counter>::default();
        reg.register(
            "reviews",
            "Total number of admission reviews decided, by resource kind and decision",
            reviews.clone(),
        );

        let errors = Family::<ErrorLabels, Counter>::default();
        reg.register(
            "review_errors",
            "Total number of admission reviews rejected before a decision could be made",
            errors.clone(),
        );

        let lint_findings = Counter::default();
        reg.register(
            "accessor_lint_findings",
            "Total number of inert accessor expressions observed in admission reviews",
            lint_findings.clone(),
        );

        Self {
            reviews,
            errors,
            lint_findings,
        }
    }

    pub(crate) fn decided(&self, kind: &'static str, allowed: bool) {
        let decision = if allowed { "allowed" } else { "denied" };
        self.reviews
            .get_or_create(&ReviewLabels { kind, decision })
            .inc();
    }

    pub(crate) fn failed(&self, error: ReviewError) {
        let reason = match error {
            ReviewError::Request => "request",
            ReviewError::ContentType => "content_type",
            ReviewError::Decode => "decode",
            ReviewError::Unsupported => "unsupported",
            ReviewError::Encode => "encode",
        };
        self.errors.get_or_create(&ErrorLabels { reason }).inc();
    }

    pub(crate) fn linted(&self, findings: usize) {
        self.lint_findings.inc_by(findings as u64);
    }
}
