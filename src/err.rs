//! Crate-wide error taxonomy (spec §7: errors are classified by kind, not by type).

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Reason a reconcile failed, grouped the way spec.md's error taxonomy groups them.
/// Each variant maps to exactly one Kubernetes event `Reason` and one metric label.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Input violates a documented constraint (bad annotation value, priority out of range, ...).
    /// Not retried until the user edits the resource.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A multi-Ingress group disagreed on a LoadBalancer-scoped option.
    #[error("configuration conflict in group {group}: {detail}")]
    ConfigConflict { group: String, detail: String },

    /// Throttling, 5xx, or `DependencyViolation` from AWS; retried in-call and across reconciles.
    #[error("transient AWS error calling {operation}: {source}")]
    TransientAws {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// Quota exhaustion or a malformed request not caused by user input.
    #[error("permanent AWS error calling {operation}: {source}")]
    PermanentAws {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// Some subtree of the reconcile failed while others succeeded.
    #[error("partial reconcile failure: {0}")]
    PartialSuccess(String),

    /// A previously tagged resource vanished or lost its ownership tags.
    #[error("lost ownership of {kind} {name}")]
    LostOwnership { kind: &'static str, name: String },

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<(&'static str, crate::aws::AwsError)> for ReconcileError {
    fn from((operation, err): (&'static str, crate::aws::AwsError)) -> Self {
        if err.is_transient() {
            ReconcileError::TransientAws { operation: operation.to_string(), source: err.into() }
        } else {
            ReconcileError::PermanentAws { operation: operation.to_string(), source: err.into() }
        }
    }
}

impl ReconcileError {
    /// Stable, low-cardinality label for the AWS-API-call-count / error metric families.
    pub fn metric_label(&self) -> &'static str {
        match self {
            ReconcileError::Validation(_) => "validation",
            ReconcileError::ConfigConflict { .. } => "config_conflict",
            ReconcileError::TransientAws { .. } => "transient_aws",
            ReconcileError::PermanentAws { .. } => "permanent_aws",
            ReconcileError::PartialSuccess(_) => "partial_success",
            ReconcileError::LostOwnership { .. } => "lost_ownership",
            ReconcileError::Kube(_) => "kube",
            ReconcileError::SerdeJson(_) => "serde_json",
            ReconcileError::Other(_) => "other",
        }
    }

    /// Whether this failure should be retried at all (vs. waiting for a user edit).
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ReconcileError::Validation(_) | ReconcileError::ConfigConflict { .. }
        )
    }

    /// Stable Kubernetes event `Reason` vocabulary (spec §7).
    pub fn event_reason(&self) -> &'static str {
        match self {
            ReconcileError::Validation(_) | ReconcileError::ConfigConflict { .. } => {
                "ConfigurationInvalid"
            }
            _ => "Error",
        }
    }
}
