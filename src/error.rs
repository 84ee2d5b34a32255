use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Reconcile and webhook errors. Anything not listed here is either swallowed
/// at the call site (NotFound on delete, NoMatch on optional kinds) or handled
/// by the admission response itself.
#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to resolve model {name}: {reason}")]
    ModelResolution { name: String, reason: String },

    #[error("runtime {runtime} cannot serve model {model}: {reason}")]
    RuntimeIncompatible {
        runtime: String,
        model: String,
        reason: String,
    },

    #[error("no serving runtime supports model {0}")]
    RuntimeNotFound(String),

    #[error("failed to merge component specs: {0}")]
    MergeSpecs(String),

    #[error("invalid deployment mode: {0}")]
    DeploymentMode(String),

    #[error("serverless mode requested but the Knative Serving CRD is not installed")]
    ServerlessUnavailable,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Terminal errors are not requeued; the object must change before another
    /// reconcile can succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::ServerlessUnavailable)
    }
}
