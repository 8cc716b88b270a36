use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[source] kube::Error),

    #[error("K8s Invariant Error: {0}")]
    KubeInvariant(String),

    #[error("invariant violation, orchestrator contract broken: {0}")]
    InvariantViolation(String),

    #[error("no rollback candidate found")]
    NoRollbackCandidate,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod channel;
pub mod config;
pub mod resources;
pub mod orchestrator;
pub mod flags;
pub mod history;
pub mod metrics;
pub mod failure_judge;
pub mod cleanup_judge;
pub mod executioner;
pub mod controller;
pub mod http;

pub use config::Config;
pub use executioner::Executioner;
pub use failure_judge::FailureJudge;
pub use cleanup_judge::CleanUpJudge;
pub use orchestrator::{DeploymentPatch, KubeClient, OrchestratorClient};

#[cfg(test)]
pub mod test_support;
