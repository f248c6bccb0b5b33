//! Error types for the agent binary.

/// Top-level error for the agent binary.
///
/// Wraps every failure mode of startup and the run so `main` can
/// propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: quartermaster_core::config::ConfigError,
    },

    /// The `simulation` config section could not be parsed.
    #[error("simulation config error: {message}")]
    Simulation {
        /// Description of the failure.
        message: String,
    },

    /// A policy could not be registered.
    #[error("registry error: {source}")]
    Registry {
        /// The underlying registry error.
        #[from]
        source: quartermaster_core::registry::RegistryError,
    },

    /// The run loop failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: quartermaster_core::runner::RunnerError,
    },

    /// The final report could not be serialized.
    #[error("report error: {source}")]
    Report {
        /// The underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}
