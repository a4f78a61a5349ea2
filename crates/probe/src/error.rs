//! Error types for probe installation

/// Error type for probe setup operations
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// A probe has already been installed for this process
    #[error("Probe already installed")]
    AlreadyInstalled,

    /// No probe has been installed yet
    #[error("Probe not installed")]
    NotInstalled,
}
