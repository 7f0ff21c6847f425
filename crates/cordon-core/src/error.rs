//! Error types for cordon-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CordonError {
    #[error("invalid mode: {0}")]
    InvalidMode(String),

    #[error("namespace creation error: {0}")]
    NamespaceCreation(String),

    #[error("filesystem detachment error: {0}")]
    Detachment(String),

    #[error("syscall restriction error: {0}")]
    Restriction(String),

    #[error("wait error: {0}")]
    Wait(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nix error: {0}")]
    Nix(#[from] nix::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CordonError {
    /// Name of the step that produced this error, used in the final diagnostic
    #[must_use]
    pub const fn step(&self) -> &'static str {
        match self {
            Self::InvalidMode(_) => "mode selection",
            Self::NamespaceCreation(_) => "namespace creation",
            Self::Detachment(_) => "filesystem detachment",
            Self::Restriction(_) => "syscall restriction",
            Self::Wait(_) => "child synchronization",
            Self::Io(_) | Self::Nix(_) => "system call",
            Self::Serialization(_) => "identity report",
            Self::Config(_) => "configuration",
        }
    }
}
