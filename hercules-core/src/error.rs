//! Error types shared across the Hercules core

use std::path::PathBuf;

/// Errors raised by the registry, tool discovery and the local workflow
#[derive(Debug, thiserror::Error)]
pub enum HerculesError {
    #[error("Invalid bitkey: {value}. It must be between 0 and {max}.")]
    InvalidBitkey { value: i64, max: i64 },

    #[error("Required tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid method registry: {0}")]
    InvalidRegistry(String),

    #[error("Unknown obfuscation method: {0}")]
    UnknownMethod(String),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Git command failed: {0}")]
    Git(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = HerculesError> = std::result::Result<T, E>;
